//! ledgersync CLI
//!
//! Command-line client for an offline-first ledger replicated through a
//! WebDAV server.
//!
//! # Commands
//!
//! - `status` - Ping the server and show sync progress
//! - `pull` / `push` / `sync` - Run sync operations now
//! - `conflicts` / `resolve` - Inspect and settle conflicts
//! - `log` - Show or clear the sync log
//! - `add-transaction` / `delete-transaction` / `list` - Edit the local ledger

mod commands;
mod settings;

use clap::{Parser, Subcommand, ValueEnum};
use ledgersync_model::{EntityId, EntityType};
use ledgersync_protocol::Resolution;
use settings::{EndpointArgs, Workspace};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Offline-first ledger sync over WebDAV.
#[derive(Parser)]
#[command(name = "ledgersync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding the local replica
    #[arg(
        global = true,
        short,
        long,
        env = "LEDGERSYNC_STATE_DIR",
        default_value = "ledgersync-state"
    )]
    state_dir: PathBuf,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(flatten)]
    endpoint: EndpointArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for listings.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Format {
    /// Human-readable lines
    Text,
    /// One JSON document
    Json,
}

/// Direction of a transaction.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum KindArg {
    /// Money coming in
    Income,
    /// Money going out
    Expense,
}

#[derive(Subcommand)]
enum Commands {
    /// Ping the server and show remote and local sync progress
    Status,

    /// Download and apply remote changesets
    Pull,

    /// Upload outstanding local changes
    Push,

    /// Pull, then push unless conflicts are pending
    Sync,

    /// List unresolved conflicts
    Conflicts {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Settle a conflict
    Resolve {
        /// Conflict id or unique id prefix
        id: String,

        /// Which side wins (local or remote)
        #[arg(long = "use")]
        resolution: Resolution,
    },

    /// Show the sync log
    Log {
        /// Remove all entries instead
        #[arg(long)]
        clear: bool,
    },

    /// Create or edit a transaction
    AddTransaction {
        /// Amount in minor units (cents)
        #[arg(short, long)]
        amount: i64,

        /// Income or expense
        #[arg(short, long, value_enum, default_value = "expense")]
        kind: KindArg,

        /// Category id
        #[arg(long)]
        category: EntityId,

        /// Account id
        #[arg(long)]
        account: EntityId,

        /// Free-form note
        #[arg(short, long)]
        note: Option<String>,

        /// Edit the transaction with this id instead of creating one
        #[arg(long)]
        id: Option<EntityId>,
    },

    /// Delete a transaction
    DeleteTransaction {
        /// Transaction id
        id: EntityId,
    },

    /// List entities of the local ledger
    List {
        /// Entity type (transaction, category, account, budget, transfer, recurring)
        #[arg(short = 't', long = "type", default_value = "transaction")]
        entity_type: EntityType,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let workspace = Workspace::open(&cli.state_dir, cli.endpoint.to_config())?;
    let sync = workspace.orchestrator()?;

    match cli.command {
        Commands::Status => commands::sync::status(&sync).await?,
        Commands::Pull => commands::sync::pull(&sync).await?,
        Commands::Push => commands::sync::push(&sync).await?,
        Commands::Sync => commands::sync::round(&sync).await?,
        Commands::Conflicts { format } => commands::conflicts::list(&sync, format)?,
        Commands::Resolve { id, resolution } => commands::conflicts::resolve(&sync, &id, resolution)?,
        Commands::Log { clear } => commands::log::run(&sync, clear)?,
        Commands::AddTransaction {
            amount,
            kind,
            category,
            account,
            note,
            id,
        } => commands::ledger::add_transaction(
            &sync,
            commands::ledger::TransactionInput {
                id,
                kind,
                amount,
                category,
                account,
                note,
            },
        )?,
        Commands::DeleteTransaction { id } => commands::ledger::delete_transaction(&sync, id)?,
        Commands::List {
            entity_type,
            format,
        } => commands::ledger::list(&sync, entity_type, format)?,
    }

    Ok(())
}
