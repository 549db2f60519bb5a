//! Local ledger commands.

use crate::{Format, KindArg};
use chrono::Utc;
use ledgersync_engine::{DavClient, SyncOrchestrator};
use ledgersync_model::{
    Account, Budget, Category, EntityId, EntityType, Ledger, RecurringRule, Replicable,
    Transaction, TransactionKind, Transfer, UpsertOutcome,
};

/// Fields of a transaction to create or edit.
#[derive(Debug)]
pub struct TransactionInput {
    /// Existing transaction to edit.
    pub id: Option<EntityId>,
    /// Income or expense.
    pub kind: KindArg,
    /// Amount in minor units.
    pub amount: i64,
    /// Category id.
    pub category: EntityId,
    /// Account id.
    pub account: EntityId,
    /// Free-form note.
    pub note: Option<String>,
}

impl From<KindArg> for TransactionKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Income => TransactionKind::Income,
            KindArg::Expense => TransactionKind::Expense,
        }
    }
}

/// Formats minor units as a decimal amount.
pub fn format_amount(minor: i64) -> String {
    let sign = if minor < 0 { "-" } else { "" };
    let abs = minor.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

fn describe_transaction(txn: &Transaction) -> String {
    let kind = match txn.kind {
        TransactionKind::Income => "income ",
        TransactionKind::Expense => "expense",
    };
    format!(
        "{}  {}  {kind}  {:>12}  {}",
        txn.id,
        txn.date.format("%Y-%m-%d"),
        format_amount(txn.amount),
        txn.note.as_deref().unwrap_or("")
    )
}

/// Creates a transaction, or edits one when `input.id` is set.
pub fn add_transaction<C: DavClient + 'static>(
    sync: &SyncOrchestrator<C>,
    input: TransactionInput,
) -> Result<(), Box<dyn std::error::Error>> {
    let now = Utc::now();
    let (id, created_at, date) = match input.id {
        Some(id) => {
            let replica = sync.replica();
            let replica = replica.lock();
            let existing = replica
                .ledger()
                .get::<Transaction>(&id)
                .ok_or_else(|| format!("no transaction with id {id}"))?;
            (id, existing.created_at, existing.date)
        }
        None => (EntityId::new(), now, now),
    };

    let txn = Transaction {
        id,
        kind: input.kind.into(),
        amount: input.amount,
        date,
        category_id: input.category,
        account_id: input.account,
        note: input.note,
        created_at,
        updated_at: now,
    };
    let line = describe_transaction(&txn);
    match sync.edit(|replica| replica.upsert(txn, now))? {
        UpsertOutcome::BlockedByNewerLocal | UpsertOutcome::BlockedByTombstone => {
            println!("Not saved: a newer version or deletion of {id} exists.");
        }
        _ => println!("{line}"),
    }
    Ok(())
}

/// Deletes a transaction.
pub fn delete_transaction<C: DavClient + 'static>(
    sync: &SyncOrchestrator<C>,
    id: EntityId,
) -> Result<(), Box<dyn std::error::Error>> {
    let now = Utc::now();
    if sync.edit(|replica| replica.delete::<Transaction>(id, now, now))? {
        println!("Deleted transaction {}.", id.short());
    } else {
        println!("No transaction {} to delete.", id.short());
    }
    Ok(())
}

fn print_collection<T: Replicable>(
    ledger: &Ledger,
    format: Format,
    describe: impl Fn(&T) -> Result<String, serde_json::Error>,
) -> Result<(), Box<dyn std::error::Error>> {
    let collection = ledger.collection::<T>();
    match format {
        Format::Json => {
            let entities: Vec<&T> = collection.iter().collect();
            println!("{}", serde_json::to_string_pretty(&entities)?);
        }
        Format::Text => {
            for entity in collection.iter() {
                println!("{}", describe(entity)?);
            }
            println!(
                "{} {} live, {} deleted",
                collection.len(),
                T::ENTITY_TYPE.collection_name(),
                collection.tombstones().len()
            );
        }
    }
    Ok(())
}

fn as_json<T: Replicable>(entity: &T) -> Result<String, serde_json::Error> {
    Ok(format!("{}  {}", entity.id(), serde_json::to_string(entity)?))
}

/// Prints the live entities of one type.
pub fn list<C: DavClient + 'static>(
    sync: &SyncOrchestrator<C>,
    entity_type: EntityType,
    format: Format,
) -> Result<(), Box<dyn std::error::Error>> {
    let replica = sync.replica();
    let replica = replica.lock();
    let ledger = replica.ledger();
    match entity_type {
        EntityType::Transaction => {
            print_collection::<Transaction>(ledger, format, |t| Ok(describe_transaction(t)))
        }
        EntityType::Category => print_collection::<Category>(ledger, format, as_json),
        EntityType::Account => print_collection::<Account>(ledger, format, as_json),
        EntityType::Budget => print_collection::<Budget>(ledger, format, as_json),
        EntityType::Transfer => print_collection::<Transfer>(ledger, format, as_json),
        EntityType::Recurring => print_collection::<RecurringRule>(ledger, format, as_json),
    }
}
