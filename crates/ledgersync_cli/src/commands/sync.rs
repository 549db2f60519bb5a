//! Status, pull, push and sync commands.

use ledgersync_engine::{DavClient, RoundOutcome, SyncOrchestrator};

/// Pings the server and prints sync progress.
pub async fn status<C: DavClient + 'static>(
    sync: &SyncOrchestrator<C>,
) -> Result<(), Box<dyn std::error::Error>> {
    let report = sync.status_now().await?;
    println!("{report}");
    Ok(())
}

/// Pulls remote changesets.
pub async fn pull<C: DavClient + 'static>(
    sync: &SyncOrchestrator<C>,
) -> Result<(), Box<dyn std::error::Error>> {
    let summary = sync.pull_now().await?;
    println!("{summary}");
    if !summary.report.conflicts.is_empty() {
        println!("Run `ledgersync conflicts` to review new conflicts.");
    }
    Ok(())
}

/// Pushes outstanding local changes.
pub async fn push<C: DavClient + 'static>(
    sync: &SyncOrchestrator<C>,
) -> Result<(), Box<dyn std::error::Error>> {
    let summary = sync.push_now().await?;
    println!("{summary}");
    Ok(())
}

/// Runs one pull-then-push round.
pub async fn round<C: DavClient + 'static>(
    sync: &SyncOrchestrator<C>,
) -> Result<(), Box<dyn std::error::Error>> {
    let outcome = sync.sync_now().await?;
    println!("{outcome}");
    if let RoundOutcome::ConflictsPending { .. } = outcome {
        println!("Resolve them with `ledgersync resolve <id> --use local|remote`.");
    }
    Ok(())
}
