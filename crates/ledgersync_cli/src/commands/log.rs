//! Sync log command.

use ledgersync_engine::{DavClient, SyncOrchestrator};

/// Prints the sync log, or clears it.
pub fn run<C: DavClient + 'static>(
    sync: &SyncOrchestrator<C>,
    clear: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if clear {
        sync.clear_log()?;
        println!("Sync log cleared.");
        return Ok(());
    }

    let entries = sync.logs();
    if entries.is_empty() {
        println!("Sync log is empty.");
    }
    for entry in entries {
        println!("{entry}");
    }
    Ok(())
}
