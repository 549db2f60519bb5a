//! Conflict listing and resolution commands.

use crate::Format;
use ledgersync_engine::{DavClient, SyncOrchestrator};
use ledgersync_protocol::{ConflictRecord, Resolution};

/// One line per conflict: short id, detection time and summary.
pub fn describe(record: &ConflictRecord) -> String {
    format!(
        "{}  {}  {}",
        &record.id.simple().to_string()[..8],
        record.detected_at.format("%Y-%m-%d %H:%M:%S"),
        record.summary()
    )
}

/// Prints unresolved conflicts.
pub fn list<C: DavClient + 'static>(
    sync: &SyncOrchestrator<C>,
    format: Format,
) -> Result<(), Box<dyn std::error::Error>> {
    let records = sync.conflicts();
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&records)?),
        Format::Text => {
            if records.is_empty() {
                println!("No pending conflicts.");
            }
            for record in &records {
                println!("{}", describe(record));
            }
        }
    }
    Ok(())
}

/// Settles one conflict.
pub fn resolve<C: DavClient + 'static>(
    sync: &SyncOrchestrator<C>,
    query: &str,
    resolution: Resolution,
) -> Result<(), Box<dyn std::error::Error>> {
    let record = sync.resolve(query, resolution)?;
    println!(
        "Resolved {} {} using {resolution}.",
        record.entity_type,
        record.entity_id.short()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ledgersync_model::{EntityId, EntityType};
    use ledgersync_protocol::{ChangeEvent, Operation};
    use uuid::Uuid;

    #[test]
    fn describe_uses_short_id() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).single().unwrap();
        let event = ChangeEvent {
            event_id: Uuid::new_v4(),
            device_id: "phone".into(),
            created_at: at,
            entity_type: EntityType::Budget,
            operation: Operation::Delete,
            entity_id: EntityId::new(),
            base_updated_at: None,
            entity_updated_at: at,
            payload: None,
            payload_hash: None,
            deleted_at: Some(at),
        };
        let record = ConflictRecord::new(at, event, None, None, None);
        let line = describe(&record);
        assert!(line.starts_with(&record.id.simple().to_string()[..8]));
        assert!(line.contains("2024-05-01 09:30:00"));
        assert!(line.contains("budget"));
    }
}
