//! Encrypted remote log: immutable changesets plus an append-only index.

use crate::config::EndpointConfig;
use crate::crypto::Cipher;
use crate::error::{SyncError, SyncResult};
use crate::transport::{DavClient, DavTransport};
use ledgersync_model::Timestamp;
use ledgersync_protocol::{
    decode_document, digest, encode_document, ChangeEvent, Changeset, ChangesetRef, RemoteIndex,
    Versioned, INDEX_FILE_NAME,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Result of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The latest remote changeset already carries these events, or there
    /// was nothing to push.
    Unchanged {
        /// Latest remote sequence.
        sequence: u64,
    },
    /// A new changeset was written.
    Created {
        /// Its sequence.
        sequence: u64,
    },
}

impl PushOutcome {
    /// The latest remote sequence after the push.
    pub fn sequence(&self) -> u64 {
        match self {
            PushOutcome::Unchanged { sequence } | PushOutcome::Created { sequence } => *sequence,
        }
    }
}

/// Reads and appends to the remote log of one endpoint.
pub struct RemoteLog<C: DavClient> {
    transport: DavTransport<C>,
    cipher: Cipher,
    endpoint: EndpointConfig,
}

impl<C: DavClient> RemoteLog<C> {
    /// Opens the log of a validated endpoint.
    pub fn new(client: Arc<C>, endpoint: EndpointConfig) -> SyncResult<Self> {
        endpoint.validate()?;
        Ok(Self {
            transport: DavTransport::new(client, &endpoint),
            cipher: Cipher::from_passphrase(endpoint.normalized_encryption_key()),
            endpoint,
        })
    }

    /// The endpoint this log belongs to.
    pub fn endpoint(&self) -> &EndpointConfig {
        &self.endpoint
    }

    fn url(&self, file_name: &str) -> SyncResult<String> {
        self.endpoint
            .file_url(file_name)
            .ok_or_else(|| SyncError::ConfigurationInvalid("server host is missing".into()))
    }

    async fn download<T: DeserializeOwned + Versioned>(
        &self,
        file_name: &str,
    ) -> SyncResult<Option<T>> {
        let url = self.url(file_name)?;
        let Some(sealed) = self.transport.get(&url).await? else {
            return Ok(None);
        };
        let plain = self.cipher.decrypt(&sealed)?;
        Ok(Some(decode_document(&plain)?))
    }

    async fn upload<T: Serialize>(&self, file_name: &str, document: &T) -> SyncResult<()> {
        let url = self.url(file_name)?;
        let sealed = self.cipher.encrypt(&encode_document(document)?)?;
        self.transport.put(&url, sealed).await
    }

    /// Checks that the sync root is reachable with the configured credentials.
    pub async fn ping(&self) -> SyncResult<()> {
        let url = self
            .endpoint
            .base_url()
            .ok_or_else(|| SyncError::ConfigurationInvalid("server host is missing".into()))?;
        self.transport.ping(&url).await
    }

    /// Downloads the index. `None` when the log has never been written.
    pub async fn fetch_index(&self) -> SyncResult<Option<RemoteIndex>> {
        self.download(INDEX_FILE_NAME).await
    }

    /// Changesets after `watermark`, ascending.
    pub fn refs_after(&self, index: &RemoteIndex, watermark: u64) -> Vec<ChangesetRef> {
        index.refs_after(watermark)
    }

    /// Downloads and verifies one changeset.
    ///
    /// # Errors
    ///
    /// [`SyncError::FormatMismatch`] when the file is missing, its sequence
    /// differs from the file name, or its digest does not match its events.
    pub async fn load_changeset(&self, reference: &ChangesetRef) -> SyncResult<Changeset> {
        let changeset: Changeset = self
            .download(&reference.file_name)
            .await?
            .ok_or_else(|| {
                SyncError::FormatMismatch(format!("{} is listed but missing", reference.file_name))
            })?;
        changeset.verify(reference.sequence)?;
        debug!(
            sequence = changeset.sequence,
            events = changeset.changes.len(),
            "loaded changeset"
        );
        Ok(changeset)
    }

    /// Appends `events` as a new changeset unless the latest changeset
    /// already has the same digest.
    ///
    /// The sequence is always derived from a freshly downloaded index. The
    /// changeset is uploaded before the index, so an interrupted push leaves
    /// at most an unreferenced changeset behind.
    pub async fn push(
        &self,
        events: Vec<ChangeEvent>,
        device_id: &str,
        now: Timestamp,
    ) -> SyncResult<PushOutcome> {
        let index = self
            .fetch_index()
            .await?
            .unwrap_or_else(|| RemoteIndex::empty(now));

        if events.is_empty() {
            return Ok(PushOutcome::Unchanged {
                sequence: index.latest_sequence,
            });
        }

        let outgoing = digest(&events);
        if let Some(latest) = index.latest_ref() {
            let existing: Option<Changeset> = self.download(&latest.file_name).await?;
            if existing.is_some_and(|cs| cs.digest == outgoing) {
                debug!(sequence = index.latest_sequence, "push is a no-op");
                return Ok(PushOutcome::Unchanged {
                    sequence: index.latest_sequence,
                });
            }
        }

        let sequence = index.next_sequence();
        let changeset = Changeset::new(sequence, device_id, now, events);
        let reference = ChangesetRef::for_sequence(sequence);
        self.upload(&reference.file_name, &changeset).await?;
        self.upload(INDEX_FILE_NAME, &index.appended(sequence, now))
            .await?;

        info!(
            sequence,
            events = changeset.changes.len(),
            "pushed changeset"
        );
        Ok(PushOutcome::Created { sequence })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDav;
    use chrono::{TimeZone, Utc};
    use ledgersync_model::{EntityId, EntityType};
    use ledgersync_protocol::{changeset_file_name, Operation};
    use uuid::Uuid;

    fn ts(secs: i64) -> Timestamp {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    fn endpoint() -> EndpointConfig {
        EndpointConfig::new("dav.test")
            .with_path("/sync/ledger")
            .with_encryption_key("secret")
    }

    fn event(n: u8) -> ChangeEvent {
        ChangeEvent {
            event_id: Uuid::from_bytes([n; 16]),
            device_id: "a".into(),
            created_at: ts(1),
            entity_type: EntityType::Budget,
            operation: Operation::Delete,
            entity_id: EntityId::from_bytes([n; 16]),
            base_updated_at: None,
            entity_updated_at: ts(1),
            payload: None,
            payload_hash: None,
            deleted_at: Some(ts(1)),
        }
    }

    #[test]
    fn rejects_invalid_endpoint() {
        let dav = Arc::new(MemoryDav::new());
        assert!(matches!(
            RemoteLog::new(dav, EndpointConfig::new("h")),
            Err(SyncError::ConfigurationInvalid(_))
        ));
    }

    #[tokio::test]
    async fn empty_remote_has_no_index() {
        let log = RemoteLog::new(Arc::new(MemoryDav::new()), endpoint()).unwrap();
        assert_eq!(log.fetch_index().await.unwrap(), None);
    }

    #[tokio::test]
    async fn push_then_read_back() {
        let dav = Arc::new(MemoryDav::new());
        let log = RemoteLog::new(Arc::clone(&dav), endpoint()).unwrap();

        let outcome = log.push(vec![event(1), event(2)], "a", ts(10)).await.unwrap();
        assert_eq!(outcome, PushOutcome::Created { sequence: 1 });

        let index = log.fetch_index().await.unwrap().unwrap();
        assert_eq!(index.latest_sequence, 1);
        let refs = log.refs_after(&index, 0);
        assert_eq!(refs.len(), 1);

        let cs = log.load_changeset(&refs[0]).await.unwrap();
        assert_eq!(cs.changes, vec![event(1), event(2)]);
        assert_eq!(cs.device_id, "a");
        assert!(dav.file("/sync/ledger/changeset-00000001.enc").is_some());
    }

    #[tokio::test]
    async fn identical_push_is_noop() {
        let dav = Arc::new(MemoryDav::new());
        let log = RemoteLog::new(Arc::clone(&dav), endpoint()).unwrap();

        log.push(vec![event(1)], "a", ts(10)).await.unwrap();
        let again = log.push(vec![event(1)], "a", ts(11)).await.unwrap();
        assert_eq!(again, PushOutcome::Unchanged { sequence: 1 });

        let next = log.push(vec![event(1), event(3)], "a", ts(12)).await.unwrap();
        assert_eq!(next, PushOutcome::Created { sequence: 2 });
        assert_eq!(dav.file_paths().len(), 3);
    }

    #[tokio::test]
    async fn wrong_key_is_decryption_failure() {
        let dav = Arc::new(MemoryDav::new());
        let writer = RemoteLog::new(Arc::clone(&dav), endpoint()).unwrap();
        writer.push(vec![event(1)], "a", ts(1)).await.unwrap();

        let reader =
            RemoteLog::new(Arc::clone(&dav), endpoint().with_encryption_key("other")).unwrap();
        assert!(matches!(
            reader.fetch_index().await,
            Err(SyncError::DecryptionFailed)
        ));
    }

    #[tokio::test]
    async fn renamed_changeset_is_format_mismatch() {
        let dav = Arc::new(MemoryDav::new());
        let log = RemoteLog::new(Arc::clone(&dav), endpoint()).unwrap();
        log.push(vec![event(1)], "a", ts(1)).await.unwrap();

        let bytes = dav.file("/sync/ledger/changeset-00000001.enc").unwrap();
        dav.put_file(&format!("/sync/ledger/{}", changeset_file_name(7)), bytes);

        let err = log
            .load_changeset(&ChangesetRef::for_sequence(7))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::FormatMismatch(_)));
    }

    #[tokio::test]
    async fn missing_changeset_is_format_mismatch() {
        let log = RemoteLog::new(Arc::new(MemoryDav::new()), endpoint()).unwrap();
        let err = log
            .load_changeset(&ChangesetRef::for_sequence(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::FormatMismatch(_)));
    }
}
