//! Pull, push and status against one endpoint.

use crate::config::EndpointConfig;
use crate::error::{SyncError, SyncResult};
use crate::remote_log::{PushOutcome, RemoteLog};
use crate::replica::{ApplyReport, Replica};
use crate::transport::DavClient;
use chrono::Utc;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A replica shared between the orchestrator and its callers.
///
/// The lock is only ever held for synchronous work, never across an await.
pub type SharedReplica = Arc<Mutex<Replica>>;

/// Detects that sync was disabled or reconfigured while a round was running.
///
/// The guard remembers the generation at creation; once the shared counter
/// moves on, [`check`](Self::check) fails with [`SyncError::Cancelled`] and
/// the caller discards what it fetched.
#[derive(Debug, Clone)]
pub struct CancelGuard {
    generation: Arc<AtomicU64>,
    started: u64,
}

impl CancelGuard {
    /// Captures the current generation.
    pub fn new(generation: Arc<AtomicU64>) -> Self {
        let started = generation.load(Ordering::SeqCst);
        Self {
            generation,
            started,
        }
    }

    /// A guard that never cancels.
    pub fn detached() -> Self {
        Self::new(Arc::new(AtomicU64::new(0)))
    }

    /// Fails if the generation changed since the guard was created.
    pub fn check(&self) -> SyncResult<()> {
        if self.generation.load(Ordering::SeqCst) == self.started {
            Ok(())
        } else {
            Err(SyncError::Cancelled)
        }
    }
}

/// Result of a pull.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullSummary {
    /// Changesets processed.
    pub changesets: usize,
    /// Latest sequence in the remote index, 0 when the log is empty.
    pub latest_sequence: u64,
    /// Local watermark after the pull.
    pub watermark: u64,
    /// Combined outcome of all processed changesets.
    pub report: ApplyReport,
}

impl fmt::Display for PullSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.changesets == 0 {
            return write!(f, "pull: up to date at sequence {}", self.watermark);
        }
        write!(
            f,
            "pull: {} changeset(s) up to sequence {}: {} applied, {} acknowledged, {} echoes, {} blocked, {} conflicts",
            self.changesets,
            self.watermark,
            self.report.applied,
            self.report.acknowledged,
            self.report.echoes,
            self.report.blocked,
            self.report.conflicts.len()
        )
    }
}

/// Result of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushSummary {
    /// Outstanding events offered to the remote log.
    pub events: usize,
    /// What the remote log did with them.
    pub outcome: PushOutcome,
}

impl fmt::Display for PushSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.outcome {
            PushOutcome::Created { sequence } => write!(
                f,
                "push: uploaded {} event(s) as changeset {sequence}",
                self.events
            ),
            PushOutcome::Unchanged { .. } if self.events == 0 => write!(f, "push: nothing to push"),
            PushOutcome::Unchanged { sequence } => write!(
                f,
                "push: remote already holds these {} event(s) at sequence {sequence}",
                self.events
            ),
        }
    }
}

/// Snapshot of local and remote sync state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    /// Human-readable endpoint.
    pub endpoint: String,
    /// Latest remote sequence, `None` when the log has never been written.
    pub latest_sequence: Option<u64>,
    /// Last processed sequence on this device.
    pub watermark: u64,
    /// Outstanding local events.
    pub outbox: usize,
    /// Unresolved conflicts.
    pub conflicts: usize,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "endpoint: {} (reachable)", self.endpoint)?;
        match self.latest_sequence {
            Some(sequence) => writeln!(f, "remote: latest sequence {sequence}")?,
            None => writeln!(f, "remote: no changesets yet")?,
        }
        writeln!(f, "local watermark: {}", self.watermark)?;
        writeln!(f, "outbox: {} pending event(s)", self.outbox)?;
        write!(f, "conflicts: {} pending", self.conflicts)
    }
}

/// Protocol operations of one endpoint over a shared replica.
pub struct SyncSession<C: DavClient> {
    remote: RemoteLog<C>,
    replica: SharedReplica,
    endpoint_key: String,
}

impl<C: DavClient> SyncSession<C> {
    /// Opens a session. Fails with [`SyncError::ConfigurationInvalid`] when
    /// the endpoint is incomplete.
    pub fn new(client: Arc<C>, endpoint: EndpointConfig, replica: SharedReplica) -> SyncResult<Self> {
        let endpoint_key = endpoint.endpoint_key();
        Ok(Self {
            remote: RemoteLog::new(client, endpoint)?,
            replica,
            endpoint_key,
        })
    }

    /// Key under which this endpoint's watermark is stored.
    pub fn endpoint_key(&self) -> &str {
        &self.endpoint_key
    }

    /// Downloads and applies every changeset after the local watermark.
    ///
    /// The watermark advances after each changeset, so an interrupted pull
    /// resumes where it stopped.
    pub async fn pull(&self, guard: &CancelGuard) -> SyncResult<PullSummary> {
        let index = self.remote.fetch_index().await?;
        guard.check()?;

        let watermark = self.replica.lock().watermark(&self.endpoint_key);
        let mut summary = PullSummary {
            watermark,
            ..PullSummary::default()
        };
        let Some(index) = index else {
            debug!("remote log is empty");
            return Ok(summary);
        };
        summary.latest_sequence = index.latest_sequence;
        if index.latest_sequence < watermark {
            warn!(
                latest = index.latest_sequence,
                watermark, "remote log is behind the local watermark"
            );
        }

        for reference in self.remote.refs_after(&index, watermark) {
            let changeset = self.remote.load_changeset(&reference).await?;
            guard.check()?;

            let report = {
                let mut replica = self.replica.lock();
                let report = replica.apply_changeset(&changeset, Utc::now())?;
                replica.set_watermark(&self.endpoint_key, reference.sequence)?;
                report
            };
            summary.changesets += 1;
            summary.watermark = reference.sequence;
            summary.report.merge(report);
        }

        info!(
            changesets = summary.changesets,
            watermark = summary.watermark,
            conflicts = summary.report.conflicts.len(),
            "pull finished"
        );
        Ok(summary)
    }

    /// Uploads outstanding local events as a new changeset.
    ///
    /// Pushed events stay in the outbox until their echo is pulled.
    pub async fn push(&self, guard: &CancelGuard) -> SyncResult<PushSummary> {
        let (events, device_id) = {
            let mut replica = self.replica.lock();
            (replica.pending_events()?, replica.device_id().to_string())
        };
        let count = events.len();
        let outcome = self.remote.push(events, &device_id, Utc::now()).await?;
        guard.check()?;
        Ok(PushSummary {
            events: count,
            outcome,
        })
    }

    /// Pings the endpoint and reports remote and local progress.
    pub async fn status(&self, guard: &CancelGuard) -> SyncResult<StatusReport> {
        self.remote.ping().await?;
        let index = self.remote.fetch_index().await?;
        guard.check()?;

        let replica = self.replica.lock();
        Ok(StatusReport {
            endpoint: self.remote.endpoint().description(),
            latest_sequence: index.map(|i| i.latest_sequence),
            watermark: replica.watermark(&self.endpoint_key),
            outbox: replica.outbox().len(),
            conflicts: replica.conflicts().len(),
        })
    }
}
