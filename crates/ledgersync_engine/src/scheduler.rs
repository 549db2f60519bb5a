//! Debounced sync orchestrator.
//!
//! Local edits and configuration changes call [`SyncOrchestrator::trigger`].
//! The first trigger spawns a single background worker that waits out the
//! debounce window; triggers arriving meanwhile only bump a token, and the
//! worker restarts its wait whenever the token moved. Once a window passes
//! quietly, one round runs:
//!
//! ```text
//! idle ──trigger──▶ pending ──debounce──▶ running ──▶ idle
//!                     ▲   │                  │
//!                     └───┘ token moved      └── pull; stop if conflicts; push
//! ```
//!
//! Manual operations share the round lock, so at most one round talks to the
//! endpoint at a time. Disabling sync wakes and stops the worker and bumps
//! the cancel generation; a round already in flight finishes its HTTP calls
//! but drops their results.

use crate::config::{EndpointConfig, SyncConfig};
use crate::error::{SyncError, SyncResult};
use crate::log::{LogEntry, LogLevel};
use crate::replica::Replica;
use crate::session::{CancelGuard, PullSummary, PushSummary, SharedReplica, StatusReport, SyncSession};
use crate::transport::DavClient;
use ledgersync_protocol::{ConflictRecord, Resolution};
use ledgersync_storage::StateStore;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Where the orchestrator is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Nothing scheduled.
    Idle,
    /// A round is scheduled and waiting for the debounce window.
    Pending,
    /// A round or manual operation is talking to the endpoint.
    Running,
}

/// Counters about past rounds.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Rounds that finished, including those stopped by pending conflicts.
    pub rounds_completed: u64,
    /// Rounds that failed.
    pub rounds_failed: u64,
    /// Triggers absorbed into an already scheduled round.
    pub triggers_coalesced: u64,
    /// End of the last finished round.
    pub last_round: Option<Instant>,
    /// Message of the last failure.
    pub last_error: Option<String>,
}

/// Outcome of one pull-then-push round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundOutcome {
    /// Pull and push both ran.
    Completed {
        /// Pull result.
        pull: PullSummary,
        /// Push result.
        push: PushSummary,
    },
    /// Push was skipped because conflicts await resolution.
    ConflictsPending {
        /// Pull result.
        pull: PullSummary,
        /// Number of unresolved conflicts.
        pending: usize,
    },
}

impl fmt::Display for RoundOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundOutcome::Completed { pull, push } => write!(f, "{pull}; {push}"),
            RoundOutcome::ConflictsPending { pull, pending } => write!(
                f,
                "{pull}; conflicts pending: {pending} conflict(s) need resolution, push skipped"
            ),
        }
    }
}

struct Inner<C: DavClient> {
    config: SyncConfig,
    client: Arc<C>,
    replica: SharedReplica,
    endpoint: RwLock<EndpointConfig>,
    enabled: AtomicBool,
    /// Bumped on disable and endpoint change; in-flight results are dropped.
    generation: Arc<AtomicU64>,
    /// Bumped on every trigger; the worker runs only when it is stable.
    token: AtomicU64,
    worker_running: AtomicBool,
    wake: Notify,
    round_lock: tokio::sync::Mutex<()>,
    phase: RwLock<SyncPhase>,
    stats: Mutex<SyncStats>,
}

/// Schedules and runs sync rounds for one replica and endpoint.
pub struct SyncOrchestrator<C: DavClient + 'static> {
    inner: Arc<Inner<C>>,
}

impl<C: DavClient + 'static> Clone for SyncOrchestrator<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: DavClient + 'static> SyncOrchestrator<C> {
    /// Creates an orchestrator over an already opened replica. Sync starts
    /// disabled; manual operations work regardless.
    pub fn new(
        config: SyncConfig,
        client: Arc<C>,
        replica: SharedReplica,
        endpoint: EndpointConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                client,
                replica,
                endpoint: RwLock::new(endpoint),
                enabled: AtomicBool::new(false),
                generation: Arc::new(AtomicU64::new(0)),
                token: AtomicU64::new(0),
                worker_running: AtomicBool::new(false),
                wake: Notify::new(),
                round_lock: tokio::sync::Mutex::new(()),
                phase: RwLock::new(SyncPhase::Idle),
                stats: Mutex::new(SyncStats::default()),
            }),
        }
    }

    /// Opens the replica stored in `store` and creates an orchestrator over it.
    pub fn open(
        config: SyncConfig,
        client: Arc<C>,
        store: Arc<dyn StateStore>,
        endpoint: EndpointConfig,
    ) -> SyncResult<Self> {
        let replica = Replica::open(store, config.device_id.clone(), config.log_capacity)?;
        Ok(Self::new(
            config,
            client,
            Arc::new(Mutex::new(replica)),
            endpoint,
        ))
    }

    /// The shared replica.
    pub fn replica(&self) -> SharedReplica {
        Arc::clone(&self.inner.replica)
    }

    /// Current phase.
    pub fn phase(&self) -> SyncPhase {
        *self.inner.phase.read()
    }

    /// Round counters.
    pub fn stats(&self) -> SyncStats {
        self.inner.stats.lock().clone()
    }

    /// Whether background sync is enabled.
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// The configured endpoint.
    pub fn endpoint(&self) -> EndpointConfig {
        self.inner.endpoint.read().clone()
    }

    /// Enables or disables background sync.
    ///
    /// Enabling schedules a round. Disabling stops a waiting worker and
    /// discards the results of a round in flight.
    pub fn set_enabled(&self, enabled: bool) {
        let was = self.inner.enabled.swap(enabled, Ordering::SeqCst);
        if enabled {
            if !was {
                info!("sync enabled");
                self.trigger("sync enabled");
            }
        } else if was {
            info!("sync disabled");
            self.inner.generation.fetch_add(1, Ordering::SeqCst);
            self.inner.wake.notify_waiters();
        }
    }

    /// Replaces the endpoint. Results of a round in flight against the old
    /// endpoint are discarded and a new round is scheduled.
    pub fn update_endpoint(&self, endpoint: EndpointConfig) {
        info!(endpoint = %endpoint.description(), "endpoint updated");
        *self.inner.endpoint.write() = endpoint;
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.trigger("configuration changed");
    }

    /// Runs `edit` on the replica and schedules a round.
    pub fn edit<R>(&self, edit: impl FnOnce(&mut Replica) -> R) -> R {
        let result = {
            let mut replica = self.inner.replica.lock();
            edit(&mut replica)
        };
        self.trigger("local change");
        result
    }

    /// Schedules a debounced round. Does nothing while sync is disabled.
    ///
    /// Must be called from within a tokio runtime for the round to run.
    pub fn trigger(&self, reason: &str) {
        let inner = &self.inner;
        if !inner.enabled.load(Ordering::SeqCst) {
            debug!(reason, "sync disabled; trigger ignored");
            return;
        }
        inner.token.fetch_add(1, Ordering::SeqCst);
        {
            let mut phase = inner.phase.write();
            if *phase == SyncPhase::Idle {
                *phase = SyncPhase::Pending;
            }
        }

        if inner.worker_running.swap(true, Ordering::SeqCst) {
            inner.stats.lock().triggers_coalesced += 1;
            debug!(reason, "trigger coalesced into pending round");
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(reason, "scheduling sync round");
                let inner = Arc::clone(inner);
                handle.spawn(async move { inner.debounce_worker().await });
            }
            Err(_) => {
                warn!(reason, "no async runtime; sync round not scheduled");
                inner.worker_running.store(false, Ordering::SeqCst);
                inner.set_idle();
            }
        }
    }

    /// Runs a pull-then-push round now, skipping the debounce window.
    pub async fn sync_now(&self) -> SyncResult<RoundOutcome> {
        self.inner.run_round().await
    }

    /// Pulls now.
    pub async fn pull_now(&self) -> SyncResult<PullSummary> {
        let inner = &self.inner;
        inner
            .manual("pull", |session, guard| async move { session.pull(&guard).await })
            .await
    }

    /// Pushes now.
    pub async fn push_now(&self) -> SyncResult<PushSummary> {
        let inner = &self.inner;
        inner
            .manual("push", |session, guard| async move { session.push(&guard).await })
            .await
    }

    /// Pings the endpoint and reports sync progress.
    pub async fn status_now(&self) -> SyncResult<StatusReport> {
        let inner = &self.inner;
        inner
            .manual("status", |session, guard| async move { session.status(&guard).await })
            .await
    }

    /// Unresolved conflicts, oldest first.
    pub fn conflicts(&self) -> Vec<ConflictRecord> {
        self.inner.replica.lock().conflicts().to_vec()
    }

    /// Settles a conflict by id or unique id prefix and schedules a round.
    pub fn resolve(&self, query: &str, resolution: Resolution) -> SyncResult<ConflictRecord> {
        let record = self.inner.replica.lock().resolve(query, resolution)?;
        self.trigger("conflict resolved");
        Ok(record)
    }

    /// Sync log entries, oldest first.
    pub fn logs(&self) -> Vec<LogEntry> {
        self.inner.replica.lock().log_entries()
    }

    /// Clears the sync log.
    pub fn clear_log(&self) -> SyncResult<()> {
        self.inner.replica.lock().clear_log()
    }
}

impl<C: DavClient + 'static> Inner<C> {
    fn session(&self) -> SyncResult<SyncSession<C>> {
        let endpoint = self.endpoint.read().clone();
        SyncSession::new(Arc::clone(&self.client), endpoint, Arc::clone(&self.replica))
    }

    fn set_idle(&self) {
        let mut phase = self.phase.write();
        *phase = if self.worker_running.load(Ordering::SeqCst) {
            SyncPhase::Pending
        } else {
            SyncPhase::Idle
        };
    }

    /// Records an operation's outcome in the sync log.
    fn report<T: fmt::Display>(&self, operation: &str, result: &SyncResult<T>) {
        let mut replica = self.replica.lock();
        match result {
            Ok(outcome) => replica.note(LogLevel::Info, outcome.to_string()),
            Err(SyncError::Cancelled) => {
                replica.note(LogLevel::Info, format!("{operation} cancelled; results discarded"))
            }
            Err(e) => replica.note(LogLevel::Error, format!("{operation} failed: {e}")),
        }
    }

    async fn manual<T, F, Fut>(&self, operation: &str, run: F) -> SyncResult<T>
    where
        T: fmt::Display,
        F: FnOnce(SyncSession<C>, CancelGuard) -> Fut,
        Fut: std::future::Future<Output = SyncResult<T>>,
    {
        let _round = self.round_lock.lock().await;
        *self.phase.write() = SyncPhase::Running;
        let guard = CancelGuard::new(Arc::clone(&self.generation));
        let result = match self.session() {
            Ok(session) => run(session, guard).await,
            Err(e) => Err(e),
        };
        self.report(operation, &result);
        self.set_idle();
        result
    }

    async fn run_round(&self) -> SyncResult<RoundOutcome> {
        let _round = self.round_lock.lock().await;
        *self.phase.write() = SyncPhase::Running;
        let guard = CancelGuard::new(Arc::clone(&self.generation));
        let result = self.pull_then_push(&guard).await;

        self.report("sync", &result);
        {
            let mut stats = self.stats.lock();
            match &result {
                Ok(_) => {
                    stats.rounds_completed += 1;
                    stats.last_round = Some(Instant::now());
                }
                Err(e) => {
                    stats.rounds_failed += 1;
                    stats.last_error = Some(e.to_string());
                }
            }
        }
        self.set_idle();
        result
    }

    async fn pull_then_push(&self, guard: &CancelGuard) -> SyncResult<RoundOutcome> {
        let session = self.session()?;
        let pull = session.pull(guard).await?;
        let pending = self.replica.lock().conflicts().len();
        if pending > 0 {
            warn!(pending, "conflicts pending; push skipped");
            return Ok(RoundOutcome::ConflictsPending { pull, pending });
        }
        let push = session.push(guard).await?;
        Ok(RoundOutcome::Completed { pull, push })
    }

    async fn debounce_worker(self: Arc<Self>) {
        let mut token = self.token.load(Ordering::SeqCst);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.debounce) => {}
                _ = self.wake.notified() => {}
            }
            if !self.enabled.load(Ordering::SeqCst) {
                debug!("sync disabled; scheduled round cancelled");
            } else {
                let current = self.token.load(Ordering::SeqCst);
                if current != token {
                    token = current;
                    continue;
                }
                if let Err(e) = self.run_round().await {
                    debug!(error = %e, retryable = e.is_retryable(), "scheduled round failed");
                }
                let current = self.token.load(Ordering::SeqCst);
                if current != token {
                    token = current;
                    continue;
                }
            }

            self.worker_running.store(false, Ordering::SeqCst);
            // A trigger may have slipped in after the last token check.
            let current = self.token.load(Ordering::SeqCst);
            if self.enabled.load(Ordering::SeqCst)
                && current != token
                && !self.worker_running.swap(true, Ordering::SeqCst)
            {
                token = current;
                continue;
            }
            self.set_idle();
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDav;
    use crate::transport::DavMethod;
    use chrono::Utc;
    use ledgersync_model::{Account, AccountKind, EntityId};
    use ledgersync_storage::InMemoryStore;
    use std::time::Duration;

    fn orchestrator(dav: &Arc<MemoryDav>, device: &str) -> SyncOrchestrator<MemoryDav> {
        let config = SyncConfig::new(device).with_debounce(Duration::from_secs(2));
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());
        let endpoint = EndpointConfig::new("dav.test").with_encryption_key("k");
        SyncOrchestrator::open(config, Arc::clone(dav), store, endpoint).unwrap()
    }

    fn account(n: u8) -> Account {
        let now = Utc::now();
        Account {
            id: EntityId::from_bytes([n; 16]),
            name: format!("account {n}"),
            kind: AccountKind::Bank,
            initial_balance: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_edits_is_one_round() {
        let dav = Arc::new(MemoryDav::new());
        let sync = orchestrator(&dav, "a");
        sync.set_enabled(true);

        for n in 1..=3 {
            sync.edit(|r| r.upsert(account(n), Utc::now())).unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        assert_eq!(sync.phase(), SyncPhase::Pending);
        assert_eq!(sync.stats().rounds_completed, 0);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(sync.stats().rounds_completed, 1);
        assert_eq!(sync.phase(), SyncPhase::Idle);
        assert!(sync.stats().triggers_coalesced >= 3);
        assert!(dav.file("/ledgersync/changeset-00000001.enc").is_some());
        assert!(dav.file("/ledgersync/changeset-00000002.enc").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_sync_ignores_triggers() {
        let dav = Arc::new(MemoryDav::new());
        let sync = orchestrator(&dav, "a");
        sync.edit(|r| r.upsert(account(1), Utc::now())).unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(sync.phase(), SyncPhase::Idle);
        assert_eq!(dav.request_count(DavMethod::Get), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn disabling_cancels_waiting_round() {
        let dav = Arc::new(MemoryDav::new());
        let sync = orchestrator(&dav, "a");
        sync.set_enabled(true);
        sync.edit(|r| r.upsert(account(1), Utc::now())).unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        sync.set_enabled(false);
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(sync.stats().rounds_completed, 0);
        assert_eq!(dav.request_count(DavMethod::Get), 0);
        assert_eq!(sync.phase(), SyncPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_pull_waits_for_running_round() {
        let dav = Arc::new(MemoryDav::new());
        dav.set_latency(Some(Duration::from_millis(300)));
        let sync = orchestrator(&dav, "a");
        sync.set_enabled(true);
        sync.edit(|r| r.upsert(account(1), Utc::now())).unwrap();

        tokio::time::sleep(Duration::from_millis(2_100)).await;
        assert_eq!(sync.phase(), SyncPhase::Running);

        // Runs only after the scheduled round has pushed.
        let pull = sync.pull_now().await.unwrap();
        assert_eq!(pull.latest_sequence, 1);
        assert_eq!(pull.report.echoes, 1);
        assert_eq!(sync.stats().rounds_completed, 1);
        assert_eq!(dav.max_in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disabling_discards_round_in_flight() {
        let dav = Arc::new(MemoryDav::new());
        let other = orchestrator(&dav, "b");
        other.replica().lock().upsert(account(2), Utc::now()).unwrap();
        other.push_now().await.unwrap();

        dav.set_latency(Some(Duration::from_millis(300)));
        let sync = orchestrator(&dav, "a");
        sync.set_enabled(true);
        sync.edit(|r| r.upsert(account(1), Utc::now())).unwrap();

        tokio::time::sleep(Duration::from_millis(2_100)).await;
        assert_eq!(sync.phase(), SyncPhase::Running);
        sync.set_enabled(false);
        tokio::time::sleep(Duration::from_secs(10)).await;

        let stats = sync.stats();
        assert_eq!(stats.rounds_completed, 0);
        assert_eq!(stats.rounds_failed, 1);
        assert_eq!(sync.phase(), SyncPhase::Idle);
        {
            let replica = sync.replica();
            let replica = replica.lock();
            let remote = EntityId::from_bytes([2; 16]);
            assert!(replica.ledger().get::<Account>(&remote).is_none());
            assert_eq!(replica.watermark(&sync.endpoint().endpoint_key()), 0);
            assert_eq!(replica.outbox().len(), 1);
        }
        assert!(dav.file("/ledgersync/changeset-00000002.enc").is_none());
        let logs = sync.logs();
        assert!(logs[logs.len() - 1].message.contains("cancelled"));
    }

    #[tokio::test]
    async fn manual_operations_log_outcomes() {
        let dav = Arc::new(MemoryDav::new());
        let sync = orchestrator(&dav, "a");
        sync.replica()
            .lock()
            .upsert(account(1), Utc::now())
            .unwrap();

        let push = sync.push_now().await.unwrap();
        assert_eq!(push.events, 1);
        let status = sync.status_now().await.unwrap();
        assert_eq!(status.latest_sequence, Some(1));

        let logs = sync.logs();
        assert_eq!(logs.len(), 2);
        assert!(logs[0].message.starts_with("push: uploaded 1"));

        sync.clear_log().unwrap();
        assert!(sync.logs().is_empty());
    }

    #[tokio::test]
    async fn invalid_endpoint_fails_round() {
        let dav = Arc::new(MemoryDav::new());
        let sync = orchestrator(&dav, "a");
        sync.update_endpoint(EndpointConfig::new(""));

        let err = sync.sync_now().await.unwrap_err();
        assert!(matches!(err, SyncError::ConfigurationInvalid(_)));
        assert_eq!(sync.stats().rounds_failed, 1);
        assert_eq!(sync.logs()[0].level, LogLevel::Error);
    }

    #[tokio::test]
    async fn auth_failure_is_not_retryable() {
        let dav = Arc::new(MemoryDav::new().with_credentials("me", "right"));
        let sync = orchestrator(&dav, "a");
        sync.update_endpoint(
            EndpointConfig::new("dav.test")
                .with_credentials("me", "wrong")
                .with_encryption_key("k"),
        );
        let err = sync.pull_now().await.unwrap_err();
        assert!(matches!(err, SyncError::Unauthorized));
        assert!(!err.is_retryable());
    }
}
