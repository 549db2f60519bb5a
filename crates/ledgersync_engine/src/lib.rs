//! # ledgersync engine
//!
//! Offline-first replication of a ledger through a dumb WebDAV store.
//!
//! This crate provides:
//! - AES-256-GCM sealing of remote documents ([`Cipher`])
//! - A WebDAV transport over an async [`DavClient`] seam, with a `reqwest`
//!   client and an in-memory server for tests
//! - The encrypted remote log of changesets and its index ([`RemoteLog`])
//! - The local [`Outbox`] of unacknowledged change events
//! - The conflict engine and its mailbox
//! - The local [`Replica`] that keeps entities, markers and sync state
//!   persisted together
//! - A debounced [`SyncOrchestrator`] with manual pull, push and status
//!
//! ## Round
//!
//! A sync round is **pull-then-push**:
//! 1. Download the index and every changeset after the local watermark
//! 2. Classify each remote event: skip, acknowledge, apply or conflict
//! 3. Stop if conflicts are pending; otherwise push the outbox as a new
//!    changeset, unless the latest changeset already carries it
//!
//! ## Key Invariants
//!
//! - Changeset files are immutable; the index only grows
//! - A new sequence is always derived from a freshly downloaded index
//! - The changeset is uploaded before the index that references it
//! - Remote changes are never echoed back into the outbox
//! - A conflict is filed at most once per remote event

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod conflict;
mod crypto;
mod error;
mod http;
mod log;
mod memory;
mod outbox;
mod remote_log;
mod replica;
mod scheduler;
mod session;
mod transport;

pub use config::{
    EndpointConfig, SyncConfig, DEFAULT_DEBOUNCE, DEFAULT_LOG_CAPACITY, DEFAULT_TIMEOUT,
    DEFAULT_USER_AGENT,
};
pub use conflict::{classify, ConflictMailbox, EventHistory, Verdict};
pub use crypto::{Cipher, SyncKey, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
pub use error::{SyncError, SyncResult};
pub use http::ReqwestDavClient;
pub use log::{LogEntry, LogLevel, SyncLog};
pub use memory::MemoryDav;
pub use outbox::{Mutation, Outbox, RecordMode};
pub use remote_log::{PushOutcome, RemoteLog};
pub use replica::{ApplyReport, Replica};
pub use scheduler::{RoundOutcome, SyncOrchestrator, SyncPhase, SyncStats};
pub use session::{CancelGuard, PullSummary, PushSummary, SharedReplica, StatusReport, SyncSession};
pub use transport::{Credentials, DavClient, DavMethod, DavRequest, DavResponse, DavTransport};
