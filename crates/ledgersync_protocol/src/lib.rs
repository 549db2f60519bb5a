//! # ledgersync protocol
//!
//! Types exchanged through the remote store and the codec that turns them
//! into bytes.
//!
//! This crate provides:
//! - [`ChangeEvent`] and its [`Operation`]
//! - [`Changeset`] with its content [`digest`]
//! - [`RemoteIndex`] and changeset file naming ([`ChangesetRef`])
//! - [`ConflictRecord`] and [`Resolution`]
//! - CBOR document encoding with protocol version checks
//!
//! ## Remote Layout
//!
//! ```text
//! <root>/index.enc
//! <root>/changeset-00000001.enc
//! <root>/changeset-00000002.enc
//! ...
//! ```
//!
//! Changeset files are written once and never revised. Only the index is
//! rewritten, and only by appending a file name.
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod changeset;
mod codec;
mod conflict;
mod error;
mod event;
mod index;

pub use changeset::{digest, Changeset};
pub use codec::{decode_document, encode_document, Versioned};
pub use conflict::{ConflictRecord, Resolution};
pub use error::{ProtocolError, ProtocolResult};
pub use event::{ChangeEvent, Operation};
pub use index::{changeset_file_name, ChangesetRef, RemoteIndex, INDEX_FILE_NAME};

/// Protocol version written to every changeset and index.
pub const PROTOCOL_VERSION: u32 = 2;
