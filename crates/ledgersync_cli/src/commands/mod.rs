//! CLI command implementations.

pub mod conflicts;
pub mod ledger;
pub mod log;
pub mod sync;
