//! # swarmd-store
//!
//! The persistent claim store: durable, crash-safe storage for the
//! coordination collections under a single coordination directory.
//!
//! - One pretty-printed JSON file per collection (`work_claims.json`,
//!   `agent_status.json`, `coordination_log.json`), newline-delimited
//!   JSON for span and history logs
//! - All mutations run under an exclusive advisory lock on
//!   `.coordination.lock`, acquired with capped exponential backoff
//! - Writes commit via write-to-temp + fsync + rename, so a crash leaves
//!   either the old or the new content, never a torn file
//! - A collection that fails schema validation is poisoned: further
//!   mutations on it are refused until an operator intervenes

pub mod lock;
pub mod retention;
pub mod store;

pub use retention::{enforce_retention, RetentionReport};
pub use store::{ClaimStore, Collection, StoreTxn};
