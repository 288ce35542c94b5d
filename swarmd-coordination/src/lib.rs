//! # swarmd-coordination
//!
//! The work-claim coordinator: single writer for `work_claims` and
//! `agent_status`, exposing the work lifecycle (register, claim,
//! progress, complete, release) with atomic semantics.
//!
//! Every operation is one store mutation: it either fully applies
//! (durably, via the store's lock + rename commit) or returns an error
//! without modifying state. At most one agent holds the claim on a work
//! item at any instant.

pub mod coordinator;
pub mod routing;

pub use coordinator::{ClaimRecord, CoordinationSnapshot, Coordinator, WorkRequest};
