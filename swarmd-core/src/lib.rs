//! # swarmd-core
//!
//! Shared foundation for the swarmd coordination runtime:
//!
//! - **Identifiers**: nanosecond-monotonic, process-unique agent/work ids
//!   plus 128-bit trace ids and 64-bit span ids
//! - **Domain types**: work items, agent status, coordination log entries
//!   with serde field names frozen by the on-disk contract
//! - **Error taxonomy**: every fallible operation in the runtime returns
//!   one of the [`CoordError`] kinds
//! - **Configuration**: environment-backed [`CoordConfig`]

pub mod config;
pub mod error;
pub mod id;
pub mod trace;
pub mod types;

pub use config::CoordConfig;
pub use error::{CoordError, CoordResult};
pub use id::IdGenerator;
pub use trace::TraceContext;
pub use types::{
    AgentState, AgentStatus, CoordinationEvent, CoordinationLogEntry, PerformanceMetrics,
    Priority, TelemetryMeta, WorkItem, WorkStatus,
};
