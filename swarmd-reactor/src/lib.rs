//! # swarmd-reactor
//!
//! Reactor execution engine: a declarative DAG of steps with typed
//! inputs, dependency-ordered scheduling, bounded concurrency, retries,
//! and reverse-order compensation, wrapped by an ordered middleware
//! stack.
//!
//! The [`coordination::CoordinationMiddleware`] bridges reactor runs to
//! the work-claim coordinator: claim on entry, throttled progress
//! renewal, complete or release on exit, escalation on failure.

pub mod cancel;
pub mod context;
pub mod coordination;
pub mod engine;
pub mod middleware;
pub mod step;

pub use cancel::CancelToken;
pub use context::ReactorContext;
pub use coordination::CoordinationMiddleware;
pub use engine::{Reactor, ReactorBuilder, StepResults};
pub use middleware::{HookDecision, ReactorInfo, ReactorMiddleware};
pub use step::{InputSource, StepArgs, StepDef, StepInfo, StepValue};
