//! Middleware stack
//!
//! An ordered list of handlers wrapping reactor execution. Hooks run
//! outermost-first on the way in (`before_reactor`, `before_step`) and
//! innermost-first on the way out (`after_step`, `after_reactor`,
//! `handle_error`), symmetric to a call stack.

use crate::context::ReactorContext;
use crate::step::{StepInfo, StepValue};
use async_trait::async_trait;
use std::collections::BTreeMap;
use swarmd_core::{CoordError, CoordResult};

/// What a hook wants the engine to do next.
#[derive(Debug)]
pub enum HookDecision {
    Continue,
    /// Re-run the hook chain for this phase (bounded by the engine).
    Retry,
    Abort(CoordError),
}

/// Reactor identity handed to middleware hooks.
#[derive(Debug, Clone)]
pub struct ReactorInfo {
    pub reactor_id: String,
    pub name: String,
    pub step_count: usize,
}

/// The four-phase middleware interface. Default implementations make
/// every hook a no-op so middleware implement only what they need.
#[async_trait]
pub trait ReactorMiddleware: Send + Sync {
    async fn before_reactor(&self, _reactor: &ReactorInfo, _ctx: &ReactorContext) -> HookDecision {
        HookDecision::Continue
    }

    async fn before_step(&self, _step: &StepInfo, _ctx: &ReactorContext) -> HookDecision {
        HookDecision::Continue
    }

    async fn after_step(
        &self,
        _step: &StepInfo,
        _result: &CoordResult<StepValue>,
        _ctx: &ReactorContext,
    ) -> HookDecision {
        HookDecision::Continue
    }

    async fn after_reactor(
        &self,
        _result: &CoordResult<BTreeMap<String, StepValue>>,
        _ctx: &ReactorContext,
    ) -> HookDecision {
        HookDecision::Continue
    }

    async fn handle_error(&self, _error: &CoordError, _ctx: &ReactorContext) -> HookDecision {
        HookDecision::Continue
    }
}
