//! Reactor execution context
//!
//! Clonable handle shared by the engine, the steps, and the middleware
//! chain: reactor identity, the run's trace context, the telemetry
//! pipeline, a scratch data map for middleware state, and the
//! cancellation token.

use crate::cancel::CancelToken;
use crate::step::StepValue;
use std::collections::BTreeMap;
use std::sync::Arc;
use swarmd_core::TraceContext;
use swarmd_telemetry::TelemetryPipeline;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct ReactorContext {
    reactor_id: String,
    reactor_name: String,
    inputs: Arc<BTreeMap<String, StepValue>>,
    data: Arc<RwLock<BTreeMap<String, StepValue>>>,
    trace: TraceContext,
    telemetry: Arc<TelemetryPipeline>,
    cancel: CancelToken,
}

impl ReactorContext {
    pub(crate) fn new(
        reactor_id: String,
        reactor_name: String,
        inputs: BTreeMap<String, StepValue>,
        trace: TraceContext,
        telemetry: Arc<TelemetryPipeline>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            reactor_id,
            reactor_name,
            inputs: Arc::new(inputs),
            data: Arc::new(RwLock::new(BTreeMap::new())),
            trace,
            telemetry,
            cancel,
        }
    }

    pub fn reactor_id(&self) -> &str {
        &self.reactor_id
    }

    pub fn reactor_name(&self) -> &str {
        &self.reactor_name
    }

    /// A named reactor input, if the caller supplied it.
    pub fn input(&self, name: &str) -> Option<&StepValue> {
        self.inputs.get(name)
    }

    /// Trace context of the reactor run span. Steps receive child
    /// contexts derived from this one.
    pub fn trace(&self) -> &TraceContext {
        &self.trace
    }

    pub fn telemetry(&self) -> &Arc<TelemetryPipeline> {
        &self.telemetry
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Middleware scratch state, keyed by convention (`<middleware>.<key>`).
    pub async fn set_data(&self, key: impl Into<String>, value: StepValue) {
        self.data.write().await.insert(key.into(), value);
    }

    pub async fn get_data(&self, key: &str) -> Option<StepValue> {
        self.data.read().await.get(key).cloned()
    }

    pub async fn take_data(&self, key: &str) -> Option<StepValue> {
        self.data.write().await.remove(key)
    }
}
