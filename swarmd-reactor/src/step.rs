//! Step definitions
//!
//! A step declares its name, where its arguments come from (reactor
//! inputs or other steps' results), an async `run`, and optional
//! reversal handlers. `undo` reverses a successful result during
//! compensation; `compensate` runs for the step that failed.

use crate::context::ReactorContext;
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use swarmd_core::CoordResult;

/// Step values are JSON: the runtime moves work descriptions, analyzer
/// reports, and handler results around without caring about shape.
pub type StepValue = serde_json::Value;

/// Where a step argument comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    /// A named reactor input.
    Input(String),
    /// Another step's result.
    Result(String),
}

impl InputSource {
    /// The argument name a step sees for this source.
    pub fn arg_name(&self) -> &str {
        match self {
            InputSource::Input(name) | InputSource::Result(name) => name,
        }
    }
}

/// Resolved arguments handed to `run`, `undo`, and `compensate`.
#[derive(Debug, Clone, Default)]
pub struct StepArgs {
    values: BTreeMap<String, StepValue>,
}

impl StepArgs {
    pub fn new(values: BTreeMap<String, StepValue>) -> Self {
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&StepValue> {
        self.values.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &StepValue)> {
        self.values.iter()
    }
}

pub type RunFn =
    Arc<dyn Fn(StepArgs, ReactorContext) -> BoxFuture<'static, CoordResult<StepValue>> + Send + Sync>;
pub type UndoFn = Arc<
    dyn Fn(StepValue, StepArgs, ReactorContext) -> BoxFuture<'static, CoordResult<()>> + Send + Sync,
>;
pub type CompensateFn =
    Arc<dyn Fn(String, StepArgs, ReactorContext) -> BoxFuture<'static, CoordResult<()>> + Send + Sync>;

/// One node of the step DAG.
#[derive(Clone)]
pub struct StepDef {
    pub name: String,
    pub inputs: Vec<InputSource>,
    pub run: RunFn,
    pub undo: Option<UndoFn>,
    pub compensate: Option<CompensateFn>,
    pub max_retries: u32,
    /// Detached steps may run concurrently with others (up to the
    /// engine's parallelism bound); attached steps run alone.
    pub detached: bool,
}

impl fmt::Debug for StepDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDef")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("max_retries", &self.max_retries)
            .field("detached", &self.detached)
            .field("has_undo", &self.undo.is_some())
            .field("has_compensate", &self.compensate.is_some())
            .finish()
    }
}

impl StepDef {
    pub fn new<F, Fut>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn(StepArgs, ReactorContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = CoordResult<StepValue>> + Send + 'static,
    {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            run: Arc::new(move |args, ctx| Box::pin(run(args, ctx))),
            undo: None,
            compensate: None,
            max_retries: 0,
            detached: false,
        }
    }

    /// Feed a named reactor input to this step.
    pub fn with_input(mut self, name: impl Into<String>) -> Self {
        self.inputs.push(InputSource::Input(name.into()));
        self
    }

    /// Feed another step's result to this step (and order after it).
    pub fn with_result(mut self, step: impl Into<String>) -> Self {
        self.inputs.push(InputSource::Result(step.into()));
        self
    }

    pub fn with_undo<F, Fut>(mut self, undo: F) -> Self
    where
        F: Fn(StepValue, StepArgs, ReactorContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = CoordResult<()>> + Send + 'static,
    {
        self.undo = Some(Arc::new(move |value, args, ctx| {
            Box::pin(undo(value, args, ctx))
        }));
        self
    }

    pub fn with_compensate<F, Fut>(mut self, compensate: F) -> Self
    where
        F: Fn(String, StepArgs, ReactorContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = CoordResult<()>> + Send + 'static,
    {
        self.compensate = Some(Arc::new(move |reason, args, ctx| {
            Box::pin(compensate(reason, args, ctx))
        }));
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn detached(mut self) -> Self {
        self.detached = true;
        self
    }

    /// Names of steps this one depends on.
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().filter_map(|source| match source {
            InputSource::Result(step) => Some(step.as_str()),
            InputSource::Input(_) => None,
        })
    }
}

/// Step identity handed to middleware hooks.
#[derive(Debug, Clone)]
pub struct StepInfo {
    pub name: String,
    pub index: usize,
    pub total: usize,
}
