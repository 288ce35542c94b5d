//! Reactor engine
//!
//! Executes a validated step DAG in dependency order. Detached steps run
//! concurrently up to the parallelism bound; attached steps run alone.
//! Failed runs are retried with exponential backoff (each attempt its own
//! span); on failure every completed step is compensated in reverse
//! completion order and the failing step's `compensate` handler runs.
//!
//! The engine never touches the claim store: coordination happens in
//! middleware through the coordinator's API, so no step executes while
//! the store lock is held.

use crate::cancel::CancelToken;
use crate::context::ReactorContext;
use crate::middleware::{HookDecision, ReactorInfo, ReactorMiddleware};
use crate::step::{InputSource, StepArgs, StepDef, StepInfo, StepValue};
use rand::Rng;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use swarmd_core::{CoordError, CoordResult, TraceContext};
use swarmd_telemetry::{SpanStatus, TelemetryPipeline};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

/// Retry backoff base for failed step runs.
const RETRY_BASE: Duration = Duration::from_millis(100);
/// Ceiling for a single retry delay.
const RETRY_CAP: Duration = Duration::from_secs(10);
/// Bound on middleware `Retry` decisions per phase.
const MAX_HOOK_RETRIES: u32 = 3;

/// All step results, keyed by step name.
pub type StepResults = BTreeMap<String, StepValue>;

pub struct ReactorBuilder {
    name: String,
    steps: Vec<StepDef>,
    middleware: Vec<Arc<dyn ReactorMiddleware>>,
    parallelism: usize,
}

impl ReactorBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            middleware: Vec::new(),
            parallelism: num_cpus::get(),
        }
    }

    pub fn add_step(mut self, step: StepDef) -> Self {
        self.steps.push(step);
        self
    }

    /// Append a middleware. Order matters: earlier registrations are
    /// outermost.
    pub fn add_middleware(mut self, middleware: Arc<dyn ReactorMiddleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn parallelism(mut self, bound: usize) -> Self {
        self.parallelism = bound.max(1);
        self
    }

    /// Validate the DAG (unique names, known dependencies, no cycles)
    /// and produce a runnable reactor.
    pub fn build(self, telemetry: Arc<TelemetryPipeline>) -> CoordResult<Reactor> {
        let mut index_of: HashMap<&str, usize> = HashMap::new();
        for (index, step) in self.steps.iter().enumerate() {
            if index_of.insert(step.name.as_str(), index).is_some() {
                return Err(CoordError::InvariantViolation(format!(
                    "duplicate step name: {}",
                    step.name
                )));
            }
        }
        for step in &self.steps {
            for dep in step.dependencies() {
                if !index_of.contains_key(dep) {
                    return Err(CoordError::InvariantViolation(format!(
                        "step {} depends on unknown step {}",
                        step.name, dep
                    )));
                }
            }
        }
        // Kahn's algorithm: every step must be reachable from the roots.
        let mut remaining: Vec<usize> = self
            .steps
            .iter()
            .map(|s| s.dependencies().count())
            .collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.steps.len()];
        for (index, step) in self.steps.iter().enumerate() {
            for dep in step.dependencies() {
                dependents[index_of[dep]].push(index);
            }
        }
        let mut queue: VecDeque<usize> = remaining
            .iter()
            .enumerate()
            .filter(|(_, &n)| n == 0)
            .map(|(i, _)| i)
            .collect();
        let mut visited = 0;
        while let Some(index) = queue.pop_front() {
            visited += 1;
            for &dependent in &dependents[index] {
                remaining[dependent] -= 1;
                if remaining[dependent] == 0 {
                    queue.push_back(dependent);
                }
            }
        }
        if visited != self.steps.len() {
            return Err(CoordError::InvariantViolation(format!(
                "step dependency cycle in reactor {}",
                self.name
            )));
        }

        Ok(Reactor {
            name: self.name,
            steps: self.steps.into_iter().map(Arc::new).collect(),
            middleware: Arc::new(self.middleware),
            parallelism: self.parallelism,
            telemetry,
        })
    }
}

pub struct Reactor {
    name: String,
    steps: Vec<Arc<StepDef>>,
    middleware: Arc<Vec<Arc<dyn ReactorMiddleware>>>,
    parallelism: usize,
    telemetry: Arc<TelemetryPipeline>,
}

impl Reactor {
    pub fn builder(name: impl Into<String>) -> ReactorBuilder {
        ReactorBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Run the reactor to completion (or compensated failure).
    ///
    /// With `parent` absent a new trace root is minted; otherwise the run
    /// joins the caller's trace.
    pub async fn run(
        &self,
        inputs: BTreeMap<String, StepValue>,
        parent: Option<&TraceContext>,
        cancel: CancelToken,
    ) -> CoordResult<StepResults> {
        let reactor_id = format!("reactor_{}", Uuid::new_v4().simple());
        let trace = match parent {
            Some(parent) => self.telemetry.child_context(parent),
            None => self.telemetry.root_context(),
        };
        let mut reactor_span = self.telemetry.start_span("reactor.run", &trace);
        reactor_span.set_attribute("reactor.name", self.name.as_str());
        reactor_span.set_attribute("reactor.id", reactor_id.as_str());

        let ctx = ReactorContext::new(
            reactor_id.clone(),
            self.name.clone(),
            inputs,
            reactor_span.context().clone(),
            self.telemetry.clone(),
            cancel,
        );
        let info = ReactorInfo {
            reactor_id,
            name: self.name.clone(),
            step_count: self.steps.len(),
        };

        // before_reactor, outermost-first
        if let Err(e) = self.reactor_phase_in(&info, &ctx).await {
            let result = self.fail(Vec::new(), None, e, &ctx).await;
            reactor_span.finish(SpanStatus::Error);
            return result;
        }

        match self.execute(&ctx).await {
            Ok(results) => {
                let hook_result: CoordResult<StepResults> = Ok(results);
                self.after_reactor(&hook_result, &ctx).await;
                reactor_span.finish_ok();
                hook_result
            }
            Err((completed, failed, error)) => {
                let result = self.fail(completed, failed, error, &ctx).await;
                reactor_span.finish(SpanStatus::Error);
                result
            }
        }
    }

    /// Dependency-ordered execution. On failure returns the completion
    /// order so compensation can unwind it.
    async fn execute(
        &self,
        ctx: &ReactorContext,
    ) -> Result<StepResults, (Vec<usize>, Option<usize>, CoordError)> {
        let total = self.steps.len();
        let index_of: HashMap<&str, usize> = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.as_str(), i))
            .collect();
        let mut remaining: Vec<usize> = self
            .steps
            .iter()
            .map(|s| s.dependencies().count())
            .collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); total];
        for (index, step) in self.steps.iter().enumerate() {
            for dep in step.dependencies() {
                dependents[index_of[dep]].push(index);
            }
        }

        let mut ready: VecDeque<usize> = remaining
            .iter()
            .enumerate()
            .filter(|(_, &n)| n == 0)
            .map(|(i, _)| i)
            .collect();
        let mut results: StepResults = BTreeMap::new();
        let mut completion_order: Vec<usize> = Vec::new();
        let mut join_set: JoinSet<(usize, CoordResult<StepValue>)> = JoinSet::new();
        let semaphore = Arc::new(Semaphore::new(self.parallelism));

        let mut complete =
            |index: usize,
             value: StepValue,
             results: &mut StepResults,
             completion_order: &mut Vec<usize>,
             ready: &mut VecDeque<usize>,
             remaining: &mut Vec<usize>| {
                results.insert(self.steps[index].name.clone(), value);
                completion_order.push(index);
                for &dependent in &dependents[index] {
                    remaining[dependent] -= 1;
                    if remaining[dependent] == 0 {
                        ready.push_back(dependent);
                    }
                }
            };

        while completion_order.len() < total {
            if ctx.is_cancelled() {
                join_set.abort_all();
                drain_completions(&mut join_set, &mut |index, value| {
                    complete(index, value, &mut results, &mut completion_order, &mut ready, &mut remaining)
                })
                .await;
                return Err((completion_order, None, CoordError::Cancelled));
            }

            // launch every ready detached step; hold back the first
            // attached one to run alone
            let mut attached: Option<usize> = None;
            while let Some(index) = ready.pop_front() {
                if self.steps[index].detached {
                    let args = match self.resolve_args(index, ctx, &results) {
                        Ok(args) => args,
                        Err(e) => return Err((completion_order, Some(index), e)),
                    };
                    let step = self.steps[index].clone();
                    let step_ctx = ctx.clone();
                    let middleware = self.middleware.clone();
                    let step_info = StepInfo {
                        name: step.name.clone(),
                        index: completion_order.len(),
                        total,
                    };
                    let permit_source = semaphore.clone();
                    join_set.spawn(async move {
                        let _permit = permit_source.acquire_owned().await;
                        let result = run_step(step, step_info, args, step_ctx, middleware).await;
                        (index, result)
                    });
                } else {
                    attached = Some(index);
                    break;
                }
            }

            if let Some(index) = attached {
                // drain in-flight detached steps so the attached step
                // truly runs alone
                let mut failure: Option<(usize, CoordError)> = None;
                drain_join_set(&mut join_set, &mut |idx, result| match result {
                    Ok(value) => complete(idx, value, &mut results, &mut completion_order, &mut ready, &mut remaining),
                    Err(e) => {
                        if failure.is_none() {
                            failure = Some((idx, e));
                        }
                    }
                })
                .await;
                if let Some((failed, error)) = failure {
                    return Err((completion_order, Some(failed), error));
                }

                let args = match self.resolve_args(index, ctx, &results) {
                    Ok(args) => args,
                    Err(e) => return Err((completion_order, Some(index), e)),
                };
                let step_info = StepInfo {
                    name: self.steps[index].name.clone(),
                    index: completion_order.len(),
                    total,
                };
                match run_step(
                    self.steps[index].clone(),
                    step_info,
                    args,
                    ctx.clone(),
                    self.middleware.clone(),
                )
                .await
                {
                    Ok(value) => complete(index, value, &mut results, &mut completion_order, &mut ready, &mut remaining),
                    Err(e) => return Err((completion_order, Some(index), e)),
                }
                continue;
            }

            if join_set.is_empty() {
                if completion_order.len() < total {
                    // validated DAGs cannot reach this; fail loudly if
                    // one does
                    return Err((
                        completion_order,
                        None,
                        CoordError::InvariantViolation(format!(
                            "reactor {} has unschedulable steps",
                            self.name
                        )),
                    ));
                }
                break;
            }

            match join_set.join_next().await {
                Some(Ok((index, Ok(value)))) => {
                    complete(index, value, &mut results, &mut completion_order, &mut ready, &mut remaining)
                }
                Some(Ok((index, Err(e)))) => {
                    join_set.abort_all();
                    drain_completions(&mut join_set, &mut |idx, value| {
                        complete(idx, value, &mut results, &mut completion_order, &mut ready, &mut remaining)
                    })
                    .await;
                    return Err((completion_order, Some(index), e));
                }
                Some(Err(join_error)) => {
                    join_set.abort_all();
                    drain_completions(&mut join_set, &mut |idx, value| {
                        complete(idx, value, &mut results, &mut completion_order, &mut ready, &mut remaining)
                    })
                    .await;
                    return Err((
                        completion_order,
                        None,
                        CoordError::InvariantViolation(format!("step task panicked: {}", join_error)),
                    ));
                }
                None => {}
            }
        }

        Ok(results)
    }

    /// Failure path: handle_error hooks, compensation in reverse
    /// completion order, after_reactor, then surface the error.
    async fn fail(
        &self,
        completion_order: Vec<usize>,
        failed: Option<usize>,
        error: CoordError,
        ctx: &ReactorContext,
    ) -> CoordResult<StepResults> {
        for middleware in self.middleware.iter().rev() {
            if let HookDecision::Abort(abort) = middleware.handle_error(&error, ctx).await {
                tracing::warn!(error = %abort, "handle_error middleware escalated");
            }
        }

        self.compensate(&completion_order, failed, &error, ctx).await;

        let hook_result: CoordResult<StepResults> = Err(error);
        self.after_reactor(&hook_result, ctx).await;
        hook_result
    }

    /// Reverse-order compensation. `undo` runs exactly once per
    /// completed step; a failing undo is recorded and does not stop the
    /// rest. The failing step gets its `compensate` handler.
    async fn compensate(
        &self,
        completion_order: &[usize],
        failed: Option<usize>,
        error: &CoordError,
        ctx: &ReactorContext,
    ) {
        if let Some(index) = failed {
            let step = &self.steps[index];
            if let Some(compensate) = &step.compensate {
                let args = self.compensation_args(index, ctx).await;
                let span_ctx = self.telemetry.child_context(ctx.trace());
                let mut span = self
                    .telemetry
                    .start_span(format!("reactor.compensate.{}", step.name), &span_ctx);
                match compensate(error.to_string(), args, ctx.clone()).await {
                    Ok(()) => span.finish_ok(),
                    Err(e) => {
                        tracing::warn!(step = %step.name, error = %e, "compensate handler failed");
                        span.finish_error(&e);
                    }
                }
            }
        }

        for &index in completion_order.iter().rev() {
            let step = &self.steps[index];
            let Some(undo) = &step.undo else { continue };
            let args = self.compensation_args(index, ctx).await;
            let value = ctx
                .get_data(&format!("reactor.result.{}", step.name))
                .await
                .unwrap_or(StepValue::Null);
            let span_ctx = self.telemetry.child_context(ctx.trace());
            let mut span = self
                .telemetry
                .start_span(format!("reactor.undo.{}", step.name), &span_ctx);
            match undo(value, args, ctx.clone()).await {
                Ok(()) => span.finish_ok(),
                Err(e) => {
                    tracing::warn!(step = %step.name, error = %e, "undo failed; continuing compensation");
                    span.finish_error(&e);
                }
            }
        }
    }

    /// Arguments for undo/compensate: best effort from reactor inputs
    /// and recorded results; a reversal handler must tolerate missing
    /// keys.
    async fn compensation_args(&self, index: usize, ctx: &ReactorContext) -> StepArgs {
        let mut values = BTreeMap::new();
        for source in &self.steps[index].inputs {
            let value = match source {
                InputSource::Input(name) => ctx.input(name).cloned(),
                InputSource::Result(step) => ctx.get_data(&format!("reactor.result.{}", step)).await,
            };
            if let Some(value) = value {
                values.insert(source.arg_name().to_string(), value);
            }
        }
        StepArgs::new(values)
    }

    fn resolve_args(
        &self,
        index: usize,
        ctx: &ReactorContext,
        results: &StepResults,
    ) -> CoordResult<StepArgs> {
        let mut values = BTreeMap::new();
        for source in &self.steps[index].inputs {
            let value = match source {
                InputSource::Input(name) => ctx.input(name).cloned().ok_or_else(|| {
                    CoordError::InvariantViolation(format!(
                        "step {} needs missing reactor input {}",
                        self.steps[index].name, name
                    ))
                })?,
                InputSource::Result(step) => results
                    .get(step)
                    .cloned()
                    .expect("dependency scheduled before dependent"),
            };
            values.insert(source.arg_name().to_string(), value);
        }
        Ok(StepArgs::new(values))
    }

    async fn reactor_phase_in(&self, info: &ReactorInfo, ctx: &ReactorContext) -> CoordResult<()> {
        for _ in 0..=MAX_HOOK_RETRIES {
            let mut retry = false;
            for middleware in self.middleware.iter() {
                match middleware.before_reactor(info, ctx).await {
                    HookDecision::Continue => {}
                    HookDecision::Retry => {
                        retry = true;
                        break;
                    }
                    HookDecision::Abort(e) => return Err(e),
                }
            }
            if !retry {
                return Ok(());
            }
        }
        Err(CoordError::InvariantViolation(
            "before_reactor middleware exhausted its retry budget".into(),
        ))
    }

    async fn after_reactor(&self, result: &CoordResult<StepResults>, ctx: &ReactorContext) {
        for middleware in self.middleware.iter().rev() {
            if let HookDecision::Abort(e) = middleware.after_reactor(result, ctx).await {
                tracing::warn!(error = %e, "after_reactor middleware aborted");
            }
        }
    }
}

/// Run one step: before_step hooks, bounded retries (each attempt a
/// distinct span), after_step hooks.
async fn run_step(
    step: Arc<StepDef>,
    info: StepInfo,
    args: StepArgs,
    ctx: ReactorContext,
    middleware: Arc<Vec<Arc<dyn ReactorMiddleware>>>,
) -> CoordResult<StepValue> {
    // before_step, outermost-first
    for _ in 0..=MAX_HOOK_RETRIES {
        let mut retry = false;
        for m in middleware.iter() {
            match m.before_step(&info, &ctx).await {
                HookDecision::Continue => {}
                HookDecision::Retry => {
                    retry = true;
                    break;
                }
                HookDecision::Abort(e) => return Err(e),
            }
        }
        if !retry {
            break;
        }
    }

    let telemetry = ctx.telemetry().clone();
    let mut attempt: u32 = 0;
    let result = loop {
        let span_ctx = telemetry.child_context(ctx.trace());
        let mut span = telemetry.start_span(format!("reactor.step.{}", step.name), &span_ctx);
        span.set_attribute("step.name", step.name.as_str());
        span.set_attribute("step.attempt", attempt as i64);

        let run = (step.run)(args.clone(), ctx.clone());
        let outcome = tokio::select! {
            biased;
            _ = ctx.cancel_token().cancelled() => Err(CoordError::Cancelled),
            result = run => result,
        };

        match outcome {
            Ok(value) => {
                span.finish_ok();
                break Ok(value);
            }
            Err(CoordError::Cancelled) => {
                span.finish_error(&CoordError::Cancelled);
                break Err(CoordError::Cancelled);
            }
            Err(e) if attempt < step.max_retries => {
                span.finish_error(&e);
                let backoff = RETRY_BASE
                    .checked_mul(2u32.saturating_pow(attempt))
                    .unwrap_or(RETRY_CAP)
                    .min(RETRY_CAP);
                let jittered = rand::thread_rng().gen_range(Duration::ZERO..=backoff);
                tokio::time::sleep(jittered).await;
                attempt += 1;
            }
            Err(e) => {
                span.finish_error(&e);
                break Err(e);
            }
        }
    };

    if let Ok(value) = &result {
        // stash for compensation: undo receives the value the step produced
        ctx.set_data(format!("reactor.result.{}", step.name), value.clone())
            .await;
    }

    // after_step, innermost-first
    for m in middleware.iter().rev() {
        if let HookDecision::Abort(e) = m.after_step(&info, &result, &ctx).await {
            return Err(e);
        }
    }

    result
}

async fn drain_join_set(
    join_set: &mut JoinSet<(usize, CoordResult<StepValue>)>,
    on_result: &mut impl FnMut(usize, CoordResult<StepValue>),
) {
    while let Some(joined) = join_set.join_next().await {
        if let Ok((index, result)) = joined {
            on_result(index, result);
        }
    }
}

async fn drain_completions(
    join_set: &mut JoinSet<(usize, CoordResult<StepValue>)>,
    on_complete: &mut impl FnMut(usize, StepValue),
) {
    while let Some(joined) = join_set.join_next().await {
        if let Ok((index, Ok(value))) = joined {
            on_complete(index, value);
        }
    }
}
