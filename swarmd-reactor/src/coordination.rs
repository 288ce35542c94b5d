//! Coordination middleware
//!
//! Bridges the reactor to the coordinator and the telemetry pipeline:
//! claims work before the reactor runs, renews progress (throttled)
//! before steps, records a span per step, completes or releases the
//! claim when the reactor finishes, and escalates when it fails.
//!
//! A reactor instance holds exactly one outstanding claim; nested
//! reactors get their own claims because claim state is keyed by
//! reactor id.

use crate::context::ReactorContext;
use crate::middleware::{HookDecision, ReactorInfo, ReactorMiddleware};
use crate::step::{StepInfo, StepValue};
use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use swarmd_coordination::{Coordinator, WorkRequest};
use swarmd_core::types::Priority;
use swarmd_core::{CoordError, CoordResult};
use swarmd_telemetry::{SpanGuard, SpanStatus};
use tokio::sync::Mutex;

/// Default throttle between progress renewals.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(300);
/// Default retry budget for contended claims.
const CLAIM_RETRIES: u32 = 5;
const CLAIM_BACKOFF_BASE: Duration = Duration::from_millis(100);

struct ClaimState {
    work_item_id: String,
    agent_id: String,
    last_progress: Option<Instant>,
    last_pct: u8,
}

pub struct CoordinationMiddleware {
    coordinator: Arc<Coordinator>,
    agent_id: String,
    team: String,
    priority: Priority,
    velocity_points: u32,
    claim_retries: u32,
    progress_interval: Duration,
    claims: Mutex<HashMap<String, ClaimState>>,
    step_spans: Mutex<HashMap<(String, String), SpanGuard>>,
}

impl CoordinationMiddleware {
    pub fn new(coordinator: Arc<Coordinator>, agent_id: impl Into<String>, team: impl Into<String>) -> Self {
        Self {
            coordinator,
            agent_id: agent_id.into(),
            team: team.into(),
            priority: Priority::Medium,
            velocity_points: 5,
            claim_retries: CLAIM_RETRIES,
            progress_interval: PROGRESS_INTERVAL,
            claims: Mutex::new(HashMap::new()),
            step_spans: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_velocity_points(mut self, points: u32) -> Self {
        self.velocity_points = points;
        self
    }

    pub fn with_claim_retries(mut self, retries: u32) -> Self {
        self.claim_retries = retries;
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Claim for this reactor run: an explicit `work_item_id` input is
    /// claimed directly, otherwise a new item is minted and claimed via
    /// intelligent routing. `AlreadyClaimed` is retried with backoff.
    async fn acquire_claim(&self, reactor: &ReactorInfo, ctx: &ReactorContext) -> CoordResult<ClaimState> {
        let trace = ctx.trace().clone();
        let explicit = ctx
            .input("work_item_id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let started = Instant::now();

        let mut delay = CLAIM_BACKOFF_BASE;
        let mut attempt = 0;
        loop {
            let outcome = match &explicit {
                Some(work_item_id) => {
                    let coordinator = self.coordinator.clone();
                    let work = work_item_id.clone();
                    let agent = self.agent_id.clone();
                    let trace = trace.clone();
                    blocking(move || coordinator.claim(&work, &agent, &trace))
                        .await
                        .map(Some)
                }
                None => {
                    let coordinator = self.coordinator.clone();
                    let request = WorkRequest {
                        work_type: reactor.name.clone(),
                        priority: self.priority,
                        team: self.team.clone(),
                        description: ctx
                            .input("description")
                            .and_then(|v| v.as_str())
                            .unwrap_or(&reactor.name)
                            .to_string(),
                        estimated_duration: None,
                        created_by: Some(self.agent_id.clone()),
                    };
                    let trace = trace.clone();
                    blocking(move || coordinator.claim_intelligent(request, &trace))
                        .await
                        .map(|(_, record)| record)
                }
            };

            match outcome {
                Ok(Some(record)) => {
                    return Ok(ClaimState {
                        work_item_id: record.work_item_id,
                        agent_id: record.agent_id,
                        last_progress: None,
                        last_pct: 0,
                    })
                }
                Ok(None) => {
                    return Err(CoordError::InvariantViolation(format!(
                        "no claimable agent in team {} for reactor {}",
                        self.team, reactor.name
                    )))
                }
                Err(CoordError::AlreadyClaimed { .. }) if attempt < self.claim_retries => {
                    let jittered = rand::thread_rng().gen_range(Duration::ZERO..=delay);
                    tokio::time::sleep(jittered).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(CoordError::AlreadyClaimed { .. }) => {
                    return Err(CoordError::Contention {
                        waited_ms: started.elapsed().as_millis() as u64,
                    })
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Drop the claim state for a reactor, if it still holds one. The
    /// first caller wins, which keeps complete/release/escalate from
    /// running twice.
    async fn take_claim(&self, reactor_id: &str) -> Option<ClaimState> {
        self.claims.lock().await.remove(reactor_id)
    }
}

#[async_trait]
impl ReactorMiddleware for CoordinationMiddleware {
    async fn before_reactor(&self, reactor: &ReactorInfo, ctx: &ReactorContext) -> HookDecision {
        match self.acquire_claim(reactor, ctx).await {
            Ok(state) => {
                tracing::info!(
                    reactor = %reactor.name,
                    work_item_id = %state.work_item_id,
                    agent_id = %state.agent_id,
                    "claimed work for reactor run"
                );
                self.claims
                    .lock()
                    .await
                    .insert(reactor.reactor_id.clone(), state);
                HookDecision::Continue
            }
            Err(e) => HookDecision::Abort(e),
        }
    }

    async fn before_step(&self, step: &StepInfo, ctx: &ReactorContext) -> HookDecision {
        // span-start for the step; closed in after_step
        let span_ctx = ctx.telemetry().child_context(ctx.trace());
        let mut span = ctx
            .telemetry()
            .start_span(format!("coordination.step.{}", step.name), &span_ctx);
        span.set_attribute("step.index", step.index as i64);
        self.step_spans
            .lock()
            .await
            .insert((ctx.reactor_id().to_string(), step.name.clone()), span);

        // throttled progress renewal
        let mut claims = self.claims.lock().await;
        let Some(state) = claims.get_mut(ctx.reactor_id()) else {
            return HookDecision::Continue;
        };
        let due = state
            .last_progress
            .map(|at| at.elapsed() >= self.progress_interval)
            .unwrap_or(true);
        if !due {
            return HookDecision::Continue;
        }
        let pct = ((step.index * 100) / step.total.max(1)).min(99) as u8;
        if pct > state.last_pct {
            let coordinator = self.coordinator.clone();
            let work = state.work_item_id.clone();
            let agent = state.agent_id.clone();
            match blocking(move || coordinator.progress(&work, &agent, pct)).await {
                Ok(()) => {
                    state.last_pct = pct;
                    state.last_progress = Some(Instant::now());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "progress renewal failed; continuing");
                }
            }
        } else {
            state.last_progress = Some(Instant::now());
        }
        HookDecision::Continue
    }

    async fn after_step(
        &self,
        step: &StepInfo,
        result: &CoordResult<StepValue>,
        ctx: &ReactorContext,
    ) -> HookDecision {
        let span = self
            .step_spans
            .lock()
            .await
            .remove(&(ctx.reactor_id().to_string(), step.name.clone()));
        if let Some(span) = span {
            match result {
                Ok(_) => span.finish(SpanStatus::Ok),
                Err(e) => span.finish_error(e),
            }
        }
        HookDecision::Continue
    }

    async fn after_reactor(
        &self,
        result: &CoordResult<std::collections::BTreeMap<String, StepValue>>,
        ctx: &ReactorContext,
    ) -> HookDecision {
        let Some(state) = self.take_claim(ctx.reactor_id()).await else {
            return HookDecision::Continue;
        };
        let coordinator = self.coordinator.clone();
        let work = state.work_item_id.clone();
        let agent = state.agent_id.clone();
        let outcome = match result {
            Ok(results) => {
                let summary = serde_json::json!({
                    "reactor": ctx.reactor_name(),
                    "steps_completed": results.len(),
                })
                .to_string();
                let velocity = self.velocity_points;
                blocking(move || coordinator.complete(&work, &agent, &summary, velocity)).await
            }
            Err(e) => {
                let reason = e.to_string();
                blocking(move || coordinator.release(&work, &agent, &reason)).await
            }
        };
        if let Err(e) = outcome {
            tracing::warn!(
                work_item_id = %state.work_item_id,
                error = %e,
                "claim settlement failed"
            );
        }
        HookDecision::Continue
    }

    async fn handle_error(&self, error: &CoordError, ctx: &ReactorContext) -> HookDecision {
        let Some(state) = self.take_claim(ctx.reactor_id()).await else {
            return HookDecision::Continue;
        };
        let reason = error.to_string();

        let coordinator = self.coordinator.clone();
        let work = state.work_item_id.clone();
        let agent = state.agent_id.clone();
        let escalate_reason = reason.clone();
        if let Err(e) =
            blocking(move || coordinator.escalate(&work, &agent, &escalate_reason)).await
        {
            tracing::warn!(error = %e, "escalation log append failed");
        }

        let coordinator = self.coordinator.clone();
        let work = state.work_item_id.clone();
        let agent = state.agent_id.clone();
        if let Err(e) = blocking(move || coordinator.release(&work, &agent, &reason)).await {
            tracing::warn!(error = %e, "release after error failed");
        }
        HookDecision::Continue
    }
}

/// Coordinator calls are blocking file IO; keep them off the async
/// workers.
async fn blocking<T: Send + 'static>(
    f: impl FnOnce() -> CoordResult<T> + Send + 'static,
) -> CoordResult<T> {
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CoordError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}
