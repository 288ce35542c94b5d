//! Coordinator: the work-claim lifecycle
//!
//! All operations run as a single store mutation under the coordination
//! lock, and every mutation appends its coordination-log event inside
//! the same transaction, so log order is causal order per work item.
//!
//! The coordinator is the single writer for `work_claims` and
//! `agent_status`. Other components read through its API, never the
//! files.

use crate::routing;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use swarmd_core::types::{
    AgentState, AgentStatus, CoordinationEvent, CoordinationLogEntry, PerformanceMetrics,
    Priority, TelemetryMeta, WorkItem, WorkStatus,
};
use swarmd_core::{CoordConfig, CoordError, CoordResult, IdGenerator, TraceContext};
use swarmd_store::{ClaimStore, Collection};
use swarmd_telemetry::{SpanStatus, TelemetryPipeline};

/// Request to create (and possibly claim) a work item.
#[derive(Debug, Clone)]
pub struct WorkRequest {
    pub work_type: String,
    pub priority: Priority,
    pub team: String,
    pub description: String,
    pub estimated_duration: Option<String>,
    pub created_by: Option<String>,
}

/// Proof of a successful claim.
#[derive(Debug, Clone, Serialize)]
pub struct ClaimRecord {
    pub work_item_id: String,
    pub agent_id: String,
    pub claimed_at: chrono::DateTime<Utc>,
    pub trace_id: String,
    pub span_id: String,
}

/// Read-only view of the coordination state for `coord status`.
#[derive(Debug, Serialize)]
pub struct CoordinationSnapshot {
    pub agents: Vec<AgentStatus>,
    pub work_items: Vec<WorkItem>,
    pub pending: usize,
    pub in_flight: usize,
    pub completed: usize,
    pub recent_log: Vec<CoordinationLogEntry>,
}

pub struct Coordinator {
    store: Arc<ClaimStore>,
    telemetry: Arc<TelemetryPipeline>,
    ids: IdGenerator,
}

impl Coordinator {
    pub fn new(store: Arc<ClaimStore>, telemetry: Arc<TelemetryPipeline>, config: &CoordConfig) -> Self {
        Self {
            store,
            telemetry,
            ids: config.id_generator(),
        }
    }

    pub fn store(&self) -> &Arc<ClaimStore> {
        &self.store
    }

    /// Register a fresh agent. Returns its id.
    pub fn register_agent(&self, team: &str, specialization: &str, capacity: u32) -> CoordResult<String> {
        let ctx = self.telemetry.root_context();
        let mut span = self.telemetry.start_span("coordinator.register_agent", &ctx);
        span.set_attribute("team", team);

        let agent_id = self.ids.agent_id();
        let agent = AgentStatus {
            agent_id: agent_id.clone(),
            team: team.to_string(),
            status: AgentState::Active,
            capacity: capacity.max(1),
            current_workload: 0,
            last_heartbeat: Utc::now(),
            specialization: specialization.to_string(),
            performance_metrics: PerformanceMetrics::default(),
        };
        let result = self
            .store
            .mutate::<AgentStatus, _, _>(Collection::AgentStatus, move |agents| {
                agents.push(agent);
                Ok(())
            });
        self.finish(span, result)?;
        tracing::info!(agent_id = %agent_id, team, "agent registered");
        Ok(agent_id)
    }

    /// Retire an agent. Fails while it still holds claims.
    pub fn deregister_agent(&self, agent_id: &str) -> CoordResult<()> {
        let ctx = self.telemetry.root_context();
        let mut span = self.telemetry.start_span("coordinator.deregister_agent", &ctx);
        span.set_attribute("agent_id", agent_id);

        let id = agent_id.to_string();
        let result = self
            .store
            .mutate::<AgentStatus, _, _>(Collection::AgentStatus, move |agents| {
                let index = agents
                    .iter()
                    .position(|a| a.agent_id == id)
                    .ok_or_else(|| CoordError::UnknownAgent(id.clone()))?;
                if agents[index].current_workload > 0 {
                    return Err(CoordError::InvariantViolation(format!(
                        "agent {} still holds {} claims",
                        id, agents[index].current_workload
                    )));
                }
                agents.remove(index);
                Ok(())
            });
        self.finish(span, result)
    }

    /// Refresh an agent's liveness and, optionally, its performance
    /// counters. Applying the same metrics twice is a no-op beyond the
    /// heartbeat timestamp.
    pub fn heartbeat(&self, agent_id: &str, metrics: Option<PerformanceMetrics>) -> CoordResult<()> {
        let ctx = self.telemetry.root_context();
        let mut span = self.telemetry.start_span("coordinator.heartbeat", &ctx);
        span.set_attribute("agent_id", agent_id);

        let id = agent_id.to_string();
        let result = self
            .store
            .mutate::<AgentStatus, _, _>(Collection::AgentStatus, move |agents| {
                let agent = agents
                    .iter_mut()
                    .find(|a| a.agent_id == id)
                    .ok_or_else(|| CoordError::UnknownAgent(id.clone()))?;
                agent.last_heartbeat = Utc::now();
                if let Some(metrics) = metrics {
                    agent.performance_metrics = metrics;
                }
                Ok(())
            });
        self.finish(span, result)
    }

    /// Create a pending work item. Trace metadata is pre-allocated so
    /// every persisted item carries a trace id from birth.
    pub fn create_work(&self, request: WorkRequest) -> CoordResult<String> {
        let ctx = self.telemetry.root_context();
        let mut span = self.telemetry.start_span("coordinator.create_work", &ctx);
        span.set_attribute("work_type", request.work_type.as_str());

        let item = self.new_item(&request, span.context());
        let work_item_id = item.work_item_id.clone();
        span.set_attribute("work_item_id", work_item_id.as_str());

        let result = self
            .store
            .mutate::<WorkItem, _, _>(Collection::WorkClaims, move |items| {
                items.push(item);
                Ok(())
            });
        self.finish(span, result)?;
        Ok(work_item_id)
    }

    /// Claim a pending work item for an agent. Exactly one concurrent
    /// caller wins; the rest observe `AlreadyClaimed`.
    pub fn claim(&self, work_item_id: &str, agent_id: &str, ctx: &TraceContext) -> CoordResult<ClaimRecord> {
        let span_ctx = self.telemetry.child_context(ctx);
        let mut span = self.telemetry.start_span("coordinator.claim", &span_ctx);
        span.set_attribute("work_item_id", work_item_id);
        span.set_attribute("agent_id", agent_id);

        let telemetry = TelemetryMeta::from_context(
            span.context(),
            "claim",
            swarmd_core::config::SERVICE_NAME,
        );
        let work = work_item_id.to_string();
        let agent = agent_id.to_string();
        let result = self.store.with_lock(|txn| {
            let mut items = txn.work_claims()?;
            let mut agents = txn.agent_status()?;
            let record = apply_claim(&mut items, &mut agents, &work, &agent, telemetry.clone())?;
            txn.append_log(log_entry(&record.agent_id, &record.work_item_id, CoordinationEvent::Claimed, None, &record.trace_id))?;
            txn.set_work_claims(items)?;
            txn.set_agent_status(agents)?;
            Ok(record)
        });
        self.finish(span, result)
    }

    /// Create a work item and, when a suitable agent exists, claim it for
    /// that agent — all in one atomic mutation. With no candidate the
    /// item is left pending and returned unclaimed.
    pub fn claim_intelligent(
        &self,
        request: WorkRequest,
        ctx: &TraceContext,
    ) -> CoordResult<(String, Option<ClaimRecord>)> {
        let span_ctx = self.telemetry.child_context(ctx);
        let mut span = self.telemetry.start_span("coordinator.claim_intelligent", &span_ctx);
        span.set_attribute("work_type", request.work_type.as_str());

        let mut item = self.new_item(&request, span.context());
        let work_item_id = item.work_item_id.clone();
        span.set_attribute("work_item_id", work_item_id.as_str());

        let telemetry = TelemetryMeta::from_context(
            span.context(),
            "claim_intelligent",
            swarmd_core::config::SERVICE_NAME,
        );
        let work_type = request.work_type.clone();
        let team = request.team.clone();
        let result = self.store.with_lock(|txn| {
            let mut items = txn.work_claims()?;
            let mut agents = txn.agent_status()?;

            let claimed = match routing::select_agent(&agents, &work_type, &team) {
                Some(index) => {
                    let agent_id = agents[index].agent_id.clone();
                    item.status = WorkStatus::Claimed;
                    item.agent_id = Some(agent_id.clone());
                    item.claimed_at = Some(Utc::now());
                    item.telemetry = telemetry.clone();
                    agents[index].current_workload += 1;
                    let record = ClaimRecord {
                        work_item_id: item.work_item_id.clone(),
                        agent_id,
                        claimed_at: item.claimed_at.expect("claimed_at just set"),
                        trace_id: telemetry.trace_id.clone(),
                        span_id: telemetry.span_id.clone(),
                    };
                    txn.append_log(log_entry(&record.agent_id, &record.work_item_id, CoordinationEvent::Claimed, None, &record.trace_id))?;
                    Some(record)
                }
                None => None,
            };
            items.push(item);
            txn.set_work_claims(items)?;
            txn.set_agent_status(agents)?;
            Ok(claimed)
        });
        match &result {
            Ok(Some(record)) => span.set_attribute("agent_id", record.agent_id.as_str()),
            Ok(None) => span.set_attribute("unclaimed", true),
            Err(_) => {}
        }
        let claimed = self.finish(span, result)?;
        Ok((work_item_id, claimed))
    }

    /// Record progress on a claimed item. Progress is monotone
    /// non-decreasing within a claim; the first nonzero reading moves
    /// the item from `claimed` to `active`.
    pub fn progress(&self, work_item_id: &str, agent_id: &str, progress: u8) -> CoordResult<()> {
        let ctx = self.telemetry.root_context();
        let mut span = self.telemetry.start_span("coordinator.progress", &ctx);
        span.set_attribute("work_item_id", work_item_id);
        span.set_attribute("progress", progress as i64);

        let work = work_item_id.to_string();
        let agent = agent_id.to_string();
        let result = self.store.with_lock(|txn| {
            let mut items = txn.work_claims()?;
            let item = owned_item(&mut items, &work, &agent)?;
            if progress > 100 {
                return Err(CoordError::InvariantViolation(format!(
                    "progress {} exceeds 100",
                    progress
                )));
            }
            if progress < item.progress {
                return Err(CoordError::InvariantViolation(format!(
                    "progress regression: {} -> {} on {}",
                    item.progress, progress, work
                )));
            }
            item.progress = progress;
            if progress > 0 {
                item.status = WorkStatus::Active;
            }
            let trace_id = item.telemetry.trace_id.clone();
            txn.append_log(log_entry(&agent, &work, CoordinationEvent::Progressed, None, &trace_id))?;
            txn.set_work_claims(items)?;
            Ok(())
        });
        self.finish(span, result)
    }

    /// Complete a claimed item with a non-empty result. Velocity points
    /// are recorded on the log entry and summed into the agent's
    /// performance counters.
    pub fn complete(
        &self,
        work_item_id: &str,
        agent_id: &str,
        result_text: &str,
        velocity_points: u32,
    ) -> CoordResult<()> {
        let ctx = self.telemetry.root_context();
        let mut span = self.telemetry.start_span("coordinator.complete", &ctx);
        span.set_attribute("work_item_id", work_item_id);
        span.set_attribute("velocity_points", velocity_points as i64);

        if result_text.is_empty() {
            let err = CoordError::InvariantViolation("completion requires a non-empty result".into());
            span.finish_error(&err);
            return Err(err);
        }

        let work = work_item_id.to_string();
        let agent = agent_id.to_string();
        let result_text = result_text.to_string();
        let result = self.store.with_lock(|txn| {
            let mut items = txn.work_claims()?;
            let mut agents = txn.agent_status()?;
            let item = owned_item(&mut items, &work, &agent)?;

            let claimed_at = item.claimed_at.ok_or_else(|| {
                CoordError::InvariantViolation(format!("{} has no claim timestamp", work))
            })?;
            let now = Utc::now();
            // completed_at must be strictly after claimed_at
            item.completed_at = Some(now.max(claimed_at + ChronoDuration::microseconds(1)));
            item.status = WorkStatus::Completed;
            item.progress = 100;
            item.result = Some(result_text.clone());
            let trace_id = item.telemetry.trace_id.clone();

            if let Some(entry) = agents.iter_mut().find(|a| a.agent_id == agent) {
                entry.current_workload = entry.current_workload.saturating_sub(1);
                entry.performance_metrics.items_completed += 1;
                entry.performance_metrics.total_velocity += velocity_points as u64;
            }

            txn.append_log(log_entry(&agent, &work, CoordinationEvent::Completed, Some(velocity_points), &trace_id))?;
            txn.set_work_claims(items)?;
            txn.set_agent_status(agents)?;
            Ok(())
        });
        self.finish(span, result)
    }

    /// Return a claimed item to the pending pool. Progress resets on the
    /// next claim, not here.
    pub fn release(&self, work_item_id: &str, agent_id: &str, reason: &str) -> CoordResult<()> {
        let ctx = self.telemetry.root_context();
        let mut span = self.telemetry.start_span("coordinator.release", &ctx);
        span.set_attribute("work_item_id", work_item_id);
        span.set_attribute("reason", reason);

        let work = work_item_id.to_string();
        let agent = agent_id.to_string();
        let result = self.store.with_lock(|txn| {
            let mut items = txn.work_claims()?;
            let mut agents = txn.agent_status()?;
            let item = owned_item(&mut items, &work, &agent)?;

            item.status = WorkStatus::Pending;
            item.agent_id = None;
            item.claimed_at = None;
            let trace_id = item.telemetry.trace_id.clone();

            if let Some(entry) = agents.iter_mut().find(|a| a.agent_id == agent) {
                entry.current_workload = entry.current_workload.saturating_sub(1);
                entry.performance_metrics.items_released += 1;
            }

            txn.append_log(log_entry(&agent, &work, CoordinationEvent::Released, None, &trace_id))?;
            txn.set_work_claims(items)?;
            txn.set_agent_status(agents)?;
            Ok(())
        });
        self.finish(span, result)
    }

    /// Record an escalation for a work item (retries exhausted). Appends
    /// the log entry only; pair with [`Coordinator::release`].
    pub fn escalate(&self, work_item_id: &str, agent_id: &str, reason: &str) -> CoordResult<()> {
        let ctx = self.telemetry.root_context();
        let mut span = self.telemetry.start_span("coordinator.escalate", &ctx);
        span.set_attribute("work_item_id", work_item_id);
        span.set_attribute("reason", reason);

        let work = work_item_id.to_string();
        let agent = agent_id.to_string();
        let result = self.store.with_lock(|txn| {
            let items = txn.work_claims()?;
            let trace_id = items
                .iter()
                .find(|i| i.work_item_id == work)
                .map(|i| i.telemetry.trace_id.clone())
                .ok_or_else(|| CoordError::UnknownWork(work.clone()))?;
            txn.append_log(log_entry(&agent, &work, CoordinationEvent::Escalated, None, &trace_id))
        });
        self.finish(span, result)
    }

    /// Remove agents whose heartbeat is older than `ttl`. Returns the
    /// removed agent ids.
    pub fn sweep_stale_agents(&self, ttl: Duration) -> CoordResult<Vec<String>> {
        let ctx = self.telemetry.root_context();
        let mut span = self.telemetry.start_span("coordinator.sweep_stale_agents", &ctx);

        let cutoff = Utc::now()
            - ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::seconds(600));
        let result = self
            .store
            .mutate::<AgentStatus, _, _>(Collection::AgentStatus, move |agents| {
                let mut removed = Vec::new();
                agents.retain(|agent| {
                    if agent.last_heartbeat < cutoff {
                        removed.push(agent.agent_id.clone());
                        false
                    } else {
                        true
                    }
                });
                Ok(removed)
            });
        if let Ok(removed) = &result {
            span.set_attribute("removed", removed.len() as i64);
            if !removed.is_empty() {
                tracing::info!(count = removed.len(), "swept stale agents");
            }
        }
        self.finish(span, result)
    }

    /// Lock-free snapshot of the coordination state.
    pub fn status(&self) -> CoordResult<CoordinationSnapshot> {
        let (agents, _) = self.store.load::<AgentStatus>(Collection::AgentStatus)?;
        let (work_items, _) = self.store.load::<WorkItem>(Collection::WorkClaims)?;
        let (log, _) = self.store.load::<CoordinationLogEntry>(Collection::CoordinationLog)?;

        let pending = work_items.iter().filter(|i| i.status == WorkStatus::Pending).count();
        let in_flight = work_items.iter().filter(|i| i.status.is_held()).count();
        let completed = work_items.iter().filter(|i| i.status.is_terminal()).count();
        let recent_log = log.into_iter().rev().take(20).collect();

        Ok(CoordinationSnapshot {
            agents,
            work_items,
            pending,
            in_flight,
            completed,
            recent_log,
        })
    }

    fn new_item(&self, request: &WorkRequest, ctx: &TraceContext) -> WorkItem {
        WorkItem {
            work_item_id: self.ids.work_id(),
            work_type: request.work_type.clone(),
            priority: request.priority,
            team: request.team.clone(),
            description: request.description.clone(),
            status: WorkStatus::Pending,
            agent_id: None,
            created_at: Utc::now(),
            claimed_at: None,
            completed_at: None,
            progress: 0,
            estimated_duration: request.estimated_duration.clone(),
            result: None,
            created_by: request.created_by.clone(),
            telemetry: TelemetryMeta::from_context(ctx, "create_work", swarmd_core::config::SERVICE_NAME),
        }
    }

    /// Close the operation span with the result's status, then hand the
    /// result back unchanged.
    fn finish<T>(&self, span: swarmd_telemetry::SpanGuard, result: CoordResult<T>) -> CoordResult<T> {
        match &result {
            Ok(_) => span.finish(SpanStatus::Ok),
            Err(e) => span.finish_error(e),
        }
        result
    }
}

/// Locate `work` and verify `agent` currently owns its claim.
fn owned_item<'a>(items: &'a mut [WorkItem], work: &str, agent: &str) -> CoordResult<&'a mut WorkItem> {
    let item = items
        .iter_mut()
        .find(|i| i.work_item_id == work)
        .ok_or_else(|| CoordError::UnknownWork(work.to_string()))?;
    if !item.status.is_held() {
        return Err(CoordError::InvariantViolation(format!(
            "{} is not claimed (status {:?})",
            work, item.status
        )));
    }
    if item.agent_id.as_deref() != Some(agent) {
        return Err(CoordError::InvariantViolation(format!(
            "{} is owned by {}, not {}",
            work,
            item.agent_id.as_deref().unwrap_or("nobody"),
            agent
        )));
    }
    Ok(item)
}

/// The claim mutation: verifies at-most-one-claim, stamps the item, and
/// bumps the agent's workload.
fn apply_claim(
    items: &mut [WorkItem],
    agents: &mut [AgentStatus],
    work: &str,
    agent: &str,
    telemetry: TelemetryMeta,
) -> CoordResult<ClaimRecord> {
    let item = items
        .iter_mut()
        .find(|i| i.work_item_id == work)
        .ok_or_else(|| CoordError::UnknownWork(work.to_string()))?;
    let agent_entry = agents
        .iter_mut()
        .find(|a| a.agent_id == agent)
        .ok_or_else(|| CoordError::UnknownAgent(agent.to_string()))?;

    if item.status.is_held() {
        return Err(CoordError::AlreadyClaimed {
            work_item_id: work.to_string(),
            holder: item.agent_id.clone().unwrap_or_default(),
        });
    }
    if item.status.is_terminal() {
        return Err(CoordError::InvariantViolation(format!(
            "{} is already completed",
            work
        )));
    }

    let claimed_at = Utc::now();
    item.status = WorkStatus::Claimed;
    item.agent_id = Some(agent.to_string());
    item.claimed_at = Some(claimed_at);
    item.progress = 0;
    item.telemetry = telemetry.clone();
    agent_entry.current_workload += 1;

    Ok(ClaimRecord {
        work_item_id: work.to_string(),
        agent_id: agent.to_string(),
        claimed_at,
        trace_id: telemetry.trace_id,
        span_id: telemetry.span_id,
    })
}

fn log_entry(
    agent_id: &str,
    work_item_id: &str,
    event: CoordinationEvent,
    velocity_points: Option<u32>,
    trace_id: &str,
) -> CoordinationLogEntry {
    CoordinationLogEntry {
        timestamp: Utc::now(),
        agent_id: agent_id.to_string(),
        work_item_id: work_item_id.to_string(),
        event,
        velocity_points,
        trace_id: trace_id.to_string(),
    }
}
