//! The optimization loop
//!
//! One cycle: read state, compute metrics, file remediation work for
//! breached thresholds (deduplicated against pending items), sweep stale
//! agents, enforce retention, append history. The loop only ever creates
//! work items; existing ones are never touched.

use crate::metrics::{HealthMetrics, Remediation, Thresholds};
use chrono::Utc;
use serde::Serialize;
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;
use swarmd_coordination::{Coordinator, WorkRequest};
use swarmd_core::types::{AgentStatus, WorkItem, WorkStatus};
use swarmd_core::{CoordConfig, CoordResult};
use swarmd_reactor::CancelToken;
use swarmd_store::{enforce_retention, retention::DEFAULT_RETENTION, ClaimStore, Collection};
use swarmd_telemetry::{SpanRecord, SpanStatus, TelemetryPipeline};

/// Span-log window examined per cycle.
const DEFAULT_SPAN_WINDOW: usize = 1000;

#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    pub interval: Duration,
    pub thresholds: Thresholds,
    pub span_window: usize,
    pub agent_ttl: Duration,
    pub retention: Duration,
    /// Team remediation items are filed under.
    pub team: String,
}

impl OptimizerConfig {
    pub fn from_coord_config(config: &CoordConfig) -> Self {
        Self {
            interval: config.optimization_interval,
            thresholds: Thresholds::default(),
            span_window: DEFAULT_SPAN_WINDOW,
            agent_ttl: config.agent_ttl,
            retention: DEFAULT_RETENTION,
            team: "autonomy".to_string(),
        }
    }
}

/// Outcome of one optimization cycle.
#[derive(Debug, Serialize)]
pub struct CycleReport {
    pub timestamp: chrono::DateTime<Utc>,
    pub metrics: HealthMetrics,
    /// `(work_type, work_item_id)` for every remediation filed.
    pub created: Vec<(String, String)>,
    /// Breaches skipped because an identical pending item already exists.
    pub deduplicated: Vec<String>,
    pub swept_agents: Vec<String>,
    pub retention_deleted: usize,
}

pub struct OptimizationLoop {
    store: Arc<ClaimStore>,
    coordinator: Arc<Coordinator>,
    telemetry: Arc<TelemetryPipeline>,
    config: OptimizerConfig,
}

impl OptimizationLoop {
    pub fn new(
        store: Arc<ClaimStore>,
        coordinator: Arc<Coordinator>,
        telemetry: Arc<TelemetryPipeline>,
        config: OptimizerConfig,
    ) -> Self {
        Self {
            store,
            coordinator,
            telemetry,
            config,
        }
    }

    /// One measurement-and-remediation cycle.
    pub fn run_once(&self) -> CoordResult<CycleReport> {
        let ctx = self.telemetry.root_context();
        let mut span = self.telemetry.start_span("optimizer.cycle", &ctx);

        let (items, _) = self.store.load::<WorkItem>(Collection::WorkClaims)?;
        let (agents, _) = self.store.load::<AgentStatus>(Collection::AgentStatus)?;
        let spans = self.span_window()?;
        let metrics = HealthMetrics::compute(&items, &agents, &spans);

        let mut created = Vec::new();
        let mut deduplicated = Vec::new();
        for remediation in self.config.thresholds.breaches(&metrics) {
            if has_pending_of_type(&items, remediation.work_type) {
                deduplicated.push(remediation.work_type.to_string());
                continue;
            }
            let work_id = self.file_remediation(&remediation)?;
            created.push((remediation.work_type.to_string(), work_id));
        }

        let swept_agents = self.coordinator.sweep_stale_agents(self.config.agent_ttl)?;
        let retention_deleted = enforce_retention(self.store.dir(), self.config.retention)?
            .deleted
            .len();

        let report = CycleReport {
            timestamp: Utc::now(),
            metrics,
            created,
            deduplicated,
            swept_agents,
            retention_deleted,
        };
        self.append_history(&report)?;

        span.set_attribute("created", report.created.len() as i64);
        span.set_attribute("efficiency", report.metrics.system_efficiency);
        span.finish(SpanStatus::Ok);
        tracing::info!(
            efficiency = report.metrics.system_efficiency,
            created = report.created.len(),
            swept = report.swept_agents.len(),
            "optimization cycle complete"
        );
        Ok(report)
    }

    /// Run cycles on the configured interval until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancelToken) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let this = self.clone();
            let outcome = tokio::task::spawn_blocking(move || this.run_once()).await;
            match outcome {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "optimization cycle failed"),
                Err(e) => tracing::error!(error = %e, "optimization cycle panicked"),
            }
        }
    }

    fn file_remediation(&self, remediation: &Remediation) -> CoordResult<String> {
        self.coordinator.create_work(WorkRequest {
            work_type: remediation.work_type.to_string(),
            priority: remediation.priority,
            team: self.config.team.clone(),
            description: remediation.description.clone(),
            estimated_duration: None,
            created_by: Some("optimization_loop".to_string()),
        })
    }

    /// Tail of `telemetry_spans.jsonl`, newest `span_window` records.
    /// Unparsable lines are skipped: the window is advisory input, not a
    /// collection with a schema contract.
    fn span_window(&self) -> CoordResult<Vec<SpanRecord>> {
        let path = self.store.dir().join("telemetry_spans.jsonl");
        let file = match std::fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut lines: Vec<String> = std::io::BufReader::new(file)
            .lines()
            .collect::<Result<_, _>>()?;
        if lines.len() > self.config.span_window {
            lines.drain(..lines.len() - self.config.span_window);
        }
        Ok(lines
            .iter()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }

    fn append_history(&self, report: &CycleReport) -> CoordResult<()> {
        self.store.append_jsonl("optimization_history.jsonl", report)?;
        let daily = format!("metrics/metrics_{}.jsonl", report.timestamp.format("%Y%m%d"));
        self.store.append_jsonl(
            daily,
            &serde_json::json!({
                "timestamp": report.timestamp,
                "metrics": report.metrics,
            }),
        )
    }
}

fn has_pending_of_type(items: &[WorkItem], work_type: &str) -> bool {
    items
        .iter()
        .any(|i| i.work_type == work_type && i.status == WorkStatus::Pending)
}
