//! Health metrics
//!
//! Deterministic functions of the claim store and a span-log window.
//! All values are percentages in [0, 100]. Empty inputs read as healthy
//! (a fresh directory must not trigger remediation).

use serde::{Deserialize, Serialize};
use swarmd_core::types::{AgentState, AgentStatus, Priority, WorkItem, WorkStatus};
use swarmd_telemetry::{SpanRecord, SpanStatus};

/// Work types the optimization loop files for breached thresholds.
pub const WORK_TYPE_EFFICIENCY: &str = "system_efficiency_optimization";
pub const WORK_TYPE_COMPLETION: &str = "completion_rate_optimization";
pub const WORK_TYPE_ERROR_RATE: &str = "error_rate_reduction";
pub const WORK_TYPE_UTILIZATION: &str = "agent_utilization_optimization";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthMetrics {
    pub system_efficiency: f64,
    pub completion_rate: f64,
    pub agent_utilization: f64,
    pub span_success_rate: f64,
    pub error_rate: f64,
    pub total_work_items: usize,
    pub completed_work_items: usize,
    pub active_agents: usize,
    pub busy_agents: usize,
    pub spans_observed: usize,
}

impl HealthMetrics {
    pub fn compute(items: &[WorkItem], agents: &[AgentStatus], spans: &[SpanRecord]) -> Self {
        let total_work_items = items.len();
        let completed_work_items = items
            .iter()
            .filter(|i| i.status == WorkStatus::Completed)
            .count();
        let completion_rate = if total_work_items == 0 {
            100.0
        } else {
            completed_work_items as f64 / total_work_items as f64 * 100.0
        };

        let active: Vec<_> = agents
            .iter()
            .filter(|a| a.status == AgentState::Active)
            .collect();
        let busy_agents = active.iter().filter(|a| a.current_workload > 0).count();
        let agent_utilization = if active.is_empty() {
            100.0
        } else {
            busy_agents as f64 / active.len() as f64 * 100.0
        };

        let spans_observed = spans.len();
        let ok_spans = spans.iter().filter(|s| s.status == SpanStatus::Ok).count();
        let span_success_rate = if spans_observed == 0 {
            100.0
        } else {
            ok_spans as f64 / spans_observed as f64 * 100.0
        };
        let error_rate = 100.0 - span_success_rate;

        let system_efficiency = (completion_rate + agent_utilization + span_success_rate) / 3.0;

        Self {
            system_efficiency,
            completion_rate,
            agent_utilization,
            span_success_rate,
            error_rate,
            total_work_items,
            completed_work_items,
            active_agents: active.len(),
            busy_agents,
            spans_observed,
        }
    }
}

/// Breach thresholds. Defaults: efficiency < 70, completion < 50,
/// error > 10, utilization < 80.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thresholds {
    pub efficiency_min: f64,
    pub completion_min: f64,
    pub error_max: f64,
    pub utilization_min: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            efficiency_min: 70.0,
            completion_min: 50.0,
            error_max: 10.0,
            utilization_min: 80.0,
        }
    }
}

/// One remediation work item to file.
#[derive(Debug, Clone, PartialEq)]
pub struct Remediation {
    pub work_type: &'static str,
    pub priority: Priority,
    pub description: String,
}

impl Thresholds {
    /// Compare metrics to thresholds. Priority is fixed per metric:
    /// efficiency breaches are critical, completion and error breaches
    /// high, utilization medium.
    pub fn breaches(&self, metrics: &HealthMetrics) -> Vec<Remediation> {
        let mut out = Vec::new();
        if metrics.system_efficiency < self.efficiency_min {
            out.push(Remediation {
                work_type: WORK_TYPE_EFFICIENCY,
                priority: Priority::Critical,
                description: format!(
                    "system efficiency {:.1}% below threshold {:.1}%",
                    metrics.system_efficiency, self.efficiency_min
                ),
            });
        }
        if metrics.completion_rate < self.completion_min {
            out.push(Remediation {
                work_type: WORK_TYPE_COMPLETION,
                priority: Priority::High,
                description: format!(
                    "work completion rate {:.1}% below threshold {:.1}%",
                    metrics.completion_rate, self.completion_min
                ),
            });
        }
        if metrics.error_rate > self.error_max {
            out.push(Remediation {
                work_type: WORK_TYPE_ERROR_RATE,
                priority: Priority::High,
                description: format!(
                    "span error rate {:.1}% above threshold {:.1}%",
                    metrics.error_rate, self.error_max
                ),
            });
        }
        if metrics.agent_utilization < self.utilization_min {
            out.push(Remediation {
                work_type: WORK_TYPE_UTILIZATION,
                priority: Priority::Medium,
                description: format!(
                    "agent utilization {:.1}% below threshold {:.1}%",
                    metrics.agent_utilization, self.utilization_min
                ),
            });
        }
        out
    }
}
