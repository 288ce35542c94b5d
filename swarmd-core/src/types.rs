//! Domain types for the coordination runtime
//!
//! The serde field names and enum values here are the on-disk contract
//! (`work_claims.json`, `agent_status.json`, `coordination_log.json`).
//! External tools parse these files; nothing may be renamed.

use crate::trace::TraceContext;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Work item priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            other => Err(format!("unknown priority: {}", other)),
        }
    }
}

/// Work item lifecycle state
///
/// ```text
/// pending ──claim──► claimed ──progress*──► active ──complete──► completed
///    ▲                 │                        │
///    └──release────────┴────────release─────────┘
/// ```
///
/// `claimed` and `active` are distinguished only by nonzero progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkStatus {
    Pending,
    Claimed,
    Active,
    Completed,
}

impl WorkStatus {
    /// Whether an agent currently holds the claim.
    pub fn is_held(&self) -> bool {
        matches!(self, WorkStatus::Claimed | WorkStatus::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkStatus::Completed)
    }
}

/// Trace metadata embedded in a work item at claim time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryMeta {
    pub trace_id: String,
    pub span_id: String,
    pub operation: String,
    pub service: String,
}

impl TelemetryMeta {
    pub fn from_context(ctx: &TraceContext, operation: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            trace_id: ctx.trace_id.clone(),
            span_id: ctx.span_id.clone(),
            operation: operation.into(),
            service: service.into(),
        }
    }
}

/// A unit of coordinated work; the scheduling atom.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub work_item_id: String,
    pub work_type: String,
    pub priority: Priority,
    pub team: String,
    pub description: String,
    pub status: WorkStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Percent complete, 0-100, non-decreasing within a claim.
    #[serde(default)]
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub telemetry: TelemetryMeta,
}

/// Agent lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Active,
    Draining,
    Offline,
}

/// Performance counters maintained per agent.
///
/// Velocity points are opaque metadata summed per agent; the runtime
/// assigns them no arithmetic meaning beyond the total.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    #[serde(default)]
    pub total_velocity: u64,
    #[serde(default)]
    pub items_completed: u64,
    #[serde(default)]
    pub items_released: u64,
}

/// A registered worker participating in coordination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatus {
    pub agent_id: String,
    pub team: String,
    pub status: AgentState,
    pub capacity: u32,
    pub current_workload: u32,
    pub last_heartbeat: DateTime<Utc>,
    pub specialization: String,
    #[serde(default)]
    pub performance_metrics: PerformanceMetrics,
}

impl AgentStatus {
    /// Whether this agent can accept another claim right now.
    pub fn can_claim(&self) -> bool {
        self.status == AgentState::Active && self.current_workload < self.capacity
    }
}

/// Coordination log event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinationEvent {
    Claimed,
    Progressed,
    Completed,
    Released,
    Escalated,
}

/// Append-only coordination log record. Entries are never mutated or
/// deleted by the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationLogEntry {
    pub timestamp: DateTime<Utc>,
    pub agent_id: String,
    pub work_item_id: String,
    pub event: CoordinationEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity_points: Option<u32>,
    pub trace_id: String,
}
