//! # swarmd-optimizer
//!
//! The autonomous optimization loop. Each cycle reads the claim store
//! and a recent span-log window, computes deterministic health metrics,
//! and files remediation work items for every breached threshold —
//! never mutating existing work. The cycle also runs the agent-TTL
//! sweeper and the retention pass, and appends its history to
//! `optimization_history.jsonl` and `metrics/metrics_YYYYMMDD.jsonl`.
//!
//! The external AI analyzer rides along as a subprocess adapter with a
//! strict contract: snapshot on stdin, `{analysis, recommendations}` on
//! stdout, 30 seconds to answer.

pub mod analyzer;
pub mod metrics;
pub mod optimizer;

pub use analyzer::{analysis_step, AnalyzerAdapter, AnalyzerReport};
pub use metrics::{HealthMetrics, Thresholds};
pub use optimizer::{CycleReport, OptimizationLoop, OptimizerConfig};
