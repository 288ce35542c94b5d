//! # swarmd-telemetry
//!
//! The telemetry pipeline: every significant operation in the runtime
//! produces a [`SpanRecord`] carrying the propagating trace context.
//!
//! Spans flow through a bounded multi-producer single-consumer queue
//! (producers never block; the oldest span is dropped when full) into an
//! append-only `telemetry_spans.jsonl` file sink with size rotation and,
//! optionally, a best-effort OTLP/JSON HTTP sink.

pub mod otlp;
pub mod pipeline;
pub mod queue;
pub mod sink;
pub mod span;

pub use pipeline::{SpanGuard, TelemetryPipeline};
pub use span::{Resource, SpanRecord, SpanStatus};
