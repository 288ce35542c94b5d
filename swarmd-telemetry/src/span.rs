//! Span records
//!
//! A span is a timed, attributed unit of execution within a trace,
//! immutable once emitted. The serde field names are the wire contract
//! for `telemetry_spans.jsonl`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Span outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    Ok,
    Error,
}

/// Service identity stamped on every span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub service_name: String,
    pub service_version: String,
}

impl Default for Resource {
    fn default() -> Self {
        Self {
            service_name: swarmd_core::config::SERVICE_NAME.to_string(),
            service_version: swarmd_core::config::SERVICE_VERSION.to_string(),
        }
    }
}

/// A finished span. Attribute values are JSON scalars.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanRecord {
    pub trace_id: String,
    pub span_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    pub operation_name: String,
    pub start_ns: u64,
    pub end_ns: u64,
    pub status: SpanStatus,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
    pub resource: Resource,
}

/// Current wall clock in nanoseconds since the epoch.
pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_values() {
        assert_eq!(serde_json::to_string(&SpanStatus::Ok).unwrap(), "\"ok\"");
        assert_eq!(serde_json::to_string(&SpanStatus::Error).unwrap(), "\"error\"");
    }

    #[test]
    fn test_record_round_trip() {
        let record = SpanRecord {
            trace_id: "4bf92f3577b34da6a3ce929d0e0e4736".into(),
            span_id: "00f067aa0ba902b7".into(),
            parent_span_id: None,
            operation_name: "coordinator.claim".into(),
            start_ns: 100,
            end_ns: 200,
            status: SpanStatus::Ok,
            attributes: BTreeMap::from([("work_item_id".to_string(), serde_json::json!("work_1"))]),
            resource: Resource::default(),
        };
        let line = serde_json::to_string(&record).unwrap();
        let back: SpanRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(back.operation_name, "coordinator.claim");
        assert_eq!(back.resource.service_name, "swarmd");
        assert!(!line.contains("parent_span_id"));
    }
}
