//! Best-effort OTLP sink
//!
//! Batched HTTP POST of OTLP/JSON resource spans to
//! `${OTLP_ENDPOINT}/v1/traces`. Failures are retried with backoff and
//! then logged and discarded; the sink makes no durability promise.

use crate::span::{SpanRecord, SpanStatus};
use serde_json::{json, Value};
use std::time::Duration;
use swarmd_core::CoordResult;

/// Per-request timeout; also bounds a full flush attempt.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);
const RETRY_BASE: Duration = Duration::from_millis(200);
const MAX_ATTEMPTS: u32 = 3;

pub struct OtlpSink {
    client: reqwest::blocking::Client,
    url: String,
}

impl OtlpSink {
    pub fn new(endpoint: &str) -> CoordResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(FLUSH_TIMEOUT)
            .build()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        Ok(Self {
            client,
            url: format!("{}/v1/traces", endpoint.trim_end_matches('/')),
        })
    }

    /// Export a batch, best effort. Never returns an error to the caller;
    /// the span log file is the durable record.
    pub fn export(&self, batch: &[SpanRecord]) {
        if batch.is_empty() {
            return;
        }
        let payload = encode_resource_spans(batch);
        let mut delay = RETRY_BASE;
        for attempt in 1..=MAX_ATTEMPTS {
            match self.client.post(&self.url).json(&payload).send() {
                Ok(response) if response.status().is_success() => return,
                Ok(response) => {
                    tracing::debug!(status = %response.status(), attempt, "otlp export rejected");
                }
                Err(e) => {
                    tracing::debug!(error = %e, attempt, "otlp export failed");
                }
            }
            if attempt < MAX_ATTEMPTS {
                std::thread::sleep(delay);
                delay *= 2;
            }
        }
        tracing::warn!(spans = batch.len(), "dropping span batch after otlp retries");
    }
}

/// Encode spans as an OTLP/JSON `ExportTraceServiceRequest`.
///
/// All spans in a batch share one resource; swarmd stamps the same
/// service identity on every span it emits.
fn encode_resource_spans(batch: &[SpanRecord]) -> Value {
    let resource = &batch[0].resource;
    let spans: Vec<Value> = batch.iter().map(encode_span).collect();
    json!({
        "resourceSpans": [{
            "resource": {
                "attributes": [
                    { "key": "service.name", "value": { "stringValue": resource.service_name } },
                    { "key": "service.version", "value": { "stringValue": resource.service_version } },
                ]
            },
            "scopeSpans": [{
                "scope": { "name": "swarmd-telemetry" },
                "spans": spans,
            }]
        }]
    })
}

fn encode_span(span: &SpanRecord) -> Value {
    let attributes: Vec<Value> = span
        .attributes
        .iter()
        .map(|(key, value)| json!({ "key": key, "value": encode_any_value(value) }))
        .collect();
    let mut encoded = json!({
        "traceId": span.trace_id,
        "spanId": span.span_id,
        "name": span.operation_name,
        "kind": 1,
        "startTimeUnixNano": span.start_ns.to_string(),
        "endTimeUnixNano": span.end_ns.to_string(),
        "status": { "code": match span.status { SpanStatus::Ok => 1, SpanStatus::Error => 2 } },
        "attributes": attributes,
    });
    if let Some(parent) = &span.parent_span_id {
        encoded["parentSpanId"] = json!(parent);
    }
    encoded
}

fn encode_any_value(value: &Value) -> Value {
    match value {
        Value::String(s) => json!({ "stringValue": s }),
        Value::Bool(b) => json!({ "boolValue": b }),
        Value::Number(n) if n.is_i64() || n.is_u64() => {
            json!({ "intValue": n.to_string() })
        }
        Value::Number(n) => json!({ "doubleValue": n.as_f64() }),
        other => json!({ "stringValue": other.to_string() }),
    }
}
