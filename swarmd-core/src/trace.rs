//! Trace context propagation
//!
//! Every operation entering the runtime carries a [`TraceContext`]. If one
//! is absent at an entry point, a new root is minted there. The wire format
//! is W3C Trace Context (`traceparent: 00-<trace>-<span>-<flags>`).

use crate::id::IdGenerator;
use serde::{Deserialize, Serialize};

/// Propagating trace context: 128-bit trace id, 64-bit span id, optional
/// parent. The sampling decision is taken at the trace root and carried
/// with the context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    #[serde(default = "default_sampled")]
    pub sampled: bool,
}

fn default_sampled() -> bool {
    true
}

impl TraceContext {
    /// Mint a new root context. The sampling decision is the caller's
    /// (head-based, decided once per trace).
    pub fn root(ids: &IdGenerator, sampled: bool) -> Self {
        Self {
            trace_id: ids.trace_id(),
            span_id: ids.span_id(),
            parent_span_id: None,
            sampled,
        }
    }

    /// Derive a child context: same trace, fresh span id, current span
    /// becomes the parent. The sampling decision is inherited.
    pub fn child(&self, ids: &IdGenerator) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: ids.span_id(),
            parent_span_id: Some(self.span_id.clone()),
            sampled: self.sampled,
        }
    }

    /// Format as a W3C `traceparent` header value.
    pub fn to_traceparent(&self) -> String {
        format!(
            "00-{}-{}-{:02x}",
            self.trace_id,
            self.span_id,
            if self.sampled { 1 } else { 0 }
        )
    }

    /// Parse a W3C `traceparent` header value. Returns `None` for
    /// malformed input; callers mint a fresh root in that case.
    pub fn from_traceparent(header: &str) -> Option<Self> {
        let mut parts = header.trim().split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let span_id = parts.next()?;
        let flags = parts.next()?;
        if parts.next().is_some() {
            return None;
        }
        if version != "00" || trace_id.len() != 32 || span_id.len() != 16 || flags.len() != 2 {
            return None;
        }
        if !is_lower_hex(trace_id) || !is_lower_hex(span_id) || !is_lower_hex(flags) {
            return None;
        }
        // all-zero ids are invalid per the W3C spec
        if trace_id.bytes().all(|b| b == b'0') || span_id.bytes().all(|b| b == b'0') {
            return None;
        }
        let sampled = u8::from_str_radix(flags, 16).ok()? & 0x01 == 1;
        Some(Self {
            trace_id: trace_id.to_string(),
            span_id: span_id.to_string(),
            parent_span_id: None,
            sampled,
        })
    }
}

fn is_lower_hex(s: &str) -> bool {
    s.bytes()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
