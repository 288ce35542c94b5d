//! Identifier service
//!
//! Issues process-unique identifiers with nanosecond-resolution timestamps
//! and a wrapping per-process counter. The raw form is
//! `monotonic_ns * 2^16 + counter`, so two ids minted in the same
//! nanosecond still differ. Trace ids are 128 random bits, span ids 64,
//! both formatted lowercase hex.

use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Per-process floor for the nanosecond clock. Wall-clock steps backwards
/// must never produce a smaller timestamp than one already handed out.
static CLOCK_FLOOR_NS: AtomicU64 = AtomicU64::new(0);

/// Wrapping per-process counter mixed into the low 16 bits.
static SEQUENCE: AtomicU16 = AtomicU16::new(0);

/// Nanoseconds since the epoch, monotone within this process.
fn monotonic_ns() -> u64 {
    let wall = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let prev = CLOCK_FLOOR_NS.fetch_max(wall, Ordering::Relaxed);
    wall.max(prev)
}

/// Generator for agent, work, trace, and span identifiers.
///
/// Cheap to clone; the uniqueness state is process-global.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    host_prefix: Option<String>,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self { host_prefix: None }
    }

    /// Prefix ids with a host tag for multi-host deployments, where
    /// nanosecond uniqueness alone is not enough.
    pub fn with_host_prefix(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            host_prefix: if prefix.is_empty() {
                None
            } else {
                Some(prefix)
            },
        }
    }

    /// Raw identifier value: `monotonic_ns * 2^16 + counter`.
    pub fn next_raw(&self) -> u128 {
        let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        ((monotonic_ns() as u128) << 16) | seq as u128
    }

    fn formatted(&self, tag: &str) -> String {
        match &self.host_prefix {
            Some(prefix) => format!("{}_{}_{}", tag, prefix, self.next_raw()),
            None => format!("{}_{}", tag, self.next_raw()),
        }
    }

    /// Mint an agent identifier (`agent_<n>`).
    pub fn agent_id(&self) -> String {
        self.formatted("agent")
    }

    /// Mint a work item identifier (`work_<n>`).
    pub fn work_id(&self) -> String {
        self.formatted("work")
    }

    /// Mint a 128-bit trace id, lowercase hex, never all-zero.
    pub fn trace_id(&self) -> String {
        loop {
            let bits: u128 = rand::random();
            if bits != 0 {
                return format!("{:032x}", bits);
            }
        }
    }

    /// Mint a 64-bit span id, lowercase hex, never all-zero.
    pub fn span_id(&self) -> String {
        loop {
            let bits: u64 = rand::random();
            if bits != 0 {
                return format!("{:016x}", bits);
            }
        }
    }
}
