//! Error taxonomy for coordination operations
//!
//! Every fallible operation in the runtime returns one of these kinds.
//! The kind names are stable: the CLI prints them verbatim and maps them
//! to exit codes, so renaming a variant's `kind()` is a breaking change.

use thiserror::Error;

/// Result type alias for coordination operations
pub type CoordResult<T> = Result<T, CoordError>;

/// Error kinds for coordination operations
#[derive(Error, Debug)]
pub enum CoordError {
    #[error("lock contention: coordination lock still busy after {waited_ms} ms")]
    Contention { waited_ms: u64 },

    #[error("corrupted collection '{collection}': {detail}")]
    Corrupted { collection: String, detail: String },

    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("unknown work item: {0}")]
    UnknownWork(String),

    #[error("work item {work_item_id} already claimed by {holder}")]
    AlreadyClaimed {
        work_item_id: String,
        holder: String,
    },

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("{operation} timed out after {elapsed_ms} ms")]
    Timeout { operation: String, elapsed_ms: u64 },

    #[error("analyzer unavailable: {0}")]
    AnalyzerUnavailable(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoordError {
    /// Stable snake_case name for this error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            CoordError::Contention { .. } => "contention",
            CoordError::Corrupted { .. } => "corrupted",
            CoordError::UnknownAgent(_) => "unknown_agent",
            CoordError::UnknownWork(_) => "unknown_work",
            CoordError::AlreadyClaimed { .. } => "already_claimed",
            CoordError::InvariantViolation(_) => "invariant_violation",
            CoordError::Timeout { .. } => "timeout",
            CoordError::AnalyzerUnavailable(_) => "analyzer_unavailable",
            CoordError::Cancelled => "cancelled",
            CoordError::Io(_) => "io",
            CoordError::Serialization(_) => "io",
        }
    }

    /// Check if the caller may safely retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoordError::Contention { .. } | CoordError::Timeout { .. }
        )
    }

    /// Check if the error must stop further mutations (operator required).
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoordError::Corrupted { .. })
    }
}
