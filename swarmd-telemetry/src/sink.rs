//! Append-only file sink with size rotation
//!
//! One JSON object per line in `telemetry_spans.jsonl`. Line order is
//! drain order, not span start order. The single consumer thread is the
//! only writer, so rotation (rename + fresh file) cannot tear a line.

use crate::span::SpanRecord;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use swarmd_core::CoordResult;

/// Rotate once the live file exceeds this many bytes.
pub const DEFAULT_MAX_SIZE: u64 = 64 * 1024 * 1024;

pub struct FileSink {
    path: PathBuf,
    max_size: u64,
}

impl FileSink {
    pub fn new(coord_dir: &Path) -> Self {
        Self {
            path: coord_dir.join("telemetry_spans.jsonl"),
            max_size: DEFAULT_MAX_SIZE,
        }
    }

    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a batch of spans, then rotate if the file grew past the
    /// size threshold.
    pub fn write_batch(&self, batch: &[SpanRecord]) -> CoordResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut buf = String::new();
        for span in batch {
            buf.push_str(&serde_json::to_string(span)?);
            buf.push('\n');
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(buf.as_bytes())?;
        file.sync_data()?;
        let size = file.metadata()?.len();
        drop(file);

        if size >= self.max_size {
            self.rotate()?;
        }
        Ok(())
    }

    fn rotate(&self) -> CoordResult<()> {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let rotated = self.path.with_file_name(format!("telemetry_spans.{}.jsonl", ts));
        // A second rotation within the same second appends to the same
        // rotated file on the next pass rather than clobbering it.
        if rotated.exists() {
            return Ok(());
        }
        std::fs::rename(&self.path, &rotated)?;
        tracing::info!(rotated = %rotated.display(), "rotated span log");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::{Resource, SpanStatus};
    use std::collections::BTreeMap;

    fn span(name: &str) -> SpanRecord {
        SpanRecord {
            trace_id: "a".repeat(32),
            span_id: "b".repeat(16),
            parent_span_id: None,
            operation_name: name.to_string(),
            start_ns: 1,
            end_ns: 2,
            status: SpanStatus::Ok,
            attributes: BTreeMap::new(),
            resource: Resource::default(),
        }
    }

    #[test]
    fn test_appends_one_line_per_span() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path());
        sink.write_batch(&[span("a"), span("b")]).unwrap();
        sink.write_batch(&[span("c")]).unwrap();
        let content = std::fs::read_to_string(sink.path()).unwrap();
        assert_eq!(content.lines().count(), 3);
        for line in content.lines() {
            let parsed: SpanRecord = serde_json::from_str(line).unwrap();
            assert_eq!(parsed.trace_id.len(), 32);
        }
    }

    #[test]
    fn test_rotation_at_size_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path()).with_max_size(256);
        for i in 0..8 {
            sink.write_batch(&[span(&format!("span_{}", i))]).unwrap();
        }
        let rotated: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                name.starts_with("telemetry_spans.") && name != "telemetry_spans.jsonl"
            })
            .collect();
        assert!(!rotated.is_empty(), "expected at least one rotated span log");
    }
}
