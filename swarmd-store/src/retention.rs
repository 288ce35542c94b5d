//! Age-based retention for metrics files and rotated span logs
//!
//! Invoked from each optimization cycle. Deletes `metrics/*.jsonl` and
//! rotated `telemetry_spans.<ts>.jsonl` files older than the retention
//! window. The live span log and the three coordination collections are
//! never deleted.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use swarmd_core::CoordResult;

/// Files the retention pass must never touch.
const PROTECTED: &[&str] = &[
    "work_claims.json",
    "agent_status.json",
    "coordination_log.json",
    "telemetry_spans.jsonl",
];

/// Default retention window: 7 days.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Outcome of one retention pass.
#[derive(Debug, Default)]
pub struct RetentionReport {
    pub deleted: Vec<PathBuf>,
}

/// Delete expired metrics files and rotated span logs under `dir`.
pub fn enforce_retention(dir: &Path, max_age: Duration) -> CoordResult<RetentionReport> {
    let cutoff = SystemTime::now()
        .checked_sub(max_age)
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let mut report = RetentionReport::default();

    sweep(&dir.join("metrics"), cutoff, |name| name.ends_with(".jsonl"), &mut report)?;
    sweep(
        dir,
        cutoff,
        |name| name.starts_with("telemetry_spans.") && name.ends_with(".jsonl"),
        &mut report,
    )?;

    if !report.deleted.is_empty() {
        tracing::info!(count = report.deleted.len(), "retention pass deleted expired files");
    }
    Ok(report)
}

fn sweep(
    dir: &Path,
    cutoff: SystemTime,
    matches: impl Fn(&str) -> bool,
    report: &mut RetentionReport,
) -> CoordResult<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if PROTECTED.contains(&name) || !matches(name) {
            continue;
        }
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified()?;
        if modified < cutoff {
            let path = entry.path();
            fs::remove_file(&path)?;
            report.deleted.push(path);
        }
    }
    Ok(())
}
