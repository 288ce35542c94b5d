//! External AI analyzer adapter
//!
//! The analyzer is an opaque subprocess: state snapshot JSON on stdin,
//! `{analysis: object, recommendations: array}` on stdout, 30 seconds of
//! wall clock. Anything else — non-zero exit, timeout, missing or
//! malformed output — is `AnalyzerUnavailable`, and callers degrade
//! rather than fail.

use crate::metrics::HealthMetrics;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use swarmd_core::{CoordError, CoordResult};
use swarmd_reactor::{StepDef, StepValue};
use tokio::io::AsyncWriteExt;

const ANALYZER_TIMEOUT: Duration = Duration::from_secs(30);

/// The analyzer's output schema. Deserialization enforces the shape:
/// `analysis` must be an object, `recommendations` an array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerReport {
    pub analysis: serde_json::Map<String, serde_json::Value>,
    pub recommendations: Vec<serde_json::Value>,
}

pub struct AnalyzerAdapter {
    command: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl AnalyzerAdapter {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            timeout: ANALYZER_TIMEOUT,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Invoke the analyzer with a snapshot. The subprocess is killed if
    /// it outlives the timeout.
    pub async fn analyze(&self, snapshot: &serde_json::Value) -> CoordResult<AnalyzerReport> {
        let mut child = tokio::process::Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CoordError::AnalyzerUnavailable(format!(
                    "failed to spawn {}: {}",
                    self.command.display(),
                    e
                ))
            })?;

        let payload = serde_json::to_vec(snapshot)?;
        if let Some(mut stdin) = child.stdin.take() {
            // a crashed analyzer may close stdin early; that surfaces as
            // a broken pipe here and as the exit status below
            let _ = stdin.write_all(&payload).await;
            let _ = stdin.shutdown().await;
        }

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(CoordError::AnalyzerUnavailable(format!("wait failed: {}", e)))
            }
            Err(_) => {
                return Err(CoordError::AnalyzerUnavailable(format!(
                    "timed out after {:?}",
                    self.timeout
                )))
            }
        };

        if !output.status.success() {
            return Err(CoordError::AnalyzerUnavailable(format!(
                "exit status {}",
                output.status
            )));
        }
        if output.stdout.is_empty() {
            return Err(CoordError::AnalyzerUnavailable("no output".into()));
        }
        serde_json::from_slice(&output.stdout).map_err(|e| {
            CoordError::AnalyzerUnavailable(format!("output failed schema validation: {}", e))
        })
    }

    /// Convenience: analyze a metrics snapshot.
    pub async fn analyze_metrics(&self, metrics: &HealthMetrics) -> CoordResult<AnalyzerReport> {
        self.analyze(&serde_json::to_value(metrics)?).await
    }
}

/// A reactor step wrapping the analyzer. On `AnalyzerUnavailable` the
/// step degrades: it succeeds with a null result and records a
/// `degraded` attribute on the invocation span.
pub fn analysis_step(adapter: Arc<AnalyzerAdapter>) -> StepDef {
    StepDef::new("ai_analysis", move |args, ctx| {
        let adapter = adapter.clone();
        async move {
            let snapshot = args.get("snapshot").cloned().unwrap_or(StepValue::Null);
            let span_ctx = ctx.telemetry().child_context(ctx.trace());
            let mut span = ctx.telemetry().start_span("analyzer.invoke", &span_ctx);
            match adapter.analyze(&snapshot).await {
                Ok(report) => {
                    span.set_attribute("recommendations", report.recommendations.len() as i64);
                    span.finish_ok();
                    Ok(serde_json::to_value(report)?)
                }
                Err(CoordError::AnalyzerUnavailable(reason)) => {
                    tracing::warn!(reason = %reason, "analyzer unavailable; degrading");
                    span.set_attribute("degraded", true);
                    span.set_attribute("reason", reason);
                    span.finish_ok();
                    Ok(StepValue::Null)
                }
                Err(e) => {
                    span.finish_error(&e);
                    Err(e)
                }
            }
        }
    })
    .with_input("snapshot")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell_analyzer(script: &str) -> AnalyzerAdapter {
        AnalyzerAdapter::new("/bin/sh").with_args(vec!["-c".into(), script.into()])
    }

    #[tokio::test]
    async fn test_valid_report_round_trips() {
        let adapter = shell_analyzer(
            r#"cat > /dev/null; echo '{"analysis":{"verdict":"healthy"},"recommendations":[{"action":"none"}]}'"#,
        );
        let report = adapter.analyze(&serde_json::json!({"agents": 1})).await.unwrap();
        assert_eq!(report.analysis["verdict"], "healthy");
        assert_eq!(report.recommendations.len(), 1);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_unavailable() {
        let adapter = shell_analyzer("cat > /dev/null; exit 3");
        let err = adapter.analyze(&serde_json::json!({})).await.unwrap_err();
        assert_eq!(err.kind(), "analyzer_unavailable");
    }

    #[tokio::test]
    async fn test_schema_violation_is_unavailable() {
        // recommendations as an object, not an array
        let adapter =
            shell_analyzer(r#"cat > /dev/null; echo '{"analysis":{},"recommendations":{}}'"#);
        let err = adapter.analyze(&serde_json::json!({})).await.unwrap_err();
        assert_eq!(err.kind(), "analyzer_unavailable");
    }

    #[tokio::test]
    async fn test_missing_output_is_unavailable() {
        let adapter = shell_analyzer("cat > /dev/null");
        let err = adapter.analyze(&serde_json::json!({})).await.unwrap_err();
        assert_eq!(err.kind(), "analyzer_unavailable");
    }

    #[tokio::test]
    async fn test_timeout_kills_the_subprocess() {
        let adapter = shell_analyzer("sleep 30").with_timeout(Duration::from_millis(100));
        let started = std::time::Instant::now();
        let err = adapter.analyze(&serde_json::json!({})).await.unwrap_err();
        assert_eq!(err.kind(), "analyzer_unavailable");
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
