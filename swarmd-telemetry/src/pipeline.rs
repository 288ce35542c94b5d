//! Telemetry pipeline
//!
//! Owns the span queue, the consumer thread, and the sinks. Producers
//! call [`TelemetryPipeline::start_span`] and finish the returned guard;
//! a finished span is enqueued without blocking and drained to the file
//! sink (and OTLP, when configured) by the consumer.
//!
//! Head-based sampling: the decision is taken once at the trace root and
//! carried in the context; unsampled spans are counted and discarded at
//! finish time.

use crate::otlp::OtlpSink;
use crate::queue::SpanQueue;
use crate::sink::FileSink;
use crate::span::{now_ns, Resource, SpanRecord, SpanStatus};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use swarmd_core::{CoordConfig, CoordResult, IdGenerator, TraceContext};

const DRAIN_BATCH: usize = 512;
const DRAIN_WAIT: Duration = Duration::from_millis(250);

struct Shared {
    queue: SpanQueue,
    shutdown: AtomicBool,
    /// Spans fully handed to the sinks. `pushed - dropped - written` is
    /// the number still in flight; flush waits for it to reach zero.
    written: AtomicU64,
}

pub struct TelemetryPipeline {
    shared: Arc<Shared>,
    ids: IdGenerator,
    sampling_ratio: f64,
    resource: Resource,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TelemetryPipeline {
    /// Start the pipeline: file sink under the coordination directory,
    /// OTLP sink when an endpoint is configured.
    pub fn start(config: &CoordConfig) -> CoordResult<Arc<Self>> {
        let shared = Arc::new(Shared {
            queue: SpanQueue::new(config.span_queue_capacity),
            shutdown: AtomicBool::new(false),
            written: AtomicU64::new(0),
        });
        let file_sink = FileSink::new(&config.coord_dir);
        let otlp_endpoint = config.otlp_endpoint.clone();

        let worker_shared = shared.clone();
        let worker = std::thread::Builder::new()
            .name("swarmd-telemetry".into())
            .spawn(move || {
                // the blocking HTTP client must be built off the async
                // runtime, so the consumer thread owns the OTLP sink
                let otlp_sink = otlp_endpoint.and_then(|endpoint| match OtlpSink::new(&endpoint) {
                    Ok(sink) => Some(sink),
                    Err(e) => {
                        tracing::error!(error = %e, "otlp sink unavailable; file sink only");
                        None
                    }
                });
                drain_loop(worker_shared, file_sink, otlp_sink)
            })?;

        Ok(Arc::new(Self {
            shared,
            ids: config.id_generator(),
            sampling_ratio: config.sampling_ratio,
            resource: Resource::default(),
            worker: Mutex::new(Some(worker)),
        }))
    }

    /// Mint a root context with the head sampling decision applied.
    pub fn root_context(&self) -> TraceContext {
        let sampled = self.sampling_ratio >= 1.0
            || (self.sampling_ratio > 0.0 && rand::thread_rng().gen::<f64>() < self.sampling_ratio);
        TraceContext::root(&self.ids, sampled)
    }

    /// Derive a child context from `parent`.
    pub fn child_context(&self, parent: &TraceContext) -> TraceContext {
        parent.child(&self.ids)
    }

    /// Open a span for `operation` in the given context. The span's ids
    /// are the context's own; finish the guard to emit.
    pub fn start_span(self: &Arc<Self>, operation: impl Into<String>, ctx: &TraceContext) -> SpanGuard {
        SpanGuard {
            pipeline: self.clone(),
            ctx: ctx.clone(),
            operation_name: operation.into(),
            start_ns: now_ns(),
            attributes: BTreeMap::new(),
            finished: false,
        }
    }

    /// Spans discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.shared.queue.dropped()
    }

    fn emit(&self, record: SpanRecord) {
        self.shared.queue.push(record);
    }

    /// Wait until every queued span has reached the sinks, up to
    /// `timeout`. Returns false if the deadline passed first.
    pub fn flush(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let target = self
                .shared
                .queue
                .pushed()
                .saturating_sub(self.shared.queue.dropped());
            if self.shared.written.load(Ordering::Acquire) >= target {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            self.shared.queue.wake_consumer();
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    /// Flush, stop the consumer, and join it.
    pub fn shutdown(&self, timeout: Duration) {
        self.flush(timeout);
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.queue.wake_consumer();
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

fn drain_loop(shared: Arc<Shared>, file_sink: FileSink, otlp_sink: Option<OtlpSink>) {
    loop {
        let batch = shared.queue.pop_batch(DRAIN_BATCH, DRAIN_WAIT);
        if !batch.is_empty() {
            if let Err(e) = file_sink.write_batch(&batch) {
                tracing::error!(error = %e, "span file sink write failed");
            }
            if let Some(otlp) = &otlp_sink {
                otlp.export(&batch);
            }
            shared.written.fetch_add(batch.len() as u64, Ordering::Release);
        } else if shared.shutdown.load(Ordering::Acquire) {
            break;
        }
    }
}

/// An open span. Set attributes while the operation runs, then call
/// [`SpanGuard::finish`]. Dropping an unfinished guard emits it with
/// error status so a panicking operation still leaves a trace.
pub struct SpanGuard {
    pipeline: Arc<TelemetryPipeline>,
    ctx: TraceContext,
    operation_name: String,
    start_ns: u64,
    attributes: BTreeMap<String, serde_json::Value>,
    finished: bool,
}

impl SpanGuard {
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// The context this span runs in (its span id is this span's id).
    pub fn context(&self) -> &TraceContext {
        &self.ctx
    }

    /// Derive a context for child operations of this span.
    pub fn child_context(&self) -> TraceContext {
        self.ctx.child(&self.pipeline.ids)
    }

    pub fn finish(mut self, status: SpanStatus) {
        self.finish_inner(status);
    }

    pub fn finish_ok(self) {
        self.finish(SpanStatus::Ok);
    }

    pub fn finish_error(mut self, error: &swarmd_core::CoordError) {
        self.set_attribute("error.kind", error.kind());
        self.set_attribute("error.message", error.to_string());
        self.finish(SpanStatus::Error);
    }

    fn finish_inner(&mut self, status: SpanStatus) {
        if self.finished {
            return;
        }
        self.finished = true;
        if !self.ctx.sampled {
            return;
        }
        self.pipeline.emit(SpanRecord {
            trace_id: self.ctx.trace_id.clone(),
            span_id: self.ctx.span_id.clone(),
            parent_span_id: self.ctx.parent_span_id.clone(),
            operation_name: std::mem::take(&mut self.operation_name),
            start_ns: self.start_ns,
            end_ns: now_ns(),
            status,
            attributes: std::mem::take(&mut self.attributes),
            resource: self.pipeline.resource.clone(),
        });
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.finish_inner(SpanStatus::Error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &std::path::Path) -> CoordConfig {
        CoordConfig {
            coord_dir: dir.to_path_buf(),
            ..CoordConfig::default()
        }
    }

    fn read_spans(dir: &std::path::Path) -> Vec<SpanRecord> {
        let content = std::fs::read_to_string(dir.join("telemetry_spans.jsonl")).unwrap_or_default();
        content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_span_reaches_file_sink() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = TelemetryPipeline::start(&test_config(dir.path())).unwrap();
        let ctx = pipeline.root_context();
        let mut span = pipeline.start_span("coordinator.claim", &ctx);
        span.set_attribute("work_item_id", "work_1");
        span.finish_ok();
        assert!(pipeline.flush(Duration::from_secs(5)));

        let spans = read_spans(dir.path());
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].operation_name, "coordinator.claim");
        assert_eq!(spans[0].trace_id, ctx.trace_id);
        assert_eq!(spans[0].status, SpanStatus::Ok);
        pipeline.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_child_span_nests_within_parent() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = TelemetryPipeline::start(&test_config(dir.path())).unwrap();
        let root_ctx = pipeline.root_context();
        let parent = pipeline.start_span("reactor.run", &root_ctx);
        let child_ctx = parent.child_context();
        let child = pipeline.start_span("reactor.step", &child_ctx);
        child.finish_ok();
        parent.finish_ok();
        assert!(pipeline.flush(Duration::from_secs(5)));

        let spans = read_spans(dir.path());
        assert_eq!(spans.len(), 2);
        let parent_span = spans.iter().find(|s| s.operation_name == "reactor.run").unwrap();
        let child_span = spans.iter().find(|s| s.operation_name == "reactor.step").unwrap();
        assert_eq!(child_span.parent_span_id.as_deref(), Some(parent_span.span_id.as_str()));
        assert_eq!(child_span.trace_id, parent_span.trace_id);
        // parent encloses the child
        assert!(child_span.start_ns >= parent_span.start_ns);
        assert!(child_span.end_ns <= parent_span.end_ns);
        pipeline.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_unsampled_trace_emits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.sampling_ratio = 0.0;
        let pipeline = TelemetryPipeline::start(&config).unwrap();
        let ctx = pipeline.root_context();
        assert!(!ctx.sampled);
        pipeline.start_span("coordinator.claim", &ctx).finish_ok();
        pipeline.flush(Duration::from_secs(1));
        assert!(read_spans(dir.path()).is_empty());
        pipeline.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_dropped_guard_records_error_span() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = TelemetryPipeline::start(&test_config(dir.path())).unwrap();
        let ctx = pipeline.root_context();
        drop(pipeline.start_span("reactor.step", &ctx));
        assert!(pipeline.flush(Duration::from_secs(5)));
        let spans = read_spans(dir.path());
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].status, SpanStatus::Error);
        pipeline.shutdown(Duration::from_secs(1));
    }
}
