//! Reactor engine behavior: scheduling, retries, compensation,
//! cancellation, middleware ordering.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use swarmd_core::{CoordConfig, CoordError};
use swarmd_reactor::{
    CancelToken, HookDecision, Reactor, ReactorContext, ReactorInfo, ReactorMiddleware, StepDef,
    StepInfo, StepValue,
};
use swarmd_telemetry::{SpanRecord, SpanStatus, TelemetryPipeline};

fn pipeline(dir: &std::path::Path) -> Arc<TelemetryPipeline> {
    let config = CoordConfig {
        coord_dir: dir.to_path_buf(),
        ..CoordConfig::default()
    };
    TelemetryPipeline::start(&config).unwrap()
}

fn read_spans(dir: &std::path::Path, pipeline: &TelemetryPipeline) -> Vec<SpanRecord> {
    assert!(pipeline.flush(Duration::from_secs(5)));
    std::fs::read_to_string(dir.join("telemetry_spans.jsonl"))
        .unwrap_or_default()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

fn ok_step(name: &str, value: i64) -> StepDef {
    StepDef::new(name, move |_args, _ctx| async move { Ok(serde_json::json!(value)) })
}

#[tokio::test]
async fn linear_chain_runs_in_order_and_collects_results() {
    let dir = tempfile::tempdir().unwrap();
    let telemetry = pipeline(dir.path());
    let reactor = Reactor::builder("demo")
        .add_step(ok_step("a", 1))
        .add_step(ok_step("b", 2).with_result("a"))
        .add_step(ok_step("c", 3).with_result("b"))
        .build(telemetry.clone())
        .unwrap();

    let results = reactor
        .run(BTreeMap::new(), None, CancelToken::new())
        .await
        .unwrap();
    assert_eq!(results["a"], 1);
    assert_eq!(results["b"], 2);
    assert_eq!(results["c"], 3);

    let spans = read_spans(dir.path(), &telemetry);
    let a = spans.iter().find(|s| s.operation_name == "reactor.step.a").unwrap();
    let b = spans.iter().find(|s| s.operation_name == "reactor.step.b").unwrap();
    assert!(a.end_ns <= b.start_ns, "a must finish before b starts");
    let run = spans.iter().find(|s| s.operation_name == "reactor.run").unwrap();
    assert_eq!(run.status, SpanStatus::Ok);
    // step spans nest inside the run span's trace
    assert_eq!(a.trace_id, run.trace_id);
}

#[tokio::test]
async fn steps_see_inputs_and_dependency_results() {
    let dir = tempfile::tempdir().unwrap();
    let telemetry = pipeline(dir.path());
    let reactor = Reactor::builder("compute")
        .add_step(StepDef::new("double", |args, _ctx| async move {
            let n = args.get("n").and_then(|v| v.as_i64()).unwrap_or(0);
            Ok(serde_json::json!(n * 2))
        })
        .with_input("n"))
        .add_step(StepDef::new("add_one", |args, _ctx| async move {
            let doubled = args.get("double").and_then(|v| v.as_i64()).unwrap_or(0);
            Ok(serde_json::json!(doubled + 1))
        })
        .with_result("double"))
        .build(telemetry)
        .unwrap();

    let inputs = BTreeMap::from([("n".to_string(), serde_json::json!(21))]);
    let results = reactor.run(inputs, None, CancelToken::new()).await.unwrap();
    assert_eq!(results["double"], 42);
    assert_eq!(results["add_one"], 43);
}

#[tokio::test]
async fn missing_input_fails_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let telemetry = pipeline(dir.path());
    let reactor = Reactor::builder("needs_input")
        .add_step(ok_step("a", 1).with_input("snapshot"))
        .build(telemetry)
        .unwrap();
    let err = reactor
        .run(BTreeMap::new(), None, CancelToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invariant_violation");
}

#[tokio::test]
async fn middle_step_failure_compensates_completed_steps_once() {
    let dir = tempfile::tempdir().unwrap();
    let telemetry = pipeline(dir.path());
    let undo_calls = Arc::new(AtomicUsize::new(0));
    let compensate_calls = Arc::new(AtomicUsize::new(0));

    let undo_counter = undo_calls.clone();
    let comp_counter = compensate_calls.clone();
    let reactor = Reactor::builder("saga")
        .add_step(
            ok_step("a", 1).with_undo(move |value, _args, _ctx| {
                let counter = undo_counter.clone();
                async move {
                    assert_eq!(value, serde_json::json!(1));
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        )
        .add_step(
            StepDef::new("b", |_args, _ctx| async {
                Err(CoordError::InvariantViolation("b exploded".into()))
            })
            .with_result("a")
            .with_compensate(move |reason, _args, _ctx| {
                let counter = comp_counter.clone();
                async move {
                    assert!(reason.contains("b exploded"));
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        )
        .add_step(ok_step("c", 3).with_result("b"))
        .build(telemetry.clone())
        .unwrap();

    let err = reactor
        .run(BTreeMap::new(), None, CancelToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invariant_violation");
    assert_eq!(undo_calls.load(Ordering::SeqCst), 1, "a.undo runs exactly once");
    assert_eq!(compensate_calls.load(Ordering::SeqCst), 1);

    let spans = read_spans(dir.path(), &telemetry);
    let a = spans.iter().find(|s| s.operation_name == "reactor.step.a").unwrap();
    let b = spans.iter().find(|s| s.operation_name == "reactor.step.b").unwrap();
    assert_eq!(a.status, SpanStatus::Ok);
    assert_eq!(b.status, SpanStatus::Error);
    assert!(a.end_ns <= b.start_ns);
    let undo = spans
        .iter()
        .find(|s| s.operation_name == "reactor.undo.a")
        .expect("undo span recorded");
    assert_eq!(undo.status, SpanStatus::Ok);
    // c never ran
    assert!(!spans.iter().any(|s| s.operation_name == "reactor.step.c"));
}

#[tokio::test]
async fn failing_undo_does_not_stop_other_undos() {
    let dir = tempfile::tempdir().unwrap();
    let telemetry = pipeline(dir.path());
    let second_undo = Arc::new(AtomicUsize::new(0));

    let counter = second_undo.clone();
    let reactor = Reactor::builder("saga")
        .add_step(ok_step("first", 1).with_undo(move |_v, _a, _c| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }))
        .add_step(
            ok_step("second", 2)
                .with_result("first")
                .with_undo(|_v, _a, _c| async {
                    Err(CoordError::Io(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        "undo backend down",
                    )))
                }),
        )
        .add_step(
            StepDef::new("third", |_args, _ctx| async {
                Err(CoordError::InvariantViolation("third failed".into()))
            })
            .with_result("second"),
        )
        .build(telemetry.clone())
        .unwrap();

    reactor
        .run(BTreeMap::new(), None, CancelToken::new())
        .await
        .unwrap_err();
    // second's undo failed but first's still ran
    assert_eq!(second_undo.load(Ordering::SeqCst), 1);

    let spans = read_spans(dir.path(), &telemetry);
    let failed_undo = spans
        .iter()
        .find(|s| s.operation_name == "reactor.undo.second")
        .unwrap();
    assert_eq!(failed_undo.status, SpanStatus::Error);
}

#[tokio::test]
async fn retries_are_distinct_spans_then_succeed() {
    let dir = tempfile::tempdir().unwrap();
    let telemetry = pipeline(dir.path());
    let attempts = Arc::new(AtomicUsize::new(0));

    let counter = attempts.clone();
    let reactor = Reactor::builder("flaky")
        .add_step(
            StepDef::new("wobble", move |_args, _ctx| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(CoordError::Io(std::io::Error::new(
                            std::io::ErrorKind::ConnectionReset,
                            "transient",
                        )))
                    } else {
                        Ok(serde_json::json!("ok"))
                    }
                }
            })
            .with_max_retries(3),
        )
        .build(telemetry.clone())
        .unwrap();

    let results = reactor
        .run(BTreeMap::new(), None, CancelToken::new())
        .await
        .unwrap();
    assert_eq!(results["wobble"], "ok");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    let spans = read_spans(dir.path(), &telemetry);
    let step_spans: Vec<_> = spans
        .iter()
        .filter(|s| s.operation_name == "reactor.step.wobble")
        .collect();
    assert_eq!(step_spans.len(), 3, "each attempt is its own span");
    assert_eq!(step_spans.iter().filter(|s| s.status == SpanStatus::Error).count(), 2);
    assert_eq!(step_spans.iter().filter(|s| s.status == SpanStatus::Ok).count(), 1);
}

#[tokio::test]
async fn retry_budget_exhaustion_surfaces_the_error() {
    let dir = tempfile::tempdir().unwrap();
    let telemetry = pipeline(dir.path());
    let reactor = Reactor::builder("doomed")
        .add_step(
            StepDef::new("always_fails", |_args, _ctx| async {
                Err(CoordError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "hard down",
                )))
            })
            .with_max_retries(1),
        )
        .build(telemetry)
        .unwrap();
    let err = reactor
        .run(BTreeMap::new(), None, CancelToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "io");
}

#[tokio::test]
async fn detached_steps_run_concurrently() {
    let dir = tempfile::tempdir().unwrap();
    let telemetry = pipeline(dir.path());
    let live = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut builder = Reactor::builder("fanout").parallelism(4);
    for i in 0..4 {
        let live = live.clone();
        let peak = peak.clone();
        builder = builder.add_step(
            StepDef::new(format!("worker_{}", i), move |_args, _ctx| {
                let live = live.clone();
                let peak = peak.clone();
                async move {
                    let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    live.fetch_sub(1, Ordering::SeqCst);
                    Ok(StepValue::Null)
                }
            })
            .detached(),
        );
    }
    builder
        .build(telemetry)
        .unwrap()
        .run(BTreeMap::new(), None, CancelToken::new())
        .await
        .unwrap();
    assert!(
        peak.load(Ordering::SeqCst) >= 2,
        "detached steps should overlap, peak was {}",
        peak.load(Ordering::SeqCst)
    );
}

#[tokio::test]
async fn cancellation_transitions_to_compensation() {
    let dir = tempfile::tempdir().unwrap();
    let telemetry = pipeline(dir.path());
    let undo_calls = Arc::new(AtomicUsize::new(0));
    let cancel = CancelToken::new();

    let counter = undo_calls.clone();
    let trigger = cancel.clone();
    let reactor = Reactor::builder("cancellable")
        .add_step(ok_step("setup", 1).with_undo(move |_v, _a, _c| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }))
        .add_step(
            StepDef::new("slow", move |_args, _ctx| {
                let trigger = trigger.clone();
                async move {
                    trigger.cancel();
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(StepValue::Null)
                }
            })
            .with_result("setup"),
        )
        .build(telemetry)
        .unwrap();

    let err = reactor
        .run(BTreeMap::new(), None, cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "cancelled");
    assert_eq!(undo_calls.load(Ordering::SeqCst), 1);
}

struct OrderProbe {
    label: &'static str,
    order: Arc<std::sync::Mutex<Vec<String>>>,
}

#[async_trait::async_trait]
impl ReactorMiddleware for OrderProbe {
    async fn before_reactor(&self, _reactor: &ReactorInfo, _ctx: &ReactorContext) -> HookDecision {
        self.order.lock().unwrap().push(format!("in:{}", self.label));
        HookDecision::Continue
    }

    async fn after_reactor(
        &self,
        _result: &Result<BTreeMap<String, StepValue>, CoordError>,
        _ctx: &ReactorContext,
    ) -> HookDecision {
        self.order.lock().unwrap().push(format!("out:{}", self.label));
        HookDecision::Continue
    }
}

#[tokio::test]
async fn middleware_runs_outermost_in_innermost_out() {
    let dir = tempfile::tempdir().unwrap();
    let telemetry = pipeline(dir.path());
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    let reactor = Reactor::builder("layered")
        .add_middleware(Arc::new(OrderProbe { label: "outer", order: order.clone() }))
        .add_middleware(Arc::new(OrderProbe { label: "inner", order: order.clone() }))
        .add_step(ok_step("only", 1))
        .build(telemetry)
        .unwrap();

    reactor
        .run(BTreeMap::new(), None, CancelToken::new())
        .await
        .unwrap();
    let seen = order.lock().unwrap().clone();
    assert_eq!(seen, vec!["in:outer", "in:inner", "out:inner", "out:outer"]);
}

#[tokio::test]
async fn builder_rejects_bad_dags() {
    let dir = tempfile::tempdir().unwrap();
    let telemetry = pipeline(dir.path());

    let duplicate = Reactor::builder("dup")
        .add_step(ok_step("a", 1))
        .add_step(ok_step("a", 2))
        .build(telemetry.clone());
    assert!(duplicate.is_err());

    let unknown = Reactor::builder("unknown")
        .add_step(ok_step("a", 1).with_result("ghost"))
        .build(telemetry.clone());
    assert!(unknown.is_err());

    let cycle = Reactor::builder("cycle")
        .add_step(ok_step("a", 1).with_result("b"))
        .add_step(ok_step("b", 2).with_result("a"))
        .build(telemetry);
    assert!(cycle.is_err());
}
