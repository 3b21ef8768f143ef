//! Cross-crate integration and E2E tests
//!
//! These tests run whole pipeline scenarios: several stage "processes"
//! executing in order, handing trace context through a shared carrier file,
//! exporting into one collector. Each stage gets its own export pipeline
//! and tracer, exactly as separate OS processes would.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use norn_llm::{
    CompletionRequest, CompletionResponse, LlmBackend, MockBackend, RecordingSleeper, RetryPolicy,
    Usage, call_with_retry,
};
use norn_trace::{
    AttrValue, BatchConfig, CarrierStore, ExportPipeline, FileCarrier, MemoryExporter, Span,
    SpanId, SpanStatus, StagePosition, Tracer, keys,
};

fn batch_config() -> BatchConfig {
    BatchConfig {
        max_batch_size: 1000,
        flush_interval: Duration::from_secs(60),
        shutdown_timeout: Duration::from_secs(1),
    }
}

fn retry_policy() -> RetryPolicy {
    RetryPolicy::default()
        .with_max_attempts(3)
        .with_base(Duration::from_millis(10))
        .with_jitter(Duration::ZERO)
}

/// Run one stage the way a standalone process would: own pipeline, own
/// tracer, shared carrier and collector.
async fn run_stage(
    exporter: Arc<MemoryExporter>,
    carrier: &FileCarrier,
    name: &str,
    position: StagePosition,
    goal: Option<&str>,
    backend: &dyn LlmBackend,
) -> Result<String, norn_llm::LlmError> {
    let (sink, pipeline) = ExportPipeline::spawn(exporter, batch_config());
    let tracer = Tracer::new(sink);
    let sleeper = RecordingSleeper::new();

    let inbound = carrier.load();
    let mut span = tracer.stage_span(position, &inbound, name);
    if let Some(goal) = goal {
        span.set_bounded_attr(keys::PIPELINE_GOAL, goal, 8192);
    }

    let request = CompletionRequest::new("mock-model", format!("{name} step"));
    let outcome = call_with_retry(&span, backend, &request, &retry_policy(), &sleeper, 8192).await;

    carrier.save(&span.context());

    let result = match outcome {
        Ok(response) => {
            if position == StagePosition::Last {
                span.set_bounded_attr(keys::PIPELINE_RESULT, &response.text, 8192);
            }
            span.finish_ok();
            Ok(response.text)
        }
        Err(error) => {
            span.finish_error(error.to_string());
            Err(error)
        }
    };

    pipeline.shutdown().await;
    result
}

/// Walk a span's parent chain to the root, asserting it stays in-trace.
fn chain_to_root<'a>(span: &'a Span, by_id: &'a HashMap<SpanId, &'a Span>) -> Vec<&'a Span> {
    let mut chain = vec![span];
    let mut current = span;
    while let Some(parent_id) = current.parent_id {
        let parent = by_id
            .get(&parent_id)
            .copied()
            .unwrap_or_else(|| panic!("span {} has unresolved parent", current.id));
        assert_eq!(parent.trace_id, current.trace_id);
        chain.push(parent);
        current = parent;
    }
    chain
}

#[tokio::test]
async fn test_three_stage_run_forms_single_tree() {
    let dir = tempfile::tempdir().unwrap();
    let carrier = FileCarrier::new(dir.path().join("carrier.json"));
    let exporter = Arc::new(MemoryExporter::new());

    let stages = [
        ("plan", StagePosition::First, Some("Plan a launch")),
        ("draft", StagePosition::Intermediate, None),
        ("revise", StagePosition::Last, None),
    ];
    for (name, position, goal) in stages {
        let backend = MockBackend::with_text(format!("{name} output"));
        run_stage(exporter.clone(), &carrier, name, position, goal, &backend)
            .await
            .unwrap();
    }

    let spans = exporter.spans();
    let by_id: HashMap<SpanId, &Span> = spans.iter().map(|s| (s.id, s)).collect();

    // Exactly one parentless span across the whole run.
    let roots: Vec<&Span> = spans.iter().filter(|s| s.is_root()).collect();
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0].name, "plan");

    // Every span resolves to that root within one trace id.
    for span in &spans {
        let chain = chain_to_root(span, &by_id);
        assert_eq!(chain.last().unwrap().id, roots[0].id);
        assert_eq!(span.trace_id, roots[0].trace_id);
    }

    // Stage chain is plan -> draft -> revise, depth 3.
    let draft = spans.iter().find(|s| s.name == "draft").unwrap();
    let revise = spans.iter().find(|s| s.name == "revise").unwrap();
    assert_eq!(draft.parent_id, Some(roots[0].id));
    assert_eq!(revise.parent_id, Some(draft.id));

    // Goal on the root, final result on the last stage.
    assert_eq!(
        roots[0].attributes.get(keys::PIPELINE_GOAL),
        Some(&AttrValue::Str("Plan a launch".to_string()))
    );
    assert_eq!(
        revise.attributes.get(keys::PIPELINE_RESULT),
        Some(&AttrValue::Str("revise output".to_string()))
    );

    // All stages succeeded.
    for name in ["plan", "draft", "revise"] {
        let span = spans.iter().find(|s| s.name == name).unwrap();
        assert_eq!(span.status, SpanStatus::Ok);
    }
}

#[tokio::test]
async fn test_five_stage_run_has_one_root() {
    let dir = tempfile::tempdir().unwrap();
    let carrier = FileCarrier::new(dir.path().join("carrier.json"));
    let exporter = Arc::new(MemoryExporter::new());

    for i in 0..5 {
        let position = match i {
            0 => StagePosition::First,
            4 => StagePosition::Last,
            _ => StagePosition::Intermediate,
        };
        let goal = (i == 0).then_some("Ship the report");
        let backend = MockBackend::with_text("ok");
        run_stage(
            exporter.clone(),
            &carrier,
            &format!("stage-{i}"),
            position,
            goal,
            &backend,
        )
        .await
        .unwrap();
    }

    let spans = exporter.spans();
    let by_id: HashMap<SpanId, &Span> = spans.iter().map(|s| (s.id, s)).collect();

    assert_eq!(spans.iter().filter(|s| s.is_root()).count(), 1);
    for span in &spans {
        chain_to_root(span, &by_id);
    }
}

#[tokio::test]
async fn test_retries_are_recorded_inside_the_stage_tree() {
    let dir = tempfile::tempdir().unwrap();
    let carrier = FileCarrier::new(dir.path().join("carrier.json"));
    let exporter = Arc::new(MemoryExporter::new());

    let plan_backend = MockBackend::with_text("the plan");
    run_stage(
        exporter.clone(),
        &carrier,
        "plan",
        StagePosition::First,
        Some("Plan a launch"),
        &plan_backend,
    )
    .await
    .unwrap();

    // Second stage needs two retries before its call lands.
    let flaky = MockBackend::transient_failures_then(
        2,
        CompletionResponse::new("m", "mock-model", "the draft", Usage::new(3, 9)),
    );
    run_stage(
        exporter.clone(),
        &carrier,
        "draft",
        StagePosition::Last,
        None,
        &flaky,
    )
    .await
    .unwrap();

    let spans = exporter.spans();
    let by_id: HashMap<SpanId, &Span> = spans.iter().map(|s| (s.id, s)).collect();
    let draft = spans.iter().find(|s| s.name == "draft").unwrap();

    // Attempts nest under the draft stage's call span, all in one trace.
    let attempts: Vec<&Span> = spans
        .iter()
        .filter(|s| {
            s.name == "llm.attempt" && chain_to_root(s, &by_id).iter().any(|a| a.id == draft.id)
        })
        .collect();
    assert_eq!(attempts.len(), 3);
    assert_eq!(attempts.iter().filter(|s| s.status.is_error()).count(), 2);
    assert_eq!(
        attempts.iter().filter(|s| s.status == SpanStatus::Ok).count(),
        1
    );

    // Still exactly one root for the whole run.
    assert_eq!(spans.iter().filter(|s| s.is_root()).count(), 1);
}

#[tokio::test]
async fn test_lost_carrier_starts_a_recovered_trace() {
    let dir = tempfile::tempdir().unwrap();
    let carrier = FileCarrier::new(dir.path().join("carrier.json"));
    let exporter = Arc::new(MemoryExporter::new());

    let backend = MockBackend::with_text("plan output");
    run_stage(
        exporter.clone(),
        &carrier,
        "plan",
        StagePosition::First,
        Some("Plan a launch"),
        &backend,
    )
    .await
    .unwrap();

    // Simulate a lost carrier between processes.
    std::fs::remove_file(carrier.path()).unwrap();

    let backend = MockBackend::with_text("draft output");
    run_stage(
        exporter.clone(),
        &carrier,
        "draft",
        StagePosition::Intermediate,
        None,
        &backend,
    )
    .await
    .unwrap();

    let spans = exporter.spans();
    let plan = spans.iter().find(|s| s.name == "plan").unwrap();
    let draft = spans.iter().find(|s| s.name == "draft").unwrap();

    // The second stage could not join the first trace; it recovered by
    // starting a new one rather than failing.
    assert_ne!(draft.trace_id, plan.trace_id);
    assert!(draft.is_root());
    assert_eq!(draft.status, SpanStatus::Ok);
}

#[tokio::test]
async fn test_failed_stage_leaves_error_spans_and_handoff() {
    let dir = tempfile::tempdir().unwrap();
    let carrier = FileCarrier::new(dir.path().join("carrier.json"));
    let exporter = Arc::new(MemoryExporter::new());

    let backend = MockBackend::with_text("plan output");
    run_stage(
        exporter.clone(),
        &carrier,
        "plan",
        StagePosition::First,
        Some("Plan a launch"),
        &backend,
    )
    .await
    .unwrap();

    let doomed = MockBackend::always_failing();
    let result = run_stage(
        exporter.clone(),
        &carrier,
        "draft",
        StagePosition::Intermediate,
        None,
        &doomed,
    )
    .await;
    assert!(matches!(
        result,
        Err(norn_llm::LlmError::RetriesExhausted { attempts: 3, .. })
    ));

    let spans = exporter.spans();
    let draft = spans.iter().find(|s| s.name == "draft").unwrap();
    assert!(draft.status.is_error());

    // The handoff still points at the failed stage, and the trace still has
    // exactly one root.
    let handoff = carrier.load();
    assert_eq!(handoff.parent_span_id, Some(draft.id));
    assert_eq!(spans.iter().filter(|s| s.is_root()).count(), 1);
}
