//! Retry-instrumented call wrapper.
//!
//! Wraps one fallible backend call in a bounded retry loop and records the
//! whole loop as spans: one enclosing span for the call, one child span per
//! attempt. Errors are recorded as span events before they are returned;
//! the wrapper never swallows a business-level failure.

use norn_trace::{ActiveSpan, SpanKind, keys};

use crate::backend::LlmBackend;
use crate::error::{LlmError, Result};
use crate::retry::{RetryPolicy, Sleeper};
use crate::types::{CompletionRequest, CompletionResponse};

/// Execute `request` against `backend` with bounded retries, recording one
/// attempt span per try under an enclosing call span.
///
/// Attempt `i` sleeps `policy.delay(i)` before the next try. Transient
/// failures are retried until the attempt budget runs out, at which point
/// [`LlmError::RetriesExhausted`] carries the final failure. Non-retryable
/// errors are recorded and returned immediately. `response_limit` bounds
/// the response text recorded on the successful attempt's span.
pub async fn call_with_retry(
    parent: &ActiveSpan,
    backend: &dyn LlmBackend,
    request: &CompletionRequest,
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    response_limit: usize,
) -> Result<CompletionResponse> {
    let mut call_span = parent.child("llm.call", SpanKind::Llm);
    call_span.set_attr(keys::LLM_PROVIDER, backend.provider());
    call_span.set_attr(keys::LLM_MODEL, request.model.as_str());

    let attempts = policy.max_attempts.max(1);
    let mut last_error: Option<LlmError> = None;

    for attempt in 0..attempts {
        let mut attempt_span = call_span.child("llm.attempt", SpanKind::Llm);
        attempt_span.set_attr(keys::LLM_PROVIDER, backend.provider());
        attempt_span.set_attr(keys::LLM_MODEL, request.model.as_str());
        attempt_span.set_attr(keys::LLM_TEMPERATURE, request.temperature);
        attempt_span.set_attr(keys::RETRY_ATTEMPT, i64::from(attempt));

        match backend.complete(request).await {
            Ok(response) => {
                attempt_span.set_attr(keys::LLM_INPUT_TOKENS, response.usage.input_tokens);
                attempt_span.set_attr(keys::LLM_OUTPUT_TOKENS, response.usage.output_tokens);
                attempt_span.set_bounded_attr(keys::LLM_RESPONSE, &response.text, response_limit);
                attempt_span.finish_ok();
                call_span.finish_ok();
                return Ok(response);
            }
            Err(error) => {
                attempt_span.record_error_event(error.kind(), &error.to_string());
                attempt_span.set_attr(keys::ERROR_KIND, error.kind());
                attempt_span.finish_error(error.to_string());

                if !error.is_retryable() {
                    call_span.finish_error(error.to_string());
                    return Err(error);
                }

                tracing::warn!(
                    provider = backend.provider(),
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    error = %error,
                    "Call failed, retrying"
                );
                last_error = Some(error);

                if attempt + 1 < attempts {
                    sleeper.sleep(policy.delay(attempt)).await;
                }
            }
        }
    }

    let last = match last_error {
        Some(error) => error,
        // Unreachable with attempts >= 1; report something sane anyway.
        None => LlmError::Transient("no attempts were executed".to_string()),
    };

    let exhausted = LlmError::RetriesExhausted {
        attempts,
        last: Box::new(last),
    };
    call_span.finish_error(exhausted.to_string());
    Err(exhausted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::retry::RecordingSleeper;
    use crate::types::Usage;
    use norn_trace::{
        AttrValue, BatchConfig, ExportPipeline, MemoryExporter, Span, SpanStatus, StagePosition,
        TraceContext, Tracer,
    };
    use std::sync::Arc;
    use std::time::Duration;

    struct Harness {
        exporter: Arc<MemoryExporter>,
        pipeline: ExportPipeline,
        tracer: Tracer,
    }

    fn harness() -> Harness {
        let exporter = Arc::new(MemoryExporter::new());
        let config = BatchConfig {
            max_batch_size: 1000,
            flush_interval: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(1),
        };
        let (sink, pipeline) = ExportPipeline::spawn(exporter.clone(), config);
        Harness {
            exporter,
            pipeline,
            tracer: Tracer::new(sink),
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(3)
            .with_base(Duration::from_millis(100))
            .with_jitter(Duration::ZERO)
    }

    fn attempt_spans(spans: &[Span]) -> Vec<&Span> {
        let mut attempts: Vec<&Span> = spans.iter().filter(|s| s.name == "llm.attempt").collect();
        attempts.sort_by_key(|s| match s.attributes.get(keys::RETRY_ATTEMPT) {
            Some(AttrValue::Int(i)) => *i,
            _ => i64::MAX,
        });
        attempts
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let h = harness();
        let backend = MockBackend::with_text("A plan.");
        let sleeper = RecordingSleeper::new();

        let stage = h
            .tracer
            .stage_span(StagePosition::First, &TraceContext::fresh(), "plan");
        let request = CompletionRequest::new("mock-model", "Plan a launch");

        let response =
            call_with_retry(&stage, &backend, &request, &policy(), &sleeper, 8192)
                .await
                .unwrap();
        assert_eq!(response.text, "A plan.");

        stage.finish_ok();
        h.pipeline.shutdown().await;

        let spans = h.exporter.spans();
        let attempts = attempt_spans(&spans);
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].status, SpanStatus::Ok);
        assert_eq!(
            attempts[0].attributes.get(keys::LLM_INPUT_TOKENS),
            Some(&AttrValue::Int(10))
        );

        let call = spans.iter().find(|s| s.name == "llm.call").unwrap();
        assert_eq!(call.status, SpanStatus::Ok);
        assert!(sleeper.recorded().is_empty());
    }

    #[tokio::test]
    async fn test_two_failures_then_success() {
        let h = harness();
        let backend = MockBackend::transient_failures_then(
            2,
            CompletionResponse::new("m", "mock-model", "recovered", Usage::new(5, 7)),
        );
        let sleeper = RecordingSleeper::new();

        let stage = h
            .tracer
            .stage_span(StagePosition::First, &TraceContext::fresh(), "plan");
        let request = CompletionRequest::new("mock-model", "Plan a launch");

        let response =
            call_with_retry(&stage, &backend, &request, &policy(), &sleeper, 8192)
                .await
                .unwrap();
        assert_eq!(response.text, "recovered");

        stage.finish_ok();
        h.pipeline.shutdown().await;

        let spans = h.exporter.spans();
        let attempts = attempt_spans(&spans);
        // k failures then success: exactly k+1 attempt spans.
        assert_eq!(attempts.len(), 3);
        assert!(attempts[0].status.is_error());
        assert!(attempts[1].status.is_error());
        assert_eq!(attempts[2].status, SpanStatus::Ok);

        let call = spans.iter().find(|s| s.name == "llm.call").unwrap();
        assert_eq!(call.status, SpanStatus::Ok);

        // One backoff per failed attempt with budget remaining.
        let p = policy();
        assert_eq!(sleeper.recorded(), vec![p.delay(0), p.delay(1)]);
    }

    #[tokio::test]
    async fn test_all_attempts_fail() {
        let h = harness();
        let backend = MockBackend::always_failing();
        let sleeper = RecordingSleeper::new();

        let stage = h
            .tracer
            .stage_span(StagePosition::First, &TraceContext::fresh(), "plan");
        let request = CompletionRequest::new("mock-model", "Plan a launch");

        let err = call_with_retry(&stage, &backend, &request, &policy(), &sleeper, 8192)
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::RetriesExhausted { attempts: 3, .. }));

        stage.finish_error("stage failed");
        h.pipeline.shutdown().await;

        let spans = h.exporter.spans();
        let attempts = attempt_spans(&spans);
        assert_eq!(attempts.len(), 3);
        assert!(attempts.iter().all(|s| s.status.is_error()));
        assert!(
            attempts
                .iter()
                .all(|s| s.attributes.get(keys::ERROR_KIND)
                    == Some(&AttrValue::Str("transient".to_string())))
        );

        let call = spans.iter().find(|s| s.name == "llm.call").unwrap();
        assert!(call.status.is_error());

        // No sleep after the final attempt.
        assert_eq!(sleeper.recorded().len(), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_error_returns_immediately() {
        let h = harness();
        let backend = MockBackend::new(vec![Err(LlmError::Rejected(
            "model not found".to_string(),
        ))]);
        let sleeper = RecordingSleeper::new();

        let stage = h
            .tracer
            .stage_span(StagePosition::First, &TraceContext::fresh(), "plan");
        let request = CompletionRequest::new("missing-model", "Plan a launch");

        let err = call_with_retry(&stage, &backend, &request, &policy(), &sleeper, 8192)
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Rejected(_)));
        assert_eq!(backend.request_count(), 1);

        stage.finish_error("stage failed");
        h.pipeline.shutdown().await;

        let spans = h.exporter.spans();
        let attempts = attempt_spans(&spans);
        assert_eq!(attempts.len(), 1);
        assert!(attempts[0].status.is_error());
        assert_eq!(attempts[0].events.len(), 1);
        assert_eq!(attempts[0].events[0].name, "exception");
        assert!(sleeper.recorded().is_empty());
    }

    #[tokio::test]
    async fn test_attempt_spans_nest_under_call_span() {
        let h = harness();
        let backend = MockBackend::with_text("ok");
        let sleeper = RecordingSleeper::new();

        let stage = h
            .tracer
            .stage_span(StagePosition::First, &TraceContext::fresh(), "plan");
        let request = CompletionRequest::new("mock-model", "hello");

        call_with_retry(&stage, &backend, &request, &policy(), &sleeper, 8192)
            .await
            .unwrap();

        let stage_id = stage.id();
        stage.finish_ok();
        h.pipeline.shutdown().await;

        let spans = h.exporter.spans();
        let call = spans.iter().find(|s| s.name == "llm.call").unwrap();
        let attempt = spans.iter().find(|s| s.name == "llm.attempt").unwrap();

        assert_eq!(call.parent_id, Some(stage_id));
        assert_eq!(attempt.parent_id, Some(call.id));
        assert!(spans.iter().all(|s| s.trace_id == call.trace_id));
    }

    #[tokio::test]
    async fn test_long_response_is_bounded_on_span() {
        let h = harness();
        let long_text = "y".repeat(9000);
        let backend = MockBackend::new(vec![Ok(CompletionResponse::new(
            "m",
            "mock-model",
            long_text,
            Usage::new(1, 9000),
        ))]);
        let sleeper = RecordingSleeper::new();

        let stage = h
            .tracer
            .stage_span(StagePosition::First, &TraceContext::fresh(), "plan");
        let request = CompletionRequest::new("mock-model", "hello");

        call_with_retry(&stage, &backend, &request, &policy(), &sleeper, 8192)
            .await
            .unwrap();
        stage.finish_ok();
        h.pipeline.shutdown().await;

        let spans = h.exporter.spans();
        let attempt = spans.iter().find(|s| s.name == "llm.attempt").unwrap();

        match attempt.attributes.get(keys::LLM_RESPONSE) {
            Some(AttrValue::Str(stored)) => assert!(stored.chars().count() <= 8192),
            other => panic!("unexpected response attribute: {other:?}"),
        }
        assert_eq!(
            attempt.attributes.get("llm.response.truncated"),
            Some(&AttrValue::Bool(true))
        );
        assert_eq!(
            attempt.attributes.get("llm.response.original_length"),
            Some(&AttrValue::Int(9000))
        );
    }
}
