//! Stage span hierarchy.
//!
//! The tracer decides span name, kind, and required attributes from a
//! stage's declared position in the pipeline. Position is explicit
//! configuration, never inferred from runtime state, which keeps the
//! single-root invariant deterministic: only a `First` stage mints a trace,
//! every other stage attaches under the inbound carrier context.
//!
//! There is no process-global tracer. Each stage invocation constructs its
//! own [`Tracer`] over a [`SpanSink`] and threads it through calls.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::bound::bound;
use crate::export::SpanSink;
use crate::keys;
use crate::types::{Event, Span, SpanId, SpanKind, SpanStatus, TraceContext, TraceId};

/// A stage's declared position in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StagePosition {
    /// Opens the run: mints the trace and the root span.
    First,
    /// Runs under the inbound carrier context.
    Intermediate,
    /// Runs under the inbound carrier context and carries the final result.
    Last,
}

impl fmt::Display for StagePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StagePosition::First => "first",
            StagePosition::Intermediate => "intermediate",
            StagePosition::Last => "last",
        };
        write!(f, "{s}")
    }
}

impl FromStr for StagePosition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "first" => Ok(StagePosition::First),
            "intermediate" => Ok(StagePosition::Intermediate),
            "last" => Ok(StagePosition::Last),
            other => Err(format!(
                "unknown stage position '{other}', expected first, intermediate, or last"
            )),
        }
    }
}

/// Per-stage span factory. Cheap to construct; holds only the sink handle.
#[derive(Debug, Clone)]
pub struct Tracer {
    sink: SpanSink,
}

impl Tracer {
    /// Create a tracer feeding the given export sink.
    pub fn new(sink: SpanSink) -> Self {
        Self { sink }
    }

    /// Open the span for a pipeline stage.
    ///
    /// A `First` stage ignores the inbound context and starts a new trace
    /// as the root, agent-level span. Other positions attach as chain-level
    /// children of the carrier context. If a non-first stage receives a
    /// fresh context (lost carrier), its span starts a recovered trace.
    pub fn stage_span(
        &self,
        position: StagePosition,
        inbound: &TraceContext,
        stage_name: &str,
    ) -> ActiveSpan {
        let (trace_id, parent_id, kind) = match position {
            StagePosition::First => (TraceId::generate(), None, SpanKind::Agent),
            StagePosition::Intermediate | StagePosition::Last => {
                (inbound.trace_id, inbound.parent_span_id, SpanKind::Chain)
            }
        };

        let mut span = Span::new(trace_id, parent_id, stage_name, kind);
        span.set_attr(keys::SPAN_ROLE, kind.as_str());
        span.set_attr(keys::PIPELINE_STAGE, stage_name);

        ActiveSpan::new(span, self.sink.clone())
    }
}

/// A span that is open in this process.
///
/// The span is owned exclusively by its `ActiveSpan` until one of the
/// `finish_*` methods hands it to the export pipeline. Dropping an
/// unfinished `ActiveSpan` closes it with whatever status was last
/// recorded; an externally terminated stage therefore never reports a
/// forced "ok".
#[derive(Debug)]
pub struct ActiveSpan {
    trace_id: TraceId,
    id: SpanId,
    span: Option<Span>,
    sink: SpanSink,
}

impl ActiveSpan {
    fn new(span: Span, sink: SpanSink) -> Self {
        Self {
            trace_id: span.trace_id,
            id: span.id,
            span: Some(span),
            sink,
        }
    }

    /// This span's id.
    pub fn id(&self) -> SpanId {
        self.id
    }

    /// The trace this span belongs to.
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// Open a child span under this one.
    pub fn child(&self, name: impl Into<String>, kind: SpanKind) -> ActiveSpan {
        let mut span = Span::new(self.trace_id, Some(self.id), name, kind);
        span.set_attr(keys::SPAN_ROLE, kind.as_str());
        ActiveSpan::new(span, self.sink.clone())
    }

    /// The context a successor stage should attach under.
    pub fn context(&self) -> TraceContext {
        TraceContext {
            trace_id: self.trace_id,
            parent_span_id: Some(self.id),
            sampled: true,
        }
    }

    /// Set an attribute on the open span.
    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<crate::types::AttrValue>) {
        if let Some(span) = self.span.as_mut() {
            span.set_attr(key, value);
        }
    }

    /// Set a text attribute through the payload bound, adding
    /// `<key>.truncated` and `<key>.original_length` companions when cut.
    pub fn set_bounded_attr(&mut self, key: &str, text: &str, limit: usize) {
        let Some(span) = self.span.as_mut() else {
            return;
        };

        let bounded = bound(text, limit);
        span.set_attr(key, bounded.text);
        if bounded.truncated {
            span.set_attr(keys::truncated_key(key), true);
            span.set_attr(keys::original_length_key(key), bounded.original_length as i64);
        }
    }

    /// Append an event to the open span.
    pub fn record_event(&mut self, event: Event) {
        if let Some(span) = self.span.as_mut() {
            span.record_event(event);
        }
    }

    /// Record an exception event with the error's kind and message.
    pub fn record_error_event(&mut self, kind: &str, message: &str) {
        self.record_event(
            Event::new("exception")
                .with_attr(keys::ERROR_KIND, kind)
                .with_attr(keys::EXCEPTION_MESSAGE, message),
        );
    }

    /// Overwrite the span's status without closing it.
    pub fn set_status(&mut self, status: SpanStatus) {
        if let Some(span) = self.span.as_mut() {
            span.status = status;
        }
    }

    /// Close the span as successful and hand it to the exporter.
    pub fn finish_ok(self) {
        self.finish_with(SpanStatus::Ok);
    }

    /// Close the span as failed and hand it to the exporter.
    pub fn finish_error(self, message: impl Into<String>) {
        self.finish_with(SpanStatus::Error {
            message: message.into(),
        });
    }

    /// Close the span keeping its last-known status.
    pub fn finish(mut self) {
        if let Some(mut span) = self.span.take() {
            span.end_with_current_status();
            self.sink.submit(span);
        }
    }

    fn finish_with(mut self, status: SpanStatus) {
        if let Some(mut span) = self.span.take() {
            span.end(status);
            self.sink.submit(span);
        }
    }
}

impl Drop for ActiveSpan {
    fn drop(&mut self) {
        if let Some(mut span) = self.span.take() {
            span.end_with_current_status();
            self.sink.submit(span);
        }
    }
}
