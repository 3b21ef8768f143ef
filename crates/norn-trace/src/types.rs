//! Core span and trace-context types.
//!
//! A trace is the set of spans sharing one `TraceId`, forming a single tree.
//! Spans are owned by the process that creates them until they are handed to
//! the export pipeline; after that they are immutable.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 128-bit trace identifier, rendered as 32 lowercase hex characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId(pub u128);

impl TraceId {
    /// Generate a new non-zero trace id.
    pub fn generate() -> Self {
        loop {
            let id = rand::random::<u128>();
            if id != 0 {
                return Self(id);
            }
        }
    }

    /// Parse from a 32-character hex string. Zero ids are rejected.
    pub fn from_hex(s: &str) -> Option<Self> {
        u128::from_str_radix(s, 16).ok().filter(|v| *v != 0).map(Self)
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl Serialize for TraceId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TraceId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).ok_or_else(|| serde::de::Error::custom("invalid trace id"))
    }
}

/// 64-bit span identifier, rendered as 16 lowercase hex characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId(pub u64);

impl SpanId {
    /// Generate a new non-zero span id.
    pub fn generate() -> Self {
        loop {
            let id = rand::random::<u64>();
            if id != 0 {
                return Self(id);
            }
        }
    }

    /// Parse from a 16-character hex string. Zero ids are rejected.
    pub fn from_hex(s: &str) -> Option<Self> {
        u64::from_str_radix(s, 16).ok().filter(|v| *v != 0).map(Self)
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl Serialize for SpanId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SpanId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).ok_or_else(|| serde::de::Error::custom("invalid span id"))
    }
}

/// The serializable trace-context handle passed between stage processes.
///
/// `parent_span_id` names the span the next stage should attach under. A
/// fresh context has no parent and marks the start of a new trace.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TraceContext {
    /// Trace the next span belongs to.
    pub trace_id: TraceId,

    /// Span the next stage attaches under, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<SpanId>,

    /// Sampling decision carried across stage boundaries.
    #[serde(default = "default_sampled")]
    pub sampled: bool,
}

fn default_sampled() -> bool {
    true
}

impl TraceContext {
    /// Mint a context for a brand-new trace with no parent span.
    pub fn fresh() -> Self {
        Self {
            trace_id: TraceId::generate(),
            parent_span_id: None,
            sampled: true,
        }
    }

    /// True if this context has no parent span (start of a trace).
    pub fn is_fresh(&self) -> bool {
        self.parent_span_id.is_none()
    }
}

/// Role a span plays in the pipeline trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    /// Root span of a pipeline run (first stage).
    Agent,
    /// A non-root stage span.
    Chain,
    /// An external model call or one attempt of it.
    Llm,
    /// Anything else.
    Internal,
}

impl SpanKind {
    /// Stable lowercase tag used in the span attribute vocabulary.
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanKind::Agent => "agent",
            SpanKind::Chain => "chain",
            SpanKind::Llm => "llm",
            SpanKind::Internal => "internal",
        }
    }
}

/// Terminal status of a span.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SpanStatus {
    /// No status recorded yet.
    #[default]
    Unset,
    /// Completed successfully.
    Ok,
    /// Completed with an error.
    Error { message: String },
}

impl SpanStatus {
    /// True if the status is `Error`.
    pub fn is_error(&self) -> bool {
        matches!(self, SpanStatus::Error { .. })
    }
}

/// A scalar or string-list attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    StrList(Vec<String>),
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<u32> for AttrValue {
    fn from(v: u32) -> Self {
        AttrValue::Int(i64::from(v))
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Float(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Str(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::Str(v)
    }
}

impl From<Vec<String>> for AttrValue {
    fn from(v: Vec<String>) -> Self {
        AttrValue::StrList(v)
    }
}

/// A point-in-time occurrence within a span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event name (e.g. "exception").
    pub name: String,

    /// When the event occurred.
    pub timestamp: DateTime<Utc>,

    /// Event-specific attributes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, AttrValue>,
}

impl Event {
    /// Create an event stamped with the current time.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timestamp: Utc::now(),
            attributes: BTreeMap::new(),
        }
    }

    /// Attach an attribute.
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// A named, timed unit of work with identity, parent linkage, attributes,
/// ordered events, and a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    /// Unique identifier within the trace.
    pub id: SpanId,

    /// Trace this span belongs to.
    pub trace_id: TraceId,

    /// Parent span, absent only for the root of a trace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<SpanId>,

    /// Human-readable operation name.
    pub name: String,

    /// Role of this span in the pipeline.
    pub kind: SpanKind,

    /// When the span started.
    pub started_at: DateTime<Utc>,

    /// When the span completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    /// Span attributes, sorted by key.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, AttrValue>,

    /// Terminal status.
    #[serde(default)]
    pub status: SpanStatus,

    /// Ordered events recorded during the span.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<Event>,
}

impl Span {
    /// Create a new span with a generated id, started now.
    pub fn new(
        trace_id: TraceId,
        parent_id: Option<SpanId>,
        name: impl Into<String>,
        kind: SpanKind,
    ) -> Self {
        Self {
            id: SpanId::generate(),
            trace_id,
            parent_id,
            name: name.into(),
            kind,
            started_at: Utc::now(),
            ended_at: None,
            attributes: BTreeMap::new(),
            status: SpanStatus::Unset,
            events: Vec::new(),
        }
    }

    /// True if this span has no parent.
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Set an attribute, replacing any previous value for the key.
    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Append an event.
    pub fn record_event(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Close the span with the given status.
    pub fn end(&mut self, status: SpanStatus) {
        self.ended_at = Some(Utc::now());
        self.status = status;
    }

    /// Close the span keeping whatever status was already recorded.
    pub fn end_with_current_status(&mut self) {
        self.ended_at = Some(Utc::now());
    }

    /// Wall-clock duration in milliseconds, if the span has ended.
    pub fn duration_ms(&self) -> Option<u64> {
        self.ended_at
            .map(|end| (end - self.started_at).num_milliseconds().max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_hex_roundtrip() {
        let trace_id = TraceId::generate();
        let parsed = TraceId::from_hex(&trace_id.to_string()).unwrap();
        assert_eq!(trace_id, parsed);

        let span_id = SpanId::generate();
        assert_eq!(span_id.to_string().len(), 16);
        assert_eq!(SpanId::from_hex(&span_id.to_string()), Some(span_id));
    }

    #[test]
    fn test_zero_ids_rejected() {
        assert!(TraceId::from_hex(&"0".repeat(32)).is_none());
        assert!(SpanId::from_hex(&"0".repeat(16)).is_none());
        assert!(TraceId::from_hex("not hex").is_none());
    }

    #[test]
    fn test_fresh_context_has_no_parent() {
        let ctx = TraceContext::fresh();
        assert!(ctx.is_fresh());
        assert!(ctx.sampled);
    }

    #[test]
    fn test_context_serialization_roundtrip() {
        let ctx = TraceContext {
            trace_id: TraceId::generate(),
            parent_span_id: Some(SpanId::generate()),
            sampled: true,
        };

        let json = serde_json::to_string(&ctx).unwrap();
        let loaded: TraceContext = serde_json::from_str(&json).unwrap();
        assert_eq!(ctx, loaded);
    }

    #[test]
    fn test_span_end_sets_status() {
        let mut span = Span::new(TraceId::generate(), None, "work", SpanKind::Internal);
        assert!(span.is_root());
        assert_eq!(span.status, SpanStatus::Unset);

        span.end(SpanStatus::Ok);
        assert!(span.ended_at.is_some());
        assert_eq!(span.status, SpanStatus::Ok);
        assert!(span.duration_ms().is_some());
    }

    #[test]
    fn test_end_with_current_status_preserves_error() {
        let mut span = Span::new(TraceId::generate(), None, "work", SpanKind::Internal);
        span.status = SpanStatus::Error {
            message: "interrupted".to_string(),
        };

        span.end_with_current_status();
        assert!(span.status.is_error());
        assert!(span.ended_at.is_some());
    }

    #[test]
    fn test_span_serialization_uses_hex_ids() {
        let mut span = Span::new(TraceId(0xabcd), None, "op", SpanKind::Llm);
        span.set_attr("llm.model", "gpt-4");
        span.record_event(Event::new("exception").with_attr("error.kind", "transient"));

        let json = serde_json::to_string(&span).unwrap();
        assert!(json.contains(&format!("{:032x}", 0xabcdu128)));
        assert!(json.contains("gpt-4"));
        assert!(json.contains("exception"));
    }
}
