//! OTLP-JSON encoding of finished spans.
//!
//! Produces the `ExportTraceServiceRequest` JSON shape collectors accept on
//! `/v1/traces`: hex ids, unix-nano timestamps as strings, typed attribute
//! values, numeric kind and status codes.

use serde::Serialize;

use crate::types::{AttrValue, Span, SpanKind, SpanStatus};

/// Top-level OTLP trace export payload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportTraceServiceRequest {
    pub resource_spans: Vec<ResourceSpans>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpans {
    pub resource: Resource,
    pub scope_spans: Vec<ScopeSpans>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub attributes: Vec<KeyValue>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeSpans {
    pub scope: InstrumentationScope,
    pub spans: Vec<OtlpSpan>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentationScope {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OtlpSpan {
    pub trace_id: String,
    pub span_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    pub name: String,
    pub kind: i32,
    pub start_time_unix_nano: String,
    pub end_time_unix_nano: String,
    pub attributes: Vec<KeyValue>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<OtlpEvent>,
    pub status: OtlpStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OtlpEvent {
    pub time_unix_nano: String,
    pub name: String,
    pub attributes: Vec<KeyValue>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OtlpStatus {
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct KeyValue {
    pub key: String,
    pub value: AnyValue,
}

/// OTLP `AnyValue`, externally tagged by value type.
#[derive(Debug, Serialize)]
pub enum AnyValue {
    #[serde(rename = "stringValue")]
    Str(String),
    // Fixed64/int64 are strings in OTLP-JSON.
    #[serde(rename = "intValue")]
    Int(String),
    #[serde(rename = "doubleValue")]
    Double(f64),
    #[serde(rename = "boolValue")]
    Bool(bool),
    #[serde(rename = "arrayValue")]
    Array(ArrayValue),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrayValue {
    pub values: Vec<AnyValue>,
}

const KIND_INTERNAL: i32 = 1;
const KIND_CLIENT: i32 = 3;

const STATUS_UNSET: i32 = 0;
const STATUS_OK: i32 = 1;
const STATUS_ERROR: i32 = 2;

/// Encode a batch of finished spans under one resource/scope.
pub fn encode_batch(spans: &[Span], service_name: &str) -> ExportTraceServiceRequest {
    ExportTraceServiceRequest {
        resource_spans: vec![ResourceSpans {
            resource: Resource {
                attributes: vec![KeyValue {
                    key: "service.name".to_string(),
                    value: AnyValue::Str(service_name.to_string()),
                }],
            },
            scope_spans: vec![ScopeSpans {
                scope: InstrumentationScope {
                    name: env!("CARGO_PKG_NAME").to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                },
                spans: spans.iter().map(encode_span).collect(),
            }],
        }],
    }
}

fn encode_span(span: &Span) -> OtlpSpan {
    OtlpSpan {
        trace_id: span.trace_id.to_string(),
        span_id: span.id.to_string(),
        parent_span_id: span.parent_id.map(|id| id.to_string()),
        name: span.name.clone(),
        kind: match span.kind {
            SpanKind::Llm => KIND_CLIENT,
            SpanKind::Agent | SpanKind::Chain | SpanKind::Internal => KIND_INTERNAL,
        },
        start_time_unix_nano: nanos(&span.started_at),
        end_time_unix_nano: span
            .ended_at
            .as_ref()
            .map(nanos)
            .unwrap_or_else(|| "0".to_string()),
        attributes: span
            .attributes
            .iter()
            .map(|(k, v)| KeyValue {
                key: k.clone(),
                value: encode_value(v),
            })
            .collect(),
        events: span
            .events
            .iter()
            .map(|e| OtlpEvent {
                time_unix_nano: nanos(&e.timestamp),
                name: e.name.clone(),
                attributes: e
                    .attributes
                    .iter()
                    .map(|(k, v)| KeyValue {
                        key: k.clone(),
                        value: encode_value(v),
                    })
                    .collect(),
            })
            .collect(),
        status: match &span.status {
            SpanStatus::Unset => OtlpStatus {
                code: STATUS_UNSET,
                message: None,
            },
            SpanStatus::Ok => OtlpStatus {
                code: STATUS_OK,
                message: None,
            },
            SpanStatus::Error { message } => OtlpStatus {
                code: STATUS_ERROR,
                message: Some(message.clone()),
            },
        },
    }
}

fn encode_value(value: &AttrValue) -> AnyValue {
    match value {
        AttrValue::Str(s) => AnyValue::Str(s.clone()),
        AttrValue::Int(i) => AnyValue::Int(i.to_string()),
        AttrValue::Float(f) => AnyValue::Double(*f),
        AttrValue::Bool(b) => AnyValue::Bool(*b),
        AttrValue::StrList(items) => AnyValue::Array(ArrayValue {
            values: items.iter().map(|s| AnyValue::Str(s.clone())).collect(),
        }),
    }
}

fn nanos(ts: &chrono::DateTime<chrono::Utc>) -> String {
    ts.timestamp_nanos_opt()
        .unwrap_or_default()
        .to_string()
}
