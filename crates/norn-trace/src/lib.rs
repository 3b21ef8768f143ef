//! Cross-process trace propagation for staged pipelines.
//!
//! This crate lets a pipeline of independent, short-lived processes emit
//! spans that join into one logical trace tree:
//!
//! - **Types**: `Span`, `TraceContext`, attribute values and status
//! - **Tracer**: position-aware stage spans and nested child spans
//! - **Carrier**: `Save`/`Load` of the context handle between processes
//! - **Bound**: size limits for text recorded as span attributes
//! - **Export**: batching pipeline with OTLP-JSON, file, and in-memory
//!   exporter backends
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use norn_trace::{
//!     BatchConfig, CarrierStore, ExportPipeline, FileCarrier, MemoryExporter, StagePosition,
//!     Tracer,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let exporter = Arc::new(MemoryExporter::new());
//!     let (sink, pipeline) = ExportPipeline::spawn(exporter, BatchConfig::default());
//!
//!     let carrier = FileCarrier::new(".norn/carrier.json");
//!     let tracer = Tracer::new(sink);
//!
//!     let inbound = carrier.load();
//!     let span = tracer.stage_span(StagePosition::First, &inbound, "plan");
//!
//!     // Do work, open children via span.child(...)...
//!
//!     carrier.save(&span.context());
//!     span.finish_ok();
//!     pipeline.shutdown().await;
//! }
//! ```

pub mod bound;
pub mod carrier;
pub mod export;
pub mod keys;
pub mod otlp;
pub mod tracer;
pub mod types;

// Re-export main types
pub use bound::{Bounded, TRUNCATION_MARKER, bound};
pub use carrier::{CarrierStore, FileCarrier};
pub use export::{
    BatchConfig, ExportError, ExportPipeline, FileExporter, MemoryExporter, OtlpHttpExporter,
    SpanExporter, SpanSink,
};
pub use tracer::{ActiveSpan, StagePosition, Tracer};
pub use types::{AttrValue, Event, Span, SpanId, SpanKind, SpanStatus, TraceContext, TraceId};
