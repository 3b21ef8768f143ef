//! Demo of three pipeline stages handing trace context through a carrier.

use std::sync::Arc;

use norn_trace::{
    BatchConfig, CarrierStore, ExportPipeline, FileCarrier, MemoryExporter, SpanKind,
    StagePosition, Tracer, keys,
};

async fn simulate_stage(
    exporter: Arc<MemoryExporter>,
    carrier: &FileCarrier,
    name: &str,
    position: StagePosition,
) {
    // Each stage gets its own pipeline and tracer, as a real process would.
    let (sink, pipeline) = ExportPipeline::spawn(exporter, BatchConfig::default());
    let tracer = Tracer::new(sink);

    let inbound = carrier.load();
    let mut span = tracer.stage_span(position, &inbound, name);

    match position {
        StagePosition::First => {
            span.set_bounded_attr(keys::PIPELINE_GOAL, "Plan a launch", 8192);
        }
        StagePosition::Last => {
            span.set_bounded_attr(keys::PIPELINE_RESULT, "Launch plan, revised.", 8192);
        }
        StagePosition::Intermediate => {}
    }

    // Simulated model call.
    let mut call = span.child("llm.call", SpanKind::Llm);
    call.set_attr(keys::LLM_PROVIDER, "demo");
    call.set_attr(keys::LLM_MODEL, "demo-model");
    call.finish_ok();

    carrier.save(&span.context());
    span.finish_ok();
    pipeline.shutdown().await;
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let carrier = FileCarrier::new(dir.path().join("carrier.json"));
    let exporter = Arc::new(MemoryExporter::new());

    let stages = [
        ("plan", StagePosition::First),
        ("draft", StagePosition::Intermediate),
        ("revise", StagePosition::Last),
    ];
    for (name, position) in stages {
        simulate_stage(exporter.clone(), &carrier, name, position).await;
    }

    let spans = exporter.spans();
    let roots: Vec<_> = spans.iter().filter(|s| s.is_root()).collect();

    println!("Spans exported: {}", spans.len());
    println!("Roots: {}", roots.len());
    println!("Trace ID: {}", roots[0].trace_id);

    println!("\n--- Spans as JSON ---");
    for span in &spans {
        println!("{}", serde_json::to_string_pretty(span)?);
    }

    Ok(())
}
