//! One-stage execution: carrier in, stage span, instrumented call, carrier out.
//!
//! The runner is the glue between the carrier store, the tracer, and the
//! instrumented call wrapper. Business content stays thin on purpose: a
//! stage is one prompt through the configured backend, with its output
//! recorded on the stage span.

use anyhow::{Result, bail};
use norn_llm::{CompletionRequest, LlmBackend, Sleeper, call_with_retry};
use norn_trace::{CarrierStore, StagePosition, Tracer, keys};

use crate::config::Config;

/// What to run: the stage's declared identity and inputs.
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// Stage name, used as the span name (e.g. "plan", "draft", "revise").
    pub name: String,

    /// Declared position in the pipeline.
    pub position: StagePosition,

    /// Originating goal text. Required for the first stage.
    pub goal: Option<String>,

    /// Prompt for this stage's call. Defaults to the goal text.
    pub prompt: Option<String>,
}

impl StageSpec {
    fn prompt_text(&self) -> Option<String> {
        self.prompt.clone().or_else(|| self.goal.clone())
    }
}

/// Execute one pipeline stage and return its response text.
///
/// Loads the inbound context, opens the stage span for the declared
/// position, issues the stage's call through the retry wrapper, writes the
/// outbound context back to the carrier, and closes the span with the
/// outcome. The carrier is written on both success and failure so a crashed
/// stage leaves a usable handoff behind.
pub async fn run_stage(
    config: &Config,
    carrier: &dyn CarrierStore,
    tracer: &Tracer,
    backend: &dyn LlmBackend,
    sleeper: &dyn Sleeper,
    policy_seed: u64,
    spec: &StageSpec,
) -> Result<String> {
    let Some(prompt) = spec.prompt_text() else {
        bail!("stage '{}' has neither a prompt nor a goal", spec.name);
    };
    if spec.position == StagePosition::First && spec.goal.is_none() {
        bail!("the first stage must declare the pipeline goal");
    }

    let limit = config.limits.attribute_limit;
    let inbound = carrier.load();
    let mut span = tracer.stage_span(spec.position, &inbound, &spec.name);

    tracing::info!(
        stage = %spec.name,
        position = %spec.position,
        trace_id = %span.trace_id(),
        "Stage started"
    );

    if let Some(goal) = &spec.goal {
        span.set_bounded_attr(keys::PIPELINE_GOAL, goal, limit);
    }

    let request = CompletionRequest::new(&config.llm.model, prompt)
        .with_temperature(config.llm.temperature)
        .with_max_tokens(config.llm.max_tokens);
    let policy = config.retry_policy(policy_seed);

    let outcome = call_with_retry(&span, backend, &request, &policy, sleeper, limit).await;

    // Hand the context off before the span closes so the successor stage
    // attaches under this stage regardless of outcome.
    carrier.save(&span.context());

    match outcome {
        Ok(response) => {
            if spec.position == StagePosition::Last {
                span.set_bounded_attr(keys::PIPELINE_RESULT, &response.text, limit);
            }
            span.finish_ok();
            tracing::info!(stage = %spec.name, "Stage completed");
            Ok(response.text)
        }
        Err(error) => {
            span.finish_error(error.to_string());
            tracing::error!(stage = %spec.name, error = %error, "Stage failed");
            Err(error.into())
        }
    }
}
