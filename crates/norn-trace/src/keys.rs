//! Reserved span attribute key constants.
//!
//! These keys form the fixed vocabulary consumed by downstream analysis
//! tooling. Producers must use these constants rather than ad hoc strings so
//! that renames stay mechanical.

/// Provider identifier of the backend serving a call (e.g. "openai").
pub const LLM_PROVIDER: &str = "llm.provider";

/// Model identifier sent with a request (e.g. "gpt-4").
pub const LLM_MODEL: &str = "llm.model";

/// Sampling temperature sent with a request.
pub const LLM_TEMPERATURE: &str = "llm.temperature";

/// Input token count reported by the backend.
pub const LLM_INPUT_TOKENS: &str = "llm.input_tokens";

/// Output token count reported by the backend.
pub const LLM_OUTPUT_TOKENS: &str = "llm.output_tokens";

/// Response text of a successful call, subject to bounding.
pub const LLM_RESPONSE: &str = "llm.response";

/// Zero-based index of a retry attempt.
pub const RETRY_ATTEMPT: &str = "retry.attempt";

/// Stable error-kind tag recorded on failed attempts.
pub const ERROR_KIND: &str = "error.kind";

/// Message text of an exception recorded as a span event.
pub const EXCEPTION_MESSAGE: &str = "exception.message";

/// Role tag of a span: "agent", "chain", "llm", or "internal".
pub const SPAN_ROLE: &str = "norn.kind";

/// Originating goal text, recorded on the root span of a run.
pub const PIPELINE_GOAL: &str = "pipeline.goal";

/// Final result text, recorded on the last stage's span.
pub const PIPELINE_RESULT: &str = "pipeline.result";

/// Declared name of the stage that produced a span.
pub const PIPELINE_STAGE: &str = "pipeline.stage";

/// Suffix marking that an attribute's text was cut to a bound.
pub const TRUNCATED_SUFFIX: &str = "truncated";

/// Suffix carrying the pre-truncation character count.
pub const ORIGINAL_LENGTH_SUFFIX: &str = "original_length";

/// Companion key `<key>.truncated` for a bounded attribute.
pub fn truncated_key(key: &str) -> String {
    format!("{key}.{TRUNCATED_SUFFIX}")
}

/// Companion key `<key>.original_length` for a bounded attribute.
pub fn original_length_key(key: &str) -> String {
    format!("{key}.{ORIGINAL_LENGTH_SUFFIX}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_companion_keys() {
        assert_eq!(truncated_key(LLM_RESPONSE), "llm.response.truncated");
        assert_eq!(
            original_length_key(LLM_RESPONSE),
            "llm.response.original_length"
        );
    }
}
