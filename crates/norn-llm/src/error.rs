//! Error types for instrumented LLM calls.

use thiserror::Error;

/// Result type alias for LLM call operations.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Errors that can occur when calling an LLM backend.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Retryable failure of an external call (network, rate limit, 5xx).
    #[error("transient call failure: {0}")]
    Transient(String),

    /// The backend rejected the request; retrying will not help.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// Configuration error (missing key, bad endpoint).
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The backend answered with a payload we cannot use.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Terminal: every attempt of a retry loop failed.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// How many attempts were made.
        attempts: u32,
        /// The failure of the final attempt.
        #[source]
        last: Box<LlmError>,
    },
}

impl LlmError {
    /// Whether the retry loop should try again after this error.
    ///
    /// Only transient failures are retryable; configuration, rejection, and
    /// parse errors are returned immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::Transient(_))
    }

    /// Stable tag recorded as the `error.kind` span attribute.
    pub fn kind(&self) -> &'static str {
        match self {
            LlmError::Transient(_) => "transient",
            LlmError::Rejected(_) => "rejected",
            LlmError::Config(_) => "config",
            LlmError::Serialization(_) => "serialization",
            LlmError::InvalidResponse(_) => "invalid_response",
            LlmError::RetriesExhausted { .. } => "retries_exhausted",
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        LlmError::Transient(e.to_string())
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(e: serde_json::Error) -> Self {
        LlmError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(LlmError::Transient("503".to_string()).is_retryable());
        assert!(!LlmError::Rejected("bad request".to_string()).is_retryable());
        assert!(!LlmError::Config("no key".to_string()).is_retryable());
        assert!(
            !LlmError::RetriesExhausted {
                attempts: 3,
                last: Box::new(LlmError::Transient("503".to_string())),
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_exhausted_carries_last_error() {
        let err = LlmError::RetriesExhausted {
            attempts: 3,
            last: Box::new(LlmError::Transient("rate limit".to_string())),
        };
        assert!(err.to_string().contains("3 attempts"));
        assert!(err.to_string().contains("rate limit"));
        assert_eq!(err.kind(), "retries_exhausted");
    }
}
