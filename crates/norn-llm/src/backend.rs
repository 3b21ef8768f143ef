//! LLM backend trait and the mock implementation used in tests.
//!
//! Backends only know how to execute one completion request. Retry and span
//! recording live in [`crate::call`], so every backend gets the same
//! instrumentation.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{LlmError, Result};
use crate::types::{CompletionRequest, CompletionResponse, Usage};

/// Trait for LLM backend providers.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Execute a completion request and return the full response.
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse>;

    /// Provider identifier recorded on spans (e.g. "openai", "gemini").
    fn provider(&self) -> &str;
}

/// A backend that can be shared across tasks.
pub type SharedBackend = Arc<dyn LlmBackend>;

/// A mock backend for testing.
///
/// Outcomes are returned in scripted order. Once the script is exhausted,
/// every further call fails with a transient error, which makes an empty
/// script a convenient always-failing backend.
pub struct MockBackend {
    provider: String,
    outcomes: Mutex<VecDeque<Result<CompletionResponse>>>,
    request_log: Mutex<Vec<CompletionRequest>>,
}

impl MockBackend {
    /// Create a mock backend with the given scripted outcomes.
    pub fn new(outcomes: Vec<Result<CompletionResponse>>) -> Self {
        Self {
            provider: "mock".to_string(),
            outcomes: Mutex::new(outcomes.into()),
            request_log: Mutex::new(Vec::new()),
        }
    }

    /// A backend that answers every request with the same text.
    pub fn with_text(text: impl Into<String>) -> Self {
        Self::new(vec![Ok(CompletionResponse::new(
            "mock_msg_1",
            "mock-model",
            text,
            Usage::new(10, 20),
        ))])
    }

    /// A backend that fails transiently `failures` times, then succeeds.
    pub fn transient_failures_then(failures: u32, response: CompletionResponse) -> Self {
        let mut outcomes: Vec<Result<CompletionResponse>> = (0..failures)
            .map(|i| Err(LlmError::Transient(format!("simulated failure {i}"))))
            .collect();
        outcomes.push(Ok(response));
        Self::new(outcomes)
    }

    /// A backend that always fails with transient errors.
    pub fn always_failing() -> Self {
        Self::new(Vec::new())
    }

    /// All requests made to this backend.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.request_log.lock().unwrap().clone()
    }

    /// Number of requests made.
    pub fn request_count(&self) -> usize {
        self.request_log.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmBackend for MockBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        self.request_log.lock().unwrap().push(request.clone());

        match self.outcomes.lock().unwrap().pop_front() {
            Some(outcome) => outcome,
            None => Err(LlmError::Transient(
                "mock backend: script exhausted".to_string(),
            )),
        }
    }

    fn provider(&self) -> &str {
        &self.provider
    }
}
