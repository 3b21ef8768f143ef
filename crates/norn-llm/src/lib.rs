//! norn-llm: instrumented LLM calls for pipeline stages
//!
//! This crate wraps external model calls for the pipeline:
//! - Backend abstraction over OpenAI-compatible providers, with a scripted
//!   mock for tests
//! - Bounded retry loop with deterministic exponential backoff
//! - Per-attempt span recording through `norn-trace`

pub mod backend;
pub mod call;
pub mod error;
pub mod http;
pub mod retry;
pub mod types;

// Re-export main types
pub use backend::{LlmBackend, MockBackend, SharedBackend};
pub use call::call_with_retry;
pub use error::{LlmError, Result};
pub use http::{HttpBackend, HttpBackendConfig};
pub use retry::{RecordingSleeper, RetryPolicy, Sleeper, TokioSleeper};
pub use types::{CompletionRequest, CompletionResponse, Usage};
