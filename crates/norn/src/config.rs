//! Configuration file support for norn.
//!
//! All norn data lives in a `.norn/` directory:
//! - `.norn/config.toml` - Configuration file
//! - `.norn/carrier.json` - Trace-context carrier (one handoff at a time)
//! - `.norn/runs/` - Per-run span archives when no collector is configured
//! - `.norn/logs/` - Log files
//!
//! Config discovery searches for `.norn/config.toml` starting from the
//! current directory and walking up to parent directories.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// The norn data directory name.
pub const NORN_DIR: &str = ".norn";
/// The config file name within the norn directory.
pub const CONFIG_FILE: &str = "config.toml";

use anyhow::{Context, Result};
use norn_llm::RetryPolicy;
use norn_trace::BatchConfig;
use serde::{Deserialize, Serialize};

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    /// Pipeline/carrier settings.
    pub pipeline: PipelineConfig,
    /// Span collector settings.
    pub collector: CollectorConfig,
    /// LLM backend settings.
    pub llm: LlmConfig,
    /// Payload bounding settings.
    pub limits: LimitsConfig,
}

/// Pipeline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Path to the carrier file. Relative paths resolve within `.norn/`.
    pub carrier_path: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            carrier_path: PathBuf::from("carrier.json"),
        }
    }
}

/// Span collector configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// OTLP-JSON traces endpoint. When absent, spans archive to files.
    pub endpoint: Option<String>,
    /// Directory for per-run archive files. Relative paths resolve within
    /// `.norn/`.
    pub archive_dir: PathBuf,
    /// Flush once this many spans are queued.
    pub batch_size: usize,
    /// Flush at least this often, in milliseconds.
    pub flush_interval_ms: u64,
    /// Upper bound on the shutdown flush, in milliseconds.
    pub shutdown_timeout_ms: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            archive_dir: PathBuf::from("runs"),
            batch_size: 128,
            flush_interval_ms: 2_000,
            shutdown_timeout_ms: 5_000,
        }
    }
}

/// LLM backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider: "openai", "gemini", or "mock".
    pub provider: String,
    /// Model identifier sent with requests.
    pub model: String,
    /// API base URL override.
    pub base_url: Option<String>,
    /// API key. Falls back to the `<PROVIDER>_API_KEY` env var.
    pub api_key: Option<String>,
    /// Sampling temperature.
    pub temperature: f64,
    /// Generation limit per request.
    pub max_tokens: u32,
    /// Attempt budget per call, including the first try.
    pub max_attempts: u32,
    /// Base backoff delay in milliseconds.
    pub backoff_base_ms: u64,
    /// Backoff delay cap in milliseconds.
    pub backoff_cap_ms: u64,
    /// Backoff jitter bound in milliseconds.
    pub backoff_jitter_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4".to_string(),
            base_url: None,
            api_key: None,
            temperature: 0.1,
            max_tokens: 4_096,
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_cap_ms: 30_000,
            backoff_jitter_ms: 250,
        }
    }
}

/// Payload bounding configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum characters stored for any text attribute.
    pub attribute_limit: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            attribute_limit: 8_192,
        }
    }
}

impl Config {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Find and load configuration from current or parent directories.
    ///
    /// Searches for `.norn/config.toml` starting from the current directory
    /// and walking up to parent directories.
    pub fn find_and_load() -> Result<Option<(Self, PathBuf)>> {
        let current = std::env::current_dir()?;
        Self::find_and_load_from(&current)
    }

    /// Find and load configuration starting from a specific directory.
    pub fn find_and_load_from(start: &Path) -> Result<Option<(Self, PathBuf)>> {
        let mut dir = start.to_path_buf();

        loop {
            let norn_dir = dir.join(NORN_DIR);
            let config_path = norn_dir.join(CONFIG_FILE);
            if config_path.exists() {
                let config = Self::from_file(&config_path)?;
                // Return the .norn directory, not the config file
                return Ok(Some((config, norn_dir)));
            }

            if !dir.pop() {
                break;
            }
        }

        Ok(None)
    }

    /// Resolve the carrier path relative to the .norn directory.
    pub fn resolve_carrier_path(&self, norn_dir: &Path) -> PathBuf {
        if self.pipeline.carrier_path.is_absolute() {
            self.pipeline.carrier_path.clone()
        } else {
            norn_dir.join(&self.pipeline.carrier_path)
        }
    }

    /// Resolve the archive directory relative to the .norn directory.
    pub fn resolve_archive_dir(&self, norn_dir: &Path) -> PathBuf {
        if self.collector.archive_dir.is_absolute() {
            self.collector.archive_dir.clone()
        } else {
            norn_dir.join(&self.collector.archive_dir)
        }
    }

    /// Batching thresholds for the export pipeline.
    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            max_batch_size: self.collector.batch_size,
            flush_interval: Duration::from_millis(self.collector.flush_interval_ms),
            shutdown_timeout: Duration::from_millis(self.collector.shutdown_timeout_ms),
        }
    }

    /// Retry schedule for instrumented calls, seeded per invocation.
    pub fn retry_policy(&self, seed: u64) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(self.llm.max_attempts)
            .with_base(Duration::from_millis(self.llm.backoff_base_ms))
            .with_cap(Duration::from_millis(self.llm.backoff_cap_ms))
            .with_jitter(Duration::from_millis(self.llm.backoff_jitter_ms))
            .with_seed(seed)
    }

    /// Resolve the API key from config or the provider's env var.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.llm.api_key.clone().or_else(|| {
            std::env::var(format!("{}_API_KEY", self.llm.provider.to_uppercase())).ok()
        })
    }
}

/// Configuration validation error.
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigValidationError {}

impl Config {
    /// Validate the configuration.
    ///
    /// Returns a list of validation errors if any are found.
    pub fn validate(&self) -> Vec<ConfigValidationError> {
        let mut errors = Vec::new();

        if !["openai", "gemini", "mock"].contains(&self.llm.provider.as_str()) {
            errors.push(ConfigValidationError {
                field: "llm.provider".to_string(),
                message: format!(
                    "Invalid provider '{}'. Expected 'openai', 'gemini', or 'mock'.",
                    self.llm.provider
                ),
            });
        }

        if self.llm.model.is_empty() {
            errors.push(ConfigValidationError {
                field: "llm.model".to_string(),
                message: "Model cannot be empty.".to_string(),
            });
        }

        if self.llm.max_attempts == 0 {
            errors.push(ConfigValidationError {
                field: "llm.max_attempts".to_string(),
                message: "At least one attempt is required.".to_string(),
            });
        }

        if self.llm.provider != "mock" && self.resolve_api_key().is_none() {
            errors.push(ConfigValidationError {
                field: "llm.api_key".to_string(),
                message: format!(
                    "API key required. Set [llm] api_key or the {}_API_KEY env var.",
                    self.llm.provider.to_uppercase()
                ),
            });
        }

        if self.collector.batch_size == 0 {
            errors.push(ConfigValidationError {
                field: "collector.batch_size".to_string(),
                message: "Batch size must be at least 1.".to_string(),
            });
        }

        errors
    }
}
