//! Carrier store for cross-process context handoff.
//!
//! Each stage boundary is mediated by a single serialized [`TraceContext`]
//! record at a well-known location, fully overwritten on every handoff. The
//! carrier is not an archive: its lifetime is one inter-stage handoff.
//!
//! Telemetry plumbing must never break the pipeline, so the contract is
//! deliberately lossy: a save failure is logged and swallowed, and a missing
//! or unreadable carrier loads as a fresh context (the expected state for
//! the first stage of a run).

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::types::TraceContext;

/// Persists and retrieves the trace-context handle between stage processes.
///
/// The storage medium is an implementation detail behind this interface;
/// [`FileCarrier`] is the canonical one.
pub trait CarrierStore: Send + Sync {
    /// Persist the context, overwriting any previous carrier. Best-effort:
    /// failures are reported via logs, never to the caller.
    fn save(&self, ctx: &TraceContext);

    /// Read the carrier. Absent or unparseable carriers yield a fresh
    /// context; this never fails.
    fn load(&self) -> TraceContext;
}

/// Carrier stored as one JSON object at a canonical filesystem path.
#[derive(Debug, Clone)]
pub struct FileCarrier {
    path: PathBuf,
}

impl FileCarrier {
    /// Create a carrier store at the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The canonical carrier path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CarrierStore for FileCarrier {
    fn save(&self, ctx: &TraceContext) {
        if let Some(parent) = self.path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to create carrier directory; context not handed off"
                );
                return;
            }
        }

        let json = match serde_json::to_string_pretty(ctx) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize trace context");
                return;
            }
        };

        if let Err(e) = fs::write(&self.path, json) {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to write carrier; context not handed off"
            );
        }
    }

    fn load(&self) -> TraceContext {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(
                    path = %self.path.display(),
                    "No carrier present, starting a new trace"
                );
                return TraceContext::fresh();
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to read carrier, starting a new trace"
                );
                return TraceContext::fresh();
            }
        };

        match serde_json::from_str(&text) {
            Ok(ctx) => ctx,
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Carrier is corrupt, starting a new trace"
                );
                TraceContext::fresh()
            }
        }
    }
}
