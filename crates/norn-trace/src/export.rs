//! Export pipeline: batching worker, sink handle, and exporter backends.
//!
//! Spans are queued as they close and shipped in batches when a size
//! threshold is reached or a flush interval elapses. Export failures are
//! logged and dropped; telemetry loss must never fail the pipeline. The
//! shutdown path flushes everything outstanding, bounded by a timeout.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::otlp;
use crate::types::Span;

/// Error type for span export operations. Never propagated past the
/// pipeline worker; surfaced only in logs.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("export timed out")]
    Timeout,
}

/// Ships batches of finished spans to a collector.
#[async_trait]
pub trait SpanExporter: Send + Sync {
    /// Export one batch. A batch is all-or-nothing from the pipeline's view.
    async fn export(&self, batch: Vec<Span>) -> Result<(), ExportError>;

    /// Exporter name for logging.
    fn name(&self) -> &str;
}

/// Batching thresholds for the export worker.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Flush once this many spans are queued.
    pub max_batch_size: usize,

    /// Flush at least this often while spans trickle in.
    pub flush_interval: Duration,

    /// Upper bound on the blocking shutdown flush.
    pub shutdown_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 128,
            flush_interval: Duration::from_secs(2),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Cheap, cloneable handle for submitting finished spans to the pipeline.
#[derive(Debug, Clone)]
pub struct SpanSink {
    tx: mpsc::UnboundedSender<Span>,
}

impl SpanSink {
    /// Queue a finished span. Non-blocking; if the pipeline is gone the
    /// span is dropped with a log line.
    pub fn submit(&self, span: Span) {
        if self.tx.send(span).is_err() {
            tracing::warn!("Export pipeline already stopped; span dropped");
        }
    }
}

/// Background batching worker. Construct with [`ExportPipeline::spawn`],
/// stop with [`ExportPipeline::shutdown`].
pub struct ExportPipeline {
    worker: JoinHandle<()>,
    shutdown_tx: oneshot::Sender<()>,
    shutdown_timeout: Duration,
}

impl ExportPipeline {
    /// Start the worker task and return the sink feeding it.
    pub fn spawn(exporter: Arc<dyn SpanExporter>, config: BatchConfig) -> (SpanSink, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let shutdown_timeout = config.shutdown_timeout;

        let worker = tokio::spawn(run_worker(exporter, config, rx, shutdown_rx));

        (
            SpanSink { tx },
            Self {
                worker,
                shutdown_tx,
                shutdown_timeout,
            },
        )
    }

    /// Flush all outstanding spans and stop the worker, waiting at most the
    /// configured shutdown timeout.
    pub async fn shutdown(self) {
        // A send failure means the worker already exited on its own.
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(self.shutdown_timeout, self.worker).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Export worker failed"),
            Err(_) => tracing::warn!("Shutdown flush timed out; remaining spans dropped"),
        }
    }
}

async fn run_worker(
    exporter: Arc<dyn SpanExporter>,
    config: BatchConfig,
    mut rx: mpsc::UnboundedReceiver<Span>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut buf: Vec<Span> = Vec::new();
    let mut ticker = tokio::time::interval(config.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(span) => {
                    buf.push(span);
                    if buf.len() >= config.max_batch_size {
                        flush(exporter.as_ref(), &mut buf).await;
                    }
                }
                // All sinks dropped.
                None => break,
            },
            _ = ticker.tick() => flush(exporter.as_ref(), &mut buf).await,
            _ = &mut shutdown_rx => break,
        }
    }

    // Spans submitted before shutdown are still in the channel; drain them
    // into the final flush.
    while let Ok(span) = rx.try_recv() {
        buf.push(span);
    }
    flush(exporter.as_ref(), &mut buf).await;
}

async fn flush(exporter: &dyn SpanExporter, buf: &mut Vec<Span>) {
    if buf.is_empty() {
        return;
    }

    let batch = std::mem::take(buf);
    let count = batch.len();
    if let Err(e) = exporter.export(batch).await {
        tracing::warn!(
            exporter = exporter.name(),
            spans = count,
            error = %e,
            "Span export failed; batch dropped"
        );
    } else {
        tracing::debug!(exporter = exporter.name(), spans = count, "Exported span batch");
    }
}

/// Exporter that POSTs OTLP-JSON batches to a collector endpoint.
pub struct OtlpHttpExporter {
    client: reqwest::Client,
    endpoint: String,
    service_name: String,
}

impl OtlpHttpExporter {
    /// Create an exporter targeting the given `/v1/traces` endpoint.
    pub fn new(
        endpoint: impl Into<String>,
        service_name: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ExportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExportError::Transport(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            service_name: service_name.into(),
        })
    }
}

#[async_trait]
impl SpanExporter for OtlpHttpExporter {
    async fn export(&self, batch: Vec<Span>) -> Result<(), ExportError> {
        let payload = otlp::encode_batch(&batch, &self.service_name);

        let response = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExportError::Timeout
                } else {
                    ExportError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExportError::Transport(format!("HTTP {status}: {body}")));
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "otlp-http"
    }
}

/// Exporter that archives one OTLP-JSON file per pipeline run.
///
/// The file name carries the microsecond-resolution run-start timestamp;
/// each batch is appended as one JSON line.
pub struct FileExporter {
    path: PathBuf,
    service_name: String,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl FileExporter {
    /// Create an exporter writing into `dir`, named for the current instant.
    pub fn new(dir: impl AsRef<Path>, service_name: impl Into<String>) -> Result<Self, ExportError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .map_err(|e| ExportError::Transport(format!("failed to create archive dir: {e}")))?;

        let stamp = Utc::now().format("%Y-%m-%dT%H-%M-%S%.6f");
        let path = dir.join(format!("run_{stamp}.jsonl"));

        Ok(Self {
            path,
            service_name: service_name.into(),
            writer: Mutex::new(None),
        })
    }

    /// Path of this run's archive file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SpanExporter for FileExporter {
    async fn export(&self, batch: Vec<Span>) -> Result<(), ExportError> {
        let payload = otlp::encode_batch(&batch, &self.service_name);
        let line = serde_json::to_string(&payload)
            .map_err(|e| ExportError::Serialization(e.to_string()))?;

        let mut guard = self.writer.lock().unwrap();

        if guard.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .map_err(|e| ExportError::Transport(e.to_string()))?;
            *guard = Some(BufWriter::new(file));
        }

        if let Some(writer) = guard.as_mut() {
            writeln!(writer, "{line}").map_err(|e| ExportError::Transport(e.to_string()))?;
            writer
                .flush()
                .map_err(|e| ExportError::Transport(e.to_string()))?;
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "file"
    }
}

/// Exporter that records batches in memory, for tests and local inspection.
#[derive(Debug, Default)]
pub struct MemoryExporter {
    batches: Mutex<Vec<Vec<Span>>>,
}

impl MemoryExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// All exported batches, in export order.
    pub fn batches(&self) -> Vec<Vec<Span>> {
        self.batches.lock().unwrap().clone()
    }

    /// All exported spans, flattened in export order.
    pub fn spans(&self) -> Vec<Span> {
        self.batches().into_iter().flatten().collect()
    }

    /// Total exported span count.
    pub fn span_count(&self) -> usize {
        self.batches().iter().map(|b| b.len()).sum()
    }
}

#[async_trait]
impl SpanExporter for MemoryExporter {
    async fn export(&self, batch: Vec<Span>) -> Result<(), ExportError> {
        self.batches.lock().unwrap().push(batch);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
