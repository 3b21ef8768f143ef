//! norn: cross-process tracing harness for staged pipelines
//!
//! Each pipeline stage runs as its own short-lived process. norn gives every
//! stage the same observability spine: load the trace context from the
//! carrier, open the stage span, run the stage's call with instrumented
//! retries, hand the context off, and flush spans to the collector before
//! exit.

mod config;
mod stage;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use config::{CONFIG_FILE, Config, NORN_DIR};
use norn_llm::{HttpBackend, HttpBackendConfig, LlmBackend, MockBackend, TokioSleeper};
use norn_trace::{
    BatchConfig, ExportPipeline, FileCarrier, FileExporter, OtlpHttpExporter, SpanExporter,
    StagePosition, Tracer,
};
use stage::StageSpec;

/// Service name reported to the collector.
const SERVICE_NAME: &str = "norn-pipeline";

/// Default OpenAI-compatible base URLs per provider.
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

/// Cross-process tracing harness for staged pipelines
#[derive(Parser)]
#[command(name = "norn")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to .norn directory (default: search for .norn/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one pipeline stage
    Run {
        /// Stage name, used as the span name (e.g. "plan")
        #[arg(long)]
        stage: String,

        /// Stage position: first, intermediate, or last
        #[arg(long)]
        position: StagePosition,

        /// Goal text, required for the first stage
        #[arg(long)]
        goal: Option<String>,

        /// Prompt for this stage's call (default: the goal text)
        #[arg(long)]
        prompt: Option<String>,

        /// Collector endpoint override for this run
        #[arg(long)]
        collector: Option<String>,
    },

    /// Initialize a new .norn directory with a config file
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },
}

/// Initialize logging for interactive commands. Logs to stderr.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Initialize logging for stage runs. Logs to rotating files in
/// `.norn/logs/` so stage stdout stays clean for the pipeline.
fn init_file_logging(norn_dir: &Path, verbose: bool) {
    let logs_dir = norn_dir.join("logs");

    if let Err(e) = std::fs::create_dir_all(&logs_dir) {
        eprintln!("Warning: Failed to create logs directory: {}", e);
        init_logging(verbose);
        return;
    }

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &logs_dir, "norn.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Store guard in a static to prevent it from being dropped
    // (dropping the guard would stop logging)
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(_guard);

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .with(filter)
        .init();
}

/// Create a backend from the configured provider.
fn create_backend(config: &Config) -> Result<Arc<dyn LlmBackend>> {
    match config.llm.provider.as_str() {
        "mock" => Ok(Arc::new(MockBackend::with_text(
            "mock response for local runs",
        ))),
        provider @ ("openai" | "gemini") => {
            let Some(api_key) = config.resolve_api_key() else {
                bail!(
                    "API key required for provider '{provider}'. Set [llm] api_key or the {}_API_KEY env var.",
                    provider.to_uppercase()
                );
            };
            let base_url = config.llm.base_url.clone().unwrap_or_else(|| {
                match provider {
                    "gemini" => GEMINI_BASE_URL,
                    _ => OPENAI_BASE_URL,
                }
                .to_string()
            });
            Ok(Arc::new(HttpBackend::new(HttpBackendConfig::new(
                provider, api_key, base_url,
            ))?))
        }
        other => bail!("Unknown provider: {}", other),
    }
}

/// Create the span exporter: OTLP when an endpoint is known, otherwise a
/// per-run archive file.
fn create_exporter(
    config: &Config,
    norn_dir: &Path,
    override_endpoint: Option<String>,
) -> Result<Arc<dyn SpanExporter>> {
    let endpoint = override_endpoint.or_else(|| config.collector.endpoint.clone());

    match endpoint {
        Some(endpoint) => {
            let timeout = std::time::Duration::from_millis(config.collector.shutdown_timeout_ms);
            Ok(Arc::new(OtlpHttpExporter::new(
                endpoint,
                SERVICE_NAME,
                timeout,
            )?))
        }
        None => {
            let archive_dir = config.resolve_archive_dir(norn_dir);
            Ok(Arc::new(FileExporter::new(archive_dir, SERVICE_NAME)?))
        }
    }
}

/// Locate the config, preferring an explicit `--config` directory.
fn load_config(explicit: Option<&Path>) -> Result<(Config, PathBuf)> {
    if let Some(norn_dir) = explicit {
        let config = Config::from_file(&norn_dir.join(CONFIG_FILE))?;
        return Ok((config, norn_dir.to_path_buf()));
    }

    match Config::find_and_load()? {
        Some(found) => Ok(found),
        // No config found: defaults, with .norn in the current directory.
        None => Ok((Config::default(), PathBuf::from(NORN_DIR))),
    }
}

fn cmd_init(force: bool) -> Result<()> {
    let norn_dir = PathBuf::from(NORN_DIR);
    let config_path = norn_dir.join(CONFIG_FILE);

    if config_path.exists() && !force {
        bail!(
            "{} already exists. Use --force to overwrite.",
            config_path.display()
        );
    }

    std::fs::create_dir_all(&norn_dir)?;
    let content = toml::to_string_pretty(&Config::default())?;
    std::fs::write(&config_path, content)?;

    tracing::info!("Wrote {}", config_path.display());
    println!("Initialized {}", config_path.display());
    Ok(())
}

async fn cmd_run(
    cli_config: Option<PathBuf>,
    verbose: bool,
    stage: String,
    position: StagePosition,
    goal: Option<String>,
    prompt: Option<String>,
    collector: Option<String>,
) -> Result<()> {
    let (config, norn_dir) = load_config(cli_config.as_deref())?;
    std::fs::create_dir_all(&norn_dir)?;
    init_file_logging(&norn_dir, verbose);

    let errors = config.validate();
    if !errors.is_empty() {
        for error in &errors {
            eprintln!("Config error: {error}");
        }
        bail!("invalid configuration");
    }

    let backend = create_backend(&config)?;
    let exporter = create_exporter(&config, &norn_dir, collector)?;
    let batch_config: BatchConfig = config.batch_config();
    let (sink, pipeline) = ExportPipeline::spawn(exporter, batch_config);

    let tracer = Tracer::new(sink);
    let carrier = FileCarrier::new(config.resolve_carrier_path(&norn_dir));
    let sleeper = TokioSleeper;
    let spec = StageSpec {
        name: stage,
        position,
        goal,
        prompt,
    };

    // On a termination signal the stage future is dropped, which closes the
    // open stage span with its last-known status; the shutdown flush below
    // then ships everything outstanding.
    let outcome = tokio::select! {
        result = stage::run_stage(
            &config,
            &carrier,
            &tracer,
            backend.as_ref(),
            &sleeper,
            rand::random::<u64>(),
            &spec,
        ) => Some(result),
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Termination signal received; flushing spans");
            None
        }
    };

    pipeline.shutdown().await;

    match outcome {
        Some(Ok(text)) => {
            println!("{text}");
            Ok(())
        }
        Some(Err(error)) => Err(error),
        None => bail!("stage interrupted by signal"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force } => {
            init_logging(cli.verbose);
            cmd_init(force)
        }
        Commands::Run {
            stage,
            position,
            goal,
            prompt,
            collector,
        } => {
            cmd_run(
                cli.config, cli.verbose, stage, position, goal, prompt, collector,
            )
            .await
        }
    }
}
