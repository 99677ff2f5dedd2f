//! IoT Engine CLI
//!
//! Runs one batch of temperature readings through the quality engine and
//! writes the scored records plus run summary as JSON.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin iot-engine -- \
//!   --input readings.jsonl \
//!   --config engine_config.toml \
//!   --output run.json \
//!   --store runs.sqlite
//! ```
//!
//! # Exit Codes
//!
//! - 0: Success
//! - 2: Configuration error
//! - 3: Run failure (I/O, no valid records, store)

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use dotenv::dotenv;
use iot_quality_engine::engine::{EngineConfig, EngineError, Pipeline, RunOutput};
use iot_quality_engine::input::{decode_records, InputFormat};
use iot_quality_engine::store::RunStore;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// CLI ARGUMENTS
// =============================================================================

#[derive(Parser, Debug)]
#[command(name = "iot-engine")]
#[command(about = "Validate, score and summarize a batch of temperature readings")]
struct Args {
    /// Input file (JSON array or JSON lines)
    #[arg(long, short = 'i')]
    input: PathBuf,

    /// Record shape of the input file
    #[arg(long, value_enum, default_value = "auto")]
    format: InputFormat,

    /// Engine configuration (TOML). Falls back to ENGINE_CONFIG_PATH.
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Write run output here instead of stdout
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,

    /// Persist the run into this SQLite store
    #[arg(long, env = "ENGINE_STORE_PATH")]
    store: Option<PathBuf>,

    /// Reference time for freshness (RFC3339). Defaults to the current time.
    #[arg(long)]
    now: Option<String>,

    /// Only write the summary, not every record
    #[arg(long, default_value = "false")]
    summary_only: bool,
}

const EXIT_CONFIG: i32 = 2;
const EXIT_RUN: i32 = 3;

/// Failure split by exit code.
enum CliFailure {
    Config(anyhow::Error),
    Run(anyhow::Error),
}

impl From<EngineError> for CliFailure {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Configuration { .. } => CliFailure::Config(err.into()),
            other => CliFailure::Run(other.into()),
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "iot_quality_engine=info,iot_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() {
    let _ = dotenv();
    init_tracing();
    let args = Args::parse();

    match run(&args) {
        Ok(()) => {}
        Err(CliFailure::Config(e)) => {
            error!(error = %format!("{:#}", e), "Configuration error");
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(EXIT_CONFIG);
        }
        Err(CliFailure::Run(e)) => {
            error!(error = %format!("{:#}", e), "Run failed");
            eprintln!("Run failed: {:#}", e);
            std::process::exit(EXIT_RUN);
        }
    }
}

fn run(args: &Args) -> Result<(), CliFailure> {
    let config = load_config(args).map_err(CliFailure::Config)?;
    let now = parse_now(args.now.as_deref()).map_err(CliFailure::Config)?;
    let pipeline = Pipeline::new(config)?;

    let text = fs::read_to_string(&args.input)
        .with_context(|| format!("Failed to read input {}", args.input.display()))
        .map_err(CliFailure::Run)?;
    let batch = decode_records(&text, args.format).map_err(CliFailure::Run)?;
    info!(input = %args.input.display(), records = batch.len(), "Loaded input");

    let output = pipeline.run(&batch, now)?;
    if !output.rejected.is_empty() {
        warn!(rejected = output.rejected.len(), "Some records were rejected as malformed");
    }

    if let Some(path) = &args.store {
        let store = RunStore::new(path)
            .with_context(|| format!("Failed to open store {}", path.display()))
            .map_err(CliFailure::Run)?;
        store
            .persist(&output)
            .context("Failed to persist run")
            .map_err(CliFailure::Run)?;
        info!(run_id = %output.run_id, store = %path.display(), "Run persisted");
    }

    // Output goes last; a refused persist leaves no artifact.
    write_output(args, &output).map_err(CliFailure::Run)?;

    Ok(())
}

fn load_config(args: &Args) -> Result<EngineConfig> {
    match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(EngineConfig::from_env()),
    }
}

fn parse_now(value: Option<&str>) -> Result<DateTime<Utc>> {
    match value {
        Some(s) => Ok(DateTime::parse_from_rfc3339(s)
            .with_context(|| format!("Invalid --now timestamp '{}'", s))?
            .with_timezone(&Utc)),
        None => Ok(Utc::now()),
    }
}

fn write_output(args: &Args, output: &RunOutput) -> Result<()> {
    let json = if args.summary_only {
        serde_json::to_string_pretty(&output.summary)?
    } else {
        serde_json::to_string_pretty(output)?
    };

    match &args.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            writer.write_all(json.as_bytes())?;
            writer.write_all(b"\n")?;
            writer.flush()?;
            info!(output = %path.display(), "Output written");
        }
        None => {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            lock.write_all(json.as_bytes())?;
            lock.write_all(b"\n")?;
        }
    }
    Ok(())
}
