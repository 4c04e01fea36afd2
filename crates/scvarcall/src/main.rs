//! scvarcall - per-cell mitochondrial variant calling
//!
//! Main entry point for the scvarcall CLI.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{debug, error, info, warn};

use scvarcall_config::{ScvarcallConfig, load_config, load_config_file};
use scvarcall_pipeline::{ProcessRunner, RunContext, StageController};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// scvarcall - checkpointed per-cell mitochondrial variant calling
#[derive(Parser, Debug)]
#[command(name = "scvarcall")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Input BAM file produced by 10X CellRanger
    #[arg(short, long)]
    pub input: PathBuf,

    /// Path to the output directory
    #[arg(short, long)]
    pub output: PathBuf,

    /// List of QC-passed barcodes
    #[arg(short, long)]
    pub barcodes: PathBuf,

    /// Configuration file to use instead of the discovered config layers
    #[arg(short, long, env = "SCVARCALL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

/// Values that mean a flag was copied from the usage text rather than filled in.
const PLACEHOLDERS: &[&str] = &["input", "output", "output_dir", "barcodes"];

fn check_path_arg(flag: &str, value: &Path) -> Result<()> {
    let text = value.to_string_lossy();
    let trimmed = text.trim();
    if trimmed.is_empty() {
        bail!("no {flag} argument was provided");
    }
    if PLACEHOLDERS.contains(&trimmed) {
        bail!("'{trimmed}' is a placeholder, not a real {flag} path");
    }
    Ok(())
}

impl Cli {
    /// Reject missing or placeholder paths before any work starts.
    fn validate(&self) -> Result<()> {
        check_path_arg("input", &self.input)?;
        check_path_arg("output", &self.output)?;
        check_path_arg("barcodes", &self.barcodes)?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Console layer on stderr, JSON layer into daily log files
    let filter = if cli.verbose {
        "scvarcall=debug,scvarcall_pipeline=debug,scvarcall_config=debug,info"
    } else {
        "scvarcall=info,scvarcall_pipeline=info,scvarcall_config=info,warn"
    };

    let log_dir = scvarcall_config::user_config_dir()
        .map(|d| d.join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"));
    let file_appender = tracing_appender::rolling::daily(&log_dir, "scvarcall.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "scvarcall=trace,scvarcall_pipeline=trace,scvarcall_config=trace,info",
                )),
        )
        .init();

    if let Err(e) = run(cli).await {
        error!("{e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    cli.validate()?;

    let config = resolve_config(cli.config.as_deref())?;
    let ctx = RunContext::new(&cli.input, &cli.output, &cli.barcodes, &config)
        .context("invalid configuration")?;
    info!(
        input = %ctx.input.display(),
        output = %ctx.output_dir.display(),
        barcodes = %ctx.qc_barcodes.display(),
        "Starting scvarcall"
    );

    let runner = ProcessRunner::new(config.scheduler().submit_command);
    let mut controller = StageController::new(&ctx, &runner);
    controller.run().await.context("pipeline aborted")?;

    info!(output = %ctx.output_dir.display(), "All stages complete");
    Ok(())
}

/// An explicit `--config` file is loaded strictly; otherwise the user and
/// project layers are merged over the built-in defaults.
fn resolve_config(explicit: Option<&Path>) -> Result<ScvarcallConfig> {
    if let Some(path) = explicit {
        let config = load_config_file(path)
            .with_context(|| format!("failed to load config file {}", path.display()))?;
        debug!(path = %path.display(), "Loaded explicit config");
        return Ok(config);
    }

    let loaded = load_config(None);
    for (source, reason) in loaded.rejected() {
        warn!(layer = %source.layer, path = %source.path.display(), "Skipping config file: {reason}");
    }
    for path in loaded.loaded_from() {
        debug!(path = %path.display(), "Loaded config layer");
    }
    Ok(loaded.config)
}
