//! Econo CLI: terminal client for the Econo analysis service.
//!
//! Inspects datasets, submits regression jobs, follows their progress, and
//! prints per-model and cross-model tables.

mod commands;
mod render;

use anyhow::Context;
use clap::Parser;
use econo_core::Method;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Econo: remote econometric analysis from the terminal
#[derive(Parser, Debug)]
#[command(name = "econo", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Backend base URL (overrides configuration)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum Commands {
    /// Upload a dataset and show its columns and suggested roles
    Inspect {
        /// Dataset file
        file: PathBuf,
        /// Print the raw profile as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run an analysis and wait for the results
    Analyze(AnalyzeArgs),
    /// Poll a submitted job once
    Status {
        /// Execution id returned at submission
        execution_id: String,
        /// Method the job was submitted with (labels a single-model result)
        #[arg(short, long, default_value = "ols")]
        method: Method,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct AnalyzeArgs {
    /// Dataset file
    pub file: PathBuf,

    /// Dependent variable (defaults to the inspected suggestion)
    #[arg(long)]
    pub dv: Option<String>,

    /// Comma-separated predictors (defaults to the inspected suggestions)
    #[arg(long, value_delimiter = ',')]
    pub predictors: Vec<String>,

    /// Estimator: ols, panel_fe, panel_re, panel_hausman, panel_ab
    #[arg(short, long, default_value = "ols")]
    pub method: Method,

    /// Panel entity column (required for panel methods)
    #[arg(long)]
    pub panel_id: Option<String>,

    /// Panel time column (required for panel methods)
    #[arg(long)]
    pub panel_time: Option<String>,

    /// Research question passed to the report generator
    #[arg(long)]
    pub research_question: Option<String>,

    /// Report type passed to the report generator
    #[arg(long)]
    pub report_type: Option<String>,

    /// Print the report as JSON instead of tables
    #[arg(long)]
    pub json: bool,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum ConfigAction {
    /// Create a default configuration file in the workspace
    Init,
    /// Show the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "econo", "econo")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "econo.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let mut config = econo_core::load_config(Some(&workspace), None)
        .context("Failed to load configuration")?;
    if let Some(base_url) = cli.base_url {
        config.backend.base_url = base_url;
    }
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    commands::handle_command(cli.command, config, &workspace, cli.quiet).await
}
