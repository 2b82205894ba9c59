//! Subcommand handlers.

use anyhow::Context;
use async_trait::async_trait;
use econo_core::tracker::wait_until_settled;
use econo_core::{
    AnalysisBackend, AnalysisReport, AnalysisRequest, DatasetHandle, DatasetProfile, EconoConfig,
    ExecutionHandle, ExecutionStatus, ExecutionTracker, HttpBackend, JobError, JobOutcome,
    TrackerCallback, TrackerState,
};
use std::path::Path;
use std::sync::Arc;

use crate::render;
use crate::{AnalyzeArgs, Commands, ConfigAction};

pub async fn handle_command(
    command: Commands,
    config: EconoConfig,
    workspace: &Path,
    quiet: bool,
) -> anyhow::Result<()> {
    match command {
        Commands::Inspect { file, json } => handle_inspect(&file, json, &config).await,
        Commands::Analyze(args) => handle_analyze(args, &config, quiet).await,
        Commands::Status {
            execution_id,
            method,
            json,
        } => handle_status(&execution_id, method, json, &config).await,
        Commands::Config { action } => handle_config(action, &config, workspace),
    }
}

fn connect(config: &EconoConfig) -> anyhow::Result<Arc<dyn AnalysisBackend>> {
    let backend = HttpBackend::new(&config.backend).context("Failed to create backend client")?;
    Ok(Arc::new(backend))
}

async fn load_dataset(path: &Path) -> anyhow::Result<DatasetHandle> {
    DatasetHandle::from_path(path)
        .await
        .with_context(|| format!("Failed to read dataset {}", path.display()))
}

async fn handle_inspect(file: &Path, json: bool, config: &EconoConfig) -> anyhow::Result<()> {
    let dataset = load_dataset(file).await?;
    let backend = connect(config)?;
    let profile = backend
        .inspect(&dataset)
        .await
        .context("Dataset inspection failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&profile)?);
    } else {
        print!("{}", render::render_profile(&profile));
    }
    Ok(())
}

/// Fill in whatever the user left out from the inspection profile.
fn build_request(
    args: &AnalyzeArgs,
    dataset: DatasetHandle,
    profile: Option<&DatasetProfile>,
    config: &EconoConfig,
) -> AnalysisRequest {
    let mut request = match profile {
        Some(profile) => AnalysisRequest::from_profile(dataset, profile, args.method),
        None => AnalysisRequest::new(dataset, "", Vec::<String>::new(), args.method),
    };
    if let Some(dv) = &args.dv {
        request = request.with_dependent(dv);
    }
    if !args.predictors.is_empty() {
        request = request.with_predictors(&args.predictors);
    }

    let first = |candidates: Option<&Vec<String>>| candidates.and_then(|c| c.first()).cloned();
    if let Some(id) = args
        .panel_id
        .clone()
        .or_else(|| first(profile.map(|p| &p.auto_id_candidates)))
    {
        request = request.with_panel_id(id);
    }
    if let Some(time) = args
        .panel_time
        .clone()
        .or_else(|| first(profile.map(|p| &p.auto_time_candidates)))
    {
        request = request.with_panel_time(time);
    }

    request
        .with_research_question(
            args.research_question
                .clone()
                .unwrap_or_else(|| config.submission.research_question.clone()),
        )
        .with_report_type(
            args.report_type
                .clone()
                .unwrap_or_else(|| config.submission.report_type.clone()),
        )
}

fn needs_profile(args: &AnalyzeArgs) -> bool {
    args.dv.is_none()
        || args.predictors.is_empty()
        || (args.method.is_panel() && (args.panel_id.is_none() || args.panel_time.is_none()))
}

/// Prints progress lines to stderr as they arrive.
struct ProgressPrinter {
    quiet: bool,
}

#[async_trait]
impl TrackerCallback for ProgressPrinter {
    async fn on_state_change(&self, state: TrackerState, handle: Option<&ExecutionHandle>) {
        if self.quiet {
            return;
        }
        if let (TrackerState::Awaiting, Some(handle)) = (state, handle) {
            eprintln!("Job {handle} accepted, waiting for results...");
        }
    }

    async fn on_progress(&self, line: &str) {
        if !self.quiet {
            eprintln!("  {line}");
        }
    }

    async fn on_stream_closed(&self, _handle: &ExecutionHandle, error: Option<&JobError>) {
        if let Some(err) = error
            && !self.quiet
        {
            eprintln!("  (progress stream closed: {err}; still polling)");
        }
    }
}

async fn handle_analyze(args: AnalyzeArgs, config: &EconoConfig, quiet: bool) -> anyhow::Result<()> {
    let dataset = load_dataset(&args.file).await?;
    let backend = connect(config)?;

    let profile = if needs_profile(&args) {
        Some(
            backend
                .inspect(&dataset)
                .await
                .context("Dataset inspection failed")?,
        )
    } else {
        None
    };
    let request = build_request(&args, dataset, profile.as_ref(), config);

    if !quiet {
        eprintln!(
            "Running {} on {}: {} ~ {}",
            request.method(),
            request.dataset().file_name(),
            request.dependent(),
            request.predictors().join(" + ")
        );
    }

    let mut tracker = ExecutionTracker::new(backend, config.tracker.clone())
        .with_callback(Arc::new(ProgressPrinter { quiet }));
    let handle = tracker
        .submit(request)
        .await
        .context("Submission failed")?;

    let mut updates = tracker.subscribe();
    let settled = tokio::select! {
        snapshot = wait_until_settled(&mut updates) => Some(snapshot),
        _ = tokio::signal::ctrl_c() => None,
    };
    let Some(snapshot) = settled else {
        tracker.cancel().await;
        eprintln!("Stopped tracking job {handle}. It may still be running on the backend.");
        return Ok(());
    };

    match snapshot.outcome {
        Some(JobOutcome::Completed(report)) => print_report(&report, args.json),
        Some(JobOutcome::Failed(err)) => Err(anyhow::Error::new(err)
            .context(format!("Job {handle} failed"))),
        None => anyhow::bail!("Job {handle} ended without an outcome"),
    }
}

fn print_report(report: &AnalysisReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{}", render::render_report(report));
    }
    Ok(())
}

async fn handle_status(
    execution_id: &str,
    method: econo_core::Method,
    json: bool,
    config: &EconoConfig,
) -> anyhow::Result<()> {
    let backend = connect(config)?;
    let status = backend
        .fetch_status(&ExecutionHandle::new(execution_id))
        .await
        .context("Status request failed")?;

    match status {
        ExecutionStatus::Running { status } => {
            println!("{execution_id}: {status}");
            Ok(())
        }
        ExecutionStatus::Done(result) => {
            let report = AnalysisReport::build(&result, method);
            if !json {
                println!("{execution_id}: done\n");
            }
            print_report(&report, json)
        }
        ExecutionStatus::Error(payload) => {
            Err(anyhow::Error::new(JobError::Async { payload })
                .context(format!("Job {execution_id} failed")))
        }
    }
}

fn handle_config(action: ConfigAction, config: &EconoConfig, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".econo");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = econo_core::config::to_toml(&EconoConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let toml_str = econo_core::config::to_toml(config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}
