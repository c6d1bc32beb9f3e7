use anyhow::{Context, Result};
use ci_pipeline::{
    cache::{CacheStore, FileCacheStore, MemoryCacheStore},
    cli::{
        commands::{HistoryCommand, ListCommand, RunCommand, ValidateCommand},
        open_history,
        output::*,
        Cli, Command,
    },
    core::{config::PipelineConfig, RunStatus},
    execution::{EventBus, ExecutionEvent, JobRunner, PipelineScheduler, ShellExecutor},
    persistence::RunSummary,
    trigger::{TriggerError, TriggerEvent},
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Exit code for events that cannot be parsed
const EXIT_MALFORMED_TRIGGER: i32 = 2;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG wins over --verbose
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    // Execute command
    let code = match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::List(cmd) => list_pipelines(cmd).await?,
        Command::History(cmd) => show_history(cmd).await?,
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// Event from `--event/--branch` or `--event-file`; `None` for manual runs
fn trigger_event(cmd: &RunCommand) -> Result<Option<TriggerEvent>> {
    if let Some(path) = &cmd.event_file {
        let payload = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read event file {}", path.display()))?;
        return Ok(Some(TriggerEvent::from_json(&payload)?));
    }

    match (cmd.event, &cmd.branch) {
        (Some(kind), Some(branch)) => Ok(Some(TriggerEvent::new(kind.into(), branch)?)),
        _ => Ok(None),
    }
}

async fn run_pipeline(cmd: &RunCommand) -> Result<i32> {
    // Load pipeline config
    let config = PipelineConfig::from_file(&cmd.file).context("Failed to load pipeline config")?;
    let mut pipeline = config.to_pipeline();

    // Evaluate the trigger before doing any work
    let trigger = match trigger_event(cmd) {
        Ok(trigger) => trigger,
        Err(e) if e.downcast_ref::<TriggerError>().is_some() => {
            eprintln!("{}{}", CROSS, style(e).red());
            return Ok(EXIT_MALFORMED_TRIGGER);
        }
        Err(e) => return Err(e),
    };
    if let Some(event) = &trigger {
        if !pipeline.trigger.admits(event) {
            println!(
                "{}{} event on '{}' does not trigger {}; nothing to do",
                INFO,
                event.kind,
                event.branch,
                style(&pipeline.name).bold()
            );
            return Ok(0);
        }
    }

    // Apply overrides
    for (key, value) in &cmd.env {
        pipeline.env.insert(key.clone(), value.clone());
    }
    if let Some(limit) = cmd.max_parallel {
        pipeline.max_parallel_jobs = Some(limit as usize);
    }

    let workspace = match &cmd.workdir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("Failed to resolve current directory")?,
    };

    let cache: Arc<dyn CacheStore> = if cmd.no_cache {
        Arc::new(MemoryCacheStore::new())
    } else {
        let root = cmd.cache_dir.clone().unwrap_or_else(FileCacheStore::default_dir);
        Arc::new(FileCacheStore::new(root))
    };

    // Console progress, driven by execution events
    let progress = if cmd.json {
        indicatif::ProgressBar::hidden()
    } else {
        create_progress_bar(pipeline.jobs.len())
    };
    let bar = progress.clone();
    let quiet = cmd.json;
    let events = EventBus::new().with_handler(move |event| {
        if let ExecutionEvent::JobFinished { .. } = &event {
            bar.inc(1);
        }
        if !quiet {
            if let Some(line) = format_execution_event(&event) {
                bar.println(line);
            }
        }
    });

    // Ctrl-C cancels every job
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; cancelling run");
            on_signal.cancel();
        }
    });

    let runner = JobRunner::new(Arc::new(ShellExecutor::new()), cache, workspace).with_events(events);
    let scheduler = PipelineScheduler::new(runner);

    // The host environment is read exactly once, here
    let host_env: BTreeMap<String, String> = std::env::vars().collect();
    let result = scheduler.run(&pipeline, trigger, &host_env, &cancel).await;
    progress.finish_and_clear();

    // Save to history
    if !cmd.no_history {
        let summary = RunSummary::from_result(&result);
        match open_history().await {
            Ok(store) => {
                if let Err(e) = store.save_run(&summary).await {
                    error!("Failed to save run to history: {:#}", e);
                }
            }
            Err(e) => error!("Failed to open run history: {:#}", e),
        }
    }

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("\n{}", format_run_report(&result));
        if !cmd.no_history {
            println!(
                "{}Run saved to history (ID: {})",
                INFO,
                style(&result.run_id.to_string()[..8]).dim()
            );
        }
    }

    Ok(result.exit_code())
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<i32> {
    let result = PipelineConfig::from_file(&cmd.file);

    match result {
        Ok(config) => {
            if cmd.json {
                let data = serde_json::json!({
                    "valid": true,
                    "name": config.name,
                    "jobs": config.jobs.iter().map(|j| &j.id).collect::<Vec<_>>(),
                    "steps": config.step_count(),
                    "events": config.trigger.events,
                    "branches": config.trigger.branches,
                });
                println!("{}", serde_json::to_string_pretty(&data)?);
            } else {
                println!("{}Pipeline configuration is valid!", CHECK);
                println!("  Name: {}", style(&config.name).bold());
                println!("  Jobs: {}", style(config.jobs.len()).cyan());
                println!("  Steps: {}", style(config.step_count()).cyan());
                println!(
                    "  Triggers: {} on {}",
                    style(
                        config
                            .trigger
                            .events
                            .iter()
                            .map(|e| e.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    )
                    .cyan(),
                    style(config.trigger.branches.join(", ")).cyan()
                );
            }
            Ok(0)
        }
        Err(e) => {
            if cmd.json {
                let data = serde_json::json!({ "valid": false, "error": format!("{:#}", e) });
                println!("{}", serde_json::to_string_pretty(&data)?);
            } else {
                println!("{}Validation failed:", CROSS);
                println!("  {}", style(format!("{:#}", e)).red());
            }
            Ok(1)
        }
    }
}

async fn list_pipelines(cmd: &ListCommand) -> Result<i32> {
    let store = open_history().await?;
    let pipelines = store.list_pipelines().await?;

    if cmd.json {
        let mut json_data = Vec::new();
        for pipeline in &pipelines {
            json_data.push(serde_json::json!({
                "name": pipeline,
                "run_count": store.count_runs(pipeline).await?,
            }));
        }
        let data = serde_json::json!({ "pipelines": json_data });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(0);
    }

    if pipelines.is_empty() {
        println!("{}No pipelines found in history", INFO);
        return Ok(0);
    }

    println!("{}Pipelines in history:", INFO);
    for pipeline_name in &pipelines {
        if cmd.with_counts {
            let runs = store.count_runs(pipeline_name).await?;
            let recent = store.list_runs(Some(pipeline_name), runs).await?;
            let passed = recent.iter().filter(|r| r.status == RunStatus::Success).count();
            println!(
                "  {} ({} runs: {} passed, {} not passed)",
                style(pipeline_name).bold(),
                style(runs).cyan(),
                style(passed).green(),
                style(runs - passed).red()
            );
        } else {
            println!("  {}", style(pipeline_name).bold());
        }
    }

    Ok(0)
}

async fn show_history(cmd: &HistoryCommand) -> Result<i32> {
    let store = open_history().await?;

    // If a specific run is requested
    if let Some(run_id) = &cmd.run_id {
        let run_id = uuid::Uuid::parse_str(run_id).context("Invalid run ID format")?;
        match store.load_run(run_id).await? {
            Some(summary) if cmd.json => println!("{}", serde_json::to_string_pretty(&summary)?),
            Some(summary) => print_run_details(&summary),
            None => {
                println!("{}Run not found", WARN);
                return Ok(1);
            }
        }
        return Ok(0);
    }

    let runs = store.list_runs(cmd.pipeline.as_deref(), cmd.limit).await?;

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(0);
    }

    if runs.is_empty() {
        println!("{}No runs found", INFO);
        return Ok(0);
    }

    println!("{}Run history (showing latest {}):", INFO, cmd.limit);
    for summary in &runs {
        println!("  {}", format_run_summary(summary));
    }

    Ok(0)
}

fn print_run_details(summary: &RunSummary) {
    println!("{}Run Details", INFO);
    println!("  ID: {}", style(summary.run_id).cyan());
    println!("  Pipeline: {}", style(&summary.pipeline_name).bold());
    println!("  Status: {}", format_status(summary.status));
    if let Some(trigger) = &summary.trigger {
        println!("  Trigger: {}", style(trigger).cyan());
    }
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    println!("  Finished: {}", style(summary.finished_at.to_rfc3339()).dim());
    println!("  Duration: {:.1}s", summary.duration_secs());
    println!(
        "  Jobs: {} total, {} passed, {} failed, {} cancelled",
        summary.total_jobs,
        style(summary.succeeded_jobs).green(),
        style(summary.failed_jobs).red(),
        style(summary.cancelled_jobs).yellow()
    );
    if !summary.failed_job_ids.is_empty() {
        println!("  Failed jobs: {}", style(summary.failed_job_ids.join(", ")).red());
    }
}
