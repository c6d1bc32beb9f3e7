//! CLI command definitions

use crate::trigger::EventKind;
use clap::Args;
use std::path::PathBuf;

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Event that triggered the run; without one the pipeline runs unconditionally
    #[arg(long, value_enum, requires = "branch", conflicts_with = "event_file")]
    pub event: Option<EventKindArg>,

    /// Target branch of the event
    #[arg(long, requires = "event")]
    pub branch: Option<String>,

    /// JSON event record, e.g. {"kind": "push", "branch": "main"}
    #[arg(long)]
    pub event_file: Option<PathBuf>,

    /// Environment overrides (KEY=VALUE), layered over the pipeline env
    #[arg(long = "env", value_parser = parse_key_value)]
    pub env: Vec<(String, String)>,

    /// Workspace root jobs run in (defaults to the current directory)
    #[arg(long)]
    pub workdir: Option<PathBuf>,

    /// Cache directory
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Use a throwaway in-memory cache
    #[arg(long, conflicts_with = "cache_dir")]
    pub no_cache: bool,

    /// Maximum number of jobs executing at once
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    pub max_parallel: Option<u16>,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,

    /// Print the run result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List pipelines with recorded runs
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Show run counts
    #[arg(long)]
    pub with_counts: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline name to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a single run
    #[arg(long)]
    pub run_id: Option<String>,
}

/// Event kind argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum EventKindArg {
    Push,
    #[value(name = "pull-request", alias = "pull_request")]
    PullRequest,
}

impl From<EventKindArg> for EventKind {
    fn from(arg: EventKindArg) -> Self {
        match arg {
            EventKindArg::Push => EventKind::Push,
            EventKindArg::PullRequest => EventKind::PullRequest,
        }
    }
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
