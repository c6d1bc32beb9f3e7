//! Command-line interface

pub mod commands;
pub mod output;

use crate::persistence::PersistenceBackend;
use clap::{Parser, Subcommand};
use commands::{HistoryCommand, ListCommand, RunCommand, ValidateCommand};
use std::ffi::OsString;
use std::sync::Arc;

/// CI pipeline runner
#[derive(Debug, Parser, Clone)]
#[command(name = "ci-pipeline")]
#[command(version)]
#[command(about = "Run CI pipelines: concurrent jobs, fail-fast steps, cached artifacts", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a pipeline
    Run(RunCommand),

    /// Validate a pipeline configuration
    Validate(ValidateCommand),

    /// List pipelines with recorded runs
    List(ListCommand),

    /// Show run history
    History(HistoryCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}

/// Open the run history store
#[cfg(feature = "sqlite")]
pub async fn open_history() -> anyhow::Result<Arc<dyn PersistenceBackend>> {
    let store = crate::persistence::SqliteRunStore::with_default_path().await?;
    Ok(Arc::new(store))
}

/// Open the run history store
///
/// Built without SQLite support, history only lasts for the process.
#[cfg(not(feature = "sqlite"))]
pub async fn open_history() -> anyhow::Result<Arc<dyn PersistenceBackend>> {
    tracing::warn!("Built without the sqlite feature; run history is not persisted");
    Ok(Arc::new(crate::persistence::InMemoryPersistence::new()))
}
