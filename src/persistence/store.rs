//! SQLite-based run history store

use crate::persistence::{PersistenceBackend, RunSummary};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

/// SQLite run store
pub struct SqliteRunStore {
    pool: SqlitePool,
}

const SELECT_COLUMNS: &str = "SELECT id, pipeline_name, status, trigger, started_at, finished_at, \
     total_jobs, succeeded_jobs, failed_jobs, cancelled_jobs, failed_job_ids FROM runs";

impl SqliteRunStore {
    /// Open (creating if needed) a database file
    pub async fn new(db_path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open run history at {}", db_path.display()))?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// A private database that lives as long as the store
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // Every connection to :memory: is a separate database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("Failed to open in-memory run history")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// `<data dir>/ci-pipeline/runs.db`
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ci-pipeline")
            .join("runs.db")
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        let db_path = Self::default_path();
        if let Some(dir) = db_path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Self::new(&db_path).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                pipeline_name TEXT NOT NULL,
                status TEXT NOT NULL,
                trigger TEXT,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL,
                total_jobs INTEGER NOT NULL DEFAULT 0,
                succeeded_jobs INTEGER NOT NULL DEFAULT 0,
                failed_jobs INTEGER NOT NULL DEFAULT 0,
                cancelled_jobs INTEGER NOT NULL DEFAULT 0,
                failed_job_ids TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_runs_pipeline_name ON runs(pipeline_name);
            CREATE INDEX IF NOT EXISTS idx_runs_started_at ON runs(started_at);
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to initialise run history schema")?;

        Ok(())
    }

    fn from_row(row: &SqliteRow) -> Result<RunSummary> {
        let failed_job_ids: String = row.try_get("failed_job_ids")?;
        let status: String = row.try_get("status")?;

        Ok(RunSummary {
            run_id: Uuid::parse_str(&row.try_get::<String, _>("id")?)?,
            pipeline_name: row.try_get("pipeline_name")?,
            status: status.parse().map_err(anyhow::Error::msg)?,
            trigger: row.try_get("trigger")?,
            started_at: row.try_get::<DateTime<Utc>, _>("started_at")?,
            finished_at: row.try_get::<DateTime<Utc>, _>("finished_at")?,
            total_jobs: row.try_get::<i64, _>("total_jobs")? as usize,
            succeeded_jobs: row.try_get::<i64, _>("succeeded_jobs")? as usize,
            failed_jobs: row.try_get::<i64, _>("failed_jobs")? as usize,
            cancelled_jobs: row.try_get::<i64, _>("cancelled_jobs")? as usize,
            failed_job_ids: serde_json::from_str(&failed_job_ids)
                .context("Corrupt failed_job_ids column")?,
        })
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for SqliteRunStore {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO runs
            (id, pipeline_name, status, trigger, started_at, finished_at,
             total_jobs, succeeded_jobs, failed_jobs, cancelled_jobs, failed_job_ids)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(run.run_id.to_string())
        .bind(&run.pipeline_name)
        .bind(run.status.as_str())
        .bind(&run.trigger)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.total_jobs as i64)
        .bind(run.succeeded_jobs as i64)
        .bind(run.failed_jobs as i64)
        .bind(run.cancelled_jobs as i64)
        .bind(serde_json::to_string(&run.failed_job_ids)?)
        .execute(&self.pool)
        .await
        .context("Failed to save run")?;

        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        let row = sqlx::query(&format!("{} WHERE id = ?1", SELECT_COLUMNS))
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load run")?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn list_runs(&self, pipeline_name: Option<&str>, limit: usize) -> Result<Vec<RunSummary>> {
        let rows = match pipeline_name {
            Some(name) => {
                sqlx::query(&format!(
                    "{} WHERE pipeline_name = ?1 ORDER BY started_at DESC LIMIT ?2",
                    SELECT_COLUMNS
                ))
                .bind(name)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!("{} ORDER BY started_at DESC LIMIT ?1", SELECT_COLUMNS))
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .context("Failed to list runs")?;

        rows.iter().map(Self::from_row).collect()
    }

    async fn count_runs(&self, pipeline_name: &str) -> Result<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM runs WHERE pipeline_name = ?1")
            .bind(pipeline_name)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count runs")?;

        Ok(row.try_get::<i64, _>("count")? as usize)
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT pipeline_name
            FROM runs
            ORDER BY pipeline_name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list pipelines")?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("pipeline_name").map_err(Into::into))
            .collect()
    }
}
