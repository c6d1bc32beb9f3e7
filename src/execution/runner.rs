//! Job runner - executes one job's steps in order with fail-fast semantics

use crate::{
    cache::{CacheError, CacheKey, CacheStore},
    core::{CacheDirective, ExecutionContext, Job, JobOutcome, JobResult, Step, StepOutcome, StepResult},
    execution::{EventBus, ExecutionEvent, StepExecutor},
};
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Runs a single job against a step executor and a shared cache
#[derive(Clone)]
pub struct JobRunner {
    executor: Arc<dyn StepExecutor>,
    cache: Arc<dyn CacheStore>,
    events: EventBus,
    workspace: PathBuf,
}

impl JobRunner {
    pub fn new(
        executor: Arc<dyn StepExecutor>,
        cache: Arc<dyn CacheStore>,
        workspace: impl Into<PathBuf>,
    ) -> Self {
        Self {
            executor,
            cache,
            events: EventBus::new(),
            workspace: workspace.into(),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Root directory job working directories are resolved against
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Run every step of `job` in declared order
    ///
    /// The first failing step stops the job. Steps after it produce no
    /// result. Cancellation is checked before each step and interrupts the
    /// step in flight.
    pub async fn run(
        &self,
        job: &Job,
        base_env: &BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> JobResult {
        let started_at = Utc::now();
        let start = Instant::now();

        info!("Starting job {} ({}) on {}", job.id, job.name, job.platform);
        self.events.emit(ExecutionEvent::JobStarted {
            job_id: job.id.clone(),
        });

        let context = ExecutionContext::for_job(job, base_env, &self.workspace);
        let mut steps = Vec::with_capacity(job.steps.len());
        let mut outcome = JobOutcome::Success;

        for step in &job.steps {
            if cancel.is_cancelled() {
                info!("Job {} cancelled before step {}", job.id, step.id);
                outcome = JobOutcome::Cancelled;
                break;
            }

            if !step.condition.evaluate(&context) {
                let reason = format!("condition `{}` is false", step.condition.describe());
                info!("Skipping step {}/{}: {}", job.id, step.id, reason);
                self.events.emit(ExecutionEvent::StepSkipped {
                    job_id: job.id.clone(),
                    step_id: step.id.clone(),
                    reason: reason.clone(),
                });
                steps.push(StepResult::skipped(&step.id, reason));
                continue;
            }

            info!("Running step {}/{}", job.id, step.id);
            self.events.emit(ExecutionEvent::StepStarted {
                job_id: job.id.clone(),
                step_id: step.id.clone(),
            });

            let step_context = context.for_step(step);
            let result = self.run_step(step, &step_context, cancel).await;

            self.events.emit(ExecutionEvent::StepFinished {
                job_id: job.id.clone(),
                step_id: step.id.clone(),
                outcome: result.outcome.clone(),
                duration: result.duration,
            });

            let stop = match &result.outcome {
                StepOutcome::Cancelled => Some(JobOutcome::Cancelled),
                other => other.failure_kind().map(|kind| JobOutcome::Failure {
                    kind,
                    step_id: Some(step.id.clone()),
                }),
            };
            steps.push(result);

            if let Some(stop) = stop {
                outcome = stop;
                break;
            }
        }

        let duration = start.elapsed();
        match &outcome {
            JobOutcome::Success => info!("Job {} succeeded in {:?}", job.id, duration),
            JobOutcome::Cancelled => info!("Job {} cancelled after {:?}", job.id, duration),
            JobOutcome::Failure { kind, step_id } => error!(
                "Job {} failed at step {} ({:?})",
                job.id,
                step_id.as_deref().unwrap_or("<none>"),
                kind
            ),
        }
        self.events.emit(ExecutionEvent::JobFinished {
            job_id: job.id.clone(),
            outcome: outcome.clone(),
            duration,
        });

        JobResult {
            job_id: job.id.clone(),
            platform: job.platform,
            outcome,
            steps,
            started_at,
            duration,
        }
    }

    async fn run_step(
        &self,
        step: &Step,
        context: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> StepResult {
        let Some(directive) = &step.cache else {
            return self.execute(step, context, cancel).await;
        };

        let key = match CacheKey::for_directive(directive, context).await {
            Ok(key) => key,
            Err(e) => {
                warn!("Cache key for step {}/{} unavailable: {}", context.job_id, step.id, e);
                return self.execute(step, context, cancel).await;
            }
        };
        debug!("Step {}/{} cache key {}", context.job_id, step.id, key);

        match self.cache.get(&key).await {
            Ok(Some(blob)) => {
                info!("Cache hit for {}/{} ({})", context.job_id, step.id, key.short());
                self.events.emit(ExecutionEvent::CacheHit {
                    job_id: context.job_id.clone(),
                    step_id: step.id.clone(),
                    key: key.to_string(),
                });

                match materialize(directive, context, &blob).await {
                    Ok(()) if directive.restore_only => {
                        return restored(step, directive, &blob);
                    }
                    // Warm start: the command still runs, and the entry is
                    // already populated so there is nothing to store.
                    Ok(()) => return self.execute(step, context, cancel).await,
                    Err(e) => warn!(
                        "Failed to restore cache entry for {}/{}: {}",
                        context.job_id, step.id, e
                    ),
                }
            }
            Ok(None) => {
                info!("Cache miss for {}/{} ({})", context.job_id, step.id, key.short());
                self.events.emit(ExecutionEvent::CacheMiss {
                    job_id: context.job_id.clone(),
                    step_id: step.id.clone(),
                    key: key.to_string(),
                });
            }
            Err(e) => warn!("Cache lookup for {}/{} failed: {}", context.job_id, step.id, e),
        }

        let result = self.execute(step, context, cancel).await;
        if result.outcome == StepOutcome::Succeeded {
            self.store(step, directive, context, &key, &result, cancel).await;
        }
        result
    }

    async fn execute(
        &self,
        step: &Step,
        context: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> StepResult {
        self.executor
            .execute(&step.id, &step.command, context, cancel)
            .await
    }

    async fn store(
        &self,
        step: &Step,
        directive: &CacheDirective,
        context: &ExecutionContext,
        key: &CacheKey,
        result: &StepResult,
        cancel: &CancellationToken,
    ) {
        if cancel.is_cancelled() {
            warn!(
                "Run cancelled; not storing cache entry for {}/{}",
                context.job_id, step.id
            );
            return;
        }

        let blob = match &directive.path {
            Some(path) => match tokio::fs::read(context.resolve(path)).await {
                Ok(blob) => blob,
                Err(e) => {
                    warn!(
                        "Cache artifact {} for {}/{} unreadable: {}",
                        path, context.job_id, step.id, e
                    );
                    return;
                }
            },
            None => result.output.clone().into_bytes(),
        };

        match self.cache.put(key, blob).await {
            Ok(()) => {
                debug!("Stored cache entry {} for {}/{}", key.short(), context.job_id, step.id);
                self.events.emit(ExecutionEvent::CacheStored {
                    job_id: context.job_id.clone(),
                    step_id: step.id.clone(),
                    key: key.to_string(),
                });
            }
            Err(e) => warn!("Failed to store cache entry for {}/{}: {}", context.job_id, step.id, e),
        }
    }
}

/// Write a cached blob back to the directive's artifact path
async fn materialize(
    directive: &CacheDirective,
    context: &ExecutionContext,
    blob: &[u8],
) -> Result<(), CacheError> {
    let Some(path) = &directive.path else {
        return Ok(());
    };
    let target = context.resolve(path);
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&target, blob).await?;
    debug!("Restored {} ({} bytes)", target.display(), blob.len());
    Ok(())
}

fn restored(step: &Step, directive: &CacheDirective, blob: &[u8]) -> StepResult {
    let output = match &directive.path {
        Some(path) => format!("Restored {} from cache\n", path),
        None => String::from_utf8_lossy(blob).into_owned(),
    };
    StepResult::new(&step.id, StepOutcome::Restored, output, Utc::now(), Duration::ZERO)
}
