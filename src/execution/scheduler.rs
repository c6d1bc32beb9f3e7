//! Pipeline scheduler - runs every job of a pipeline concurrently

use crate::{
    core::{merge_env, JobResult, Pipeline, RunResult},
    execution::{ExecutionEvent, JobRunner},
    trigger::TriggerEvent,
};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

/// Starts one task per job and collects their results
///
/// Jobs are independent: one job failing never stops another, and results
/// come back in declared order whatever order the jobs finish in.
#[derive(Clone)]
pub struct PipelineScheduler {
    runner: JobRunner,
}

impl PipelineScheduler {
    pub fn new(runner: JobRunner) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &JobRunner {
        &self.runner
    }

    /// Run all jobs of `pipeline` to a terminal state
    ///
    /// `base_env` is the lowest environment layer, below the pipeline's and
    /// each job's own variables. `pipeline.max_parallel_jobs` bounds how many
    /// jobs execute at once.
    pub async fn run(
        &self,
        pipeline: &Pipeline,
        trigger: Option<TriggerEvent>,
        base_env: &BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> RunResult {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let events = self.runner.events().clone();

        info!(
            "Starting run {} of pipeline '{}' with {} jobs",
            run_id,
            pipeline.name,
            pipeline.jobs.len()
        );
        events.emit(ExecutionEvent::RunStarted {
            run_id,
            pipeline_name: pipeline.name.clone(),
            job_count: pipeline.jobs.len(),
        });

        let env = Arc::new(merge_env(base_env, &pipeline.env));
        let slots = pipeline
            .max_parallel_jobs
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));

        let mut handles = Vec::with_capacity(pipeline.jobs.len());
        for job in &pipeline.jobs {
            let runner = self.runner.clone();
            let job = job.clone();
            let env = env.clone();
            let slots = slots.clone();
            let cancel = cancel.child_token();
            let job_id = job.id.clone();
            let platform = job.platform;

            let handle = tokio::spawn(async move {
                let _slot = match slots {
                    Some(slots) => tokio::select! {
                        slot = slots.acquire_owned() => match slot {
                            Ok(slot) => Some(slot),
                            Err(_) => {
                                return JobResult::infrastructure_failure(
                                    &job.id,
                                    job.platform,
                                    "job slots closed before the job could start",
                                )
                            }
                        },
                        _ = cancel.cancelled() => {
                            info!("Job {} cancelled while waiting for a slot", job.id);
                            return JobResult::cancelled_before_start(&job.id, job.platform);
                        }
                    },
                    None => None,
                };
                runner.run(&job, &env, &cancel).await
            });
            handles.push((job_id, platform, handle));
        }

        let mut jobs = Vec::with_capacity(handles.len());
        for (job_id, platform, handle) in handles {
            match handle.await {
                Ok(result) => jobs.push(result),
                Err(e) => {
                    error!("Job {} task failed: {}", job_id, e);
                    jobs.push(JobResult::infrastructure_failure(
                        &job_id,
                        platform,
                        &format!("job task failed: {}", e),
                    ));
                }
            }
        }

        let result = RunResult::new(run_id, pipeline.name.clone(), trigger, jobs, started_at);
        info!(
            "Run {} finished with status {} in {:?}",
            run_id,
            result.status.as_str(),
            result.duration()
        );
        events.emit(ExecutionEvent::RunFinished {
            run_id,
            status: result.status,
        });
        result
    }
}
