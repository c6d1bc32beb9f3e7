//! Execution state and result models

use crate::core::job::Platform;
use crate::trigger::TriggerEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Category of a job failure
///
/// Verification failures mean the code under test is broken; infrastructure
/// failures mean the pipeline itself could not do its work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A step's command exited with a non-zero status
    Verification,
    /// A step exceeded its time allowance
    Timeout,
    /// The step could not be run at all (spawn error, missing directory, crashed runner)
    Infrastructure,
}

impl FailureKind {
    /// Timeouts are reported as a flavour of verification failure
    pub fn is_verification(&self) -> bool {
        matches!(self, FailureKind::Verification | FailureKind::Timeout)
    }
}

/// Terminal state of a single step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    /// Command ran and exited with status 0
    Succeeded,
    /// Command was not run because its artifact was restored from the cache
    Restored,
    /// Activation predicate evaluated to false
    Skipped { reason: String },
    /// Command exited non-zero (or was killed by a signal)
    Failed { exit_code: Option<i32> },
    /// Command exceeded its timeout and was killed
    TimedOut { after_ms: u64 },
    /// Command could not be started
    InfrastructureFailure { reason: String },
    /// Run was cancelled while the command was in flight
    Cancelled,
}

impl StepOutcome {
    /// Whether the job may continue past this step
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            StepOutcome::Succeeded | StepOutcome::Restored | StepOutcome::Skipped { .. }
        )
    }

    /// The failure category for failing outcomes
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            StepOutcome::Failed { .. } => Some(FailureKind::Verification),
            StepOutcome::TimedOut { .. } => Some(FailureKind::Timeout),
            StepOutcome::InfrastructureFailure { .. } => Some(FailureKind::Infrastructure),
            _ => None,
        }
    }
}

/// Result of running (or skipping) one step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub outcome: StepOutcome,
    /// Combined stdout/stderr in arrival order
    pub output: String,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

impl StepResult {
    pub fn new(step_id: &str, outcome: StepOutcome, output: String, started_at: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            step_id: step_id.to_string(),
            outcome,
            output,
            started_at,
            duration,
        }
    }

    /// A step whose predicate was false
    pub fn skipped(step_id: &str, reason: impl Into<String>) -> Self {
        Self::new(
            step_id,
            StepOutcome::Skipped { reason: reason.into() },
            String::new(),
            Utc::now(),
            Duration::ZERO,
        )
    }

    /// A step that never got to start its command
    pub fn infrastructure_failure(step_id: &str, reason: impl Into<String>, started_at: DateTime<Utc>, duration: Duration) -> Self {
        let reason = reason.into();
        Self::new(
            step_id,
            StepOutcome::InfrastructureFailure { reason: reason.clone() },
            reason,
            started_at,
            duration,
        )
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    /// Exit code of the command, when it ran to completion
    pub fn exit_code(&self) -> Option<i32> {
        match self.outcome {
            StepOutcome::Succeeded => Some(0),
            StepOutcome::Failed { exit_code } => exit_code,
            _ => None,
        }
    }
}

/// Terminal state of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Success,
    Failure {
        kind: FailureKind,
        /// Step that stopped the job; `None` when the job itself could not run
        step_id: Option<String>,
    },
    Cancelled,
}

/// Result of one job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: String,
    pub platform: Platform,
    pub outcome: JobOutcome,
    /// Step results in execution order; steps after a failure are absent
    pub steps: Vec<StepResult>,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

impl JobResult {
    /// A job whose runner died or could not be started
    pub fn infrastructure_failure(job_id: &str, platform: Platform, reason: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            platform,
            outcome: JobOutcome::Failure {
                kind: FailureKind::Infrastructure,
                step_id: None,
            },
            steps: vec![StepResult::infrastructure_failure(
                "<runner>",
                reason,
                Utc::now(),
                Duration::ZERO,
            )],
            started_at: Utc::now(),
            duration: Duration::ZERO,
        }
    }

    /// A job cancelled before it got a chance to start
    pub fn cancelled_before_start(job_id: &str, platform: Platform) -> Self {
        Self {
            job_id: job_id.to_string(),
            platform,
            outcome: JobOutcome::Cancelled,
            steps: Vec::new(),
            started_at: Utc::now(),
            duration: Duration::ZERO,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == JobOutcome::Success
    }

    pub fn is_cancelled(&self) -> bool {
        self.outcome == JobOutcome::Cancelled
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match &self.outcome {
            JobOutcome::Failure { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// The step that stopped the job, if any
    pub fn failing_step(&self) -> Option<&StepResult> {
        match &self.outcome {
            JobOutcome::Failure { step_id: Some(id), .. } => {
                self.steps.iter().find(|s| &s.step_id == id)
            }
            _ => None,
        }
    }

    /// Get the result for a step
    pub fn step(&self, step_id: &str) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }
}

/// Aggregate status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failure,
    Cancelled,
}

impl RunStatus {
    /// Fold job outcomes into a run status
    ///
    /// Any failed job makes the run a failure, even when other jobs were
    /// cancelled. The run is cancelled only when nothing failed.
    pub fn aggregate<'a>(jobs: impl IntoIterator<Item = &'a JobResult>) -> Self {
        let mut status = RunStatus::Success;
        for job in jobs {
            match job.outcome {
                JobOutcome::Success => {}
                JobOutcome::Cancelled => status = RunStatus::Cancelled,
                JobOutcome::Failure { .. } => return RunStatus::Failure,
            }
        }
        status
    }

    /// Process exit code for this status
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Success => 0,
            RunStatus::Failure => 1,
            RunStatus::Cancelled => 130,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Failure => "failure",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(RunStatus::Success),
            "failure" => Ok(RunStatus::Failure),
            "cancelled" => Ok(RunStatus::Cancelled),
            other => Err(format!("unknown run status: {}", other)),
        }
    }
}

/// Terminal, immutable result of one triggered run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub trigger: Option<TriggerEvent>,
    pub status: RunStatus,
    /// One entry per declared job, in declaration order
    pub jobs: Vec<JobResult>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunResult {
    pub fn new(
        run_id: Uuid,
        pipeline_name: String,
        trigger: Option<TriggerEvent>,
        jobs: Vec<JobResult>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let status = RunStatus::aggregate(&jobs);
        Self {
            run_id,
            pipeline_name,
            trigger,
            status,
            jobs,
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }

    /// Get the result for a job
    pub fn job(&self, job_id: &str) -> Option<&JobResult> {
        self.jobs.iter().find(|j| j.job_id == job_id)
    }

    /// Jobs whose code failed verification (including timeouts)
    pub fn verification_failures(&self) -> Vec<&JobResult> {
        self.jobs
            .iter()
            .filter(|j| j.failure_kind().is_some_and(|k| k.is_verification()))
            .collect()
    }

    /// Jobs the pipeline itself could not run
    pub fn infrastructure_failures(&self) -> Vec<&JobResult> {
        self.jobs
            .iter()
            .filter(|j| j.failure_kind() == Some(FailureKind::Infrastructure))
            .collect()
    }

    pub fn duration(&self) -> Duration {
        self.finished_at
            .signed_duration_since(self.started_at)
            .to_std()
            .unwrap_or_default()
    }
}
