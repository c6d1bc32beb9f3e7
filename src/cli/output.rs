//! CLI output formatting

use crate::{
    core::{JobOutcome, JobResult, RunResult, RunStatus, StepOutcome},
    execution::ExecutionEvent,
    persistence::RunSummary,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::fmt::Write;
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");
pub static PACKAGE: Emoji<'_, '_> = Emoji("📦 ", "* ");

/// Lines of captured output shown for a failing step
pub const FAILURE_OUTPUT_LINES: usize = 20;

/// Create a progress bar counting finished jobs
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} jobs {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a run status for display
pub fn format_status(status: RunStatus) -> String {
    match status {
        RunStatus::Success => style("SUCCESS").green().to_string(),
        RunStatus::Failure => style("FAILURE").red().to_string(),
        RunStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

/// Format a step outcome for display
pub fn format_step_outcome(outcome: &StepOutcome) -> String {
    match outcome {
        StepOutcome::Succeeded => style("ok").green().to_string(),
        StepOutcome::Restored => style("restored").cyan().to_string(),
        StepOutcome::Skipped { reason } => style(format!("skipped ({})", reason)).dim().to_string(),
        StepOutcome::Failed { exit_code: Some(code) } => {
            style(format!("failed (exit {})", code)).red().to_string()
        }
        StepOutcome::Failed { exit_code: None } => style("failed (killed by signal)").red().to_string(),
        StepOutcome::TimedOut { after_ms } => style(format!(
            "timed out after {}",
            format_duration(Duration::from_millis(*after_ms))
        ))
        .red()
        .to_string(),
        StepOutcome::InfrastructureFailure { reason } => {
            style(format!("infrastructure failure: {}", reason)).magenta().to_string()
        }
        StepOutcome::Cancelled => style("cancelled").yellow().to_string(),
    }
}

/// Format a job outcome for display
pub fn format_job_outcome(outcome: &JobOutcome) -> String {
    match outcome {
        JobOutcome::Success => format!("{}{}", CHECK, style("passed").green()),
        JobOutcome::Cancelled => format!("{}{}", WARN, style("cancelled").yellow()),
        JobOutcome::Failure { step_id, .. } => match step_id {
            Some(step) => format!("{}{} at {}", CROSS, style("failed").red(), style(step).bold()),
            None => format!("{}{}", CROSS, style("failed").red()),
        },
    }
}

/// Format an execution event as a progress line
///
/// Returns `None` for events that are only interesting in the logs.
pub fn format_execution_event(event: &ExecutionEvent) -> Option<String> {
    match event {
        ExecutionEvent::RunStarted {
            run_id,
            pipeline_name,
            job_count,
        } => Some(format!(
            "{}Starting pipeline {} with {} jobs ({})",
            ROCKET,
            style(pipeline_name).bold(),
            job_count,
            style(&run_id.to_string()[..8]).dim()
        )),
        ExecutionEvent::StepSkipped {
            job_id,
            step_id,
            reason,
        } => Some(format!(
            "{}{}/{} {}",
            SKIP,
            style(job_id).dim(),
            style(step_id).dim(),
            style(reason).dim()
        )),
        ExecutionEvent::CacheHit { job_id, step_id, key } => Some(format!(
            "{}{}/{} cache hit {}",
            PACKAGE,
            style(job_id).cyan(),
            step_id,
            style(&key[..key.len().min(12)]).dim()
        )),
        ExecutionEvent::StepFinished {
            job_id,
            step_id,
            outcome,
            duration,
        } if !outcome.is_success() => Some(format!(
            "{}{}/{} {} ({})",
            CROSS,
            style(job_id).red(),
            step_id,
            format_step_outcome(outcome),
            format_duration(*duration)
        )),
        ExecutionEvent::JobFinished {
            job_id,
            outcome,
            duration,
        } => Some(format!(
            "{} {} ({})",
            style(job_id).bold(),
            format_job_outcome(outcome),
            style(format_duration(*duration)).dim()
        )),
        _ => None,
    }
}

fn write_failure(report: &mut String, job: &JobResult) {
    let step = job.failing_step().or_else(|| job.steps.last());
    let _ = writeln!(
        report,
        "  {} {}",
        style(&job.job_id).bold(),
        format_job_outcome(&job.outcome)
    );
    if let Some(step) = step {
        let _ = writeln!(report, "    {}", format_step_outcome(&step.outcome));
        let output = format_output(&step.output, FAILURE_OUTPUT_LINES);
        for line in output.lines() {
            let _ = writeln!(report, "    │ {}", line);
        }
    }
}

/// Format the final report for a run
///
/// Lists every job, then the output of failing steps, keeping failures of
/// the code under test apart from failures of the pipeline itself.
pub fn format_run_report(result: &RunResult) -> String {
    let mut report = String::new();

    let _ = writeln!(report, "{}", style("Jobs").bold().underlined());
    for job in &result.jobs {
        let _ = writeln!(
            report,
            "  {:<20} {:<8} {} {}",
            job.job_id,
            job.platform.as_str(),
            format_job_outcome(&job.outcome),
            style(format_duration(job.duration)).dim()
        );
        for step in &job.steps {
            let _ = writeln!(
                report,
                "      {:<18} {}",
                step.step_id,
                format_step_outcome(&step.outcome)
            );
        }
    }

    let verification = result.verification_failures();
    if !verification.is_empty() {
        let _ = writeln!(report, "\n{}", style("Verification failures").red().bold());
        for job in verification {
            write_failure(&mut report, job);
        }
    }

    let infrastructure = result.infrastructure_failures();
    if !infrastructure.is_empty() {
        let _ = writeln!(report, "\n{}", style("Infrastructure failures").magenta().bold());
        for job in infrastructure {
            write_failure(&mut report, job);
        }
    }

    let icon = match result.status {
        RunStatus::Success => CHECK,
        RunStatus::Failure => CROSS,
        RunStatus::Cancelled => WARN,
    };
    let _ = write!(
        report,
        "\n{}{} {} in {}",
        icon,
        style(&result.pipeline_name).bold(),
        format_status(result.status),
        format_duration(result.duration())
    );

    report
}

/// Format a run summary for history listings
pub fn format_run_summary(summary: &RunSummary) -> String {
    let status_icon = match summary.status {
        RunStatus::Success => CHECK,
        RunStatus::Failure => CROSS,
        RunStatus::Cancelled => WARN,
    };

    let mut line = format!(
        "{}{} - {} - {} - {}/{} jobs passed - {}",
        status_icon,
        style(&summary.run_id.to_string()[..8]).dim(),
        style(&summary.pipeline_name).bold(),
        format_status(summary.status),
        summary.succeeded_jobs,
        summary.total_jobs,
        style(summary.started_at.format("%Y-%m-%d %H:%M:%S")).dim()
    );
    if !summary.failed_job_ids.is_empty() {
        let _ = write!(line, " - failed: {}", style(summary.failed_job_ids.join(", ")).red());
    }
    line
}

/// Format step output, keeping only the last `max_lines` lines
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.trim_end().to_string()
    } else {
        let kept = lines[lines.len() - max_lines..].join("\n");
        format!(
            "{} ({} earlier lines)\n{}",
            style("[truncated]").dim(),
            lines.len() - max_lines,
            kept
        )
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs == 0 {
        format!("{}ms", duration.as_millis())
    } else if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
