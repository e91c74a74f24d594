//! CLI output formatting

use crate::{
    core::ExecutionStatus,
    execution::{ExecutionEvent, StagePlan},
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");

/// Spinner shown while a stage runs
pub fn create_spinner(message: String) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    // The template is a constant; fall back to the default style if it is rejected
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed}] {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running(stage) => style(format!("RUNNING {}", stage)).yellow().to_string(),
        ExecutionStatus::Done => style("DONE").green().to_string(),
        ExecutionStatus::Failed(stage) => style(format!("FAILED at {}", stage)).red().to_string(),
    }
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::PipelineStarted { execution_id, name } => format!(
            "{} Deploying {} ({})",
            ROCKET,
            style(name).bold(),
            style(&execution_id.to_string()[..8]).dim()
        ),
        ExecutionEvent::StageStarted { stage } => {
            format!("{} {}", SPINNER, style(stage).cyan())
        }
        ExecutionEvent::ResourceReady {
            label,
            id,
            created,
            drift,
        } => {
            let verb = if *created { "created" } else { "exists" };
            let mut line = format!("  {} {} ({})", style(label).bold(), verb, style(id).dim());
            for difference in drift {
                line.push_str(&format!("\n  {} {}", WARN, style(difference).yellow()));
            }
            line
        }
        ExecutionEvent::HostFailed { stage, host, error } => format!(
            "{} {} excluded after {}: {}",
            WARN,
            style(host).yellow(),
            stage,
            style(error).dim()
        ),
        ExecutionEvent::StagePassed { stage, outputs } => {
            let mut line = format!("{} {}", CHECK, style(stage).green());
            for (key, value) in outputs {
                line.push_str(&format!("\n  {} = {}", style(key).dim(), value));
            }
            line
        }
        ExecutionEvent::StageFailed { stage, error } => {
            format!("{} {}: {}", CROSS, style(stage).red(), style(error).dim())
        }
        ExecutionEvent::StageSkipped { stage, reason } => {
            format!("{} {} ({})", SKIP, style(stage).dim(), reason)
        }
        ExecutionEvent::PipelineCompleted {
            execution_id,
            status,
        } => format!(
            "{} Run ({}) {}",
            INFO,
            style(&execution_id.to_string()[..8]).dim(),
            format_status(*status)
        ),
    }
}

/// Format a stage plan as an indented listing
pub fn format_plan(plan: &[StagePlan]) -> String {
    let mut out = String::new();
    for stage in plan {
        let target = match &stage.group {
            Some(group) => format!("on '{}'", group),
            None => "cloud".to_string(),
        };
        out.push_str(&format!("{} {}\n", style(stage.stage).bold(), style(target).dim()));
        for (index, step) in stage.steps.iter().enumerate() {
            out.push_str(&format!(
                "  {}. {} {}\n",
                index + 1,
                style(&step.label).cyan(),
                style(format!("[{}]", step.kind)).dim()
            ));
            if let Some(command) = &step.command {
                out.push_str(&format!("     $ {}\n", command));
            }
        }
    }
    out
}
