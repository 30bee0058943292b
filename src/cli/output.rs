//! CLI output formatting

use crate::core::{RunReport, RunStatus, ScenarioRecord, ScenarioStatus};
use crate::environment::ResetReport;
use crate::execution::SuiteEvent;
use crate::scenarios::Scenario;
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

/// Create a progress bar
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    if let Ok(template) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        progress.set_style(template.progress_chars("#>-"));
    }
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a scenario status for display
pub fn format_scenario_status(status: &ScenarioStatus) -> String {
    match status {
        ScenarioStatus::Passed => style("OK").green().to_string(),
        ScenarioStatus::Failed { .. } => style("FAIL").red().to_string(),
        ScenarioStatus::XFailed { .. } => style("XFAIL").yellow().to_string(),
        ScenarioStatus::Skipped { .. } => style("SKIPPED").dim().to_string(),
    }
}

/// Format a run status for display
pub fn format_status(status: RunStatus) -> String {
    match status {
        RunStatus::Pending => style("PENDING").dim().to_string(),
        RunStatus::Running => style("RUNNING").yellow().to_string(),
        RunStatus::Completed => style("COMPLETED").green().to_string(),
        RunStatus::Failed => style("FAILED").red().to_string(),
        RunStatus::TimedOut => style("TIMEOUT").red().to_string(),
    }
}

/// One line per finished scenario
pub fn format_record(record: &ScenarioRecord) -> String {
    let icon = match record.status {
        ScenarioStatus::Passed => CHECK,
        ScenarioStatus::Failed { .. } => CROSS,
        ScenarioStatus::XFailed { .. } => WARN,
        ScenarioStatus::Skipped { .. } => SKIP,
    };
    let mut line = format!(
        "{} {} {} {}",
        icon,
        format_scenario_status(&record.status),
        style(&record.name).bold(),
        style(format_duration(record.duration)).dim()
    );
    let message = record.status.message();
    if !message.is_empty() {
        line.push_str(&format!("\n    {}", style(format_output(message, 5)).dim()));
    }
    line
}

/// Format a suite event for display
pub fn format_suite_event(event: &SuiteEvent) -> String {
    match event {
        SuiteEvent::SuiteStarted { suite, total } => format!(
            "{} Starting suite {} ({} scenarios)",
            ROCKET,
            style(suite).bold(),
            style(total).cyan()
        ),
        SuiteEvent::ScenarioStarted { name } => format!("{} {}", SPINNER, style(name).cyan()),
        SuiteEvent::ScenarioFinished { record } => format_record(record),
        SuiteEvent::ScenarioSkipped { name, reason } => {
            format!("{} {} ({})", SKIP, style(name).dim(), reason)
        }
        SuiteEvent::DeadlineExceeded { elapsed } => format!(
            "{} Global deadline exceeded after {}, skipping the rest",
            WARN,
            style(format_duration(*elapsed)).yellow()
        ),
        SuiteEvent::SuiteCompleted { status, summary } => format!(
            "{} Suite {} ({})",
            INFO,
            format_status(*status),
            style(summary).dim()
        ),
    }
}

/// Final summary block for a run
pub fn format_report(report: &RunReport) -> String {
    let icon = match report.status {
        RunStatus::Completed => CHECK,
        _ => CROSS,
    };
    format!(
        "{} {} {} - {}",
        icon,
        style(&report.suite).bold(),
        format_status(report.status),
        report.summary()
    )
}

/// Format what an environment reset did
pub fn format_reset(report: &ResetReport) -> String {
    let mark = |done: bool| {
        if done {
            style("yes").green().to_string()
        } else {
            style("no").dim().to_string()
        }
    };
    format!(
        "{} Environment reset: killed {}, removed {}, daemon restarted {}, {} firewall rules flushed",
        INFO,
        mark(report.containers_killed),
        mark(report.containers_removed),
        mark(report.daemon_restarted),
        style(report.firewall_rules_flushed).cyan()
    )
}

/// Registry listing line
pub fn format_scenario(scenario: &Scenario) -> String {
    format!(
        "  {} {}",
        style(scenario.qualified_name()).bold(),
        style(scenario.requirement).dim()
    )
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{:.1}s", duration.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

/// Format command output with truncation
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.to_string()
    } else {
        let truncated = lines[..max_lines].join("\n");
        format!(
            "{}\n... ({} more lines)",
            truncated,
            lines.len() - max_lines
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }

    #[test]
    fn test_format_output_truncates() {
        let output = "1\n2\n3\n4";
        assert_eq!(format_output(output, 4), output);
        assert_eq!(format_output(output, 2), "1\n2\n... (2 more lines)");
    }

    #[test]
    fn test_format_record_includes_message() {
        let record = ScenarioRecord {
            name: "config/select".to_string(),
            suite: "config".to_string(),
            requirement: String::new(),
            status: ScenarioStatus::Failed {
                error: "boom".to_string(),
            },
            started_at: None,
            duration: Duration::from_secs(1),
        };
        let line = format_record(&record);
        assert!(line.contains("config/select"));
        assert!(line.contains("boom"));
    }
}
