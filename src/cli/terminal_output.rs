//! Terminal progress for suite runs
//!
//! Shows a progress bar over the scenarios and prints each event above it.

use crate::cli::output::{create_progress_bar, format_suite_event};
use crate::execution::SuiteEvent;
use console::style;
use indicatif::ProgressBar;
use std::sync::Mutex;

/// Suite event handler that drives a progress bar
#[derive(Debug, Default)]
pub struct TerminalProgress {
    bar: Mutex<Option<ProgressBar>>,
}

impl TerminalProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(bar) = self.bar.lock() {
            if let Some(bar) = bar.as_ref() {
                f(bar);
            }
        }
    }

    fn print(&self, line: String) {
        let mut printed = false;
        self.with_bar(|bar| {
            bar.println(&line);
            printed = true;
        });
        if !printed {
            println!("{}", line);
        }
    }

    /// Handle one suite event
    pub fn on_event(&self, event: &SuiteEvent) {
        match event {
            SuiteEvent::SuiteStarted { total, .. } => {
                println!("{}", format_suite_event(event));
                print_separator();
                if let Ok(mut bar) = self.bar.lock() {
                    *bar = Some(create_progress_bar(*total));
                }
            }
            SuiteEvent::ScenarioStarted { name } => {
                self.with_bar(|bar| bar.set_message(name.clone()));
            }
            SuiteEvent::ScenarioFinished { .. } | SuiteEvent::ScenarioSkipped { .. } => {
                self.print(format_suite_event(event));
                self.with_bar(|bar| bar.inc(1));
            }
            SuiteEvent::DeadlineExceeded { .. } => self.print(format_suite_event(event)),
            SuiteEvent::SuiteCompleted { .. } => {
                if let Ok(mut bar) = self.bar.lock() {
                    if let Some(bar) = bar.take() {
                        bar.finish_and_clear();
                    }
                }
                print_separator();
                println!("{}", format_suite_event(event));
            }
        }
    }
}

/// Print a horizontal rule spanning the terminal width
pub fn print_separator() {
    // Get terminal width, default to 80 if unavailable
    let width = term_size::dimensions_stdout()
        .map(|(w, _)| w)
        .unwrap_or(80);
    println!("{}", style("─".repeat(width)).dim());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RunStatus;

    #[test]
    fn test_events_without_bar_do_not_crash() {
        let progress = TerminalProgress::new();
        progress.on_event(&SuiteEvent::ScenarioStarted {
            name: "config/select".to_string(),
        });
        progress.on_event(&SuiteEvent::ScenarioSkipped {
            name: "config/select".to_string(),
            reason: "deadline".to_string(),
        });
    }

    #[test]
    fn test_full_event_sequence() {
        let progress = TerminalProgress::new();
        progress.on_event(&SuiteEvent::SuiteStarted {
            suite: "secrets".to_string(),
            total: 1,
        });
        assert!(progress.bar.lock().unwrap().is_some());

        progress.on_event(&SuiteEvent::SuiteCompleted {
            status: RunStatus::Completed,
            summary: "fail: 0, passed: 1, xfail: 0, skipped: 0".to_string(),
        });
        assert!(progress.bar.lock().unwrap().is_none());
    }
}
