//! Scenario and run outcome models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Overall run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Run has not started
    Pending,
    /// Scenarios are executing
    Running,
    /// Every scenario passed or failed as expected
    Completed,
    /// At least one scenario failed
    Failed,
    /// The global deadline hit before every scenario ran
    TimedOut,
}

impl RunStatus {
    /// Token written to the status file
    pub fn state_token(&self) -> &'static str {
        match self {
            RunStatus::Completed => "success",
            _ => "failure",
        }
    }
}

/// Outcome of a single scenario
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScenarioStatus {
    Passed,
    Failed { error: String },
    /// Failed, but listed in the suite's xfails
    XFailed { error: String, reason: String },
    /// Never started
    Skipped { reason: String },
}

impl ScenarioStatus {
    /// Token written to the results file
    pub fn token(&self) -> &'static str {
        match self {
            ScenarioStatus::Passed => "OK",
            ScenarioStatus::Failed { .. } => "FAIL",
            ScenarioStatus::XFailed { .. } => "XFAIL",
            ScenarioStatus::Skipped { .. } => "SKIPPED",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ScenarioStatus::Passed => "",
            ScenarioStatus::Failed { error } => error,
            ScenarioStatus::XFailed { reason, .. } => reason,
            ScenarioStatus::Skipped { reason } => reason,
        }
    }

    /// Whether this outcome counts against the run
    pub fn is_failure(&self) -> bool {
        matches!(self, ScenarioStatus::Failed { .. })
    }
}

/// One row of the results table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioRecord {
    pub name: String,
    pub suite: String,
    pub requirement: String,
    pub status: ScenarioStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub duration: Duration,
}

/// Aggregated outcome of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub suite: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub records: Vec<ScenarioRecord>,
}

impl RunReport {
    pub fn new(suite: impl Into<String>) -> Self {
        Self {
            suite: suite.into(),
            status: RunStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            records: Vec::new(),
        }
    }

    fn count(&self, token: &str) -> usize {
        self.records.iter().filter(|r| r.status.token() == token).count()
    }

    pub fn passed(&self) -> usize {
        self.count("OK")
    }

    pub fn failed(&self) -> usize {
        self.count("FAIL")
    }

    pub fn xfailed(&self) -> usize {
        self.count("XFAIL")
    }

    pub fn skipped(&self) -> usize {
        self.count("SKIPPED")
    }

    /// Settle the final status from the records
    pub fn finish(&mut self, timed_out: bool) {
        self.status = if timed_out {
            RunStatus::TimedOut
        } else if self.failed() > 0 {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
        self.completed_at = Some(Utc::now());
    }

    /// Human-readable summary for the status file
    pub fn summary(&self) -> String {
        let counts = format!(
            "fail: {}, passed: {}, xfail: {}, skipped: {}",
            self.failed(),
            self.passed(),
            self.xfailed(),
            self.skipped()
        );
        match self.status {
            RunStatus::TimedOut => format!("Timeout, {}", counts),
            _ => counts,
        }
    }
}
