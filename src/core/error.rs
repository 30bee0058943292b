//! Error taxonomy for the runner
//!
//! `EnvironmentError` aborts the whole run. `ScenarioError` is an assertion
//! class failure: it is caught at the scenario boundary and recorded.

use crate::process::ProcessError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Fatal errors that abort the run
#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("Required environment variable {0} is not set")]
    MissingEnv(String),

    #[error("Environment variable {name} has invalid value '{value}'")]
    InvalidEnv { name: String, value: String },

    #[error("Failed to read parameters from {path}: {reason}")]
    Params { path: PathBuf, reason: String },

    #[error("Package with {prefix} not found in {dir}")]
    PackageNotFound { prefix: String, dir: PathBuf },

    #[error("Installation of {path} failed with exit code {exit_code}")]
    ExtractionFailed { path: PathBuf, exit_code: i32 },

    #[error("Docker daemon is not responding after {attempts} attempts")]
    DaemonUnresponsive { attempts: usize },

    #[error("Cluster failed to start: {0}")]
    ClusterStartup(String),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl EnvironmentError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EnvironmentError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Transport failure while talking to a node
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Node {node}: {source}")]
    Process {
        node: String,
        #[source]
        source: ProcessError,
    },

    #[error("Node {node}: unexpected output from `{command}`: {output}")]
    UnexpectedOutput {
        node: String,
        command: String,
        output: String,
    },

    #[error("Node {node} did not become ready: {reason}")]
    NotReady { node: String, reason: String },
}

/// Output surface checked by the leak auditor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeakSurface {
    ServerLog,
    ProcessList,
    QueryHistory,
}

impl std::fmt::Display for LeakSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LeakSurface::ServerLog => "server log",
            LeakSurface::ProcessList => "system.processes",
            LeakSurface::QueryHistory => "system.query_log",
        };
        f.write_str(name)
    }
}

/// Scenario-level failures, recorded rather than propagated
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("Expected exit code {expected} but got {actual} for `{query}`: {output}")]
    ExitCode {
        query: String,
        expected: i32,
        actual: i32,
        output: String,
    },

    #[error("Expected message '{expected}' not found in output of `{query}`: {output}")]
    MessageMissing {
        query: String,
        expected: String,
        output: String,
    },

    #[error("Unexpected exception from `{query}`: {output}")]
    UnexpectedException { query: String, output: String },

    #[error("{what} not observed after {attempts} attempts")]
    NotObserved { what: String, attempts: usize },

    #[error("Secret leaked into {surface}{}", .query_id.as_ref().map(|id| format!(" for query {}", id)).unwrap_or_default())]
    Leak {
        surface: LeakSurface,
        query_id: Option<String>,
    },

    #[error("Command `{command}` failed with exit code {exit_code}")]
    Command { command: String, exit_code: i32 },

    #[error("Scenario did not finish within {limit:?}")]
    TimedOut { limit: Duration },

    #[error("Scenario panicked: {0}")]
    Panicked(String),

    #[error("{}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    Multiple(Vec<ScenarioError>),

    #[error(transparent)]
    Node(#[from] NodeError),
}

impl ScenarioError {
    /// Merge a list of failures into one error, or `None` if empty
    pub fn collect(mut errors: Vec<ScenarioError>) -> Option<ScenarioError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(ScenarioError::Multiple(errors)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_single_is_unwrapped() {
        let err = ScenarioError::collect(vec![ScenarioError::Panicked("x".into())]).unwrap();
        assert!(matches!(err, ScenarioError::Panicked(_)));
        assert!(ScenarioError::collect(vec![]).is_none());
    }

    #[test]
    fn test_multiple_joins_messages() {
        let err = ScenarioError::collect(vec![
            ScenarioError::Leak {
                surface: LeakSurface::ServerLog,
                query_id: None,
            },
            ScenarioError::Leak {
                surface: LeakSurface::QueryHistory,
                query_id: Some("q1".into()),
            },
        ])
        .unwrap();

        let message = err.to_string();
        assert!(message.contains("Secret leaked into server log"));
        assert!(message.contains("system.query_log for query q1"));
    }
}
