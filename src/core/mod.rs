//! Core domain models

pub mod config;
pub mod context;
pub mod error;
pub mod retry;
pub mod state;

pub use config::{ErrorCodes, RunParams, RunnerConfig, SuiteConfig};
pub use context::RunContext;
pub use error::{EnvironmentError, LeakSurface, NodeError, ScenarioError};
pub use retry::{retry, RetryBudget, RetryExhausted, RetryLimit};
pub use state::{RunReport, RunStatus, ScenarioRecord, ScenarioStatus};
