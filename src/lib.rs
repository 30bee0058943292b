//! regression-runner - lifecycle manager for the secrets-management regression suite

pub mod audit;
pub mod cli;
pub mod coordinator;
pub mod core;
pub mod environment;
pub mod execution;
pub mod process;
pub mod report;
pub mod scenarios;

// Re-export commonly used types
pub use audit::{LeakAuditor, LogWindow};
pub use coordinator::{ChangeMode, ConfigCoordinator, ConfigFragment, CoordinatorSettings};
pub use core::{
    EnvironmentError, RetryBudget, RunContext, RunReport, RunStatus, RunnerConfig, ScenarioError,
    SuiteConfig,
};
pub use environment::{ArtifactInstaller, Cluster, FleetController, Node, QueryRequest};
pub use execution::{ScenarioExecutor, SchedulingStrategy, SuiteDriver, SuiteEvent};
pub use process::{CommandOutput, CommandSpec, ProcessExecutor, ShellExecutor};
pub use report::{ReportSink, TsvReport};
pub use scenarios::{Scenario, ScenarioContext};
