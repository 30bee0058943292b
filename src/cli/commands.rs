//! CLI command definitions

use crate::execution::SchedulingStrategy;
use clap::Args;
use std::path::PathBuf;

/// Full CI flow driven by the environment
#[derive(Debug, Args, Clone)]
pub struct CiCommand {
    /// Path to a suite YAML file (built-in defaults otherwise)
    #[arg(short, long)]
    pub suite_file: Option<PathBuf>,
}

/// Run the suite against an already running cluster
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to a suite YAML file (built-in defaults otherwise)
    #[arg(short, long)]
    pub suite_file: Option<PathBuf>,

    /// Only run scenarios matching these names, suites or suite/name pairs
    #[arg(long)]
    pub only: Vec<String>,

    /// Number of scenarios in flight, overrides the suite file.
    /// Every secrets scenario rewrites the same config fragment on the
    /// primary node, so values above 1 are rejected for this suite
    #[arg(long)]
    pub parallel: Option<usize>,

    /// Scheduling strategy when --parallel is not given (sequential only for this suite)
    #[arg(long, value_enum, default_value_t = SchedulingStrategyArg::Sequential)]
    pub strategy: SchedulingStrategyArg,

    /// Directory for the result files (defaults to the result path from the environment)
    #[arg(long)]
    pub result_dir: Option<PathBuf>,

    /// Repository checkout holding the compose project (defaults to the environment)
    #[arg(long)]
    pub repo_path: Option<PathBuf>,
}

/// Install the server packages
#[derive(Debug, Args, Clone)]
pub struct InstallCommand {
    /// Directory holding the built packages
    #[arg(long)]
    pub from: PathBuf,

    /// Directory the packages are unpacked into
    #[arg(long, default_value = ".")]
    pub root: PathBuf,
}

/// Reset the container host
#[derive(Debug, Args, Clone)]
pub struct ResetCommand {
    /// Skip the daemon restart even when the environment asks for it
    #[arg(long)]
    pub no_daemon_restart: bool,
}

/// List registered scenarios
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Only list scenarios matching these names or suites
    #[arg(long)]
    pub only: Vec<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Scheduling strategy argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SchedulingStrategyArg {
    Sequential,
    Parallel,
    #[clap(name = "parallel-limited")]
    ParallelLimited,
}

impl From<SchedulingStrategyArg> for SchedulingStrategy {
    fn from(arg: SchedulingStrategyArg) -> Self {
        match arg {
            SchedulingStrategyArg::Sequential => SchedulingStrategy::Sequential,
            SchedulingStrategyArg::Parallel => SchedulingStrategy::Parallel,
            SchedulingStrategyArg::ParallelLimited => SchedulingStrategy::LimitedParallel(4),
        }
    }
}

impl RunCommand {
    /// Strategy from `--parallel`, then `--strategy`, then the suite setting
    pub fn scheduling(&self, suite_parallelism: usize) -> SchedulingStrategy {
        match (self.parallel, self.strategy) {
            (Some(workers), _) => SchedulingStrategy::from_parallelism(workers),
            (None, SchedulingStrategyArg::Sequential) => {
                SchedulingStrategy::from_parallelism(suite_parallelism)
            }
            (None, arg) => arg.into(),
        }
    }
}

/// Refuse a strategy that would overlap scenarios on the shared node config
///
/// Each scenario goes through one `ConfigCoordinator`, which allows only one
/// operation per node at a time.
pub fn ensure_exclusive(strategy: SchedulingStrategy, scenarios: usize) -> anyhow::Result<()> {
    let workers = strategy.max_in_flight(scenarios);
    if workers > 1 {
        anyhow::bail!(
            "{:?} would run {} scenarios at once, but they all rewrite the config fragment on the same node; run them sequentially",
            strategy,
            workers
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_command(parallel: Option<usize>, strategy: SchedulingStrategyArg) -> RunCommand {
        RunCommand {
            suite_file: None,
            only: Vec::new(),
            parallel,
            strategy,
            result_dir: None,
            repo_path: None,
        }
    }

    #[test]
    fn test_scheduling_precedence() {
        assert_eq!(
            run_command(Some(3), SchedulingStrategyArg::Parallel).scheduling(1),
            SchedulingStrategy::LimitedParallel(3)
        );
        assert_eq!(
            run_command(None, SchedulingStrategyArg::Parallel).scheduling(1),
            SchedulingStrategy::Parallel
        );
        assert_eq!(
            run_command(None, SchedulingStrategyArg::Sequential).scheduling(2),
            SchedulingStrategy::LimitedParallel(2)
        );
        assert_eq!(
            run_command(None, SchedulingStrategyArg::Sequential).scheduling(1),
            SchedulingStrategy::Sequential
        );
    }

    #[test]
    fn test_overlapping_strategies_are_rejected() {
        assert!(ensure_exclusive(SchedulingStrategy::Sequential, 30).is_ok());
        assert!(ensure_exclusive(SchedulingStrategy::Parallel, 1).is_ok());

        let err = ensure_exclusive(run_command(Some(2), SchedulingStrategyArg::Sequential).scheduling(1), 30)
            .unwrap_err();
        assert!(err.to_string().contains("run them sequentially"));
        assert!(ensure_exclusive(SchedulingStrategy::Parallel, 2).is_err());
    }
}
