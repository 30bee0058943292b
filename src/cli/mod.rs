//! Command-line interface

pub mod commands;
pub mod output;
pub mod terminal_output;

use clap::{Parser, Subcommand};
use commands::{CiCommand, InstallCommand, ListCommand, ResetCommand, RunCommand};
use std::ffi::OsString;

/// Lifecycle runner for the secrets-management regression suite
#[derive(Debug, Parser, Clone)]
#[command(name = "regression-runner")]
#[command(version = "0.1.0")]
#[command(about = "Runs the secrets-management regression suite in a sandboxed cluster", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Full CI flow: install, reset, cluster up, suite, teardown, reports
    Ci(CiCommand),

    /// Run the suite against an already running cluster
    Run(RunCommand),

    /// Install the server packages from a build directory
    Install(InstallCommand),

    /// Return the container host to a clean state
    Reset(ResetCommand),

    /// List registered scenarios
    List(ListCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commands::SchedulingStrategyArg;

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "regression-runner",
            "run",
            "--only",
            "config/select",
            "--only",
            "valid secrets",
            "--parallel",
            "3",
            "-v",
        ])
        .unwrap();

        assert!(cli.verbose);
        match cli.command {
            Command::Run(cmd) => {
                assert_eq!(cmd.only, vec!["config/select", "valid secrets"]);
                assert_eq!(cmd.parallel, Some(3));
                assert_eq!(cmd.strategy, SchedulingStrategyArg::Sequential);
                assert!(cmd.suite_file.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_install_requires_from() {
        assert!(Cli::try_parse_from(["regression-runner", "install"]).is_err());

        let cli = Cli::try_parse_from(["regression-runner", "install", "--from", "/build"]).unwrap();
        match cli.command {
            Command::Install(cmd) => assert_eq!(cmd.from.to_str(), Some("/build")),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_ci_and_reset() {
        let cli = Cli::try_parse_from(["regression-runner", "ci"]).unwrap();
        assert!(matches!(cli.command, Command::Ci(CiCommand { suite_file: None })));

        let cli = Cli::try_parse_from(["regression-runner", "reset", "--no-daemon-restart"]).unwrap();
        match cli.command {
            Command::Reset(cmd) => assert!(cmd.no_daemon_restart),
            other => panic!("unexpected command {:?}", other),
        }
    }
}
