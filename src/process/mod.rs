//! Process execution for host commands

pub mod command;
pub mod shell;

use async_trait::async_trait;
pub use command::{quote, quote_path, CommandOutput, CommandSpec, ProcessError};
pub use shell::ShellExecutor;

/// Trait for running commands - allows for different implementations
#[async_trait]
pub trait ProcessExecutor: Send + Sync {
    /// Run a command to completion and capture its result
    ///
    /// A nonzero exit code is returned as data; only spawn failures,
    /// I/O errors and timeouts are errors.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ProcessError>;

    /// Run a command and fail on nonzero exit
    async fn run_checked(&self, spec: &CommandSpec) -> Result<CommandOutput, ProcessError> {
        self.run(spec).await?.check(spec)
    }
}

#[async_trait]
impl<T: ProcessExecutor + ?Sized> ProcessExecutor for std::sync::Arc<T> {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ProcessError> {
        (**self).run(spec).await
    }
}
