//! Subprocess executor backed by tokio::process

use crate::process::{CommandOutput, CommandSpec, ProcessError, ProcessExecutor};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Runs commands as local subprocesses
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    /// Applied when a command does not carry its own timeout
    default_timeout: Duration,
}

impl ShellExecutor {
    /// Create a new executor
    ///
    /// # Arguments
    /// * `default_timeout` - Upper bound for commands that don't set one
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }

    fn build(&self, spec: &CommandSpec) -> Result<Command, ProcessError> {
        let mut command = Command::new(&spec.program);
        command.args(&spec.args).kill_on_drop(true);

        for (key, value) in &spec.env {
            command.env(key, value);
        }
        if let Some(dir) = &spec.current_dir {
            command.current_dir(dir);
        }

        command.stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        match &spec.log_file {
            Some(path) => {
                let log = std::fs::File::create(path)?;
                let log_err = log.try_clone()?;
                command.stdout(Stdio::from(log)).stderr(Stdio::from(log_err));
            }
            None => {
                command.stdout(Stdio::piped()).stderr(Stdio::piped());
            }
        }

        Ok(command)
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new(Duration::from_secs(600))
    }
}

#[async_trait]
impl ProcessExecutor for ShellExecutor {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ProcessError> {
        let rendered = spec.display();
        debug!("Executing: {}", rendered);

        let mut command = self.build(spec)?;
        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        if let Some(input) = &spec.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(input.as_bytes()).await?;
                // dropping closes the pipe so the child sees EOF
            }
        }

        let limit = spec.timeout.unwrap_or(self.default_timeout);
        let output = timeout(limit, child.wait_with_output())
            .await
            .map_err(|_| ProcessError::Timeout {
                command: rendered.clone(),
                timeout_secs: limit.as_secs(),
            })??;

        let exit_code = output.status.code().unwrap_or(-1);
        if exit_code == -1 {
            warn!("`{}` was terminated by a signal", rendered);
        }

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code,
        };
        debug!("`{}` exited with {}", rendered, result.exit_code);
        Ok(result)
    }
}
