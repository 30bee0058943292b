//! Config change coordinator - applies fragments and waits for the reload

use crate::coordinator::fragment::ConfigFragment;
use crate::core::{retry, NodeError, RetryBudget, ScenarioError};
use crate::environment::node::{Node, SERVER_ERR_LOG, SERVER_LOG};
use crate::process::{quote, quote_path};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Lifecycle of a fragment on a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentState {
    Absent,
    Written,
    ReloadPending,
    Reloaded,
    Removed,
    Reverted,
}

/// Whether a scoped change is undone when its scope ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChangeMode {
    /// Remove the fragment on scope exit
    #[default]
    Temporary,
    /// Leave the fragment in place for a following scenario
    Persist,
}

/// Settings for a coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Bound on every wait (artifact update, reload line, rejection line)
    pub timeout: Duration,
    pub poll_interval: Duration,
    /// Restart the server to pick up the change instead of waiting for hot reload
    pub restart: bool,
    /// Lines of the error log inspected by the invalid-config check
    pub err_log_tail: usize,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(1),
            restart: true,
            err_log_tail: 30,
        }
    }
}

/// A fragment written to the node and not yet removed
#[derive(Debug, Clone)]
struct Outstanding {
    fragment: ConfigFragment,
    /// Whether the server accepted it, so removal has to be confirmed
    loaded: bool,
}

/// Applies and reverts config fragments on one node
///
/// Callers must not run two coordinator operations against the same node
/// concurrently.
pub struct ConfigCoordinator {
    node: Arc<dyn Node>,
    settings: CoordinatorSettings,
    state: Mutex<FragmentState>,
    outstanding: Mutex<Option<Outstanding>>,
}

impl ConfigCoordinator {
    pub fn new(node: Arc<dyn Node>, settings: CoordinatorSettings) -> Self {
        Self {
            node,
            settings,
            state: Mutex::new(FragmentState::Absent),
            outstanding: Mutex::new(None),
        }
    }

    /// State reached by the most recent operation
    pub fn state(&self) -> FragmentState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn transition(&self, fragment: &ConfigFragment, next: FragmentState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        debug!(
            "{} on {}: {:?} -> {:?}",
            fragment.display_name,
            self.node.name(),
            *state,
            next
        );
        *state = next;
    }

    fn track(&self, fragment: &ConfigFragment, loaded: bool) {
        *self.outstanding.lock().unwrap_or_else(|e| e.into_inner()) = Some(Outstanding {
            fragment: fragment.clone(),
            loaded,
        });
    }

    fn untrack(&self, fragment: &ConfigFragment) {
        let mut outstanding = self.outstanding.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(&*outstanding, Some(o) if o.fragment.correlation_id == fragment.correlation_id) {
            *outstanding = None;
        }
    }

    /// Correlation id of the fragment currently left on the node, if any
    pub fn outstanding(&self) -> Option<String> {
        self.outstanding
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|o| o.fragment.correlation_id.clone())
    }

    /// Remove a fragment left behind by an operation that never finished
    ///
    /// Used after a scenario was cancelled mid-way. Returns whether anything
    /// had to be removed. Fragments kept on purpose with `ChangeMode::Persist`
    /// are not touched.
    pub async fn recover(&self) -> Result<bool, ScenarioError> {
        let outstanding = self
            .outstanding
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let Some(Outstanding { fragment, loaded }) = outstanding else {
            return Ok(false);
        };

        warn!(
            "Recovering {} left on {} by an interrupted scenario",
            fragment.display_name,
            self.node.name()
        );
        if loaded {
            self.revert(&fragment).await?;
        } else {
            self.remove(&fragment).await?;
            self.transition(&fragment, FragmentState::Removed);
        }
        Ok(true)
    }

    fn budget(&self) -> RetryBudget {
        RetryBudget::timeout(self.settings.timeout, self.settings.poll_interval)
    }

    /// Write the fragment and block until the server has loaded it
    pub async fn apply(&self, fragment: &ConfigFragment) -> Result<(), ScenarioError> {
        info!("Adding {} to {}", fragment.display_name, self.node.name());

        let offset = if self.settings.restart {
            None
        } else {
            Some(self.node.server_log_size().await?)
        };

        self.write(fragment).await?;
        self.track(fragment, true);
        self.transition(fragment, FragmentState::Written);

        self.transition(fragment, FragmentState::ReloadPending);
        self.wait_artifact(fragment, true).await?;
        self.wait_reload(fragment, offset).await?;
        self.transition(fragment, FragmentState::Reloaded);

        info!("{} loaded on {}", fragment.display_name, self.node.name());
        Ok(())
    }

    /// Delete the fragment and block until the server has dropped it
    pub async fn revert(&self, fragment: &ConfigFragment) -> Result<(), ScenarioError> {
        info!("Removing {} from {}", fragment.display_name, self.node.name());

        let offset = if self.settings.restart {
            None
        } else {
            Some(self.node.server_log_size().await?)
        };

        self.remove(fragment).await?;
        self.transition(fragment, FragmentState::Removed);

        self.transition(fragment, FragmentState::ReloadPending);
        self.wait_artifact(fragment, false).await?;
        self.wait_reload(fragment, offset).await?;
        self.transition(fragment, FragmentState::Reverted);
        Ok(())
    }

    /// Apply `fragment`, run `body`, then revert unless `mode` is `Persist`
    ///
    /// The revert also runs when the apply itself fails, when the body
    /// returns an error, and when the body panics (the panic is resumed
    /// after cleanup).
    pub async fn scoped<T, Fut>(
        &self,
        fragment: &ConfigFragment,
        mode: ChangeMode,
        body: Fut,
    ) -> Result<T, ScenarioError>
    where
        Fut: Future<Output = Result<T, ScenarioError>>,
    {
        let outcome = match self.apply(fragment).await {
            Ok(()) => AssertUnwindSafe(body).catch_unwind().await,
            Err(e) => Ok(Err(e)),
        };

        let cleanup = match mode {
            ChangeMode::Temporary => self.revert(fragment).await,
            ChangeMode::Persist => {
                self.untrack(fragment);
                Ok(())
            }
        };

        let result = match outcome {
            Ok(result) => result,
            Err(panic) => {
                if let Err(e) = &cleanup {
                    warn!("Cleanup after panic failed: {}", e);
                }
                std::panic::resume_unwind(panic);
            }
        };

        match (result, cleanup) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(cleanup_err)) => Err(cleanup_err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(cleanup_err)) => Err(ScenarioError::Multiple(vec![err, cleanup_err])),
        }
    }

    /// Write an invalid fragment and wait for the server to reject it
    ///
    /// The fragment is always removed afterwards.
    pub async fn expect_rejected(&self, fragment: &ConfigFragment) -> Result<(), ScenarioError> {
        let message = format!(
            "Exception: Failed to merge config with '{}'",
            fragment.target_path.display()
        );

        let outcome = async {
            let filler = "-\n".repeat(self.settings.err_log_tail);
            let reset = format!("printf '%s' {} > {}", quote(&filler), SERVER_ERR_LOG);
            self.run_checked(&reset).await?;

            self.write(fragment).await?;
            self.track(fragment, false);
            self.transition(fragment, FragmentState::Written);

            let check = format!(
                "tail -n {} {} | grep -q -F -- {}",
                self.settings.err_log_tail,
                SERVER_ERR_LOG,
                quote(&message)
            );
            self.poll_exit_code(&check, 0, &format!("'{}' in {}", message, SERVER_ERR_LOG))
                .await
        }
        .await;

        let cleanup = self.remove(fragment).await;
        if cleanup.is_ok() {
            self.transition(fragment, FragmentState::Removed);
        }

        match (outcome, cleanup) {
            (Ok(()), Ok(())) => Ok(()),
            (Ok(()), Err(e)) | (Err(e), Ok(())) => Err(e),
            (Err(e), Err(cleanup_err)) => Err(ScenarioError::Multiple(vec![e, cleanup_err])),
        }
    }

    async fn write(&self, fragment: &ConfigFragment) -> Result<(), ScenarioError> {
        let delimiter = format!("FRAGMENT_{}", fragment.correlation_id);
        let script = format!(
            "cat > {} <<'{}'\n{}\n{}",
            quote_path(&fragment.target_path),
            delimiter,
            fragment.content.trim_end_matches('\n'),
            delimiter
        );
        self.run_checked(&script).await
    }

    async fn remove(&self, fragment: &ConfigFragment) -> Result<(), ScenarioError> {
        self.run_checked(&format!("rm -rf {}", quote_path(&fragment.target_path)))
            .await?;
        self.untrack(fragment);
        Ok(())
    }

    async fn run_checked(&self, script: &str) -> Result<(), ScenarioError> {
        let output = self.node.command(script).await?;
        if output.success() {
            Ok(())
        } else {
            Err(ScenarioError::Command {
                command: script.lines().next().unwrap_or_default().to_string(),
                exit_code: output.exit_code,
            })
        }
    }

    /// Poll the preprocessed artifact for the presence or absence of the marker
    async fn wait_artifact(&self, fragment: &ConfigFragment, present: bool) -> Result<(), ScenarioError> {
        let artifact = fragment.artifact_path();
        let check = format!(
            "cat {} 2>/dev/null | grep -q -F -- {}",
            quote_path(&artifact),
            fragment.correlation_id
        );
        let (expected, what) = if present {
            (0, format!("{} in {}", fragment.correlation_id, artifact.display()))
        } else {
            (1, format!("removal of {} from {}", fragment.correlation_id, artifact.display()))
        };
        self.poll_exit_code(&check, expected, &what).await
    }

    /// Wait for the reload confirmation line, restarting the node first if configured
    async fn wait_reload(&self, fragment: &ConfigFragment, offset: Option<u64>) -> Result<(), ScenarioError> {
        let offset = match offset {
            Some(offset) => offset,
            None => {
                info!("Restarting {} to apply the config change", self.node.name());
                self.node.stop().await?;
                let size = self.node.server_log_size().await?;
                self.node.start().await?;
                size
            }
        };

        let line = format!(
            "ConfigReloader: Loaded config '{}', performed update on configuration",
            fragment.server_config_dir().join("config.xml").display()
        );
        let check = format!(
            "tail -c +{} {} | grep -q -F -- {}",
            offset + 1,
            SERVER_LOG,
            quote(&line)
        );
        self.poll_exit_code(&check, 0, &format!("reload message after offset {}", offset))
            .await
    }

    async fn poll_exit_code(&self, script: &str, expected: i32, what: &str) -> Result<(), ScenarioError> {
        let node = &self.node;
        let outcome = retry(&self.budget(), |attempt| async move {
            let output = node.command(script).await?;
            if output.exit_code == expected {
                Ok(())
            } else {
                debug!("Waiting for {} (attempt {}, exit {})", what, attempt, output.exit_code);
                Err(PollError::Pending(output.exit_code))
            }
        })
        .await;

        match outcome {
            Ok(()) => Ok(()),
            Err(exhausted) => match exhausted.last_error {
                PollError::Node(e) => Err(e.into()),
                PollError::Pending(_) => Err(ScenarioError::NotObserved {
                    what: what.to_string(),
                    attempts: exhausted.attempts,
                }),
            },
        }
    }
}

#[derive(Debug)]
enum PollError {
    Pending(i32),
    Node(NodeError),
}

impl From<NodeError> for PollError {
    fn from(e: NodeError) -> Self {
        PollError::Node(e)
    }
}

impl std::fmt::Display for PollError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PollError::Pending(code) => write!(f, "exit code {}", code),
            PollError::Node(e) => write!(f, "{}", e),
        }
    }
}
