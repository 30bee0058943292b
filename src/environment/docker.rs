//! Docker fleet controller - returns the host to a clean container state

use crate::core::{retry, EnvironmentError, RetryBudget};
use crate::process::{CommandSpec, ProcessError, ProcessExecutor};
use std::time::Duration;
use tracing::{info, warn};

/// Knobs for [`FleetController::reset_environment`]
#[derive(Debug, Clone)]
pub struct FleetSettings {
    pub restart_daemon: bool,
    /// Bound on each kill/remove command
    pub container_timeout: Duration,
    pub daemon_restart: RetryBudget,
    /// Chain emptied by the firewall flush
    pub firewall_chain: String,
    /// Hard ceiling on flush iterations
    pub firewall_max_rules: usize,
    /// Prefix privileged commands with sudo
    pub sudo: bool,
}

impl Default for FleetSettings {
    fn default() -> Self {
        Self {
            restart_daemon: true,
            container_timeout: Duration::from_secs(10 * 60),
            daemon_restart: RetryBudget::attempts(200, Duration::from_millis(500)),
            firewall_chain: "DOCKER-USER".to_string(),
            firewall_max_rules: 1000,
            sudo: true,
        }
    }
}

/// What a reset actually did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResetReport {
    pub containers_killed: bool,
    pub containers_removed: bool,
    pub daemon_restarted: bool,
    pub firewall_rules_flushed: usize,
}

/// Controls the container daemon and the firewall rules it installs
pub struct FleetController<E> {
    executor: E,
    settings: FleetSettings,
}

impl<E: ProcessExecutor> FleetController<E> {
    pub fn new(executor: E, settings: FleetSettings) -> Self {
        Self { executor, settings }
    }

    fn privileged(&self, command: &str) -> CommandSpec {
        if self.settings.sudo {
            CommandSpec::shell(format!("sudo {}", command))
        } else {
            CommandSpec::shell(command)
        }
    }

    /// Log the current firewall rules; failures are ignored
    pub async fn dump_firewall(&self, when: &str) {
        match self.executor.run(&self.privileged("iptables -L")).await {
            Ok(output) => info!("Dump iptables {}:\n{}", when, output.stdout),
            Err(e) => warn!("Could not dump iptables {}: {}", when, e),
        }
    }

    /// Kill and remove every container, optionally restart the daemon, flush the firewall
    ///
    /// Each step tolerates its own failure. The only fatal outcome is a
    /// daemon that does not come back within its retry budget.
    pub async fn reset_environment(&self) -> Result<ResetReport, EnvironmentError> {
        let mut report = ResetReport::default();

        info!("Killing all alive docker containers");
        report.containers_killed = self
            .best_effort(
                CommandSpec::shell("docker kill $(docker ps -q)")
                    .timeout(self.settings.container_timeout),
                "docker kill",
            )
            .await;

        info!("Removing all docker containers");
        report.containers_removed = self
            .best_effort(
                CommandSpec::shell("docker rm --force $(docker ps -a -q)")
                    .timeout(self.settings.container_timeout),
                "docker rm",
            )
            .await;

        if self.settings.restart_daemon {
            self.restart_daemon().await?;
            report.daemon_restarted = true;
        }

        self.dump_firewall("before clearing").await;
        report.firewall_rules_flushed = self.flush_firewall().await;
        self.dump_firewall("after clearing").await;
        Ok(report)
    }

    async fn best_effort(&self, spec: CommandSpec, what: &str) -> bool {
        match self.executor.run_checked(&spec).await {
            Ok(_) => true,
            Err(e) => {
                info!("{} excepted: {}", what, e);
                false
            }
        }
    }

    async fn restart_daemon(&self) -> Result<(), EnvironmentError> {
        info!("Stopping docker daemon");
        self.best_effort(self.privileged("service docker stop"), "docker stop")
            .await;

        let executor = &self.executor;
        let start = &self.privileged("service docker start");
        let ping = &CommandSpec::shell("docker ps");

        retry(&self.settings.daemon_restart, |attempt| async move {
            info!("Restarting docker {}", attempt);
            executor.run_checked(start).await?;
            executor.run_checked(ping).await?;
            Ok::<(), ProcessError>(())
        })
        .await
        .map_err(|exhausted| {
            warn!("Waiting docker to start, last error: {}", exhausted.last_error);
            EnvironmentError::DaemonUnresponsive {
                attempts: exhausted.attempts,
            }
        })
    }

    /// Delete rule #1 until the delete itself fails; returns rules removed
    async fn flush_firewall(&self) -> usize {
        let delete = self.privileged(&format!("iptables -D {} 1", self.settings.firewall_chain));
        let budget = RetryBudget::attempts(self.settings.firewall_max_rules, Duration::ZERO);
        let executor = &self.executor;
        let delete = &delete;

        // a failed delete means the chain is empty, which is the "success" this loop waits for
        let outcome = retry(&budget, |iteration| async move {
            match executor.run_checked(delete).await {
                Ok(_) => Err(FlushPending),
                Err(err) => Ok((iteration - 1, err)),
            }
        })
        .await;

        match outcome {
            Ok((removed, last_error)) => {
                info!(
                    "All iptables rules cleared, {} iterations, last error: {}",
                    removed, last_error
                );
                removed
            }
            Err(exhausted) => {
                warn!(
                    "Firewall chain {} still has rules after {} deletions",
                    self.settings.firewall_chain, exhausted.attempts
                );
                exhausted.attempts
            }
        }
    }
}

#[derive(Debug)]
struct FlushPending;

impl std::fmt::Display for FlushPending {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("rule deleted, chain not empty yet")
    }
}
