//! Docker fleet controller against a scripted executor

mod helpers;

use helpers::*;
use regression_runner::core::{EnvironmentError, RetryBudget};
use regression_runner::environment::{FleetController, FleetSettings};
use std::time::Duration;

fn settings(restart_daemon: bool) -> FleetSettings {
    FleetSettings {
        restart_daemon,
        daemon_restart: RetryBudget::attempts(3, Duration::ZERO),
        sudo: false,
        ..FleetSettings::default()
    }
}

#[tokio::test]
async fn test_reset_on_empty_host_is_idempotent() {
    let executor = FakeExecutor::new();
    // nothing to kill or remove, and an empty firewall chain
    executor.script.on("docker kill", vec![exit(1, "requires at least 1 argument")]);
    executor.script.on("docker rm", vec![exit(1, "requires at least 1 argument")]);
    executor.script.on("iptables -D", vec![exit(1, "Index of deletion too big")]);
    let fleet = FleetController::new(executor.clone(), settings(false));

    let first = fleet.reset_environment().await.unwrap();
    let second = fleet.reset_environment().await.unwrap();

    assert_eq!(first, second);
    assert!(!first.containers_killed);
    assert!(!first.containers_removed);
    assert!(!first.daemon_restarted);
    assert_eq!(first.firewall_rules_flushed, 0);
    assert_eq!(executor.script.count("service docker"), 0);
}

#[tokio::test]
async fn test_reset_flushes_firewall_until_delete_fails() {
    let executor = FakeExecutor::new();
    executor.script.on(
        "iptables -D DOCKER-USER 1",
        vec![ok(""), ok(""), ok(""), exit(1, "Index of deletion too big")],
    );
    let fleet = FleetController::new(executor.clone(), settings(true));

    let report = fleet.reset_environment().await.unwrap();

    assert!(report.containers_killed);
    assert!(report.containers_removed);
    assert!(report.daemon_restarted);
    assert_eq!(report.firewall_rules_flushed, 3);
    assert_eq!(executor.script.count("iptables -D DOCKER-USER 1"), 4);

    let calls = executor.script.calls();
    let kill = calls.iter().position(|c| c.starts_with("docker kill")).unwrap();
    let remove = calls.iter().position(|c| c.starts_with("docker rm")).unwrap();
    let start = calls.iter().position(|c| c == "service docker start").unwrap();
    let flush = calls.iter().position(|c| c.starts_with("iptables -D")).unwrap();
    assert!(kill < remove && remove < start && start < flush);
}

#[tokio::test]
async fn test_unresponsive_daemon_is_fatal() {
    let executor = FakeExecutor::new();
    executor
        .script
        .on("service docker start", vec![exit(1, "Job for docker.service failed")]);
    let fleet = FleetController::new(executor.clone(), settings(true));

    let err = fleet.reset_environment().await.unwrap_err();

    assert!(matches!(err, EnvironmentError::DaemonUnresponsive { attempts: 3 }));
    assert_eq!(executor.script.count("service docker start"), 3);
    assert_eq!(executor.script.count("iptables -D"), 0);
}

#[tokio::test]
async fn test_daemon_recovers_within_budget() {
    let executor = FakeExecutor::new();
    executor.script.on("docker kill", vec![ok("")]);
    executor.script.on("docker rm", vec![ok("")]);
    executor.script.on(
        "docker ps",
        vec![exit(1, "Cannot connect to the Docker daemon"), ok("")],
    );
    executor.script.on("iptables -D", vec![exit(1, "")]);
    let fleet = FleetController::new(executor.clone(), settings(true));

    let report = fleet.reset_environment().await.unwrap();

    assert!(report.daemon_restarted);
    assert_eq!(executor.script.count("service docker start"), 2);
}

#[tokio::test]
async fn test_privileged_commands_use_sudo() {
    let executor = FakeExecutor::new();
    executor.script.on("iptables -D", vec![exit(1, "")]);
    let fleet = FleetController::new(
        executor.clone(),
        FleetSettings {
            sudo: true,
            ..settings(true)
        },
    );

    fleet.reset_environment().await.unwrap();

    assert_eq!(executor.script.count("sudo service docker start"), 1);
    assert_eq!(executor.script.count("sudo iptables -D DOCKER-USER 1"), 1);
}
