//! Config change coordinator against a scripted node

mod helpers;

use futures::FutureExt;
use helpers::*;
use regression_runner::coordinator::{
    ChangeMode, ConfigCoordinator, ConfigFragment, CoordinatorSettings, FragmentOptions,
    FragmentState, SecretEntries,
};
use regression_runner::core::ScenarioError;
use std::panic::AssertUnwindSafe;

fn fragment() -> ConfigFragment {
    let entries = SecretEntries::new().with("literal_password", "secret_password");
    ConfigFragment::secrets(&entries, &FragmentOptions::default())
}

#[tokio::test]
async fn test_apply_waits_for_artifact_and_reload_line() {
    let node = FakeNode::reloading("clickhouse1");
    node.set_log_size(1000);
    let coordinator = ConfigCoordinator::new(node.clone(), fast_settings());
    let fragment = fragment();

    coordinator.apply(&fragment).await.unwrap();

    assert_eq!(coordinator.state(), FragmentState::Reloaded);
    let calls = node.commands.calls();
    assert!(calls[0].starts_with("cat > /etc/clickhouse-server/config.d/secrets.xml <<'FRAGMENT_"));
    assert!(calls[0].contains(&fragment.correlation_id));
    assert_eq!(node.commands.count(&format!("grep -q -F -- {}", fragment.correlation_id)), 1);

    // the reload line is searched only past the offset captured before the write
    let reload = calls.iter().find(|c| c.contains("ConfigReloader")).unwrap();
    assert!(reload.starts_with("tail -c +1001 "));
    assert_eq!(node.stops(), 0);
}

#[tokio::test]
async fn test_apply_times_out_when_marker_never_appears() {
    let node = FakeNode::new("clickhouse1");
    node.commands.on("preprocessed_configs", vec![exit(1, "")]);
    let coordinator = ConfigCoordinator::new(node.clone(), fast_settings());

    let err = coordinator.apply(&fragment()).await.unwrap_err();

    assert!(matches!(err, ScenarioError::NotObserved { .. }), "got {:?}", err);
    assert_eq!(coordinator.state(), FragmentState::ReloadPending);
    assert!(node.commands.count("preprocessed_configs") > 1);
    assert_eq!(node.commands.count("ConfigReloader"), 0);
}

#[tokio::test]
async fn test_scoped_reverts_after_body_error() {
    let node = FakeNode::reloading("clickhouse1");
    let coordinator = ConfigCoordinator::new(node.clone(), fast_settings());
    let fragment = fragment();

    let err = coordinator
        .scoped(&fragment, ChangeMode::Temporary, async {
            Err::<(), _>(ScenarioError::Command {
                command: "SELECT 1".to_string(),
                exit_code: 2,
            })
        })
        .await
        .unwrap_err();

    assert!(matches!(err, ScenarioError::Command { exit_code: 2, .. }));
    assert_eq!(coordinator.state(), FragmentState::Reverted);
    assert_eq!(node.commands.count("rm -rf /etc/clickhouse-server/config.d/secrets.xml"), 1);
    // once for the apply, then polled until the marker was gone
    assert_eq!(node.commands.count("preprocessed_configs"), 2);
}

#[tokio::test]
async fn test_scoped_reverts_when_apply_fails() {
    let node = FakeNode::new("clickhouse1");
    node.commands.on("preprocessed_configs", vec![exit(1, "")]);
    let coordinator = ConfigCoordinator::new(node.clone(), fast_settings());

    let mut ran = false;
    let err = coordinator
        .scoped(&fragment(), ChangeMode::Temporary, async {
            ran = true;
            Ok(())
        })
        .await
        .unwrap_err();

    assert!(!ran);
    assert!(matches!(err, ScenarioError::NotObserved { .. }));
    assert_eq!(node.commands.count("rm -rf"), 1);
    assert_eq!(coordinator.state(), FragmentState::Reverted);
}

#[tokio::test]
async fn test_scoped_persist_leaves_fragment() {
    let node = FakeNode::reloading("clickhouse1");
    let coordinator = ConfigCoordinator::new(node.clone(), fast_settings());

    let value = coordinator
        .scoped(&fragment(), ChangeMode::Persist, async { Ok(7) })
        .await
        .unwrap();

    assert_eq!(value, 7);
    assert_eq!(coordinator.state(), FragmentState::Reloaded);
    assert_eq!(node.commands.count("rm -rf"), 0);
}

#[tokio::test]
async fn test_scoped_cleans_up_before_resuming_panic() {
    let node = FakeNode::reloading("clickhouse1");
    let coordinator = ConfigCoordinator::new(node.clone(), fast_settings());
    let fragment = fragment();

    let outcome = AssertUnwindSafe(coordinator.scoped(&fragment, ChangeMode::Temporary, async {
        if node.commands.count("rm -rf") == 0 {
            panic!("scenario body blew up");
        }
        Ok(())
    }))
    .catch_unwind()
    .await;

    assert!(outcome.is_err());
    assert_eq!(node.commands.count("rm -rf"), 1);
    assert_eq!(coordinator.state(), FragmentState::Reverted);
}

#[tokio::test]
async fn test_restart_mode_bounces_the_node() {
    let node = FakeNode::reloading("clickhouse1");
    node.set_log_size(42);
    let settings = CoordinatorSettings {
        restart: true,
        ..fast_settings()
    };
    let coordinator = ConfigCoordinator::new(node.clone(), settings);

    coordinator.apply(&fragment()).await.unwrap();

    assert_eq!(node.stops(), 1);
    assert_eq!(node.starts(), 1);
    let calls = node.commands.calls();
    let reload = calls.iter().find(|c| c.contains("ConfigReloader")).unwrap();
    assert!(reload.starts_with("tail -c +43 "));
}

#[tokio::test]
async fn test_expect_rejected_removes_fragment() {
    let node = FakeNode::new("clickhouse1");
    let coordinator = ConfigCoordinator::new(node.clone(), fast_settings());

    coordinator.expect_rejected(&fragment()).await.unwrap();

    let calls = node.commands.calls();
    assert!(calls[0].starts_with("printf '%s' "));
    assert!(calls[0].ends_with("> /var/log/clickhouse-server/clickhouse-server.err.log"));
    assert!(calls
        .iter()
        .any(|c| c.starts_with("tail -n 30 ") && c.contains("Failed to merge config with")));
    assert!(calls.last().unwrap().starts_with("rm -rf "));
    assert_eq!(coordinator.state(), FragmentState::Removed);
}

#[tokio::test]
async fn test_expect_rejected_accepted_config_still_removed() {
    let node = FakeNode::new("clickhouse1");
    node.commands.on("tail -n 30", vec![exit(1, "")]);
    let coordinator = ConfigCoordinator::new(node.clone(), fast_settings());

    let err = coordinator.expect_rejected(&fragment()).await.unwrap_err();

    assert!(matches!(err, ScenarioError::NotObserved { .. }));
    assert_eq!(node.commands.count("rm -rf"), 1);
}

#[tokio::test]
async fn test_failed_write_reports_command() {
    let node = FakeNode::new("clickhouse1");
    node.commands.on("cat > ", vec![exit(1, "Permission denied")]);
    let coordinator = ConfigCoordinator::new(node.clone(), fast_settings());

    let err = coordinator.apply(&fragment()).await.unwrap_err();

    match err {
        ScenarioError::Command { command, exit_code } => {
            assert_eq!(exit_code, 1);
            assert!(command.starts_with("cat > "));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(coordinator.state(), FragmentState::Absent);
}

#[tokio::test]
async fn test_recover_reverts_fragment_of_abandoned_scope() {
    let node = FakeNode::reloading("clickhouse1");
    let coordinator = ConfigCoordinator::new(node.clone(), fast_settings());
    let fragment = fragment();

    let abandoned = tokio::time::timeout(
        std::time::Duration::from_millis(50),
        coordinator.scoped(&fragment, ChangeMode::Temporary, async {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            Ok(())
        }),
    )
    .await;

    assert!(abandoned.is_err());
    assert_eq!(coordinator.outstanding(), Some(fragment.correlation_id.clone()));
    assert_eq!(node.commands.count("rm -rf"), 0);

    assert!(coordinator.recover().await.unwrap());
    assert_eq!(node.commands.count("rm -rf"), 1);
    assert_eq!(coordinator.state(), FragmentState::Reverted);
    assert_eq!(coordinator.outstanding(), None);
    assert!(!coordinator.recover().await.unwrap());
}

#[tokio::test]
async fn test_recover_leaves_persisted_fragment() {
    let node = FakeNode::reloading("clickhouse1");
    let coordinator = ConfigCoordinator::new(node.clone(), fast_settings());

    coordinator
        .scoped(&fragment(), ChangeMode::Persist, async { Ok(()) })
        .await
        .unwrap();

    assert!(!coordinator.recover().await.unwrap());
    assert_eq!(node.commands.count("rm -rf"), 0);
}

#[tokio::test]
async fn test_recover_removes_rejected_fragment_without_waiting() {
    let node = FakeNode::new("clickhouse1");
    node.commands.on("tail -n 30", vec![exit(1, "")]);
    let coordinator = ConfigCoordinator::new(node.clone(), fast_settings());
    let fragment = fragment();

    let abandoned = tokio::time::timeout(
        std::time::Duration::from_millis(50),
        coordinator.expect_rejected(&fragment),
    )
    .await;

    assert!(abandoned.is_err());
    assert!(coordinator.recover().await.unwrap());
    assert_eq!(node.commands.count("rm -rf"), 1);
    assert_eq!(node.commands.count("preprocessed_configs"), 0);
    assert_eq!(coordinator.state(), FragmentState::Removed);
}
