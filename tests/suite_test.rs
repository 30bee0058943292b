//! Suite driver and scenario execution end to end against scripted nodes

mod helpers;

use futures::future::BoxFuture;
use futures::FutureExt;
use helpers::*;
use regression_runner::coordinator::{FragmentState, SecretEntries};
use regression_runner::core::{
    ErrorCodes, LeakSurface, RunContext, RunStatus, ScenarioError, ScenarioStatus,
};
use regression_runner::execution::{ScenarioExecutor, SchedulingStrategy, SuiteDriver, SuiteEvent};
use regression_runner::report::{InMemoryReport, ReportSink};
use regression_runner::scenarios::{self, Scenario, ScenarioContext};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const DEMO: &str = "demo";

fn passing(_ctx: Arc<ScenarioContext>) -> BoxFuture<'static, Result<(), ScenarioError>> {
    async { Ok(()) }.boxed()
}

fn failing(_ctx: Arc<ScenarioContext>) -> BoxFuture<'static, Result<(), ScenarioError>> {
    async {
        Err(ScenarioError::Command {
            command: "SELECT 1".to_string(),
            exit_code: 1,
        })
    }
    .boxed()
}

fn panicking(_ctx: Arc<ScenarioContext>) -> BoxFuture<'static, Result<(), ScenarioError>> {
    async {
        if true {
            panic!("unexpected state");
        }
        Ok(())
    }
    .boxed()
}

fn slow(_ctx: Arc<ScenarioContext>) -> BoxFuture<'static, Result<(), ScenarioError>> {
    async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(())
    }
    .boxed()
}

fn demo_scenarios() -> Vec<Scenario> {
    vec![
        Scenario::new(DEMO, "passing", "RQ.Demo.Pass", passing),
        Scenario::new(DEMO, "failing", "RQ.Demo.Fail", failing),
        Scenario::new(DEMO, "panicking", "RQ.Demo.Panic", panicking),
    ]
}

fn driver(strategy: SchedulingStrategy, xfails: HashMap<String, String>) -> SuiteDriver {
    let context = context_for(FakeNode::new("clickhouse1"));
    SuiteDriver::new(ScenarioExecutor::new(context).with_xfails(xfails), strategy)
}

fn record_events(driver: &SuiteDriver) -> Arc<Mutex<Vec<SuiteEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    driver.add_event_handler(move |event| sink.lock().unwrap().push(event));
    events
}

#[tokio::test]
async fn test_sequential_run_records_every_outcome() {
    let driver = driver(SchedulingStrategy::Sequential, HashMap::new());
    let events = record_events(&driver);

    let report = driver
        .run(DEMO, demo_scenarios(), &RunContext::new(Duration::from_secs(60)))
        .await;

    let names: Vec<&str> = report.records.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["demo/passing", "demo/failing", "demo/panicking"]);
    assert_eq!(report.records[0].status, ScenarioStatus::Passed);
    assert!(report.records[1].status.is_failure());
    match &report.records[2].status {
        ScenarioStatus::Failed { error } => assert!(error.contains("unexpected state")),
        other => panic!("unexpected status {:?}", other),
    }
    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.summary(), "fail: 2, passed: 1, xfail: 0, skipped: 0");

    let events = events.lock().unwrap();
    assert!(matches!(events[0], SuiteEvent::SuiteStarted { total: 3, .. }));
    assert!(matches!(events.last(), Some(SuiteEvent::SuiteCompleted { status: RunStatus::Failed, .. })));
    let finished = events
        .iter()
        .filter(|e| matches!(e, SuiteEvent::ScenarioFinished { .. }))
        .count();
    assert_eq!(finished, 3);
}

#[tokio::test]
async fn test_xfail_keeps_run_green() {
    let mut xfails = HashMap::new();
    xfails.insert("demo/failing".to_string(), "known server bug".to_string());
    xfails.insert("panicking".to_string(), "flaky".to_string());
    let driver = driver(SchedulingStrategy::Sequential, xfails);

    let report = driver
        .run(DEMO, demo_scenarios(), &RunContext::new(Duration::from_secs(60)))
        .await;

    match &report.records[1].status {
        ScenarioStatus::XFailed { reason, .. } => assert_eq!(reason, "known server bug"),
        other => panic!("unexpected status {:?}", other),
    }
    assert_eq!(report.records[2].status.token(), "XFAIL");
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.status.state_token(), "success");
}

#[tokio::test]
async fn test_expired_deadline_skips_everything() {
    let driver = driver(SchedulingStrategy::Sequential, HashMap::new());
    let events = record_events(&driver);

    let report = driver
        .run(DEMO, demo_scenarios(), &RunContext::new(Duration::ZERO))
        .await;

    assert_eq!(report.status, RunStatus::TimedOut);
    assert_eq!(report.skipped(), 3);
    assert!(report
        .records
        .iter()
        .all(|r| r.status.message() == "global deadline exceeded"));

    let events = events.lock().unwrap();
    assert!(events.iter().any(|e| matches!(e, SuiteEvent::DeadlineExceeded { .. })));
    assert!(!events.iter().any(|e| matches!(e, SuiteEvent::ScenarioStarted { .. })));
}

#[tokio::test]
async fn test_parallel_run_keeps_registry_order() {
    let driver = driver(SchedulingStrategy::LimitedParallel(4), HashMap::new());
    let names = ["one", "two", "three", "four"];
    let scenarios: Vec<Scenario> = names
        .into_iter()
        .map(|name| Scenario::new(DEMO, name, "RQ.Demo.Slow", slow))
        .collect();

    let started = std::time::Instant::now();
    let report = driver
        .run(DEMO, scenarios, &RunContext::new(Duration::from_secs(60)))
        .await;

    // four 50ms scenarios in flight together
    assert!(started.elapsed() < Duration::from_millis(180));
    let recorded: Vec<&str> = report.records.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(recorded, vec!["demo/one", "demo/two", "demo/three", "demo/four"]);
    assert_eq!(report.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_scenario_timeout_is_a_failure() {
    let context = context_for(FakeNode::new("clickhouse1"));
    let executor = ScenarioExecutor::new(context).with_timeout(Duration::from_millis(10));

    let record = executor
        .execute(&Scenario::new(DEMO, "slow", "RQ.Demo.Slow", slow))
        .await;

    match record.status {
        ScenarioStatus::Failed { error } => assert!(error.contains("did not finish within 10ms"), "{}", error),
        other => panic!("unexpected status {:?}", other),
    }
}

fn stuck_inside_config(ctx: Arc<ScenarioContext>) -> BoxFuture<'static, Result<(), ScenarioError>> {
    async move {
        let entries = SecretEntries::new().with("literal_password", "secret_password");
        let fragment = ctx.secrets_fragment(&entries);
        ctx.with_config(&fragment, async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(())
        })
        .await
    }
    .boxed()
}

fn stuck_inside_mysql_table(ctx: Arc<ScenarioContext>) -> BoxFuture<'static, Result<(), ScenarioError>> {
    async move {
        ctx.with_mysql_table("secrets_table", "secrets_user", "pw", async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(())
        })
        .await
    }
    .boxed()
}

#[tokio::test]
async fn test_timed_out_scenario_still_removes_its_fragment() {
    let node = FakeNode::reloading("clickhouse1");
    let context = context_for(node.clone());
    let executor = ScenarioExecutor::new(context.clone()).with_timeout(Duration::from_millis(100));

    let record = executor
        .execute(&Scenario::new(DEMO, "stuck", "RQ.Demo.Stuck", stuck_inside_config))
        .await;

    match &record.status {
        ScenarioStatus::Failed { error } => assert!(error.contains("100ms"), "{}", error),
        other => panic!("unexpected status {:?}", other),
    }
    assert_eq!(node.commands.count("cat > "), 1);
    assert_eq!(node.commands.count("rm -rf /etc/clickhouse-server/config.d/secrets.xml"), 1);
    assert_eq!(context.coordinator().state(), FragmentState::Reverted);
    assert_eq!(context.coordinator().outstanding(), None);

    // nothing is left over for the next scenario
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(node.commands.count("rm -rf"), 1);
}

#[tokio::test]
async fn test_timed_out_scenario_still_drops_mysql_fixture() {
    let node = FakeNode::reloading("clickhouse1");
    let mysql = FakeNode::new("mysql1");
    let context = Arc::new(
        ScenarioContext::new(node.clone(), fast_settings(), ErrorCodes::default())
            .with_mysql_node(mysql.clone()),
    );
    let executor = ScenarioExecutor::new(context).with_timeout(Duration::from_millis(100));

    let record = executor
        .execute(&Scenario::new(DEMO, "stuck", "RQ.Demo.Stuck", stuck_inside_mysql_table))
        .await;

    assert!(record.status.is_failure());
    assert_eq!(mysql.commands.count("CREATE USER secrets_user"), 1);
    assert_eq!(mysql.commands.count("DROP USER IF EXISTS secrets_user"), 1);
    // once before creating it, once on recovery
    assert_eq!(mysql.commands.count("DROP TABLE IF EXISTS secrets_table"), 2);
    assert_eq!(node.commands.count("rm -rf"), 0);
}

fn select_scenario() -> Scenario {
    scenarios::select(&["config/select".to_string()])
        .pop()
        .unwrap()
}

#[tokio::test]
async fn test_select_secret_scenario_passes() {
    let node = FakeNode::reloading("clickhouse1");
    node.queries.on(
        "SELECT secret('literal_password')",
        vec![exit(48, "Code: 48. DB::Exception: Serialization is not implemented")],
    );
    let executor = ScenarioExecutor::new(context_for(node.clone()));

    let record = executor.execute(&select_scenario()).await;

    assert_eq!(record.status, ScenarioStatus::Passed, "{:?}", record.status);
    assert_eq!(record.requirement, "RQ.SRS-021.Secrets.Select");

    // the fragment went in and came back out
    let commands = node.commands.calls();
    assert!(commands[0].contains("<literal_password>secret_password</literal_password>"));
    assert!(commands.iter().any(|c| c.starts_with("rm -rf ")));
    assert_eq!(node.queries.count("system.query_log"), 1);
}

#[tokio::test]
async fn test_select_secret_scenario_detects_leak() {
    let node = FakeNode::new("clickhouse1");
    node.commands
        .on("preprocessed_configs", vec![ok(""), exit(1, "")]);
    node.commands.on("head -c", vec![exit(1, "")]);
    node.queries.on(
        "SELECT secret('literal_password')",
        vec![exit(48, "DB::Exception: Serialization is not implemented")],
    );
    node.queries
        .on("system.query_log", vec![ok("{\"query\": \"secret_password\"}")]);

    let driver = SuiteDriver::new(
        ScenarioExecutor::new(context_for(node.clone())),
        SchedulingStrategy::Sequential,
    );
    let report = driver
        .run("secrets", vec![select_scenario()], &RunContext::new(Duration::from_secs(60)))
        .await;

    assert_eq!(report.status, RunStatus::Failed);
    let message = report.records[0].status.message().to_string();
    assert!(message.contains(&LeakSurface::QueryHistory.to_string()), "{}", message);
    // cleanup still happened
    assert_eq!(node.commands.count("rm -rf"), 1);

    let sink = InMemoryReport::new();
    sink.write(&report).await.unwrap();
    assert_eq!(sink.reports().await[0].failed(), 1);
}

#[tokio::test]
async fn test_wrong_error_code_fails_scenario() {
    let node = FakeNode::reloading("clickhouse1");
    node.queries
        .on("SELECT secret('literal_password')", vec![ok("secret_password")]);
    let executor = ScenarioExecutor::new(context_for(node.clone()));

    let record = executor.execute(&select_scenario()).await;

    match record.status {
        ScenarioStatus::Failed { error } => assert!(error.contains("Expected exit code 48 but got 0")),
        other => panic!("unexpected status {:?}", other),
    }
}
