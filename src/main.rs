use anyhow::{Context, Result};
use regression_runner::cli::commands::{
    ensure_exclusive, CiCommand, InstallCommand, ListCommand, ResetCommand, RunCommand,
};
use regression_runner::cli::output::*;
use regression_runner::cli::terminal_output::TerminalProgress;
use regression_runner::cli::{Cli, Command};
use regression_runner::coordinator::CoordinatorSettings;
use regression_runner::core::config::{ENV_REPO_PATH, ENV_RESULT_PATH};
use regression_runner::core::{RunContext, RunParams, RunReport, RunStatus, RunnerConfig, SuiteConfig};
use regression_runner::environment::{
    ArtifactInstaller, Cluster, ClusterSettings, FleetController, FleetSettings, InstallManifest,
};
use regression_runner::execution::{ScenarioExecutor, SchedulingStrategy, SuiteDriver};
use regression_runner::process::{ProcessExecutor, ShellExecutor};
use regression_runner::report::{ReportSink, TsvReport};
use regression_runner::scenarios::{self, ScenarioContext};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    // Execute command
    match &cli.command {
        Command::Ci(cmd) => run_ci(cmd).await?,
        Command::Run(cmd) => run_suite(cmd).await?,
        Command::Install(cmd) => install(cmd).await?,
        Command::Reset(cmd) => reset(cmd).await?,
        Command::List(cmd) => list_scenarios(cmd)?,
    }

    Ok(())
}

fn load_suite(path: Option<&Path>) -> Result<SuiteConfig> {
    match path {
        Some(path) => {
            let suite = SuiteConfig::from_file(path)
                .with_context(|| format!("Failed to load suite file {}", path.display()))?;
            println!("{} Loaded suite: {}", INFO, style(&suite.name).bold());
            Ok(suite)
        }
        None => Ok(SuiteConfig::default()),
    }
}

fn executor() -> Arc<dyn ProcessExecutor> {
    Arc::new(ShellExecutor::new(Duration::from_secs(10 * 60)))
}

async fn reset_host(executor: Arc<dyn ProcessExecutor>, restart_daemon: bool) -> Result<()> {
    let settings = FleetSettings {
        restart_daemon,
        ..FleetSettings::default()
    };
    let report = FleetController::new(executor, settings)
        .reset_environment()
        .await
        .context("Failed to reset the container host")?;
    println!("{}", format_reset(&report));
    Ok(())
}

/// Build the scenario context for the suite's primary node
fn scenario_context(cluster: &Cluster, suite: &SuiteConfig) -> Result<Arc<ScenarioContext>> {
    let node = cluster
        .node(&suite.node)
        .with_context(|| format!("Node {} is not part of the cluster", suite.node))?;
    let settings = CoordinatorSettings {
        timeout: suite.reload_timeout(),
        poll_interval: suite.poll_interval(),
        restart: suite.restart_on_apply,
        ..CoordinatorSettings::default()
    };

    let mut context = ScenarioContext::new(node, settings, suite.error_codes.clone());
    match cluster.node(&suite.mysql_node) {
        Some(mysql) => context = context.with_mysql_node(mysql),
        None => warn!("MySQL node {} not found, MySQL scenarios will fail", suite.mysql_node),
    }
    Ok(Arc::new(context))
}

/// Run the selected scenarios and print the outcome
async fn drive(
    cluster: &Cluster,
    suite: &SuiteConfig,
    filters: &[String],
    strategy: SchedulingStrategy,
    run: &RunContext,
) -> Result<RunReport> {
    let mut filters = filters.to_vec();
    if filters.is_empty() {
        filters = suite.scenarios.clone();
    }
    let selected = scenarios::select(&filters);
    if selected.is_empty() {
        anyhow::bail!("No scenarios match {:?}", filters);
    }
    ensure_exclusive(strategy, selected.len())?;

    let context = scenario_context(cluster, suite)?;
    let executor = ScenarioExecutor::new(context).with_xfails(suite.xfails.clone());
    let driver = SuiteDriver::new(executor, strategy);

    let progress = Arc::new(TerminalProgress::new());
    driver.add_event_handler(move |event| progress.on_event(&event));

    println!();
    let report = driver.run(&suite.name, selected, run).await;
    println!("\n{}", format_report(&report));
    Ok(report)
}

async fn write_report(report: &RunReport, result_dir: &Path) -> Result<()> {
    TsvReport::new(result_dir)
        .write(report)
        .await
        .context("Failed to write result files")
}

async fn run_ci(cmd: &CiCommand) -> Result<()> {
    let suite = load_suite(cmd.suite_file.as_deref())?;
    let run = RunContext::new(suite.run_budget());
    let config = RunnerConfig::from_env().context("Invalid runner environment")?;
    let params = RunParams::from_file(&config.params_path)?;
    let executor = executor();

    std::fs::create_dir_all(&config.result_path)
        .with_context(|| format!("Failed to create {}", config.result_path.display()))?;

    println!("{} Installing packages from {}", ROCKET, style(config.build_path.display()).cyan());
    let manifest = InstallManifest::clickhouse(&config)?;
    let root = std::env::current_dir().context("Cannot resolve working directory")?;
    ArtifactInstaller::new(executor.clone(), root, &config.result_path)
        .install(&config.build_path, &manifest)
        .await?;
    println!("{} Packages installed", CHECK);

    reset_host(executor.clone(), config.restart_docker).await?;

    let settings = ClusterSettings::from_suite(&suite, &params, &config.repo_path);
    let cluster = Cluster::up(executor.clone(), settings)
        .await
        .context("Failed to bring up the cluster")?;

    let strategy = SchedulingStrategy::from_parallelism(suite.parallelism);
    let outcome = drive(&cluster, &suite, &suite.scenarios, strategy, &run).await;

    if let Some(archive) = cluster.collect_logs(&config.result_path).await {
        println!("{} Logs packed into {}", INFO, style(archive.display()).dim());
    }
    cluster.down().await;
    if let Err(e) = reset_host(executor.clone(), config.restart_docker).await {
        warn!("Final reset failed: {:#}", e);
    }

    let report = outcome?;
    write_report(&report, &config.result_path).await?;
    if report.status != RunStatus::Completed {
        info!("Run finished with status {:?}, see {}", report.status, config.result_path.display());
    }
    Ok(())
}

async fn run_suite(cmd: &RunCommand) -> Result<()> {
    let suite = load_suite(cmd.suite_file.as_deref())?;
    let run = RunContext::new(suite.run_budget());

    let repo_path = cmd
        .repo_path
        .clone()
        .or_else(|| std::env::var_os(ENV_REPO_PATH).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."));
    let result_dir = cmd
        .result_dir
        .clone()
        .or_else(|| std::env::var_os(ENV_RESULT_PATH).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("results"));

    let settings = ClusterSettings::from_suite(&suite, &RunParams::default(), &repo_path);
    let cluster = Cluster::attach(executor(), settings)
        .await
        .context("Failed to attach to the running cluster")?;

    let report = drive(&cluster, &suite, &cmd.only, cmd.scheduling(suite.parallelism), &run).await?;
    write_report(&report, &result_dir).await?;

    if report.status != RunStatus::Completed {
        error!("Suite {} did not pass: {}", report.suite, report.summary());
        std::process::exit(1);
    }
    Ok(())
}

async fn install(cmd: &InstallCommand) -> Result<()> {
    let config = RunnerConfig::from_env().context("Invalid runner environment")?;
    let manifest = InstallManifest::clickhouse(&config)?;

    println!("{} Installing packages from {}", ROCKET, style(cmd.from.display()).cyan());
    ArtifactInstaller::new(executor(), &cmd.root, &config.result_path)
        .install(&cmd.from, &manifest)
        .await?;

    for binary in &manifest.binaries {
        println!(
            "  {} {} -> {}",
            CHECK,
            style(binary.source.display()).bold(),
            style(binary.destination.display()).dim()
        );
    }
    Ok(())
}

async fn reset(cmd: &ResetCommand) -> Result<()> {
    reset_host(executor(), !cmd.no_daemon_restart).await
}

fn list_scenarios(cmd: &ListCommand) -> Result<()> {
    let selected = scenarios::select(&cmd.only);

    if cmd.json {
        let data: Vec<_> = selected
            .iter()
            .map(|scenario| {
                serde_json::json!({
                    "suite": scenario.suite,
                    "name": scenario.name,
                    "requirement": scenario.requirement,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    if selected.is_empty() {
        println!("{} No scenarios found", WARN);
        return Ok(());
    }

    println!("{} {} scenarios:", INFO, style(selected.len()).cyan());
    for scenario in &selected {
        println!("{}", format_scenario(scenario));
    }
    Ok(())
}
