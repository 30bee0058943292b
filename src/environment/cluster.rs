//! Compose-managed cluster and the `docker exec` backed node

use crate::core::config::{RunParams, SuiteConfig};
use crate::core::{retry, EnvironmentError, NodeError, RetryBudget};
use crate::environment::node::{Node, QueryRequest, SERVER_LOG};
use crate::process::{CommandOutput, CommandSpec, ProcessExecutor};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Directory holding the server logs inside a ClickHouse container
pub const SERVER_LOG_DIR: &str = "/var/log/clickhouse-server";

/// How a node proves it is ready to serve
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessProbe {
    /// A query through the node's SQL client must exit 0
    Query(String),
    /// A shell script inside the container must exit 0
    Command(String),
}

/// A service container reached through `docker exec`
pub struct DockerNode {
    name: String,
    container: String,
    executor: Arc<dyn ProcessExecutor>,
    /// SQL client invocation inside the container
    client: Vec<String>,
    probe: ReadinessProbe,
    readiness: RetryBudget,
    /// Host directory bind-mounted over the server log directory
    host_log_dir: Option<PathBuf>,
    command_timeout: Duration,
}

impl DockerNode {
    pub fn new(
        name: impl Into<String>,
        container: impl Into<String>,
        executor: Arc<dyn ProcessExecutor>,
    ) -> Self {
        Self {
            name: name.into(),
            container: container.into(),
            executor,
            client: vec!["clickhouse".to_string(), "client".to_string()],
            probe: ReadinessProbe::Query("SELECT 1".to_string()),
            readiness: RetryBudget::timeout(Duration::from_secs(300), Duration::from_secs(1)),
            host_log_dir: None,
            command_timeout: Duration::from_secs(600),
        }
    }

    pub fn with_probe(mut self, probe: ReadinessProbe) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_readiness(mut self, budget: RetryBudget) -> Self {
        self.readiness = budget;
        self
    }

    pub fn with_host_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.host_log_dir = Some(dir.into());
        self
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    fn exec(&self) -> CommandSpec {
        CommandSpec::new("docker")
            .arg("exec")
            .arg(&self.container)
            .timeout(self.command_timeout)
    }

    /// `docker exec -i`, for commands that read their input from stdin
    fn exec_stdin(&self, input: &str) -> CommandSpec {
        CommandSpec::new("docker")
            .args(["exec", "-i"])
            .arg(&self.container)
            .stdin(input)
            .timeout(self.command_timeout)
    }

    async fn run(&self, spec: CommandSpec) -> Result<CommandOutput, NodeError> {
        debug!("{}: {}", self.name, spec.display());
        self.executor
            .run(&spec)
            .await
            .map_err(|source| NodeError::Process {
                node: self.name.clone(),
                source,
            })
    }

    async fn docker(&self, action: &str) -> Result<(), NodeError> {
        let spec = CommandSpec::new("docker")
            .arg(action)
            .arg(&self.container)
            .timeout(self.command_timeout);
        let output = self.run(spec).await?;
        if output.success() {
            Ok(())
        } else {
            Err(NodeError::UnexpectedOutput {
                node: self.name.clone(),
                command: format!("docker {} {}", action, self.container),
                output: output.combined(),
            })
        }
    }

    /// Block until the readiness probe passes or the budget runs out
    pub async fn wait_ready(&self) -> Result<(), NodeError> {
        let outcome = retry(&self.readiness, |attempt| async move {
            let output = match &self.probe {
                ReadinessProbe::Query(sql) => self.query(&QueryRequest::new(sql.as_str())).await?,
                ReadinessProbe::Command(script) => self.command(script).await?,
            };
            if output.success() {
                Ok(())
            } else {
                debug!("{} not ready yet (attempt {})", self.name, attempt);
                Err(NodeError::NotReady {
                    node: self.name.clone(),
                    reason: output.combined(),
                })
            }
        })
        .await;

        outcome.map_err(|exhausted| NodeError::NotReady {
            node: self.name.clone(),
            reason: format!(
                "{} attempts in {:?}, last error: {}",
                exhausted.attempts, exhausted.elapsed, exhausted.last_error
            ),
        })
    }
}

#[async_trait]
impl Node for DockerNode {
    fn name(&self) -> &str {
        &self.name
    }

    async fn command(&self, script: &str) -> Result<CommandOutput, NodeError> {
        self.run(self.exec().arg("bash").arg("-c").arg(script)).await
    }

    async fn query(&self, request: &QueryRequest) -> Result<CommandOutput, NodeError> {
        // query text goes over stdin so it never shows up in the host process list
        let mut spec = self
            .exec_stdin(&request.sql)
            .args(self.client.iter().cloned());
        if let Some(query_id) = &request.query_id {
            spec = spec.arg("--query_id").arg(query_id);
        }
        self.run(spec).await
    }

    async fn stop(&self) -> Result<(), NodeError> {
        info!("Stopping {}", self.name);
        self.docker("stop").await
    }

    async fn start(&self) -> Result<(), NodeError> {
        info!("Starting {}", self.name);
        self.docker("start").await?;
        self.wait_ready().await
    }

    async fn server_log_size(&self) -> Result<u64, NodeError> {
        match &self.host_log_dir {
            Some(dir) => {
                let path = dir.join("clickhouse-server.log");
                std::fs::metadata(&path)
                    .map(|meta| meta.len())
                    .map_err(|e| NodeError::UnexpectedOutput {
                        node: self.name.clone(),
                        command: format!("stat {}", path.display()),
                        output: e.to_string(),
                    })
            }
            None => self.file_size(SERVER_LOG).await,
        }
    }
}

/// How to bring a cluster up
#[derive(Debug, Clone)]
pub struct ClusterSettings {
    pub compose_file: PathBuf,
    pub project: String,
    /// Variables handed to compose, typically resolved image names
    pub env: Vec<(String, String)>,
    pub clickhouse_nodes: Vec<String>,
    /// Services that are not ClickHouse servers, with their readiness script
    pub auxiliary_nodes: BTreeMap<String, String>,
    pub startup: RetryBudget,
    /// Host directory whose `<node>/logs` subdirectories mirror each server log dir
    pub host_logs_root: Option<PathBuf>,
    pub compose_timeout: Duration,
}

impl ClusterSettings {
    /// Settings for the secrets suite cluster under `repo_path`
    pub fn from_suite(suite: &SuiteConfig, params: &RunParams, repo_path: &Path) -> Self {
        let compose_dir = repo_path.join(&suite.compose_dir);
        let mut auxiliary_nodes = BTreeMap::new();
        auxiliary_nodes.insert(
            suite.mysql_node.clone(),
            "MYSQL_PWD=password mysqladmin ping -u root --silent".to_string(),
        );

        Self {
            compose_file: compose_dir.join("docker-compose.yml"),
            project: suite.project.clone(),
            env: suite.resolved_images(params),
            clickhouse_nodes: suite.clickhouse_nodes.clone(),
            auxiliary_nodes,
            startup: RetryBudget::timeout(Duration::from_secs(300), Duration::from_secs(1)),
            host_logs_root: Some(compose_dir.join("_instances")),
            compose_timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// A running compose project
pub struct Cluster {
    executor: Arc<dyn ProcessExecutor>,
    settings: ClusterSettings,
    nodes: BTreeMap<String, Arc<DockerNode>>,
}

impl Cluster {
    fn compose(&self) -> CommandSpec {
        compose(&self.settings)
    }

    /// Start every service and wait until each one is ready
    pub async fn up(
        executor: Arc<dyn ProcessExecutor>,
        settings: ClusterSettings,
    ) -> Result<Self, EnvironmentError> {
        info!("Bringing up compose project {}", settings.project);
        let up = compose(&settings).args(["up", "-d"]);
        let output = executor.run(&up).await?;
        if !output.success() {
            return Err(EnvironmentError::ClusterStartup(format!(
                "`{}` exited with {}: {}",
                up.display(),
                output.exit_code,
                output.combined()
            )));
        }

        Self::attach(executor, settings).await
    }

    /// Bind to the services of an already running project and wait until each one is ready
    pub async fn attach(
        executor: Arc<dyn ProcessExecutor>,
        settings: ClusterSettings,
    ) -> Result<Self, EnvironmentError> {
        let mut cluster = Self {
            executor,
            settings,
            nodes: BTreeMap::new(),
        };

        for name in cluster.settings.clickhouse_nodes.clone() {
            let mut node = cluster
                .make_node(&name)
                .await?
                .with_readiness(cluster.settings.startup);
            if let Some(root) = &cluster.settings.host_logs_root {
                node = node.with_host_log_dir(root.join(&name).join("logs"));
            }
            cluster.nodes.insert(name, Arc::new(node));
        }
        for (name, script) in cluster.settings.auxiliary_nodes.clone() {
            let node = cluster
                .make_node(&name)
                .await?
                .with_probe(ReadinessProbe::Command(script))
                .with_readiness(cluster.settings.startup);
            cluster.nodes.insert(name, Arc::new(node));
        }

        for node in cluster.nodes.values() {
            info!("Waiting for {} to become ready", node.name());
            node.wait_ready()
                .await
                .map_err(|e| EnvironmentError::ClusterStartup(e.to_string()))?;
        }
        info!("Cluster {} is up", cluster.settings.project);
        Ok(cluster)
    }

    async fn make_node(&self, service: &str) -> Result<DockerNode, EnvironmentError> {
        let spec = self.compose().args(["ps", "-q", service]);
        let output = self.executor.run_checked(&spec).await?;
        let container = output
            .stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .ok_or_else(|| {
                EnvironmentError::ClusterStartup(format!("no container for service {}", service))
            })?
            .to_string();
        debug!("Service {} is container {}", service, container);
        Ok(DockerNode::new(service, container, self.executor.clone()))
    }

    pub fn node(&self, name: &str) -> Option<Arc<dyn Node>> {
        self.nodes
            .get(name)
            .map(|node| node.clone() as Arc<dyn Node>)
    }

    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Stop the project and drop its volumes; failures are only logged
    pub async fn down(&self) {
        info!("Tearing down compose project {}", self.settings.project);
        let spec = self.compose().args(["down", "--volumes"]);
        if let Err(e) = self.executor.run_checked(&spec).await {
            warn!("Compose down failed: {}", e);
        }
    }

    /// Copy each server log directory out and pack them as `logs.tar.gz`
    ///
    /// Returns the archive path when it was produced.
    pub async fn collect_logs(&self, result_dir: &Path) -> Option<PathBuf> {
        let logs_dir = result_dir.join("logs");
        if let Err(e) = std::fs::create_dir_all(&logs_dir) {
            warn!("Cannot create {}: {}", logs_dir.display(), e);
            return None;
        }

        for name in &self.settings.clickhouse_nodes {
            let Some(node) = self.nodes.get(name) else {
                continue;
            };
            let spec = CommandSpec::new("docker")
                .arg("cp")
                .arg(format!("{}:{}", node.container(), SERVER_LOG_DIR))
                .arg(logs_dir.join(name).to_string_lossy());
            if let Err(e) = self.executor.run_checked(&spec).await {
                warn!("Could not copy logs of {}: {}", name, e);
            }
        }

        let archive = result_dir.join("logs.tar.gz");
        let spec = CommandSpec::new("tar")
            .arg("czf")
            .arg(archive.to_string_lossy())
            .arg("-C")
            .arg(result_dir.to_string_lossy())
            .arg("logs");
        match self.executor.run_checked(&spec).await {
            Ok(_) => {
                info!("Logs archived to {}", archive.display());
                Some(archive)
            }
            Err(e) => {
                warn!("Could not archive logs: {}", e);
                None
            }
        }
    }
}

fn compose(settings: &ClusterSettings) -> CommandSpec {
    let mut spec = CommandSpec::new("docker")
        .arg("compose")
        .arg("-p")
        .arg(&settings.project)
        .arg("-f")
        .arg(settings.compose_file.to_string_lossy())
        .timeout(settings.compose_timeout);
    for (key, value) in &settings.env {
        spec = spec.env(key, value);
    }
    spec
}
