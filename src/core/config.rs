//! Runner configuration: environment, JSON parameters and the YAML suite file

use crate::core::error::EnvironmentError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const ENV_REPO_PATH: &str = "CLICKHOUSE_TESTS_REPO_PATH";
pub const ENV_BUILD_PATH: &str = "CLICKHOUSE_TESTS_BUILD_PATH";
pub const ENV_RESULT_PATH: &str = "CLICKHOUSE_TESTS_RESULT_PATH";
pub const ENV_PARAMS_PATH: &str = "CLICKHOUSE_TESTS_JSON_PARAMS_PATH";
pub const ENV_SERVER_BIN_PATH: &str = "CLICKHOUSE_TESTS_SERVER_BIN_PATH";
pub const ENV_ODBC_BRIDGE_BIN_PATH: &str = "CLICKHOUSE_TESTS_ODBC_BRIDGE_BIN_PATH";
pub const ENV_LIBRARY_BRIDGE_BIN_PATH: &str = "CLICKHOUSE_TESTS_LIBRARY_BRIDGE_BIN_PATH";
pub const ENV_RESTART_DOCKER: &str = "CLICKHOUSE_TESTS_RUNNER_RESTART_DOCKER";

/// Settings read from the process environment at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    pub repo_path: PathBuf,
    pub build_path: PathBuf,
    pub result_path: PathBuf,
    pub params_path: PathBuf,
    /// Install destinations keyed by the environment variable that named them
    pub binary_destinations: BTreeMap<String, PathBuf>,
    pub restart_docker: bool,
}

impl RunnerConfig {
    /// Load from the real process environment
    pub fn from_env() -> Result<Self, EnvironmentError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary lookup function
    pub fn from_lookup<F>(lookup: F) -> Result<Self, EnvironmentError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String, EnvironmentError> {
            match lookup(key) {
                Some(value) if !value.trim().is_empty() => Ok(value),
                _ => Err(EnvironmentError::MissingEnv(key.to_string())),
            }
        };

        let mut binary_destinations = BTreeMap::new();
        for key in [
            ENV_SERVER_BIN_PATH,
            ENV_ODBC_BRIDGE_BIN_PATH,
            ENV_LIBRARY_BRIDGE_BIN_PATH,
        ] {
            binary_destinations.insert(key.to_string(), PathBuf::from(required(key)?));
        }

        let restart_raw = required(ENV_RESTART_DOCKER)?;
        let restart_docker = match restart_raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            _ => {
                return Err(EnvironmentError::InvalidEnv {
                    name: ENV_RESTART_DOCKER.to_string(),
                    value: restart_raw,
                })
            }
        };

        Ok(Self {
            repo_path: PathBuf::from(required(ENV_REPO_PATH)?),
            build_path: PathBuf::from(required(ENV_BUILD_PATH)?),
            result_path: PathBuf::from(required(ENV_RESULT_PATH)?),
            params_path: PathBuf::from(required(ENV_PARAMS_PATH)?),
            binary_destinations,
            restart_docker,
        })
    }
}

/// Parameters file handed to the runner by CI
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunParams {
    /// Image name -> tag overrides; a params file without the table is invalid
    pub docker_images_with_versions: HashMap<String, String>,
}

impl RunParams {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, EnvironmentError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| EnvironmentError::Params {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_json(&content).map_err(|e| EnvironmentError::Params {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Tag for `name`, falling back to `latest`
    pub fn image_version(&self, name: &str) -> String {
        match self.docker_images_with_versions.get(name) {
            Some(version) => version.clone(),
            None => {
                warn!("Cannot find image {} in params list {:?}", name, self.docker_images_with_versions);
                "latest".to_string()
            }
        }
    }

    /// Fully qualified `name:tag` for `name`
    pub fn image_with_version(&self, name: &str) -> String {
        if let Some(version) = self.docker_images_with_versions.get(name) {
            return format!("{}:{}", name, version);
        }
        warn!("Cannot find image {} in params list {:?}", name, self.docker_images_with_versions);
        let last_segment = name.rsplit('/').next().unwrap_or(name);
        if last_segment.contains(':') {
            name.to_string()
        } else {
            format!("{}:latest", name)
        }
    }
}

/// Server error codes the secrets scenarios expect
///
/// These are contract values of the server under test, so they are
/// configurable rather than derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorCodes {
    pub number_of_arguments_doesnt_match: i32,
    pub illegal_type_of_argument: i32,
    pub illegal_column: i32,
    pub cannot_get_secret: i32,
    pub not_implemented: i32,
    pub syntax_error: i32,
}

impl Default for ErrorCodes {
    fn default() -> Self {
        Self {
            number_of_arguments_doesnt_match: 42,
            illegal_type_of_argument: 43,
            illegal_column: 44,
            cannot_get_secret: 47,
            not_implemented: 48,
            syntax_error: 62,
        }
    }
}

/// Suite settings loaded from an optional YAML file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SuiteConfig {
    pub name: String,
    /// ClickHouse node the scenarios run against
    pub node: String,
    pub mysql_node: String,
    /// All ClickHouse services in the compose project
    pub clickhouse_nodes: Vec<String>,
    /// Directory holding docker-compose.yml, relative to the repo path
    pub compose_dir: PathBuf,
    pub project: String,
    /// Compose variable -> image name, resolved through the params file
    pub images: BTreeMap<String, String>,
    /// Max scenarios in flight; 1 runs them sequentially
    pub parallelism: usize,
    pub reload_timeout_secs: u64,
    pub poll_interval_ms: u64,
    /// Restart the node after writing a fragment instead of waiting for hot reload
    pub restart_on_apply: bool,
    pub task_budget_secs: u64,
    pub safety_margin_secs: u64,
    /// Only run these scenarios (empty = all)
    pub scenarios: Vec<String>,
    /// Scenario name -> reason it is expected to fail
    pub xfails: HashMap<String, String>,
    pub error_codes: ErrorCodes,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        let mut images = BTreeMap::new();
        images.insert("CLICKHOUSE_IMAGE".to_string(), "clickhouse/integration-test".to_string());
        images.insert("MYSQL_IMAGE".to_string(), "mysql".to_string());

        Self {
            name: "Secrets Management".to_string(),
            node: "clickhouse1".to_string(),
            mysql_node: "mysql1".to_string(),
            clickhouse_nodes: vec![
                "clickhouse1".to_string(),
                "clickhouse2".to_string(),
                "clickhouse3".to_string(),
            ],
            compose_dir: PathBuf::from("tests/testflows/secrets_management/secrets_management_env"),
            project: "secrets_management".to_string(),
            images,
            parallelism: 1,
            reload_timeout_secs: 300,
            poll_interval_ms: 1000,
            restart_on_apply: true,
            task_budget_secs: 8 * 60 * 60,
            safety_margin_secs: 20 * 60,
            scenarios: Vec::new(),
            xfails: HashMap::new(),
            error_codes: ErrorCodes::default(),
        }
    }
}

impl SuiteConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: SuiteConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.parallelism == 0 {
            anyhow::bail!("parallelism must be at least 1");
        }
        if self.reload_timeout_secs == 0 {
            anyhow::bail!("reload_timeout_secs must be positive");
        }
        if self.safety_margin_secs >= self.task_budget_secs {
            anyhow::bail!(
                "safety_margin_secs ({}) must be smaller than task_budget_secs ({})",
                self.safety_margin_secs,
                self.task_budget_secs
            );
        }
        if !self.clickhouse_nodes.contains(&self.node) {
            anyhow::bail!("node '{}' is not one of clickhouse_nodes", self.node);
        }
        Ok(())
    }

    pub fn reload_timeout(&self) -> Duration {
        Duration::from_secs(self.reload_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Wall-clock budget for the whole run
    pub fn run_budget(&self) -> Duration {
        Duration::from_secs(self.task_budget_secs - self.safety_margin_secs)
    }

    /// Compose environment with every image resolved to `name:tag`
    pub fn resolved_images(&self, params: &RunParams) -> Vec<(String, String)> {
        self.images
            .iter()
            .map(|(var, image)| (var.clone(), params.image_with_version(image)))
            .collect()
    }
}
