//! Remote node interface

use crate::core::NodeError;
use crate::process::{quote, CommandOutput};
use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;

/// Main server log inside a node
pub const SERVER_LOG: &str = "/var/log/clickhouse-server/clickhouse-server.log";

/// Server error log inside a node
pub const SERVER_ERR_LOG: &str = "/var/log/clickhouse-server/clickhouse-server.err.log";

/// A query to run through the node's SQL client
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryRequest {
    pub sql: String,
    /// Expected client exit code; `None` means success with no exception
    pub exit_code: Option<i32>,
    /// Substring expected somewhere in the client output
    pub message: Option<String>,
    /// Correlation id passed to the server as the query id
    pub query_id: Option<String>,
}

impl QueryRequest {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            ..Default::default()
        }
    }

    pub fn exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn query_id(mut self, id: impl Into<String>) -> Self {
        self.query_id = Some(id.into());
        self
    }
}

/// Command and query access to one cluster node
#[async_trait]
pub trait Node: Send + Sync {
    fn name(&self) -> &str;

    /// Run a shell script inside the node
    async fn command(&self, script: &str) -> Result<CommandOutput, NodeError>;

    /// Run a query through the node's SQL client
    async fn query(&self, request: &QueryRequest) -> Result<CommandOutput, NodeError>;

    /// Stop the server process
    async fn stop(&self) -> Result<(), NodeError>;

    /// Start the server process and wait until it accepts queries
    async fn start(&self) -> Result<(), NodeError>;

    /// Size in bytes of a file inside the node
    async fn file_size(&self, path: &str) -> Result<u64, NodeError> {
        let script = format!("stat --format=%s {}", quote(path));
        let output = self.command(&script).await?;
        if !output.success() {
            return Err(NodeError::UnexpectedOutput {
                node: self.name().to_string(),
                command: script,
                output: output.combined(),
            });
        }
        parse_size(&output.stdout).ok_or_else(|| NodeError::UnexpectedOutput {
            node: self.name().to_string(),
            command: script,
            output: output.stdout.clone(),
        })
    }

    /// Size of the main server log; must work while the server is stopped
    async fn server_log_size(&self) -> Result<u64, NodeError> {
        self.file_size(SERVER_LOG).await
    }
}

/// Parse the leading integer of `stat --format=%s` output
pub fn parse_size(output: &str) -> Option<u64> {
    static SIZE: OnceLock<Regex> = OnceLock::new();
    let re = SIZE.get_or_init(|| Regex::new(r"^\s*(\d+)").expect("valid regex"));
    re.captures(output)?.get(1)?.as_str().parse().ok()
}
