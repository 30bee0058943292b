//! Leak auditing - verify a secret never shows up in observable output
//!
//! Three surfaces are checked after the audited operation: the slice of the
//! server log written while it ran, the live process listing, and the query
//! history. Each check runs regardless of how the others (or the operation
//! itself) turned out.

use crate::core::{LeakSurface, NodeError, ScenarioError};
use crate::environment::node::{Node, QueryRequest, SERVER_LOG};
use crate::process::quote;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Byte range of a log file attributable to one operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogWindow {
    pub path: String,
    pub start_offset: u64,
    pub end_offset: Option<u64>,
}

impl LogWindow {
    /// Record the current size of `path` as the start of the window
    pub async fn open(node: &dyn Node, path: &str) -> Result<Self, NodeError> {
        let start_offset = node.file_size(path).await?;
        debug!("Opened log window on {} at {}", path, start_offset);
        Ok(Self {
            path: path.to_string(),
            start_offset,
            end_offset: None,
        })
    }

    /// Record the current size as the end of the window
    pub async fn close(&mut self, node: &dyn Node) -> Result<u64, NodeError> {
        let end = node.file_size(&self.path).await?;
        self.end_offset = Some(end);
        Ok(end)
    }

    /// Whether the file shrank while the window was open
    pub fn rotated(&self) -> bool {
        matches!(self.end_offset, Some(end) if end < self.start_offset)
    }

    /// Byte offset the scan starts from
    ///
    /// After a rotation every byte of the new file was written inside the
    /// window, so the scan covers it from the beginning.
    pub fn scan_offset(&self) -> u64 {
        if self.rotated() {
            0
        } else {
            self.start_offset
        }
    }

    /// Number of bytes covered by a closed window
    pub fn len(&self) -> u64 {
        self.end_offset
            .map(|end| end.saturating_sub(self.scan_offset()))
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `needle` occurs inside the window; consumes the window
    pub async fn contains(self, node: &dyn Node, needle: &str) -> Result<bool, ScenarioError> {
        if self.rotated() {
            warn!(
                "{} shrank during the window, scanning the whole new file",
                self.path
            );
        }

        let script = format!(
            "tail -c +{} {} | head -c {} | grep -q -F -- {}",
            self.scan_offset() + 1,
            quote(&self.path),
            self.len(),
            quote(needle)
        );
        let output = node.command(&script).await?;
        match output.exit_code {
            0 => Ok(true),
            1 => Ok(false),
            code => Err(ScenarioError::Command {
                command: format!("scan of {}", self.path),
                exit_code: code,
            }),
        }
    }
}

/// Runs operations under a leak audit
pub struct LeakAuditor {
    node: Arc<dyn Node>,
    log_path: String,
}

impl LeakAuditor {
    pub fn new(node: Arc<dyn Node>) -> Self {
        Self {
            node,
            log_path: SERVER_LOG.to_string(),
        }
    }

    pub fn with_log_path(mut self, path: impl Into<String>) -> Self {
        self.log_path = path.into();
        self
    }

    /// Run `body` and then check every surface for `secret`
    ///
    /// `query_ids` are the correlation ids of the queries `body` issues.
    pub async fn audit<T, Fut>(&self, secret: &str, query_ids: &[String], body: Fut) -> Result<T, ScenarioError>
    where
        Fut: Future<Output = Result<T, ScenarioError>>,
    {
        let window = LogWindow::open(self.node.as_ref(), &self.log_path).await?;

        let outcome = AssertUnwindSafe(body).catch_unwind().await;

        let mut failures = Vec::new();
        if let Err(e) = self.check_log(window, secret).await {
            failures.push(e);
        }
        for query_id in query_ids {
            if let Err(e) = self.check_processes(secret, query_id).await {
                failures.push(e);
            }
            if let Err(e) = self.check_query_log(secret, query_id).await {
                failures.push(e);
            }
        }

        let result = match outcome {
            Ok(result) => result,
            Err(panic) => {
                for failure in &failures {
                    warn!("Leak check failed during panic: {}", failure);
                }
                std::panic::resume_unwind(panic);
            }
        };

        match (result, ScenarioError::collect(failures)) {
            (Ok(value), None) => Ok(value),
            (Ok(_), Some(leaks)) => Err(leaks),
            (Err(e), None) => Err(e),
            (Err(e), Some(leaks)) => Err(ScenarioError::Multiple(vec![e, leaks])),
        }
    }

    /// Check the slice of the log written since `window` opened
    pub async fn check_log(&self, mut window: LogWindow, secret: &str) -> Result<(), ScenarioError> {
        let node = self.node.as_ref();
        window.close(node).await?;
        info!("Checking {} bytes of {} for leaks", window.len(), window.path);

        if window.contains(node, secret).await? {
            return Err(ScenarioError::Leak {
                surface: LeakSurface::ServerLog,
                query_id: None,
            });
        }
        Ok(())
    }

    pub async fn check_processes(&self, secret: &str, query_id: &str) -> Result<(), ScenarioError> {
        let sql = format!(
            "SELECT * FROM system.processes WHERE query_id='{}' FORMAT JSON",
            query_id
        );
        self.check_surface(LeakSurface::ProcessList, &sql, secret, query_id)
            .await
    }

    pub async fn check_query_log(&self, secret: &str, query_id: &str) -> Result<(), ScenarioError> {
        let flush = QueryRequest::new("SYSTEM FLUSH LOGS");
        let output = self.node.query(&flush).await?;
        if !output.success() {
            warn!("SYSTEM FLUSH LOGS failed on {}: {}", self.node.name(), output.combined());
        }

        let sql = format!(
            "SELECT * FROM system.query_log WHERE query_id='{}' FORMAT JSON",
            query_id
        );
        self.check_surface(LeakSurface::QueryHistory, &sql, secret, query_id)
            .await
    }

    async fn check_surface(
        &self,
        surface: LeakSurface,
        sql: &str,
        secret: &str,
        query_id: &str,
    ) -> Result<(), ScenarioError> {
        let output = self.node.query(&QueryRequest::new(sql)).await?;
        if !output.success() {
            return Err(ScenarioError::Command {
                command: sql.to_string(),
                exit_code: output.exit_code,
            });
        }
        if output.combined().contains(secret) {
            return Err(ScenarioError::Leak {
                surface,
                query_id: Some(query_id.to_string()),
            });
        }
        Ok(())
    }
}
