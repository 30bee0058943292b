//! Shared state and helpers handed to every scenario

use crate::audit::LeakAuditor;
use crate::coordinator::{
    ChangeMode, ConfigCoordinator, ConfigFragment, CoordinatorSettings, FragmentOptions,
    SecretEntries,
};
use crate::core::{ErrorCodes, NodeError, ScenarioError};
use crate::environment::node::{Node, QueryRequest};
use crate::process::{quote, CommandOutput};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Table created by a fixture and not yet dropped
#[derive(Debug, Clone, PartialEq, Eq)]
enum Fixture {
    MemoryTable(String),
    MysqlTable { table: String, user: String },
}

/// Everything a scenario needs to talk to the cluster
pub struct ScenarioContext {
    node: Arc<dyn Node>,
    mysql_node: Option<Arc<dyn Node>>,
    coordinator: ConfigCoordinator,
    auditor: LeakAuditor,
    codes: ErrorCodes,
    fragment_options: FragmentOptions,
    fixtures: Mutex<Vec<Fixture>>,
}

impl ScenarioContext {
    pub fn new(node: Arc<dyn Node>, settings: CoordinatorSettings, codes: ErrorCodes) -> Self {
        Self {
            coordinator: ConfigCoordinator::new(node.clone(), settings),
            auditor: LeakAuditor::new(node.clone()),
            node,
            mysql_node: None,
            codes,
            fragment_options: FragmentOptions::default(),
            fixtures: Mutex::new(Vec::new()),
        }
    }

    pub fn with_mysql_node(mut self, node: Arc<dyn Node>) -> Self {
        self.mysql_node = Some(node);
        self
    }

    pub fn with_fragment_options(mut self, options: FragmentOptions) -> Self {
        self.fragment_options = options;
        self
    }

    pub fn node(&self) -> &Arc<dyn Node> {
        &self.node
    }

    pub fn codes(&self) -> &ErrorCodes {
        &self.codes
    }

    pub fn coordinator(&self) -> &ConfigCoordinator {
        &self.coordinator
    }

    pub fn mysql(&self) -> Result<&Arc<dyn Node>, ScenarioError> {
        self.mysql_node.as_ref().ok_or_else(|| {
            ScenarioError::Node(NodeError::NotReady {
                node: "mysql".to_string(),
                reason: "no MySQL node is configured".to_string(),
            })
        })
    }

    /// Run a query and check its outcome against the request's expectations
    ///
    /// Without an expected exit code the query must succeed and print no
    /// exception.
    pub async fn query(&self, request: QueryRequest) -> Result<CommandOutput, ScenarioError> {
        let output = self.node.query(&request).await?;
        let combined = output.combined();

        match request.exit_code {
            Some(expected) if output.exit_code != expected => {
                return Err(ScenarioError::ExitCode {
                    query: request.sql,
                    expected,
                    actual: output.exit_code,
                    output: combined,
                });
            }
            Some(_) => {}
            None if !output.success() => {
                return Err(ScenarioError::ExitCode {
                    query: request.sql,
                    expected: 0,
                    actual: output.exit_code,
                    output: combined,
                });
            }
            None if combined.contains("Exception:") => {
                return Err(ScenarioError::UnexpectedException {
                    query: request.sql,
                    output: combined,
                });
            }
            None => {}
        }

        if let Some(message) = &request.message {
            if !combined.contains(message.as_str()) {
                return Err(ScenarioError::MessageMissing {
                    query: request.sql,
                    expected: message.clone(),
                    output: combined,
                });
            }
        }
        Ok(output)
    }

    pub fn secrets_fragment(&self, entries: &SecretEntries) -> ConfigFragment {
        ConfigFragment::secrets(entries, &self.fragment_options)
    }

    /// A fragment whose secrets section carries bare text ahead of the entries
    pub fn inaccessible_fragment(&self, entries: &SecretEntries, text: &str) -> ConfigFragment {
        let options = FragmentOptions {
            inaccessible_text: Some(text.to_string()),
            ..self.fragment_options.clone()
        };
        ConfigFragment::secrets(entries, &options)
    }

    /// Apply `fragment` for the duration of `body`
    pub async fn with_config<T, Fut>(&self, fragment: &ConfigFragment, body: Fut) -> Result<T, ScenarioError>
    where
        Fut: Future<Output = Result<T, ScenarioError>>,
    {
        self.coordinator
            .scoped(fragment, ChangeMode::Temporary, body)
            .await
    }

    /// Apply `fragment`, then run `body` under a leak audit for `secret`
    pub async fn with_audited_config<T, Fut>(
        &self,
        fragment: &ConfigFragment,
        secret: &str,
        query_ids: &[String],
        body: Fut,
    ) -> Result<T, ScenarioError>
    where
        Fut: Future<Output = Result<T, ScenarioError>>,
    {
        self.with_config(fragment, self.auditor.audit(secret, query_ids, body))
            .await
    }

    /// Create a Memory table, run `body`, always drop the table
    pub async fn with_memory_table<T, Fut>(&self, table: &str, body: Fut) -> Result<T, ScenarioError>
    where
        Fut: Future<Output = Result<T, ScenarioError>>,
    {
        let fixture = Fixture::MemoryTable(table.to_string());
        self.hold(&fixture);
        let setup = async {
            self.query(QueryRequest::new(format!(
                "CREATE TABLE {}(x String) Engine= Memory",
                table
            )))
            .await
            .map(|_| ())
        };
        let outcome = match setup.await {
            Ok(()) => AssertUnwindSafe(body).catch_unwind().await,
            Err(e) => Ok(Err(e)),
        };

        let cleanup = self.release(fixture).await;
        finish(outcome, cleanup)
    }

    /// Run a script on the MySQL node; it must exit 0
    pub async fn mysql_command(&self, script: &str) -> Result<CommandOutput, ScenarioError> {
        let output = self.mysql()?.command(script).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(ScenarioError::Command {
                command: script.lines().next().unwrap_or_default().to_string(),
                exit_code: output.exit_code,
            })
        }
    }

    /// Create a MySQL table and a user allowed to read it, run `body`, then drop both
    pub async fn with_mysql_table<T, Fut>(
        &self,
        table: &str,
        user: &str,
        password: &str,
        body: Fut,
    ) -> Result<T, ScenarioError>
    where
        Fut: Future<Output = Result<T, ScenarioError>>,
    {
        let fixture = Fixture::MysqlTable {
            table: table.to_string(),
            user: user.to_string(),
        };
        self.hold(&fixture);
        let setup = async {
            info!("Creating MySQL table {} for user {}", table, user);
            self.mysql_command(&mysql_user_exec(&format!("DROP TABLE IF EXISTS {};", table)))
                .await?;
            self.mysql_command(&mysql_user_exec(&format!(
                "CREATE TABLE {}(id INT NOT NULL AUTO_INCREMENT, x INT, PRIMARY KEY ( id ));",
                table
            )))
            .await?;
            self.mysql_command(&mysql_root_exec(&format!(
                "CREATE USER {} IDENTIFIED BY '{}'",
                user, password
            )))
            .await?;
            self.mysql_command(&mysql_root_exec(&format!(
                "GRANT ALL PRIVILEGES ON db.* TO '{}'",
                user
            )))
            .await?;
            Ok::<(), ScenarioError>(())
        };
        let outcome = match setup.await {
            Ok(()) => AssertUnwindSafe(body).catch_unwind().await,
            Err(e) => Ok(Err(e)),
        };

        let cleanup = self.release(fixture).await;
        finish(outcome, cleanup)
    }

    /// Undo whatever a cancelled scenario left behind
    ///
    /// Drops tables whose fixture never reached its cleanup, then removes a
    /// config fragment the coordinator still has outstanding.
    pub async fn recover(&self) -> Result<(), ScenarioError> {
        let leftovers: Vec<Fixture> = self
            .fixtures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        let mut failures = Vec::new();
        for fixture in leftovers.into_iter().rev() {
            warn!("Dropping {:?} left by an interrupted scenario", fixture);
            if let Err(e) = self.release(fixture).await {
                failures.push(e);
            }
        }
        if let Err(e) = self.coordinator.recover().await {
            failures.push(e);
        }

        match ScenarioError::collect(failures) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn hold(&self, fixture: &Fixture) {
        self.fixtures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(fixture.clone());
    }

    /// Drop a fixture's tables; it stays held if dropping fails
    async fn release(&self, fixture: Fixture) -> Result<(), ScenarioError> {
        let outcome = match &fixture {
            Fixture::MemoryTable(table) => self
                .query(QueryRequest::new(format!("DROP TABLE IF EXISTS {}", table)))
                .await
                .map(|_| ()),
            Fixture::MysqlTable { table, user } => {
                let mut failures = Vec::new();
                let drops = [
                    mysql_user_exec(&format!("DROP TABLE IF EXISTS {};", table)),
                    mysql_root_exec(&format!("DROP USER IF EXISTS {};", user)),
                ];
                for script in &drops {
                    if let Err(e) = self.mysql_command(script).await {
                        warn!("MySQL cleanup failed: {}", e);
                        failures.push(e);
                    }
                }
                match ScenarioError::collect(failures) {
                    Some(e) => Err(e),
                    None => Ok(()),
                }
            }
        };

        if outcome.is_ok() {
            let mut fixtures = self.fixtures.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(position) = fixtures.iter().position(|held| *held == fixture) {
                fixtures.remove(position);
            }
        }
        outcome
    }
}

/// Combine a fixture body's outcome with its cleanup, resuming a panic once cleanup has run
fn finish<T>(
    outcome: std::thread::Result<Result<T, ScenarioError>>,
    cleanup: Result<(), ScenarioError>,
) -> Result<T, ScenarioError> {
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
        (Ok(_), Err(e)) | (Err(e), Ok(())) => Err(e),
        (Err(e), Err(cleanup_err)) => Err(ScenarioError::Multiple(vec![e, cleanup_err])),
    }
}

fn mysql_user_exec(sql: &str) -> String {
    format!("MYSQL_PWD=password mysql -D db -u user -e {}", quote(sql))
}

fn mysql_root_exec(sql: &str) -> String {
    format!("MYSQL_PWD=password mysql -D db -u root -e {}", quote(sql))
}
