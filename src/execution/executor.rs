//! Scenario executor - runs one scenario and turns its outcome into a record

use crate::{
    core::{ScenarioError, ScenarioRecord, ScenarioStatus},
    scenarios::{Scenario, ScenarioContext},
};
use chrono::Utc;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::time::{timeout, Duration, Instant};
use tracing::{error, info, warn};

/// Runs scenarios against a shared context
///
/// Errors and panics stay inside the scenario boundary: `execute` always
/// returns a record.
pub struct ScenarioExecutor {
    context: Arc<ScenarioContext>,
    /// Scenario name -> reason it is expected to fail
    xfails: HashMap<String, String>,
    timeout: Option<Duration>,
}

impl ScenarioExecutor {
    pub fn new(context: Arc<ScenarioContext>) -> Self {
        Self {
            context,
            xfails: HashMap::new(),
            timeout: None,
        }
    }

    pub fn with_xfails(mut self, xfails: HashMap<String, String>) -> Self {
        self.xfails = xfails;
        self
    }

    /// Upper bound on a single scenario
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn xfail_reason(&self, scenario: &Scenario) -> Option<&String> {
        self.xfails
            .get(&scenario.qualified_name())
            .or_else(|| self.xfails.get(scenario.name))
    }

    /// Execute a scenario and return its record
    pub async fn execute(&self, scenario: &Scenario) -> ScenarioRecord {
        let name = scenario.qualified_name();
        info!("Executing scenario: {}", name);

        let started_at = Utc::now();
        let started = Instant::now();
        let result = self.run(scenario).await;
        let duration = started.elapsed();

        let status = match result {
            Ok(()) => {
                info!("Scenario {} passed in {:?}", name, duration);
                ScenarioStatus::Passed
            }
            Err(e) => match self.xfail_reason(scenario) {
                Some(reason) => {
                    warn!("Scenario {} failed as expected ({}): {}", name, reason, e);
                    ScenarioStatus::XFailed {
                        error: e.to_string(),
                        reason: reason.clone(),
                    }
                }
                None => {
                    error!("Scenario {} failed: {}", name, e);
                    ScenarioStatus::Failed {
                        error: e.to_string(),
                    }
                }
            },
        };

        ScenarioRecord {
            name,
            suite: scenario.suite.to_string(),
            requirement: scenario.requirement.to_string(),
            status,
            started_at: Some(started_at),
            duration,
        }
    }

    async fn run(&self, scenario: &Scenario) -> Result<(), ScenarioError> {
        let body = AssertUnwindSafe((scenario.run)(self.context.clone())).catch_unwind();

        let outcome = match self.timeout {
            Some(limit) => match timeout(limit, body).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!("Scenario {} cancelled after {:?}", scenario.qualified_name(), limit);
                    let timed_out = ScenarioError::TimedOut { limit };
                    // the cancelled future never reached its own cleanup
                    return match self.context.recover().await {
                        Ok(()) => Err(timed_out),
                        Err(e) => Err(ScenarioError::Multiple(vec![timed_out, e])),
                    };
                }
            },
            None => body.await,
        };

        outcome.unwrap_or_else(|panic| Err(ScenarioError::Panicked(panic_message(panic.as_ref()))))
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
