//! Scenario registry

use crate::core::ScenarioError;
use crate::scenarios::{config_suite, invalid_secrets, valid_secrets, ScenarioContext};
use futures::future::BoxFuture;
use std::sync::Arc;

/// Entry point of a scenario
pub type ScenarioFn = fn(Arc<ScenarioContext>) -> BoxFuture<'static, Result<(), ScenarioError>>;

/// A named, runnable scenario
#[derive(Clone)]
pub struct Scenario {
    pub name: &'static str,
    pub suite: &'static str,
    /// Requirement the scenario verifies
    pub requirement: &'static str,
    pub run: ScenarioFn,
}

impl Scenario {
    pub const fn new(
        suite: &'static str,
        name: &'static str,
        requirement: &'static str,
        run: ScenarioFn,
    ) -> Self {
        Self {
            name,
            suite,
            requirement,
            run,
        }
    }

    /// `suite/name`, the identifier used in reports
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.suite, self.name)
    }

    /// Whether `filter` selects this scenario by name, suite or qualified name
    pub fn matches(&self, filter: &str) -> bool {
        filter == self.name || filter == self.suite || filter == self.qualified_name()
    }
}

impl std::fmt::Debug for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scenario")
            .field("name", &self.name)
            .field("suite", &self.suite)
            .field("requirement", &self.requirement)
            .finish()
    }
}

/// Every scenario of the secrets feature, in run order
pub fn all_scenarios() -> Vec<Scenario> {
    let mut scenarios = Vec::new();
    scenarios.extend(valid_secrets::scenarios());
    scenarios.extend(invalid_secrets::scenarios());
    scenarios.extend(config_suite::scenarios());
    scenarios
}

/// Scenarios selected by `filters`; an empty filter list selects everything
pub fn select(filters: &[String]) -> Vec<Scenario> {
    let all = all_scenarios();
    if filters.is_empty() {
        return all;
    }
    all.into_iter()
        .filter(|scenario| filters.iter().any(|f| scenario.matches(f)))
        .collect()
}
