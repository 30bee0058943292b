//! The secrets feature: scenario registry, shared context and the three suites

pub mod config_suite;
pub mod context;
pub mod invalid_secrets;
pub mod registry;
pub mod valid_secrets;

pub use context::ScenarioContext;
pub use registry::{all_scenarios, select, Scenario, ScenarioFn};

/// Returned when a secret would be serialized into a result set
pub const SERIALIZATION_NOT_IMPLEMENTED: &str = "DB::Exception: Serialization is not implemented";

/// Returned when a secret path cannot be resolved
pub const CANNOT_GET_SECRET: &str = "DB::Exception: Can't get secret value by path";
