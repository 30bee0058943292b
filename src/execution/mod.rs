//! Suite execution: scheduling, per-scenario execution and the run loop

pub mod engine;
pub mod executor;
pub mod scheduler;

pub use engine::{EventHandler, SuiteDriver, SuiteEvent};
pub use executor::ScenarioExecutor;
pub use scheduler::{ExecutionScheduler, SchedulingStrategy};
