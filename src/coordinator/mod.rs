//! Dynamic configuration changes on live nodes

pub mod fragment;
pub mod reload;

pub use fragment::{correlation_id, ConfigFragment, FragmentOptions, SecretEntries, SecretValue};
pub use reload::{ChangeMode, ConfigCoordinator, CoordinatorSettings, FragmentState};
