//! Host and cluster environment: containers, packages and nodes

pub mod cluster;
pub mod docker;
pub mod installer;
pub mod node;

pub use cluster::{Cluster, ClusterSettings, DockerNode, ReadinessProbe};
pub use docker::{FleetController, FleetSettings, ResetReport};
pub use installer::{ArtifactInstaller, BinaryTarget, InstallManifest};
pub use node::{Node, QueryRequest, SERVER_ERR_LOG, SERVER_LOG};
