//! Artifact installer - unpacks server packages and stages the binaries

use crate::core::config::{
    RunnerConfig, ENV_LIBRARY_BRIDGE_BIN_PATH, ENV_ODBC_BRIDGE_BIN_PATH, ENV_SERVER_BIN_PATH,
};
use crate::core::EnvironmentError;
use crate::process::{CommandSpec, ProcessExecutor};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::info;

/// A binary produced by the packages and where it must be copied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryTarget {
    /// Path relative to the extraction root
    pub source: PathBuf,
    /// Environment variable that named the destination
    pub env_var: String,
    pub destination: PathBuf,
}

/// Packages to unpack, in dependency order, and binaries to stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallManifest {
    /// Filename prefixes; earlier packages are unpacked first
    pub packages: Vec<String>,
    pub binaries: Vec<BinaryTarget>,
}

impl InstallManifest {
    /// The ClickHouse server package set with destinations taken from `config`
    pub fn clickhouse(config: &RunnerConfig) -> Result<Self, EnvironmentError> {
        let packages = [
            "clickhouse-common-static_",
            "clickhouse-server_",
            "clickhouse-client",
            "clickhouse-common-static-dbg_",
        ]
        .iter()
        .map(|p| p.to_string())
        .collect();

        let binaries = [
            ("usr/bin/clickhouse", ENV_SERVER_BIN_PATH),
            ("usr/bin/clickhouse-odbc-bridge", ENV_ODBC_BRIDGE_BIN_PATH),
            ("usr/bin/clickhouse-library-bridge", ENV_LIBRARY_BRIDGE_BIN_PATH),
        ]
        .iter()
        .map(|(source, env_var)| {
            let destination = config
                .binary_destinations
                .get(*env_var)
                .cloned()
                .ok_or_else(|| EnvironmentError::MissingEnv(env_var.to_string()))?;
            Ok(BinaryTarget {
                source: PathBuf::from(source),
                env_var: env_var.to_string(),
                destination,
            })
        })
        .collect::<Result<Vec<_>, EnvironmentError>>()?;

        Ok(Self { packages, binaries })
    }
}

/// Unpacks packages with `dpkg -x` into a root directory
pub struct ArtifactInstaller<E> {
    executor: E,
    /// Where packages are extracted
    root: PathBuf,
    /// Where per-package extraction logs go
    log_dir: PathBuf,
    extract_program: String,
}

impl<E: ProcessExecutor> ArtifactInstaller<E> {
    pub fn new(executor: E, root: impl Into<PathBuf>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            executor,
            root: root.into(),
            log_dir: log_dir.into(),
            extract_program: "dpkg".to_string(),
        }
    }

    pub fn with_extract_program(mut self, program: impl Into<String>) -> Self {
        self.extract_program = program.into();
        self
    }

    /// Unpack every package then stage the binaries
    ///
    /// Nothing is copied unless every package was found and unpacked.
    pub async fn install(&self, source_dir: &Path, manifest: &InstallManifest) -> Result<(), EnvironmentError> {
        let mut names: Vec<String> = std::fs::read_dir(source_dir)
            .map_err(|e| EnvironmentError::io(source_dir, e))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();

        // resolve everything up front so a missing package aborts before any extraction
        let mut resolved = Vec::with_capacity(manifest.packages.len());
        for prefix in &manifest.packages {
            let name = names
                .iter()
                .find(|name| name.contains(prefix.as_str()))
                .ok_or_else(|| EnvironmentError::PackageNotFound {
                    prefix: prefix.clone(),
                    dir: source_dir.to_path_buf(),
                })?;
            resolved.push((prefix, name.clone()));
        }

        for (prefix, name) in resolved {
            info!("Installing package {}", prefix);
            self.extract(&source_dir.join(&name), &name).await?;
        }
        info!("All packages installed");

        for binary in &manifest.binaries {
            self.stage(binary)?;
        }
        Ok(())
    }

    async fn extract(&self, package: &Path, name: &str) -> Result<(), EnvironmentError> {
        info!("Package found in {}", package.display());
        let log_path = self.log_dir.join(format!("install_{}.log", name));
        let spec = CommandSpec::new(&self.extract_program)
            .arg("-x")
            .arg(package.to_string_lossy())
            .arg(self.root.to_string_lossy())
            .log_to(&log_path);

        info!("Executing installation cmd {}", spec.display());
        let output = self.executor.run(&spec).await?;
        if output.success() {
            info!("Installation of {} successful", package.display());
            Ok(())
        } else {
            Err(EnvironmentError::ExtractionFailed {
                path: package.to_path_buf(),
                exit_code: output.exit_code,
            })
        }
    }

    fn stage(&self, binary: &BinaryTarget) -> Result<(), EnvironmentError> {
        let source = self.root.join(&binary.source);
        std::fs::set_permissions(&source, std::fs::Permissions::from_mode(0o777))
            .map_err(|e| EnvironmentError::io(&source, e))?;
        std::fs::copy(&source, &binary.destination)
            .map_err(|e| EnvironmentError::io(&binary.destination, e))?;
        info!(
            "Copied {} to {} ({})",
            source.display(),
            binary.destination.display(),
            binary.env_var
        );
        Ok(())
    }
}
