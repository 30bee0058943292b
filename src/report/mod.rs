//! Run reports: the results table and the status file

use crate::core::{RunReport, ScenarioRecord};
use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::info;

pub const RESULTS_FILE: &str = "test_results.tsv";
pub const STATUS_FILE: &str = "check_status.tsv";

/// Trait for report destinations
#[async_trait::async_trait]
pub trait ReportSink: Send + Sync {
    /// Persist a finished run
    async fn write(&self, report: &RunReport) -> Result<()>;
}

/// Writes the two tab-separated files into a result directory
pub struct TsvReport {
    dir: PathBuf,
}

impl TsvReport {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn results_path(&self) -> PathBuf {
        self.dir.join(RESULTS_FILE)
    }

    pub fn status_path(&self) -> PathBuf {
        self.dir.join(STATUS_FILE)
    }
}

#[async_trait::async_trait]
impl ReportSink for TsvReport {
    async fn write(&self, report: &RunReport) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        write_atomic(&self.dir, RESULTS_FILE, &render_results(report))?;
        write_atomic(&self.dir, STATUS_FILE, &render_status(report))?;

        info!(
            "Result written to {} and {}",
            self.results_path().display(),
            self.status_path().display()
        );
        Ok(())
    }
}

/// Keeps reports in memory (for testing or dry runs)
#[derive(Default)]
pub struct InMemoryReport {
    reports: tokio::sync::RwLock<Vec<RunReport>>,
}

impl InMemoryReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn reports(&self) -> Vec<RunReport> {
        self.reports.read().await.clone()
    }
}

#[async_trait::async_trait]
impl ReportSink for InMemoryReport {
    async fn write(&self, report: &RunReport) -> Result<()> {
        self.reports.write().await.push(report.clone());
        Ok(())
    }
}

/// One row per scenario: name, status, duration, requirement, message
pub fn render_results(report: &RunReport) -> String {
    report.records.iter().map(render_record).collect()
}

fn render_record(record: &ScenarioRecord) -> String {
    format!(
        "{}\t{}\t{:.3}\t{}\t{}\n",
        field(&record.name),
        record.status.token(),
        record.duration.as_secs_f64(),
        field(&record.requirement),
        field(record.status.message())
    )
}

/// Single row: state token and summary
pub fn render_status(report: &RunReport) -> String {
    format!("{}\t{}\n", report.status.state_token(), field(&report.summary()))
}

/// Keep a value on one TSV cell
fn field(value: &str) -> String {
    value.replace('\t', " ").replace('\r', "").replace('\n', "\\n")
}

/// Write through a temp file in the same directory, then rename over `name`
fn write_atomic(dir: &Path, name: &str, content: &str) -> Result<()> {
    let target = dir.join(name);
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    tmp.write_all(content.as_bytes())?;
    tmp.flush()?;
    tmp.persist(&target)
        .with_context(|| format!("Failed to write {}", target.display()))?;
    Ok(())
}
