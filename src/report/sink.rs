//! Persisting per-repository findings.

use super::RepositoryReport;
use crate::fsutil::write_json_atomic;
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use tracing::debug;

/// Somewhere to put a repository's aggregated findings.
pub trait FindingsSink {
    /// Persists `repo` and returns where it went.
    fn persist(&self, repo: &RepositoryReport) -> Result<PathBuf>;
}

#[derive(Serialize)]
struct FindingsDocument<'a> {
    repository: &'a str,
    path: &'a str,
    generated_at: chrono::DateTime<chrono::Utc>,
    summary: &'a crate::models::FindingSummary,
    findings: &'a [crate::models::Finding],
}

/// Writes `<dir>/<repo-name>.findings.json`. Separators in qualified names
/// (`team1/api`) become `__`.
pub struct JsonDirectorySink {
    dir: PathBuf,
}

impl JsonDirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl FindingsSink for JsonDirectorySink {
    fn persist(&self, repo: &RepositoryReport) -> Result<PathBuf> {
        let file_stem = repo.name.replace(['/', '\\'], "__");
        let path = self.dir.join(format!("{}.findings.json", file_stem));
        let document = FindingsDocument {
            repository: &repo.name,
            path: &repo.path,
            generated_at: chrono::Utc::now(),
            summary: &repo.summary,
            findings: &repo.findings,
        };

        write_json_atomic(&path, &document)
            .with_context(|| format!("Failed to write findings to {}", path.display()))?;
        debug!("Wrote {} findings to {}", repo.findings.len(), path.display());
        Ok(path)
    }
}
