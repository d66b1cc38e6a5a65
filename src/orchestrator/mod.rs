//! Parallel orchestrator.
//!
//! Runs every (repository, analyzer) unit on a bounded pool. Each unit gets
//! its own time bound and produces exactly one [`TransportRecord`]; a unit
//! that fails, panics or times out never affects its siblings. Results are
//! consumed in completion order and grouped by repository path.

mod executor;

pub use executor::{Isolation, UnitExecutor};

use crate::analyzers;
use crate::error::{Result, ScopeError};
use crate::models::{FindingSummary, TransportRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Default per-unit time bound.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Called once per finished unit with (repository, analyzer, success).
pub type ProgressFn = Arc<dyn Fn(&str, &str, bool) + Send + Sync>;

/// Pool size matching the available hardware parallelism.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Aggregate counts for one orchestrated run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_units: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub findings: FindingSummary,
    pub elapsed_secs: f64,
    pub workers: usize,
    pub timeout_secs: u64,
}

/// Everything an orchestrated run produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestrationReport {
    /// Records grouped by repository path.
    pub results: BTreeMap<String, Vec<TransportRecord>>,
    pub summary: RunSummary,
}

impl OrchestrationReport {
    /// All records, in repository order.
    pub fn records(&self) -> impl Iterator<Item = &TransportRecord> {
        self.results.values().flatten()
    }

    /// Records that did not succeed.
    pub fn failures(&self) -> impl Iterator<Item = &TransportRecord> {
        self.records().filter(|r| !r.success)
    }

    fn push(&mut self, record: TransportRecord) {
        self.summary.total_units += 1;
        if record.success {
            self.summary.succeeded += 1;
            for finding in record.findings() {
                self.summary.findings.add(finding);
            }
        } else if record.is_timeout() {
            self.summary.timed_out += 1;
        } else {
            self.summary.failed += 1;
        }

        self.results
            .entry(record.repo_path.clone())
            .or_default()
            .push(record);
    }
}

/// Fans units out over a bounded pool.
pub struct Orchestrator {
    max_workers: usize,
    timeout: Duration,
    executor: UnitExecutor,
    progress: Option<ProgressFn>,
}

impl Orchestrator {
    pub fn new(executor: UnitExecutor) -> Self {
        Self {
            max_workers: default_workers(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            executor,
            progress: None,
        }
    }

    /// Sets the pool size. Zero selects the hardware default.
    pub fn with_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = if max_workers == 0 {
            default_workers()
        } else {
            max_workers
        };
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Runs every analyzer against every repository.
    ///
    /// Unknown analyzers and missing repositories are rejected before any
    /// unit starts. After that the run always completes and returns one
    /// record per unit.
    pub async fn run(
        &self,
        repositories: &[PathBuf],
        analyzer_names: &[String],
    ) -> Result<OrchestrationReport> {
        for name in analyzer_names {
            analyzers::lookup(name)?;
        }
        for repo in repositories {
            if !repo.exists() {
                return Err(ScopeError::RepositoryNotFound(repo.clone()));
            }
        }

        let start = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut pending: BTreeSet<(String, String)> = BTreeSet::new();
        let mut tasks: JoinSet<TransportRecord> = JoinSet::new();

        info!(
            "Running {} unit(s) on {} worker(s), timeout {}s",
            repositories.len() * analyzer_names.len(),
            self.max_workers,
            self.timeout.as_secs()
        );

        for repo in repositories {
            for analyzer in analyzer_names {
                let repo_key = repo.display().to_string();
                if !pending.insert((repo_key.clone(), analyzer.clone())) {
                    debug!("Skipping duplicate unit {} on {}", analyzer, repo_key);
                    continue;
                }

                let semaphore = Arc::clone(&semaphore);
                let executor = self.executor.clone();
                let timeout = self.timeout;
                let repo = repo.clone();
                let analyzer = analyzer.clone();

                tasks.spawn(async move {
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(e) => {
                            return TransportRecord::failure(
                                analyzer,
                                repo_key,
                                e.to_string(),
                                "PoolClosed",
                                None,
                                0.0,
                            )
                        }
                    };
                    executor.execute(&analyzer, &repo, timeout).await
                });
            }
        }

        let mut report = OrchestrationReport::default();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(record) => {
                    pending.remove(&(record.repo_path.clone(), record.analyzer.clone()));
                    if let Some(progress) = &self.progress {
                        progress(&record.repo_path, &record.analyzer, record.success);
                    }
                    report.push(record);
                }
                Err(e) => {
                    // Identity is recovered below from the pending set
                    warn!("Unit task ended abnormally: {}", e);
                }
            }
        }

        for (repo, analyzer) in std::mem::take(&mut pending) {
            let record = TransportRecord::failure(
                analyzer,
                repo,
                "Unit task aborted before producing a result",
                "TaskAborted",
                None,
                0.0,
            );
            if let Some(progress) = &self.progress {
                progress(&record.repo_path, &record.analyzer, false);
            }
            report.push(record);
        }

        report.summary.elapsed_secs = start.elapsed().as_secs_f64();
        report.summary.workers = self.max_workers;
        report.summary.timeout_secs = self.timeout.as_secs();

        info!(
            "Run finished: {} ok, {} failed, {} timed out in {:.2}s",
            report.summary.succeeded,
            report.summary.failed,
            report.summary.timed_out,
            report.summary.elapsed_secs
        );

        Ok(report)
    }
}
