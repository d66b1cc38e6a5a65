//! How a single unit is executed: on a blocking thread inside this process,
//! or in a child `reposcope worker` process.

use crate::cache::CacheStore;
use crate::models::TransportRecord;
use crate::worker;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};

/// Where units run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Isolation {
    /// Blocking thread per unit; panics are caught.
    #[default]
    InProcess,
    /// Child process per unit; killed on timeout.
    Subprocess,
}

impl fmt::Display for Isolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Isolation::InProcess => write!(f, "in-process"),
            Isolation::Subprocess => write!(f, "subprocess"),
        }
    }
}

impl FromStr for Isolation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in-process" => Ok(Isolation::InProcess),
            "subprocess" => Ok(Isolation::Subprocess),
            other => Err(format!(
                "Unknown isolation mode '{}' (expected in-process or subprocess)",
                other
            )),
        }
    }
}

type UnitFn = Arc<dyn Fn(&str, &Path) -> TransportRecord + Send + Sync>;

/// Runs one unit and always yields a record.
#[derive(Clone)]
pub enum UnitExecutor {
    InProcess(UnitFn),
    Subprocess {
        program: PathBuf,
        include_external: bool,
        cache_dir: Option<PathBuf>,
    },
}

impl fmt::Debug for UnitExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitExecutor::InProcess(_) => write!(f, "UnitExecutor::InProcess"),
            UnitExecutor::Subprocess { program, .. } => {
                write!(f, "UnitExecutor::Subprocess({})", program.display())
            }
        }
    }
}

impl UnitExecutor {
    /// Runs the registered analyzers on blocking threads of this process.
    pub fn in_process(include_external: bool, cache: Option<Arc<CacheStore>>) -> Self {
        Self::custom(move |analyzer: &str, repo: &Path| {
            match worker::run_analyzer(analyzer, repo, include_external, cache.as_deref()) {
                Ok(record) => record,
                Err(e) => TransportRecord::failure(
                    analyzer,
                    repo.display().to_string(),
                    e.to_string(),
                    "ValidationError",
                    None,
                    0.0,
                ),
            }
        })
    }

    /// Runs each unit as `<program> worker ...`.
    pub fn subprocess(
        program: impl Into<PathBuf>,
        include_external: bool,
        cache_dir: Option<PathBuf>,
    ) -> Self {
        UnitExecutor::Subprocess {
            program: program.into(),
            include_external,
            cache_dir,
        }
    }

    /// Wraps an arbitrary unit function.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&str, &Path) -> TransportRecord + Send + Sync + 'static,
    {
        UnitExecutor::InProcess(Arc::new(f))
    }

    pub fn isolation(&self) -> Isolation {
        match self {
            UnitExecutor::InProcess(_) => Isolation::InProcess,
            UnitExecutor::Subprocess { .. } => Isolation::Subprocess,
        }
    }

    /// Executes one unit within `timeout`.
    pub async fn execute(&self, analyzer: &str, repo: &Path, timeout: Duration) -> TransportRecord {
        match self {
            UnitExecutor::InProcess(f) => run_blocking(Arc::clone(f), analyzer, repo, timeout).await,
            UnitExecutor::Subprocess {
                program,
                include_external,
                cache_dir,
            } => {
                run_child(
                    program,
                    analyzer,
                    repo,
                    *include_external,
                    cache_dir.as_deref(),
                    timeout,
                )
                .await
            }
        }
    }
}

async fn run_blocking(f: UnitFn, analyzer: &str, repo: &Path, timeout: Duration) -> TransportRecord {
    let repo_str = repo.display().to_string();
    let start = Instant::now();
    let handle = {
        let analyzer = analyzer.to_string();
        let repo = repo.to_path_buf();
        tokio::task::spawn_blocking(move || f(&analyzer, &repo))
    };

    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(record)) => record,
        Ok(Err(e)) => {
            let message = if e.is_panic() {
                worker::panic_message(e.into_panic().as_ref())
            } else {
                e.to_string()
            };
            warn!("{} on {} crashed: {}", analyzer, repo_str, message);
            TransportRecord::failure(
                analyzer,
                repo_str,
                message,
                "Panic",
                None,
                start.elapsed().as_secs_f64(),
            )
        }
        Err(_) => {
            // The blocking thread is abandoned, not stopped
            warn!("{} on {} timed out after {:?}", analyzer, repo_str, timeout);
            TransportRecord::timeout(analyzer, repo_str, timeout.as_secs_f64())
        }
    }
}

async fn run_child(
    program: &Path,
    analyzer: &str,
    repo: &Path,
    include_external: bool,
    cache_dir: Option<&Path>,
    timeout: Duration,
) -> TransportRecord {
    let repo_str = repo.display().to_string();
    let start = Instant::now();

    let mut cmd = Command::new(program);
    cmd.arg("worker")
        .arg("--analyzer")
        .arg(analyzer)
        .arg("--repo")
        .arg(repo);
    if include_external {
        cmd.arg("--include-external");
    }
    match cache_dir {
        Some(dir) => {
            cmd.arg("--cache-dir").arg(dir);
        }
        None => {
            cmd.arg("--no-cache");
        }
    }
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return TransportRecord::failure(
                analyzer,
                repo_str,
                format!("Failed to start worker process: {}", e),
                "SpawnError",
                None,
                start.elapsed().as_secs_f64(),
            )
        }
    };
    debug!("Started worker pid {:?} for {} on {}", child.id(), analyzer, repo_str);

    // Dropping the wait future on timeout drops the child, which kills it
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return TransportRecord::failure(
                analyzer,
                repo_str,
                format!("Worker process error: {}", e),
                "WorkerProcessError",
                None,
                start.elapsed().as_secs_f64(),
            )
        }
        Err(_) => {
            warn!("{} on {} timed out after {:?}", analyzer, repo_str, timeout);
            return TransportRecord::timeout(analyzer, repo_str, timeout.as_secs_f64());
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    match serde_json::from_str::<TransportRecord>(stdout.trim()) {
        Ok(record) => record,
        Err(parse_error) => TransportRecord::failure(
            analyzer,
            repo_str,
            format!(
                "Worker exited with code {} without a valid record: {}",
                output.status.code().unwrap_or(-1),
                parse_error
            ),
            "WorkerProcessError",
            (!stderr.is_empty()).then_some(stderr),
            start.elapsed().as_secs_f64(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolation_parse_and_display() {
        assert_eq!("subprocess".parse::<Isolation>().unwrap(), Isolation::Subprocess);
        assert_eq!(Isolation::InProcess.to_string(), "in-process");
        assert!("threads".parse::<Isolation>().is_err());
    }

    #[tokio::test]
    async fn test_panicking_unit_keeps_its_message() {
        let executor = UnitExecutor::custom(|_: &str, repo: &Path| -> TransportRecord {
            panic!("index out of range in {}", repo.display())
        });
        let record = executor
            .execute("debt", Path::new("/tmp/repo"), Duration::from_secs(5))
            .await;

        assert!(!record.success);
        assert_eq!(record.error_type.as_deref(), Some("Panic"));
        assert_eq!(record.error.as_deref(), Some("index out of range in /tmp/repo"));
    }

    #[tokio::test]
    async fn test_missing_worker_program_is_failure_record() {
        let executor = UnitExecutor::subprocess("/nonexistent/reposcope-bin", false, None);
        assert_eq!(executor.isolation(), Isolation::Subprocess);

        let record = executor
            .execute("debt", Path::new("/tmp"), Duration::from_secs(5))
            .await;
        assert!(!record.success);
        assert_eq!(record.error_type.as_deref(), Some("SpawnError"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_child_without_record_is_failure() {
        // `true` accepts any arguments and prints nothing
        let executor = UnitExecutor::subprocess("true", false, None);
        let record = executor
            .execute("debt", Path::new("/tmp"), Duration::from_secs(5))
            .await;
        assert!(!record.success);
        assert_eq!(record.error_type.as_deref(), Some("WorkerProcessError"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_child_timeout() {
        // `sleep worker ...` fails fast, so use a shell that ignores its args
        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("slow-worker");
        std::fs::write(&script, "#!/bin/sh\nsleep 5\n").unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let record = UnitExecutor::subprocess(&script, false, None)
            .execute("debt", Path::new("/tmp"), Duration::from_millis(200))
            .await;
        assert!(record.is_timeout());
    }
}
