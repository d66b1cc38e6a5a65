//! The analyzer worker: runs one analyzer against one repository and turns
//! every outcome into a [`TransportRecord`].
//!
//! Validation problems (unknown analyzer, missing repository) are returned
//! as errors before any work starts. Everything that goes wrong after that,
//! panics included, becomes a failure record.

use crate::analyzers;
use crate::cache::CacheStore;
use crate::error::{Result, ScopeError};
use crate::models::TransportRecord;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, warn};

/// Checks the analyzer name and repository path.
pub fn validate(analyzer: &str, repo_path: &Path) -> Result<()> {
    analyzers::lookup(analyzer)?;
    if !repo_path.exists() {
        return Err(ScopeError::RepositoryNotFound(repo_path.to_path_buf()));
    }
    Ok(())
}

/// Runs `analyzer` on `repo_path`.
pub fn run_analyzer(
    analyzer: &str,
    repo_path: &Path,
    include_external: bool,
    cache: Option<&CacheStore>,
) -> Result<TransportRecord> {
    validate(analyzer, repo_path)?;
    let instance = analyzers::create(analyzer, include_external)?;

    Ok(execute(analyzer, repo_path, || {
        instance.analyze_with_cache(repo_path, cache)
    }))
}

/// Executes `job` at the isolation boundary: errors and panics are
/// converted to failure records, never propagated.
pub fn execute<F>(analyzer: &str, repo_path: &Path, job: F) -> TransportRecord
where
    F: FnOnce() -> anyhow::Result<crate::models::AnalyzerResult>,
{
    let repo = repo_path.display().to_string();
    let start = Instant::now();

    let outcome = panic::catch_unwind(AssertUnwindSafe(job));
    let elapsed = start.elapsed().as_secs_f64();

    match outcome {
        Ok(Ok(result)) => {
            debug!("{} on {} finished in {:.2}s", analyzer, repo, elapsed);
            TransportRecord::success(analyzer, repo, result, elapsed)
        }
        Ok(Err(e)) => {
            warn!("{} on {} failed: {:#}", analyzer, repo, e);
            TransportRecord::failure(
                analyzer,
                repo,
                format!("{:#}", e),
                error_type(&e),
                Some(format!("{:?}", e)),
                elapsed,
            )
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!("{} on {} panicked: {}", analyzer, repo, message);
            TransportRecord::failure(
                analyzer,
                repo,
                message,
                "Panic",
                Some(std::backtrace::Backtrace::force_capture().to_string()),
                elapsed,
            )
        }
    }
}

/// Short classification of an analyzer error, from its root cause.
fn error_type(e: &anyhow::Error) -> String {
    let root = e.root_cause();
    if root.downcast_ref::<std::io::Error>().is_some() {
        "IoError".to_string()
    } else if root.downcast_ref::<serde_json::Error>().is_some() {
        "JsonError".to_string()
    } else if root.downcast_ref::<walkdir::Error>().is_some() {
        "WalkError".to_string()
    } else {
        "AnalysisError".to_string()
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unit panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AnalyzerResult;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_success_record() {
        let repo = TempDir::new().unwrap();
        fs::write(repo.path().join("a.py"), "# TODO x\n").unwrap();

        let record = run_analyzer("debt", repo.path(), false, None).unwrap();
        assert!(record.success);
        assert_eq!(record.analyzer, "debt");
        assert_eq!(record.findings().len(), 1);
        assert_eq!(record.pid, std::process::id());
        assert!(record.error.is_none());
    }

    #[test]
    fn test_validation_errors() {
        let repo = TempDir::new().unwrap();

        let err = run_analyzer("nope", repo.path(), false, None).unwrap_err();
        assert!(matches!(err, ScopeError::UnknownAnalyzer { .. }));

        let missing = repo.path().join("missing");
        let err = run_analyzer("debt", &missing, false, None).unwrap_err();
        assert!(matches!(err, ScopeError::RepositoryNotFound(_)));
    }

    #[test]
    fn test_error_becomes_failure_record() {
        let record = execute("debt", Path::new("/repo"), || {
            let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
            Err(anyhow::Error::new(io).context("reading file"))
        });

        assert!(!record.success);
        assert_eq!(record.error_type.as_deref(), Some("IoError"));
        assert!(record.error.as_deref().unwrap().contains("denied"));
        assert!(record.traceback.is_some());
        assert!(!record.is_timeout());
    }

    #[test]
    fn test_panic_becomes_failure_record() {
        let record = execute("debt", Path::new("/repo"), || -> anyhow::Result<AnalyzerResult> {
            panic!("boom")
        });

        assert!(!record.success);
        assert_eq!(record.error_type.as_deref(), Some("Panic"));
        assert_eq!(record.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_panic_message_payloads() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u32), "unit panicked");
    }

    #[test]
    fn test_record_wire_shape() {
        let record = execute("debt", Path::new("/repo"), || Ok(AnalyzerResult::new("debt")));
        let json = serde_json::to_value(&record).unwrap();

        for key in ["success", "analyzer", "repo_path", "result", "elapsed_time", "timestamp", "pid"] {
            assert!(json.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(json["result"]["analyzer"], "debt");
    }
}
