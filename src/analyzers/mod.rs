//! Analyzer registry and the per-file analysis driver.
//!
//! Analyzers are a closed set of variants. Each one looks at a single
//! file's text and returns findings; [`Analyzer::analyze`] walks the
//! repository, consults the cache per file when one is given, and merges the
//! per-file output into one [`AnalyzerResult`].

pub mod complexity;
pub mod debt;
pub mod rules;
pub mod security;

pub use complexity::ComplexityAnalyzer;
pub use debt::DebtAnalyzer;
pub use security::SecurityAnalyzer;

use crate::cache::CacheStore;
use crate::error::ScopeError;
use crate::models::{AnalyzerResult, Finding};
use crate::scanner::{FileScanner, ScanConfig};
use anyhow::{Context, Result};
use std::path::Path;
use tracing::debug;

/// One registered analyzer.
pub struct AnalyzerSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub build: fn(include_external: bool) -> Analyzer,
}

/// Name → constructor table. Adding an analyzer means adding a variant to
/// [`Analyzer`] and a row here.
pub const REGISTRY: &[AnalyzerSpec] = &[
    AnalyzerSpec {
        name: security::NAME,
        description: "Leaked credentials, eval/shell injection, disabled TLS checks",
        build: build_security,
    },
    AnalyzerSpec {
        name: debt::NAME,
        description: "TODO/FIXME/HACK markers and unfinished code paths",
        build: build_debt,
    },
    AnalyzerSpec {
        name: complexity::NAME,
        description: "Oversized files, overlong lines, deep nesting",
        build: build_complexity,
    },
];

fn build_security(include_external: bool) -> Analyzer {
    Analyzer::Security(SecurityAnalyzer::new(include_external))
}

fn build_debt(include_external: bool) -> Analyzer {
    Analyzer::Debt(DebtAnalyzer::new(include_external))
}

fn build_complexity(include_external: bool) -> Analyzer {
    Analyzer::Complexity(ComplexityAnalyzer::new(include_external))
}

/// Names of all registered analyzers.
pub fn names() -> Vec<&'static str> {
    REGISTRY.iter().map(|spec| spec.name).collect()
}

/// Resolves a name in the registry.
pub fn lookup(name: &str) -> std::result::Result<&'static AnalyzerSpec, ScopeError> {
    REGISTRY
        .iter()
        .find(|spec| spec.name == name)
        .ok_or_else(|| ScopeError::UnknownAnalyzer {
            name: name.to_string(),
            available: names().join(", "),
        })
}

/// Builds the named analyzer.
pub fn create(name: &str, include_external: bool) -> std::result::Result<Analyzer, ScopeError> {
    lookup(name).map(|spec| (spec.build)(include_external))
}

#[derive(Debug, Clone)]
pub enum Analyzer {
    Security(SecurityAnalyzer),
    Debt(DebtAnalyzer),
    Complexity(ComplexityAnalyzer),
}

impl Analyzer {
    pub fn name(&self) -> &'static str {
        match self {
            Analyzer::Security(_) => security::NAME,
            Analyzer::Debt(_) => debt::NAME,
            Analyzer::Complexity(_) => complexity::NAME,
        }
    }

    /// Whether vendored/third-party code is analyzed too.
    pub fn include_external(&self) -> bool {
        match self {
            Analyzer::Security(a) => a.include_external,
            Analyzer::Debt(a) => a.include_external,
            Analyzer::Complexity(a) => a.include_external,
        }
    }

    /// Findings for a single file.
    pub fn analyze_file(&self, relative_path: &str, content: &str) -> Vec<Finding> {
        match self {
            Analyzer::Security(a) => a.analyze_file(relative_path, content),
            Analyzer::Debt(a) => a.analyze_file(relative_path, content),
            Analyzer::Complexity(a) => a.analyze_file(relative_path, content),
        }
    }

    /// Analyzes a whole repository, reusing cached per-file results for
    /// files whose content has not changed.
    pub fn analyze_with_cache(
        &self,
        repo_path: &Path,
        cache: Option<&CacheStore>,
    ) -> Result<AnalyzerResult> {
        let scanner = FileScanner::new(
            repo_path.to_path_buf(),
            ScanConfig::with_external(self.include_external()),
        );
        let files = scanner
            .scan()
            .with_context(|| format!("Failed to scan {}", repo_path.display()))?;

        let mut result = AnalyzerResult::new(self.name());
        let mut cache_hits = 0usize;
        let mut skipped = 0usize;

        for file in &files {
            if let Some(store) = cache {
                if let Some(mut cached) = store.get(repo_path, &file.path, self.name()) {
                    cache_hits += 1;
                    cached.findings = cached
                        .findings
                        .iter()
                        .map(|f| f.relocated(&file.path))
                        .collect();
                    result.absorb(cached);
                    continue;
                }
            }

            let content = match std::fs::read_to_string(&file.absolute) {
                Ok(c) => c,
                Err(e) => {
                    // Binary or unreadable files are skipped, not fatal
                    debug!("Skipping {}: {}", file.path, e);
                    skipped += 1;
                    continue;
                }
            };

            let mut partial = AnalyzerResult::new(self.name());
            partial.findings = self.analyze_file(&file.path, &content);

            if let Some(store) = cache {
                store.put(repo_path, &file.path, self.name(), &partial);
            }
            result.absorb(partial);
        }

        result
            .metadata
            .insert("files_scanned".to_string(), files.len().into());
        result
            .metadata
            .insert("files_skipped".to_string(), skipped.into());
        result
            .metadata
            .insert("cache_hits".to_string(), cache_hits.into());
        result
            .metadata
            .insert("include_external".to_string(), self.include_external().into());
        result.finalize_summary();

        debug!(
            "{} on {}: {} findings from {} files ({} cached)",
            self.name(),
            repo_path.display(),
            result.findings.len(),
            files.len(),
            cache_hits
        );

        Ok(result)
    }
}
