//! Run reports.
//!
//! A [`RunReport`] is the user-facing view of an orchestrated run: one
//! section per repository with its findings sorted by severity, plus the
//! units that failed. It renders to Markdown or JSON and its per-repository
//! findings can be persisted through a [`FindingsSink`].

pub mod generator;
pub mod sink;

pub use generator::{generate_json_report, generate_markdown_report};
pub use sink::{FindingsSink, JsonDirectorySink};

use crate::graph::repository_names;
use crate::models::{ErrorKind, Finding, FindingSummary, Severity, TransportRecord};
use crate::orchestrator::{OrchestrationReport, RunSummary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Report metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub analysis_date: DateTime<Utc>,
    pub tool_version: String,
    pub analyzers: Vec<String>,
    pub isolation: String,
    pub cache_enabled: bool,
}

/// One unit that did not succeed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitFailure {
    pub analyzer: String,
    pub error: String,
    pub error_type: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub elapsed_time: f64,
}

/// Everything found in one repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryReport {
    pub name: String,
    pub path: String,
    pub analyzers_run: Vec<String>,
    pub summary: FindingSummary,
    pub findings: Vec<Finding>,
    pub failures: Vec<UnitFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<serde_json::Value>,
}

impl RepositoryReport {
    fn from_records(name: String, path: &str, records: &[TransportRecord]) -> Self {
        let mut findings: Vec<Finding> = records
            .iter()
            .flat_map(|r| r.findings().iter().cloned())
            .collect();
        sort_findings(&mut findings);

        let mut analyzers_run: Vec<String> = records.iter().map(|r| r.analyzer.clone()).collect();
        analyzers_run.sort();

        let mut failures: Vec<UnitFailure> = records
            .iter()
            .filter(|r| !r.success)
            .map(|r| UnitFailure {
                analyzer: r.analyzer.clone(),
                error: r.error.clone().unwrap_or_else(|| "unknown error".to_string()),
                error_type: r.error_type.clone(),
                error_kind: r.error_kind,
                elapsed_time: r.elapsed_time,
            })
            .collect();
        failures.sort_by(|a, b| a.analyzer.cmp(&b.analyzer));

        let classification = records
            .iter()
            .filter_map(|r| r.result.as_ref())
            .find_map(|result| result.metadata.get("repository").cloned());

        Self {
            name,
            path: path.to_string(),
            analyzers_run,
            summary: FindingSummary::from_findings(&findings),
            findings,
            failures,
            classification,
        }
    }
}

/// The complete report for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub metadata: RunMetadata,
    pub summary: RunSummary,
    pub repositories: Vec<RepositoryReport>,
}

impl RunReport {
    pub fn new(metadata: RunMetadata, orchestration: &OrchestrationReport) -> Self {
        let paths: Vec<&str> = orchestration.results.keys().map(String::as_str).collect();
        let repositories = repository_names(&paths)
            .into_iter()
            .zip(&orchestration.results)
            .map(|(name, (path, records))| RepositoryReport::from_records(name, path, records))
            .collect();

        Self {
            metadata,
            summary: orchestration.summary.clone(),
            repositories,
        }
    }

    /// Every finding across repositories.
    pub fn findings(&self) -> impl Iterator<Item = &Finding> {
        self.repositories.iter().flat_map(|r| r.findings.iter())
    }

    /// Whether any finding is at or above `threshold`.
    pub fn has_findings_at_or_above(&self, threshold: Severity) -> bool {
        self.findings().any(|f| f.severity() >= threshold)
    }
}

/// Sorts findings by severity (most severe first), then location and line.
pub fn sort_findings(findings: &mut [Finding]) {
    findings.sort_by(|a, b| {
        b.severity()
            .cmp(&a.severity())
            .then_with(|| a.location().cmp(&b.location()))
            .then_with(|| a.line_number().cmp(&b.line_number()))
    });
}

/// Files with the most findings, across repositories.
pub fn most_affected_files(report: &RunReport, n: usize) -> Vec<(String, usize)> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for repo in &report.repositories {
        for finding in &repo.findings {
            if let Some(location) = finding.location() {
                *counts
                    .entry(format!("{}/{}", repo.name, location))
                    .or_default() += 1;
            }
        }
    }

    let mut files: Vec<(String, usize)> = counts.into_iter().collect();
    files.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    files.truncate(n);
    files
}

/// Findings titles that repeat, most frequent first.
pub fn recurring_titles(report: &RunReport) -> Vec<(String, usize)> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for finding in report.findings() {
        *counts.entry(finding.title().to_string()).or_default() += 1;
    }

    let mut patterns: Vec<_> = counts.into_iter().filter(|(_, count)| *count > 1).collect();
    patterns.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    patterns
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::AnalyzerResult;
    use std::collections::BTreeMap;

    pub(crate) fn sample_report() -> RunReport {
        let mut result = AnalyzerResult::new("security");
        result.findings = vec![
            Finding::new("security", Severity::Low, "Weak hash algorithm", "md5")
                .at("util.py", Some(9)),
            Finding::new("security", Severity::Critical, "AWS access key in source", "key")
                .at("config.py", Some(2))
                .with_suggestion("Rotate the key."),
            Finding::new("security", Severity::Low, "Weak hash algorithm", "sha1")
                .at("util.py", Some(3)),
        ];
        result.finalize_summary();

        let mut results = BTreeMap::new();
        results.insert(
            "/work/api".to_string(),
            vec![
                TransportRecord::success("security", "/work/api", result, 0.4),
                TransportRecord::timeout("debt", "/work/api", 300.0),
            ],
        );
        results.insert(
            "/work/web".to_string(),
            vec![TransportRecord::failure(
                "security",
                "/work/web",
                "permission denied",
                "IoError",
                None,
                0.1,
            )],
        );

        let orchestration = OrchestrationReport {
            results,
            summary: RunSummary {
                total_units: 3,
                succeeded: 1,
                failed: 1,
                timed_out: 1,
                elapsed_secs: 2.5,
                workers: 4,
                timeout_secs: 300,
                ..Default::default()
            },
        };

        RunReport::new(
            RunMetadata {
                analysis_date: Utc::now(),
                tool_version: "0.4.0".to_string(),
                analyzers: vec!["security".to_string(), "debt".to_string()],
                isolation: "in-process".to_string(),
                cache_enabled: true,
            },
            &orchestration,
        )
    }

    #[test]
    fn test_repository_sections() {
        let report = sample_report();
        assert_eq!(report.repositories.len(), 2);

        let api = &report.repositories[0];
        assert_eq!(api.name, "api");
        assert_eq!(api.analyzers_run, vec!["debt", "security"]);
        assert_eq!(api.findings[0].severity(), Severity::Critical);
        assert_eq!(api.findings[1].location_label(), "util.py:3");
        assert_eq!(api.failures.len(), 1);
        assert_eq!(api.failures[0].error_kind, Some(ErrorKind::Timeout));

        let web = &report.repositories[1];
        assert!(web.findings.is_empty());
        assert_eq!(web.failures[0].error_type.as_deref(), Some("IoError"));
    }

    #[test]
    fn test_threshold() {
        let report = sample_report();
        assert!(report.has_findings_at_or_above(Severity::Critical));
        assert!(report.has_findings_at_or_above(Severity::Low));
    }

    #[test]
    fn test_aggregations() {
        let report = sample_report();
        assert_eq!(
            most_affected_files(&report, 1),
            vec![("api/util.py".to_string(), 2)]
        );
        assert_eq!(
            recurring_titles(&report),
            vec![("Weak hash algorithm".to_string(), 2)]
        );
    }

    #[test]
    fn test_repositories_sharing_a_directory_name_stay_apart() {
        let mut results = BTreeMap::new();
        for path in ["/a/team1/api", "/a/team2/api"] {
            results.insert(
                path.to_string(),
                vec![TransportRecord::success("debt", path, AnalyzerResult::new("debt"), 0.0)],
            );
        }
        let orchestration = OrchestrationReport {
            results,
            summary: RunSummary::default(),
        };

        let report = RunReport::new(sample_report().metadata, &orchestration);
        let names: Vec<&str> = report.repositories.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["team1/api", "team2/api"]);
    }
}
