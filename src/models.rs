//! Data models for analysis output.
//!
//! This module contains the core data structures shared by the analyzers,
//! the orchestrator and the cache: findings, per-run analyzer results and
//! the transport record that carries one unit's outcome across a process
//! boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Severity level of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational - observations with no action required
    Info,
    /// Low severity - style issues, minor suggestions
    Low,
    /// Medium severity - code quality issues, potential bugs
    Medium,
    /// High severity - bugs, security concerns
    High,
    /// Critical severity - security vulnerabilities, leaked credentials
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "Info"),
            Severity::Low => write!(f, "Low"),
            Severity::Medium => write!(f, "Medium"),
            Severity::High => write!(f, "High"),
            Severity::Critical => write!(f, "Critical"),
        }
    }
}

impl Severity {
    /// All severities, most severe first.
    pub const ALL: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Info,
    ];

    /// Returns an emoji representation of the severity.
    pub fn emoji(&self) -> &'static str {
        match self {
            Severity::Info => "🔵",
            Severity::Low => "🟢",
            Severity::Medium => "🟡",
            Severity::High => "🟠",
            Severity::Critical => "🔴",
        }
    }

    /// Lowercase name as used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// A single issue reported by an analyzer.
///
/// Fields are only readable once the finding is built; the builder methods
/// consume `self`, so nothing can change a finding (its severity in
/// particular) after it has been handed to a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    category: String,
    severity: Severity,
    title: String,
    description: String,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    line_number: Option<usize>,
    #[serde(default)]
    suggestion: Option<String>,
    #[serde(default)]
    metadata: BTreeMap<String, Value>,
}

impl Finding {
    /// Creates a finding with no location.
    pub fn new(
        category: impl Into<String>,
        severity: Severity,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            category: category.into(),
            severity,
            title: title.into(),
            description: description.into(),
            location: None,
            line_number: None,
            suggestion: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Attaches a file location (relative to the repository root).
    pub fn at(mut self, location: impl Into<String>, line_number: Option<usize>) -> Self {
        self.location = Some(location.into());
        self.line_number = line_number;
        self
    }

    /// Attaches a remediation suggestion.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Attaches one metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// A copy of this finding reported against `location` instead.
    ///
    /// Cached per-file results are shared by files with identical content,
    /// so a hit must be re-attributed to the file being analyzed.
    pub fn relocated(&self, location: &str) -> Self {
        Self {
            location: Some(location.to_string()),
            ..self.clone()
        }
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn line_number(&self) -> Option<usize> {
        self.line_number
    }

    pub fn suggestion(&self) -> Option<&str> {
        self.suggestion.as_deref()
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }

    /// Formats `location:line` for display.
    pub fn location_label(&self) -> String {
        match (&self.location, self.line_number) {
            (Some(loc), Some(line)) => format!("{}:{}", loc, line),
            (Some(loc), None) => loc.clone(),
            _ => "-".to_string(),
        }
    }
}

/// Full output of one analyzer run against one repository (or one file,
/// when stored in the cache).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnalyzerResult {
    pub analyzer: String,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub summary: BTreeMap<String, Value>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl AnalyzerResult {
    /// Creates an empty result for the named analyzer.
    pub fn new(analyzer: impl Into<String>) -> Self {
        Self {
            analyzer: analyzer.into(),
            ..Default::default()
        }
    }

    /// Appends the findings of a partial (per-file) result.
    pub fn absorb(&mut self, partial: AnalyzerResult) {
        self.findings.extend(partial.findings);
    }

    /// Recomputes the summary mapping from the current findings.
    pub fn finalize_summary(&mut self) {
        let summary = FindingSummary::from_findings(&self.findings);
        self.summary.insert("total".to_string(), summary.total.into());
        for severity in Severity::ALL {
            self.summary
                .insert(severity.as_str().to_string(), summary.count(severity).into());
        }
    }
}

/// Summary of findings, by severity and by category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindingSummary {
    pub total: usize,
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub info: usize,
    pub by_category: BTreeMap<String, usize>,
}

impl FindingSummary {
    /// Creates a summary from a list of findings.
    pub fn from_findings<'a>(findings: impl IntoIterator<Item = &'a Finding>) -> Self {
        let mut summary = Self::default();

        for finding in findings {
            summary.add(finding);
        }

        summary
    }

    /// Counts one more finding.
    pub fn add(&mut self, finding: &Finding) {
        self.total += 1;
        match finding.severity() {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
            Severity::Info => self.info += 1,
        }
        *self
            .by_category
            .entry(finding.category().to_string())
            .or_insert(0) += 1;
    }

    /// Returns the count for one severity.
    pub fn count(&self, severity: Severity) -> usize {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
            Severity::Info => self.info,
        }
    }
}

/// Why a unit failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// The analyzer returned an error or panicked.
    Execution,
    /// The unit exceeded its time bound and was abandoned.
    Timeout,
}

/// Outcome of one (analyzer, repository) unit.
///
/// This is the JSON envelope a `reposcope worker` process prints on stdout
/// and the record the orchestrator aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportRecord {
    pub success: bool,
    pub analyzer: String,
    pub repo_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<AnalyzerResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub elapsed_time: f64,
    pub timestamp: DateTime<Utc>,
    pub pid: u32,
}

impl TransportRecord {
    /// Wraps a successful analyzer run.
    pub fn success(
        analyzer: impl Into<String>,
        repo_path: impl Into<String>,
        result: AnalyzerResult,
        elapsed_time: f64,
    ) -> Self {
        Self {
            success: true,
            analyzer: analyzer.into(),
            repo_path: repo_path.into(),
            result: Some(result),
            error: None,
            error_type: None,
            traceback: None,
            error_kind: None,
            elapsed_time,
            timestamp: Utc::now(),
            pid: std::process::id(),
        }
    }

    /// Wraps a fault raised while executing an analyzer.
    pub fn failure(
        analyzer: impl Into<String>,
        repo_path: impl Into<String>,
        error: impl Into<String>,
        error_type: impl Into<String>,
        traceback: Option<String>,
        elapsed_time: f64,
    ) -> Self {
        Self {
            success: false,
            analyzer: analyzer.into(),
            repo_path: repo_path.into(),
            result: None,
            error: Some(error.into()),
            error_type: Some(error_type.into()),
            traceback,
            error_kind: Some(ErrorKind::Execution),
            elapsed_time,
            timestamp: Utc::now(),
            pid: std::process::id(),
        }
    }

    /// Synthetic record for a unit that exceeded its time bound.
    pub fn timeout(
        analyzer: impl Into<String>,
        repo_path: impl Into<String>,
        timeout_secs: f64,
    ) -> Self {
        Self {
            success: false,
            analyzer: analyzer.into(),
            repo_path: repo_path.into(),
            result: None,
            error: Some(format!("Analysis timed out after {:.0}s", timeout_secs)),
            error_type: Some("Timeout".to_string()),
            traceback: None,
            error_kind: Some(ErrorKind::Timeout),
            elapsed_time: timeout_secs,
            timestamp: Utc::now(),
            pid: std::process::id(),
        }
    }

    /// Whether this record is a synthetic timeout.
    pub fn is_timeout(&self) -> bool {
        self.error_kind == Some(ErrorKind::Timeout)
    }

    /// Findings carried by a successful record.
    pub fn findings(&self) -> &[Finding] {
        self.result
            .as_ref()
            .map(|r| r.findings.as_slice())
            .unwrap_or(&[])
    }
}
