//! Line-oriented pattern rules shared by the pattern-based analyzers.

use crate::models::{Finding, Severity};
use regex::Regex;

/// One regex rule applied line by line.
pub struct PatternRule {
    pub id: &'static str,
    pub pattern: Regex,
    pub severity: Severity,
    pub title: &'static str,
    pub description: &'static str,
    pub suggestion: &'static str,
    /// Restrict the rule to these extensions; `None` applies everywhere.
    pub extensions: Option<&'static [&'static str]>,
}

impl PatternRule {
    pub fn new(
        id: &'static str,
        pattern: &str,
        severity: Severity,
        title: &'static str,
        description: &'static str,
        suggestion: &'static str,
    ) -> Option<Self> {
        let pattern = match Regex::new(pattern) {
            Ok(re) => re,
            Err(e) => {
                tracing::error!("Dropping rule {}: {}", id, e);
                return None;
            }
        };

        Some(Self {
            id,
            pattern,
            severity,
            title,
            description,
            suggestion,
            extensions: None,
        })
    }

    pub fn only(mut self, extensions: &'static [&'static str]) -> Self {
        self.extensions = Some(extensions);
        self
    }

    fn applies_to(&self, extension: &str) -> bool {
        self.extensions
            .map(|exts| exts.contains(&extension))
            .unwrap_or(true)
    }
}

/// Runs every applicable rule over each line of `content`.
pub fn scan_lines(
    category: &str,
    rules: &[PatternRule],
    relative_path: &str,
    content: &str,
) -> Vec<Finding> {
    let extension = std::path::Path::new(relative_path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    let active: Vec<&PatternRule> = rules.iter().filter(|r| r.applies_to(&extension)).collect();
    if active.is_empty() {
        return Vec::new();
    }

    let mut findings = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        for rule in &active {
            if rule.pattern.is_match(line) {
                findings.push(
                    Finding::new(category, rule.severity, rule.title, rule.description)
                        .at(relative_path, Some(idx + 1))
                        .with_suggestion(rule.suggestion)
                        .with_metadata("rule", rule.id),
                );
            }
        }
    }

    findings
}
