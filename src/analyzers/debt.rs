//! Technical-debt markers: TODO/FIXME/HACK/XXX comments and unfinished
//! code paths.

use super::rules::{scan_lines, PatternRule};
use crate::models::{Finding, Severity};
use once_cell::sync::Lazy;

pub const NAME: &str = "debt";

static RULES: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    [
        PatternRule::new(
            "fixme",
            r"(#|//|/\*|\*|--)\s*(FIXME|BUG)\b",
            Severity::Medium,
            "FIXME marker",
            "A comment flags known-broken behaviour.",
            "Fix the issue or open a tracked ticket and reference it.",
        ),
        PatternRule::new(
            "hack",
            r"(#|//|/\*|\*|--)\s*(HACK|XXX)\b",
            Severity::Low,
            "HACK marker",
            "A comment flags a workaround.",
            "Replace the workaround with a proper fix.",
        ),
        PatternRule::new(
            "todo",
            r"(#|//|/\*|\*|--)\s*TODO\b",
            Severity::Info,
            "TODO marker",
            "A comment records pending work.",
            "Schedule the work or remove the stale note.",
        ),
        PatternRule::new(
            "unfinished-rust",
            r"\b(todo|unimplemented)!\s*\(",
            Severity::Medium,
            "Unfinished code path",
            "This code panics when reached.",
            "Implement the branch or return an error.",
        )
        .map(|r| r.only(&["rs"])),
        PatternRule::new(
            "unfinished-python",
            r"raise\s+NotImplementedError",
            Severity::Low,
            "Unfinished code path",
            "This code raises NotImplementedError when reached.",
            "Implement the method or mark the class abstract.",
        )
        .map(|r| r.only(&["py"])),
    ]
    .into_iter()
    .flatten()
    .collect()
});

/// Technical-debt analyzer.
#[derive(Debug, Clone, Default)]
pub struct DebtAnalyzer {
    pub include_external: bool,
}

impl DebtAnalyzer {
    pub fn new(include_external: bool) -> Self {
        Self { include_external }
    }

    pub fn analyze_file(&self, relative_path: &str, content: &str) -> Vec<Finding> {
        scan_lines(NAME, &RULES, relative_path, content)
    }
}
