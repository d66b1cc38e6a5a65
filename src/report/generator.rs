//! Markdown and JSON rendering of a [`RunReport`].

use super::{most_affected_files, recurring_titles, RepositoryReport, RunReport};
use crate::models::{Finding, Severity};
use crate::orchestrator::RunSummary;
use anyhow::Result;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &RunReport) -> String {
    let mut output = String::new();

    output.push_str("# reposcope Report\n\n");
    output.push_str(&generate_metadata_section(report));
    output.push_str(&generate_table_of_contents(report));
    output.push_str(&generate_summary_section(report));
    output.push_str(&generate_repositories_section(&report.repositories));
    output.push_str(&generate_footer());

    output
}

fn anchor(name: &str) -> String {
    name.replace(['/', '.', ' '], "-").to_lowercase()
}

/// Generate the metadata section.
fn generate_metadata_section(report: &RunReport) -> String {
    let metadata = &report.metadata;
    let summary = &report.summary;
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!(
        "- **Analysis Date:** {}\n",
        metadata.analysis_date.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Tool Version:** `{}`\n", metadata.tool_version));
    section.push_str(&format!(
        "- **Repositories:** {}\n",
        report.repositories.len()
    ));
    section.push_str(&format!(
        "- **Analyzers:** {}\n",
        metadata.analyzers.join(", ")
    ));
    section.push_str(&format!(
        "- **Workers:** {} ({}, timeout {}s)\n",
        summary.workers, metadata.isolation, summary.timeout_secs
    ));
    section.push_str(&format!(
        "- **Cache:** {}\n",
        if metadata.cache_enabled { "enabled" } else { "disabled" }
    ));
    section.push_str(&format!(
        "- **Analysis Duration:** {:.1}s\n",
        summary.elapsed_secs
    ));
    section.push('\n');

    section
}

/// Generate the table of contents.
fn generate_table_of_contents(report: &RunReport) -> String {
    let mut toc = String::new();

    toc.push_str("## Table of Contents\n\n");
    toc.push_str("- [Metadata](#metadata)\n");
    toc.push_str("- [Summary](#summary)\n");
    toc.push_str("- [Repositories](#repositories)\n");

    for repo in &report.repositories {
        toc.push_str(&format!("  - [{}](#{})\n", repo.name, anchor(&repo.name)));
    }

    toc.push('\n');

    toc
}

fn unit_table(summary: &RunSummary) -> String {
    let mut table = String::new();
    table.push_str("| Units | ✅ Succeeded | ❌ Failed | ⏱️ Timed out |\n");
    table.push_str("|:---:|:---:|:---:|:---:|\n");
    table.push_str(&format!(
        "| {} | {} | {} | {} |\n\n",
        summary.total_units, summary.succeeded, summary.failed, summary.timed_out
    ));
    table
}

/// Generate the summary section.
fn generate_summary_section(report: &RunReport) -> String {
    let summary = &report.summary.findings;
    let mut section = String::new();

    section.push_str("## Summary\n\n");
    section.push_str("### Units\n\n");
    section.push_str(&unit_table(&report.summary));

    section.push_str("### Finding Severity Breakdown\n\n");
    let mut header = String::from("|");
    let mut divider = String::from("|");
    let mut counts = String::from("|");
    for severity in Severity::ALL {
        header.push_str(&format!(" {} {} |", severity.emoji(), severity));
        divider.push_str(":---:|");
        counts.push_str(&format!(" {} |", summary.count(severity)));
    }
    section.push_str(&format!("{} **Total** |\n", header));
    section.push_str(&format!("{}:---:|\n", divider));
    section.push_str(&format!("{} **{}** |\n\n", counts, summary.total));

    if !summary.by_category.is_empty() {
        section.push_str("### Findings by Category\n\n");
        section.push_str("| Category | Count |\n");
        section.push_str("|:---|:---:|\n");

        let mut categories: Vec<_> = summary.by_category.iter().collect();
        categories.sort_by_key(|(_, count)| std::cmp::Reverse(*count));

        for (category, count) in categories {
            section.push_str(&format!("| {} | {} |\n", category, count));
        }
        section.push('\n');
    }

    let affected = most_affected_files(report, 5);
    if !affected.is_empty() {
        section.push_str("### Most Affected Files\n\n");
        section.push_str("| File | Findings |\n");
        section.push_str("|:---|:---:|\n");

        for (file, count) in affected {
            section.push_str(&format!("| `{}` | {} |\n", file, count));
        }
        section.push('\n');
    }

    let recurring = recurring_titles(report);
    if !recurring.is_empty() {
        section.push_str("### Recurring Findings\n\n");
        for (title, count) in recurring.iter().take(5) {
            section.push_str(&format!("- {} ({}×)\n", title, count));
        }
        section.push('\n');
    }

    section
}

/// Generate the per-repository sections.
fn generate_repositories_section(repositories: &[RepositoryReport]) -> String {
    let mut section = String::new();

    section.push_str("## Repositories\n\n");

    if repositories.is_empty() {
        section.push_str("No repositories were analyzed.\n\n");
        return section;
    }

    for repo in repositories {
        section.push_str(&generate_repository_section(repo));
    }

    section
}

/// Generate the section for a single repository.
fn generate_repository_section(repo: &RepositoryReport) -> String {
    let mut section = String::new();

    section.push_str(&format!("### {} {{#{}}}\n\n", repo.name, anchor(&repo.name)));
    section.push_str(&format!(
        "*Path: `{}` | Analyzers: {} | Findings: {}*\n\n",
        repo.path,
        repo.analyzers_run.join(", "),
        repo.summary.total
    ));

    if !repo.failures.is_empty() {
        section.push_str("**Failed units:**\n\n");
        for failure in &repo.failures {
            section.push_str(&format!(
                "- ❌ `{}`: {} ({})\n",
                failure.analyzer,
                failure.error,
                failure.error_type.as_deref().unwrap_or("error")
            ));
        }
        section.push('\n');
    }

    if repo.findings.is_empty() {
        section.push_str("No findings. 🎉\n\n");
        return section;
    }

    for finding in &repo.findings {
        section.push_str(&generate_finding_block(finding));
    }

    section
}

/// Generate a single finding block.
fn generate_finding_block(finding: &Finding) -> String {
    let mut block = String::new();

    block.push_str(&format!(
        "#### {} **{}** {} - {}\n\n",
        finding.severity().emoji(),
        finding.severity().as_str().to_uppercase(),
        finding.category(),
        finding.title()
    ));

    block.push_str(&format!("**Location:** `{}`\n\n", finding.location_label()));

    if let Some(rule) = finding.metadata().get("rule").and_then(|v| v.as_str()) {
        block.push_str(&format!("**Rule:** `{}`\n\n", rule));
    }

    if !finding.description().is_empty() {
        block.push_str(&format!("**Description:** {}\n\n", finding.description()));
    }

    if let Some(suggestion) = finding.suggestion() {
        block.push_str(&format!("> 💡 **Suggestion:** {}\n\n", suggestion));
    }

    block.push_str("---\n\n");

    block
}

/// Generate the report footer.
fn generate_footer() -> String {
    format!(
        "---\n\n*Report generated by reposcope v{}*\n",
        env!("CARGO_PKG_VERSION")
    )
}

/// Generate a JSON report.
pub fn generate_json_report(report: &RunReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::tests::sample_report;

    #[test]
    fn test_generate_markdown_report() {
        let markdown = generate_markdown_report(&sample_report());

        assert!(markdown.contains("# reposcope Report"));
        assert!(markdown.contains("## Metadata"));
        assert!(markdown.contains("## Summary"));
        assert!(markdown.contains("## Repositories"));
        assert!(markdown.contains("### api {#api}"));
        assert!(markdown.contains("AWS access key in source"));
        assert!(markdown.contains("`config.py:2`"));
        assert!(markdown.contains("Rotate the key."));
    }

    #[test]
    fn test_failures_listed() {
        let markdown = generate_markdown_report(&sample_report());

        assert!(markdown.contains("❌ `debt`: Analysis timed out after 300s (Timeout)"));
        assert!(markdown.contains("permission denied (IoError)"));
        assert!(markdown.contains("| 3 | 1 | 1 | 1 |"));
    }

    #[test]
    fn test_finding_block() {
        let finding = Finding::new("debt", Severity::Medium, "FIXME marker", "broken")
            .at("src/lib.rs", Some(4));
        let block = generate_finding_block(&finding);

        assert!(block.contains("MEDIUM"));
        assert!(block.contains("debt - FIXME marker"));
        assert!(block.contains("`src/lib.rs:4`"));
        assert!(!block.contains("Suggestion"));
        assert!(!block.contains("Rule"));
    }

    #[test]
    fn test_finding_block_shows_rule() {
        let finding = Finding::new("security", Severity::High, "AWS key", "hardcoded")
            .at("config.py", Some(2))
            .with_metadata("rule", "aws-key");
        let block = generate_finding_block(&finding);

        assert!(block.contains("**Rule:** `aws-key`"));
    }

    #[test]
    fn test_generate_json_report() {
        let json = generate_json_report(&sample_report()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["summary"]["timed_out"], 1);
        assert_eq!(value["repositories"][0]["name"], "api");
        assert_eq!(value["repositories"][0]["findings"][0]["severity"], "critical");
        assert_eq!(value["repositories"][0]["failures"][0]["error_kind"], "timeout");
    }
}
