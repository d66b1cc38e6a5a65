//! Size and shape heuristics: oversized files, overlong lines and deep
//! indentation. Purely textual; no parsing.

use crate::models::{Finding, Severity};

pub const NAME: &str = "complexity";

const CODE_EXTENSIONS: &[&str] = &[
    "rs", "py", "js", "ts", "jsx", "tsx", "go", "java", "c", "cpp", "h", "hpp", "cs", "rb",
    "php", "swift", "kt", "scala", "sh",
];

/// Complexity analyzer thresholds.
#[derive(Debug, Clone)]
pub struct ComplexityAnalyzer {
    pub include_external: bool,
    /// Lines above which a file is reported as large.
    pub large_file_lines: usize,
    /// Lines above which a file is reported as oversized.
    pub huge_file_lines: usize,
    pub max_line_length: usize,
    /// Indentation depth (in levels of four columns) considered deep.
    pub max_indent_depth: usize,
}

impl Default for ComplexityAnalyzer {
    fn default() -> Self {
        Self {
            include_external: false,
            large_file_lines: 500,
            huge_file_lines: 1000,
            max_line_length: 200,
            max_indent_depth: 6,
        }
    }
}

impl ComplexityAnalyzer {
    pub fn new(include_external: bool) -> Self {
        Self {
            include_external,
            ..Self::default()
        }
    }

    pub fn analyze_file(&self, relative_path: &str, content: &str) -> Vec<Finding> {
        let extension = std::path::Path::new(relative_path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        if !CODE_EXTENSIONS.contains(&extension) {
            return Vec::new();
        }

        let mut findings = Vec::new();
        let line_count = content.lines().count();

        if line_count > self.large_file_lines {
            let (severity, title) = if line_count > self.huge_file_lines {
                (Severity::Medium, "Oversized file")
            } else {
                (Severity::Low, "Large file")
            };
            findings.push(
                Finding::new(
                    NAME,
                    severity,
                    title,
                    format!("File has {} lines.", line_count),
                )
                .at(relative_path, None)
                .with_suggestion("Split the file along its responsibilities.")
                .with_metadata("lines", line_count),
            );
        }

        let long_lines: Vec<usize> = content
            .lines()
            .enumerate()
            .filter(|(_, line)| line.chars().count() > self.max_line_length)
            .map(|(idx, _)| idx + 1)
            .collect();
        if let Some(&first) = long_lines.first() {
            findings.push(
                Finding::new(
                    NAME,
                    Severity::Info,
                    "Overlong lines",
                    format!(
                        "{} line(s) exceed {} characters.",
                        long_lines.len(),
                        self.max_line_length
                    ),
                )
                .at(relative_path, Some(first))
                .with_suggestion("Wrap long expressions or extract helpers.")
                .with_metadata("count", long_lines.len()),
            );
        }

        if let Some((line, depth)) = deepest_indent(content) {
            if depth >= self.max_indent_depth {
                findings.push(
                    Finding::new(
                        NAME,
                        Severity::Low,
                        "Deeply nested code",
                        format!("Indentation reaches {} levels.", depth),
                    )
                    .at(relative_path, Some(line))
                    .with_suggestion("Use early returns or extract nested blocks.")
                    .with_metadata("depth", depth),
                );
            }
        }

        findings
    }
}

/// Returns (line, depth) of the most indented non-blank line. Tabs count as
/// one level, four spaces as one level.
fn deepest_indent(content: &str) -> Option<(usize, usize)> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            let mut columns = 0;
            for ch in line.chars() {
                match ch {
                    ' ' => columns += 1,
                    '\t' => columns += 4,
                    _ => break,
                }
            }
            (idx + 1, columns / 4)
        })
        .fold(None, |best: Option<(usize, usize)>, cur| match best {
            Some(b) if b.1 >= cur.1 => Some(b),
            _ => Some(cur),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_clean_file() {
        let findings = ComplexityAnalyzer::default().analyze_file("a.py", "x = 1\n");
        assert!(findings.is_empty());
    }

    #[test]
    fn test_file_size_thresholds() {
        let analyzer = ComplexityAnalyzer::default();
        let large = "x = 1\n".repeat(600);
        let huge = "x = 1\n".repeat(1200);

        let f = analyzer.analyze_file("a.py", &large);
        assert_eq!(f.len(), 1);
        assert_eq!(f[0].severity(), Severity::Low);

        let f = analyzer.analyze_file("a.py", &huge);
        assert_eq!(f[0].title(), "Oversized file");
        assert_eq!(f[0].severity(), Severity::Medium);
    }

    #[test]
    fn test_long_lines_reported_once() {
        let long = "y".repeat(250);
        let content = format!("ok\n{}\nok\n{}\n", long, long);
        let f = ComplexityAnalyzer::default().analyze_file("a.js", &content);

        assert_eq!(f.len(), 1);
        assert_eq!(f[0].line_number(), Some(2));
        assert_eq!(f[0].metadata()["count"], 2);
    }

    #[test]
    fn test_deep_indentation() {
        let content = "fn f() {\n\t\t\t\t\t\tdeep();\n}\n";
        let f = ComplexityAnalyzer::default().analyze_file("a.rs", content);
        assert_eq!(f.len(), 1);
        assert_eq!(f[0].title(), "Deeply nested code");
        assert_eq!(f[0].line_number(), Some(2));
    }

    #[test]
    fn test_non_code_files_ignored() {
        let content = "y".repeat(500);
        assert!(ComplexityAnalyzer::default()
            .analyze_file("data.json", &content)
            .is_empty());
    }
}
