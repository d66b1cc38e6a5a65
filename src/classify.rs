//! Repository classification from marker files and extensions.
//!
//! Only used to annotate results; nothing depends on it being right.

use crate::orchestrator::OrchestrationReport;
use crate::scanner::{FileScanner, ScanConfig};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoType {
    Rust,
    Node,
    Python,
    Go,
    Mixed,
    Unknown,
}

/// What a repository looks like.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub repo_type: RepoType,
    /// Language → number of files.
    pub languages: BTreeMap<String, usize>,
    pub frameworks: Vec<String>,
}

const MARKERS: &[(&str, RepoType)] = &[
    ("Cargo.toml", RepoType::Rust),
    ("package.json", RepoType::Node),
    ("pyproject.toml", RepoType::Python),
    ("setup.py", RepoType::Python),
    ("requirements.txt", RepoType::Python),
    ("go.mod", RepoType::Go),
];

/// (manifest, needle, framework name)
const FRAMEWORKS: &[(&str, &str, &str)] = &[
    ("package.json", "\"react\"", "react"),
    ("package.json", "\"vue\"", "vue"),
    ("package.json", "\"next\"", "next"),
    ("package.json", "\"express\"", "express"),
    ("package.json", "\"@angular/core\"", "angular"),
    ("Cargo.toml", "tokio", "tokio"),
    ("Cargo.toml", "axum", "axum"),
    ("Cargo.toml", "actix-web", "actix-web"),
    ("Cargo.toml", "rocket", "rocket"),
    ("pyproject.toml", "django", "django"),
    ("pyproject.toml", "flask", "flask"),
    ("pyproject.toml", "fastapi", "fastapi"),
    ("requirements.txt", "django", "django"),
    ("requirements.txt", "flask", "flask"),
    ("requirements.txt", "fastapi", "fastapi"),
    ("go.mod", "gin-gonic/gin", "gin"),
    ("go.mod", "labstack/echo", "echo"),
];

fn language_for(extension: &str) -> Option<&'static str> {
    Some(match extension {
        "rs" => "Rust",
        "py" => "Python",
        "js" | "jsx" => "JavaScript",
        "ts" | "tsx" => "TypeScript",
        "go" => "Go",
        "java" => "Java",
        "c" | "h" => "C",
        "cpp" | "hpp" => "C++",
        "cs" => "C#",
        "rb" => "Ruby",
        "php" => "PHP",
        "swift" => "Swift",
        "kt" => "Kotlin",
        "scala" => "Scala",
        "sh" => "Shell",
        _ => return None,
    })
}

/// Classifies the repository at `path`.
pub fn classify(path: &Path) -> Classification {
    let types: BTreeSet<RepoType> = MARKERS
        .iter()
        .filter(|(marker, _)| path.join(marker).is_file())
        .map(|(_, kind)| *kind)
        .collect();

    let repo_type = match types.len() {
        0 => RepoType::Unknown,
        1 => types.into_iter().next().unwrap_or(RepoType::Unknown),
        _ => RepoType::Mixed,
    };

    let mut languages = BTreeMap::new();
    match FileScanner::new(path.to_path_buf(), ScanConfig::default()).scan() {
        Ok(files) => {
            for file in files {
                if let Some(language) = language_for(&file.extension) {
                    *languages.entry(language.to_string()).or_insert(0) += 1;
                }
            }
        }
        Err(e) => debug!("Could not scan {} for languages: {}", path.display(), e),
    }

    let mut manifests: HashMap<&str, String> = HashMap::new();
    let mut frameworks = Vec::new();
    for &(manifest, needle, name) in FRAMEWORKS {
        let content = manifests
            .entry(manifest)
            .or_insert_with(|| fs::read_to_string(path.join(manifest)).unwrap_or_default());
        if content.contains(needle) && !frameworks.iter().any(|f| f == name) {
            frameworks.push(name.to_string());
        }
    }

    Classification {
        repo_type,
        languages,
        frameworks,
    }
}

/// Adds a `repository` metadata entry to every successful result.
pub fn annotate(report: &mut OrchestrationReport) {
    for (repo, records) in report.results.iter_mut() {
        let classification = classify(Path::new(repo));
        let Ok(value) = serde_json::to_value(&classification) else {
            continue;
        };
        for record in records.iter_mut() {
            if let Some(result) = record.result.as_mut() {
                result
                    .metadata
                    .insert("repository".to_string(), value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn repo(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (rel, content) in files {
            let path = dir.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        dir
    }

    #[test]
    fn test_rust_repository() {
        let dir = repo(&[
            ("Cargo.toml", "[dependencies]\ntokio = \"1\"\n"),
            ("src/main.rs", "fn main() {}"),
            ("src/lib.rs", ""),
            ("scripts/run.sh", ""),
        ]);

        let c = classify(dir.path());
        assert_eq!(c.repo_type, RepoType::Rust);
        assert_eq!(c.languages.get("Rust"), Some(&2));
        assert_eq!(c.languages.get("Shell"), Some(&1));
        assert_eq!(c.frameworks, vec!["tokio"]);
    }

    #[test]
    fn test_mixed_and_unknown() {
        let mixed = repo(&[("package.json", "{\"dependencies\": {\"react\": \"18\"}}"), ("go.mod", "module x\n")]);
        let c = classify(mixed.path());
        assert_eq!(c.repo_type, RepoType::Mixed);
        assert_eq!(c.frameworks, vec!["react"]);

        let empty = TempDir::new().unwrap();
        assert_eq!(classify(empty.path()).repo_type, RepoType::Unknown);
    }

    #[test]
    fn test_python_markers_count_once() {
        let dir = repo(&[("setup.py", ""), ("requirements.txt", "flask\n")]);
        let c = classify(dir.path());
        assert_eq!(c.repo_type, RepoType::Python);
        assert_eq!(c.frameworks, vec!["flask"]);
    }
}
