//! Per-ecosystem package detectors.
//!
//! A detector says whether it applies to a repository, which package the
//! repository publishes, and which packages it requires. Manifest parsing
//! failures are reported as errors; the builder logs them and moves on.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

use crate::scanner::EXTERNAL_DIRS;

/// A package a repository publishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSpec {
    pub name: String,
    pub version: Option<String>,
}

/// A package a repository depends on, with the version it asks for.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Requirement {
    pub name: String,
    pub version: Option<String>,
}

impl Requirement {
    fn new(name: impl Into<String>, version: Option<String>) -> Self {
        Self {
            name: name.into(),
            version: version.filter(|v| !v.trim().is_empty()),
        }
    }
}

/// One ecosystem's view of a repository.
pub trait EcosystemDetector {
    /// Ecosystem name used in logs.
    fn name(&self) -> &'static str;

    /// Whether this detector has anything to read in `repo`.
    fn applies(&self, repo: &Path) -> bool;

    /// The package `repo` publishes, if any.
    fn provided_package(&self, repo: &Path) -> Result<Option<PackageSpec>>;

    /// Packages `repo` requires.
    fn required_packages(&self, repo: &Path) -> Result<Vec<Requirement>>;
}

/// All registered detectors.
pub struct DetectorRegistry {
    detectors: Vec<Box<dyn EcosystemDetector + Send + Sync>>,
}

impl DetectorRegistry {
    /// Registry with the built-in Cargo, npm, Python and Go detectors.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(CargoDetector));
        registry.register(Box::new(NpmDetector));
        registry.register(Box::new(PythonDetector));
        registry.register(Box::new(GoModDetector));
        registry
    }

    /// Empty registry, for callers that register their own detectors.
    pub fn empty() -> Self {
        Self {
            detectors: Vec::new(),
        }
    }

    pub fn register(&mut self, detector: Box<dyn EcosystemDetector + Send + Sync>) {
        self.detectors.push(detector);
    }

    pub fn detectors(&self) -> impl Iterator<Item = &(dyn EcosystemDetector + Send + Sync)> {
        self.detectors.iter().map(|d| d.as_ref())
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn read_toml(path: &Path) -> Result<toml::Value> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn read_json(path: &Path) -> Result<serde_json::Value> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Cargo.toml `[package]` and dependency tables.
pub struct CargoDetector;

impl EcosystemDetector for CargoDetector {
    fn name(&self) -> &'static str {
        "cargo"
    }

    fn applies(&self, repo: &Path) -> bool {
        repo.join("Cargo.toml").is_file()
    }

    fn provided_package(&self, repo: &Path) -> Result<Option<PackageSpec>> {
        let manifest = read_toml(&repo.join("Cargo.toml"))?;
        let Some(package) = manifest.get("package") else {
            return Ok(None);
        };

        Ok(package.get("name").and_then(|n| n.as_str()).map(|name| PackageSpec {
            name: name.to_string(),
            version: package
                .get("version")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        }))
    }

    fn required_packages(&self, repo: &Path) -> Result<Vec<Requirement>> {
        let manifest = read_toml(&repo.join("Cargo.toml"))?;
        let mut found = Vec::new();

        let tables = [
            manifest.get("dependencies"),
            manifest.get("dev-dependencies"),
            manifest.get("build-dependencies"),
            manifest.get("workspace").and_then(|w| w.get("dependencies")),
        ];
        for table in tables.into_iter().flatten().filter_map(|t| t.as_table()) {
            for (name, spec) in table {
                let version = match spec {
                    toml::Value::String(v) => Some(v.clone()),
                    toml::Value::Table(t) => {
                        t.get("version").and_then(|v| v.as_str()).map(str::to_string)
                    }
                    _ => None,
                };
                // `foo = { package = "bar" }` depends on bar
                let package = spec
                    .get("package")
                    .and_then(|p| p.as_str())
                    .unwrap_or(name);
                found.push(Requirement::new(package, version));
            }
        }

        Ok(found)
    }
}

/// package.json name/version and dependency maps.
pub struct NpmDetector;

impl EcosystemDetector for NpmDetector {
    fn name(&self) -> &'static str {
        "npm"
    }

    fn applies(&self, repo: &Path) -> bool {
        repo.join("package.json").is_file()
    }

    fn provided_package(&self, repo: &Path) -> Result<Option<PackageSpec>> {
        let manifest = read_json(&repo.join("package.json"))?;
        Ok(manifest["name"].as_str().map(|name| PackageSpec {
            name: name.to_string(),
            version: manifest["version"].as_str().map(str::to_string),
        }))
    }

    fn required_packages(&self, repo: &Path) -> Result<Vec<Requirement>> {
        let manifest = read_json(&repo.join("package.json"))?;
        let mut found = Vec::new();

        for section in ["dependencies", "devDependencies", "peerDependencies"] {
            if let Some(deps) = manifest[section].as_object() {
                for (name, version) in deps {
                    found.push(Requirement::new(
                        name.as_str(),
                        version.as_str().map(str::to_string),
                    ));
                }
            }
        }

        Ok(found)
    }
}

static PY_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(?:from|import)\s+([A-Za-z_][A-Za-z0-9_]*)")
        .expect("import pattern is valid")
});

static PEP508: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*([A-Za-z0-9][A-Za-z0-9._-]*)\s*(?:\[[^\]]*\])?\s*(?:(==|>=|<=|~=|!=|>|<)\s*([^\s,;]+))?",
    )
    .expect("requirement pattern is valid")
});

/// Python package names compare case-insensitively with `-`, `_` and `.`
/// treated alike.
pub fn normalize_python_name(name: &str) -> String {
    name.trim().to_lowercase().replace(['-', '.'], "_")
}

fn parse_pep508(line: &str) -> Option<Requirement> {
    let caps = PEP508.captures(line)?;
    let name = normalize_python_name(caps.get(1)?.as_str());
    let version = caps.get(3).map(|v| v.as_str().to_string());
    Some(Requirement::new(name, version))
}

/// pyproject.toml / requirements.txt manifests plus `import` statements.
pub struct PythonDetector;

impl PythonDetector {
    fn imports(repo: &Path) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        let walker = WalkDir::new(repo).into_iter().filter_entry(|e| {
            if e.depth() == 0 {
                return true;
            }
            let name = e.file_name().to_string_lossy();
            !(e.file_type().is_dir() && (name.starts_with('.') || EXTERNAL_DIRS.contains(&name.as_ref())))
        });

        for entry in walker.filter_map(|e| e.ok()) {
            if entry.path().extension().and_then(|e| e.to_str()) != Some("py") {
                continue;
            }
            if let Ok(content) = fs::read_to_string(entry.path()) {
                for caps in PY_IMPORT.captures_iter(&content) {
                    names.insert(normalize_python_name(&caps[1]));
                }
            }
        }

        names
    }
}

impl EcosystemDetector for PythonDetector {
    fn name(&self) -> &'static str {
        "python"
    }

    fn applies(&self, repo: &Path) -> bool {
        repo.join("pyproject.toml").is_file()
            || repo.join("setup.py").is_file()
            || repo.join("requirements.txt").is_file()
    }

    fn provided_package(&self, repo: &Path) -> Result<Option<PackageSpec>> {
        let path = repo.join("pyproject.toml");
        if !path.is_file() {
            return Ok(None);
        }
        let manifest = read_toml(&path)?;
        let project = manifest
            .get("project")
            .or_else(|| manifest.get("tool").and_then(|t| t.get("poetry")));

        Ok(project.and_then(|p| {
            p.get("name").and_then(|n| n.as_str()).map(|name| PackageSpec {
                name: normalize_python_name(name),
                version: p.get("version").and_then(|v| v.as_str()).map(str::to_string),
            })
        }))
    }

    fn required_packages(&self, repo: &Path) -> Result<Vec<Requirement>> {
        let mut found = Vec::new();

        let pyproject = repo.join("pyproject.toml");
        if pyproject.is_file() {
            let manifest = read_toml(&pyproject)?;
            if let Some(deps) = manifest
                .get("project")
                .and_then(|p| p.get("dependencies"))
                .and_then(|d| d.as_array())
            {
                found.extend(deps.iter().filter_map(|d| d.as_str()).filter_map(parse_pep508));
            }
            if let Some(deps) = manifest
                .get("tool")
                .and_then(|t| t.get("poetry"))
                .and_then(|p| p.get("dependencies"))
                .and_then(|d| d.as_table())
            {
                for (name, spec) in deps {
                    if name == "python" {
                        continue;
                    }
                    let version = match spec {
                        toml::Value::String(v) => Some(v.clone()),
                        toml::Value::Table(t) => {
                            t.get("version").and_then(|v| v.as_str()).map(str::to_string)
                        }
                        _ => None,
                    };
                    found.push(Requirement::new(normalize_python_name(name), version));
                }
            }
        }

        let requirements = repo.join("requirements.txt");
        if requirements.is_file() {
            let content = fs::read_to_string(&requirements)
                .with_context(|| format!("Failed to read {}", requirements.display()))?;
            found.extend(
                content
                    .lines()
                    .map(|l| l.split('#').next().unwrap_or("").trim())
                    .filter(|l| !l.is_empty() && !l.starts_with('-'))
                    .filter_map(parse_pep508),
            );
        }

        // Import-level evidence has no version
        let declared: BTreeSet<String> = found.iter().map(|r| r.name.clone()).collect();
        found.extend(
            Self::imports(repo)
                .into_iter()
                .filter(|name| !declared.contains(name))
                .map(|name| Requirement::new(name, None)),
        );

        Ok(found)
    }
}

/// go.mod `module` and `require` directives.
pub struct GoModDetector;

impl GoModDetector {
    fn read(repo: &Path) -> Result<String> {
        let path = repo.join("go.mod");
        fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))
    }
}

impl EcosystemDetector for GoModDetector {
    fn name(&self) -> &'static str {
        "go"
    }

    fn applies(&self, repo: &Path) -> bool {
        repo.join("go.mod").is_file()
    }

    fn provided_package(&self, repo: &Path) -> Result<Option<PackageSpec>> {
        let content = Self::read(repo)?;
        Ok(content
            .lines()
            .filter_map(|l| l.trim().strip_prefix("module "))
            .map(|m| PackageSpec {
                name: m.trim().trim_matches('"').to_string(),
                version: None,
            })
            .next())
    }

    fn required_packages(&self, repo: &Path) -> Result<Vec<Requirement>> {
        let content = Self::read(repo)?;
        let mut found = Vec::new();
        let mut in_block = false;

        for line in content.lines() {
            let line = line.split("//").next().unwrap_or("").trim();
            let entry = if in_block {
                if line == ")" {
                    in_block = false;
                    continue;
                }
                line
            } else if line == "require (" {
                in_block = true;
                continue;
            } else if let Some(rest) = line.strip_prefix("require ") {
                rest
            } else {
                continue;
            };

            let mut parts = entry.split_whitespace();
            if let Some(module) = parts.next() {
                found.push(Requirement::new(module, parts.next().map(str::to_string)));
            }
        }

        Ok(found)
    }
}
