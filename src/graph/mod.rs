//! Cross-repository dependency graph.
//!
//! The builder works in two passes. First every repository is asked which
//! package it publishes, giving a package → repository index. Then every
//! repository's requirements are matched against that index; each match is
//! an edge "this repository depends on that one". Requirements on packages
//! no linked repository publishes are ignored.

pub mod detectors;

pub use detectors::{DetectorRegistry, EcosystemDetector, PackageSpec, Requirement};

use crate::error::{Result, ScopeError};
use crate::models::Severity;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// A linked repository: a display name and where it lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedRepo {
    pub name: String,
    pub path: PathBuf,
}

impl LinkedRepo {
    /// Names each repository after its directory. Repositories whose
    /// directory names collide get enough parent directories prepended to
    /// tell them apart (`team1/api`, `team2/api`).
    pub fn from_paths<P: AsRef<Path>>(paths: &[P]) -> Vec<Self> {
        repository_names(paths)
            .into_iter()
            .zip(paths)
            .map(|(name, path)| Self {
                name,
                path: path.as_ref().to_path_buf(),
            })
            .collect()
    }
}

/// Short, unique display names for repository paths.
///
/// A name is the shortest trailing run of path components that no other
/// path shares. Paths resolving to the same directory get the same name.
pub fn repository_names<P: AsRef<Path>>(paths: &[P]) -> Vec<String> {
    let components: Vec<Vec<String>> = paths
        .iter()
        .map(|p| {
            let p = p.as_ref();
            let resolved = std::fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf());
            let parts: Vec<String> = resolved
                .components()
                .filter_map(|c| match c {
                    Component::Normal(part) => Some(part.to_string_lossy().to_string()),
                    _ => None,
                })
                .collect();
            if parts.is_empty() {
                vec![p.display().to_string()]
            } else {
                parts
            }
        })
        .collect();

    let suffix = |parts: &[String], depth: usize| -> String {
        parts[parts.len().saturating_sub(depth)..].join("/")
    };

    components
        .iter()
        .map(|parts| {
            let mut depth = 1;
            loop {
                let name = suffix(parts, depth);
                let clash = components
                    .iter()
                    .any(|other| other != parts && suffix(other, depth) == name);
                if !clash || depth >= parts.len() {
                    return name;
                }
                depth += 1;
            }
        })
        .collect()
}

/// What the detectors found in one repository.
#[derive(Debug, Clone, Default)]
struct RepoScan {
    provided: Vec<PackageSpec>,
    required: Vec<Requirement>,
}

/// Why an edge exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyLink {
    pub repo: String,
    pub dependency: String,
    pub package: String,
    pub used_version: Option<String>,
    pub available_version: Option<String>,
}

/// A dependent asking for a different version than its dependency publishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyGap {
    #[serde(rename = "type")]
    pub kind: String,
    pub repo: String,
    pub dependency: String,
    pub package: String,
    pub used_version: String,
    pub available_version: String,
    pub severity: Severity,
    pub message: String,
}

/// repository name → names of the repositories it depends on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependencyGraph {
    edges: BTreeMap<String, BTreeSet<String>>,
    #[serde(default)]
    links: Vec<DependencyLink>,
}

impl DependencyGraph {
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.edges.keys().map(String::as_str)
    }

    /// Repositories `repo` depends on.
    pub fn dependencies_of(&self, repo: &str) -> Option<&BTreeSet<String>> {
        self.edges.get(repo)
    }

    /// Repositories that depend on `repo`.
    pub fn dependents_of(&self, repo: &str) -> BTreeSet<&str> {
        self.edges
            .iter()
            .filter(|(_, deps)| deps.contains(repo))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn links(&self) -> &[DependencyLink] {
        &self.links
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeSet::len).sum()
    }

    /// Groups repositories into levels. Every repository's dependencies sit
    /// in earlier levels, and repositories within a level are independent.
    ///
    /// Fails with [`ScopeError::DependencyCycle`] naming every repository
    /// that could not be placed.
    pub fn levels(&self) -> Result<Vec<Vec<String>>> {
        let mut remaining: BTreeMap<&str, BTreeSet<&str>> = self
            .edges
            .iter()
            .map(|(node, deps)| (node.as_str(), deps.iter().map(String::as_str).collect()))
            .collect();
        let mut levels = Vec::new();

        while !remaining.is_empty() {
            let ready: Vec<&str> = remaining
                .iter()
                .filter(|(_, deps)| deps.is_empty())
                .map(|(node, _)| *node)
                .collect();

            if ready.is_empty() {
                return Err(ScopeError::DependencyCycle {
                    nodes: remaining.keys().map(|n| n.to_string()).collect(),
                });
            }

            for node in &ready {
                remaining.remove(node);
            }
            for deps in remaining.values_mut() {
                for node in &ready {
                    deps.remove(node);
                }
            }

            levels.push(ready.into_iter().map(str::to_string).collect());
        }

        Ok(levels)
    }

    /// Strongly connected groups of more than one repository.
    pub fn circular_dependencies(&self) -> Vec<Vec<String>> {
        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let mut index: HashMap<&str, NodeIndex> = HashMap::new();

        for node in self.edges.keys() {
            index.insert(node.as_str(), graph.add_node(node.as_str()));
        }
        for (node, deps) in &self.edges {
            for dep in deps {
                if let (Some(&from), Some(&to)) = (index.get(node.as_str()), index.get(dep.as_str())) {
                    graph.add_edge(from, to, ());
                }
            }
        }

        let mut cycles: Vec<Vec<String>> = tarjan_scc(&graph)
            .into_iter()
            .filter(|component| component.len() > 1)
            .map(|component| {
                let mut names: Vec<String> =
                    component.into_iter().map(|i| graph[i].to_string()).collect();
                names.sort();
                names
            })
            .collect();
        cycles.sort();
        cycles
    }

    /// Edges whose requested version differs from the published one.
    /// Unpinned requirements and unversioned packages never produce a gap.
    pub fn version_gaps(&self) -> Vec<DependencyGap> {
        self.links
            .iter()
            .filter_map(|link| {
                let used = link.used_version.as_deref()?;
                let available = link.available_version.as_deref()?;
                if normalize_version(used) == normalize_version(available) {
                    return None;
                }
                Some(DependencyGap {
                    kind: "version_mismatch".to_string(),
                    repo: link.repo.clone(),
                    dependency: link.dependency.clone(),
                    package: link.package.clone(),
                    used_version: used.to_string(),
                    available_version: available.to_string(),
                    severity: Severity::Medium,
                    message: format!(
                        "{} uses {} {} but {} provides {}",
                        link.repo, link.package, used, link.dependency, available
                    ),
                })
            })
            .collect()
    }
}

/// Strips range operators and a leading `v` so "^1.2.0", "==1.2.0" and
/// "v1.2.0" compare equal to "1.2.0".
pub fn normalize_version(version: &str) -> String {
    let trimmed = version
        .trim()
        .trim_start_matches(['^', '~', '=', '>', '<', ' ']);
    trimmed.strip_prefix('v').unwrap_or(trimmed).to_string()
}

/// Builds [`DependencyGraph`]s using a detector registry.
pub struct GraphBuilder {
    registry: Arc<DetectorRegistry>,
}

impl GraphBuilder {
    pub fn new(registry: DetectorRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    /// Builds the graph, scanning repositories one after another.
    pub fn build(&self, repos: &[LinkedRepo]) -> DependencyGraph {
        let scans: Vec<(LinkedRepo, RepoScan)> = repos
            .iter()
            .map(|repo| (repo.clone(), scan_repository(&self.registry, &repo.path)))
            .collect();
        assemble(scans)
    }

    /// Builds the graph, scanning repositories concurrently on blocking
    /// threads.
    pub async fn build_concurrent(&self, repos: &[LinkedRepo]) -> DependencyGraph {
        let tasks = repos.iter().cloned().map(|repo| {
            let registry = Arc::clone(&self.registry);
            tokio::task::spawn_blocking(move || {
                let scan = scan_repository(&registry, &repo.path);
                (repo, scan)
            })
        });

        let mut scans = Vec::with_capacity(repos.len());
        for (repo, joined) in repos.iter().zip(futures::future::join_all(tasks).await) {
            match joined {
                Ok(pair) => scans.push(pair),
                Err(e) => {
                    warn!("Dependency scan of {} failed: {}", repo.name, e);
                    scans.push((repo.clone(), RepoScan::default()));
                }
            }
        }
        assemble(scans)
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new(DetectorRegistry::new())
    }
}

fn scan_repository(registry: &DetectorRegistry, path: &Path) -> RepoScan {
    let mut scan = RepoScan::default();

    for detector in registry.detectors().filter(|d| d.applies(path)) {
        match detector.provided_package(path) {
            Ok(Some(package)) => scan.provided.push(package),
            Ok(None) => {}
            Err(e) => warn!("{} detector on {}: {:#}", detector.name(), path.display(), e),
        }
        match detector.required_packages(path) {
            Ok(required) => scan.required.extend(required),
            Err(e) => warn!("{} detector on {}: {:#}", detector.name(), path.display(), e),
        }
    }

    scan
}

fn assemble(scans: Vec<(LinkedRepo, RepoScan)>) -> DependencyGraph {
    let mut provided: HashMap<String, (String, Option<String>)> = HashMap::new();
    for (repo, scan) in &scans {
        for package in &scan.provided {
            if let Some((owner, _)) = provided.get(&package.name) {
                warn!(
                    "Package {} is provided by both {} and {}; keeping {}",
                    package.name, owner, repo.name, owner
                );
                continue;
            }
            provided.insert(
                package.name.clone(),
                (repo.name.clone(), package.version.clone()),
            );
        }
    }

    let mut graph = DependencyGraph::default();
    for (repo, scan) in &scans {
        graph.edges.entry(repo.name.clone()).or_default();

        let mut seen = BTreeSet::new();
        for requirement in &scan.required {
            let Some((owner, available)) = provided.get(&requirement.name) else {
                continue;
            };
            if owner == &repo.name || !seen.insert(requirement.name.clone()) {
                continue;
            }

            debug!("{} depends on {} via {}", repo.name, owner, requirement.name);
            graph
                .edges
                .entry(repo.name.clone())
                .or_default()
                .insert(owner.clone());
            graph.links.push(DependencyLink {
                repo: repo.name.clone(),
                dependency: owner.clone(),
                package: requirement.name.clone(),
                used_version: requirement.version.clone(),
                available_version: available.clone(),
            });
        }
    }

    graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn from_edges(edges: Vec<(&str, Vec<&str>)>) -> DependencyGraph {
        let mut graph = DependencyGraph::default();
        for (node, deps) in edges {
            graph.edges.entry(node.to_string()).or_default();
            for dep in deps {
                graph.edges.entry(dep.to_string()).or_default();
                if dep != node {
                    graph
                        .edges
                        .entry(node.to_string())
                        .or_default()
                        .insert(dep.to_string());
                }
            }
        }
        graph
    }

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_levels_follow_dependencies() {
        let graph = from_edges(vec![
            ("A", vec![]),
            ("B", vec!["A"]),
            ("C", vec!["A", "B"]),
        ]);

        let levels = graph.levels().unwrap();
        assert_eq!(levels, vec![vec!["A"], vec!["B"], vec!["C"]]);
    }

    #[test]
    fn test_independent_repositories_share_a_level() {
        let graph = from_edges(vec![
            ("core", vec![]),
            ("web", vec!["core"]),
            ("cli", vec!["core"]),
        ]);

        let levels = graph.levels().unwrap();
        assert_eq!(levels.len(), 2);
        let mut second = levels[1].clone();
        second.sort();
        assert_eq!(second, vec!["cli", "web"]);
    }

    #[test]
    fn test_cycle_is_an_error() {
        let graph = from_edges(vec![("A", vec!["B"]), ("B", vec!["A"])]);

        match graph.levels() {
            Err(ScopeError::DependencyCycle { nodes }) => {
                assert_eq!(nodes, vec!["A".to_string(), "B".to_string()]);
            }
            other => panic!("expected cycle error, got {:?}", other),
        }
        assert_eq!(graph.circular_dependencies(), vec![vec!["A", "B"]]);
    }

    #[test]
    fn test_cycle_error_names_only_unplaced_nodes() {
        let graph = from_edges(vec![
            ("base", vec![]),
            ("x", vec!["base", "y"]),
            ("y", vec!["x"]),
        ]);

        let err = graph.levels().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Circular dependency between repositories: x, y"
        );
    }

    #[test]
    fn test_empty_graph() {
        let graph = DependencyGraph::default();
        assert_eq!(graph.nodes().count(), 0);
        assert!(graph.levels().unwrap().is_empty());
        assert!(graph.circular_dependencies().is_empty());
    }

    #[test]
    fn test_normalize_version() {
        assert_eq!(normalize_version("^1.2.0"), "1.2.0");
        assert_eq!(normalize_version(">=1.2.0"), "1.2.0");
        assert_eq!(normalize_version("v1.2.0"), "1.2.0");
        assert_eq!(normalize_version("1.2.0"), "1.2.0");
    }

    #[test]
    fn test_version_gap_end_to_end() {
        let root = TempDir::new().unwrap();
        let r1 = root.path().join("R1");
        let r2 = root.path().join("R2");
        write(
            &r1,
            "package.json",
            r#"{"name": "alpha", "version": "1.2.0"}"#,
        );
        write(
            &r2,
            "package.json",
            r#"{"name": "beta", "version": "0.1.0", "dependencies": {"alpha": "1.0.0", "left-pad": "1.3.0"}}"#,
        );

        let repos = LinkedRepo::from_paths(&[&r1, &r2]);
        let graph = GraphBuilder::default().build(&repos);

        assert_eq!(graph.edge_count(), 1);
        assert!(graph.dependencies_of("R2").unwrap().contains("R1"));
        assert_eq!(graph.dependents_of("R1"), BTreeSet::from(["R2"]));

        let gaps = graph.version_gaps();
        assert_eq!(gaps.len(), 1);
        let json = serde_json::to_value(&gaps[0]).unwrap();
        assert_eq!(json["type"], "version_mismatch");
        assert_eq!(json["repo"], "R2");
        assert_eq!(json["dependency"], "R1");
        assert_eq!(json["package"], "alpha");
        assert_eq!(json["used_version"], "1.0.0");
        assert_eq!(json["available_version"], "1.2.0");
        assert_eq!(json["severity"], "medium");
    }

    #[test]
    fn test_matching_versions_have_no_gap() {
        let root = TempDir::new().unwrap();
        write(
            &root.path().join("core"),
            "Cargo.toml",
            "[package]\nname = \"core\"\nversion = \"0.2.0\"\n",
        );
        write(
            &root.path().join("app"),
            "Cargo.toml",
            "[package]\nname = \"app\"\nversion = \"1.0.0\"\n\n[dependencies]\ncore = { path = \"../core\", version = \"^0.2.0\" }\n",
        );
        write(
            &root.path().join("tool"),
            "Cargo.toml",
            "[package]\nname = \"tool\"\nversion = \"1.0.0\"\n\n[dependencies]\ncore = { path = \"../core\" }\n",
        );

        let paths: Vec<PathBuf> = ["core", "app", "tool"]
            .iter()
            .map(|n| root.path().join(n))
            .collect();
        let repos = LinkedRepo::from_paths(&paths);
        let graph = GraphBuilder::default().build(&repos);

        assert_eq!(graph.edge_count(), 2);
        assert!(graph.version_gaps().is_empty());
        assert_eq!(graph.levels().unwrap()[0], vec!["core"]);
    }

    #[tokio::test]
    async fn test_concurrent_build_matches_sequential() {
        let root = TempDir::new().unwrap();
        write(
            &root.path().join("lib"),
            "pyproject.toml",
            "[project]\nname = \"shared-lib\"\nversion = \"1.0.0\"\n",
        );
        write(&root.path().join("svc"), "requirements.txt", "requests\n");
        write(&root.path().join("svc"), "app.py", "import shared_lib\n");

        let repos = LinkedRepo::from_paths(&[root.path().join("lib"), root.path().join("svc")]);
        let builder = GraphBuilder::default();
        let concurrent = builder.build_concurrent(&repos).await;

        assert_eq!(concurrent, builder.build(&repos));
        assert!(concurrent.dependencies_of("svc").unwrap().contains("lib"));
        // Import evidence carries no version, so no gap
        assert!(concurrent.version_gaps().is_empty());
    }

    #[test]
    fn test_broken_manifest_does_not_abort_build() {
        let root = TempDir::new().unwrap();
        write(&root.path().join("bad"), "package.json", "{ nope");
        write(&root.path().join("good"), "package.json", r#"{"name": "good"}"#);

        let repos = LinkedRepo::from_paths(&[root.path().join("bad"), root.path().join("good")]);
        let graph = GraphBuilder::default().build(&repos);
        assert_eq!(graph.nodes().count(), 2);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_same_directory_names_stay_separate_nodes() {
        let root = TempDir::new().unwrap();
        let provider = root.path().join("team1").join("api");
        let consumer = root.path().join("team2").join("api");
        write(
            &provider,
            "Cargo.toml",
            "[package]\nname = \"core\"\nversion = \"1.0.0\"\n",
        );
        write(
            &consumer,
            "Cargo.toml",
            "[package]\nname = \"svc\"\nversion = \"0.1.0\"\n\n[dependencies]\ncore = \"1.0.0\"\n",
        );
        write(&root.path().join("web"), "package.json", r#"{"name": "web"}"#);

        let repos = LinkedRepo::from_paths(&[&provider, &consumer, &root.path().join("web")]);
        let names: Vec<&str> = repos.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["team1/api", "team2/api", "web"]);

        let graph = GraphBuilder::default().build(&repos);
        assert_eq!(graph.nodes().count(), 3);
        assert!(graph.dependencies_of("team2/api").unwrap().contains("team1/api"));
        assert_eq!(graph.links().len(), 1);
    }

    #[test]
    fn test_repository_names_for_unique_and_repeated_paths() {
        let root = TempDir::new().unwrap();
        let api = root.path().join("api");
        fs::create_dir_all(&api).unwrap();

        assert_eq!(repository_names(&[&api]), vec!["api"]);
        // The same directory twice keeps one name
        assert_eq!(repository_names(&[&api, &api]), vec!["api", "api"]);
    }
}
