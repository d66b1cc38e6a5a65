//! Configuration file handling.
//!
//! This module handles loading, validating and merging configuration from
//! `.reposcope.toml` files.

use crate::analyzers;
use crate::cli::{Args, Commands};
use crate::error::ScopeError;
use crate::orchestrator::{Isolation, DEFAULT_TIMEOUT_SECS};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = ".reposcope.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Worker pool settings.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Result cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Background agent settings.
    #[serde(default)]
    pub agents: AgentsConfig,

    /// Linked repositories.
    #[serde(default)]
    pub repositories: RepositoriesConfig,

    /// Analyzer selection.
    #[serde(default)]
    pub analyzers: AnalyzersConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,

    /// Directory for reports and per-repository findings.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            output_dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".reposcope/reports")
}

/// Worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Pool size; 0 means one worker per available CPU.
    #[serde(default)]
    pub max_workers: usize,

    /// Per-unit time bound in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// "in-process" or "subprocess".
    #[serde(default)]
    pub isolation: Isolation,

    /// Analyze vendored/third-party directories too.
    #[serde(default)]
    pub include_external: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_workers: 0,
            timeout_seconds: default_timeout(),
            isolation: Isolation::default(),
            include_external: false,
        }
    }
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Result cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_cache_dir(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".reposcope/cache")
}

/// Background agent settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    #[serde(default = "default_agents_dir")]
    pub dir: PathBuf,

    /// Interval between liveness checks while waiting, in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            dir: default_agents_dir(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

fn default_agents_dir() -> PathBuf {
    PathBuf::from(".reposcope/agents")
}

fn default_poll_interval() -> u64 {
    1000
}

/// Linked repositories.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositoriesConfig {
    #[serde(default)]
    pub paths: Vec<PathBuf>,
}

/// Analyzer selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzersConfig {
    #[serde(default = "default_analyzers")]
    pub enabled: Vec<String>,
}

impl Default for AnalyzersConfig {
    fn default() -> Self {
        Self {
            enabled: default_analyzers(),
        }
    }
}

fn default_analyzers() -> Vec<String> {
    analyzers::names().into_iter().map(String::from).collect()
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Checks values serde cannot reject on its own.
    pub fn validate(&self) -> std::result::Result<(), ScopeError> {
        if self.orchestrator.timeout_seconds == 0 {
            return Err(ScopeError::Config(
                "orchestrator.timeout_seconds must be at least 1".to_string(),
            ));
        }
        if self.agents.poll_interval_ms == 0 {
            return Err(ScopeError::Config(
                "agents.poll_interval_ms must be at least 1".to_string(),
            ));
        }
        if self.analyzers.enabled.is_empty() {
            return Err(ScopeError::Config(
                "analyzers.enabled must name at least one analyzer".to_string(),
            ));
        }
        for name in &self.analyzers.enabled {
            analyzers::lookup(name).map_err(|e| ScopeError::Config(e.to_string()))?;
        }
        Ok(())
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// This method only overrides config when CLI provides explicit values.
    pub fn merge_with_args(&mut self, args: &Args) {
        if args.verbose {
            self.general.verbose = true;
        }

        match &args.command {
            Some(Commands::Analyze(analyze)) => {
                if !analyze.repos.is_empty() {
                    self.repositories.paths = analyze.repos.clone();
                }
                if let Some(ref names) = analyze.analyzer {
                    self.analyzers.enabled = names.clone();
                }
                if let Some(workers) = analyze.workers {
                    self.orchestrator.max_workers = workers;
                }
                if let Some(timeout) = analyze.timeout {
                    self.orchestrator.timeout_seconds = timeout;
                }
                if let Some(isolation) = analyze.isolation {
                    self.orchestrator.isolation = isolation;
                }
                if analyze.include_external {
                    self.orchestrator.include_external = true;
                }
                if analyze.no_cache {
                    self.cache.enabled = false;
                }
                if let Some(ref dir) = analyze.output_dir {
                    self.general.output_dir = dir.clone();
                }
            }
            Some(Commands::Graph(graph)) => {
                if !graph.repos.is_empty() {
                    self.repositories.paths = graph.repos.clone();
                }
            }
            Some(Commands::Gaps(gaps)) => {
                if !gaps.repos.is_empty() {
                    self.repositories.paths = gaps.repos.clone();
                }
            }
            _ => {}
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.orchestrator.timeout_seconds, 300);
        assert_eq!(config.orchestrator.max_workers, 0);
        assert_eq!(config.orchestrator.isolation, Isolation::InProcess);
        assert!(config.cache.enabled);
        assert_eq!(config.analyzers.enabled, vec!["security", "debt", "complexity"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
verbose = true
output_dir = "out"

[orchestrator]
max_workers = 8
timeout_seconds = 60
isolation = "subprocess"

[cache]
enabled = false

[repositories]
paths = ["../api", "../web"]

[analyzers]
enabled = ["security"]
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert!(config.general.verbose);
        assert_eq!(config.general.output_dir, PathBuf::from("out"));
        assert_eq!(config.orchestrator.max_workers, 8);
        assert_eq!(config.orchestrator.isolation, Isolation::Subprocess);
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.dir, PathBuf::from(".reposcope/cache"));
        assert_eq!(config.repositories.paths.len(), 2);
        assert_eq!(config.agents.poll_interval_ms, 1000);
    }

    #[test]
    fn test_unknown_isolation_rejected() {
        let result: std::result::Result<Config, _> =
            toml::from_str("[orchestrator]\nisolation = \"threads\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        config.orchestrator.timeout_seconds = 0;
        assert!(matches!(config.validate(), Err(ScopeError::Config(_))));

        let mut config = Config::default();
        config.analyzers.enabled = vec!["nope".to_string()];
        assert!(config.validate().unwrap_err().to_string().contains("nope"));
    }

    #[test]
    fn test_merge_with_args() {
        let mut config = Config::default();
        config.repositories.paths = vec![PathBuf::from("from-config")];

        let args = Args::parse_from([
            "reposcope",
            "analyze",
            "repo-a",
            "--analyzer",
            "debt",
            "--timeout",
            "30",
            "--isolation",
            "subprocess",
            "--no-cache",
        ]);
        config.merge_with_args(&args);

        assert_eq!(config.repositories.paths, vec![PathBuf::from("repo-a")]);
        assert_eq!(config.analyzers.enabled, vec!["debt"]);
        assert_eq!(config.orchestrator.timeout_seconds, 30);
        assert_eq!(config.orchestrator.isolation, Isolation::Subprocess);
        assert!(!config.cache.enabled);
        assert_eq!(config.orchestrator.max_workers, 0);
    }

    #[test]
    fn test_merge_keeps_config_repositories_when_none_given() {
        let mut config = Config::default();
        config.repositories.paths = vec![PathBuf::from("from-config")];

        config.merge_with_args(&Args::parse_from(["reposcope", "graph"]));
        assert_eq!(config.repositories.paths, vec![PathBuf::from("from-config")]);
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[orchestrator]"));
        assert!(toml_str.contains("isolation = \"in-process\""));
        assert!(toml_str.contains("[cache]"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.orchestrator.timeout_seconds, 300);
    }
}
