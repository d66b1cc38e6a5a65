//! Per-invocation context.
//!
//! Built once from the merged configuration and handed to every component,
//! so the cache root, agent root and repository list are explicit inputs
//! rather than ambient state.

use crate::agents::AgentManager;
use crate::cache::CacheStore;
use crate::config::Config;
use crate::error::{Result, ScopeError};
use crate::graph::LinkedRepo;
use crate::orchestrator::{Isolation, Orchestrator, UnitExecutor};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RunContext {
    pub config: Config,
    pub cache_root: PathBuf,
    pub agent_root: PathBuf,
    pub output_dir: PathBuf,
    pub repositories: Vec<PathBuf>,
    pub tool_version: String,
}

impl RunContext {
    pub fn new(config: Config) -> Self {
        Self {
            cache_root: config.cache.dir.clone(),
            agent_root: config.agents.dir.clone(),
            output_dir: config.general.output_dir.clone(),
            repositories: config.repositories.paths.clone(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            config,
        }
    }

    /// The cache store, whether or not caching is enabled for analysis.
    pub fn cache_store(&self) -> CacheStore {
        CacheStore::new(&self.cache_root, &self.tool_version)
    }

    /// The cache store for analysis runs, if enabled.
    pub fn analysis_cache(&self) -> Option<Arc<CacheStore>> {
        self.config
            .cache
            .enabled
            .then(|| Arc::new(self.cache_store()))
    }

    /// Linked repositories with unique names, failing on the first missing
    /// path.
    pub fn linked_repos(&self) -> Result<Vec<LinkedRepo>> {
        if self.repositories.is_empty() {
            return Err(ScopeError::Config(
                "No repositories given and none configured under [repositories]".to_string(),
            ));
        }
        if let Some(missing) = self.repositories.iter().find(|p| !p.is_dir()) {
            return Err(ScopeError::RepositoryNotFound(missing.clone()));
        }
        Ok(LinkedRepo::from_paths(&self.repositories))
    }

    pub fn agent_manager(&self) -> Result<AgentManager> {
        AgentManager::for_current_exe(&self.agent_root)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.agents.poll_interval_ms)
    }

    fn executor(&self) -> Result<UnitExecutor> {
        let include_external = self.config.orchestrator.include_external;
        Ok(match self.config.orchestrator.isolation {
            Isolation::InProcess => UnitExecutor::in_process(include_external, self.analysis_cache()),
            Isolation::Subprocess => UnitExecutor::subprocess(
                std::env::current_exe()?,
                include_external,
                self.config.cache.enabled.then(|| self.cache_root.clone()),
            ),
        })
    }

    /// An orchestrator configured from this context.
    pub fn orchestrator(&self) -> Result<Orchestrator> {
        Ok(Orchestrator::new(self.executor()?)
            .with_workers(self.config.orchestrator.max_workers)
            .with_timeout(Duration::from_secs(self.config.orchestrator.timeout_seconds)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_context_follows_config() {
        let mut config = Config::default();
        config.cache.dir = PathBuf::from("/tmp/c");
        config.orchestrator.max_workers = 3;
        config.orchestrator.timeout_seconds = 5;

        let ctx = RunContext::new(config);
        assert_eq!(ctx.cache_store().root(), PathBuf::from("/tmp/c").as_path());
        assert!(ctx.analysis_cache().is_some());
        assert_eq!(ctx.orchestrator().unwrap().max_workers(), 3);
        assert_eq!(ctx.tool_version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_cache_disabled() {
        let mut config = Config::default();
        config.cache.enabled = false;
        assert!(RunContext::new(config).analysis_cache().is_none());
    }

    #[test]
    fn test_linked_repos() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.repositories.paths = vec![dir.path().to_path_buf()];
        let repos = RunContext::new(config.clone()).linked_repos().unwrap();
        assert_eq!(repos[0].path, dir.path());

        config.repositories.paths.push(dir.path().join("missing"));
        assert!(matches!(
            RunContext::new(config).linked_repos(),
            Err(ScopeError::RepositoryNotFound(_))
        ));

        assert!(RunContext::new(Config::default()).linked_repos().is_err());
    }

    #[test]
    fn test_linked_repos_with_clashing_directory_names() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("one").join("api");
        let b = dir.path().join("two").join("api");
        std::fs::create_dir_all(&a).unwrap();
        std::fs::create_dir_all(&b).unwrap();

        let mut config = Config::default();
        config.repositories.paths = vec![a, b];
        let names: Vec<String> = RunContext::new(config)
            .linked_repos()
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["one/api", "two/api"]);
    }
}
