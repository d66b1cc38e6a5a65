//! Content-addressed cache of analyzer output.
//!
//! Entries live under `<root>/<repo-hash>/` as a pair of files per
//! (file content hash, analyzer): `<hash>__<analyzer>.json` holds the
//! serialized [`AnalyzerResult`], `<hash>__<analyzer>.meta.json` holds the
//! [`CacheMetadata`] used for validation. Hit/miss counters are kept in
//! `<root>/cache_stats.json`.
//!
//! The cache is an optimization only. Every read or write fault is
//! downgraded to a miss or a skipped write through [`best_effort`].

pub mod hash;

pub use hash::{file_hash, repository_hash};

use crate::fsutil::{read_json, write_json_atomic};
use crate::models::AnalyzerResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

/// Bookkeeping file holding hit/miss counters. Excluded from statistics.
pub const STATS_FILE: &str = "cache_stats.json";

const DATA_SUFFIX: &str = ".json";
const META_SUFFIX: &str = ".meta.json";
const KEY_SEPARATOR: &str = "__";

/// Metadata stored next to each cached result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// Path of the file relative to its repository.
    pub file_path: String,
    /// Content hash at the time the entry was written.
    pub file_hash: String,
    pub analyzer_name: String,
    pub timestamp: DateTime<Utc>,
    /// Version of the tool that produced the entry.
    pub tool_version: String,
}

/// Persisted counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StatsRecord {
    #[serde(default)]
    hit_count: u64,
    #[serde(default)]
    miss_count: u64,
    #[serde(default)]
    last_cleared: Option<DateTime<Utc>>,
}

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub total_size_bytes: u64,
    pub hit_count: u64,
    pub miss_count: u64,
    pub last_cleared: Option<DateTime<Utc>>,
}

impl CacheStats {
    /// Hit rate as a percentage; 0 when no lookups were recorded.
    pub fn hit_rate(&self) -> f64 {
        let samples = self.hit_count + self.miss_count;
        if samples == 0 {
            0.0
        } else {
            self.hit_count as f64 / samples as f64 * 100.0
        }
    }
}

/// Address of one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    repo_hash: String,
    file_hash: String,
    analyzer: String,
}

impl CacheKey {
    fn stem(&self) -> String {
        format!("{}{}{}", self.file_hash, KEY_SEPARATOR, self.analyzer)
    }
}

/// Runs a cache operation, logging and discarding any error.
///
/// This is the single place where cache faults are swallowed; callers get
/// `None` and carry on as if the cache were empty.
pub fn best_effort<T>(operation: &str, f: impl FnOnce() -> anyhow::Result<T>) -> Option<T> {
    match f() {
        Ok(value) => Some(value),
        Err(e) => {
            debug!("Cache {} skipped: {:#}", operation, e);
            None
        }
    }
}

/// Filesystem-backed cache store.
pub struct CacheStore {
    root: PathBuf,
    tool_version: String,
    counters: Mutex<()>,
}

impl CacheStore {
    /// Create a store rooted at `root` for the given tool version.
    pub fn new(root: impl Into<PathBuf>, tool_version: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            tool_version: tool_version.into(),
            counters: Mutex::new(()),
        }
    }

    /// Create a store for the running build of this tool.
    pub fn for_current_version(root: impl Into<PathBuf>) -> Self {
        Self::new(root, env!("CARGO_PKG_VERSION"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tool_version(&self) -> &str {
        &self.tool_version
    }

    /// Computes the key for a file, or `None` when it cannot be hashed.
    fn key_for(&self, repo_path: &Path, relative_path: &str, analyzer: &str) -> Option<CacheKey> {
        best_effort("hash", || {
            Ok(CacheKey {
                repo_hash: repository_hash(repo_path),
                file_hash: file_hash(&repo_path.join(relative_path))?,
                analyzer: analyzer.to_string(),
            })
        })
    }

    /// Looks up the cached result for a file under one analyzer.
    ///
    /// Counts a hit or a miss in either case, including when the file
    /// cannot be hashed.
    pub fn get(&self, repo_path: &Path, relative_path: &str, analyzer: &str) -> Option<AnalyzerResult> {
        match self.key_for(repo_path, relative_path, analyzer) {
            Some(key) => self.lookup(&key),
            None => {
                self.record_lookup(false);
                None
            }
        }
    }

    /// Looks up an entry by precomputed key.
    fn lookup(&self, key: &CacheKey) -> Option<AnalyzerResult> {
        let result = best_effort("read", || {
            let (data_path, meta_path) = self.entry_paths(key);
            if !meta_path.exists() {
                return Ok(None);
            }

            let meta: CacheMetadata = read_json(&meta_path)?;
            if meta.file_hash != key.file_hash || meta.tool_version != self.tool_version {
                debug!(
                    "Stale cache entry for {} ({} / {})",
                    meta.file_path, meta.analyzer_name, meta.tool_version
                );
                return Ok(None);
            }

            Ok(Some(read_json::<AnalyzerResult>(&data_path)?))
        })
        .flatten();

        self.record_lookup(result.is_some());
        result
    }

    /// Stores the result for a file. Returns whether the entry was written.
    pub fn put(
        &self,
        repo_path: &Path,
        relative_path: &str,
        analyzer: &str,
        result: &AnalyzerResult,
    ) -> bool {
        match self.key_for(repo_path, relative_path, analyzer) {
            Some(key) => self.store(&key, relative_path, result),
            None => false,
        }
    }

    /// Stores a result by precomputed key. Returns whether it was written.
    fn store(&self, key: &CacheKey, relative_path: &str, result: &AnalyzerResult) -> bool {
        best_effort("write", || {
            let (data_path, meta_path) = self.entry_paths(key);
            let meta = CacheMetadata {
                file_path: relative_path.to_string(),
                file_hash: key.file_hash.clone(),
                analyzer_name: key.analyzer.clone(),
                timestamp: Utc::now(),
                tool_version: self.tool_version.clone(),
            };

            // Metadata last: an entry without metadata reads as a miss
            write_json_atomic(&data_path, result)?;
            write_json_atomic(&meta_path, &meta)?;
            Ok(())
        })
        .is_some()
    }

    /// Removes every entry for the file's current content, across analyzers.
    /// Returns the number of entries removed.
    pub fn invalidate_file(&self, repo_path: &Path, relative_path: &str) -> usize {
        let namespace = self.namespace(repo_path);
        best_effort("invalidate", || {
            let hash = file_hash(&repo_path.join(relative_path))?;
            let prefix = format!("{}{}", hash, KEY_SEPARATOR);
            let mut removed = 0;

            for entry in fs::read_dir(&namespace)?.flatten() {
                let name = entry.file_name().to_string_lossy().to_string();
                if !name.starts_with(&prefix) {
                    continue;
                }
                if is_data_file(&name) {
                    removed += 1;
                }
                fs::remove_file(entry.path())?;
            }

            Ok(removed)
        })
        .unwrap_or(0)
    }

    /// Removes the whole namespace of a repository. Returns the number of
    /// entries removed.
    pub fn invalidate_repository(&self, repo_path: &Path) -> usize {
        let namespace = self.namespace(repo_path);
        best_effort("invalidate", || {
            if !namespace.exists() {
                return Ok(0);
            }
            let removed = count_entries(&namespace).0;
            fs::remove_dir_all(&namespace)?;
            info!("Invalidated {} cache entries in {}", removed, namespace.display());
            Ok(removed)
        })
        .unwrap_or(0)
    }

    /// Removes all entries, resets the counters and records the clear time.
    pub fn clear(&self) -> anyhow::Result<usize> {
        let _guard = self.counters.lock().unwrap_or_else(|p| p.into_inner());
        let mut removed = 0;

        if self.root.exists() {
            for entry in fs::read_dir(&self.root)?.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    removed += count_entries(&path).0;
                    fs::remove_dir_all(&path)?;
                } else if entry.file_name() != STATS_FILE {
                    fs::remove_file(&path)?;
                }
            }
        }

        let record = StatsRecord {
            hit_count: 0,
            miss_count: 0,
            last_cleared: Some(Utc::now()),
        };
        write_json_atomic(&self.stats_path(), &record)?;
        info!("Cleared {} cache entries", removed);

        Ok(removed)
    }

    /// Scans the cache and returns its statistics.
    pub fn stats(&self) -> CacheStats {
        let record = self.read_counters();
        let (total_entries, total_size_bytes) = if self.root.exists() {
            count_entries(&self.root)
        } else {
            (0, 0)
        };

        CacheStats {
            total_entries,
            total_size_bytes,
            hit_count: record.hit_count,
            miss_count: record.miss_count,
            last_cleared: record.last_cleared,
        }
    }

    fn namespace(&self, repo_path: &Path) -> PathBuf {
        self.root.join(repository_hash(repo_path))
    }

    fn entry_paths(&self, key: &CacheKey) -> (PathBuf, PathBuf) {
        let dir = self.root.join(&key.repo_hash);
        let stem = key.stem();
        (
            dir.join(format!("{}{}", stem, DATA_SUFFIX)),
            dir.join(format!("{}{}", stem, META_SUFFIX)),
        )
    }

    fn stats_path(&self) -> PathBuf {
        self.root.join(STATS_FILE)
    }

    fn read_counters(&self) -> StatsRecord {
        best_effort("stats read", || read_json::<StatsRecord>(&self.stats_path())).unwrap_or_default()
    }

    fn record_lookup(&self, hit: bool) {
        let _guard = self.counters.lock().unwrap_or_else(|p| p.into_inner());
        let mut record = self.read_counters();
        if hit {
            record.hit_count += 1;
        } else {
            record.miss_count += 1;
        }
        best_effort("stats write", || Ok(write_json_atomic(&self.stats_path(), &record)?));
    }
}

fn is_data_file(name: &str) -> bool {
    name.ends_with(DATA_SUFFIX) && !name.ends_with(META_SUFFIX) && name != STATS_FILE
}

/// Counts entries (data files) and total bytes under `dir`, skipping the
/// stats file.
fn count_entries(dir: &Path) -> (usize, u64) {
    let mut entries = 0;
    let mut bytes = 0;

    for entry in walkdir::WalkDir::new(dir)
        .max_depth(2)
        .into_iter()
        .flatten()
        .filter(|e| e.file_type().is_file())
    {
        let name = entry.file_name().to_string_lossy();
        if name == STATS_FILE {
            continue;
        }
        if is_data_file(&name) {
            entries += 1;
        }
        bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
    }

    (entries, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Finding, Severity};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        repo: PathBuf,
        store: CacheStore,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let repo = dir.path().join("repo");
        fs::create_dir_all(&repo).unwrap();
        fs::write(repo.join("app.py"), "password = 'hunter2'\n").unwrap();
        let store = CacheStore::new(dir.path().join("cache"), "1.0.0");
        Fixture { _dir: dir, repo, store }
    }

    fn sample_result() -> AnalyzerResult {
        let mut result = AnalyzerResult::new("security");
        result.findings.push(
            Finding::new("security", Severity::High, "Hard-coded password", "found")
                .at("app.py", Some(1)),
        );
        result
    }

    #[test]
    fn test_round_trip_counts_hit() {
        let fx = fixture();
        let result = sample_result();

        assert!(fx.store.put(&fx.repo, "app.py", "security", &result));
        let cached = fx.store.get(&fx.repo, "app.py", "security");

        assert_eq!(cached, Some(result));
        let stats = fx.store.stats();
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 0);
    }

    #[test]
    fn test_changed_content_is_a_miss() {
        let fx = fixture();
        fx.store.put(&fx.repo, "app.py", "security", &sample_result());

        fs::write(fx.repo.join("app.py"), "password = 'hunter3'\n").unwrap();

        assert!(fx.store.get(&fx.repo, "app.py", "security").is_none());
        let stats = fx.store.stats();
        assert_eq!(stats.hit_count, 0);
        assert_eq!(stats.miss_count, 1);
    }

    #[test]
    fn test_cold_lookup_counts_miss() {
        let fx = fixture();
        assert!(fx.store.get(&fx.repo, "app.py", "security").is_none());
        assert!(fx.store.get(&fx.repo, "missing.py", "security").is_none());
        assert_eq!(fx.store.stats().miss_count, 2);
    }

    #[test]
    fn test_tool_version_change_is_a_miss() {
        let fx = fixture();
        fx.store.put(&fx.repo, "app.py", "security", &sample_result());

        let newer = CacheStore::new(fx.store.root().to_path_buf(), "2.0.0");
        assert!(newer.get(&fx.repo, "app.py", "security").is_none());

        // Next write from the newer version overwrites the stale entry
        assert!(newer.put(&fx.repo, "app.py", "security", &sample_result()));
        assert!(newer.get(&fx.repo, "app.py", "security").is_some());
        assert_eq!(newer.stats().total_entries, 1);
    }

    #[test]
    fn test_analyzers_do_not_share_entries() {
        let fx = fixture();
        fx.store.put(&fx.repo, "app.py", "security", &sample_result());
        assert!(fx.store.get(&fx.repo, "app.py", "debt").is_none());
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hit_count: 3,
            miss_count: 1,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 75.0).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_invalidate_file_removes_all_analyzers() {
        let fx = fixture();
        fx.store.put(&fx.repo, "app.py", "security", &sample_result());
        fx.store.put(&fx.repo, "app.py", "debt", &AnalyzerResult::new("debt"));
        fs::write(fx.repo.join("other.py"), "x = 1\n").unwrap();
        fx.store.put(&fx.repo, "other.py", "debt", &AnalyzerResult::new("debt"));

        assert_eq!(fx.store.invalidate_file(&fx.repo, "app.py"), 2);
        assert_eq!(fx.store.stats().total_entries, 1);
        assert!(fx.store.get(&fx.repo, "other.py", "debt").is_some());
    }

    #[test]
    fn test_invalidate_repository() {
        let fx = fixture();
        fx.store.put(&fx.repo, "app.py", "security", &sample_result());

        assert_eq!(fx.store.invalidate_repository(&fx.repo), 1);
        assert_eq!(fx.store.invalidate_repository(&fx.repo), 0);
        assert_eq!(fx.store.stats().total_entries, 0);
    }

    #[test]
    fn test_clear_resets_counters() {
        let fx = fixture();
        fx.store.put(&fx.repo, "app.py", "security", &sample_result());
        fx.store.get(&fx.repo, "app.py", "security");
        fx.store.get(&fx.repo, "app.py", "debt");

        assert_eq!(fx.store.clear().unwrap(), 1);

        let stats = fx.store.stats();
        assert_eq!(stats.total_entries, 0);
        assert_eq!(stats.total_size_bytes, 0);
        assert_eq!(stats.hit_count, 0);
        assert_eq!(stats.miss_count, 0);
        assert!(stats.last_cleared.is_some());
    }

    #[test]
    fn test_stats_exclude_bookkeeping_file() {
        let fx = fixture();
        fx.store.get(&fx.repo, "app.py", "security");
        assert!(fx.store.root().join(STATS_FILE).exists());

        let stats = fx.store.stats();
        assert_eq!(stats.total_entries, 0);
        assert_eq!(stats.total_size_bytes, 0);

        fx.store.put(&fx.repo, "app.py", "security", &sample_result());
        let stats = fx.store.stats();
        assert_eq!(stats.total_entries, 1);
        assert!(stats.total_size_bytes > 0);
    }

    #[test]
    fn test_unwritable_root_is_swallowed() {
        let dir = TempDir::new().unwrap();
        let repo = dir.path().join("repo");
        fs::create_dir_all(&repo).unwrap();
        fs::write(repo.join("a.py"), "x").unwrap();

        // A regular file where the cache directory should be
        let blocker = dir.path().join("cache");
        fs::write(&blocker, "not a dir").unwrap();
        let store = CacheStore::new(&blocker, "1.0.0");

        assert!(!store.put(&repo, "a.py", "debt", &AnalyzerResult::new("debt")));
        assert!(store.get(&repo, "a.py", "debt").is_none());
        assert_eq!(store.stats().total_entries, 0);
    }
}
