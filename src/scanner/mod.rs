//! File scanner for discovering and filtering repository files.
//!
//! This module provides the file walk shared by all analyzers. It respects
//! extension filters, size limits and exclusion patterns, and skips
//! vendored third-party directories unless asked to include them.

use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Directories that hold third-party code.
pub const EXTERNAL_DIRS: &[&str] = &[
    "node_modules",
    "vendor",
    "third_party",
    "third-party",
    "site-packages",
    ".venv",
    "venv",
    "bower_components",
];

/// Configuration for file scanning.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// File extensions to include (e.g., ["rs", "py", "js"])
    pub extensions: Vec<String>,
    /// Directory or file names to exclude (e.g., ["target", ".git"])
    pub excludes: Vec<String>,
    /// Maximum file size in bytes
    pub max_file_size: u64,
    /// Maximum number of files to scan
    pub max_files: Option<usize>,
    /// Descend into vendored/third-party directories
    pub include_external: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            extensions: vec![
                "rs", "py", "js", "ts", "jsx", "tsx", "go", "java", "c", "cpp", "h", "hpp",
                "cs", "rb", "php", "swift", "kt", "scala", "sh", "toml", "yaml", "yml", "json",
                "env", "cfg", "ini",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            excludes: vec!["target", "dist", "build", "__pycache__", ".git"]
                .into_iter()
                .map(String::from)
                .collect(),
            max_file_size: 1024 * 1024, // 1MB
            max_files: None,
            include_external: false,
        }
    }
}

impl ScanConfig {
    /// Default configuration with the external-code switch set.
    pub fn with_external(include_external: bool) -> Self {
        Self {
            include_external,
            ..Self::default()
        }
    }
}

/// Scanned file information.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    /// Relative path from repo root, `/`-separated
    pub path: String,
    /// Absolute path on disk
    pub absolute: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// File extension (without dot)
    pub extension: String,
}

/// File scanner for one repository.
pub struct FileScanner {
    config: ScanConfig,
    repo_root: PathBuf,
}

impl FileScanner {
    /// Create a new file scanner.
    pub fn new(repo_root: PathBuf, config: ScanConfig) -> Self {
        Self { config, repo_root }
    }

    /// Scan for all matching files, sorted by relative path.
    pub fn scan(&self) -> Result<Vec<ScannedFile>> {
        let mut files = Vec::new();

        let walker = WalkDir::new(&self.repo_root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !self.is_excluded_entry(e));

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    debug!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().is_file() || !self.matches(entry.path()) {
                continue;
            }

            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            let rel_path = entry
                .path()
                .strip_prefix(&self.repo_root)
                .unwrap_or(entry.path());

            files.push(ScannedFile {
                path: rel_path.to_string_lossy().replace('\\', "/"),
                absolute: entry.path().to_path_buf(),
                size,
                extension: extension_of(entry.path()),
            });

            if let Some(max) = self.config.max_files {
                if files.len() >= max {
                    break;
                }
            }
        }

        Ok(files)
    }

    /// Check if a file matches scan criteria.
    pub fn matches(&self, path: &Path) -> bool {
        let ext = extension_of(path);
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");

        // `.env` has no extension as far as `Path` is concerned
        let ext_ok = self.config.extensions.contains(&ext)
            || (name.starts_with(".env") && self.config.extensions.iter().any(|e| e == "env"));
        if !ext_ok {
            return false;
        }

        match std::fs::metadata(path) {
            Ok(metadata) => metadata.len() <= self.config.max_file_size,
            Err(_) => false,
        }
    }

    fn is_excluded_entry(&self, entry: &DirEntry) -> bool {
        let name = entry.file_name().to_string_lossy();
        if entry.file_type().is_dir() {
            self.is_excluded_dir(&name)
        } else {
            self.config.excludes.iter().any(|pattern| name == pattern.as_str())
        }
    }

    /// Check if a directory name is skipped.
    fn is_excluded_dir(&self, name: &str) -> bool {
        if !self.config.include_external && EXTERNAL_DIRS.contains(&name) {
            return true;
        }

        // Hidden directories
        if name.starts_with('.') {
            return true;
        }

        self.config.excludes.iter().any(|pattern| name == pattern)
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
}
