//! Error types shared by the core components.
//!
//! Structural errors (validation, dependency cycles, agent bookkeeping) are
//! returned as [`ScopeError`]. Per-unit faults never show up here; they are
//! reported as data in a [`crate::models::TransportRecord`].

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScopeError {
    #[error("Unknown analyzer '{name}' (available: {available})")]
    UnknownAnalyzer { name: String, available: String },

    #[error("Repository path does not exist: {}", .0.display())]
    RepositoryNotFound(PathBuf),

    #[error("Circular dependency between repositories: {}", .nodes.join(", "))]
    DependencyCycle { nodes: Vec<String> },

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Timed out waiting for agents still running: {}", .running.join(", "))]
    AgentWaitTimeout { running: Vec<String> },

    #[error("Failed to spawn agent: {0}")]
    AgentSpawn(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ScopeError {
    /// Whether the error was raised by input validation before any work ran.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ScopeError::UnknownAnalyzer { .. } | ScopeError::RepositoryNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ScopeError>;
