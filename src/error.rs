//! Error types for drydock operations.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for sandbox and ledger operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A git operation failed for a reason other than a content conflict.
    #[error("git operation failed: {0}")]
    Vcs(String),

    /// The execution environment failed to start.
    #[error("failed to start execution environment: {0}")]
    EnvironmentStart(String),

    /// An operation against a running execution environment failed.
    #[error("execution environment error: {0}")]
    Environment(String),

    /// An exec step exceeded its deadline.
    #[error("agent execution timed out after {0} seconds")]
    ExecTimeout(u64),

    /// A referenced branch, task, issue, or orchestration does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A persisted ledger document exists but cannot be parsed.
    #[error("store corrupted at {path}: {reason}")]
    StoreCorruption { path: PathBuf, reason: String },

    /// Task dependencies would form a cycle.
    #[error("dependency cycle detected: {0}")]
    DependencyCycle(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error during sandbox or ledger operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for drydock operations.
pub type Result<T> = std::result::Result<T, Error>;
