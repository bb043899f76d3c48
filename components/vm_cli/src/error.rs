//! Error types for the CLI host.

use core_types::{LoadError, SerialError};

use thiserror::Error;

/// Everything the CLI host can fail on.
#[derive(Debug, Error)]
pub enum HostError {
    /// File I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A module failed to load or translate.
    #[error("module load failed: {0}")]
    Load(#[from] LoadError),

    /// A persisted-state operation failed.
    #[error("state error: {0}")]
    Serial(#[from] SerialError),

    /// The scenario file did not parse.
    #[error("scenario error: {0}")]
    Scenario(#[from] serde_json::Error),

    /// A start request named a script no linked module defines.
    #[error("unknown script {0:?}")]
    UnknownScript(String),
}

/// Result type for CLI operations.
pub type HostResult<T> = Result<T, HostError>;
