//! Error types for StatuteSync.
//!
//! Library crates use [`StatuteSyncError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use crate::types::Stage;

/// Top-level error type for all StatuteSync operations.
#[derive(Debug, thiserror::Error)]
pub enum StatuteSyncError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Malformed input (article snapshot JSON, text fixture, etc.).
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Precondition or data validation error.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// An external collaborator failed while a pipeline stage was running.
    #[error("{stage} stage failed: {message}")]
    Stage { stage: Stage, message: String },

    /// The pipeline was aborted while a stage was in flight.
    #[error("{stage} stage aborted")]
    Aborted { stage: Stage },

    /// A commit failed and was rolled back to the pre-commit state.
    #[error("commit rolled back: {0}")]
    Commit(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, StatuteSyncError>;

impl StatuteSyncError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Tag a collaborator failure with the stage that produced it.
    pub fn stage(stage: Stage, msg: impl Into<String>) -> Self {
        Self::Stage {
            stage,
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// The pipeline stage this error is attributed to, if any.
    pub fn stage_tag(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } | Self::Aborted { stage } => Some(*stage),
            _ => None,
        }
    }
}
