//! Error types for the narrative director.
//!
//! Only boundary operations return these: adding threads, loading configuration,
//! and restoring saves. Nothing inside a tick is allowed to fail.

use thiserror::Error;

use crate::thread::ThreadId;

/// Errors surfaced at the director's boundaries.
#[derive(Debug, Error)]
pub enum DirectorError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

impl DirectorError {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::Validation(ValidationError::Malformed(message.into()))
    }
}

/// Why a thread or snapshot was turned away at the boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("thread {0} is already registered")]
    DuplicateId(ThreadId),

    #[error("{0}")]
    Malformed(String),
}

/// Result alias used across the crate.
pub type DirectorResult<T> = Result<T, DirectorError>;
