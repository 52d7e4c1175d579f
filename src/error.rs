//! Error types for the lisa orchestration engine.

use thiserror::Error;

/// Top-level error type for workspace, planning and generation operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A path resolved outside the workspace root.
    #[error("access denied for '{path}': {reason}")]
    Containment { path: String, reason: String },

    /// The requested workspace entry does not exist.
    #[error("file not found: {0}")]
    NotFound(String),

    /// IO error during workspace operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The planner produced a malformed or empty plan.
    #[error("plan error: {0}")]
    Plan(String),

    /// The text-generation backend failed or returned unusable output.
    #[error("generation failed: {0}")]
    Generation(String),

    /// Run configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Session store operation failed.
    #[error("session error: {0}")]
    Session(String),
}

impl Error {
    /// Builds a containment error for `path`.
    pub fn containment(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Containment {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if this error is a sandbox containment violation.
    pub fn is_containment(&self) -> bool {
        matches!(self, Error::Containment { .. })
    }
}

/// Result type alias for lisa operations.
pub type Result<T> = std::result::Result<T, Error>;
