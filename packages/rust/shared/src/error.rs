//! Error types for Stagecraft.
//!
//! Library crates use [`StagecraftError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all Stagecraft operations.
#[derive(Debug, thiserror::Error)]
pub enum StagecraftError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// No qualifying activity, or no stage report at all.
    #[error("not found: {message}")]
    NotFound { message: String },

    /// Input rejected by a validation rule (e.g. ride shorter than the minimum).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Network, HTTP, or auth failure talking to an external service.
    #[error("external service error: {0}")]
    ExternalService(String),

    /// Malformed structured data (model response, API payload, HTML).
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
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, StagecraftError>;

impl StagecraftError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a not-found error from any displayable message.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound {
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

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Short machine-friendly kind label, used in run history and result objects.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::NotFound { .. } => "not_found",
            Self::Validation { .. } => "validation",
            Self::ExternalService(_) => "external_service",
            Self::Parse { .. } => "parse",
            Self::Storage(_) => "storage",
            Self::Io { .. } => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = StagecraftError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = StagecraftError::validation("ride lasted 12 min, minimum is 20");
        assert!(err.to_string().contains("minimum is 20"));

        let err = StagecraftError::not_found("no report for stage 4");
        assert_eq!(err.to_string(), "not found: no report for stage 4");
    }

    #[test]
    fn error_kinds() {
        assert_eq!(StagecraftError::not_found("x").kind(), "not_found");
        assert_eq!(
            StagecraftError::ExternalService("timeout".into()).kind(),
            "external_service"
        );
    }
}
