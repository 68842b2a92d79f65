//! Error types shared by every Grinch crate.

use thiserror::Error;

/// Everything that can go wrong outside of a check verdict.
///
/// A check that finds a missing pipeline stage is *not* an error; it is an
/// `ActionRequired` outcome. These variants cover configuration mistakes,
/// registry failures, and notification delivery problems.
#[derive(Debug, Error)]
pub enum GrinchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown check '{0}'")]
    UnknownCheck(String),

    #[error("Check '{check}' is missing required option '{option}'")]
    MissingOption { check: String, option: String },

    #[error("Check '{check}' has invalid option '{option}': {reason}")]
    InvalidOption {
        check: String,
        option: String,
        reason: String,
    },

    #[error("Registry error: {message}")]
    Registry { message: String, transient: bool },

    #[error("Event not found: {0}")]
    NotFound(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Notification error: {0}")]
    Notify(String),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GrinchError {
    /// A registry failure worth retrying (unavailable, overloaded, timed out).
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Registry {
            message: message.into(),
            transient: true,
        }
    }

    /// A registry failure that will not go away on retry.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Registry {
            message: message.into(),
            transient: false,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Registry {
                transient: true,
                ..
            } | Self::Timeout(_)
        )
    }

    /// Configuration errors abort before any task is scheduled.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::UnknownCheck(_)
                | Self::MissingOption { .. }
                | Self::InvalidOption { .. }
        )
    }

    pub fn missing(check: &str, option: &str) -> Self {
        Self::MissingOption {
            check: check.to_string(),
            option: option.to_string(),
        }
    }

    pub fn invalid(check: &str, option: &str, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            check: check.to_string(),
            option: option.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GrinchError>;
