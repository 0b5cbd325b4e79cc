//! Error types for Switchyard Core

use std::time::Duration;

use thiserror::Error;

/// Result type alias using Switchyard Error
pub type Result<T> = std::result::Result<T, Error>;

/// Switchyard error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Session router is not initialized; call initialize() first")]
    NotInitialized,

    #[error("Failed to prepare profile '{profile}': {source}")]
    ProfileLoad {
        profile: String,
        #[source]
        source: LoadError,
    },

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Capability error: {0}")]
    Capability(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Approval error: {0}")]
    Approval(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Profile loading errors
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("profile source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("profile not found: {0}")]
    NotFound(String),

    #[error("unsupported profile URI: {0}")]
    UnsupportedUri(String),

    #[error("invalid profile manifest: {0}")]
    InvalidManifest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("temporarily unavailable: {0}")]
    Transient(String),
}

/// Coarse classification used when reporting failures to a chat surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Something the operator has to fix (settings, profile definitions)
    Configuration,
    /// Worth retrying as-is
    Transient,
    /// A bug or an unexpected runtime failure
    Internal,
}

impl Error {
    /// Wrap a loader failure for the given profile
    pub fn profile_load(profile: impl Into<String>, source: LoadError) -> Self {
        Error::ProfileLoad {
            profile: profile.into(),
            source,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::ProfileLoad { source, .. } => match source {
                LoadError::Transient(_) | LoadError::Io(_) => ErrorCategory::Transient,
                _ => ErrorCategory::Configuration,
            },
            Error::Settings(_) | Error::Config(_) | Error::InvalidPath(_) => {
                ErrorCategory::Configuration
            }
            Error::Timeout(_) | Error::Io(_) => ErrorCategory::Transient,
            Error::NotInitialized
            | Error::Session(_)
            | Error::Capability(_)
            | Error::Approval(_)
            | Error::Serialization(_) => ErrorCategory::Internal,
        }
    }

    /// A single sentence suitable for posting back into a conversation.
    ///
    /// Never includes the source chain.
    pub fn user_message(&self) -> String {
        match (self.category(), self) {
            (ErrorCategory::Configuration, Error::ProfileLoad { profile, .. }) => format!(
                "The '{}' profile for this conversation could not be loaded. Check the project settings and try again.",
                profile
            ),
            (ErrorCategory::Transient, Error::ProfileLoad { profile, .. }) => format!(
                "The '{}' profile is temporarily unavailable. Please try again in a moment.",
                profile
            ),
            (ErrorCategory::Configuration, _) => {
                "This conversation is misconfigured. Check the project settings and try again."
                    .to_string()
            }
            (ErrorCategory::Transient, _) => {
                "Something went wrong temporarily. Please try again in a moment.".to_string()
            }
            (ErrorCategory::Internal, _) => {
                "Sorry, I couldn't process that message due to an internal error.".to_string()
            }
        }
    }
}
