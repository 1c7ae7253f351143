//! Error types for the Sprout routing core.
//!
//! Uses `thiserror` for public API error types. Only configuration errors are
//! fatal: invocation failures are absorbed by the retry controller and turned
//! into routing-state transitions, so callers of `route()` never see them.

use std::path::PathBuf;

/// Top-level error type for the Sprout core library.
#[derive(Debug, thiserror::Error)]
pub enum SproutError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invocation error: {0}")]
    Invoke(#[from] InvokeError),
}

/// Errors raised while loading configuration or the specialist registry.
///
/// These abort startup; they are never produced at request time.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },

    #[error("Duplicate specialist id: {id}")]
    DuplicateSpecialist { id: String },

    #[error("Generalist '{id}' is not a registered specialist")]
    MissingGeneralist { id: String },

    #[error("'{referenced_by}' references unknown specialist '{id}'")]
    UnknownSpecialist { referenced_by: String, id: String },

    #[error("Fallback chain of '{id}' is invalid: {reason}")]
    InvalidFallbackChain { id: String, reason: String },

    #[error("Fallback chains form a cycle through '{id}'")]
    CyclicFallback { id: String },
}

/// Errors from the external specialist invocation service.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InvokeError {
    #[error("Specialist '{specialist}' timed out after {timeout_ms}ms")]
    Timeout { specialist: String, timeout_ms: u64 },

    #[error("Remote failure from '{specialist}': {message}")]
    Remote { specialist: String, message: String },

    #[error("Request to '{specialist}' rejected ({status}): {message}")]
    Rejected {
        specialist: String,
        status: u16,
        message: String,
    },

    #[error("Rate limited while invoking '{specialist}'")]
    RateLimited { specialist: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Response parse error: {message}")]
    ResponseParse { message: String },

    #[error("No such specialist: {specialist}")]
    UnknownSpecialist { specialist: String },
}

impl InvokeError {
    /// Whether retrying the same specialist may succeed.
    ///
    /// Non-transient errors skip straight to rerouting.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            InvokeError::Timeout { .. }
                | InvokeError::Remote { .. }
                | InvokeError::RateLimited { .. }
                | InvokeError::ResponseParse { .. }
        )
    }
}

/// A type alias for results using the top-level `SproutError`.
pub type Result<T> = std::result::Result<T, SproutError>;
