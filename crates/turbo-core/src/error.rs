//! Error handling for turbo
//!
//! Provides a unified error type and result type for use across all turbo
//! components. The variants map directly to the failure modes the calling
//! layer needs to distinguish: no capacity, backend unreachable, timed out,
//! bad profile, and not-ready.

/// Result type alias for turbo operations
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for turbo
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No device can host the requested or selected model
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Transport-level failure talking to the inference backend
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Connect or overall request timeout exceeded
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Unknown profile name
    #[error("Invalid profile: {0}")]
    InvalidProfile(String),

    /// Orchestrator is not in the Ready state
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Model id not present in the catalog
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    InvalidConfiguration(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration parsing errors
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    /// Create a resource exhausted error
    pub fn resource_exhausted(msg: impl Into<String>) -> Self {
        Self::ResourceExhausted(msg.into())
    }

    /// Create a backend unavailable error
    pub fn backend_unavailable(msg: impl Into<String>) -> Self {
        Self::BackendUnavailable(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create an invalid profile error
    pub fn invalid_profile(msg: impl Into<String>) -> Self {
        Self::InvalidProfile(msg.into())
    }

    /// Create an unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create an unknown model error
    pub fn unknown_model(msg: impl Into<String>) -> Self {
        Self::UnknownModel(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Check if this error is retryable from the caller's point of view
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::BackendUnavailable(_) | Error::Timeout(_) | Error::ResourceExhausted(_)
        )
    }

    /// Get the error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::ResourceExhausted(_) => "resource_exhausted",
            Error::BackendUnavailable(_) => "backend_unavailable",
            Error::Timeout(_) => "timeout",
            Error::InvalidProfile(_) => "invalid_profile",
            Error::Unavailable(_) => "unavailable",
            Error::UnknownModel(_) => "unknown_model",
            Error::InvalidConfiguration(_) => "configuration",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Config(_) => "config",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::resource_exhausted("no device fits deepseek-coder:6.7b");
        assert!(matches!(err, Error::ResourceExhausted(_)));
        assert_eq!(
            err.to_string(),
            "Resource exhausted: no device fits deepseek-coder:6.7b"
        );
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(Error::timeout("t").category(), "timeout");
        assert_eq!(Error::invalid_profile("p").category(), "invalid_profile");
        assert_eq!(Error::unavailable("u").category(), "unavailable");
        assert_eq!(Error::config("c").category(), "configuration");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::backend_unavailable("refused").is_retryable());
        assert!(Error::timeout("60s").is_retryable());
        assert!(!Error::invalid_profile("nope").is_retryable());
        assert!(!Error::unavailable("shut down").is_retryable());
    }
}
