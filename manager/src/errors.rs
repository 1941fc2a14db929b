//! Error types for the IoT manager

use thiserror::Error;

/// Main error type for the IoT manager
#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Malformed or incomplete request, raised before any external call
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Referenced deployment, job, hub or provisioning service is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource exists but was not created by this system
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Optimistic-concurrency token mismatch on a secondary-store write
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Transport or availability failure of a collaborator
    #[error("External dependency error: {0}")]
    ExternalDependency(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ManagerError {
    /// Whether the error means the referenced resource does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, ManagerError::NotFound(_))
    }

    /// Whether resubmitting the same request may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ManagerError::Conflict(_) | ManagerError::ExternalDependency(_) | ManagerError::HttpError(_)
        )
    }
}
