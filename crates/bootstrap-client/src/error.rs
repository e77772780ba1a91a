//! Bootstrap client errors

use thiserror::Error;

/// Errors that can occur when talking to the secret store, the infrastructure
/// provider or the installer
#[derive(Debug, Error)]
pub enum BootstrapClientError {
    /// Kubernetes API request failed
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// The backing API returned an object we cannot use
    #[error("API error: {0}")]
    Api(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid request (e.g., missing required fields)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}
