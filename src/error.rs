//! Error types for the validator service.

use thiserror::Error;

/// Crate-level error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Artifact lookup, download or installation error
    #[error("Fetch error: {0}")]
    Fetch(#[from] crate::engine::fetch::FetchError),

    /// Engine process lifecycle error
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] crate::engine::lifecycle::LifecycleError),

    /// Request against the running engine failed
    #[error("Client error: {0}")]
    Client(#[from] crate::client::ClientError),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for crate operations.
pub type Result<T> = std::result::Result<T, Error>;
