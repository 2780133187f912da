//! Error types shared by the handle, the drivers and the configuration loader.

/// Result type for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors that can occur during bridge operations.
///
/// Delivery failures are not represented here: they are recorded on the
/// event itself and surfaced through the handle's error counter.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Concurrency conflict: {0}")]
    Concurrency(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Resource unavailable: {0}")]
    Resource(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl BridgeError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn concurrency(message: impl Into<String>) -> Self {
        Self::Concurrency(message.into())
    }

    pub(crate) fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }
}
