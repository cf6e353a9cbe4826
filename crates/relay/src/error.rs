use thiserror::Error;

/// Errors that can occur in the relay messaging layer.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("dispatcher is closed, rejected message for key {0}")]
    Closed(String),

    #[error("worker error: {0}")]
    Worker(String),
}
