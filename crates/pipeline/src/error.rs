use thiserror::Error;

use scrapeline_capabilities::CapabilityError;
use scrapeline_core::ScrapelineError;
use scrapeline_relay::RelayError;
use scrapeline_storage::StorageError;

/// Errors surfaced to callers of the extraction service.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Core(#[from] ScrapelineError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("dispatch error: {0}")]
    Relay(#[from] RelayError),

    #[error("capability error: {0}")]
    Capability(#[from] CapabilityError),
}

impl PipelineError {
    /// Bad url, schema or schedule, or an unknown id.
    pub fn is_input_error(&self) -> bool {
        match self {
            Self::Core(e) => e.is_input_error(),
            Self::Storage(StorageError::Core(e)) => e.is_input_error(),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Core(e) if e.is_not_found())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
