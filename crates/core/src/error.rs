use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScrapelineError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl ScrapelineError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Errors caused by caller input. These are surfaced immediately and never retried.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidUrl(_)
                | Self::InvalidSchema(_)
                | Self::InvalidSchedule(_)
                | Self::NotFound { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
