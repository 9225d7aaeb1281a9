use thiserror::Error;

pub use crate::broker::BrokerError;

#[derive(Debug, Error)]
pub enum DocflowError {
    #[error("invalid input: {0}")]
    Input(String),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("Batch not found: {0}")]
    BatchNotFound(String),

    #[error("Config error: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl DocflowError {
    /// True when the broker itself could not take the request.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, DocflowError::Broker(BrokerError::Unavailable(_)))
    }
}
