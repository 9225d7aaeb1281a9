//! Error types for talking to the broker.
//!
//! [`BrokerError`] separates failures that mean "the broker cannot take work
//! right now" from failures of a single status read. The poller retries the
//! latter until its wait budget runs out; the former abort a submission.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// The broker could not be reached or refused new work.
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// A status query failed in transit. Safe to retry on the next tick.
    #[error("status query failed: {0}")]
    TransientQuery(String),

    /// The broker answered with something we could not understand.
    #[error("malformed broker response: {0}")]
    Malformed(String),
}

impl BrokerError {
    /// Wraps a reqwest failure that happened while submitting or cancelling.
    pub fn unavailable(err: reqwest::Error) -> Self {
        BrokerError::Unavailable(err.to_string())
    }

    /// Wraps a reqwest failure that happened while reading a status.
    pub fn transient(err: reqwest::Error) -> Self {
        BrokerError::TransientQuery(err.to_string())
    }
}
