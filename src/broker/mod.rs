//! Broker client contract and implementations.
//!
//! The orchestrator only depends on [`Broker`]. [`HttpBroker`] talks to the
//! queue's REST gateway; tests use the scripted in-memory broker.

use std::future::Future;

use serde_json::Value;

pub mod client;
pub mod error;
#[cfg(test)]
pub mod memory;
pub mod types;

pub use client::HttpBroker;
pub use error::BrokerError;
pub use types::{BrokerStatus, TaskProgress};

/// Capability to enqueue, inspect and revoke units of work on an external queue.
///
/// Implementations must be safe to share across every poller in the process;
/// the broker's result store is the single source of truth for job state.
pub trait Broker: Send + Sync + 'static {
    /// Cheap health probe used before fanning out a batch.
    fn ping(&self) -> impl Future<Output = Result<(), BrokerError>> + Send;

    /// Enqueue `task` with `args`, returning the broker-issued job id.
    fn enqueue(
        &self,
        task: &str,
        args: Vec<Value>,
    ) -> impl Future<Output = Result<String, BrokerError>> + Send;

    /// Current status of a previously enqueued job.
    fn status(&self, job_id: &str) -> impl Future<Output = Result<BrokerStatus, BrokerError>> + Send;

    /// Best-effort revoke of a job.
    fn cancel(&self, job_id: &str) -> impl Future<Output = Result<(), BrokerError>> + Send;
}
