//! Submit document conversion jobs to a broker-backed worker pool and track
//! them to completion under a bounded wait.

pub mod batch;
pub mod broker;
pub mod cli;
pub mod config;
pub mod error;
pub mod poller;
pub mod report;
pub mod service;
pub mod state_machine;
pub mod ui;

pub use batch::{BatchOrchestrator, BatchPoll, BatchProgress, BatchTicket};
pub use broker::{Broker, BrokerError, BrokerStatus, HttpBroker};
pub use config::DocflowConfig;
pub use error::DocflowError;
pub use poller::{PollConfig, StatusPoller};
pub use report::{BatchReport, ItemOutcome, Summary};
pub use service::ConversionService;
pub use state_machine::{Job, JobState, Outcome, PollReply, WorkItem};
