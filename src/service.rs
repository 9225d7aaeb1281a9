//! The surface an HTTP layer sits on.
//!
//! [`ConversionService`] wraps the poller and the batch orchestrator behind
//! the calls a transport needs: submit, poll once, wait, and the batch
//! equivalents. Replies carry the status code the transport should use.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::batch::{BatchOrchestrator, BatchPoll, BatchProgress, BatchTicket};
use crate::broker::Broker;
use crate::broker::types::conversion_args;
use crate::config::BrokerConfig;
use crate::error::DocflowError;
use crate::poller::{PollConfig, StatusPoller};
use crate::report::BatchReport;
use crate::state_machine::{BatchMode, Job, Outcome, PollReply, WorkItem};

pub struct ConversionService<B> {
    broker: Arc<B>,
    poller: StatusPoller<B>,
    batches: BatchOrchestrator<B>,
    convert_task: String,
}

impl<B: Broker> ConversionService<B> {
    pub fn new(broker: Arc<B>, config: &BrokerConfig, poll: PollConfig, mode: BatchMode) -> Self {
        let poller = StatusPoller::new(Arc::clone(&broker), poll).with_retention(config.result_expires());
        Self {
            batches: BatchOrchestrator::new(poller.clone(), config, mode),
            poller,
            broker,
            convert_task: config.convert_task.clone(),
        }
    }

    pub fn poll_config(&self) -> &PollConfig {
        self.poller.config()
    }

    pub fn batch_mode(&self) -> BatchMode {
        self.batches.mode()
    }

    pub async fn ping(&self) -> Result<(), DocflowError> {
        self.broker.ping().await?;
        Ok(())
    }

    /// Enqueues one document. The returned job is `Pending`.
    pub async fn submit_one(&self, filename: &str, payload: Vec<u8>) -> Result<Job, DocflowError> {
        let item = WorkItem::new(filename, payload);
        item.validate()?;
        let job_id = self
            .broker
            .enqueue(&self.convert_task, conversion_args(&item))
            .await
            .inspect_err(|err| warn!(%filename, error = %err, "failed to enqueue conversion"))?;
        info!(%job_id, %filename, bytes = item.payload.len(), "conversion enqueued");
        Ok(Job::new(job_id, item.filename))
    }

    /// One status read. `Processing` is a normal reply (202), not an error.
    ///
    /// A job this service already timed out reports that verdict. A failed
    /// read is returned as an error so the caller can simply ask again.
    pub async fn poll_one(&self, job_id: &str) -> Result<PollReply, DocflowError> {
        let mut job = Job::new(job_id.to_string(), String::new());
        self.poller.poll_once(&mut job).await?;
        Ok(job.reply())
    }

    /// Waits up to `max_wait` for a job submitted elsewhere.
    ///
    /// A timeout comes back as [`Outcome::TimedOut`] (408), after the job has
    /// been revoked.
    pub async fn await_one(&self, job_id: &str, max_wait: Duration) -> Outcome {
        let poller = self
            .poller
            .with_config(self.poller.config().with_max_wait(max_wait));
        let job = poller.await_job(Job::new(job_id.to_string(), String::new())).await;
        finished(job)
    }

    /// Submits one document and waits for it, counting from submission.
    pub async fn convert(&self, filename: &str, payload: Vec<u8>) -> Result<Job, DocflowError> {
        let job = self.submit_one(filename, payload).await?;
        Ok(self.poller.await_job(job).await)
    }

    pub async fn submit_batch(&self, items: Vec<WorkItem>) -> Result<BatchTicket, DocflowError> {
        self.batches.submit(items).await
    }

    pub async fn poll_batch(&self, batch_id: &str) -> Result<BatchPoll, DocflowError> {
        self.batches.poll(batch_id).await
    }

    pub async fn await_batch<F>(&self, batch_id: &str, on_progress: F) -> Result<BatchReport, DocflowError>
    where
        F: FnMut(&BatchProgress),
    {
        self.batches.await_batch(batch_id, on_progress).await
    }
}

fn finished(job: Job) -> Outcome {
    job.outcome
        .unwrap_or_else(|| Outcome::Failed("job did not reach a terminal state".into()))
}
