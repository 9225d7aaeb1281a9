//! Batch submission, progress and reporting.
//!
//! A [`BatchOrchestrator`] runs in one of two modes, fixed at construction:
//!
//! - **per item**: every item is its own broker job; progress is folded from
//!   the members' states.
//! - **aggregate**: one broker job converts the whole collection and reports
//!   a `{current, total}` tuple while it runs.
//!
//! Only batch membership is kept locally. Every poll re-reads job state from
//! the broker, so a finished batch always reports the same thing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::future::join_all;
use futures::stream::FuturesUnordered;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::broker::types::{batch_args, conversion_args};
use crate::broker::{Broker, BrokerStatus, TaskProgress};
use crate::config::BrokerConfig;
use crate::error::DocflowError;
use crate::poller::StatusPoller;
use crate::report::{BatchReport, ItemOutcome};
use crate::state_machine::{BatchCounts, BatchJob, BatchMode, Job, Member, Outcome, WorkItem};

/// Returned by a successful batch submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchTicket {
    pub batch_id: String,
    pub total: usize,
}

/// Progress of a batch that has not finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BatchProgress {
    /// Per-item counters, every member's state was read.
    Counted(BatchCounts),
    /// Progress tuple reported by an aggregate job.
    Reported {
        current: u64,
        total: u64,
        percent: Option<f64>,
    },
    /// The broker could not say more than this.
    Coarse { total: usize, completed: usize },
}

impl BatchProgress {
    fn reported(progress: TaskProgress) -> Self {
        BatchProgress::Reported {
            current: progress.current,
            total: progress.total,
            percent: progress.percent(),
        }
    }

    /// Completion percentage, when it can be known.
    pub fn percent(&self) -> Option<f64> {
        match self {
            BatchProgress::Counted(counts) => counts.percent(),
            BatchProgress::Reported { percent, .. } => *percent,
            BatchProgress::Coarse { .. } => None,
        }
    }

    /// `(done, total)` for display.
    pub fn position(&self) -> (u64, u64) {
        match self {
            BatchProgress::Counted(counts) => (counts.completed as u64, counts.total as u64),
            BatchProgress::Reported { current, total, .. } => (*current, *total),
            BatchProgress::Coarse { total, completed } => (*completed as u64, *total as u64),
        }
    }
}

/// Reply to a batch poll. Running is an expected answer, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchPoll {
    Running {
        batch_id: String,
        progress: BatchProgress,
    },
    Complete(BatchReport),
}

impl BatchPoll {
    pub fn status_code(&self) -> u16 {
        match self {
            BatchPoll::Running { .. } => 202,
            BatchPoll::Complete(_) => 200,
        }
    }
}

// What one status read told us about a member.
enum Read {
    Settled(Outcome),
    Running,
    Unknown,
}

pub struct BatchOrchestrator<B> {
    broker: Arc<B>,
    // Shares its timeout verdicts with every other reader of the same jobs.
    poller: StatusPoller<B>,
    mode: BatchMode,
    // Task enqueued once per item in per-item mode.
    convert_task: String,
    // Task enqueued once per batch in aggregate mode.
    batch_task: String,
    // Batches older than this are forgotten, like the broker's results.
    retention: Duration,
    // Membership only; job state always comes from the broker or the verdicts.
    batches: RwLock<HashMap<String, BatchJob>>,
}

impl<B: Broker> BatchOrchestrator<B> {
    pub fn new(poller: StatusPoller<B>, config: &BrokerConfig, mode: BatchMode) -> Self {
        Self {
            broker: Arc::clone(poller.broker()),
            poller,
            mode,
            convert_task: config.convert_task.clone(),
            batch_task: config.batch_task.clone(),
            retention: config.result_expires(),
            batches: RwLock::new(HashMap::new()),
        }
    }

    pub fn mode(&self) -> BatchMode {
        self.mode
    }

    /// Submits `items` in input order.
    ///
    /// An empty batch completes immediately without touching the broker.
    /// If the broker does not answer a ping, nothing is enqueued and the
    /// whole batch fails. After that, items that cannot be submitted are
    /// kept as failed members.
    pub async fn submit(&self, items: Vec<WorkItem>) -> Result<BatchTicket, DocflowError> {
        let created = Instant::now();
        if items.is_empty() {
            let batch = BatchJob {
                id: Uuid::new_v4().to_string(),
                mode: self.mode,
                members: Vec::new(),
                created,
            };
            return Ok(self.register(batch).await);
        }

        if let Err(err) = self.broker.ping().await {
            warn!(error = %err, total = items.len(), "broker unreachable, batch aborted");
            return Err(err.into());
        }

        let batch = match self.mode {
            BatchMode::PerItem => self.submit_per_item(&items, created).await,
            BatchMode::Aggregate => self.submit_aggregate(&items, created).await,
        };
        let rejected = batch
            .members
            .iter()
            .filter(|m| matches!(m, Member::Rejected { .. }))
            .count();
        info!(batch_id = %batch.id, mode = %batch.mode, total = batch.total(), rejected, "batch submitted");
        Ok(self.register(batch).await)
    }

    // Enqueues items one by one, in order. A refused item becomes a rejected member.
    async fn submit_per_item(&self, items: &[WorkItem], created: Instant) -> BatchJob {
        let mut members = Vec::with_capacity(items.len());
        for item in items {
            let member = match self.enqueue_one(item).await {
                Ok(job_id) => Member::Queued {
                    job_id,
                    filename: item.filename.clone(),
                },
                Err(err) => {
                    warn!(filename = %item.filename, error = %err, "item not submitted");
                    Member::Rejected {
                        filename: item.filename.clone(),
                        reason: err.to_string(),
                    }
                }
            };
            members.push(member);
        }
        BatchJob {
            id: Uuid::new_v4().to_string(),
            mode: BatchMode::PerItem,
            members,
            created,
        }
    }

    // Validation happens here so a bad item costs no broker call.
    async fn enqueue_one(&self, item: &WorkItem) -> Result<String, DocflowError> {
        item.validate()?;
        let job_id = self
            .broker
            .enqueue(&self.convert_task, conversion_args(item))
            .await?;
        Ok(job_id)
    }

    // Valid items go out as one job; invalid ones are rejected in place.
    async fn submit_aggregate(&self, items: &[WorkItem], created: Instant) -> BatchJob {
        let (valid, invalid): (Vec<_>, Vec<_>) = items
            .iter()
            .enumerate()
            .map(|(idx, item)| (idx, item, item.validate()))
            .partition(|(_, _, check)| check.is_ok());

        let accepted: Vec<WorkItem> = valid.iter().map(|(_, item, _)| (*item).clone()).collect();
        let enqueued = if accepted.is_empty() {
            Err(DocflowError::Input("no valid items in batch".into()))
        } else {
            self.broker
                .enqueue(&self.batch_task, batch_args(&accepted))
                .await
                .map_err(DocflowError::from)
        };

        let mut members: Vec<Option<Member>> = vec![None; items.len()];
        for (idx, item, check) in invalid {
            let reason = check.err().map(|e| e.to_string()).unwrap_or_default();
            members[idx] = Some(Member::Rejected {
                filename: item.filename.clone(),
                reason,
            });
        }
        for (idx, item, _) in valid {
            members[idx] = Some(match &enqueued {
                Ok(job_id) => Member::Queued {
                    job_id: job_id.clone(),
                    filename: item.filename.clone(),
                },
                Err(err) => Member::Rejected {
                    filename: item.filename.clone(),
                    reason: err.to_string(),
                },
            });
        }

        if let Err(err) = &enqueued {
            warn!(error = %err, "aggregate batch not submitted");
        }
        BatchJob {
            // The broker's job id doubles as the batch id so it can be polled directly.
            id: enqueued.unwrap_or_else(|_| Uuid::new_v4().to_string()),
            mode: BatchMode::Aggregate,
            members: members.into_iter().flatten().collect(),
            created,
        }
    }

    // Stores the batch, dropping any that outlived the retention window.
    async fn register(&self, batch: BatchJob) -> BatchTicket {
        let ticket = BatchTicket {
            batch_id: batch.id.clone(),
            total: batch.total(),
        };
        let mut batches = self.batches.write().await;
        let retention = self.retention;
        batches.retain(|_, b| b.created.elapsed() < retention);
        batches.insert(batch.id.clone(), batch);
        ticket
    }

    // A copy of the batch, so no guard is held across broker calls.
    async fn lookup(&self, batch_id: &str) -> Result<BatchJob, DocflowError> {
        let batches = self.batches.read().await;
        batches
            .get(batch_id)
            .filter(|b| b.created.elapsed() < self.retention)
            .cloned()
            .ok_or_else(|| DocflowError::BatchNotFound(batch_id.to_string()))
    }

    /// One snapshot of the batch: progress while running, the report once done.
    pub async fn poll(&self, batch_id: &str) -> Result<BatchPoll, DocflowError> {
        let batch = self.lookup(batch_id).await?;
        let poll = match batch.mode {
            BatchMode::PerItem => self.poll_per_item(&batch).await,
            BatchMode::Aggregate => self.poll_aggregate(&batch).await,
        };
        Ok(poll)
    }

    async fn poll_per_item(&self, batch: &BatchJob) -> BatchPoll {
        let reads = join_all(
            batch
                .members
                .iter()
                .map(|member| self.read_member(member, batch.created)),
        )
        .await;

        let mut counts = BatchCounts::new(batch.total());
        let mut unknown = false;
        let mut items = Vec::with_capacity(batch.total());
        for (member, read) in batch.members.iter().zip(reads) {
            match read {
                Read::Settled(outcome) => {
                    counts.record(&outcome);
                    items.push(ItemOutcome::new(
                        member.filename(),
                        member.job_id().map(str::to_owned),
                        outcome,
                    ));
                }
                Read::Running => {}
                Read::Unknown => unknown = true,
            }
        }

        if counts.is_done() {
            return BatchPoll::Complete(BatchReport::new(batch.id.clone(), items));
        }
        let progress = if unknown {
            BatchProgress::Coarse {
                total: counts.total,
                completed: counts.completed,
            }
        } else {
            BatchProgress::Counted(counts)
        };
        BatchPoll::Running {
            batch_id: batch.id.clone(),
            progress,
        }
    }

    // Reads one member under the batch's wait budget, counted from `created`.
    async fn read_member(&self, member: &Member, created: Instant) -> Read {
        match member {
            Member::Rejected { reason, .. } => Read::Settled(Outcome::Failed(reason.clone())),
            Member::Queued { job_id, filename } => {
                let mut job = Job::resume(job_id.clone(), filename.clone(), created);
                match self.poller.poll_once(&mut job).await {
                    Ok(()) => job.outcome.map_or(Read::Running, Read::Settled),
                    Err(err) => {
                        warn!(%job_id, error = %err, "could not read member status");
                        Read::Unknown
                    }
                }
            }
        }
    }

    async fn poll_aggregate(&self, batch: &BatchJob) -> BatchPoll {
        let Some(job_id) = batch.aggregate_job() else {
            return BatchPoll::Complete(self.aggregate_report(batch, None));
        };

        let coarse = BatchProgress::Coarse {
            total: batch.total(),
            completed: 0,
        };
        let mut job = Job::resume(job_id.to_string(), batch.id.clone(), batch.created);
        let progress = match self.poller.poll_once(&mut job).await {
            Ok(()) => match &job.outcome {
                Some(outcome) => {
                    return BatchPoll::Complete(self.aggregate_report(batch, Some(outcome)));
                }
                None => job.progress.map_or(coarse, BatchProgress::reported),
            },
            Err(err) => {
                warn!(%job_id, error = %err, "could not read aggregate job status");
                coarse
            }
        };
        BatchPoll::Running {
            batch_id: batch.id.clone(),
            progress,
        }
    }

    /// Tracks the batch until every member is terminal.
    ///
    /// Per-item members are polled concurrently, each under its own wait
    /// budget counted from submission. `on_progress` is called whenever a
    /// member settles, or with each progress tuple in aggregate mode.
    pub async fn await_batch<F>(&self, batch_id: &str, mut on_progress: F) -> Result<BatchReport, DocflowError>
    where
        F: FnMut(&BatchProgress),
    {
        let batch = self.lookup(batch_id).await?;
        let report = match batch.mode {
            BatchMode::PerItem => self.await_per_item(&batch, &mut on_progress).await,
            BatchMode::Aggregate => {
                let outcome = match batch.aggregate_job() {
                    Some(job_id) => {
                        let job = Job::resume(job_id.to_string(), batch.id.clone(), batch.created);
                        let job = self
                            .poller
                            .await_job_with(job, |_, status: &BrokerStatus| {
                                if let Some(progress) = status.progress() {
                                    on_progress(&BatchProgress::reported(progress));
                                }
                            })
                            .await;
                        Some(settled(job.outcome))
                    }
                    None => None,
                };
                self.aggregate_report(&batch, outcome.as_ref())
            }
        };
        info!(
            batch_id = %report.batch_id,
            total = report.total(),
            successful = report.successful(),
            failed = report.failed(),
            "batch finished"
        );
        Ok(report)
    }

    async fn await_per_item<F>(&self, batch: &BatchJob, on_progress: &mut F) -> BatchReport
    where
        F: FnMut(&BatchProgress),
    {
        let mut counts = BatchCounts::new(batch.total());
        let mut slots: Vec<Option<ItemOutcome>> = vec![None; batch.total()];
        let mut running = FuturesUnordered::new();

        for (idx, member) in batch.members.iter().enumerate() {
            match member {
                Member::Rejected { filename, reason } => {
                    let outcome = Outcome::Failed(reason.clone());
                    counts.record(&outcome);
                    slots[idx] = Some(ItemOutcome::new(filename.clone(), None, outcome));
                }
                Member::Queued { job_id, filename } => {
                    let job = Job::resume(job_id.clone(), filename.clone(), batch.created);
                    running.push(async move { (idx, self.poller.await_job(job).await) });
                }
            }
        }
        on_progress(&BatchProgress::Counted(counts));

        while let Some((idx, job)) = running.next().await {
            let outcome = settled(job.outcome);
            counts.record(&outcome);
            slots[idx] = Some(ItemOutcome::new(job.filename, Some(job.id), outcome));
            on_progress(&BatchProgress::Counted(counts));
        }

        BatchReport::new(batch.id.clone(), slots.into_iter().flatten().collect())
    }

    // Splits the aggregate job's outcome back into per-item outcomes,
    // in submission order. `None` means nothing was ever enqueued.
    fn aggregate_report(&self, batch: &BatchJob, outcome: Option<&Outcome>) -> BatchReport {
        let records = match outcome {
            Some(Outcome::Succeeded(Value::Array(records))) => Some(records.as_slice()),
            _ => None,
        };
        let mut position = 0;
        let items = batch
            .members
            .iter()
            .map(|member| match member {
                Member::Rejected { filename, reason } => {
                    ItemOutcome::new(filename.clone(), None, Outcome::Failed(reason.clone()))
                }
                Member::Queued { job_id, filename } => {
                    let item_outcome = match (outcome, records) {
                        (_, Some(records)) => record_outcome(records.get(position)),
                        (Some(Outcome::Succeeded(other)), None) => {
                            Outcome::Failed(format!("unexpected batch result: {other}"))
                        }
                        (Some(other), None) => other.clone(),
                        (None, None) => Outcome::Failed("batch was never enqueued".into()),
                    };
                    position += 1;
                    ItemOutcome::new(filename.clone(), Some(job_id.clone()), item_outcome)
                }
            })
            .collect();
        BatchReport::new(batch.id.clone(), items)
    }
}

fn settled(outcome: Option<Outcome>) -> Outcome {
    outcome.unwrap_or_else(|| Outcome::Failed("job did not reach a terminal state".into()))
}

// One entry of the aggregate task's result list:
// `{"filename": .., "status": "Success" | "Error", ..}`.
fn record_outcome(record: Option<&Value>) -> Outcome {
    let Some(record) = record else {
        return Outcome::Failed("no result reported for this item".into());
    };
    if record.get("status").and_then(Value::as_str) == Some("Success") {
        return Outcome::Succeeded(record.clone());
    }
    let reason = ["message", "error", "detail"]
        .iter()
        .find_map(|key| record.get(*key).and_then(Value::as_str))
        .unwrap_or("conversion failed");
    Outcome::Failed(reason.to_string())
}
