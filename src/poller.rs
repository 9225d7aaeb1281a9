//! Drives a single job from submission to a terminal outcome.
//!
//! The wait budget is counted from the job's submission instant. A query
//! that errors or hangs only costs its own slot in the schedule. When the
//! budget runs out the job is marked `TimedOut` and one revoke request is
//! fired off in the background.
//!
//! A timeout is decided here, not by the broker, so it is written to a
//! verdict ledger shared by every poller built from the same root.
//! Readers consult the ledger before the broker and all report the same
//! outcome for the job.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{debug, info, warn};

use crate::broker::{Broker, BrokerError, BrokerStatus};
use crate::error::DocflowError;
use crate::state_machine::{Job, Outcome, StateMachine, Transition};

/// How long verdicts are kept unless configured otherwise. Matches the
/// broker's default result lifetime.
const DEFAULT_RETENTION: Duration = Duration::from_secs(900);

/// Timing for the status loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Wait between status checks.
    pub interval: Duration,
    /// Hard ceiling on total wait, counted from submission.
    pub max_wait: Duration,
    /// Cadence of progress log lines while waiting.
    pub log_every: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_wait: Duration::from_secs(3600),
            log_every: Duration::from_secs(30),
        }
    }
}

impl PollConfig {
    pub fn new(interval: Duration, max_wait: Duration, log_every: Duration) -> Result<Self, DocflowError> {
        if interval.is_zero() {
            return Err(DocflowError::InvalidConfig(
                "poll interval must be greater than zero".into(),
            ));
        }
        if max_wait < interval {
            return Err(DocflowError::InvalidConfig(format!(
                "max wait ({max_wait:?}) must be at least the poll interval ({interval:?})"
            )));
        }
        Ok(Self {
            interval,
            max_wait,
            log_every,
        })
    }

    /// Same timing with a different ceiling. Clamped up to one interval.
    pub fn with_max_wait(self, max_wait: Duration) -> Self {
        Self {
            max_wait: max_wait.max(self.interval),
            ..self
        }
    }
}

// Outcomes decided on this side of the broker, keyed by job id.
#[derive(Debug)]
struct Verdicts {
    retention: Duration,
    decided: Mutex<HashMap<String, (Outcome, Instant)>>,
}

impl Verdicts {
    fn new(retention: Duration) -> Self {
        Self {
            retention,
            decided: Mutex::new(HashMap::new()),
        }
    }

    async fn get(&self, job_id: &str) -> Option<Outcome> {
        let decided = self.decided.lock().await;
        decided
            .get(job_id)
            .filter(|(_, at)| at.elapsed() < self.retention)
            .map(|(outcome, _)| outcome.clone())
    }

    // Keeps the first verdict for a job. Returns the earlier one if there was one.
    async fn record(&self, job_id: &str, outcome: Outcome) -> Option<Outcome> {
        let mut decided = self.decided.lock().await;
        let retention = self.retention;
        decided.retain(|_, (_, at)| at.elapsed() < retention);
        if let Some((earlier, _)) = decided.get(job_id) {
            return Some(earlier.clone());
        }
        decided.insert(job_id.to_string(), (outcome, Instant::now()));
        None
    }
}

pub struct StatusPoller<B> {
    broker: Arc<B>,
    config: PollConfig,
    verdicts: Arc<Verdicts>,
}

impl<B> Clone for StatusPoller<B> {
    fn clone(&self) -> Self {
        Self {
            broker: Arc::clone(&self.broker),
            config: self.config,
            verdicts: Arc::clone(&self.verdicts),
        }
    }
}

impl<B: Broker> StatusPoller<B> {
    pub fn new(broker: Arc<B>, config: PollConfig) -> Self {
        Self {
            broker,
            config,
            verdicts: Arc::new(Verdicts::new(DEFAULT_RETENTION)),
        }
    }

    /// Keeps verdicts for `retention` instead of the default.
    pub fn with_retention(self, retention: Duration) -> Self {
        Self {
            verdicts: Arc::new(Verdicts::new(retention)),
            ..self
        }
    }

    /// A poller with other timing that shares this one's broker and verdicts.
    pub fn with_config(&self, config: PollConfig) -> Self {
        Self {
            config,
            ..self.clone()
        }
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    pub fn broker(&self) -> &Arc<B> {
        &self.broker
    }

    /// Polls until `job` is terminal or its budget is spent.
    pub async fn await_job(&self, job: Job) -> Job {
        self.await_job_with(job, |_, _| {}).await
    }

    /// Like [`await_job`](Self::await_job), calling `on_wait` with every
    /// non-terminal status the broker reports.
    pub async fn await_job_with<F>(&self, mut job: Job, mut on_wait: F) -> Job
    where
        F: FnMut(&Job, &BrokerStatus),
    {
        if job.is_terminal() {
            return job;
        }

        let PollConfig {
            interval,
            max_wait,
            log_every,
        } = self.config;
        let deadline = job.started() + max_wait;
        let mut next_log = job.started() + log_every;

        loop {
            if self.apply_verdict(&mut job).await {
                return job;
            }

            match timeout(interval, self.broker.status(&job.id)).await {
                Ok(Ok(status)) => match StateMachine::observe(&mut job, &status) {
                    Transition::Finish(outcome) => {
                        info!(
                            job_id = %job.id,
                            state = %job.state,
                            elapsed_secs = job.started().elapsed().as_secs_f64(),
                            "job finished"
                        );
                        if let Some(reason) = outcome.reason() {
                            warn!(job_id = %job.id, reason, "job did not succeed");
                        }
                        return job;
                    }
                    Transition::Advance(state) => {
                        debug!(job_id = %job.id, %state, "job changed state");
                        on_wait(&job, &status);
                    }
                    Transition::Stay => on_wait(&job, &status),
                },
                Ok(Err(err)) => {
                    warn!(job_id = %job.id, error = %err, "status query failed, retrying");
                }
                Err(_) => {
                    warn!(
                        job_id = %job.id,
                        timeout_ms = interval.as_millis() as u64,
                        "status query took longer than one interval, retrying"
                    );
                }
            }

            let now = Instant::now();
            if now >= deadline {
                self.abandon(&mut job).await;
                return job;
            }
            if now >= next_log {
                info!(
                    job_id = %job.id,
                    state = %job.state,
                    elapsed_secs = (now - job.started()).as_secs(),
                    "still waiting for job"
                );
                while next_log <= now {
                    next_log += log_every.max(interval);
                }
            }
            sleep_until((now + interval).min(deadline)).await;
        }
    }

    /// One status read under the same budget and verdicts as
    /// [`await_job`](Self::await_job).
    ///
    /// A job past its budget is timed out (and revoked once) whether or not
    /// the read succeeds. Within budget a failed read is returned so the
    /// caller can ask again later.
    pub async fn poll_once(&self, job: &mut Job) -> Result<(), BrokerError> {
        if self.apply_verdict(job).await {
            return Ok(());
        }
        let read = self.broker.status(&job.id).await;
        if let Ok(status) = &read
            && matches!(StateMachine::observe(job, status), Transition::Finish(_))
        {
            return Ok(());
        }
        if job.started().elapsed() >= self.config.max_wait {
            self.abandon(job).await;
            return Ok(());
        }
        read.map(|_| ())
    }

    // True once the job is terminal, taking a recorded verdict if there is one.
    async fn apply_verdict(&self, job: &mut Job) -> bool {
        if job.is_terminal() {
            return true;
        }
        match self.verdicts.get(&job.id).await {
            Some(outcome) => {
                StateMachine::settle(job, outcome);
                true
            }
            None => false,
        }
    }

    // Marks the job timed out and revokes it without waiting for the ack.
    // Only the reader that records the verdict sends the revoke.
    async fn abandon(&self, job: &mut Job) {
        if job.is_terminal() {
            return;
        }
        let verdict = Outcome::TimedOut(format!(
            "no result after {}s, job abandoned",
            self.config.max_wait.as_secs()
        ));
        if let Some(earlier) = self.verdicts.record(&job.id, verdict.clone()).await {
            StateMachine::settle(job, earlier);
            return;
        }
        StateMachine::settle(job, verdict);
        warn!(job_id = %job.id, "job exceeded max wait, revoking");

        let broker = Arc::clone(&self.broker);
        let job_id = job.id.clone();
        tokio::spawn(async move {
            if let Err(err) = broker.cancel(&job_id).await {
                warn!(%job_id, error = %err, "failed to revoke timed out job");
            }
        });
    }
}
