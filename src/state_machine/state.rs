use std::fmt;

use serde::{Deserialize, Serialize};

use super::job::{Job, Outcome};
use crate::broker::BrokerStatus;

/// Lifecycle of a conversion job.
///
/// `Pending → Processing → {Succeeded | Failed | TimedOut | Cancelled}`.
/// The last four are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Processing,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::TimedOut | JobState::Cancelled
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Pending => write!(f, "PENDING"),
            JobState::Processing => write!(f, "PROCESSING"),
            JobState::Succeeded => write!(f, "SUCCEEDED"),
            JobState::Failed => write!(f, "FAILED"),
            JobState::TimedOut => write!(f, "TIMED_OUT"),
            JobState::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// The effect of applying one observation to a job.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Nothing changed: same non-terminal state, or the job was already terminal.
    Stay,
    /// Moved to another non-terminal state.
    Advance(JobState),
    /// Reached a terminal state.
    Finish(Outcome),
}

/// Applies broker observations and timeouts to a [`Job`].
pub struct StateMachine;

impl StateMachine {
    /// Maps a broker status to the terminal outcome it implies, if any.
    pub fn classify(status: &BrokerStatus) -> Option<Outcome> {
        match status {
            BrokerStatus::Pending | BrokerStatus::Started { .. } => None,
            BrokerStatus::Success(payload) => Some(Outcome::Succeeded(payload.clone())),
            BrokerStatus::Failure(reason) => Some(Outcome::Failed(reason.clone())),
            BrokerStatus::Revoked => Some(Outcome::Cancelled("revoked by broker".to_string())),
        }
    }

    /// Applies a status read from the broker.
    ///
    /// Terminal jobs never change; later observations are ignored.
    pub fn observe(job: &mut Job, status: &BrokerStatus) -> Transition {
        if job.state.is_terminal() {
            return Transition::Stay;
        }

        if let Some(outcome) = Self::classify(status) {
            Self::finish(job, outcome.clone());
            return Transition::Finish(outcome);
        }

        if let Some(progress) = status.progress() {
            job.progress = Some(progress);
        }

        let next = match status {
            BrokerStatus::Pending => JobState::Pending,
            _ => JobState::Processing,
        };
        // A job a worker has claimed does not go back to Pending.
        if next == job.state || (job.state == JobState::Processing && next == JobState::Pending) {
            return Transition::Stay;
        }
        job.state = next;
        Transition::Advance(next)
    }

    /// Applies an outcome decided locally, such as a timeout verdict.
    pub fn settle(job: &mut Job, outcome: Outcome) -> Transition {
        if job.state.is_terminal() {
            return Transition::Stay;
        }
        Self::finish(job, outcome.clone());
        Transition::Finish(outcome)
    }

    fn finish(job: &mut Job, outcome: Outcome) {
        job.state = outcome.state();
        job.outcome = Some(outcome);
    }
}
