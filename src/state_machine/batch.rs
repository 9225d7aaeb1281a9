use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::job::Outcome;

/// How a batch is laid out on the broker. Chosen per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
    /// One broker job per item.
    #[default]
    PerItem,
    /// One broker job converts the whole collection and reports progress.
    Aggregate,
}

impl fmt::Display for BatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchMode::PerItem => write!(f, "per_item"),
            BatchMode::Aggregate => write!(f, "aggregate"),
        }
    }
}

/// One input item of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Member {
    Queued { job_id: String, filename: String },
    /// Submission of this item failed; it counts as a failure.
    Rejected { filename: String, reason: String },
}

impl Member {
    pub fn filename(&self) -> &str {
        match self {
            Member::Queued { filename, .. } | Member::Rejected { filename, .. } => filename,
        }
    }

    pub fn job_id(&self) -> Option<&str> {
        match self {
            Member::Queued { job_id, .. } => Some(job_id),
            Member::Rejected { .. } => None,
        }
    }
}

/// A submitted batch. Members keep submission order.
///
/// In aggregate mode every queued member carries the id of the one broker
/// job that converts the whole collection.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub id: String,
    pub mode: BatchMode,
    pub members: Vec<Member>,
    pub created: Instant,
}

impl BatchJob {
    pub fn total(&self) -> usize {
        self.members.len()
    }

    /// The broker job behind an aggregate batch, if anything was enqueued.
    pub fn aggregate_job(&self) -> Option<&str> {
        match self.mode {
            BatchMode::Aggregate => self.members.iter().find_map(Member::job_id),
            BatchMode::PerItem => None,
        }
    }
}

/// Per-item progress counters. `completed == succeeded + failed <= total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatchCounts {
    pub total: usize,
    pub completed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchCounts {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    /// Counts one settled member. Ignored once every member is counted.
    pub fn record(&mut self, outcome: &Outcome) {
        if self.is_done() {
            return;
        }
        self.completed += 1;
        if outcome.is_success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }

    pub fn is_done(&self) -> bool {
        self.completed == self.total
    }

    pub fn percent(&self) -> Option<f64> {
        if self.total == 0 {
            return None;
        }
        let raw = self.completed as f64 / self.total as f64 * 100.0;
        Some((raw * 100.0).round() / 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn counts_keep_invariant() {
        let mut counts = BatchCounts::new(2);
        counts.record(&Outcome::Succeeded(json!({})));
        counts.record(&Outcome::TimedOut("slow".into()));
        counts.record(&Outcome::Succeeded(json!({})));

        assert_eq!(counts.completed, 2);
        assert_eq!(counts.succeeded, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.completed, counts.succeeded + counts.failed);
        assert!(counts.is_done());
    }

    #[test]
    fn empty_counts_are_done() {
        let counts = BatchCounts::new(0);
        assert!(counts.is_done());
        assert_eq!(counts.percent(), None);
    }

    #[test]
    fn member_accessors() {
        let queued = Member::Queued {
            job_id: "job-1".into(),
            filename: "a.pdf".into(),
        };
        let rejected = Member::Rejected {
            filename: "b.pdf".into(),
            reason: "broker unavailable".into(),
        };
        assert_eq!(queued.job_id(), Some("job-1"));
        assert_eq!(rejected.job_id(), None);
        assert_eq!(rejected.filename(), "b.pdf");
    }

    #[test]
    fn aggregate_job_is_first_queued_member() {
        let batch = BatchJob {
            id: "job-7".into(),
            mode: BatchMode::Aggregate,
            members: vec![
                Member::Rejected {
                    filename: "empty.pdf".into(),
                    reason: "empty.pdf is empty".into(),
                },
                Member::Queued {
                    job_id: "job-7".into(),
                    filename: "a.pdf".into(),
                },
            ],
            created: Instant::now(),
        };
        assert_eq!(batch.total(), 2);
        assert_eq!(batch.aggregate_job(), Some("job-7"));
    }

    #[test]
    fn batch_mode_serde_names() {
        let mode: BatchMode = serde_json::from_str(r#""aggregate""#).unwrap();
        assert_eq!(mode, BatchMode::Aggregate);
        assert_eq!(BatchMode::PerItem.to_string(), "per_item");
    }
}
