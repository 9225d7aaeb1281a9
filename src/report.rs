//! Folds terminal outcomes into summary counts.
//!
//! Pure and synchronous. Both the single-job and the batch paths go through
//! [`aggregate`], so the counting rules live in one place.

use serde::{Deserialize, Serialize};

use crate::state_machine::{Job, Outcome};

/// Terminal outcome of one input item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub filename: String,
    /// Broker job id; absent when the item never made it onto the queue.
    pub job_id: Option<String>,
    pub outcome: Outcome,
}

impl ItemOutcome {
    pub fn new(filename: impl Into<String>, job_id: Option<String>, outcome: Outcome) -> Self {
        Self {
            filename: filename.into(),
            job_id,
            outcome,
        }
    }

    /// Takes the outcome of a terminal job. `None` if the job is still running.
    pub fn from_job(job: Job) -> Option<Self> {
        let outcome = job.outcome?;
        Some(Self {
            filename: job.filename,
            job_id: Some(job.id),
            outcome,
        })
    }
}

/// `{total, successful, failed}` plus the items in input order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub items: Vec<ItemOutcome>,
}

impl Summary {
    /// Summary of a single finished job.
    pub fn single(item: ItemOutcome) -> Self {
        aggregate(vec![item])
    }
}

/// Final report for a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: String,
    #[serde(flatten)]
    pub summary: Summary,
}

impl BatchReport {
    pub fn new(batch_id: impl Into<String>, items: Vec<ItemOutcome>) -> Self {
        Self {
            batch_id: batch_id.into(),
            summary: aggregate(items),
        }
    }

    pub fn total(&self) -> usize {
        self.summary.total
    }

    pub fn successful(&self) -> usize {
        self.summary.successful
    }

    pub fn failed(&self) -> usize {
        self.summary.failed
    }

    pub fn items(&self) -> &[ItemOutcome] {
        &self.summary.items
    }
}

/// Counts outcomes. `failed` is everything that did not succeed.
pub fn aggregate(items: Vec<ItemOutcome>) -> Summary {
    let total = items.len();
    let successful = items.iter().filter(|i| i.outcome.is_success()).count();
    Summary {
        total,
        successful,
        failed: total - successful,
        items,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerStatus;
    use crate::state_machine::StateMachine;
    use serde_json::json;

    fn ok(name: &str) -> ItemOutcome {
        ItemOutcome::new(name, Some(format!("job-{name}")), Outcome::Succeeded(json!({})))
    }

    fn failed(name: &str, reason: &str) -> ItemOutcome {
        ItemOutcome::new(name, Some(format!("job-{name}")), Outcome::Failed(reason.into()))
    }

    #[test]
    fn empty_input_is_all_zero() {
        let summary = aggregate(Vec::new());
        assert_eq!(summary.total, 0);
        assert_eq!(summary.successful, 0);
        assert_eq!(summary.failed, 0);
        assert!(summary.items.is_empty());
    }

    #[test]
    fn counts_add_up_and_order_is_kept() {
        let summary = aggregate(vec![
            ok("a.pdf"),
            failed("b.pdf", "bad xref"),
            ok("c.pdf"),
            ItemOutcome::new("d.pdf", None, Outcome::TimedOut("slow".into())),
            ItemOutcome::new("e.pdf", None, Outcome::Cancelled("revoked".into())),
        ]);

        assert_eq!(summary.total, 5);
        assert_eq!(summary.successful, 2);
        assert_eq!(summary.failed, 3);
        assert_eq!(summary.successful + summary.failed, summary.total);
        let names: Vec<_> = summary.items.iter().map(|i| i.filename.as_str()).collect();
        assert_eq!(names, ["a.pdf", "b.pdf", "c.pdf", "d.pdf", "e.pdf"]);
    }

    #[test]
    fn aggregate_is_deterministic() {
        let items = vec![ok("a.pdf"), failed("b.pdf", "x")];
        assert_eq!(aggregate(items.clone()), aggregate(items));
    }

    #[test]
    fn item_from_job_requires_terminal_state() {
        let job = Job::new("job-1".into(), "a.pdf".into());
        assert!(ItemOutcome::from_job(job).is_none());

        let mut job = Job::new("job-2".into(), "b.pdf".into());
        StateMachine::observe(&mut job, &BrokerStatus::Success(json!({"markdown": ""})));
        let item = ItemOutcome::from_job(job).unwrap();
        assert_eq!(item.job_id.as_deref(), Some("job-2"));
        assert!(item.outcome.is_success());
    }

    #[test]
    fn single_summary() {
        let summary = Summary::single(failed("a.pdf", "worker crashed"));
        assert_eq!((summary.total, summary.successful, summary.failed), (1, 0, 1));
    }

    #[test]
    fn batch_report_serializes_flat() {
        let report = BatchReport::new("batch-1", vec![ok("a.pdf")]);
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["batch_id"], "batch-1");
        assert_eq!(value["total"], 1);
        assert_eq!(value["successful"], 1);
        assert_eq!(value["failed"], 0);
        assert_eq!(value["items"][0]["filename"], "a.pdf");
    }
}
