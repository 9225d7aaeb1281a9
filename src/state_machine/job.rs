use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use super::state::JobState;
use crate::broker::TaskProgress;
use crate::error::DocflowError;

/// One document to convert: its name and raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub filename: String,
    pub payload: Vec<u8>,
    // Set when the input could not be read; the item fails validation.
    unreadable: Option<String>,
}

impl WorkItem {
    pub fn new(filename: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            payload,
            unreadable: None,
        }
    }

    /// An item whose input could not be read. It travels with its batch
    /// and is reported as failed with `reason`.
    pub fn unreadable(filename: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            payload: Vec::new(),
            unreadable: Some(reason.into()),
        }
    }

    /// Reads a document from disk. A read error yields an unreadable item
    /// rather than an error, so one bad path does not sink a batch.
    pub async fn from_path(path: &Path) -> Self {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        match tokio::fs::read(path).await {
            Ok(payload) => Self::new(filename, payload),
            Err(err) => Self::unreadable(filename, format!("cannot read {}: {err}", path.display())),
        }
    }

    /// Rejects items no worker could do anything with.
    pub fn validate(&self) -> Result<(), DocflowError> {
        if let Some(reason) = &self.unreadable {
            return Err(DocflowError::Input(reason.clone()));
        }
        if self.filename.trim().is_empty() {
            return Err(DocflowError::Input("filename must not be empty".into()));
        }
        if self.payload.is_empty() {
            return Err(DocflowError::Input(format!("{} is empty", self.filename)));
        }
        Ok(())
    }
}

/// Terminal result of a job. Every non-success tag carries a readable reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail")]
pub enum Outcome {
    Succeeded(Value),
    Failed(String),
    TimedOut(String),
    Cancelled(String),
}

impl Outcome {
    pub fn state(&self) -> JobState {
        match self {
            Outcome::Succeeded(_) => JobState::Succeeded,
            Outcome::Failed(_) => JobState::Failed,
            Outcome::TimedOut(_) => JobState::TimedOut,
            Outcome::Cancelled(_) => JobState::Cancelled,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded(_))
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Outcome::Succeeded(_) => None,
            Outcome::Failed(r) | Outcome::TimedOut(r) | Outcome::Cancelled(r) => Some(r),
        }
    }

    /// Status code the transport layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Outcome::Succeeded(_) => 200,
            Outcome::Failed(_) => 500,
            Outcome::TimedOut(_) => 408,
            Outcome::Cancelled(_) => 410,
        }
    }
}

/// Single-job poll reply: still running, or finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum PollReply {
    Processing {
        job_id: String,
        state: JobState,
        progress: Option<TaskProgress>,
    },
    Finished {
        job_id: String,
        outcome: Outcome,
    },
}

impl PollReply {
    /// 202 while running, otherwise the outcome's code.
    pub fn status_code(&self) -> u16 {
        match self {
            PollReply::Processing { .. } => 202,
            PollReply::Finished { outcome, .. } => outcome.status_code(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PollReply::Finished { .. })
    }
}

/// A job the broker has accepted.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub filename: String,
    pub state: JobState,
    pub outcome: Option<Outcome>,
    pub progress: Option<TaskProgress>,
    pub submitted_at: DateTime<Utc>,
    started: Instant,
}

impl Job {
    /// A job whose submission just succeeded.
    pub fn new(id: String, filename: String) -> Self {
        Self::resume(id, filename, Instant::now())
    }

    /// A job submitted earlier, at monotonic instant `started`.
    pub fn resume(id: String, filename: String, started: Instant) -> Self {
        let waited = chrono::Duration::from_std(started.elapsed()).unwrap_or(chrono::Duration::zero());
        let submitted_at = Utc::now() - waited;
        Self {
            id,
            filename,
            state: JobState::Pending,
            outcome: None,
            progress: None,
            submitted_at,
            started,
        }
    }

    /// When the wait budget started counting.
    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Payload, present only once the job has succeeded.
    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            Some(Outcome::Succeeded(payload)) => Some(payload),
            _ => None,
        }
    }

    /// Error detail, present only for failed, timed out or cancelled jobs.
    pub fn error(&self) -> Option<&str> {
        self.outcome.as_ref().and_then(Outcome::reason)
    }

    pub fn reply(&self) -> PollReply {
        match &self.outcome {
            Some(outcome) => PollReply::Finished {
                job_id: self.id.clone(),
                outcome: outcome.clone(),
            },
            None => PollReply::Processing {
                job_id: self.id.clone(),
                state: self.state,
                progress: self.progress,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn job_creation_defaults() {
        let job = Job::new("job-1".into(), "a.pdf".into());
        assert_eq!(job.state, JobState::Pending);
        assert!(job.outcome.is_none());
        assert!(job.result().is_none());
        assert!(job.error().is_none());
        assert!(!job.is_terminal());
    }

    #[test]
    fn empty_items_are_input_errors() {
        let err = WorkItem::new("", b"x".to_vec()).validate().unwrap_err();
        assert!(matches!(err, DocflowError::Input(_)));

        let err = WorkItem::new("a.pdf", Vec::new()).validate().unwrap_err();
        assert_eq!(err.to_string(), "invalid input: a.pdf is empty");

        assert!(WorkItem::new("a.pdf", b"%PDF".to_vec()).validate().is_ok());
    }

    #[tokio::test]
    async fn from_path_reads_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.pdf");
        std::fs::write(&path, b"%PDF-1.7").unwrap();

        let item = WorkItem::from_path(&path).await;
        assert_eq!(item, WorkItem::new("report.pdf", b"%PDF-1.7".to_vec()));
        assert!(item.validate().is_ok());
    }

    #[tokio::test]
    async fn missing_file_becomes_unreadable_item() {
        let dir = tempfile::tempdir().unwrap();
        let item = WorkItem::from_path(&dir.path().join("missing.pdf")).await;

        assert_eq!(item.filename, "missing.pdf");
        let err = item.validate().unwrap_err();
        assert!(matches!(err, DocflowError::Input(_)));
        assert!(err.to_string().contains("cannot read"), "{err}");
    }

    #[test]
    fn status_codes_follow_outcome() {
        assert_eq!(Outcome::Succeeded(json!({})).status_code(), 200);
        assert_eq!(Outcome::Failed("x".into()).status_code(), 500);
        assert_eq!(Outcome::TimedOut("x".into()).status_code(), 408);
        assert_eq!(Outcome::Cancelled("x".into()).status_code(), 410);
    }

    #[test]
    fn running_job_replies_202() {
        let job = Job::new("job-1".into(), "a.pdf".into());
        let reply = job.reply();
        assert_eq!(reply.status_code(), 202);
        assert!(!reply.is_terminal());
    }

    #[test]
    fn outcome_serializes_tagged() {
        let json = serde_json::to_value(Outcome::Failed("bad font".into())).unwrap();
        assert_eq!(json, json!({"status": "Failed", "detail": "bad font"}));
    }
}
