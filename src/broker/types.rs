//! Wire types for the broker's REST gateway and the decoded task status.
//!
//! The gateway follows Flower's task API: `async-apply` returns a
//! `task-id`, and `result` reports one of Celery's task states.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::BrokerError;
use crate::state_machine::WorkItem;

/// `{current, total}` progress reported by a running task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub current: u64,
    pub total: u64,
}

impl TaskProgress {
    /// Completion percentage rounded to two decimals, `None` when `total` is zero.
    pub fn percent(&self) -> Option<f64> {
        if self.total == 0 {
            return None;
        }
        let raw = self.current as f64 / self.total as f64 * 100.0;
        Some((raw * 100.0).round() / 100.0)
    }
}

/// What the broker's result store says about a task right now.
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerStatus {
    /// Queued, or unknown to the result store.
    Pending,
    /// A worker has claimed the task.
    Started { progress: Option<TaskProgress> },
    /// The worker finished and returned a payload.
    Success(Value),
    /// The worker raised; the string is its error detail.
    Failure(String),
    /// The task was revoked before it finished.
    Revoked,
}

impl BrokerStatus {
    pub fn progress(&self) -> Option<TaskProgress> {
        match self {
            BrokerStatus::Started { progress } => *progress,
            _ => None,
        }
    }
}

/// Body of `POST /api/task/async-apply/{task}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyRequest {
    pub args: Vec<Value>,
}

/// Reply to `async-apply`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyResponse {
    #[serde(rename = "task-id")]
    pub task_id: String,
    #[serde(default)]
    pub state: Option<String>,
}

/// Reply to `GET /api/task/result/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResultResponse {
    #[serde(rename = "task-id")]
    pub task_id: String,
    pub state: String,
    #[serde(default)]
    pub result: Value,
}

impl TaskResultResponse {
    /// Decodes the Celery state name and result into a [`BrokerStatus`].
    pub fn into_status(self) -> Result<BrokerStatus, BrokerError> {
        let status = match self.state.as_str() {
            "PENDING" => BrokerStatus::Pending,
            "RECEIVED" | "STARTED" | "RETRY" => BrokerStatus::Started { progress: None },
            "PROGRESS" => BrokerStatus::Started {
                progress: serde_json::from_value(self.result).ok(),
            },
            "SUCCESS" => BrokerStatus::Success(self.result),
            "FAILURE" => BrokerStatus::Failure(failure_detail(&self.result)),
            "REVOKED" => BrokerStatus::Revoked,
            other => {
                return Err(BrokerError::Malformed(format!(
                    "unknown task state {other:?} for {}",
                    self.task_id
                )));
            }
        };
        Ok(status)
    }
}

// Celery serialises exceptions either as a bare string or as
// `{"exc_type": .., "exc_message": ..}`.
fn failure_detail(result: &Value) -> String {
    match result {
        Value::String(s) => s.clone(),
        Value::Null => "worker reported failure without detail".to_string(),
        Value::Object(map) => {
            let kind = map.get("exc_type").and_then(Value::as_str);
            let message = map
                .get("exc_message")
                .map(|m| match m {
                    Value::String(s) => s.clone(),
                    Value::Array(parts) => parts
                        .iter()
                        .map(|p| p.as_str().map(str::to_owned).unwrap_or_else(|| p.to_string()))
                        .collect::<Vec<_>>()
                        .join(", "),
                    other => other.to_string(),
                })
                .or_else(|| map.get("message").and_then(Value::as_str).map(str::to_owned));
            match (kind, message) {
                (Some(kind), Some(message)) => format!("{kind}: {message}"),
                (None, Some(message)) => message,
                _ => result.to_string(),
            }
        }
        other => other.to_string(),
    }
}

/// Arguments for the single-document conversion task: `[filename, base64]`.
pub fn conversion_args(item: &WorkItem) -> Vec<Value> {
    vec![
        Value::String(item.filename.clone()),
        Value::String(STANDARD.encode(&item.payload)),
    ]
}

/// Arguments for the aggregate batch task: one list of `[filename, base64]` pairs.
pub fn batch_args(items: &[WorkItem]) -> Vec<Value> {
    let pairs = items
        .iter()
        .map(|item| Value::Array(conversion_args(item)))
        .collect();
    vec![Value::Array(pairs)]
}
