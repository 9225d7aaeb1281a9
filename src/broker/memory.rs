//! Scripted in-process broker for tests.
//!
//! Each enqueued job follows a [`Script`] registered under its filename (the
//! first argument) or its task name. Every call is recorded so tests can
//! assert how the orchestrator used the broker.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use serde_json::{Value, json};
use tokio::time::{Duration, Instant};

use super::Broker;
use super::error::BrokerError;
use super::types::BrokerStatus;

/// How a scripted job answers status queries.
#[derive(Debug, Clone)]
pub enum Script {
    /// Replies in order; the last reply repeats forever.
    Replies(Vec<Result<BrokerStatus, BrokerError>>),
    /// `Started` until `after` has elapsed since enqueue, then `status`.
    FinishAfter { after: Duration, status: BrokerStatus },
}

impl Script {
    pub fn succeed(payload: Value) -> Self {
        Script::Replies(vec![Ok(BrokerStatus::Success(payload))])
    }

    pub fn fail(reason: &str) -> Self {
        Script::Replies(vec![Ok(BrokerStatus::Failure(reason.to_string()))])
    }

    pub fn never_finish() -> Self {
        Script::Replies(vec![Ok(BrokerStatus::Started { progress: None })])
    }
}

#[derive(Debug)]
struct Task {
    script: Script,
    cursor: usize,
    enqueued: Instant,
    revoked: bool,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    tasks: HashMap<String, Task>,
    scripts: HashMap<String, Script>,
    refused: HashSet<String>,
    offline: bool,
    enqueued: Vec<(String, Vec<Value>)>,
    status_calls: usize,
    cancels: Vec<String>,
    pings: usize,
}

/// Snapshot of every call made against a [`MemoryBroker`].
#[derive(Debug, Clone, Default)]
pub struct Calls {
    pub enqueued: Vec<(String, Vec<Value>)>,
    pub status: usize,
    pub cancels: Vec<String>,
    pub pings: usize,
}

impl Calls {
    pub fn total(&self) -> usize {
        self.enqueued.len() + self.status + self.cancels.len() + self.pings
    }
}

#[derive(Debug, Default)]
pub struct MemoryBroker {
    state: Mutex<State>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the script for the next job whose filename or task name is `key`.
    pub fn script(&self, key: &str, script: Script) {
        self.state
            .lock()
            .unwrap()
            .scripts
            .insert(key.to_string(), script);
    }

    /// Makes enqueue fail for the item with this filename.
    pub fn refuse(&self, filename: &str) {
        self.state
            .lock()
            .unwrap()
            .refused
            .insert(filename.to_string());
    }

    /// While offline, ping and enqueue fail with `Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().unwrap().offline = offline;
    }

    pub fn calls(&self) -> Calls {
        let state = self.state.lock().unwrap();
        Calls {
            enqueued: state.enqueued.clone(),
            status: state.status_calls,
            cancels: state.cancels.clone(),
            pings: state.pings,
        }
    }
}

impl Broker for MemoryBroker {
    async fn ping(&self) -> Result<(), BrokerError> {
        let mut state = self.state.lock().unwrap();
        state.pings += 1;
        if state.offline {
            return Err(BrokerError::Unavailable("memory broker offline".into()));
        }
        Ok(())
    }

    async fn enqueue(&self, task: &str, args: Vec<Value>) -> Result<String, BrokerError> {
        let mut state = self.state.lock().unwrap();
        state.enqueued.push((task.to_string(), args.clone()));
        let key = args
            .first()
            .and_then(Value::as_str)
            .unwrap_or(task)
            .to_string();

        if state.offline || state.refused.contains(&key) {
            return Err(BrokerError::Unavailable(format!("cannot accept {key}")));
        }

        state.next_id += 1;
        let id = format!("job-{}", state.next_id);
        let script = state
            .scripts
            .remove(&key)
            .or_else(|| state.scripts.remove(task))
            .unwrap_or_else(|| Script::succeed(json!({"filename": key, "status": "Success"})));
        state.tasks.insert(
            id.clone(),
            Task {
                script,
                cursor: 0,
                enqueued: Instant::now(),
                revoked: false,
            },
        );
        Ok(id)
    }

    async fn status(&self, job_id: &str) -> Result<BrokerStatus, BrokerError> {
        let mut state = self.state.lock().unwrap();
        state.status_calls += 1;
        let Some(task) = state.tasks.get_mut(job_id) else {
            return Ok(BrokerStatus::Pending);
        };
        if task.revoked {
            return Ok(BrokerStatus::Revoked);
        }
        match &task.script {
            Script::Replies(replies) => {
                if replies.is_empty() {
                    return Ok(BrokerStatus::Pending);
                }
                let reply = replies[task.cursor.min(replies.len() - 1)].clone();
                task.cursor += 1;
                reply
            }
            Script::FinishAfter { after, status } => {
                if task.enqueued.elapsed() >= *after {
                    Ok(status.clone())
                } else {
                    Ok(BrokerStatus::Started { progress: None })
                }
            }
        }
    }

    async fn cancel(&self, job_id: &str) -> Result<(), BrokerError> {
        let mut state = self.state.lock().unwrap();
        state.cancels.push(job_id.to_string());
        if let Some(task) = state.tasks.get_mut(job_id) {
            task.revoked = true;
        }
        Ok(())
    }
}
