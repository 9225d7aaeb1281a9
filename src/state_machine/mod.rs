mod batch;
mod job;
mod state;

pub use batch::{BatchCounts, BatchJob, BatchMode, Member};
pub use job::{Job, Outcome, PollReply, WorkItem};
pub use state::{JobState, StateMachine, Transition};
