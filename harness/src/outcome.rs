use harness_backend::BackendError;
use thiserror::Error;

/// Why a worker stopped early.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerFailure {
    #[error("session not set for <{topic}>")]
    MissingSession { topic: String },
    #[error("no {op} operation resolved for <{topic}>")]
    MissingOperation { topic: String, op: &'static str },
    #[error("failed to commit message on <{topic}>: {source}")]
    Commit {
        topic: String,
        #[source]
        source: BackendError,
    },
    #[error("poll failed on <{topic}>: {source}")]
    Poll {
        topic: String,
        #[source]
        source: BackendError,
    },
    #[error("worker thread panicked: {0}")]
    Panicked(String),
}

/// Final result of a worker thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// Ran to its natural end: all messages published, or nothing to do.
    Completed,
    /// Poll worker saw no traffic for its idle timeout.
    Idle,
    Failed(WorkerFailure),
}

impl WorkerOutcome {
    pub fn ret_code(&self) -> i32 {
        match self {
            WorkerOutcome::Completed | WorkerOutcome::Idle => 0,
            WorkerOutcome::Failed(_) => -1,
        }
    }
}
