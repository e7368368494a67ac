use crate::generic_types::EndReason;
use crate::session_state::SessionState;
use std::time::Duration;

/// Failures of the durable interview store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("interview {0} not found")]
    NotFound(String),
    #[error("question index {index} is out of range for {len} questions")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("interview {0} is already completed")]
    AlreadyCompleted(String),
    #[error("corrupt interview record {id}: {reason}")]
    Corrupt { id: String, reason: String },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    /// Database-level failures may succeed on retry; the rest never will.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Database(_))
    }
}

/// A response write that failed after exhausting its retries.
#[derive(Debug, thiserror::Error)]
#[error(
    "failed to persist response {question_index} for interview {interview_id} after {attempts} attempt(s): {source}"
)]
pub struct PersistenceError {
    pub interview_id: String,
    pub question_index: usize,
    pub attempts: u32,
    #[source]
    pub source: StoreError,
}

/// Failure of a single scoring call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScoringError {
    #[error("scoring collaborator failed: {0}")]
    Upstream(String),
    #[error("scoring call timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed scoring output: {0}")]
    Malformed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("voice session ended before it started ({reason:?}): {detail}")]
    Transport { reason: EndReason, detail: String },
    #[error("voice session was stopped while connecting")]
    Cancelled,
    #[error("cannot {op} while the session is {state:?}")]
    InvalidState {
        op: &'static str,
        state: SessionState,
    },
}

impl SessionError {
    /// Transport failures and cancelled connects can be retried with `start()`.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SessionError::Transport { .. } | SessionError::Cancelled
        )
    }
}

/// One response the pipeline could not score.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemFailure {
    pub question_index: usize,
    pub error: ScoringError,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("interview {0} not found")]
    NotFound(String),
    #[error("interview {0} has no responses to score")]
    NoResponses(String),
    #[error("{} of {total} feedback item(s) failed for interview {interview_id}", .failures.len())]
    Incomplete {
        interview_id: String,
        total: usize,
        failures: Vec<ItemFailure>,
    },
    #[error("responses for interview {interview_id} kept changing during {passes} scoring pass(es)")]
    ResponsesChanged { interview_id: String, passes: usize },
    #[error(transparent)]
    Store(#[from] StoreError),
}
