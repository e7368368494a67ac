use crate::error::{PersistenceError, StoreError};
use crate::interview::Response;
use crate::store::InterviewStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Bounded exponential backoff for response writes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Delay before retry number `attempt` (1-based): base, 2*base, 4*base, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Writes single responses through to the store with retries.
///
/// A failure is returned to the caller, never swallowed; the session keeps its
/// local copy and decides what to do with it.
#[derive(Clone)]
pub struct ResponseGateway {
    store: Arc<dyn InterviewStore>,
    policy: RetryPolicy,
}

impl ResponseGateway {
    pub fn new(store: Arc<dyn InterviewStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    /// Upserts `response`. Only transient store errors are retried.
    pub async fn write(
        &self,
        interview_id: &str,
        response: &Response,
    ) -> Result<(), PersistenceError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error: StoreError = match self.store.upsert_response(interview_id, response).await {
                Ok(()) => {
                    debug!(
                        interview_id = %interview_id,
                        question_index = response.question_index,
                        attempt,
                        "Response persisted"
                    );
                    return Ok(());
                }
                Err(e) => e,
            };

            if !error.is_transient() || attempt >= max_attempts {
                warn!(
                    interview_id = %interview_id,
                    question_index = response.question_index,
                    attempts = attempt,
                    error = %error,
                    "Giving up on response write"
                );
                return Err(PersistenceError {
                    interview_id: interview_id.to_string(),
                    question_index: response.question_index,
                    attempts: attempt,
                    source: error,
                });
            }

            let delay = self.policy.delay_for(attempt);
            warn!(
                interview_id = %interview_id,
                question_index = response.question_index,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Response write failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
