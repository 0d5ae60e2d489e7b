use std::future::Future;
use std::time::Duration;

use crate::models::job::JobStage;

/// Bounded retry with linear backoff: after attempt `n` fails the caller
/// waits `base_delay * n` before attempt `n + 1`. No jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1000))
    }
}

/// Values an external call can return that may still be unusable.
pub trait Payload {
    fn is_empty_payload(&self) -> bool;
}

impl Payload for String {
    fn is_empty_payload(&self) -> bool {
        self.trim().is_empty()
    }
}

impl<T> Payload for Vec<T> {
    fn is_empty_payload(&self) -> bool {
        self.is_empty()
    }
}

/// Last failure observed by [`with_retry`].
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error(transparent)]
    Failed(E),

    #[error("service returned an empty payload")]
    EmptyPayload,
}

/// Run `operation` until it yields a non-empty payload or `policy.max_attempts`
/// is used up. Each failed attempt is logged as a warning correlated by
/// `job_id`; the eventual success is not.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    job_id: &str,
    stage: JobStage,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    T: Payload,
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut last_error = RetryError::EmptyPayload;

    for attempt in 1..=policy.max_attempts {
        match operation().await {
            Ok(value) if !value.is_empty_payload() => return Ok(value),
            Ok(_) => last_error = RetryError::EmptyPayload,
            Err(e) => last_error = RetryError::Failed(e),
        }

        tracing::warn!(
            job_id,
            stage = %stage,
            attempt,
            max_attempts = policy.max_attempts,
            error = %last_error,
            "External call attempt failed"
        );

        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.delay_for(attempt)).await;
        }
    }

    Err(last_error)
}
