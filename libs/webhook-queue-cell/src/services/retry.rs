use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::{HandlerError, RetryPolicy};

#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome {
    Succeeded { attempts: u32 },
    /// Every attempt failed with a retryable error.
    Exhausted { attempts: u32, error: HandlerError },
    /// A non-retryable error ended the attempt chain.
    Rejected { attempts: u32, error: HandlerError },
}

impl RetryOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Succeeded { attempts }
            | RetryOutcome::Exhausted { attempts, .. }
            | RetryOutcome::Rejected { attempts, .. } => *attempts,
        }
    }
}

impl RetryPolicy {
    /// Backoff before attempt `attempt + 1`, doubling from the base delay.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);

        if self.jitter && !delay.is_zero() {
            let spread = delay.as_millis() as u64 / 10;
            let extra = rand::thread_rng().gen_range(0..=spread);
            (delay + Duration::from_millis(extra)).min(self.max_delay)
        } else {
            delay
        }
    }
}

/// Run `op` until it succeeds, fails terminally or the attempt budget is used.
///
/// Each attempt is bounded by `attempt_timeout`; a timeout counts as a
/// transient failure of the whole attempt.
pub async fn run_with_retry<F, Fut>(policy: &RetryPolicy, attempt_timeout: Duration, mut op: F) -> RetryOutcome
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<(), HandlerError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let result = match timeout(attempt_timeout, op(attempt)).await {
            Ok(result) => result,
            Err(_) => Err(HandlerError::transient(format!(
                "attempt timed out after {}ms",
                attempt_timeout.as_millis()
            ))),
        };

        match result {
            Ok(()) => {
                debug!("Operation succeeded on attempt {}", attempt);
                return RetryOutcome::Succeeded { attempts: attempt };
            }
            Err(error) if !error.is_retryable() => {
                return RetryOutcome::Rejected { attempts: attempt, error };
            }
            Err(error) if attempt >= max_attempts => {
                warn!("Giving up after {} attempts: {}", attempt, error);
                return RetryOutcome::Exhausted { attempts: attempt, error };
            }
            Err(error) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "Attempt {}/{} failed ({}), retrying in {}ms",
                    attempt,
                    max_attempts,
                    error,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
