//! Bounded exponential backoff for transport failures.

use std::{future::Future, time::Duration};

use tracing::{debug, info, warn};

use crate::{errors::Error, Result};

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based), or `None` when the
    /// error is not retryable or the ceiling is reached.
    pub fn delay_after(&self, error: &Error, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        match error {
            // Honor a server-provided wait time when it is longer than our backoff.
            Error::Transport { retry_after, .. } => {
                let backoff = self
                    .initial_backoff
                    .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
                Some(retry_after.map_or(backoff, |ra| ra.max(backoff)))
            }
            _ => None,
        }
    }

    /// Run `op` until it succeeds, fails permanently, or the ceiling is reached.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1u32;
        loop {
            match op().await {
                Ok(v) => {
                    if attempt > 1 {
                        info!(what, attempt, "retry succeeded");
                    }
                    return Ok(v);
                }
                Err(e) => {
                    let Some(backoff) = self.delay_after(&e, attempt) else {
                        warn!(
                            what,
                            attempt,
                            max_attempts = self.max_attempts,
                            error = %e,
                            "request failed"
                        );
                        return Err(e);
                    };
                    debug!(
                        what,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "retrying request"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn backoff_doubles_and_respects_retry_after() {
        let p = RetryPolicy {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(100),
        };
        let e = Error::transport("x");
        assert_eq!(p.delay_after(&e, 1), Some(Duration::from_millis(100)));
        assert_eq!(p.delay_after(&e, 2), Some(Duration::from_millis(200)));
        assert_eq!(p.delay_after(&e, 3), Some(Duration::from_millis(400)));
        assert_eq!(p.delay_after(&e, 4), None);

        let slow = Error::Transport {
            message: "429".to_string(),
            retry_after: Some(Duration::from_secs(5)),
        };
        assert_eq!(p.delay_after(&slow, 1), Some(Duration::from_secs(5)));
        assert_eq!(p.delay_after(&Error::Validation("x".to_string()), 1), None);
    }

    #[tokio::test]
    async fn run_stops_at_ceiling() {
        let p = RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
        };
        let calls = AtomicU32::new(0);
        let res: Result<()> = p
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::transport("down")) }
            })
            .await;
        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
