//! Retry policy for calls to unreliable remote endpoints.

use std::future::Future;
use std::time::Duration;

/// How long to wait after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `base * 2^attempt`, attempts numbered from 1
    Exponential { base: Duration },
    Fixed(Duration),
}

/// Bounded retry with backoff between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    /// Three attempts, waiting 2 s then 4 s.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Exponential {
                base: Duration::from_secs(1),
            },
        }
    }
}

impl RetryPolicy {
    /// Policy that retries without waiting.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed(Duration::ZERO),
        }
    }

    /// Delay after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Exponential { base } => base.saturating_mul(2u32.saturating_pow(attempt)),
            Backoff::Fixed(delay) => delay,
        }
    }

    /// Run `op` until it succeeds or attempts are exhausted.
    ///
    /// Each failure is logged with `context`. Returns `None` when every
    /// attempt failed.
    pub async fn run<T, E, F, Fut>(&self, context: &str, mut op: F) -> Option<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let attempts = self.max_attempts.max(1);
        for attempt in 1..=attempts {
            match op(attempt).await {
                Ok(value) => return Some(value),
                Err(e) => {
                    log::warn!(
                        "{} failed (attempt {}/{}): {}",
                        context,
                        attempt,
                        attempts,
                        e
                    );
                    if attempt < attempts {
                        let delay = self.delay_after(attempt);
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
        }
        log::error!("{} gave up after {} attempts", context, attempts);
        None
    }
}
