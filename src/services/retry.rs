use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;

use super::usda::LookupError;
use crate::error::GenerationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    None,
    Fixed(Duration),
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay after the `failed_attempt`-th failure (1-based).
    pub fn delay(&self, failed_attempt: u32) -> Duration {
        match *self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(d) => d,
            Backoff::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(failed_attempt.saturating_sub(1));
                base.saturating_mul(factor).min(max)
            }
        }
    }
}

/// Context handed to each attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    /// 1-based.
    pub number: u32,
    pub last_error: Option<String>,
}

impl Attempt {
    pub fn is_retry(&self) -> bool {
        self.number > 1
    }
}

/// Bounded retry: attempt count, backoff between attempts and a predicate
/// deciding which errors are worth another try.
pub struct RetryPolicy<E> {
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Adds up to half the backoff delay at random.
    pub jitter: bool,
    retryable: fn(&E) -> bool,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            jitter: self.jitter,
            retryable: self.retryable,
        }
    }
}

impl<E> std::fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .finish()
    }
}

impl<E: Display> RetryPolicy<E> {
    pub fn new(max_attempts: u32, backoff: Backoff, retryable: fn(&E) -> bool) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            jitter: false,
            retryable,
        }
    }

    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    pub fn should_retry(&self, error: &E, attempt: u32) -> bool {
        attempt < self.max_attempts && (self.retryable)(error)
    }

    fn delay(&self, failed_attempt: u32) -> Duration {
        let base = self.backoff.delay(failed_attempt);
        if !self.jitter || base.is_zero() {
            return base;
        }
        let half = (base.as_millis() / 2) as u64;
        let extra = rand::thread_rng().gen_range(0..=half);
        base + Duration::from_millis(extra)
    }

    /// Longest total sleep `run` can spend between attempts, jitter included.
    pub fn max_total_delay(&self) -> Duration {
        (1..self.max_attempts)
            .map(|failed| {
                let base = self.backoff.delay(failed);
                if self.jitter {
                    base + base / 2
                } else {
                    base
                }
            })
            .sum()
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts run out. The last error is returned as-is.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = Attempt {
            number: 1,
            last_error: None,
        };
        loop {
            match op(attempt.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) if self.should_retry(&e, attempt.number) => {
                    let delay = self.delay(attempt.number);
                    tracing::debug!(
                        "attempt {}/{} failed, retrying in {:?}: {}",
                        attempt.number,
                        self.max_attempts,
                        delay,
                        e
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt = Attempt {
                        number: attempt.number + 1,
                        last_error: Some(e.to_string()),
                    };
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl RetryPolicy<GenerationError> {
    /// One initial call plus one schema-only re-prompt.
    pub fn generation() -> Self {
        Self::new(
            2,
            Backoff::Exponential {
                base: Duration::from_millis(500),
                max: Duration::from_secs(4),
            },
            |e| match e {
                GenerationError::GenerationTimeout(_) | GenerationError::GenerationParse(_) => true,
                GenerationError::Provider(p) => p.is_transient(),
                _ => false,
            },
        )
        .with_jitter()
    }
}

impl RetryPolicy<LookupError> {
    /// Lookups are never retried: a failure falls back to the AI estimate.
    pub fn lookup() -> Self {
        Self::new(1, Backoff::None, |_| false)
    }
}
