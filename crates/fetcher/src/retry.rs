//! Bounded retry policy
//!
//! Retry loops in the engine all go through this one primitive instead of
//! inline repetition.

use std::future::Future;
use std::time::Duration;

use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;

/// A bounded retry schedule: total attempt count and the delay between tries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub delay: Duration,
}

impl RetryPolicy {
    /// Fixed-interval policy; `max_attempts` counts the first try
    pub fn fixed(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Run `operation` until it succeeds or the attempts are exhausted,
    /// returning the last error
    pub async fn run<A, F, T, E>(&self, operation: A) -> Result<T, E>
    where
        A: FnMut() -> F,
        F: Future<Output = Result<T, E>>,
    {
        let strategy = FixedInterval::new(self.delay).take(self.max_attempts - 1);
        Retry::spawn(strategy, operation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn stops_after_max_attempts() {
        let attempts = AtomicUsize::new(0);
        let policy = RetryPolicy::fixed(3, Duration::from_millis(1));
        let result: Result<(), &str> = policy
            .run(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err("nope") }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn returns_first_success() {
        let attempts = AtomicUsize::new(0);
        let policy = RetryPolicy::fixed(5, Duration::from_millis(1));
        let result: Result<usize, &str> = policy
            .run(|| {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err("not yet")
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(3));
    }
}
