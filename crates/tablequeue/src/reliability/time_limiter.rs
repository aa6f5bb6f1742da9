//! Shared timeout budget for a sequence of blocking waits

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

/// Splits one overall timeout across several waits
///
/// Each [`execute`](Self::execute) receives whatever budget is left; the wall
/// time it takes is subtracted. Once the budget is spent, further calls do not
/// run their operation at all.
///
/// # Example
///
/// ```ignore
/// let mut limiter = TimeLimiter::new(Duration::from_secs(10));
/// for pool in pools {
///     limiter.execute(|remaining| async move {
///         pool.await_termination(remaining).await;
///     }).await;
/// }
/// ```
#[derive(Debug, Clone)]
pub struct TimeLimiter {
    remaining: Duration,
}

impl TimeLimiter {
    pub fn new(timeout: Duration) -> Self {
        Self { remaining: timeout }
    }

    /// Budget left
    pub fn remaining(&self) -> Duration {
        self.remaining
    }

    /// Run `op` with the remaining budget unless it is exhausted.
    ///
    /// Returns `None` when the operation was skipped.
    pub async fn execute<F, Fut, R>(&mut self, op: F) -> Option<R>
    where
        F: FnOnce(Duration) -> Fut,
        Fut: Future<Output = R>,
    {
        if self.remaining.is_zero() {
            return None;
        }
        let started = Instant::now();
        let result = op(self.remaining).await;
        self.remaining = self.remaining.saturating_sub(started.elapsed());
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_budget_is_shared() {
        let mut limiter = TimeLimiter::new(Duration::from_secs(10));

        let first = limiter
            .execute(|remaining| async move {
                tokio::time::sleep(Duration::from_secs(4)).await;
                remaining
            })
            .await;
        assert_eq!(first, Some(Duration::from_secs(10)));

        let second = limiter.execute(|remaining| async move { remaining }).await;
        assert_eq!(second, Some(Duration::from_secs(6)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_budget_skips_operation() {
        let mut limiter = TimeLimiter::new(Duration::from_secs(1));
        limiter
            .execute(|_| tokio::time::sleep(Duration::from_secs(3)))
            .await;
        assert_eq!(limiter.remaining(), Duration::ZERO);

        let mut ran = false;
        let result = limiter.execute(|_| async { ran = true }).await;
        assert!(result.is_none());
        assert!(!ran);
    }
}
