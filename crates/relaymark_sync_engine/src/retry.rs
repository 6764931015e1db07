//! Bounded exponential-backoff retries for async operations.

use crate::config::RetryConfig;
use std::future::Future;
use tracing::debug;

/// Runs fallible async operations with bounded retries.
///
/// The delay before attempt `n` (0-indexed, `n >= 1`) is
/// [`RetryConfig::delay_for_attempt`]. After the last attempt fails, that
/// attempt's error is returned unchanged.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Creates an executor.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the retry configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Returns the number of attempts a run makes before giving up.
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// Runs `op` until it succeeds or the attempts are used up.
    ///
    /// `op` receives the 0-indexed attempt number.
    pub async fn run<T, E, F, Fut>(&self, op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_with_hook(op, |_, _| {}).await
    }

    /// Like [`run`](Self::run), calling `on_retry(attempt, &error)` after
    /// every failed attempt that will be retried. `attempt` is 1-indexed.
    pub async fn run_with_hook<T, E, F, Fut, H>(&self, mut op: F, mut on_retry: H) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        H: FnMut(u32, &E),
    {
        let max_attempts = self.max_attempts();
        let mut attempt = 0;

        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    if attempt >= max_attempts {
                        return Err(err);
                    }
                    on_retry(attempt, &err);

                    let delay = self.config.delay_for_attempt(attempt);
                    debug!(attempt, ?delay, "retrying after failure");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn fast(max_attempts: u32) -> RetryExecutor {
        RetryExecutor::new(RetryConfig::new(max_attempts).with_initial_delay(Duration::from_millis(1)))
    }

    #[tokio::test]
    async fn succeeds_first_time_without_retry() {
        let calls = &AtomicU32::new(0);
        let result: Result<u32, String> = fast(3)
            .run(move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(7)
            })
            .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = &AtomicU32::new(0);
        let result: Result<u32, String> = fast(5)
            .run(move |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(format!("fail {attempt}"))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_returns_last_error_unchanged() {
        let mut hooks = Vec::new();
        let result: Result<(), String> = fast(3)
            .run_with_hook(
                |attempt| async move { Err(format!("fail {attempt}")) },
                |attempt, err: &String| hooks.push((attempt, err.clone())),
            )
            .await;

        assert_eq!(result, Err("fail 2".to_string()));
        assert_eq!(
            hooks,
            vec![(1, "fail 0".to_string()), (2, "fail 1".to_string())]
        );
    }

    #[tokio::test]
    async fn backoff_waits_between_attempts() {
        let executor = RetryExecutor::new(
            RetryConfig::new(3).with_initial_delay(Duration::from_millis(20)),
        );
        let start = tokio::time::Instant::now();
        let _: Result<(), ()> = executor.run(|_| async { Err(()) }).await;
        // 20ms + 40ms of backoff
        assert!(start.elapsed() >= Duration::from_millis(60));
    }
}
