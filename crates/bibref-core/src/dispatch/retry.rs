//! Retrying backend calls on transient request failures.
//!
//! Each logical fetch gets a fresh attempt budget. Only errors for which
//! [`BibrefError::is_transient`] holds are retried; anything else returns
//! after the first attempt.

use crate::config::FetchConfig;
use crate::error::{BibrefError, Result};
use crate::models::{BibliographicItem, FetchOptions};
use crate::processor::Processor;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff settings for a retried call.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, first one included. Zero is treated as one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: FetchConfig::DEFAULT_RETRIES,
            base_delay: FetchConfig::RETRY_BASE_DELAY,
            max_delay: FetchConfig::RETRY_MAX_DELAY,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `attempt` (0-indexed): doubling, capped,
    /// optionally scaled by a factor in `0.5..1.5`.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let doubled = self.base_delay.as_secs_f64() * 2f64.powi(attempt as i32);
        let capped = doubled.min(self.max_delay.as_secs_f64());
        let secs = if self.jitter && capped > 0.0 {
            let factor = rand::rng().random_range(0.5..1.5);
            (capped * factor).min(self.max_delay.as_secs_f64())
        } else {
            capped
        };
        Duration::from_secs_f64(secs)
    }
}

/// Outcome counters for a retried call.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    pub attempts: u32,
    pub total_delay: Duration,
    pub success: bool,
    pub last_error: Option<String>,
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the attempt budget is spent.
pub async fn retry_async<F, Fut, T, E>(
    config: &RetryConfig,
    mut operation: F,
    should_retry: impl Fn(&E) -> bool,
) -> (std::result::Result<T, E>, RetryStats)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut stats = RetryStats::default();
    let mut attempt = 0;

    loop {
        stats.attempts = attempt + 1;
        let err = match operation().await {
            Ok(value) => {
                stats.success = true;
                if attempt > 0 {
                    debug!("Succeeded on attempt {}", attempt + 1);
                }
                return (Ok(value), stats);
            }
            Err(e) => e,
        };
        stats.last_error = Some(err.to_string());

        if !should_retry(&err) {
            return (Err(err), stats);
        }
        if attempt + 1 >= max_attempts {
            if max_attempts > 1 {
                warn!("Giving up after {} attempts: {}", max_attempts, err);
            }
            return (Err(err), stats);
        }

        let delay = config.calculate_delay(attempt);
        stats.total_delay += delay;
        warn!(
            "Attempt {}/{} failed: {}. Retrying in {:?}",
            attempt + 1,
            max_attempts,
            err,
            delay
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Call `processor.get`, retrying transient request failures.
pub async fn net_retry(
    processor: &dyn Processor,
    code: &str,
    year: Option<&str>,
    opts: &FetchOptions,
    config: &RetryConfig,
) -> Result<Option<BibliographicItem>> {
    let config = config.clone().with_max_attempts(opts.retries);
    let (result, _) = retry_async(
        &config,
        || processor.get(code, year, opts),
        BibrefError::is_transient,
    )
    .await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn quick() -> RetryConfig {
        RetryConfig::new()
            .with_base_delay(Duration::from_millis(1))
            .with_jitter(false)
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let config = RetryConfig::new()
            .with_base_delay(Duration::from_millis(250))
            .with_max_delay(Duration::from_secs(1))
            .with_jitter(false);
        assert_eq!(config.calculate_delay(0), Duration::from_millis(250));
        assert_eq!(config.calculate_delay(1), Duration::from_millis(500));
        assert_eq!(config.calculate_delay(5), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let config = RetryConfig::new().with_base_delay(Duration::from_millis(200));
        for _ in 0..20 {
            let delay = config.calculate_delay(0);
            assert!(delay >= Duration::from_millis(100) && delay <= Duration::from_millis(300));
        }
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let (result, stats) = retry_async(
            &quick().with_max_attempts(3),
            || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(BibrefError::request("IETF", "connection reset"))
                    } else {
                        Ok(7)
                    }
                }
            },
            BibrefError::is_transient,
        )
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(stats.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_budget_returns_last_error() {
        let (result, stats) = retry_async(
            &quick().with_max_attempts(3),
            || async { Err::<(), _>(BibrefError::request("ISO", "503")) },
            BibrefError::is_transient,
        )
        .await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(stats.attempts, 3);
        assert_eq!(
            stats.last_error.as_deref(),
            Some("Request to ISO failed: 503")
        );
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let (result, stats) = retry_async(
            &quick().with_max_attempts(3),
            || async { Err::<(), _>(BibrefError::Other("parse failure".into())) },
            BibrefError::is_transient,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(stats.attempts, 1);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_calls_once() {
        let (result, stats) = retry_async(
            &quick().with_max_attempts(0),
            || async { Ok::<_, BibrefError>(1) },
            BibrefError::is_transient,
        )
        .await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(stats.attempts, 1);
    }
}
