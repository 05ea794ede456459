//! Configuration for the sync engine.

use std::time::Duration;

/// Configuration for sync runs.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum concurrent record operations per stage.
    pub batch_concurrency: usize,
    /// Whether to re-check conflicted records by comparing content hashes.
    pub verify_conflicts: bool,
    /// Backoff for rate-limited remote calls.
    pub retry: RetryConfig,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            batch_concurrency: 5,
            verify_conflicts: true,
            retry: RetryConfig::default(),
        }
    }

    /// Sets the per-stage concurrency limit. Zero is treated as one.
    pub fn with_batch_concurrency(mut self, concurrency: usize) -> Self {
        self.batch_concurrency = concurrency.max(1);
        self
    }

    /// Enables or disables the conflict verification pass.
    pub fn with_verify_conflicts(mut self, verify: bool) -> Self {
        self.verify_conflicts = verify;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Most retries of one call, whatever the delays.
pub const MAX_RETRIES: u32 = 10;

/// Exponential backoff for rate-limited calls.
///
/// Retries stop once the next delay would exceed `max_delay`; with the
/// defaults that is after waits of 1, 2, 4, 8, 16 and 32 seconds. A
/// multiplier below one is treated as one, and no call is retried more
/// than [`MAX_RETRIES`] times.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Largest delay that is still waited out.
    pub max_delay: Duration,
    /// Multiplier applied after each retry.
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Creates a configuration with the given initial and maximum delays.
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            backoff_multiplier: 2.0,
        }
    }

    /// Creates a configuration that never retries.
    pub fn no_retry() -> Self {
        Self::new(Duration::from_secs(1), Duration::ZERO)
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Delay before retry number `attempt` (0-indexed), or `None` once the
    /// delay exceeds the maximum.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt >= MAX_RETRIES {
            return None;
        }
        let multiplier = self.backoff_multiplier.max(1.0);
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * multiplier.powi(exponent);
        if !secs.is_finite() || secs > self.max_delay.as_secs_f64() {
            return None;
        }
        Some(Duration::from_secs_f64(secs))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new()
            .with_batch_concurrency(0)
            .with_verify_conflicts(false);
        assert_eq!(config.batch_concurrency, 1);
        assert!(!config.verify_conflicts);
        assert_eq!(SyncConfig::default().batch_concurrency, 5);
    }

    #[test]
    fn default_backoff_schedule() {
        let config = RetryConfig::default();
        let delays: Vec<u64> = (0..)
            .map_while(|attempt| config.delay_for_attempt(attempt))
            .map(|delay| delay.as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32]);
    }

    #[test]
    fn no_retry_gives_up_immediately() {
        assert_eq!(RetryConfig::no_retry().delay_for_attempt(0), None);
    }

    #[test]
    fn flat_or_shrinking_backoff_still_gives_up() {
        for multiplier in [1.0, 0.5, 0.0, -3.0, f64::NAN] {
            let config = RetryConfig::new(Duration::from_secs(1), Duration::from_secs(10))
                .with_backoff_multiplier(multiplier);
            let delays: Vec<Duration> = (0..)
                .map_while(|attempt| config.delay_for_attempt(attempt))
                .collect();
            assert_eq!(delays.len(), MAX_RETRIES as usize);
            assert!(delays.iter().all(|delay| *delay == Duration::from_secs(1)));
        }
    }

    #[test]
    fn zero_initial_delay_is_bounded() {
        let config = RetryConfig::new(Duration::ZERO, Duration::from_secs(60));
        assert_eq!(config.delay_for_attempt(0), Some(Duration::ZERO));
        assert_eq!(config.delay_for_attempt(MAX_RETRIES), None);
    }
}
