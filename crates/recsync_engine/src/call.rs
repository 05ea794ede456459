//! Retry and reauthentication around remote calls.

use crate::config::RetryConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::service::Service;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Wraps remote calls with rate-limit backoff, one-shot
/// reauthentication and cancellation.
///
/// - `RateLimited` is retried after 1s, 2s, 4s, ... until the next delay
///   would exceed the configured maximum
/// - `AuthExpired` triggers exactly one `authenticate`; on success the call
///   is retried once, on failure the original error is returned
/// - every other error is returned immediately
/// - cancelling the token drops the in-flight call or backoff timer and
///   yields `Cancelled`
pub struct ServiceCaller {
    service: Arc<dyn Service>,
    retry: RetryConfig,
    cancel: CancellationToken,
    retries: AtomicU64,
}

impl ServiceCaller {
    /// Creates a caller.
    pub fn new(service: Arc<dyn Service>, retry: RetryConfig, cancel: CancellationToken) -> Self {
        Self {
            service,
            retry,
            cancel,
            retries: AtomicU64::new(0),
        }
    }

    /// The wrapped service.
    pub fn service(&self) -> &dyn Service {
        self.service.as_ref()
    }

    /// Number of backoff retries performed.
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Returns true once the run is cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Runs `call`, re-invoking it as the retry rules allow.
    pub async fn call<T, F, Fut>(&self, operation: &'static str, mut call: F) -> ServiceResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ServiceResult<T>>,
    {
        let mut attempt = 0u32;
        let mut reauthenticated = false;

        loop {
            match self.cancellable(call()).await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(operation, attempt, "call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(ServiceError::RateLimited) => {
                    let Some(delay) = self.retry.delay_for_attempt(attempt) else {
                        warn!(operation, attempt, "rate limited, giving up");
                        return Err(ServiceError::RateLimited);
                    };
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "rate limited, backing off"
                    );
                    self.sleep(delay).await?;
                    self.retries.fetch_add(1, Ordering::Relaxed);
                    attempt += 1;
                }
                Err(ServiceError::AuthExpired) if !reauthenticated => {
                    reauthenticated = true;
                    match self.cancellable(self.service.authenticate()).await {
                        Ok(()) => {
                            debug!(operation, "reauthenticated, retrying call");
                        }
                        Err(ServiceError::Cancelled) => return Err(ServiceError::Cancelled),
                        Err(err) => {
                            warn!(operation, error = %err, "reauthentication failed");
                            return Err(ServiceError::AuthExpired);
                        }
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn cancellable<T>(
        &self,
        future: impl Future<Output = ServiceResult<T>>,
    ) -> ServiceResult<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ServiceError::Cancelled),
            result = future => result,
        }
    }

    async fn sleep(&self, delay: Duration) -> ServiceResult<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ServiceError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}
