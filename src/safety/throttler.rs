//! Pipeline throttler: stage pools in front of the shared rate limiter.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::warn;

use super::rate_limiter::{RateLimiter, SlotTicket};
use super::semaphore::{StagePermit, StageSemaphore, StageStats};
use crate::config::{ConcurrencyConfig, PipelineConfig, RateLimitConfig};
use crate::error::{BackendError, ConfigError, PipelineError};

pub struct PipelineThrottler {
    limiter: RateLimiter,
    stages: BTreeMap<String, Arc<StageSemaphore>>,
    max_retries: u32,
}

impl PipelineThrottler {
    pub fn new(limits: &RateLimitConfig, concurrency: &ConcurrencyConfig) -> Self {
        let stages = concurrency
            .stages()
            .into_iter()
            .map(|(name, permits)| (name.to_string(), Arc::new(StageSemaphore::new(name, permits))))
            .collect();

        Self {
            limiter: RateLimiter::from_config(limits),
            stages,
            max_retries: limits.max_retries,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(&config.rate_limits, &config.concurrency)
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Looks up a stage pool. Unknown names are a caller bug.
    pub fn stage(&self, name: &str) -> Result<Arc<StageSemaphore>, ConfigError> {
        self.stages
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownStage(name.to_string()))
    }

    pub async fn acquire(&self, stage: &str) -> Result<StagePermit, ConfigError> {
        let pool = self.stage(stage)?;
        Ok(pool.acquire().await)
    }

    /// Passes one backend call through the rate limiter, retrying 429/5xx
    /// class failures with exponential backoff. Non-retryable errors and the
    /// last retryable one are returned as-is.
    pub async fn call<T, F, Fut>(&self, estimated_tokens: u64, mut f: F) -> Result<(T, SlotTicket), BackendError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let mut attempt = 0;
        loop {
            let ticket = self.limiter.wait_for_slot(estimated_tokens).await;
            match f().await {
                Ok(value) => return Ok((value, ticket)),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    warn!("Retryable backend error: {}", e);
                    self.limiter.handle_rate_limit_error(attempt);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Stage permit, then rate limiter, then the call. The permit is
    /// released on every exit path.
    pub async fn execute<T, F, Fut>(&self, stage: &str, estimated_tokens: u64, f: F) -> Result<(T, SlotTicket), PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let _permit = self.acquire(stage).await?;
        Ok(self.call(estimated_tokens, f).await?)
    }

    pub async fn record_usage(&self, ticket: &SlotTicket, actual_tokens: u64) {
        self.limiter.record_usage(ticket, actual_tokens).await;
    }

    pub fn reset_throttle(&self) {
        self.limiter.reset_throttle();
    }

    pub fn stats(&self) -> BTreeMap<String, StageStats> {
        self.stages
            .iter()
            .map(|(name, pool)| (name.clone(), pool.stats()))
            .collect()
    }
}

impl Default for PipelineThrottler {
    fn default() -> Self {
        Self::new(&RateLimitConfig::default(), &ConcurrencyConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_unknown_stage_fails_loudly() {
        let throttler = PipelineThrottler::default();
        assert!(matches!(
            throttler.acquire("summarise").await,
            Err(ConfigError::UnknownStage(name)) if name == "summarise"
        ));

        let result = throttler
            .execute("nope", 10, || async { Ok::<_, BackendError>(1) })
            .await;
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_rate_limit_then_succeeds() {
        let throttler = PipelineThrottler::default();
        let calls = AtomicU32::new(0);

        let (value, _) = throttler
            .execute("dlr", 100, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(BackendError::RateLimited("slow down".into()))
                    } else {
                        Ok("5")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, "5");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(throttler.stats()["dlr"].in_use, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let throttler = PipelineThrottler::default();
        let calls = AtomicU32::new(0);

        let result: Result<((), SlotTicket), BackendError> = throttler
            .call(100, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(BackendError::Server { status: 503, message: "down".into() }) }
            })
            .await;

        assert!(matches!(result, Err(BackendError::Server { status: 503, .. })));
        // one initial attempt plus three retries
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_non_retryable_surfaces_immediately() {
        let throttler = PipelineThrottler::default();
        let calls = AtomicU32::new(0);

        let result = throttler
            .execute("flr", 100, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(BackendError::Auth("bad key".into())) }
            })
            .await;

        assert!(matches!(result, Err(PipelineError::Backend(BackendError::Auth(_)))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(throttler.stats()["flr"].available, 15);
    }
}
