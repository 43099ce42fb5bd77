//! Backend wrapper that routes every call through the run's throttler and
//! books its token usage against the cost tracker.

use async_trait::async_trait;
use std::sync::Arc;

use super::{Backend, EmbeddingOutput, GenerateRequest, Generation, Usage};
use crate::error::{BackendError, ConfigError};
use crate::orchestrator::budget::CostTracker;
use crate::safety::{PipelineThrottler, StageSemaphore};

/// Input tokens booked for a generation whose backend reports no usage.
pub const FALLBACK_INPUT_TOKENS: u64 = 700;
/// Output tokens booked when neither usage nor a token budget is known.
pub const FALLBACK_OUTPUT_TOKENS: u64 = 70;

pub const EMBED_STAGE: &str = "embed";

pub struct GovernedBackend {
    inner: Arc<dyn Backend>,
    throttler: Arc<PipelineThrottler>,
    tracker: CostTracker,
    embed_pool: Arc<StageSemaphore>,
    generation_estimate: u64,
}

impl GovernedBackend {
    pub fn new(
        inner: Arc<dyn Backend>,
        throttler: Arc<PipelineThrottler>,
        tracker: CostTracker,
        generation_estimate: u64,
    ) -> Result<Self, ConfigError> {
        let embed_pool = throttler.stage(EMBED_STAGE)?;
        Ok(Self {
            inner,
            throttler,
            tracker,
            embed_pool,
            generation_estimate,
        })
    }

    fn embedding_estimate(text: &str) -> u64 {
        (text.len() as u64 / 4).max(1)
    }
}

#[async_trait]
impl Backend for GovernedBackend {
    fn model(&self) -> &str {
        self.inner.model()
    }

    fn embedding_model(&self) -> &str {
        self.inner.embedding_model()
    }

    fn supports_embeddings(&self) -> bool {
        self.inner.supports_embeddings()
    }

    async fn generate_text(&self, request: &GenerateRequest) -> Result<Generation, BackendError> {
        let (generation, ticket) = self
            .throttler
            .call(self.generation_estimate, || self.inner.generate_text(request))
            .await?;

        let usage = generation.usage.unwrap_or(Usage {
            input_tokens: FALLBACK_INPUT_TOKENS,
            output_tokens: request.max_tokens.map_or(FALLBACK_OUTPUT_TOKENS, u64::from),
        });
        self.throttler.record_usage(&ticket, usage.total()).await;
        self.tracker.record_call(usage.input_tokens, usage.output_tokens);
        Ok(generation)
    }

    async fn embed_text(&self, text: &str) -> Result<EmbeddingOutput, BackendError> {
        let _permit = self.embed_pool.acquire().await;
        let estimate = Self::embedding_estimate(text);

        let (output, ticket) = self
            .throttler
            .call(estimate, || self.inner.embed_text(text))
            .await?;

        let tokens = output.tokens.unwrap_or(estimate);
        self.throttler.record_usage(&ticket, tokens).await;
        self.tracker.record_embedding(tokens);
        Ok(output)
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<EmbeddingOutput>, BackendError> {
        let _permit = self.embed_pool.acquire().await;
        let estimate: u64 = texts.iter().map(|t| Self::embedding_estimate(t)).sum();

        let (outputs, ticket) = self
            .throttler
            .call(estimate, || self.inner.embed_texts(texts))
            .await?;

        let reported: Option<u64> = outputs.iter().map(|o| o.tokens).sum();
        let tokens = reported.unwrap_or(estimate);
        self.throttler.record_usage(&ticket, tokens).await;
        self.tracker.record_embedding(tokens);
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyBackend {
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl Backend for FlakyBackend {
        fn model(&self) -> &str {
            "flaky"
        }

        async fn generate_text(&self, _request: &GenerateRequest) -> Result<Generation, BackendError> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(BackendError::from_status(429, "too many requests"));
            }
            Ok(Generation {
                text: "4".into(),
                usage: Some(Usage { input_tokens: 100, output_tokens: 1 }),
            })
        }

        async fn embed_text(&self, _text: &str) -> Result<EmbeddingOutput, BackendError> {
            Ok(EmbeddingOutput { embedding: vec![1.0, 0.0], tokens: None })
        }
    }

    fn governed(failures: usize, tracker: CostTracker) -> GovernedBackend {
        let inner = Arc::new(FlakyBackend { failures_left: AtomicUsize::new(failures) });
        GovernedBackend::new(inner, Arc::new(PipelineThrottler::default()), tracker, 800).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_and_books_real_usage() {
        let tracker = CostTracker::default();
        let backend = governed(2, tracker.clone());

        let gen = backend.generate_text(&GenerateRequest::new("s", "u")).await.unwrap();
        assert_eq!(gen.text, "4");

        let stats = tracker.stats();
        assert_eq!(stats.calls_completed, 1);
        assert_eq!(stats.input_tokens, 100);
        assert_eq!(stats.output_tokens, 1);
    }

    #[tokio::test]
    async fn test_embedding_usage_falls_back_to_estimate() {
        let tracker = CostTracker::default();
        let backend = governed(0, tracker.clone());

        let texts = vec!["abcdefgh".to_string(), "abcd".to_string()];
        let out = backend.embed_texts(&texts).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(tracker.stats().embedding_tokens, 3);
    }
}
