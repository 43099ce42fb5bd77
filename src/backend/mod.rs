//! Text-generation and embedding backends.
//!
//! The pipeline only talks to a model through [`Backend`]. Wrappers stack on
//! top of a concrete backend: [`GovernedBackend`] applies rate limits and
//! cost accounting, [`CachedBackend`] short-circuits repeated requests.

pub mod cache;
pub mod governed;
pub mod openai;

pub use cache::{CacheManager, CacheStats, CachedBackend, MemoryCache};
pub use governed::GovernedBackend;
pub use openai::OpenAIBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{ReasoningEffort, Verbosity};
use crate::error::BackendError;
use crate::ssr::Embedding;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub system: String,
    pub user: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub reasoning_effort: Option<ReasoningEffort>,
    pub verbosity: Option<Verbosity>,
}

impl GenerateRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            temperature: None,
            max_tokens: None,
            reasoning_effort: None,
            verbosity: None,
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn reasoning(mut self, effort: ReasoningEffort) -> Self {
        self.reasoning_effort = Some(effort);
        self
    }

    pub fn verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = Some(verbosity);
        self
    }

    /// Sampled requests (temperature > 0) are expected to vary between calls.
    pub fn is_deterministic(&self) -> bool {
        self.temperature.map_or(true, |t| t <= 0.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    pub usage: Option<Usage>,
}

impl Generation {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingOutput {
    pub embedding: Embedding,
    pub tokens: Option<u64>,
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Generation model identifier; part of every cache key.
    fn model(&self) -> &str;

    fn embedding_model(&self) -> &str {
        self.model()
    }

    fn supports_embeddings(&self) -> bool {
        true
    }

    async fn generate_text(&self, request: &GenerateRequest) -> Result<Generation, BackendError>;

    async fn embed_text(&self, text: &str) -> Result<EmbeddingOutput, BackendError>;

    /// Batch form used for anchor pre-computation. Backends without a
    /// native batch endpoint fall back to one call per text.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<EmbeddingOutput>, BackendError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed_text(text).await?);
        }
        Ok(out)
    }
}
