//! Semantic Similarity Rating: free text, embedded and scored against the
//! anchor sets into a soft PMF.

use std::sync::Arc;
use tracing::debug;

use super::prompts::{build_ssr_text_prompt, SSR_TEXT_SYSTEM_PROMPT};
use super::rating::generate_text_with_retry;
use super::SampleOutcome;
use crate::backend::{Backend, GenerateRequest};
use crate::config::{PipelineConfig, ReasoningEffort, Verbosity};
use crate::domain::{Persona, PricePoint, ProductConcept};
use crate::error::BackendError;
use crate::ssr::{pmf_average, AnchorSet, AnchorSetText, Embedding, SsrParams};

pub const SSR_TEXT_TEMPERATURE: f32 = 0.7;

/// Embeds every anchor statement, one batch call per set.
pub async fn compute_anchor_embeddings(
    backend: &dyn Backend,
    sets: &[AnchorSetText],
) -> Result<Vec<AnchorSet>, BackendError> {
    let mut out = Vec::with_capacity(sets.len());
    for set in sets {
        let texts: Vec<String> = set.iter().map(|s| s.to_string()).collect();
        let embeddings: Vec<Embedding> = backend
            .embed_texts(&texts)
            .await?
            .into_iter()
            .map(|e| e.embedding)
            .collect();
        let count = embeddings.len();
        let anchors: AnchorSet = embeddings.try_into().map_err(|_| {
            BackendError::MalformedResponse(format!("expected 5 anchor embeddings, got {}", count))
        })?;
        out.push(anchors);
    }
    debug!("Computed embeddings for {} anchor sets", out.len());
    Ok(out)
}

#[derive(Debug, Clone)]
pub struct SsrStrategy {
    pub anchors: Arc<Vec<AnchorSet>>,
    pub params: SsrParams,
    pub max_tokens: u32,
    pub reasoning: ReasoningEffort,
    pub verbosity: Verbosity,
}

impl SsrStrategy {
    pub fn new(config: &PipelineConfig, anchors: Arc<Vec<AnchorSet>>) -> Self {
        Self {
            anchors,
            params: config.ssr.params(),
            max_tokens: config.max_output_tokens.ssr_text,
            reasoning: config.reasoning_effort.ssr_text,
            verbosity: config.verbosity.ssr_text,
        }
    }

    pub async fn execute(
        &self,
        backend: &dyn Backend,
        persona: &Persona,
        concept: &ProductConcept,
        price: &PricePoint,
    ) -> Result<SampleOutcome, BackendError> {
        let request = GenerateRequest::new(SSR_TEXT_SYSTEM_PROMPT, build_ssr_text_prompt(persona, concept, price))
            .temperature(SSR_TEXT_TEMPERATURE)
            .max_tokens(self.max_tokens)
            .reasoning(self.reasoning)
            .verbosity(self.verbosity);
        let rationale = generate_text_with_retry(backend, &request, "ssr_text").await?;

        let embedding = backend.embed_text(&rationale).await?.embedding;
        let pmf = pmf_average(&embedding, &self.anchors, &self.params);

        Ok(SampleOutcome {
            pmf,
            rationale: Some(rationale),
            fell_back: false,
        })
    }
}
