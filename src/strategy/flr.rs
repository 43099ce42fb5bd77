//! Free-text then Likert Rating: a free-text reaction, then a second call
//! that rates that reaction on the 1-5 scale.

use super::prompts::{
    build_flr_rating_prompt, build_flr_text_prompt, FLR_RATING_SYSTEM_PROMPT, FLR_RETRY_SUFFIX,
    FLR_TEXT_SYSTEM_PROMPT,
};
use super::rating::{generate_text_with_retry, rate_with_retry};
use super::SampleOutcome;
use crate::backend::{Backend, GenerateRequest};
use crate::config::{PipelineConfig, ReasoningEffort, Verbosity};
use crate::domain::{Persona, PricePoint, ProductConcept};
use crate::error::BackendError;
use crate::ssr::LikertPmf;

pub const FLR_TEXT_TEMPERATURE: f32 = 0.7;
pub const FLR_RATING_TEMPERATURE: f32 = 0.2;

#[derive(Debug, Clone, PartialEq)]
pub struct FlrStrategy {
    pub text_max_tokens: u32,
    pub rating_max_tokens: u32,
    pub text_reasoning: ReasoningEffort,
    pub rating_reasoning: ReasoningEffort,
    pub text_verbosity: Verbosity,
    pub rating_verbosity: Verbosity,
}

impl FlrStrategy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            text_max_tokens: config.max_output_tokens.flr_text,
            rating_max_tokens: config.max_output_tokens.flr_rating,
            text_reasoning: config.reasoning_effort.flr_text,
            rating_reasoning: config.reasoning_effort.flr_rating,
            text_verbosity: config.verbosity.flr_text,
            rating_verbosity: config.verbosity.flr_rating,
        }
    }

    pub async fn generate_text(
        &self,
        backend: &dyn Backend,
        persona: &Persona,
        concept: &ProductConcept,
        price: &PricePoint,
    ) -> Result<String, BackendError> {
        let request = GenerateRequest::new(FLR_TEXT_SYSTEM_PROMPT, build_flr_text_prompt(persona, concept, price))
            .temperature(FLR_TEXT_TEMPERATURE)
            .max_tokens(self.text_max_tokens)
            .reasoning(self.text_reasoning)
            .verbosity(self.text_verbosity);
        generate_text_with_retry(backend, &request, "flr_text").await
    }

    pub async fn execute(
        &self,
        backend: &dyn Backend,
        persona: &Persona,
        concept: &ProductConcept,
        price: &PricePoint,
    ) -> Result<SampleOutcome, BackendError> {
        let rationale = self.generate_text(backend, persona, concept, price).await?;

        let request = GenerateRequest::new(FLR_RATING_SYSTEM_PROMPT, build_flr_rating_prompt(&rationale, concept, price))
            .temperature(FLR_RATING_TEMPERATURE)
            .max_tokens(self.rating_max_tokens)
            .reasoning(self.rating_reasoning)
            .verbosity(self.rating_verbosity);
        let outcome = rate_with_retry(backend, request, FLR_RETRY_SUFFIX).await?;

        Ok(SampleOutcome {
            pmf: LikertPmf::one_hot(outcome.rating),
            rationale: Some(rationale),
            fell_back: outcome.fell_back,
        })
    }
}

impl Default for FlrStrategy {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}
