//! Direct Likert Rating: one call, one digit, one-hot PMF.

use super::prompts::{build_dlr_prompt, DLR_RETRY_SUFFIX, DLR_SYSTEM_PROMPT};
use super::rating::rate_with_retry;
use super::SampleOutcome;
use crate::backend::{Backend, GenerateRequest};
use crate::config::{PipelineConfig, ReasoningEffort, Verbosity};
use crate::domain::{Persona, PricePoint, ProductConcept};
use crate::error::BackendError;
use crate::ssr::LikertPmf;

pub const DLR_TEMPERATURE: f32 = 0.3;

#[derive(Debug, Clone, PartialEq)]
pub struct DlrStrategy {
    pub max_tokens: u32,
    pub reasoning: ReasoningEffort,
    pub verbosity: Verbosity,
}

impl DlrStrategy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_tokens: config.max_output_tokens.dlr,
            reasoning: config.reasoning_effort.dlr,
            verbosity: config.verbosity.dlr,
        }
    }

    pub fn request(&self, persona: &Persona, concept: &ProductConcept, price: &PricePoint) -> GenerateRequest {
        GenerateRequest::new(DLR_SYSTEM_PROMPT, build_dlr_prompt(persona, concept, price))
            .temperature(DLR_TEMPERATURE)
            .max_tokens(self.max_tokens)
            .reasoning(self.reasoning)
            .verbosity(self.verbosity)
    }

    pub async fn execute(
        &self,
        backend: &dyn Backend,
        persona: &Persona,
        concept: &ProductConcept,
        price: &PricePoint,
    ) -> Result<SampleOutcome, BackendError> {
        let outcome = rate_with_retry(backend, self.request(persona, concept, price), DLR_RETRY_SUFFIX).await?;
        Ok(SampleOutcome {
            pmf: LikertPmf::one_hot(outcome.rating),
            rationale: None,
            fell_back: outcome.fell_back,
        })
    }
}

impl Default for DlrStrategy {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}
