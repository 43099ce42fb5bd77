//! Elicitation strategies
//!
//! Each strategy turns (persona, concept, price) into one sample PMF with
//! one or two backend calls. Unparseable ratings are recovered inside the
//! strategy. Blank free text is asked for once more and otherwise surfaces
//! as `BackendError::EmptyContent`, which the runner isolates per task.

pub mod dlr;
pub mod flr;
pub mod prompts;
pub mod rating;
pub mod ssr;

pub use dlr::DlrStrategy;
pub use flr::FlrStrategy;
pub use rating::{
    generate_text_with_retry, parse_dlr_response, parse_rating, rate_with_retry, RatingOutcome, RatingParseError,
};
pub use ssr::{compute_anchor_embeddings, SsrStrategy};

use std::sync::Arc;

use crate::backend::Backend;
use crate::config::{Method, PipelineConfig};
use crate::domain::{Persona, PricePoint, ProductConcept};
use crate::error::{BackendError, ConfigError};
use crate::ssr::{AnchorSet, LikertPmf};

/// Result of one respondent sample.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleOutcome {
    pub pmf: LikertPmf,
    pub rationale: Option<String>,
    /// The rating stage fell back to the neutral default.
    pub fell_back: bool,
}

#[derive(Debug, Clone)]
pub enum Strategy {
    Dlr(DlrStrategy),
    Flr(FlrStrategy),
    Ssr(SsrStrategy),
}

impl Strategy {
    /// SSR needs pre-computed anchors; asking for it without them is a
    /// configuration error.
    pub fn from_config(config: &PipelineConfig, anchors: Option<Arc<Vec<AnchorSet>>>) -> Result<Self, ConfigError> {
        Ok(match config.method {
            Method::Dlr => Strategy::Dlr(DlrStrategy::from_config(config)),
            Method::Flr => Strategy::Flr(FlrStrategy::from_config(config)),
            Method::Ssr => match anchors {
                Some(anchors) if !anchors.is_empty() => Strategy::Ssr(SsrStrategy::new(config, anchors)),
                _ => return Err(ConfigError::MissingAnchorEmbeddings),
            },
        })
    }

    pub fn method(&self) -> Method {
        match self {
            Strategy::Dlr(_) => Method::Dlr,
            Strategy::Flr(_) => Method::Flr,
            Strategy::Ssr(_) => Method::Ssr,
        }
    }

    pub async fn execute(
        &self,
        backend: &dyn Backend,
        persona: &Persona,
        concept: &ProductConcept,
        price: &PricePoint,
    ) -> Result<SampleOutcome, BackendError> {
        match self {
            Strategy::Dlr(s) => s.execute(backend, persona, concept, price).await,
            Strategy::Flr(s) => s.execute(backend, persona, concept, price).await,
            Strategy::Ssr(s) => s.execute(backend, persona, concept, price).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{EmbeddingOutput, GenerateRequest, Generation};
    use crate::ssr::{anchor_sets, Rating};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    /// Replays scripted generations and records every request it saw.
    struct ScriptedBackend {
        replies: Mutex<VecDeque<String>>,
        seen: Mutex<Vec<GenerateRequest>>,
    }

    impl ScriptedBackend {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Backend for ScriptedBackend {
        fn model(&self) -> &str {
            "scripted"
        }

        async fn generate_text(&self, request: &GenerateRequest) -> Result<Generation, BackendError> {
            self.seen.lock().await.push(request.clone());
            let text = self.replies.lock().await.pop_front().unwrap_or_default();
            Ok(Generation::text(text))
        }

        async fn embed_text(&self, text: &str) -> Result<EmbeddingOutput, BackendError> {
            // enthusiastic text lands on the last axis, anything else on an axis picked by length
            let v = if text.contains("definitely would buy") || text.contains("love") {
                vec![0.0, 0.0, 0.0, 0.0, 1.0]
            } else {
                let mut v = vec![0.0; 5];
                v[text.len() % 5] = 1.0;
                v
            };
            Ok(EmbeddingOutput { embedding: v, tokens: None })
        }
    }

    fn inputs() -> (Persona, ProductConcept, PricePoint) {
        let concept = ProductConcept {
            id: Some("c1".into()),
            name: "Refill Razor".into(),
            category: "Grooming".into(),
            description: "Aluminium razor with blade subscription.".into(),
            features: vec![],
            claims: vec![],
            positioning: None,
        };
        (Persona::preset("minimalist-men").unwrap(), concept, PricePoint::subscription(12.0))
    }

    #[tokio::test]
    async fn test_dlr_retry_then_valid() {
        let backend = ScriptedBackend::new(&["I think so", "4"]);
        let (p, c, pr) = inputs();
        let outcome = DlrStrategy::default().execute(&backend, &p, &c, &pr).await.unwrap();

        assert_eq!(outcome.pmf, LikertPmf::one_hot(Rating::new(4).unwrap()));
        assert!(!outcome.fell_back);

        let seen = backend.seen.lock().await;
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].temperature, Some(0.3));
        assert_eq!(seen[0].max_tokens, Some(5));
        assert!(seen[1].user.ends_with("Output ONLY a single digit 1-5:"));
        assert_eq!(seen[1].max_tokens, Some(3));
        assert_eq!(seen[1].temperature, Some(0.1));
    }

    #[tokio::test]
    async fn test_dlr_falls_back_to_neutral() {
        let backend = ScriptedBackend::new(&["banana", "seven"]);
        let (p, c, pr) = inputs();
        let outcome = DlrStrategy::default().execute(&backend, &p, &c, &pr).await.unwrap();
        assert_eq!(outcome.pmf, LikertPmf::one_hot(Rating::NEUTRAL));
        assert!(outcome.fell_back);
        assert!(outcome.rationale.is_none());
    }

    #[tokio::test]
    async fn test_flr_two_stages() {
        let backend = ScriptedBackend::new(&["Pricey, but I'd try one month.", "4"]);
        let (p, c, pr) = inputs();
        let outcome = FlrStrategy::default().execute(&backend, &p, &c, &pr).await.unwrap();

        assert_eq!(outcome.pmf.mode().value(), 4);
        assert_eq!(outcome.rationale.as_deref(), Some("Pricey, but I'd try one month."));

        let seen = backend.seen.lock().await;
        assert_eq!(seen[0].temperature, Some(0.7));
        assert_eq!(seen[0].max_tokens, Some(150));
        assert!(seen[1].user.contains("Pricey, but I'd try one month."));
        assert_eq!(seen[1].temperature, Some(0.2));
    }

    #[tokio::test]
    async fn test_ssr_produces_soft_pmf() {
        let backend = ScriptedBackend::new(&["I love it and definitely would buy it."]);
        let config = PipelineConfig::default();
        let anchors = compute_anchor_embeddings(&backend, anchor_sets(2)).await.unwrap();
        assert_eq!(anchors.len(), 2);

        let strategy = Strategy::from_config(&config, Some(Arc::new(anchors))).unwrap();
        assert_eq!(strategy.method(), Method::Ssr);

        let (p, c, pr) = inputs();
        let outcome = strategy.execute(&backend, &p, &c, &pr).await.unwrap();
        assert!(outcome.pmf.is_valid());
        assert!(outcome.rationale.is_some());
        assert!(!outcome.fell_back);
    }

    #[tokio::test]
    async fn test_blank_text_is_asked_again() {
        let backend = ScriptedBackend::new(&["  \n", "Worth it for the refills.", "5"]);
        let (p, c, pr) = inputs();
        let outcome = FlrStrategy::default().execute(&backend, &p, &c, &pr).await.unwrap();

        assert_eq!(outcome.rationale.as_deref(), Some("Worth it for the refills."));
        assert_eq!(outcome.pmf.mode().value(), 5);
        let seen = backend.seen.lock().await;
        assert_eq!(seen.len(), 3);
        assert!(seen[2].user.contains("Worth it for the refills."));
    }

    #[tokio::test]
    async fn test_blank_text_twice_drops_the_sample() {
        let (p, c, pr) = inputs();

        let backend = ScriptedBackend::new(&["", ""]);
        let err = FlrStrategy::default().execute(&backend, &p, &c, &pr).await.unwrap_err();
        assert!(matches!(err, BackendError::EmptyContent("flr_text")));
        // the rating stage never sees an empty quote
        assert_eq!(backend.seen.lock().await.len(), 2);

        let backend = ScriptedBackend::new(&["", ""]);
        let anchors = compute_anchor_embeddings(&backend, anchor_sets(1)).await.unwrap();
        let strategy = Strategy::from_config(&PipelineConfig::default(), Some(Arc::new(anchors))).unwrap();
        let err = strategy.execute(&backend, &p, &c, &pr).await.unwrap_err();
        assert!(matches!(err, BackendError::EmptyContent("ssr_text")));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_ssr_without_anchors_is_config_error() {
        let config = PipelineConfig::default();
        assert_eq!(
            Strategy::from_config(&config, None).unwrap_err(),
            ConfigError::MissingAnchorEmbeddings
        );
        assert!(Strategy::from_config(&config, Some(Arc::new(Vec::new()))).is_err());

        let mut dlr = config.clone();
        dlr.method = Method::Dlr;
        assert_eq!(Strategy::from_config(&dlr, None).unwrap().method(), Method::Dlr);
    }
}
