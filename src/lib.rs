//! Purchase-intent simulation
//!
//! Estimates how a consumer audience would respond to a product concept at a
//! price point by eliciting 1-5 Likert ratings from a language model and
//! aggregating them into a probability mass function:
//! - Three elicitation methods (direct rating, free-text then rating, and
//!   semantic similarity rating against anchor statements)
//! - Sliding-window rate limiting with per-stage concurrency pools
//! - Response and embedding caching
//! - Cost guardrails, bootstrap confidence intervals and price-cliff detection

pub mod backend;
pub mod config;
pub mod domain;
pub mod error;
pub mod orchestrator;
pub mod safety;
pub mod ssr;
pub mod strategy;
pub mod utils;

// Re-exports for convenience
pub use backend::{Backend, CacheManager, OpenAIBackend};
pub use config::{Method, PipelineConfig, PipelineOverrides};
pub use domain::{Persona, PricePoint, ProductConcept, PurchaseType};
pub use error::{BackendError, ConfigError, GuardrailError, PipelineError};
pub use orchestrator::{run_pipeline, simulate_price_curve, PipelineRunner, SimulationResult};
pub use ssr::LikertPmf;
