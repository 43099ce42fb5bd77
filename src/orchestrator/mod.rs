//! Orchestrator Module
//!
//! Runs simulations end to end: cost guardrails, batched task execution,
//! aggregation and price-curve studies.

pub mod aggregation;
pub mod budget;
pub mod pricing;
pub mod runner;

pub use aggregation::{aggregate_pmfs, bootstrap_confidence, ConfidenceInterval};
pub use budget::{
    apply_dry_run_limits, calculate_credits_needed, check_credit_sufficiency, estimate_cost, CostEstimate, CostStats,
    CostTracker, CreditCheck, CreditEconomics,
};
pub use pricing::{detect_price_cliffs, simulate_price_curve, CreditBalance, PriceCliff, PriceCurve, PricePointResult};
pub use runner::{
    run_pipeline, PipelineRunner, Progress, ProgressCallback, RespondentResult, RunState, SimulationResult,
    TaskFailure, TaskSummary,
};
