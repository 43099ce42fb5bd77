use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::{Method, PipelineConfig};
use crate::error::GuardrailError;

/// USD per million input tokens.
pub const INPUT_PRICE_PER_M: f64 = 1.75;
/// USD per million output tokens.
pub const OUTPUT_PRICE_PER_M: f64 = 14.0;
/// USD per million embedding tokens.
pub const EMBEDDING_PRICE_PER_M: f64 = 0.02;
/// Fraction of the cap past which a run is reported as at risk.
pub const AT_RISK_RATIO: f64 = 0.8;

pub const DRY_RUN_RESPONDENTS: usize = 10;
pub const DRY_RUN_SAMPLES: usize = 1;

const LARGE_RUN_CREDITS: u64 = 50;

/// Billing abstraction: runs are charged per respondent-equivalent,
/// whatever the method.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CreditEconomics {
    pub respondents_per_credit: u64,
    pub api_cost_per_credit: f64,
    pub overage_price: f64,
}

impl Default for CreditEconomics {
    fn default() -> Self {
        Self {
            respondents_per_credit: 100,
            api_cost_per_credit: 0.44,
            overage_price: 2.50,
        }
    }
}

impl CreditEconomics {
    pub fn credits_needed(&self, total_respondents: u64) -> u64 {
        total_respondents.div_ceil(self.respondents_per_credit.max(1))
    }
}

/// `ceil(n / 100)` under the default economics.
pub fn calculate_credits_needed(total_respondents: u64) -> u64 {
    CreditEconomics::default().credits_needed(total_respondents)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub credits_needed: u64,
    pub api_cost_usd: f64,
    pub respondents: u64,
    pub samples_per_respondent: u64,
    pub method: Method,
    pub calls_per_sample: u64,
    pub total_calls: u64,
    pub warning: Option<String>,
}

pub fn estimate_cost(n_respondents: u64, samples_per_respondent: u64, method: Method) -> CostEstimate {
    let economics = CreditEconomics::default();
    let credits_needed = economics.credits_needed(n_respondents);
    let api_cost_usd = credits_needed as f64 * economics.api_cost_per_credit;
    let calls_per_sample = method.calls_per_sample();

    let warning = (credits_needed > LARGE_RUN_CREDITS)
        .then(|| format!("Large run: {} credits (~${:.2} API cost)", credits_needed, api_cost_usd));

    CostEstimate {
        credits_needed,
        api_cost_usd,
        respondents: n_respondents,
        samples_per_respondent,
        method,
        calls_per_sample,
        total_calls: n_respondents
            .saturating_mul(samples_per_respondent)
            .saturating_mul(calls_per_sample),
        warning,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditCheck {
    pub overage_credits: u64,
    pub overage_cost_usd: f64,
    pub reason: Option<String>,
}

/// Allowed runs come back as `Ok`, possibly with an overage note; a
/// shortfall without overage is a guardrail violation.
pub fn check_credit_sufficiency(
    credits_needed: u64,
    credits_available: u64,
    overage_enabled: bool,
) -> Result<CreditCheck, GuardrailError> {
    if credits_needed <= credits_available {
        return Ok(CreditCheck {
            overage_credits: 0,
            overage_cost_usd: 0.0,
            reason: None,
        });
    }

    if overage_enabled {
        let overage = credits_needed - credits_available;
        let cost = overage as f64 * CreditEconomics::default().overage_price;
        return Ok(CreditCheck {
            overage_credits: overage,
            overage_cost_usd: cost,
            reason: Some(format!("Will use {} overage credits (${:.2})", overage, cost)),
        });
    }

    Err(GuardrailError::InsufficientCredits {
        needed: credits_needed,
        available: credits_available,
    })
}

/// Clamps respondent and sample counts; never raises them.
pub fn apply_dry_run_limits(mut config: PipelineConfig) -> PipelineConfig {
    config.n_respondents = config.n_respondents.min(DRY_RUN_RESPONDENTS);
    config.n_samples_per_respondent = config.n_samples_per_respondent.min(DRY_RUN_SAMPLES);
    config
}

/// Live spend for one run. Clones share the same counters.
#[derive(Debug, Clone)]
pub struct CostTracker {
    calls_completed: Arc<AtomicU64>,
    input_tokens: Arc<AtomicU64>,
    output_tokens: Arc<AtomicU64>,
    embedding_tokens: Arc<AtomicU64>,
    credits_used: Arc<AtomicU64>,
    cost_cap_usd: Option<f64>,
    start_time: std::time::Instant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostStats {
    pub duration_ms: u64,
    pub calls_completed: u64,
    pub credits_used: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub embedding_tokens: u64,
    pub estimated_cost_usd: f64,
    pub cost_cap_usd: Option<f64>,
    pub at_risk: bool,
}

impl CostTracker {
    pub fn new(cost_cap_usd: Option<f64>) -> Self {
        Self {
            calls_completed: Arc::new(AtomicU64::new(0)),
            input_tokens: Arc::new(AtomicU64::new(0)),
            output_tokens: Arc::new(AtomicU64::new(0)),
            embedding_tokens: Arc::new(AtomicU64::new(0)),
            credits_used: Arc::new(AtomicU64::new(0)),
            cost_cap_usd,
            start_time: std::time::Instant::now(),
        }
    }

    pub fn record_call(&self, input_tokens: u64, output_tokens: u64) {
        self.calls_completed.fetch_add(1, Ordering::SeqCst);
        self.input_tokens.fetch_add(input_tokens, Ordering::SeqCst);
        self.output_tokens.fetch_add(output_tokens, Ordering::SeqCst);
    }

    pub fn record_embedding(&self, tokens: u64) {
        self.calls_completed.fetch_add(1, Ordering::SeqCst);
        self.embedding_tokens.fetch_add(tokens, Ordering::SeqCst);
    }

    pub fn record_credits(&self, credits: u64) {
        self.credits_used.fetch_add(credits, Ordering::SeqCst);
    }

    pub fn projected_cost_usd(&self) -> f64 {
        let per_m = |n: &AtomicU64, price: f64| n.load(Ordering::SeqCst) as f64 / 1_000_000.0 * price;
        per_m(&self.input_tokens, INPUT_PRICE_PER_M)
            + per_m(&self.output_tokens, OUTPUT_PRICE_PER_M)
            + per_m(&self.embedding_tokens, EMBEDDING_PRICE_PER_M)
    }

    /// True once projected spend is past the cap. Checked before any new
    /// work is launched.
    pub fn should_stop(&self) -> bool {
        match self.cost_cap_usd {
            Some(cap) => self.projected_cost_usd() > cap,
            None => false,
        }
    }

    /// The guardrail violation to report when [`should_stop`](Self::should_stop) fires.
    pub fn violation(&self) -> Option<GuardrailError> {
        let cap = self.cost_cap_usd?;
        let projected = self.projected_cost_usd();
        (projected > cap).then_some(GuardrailError::CostCapExceeded {
            projected_usd: projected,
            cap_usd: cap,
        })
    }

    pub fn stats(&self) -> CostStats {
        let projected = self.projected_cost_usd();
        CostStats {
            duration_ms: self.start_time.elapsed().as_millis() as u64,
            calls_completed: self.calls_completed.load(Ordering::SeqCst),
            credits_used: self.credits_used.load(Ordering::SeqCst),
            input_tokens: self.input_tokens.load(Ordering::SeqCst),
            output_tokens: self.output_tokens.load(Ordering::SeqCst),
            embedding_tokens: self.embedding_tokens.load(Ordering::SeqCst),
            estimated_cost_usd: projected,
            cost_cap_usd: self.cost_cap_usd,
            at_risk: self.cost_cap_usd.is_some_and(|cap| projected > cap * AT_RISK_RATIO),
        }
    }
}

impl Default for CostTracker {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credit_rule() {
        assert_eq!(calculate_credits_needed(1), 1);
        assert_eq!(calculate_credits_needed(100), 1);
        assert_eq!(calculate_credits_needed(101), 2);
        assert_eq!(calculate_credits_needed(250), 3);
        assert_eq!(calculate_credits_needed(0), 0);
    }

    #[test]
    fn test_estimate_cost_warning() {
        let small = estimate_cost(200, 2, Method::Ssr);
        assert_eq!(small.credits_needed, 2);
        assert_eq!(small.total_calls, 800);
        assert!(small.warning.is_none());

        let large = estimate_cost(6000, 2, Method::Dlr);
        assert_eq!(large.credits_needed, 60);
        assert_eq!(large.total_calls, 12_000);
        assert_eq!(large.warning.as_deref(), Some("Large run: 60 credits (~$26.40 API cost)"));
    }

    #[test]
    fn test_credit_sufficiency() {
        assert!(check_credit_sufficiency(3, 5, false).unwrap().reason.is_none());

        let overage = check_credit_sufficiency(7, 5, true).unwrap();
        assert_eq!(overage.overage_credits, 2);
        assert_eq!(overage.reason.as_deref(), Some("Will use 2 overage credits ($5.00)"));

        let err = check_credit_sufficiency(7, 5, false).unwrap_err();
        assert_eq!(err.to_string(), "Insufficient credits: need 7, have 5");
    }

    #[test]
    fn test_tracker_cap_and_risk() {
        let tracker = CostTracker::new(Some(0.01));
        assert!(!tracker.should_stop());

        // 1000 output tokens = $0.014
        tracker.record_call(0, 600);
        let stats = tracker.stats();
        assert!(stats.at_risk);
        assert!(!tracker.should_stop());

        let shared = tracker.clone();
        shared.record_call(0, 400);
        assert!(tracker.should_stop());
        assert!(matches!(tracker.violation(), Some(GuardrailError::CostCapExceeded { .. })));
        assert_eq!(tracker.stats().calls_completed, 2);
    }

    #[test]
    fn test_no_cap_never_stops() {
        let tracker = CostTracker::default();
        tracker.record_call(10_000_000, 10_000_000);
        assert!(!tracker.should_stop());
        assert!(!tracker.stats().at_risk);
        assert!(tracker.violation().is_none());
    }

    #[test]
    fn test_dry_run_only_clamps() {
        let mut config = PipelineConfig::default();
        config.n_respondents = 500;
        config.n_samples_per_respondent = 5;
        let clamped = apply_dry_run_limits(config.clone());
        assert_eq!(clamped.n_respondents, 10);
        assert_eq!(clamped.n_samples_per_respondent, 1);

        config.n_respondents = 3;
        assert_eq!(apply_dry_run_limits(config).n_respondents, 3);
    }
}
