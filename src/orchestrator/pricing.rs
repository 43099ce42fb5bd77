//! Price-curve study
//!
//! Runs the same audience and concept across several price points and looks
//! for the steps where purchase intent falls off.

use serde::Serialize;
use tracing::{info, warn};

use super::budget::{calculate_credits_needed, check_credit_sufficiency, CreditCheck};
use super::runner::{PipelineRunner, ProgressCallback, SimulationResult};
use crate::config::PipelineOverrides;
use crate::domain::{Persona, PricePoint, ProductConcept};
use crate::error::{ConfigError, PipelineError};

pub const DEFAULT_CLIFF_THRESHOLD: f64 = 0.1;

/// Credits the caller holds; checked before any backend call when given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditBalance {
    pub available: u64,
    pub overage_enabled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PricePointResult {
    pub price: PricePoint,
    pub result: SimulationResult,
}

/// Consecutive price pair whose top-2-box dropped by more than the threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceCliff {
    pub from_price: f64,
    pub to_price: f64,
    pub drop: f64,
    /// Drop relative to the lower price's top-2-box.
    pub percent_drop: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PriceCurve {
    pub points: Vec<PricePointResult>,
    pub credits_needed: u64,
    pub credit_check: Option<CreditCheck>,
    pub cliffs: Vec<PriceCliff>,
}

/// Runs one simulation per price point, in order. Anchor embeddings are
/// computed by the first SSR run and served from the runner's cache after
/// that, so give the runner a cache for multi-point SSR studies.
pub async fn simulate_price_curve(
    runner: &PipelineRunner,
    persona: &Persona,
    concept: &ProductConcept,
    prices: &[PricePoint],
    overrides: PipelineOverrides,
    credits: Option<CreditBalance>,
    progress: Option<ProgressCallback>,
) -> Result<PriceCurve, PipelineError> {
    if prices.is_empty() {
        return Err(ConfigError::Invalid {
            field: "price_points",
            reason: "at least one price point is required".into(),
        }
        .into());
    }

    let config = PipelineRunner::configure(overrides)?;
    let credits_needed = calculate_credits_needed((config.n_respondents * prices.len()) as u64);

    let credit_check = match credits {
        Some(balance) => {
            let check = check_credit_sufficiency(credits_needed, balance.available, balance.overage_enabled)?;
            if let Some(ref reason) = check.reason {
                warn!("{}", reason);
            }
            Some(check)
        }
        None => None,
    };

    if runner.cache().is_none() && prices.len() > 1 {
        warn!("Price curve without a shared cache recomputes anchors for every point");
    }

    let mut points = Vec::with_capacity(prices.len());
    for (i, price) in prices.iter().enumerate() {
        info!("Price point {}/{}: {}", i + 1, prices.len(), price.display_price());
        let result = runner
            .run_with_config(config.clone(), persona, concept, price, progress.clone())
            .await?;
        points.push(PricePointResult {
            price: price.clone(),
            result,
        });
    }

    let cliffs = detect_price_cliffs(&points, DEFAULT_CLIFF_THRESHOLD);
    if !cliffs.is_empty() {
        info!("Detected {} price cliff(s)", cliffs.len());
    }

    Ok(PriceCurve {
        points,
        credits_needed,
        credit_check,
        cliffs,
    })
}

/// Sorts by price and reports every consecutive pair whose top-2-box falls
/// by strictly more than `threshold`.
pub fn detect_price_cliffs(points: &[PricePointResult], threshold: f64) -> Vec<PriceCliff> {
    let mut curve: Vec<(f64, f64)> = points
        .iter()
        .map(|p| (p.price.price, p.result.metrics.top2_box))
        .collect();
    curve.sort_by(|a, b| a.0.total_cmp(&b.0));

    curve
        .windows(2)
        .filter_map(|pair| {
            let (from_price, from_t2b) = pair[0];
            let (to_price, to_t2b) = pair[1];
            let drop = from_t2b - to_t2b;
            (drop > threshold).then(|| PriceCliff {
                from_price,
                to_price,
                drop,
                percent_drop: drop / from_t2b,
            })
        })
        .collect()
}
