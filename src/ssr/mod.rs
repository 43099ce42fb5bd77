//! Semantic Similarity Rating
//!
//! Converts the embedding of a free-text purchase-intent answer into a soft
//! Likert distribution by comparing it with anchor statements, one per
//! rating level. Pure numeric code: no I/O, no shared state.

pub mod anchors;
pub mod pmf;

pub use anchors::{anchor_sets, AnchorSetText, ANCHOR_SETS};
pub use pmf::{LikertPmf, PmfMetrics, Rating, LIKERT_POINTS};

use serde::{Deserialize, Serialize};

pub type Embedding = Vec<f64>;

/// Embeddings of one anchor set, ordered by Likert level.
pub type AnchorSet = [Embedding; LIKERT_POINTS];

/// Floor applied before temperature scaling so zero bins stay representable.
const TEMPERATURE_FLOOR: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SsrParams {
    /// Mass added to the least similar anchor so no rating is impossible.
    pub epsilon: f64,
    /// `T > 1` flattens, `T < 1` sharpens, `T == 1` leaves weights alone.
    pub temperature: f64,
}

impl Default for SsrParams {
    fn default() -> Self {
        Self {
            epsilon: 0.01,
            temperature: 1.0,
        }
    }
}

/// Cosine similarity. Zero-norm, empty or length-mismatched inputs are
/// treated as fully dissimilar (0).
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// PMF against a single anchor set.
///
/// Similarities are shifted so the worst-matching anchor sits at zero, that
/// anchor receives `epsilon`, the result is optionally tempered with
/// `w^(1/T)` and finally normalised.
pub fn pmf_for_anchor_set(response: &[f64], anchors: &AnchorSet, params: &SsrParams) -> LikertPmf {
    let sims: [f64; LIKERT_POINTS] = std::array::from_fn(|i| cosine_similarity(response, &anchors[i]));

    let mut min_idx = 0;
    for i in 1..LIKERT_POINTS {
        if sims[i] < sims[min_idx] {
            min_idx = i;
        }
    }
    let min_sim = sims[min_idx];

    let mut weights: [f64; LIKERT_POINTS] = std::array::from_fn(|i| {
        let shifted = sims[i] - min_sim;
        if i == min_idx {
            shifted + params.epsilon
        } else {
            shifted
        }
    });

    if params.temperature != 1.0 {
        let exponent = 1.0 / params.temperature;
        weights = weights.map(|w| w.max(TEMPERATURE_FLOOR).powf(exponent));
    }

    LikertPmf::from_weights(weights)
}

/// Mean of the per-set PMFs. No anchor sets yields the uniform PMF.
pub fn pmf_average(response: &[f64], anchor_sets: &[AnchorSet], params: &SsrParams) -> LikertPmf {
    let per_set: Vec<LikertPmf> = anchor_sets
        .iter()
        .map(|set| pmf_for_anchor_set(response, set, params))
        .collect();
    LikertPmf::mean(&per_set)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(dim: usize, hot: usize) -> Embedding {
        let mut v = vec![0.0; dim];
        v[hot] = 1.0;
        v
    }

    fn orthogonal_set() -> AnchorSet {
        std::array::from_fn(|i| unit(8, i))
    }

    fn assert_valid(pmf: &LikertPmf) {
        let sum: f64 = pmf.probabilities().iter().sum();
        assert!((sum - 1.0).abs() < 1e-9, "sum was {}", sum);
        assert!(pmf.probabilities().iter().all(|p| *p >= 0.0));
    }

    #[test]
    fn test_cosine_edge_cases() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert!((cosine_similarity(&[1.0, 1.0], &[2.0, 2.0]) - 1.0).abs() < 1e-12);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_identical_to_top_anchor_peaks_at_five() {
        let anchors = orthogonal_set();
        let pmf = pmf_for_anchor_set(&unit(8, 4), &anchors, &SsrParams::default());
        assert_valid(&pmf);
        assert_eq!(pmf.mode(), Rating::new(5).unwrap());
    }

    #[test]
    fn test_epsilon_keeps_min_bin_positive() {
        let anchors = orthogonal_set();
        let response = vec![0.9, 0.5, 0.3, -0.4, 0.1, 0.0, 0.0, 0.0];
        let pmf = pmf_for_anchor_set(&response, &anchors, &SsrParams { epsilon: 0.01, temperature: 1.0 });
        // anchor 4 (index 3) is the least similar
        assert!(pmf.probabilities()[3] > 0.0);

        let no_eps = pmf_for_anchor_set(&response, &anchors, &SsrParams { epsilon: 0.0, temperature: 1.0 });
        assert_eq!(no_eps.probabilities()[3], 0.0);
    }

    #[test]
    fn test_temperature_increases_entropy() {
        let anchors = orthogonal_set();
        let response = vec![0.9, 0.5, 0.3, -0.4, 0.1, 0.0, 0.0, 0.0];
        let mut last = -1.0;
        for t in [0.5, 1.0, 2.0, 4.0, 8.0] {
            let pmf = pmf_for_anchor_set(&response, &anchors, &SsrParams { epsilon: 0.01, temperature: t });
            assert_valid(&pmf);
            let h = pmf.entropy();
            assert!(h >= last - 1e-12, "entropy decreased at T={}: {} < {}", t, h, last);
            last = h;
        }
    }

    #[test]
    fn test_empty_anchor_sets_uniform() {
        let pmf = pmf_average(&[1.0, 0.0], &[], &SsrParams::default());
        assert_eq!(pmf, LikertPmf::uniform());
    }

    #[test]
    fn test_average_is_order_independent() {
        let a = orthogonal_set();
        let b: AnchorSet = std::array::from_fn(|i| {
            let mut v = unit(8, i);
            v[7] = 0.3 * i as f64;
            v
        });
        let c: AnchorSet = std::array::from_fn(|i| unit(8, 4 - i));
        let response = vec![0.2, 0.1, 0.7, 0.4, 0.9, 0.0, 0.1, 0.3];
        let params = SsrParams::default();

        let forward = pmf_average(&response, &[a.clone(), b.clone(), c.clone()], &params);
        let reversed = pmf_average(&response, &[c, a, b], &params);
        for (x, y) in forward.probabilities().iter().zip(reversed.probabilities()) {
            assert!((x - y).abs() < 1e-12);
        }
    }

    #[test]
    fn test_zero_embedding_stays_valid() {
        let anchors = orthogonal_set();
        let pmf = pmf_for_anchor_set(&[0.0; 8], &anchors, &SsrParams::default());
        assert_valid(&pmf);
        let pmf = pmf_for_anchor_set(&[0.0; 8], &anchors, &SsrParams { epsilon: 0.0, temperature: 1.0 });
        assert_eq!(pmf, LikertPmf::uniform());
    }
}
