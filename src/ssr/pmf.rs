//! Likert probability mass functions.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const LIKERT_POINTS: usize = 5;

/// Tolerance used when validating that a PMF sums to one.
pub const SUM_TOLERANCE: f64 = 1e-9;

/// A single rating on the 1..=5 purchase-intent scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Rating(u8);

impl Rating {
    /// "Might or might not buy". Used as the safe default when a rating
    /// stage cannot be parsed.
    pub const NEUTRAL: Rating = Rating(3);

    pub fn new(value: u8) -> Option<Self> {
        (1..=5).contains(&value).then_some(Rating(value))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn index(self) -> usize {
        (self.0 - 1) as usize
    }
}

impl TryFrom<u8> for Rating {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Rating::new(value).ok_or_else(|| format!("rating {} outside 1..=5", value))
    }
}

impl From<Rating> for u8 {
    fn from(r: Rating) -> u8 {
        r.0
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Distribution over the five Likert points. Index `i` is rating `i + 1`.
///
/// Every constructor upholds the invariant: five finite non-negative
/// entries summing to one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f64; 5]", into = "[f64; 5]")]
pub struct LikertPmf([f64; LIKERT_POINTS]);

impl LikertPmf {
    pub fn uniform() -> Self {
        LikertPmf([1.0 / LIKERT_POINTS as f64; LIKERT_POINTS])
    }

    pub fn one_hot(rating: Rating) -> Self {
        let mut p = [0.0; LIKERT_POINTS];
        p[rating.index()] = 1.0;
        LikertPmf(p)
    }

    /// Validates an explicit distribution.
    pub fn new(values: [f64; LIKERT_POINTS]) -> Result<Self, String> {
        if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(format!("PMF entries must be finite and non-negative: {:?}", values));
        }
        let sum: f64 = values.iter().sum();
        if (sum - 1.0).abs() > SUM_TOLERANCE {
            return Err(format!("PMF must sum to 1, got {}", sum));
        }
        Ok(LikertPmf(values))
    }

    /// Normalises arbitrary weights. Degenerate input (all zero, negative
    /// total or non-finite) yields the uniform distribution.
    pub fn from_weights(weights: [f64; LIKERT_POINTS]) -> Self {
        let clean = weights.map(|w| if w.is_finite() && w > 0.0 { w } else { 0.0 });
        let sum: f64 = clean.iter().sum();
        if sum <= 0.0 || !sum.is_finite() {
            return Self::uniform();
        }
        LikertPmf(clean.map(|w| w / sum))
    }

    /// Element-wise arithmetic mean. An empty slice yields the uniform PMF.
    pub fn mean(pmfs: &[LikertPmf]) -> Self {
        if pmfs.is_empty() {
            return Self::uniform();
        }
        let mut acc = [0.0; LIKERT_POINTS];
        for pmf in pmfs {
            for (a, p) in acc.iter_mut().zip(pmf.0.iter()) {
                *a += p;
            }
        }
        let n = pmfs.len() as f64;
        // re-normalise to absorb floating-point drift
        Self::from_weights(acc.map(|a| a / n))
    }

    pub fn probabilities(&self) -> &[f64; LIKERT_POINTS] {
        &self.0
    }

    pub fn get(&self, rating: Rating) -> f64 {
        self.0[rating.index()]
    }

    /// Index of the most likely rating (first one on ties).
    pub fn mode(&self) -> Rating {
        let mut best = 0;
        for i in 1..LIKERT_POINTS {
            if self.0[i] > self.0[best] {
                best = i;
            }
        }
        Rating(best as u8 + 1)
    }

    /// Σ p(r) · r
    pub fn expected_likert(&self) -> f64 {
        self.0.iter().enumerate().map(|(i, p)| p * (i + 1) as f64).sum()
    }

    /// P(r ∈ {4, 5})
    pub fn top2_box(&self) -> f64 {
        self.0[3] + self.0[4]
    }

    /// P(r ∈ {1, 2})
    pub fn bottom2_box(&self) -> f64 {
        self.0[0] + self.0[1]
    }

    /// Shannon entropy in bits; zero-probability terms contribute nothing.
    pub fn entropy(&self) -> f64 {
        -self
            .0
            .iter()
            .filter(|p| **p > 0.0)
            .map(|p| p * p.log2())
            .sum::<f64>()
    }

    pub fn is_valid(&self) -> bool {
        Self::new(self.0).is_ok()
    }
}

impl Default for LikertPmf {
    fn default() -> Self {
        Self::uniform()
    }
}

impl TryFrom<[f64; LIKERT_POINTS]> for LikertPmf {
    type Error = String;

    fn try_from(values: [f64; LIKERT_POINTS]) -> Result<Self, Self::Error> {
        LikertPmf::new(values)
    }
}

impl From<LikertPmf> for [f64; LIKERT_POINTS] {
    fn from(pmf: LikertPmf) -> Self {
        pmf.0
    }
}

/// Summary statistics derived from an aggregate PMF.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PmfMetrics {
    pub expected_likert: f64,
    pub top2_box: f64,
    pub bottom2_box: f64,
    pub entropy: f64,
}

impl From<&LikertPmf> for PmfMetrics {
    fn from(pmf: &LikertPmf) -> Self {
        Self {
            expected_likert: pmf.expected_likert(),
            top2_box: pmf.top2_box(),
            bottom2_box: pmf.bottom2_box(),
            entropy: pmf.entropy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rating_bounds() {
        assert!(Rating::new(0).is_none());
        assert!(Rating::new(6).is_none());
        assert_eq!(Rating::new(5).unwrap().index(), 4);
    }

    #[test]
    fn test_one_hot_metrics() {
        let pmf = LikertPmf::one_hot(Rating::new(5).unwrap());
        assert_eq!(pmf.probabilities(), &[0.0, 0.0, 0.0, 0.0, 1.0]);
        assert_eq!(pmf.top2_box(), 1.0);
        assert_eq!(pmf.bottom2_box(), 0.0);
        assert_eq!(pmf.expected_likert(), 5.0);
        assert_eq!(pmf.entropy(), 0.0);
    }

    #[test]
    fn test_uniform_entropy() {
        let pmf = LikertPmf::uniform();
        assert!((pmf.entropy() - 5f64.log2()).abs() < 1e-12);
        assert!((pmf.expected_likert() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_from_weights_degenerate() {
        assert_eq!(LikertPmf::from_weights([0.0; 5]), LikertPmf::uniform());
        assert_eq!(LikertPmf::from_weights([f64::NAN; 5]), LikertPmf::uniform());
        let pmf = LikertPmf::from_weights([1.0, 1.0, 0.0, 0.0, 2.0]);
        assert_eq!(pmf.probabilities(), &[0.25, 0.25, 0.0, 0.0, 0.5]);
    }

    #[test]
    fn test_mean_of_identical_is_identity() {
        let pmf = LikertPmf::new([0.1, 0.2, 0.3, 0.25, 0.15]).unwrap();
        let avg = LikertPmf::mean(&vec![pmf; 7]);
        for (a, b) in avg.probabilities().iter().zip(pmf.probabilities()) {
            assert!((a - b).abs() < 1e-12);
        }
        assert_eq!(LikertPmf::mean(&[]), LikertPmf::uniform());
    }

    #[test]
    fn test_rejects_invalid() {
        assert!(LikertPmf::new([0.5, 0.5, 0.5, 0.0, 0.0]).is_err());
        assert!(LikertPmf::new([-0.1, 0.3, 0.3, 0.3, 0.2]).is_err());
        assert!(serde_json::from_str::<LikertPmf>("[0.2,0.2,0.2,0.2,0.3]").is_err());
    }

    #[test]
    fn test_serde_as_array() {
        let pmf = LikertPmf::one_hot(Rating::NEUTRAL);
        let json = serde_json::to_string(&pmf).unwrap();
        assert_eq!(json, "[0.0,0.0,1.0,0.0,0.0]");
    }
}
