use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::ssr::LikertPmf;

pub const DEFAULT_BOOTSTRAP_SAMPLES: usize = 1000;
pub const DEFAULT_CONFIDENCE_LEVEL: f64 = 0.95;

/// Unweighted element-wise mean; every input counts once.
pub fn aggregate_pmfs(pmfs: &[LikertPmf]) -> LikertPmf {
    LikertPmf::mean(pmfs)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
}

/// Percentile bootstrap of top-2-box over respondent-level PMFs.
///
/// Each of `n_bootstrap` rounds draws `pmfs.len()` PMFs with replacement,
/// averages them and records the top-2-box. The bounds are the empirical
/// `(1 - level) / 2` and `1 - (1 - level) / 2` quantiles.
pub fn bootstrap_confidence<R: Rng + ?Sized>(
    pmfs: &[LikertPmf],
    level: f64,
    n_bootstrap: usize,
    rng: &mut R,
) -> ConfidenceInterval {
    if pmfs.is_empty() || n_bootstrap == 0 {
        return ConfidenceInterval { lower: 0.0, upper: 0.0 };
    }

    let n = pmfs.len();
    let mut top2: Vec<f64> = (0..n_bootstrap)
        .map(|_| {
            let sum: f64 = (0..n).map(|_| pmfs[rng.gen_range(0..n)].top2_box()).sum();
            sum / n as f64
        })
        .collect();
    top2.sort_by(|a, b| a.total_cmp(b));

    let alpha = 1.0 - level.clamp(0.0, 1.0);
    let index = |q: f64| ((n_bootstrap as f64 * q).floor() as usize).min(n_bootstrap - 1);

    ConfidenceInterval {
        lower: top2[index(alpha / 2.0)],
        upper: top2[index(1.0 - alpha / 2.0)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssr::Rating;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_mean_of_identical_is_unchanged() {
        let pmf = LikertPmf::new([0.05, 0.15, 0.3, 0.3, 0.2]).unwrap();
        let agg = aggregate_pmfs(&vec![pmf; 12]);
        for (a, b) in agg.probabilities().iter().zip(pmf.probabilities()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_bootstrap_constant_input_collapses() {
        let mut rng = StdRng::seed_from_u64(7);
        let pmf = LikertPmf::one_hot(Rating::new(5).unwrap());
        let ci = bootstrap_confidence(&vec![pmf; 20], 0.95, 500, &mut rng);
        assert_eq!(ci, ConfidenceInterval { lower: 1.0, upper: 1.0 });
    }

    #[test]
    fn test_bootstrap_brackets_mean() {
        let mut rng = StdRng::seed_from_u64(42);
        let yes = LikertPmf::one_hot(Rating::new(4).unwrap());
        let no = LikertPmf::one_hot(Rating::new(2).unwrap());
        let pmfs: Vec<LikertPmf> = (0..100).map(|i| if i % 2 == 0 { yes } else { no }).collect();

        let ci = bootstrap_confidence(&pmfs, 0.95, DEFAULT_BOOTSTRAP_SAMPLES, &mut rng);
        assert!(ci.lower < 0.5 && ci.upper > 0.5, "{:?}", ci);
        assert!(ci.lower > 0.3 && ci.upper < 0.7, "{:?}", ci);
    }

    #[test]
    fn test_bootstrap_edge_cases() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            bootstrap_confidence(&[], 0.95, 1000, &mut rng),
            ConfidenceInterval { lower: 0.0, upper: 0.0 }
        );
        // level 1.0 would index one past the end without clamping
        let pmfs = vec![LikertPmf::uniform(); 3];
        let ci = bootstrap_confidence(&pmfs, 1.0, 10, &mut rng);
        assert!((ci.upper - 0.4).abs() < 1e-12);
    }
}
