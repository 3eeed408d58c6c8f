use rand::{rngs::StdRng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{
    epipolar_distances, fundamental_8point, CorrespondencePair, FundamentalError,
    MIN_CORRESPONDENCES,
};

/// Parameters of the least median of squares estimator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LmedsParams {
    /// Maximum number of random minimal samples.
    pub max_iterations: usize,
    /// Lower bound of the inlier scale, in pixels.
    pub min_sigma: f64,
    /// Seed of the sample generator, `None` draws a seed from the OS.
    pub random_seed: Option<u64>,
}

impl Default for LmedsParams {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            min_sigma: 1e-3,
            random_seed: Some(0),
        }
    }
}

/// A fundamental matrix with the pairs that support it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FundamentalMatrix {
    /// Row-major matrix with `x2^T * F * x1 = 0` and unit Frobenius norm.
    pub matrix: [[f64; 3]; 3],
    /// Inlier flag of every correspondence.
    pub inliers: Vec<bool>,
}

impl FundamentalMatrix {
    /// Number of inliers.
    pub fn num_inliers(&self) -> usize {
        self.inliers.iter().filter(|&&b| b).count()
    }

    /// Indices of the inliers.
    pub fn inlier_indices(&self) -> Vec<usize> {
        self.inliers
            .iter()
            .enumerate()
            .filter(|(_, &b)| b)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Squared error of a pair, the larger of its two epipolar distances.
fn pair_errors(f: &[[f64; 3]; 3], pairs: &CorrespondencePair) -> Vec<f64> {
    pairs
        .iter()
        .map(|(p, q)| {
            let (d1, d2) = epipolar_distances(f, p, q);
            (d1 * d1).max(d2 * d2)
        })
        .collect()
}

fn median(values: &mut [f64]) -> f64 {
    let mid = values.len() / 2;
    let (_, m, _) = values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    *m
}

/// Number of distinct `k`-subsets of `n` elements, saturating.
fn binomial(n: usize, k: usize) -> u128 {
    if k > n {
        return 0;
    }
    let k = k.min(n - k);
    let mut acc: u128 = 1;
    for i in 0..k {
        acc = match acc.checked_mul((n - i) as u128) {
            Some(v) => v / (i as u128 + 1),
            None => return u128::MAX,
        };
    }
    acc
}

struct Trial {
    median: f64,
    sum: f64,
    matrix: [[f64; 3]; 3],
}

/// Estimate a fundamental matrix robustly with least median of squares.
///
/// Minimal samples of 8 pairs are drawn from a seeded generator and fitted with
/// the 8-point algorithm in parallel. Each model is scored by the median of the
/// squared epipolar errors of all pairs, ties going to the lowest error sum. The
/// inlier threshold is derived from the best median and the model is refitted
/// on the inliers.
///
/// # Arguments
///
/// * `pairs` - The correspondences.
/// * `params` - The estimator parameters.
///
/// # Errors
///
/// * [`FundamentalError::InsufficientCorrespondences`] with fewer than 8 pairs.
/// * [`FundamentalError::DegenerateGeometry`] when the pairs are collinear or no
///   sample yields a rank 2 model.
pub fn find_fundamental_lmeds(
    pairs: &CorrespondencePair,
    params: &LmedsParams,
) -> Result<FundamentalMatrix, FundamentalError> {
    let n = pairs.len();
    if n < MIN_CORRESPONDENCES {
        return Err(FundamentalError::InsufficientCorrespondences {
            required: MIN_CORRESPONDENCES,
            found: n,
        });
    }

    // a degenerate full set cannot have a non degenerate subset
    let full = fundamental_8point(pairs.points1(), pairs.points2())?;
    if n == MIN_CORRESPONDENCES {
        return Ok(FundamentalMatrix {
            matrix: full,
            inliers: vec![true; n],
        });
    }

    let num_trials = binomial(n, MIN_CORRESPONDENCES)
        .min(params.max_iterations.max(1) as u128) as usize;
    let mut rng = match params.random_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let samples: Vec<Vec<usize>> = (0..num_trials)
        .map(|_| rand::seq::index::sample(&mut rng, n, MIN_CORRESPONDENCES).into_vec())
        .collect();

    let best = samples
        .par_iter()
        .filter_map(|sample| {
            let subset = pairs.select(sample);
            let matrix = fundamental_8point(subset.points1(), subset.points2()).ok()?;
            let mut errors = pair_errors(&matrix, pairs);
            let sum = errors.iter().sum();
            let median = median(&mut errors);
            median.is_finite().then_some(Trial {
                median,
                sum,
                matrix,
            })
        })
        .min_by(|a, b| a.median.total_cmp(&b.median).then(a.sum.total_cmp(&b.sum)))
        .ok_or_else(|| {
            FundamentalError::DegenerateGeometry("no sample produced a rank 2 model".to_string())
        })?;

    // robust scale of the residuals around the best model
    let spread = 1.0 + 5.0 / (n - MIN_CORRESPONDENCES) as f64;
    let sigma = (2.5 * 1.4826 * spread * best.median.sqrt()).max(params.min_sigma);
    let threshold = sigma * sigma;
    let inliers: Vec<bool> = pair_errors(&best.matrix, pairs)
        .into_iter()
        .map(|e| e <= threshold)
        .collect();
    let num_inliers = inliers.iter().filter(|&&b| b).count();

    log::debug!(
        "lmeds: {} trials, median error {:.3e}, sigma {:.3e}, {}/{} inliers",
        num_trials,
        best.median,
        sigma,
        num_inliers,
        n
    );

    let mut result = FundamentalMatrix {
        matrix: best.matrix,
        inliers,
    };
    if num_inliers >= MIN_CORRESPONDENCES {
        let inlier_pairs = pairs.masked(&result.inliers);
        match fundamental_8point(inlier_pairs.points1(), inlier_pairs.points2()) {
            Ok(refined) => {
                let refined_inliers: Vec<bool> = pair_errors(&refined, pairs)
                    .into_iter()
                    .map(|e| e <= threshold)
                    .collect();
                // keep the refit unless it loses support
                if refined_inliers.iter().filter(|&&b| b).count() >= num_inliers {
                    result = FundamentalMatrix {
                        matrix: refined,
                        inliers: refined_inliers,
                    };
                }
            }
            Err(err) => log::warn!("lmeds: inlier refit failed, keeping the best sample: {err}"),
        }
    }

    Ok(result)
}
