use serde::{Deserialize, Serialize};

use super::{
    find_fundamental_lmeds, CorrespondencePair, EpipolarLine, FundamentalError,
    FundamentalMatrix, LmedsParams,
};
use crate::linalg::{mat33_mul_vec3, mat33_transpose_mul_vec3};

/// Summary statistics of a set of residuals, in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResidualStats {
    /// Number of residuals.
    pub count: usize,
    /// Mean residual.
    pub mean: f64,
    /// Root mean square residual.
    pub rms: f64,
    /// Median residual.
    pub median: f64,
    /// Largest residual.
    pub max: f64,
}

impl ResidualStats {
    /// Compute the statistics of `residuals`, all zero when empty.
    pub fn from_residuals(residuals: &[f64]) -> Self {
        if residuals.is_empty() {
            return Self::default();
        }
        let n = residuals.len() as f64;
        let mut sorted = residuals.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            0.5 * (sorted[mid - 1] + sorted[mid])
        } else {
            sorted[mid]
        };

        Self {
            count: residuals.len(),
            mean: residuals.iter().sum::<f64>() / n,
            rms: (residuals.iter().map(|r| r * r).sum::<f64>() / n).sqrt(),
            median,
            max: sorted[sorted.len() - 1],
        }
    }
}

/// Epipolar check of one inlier pair.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpipolarResidual {
    /// Index of the pair in the input correspondences.
    pub index: usize,
    /// Line of the second point in the first view.
    pub line1: EpipolarLine,
    /// Line of the first point in the second view.
    pub line2: EpipolarLine,
    /// Distance of the first point to `line1`.
    pub distance1: f64,
    /// Distance of the second point to `line2`.
    pub distance2: f64,
}

/// Result of the epipolar validation of a set of correspondences.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpipolarReport {
    /// The estimated fundamental matrix and its inliers.
    pub fundamental: FundamentalMatrix,
    /// Lines and distances of every inlier pair.
    pub residuals: Vec<EpipolarResidual>,
    /// Statistics of the point to line distances in both views.
    pub stats: ResidualStats,
    /// Statistics of the row difference `|y1 - y2|` of the inliers, which is the
    /// epipolar error of an ideally rectified pair.
    pub row_alignment: ResidualStats,
}

impl EpipolarReport {
    /// Number of pairs supporting the fundamental matrix.
    pub fn num_inliers(&self) -> usize {
        self.residuals.len()
    }

    /// Whether the largest point to line distance is below `max_residual`.
    pub fn is_consistent(&self, max_residual: f64) -> bool {
        self.stats.max < max_residual
    }
}

/// Estimates the epipolar geometry of matched points and measures how well the
/// points follow it.
#[derive(Clone, Debug, Default)]
pub struct EpipolarValidator {
    params: LmedsParams,
}

impl EpipolarValidator {
    /// Create a validator with the given estimator parameters.
    pub fn new(params: LmedsParams) -> Self {
        Self { params }
    }

    /// The estimator parameters.
    pub fn params(&self) -> &LmedsParams {
        &self.params
    }

    /// Estimate the fundamental matrix and compute the residuals of its inliers.
    ///
    /// # Errors
    ///
    /// * [`FundamentalError::InsufficientCorrespondences`] with fewer than 8 pairs.
    /// * [`FundamentalError::DegenerateGeometry`] when no rank 2 model exists.
    pub fn validate(&self, pairs: &CorrespondencePair) -> Result<EpipolarReport, FundamentalError> {
        let fundamental = find_fundamental_lmeds(pairs, &self.params)?;
        let f = &fundamental.matrix;

        let residuals: Vec<EpipolarResidual> = fundamental
            .inlier_indices()
            .into_iter()
            .map(|index| {
                let (p1, p2) = (pairs.points1()[index], pairs.points2()[index]);
                let h1 = [p1[0], p1[1], 1.0];
                let h2 = [p2[0], p2[1], 1.0];
                let line1 = EpipolarLine::from_homogeneous(mat33_transpose_mul_vec3(f, &h2));
                let line2 = EpipolarLine::from_homogeneous(mat33_mul_vec3(f, &h1));
                EpipolarResidual {
                    index,
                    line1,
                    line2,
                    distance1: line1.distance(&p1),
                    distance2: line2.distance(&p2),
                }
            })
            .collect();

        let distances: Vec<f64> = residuals
            .iter()
            .flat_map(|r| [r.distance1, r.distance2])
            .collect();
        let rows: Vec<f64> = residuals
            .iter()
            .map(|r| (pairs.points1()[r.index][1] - pairs.points2()[r.index][1]).abs())
            .collect();

        let report = EpipolarReport {
            stats: ResidualStats::from_residuals(&distances),
            row_alignment: ResidualStats::from_residuals(&rows),
            fundamental,
            residuals,
        };
        log::debug!(
            "epipolar check: {}/{} inliers, mean {:.4} px, max {:.4} px",
            report.num_inliers(),
            pairs.len(),
            report.stats.mean,
            report.stats.max
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::fundamental::tests::two_view_points;
    use approx::assert_relative_eq;

    #[test]
    fn test_residual_stats() {
        let stats = ResidualStats::from_residuals(&[1.0, 3.0, 2.0, 6.0]);
        assert_eq!(stats.count, 4);
        assert_relative_eq!(stats.mean, 3.0);
        assert_relative_eq!(stats.median, 2.5);
        assert_relative_eq!(stats.max, 6.0);
        assert_relative_eq!(stats.rms, (50.0f64 / 4.0).sqrt());
        assert_eq!(ResidualStats::from_residuals(&[]), ResidualStats::default());
    }

    #[test]
    fn test_exact_correspondences_are_consistent() -> Result<(), FundamentalError> {
        let (x1, x2) = two_view_points(50, 21);
        let pairs = CorrespondencePair::new(x1, x2)?;
        let report = EpipolarValidator::default().validate(&pairs)?;

        assert_eq!(report.num_inliers(), 50);
        assert!(report.fundamental.inliers.iter().all(|&b| b));
        assert!(report.stats.max < 1e-2, "max residual {}", report.stats.max);
        assert!(report.is_consistent(1e-2));
        Ok(())
    }

    #[test]
    fn test_rectified_pair_row_alignment() -> Result<(), FundamentalError> {
        // row aligned points with varying disparity
        let pairs: CorrespondencePair = (0..30)
            .map(|i| {
                let (x, y) = (40.0 + 17.0 * (i % 6) as f64, 30.0 + 41.0 * (i / 6) as f64);
                let disparity = 10.0 + (i * 7 % 13) as f64;
                ([x, y], [x - disparity, y])
            })
            .collect();
        let report = EpipolarValidator::default().validate(&pairs)?;
        assert!(report.stats.max < 1e-6);
        assert!(report.row_alignment.max < 1e-12);

        // epipolar lines are image rows
        for r in &report.residuals {
            let (p0, p1) = r.line2.endpoints(640.0).ok_or_else(|| {
                FundamentalError::DegenerateGeometry("vertical epipolar line".to_string())
            })?;
            assert_relative_eq!(p0[1], p1[1], epsilon = 1e-6);
        }
        Ok(())
    }

    #[test]
    fn test_five_pairs_are_insufficient() -> Result<(), FundamentalError> {
        let (x1, x2) = two_view_points(5, 4);
        let pairs = CorrespondencePair::new(x1, x2)?;
        let res = EpipolarValidator::default().validate(&pairs);
        assert_eq!(
            res,
            Err(FundamentalError::InsufficientCorrespondences {
                required: 8,
                found: 5
            })
        );
        Ok(())
    }

    #[test]
    fn test_collinear_pairs_are_degenerate() -> Result<(), FundamentalError> {
        let pairs: CorrespondencePair = (0..12)
            .map(|i| ([i as f64 * 10.0, 100.0], [i as f64 * 10.0 - 5.0, 100.0]))
            .collect();
        let res = EpipolarValidator::default().validate(&pairs);
        assert!(matches!(res, Err(FundamentalError::DegenerateGeometry(_))));
        Ok(())
    }

    #[test]
    fn test_report_serializes() -> Result<(), Box<dyn std::error::Error>> {
        let (x1, x2) = two_view_points(12, 8);
        let report = EpipolarValidator::default().validate(&CorrespondencePair::new(x1, x2)?)?;
        let json = serde_json::to_string(&report)?;
        let back: EpipolarReport = serde_json::from_str(&json)?;
        assert_eq!(back.residuals.len(), report.residuals.len());
        Ok(())
    }
}
