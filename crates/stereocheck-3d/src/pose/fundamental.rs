use serde::{Deserialize, Serialize};

use crate::linalg::{
    array33_to_faer, enforce_rank2, faer_to_array33, mat33_mul_vec3, mat33_transpose_mul_vec3,
    normalize_frobenius, singular_values33,
};

/// Minimum number of correspondences of the linear fundamental matrix solver.
pub const MIN_CORRESPONDENCES: usize = 8;

/// Relative spread below which a point set is considered collinear.
const COLLINEAR_TOLERANCE: f64 = 1e-10;

/// Errors of the fundamental matrix estimation.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum FundamentalError {
    /// Fewer correspondences than the solver needs.
    #[error("insufficient correspondences: {required} are required, {found} were given")]
    InsufficientCorrespondences {
        /// Minimum number of correspondences.
        required: usize,
        /// Number of correspondences given.
        found: usize,
    },

    /// No valid rank 2 solution exists for the correspondences.
    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(String),

    /// The two point lists differ in length.
    #[error("correspondence lists have different lengths ({0} and {1})")]
    LengthMismatch(usize, usize),
}

/// Which view a set of points belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum View {
    /// The first (left) view.
    First,
    /// The second (right) view.
    Second,
}

/// A line `a * x + b * y + c = 0` in pixel coordinates.
///
/// Lines built with [`EpipolarLine::from_homogeneous`] are scaled so that
/// `a^2 + b^2 = 1`, which makes [`EpipolarLine::distance`] the perpendicular
/// distance in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpipolarLine {
    /// Coefficient of `x`.
    pub a: f64,
    /// Coefficient of `y`.
    pub b: f64,
    /// Constant term.
    pub c: f64,
}

impl EpipolarLine {
    /// Create a line from homogeneous coefficients, normalized when possible.
    pub fn from_homogeneous(l: [f64; 3]) -> Self {
        let norm = l[0].hypot(l[1]);
        if norm > f64::EPSILON {
            Self {
                a: l[0] / norm,
                b: l[1] / norm,
                c: l[2] / norm,
            }
        } else {
            Self {
                a: l[0],
                b: l[1],
                c: l[2],
            }
        }
    }

    /// Perpendicular distance from a point to the line.
    ///
    /// Returns infinity for a degenerate line with `a = b = 0`.
    pub fn distance(&self, p: &[f64; 2]) -> f64 {
        let norm = self.a.hypot(self.b);
        if norm <= f64::EPSILON {
            return f64::INFINITY;
        }
        (self.a * p[0] + self.b * p[1] + self.c).abs() / norm
    }

    /// The end points of the line at `x = 0` and `x = width`, for drawing.
    ///
    /// Returns `None` for vertical or degenerate lines.
    pub fn endpoints(&self, width: f64) -> Option<([f64; 2], [f64; 2])> {
        if self.b.abs() <= f64::EPSILON {
            return None;
        }
        let y_at = |x: f64| -(self.c + self.a * x) / self.b;
        Some(([0.0, y_at(0.0)], [width, y_at(width)]))
    }
}

/// Compute the epipolar lines of `points` in the other view.
///
/// Points of the first view give lines `F * x1` in the second view, points of
/// the second view give lines `F^T * x2` in the first view.
///
/// # Arguments
///
/// * `points` - The points.
/// * `view` - The view the points belong to.
/// * `f` - The row-major fundamental matrix with `x2^T * F * x1 = 0`.
pub fn compute_epilines(points: &[[f64; 2]], view: View, f: &[[f64; 3]; 3]) -> Vec<EpipolarLine> {
    points
        .iter()
        .map(|p| {
            let x = [p[0], p[1], 1.0];
            let l = match view {
                View::First => mat33_mul_vec3(f, &x),
                View::Second => mat33_transpose_mul_vec3(f, &x),
            };
            EpipolarLine::from_homogeneous(l)
        })
        .collect()
}

/// Distances of a pair to the epipolar lines of each other.
///
/// Returns `(d1, d2)` with `d1` the distance of `x1` to the line of `x2` in the
/// first view and `d2` the distance of `x2` to the line of `x1` in the second view.
pub fn epipolar_distances(f: &[[f64; 3]; 3], x1: &[f64; 2], x2: &[f64; 2]) -> (f64, f64) {
    let h1 = [x1[0], x1[1], 1.0];
    let h2 = [x2[0], x2[1], 1.0];
    let l2 = EpipolarLine::from_homogeneous(mat33_mul_vec3(f, &h1));
    let l1 = EpipolarLine::from_homogeneous(mat33_transpose_mul_vec3(f, &h2));
    (l1.distance(x1), l2.distance(x2))
}

/// Normalize points to zero mean and mean distance sqrt(2) from the origin.
///
/// Fails when the points coincide or lie on a line, which leaves the
/// fundamental matrix underdetermined.
fn normalize_points_2d(x: &[[f64; 2]]) -> Result<(Vec<[f64; 2]>, [[f64; 3]; 3]), FundamentalError> {
    let n = x.len() as f64;
    let (mx, my) = x
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p[0], sy + p[1]));
    let (mx, my) = (mx / n, my / n);

    let (mut cxx, mut cyy, mut cxy, mut mean_dist) = (0.0, 0.0, 0.0, 0.0);
    for p in x {
        let (dx, dy) = (p[0] - mx, p[1] - my);
        cxx += dx * dx;
        cyy += dy * dy;
        cxy += dx * dy;
        mean_dist += dx.hypot(dy);
    }
    mean_dist /= n;

    // eigenvalues of the scatter matrix
    let trace = cxx + cyy;
    let disc = ((cxx - cyy).powi(2) + 4.0 * cxy * cxy).sqrt();
    let (l_max, l_min) = (0.5 * (trace + disc), 0.5 * (trace - disc));
    if mean_dist <= 0.0 || l_min <= COLLINEAR_TOLERANCE * l_max {
        return Err(FundamentalError::DegenerateGeometry(
            "points are coincident or collinear".to_string(),
        ));
    }

    let scale = std::f64::consts::SQRT_2 / mean_dist;
    let xn = x
        .iter()
        .map(|p| [(p[0] - mx) * scale, (p[1] - my) * scale])
        .collect();
    let t = [
        [scale, 0.0, -scale * mx],
        [0.0, scale, -scale * my],
        [0.0, 0.0, 1.0],
    ];
    Ok((xn, t))
}

/// Estimate the fundamental matrix with the normalized 8-point algorithm.
///
/// The points are normalized, the linear system `x2^T * F * x1 = 0` is solved in
/// the least squares sense, the solution is projected onto the rank 2 matrices
/// and denormalized. The result has unit Frobenius norm.
///
/// # Arguments
///
/// * `x1` - Points of the first view.
/// * `x2` - Corresponding points of the second view.
///
/// # Errors
///
/// * [`FundamentalError::InsufficientCorrespondences`] with fewer than 8 pairs.
/// * [`FundamentalError::DegenerateGeometry`] when the points are collinear, not
///   finite, or no rank 2 solution exists.
pub fn fundamental_8point(
    x1: &[[f64; 2]],
    x2: &[[f64; 2]],
) -> Result<[[f64; 3]; 3], FundamentalError> {
    if x1.len() != x2.len() {
        return Err(FundamentalError::LengthMismatch(x1.len(), x2.len()));
    }
    if x1.len() < MIN_CORRESPONDENCES {
        return Err(FundamentalError::InsufficientCorrespondences {
            required: MIN_CORRESPONDENCES,
            found: x1.len(),
        });
    }
    if let Some(i) = x1
        .iter()
        .zip(x2)
        .position(|(p, q)| !p.iter().chain(q).all(|v| v.is_finite()))
    {
        return Err(FundamentalError::DegenerateGeometry(format!(
            "correspondence {i} is not finite"
        )));
    }

    let (x1n, t1) = normalize_points_2d(x1)?;
    let (x2n, t2) = normalize_points_2d(x2)?;

    // design matrix of x2'^T * F * x1' = 0
    let n = x1n.len();
    let mut a = faer::Mat::<f64>::zeros(n, 9);
    for (i, (p, q)) in x1n.iter().zip(&x2n).enumerate() {
        let (x, y) = (p[0], p[1]);
        let (xp, yp) = (q[0], q[1]);
        let row = [xp * x, xp * y, xp, yp * x, yp * y, yp, x, y, 1.0];
        for (j, v) in row.into_iter().enumerate() {
            a.write(i, j, v);
        }
    }

    // the right singular vector of the smallest singular value
    let svd = a.svd();
    let fvec = svd.v().col(8);
    let f_norm = [
        [fvec[0], fvec[1], fvec[2]],
        [fvec[3], fvec[4], fvec[5]],
        [fvec[6], fvec[7], fvec[8]],
    ];
    let f_rank2 = enforce_rank2(&f_norm);

    // F = T2^T * F' * T1
    let t2m = array33_to_faer(&t2);
    let f_denorm = t2m.transpose() * array33_to_faer(&f_rank2) * array33_to_faer(&t1);
    let f = faer_to_array33(f_denorm.as_ref());

    let f = normalize_frobenius(&f).ok_or_else(|| {
        FundamentalError::DegenerateGeometry("fundamental matrix vanished".to_string())
    })?;
    let s = singular_values33(&f);
    if !f.iter().flatten().all(|v| v.is_finite()) || s[1] <= 1e-12 * s[0] {
        return Err(FundamentalError::DegenerateGeometry(format!(
            "fundamental matrix is not rank 2 (singular values {s:?})"
        )));
    }
    Ok(f)
}
