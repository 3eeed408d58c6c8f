/// Convert a row-major 3x3 array into a faer matrix.
pub fn array33_to_faer(m: &[[f64; 3]; 3]) -> faer::Mat<f64> {
    faer::Mat::<f64>::from_fn(3, 3, |i, j| m[i][j])
}

/// Convert the top left 3x3 block of a faer matrix into a row-major array.
pub fn faer_to_array33(m: faer::MatRef<'_, f64>) -> [[f64; 3]; 3] {
    let mut out = [[0.0; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, v) in row.iter_mut().enumerate() {
            *v = m.read(i, j);
        }
    }
    out
}

/// Multiply a row-major 3x3 matrix by a column vector.
pub fn mat33_mul_vec3(m: &[[f64; 3]; 3], v: &[f64; 3]) -> [f64; 3] {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}

/// Multiply the transpose of a row-major 3x3 matrix by a column vector.
pub fn mat33_transpose_mul_vec3(m: &[[f64; 3]; 3], v: &[f64; 3]) -> [f64; 3] {
    [
        m[0][0] * v[0] + m[1][0] * v[1] + m[2][0] * v[2],
        m[0][1] * v[0] + m[1][1] * v[1] + m[2][1] * v[2],
        m[0][2] * v[0] + m[1][2] * v[1] + m[2][2] * v[2],
    ]
}

/// Singular values of a 3x3 matrix in decreasing order.
pub fn singular_values33(m: &[[f64; 3]; 3]) -> [f64; 3] {
    let svd = array33_to_faer(m).svd();
    let s = svd.s_diagonal();
    [s[0], s[1], s[2]]
}

/// Closest rank 2 matrix in the Frobenius norm.
///
/// The smallest singular value is set to zero.
pub fn enforce_rank2(m: &[[f64; 3]; 3]) -> [[f64; 3]; 3] {
    let svd = array33_to_faer(m).svd();
    let (u, v, s) = (svd.u(), svd.v(), svd.s_diagonal());

    let mut out = [[0.0; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, value) in row.iter_mut().enumerate() {
            *value = (0..2).map(|k| u.read(i, k) * s[k] * v.read(j, k)).sum();
        }
    }
    out
}

/// Scale a matrix to unit Frobenius norm, with a positive largest entry.
pub fn normalize_frobenius(m: &[[f64; 3]; 3]) -> Option<[[f64; 3]; 3]> {
    let norm = m.iter().flatten().map(|v| v * v).sum::<f64>().sqrt();
    if !norm.is_finite() || norm <= f64::EPSILON {
        return None;
    }
    let largest = m
        .iter()
        .flatten()
        .copied()
        .fold(0.0f64, |acc, v| if v.abs() > acc.abs() { v } else { acc });
    let scale = largest.signum() / norm;
    Some(m.map(|row| row.map(|v| v * scale)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_mat_vec() {
        let m = [[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 10.0]];
        let v = [1.0, -1.0, 2.0];
        assert_eq!(mat33_mul_vec3(&m, &v), [5.0, 11.0, 19.0]);
        assert_eq!(mat33_transpose_mul_vec3(&m, &v), [11.0, 13.0, 17.0]);
    }

    #[test]
    fn test_faer_round_trip() {
        let m = [[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 10.0]];
        assert_eq!(faer_to_array33(array33_to_faer(&m).as_ref()), m);
    }

    #[test]
    fn test_enforce_rank2() {
        let m = [[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 10.0]];
        let r2 = enforce_rank2(&m);
        let s = singular_values33(&r2);
        let s_orig = singular_values33(&m);
        assert_relative_eq!(s[0], s_orig[0], epsilon = 1e-9);
        assert_relative_eq!(s[1], s_orig[1], epsilon = 1e-9);
        assert!(s[2].abs() < 1e-9);
    }

    #[test]
    fn test_normalize_frobenius() {
        let m = [[0.0, 0.0, 0.0], [0.0, 0.0, -2.0], [0.0, 2.0, 0.0]];
        let n = normalize_frobenius(&m).unwrap();
        let expected = 0.5f64.sqrt();
        // the largest entry -2 comes first and becomes positive
        assert_relative_eq!(n[1][2], expected, epsilon = 1e-12);
        assert_relative_eq!(n[2][1], -expected, epsilon = 1e-12);
        assert!(normalize_frobenius(&[[0.0; 3]; 3]).is_none());
    }
}
