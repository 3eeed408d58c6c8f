use rayon::prelude::*;
use stereocheck_image::Image;

use crate::calibration::TermCriteria;

/// Bilinear sample with the coordinates clamped to the image.
pub(crate) fn sample_clamped(data: &[f32], cols: usize, rows: usize, x: f32, y: f32) -> f32 {
    let x = x.clamp(0.0, (cols - 1) as f32);
    let y = y.clamp(0.0, (rows - 1) as f32);
    let (x0, y0) = (x.floor() as usize, y.floor() as usize);
    let (x1, y1) = ((x0 + 1).min(cols - 1), (y0 + 1).min(rows - 1));
    let (ax, ay) = (x - x0 as f32, y - y0 as f32);

    let top = data[y0 * cols + x0] * (1.0 - ax) + data[y0 * cols + x1] * ax;
    let bottom = data[y1 * cols + x0] * (1.0 - ax) + data[y1 * cols + x1] * ax;
    top * (1.0 - ay) + bottom * ay
}

fn refine(
    src: &Image<f32, 1>,
    corner: [f32; 2],
    half_window: usize,
    criteria: &TermCriteria,
) -> [f32; 2] {
    let (cols, rows) = (src.cols(), src.rows());
    let data = src.as_slice();
    let hw = half_window as i32;
    let inv_two_sigma2 = 1.0 / (2.0 * (half_window as f32).powi(2));

    let [x0, y0] = corner;
    let (mut cx, mut cy) = (x0, y0);

    for _ in 0..criteria.max_iter {
        let (mut a00, mut a01, mut a11) = (0.0f32, 0.0f32, 0.0f32);
        let (mut b0, mut b1) = (0.0f32, 0.0f32);

        for dy in -hw..=hw {
            for dx in -hw..=hw {
                let (qx, qy) = (cx + dx as f32, cy + dy as f32);
                let gx = 0.5
                    * (sample_clamped(data, cols, rows, qx + 1.0, qy)
                        - sample_clamped(data, cols, rows, qx - 1.0, qy));
                let gy = 0.5
                    * (sample_clamped(data, cols, rows, qx, qy + 1.0)
                        - sample_clamped(data, cols, rows, qx, qy - 1.0));
                let w = (-((dx * dx + dy * dy) as f32) * inv_two_sigma2).exp();

                let (gxx, gxy, gyy) = (w * gx * gx, w * gx * gy, w * gy * gy);
                a00 += gxx;
                a01 += gxy;
                a11 += gyy;
                b0 += gxx * qx + gxy * qy;
                b1 += gxy * qx + gyy * qy;
            }
        }

        let det = a00 * a11 - a01 * a01;
        if det.abs() <= f32::EPSILON * (a00 + a11).powi(2).max(f32::MIN_POSITIVE) {
            break;
        }
        let nx = (a11 * b0 - a01 * b1) / det;
        let ny = (a00 * b1 - a01 * b0) / det;
        let step = ((nx - cx).powi(2) + (ny - cy).powi(2)).sqrt();
        cx = nx;
        cy = ny;

        if (step as f64) < criteria.eps {
            break;
        }
    }

    // the estimate left its search window
    let inside = |d: f32| d.abs() <= half_window as f32;
    if !(inside(cx - x0) && inside(cy - y0)) {
        return corner;
    }
    [cx, cy]
}

/// Refine corner locations to sub-pixel accuracy.
///
/// Each corner moves to the point where the image gradients of its neighbourhood
/// are orthogonal to the vectors from that point, which is the exact location of
/// a saddle point or a corner. Corners are refined in parallel. A corner whose
/// estimate leaves its search window keeps its initial location.
///
/// # Arguments
///
/// * `src` - The source image.
/// * `corners` - The corners `[x, y]` to refine in place.
/// * `half_window` - The half size of the search window.
/// * `criteria` - The maximum number of iterations and the minimum step.
pub fn corner_sub_pix(
    src: &Image<f32, 1>,
    corners: &mut [[f32; 2]],
    half_window: usize,
    criteria: &TermCriteria,
) {
    if half_window == 0 {
        return;
    }
    corners
        .par_iter_mut()
        .for_each(|corner| *corner = refine(src, *corner, half_window, criteria));
}
