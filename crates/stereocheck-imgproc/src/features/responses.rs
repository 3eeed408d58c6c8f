use stereocheck_image::{Image, ImageError};

use crate::filter::{gaussian_blur, hessian, kernels::gaussian_kernel_size};

/// Compute the saddle point response of an image.
///
/// The response is the negated determinant of the Hessian of the blurred image,
/// `dxy^2 - dxx * dyy`. It is positive where the intensity curves up along one
/// direction and down along the other, as at the junction of four chessboard
/// squares, and close to zero on straight edges and flat areas.
///
/// # Arguments
///
/// * `src` - The source image.
/// * `sigma` - The standard deviation of the gaussian applied before differentiation.
pub fn saddle_response(src: &Image<f32, 1>, sigma: f32) -> Result<Image<f32, 1>, ImageError> {
    let ksize = gaussian_kernel_size(sigma);
    let mut blurred = Image::from_size_val(src.size(), 0.0f32)?;
    gaussian_blur(src, &mut blurred, (ksize, ksize), (sigma, sigma))?;

    let (dxx, dyy, dxy) = hessian(&blurred)?;
    let data = dxx
        .as_slice()
        .iter()
        .zip(dyy.as_slice())
        .zip(dxy.as_slice())
        .map(|((&xx, &yy), &xy)| xy * xy - xx * yy)
        .collect();

    Image::new(src.size(), data)
}

/// Harris corner response at a single location from precomputed gradients.
///
/// # Arguments
///
/// * `dx` - The horizontal gradient image.
/// * `dy` - The vertical gradient image.
/// * `x` - The column of the pixel.
/// * `y` - The row of the pixel.
/// * `half_window` - The half size of the square summation window.
/// * `k` - The Harris sensitivity constant.
pub fn harris_response_at(
    dx: &Image<f32, 1>,
    dy: &Image<f32, 1>,
    x: usize,
    y: usize,
    half_window: usize,
    k: f32,
) -> f32 {
    let (cols, rows) = (dx.cols(), dx.rows());
    let (gx, gy) = (dx.as_slice(), dy.as_slice());

    let (mut sxx, mut syy, mut sxy) = (0.0f32, 0.0f32, 0.0f32);
    for yy in y.saturating_sub(half_window)..(y + half_window + 1).min(rows) {
        for xx in x.saturating_sub(half_window)..(x + half_window + 1).min(cols) {
            let idx = yy * cols + xx;
            sxx += gx[idx] * gx[idx];
            syy += gy[idx] * gy[idx];
            sxy += gx[idx] * gy[idx];
        }
    }

    let det = sxx * syy - sxy * sxy;
    let trace = sxx + syy;
    det - k * trace * trace
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::spatial_gradient;
    use stereocheck_image::ImageSize;

    fn quadrants(size: usize) -> Result<Image<f32, 1>, ImageError> {
        let half = size / 2;
        Image::from_fn(
            ImageSize {
                width: size,
                height: size,
            },
            |x, y| [if (x < half) == (y < half) { 1.0 } else { 0.0 }],
        )
    }

    #[test]
    fn test_saddle_peaks_at_junction() -> Result<(), ImageError> {
        let img = quadrants(32)?;
        let response = saddle_response(&img, 1.5)?;

        let data = response.as_slice();
        let (best, _) = data
            .iter()
            .enumerate()
            .fold((0, f32::MIN), |(bi, bv), (i, &v)| if v > bv { (i, v) } else { (bi, bv) });
        let (bx, by) = (best % 32, best / 32);
        // the junction sits between pixels 15 and 16
        assert!((15..=16).contains(&bx));
        assert!((15..=16).contains(&by));

        // flat areas and straight edges give no saddle
        assert!(response.get_pixel(4, 4, 0)?.abs() < 1e-6);
        assert!(response.get_pixel(16, 4, 0)?.abs() < 1e-4);
        Ok(())
    }

    #[test]
    fn test_harris_corner_vs_edge() -> Result<(), ImageError> {
        let img = Image::<f32, 1>::from_fn([20, 20].into(), |x, y| {
            [if x >= 10 && y >= 10 { 1.0 } else { 0.0 }]
        })?;
        let (dx, dy) = spatial_gradient(&img)?;
        let corner = harris_response_at(&dx, &dy, 10, 10, 2, 0.04);
        let edge = harris_response_at(&dx, &dy, 10, 16, 2, 0.04);
        assert!(corner > 0.0);
        assert!(edge <= 0.0);
        Ok(())
    }
}
