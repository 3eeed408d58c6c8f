use stereocheck_image::{Image, ImageDtype, ImageError};

use super::{kernels, separable_filter};

/// Blur an image using a gaussian filter.
///
/// # Arguments
///
/// * `src` - The source image with shape (H, W, C).
/// * `dst` - The destination image with shape (H, W, C).
/// * `kernel_size` - The size of the kernel (kernel_x, kernel_y).
/// * `sigma` - The sigma of the gaussian kernel (sigma_x, sigma_y).
pub fn gaussian_blur<T: ImageDtype, const C: usize>(
    src: &Image<T, C>,
    dst: &mut Image<T, C>,
    kernel_size: (usize, usize),
    sigma: (f32, f32),
) -> Result<(), ImageError> {
    let kernel_x = kernels::gaussian_kernel_1d(kernel_size.0, sigma.0);
    let kernel_y = kernels::gaussian_kernel_1d(kernel_size.1, sigma.1);
    separable_filter(src, dst, &kernel_x, &kernel_y)
}

/// Second order derivatives of a single channel image.
///
/// Central differences with a replicated border. Returns `(dxx, dyy, dxy)`.
pub fn hessian(
    src: &Image<f32, 1>,
) -> Result<(Image<f32, 1>, Image<f32, 1>, Image<f32, 1>), ImageError> {
    let (rows, cols) = (src.rows(), src.cols());
    let data = src.as_slice();
    let at = |x: isize, y: isize| -> f32 {
        let x = x.clamp(0, cols as isize - 1) as usize;
        let y = y.clamp(0, rows as isize - 1) as usize;
        data[y * cols + x]
    };

    let dxx = Image::from_fn(src.size(), |x, y| {
        let (x, y) = (x as isize, y as isize);
        [at(x + 1, y) - 2.0 * at(x, y) + at(x - 1, y)]
    })?;
    let dyy = Image::from_fn(src.size(), |x, y| {
        let (x, y) = (x as isize, y as isize);
        [at(x, y + 1) - 2.0 * at(x, y) + at(x, y - 1)]
    })?;
    let dxy = Image::from_fn(src.size(), |x, y| {
        let (x, y) = (x as isize, y as isize);
        [(at(x + 1, y + 1) - at(x + 1, y - 1) - at(x - 1, y + 1) + at(x - 1, y - 1)) * 0.25]
    })?;

    Ok((dxx, dyy, dxy))
}

/// First order derivatives of a single channel image.
///
/// Central differences with a replicated border. Returns `(dx, dy)`.
pub fn spatial_gradient(
    src: &Image<f32, 1>,
) -> Result<(Image<f32, 1>, Image<f32, 1>), ImageError> {
    let (rows, cols) = (src.rows(), src.cols());
    let data = src.as_slice();
    let at = |x: isize, y: isize| -> f32 {
        let x = x.clamp(0, cols as isize - 1) as usize;
        let y = y.clamp(0, rows as isize - 1) as usize;
        data[y * cols + x]
    };

    let dx = Image::from_fn(src.size(), |x, y| {
        let (x, y) = (x as isize, y as isize);
        [(at(x + 1, y) - at(x - 1, y)) * 0.5]
    })?;
    let dy = Image::from_fn(src.size(), |x, y| {
        let (x, y) = (x as isize, y as isize);
        [(at(x, y + 1) - at(x, y - 1)) * 0.5]
    })?;

    Ok((dx, dy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use stereocheck_image::ImageSize;

    #[test]
    fn test_gaussian_blur_preserves_constant() -> Result<(), ImageError> {
        let size = ImageSize {
            width: 6,
            height: 4,
        };
        let img = Image::<u8, 3>::from_size_val(size, 100)?;
        let mut dst = Image::<u8, 3>::from_size_val(size, 0)?;
        gaussian_blur(&img, &mut dst, (5, 5), (1.0, 1.0))?;
        assert!(dst.as_slice().iter().all(|&v| v == 100));
        Ok(())
    }

    #[test]
    fn test_hessian_quadratic() -> Result<(), ImageError> {
        // f(x, y) = x^2 + 3xy
        let img = Image::<f32, 1>::from_fn([8, 8].into(), |x, y| {
            let (x, y) = (x as f32, y as f32);
            [x * x + 3.0 * x * y]
        })?;
        let (dxx, dyy, dxy) = hessian(&img)?;
        assert!((dxx.get_pixel(4, 4, 0)? - 2.0).abs() < 1e-4);
        assert!(dyy.get_pixel(4, 4, 0)?.abs() < 1e-4);
        assert!((dxy.get_pixel(4, 4, 0)? - 3.0).abs() < 1e-4);
        Ok(())
    }

    #[test]
    fn test_spatial_gradient_ramp() -> Result<(), ImageError> {
        let img = Image::<f32, 1>::from_fn([5, 5].into(), |x, y| [2.0 * x as f32 - y as f32])?;
        let (dx, dy) = spatial_gradient(&img)?;
        assert!((dx.get_pixel(2, 2, 0)? - 2.0).abs() < 1e-6);
        assert!((dy.get_pixel(2, 2, 0)? + 1.0).abs() < 1e-6);
        Ok(())
    }
}
