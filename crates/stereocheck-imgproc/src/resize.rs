use stereocheck_image::{Image, ImageDtype, ImageError};

use crate::interpolation::{remap, InterpolationMode, PixelMap};

/// Resize an image to the size of `dst`.
///
/// Pixel centres are aligned between both images and sample locations are
/// clamped to the source, so the border never blends with a fill value.
///
/// # Arguments
///
/// * `src` - The input image container.
/// * `dst` - The output image container, its size selects the new resolution.
/// * `interpolation` - The interpolation mode to use.
pub fn resize<T: ImageDtype, const C: usize>(
    src: &Image<T, C>,
    dst: &mut Image<T, C>,
    interpolation: InterpolationMode,
) -> Result<(), ImageError> {
    let scale_x = src.cols() as f64 / dst.cols() as f64;
    let scale_y = src.rows() as f64 / dst.rows() as f64;
    let max_x = (src.cols() - 1) as f64;
    let max_y = (src.rows() - 1) as f64;

    let map = PixelMap::from_fn(dst.size(), |x, y| {
        let u = ((x as f64 + 0.5) * scale_x - 0.5).clamp(0.0, max_x);
        let v = ((y as f64 + 0.5) * scale_y - 0.5).clamp(0.0, max_y);
        Some([u, v])
    })?;

    remap(src, dst, &map, interpolation, [T::default(); C])
}
