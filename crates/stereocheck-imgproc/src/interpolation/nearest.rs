use stereocheck_image::{Image, ImageDtype};

/// Kernel for nearest neighbor interpolation with a constant border.
///
/// # Arguments
///
/// * `image` - The input image container.
/// * `u` - The x coordinate of the pixel to interpolate.
/// * `v` - The y coordinate of the pixel to interpolate.
/// * `fill_value` - The value returned when the rounded location is outside the image.
///
/// # Returns
///
/// The interpolated pixel values.
pub(crate) fn nearest_neighbor_interpolation<T: ImageDtype, const C: usize>(
    image: &Image<T, C>,
    u: f32,
    v: f32,
    fill_value: &[f32; C],
) -> [f32; C] {
    let (rows, cols) = (image.rows(), image.cols());

    let iu = u.round();
    let iv = v.round();

    if iu < 0.0 || iv < 0.0 || iu >= cols as f32 || iv >= rows as f32 {
        return *fill_value;
    }

    let base = (iv as usize * cols + iu as usize) * C;
    let src = &image.as_slice()[base..base + C];

    let mut pixel = [0.0; C];
    for (p, &s) in pixel.iter_mut().zip(src.iter()) {
        *p = s.into();
    }

    pixel
}
