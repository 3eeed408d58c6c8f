use stereocheck_image::{Image, ImageDtype};

/// Read the pixel at `(x, y)`, or the fill value when it lies outside the image.
#[inline]
fn fetch<T: ImageDtype, const C: usize>(
    data: &[T],
    cols: usize,
    rows: usize,
    x: i64,
    y: i64,
    fill_value: &[f32; C],
) -> [f32; C] {
    if x < 0 || y < 0 || x >= cols as i64 || y >= rows as i64 {
        return *fill_value;
    }
    let base = (y as usize * cols + x as usize) * C;
    let mut pixel = [0.0; C];
    for (k, p) in pixel.iter_mut().enumerate() {
        *p = data[base + k].into();
    }
    pixel
}

/// Kernel for bilinear interpolation with a constant border.
///
/// Each of the four neighbours that falls outside the image contributes the
/// fill value with its bilinear weight.
///
/// # Arguments
///
/// * `image` - The input image container.
/// * `u` - The x coordinate of the pixel to interpolate.
/// * `v` - The y coordinate of the pixel to interpolate.
/// * `fill_value` - The value of the samples outside the image.
///
/// # Returns
///
/// The interpolated pixel values.
pub(crate) fn bilinear_interpolation<T: ImageDtype, const C: usize>(
    image: &Image<T, C>,
    u: f32,
    v: f32,
    fill_value: &[f32; C],
) -> [f32; C] {
    let (rows, cols) = (image.rows(), image.cols());

    // fully outside, no neighbour can contribute
    if u <= -1.0 || v <= -1.0 || u >= cols as f32 || v >= rows as f32 {
        return *fill_value;
    }

    let u0 = u.floor();
    let v0 = v.floor();
    let frac_u = u - u0;
    let frac_v = v - v0;
    let (iu0, iv0) = (u0 as i64, v0 as i64);

    let w00 = (1.0 - frac_u) * (1.0 - frac_v);
    let w01 = frac_u * (1.0 - frac_v);
    let w10 = (1.0 - frac_u) * frac_v;
    let w11 = frac_u * frac_v;

    let data = image.as_slice();
    let p00 = fetch(data, cols, rows, iu0, iv0, fill_value);
    let p01 = fetch(data, cols, rows, iu0 + 1, iv0, fill_value);
    let p10 = fetch(data, cols, rows, iu0, iv0 + 1, fill_value);
    let p11 = fetch(data, cols, rows, iu0 + 1, iv0 + 1, fill_value);

    let mut pixel = [0.0; C];
    for (k, value) in pixel.iter_mut().enumerate() {
        *value = p00[k] * w00 + p01[k] * w01 + p10[k] * w10 + p11[k] * w11;
    }

    pixel
}
