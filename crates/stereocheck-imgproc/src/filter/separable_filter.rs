use rayon::prelude::*;
use stereocheck_image::{Image, ImageDtype, ImageError};

/// Apply a separable filter to an image.
///
/// The horizontal pass runs first into a temporary `f32` buffer, followed by the
/// vertical pass. Samples outside the image replicate the nearest border pixel.
///
/// # Arguments
///
/// * `src` - The source image with shape (H, W, C).
/// * `dst` - The destination image with shape (H, W, C).
/// * `kernel_x` - The horizontal kernel.
/// * `kernel_y` - The vertical kernel.
pub fn separable_filter<T: ImageDtype, const C: usize>(
    src: &Image<T, C>,
    dst: &mut Image<T, C>,
    kernel_x: &[f32],
    kernel_y: &[f32],
) -> Result<(), ImageError> {
    if src.size() != dst.size() {
        return Err(ImageError::InvalidImageSize(
            src.cols(),
            src.rows(),
            dst.cols(),
            dst.rows(),
        ));
    }

    let (rows, cols) = (src.rows(), src.cols());
    let half_x = (kernel_x.len() / 2) as isize;
    let half_y = (kernel_y.len() / 2) as isize;
    let src_data = src.as_slice();

    let mut temp = vec![0.0f32; src_data.len()];

    // horizontal pass
    temp.par_chunks_exact_mut(cols * C)
        .enumerate()
        .for_each(|(r, row_temp)| {
            let row_offset = r * cols * C;
            for c in 0..cols {
                let mut acc = [0.0f32; C];
                for (i, &k) in kernel_x.iter().enumerate() {
                    let x = (c as isize + i as isize - half_x).clamp(0, cols as isize - 1) as usize;
                    let idx = row_offset + x * C;
                    for (ch, a) in acc.iter_mut().enumerate() {
                        *a += src_data[idx + ch].into() * k;
                    }
                }
                row_temp[c * C..(c + 1) * C].copy_from_slice(&acc);
            }
        });

    // vertical pass
    dst.as_slice_mut()
        .par_chunks_exact_mut(cols * C)
        .enumerate()
        .for_each(|(r, row_dst)| {
            for c in 0..cols {
                let mut acc = [0.0f32; C];
                for (i, &k) in kernel_y.iter().enumerate() {
                    let y = (r as isize + i as isize - half_y).clamp(0, rows as isize - 1) as usize;
                    let idx = (y * cols + c) * C;
                    for (ch, a) in acc.iter_mut().enumerate() {
                        *a += temp[idx + ch] * k;
                    }
                }
                for (ch, &a) in acc.iter().enumerate() {
                    row_dst[c * C + ch] = T::from_f32(a);
                }
            }
        });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stereocheck_image::ImageSize;

    #[test]
    fn test_separable_filter_box() -> Result<(), ImageError> {
        let size = ImageSize {
            width: 5,
            height: 5,
        };
        let mut data = vec![0.0f32; 25];
        data[12] = 9.0;
        let img = Image::<f32, 1>::new(size, data)?;
        let mut dst = Image::<f32, 1>::from_size_val(size, 0.0)?;

        let kernel = [1.0 / 3.0; 3];
        separable_filter(&img, &mut dst, &kernel, &kernel)?;

        let out = dst.as_slice();
        for r in 0..5 {
            for c in 0..5 {
                let expected = if (1..=3).contains(&r) && (1..=3).contains(&c) {
                    1.0
                } else {
                    0.0
                };
                assert!((out[r * 5 + c] - expected).abs() < 1e-6);
            }
        }
        Ok(())
    }
}
