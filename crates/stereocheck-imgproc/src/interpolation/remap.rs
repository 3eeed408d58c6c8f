use stereocheck_image::{Image, ImageDtype, ImageError};

use super::grid::PixelMap;
use super::interpolate::interpolate_pixel;
use super::InterpolationMode;
use crate::parallel;

/// Apply a generic geometric transformation to an image.
///
/// Every destination pixel is sampled from `src` at the location stored in `map`.
/// Locations outside the source image take `fill_value`.
///
/// # Arguments
///
/// * `src` - The input image container with shape (height, width, C).
/// * `dst` - The output image container with shape (height, width, C).
/// * `map` - The source coordinates of every destination pixel.
/// * `interpolation` - The interpolation mode to use.
/// * `fill_value` - The constant written where the map points outside the source.
///
/// # Errors
///
/// The output image must have the same size as the pixel map.
pub fn remap<T: ImageDtype, const C: usize>(
    src: &Image<T, C>,
    dst: &mut Image<T, C>,
    map: &PixelMap,
    interpolation: InterpolationMode,
    fill_value: [T; C],
) -> Result<(), ImageError> {
    if dst.size() != map.size() {
        return Err(ImageError::InvalidImageSize(
            map.size().width,
            map.size().height,
            dst.width(),
            dst.height(),
        ));
    }

    let fill: [f32; C] = fill_value.map(Into::into);

    // parallelize the remap operation by rows
    parallel::par_iter_rows_resample(dst, map, |x, y, dst_pixel| {
        let pixel = interpolate_pixel(src, x, y, interpolation, &fill);
        dst_pixel
            .iter_mut()
            .zip(pixel.iter())
            .for_each(|(d, &p)| *d = T::from_f32(p));
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stereocheck_image::ImageSize;

    #[test]
    fn remap_smoke() -> Result<(), ImageError> {
        let image = Image::<_, 1>::new(
            ImageSize {
                width: 3,
                height: 3,
            },
            vec![0f32, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0],
        )?;

        let new_size = [2, 2].into();
        let map = PixelMap::new(new_size, vec![0.0, 2.0, 0.0, 2.0], vec![0.0, 0.0, 2.0, 2.0])?;

        let mut image_transformed = Image::<_, 1>::from_size_val(new_size, 0.0)?;
        remap(
            &image,
            &mut image_transformed,
            &map,
            InterpolationMode::Bilinear,
            [0.0],
        )?;

        let expected = [0.0, 2.0, 6.0, 8.0];
        for (a, b) in image_transformed.as_slice().iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-6);
        }

        Ok(())
    }

    #[test]
    fn remap_fill_outside() -> Result<(), ImageError> {
        let size = ImageSize {
            width: 2,
            height: 1,
        };
        let image = Image::<u8, 3>::new(size, vec![10, 20, 30, 40, 50, 60])?;
        let map = PixelMap::new(size, vec![1.0, 5.0], vec![0.0, 0.0])?;

        let mut dst = Image::<u8, 3>::from_size_val(size, 0)?;
        remap(&image, &mut dst, &map, InterpolationMode::Nearest, [1, 2, 3])?;
        assert_eq!(dst.as_slice(), &[40, 50, 60, 1, 2, 3]);

        Ok(())
    }

    #[test]
    fn remap_size_mismatch() -> Result<(), ImageError> {
        let image = Image::<f32, 1>::from_size_val([4, 4].into(), 1.0)?;
        let map = PixelMap::identity([4, 4].into())?;
        let mut dst = Image::<f32, 1>::from_size_val([3, 4].into(), 0.0)?;
        let res = remap(&image, &mut dst, &map, InterpolationMode::Bilinear, [0.0]);
        assert_eq!(res, Err(ImageError::InvalidImageSize(4, 4, 3, 4)));
        Ok(())
    }
}
