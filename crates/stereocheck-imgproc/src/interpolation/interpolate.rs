use serde::{Deserialize, Serialize};
use stereocheck_image::{Image, ImageDtype};

use super::bilinear::bilinear_interpolation;
use super::nearest::nearest_neighbor_interpolation;

/// Interpolation mode for the remap and resize operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpolationMode {
    /// Bilinear interpolation
    #[default]
    Bilinear,
    /// Nearest neighbor interpolation
    Nearest,
}

/// Kernel for interpolating a pixel value
///
/// # Arguments
///
/// * `image` - The input image container with shape (height, width, C).
/// * `u` - The x coordinate of the pixel to interpolate.
/// * `v` - The y coordinate of the pixel to interpolate.
/// * `interpolation` - The interpolation mode to use.
/// * `fill_value` - The value used for samples falling outside the image.
///
/// # Returns
///
/// The interpolated pixel value for every channel.
pub fn interpolate_pixel<T: ImageDtype, const C: usize>(
    image: &Image<T, C>,
    u: f32,
    v: f32,
    interpolation: InterpolationMode,
    fill_value: &[f32; C],
) -> [f32; C] {
    if !u.is_finite() || !v.is_finite() {
        return *fill_value;
    }
    match interpolation {
        InterpolationMode::Bilinear => bilinear_interpolation(image, u, v, fill_value),
        InterpolationMode::Nearest => nearest_neighbor_interpolation(image, u, v, fill_value),
    }
}
