use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;
use stereocheck_image::{Image, ImageError, ImageSize};

use super::fast::fast_feature_detector;
use super::responses::harris_response_at;
use crate::filter::{gaussian_blur, spatial_gradient};
use crate::interpolation::InterpolationMode;
use crate::resize::resize;

/// Radius of the patch used to compute the keypoint orientation.
const ORIENTATION_RADIUS: isize = 15;

/// Half size of the square the descriptor test locations are drawn from.
const PATTERN_HALF_SIZE: i32 = 13;

/// Keypoints closer than this to the border of their level are discarded, so the
/// rotated descriptor pattern stays inside the image.
const EDGE_THRESHOLD: usize = 20;

/// A keypoint with its binary descriptor.
#[derive(Clone, Debug, PartialEq)]
pub struct OrbFeature {
    /// Column of the keypoint in the full resolution image.
    pub x: f32,
    /// Row of the keypoint in the full resolution image.
    pub y: f32,
    /// Pyramid level the keypoint was detected on.
    pub level: usize,
    /// Orientation of the keypoint in radians.
    pub angle: f32,
    /// Harris response of the keypoint.
    pub response: f32,
    /// 256 bit binary descriptor.
    pub descriptor: [u8; 32],
}

/// Oriented FAST keypoint detector with rotated BRIEF descriptors.
#[derive(Clone, Debug)]
pub struct OrbDetector {
    /// Total number of keypoints to keep over all pyramid levels.
    pub n_keypoints: usize,
    /// Number of pyramid levels.
    pub n_scales: usize,
    /// Scale factor between consecutive pyramid levels.
    pub downscale: f32,
    /// FAST intensity threshold, for images in `[0, 1]`.
    pub fast_threshold: f32,
    /// Number of contiguous circle pixels of a FAST corner.
    pub fast_n: usize,
    /// Harris sensitivity used to rank keypoints.
    pub harris_k: f32,
    pattern: Vec<[[i32; 2]; 2]>,
}

impl Default for OrbDetector {
    fn default() -> Self {
        Self {
            n_keypoints: 1000,
            n_scales: 8,
            downscale: 1.2,
            fast_threshold: 20.0 / 255.0,
            fast_n: 9,
            harris_k: 0.04,
            pattern: sampling_pattern(0x0b5e_55ed),
        }
    }
}

/// Draw the 256 point pairs compared by the descriptor.
///
/// The locations follow an isotropic gaussian clipped to the patch, which is the
/// sampling that performed best for BRIEF.
fn sampling_pattern(seed: u64) -> Vec<[[i32; 2]; 2]> {
    let mut rng = StdRng::seed_from_u64(seed);
    let sigma = PATTERN_HALF_SIZE as f32 * 2.0 / 5.0;
    let sample = |rng: &mut StdRng| -> i32 {
        // Box-Muller
        let u1: f32 = rng.random_range(f32::EPSILON..1.0);
        let u2: f32 = rng.random();
        let g = (-2.0 * u1.ln()).sqrt() * (std::f32::consts::TAU * u2).cos();
        ((g * sigma).round() as i32).clamp(-PATTERN_HALF_SIZE, PATTERN_HALF_SIZE)
    };
    (0..256)
        .map(|_| {
            [
                [sample(&mut rng), sample(&mut rng)],
                [sample(&mut rng), sample(&mut rng)],
            ]
        })
        .collect()
}

impl OrbDetector {
    /// Create a detector with the default parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the total number of keypoints.
    pub fn with_n_keypoints(mut self, n_keypoints: usize) -> Self {
        self.n_keypoints = n_keypoints;
        self
    }

    fn features_per_level(&self, n_levels: usize) -> Vec<usize> {
        let mut features_per_level = vec![0usize; n_levels];
        if n_levels == 0 {
            return features_per_level;
        }

        let factor = 1.0f32 / self.downscale;
        let mut n_desired = (self.n_keypoints as f32) * (1.0 - factor)
            / (1.0 - factor.powi(n_levels as i32)).max(f32::EPSILON);

        let mut sum = 0usize;
        for item in features_per_level.iter_mut().take(n_levels - 1) {
            let n = n_desired.round().max(0.0) as usize;
            *item = n;
            sum += n;
            n_desired *= factor;
        }
        features_per_level[n_levels - 1] = self.n_keypoints.saturating_sub(sum);

        features_per_level
    }

    fn build_pyramid(&self, src: &Image<f32, 1>) -> Result<Vec<Image<f32, 1>>, ImageError> {
        let mut pyramid = vec![src.clone()];
        for level in 1..self.n_scales.max(1) {
            let scale = self.downscale.powi(level as i32);
            let size = ImageSize {
                width: (src.width() as f32 / scale).round() as usize,
                height: (src.height() as f32 / scale).round() as usize,
            };
            if size.width <= 2 * EDGE_THRESHOLD || size.height <= 2 * EDGE_THRESHOLD {
                break;
            }

            // smooth the previous level before decimation
            let previous = &pyramid[level - 1];
            let sigma = 2.0 * self.downscale / 6.0;
            let mut smoothed = Image::from_size_val(previous.size(), 0.0f32)?;
            gaussian_blur(previous, &mut smoothed, (5, 5), (sigma, sigma))?;

            let mut next = Image::from_size_val(size, 0.0f32)?;
            resize(&smoothed, &mut next, InterpolationMode::Bilinear)?;
            pyramid.push(next);
        }
        Ok(pyramid)
    }

    /// Detect keypoints and compute their descriptors.
    ///
    /// Pyramid levels are processed in parallel. Within a level, keypoints are
    /// ranked by their Harris response.
    ///
    /// # Arguments
    ///
    /// * `src` - The source image with intensities in `[0, 1]`.
    pub fn detect_and_extract(&self, src: &Image<f32, 1>) -> Result<Vec<OrbFeature>, ImageError> {
        let pyramid = self.build_pyramid(src)?;
        let features_per_level = self.features_per_level(pyramid.len());

        let per_level = pyramid
            .par_iter()
            .enumerate()
            .map(|(level, image)| {
                let scale_x = src.width() as f32 / image.width() as f32;
                let scale_y = src.height() as f32 / image.height() as f32;
                let features = self.detect_level(image, features_per_level[level])?;
                Ok(features
                    .into_iter()
                    .map(|mut f| {
                        f.level = level;
                        f.x = (f.x + 0.5) * scale_x - 0.5;
                        f.y = (f.y + 0.5) * scale_y - 0.5;
                        f
                    })
                    .collect::<Vec<_>>())
            })
            .collect::<Result<Vec<_>, ImageError>>()?;

        let features: Vec<OrbFeature> = per_level.into_iter().flatten().collect();
        log::debug!(
            "orb: {} features over {} pyramid levels",
            features.len(),
            pyramid.len()
        );
        Ok(features)
    }

    fn detect_level(
        &self,
        image: &Image<f32, 1>,
        max_features: usize,
    ) -> Result<Vec<OrbFeature>, ImageError> {
        let corners =
            fast_feature_detector(image, self.fast_threshold, self.fast_n, EDGE_THRESHOLD);
        if corners.is_empty() || max_features == 0 {
            return Ok(vec![]);
        }

        let (dx, dy) = spatial_gradient(image)?;
        let mut ranked: Vec<(usize, usize, f32)> = corners
            .iter()
            .map(|c| (c.x, c.y, harris_response_at(&dx, &dy, c.x, c.y, 3, self.harris_k)))
            .collect();
        ranked.sort_by(|a, b| b.2.total_cmp(&a.2));
        ranked.truncate(max_features);

        let mut blurred = Image::from_size_val(image.size(), 0.0f32)?;
        gaussian_blur(image, &mut blurred, (7, 7), (2.0, 2.0))?;

        Ok(ranked
            .into_iter()
            .map(|(x, y, response)| {
                let angle = intensity_centroid_angle(image, x, y);
                OrbFeature {
                    x: x as f32,
                    y: y as f32,
                    level: 0,
                    angle,
                    response,
                    descriptor: self.describe(&blurred, x, y, angle),
                }
            })
            .collect())
    }

    fn describe(&self, blurred: &Image<f32, 1>, x: usize, y: usize, angle: f32) -> [u8; 32] {
        let (sin, cos) = angle.sin_cos();
        let cols = blurred.cols() as isize;
        let rows = blurred.rows() as isize;
        let data = blurred.as_slice();
        let sample = |p: [i32; 2]| -> f32 {
            let (px, py) = (p[0] as f32, p[1] as f32);
            let u = (x as f32 + cos * px - sin * py).round() as isize;
            let v = (y as f32 + sin * px + cos * py).round() as isize;
            data[(v.clamp(0, rows - 1) * cols + u.clamp(0, cols - 1)) as usize]
        };

        let mut descriptor = [0u8; 32];
        for (i, [p, q]) in self.pattern.iter().enumerate() {
            if sample(*p) < sample(*q) {
                descriptor[i / 8] |= 1 << (i % 8);
            }
        }
        descriptor
    }
}

/// Orientation of the intensity centroid of the circular patch around `(x, y)`.
fn intensity_centroid_angle(image: &Image<f32, 1>, x: usize, y: usize) -> f32 {
    let (cols, rows) = (image.cols() as isize, image.rows() as isize);
    let data = image.as_slice();
    let (mut m01, mut m10) = (0.0f32, 0.0f32);
    for dy in -ORIENTATION_RADIUS..=ORIENTATION_RADIUS {
        for dx in -ORIENTATION_RADIUS..=ORIENTATION_RADIUS {
            if dx * dx + dy * dy > ORIENTATION_RADIUS * ORIENTATION_RADIUS {
                continue;
            }
            let (u, v) = (x as isize + dx, y as isize + dy);
            if u < 0 || v < 0 || u >= cols || v >= rows {
                continue;
            }
            let value = data[(v * cols + u) as usize];
            m10 += dx as f32 * value;
            m01 += dy as f32 * value;
        }
    }
    m01.atan2(m10)
}
