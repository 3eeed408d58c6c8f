use glam::{DVec2, DVec3};
use serde::{Deserialize, Serialize};
use stereocheck_image::ImageSize;

use super::{CameraIntrinsic, CameraProjection, TermCriteria};

/// Rays closer than this to the optical axis project onto the principal point.
const AXIS_EPS: f64 = 1e-12;

/// Error types for the fisheye camera model.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CameraError {
    /// The camera parameters are malformed.
    #[error("Invalid intrinsics: {0}")]
    InvalidIntrinsics(String),

    /// The ray lies outside the domain where the fisheye model is invertible.
    #[error("Ray angle {theta} rad is outside the valid field of view ({max_theta} rad)")]
    ProjectionOutOfRange {
        /// Angle between the ray and the optical axis.
        theta: f64,
        /// Largest angle accepted by the camera.
        max_theta: f64,
    },

    /// The inverse distortion did not converge for the pixel.
    #[error("Failed to unproject pixel ({0}, {1})")]
    UnprojectionFailed(f64, f64),
}

/// Fisheye (equidistant) distortion coefficients
///
/// The distorted angle is `theta_d = theta * (1 + k1 theta^2 + k2 theta^4 + k3 theta^6 + k4 theta^8)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FisheyeDistortion {
    /// The first radial distortion coefficient
    pub k1: f64,
    /// The second radial distortion coefficient
    pub k2: f64,
    /// The third radial distortion coefficient
    pub k3: f64,
    /// The fourth radial distortion coefficient
    pub k4: f64,
}

impl FisheyeDistortion {
    /// Create the coefficients from a slice of exactly four values.
    pub fn from_slice(coeffs: &[f64]) -> Result<Self, CameraError> {
        match coeffs {
            [k1, k2, k3, k4] if coeffs.iter().all(|k| k.is_finite()) => Ok(Self {
                k1: *k1,
                k2: *k2,
                k3: *k3,
                k4: *k4,
            }),
            [_, _, _, _] => Err(CameraError::InvalidIntrinsics(format!(
                "non-finite distortion coefficients {coeffs:?}"
            ))),
            _ => Err(CameraError::InvalidIntrinsics(format!(
                "expected 4 fisheye distortion coefficients, got {}",
                coeffs.len()
            ))),
        }
    }

    /// The coefficients as `[k1, k2, k3, k4]`.
    pub fn to_array(&self) -> [f64; 4] {
        [self.k1, self.k2, self.k3, self.k4]
    }

    /// Distorted angle for the incidence angle `theta`.
    #[inline]
    pub fn distort_theta(&self, theta: f64) -> f64 {
        let theta2 = theta * theta;
        let theta4 = theta2 * theta2;
        let theta6 = theta4 * theta2;
        let theta8 = theta4 * theta4;
        theta * (1.0 + self.k1 * theta2 + self.k2 * theta4 + self.k3 * theta6 + self.k4 * theta8)
    }

    /// Derivative of [`FisheyeDistortion::distort_theta`] with respect to `theta`.
    #[inline]
    pub fn distort_theta_derivative(&self, theta: f64) -> f64 {
        let theta2 = theta * theta;
        let theta4 = theta2 * theta2;
        let theta6 = theta4 * theta2;
        let theta8 = theta4 * theta4;
        1.0 + 3.0 * self.k1 * theta2
            + 5.0 * self.k2 * theta4
            + 7.0 * self.k3 * theta6
            + 9.0 * self.k4 * theta8
    }

    /// Invert [`FisheyeDistortion::distort_theta`] with Newton iterations.
    ///
    /// Returns `None` when the solver does not converge within the criteria.
    pub fn undistort_theta(&self, theta_d: f64, criteria: &TermCriteria) -> Option<f64> {
        let mut theta = theta_d;
        for _ in 0..criteria.max_iter {
            let derivative = self.distort_theta_derivative(theta);
            if derivative.abs() < f64::EPSILON {
                return None;
            }
            let step = (self.distort_theta(theta) - theta_d) / derivative;
            theta -= step;
            if !theta.is_finite() {
                return None;
            }
            if step.abs() < criteria.eps {
                return Some(theta);
            }
        }
        None
    }
}

/// A camera following the fisheye (equidistant) projection model.
///
/// Rays are expressed in the camera frame: x right, y down, z along the optical axis.
#[derive(Clone, Debug, PartialEq)]
pub struct FisheyeCamera {
    intrinsic: CameraIntrinsic,
    distortion: FisheyeDistortion,
    size: ImageSize,
    max_theta: f64,
    criteria: TermCriteria,
}

impl FisheyeCamera {
    /// Create a fisheye camera.
    ///
    /// The field of view defaults to 180 degrees and the inverse projection runs
    /// with [`TermCriteria::default`].
    ///
    /// # Errors
    ///
    /// Returns [`CameraError::InvalidIntrinsics`] for non-finite parameters,
    /// non-positive focal lengths or an empty image size.
    pub fn new(
        intrinsic: CameraIntrinsic,
        distortion: FisheyeDistortion,
        size: ImageSize,
    ) -> Result<Self, CameraError> {
        intrinsic.validate()?;
        FisheyeDistortion::from_slice(&distortion.to_array())?;
        if size.is_empty() {
            return Err(CameraError::InvalidIntrinsics(format!(
                "image size must be positive, got {size}"
            )));
        }
        Ok(Self {
            intrinsic,
            distortion,
            size,
            max_theta: std::f64::consts::FRAC_PI_2,
            criteria: TermCriteria::default(),
        })
    }

    /// Set the largest angle from the optical axis the camera accepts.
    pub fn with_max_theta(mut self, max_theta: f64) -> Self {
        self.max_theta = max_theta;
        self
    }

    /// Set the stopping criteria of the inverse projection.
    pub fn with_criteria(mut self, criteria: TermCriteria) -> Self {
        self.criteria = criteria;
        self
    }

    /// The camera intrinsics.
    pub fn intrinsic(&self) -> &CameraIntrinsic {
        &self.intrinsic
    }

    /// The distortion coefficients.
    pub fn distortion(&self) -> &FisheyeDistortion {
        &self.distortion
    }

    /// The image size.
    pub fn size(&self) -> ImageSize {
        self.size
    }

    /// Largest angle from the optical axis accepted by the camera.
    pub fn max_theta(&self) -> f64 {
        self.max_theta
    }

    /// Project a ray in the camera frame onto the distorted image.
    ///
    /// The ray need not be normalized.
    ///
    /// # Errors
    ///
    /// Returns [`CameraError::ProjectionOutOfRange`] when the ray angle exceeds the
    /// field of view or falls where the distortion polynomial stops increasing.
    pub fn project_to_distorted(&self, ray: DVec3) -> Result<DVec2, CameraError> {
        let norm = ray.length();
        if !norm.is_finite() || norm == 0.0 {
            return Err(CameraError::ProjectionOutOfRange {
                theta: f64::NAN,
                max_theta: self.max_theta,
            });
        }

        let r = ray.x.hypot(ray.y);
        let theta = r.atan2(ray.z);
        if theta > self.max_theta || self.distortion.distort_theta_derivative(theta) <= 0.0 {
            return Err(CameraError::ProjectionOutOfRange {
                theta,
                max_theta: self.max_theta,
            });
        }

        // on the optical axis the direction is undefined, use the principal point
        if r <= AXIS_EPS * norm {
            return Ok(self.intrinsic.to_pixel(DVec2::ZERO));
        }

        let theta_d = self.distortion.distort_theta(theta);
        let scale = theta_d / r;
        Ok(self
            .intrinsic
            .to_pixel(DVec2::new(ray.x * scale, ray.y * scale)))
    }

    /// Recover the unit ray in the camera frame seen by a distorted pixel.
    ///
    /// # Errors
    ///
    /// Returns [`CameraError::UnprojectionFailed`] when the Newton solve does not
    /// converge, and [`CameraError::ProjectionOutOfRange`] when the recovered angle
    /// is negative or outside the field of view.
    pub fn unproject_from_distorted(&self, pixel: DVec2) -> Result<DVec3, CameraError> {
        let pw = self.intrinsic.to_normalized(pixel);
        let theta_d = pw.length();
        if !theta_d.is_finite() {
            return Err(CameraError::UnprojectionFailed(pixel.x, pixel.y));
        }

        // the principal point sees the optical axis
        if theta_d < AXIS_EPS {
            return Ok(DVec3::Z);
        }

        let theta = self
            .distortion
            .undistort_theta(theta_d, &self.criteria)
            .ok_or(CameraError::UnprojectionFailed(pixel.x, pixel.y))?;

        // a flipped sign means the solver left the monotonic branch
        if theta < 0.0 || theta > self.max_theta {
            return Err(CameraError::ProjectionOutOfRange {
                theta,
                max_theta: self.max_theta,
            });
        }

        let scale = theta.sin() / theta_d;
        Ok(DVec3::new(pw.x * scale, pw.y * scale, theta.cos()))
    }

    /// The unit ray at the field of view limit in the direction of `pixel`.
    ///
    /// A pixel at the principal point has no direction and returns the optical axis.
    pub fn boundary_ray(&self, pixel: DVec2) -> DVec3 {
        let direction = self.intrinsic.to_normalized(pixel).normalize_or_zero();
        if direction == DVec2::ZERO {
            return DVec3::Z;
        }
        let (sin, cos) = self.max_theta.sin_cos();
        DVec3::new(direction.x * sin, direction.y * sin, cos)
    }

    /// Unproject `pixel`, falling back to [`Self::boundary_ray`] where the
    /// inverse model has no solution.
    pub fn unproject_or_boundary(&self, pixel: DVec2) -> DVec3 {
        self.unproject_from_distorted(pixel).unwrap_or_else(|err| {
            log::debug!("pixel ({}, {}) clamped to the field of view: {err}", pixel.x, pixel.y);
            self.boundary_ray(pixel)
        })
    }
}

impl CameraProjection for FisheyeCamera {
    fn size(&self) -> ImageSize {
        self.size
    }

    fn project(&self, ray: DVec3) -> Option<DVec2> {
        self.project_to_distorted(ray).ok()
    }

    fn unproject(&self, pixel: DVec2) -> Option<DVec3> {
        self.unproject_from_distorted(pixel).ok()
    }
}
