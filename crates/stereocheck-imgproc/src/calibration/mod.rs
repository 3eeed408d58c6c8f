use glam::{DVec2, DVec3};
use serde::{Deserialize, Serialize};
use stereocheck_image::ImageSize;

/// pixel map generation between camera representations.
pub mod distortion;

/// fisheye (equidistant) camera model.
pub mod fisheye;

/// stereo rectification of a fisheye camera pair.
pub mod stereo;

pub use fisheye::{CameraError, FisheyeCamera, FisheyeDistortion};

/// Stopping criteria for iterative solvers.
///
/// # Fields
///
/// * `max_iter` - The maximum number of iterations
/// * `eps` - The step size below which the solver stops
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TermCriteria {
    /// The maximum number of iterations
    pub max_iter: usize,
    /// The step size below which the solver stops
    pub eps: f64,
}

impl Default for TermCriteria {
    fn default() -> Self {
        Self {
            max_iter: 10,
            eps: 1e-6,
        }
    }
}

/// Represents the instrinsic parameters of a camera
///
/// The camera matrix is `[[fx, skew, cx], [0, fy, cy], [0, 0, 1]]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsic {
    /// The focal length in the x direction
    pub fx: f64,
    /// The focal length in the y direction
    pub fy: f64,
    /// The x coordinate of the principal point
    pub cx: f64,
    /// The y coordinate of the principal point
    pub cy: f64,
    /// The skew coefficient between the x and y axis
    #[serde(default)]
    pub skew: f64,
}

impl CameraIntrinsic {
    /// Create intrinsics with zero skew.
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            skew: 0.0,
        }
    }

    /// Read the intrinsics from a row-major 3x3 camera matrix.
    ///
    /// # Errors
    ///
    /// The matrix must be upper triangular with a last row of `[0, 0, 1]`, finite
    /// entries and positive focal lengths.
    pub fn from_matrix(k: &[[f64; 3]; 3]) -> Result<Self, CameraError> {
        if k.iter().flatten().any(|v| !v.is_finite()) {
            return Err(CameraError::InvalidIntrinsics(
                "camera matrix has non-finite entries".to_string(),
            ));
        }
        if k[1][0] != 0.0 || k[2] != [0.0, 0.0, 1.0] {
            return Err(CameraError::InvalidIntrinsics(format!(
                "camera matrix is not of the form [[fx, s, cx], [0, fy, cy], [0, 0, 1]]: {k:?}"
            )));
        }
        let intrinsic = Self {
            fx: k[0][0],
            fy: k[1][1],
            cx: k[0][2],
            cy: k[1][2],
            skew: k[0][1],
        };
        intrinsic.validate()?;
        Ok(intrinsic)
    }

    /// Read the intrinsics from the left 3x3 block of a 3x4 projection matrix.
    pub fn from_projection(p: &[[f64; 4]; 3]) -> Result<Self, CameraError> {
        Self::from_matrix(&[
            [p[0][0], p[0][1], p[0][2]],
            [p[1][0], p[1][1], p[1][2]],
            [p[2][0], p[2][1], p[2][2]],
        ])
    }

    /// The row-major 3x3 camera matrix.
    pub fn to_matrix(&self) -> [[f64; 3]; 3] {
        [
            [self.fx, self.skew, self.cx],
            [0.0, self.fy, self.cy],
            [0.0, 0.0, 1.0],
        ]
    }

    /// Check that all parameters are finite and the focal lengths positive.
    pub fn validate(&self) -> Result<(), CameraError> {
        let values = [self.fx, self.fy, self.cx, self.cy, self.skew];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(CameraError::InvalidIntrinsics(format!(
                "non-finite intrinsics {self:?}"
            )));
        }
        if self.fx <= 0.0 || self.fy <= 0.0 {
            return Err(CameraError::InvalidIntrinsics(format!(
                "focal lengths must be positive, got fx={} fy={}",
                self.fx, self.fy
            )));
        }
        Ok(())
    }

    /// Map normalized image coordinates to pixels.
    #[inline]
    pub fn to_pixel(&self, normalized: DVec2) -> DVec2 {
        DVec2::new(
            self.fx * normalized.x + self.skew * normalized.y + self.cx,
            self.fy * normalized.y + self.cy,
        )
    }

    /// Map pixels to normalized image coordinates.
    #[inline]
    pub fn to_normalized(&self, pixel: DVec2) -> DVec2 {
        let y = (pixel.y - self.cy) / self.fy;
        let x = (pixel.x - self.cx - self.skew * y) / self.fx;
        DVec2::new(x, y)
    }
}

/// A camera able to map between pixels and viewing rays.
///
/// Rays are expressed in a frame chosen by the implementation; cameras combined
/// into one pixel map must agree on it.
pub trait CameraProjection: Sync {
    /// Size of the images produced by the camera.
    fn size(&self) -> ImageSize;

    /// Pixel hit by the ray, `None` when the camera cannot see it.
    fn project(&self, ray: DVec3) -> Option<DVec2>;

    /// Ray through the pixel, `None` when the pixel has no valid ray.
    fn unproject(&self, pixel: DVec2) -> Option<DVec3>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intrinsic_from_matrix() -> Result<(), CameraError> {
        let k = [[500.0, 0.0, 320.0], [0.0, 500.0, 256.0], [0.0, 0.0, 1.0]];
        let intrinsic = CameraIntrinsic::from_matrix(&k)?;
        assert_eq!(intrinsic, CameraIntrinsic::new(500.0, 500.0, 320.0, 256.0));
        assert_eq!(intrinsic.to_matrix(), k);
        Ok(())
    }

    #[test]
    fn test_intrinsic_rejects_malformed() {
        let bad_row = [[500.0, 0.0, 320.0], [0.0, 500.0, 256.0], [0.0, 1.0, 1.0]];
        assert!(matches!(
            CameraIntrinsic::from_matrix(&bad_row),
            Err(CameraError::InvalidIntrinsics(_))
        ));
        let negative_f = [[-5.0, 0.0, 320.0], [0.0, 500.0, 256.0], [0.0, 0.0, 1.0]];
        assert!(matches!(
            CameraIntrinsic::from_matrix(&negative_f),
            Err(CameraError::InvalidIntrinsics(_))
        ));
    }

    #[test]
    fn test_normalized_pixel_inverse() {
        let mut intrinsic = CameraIntrinsic::new(450.0, 460.0, 300.0, 200.0);
        intrinsic.skew = 2.5;
        let pixel = DVec2::new(123.4, 56.7);
        let back = intrinsic.to_pixel(intrinsic.to_normalized(pixel));
        assert!((back - pixel).length() < 1e-9);
    }
}
