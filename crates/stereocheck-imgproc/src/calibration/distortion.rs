use glam::{DMat3, DVec2, DVec3};
use stereocheck_image::{ImageError, ImageSize};

use super::stereo::{mat3_from_rows, orthonormal_deviation, RectificationResult};
use super::{CameraError, CameraIntrinsic, CameraProjection, FisheyeCamera};
use crate::interpolation::PixelMap;

/// Rays behind this depth in the rectified frame are not projected.
const MIN_DEPTH: f64 = 1e-9;

/// Largest deviation of `R^T R` from identity accepted for a stored
/// rectification, which calibration files keep to a few decimals.
const RECORD_ORTHONORMAL_TOL: f64 = 1e-4;

/// A rectified (undistorted) pinhole view of a camera.
///
/// Rays are exchanged in the original camera frame, so a rectified camera can be
/// combined with the [`FisheyeCamera`] it was derived from, or with another
/// rectified view of the same camera.
#[derive(Clone, Debug, PartialEq)]
pub struct RectifiedCamera {
    rotation: DMat3,
    intrinsic: CameraIntrinsic,
    size: ImageSize,
}

impl RectifiedCamera {
    /// Create a rectified camera from its rectification rotation and projection matrix.
    ///
    /// # Arguments
    ///
    /// * `rotation` - The row-major rotation from the camera frame to the rectified frame.
    /// * `projection` - The row-major 3x4 projection matrix, its left 3x3 block is used.
    /// * `size` - The size of the rectified image.
    ///
    /// # Errors
    ///
    /// Returns [`CameraError::InvalidIntrinsics`] when the rotation is not
    /// orthonormal with a positive determinant, the projection has no valid
    /// camera matrix or the size is empty.
    pub fn new(
        rotation: &[[f64; 3]; 3],
        projection: &[[f64; 4]; 3],
        size: ImageSize,
    ) -> Result<Self, CameraError> {
        if rotation.iter().flatten().any(|v| !v.is_finite()) {
            return Err(CameraError::InvalidIntrinsics(
                "rectification rotation has non-finite entries".to_string(),
            ));
        }
        let r = mat3_from_rows(rotation);
        let deviation = orthonormal_deviation(&r);
        if deviation > RECORD_ORTHONORMAL_TOL || r.determinant() <= 0.0 {
            return Err(CameraError::InvalidIntrinsics(format!(
                "rectification matrix is not a rotation (deviation {deviation:.3e}, det {:.3})",
                r.determinant()
            )));
        }
        if size.is_empty() {
            return Err(CameraError::InvalidIntrinsics(format!(
                "image size must be positive, got {size}"
            )));
        }
        Ok(Self {
            rotation: r,
            intrinsic: CameraIntrinsic::from_projection(projection)?,
            size,
        })
    }

    /// The rectified view of camera `index` (0 or 1) of a stereo rectification.
    pub fn from_rectification(
        result: &RectificationResult,
        index: usize,
    ) -> Result<Self, CameraError> {
        let (rotation, projection) = result.camera(index).ok_or_else(|| {
            CameraError::InvalidIntrinsics(format!("stereo camera index {index} is not 0 or 1"))
        })?;
        Self::new(rotation, projection, result.size)
    }

    /// The intrinsics of the rectified pinhole camera.
    pub fn intrinsic(&self) -> &CameraIntrinsic {
        &self.intrinsic
    }

    /// The rotation from the camera frame to the rectified frame.
    pub fn rotation(&self) -> &DMat3 {
        &self.rotation
    }
}

impl CameraProjection for RectifiedCamera {
    fn size(&self) -> ImageSize {
        self.size
    }

    fn project(&self, ray: DVec3) -> Option<DVec2> {
        let rectified = self.rotation * ray;
        if rectified.z <= MIN_DEPTH * rectified.length() || !rectified.is_finite() {
            return None;
        }
        Some(
            self.intrinsic
                .to_pixel(DVec2::new(rectified.x / rectified.z, rectified.y / rectified.z)),
        )
    }

    fn unproject(&self, pixel: DVec2) -> Option<DVec3> {
        let normalized = self.intrinsic.to_normalized(pixel);
        let rectified = DVec3::new(normalized.x, normalized.y, 1.0);
        Some(self.rotation.transpose() * rectified)
    }
}

/// Generate the map resampling images of `src` into the pixel grid of `dst`.
///
/// Every destination pixel is unprojected by `dst` and the ray projected by
/// `src`. Pixels without a valid ray or projection get an out of range sentinel,
/// so resampling writes the fill value there.
///
/// # Arguments
///
/// * `dst` - The camera whose pixel grid is produced.
/// * `src` - The camera whose images are sampled.
pub fn generate_remap_map<D, S>(dst: &D, src: &S) -> Result<PixelMap, ImageError>
where
    D: CameraProjection + ?Sized,
    S: CameraProjection + ?Sized,
{
    let map = PixelMap::from_fn(dst.size(), |x, y| {
        let pixel = DVec2::new(x as f64, y as f64);
        dst.unproject(pixel)
            .and_then(|ray| src.project(ray))
            .map(|p| [p.x, p.y])
    })?;

    let invalid = map.num_invalid();
    if invalid * 2 > map.size().area() {
        log::warn!(
            "{} of {} destination pixels have no source location",
            invalid,
            map.size().area()
        );
    }
    Ok(map)
}

/// Generate the map that undistorts and rectifies a fisheye image.
///
/// The map covers the rectified image and points into the raw fisheye image.
pub fn generate_rectify_map(
    camera: &FisheyeCamera,
    rectified: &RectifiedCamera,
) -> Result<PixelMap, ImageError> {
    generate_remap_map(rectified, camera)
}

/// Generate the map that distorts a rectified image back into the fisheye view.
///
/// The map covers the raw fisheye image and points into the rectified image.
pub fn generate_distort_map(
    camera: &FisheyeCamera,
    rectified: &RectifiedCamera,
) -> Result<PixelMap, ImageError> {
    generate_remap_map(camera, rectified)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::stereo::{
        mat3_to_rows, stereo_rectify, BaselineAxis, RectificationPose, StereoRectifyParams,
    };
    use crate::calibration::FisheyeDistortion;
    use approx::assert_relative_eq;

    fn camera() -> Result<FisheyeCamera, CameraError> {
        FisheyeCamera::new(
            CameraIntrinsic::new(500.0, 500.0, 320.0, 256.0),
            FisheyeDistortion {
                k1: 0.02,
                k2: -0.01,
                k3: 0.0,
                k4: 0.0,
            },
            ImageSize {
                width: 640,
                height: 512,
            },
        )
    }

    fn rectified(cam: &FisheyeCamera) -> Result<RectifiedCamera, Box<dyn std::error::Error>> {
        let pose = RectificationPose::from_baseline(0.12, BaselineAxis::X);
        let res = stereo_rectify(cam, cam, &pose, &StereoRectifyParams::default())?;
        Ok(RectifiedCamera::from_rectification(&res, 0)?)
    }

    #[test]
    fn test_identity_map() -> Result<(), Box<dyn std::error::Error>> {
        let cam = camera()?;
        let map = generate_remap_map(&cam, &cam)?;
        for (y, x) in [(0, 0), (100, 200), (256, 320), (400, 600)] {
            let [u, v] = map.get(x, y).ok_or("pixel outside the map")?;
            assert_relative_eq!(u, x as f32, epsilon = 1e-3);
            assert_relative_eq!(v, y as f32, epsilon = 1e-3);
        }
        Ok(())
    }

    #[test]
    fn test_distort_map_follows_camera_model() -> Result<(), Box<dyn std::error::Error>> {
        let cam = camera()?;
        let rect = rectified(&cam)?;
        let rectify_map = generate_rectify_map(&cam, &rect)?;
        let distort_map = generate_distort_map(&cam, &rect)?;

        // every rectified pixel sees a ray inside the fisheye field of view
        assert_eq!(rectify_map.num_invalid(), 0);

        for (x, y) in [(10, 10), (320, 256), (600, 480), (100, 400)] {
            let [u, v] = rectify_map.get(x, y).ok_or("pixel outside the map")?;
            let (u0, v0) = (u.floor() as usize, v.floor() as usize);
            // follow the rectified pixel into the fisheye image and back
            let [rx, ry] = distort_map.get(u0, v0).ok_or("pixel outside the map")?;
            let ray = cam.unproject_from_distorted(DVec2::new(u0 as f64, v0 as f64))?;
            let expected = rect.project(ray).ok_or("ray not visible")?;
            assert_relative_eq!(rx as f64, expected.x, epsilon = 1e-3);
            assert_relative_eq!(ry as f64, expected.y, epsilon = 1e-3);
        }
        Ok(())
    }

    #[test]
    fn test_rectified_camera_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let cam = camera()?;
        let rect = rectified(&cam)?;
        let pixel = DVec2::new(12.5, 400.25);
        let ray = rect.unproject(pixel).ok_or("no ray")?;
        let back = rect.project(ray).ok_or("not visible")?;
        assert_relative_eq!(back.x, pixel.x, epsilon = 1e-9);
        assert_relative_eq!(back.y, pixel.y, epsilon = 1e-9);

        // behind the rectified camera
        assert!(rect.project(-ray).is_none());
        Ok(())
    }

    #[test]
    fn test_rejects_non_rotation() {
        let projection = [
            [450.0, 0.0, 320.0, 0.0],
            [0.0, 450.0, 256.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
        ];
        let size = ImageSize {
            width: 640,
            height: 512,
        };
        let sheared = [[1.0, 0.05, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        let scaled = [[1.1, 0.0, 0.0], [0.0, 1.1, 0.0], [0.0, 0.0, 1.1]];
        let mirror = [[1.0, 0.0, 0.0], [0.0, -1.0, 0.0], [0.0, 0.0, 1.0]];
        for rotation in [sheared, scaled, mirror] {
            assert!(matches!(
                RectifiedCamera::new(&rotation, &projection, size),
                Err(CameraError::InvalidIntrinsics(_))
            ));
        }

        // six decimals as written by calibration tools
        let r = DMat3::from_rotation_y(0.01);
        let rounded = mat3_to_rows(&r).map(|row| row.map(|v| (v * 1e6).round() / 1e6));
        assert!(RectifiedCamera::new(&rounded, &projection, size).is_ok());
    }

    #[test]
    fn test_invalid_index() -> Result<(), Box<dyn std::error::Error>> {
        let cam = camera()?;
        let pose = RectificationPose::from_baseline(0.12, BaselineAxis::X);
        let res = stereo_rectify(&cam, &cam, &pose, &StereoRectifyParams::default())?;
        assert!(RectifiedCamera::from_rectification(&res, 2).is_err());
        Ok(())
    }
}
