use glam::{DMat3, DQuat, DVec2, DVec3};
use serde::{Deserialize, Serialize};
use stereocheck_image::ImageSize;

use super::{CameraError, CameraIntrinsic, FisheyeCamera};

/// Largest deviation of `R^T R` from identity accepted for a rotation.
const ORTHONORMAL_TOL: f64 = 1e-6;

/// Image edges are bounded to this normalized radius, `tan(85 deg)`, when sizing
/// the rectified camera. A pinhole view cannot hold rays at 90 degrees.
const MAX_EDGE_TAN: f64 = 11.430_052_302_761_343;

/// Error types for stereo rectification.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RectifyError {
    /// The relative rotation is not a proper rotation matrix.
    #[error("Rotation is not orthonormal, max deviation from identity {0}")]
    NonOrthonormalRotation(f64),

    /// The translation has non-finite components.
    #[error("Translation has non-finite components: {0:?}")]
    NonFiniteTranslation([f64; 3]),

    /// The baseline does not lie along the configured axis.
    #[error("Baseline is configured along {expected:?} but the translation is {translation:?}")]
    BaselineAxisMismatch {
        /// The configured axis.
        expected: BaselineAxis,
        /// The translation that was supplied.
        translation: [f64; 3],
    },

    /// A rectification parameter is out of its range.
    #[error("Invalid rectification parameter: {0}")]
    InvalidParameter(String),

    /// The two cameras do not share an image size.
    #[error("Camera image sizes differ: {0} and {1}")]
    SizeMismatch(ImageSize, ImageSize),

    /// The new camera matrix could not be computed.
    #[error("Failed to estimate a finite rectified camera matrix")]
    DegenerateCameraMatrix,

    /// The camera model failed.
    #[error(transparent)]
    Camera(#[from] CameraError),
}

/// Axis of the camera frame carrying the stereo baseline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineAxis {
    /// Side by side cameras.
    #[default]
    X,
    /// Cameras stacked vertically.
    Y,
}

impl BaselineAxis {
    fn index(&self) -> usize {
        match self {
            BaselineAxis::X => 0,
            BaselineAxis::Y => 1,
        }
    }
}

/// Relative pose between the two cameras of a stereo pair.
///
/// A point `X1` in the first camera frame is `X2 = R X1 + T` in the second one.
/// The norm of `T` is the metric baseline and its sign orders the cameras.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RectificationPose {
    /// The row-major rotation from the first to the second camera frame.
    pub rotation: [[f64; 3]; 3],
    /// The translation from the first to the second camera frame.
    pub translation: [f64; 3],
}

impl RectificationPose {
    /// Create a pose, checking that the rotation is orthonormal with positive determinant.
    pub fn new(rotation: [[f64; 3]; 3], translation: [f64; 3]) -> Result<Self, RectifyError> {
        let pose = Self {
            rotation,
            translation,
        };
        pose.validate()?;
        Ok(pose)
    }

    /// A pose with identity rotation and the given baseline along `axis`.
    pub fn from_baseline(baseline: f64, axis: BaselineAxis) -> Self {
        let mut translation = [0.0; 3];
        translation[axis.index()] = baseline;
        Self {
            rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            translation,
        }
    }

    /// The pose of the first camera seen from the second one.
    pub fn inverse(&self) -> Self {
        let r = mat3_from_rows(&self.rotation);
        let rt = r.transpose();
        let t = -(rt * DVec3::from_array(self.translation));
        Self {
            rotation: mat3_to_rows(&rt),
            translation: t.to_array(),
        }
    }

    /// Metric distance between the camera centres.
    pub fn baseline(&self) -> f64 {
        DVec3::from_array(self.translation).length()
    }

    /// Check the rotation and translation.
    pub fn validate(&self) -> Result<(), RectifyError> {
        if self.translation.iter().any(|t| !t.is_finite()) {
            return Err(RectifyError::NonFiniteTranslation(self.translation));
        }
        let r = mat3_from_rows(&self.rotation);
        let deviation = orthonormal_deviation(&r);
        if !deviation.is_finite() || deviation > ORTHONORMAL_TOL || r.determinant() <= 0.0 {
            return Err(RectifyError::NonOrthonormalRotation(deviation));
        }
        Ok(())
    }

    /// Check that the baseline lies along `axis`.
    ///
    /// The configured component must carry the largest magnitude. A zero
    /// translation is accepted for any axis.
    pub fn check_axis(&self, axis: BaselineAxis) -> Result<(), RectifyError> {
        let t = self.translation;
        let along = t[axis.index()].abs();
        if t.iter().any(|c| c.abs() > along) {
            return Err(RectifyError::BaselineAxisMismatch {
                expected: axis,
                translation: t,
            });
        }
        Ok(())
    }
}

/// Parameters of the stereo rectification.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StereoRectifyParams {
    /// Trade-off between the largest focal length (0, only valid pixels) and the
    /// full field of view (1).
    pub balance: f64,
    /// Divisor applied to the new focal length, values above 1 widen the view.
    pub fov_scale: f64,
    /// Share the principal point between both cameras so that points at
    /// infinity have zero disparity.
    pub zero_disparity: bool,
    /// Axis of the camera frame expected to carry the baseline.
    pub baseline_axis: BaselineAxis,
    /// Size of the rectified images, the camera size when unset.
    pub new_size: Option<ImageSize>,
}

impl Default for StereoRectifyParams {
    fn default() -> Self {
        Self {
            balance: 0.0,
            fov_scale: 1.0,
            zero_disparity: true,
            baseline_axis: BaselineAxis::X,
            new_size: None,
        }
    }
}

impl StereoRectifyParams {
    fn validate(&self) -> Result<(), RectifyError> {
        if !(0.0..=1.0).contains(&self.balance) {
            return Err(RectifyError::InvalidParameter(format!(
                "balance must be in [0, 1], got {}",
                self.balance
            )));
        }
        if !(self.fov_scale.is_finite() && self.fov_scale > 0.0) {
            return Err(RectifyError::InvalidParameter(format!(
                "fov_scale must be positive, got {}",
                self.fov_scale
            )));
        }
        if let Some(size) = self.new_size {
            if size.is_empty() {
                return Err(RectifyError::InvalidParameter(format!(
                    "new_size must be non-empty, got {size}"
                )));
            }
        }
        Ok(())
    }
}

/// Output of the stereo rectification.
///
/// `r1`/`r2` rotate each original camera frame into the common rectified frame.
/// `p1`/`p2` are the projection matrices of the rectified pinhole cameras in that
/// frame, `p2[0][3] = fx * tx` carries the baseline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RectificationResult {
    /// Rectification rotation of the first camera.
    pub r1: [[f64; 3]; 3],
    /// Rectification rotation of the second camera.
    pub r2: [[f64; 3]; 3],
    /// Projection matrix of the first rectified camera.
    pub p1: [[f64; 4]; 3],
    /// Projection matrix of the second rectified camera.
    pub p2: [[f64; 4]; 3],
    /// Disparity to depth reprojection matrix.
    pub q: [[f64; 4]; 4],
    /// Size of the rectified images.
    pub size: ImageSize,
}

impl RectificationResult {
    /// Rotation and projection of camera `index` (0 or 1).
    pub fn camera(&self, index: usize) -> Option<(&[[f64; 3]; 3], &[[f64; 4]; 3])> {
        match index {
            0 => Some((&self.r1, &self.p1)),
            1 => Some((&self.r2, &self.p2)),
            _ => None,
        }
    }

    /// Focal length shared by both rectified cameras.
    pub fn focal_length(&self) -> f64 {
        self.p1[0][0]
    }

    /// Signed baseline in the rectified frame, in the unit of the translation.
    pub fn baseline(&self) -> f64 {
        self.p2[0][3] / self.p2[0][0]
    }

    /// Reproject a pixel of the first rectified image with its disparity to 3D.
    ///
    /// The disparity is `x1 - x2`. Returns `None` when the point is at infinity.
    pub fn reproject(&self, pixel: DVec2, disparity: f64) -> Option<DVec3> {
        let v = [pixel.x, pixel.y, disparity, 1.0];
        let mut out = [0.0; 4];
        for (o, row) in out.iter_mut().zip(self.q.iter()) {
            *o = row.iter().zip(v.iter()).map(|(a, b)| a * b).sum();
        }
        let w = out[3];
        if w.abs() < f64::EPSILON {
            return None;
        }
        let point = DVec3::new(out[0] / w, out[1] / w, out[2] / w);
        point.is_finite().then_some(point)
    }

    /// Depth of a point of the first rectified image from its disparity.
    pub fn depth_from_disparity(&self, disparity: f64) -> Option<f64> {
        let cx = self.p1[0][2];
        let cy = self.p1[1][2];
        self.reproject(DVec2::new(cx, cy), disparity).map(|p| p.z)
    }
}

/// Build a glam matrix from a row-major array.
pub fn mat3_from_rows(m: &[[f64; 3]; 3]) -> DMat3 {
    DMat3::from_cols_array_2d(m).transpose()
}

/// Convert a glam matrix to a row-major array.
pub fn mat3_to_rows(m: &DMat3) -> [[f64; 3]; 3] {
    m.transpose().to_cols_array_2d()
}

/// Largest absolute entry of `R^T R - I`.
pub(crate) fn orthonormal_deviation(r: &DMat3) -> f64 {
    (r.transpose() * *r - DMat3::IDENTITY)
        .to_cols_array()
        .iter()
        .fold(0.0f64, |acc, v| acc.max(v.abs()))
}

/// Normalized image point of an edge ray, bounded to `MAX_EDGE_TAN`.
fn edge_point(ray: DVec3) -> DVec2 {
    let lateral = DVec2::new(ray.x, ray.y);
    if ray.z * MAX_EDGE_TAN <= lateral.length() {
        return lateral.normalize_or_zero() * MAX_EDGE_TAN;
    }
    lateral / ray.z
}

/// Rotation by the angle-axis vector `w`.
fn rodrigues(w: DVec3) -> DMat3 {
    let angle = w.length();
    if angle < f64::EPSILON {
        return DMat3::IDENTITY;
    }
    DMat3::from_axis_angle(w / angle, angle)
}

/// Angle-axis vector of the rotation `r`, with an angle in `[0, pi]`.
fn rotation_vector(r: &DMat3) -> DVec3 {
    let mut q = DQuat::from_mat3(r).normalize();
    if q.w < 0.0 {
        q = -q;
    }
    let (axis, angle) = q.to_axis_angle();
    axis * angle
}

/// Estimate the pinhole camera matrix used to undistort and rectify a fisheye camera.
///
/// The midpoints of the four image edges are unprojected, rotated by `rotation`
/// and the focal length is chosen between the one keeping all of them inside the
/// image (`balance = 1`) and the one keeping only the closest (`balance = 0`).
///
/// An edge outside the field of view of the camera is taken at the field of view
/// limit, and edges are bounded to 85 degrees from the rectified optical axis.
///
/// # Arguments
///
/// * `camera` - The fisheye camera.
/// * `rotation` - The rotation applied to the camera frame.
/// * `balance` - The trade-off between cropping and field of view, in `[0, 1]`.
/// * `fov_scale` - The divisor of the focal length.
/// * `new_size` - The size of the new image, the camera size when `None`.
pub fn estimate_new_camera_matrix(
    camera: &FisheyeCamera,
    rotation: &DMat3,
    balance: f64,
    fov_scale: f64,
    new_size: Option<ImageSize>,
) -> Result<CameraIntrinsic, RectifyError> {
    let size = camera.size();
    let (w, h) = (size.width as f64, size.height as f64);
    let balance = balance.clamp(0.0, 1.0);

    let edges = [
        DVec2::new(w / 2.0, 0.0),
        DVec2::new(w, h / 2.0),
        DVec2::new(w / 2.0, h),
        DVec2::new(0.0, h / 2.0),
    ];

    let intrinsic = camera.intrinsic();
    let aspect_ratio = intrinsic.fx / intrinsic.fy;

    let mut points = [DVec2::ZERO; 4];
    for (point, edge) in points.iter_mut().zip(edges.iter()) {
        let p = edge_point(*rotation * camera.unproject_or_boundary(*edge));
        *point = DVec2::new(p.x, p.y * aspect_ratio);
    }

    let cn = points.iter().fold(DVec2::ZERO, |acc, p| acc + *p) / 4.0;
    let (min, max) = points
        .iter()
        .fold((DVec2::splat(f64::MAX), DVec2::splat(f64::MIN)), |(lo, hi), p| {
            (lo.min(*p), hi.max(*p))
        });

    let focals = [
        w * 0.5 / (cn.x - min.x),
        w * 0.5 / (max.x - cn.x),
        h * 0.5 * aspect_ratio / (cn.y - min.y),
        h * 0.5 * aspect_ratio / (max.y - cn.y),
    ];
    let f_min = focals.iter().cloned().fold(f64::INFINITY, f64::min);
    let f_max = focals.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    let f = (balance * f_min + (1.0 - balance) * f_max) / fov_scale;
    let new_c = -cn * f + DVec2::new(w, h * aspect_ratio) * 0.5;

    let (mut fx, mut fy) = (f, f / aspect_ratio);
    let (mut cx, mut cy) = (new_c.x, new_c.y / aspect_ratio);

    if let Some(new_size) = new_size {
        let rx = new_size.width as f64 / w;
        let ry = new_size.height as f64 / h;
        fx *= rx;
        fy *= ry;
        cx *= rx;
        cy *= ry;
    }

    let new_intrinsic = CameraIntrinsic::new(fx, fy, cx, cy);
    if new_intrinsic.validate().is_err() {
        return Err(RectifyError::DegenerateCameraMatrix);
    }
    Ok(new_intrinsic)
}

/// Compute the rectification of a fisheye stereo pair.
///
/// The relative rotation is split in half between both cameras, then a common
/// rotation aligns the baseline with the rectified x axis. Both rectified cameras
/// share the focal length (the smaller of the two estimated ones) so that
/// corresponding points land on the same row.
///
/// # Arguments
///
/// * `camera1` - The first fisheye camera.
/// * `camera2` - The second fisheye camera.
/// * `pose` - The pose of the second camera relative to the first one.
/// * `params` - The rectification parameters.
///
/// # Errors
///
/// Fails on an invalid pose or parameters, mismatched camera sizes, or when a
/// finite camera matrix cannot be estimated.
pub fn stereo_rectify(
    camera1: &FisheyeCamera,
    camera2: &FisheyeCamera,
    pose: &RectificationPose,
    params: &StereoRectifyParams,
) -> Result<RectificationResult, RectifyError> {
    params.validate()?;
    pose.validate()?;
    pose.check_axis(params.baseline_axis)?;
    if camera1.size() != camera2.size() {
        return Err(RectifyError::SizeMismatch(camera1.size(), camera2.size()));
    }

    let r = mat3_from_rows(&pose.rotation);
    let tvec = DVec3::from_array(pose.translation);

    // rotate each camera half way towards the other
    let r_r = rodrigues(rotation_vector(&r) * -0.5);
    let t = r_r * tvec;

    // align the baseline with the x axis
    let uu = if t.x > 0.0 { DVec3::X } else { -DVec3::X };
    let mut ww = t.cross(uu);
    let nw = ww.length();
    if nw > 0.0 {
        ww *= (t.x.abs() / t.length()).clamp(-1.0, 1.0).acos() / nw;
    }
    let wr = rodrigues(ww);

    let ri1 = wr * r_r.transpose();
    let ri2 = wr * r_r;
    let tnew = ri2 * tvec;

    log::debug!(
        "rectification baseline {:?} along {:?} -> {:?}",
        tvec,
        params.baseline_axis,
        tnew
    );

    let (new_k1, new_k2) = rayon::join(
        || {
            estimate_new_camera_matrix(
                camera1,
                &ri1,
                params.balance,
                params.fov_scale,
                params.new_size,
            )
        },
        || {
            estimate_new_camera_matrix(
                camera2,
                &ri2,
                params.balance,
                params.fov_scale,
                params.new_size,
            )
        },
    );
    let (new_k1, new_k2) = (new_k1?, new_k2?);

    // the vertical focal length must match to keep rows aligned, use it for x too
    let fc = new_k1.fy.min(new_k2.fy);
    let mut cc1 = DVec2::new(new_k1.cx, new_k1.cy);
    let mut cc2 = DVec2::new(new_k2.cx, new_k2.cy);
    if params.zero_disparity {
        let mean = (cc1 + cc2) * 0.5;
        cc1 = mean;
        cc2 = mean;
    } else {
        let mean_y = (cc1.y + cc2.y) * 0.5;
        cc1.y = mean_y;
        cc2.y = mean_y;
    }

    let p1 = [
        [fc, 0.0, cc1.x, 0.0],
        [0.0, fc, cc1.y, 0.0],
        [0.0, 0.0, 1.0, 0.0],
    ];
    let p2 = [
        [fc, 0.0, cc2.x, tnew.x * fc],
        [0.0, fc, cc2.y, 0.0],
        [0.0, 0.0, 1.0, 0.0],
    ];

    // a zero baseline leaves depth undefined, keep Q finite
    let (q32, q33) = if tnew.x.abs() > f64::EPSILON {
        (-1.0 / tnew.x, (cc1.x - cc2.x) / tnew.x)
    } else {
        (0.0, 0.0)
    };
    let q = [
        [1.0, 0.0, 0.0, -cc1.x],
        [0.0, 1.0, 0.0, -cc1.y],
        [0.0, 0.0, 0.0, fc],
        [0.0, 0.0, q32, q33],
    ];

    let size = params.new_size.unwrap_or(camera1.size());
    log::debug!(
        "rectified focal length {:.3}, principal points {:?} {:?}, size {}",
        fc,
        cc1,
        cc2,
        size
    );

    Ok(RectificationResult {
        r1: mat3_to_rows(&ri1),
        r2: mat3_to_rows(&ri2),
        p1,
        p2,
        q,
        size,
    })
}
