use serde::{Deserialize, Serialize};
use stereocheck_3d::pose::LmedsParams;
use stereocheck_imgproc::calibration::stereo::StereoRectifyParams;
use stereocheck_imgproc::features::ChessboardParams;

use crate::correspondence::KeypointMatchParams;

/// Configuration of the stereo check.
///
/// Every field has a default, so a partial document configures the tool.
///
/// ```
/// use stereocheck::StereoCheckConfig;
///
/// let config: StereoCheckConfig =
///     serde_json::from_str(r#"{"baseline": 0.2, "rectify": {"balance": 0.5}}"#).unwrap();
/// assert_eq!(config.baseline, 0.2);
/// assert_eq!(config.rectify.balance, 0.5);
/// assert_eq!(config.keypoints.ratio, 0.8);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StereoCheckConfig {
    /// Parameters of the stereo rectification.
    pub rectify: StereoRectifyParams,
    /// Distance between the cameras, along the configured baseline axis.
    pub baseline: f64,
    /// Chessboard pattern and detector parameters.
    pub chessboard: ChessboardParams,
    /// Keypoint detection and matching parameters.
    pub keypoints: KeypointMatchParams,
    /// Robust estimator parameters of the epipolar check.
    pub lmeds: LmedsParams,
    /// Value written where a pixel map has no source pixel.
    pub fill_value: f32,
    /// Largest epipolar residual, in pixels, of a consistent pair.
    pub max_residual: f64,
    /// Largest ray angle from the optical axis, in radians, accepted by the
    /// fisheye cameras built from calibration records.
    pub max_theta: f64,
}

impl Default for StereoCheckConfig {
    fn default() -> Self {
        Self {
            rectify: StereoRectifyParams::default(),
            baseline: 0.12,
            chessboard: ChessboardParams::default(),
            keypoints: KeypointMatchParams::default(),
            lmeds: LmedsParams::default(),
            fill_value: 0.0,
            max_residual: 0.5,
            max_theta: std::f64::consts::FRAC_PI_2,
        }
    }
}
