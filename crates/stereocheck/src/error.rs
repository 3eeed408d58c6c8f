use stereocheck_3d::pose::FundamentalError;
use stereocheck_image::ImageError;
use stereocheck_imgproc::calibration::{stereo::RectifyError, CameraError};

use crate::correspondence::CorrespondenceError;

/// Errors of the stereo check.
#[derive(thiserror::Error, Debug)]
pub enum StereoCheckError {
    /// A calibration record is malformed or incomplete.
    #[error("Invalid intrinsics: {0}")]
    InvalidIntrinsics(String),

    /// The camera model rejected its parameters.
    #[error(transparent)]
    Camera(#[from] CameraError),

    /// The stereo rectification failed.
    #[error(transparent)]
    Rectify(#[from] RectifyError),

    /// Image processing failed.
    #[error(transparent)]
    Image(#[from] ImageError),

    /// No usable correspondences were found.
    #[error(transparent)]
    Correspondence(#[from] CorrespondenceError),

    /// The epipolar geometry could not be estimated.
    #[error(transparent)]
    Fundamental(#[from] FundamentalError),
}
