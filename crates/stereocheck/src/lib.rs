#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

#[doc(inline)]
pub use stereocheck_3d as k3d;

#[doc(inline)]
pub use stereocheck_image as image;

#[doc(inline)]
pub use stereocheck_imgproc as imgproc;

/// calibration records in the ROS `camera_info` layout.
pub mod camera_info;

/// configuration of the stereo check.
pub mod config;

/// strategies matching points between two images.
pub mod correspondence;

/// error types of the stereo check.
pub mod error;

/// the rectification and validation pipeline.
pub mod pipeline;

/// rendering of synthetic stereo scenes.
pub mod synthetic;

pub use camera_info::{CameraInfo, MatrixData};
pub use config::StereoCheckConfig;
pub use correspondence::{
    ChessboardCorrespondence, CorrespondenceError, CorrespondenceFinder, KeypointCorrespondence,
    KeypointMatchParams,
};
pub use error::StereoCheckError;
pub use pipeline::{RoundTripReport, StereoCheck, StereoMaps};
