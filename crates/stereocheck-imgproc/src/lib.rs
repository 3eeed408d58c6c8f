#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// fisheye camera model, stereo rectification and pixel map generation.
pub mod calibration;

/// feature detection and matching module.
pub mod features;

/// image filtering module.
pub mod filter;

/// utilities for interpolation and remapping.
pub mod interpolation;

/// module containing parallization utilities.
pub mod parallel;

/// utility functions for resizing images.
pub mod resize;
