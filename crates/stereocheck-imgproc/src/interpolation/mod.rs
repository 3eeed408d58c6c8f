//! Pixel interpolation and remapping.
//!
//! Sampling outside the source image uses a constant fill value, so a partially
//! covered destination image is still produced when a pixel map points off the
//! source.

mod bilinear;

/// Pixel maps and coordinate grid generation.
pub mod grid;

pub(crate) mod interpolate;
mod nearest;
mod remap;

pub use grid::PixelMap;
pub use interpolate::{interpolate_pixel, InterpolationMode};
pub use remap::remap;
