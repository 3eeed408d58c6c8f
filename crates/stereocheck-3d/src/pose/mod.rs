//! # Epipolar geometry
//!
//! Checking two views against each other from matched points.
//!
//! - [`correspondence`]: position aligned point lists of the two views
//! - [`fundamental`]: normalized 8-point solver and epipolar lines
//! - [`lmeds`]: least median of squares robust estimation
//! - [`epipolar`]: validation report with point to line residuals

/// Position aligned point lists of the two views.
pub mod correspondence;
pub use correspondence::*;

/// Normalized 8-point solver and epipolar lines.
pub mod fundamental;
pub use fundamental::*;

/// Least median of squares robust estimation.
pub mod lmeds;
pub use lmeds::*;

/// Validation report with point to line residuals.
pub mod epipolar;
pub use epipolar::*;
