use stereocheck_image::{ImageError, ImageSize};

use crate::parallel;

/// Coordinate stored for destination pixels without a valid source location.
///
/// It lies far outside any image, so resampling writes the fill value there.
pub const INVALID_COORD: f32 = -1.0e6;

/// Per destination pixel source coordinates.
///
/// `map_x` and `map_y` are row-major arrays with one entry per destination pixel
/// holding the (possibly fractional, possibly out of bounds) location in the
/// source image to sample from.
#[derive(Clone, Debug, PartialEq)]
pub struct PixelMap {
    size: ImageSize,
    map_x: Vec<f32>,
    map_y: Vec<f32>,
}

impl PixelMap {
    /// Create a pixel map from existing coordinate arrays.
    ///
    /// # Errors
    ///
    /// Both arrays must hold exactly `size.width * size.height` entries and the size must be non-empty.
    pub fn new(size: ImageSize, map_x: Vec<f32>, map_y: Vec<f32>) -> Result<Self, ImageError> {
        if size.is_empty() {
            return Err(ImageError::EmptyImage(size));
        }
        if map_x.len() != size.area() {
            return Err(ImageError::InvalidChannelShape(map_x.len(), size.area()));
        }
        if map_y.len() != size.area() {
            return Err(ImageError::InvalidChannelShape(map_y.len(), size.area()));
        }
        Ok(Self { size, map_x, map_y })
    }

    /// Build a pixel map evaluating `f(x, y)` for every destination pixel in parallel.
    ///
    /// `f` returns `None` for pixels without a valid source location; those are
    /// stored as [`INVALID_COORD`]. Non-finite results are treated the same way.
    pub fn from_fn(
        size: ImageSize,
        f: impl Fn(usize, usize) -> Option<[f64; 2]> + Send + Sync,
    ) -> Result<Self, ImageError> {
        if size.is_empty() {
            return Err(ImageError::EmptyImage(size));
        }
        let mut map_x = vec![0.0; size.area()];
        let mut map_y = vec![0.0; size.area()];

        parallel::par_iter_rows_grid(size.width, &mut map_x, &mut map_y, |x, y| match f(x, y) {
            Some([u, v]) if u.is_finite() && v.is_finite() => (u as f32, v as f32),
            _ => (INVALID_COORD, INVALID_COORD),
        });

        let map = Self { size, map_x, map_y };
        let invalid = map.num_invalid();
        if invalid > 0 {
            log::debug!(
                "pixel map {}x{} has {} entries without a source location",
                size.width,
                size.height,
                invalid
            );
        }
        Ok(map)
    }

    /// The map sending every pixel onto itself.
    pub fn identity(size: ImageSize) -> Result<Self, ImageError> {
        Self::from_fn(size, |x, y| Some([x as f64, y as f64]))
    }

    /// Size of the destination image.
    pub fn size(&self) -> ImageSize {
        self.size
    }

    /// Source x coordinate of every destination pixel, row-major.
    pub fn map_x(&self) -> &[f32] {
        &self.map_x
    }

    /// Source y coordinate of every destination pixel, row-major.
    pub fn map_y(&self) -> &[f32] {
        &self.map_y
    }

    /// Source location of the destination pixel at column `x` and row `y`.
    pub fn get(&self, x: usize, y: usize) -> Option<[f32; 2]> {
        if x >= self.size.width || y >= self.size.height {
            return None;
        }
        let idx = self.size.index(y, x);
        Some([self.map_x[idx], self.map_y[idx]])
    }

    /// Number of destination pixels without a valid source location.
    pub fn num_invalid(&self) -> usize {
        self.map_x
            .iter()
            .filter(|&&x| x == INVALID_COORD)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_map() -> Result<(), ImageError> {
        let map = PixelMap::identity(ImageSize {
            width: 4,
            height: 3,
        })?;
        assert_eq!(map.get(3, 2), Some([3.0, 2.0]));
        assert_eq!(map.get(4, 0), None);
        assert_eq!(map.num_invalid(), 0);
        Ok(())
    }

    #[test]
    fn test_from_fn_invalid_entries() -> Result<(), ImageError> {
        let size = ImageSize {
            width: 2,
            height: 2,
        };
        let map = PixelMap::from_fn(size, |x, y| match (x, y) {
            (0, 0) => None,
            (1, 0) => Some([f64::NAN, 0.0]),
            _ => Some([0.5, 0.5]),
        })?;
        assert_eq!(map.num_invalid(), 2);
        assert_eq!(map.get(0, 1), Some([0.5, 0.5]));
        Ok(())
    }

    #[test]
    fn test_new_wrong_length() {
        let size = ImageSize {
            width: 2,
            height: 2,
        };
        let res = PixelMap::new(size, vec![0.0; 4], vec![0.0; 3]);
        assert_eq!(res, Err(ImageError::InvalidChannelShape(3, 4)));
    }
}
