use rayon::prelude::*;

use stereocheck_image::Image;

use crate::interpolation::grid::PixelMap;

/// Apply a function to each destination pixel for grid sampling in parallel.
///
/// The closure receives the source coordinates stored in the pixel map for the
/// destination pixel, and the destination pixel to write.
pub fn par_iter_rows_resample<T, const C: usize>(
    dst: &mut Image<T, C>,
    map: &PixelMap,
    f: impl Fn(f32, f32, &mut [T]) + Send + Sync,
) where
    T: Send + Sync,
{
    let cols = dst.cols();
    dst.as_slice_mut()
        .par_chunks_exact_mut(C * cols)
        .zip(map.map_x().par_chunks_exact(cols))
        .zip(map.map_y().par_chunks_exact(cols))
        .for_each(|((dst_chunk, map_x_chunk), map_y_chunk)| {
            dst_chunk
                .chunks_exact_mut(C)
                .zip(map_x_chunk.iter().zip(map_y_chunk.iter()))
                .for_each(|(dst_pixel, (&x, &y))| {
                    f(x, y, dst_pixel);
                });
        });
}

/// Fill two coordinate grids row by row in parallel.
///
/// The closure receives the column and row of the element and returns the
/// `(x, y)` pair to store.
pub fn par_iter_rows_grid(
    cols: usize,
    map_x: &mut [f32],
    map_y: &mut [f32],
    f: impl Fn(usize, usize) -> (f32, f32) + Send + Sync,
) {
    if cols == 0 {
        return;
    }
    map_x
        .par_chunks_exact_mut(cols)
        .zip(map_y.par_chunks_exact_mut(cols))
        .enumerate()
        .for_each(|(row, (row_x, row_y))| {
            row_x
                .iter_mut()
                .zip(row_y.iter_mut())
                .enumerate()
                .for_each(|(col, (x, y))| {
                    (*x, *y) = f(col, row);
                });
        });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_par_iter_rows_grid() {
        let mut map_x = vec![0.0; 6];
        let mut map_y = vec![0.0; 6];
        par_iter_rows_grid(3, &mut map_x, &mut map_y, |c, r| (c as f32, r as f32));
        assert_eq!(map_x, vec![0.0, 1.0, 2.0, 0.0, 1.0, 2.0]);
        assert_eq!(map_y, vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
    }
}
