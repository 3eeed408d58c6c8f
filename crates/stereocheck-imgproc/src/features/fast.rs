use rayon::prelude::*;
use stereocheck_image::Image;

/// Offsets of the 16 pixel Bresenham circle of radius 3, clockwise from the top.
const CIRCLE: [(isize, isize); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

/// A corner found by the FAST detector.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FastCorner {
    /// Column of the corner.
    pub x: usize,
    /// Row of the corner.
    pub y: usize,
    /// Sum of the absolute contrast of the circle pixels beyond the threshold.
    pub score: f32,
}

/// Detect FAST corners in a single channel image.
///
/// A pixel is a corner when at least `arc_length` contiguous pixels of the circle
/// are all brighter than the centre plus `threshold`, or all darker than the
/// centre minus `threshold`. Corners are kept only if their score is maximal in
/// their 3x3 neighbourhood.
///
/// # Arguments
///
/// * `src` - The source image.
/// * `threshold` - The intensity difference threshold.
/// * `arc_length` - The number of contiguous circle pixels required, usually 9.
/// * `border` - Pixels closer than this to the image border are skipped, at least 3.
pub fn fast_feature_detector(
    src: &Image<f32, 1>,
    threshold: f32,
    arc_length: usize,
    border: usize,
) -> Vec<FastCorner> {
    let (cols, rows) = (src.cols(), src.rows());
    let border = border.max(3);
    if cols <= 2 * border || rows <= 2 * border {
        return vec![];
    }
    let data = src.as_slice();

    // score every pixel, rows in parallel
    let mut scores = vec![0.0f32; cols * rows];
    scores
        .par_chunks_exact_mut(cols)
        .enumerate()
        .skip(border)
        .take(rows - 2 * border)
        .for_each(|(y, row_scores)| {
            for (x, score) in row_scores
                .iter_mut()
                .enumerate()
                .skip(border)
                .take(cols - 2 * border)
            {
                *score = corner_score(data, cols, x, y, threshold, arc_length);
            }
        });

    // non maximum suppression
    (border..rows - border)
        .into_par_iter()
        .flat_map_iter(|y| {
            let scores = &scores;
            (border..cols - border).filter_map(move |x| {
                let s = scores[y * cols + x];
                if s <= 0.0 {
                    return None;
                }
                for (dy, dx) in [(-1isize, -1isize), (-1, 0), (-1, 1), (0, -1)] {
                    let n = scores[(y as isize + dy) as usize * cols + (x as isize + dx) as usize];
                    if n >= s {
                        return None;
                    }
                }
                for (dy, dx) in [(0isize, 1isize), (1, -1), (1, 0), (1, 1)] {
                    let n = scores[(y as isize + dy) as usize * cols + (x as isize + dx) as usize];
                    if n > s {
                        return None;
                    }
                }
                Some(FastCorner { x, y, score: s })
            })
        })
        .collect()
}

/// Score of the pixel, zero when it is not a corner.
fn corner_score(
    data: &[f32],
    cols: usize,
    x: usize,
    y: usize,
    threshold: f32,
    arc_length: usize,
) -> f32 {
    let center = data[y * cols + x];
    let mut state = [0i8; 16];
    for (s, (dx, dy)) in state.iter_mut().zip(CIRCLE.iter()) {
        let v = data[(y as isize + dy) as usize * cols + (x as isize + dx) as usize];
        *s = if v > center + threshold {
            1
        } else if v < center - threshold {
            -1
        } else {
            0
        };
    }

    let has_arc = |sign: i8| {
        let mut run = 0;
        // walk the circle twice to catch arcs wrapping around the start
        for i in 0..32 {
            if state[i % 16] == sign {
                run += 1;
                if run >= arc_length {
                    return true;
                }
            } else {
                run = 0;
            }
        }
        false
    };

    if !has_arc(1) && !has_arc(-1) {
        return 0.0;
    }

    CIRCLE
        .iter()
        .map(|(dx, dy)| {
            let v = data[(y as isize + dy) as usize * cols + (x as isize + dx) as usize];
            ((v - center).abs() - threshold).max(0.0)
        })
        .sum()
}
