use std::collections::{HashMap, VecDeque};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use stereocheck_image::{Image, ImageError};

use super::responses::saddle_response;
use super::subpix::{corner_sub_pix, sample_clamped};
use crate::calibration::TermCriteria;

/// Number of intensity samples taken on the circle around a candidate.
const RING_SAMPLES: usize = 32;

/// Half size of the non maximum suppression window.
const NMS_RADIUS: usize = 3;

/// Refined candidates closer than this are the same corner.
const MERGE_DISTANCE: f32 = 3.0;

/// Number of seed corners tried before giving up.
const MAX_SEEDS: usize = 16;

/// Fraction of the local grid step a predicted corner may be off.
const GROWTH_TOLERANCE: f32 = 0.3;

type Point = [f32; 2];

/// Number of inner corners of a chessboard along each axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatternSize {
    /// Inner corners per row.
    pub cols: usize,
    /// Inner corners per column.
    pub rows: usize,
}

impl PatternSize {
    /// Create a pattern size from the number of inner corners.
    pub fn new(cols: usize, rows: usize) -> Self {
        Self { cols, rows }
    }

    /// Total number of inner corners.
    pub fn num_corners(&self) -> usize {
        self.cols * self.rows
    }
}

impl Default for PatternSize {
    fn default() -> Self {
        Self { cols: 8, rows: 6 }
    }
}

impl std::fmt::Display for PatternSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

/// Parameters of the chessboard detector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChessboardParams {
    /// The expected number of inner corners.
    pub pattern: PatternSize,
    /// Standard deviation of the blur applied before the saddle response.
    pub saddle_sigma: f32,
    /// Minimum saddle response, relative to the strongest response in the image.
    pub response_threshold: f32,
    /// Minimum intensity range around a corner, for images in `[0, 1]`.
    pub min_contrast: f32,
    /// Radius of the circle sampled to check the four alternating sectors.
    pub ring_radius: f32,
    /// Half size of the sub-pixel refinement window.
    pub subpix_half_window: usize,
    /// Stopping criteria of the sub-pixel refinement.
    pub criteria: TermCriteria,
}

impl Default for ChessboardParams {
    fn default() -> Self {
        Self {
            pattern: PatternSize::default(),
            saddle_sigma: 1.5,
            response_threshold: 0.05,
            min_contrast: 0.1,
            ring_radius: 5.0,
            subpix_half_window: 5,
            criteria: TermCriteria {
                max_iter: 30,
                eps: 1e-3,
            },
        }
    }
}

/// Errors of the chessboard detector.
#[derive(Debug, thiserror::Error)]
pub enum ChessboardError {
    /// The pattern has fewer than 2x2 inner corners.
    #[error("invalid pattern size {0}, at least 2x2 inner corners are required")]
    InvalidPattern(PatternSize),

    /// The full pattern was not found.
    #[error("chessboard {expected} not found, {found} corner candidates")]
    NotFound {
        /// Number of corner candidates detected.
        found: usize,
        /// The pattern that was searched for.
        expected: PatternSize,
    },

    /// Image processing failed.
    #[error(transparent)]
    Image(#[from] ImageError),
}

fn sub(a: Point, b: Point) -> Point {
    [a[0] - b[0], a[1] - b[1]]
}

fn add(a: Point, b: Point) -> Point {
    [a[0] + b[0], a[1] + b[1]]
}

fn scale(a: Point, s: f32) -> Point {
    [a[0] * s, a[1] * s]
}

fn norm(a: Point) -> f32 {
    a[0].hypot(a[1])
}

/// Local maxima of the response above `threshold`, away from the border.
fn local_maxima(response: &Image<f32, 1>, threshold: f32, border: usize) -> Vec<(Point, f32)> {
    let (cols, rows) = (response.cols(), response.rows());
    let border = border.max(NMS_RADIUS);
    if cols <= 2 * border || rows <= 2 * border {
        return vec![];
    }
    let data = response.as_slice();

    (border..rows - border)
        .into_par_iter()
        .flat_map_iter(|y| {
            (border..cols - border).filter_map(move |x| {
                let v = data[y * cols + x];
                if v <= threshold {
                    return None;
                }
                for yy in y - NMS_RADIUS..=y + NMS_RADIUS {
                    for xx in x - NMS_RADIUS..=x + NMS_RADIUS {
                        if data[yy * cols + xx] > v {
                            return None;
                        }
                    }
                }
                Some(([x as f32, y as f32], v))
            })
        })
        .collect()
}

/// Whether the circle around `p` crosses four alternating dark and bright sectors.
fn has_four_sectors(src: &Image<f32, 1>, p: Point, radius: f32, min_contrast: f32) -> bool {
    let (cols, rows) = (src.cols(), src.rows());
    let data = src.as_slice();
    let samples: [f32; RING_SAMPLES] = std::array::from_fn(|k| {
        let angle = std::f32::consts::TAU * k as f32 / RING_SAMPLES as f32;
        let (sin, cos) = angle.sin_cos();
        sample_clamped(data, cols, rows, p[0] + radius * cos, p[1] + radius * sin)
    });

    let (lo, hi) = samples
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = hi - lo;
    if range < min_contrast {
        return false;
    }

    // samples close to the mid level lie on an edge and carry no sign
    let (mid, band) = (0.5 * (lo + hi), 0.1 * range);
    let signs: Vec<bool> = samples
        .iter()
        .filter_map(|&v| {
            if v > mid + band {
                Some(true)
            } else if v < mid - band {
                Some(false)
            } else {
                None
            }
        })
        .collect();
    if signs.len() < RING_SAMPLES / 2 {
        return false;
    }

    let changes = (0..signs.len())
        .filter(|&i| signs[i] != signs[(i + 1) % signs.len()])
        .count();
    changes == 4
}

/// Keep the strongest of the candidates closer than [`MERGE_DISTANCE`].
fn merge_duplicates(mut candidates: Vec<(Point, f32)>) -> Vec<Point> {
    candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
    let mut kept: Vec<Point> = Vec::with_capacity(candidates.len());
    for (p, _) in candidates {
        if kept.iter().all(|q| norm(sub(p, *q)) >= MERGE_DISTANCE) {
            kept.push(p);
        }
    }
    kept
}

fn nearest_unused(points: &[Point], used: &[bool], target: Point, max_dist: f32) -> Option<usize> {
    points
        .iter()
        .enumerate()
        .filter(|(i, _)| !used[*i])
        .map(|(i, p)| (i, norm(sub(*p, target))))
        .filter(|(_, d)| *d <= max_dist)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
}

/// Assign integer grid coordinates to corners reachable from `seed`.
///
/// The grid grows breadth first. Each corner predicts its four neighbours from
/// its local grid steps, so the grid follows perspective and lens distortion.
fn grow_grid(points: &[Point], seed: usize, limit: usize) -> Option<HashMap<(i32, i32), usize>> {
    let origin = points[seed];
    let mut neighbours: Vec<(usize, f32)> = points
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != seed)
        .map(|(i, p)| (i, norm(sub(*p, origin))))
        .collect();
    neighbours.sort_by(|a, b| a.1.total_cmp(&b.1));

    let &(first, first_dist) = neighbours.first()?;
    let step_a = sub(points[first], origin);
    let step_b = neighbours.iter().skip(1).find_map(|&(i, d)| {
        let v = sub(points[i], origin);
        let cos = (v[0] * step_a[0] + v[1] * step_a[1]) / (d * first_dist);
        (cos.abs() < 0.5).then_some(v)
    })?;

    let mut grid = HashMap::from([((0, 0), seed)]);
    let mut basis = HashMap::from([((0, 0), (step_a, step_b))]);
    let mut used = vec![false; points.len()];
    used[seed] = true;
    let mut queue = VecDeque::from([(0i32, 0i32)]);

    while let Some((i, j)) = queue.pop_front() {
        let p = points[grid[&(i, j)]];
        let (a, b) = basis[&(i, j)];
        let tolerance = GROWTH_TOLERANCE * norm(a).min(norm(b));

        for (di, dj) in [(1, 0), (-1, 0), (0, 1), (0, -1)] {
            let key = (i + di, j + dj);
            if grid.contains_key(&key) {
                continue;
            }
            let step = if di != 0 {
                scale(a, di as f32)
            } else {
                scale(b, dj as f32)
            };
            let Some(found) = nearest_unused(points, &used, add(p, step), tolerance) else {
                continue;
            };

            let actual = sub(points[found], p);
            let local = if di != 0 {
                (scale(actual, di as f32), b)
            } else {
                (a, scale(actual, dj as f32))
            };
            used[found] = true;
            grid.insert(key, found);
            basis.insert(key, local);
            queue.push_back(key);

            if grid.len() > limit {
                return None;
            }
        }
    }

    Some(grid)
}

/// Mean step between grid neighbours along `(di, dj)`.
fn mean_step(points: &[Point], grid: &HashMap<(i32, i32), usize>, di: i32, dj: i32) -> Point {
    let (sum, n) = grid
        .iter()
        .filter_map(|(&(i, j), &idx)| {
            grid.get(&(i + di, j + dj))
                .map(|&next| sub(points[next], points[idx]))
        })
        .fold(([0.0f32, 0.0], 0usize), |(s, n), d| (add(s, d), n + 1));
    if n == 0 {
        return sum;
    }
    scale(sum, 1.0 / n as f32)
}

/// Positive when the axis points right, or down for an axis along `y`.
fn axis_sign(v: Point, primary: usize) -> i32 {
    let secondary = 1 - primary;
    let dominant = if v[primary].abs() > 1e-3 * norm(v) {
        v[primary]
    } else {
        v[secondary]
    };
    if dominant >= 0.0 {
        1
    } else {
        -1
    }
}

/// Order a complete grid row by row, left to right and top to bottom.
fn order_grid(
    points: &[Point],
    grid: &HashMap<(i32, i32), usize>,
    pattern: PatternSize,
) -> Option<Vec<Point>> {
    if grid.len() != pattern.num_corners() {
        return None;
    }
    let (min_i, max_i) = grid.keys().fold((i32::MAX, i32::MIN), |(lo, hi), k| {
        (lo.min(k.0), hi.max(k.0))
    });
    let (min_j, max_j) = grid.keys().fold((i32::MAX, i32::MIN), |(lo, hi), k| {
        (lo.min(k.1), hi.max(k.1))
    });
    let (ni, nj) = ((max_i - min_i + 1) as usize, (max_j - min_j + 1) as usize);
    if ni * nj != grid.len() {
        return None;
    }

    let step_i = mean_step(points, grid, 1, 0);
    let step_j = mean_step(points, grid, 0, 1);
    let i_is_cols = ni == pattern.cols && nj == pattern.rows;
    let j_is_cols = nj == pattern.cols && ni == pattern.rows;
    let columns_along_i = match (i_is_cols, j_is_cols) {
        (true, true) => {
            step_i[0].abs() / norm(step_i).max(f32::EPSILON)
                >= step_j[0].abs() / norm(step_j).max(f32::EPSILON)
        }
        (true, false) => true,
        (false, true) => false,
        (false, false) => return None,
    };

    let (col_step, row_step) = if columns_along_i {
        (step_i, step_j)
    } else {
        (step_j, step_i)
    };
    let (col_sign, row_sign) = (axis_sign(col_step, 0), axis_sign(row_step, 1));

    let mut ordered = Vec::with_capacity(grid.len());
    for r in 0..pattern.rows as i32 {
        for c in 0..pattern.cols as i32 {
            let (ci, ri) = if columns_along_i {
                ((min_i, max_i), (min_j, max_j))
            } else {
                ((min_j, max_j), (min_i, max_i))
            };
            let col = if col_sign > 0 { ci.0 + c } else { ci.1 - c };
            let row = if row_sign > 0 { ri.0 + r } else { ri.1 - r };
            let key = if columns_along_i { (col, row) } else { (row, col) };
            ordered.push(points[*grid.get(&key)?]);
        }
    }
    Some(ordered)
}

/// Find the inner corners of a chessboard.
///
/// Corner candidates are the local maxima of the saddle response that see four
/// alternating dark and bright sectors on a circle around them. Candidates are
/// refined with [`corner_sub_pix`] and assembled into a grid grown from the
/// candidates closest to their centroid. The detection succeeds only when the
/// grid has exactly the expected number of corners.
///
/// # Arguments
///
/// * `src` - The grayscale image with intensities in `[0, 1]`.
/// * `params` - The pattern size and detector parameters.
///
/// # Returns
///
/// The corners `[x, y]` row by row, from the top left corner.
pub fn find_chessboard_corners(
    src: &Image<f32, 1>,
    params: &ChessboardParams,
) -> Result<Vec<[f32; 2]>, ChessboardError> {
    let pattern = params.pattern;
    if pattern.cols < 2 || pattern.rows < 2 {
        return Err(ChessboardError::InvalidPattern(pattern));
    }
    let not_found = |found| ChessboardError::NotFound {
        found,
        expected: pattern,
    };

    let response = saddle_response(src, params.saddle_sigma)?;
    let max_response = response.as_slice().iter().copied().fold(0.0f32, f32::max);
    if max_response <= 0.0 {
        return Err(not_found(0));
    }

    let border = params.ring_radius.ceil() as usize + 2;
    let maxima = local_maxima(&response, params.response_threshold * max_response, border);
    let candidates: Vec<(Point, f32)> = maxima
        .into_par_iter()
        .filter(|(p, _)| has_four_sectors(src, *p, params.ring_radius, params.min_contrast))
        .collect();
    if candidates.len() < pattern.num_corners() {
        return Err(not_found(candidates.len()));
    }

    let (mut refined, strengths): (Vec<Point>, Vec<f32>) = candidates.into_iter().unzip();
    corner_sub_pix(src, &mut refined, params.subpix_half_window, &params.criteria);
    let points = merge_duplicates(refined.into_iter().zip(strengths).collect());
    log::debug!(
        "chessboard {}: {} saddle candidates after refinement",
        pattern,
        points.len()
    );
    if points.len() < pattern.num_corners() {
        return Err(not_found(points.len()));
    }

    let centroid = scale(
        points.iter().fold([0.0, 0.0], |s, p| add(s, *p)),
        1.0 / points.len() as f32,
    );
    let mut seeds: Vec<usize> = (0..points.len()).collect();
    seeds.sort_by(|&a, &b| {
        norm(sub(points[a], centroid)).total_cmp(&norm(sub(points[b], centroid)))
    });

    for &seed in seeds.iter().take(MAX_SEEDS) {
        let Some(grid) = grow_grid(&points, seed, pattern.num_corners()) else {
            continue;
        };
        if let Some(ordered) = order_grid(&points, &grid, pattern) {
            return Ok(ordered);
        }
    }

    Err(not_found(points.len()))
}
