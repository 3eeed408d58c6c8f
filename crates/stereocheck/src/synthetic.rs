//! Ray traced stereo views of simple planar scenes.
//!
//! The world frame is the frame of the first camera. A camera is placed with a
//! [`RectificationPose`] mapping world points `X` to `R X + T` in its own frame,
//! the identity for the first camera and the stereo pose for the second one.

use glam::{DMat3, DVec2, DVec3};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;
use stereocheck_image::{Image, ImageError};
use stereocheck_imgproc::calibration::stereo::{mat3_from_rows, RectificationPose};
use stereocheck_imgproc::calibration::CameraProjection;
use stereocheck_imgproc::features::PatternSize;

/// Number of texture cells before the pattern of a [`TexturedPlane`] repeats.
const TEXTURE_PERIOD: usize = 128;

/// A planar chessboard with a light border.
#[derive(Clone, Debug, PartialEq)]
pub struct Checkerboard {
    /// Outer corner of the first square, in world coordinates.
    pub origin: DVec3,
    /// Unit direction along the board columns.
    pub x_axis: DVec3,
    /// Unit direction along the board rows.
    pub y_axis: DVec3,
    /// Side of a square.
    pub square_size: f64,
    /// Number of squares along each axis.
    pub squares: PatternSize,
    /// Width of the light border around the squares.
    pub margin: f64,
    /// Intensity of the dark squares.
    pub dark: f32,
    /// Intensity of the light squares and the border.
    pub light: f32,
}

impl Checkerboard {
    /// A board facing the camera, centred at `center`, with `pattern` inner corners.
    ///
    /// The board rows run along the world x axis and its columns down the y axis,
    /// the border is one square wide.
    pub fn new(center: DVec3, pattern: PatternSize, square_size: f64) -> Self {
        let squares = PatternSize::new(pattern.cols + 1, pattern.rows + 1);
        let half = DVec3::new(
            squares.cols as f64 * square_size / 2.0,
            squares.rows as f64 * square_size / 2.0,
            0.0,
        );
        Self {
            origin: center - half,
            x_axis: DVec3::X,
            y_axis: DVec3::Y,
            square_size,
            squares,
            margin: square_size,
            dark: 0.1,
            light: 0.9,
        }
    }

    /// Rotate the board about its centre.
    pub fn rotated(mut self, rotation: DMat3) -> Self {
        let center = self.center();
        self.x_axis = rotation * self.x_axis;
        self.y_axis = rotation * self.y_axis;
        self.origin = center - self.half_extent();
        self
    }

    fn half_extent(&self) -> DVec3 {
        let s = self.square_size;
        (self.x_axis * self.squares.cols as f64 + self.y_axis * self.squares.rows as f64) * s / 2.0
    }

    /// The centre of the board.
    pub fn center(&self) -> DVec3 {
        self.origin + self.half_extent()
    }

    /// The number of inner corners.
    pub fn pattern(&self) -> PatternSize {
        PatternSize::new(
            self.squares.cols.saturating_sub(1),
            self.squares.rows.saturating_sub(1),
        )
    }

    /// World coordinates of the inner corners, row by row.
    pub fn inner_corners(&self) -> Vec<DVec3> {
        let pattern = self.pattern();
        let s = self.square_size;
        (0..pattern.rows)
            .flat_map(|r| (0..pattern.cols).map(move |c| (c, r)))
            .map(|(c, r)| {
                let (u, v) = ((c + 1) as f64 * s, (r + 1) as f64 * s);
                self.origin + self.x_axis * u + self.y_axis * v
            })
            .collect()
    }

    fn intersect(&self, origin: DVec3, dir: DVec3) -> Option<(f64, f32)> {
        let normal = self.x_axis.cross(self.y_axis);
        let t = intersect_plane(self.origin, normal, origin, dir)?;
        let offset = origin + dir * t - self.origin;
        let (a, b) = (offset.dot(self.x_axis), offset.dot(self.y_axis));

        let s = self.square_size;
        let (w, h) = (self.squares.cols as f64 * s, self.squares.rows as f64 * s);
        let m = self.margin;
        if a < -m || b < -m || a > w + m || b > h + m {
            return None;
        }
        if a < 0.0 || b < 0.0 || a >= w || b >= h {
            return Some((t, self.light));
        }
        let parity = ((a / s).floor() as i64 + (b / s).floor() as i64) % 2;
        Some((t, if parity == 0 { self.dark } else { self.light }))
    }
}

/// A fronto-parallel plane covered with random gray blocks.
#[derive(Clone, Debug, PartialEq)]
pub struct TexturedPlane {
    depth: f64,
    cell_size: f64,
    values: Vec<f32>,
}

impl TexturedPlane {
    /// A plane at `depth` along the world z axis, with square cells of `cell_size`.
    pub fn new(depth: f64, cell_size: f64, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let values = (0..TEXTURE_PERIOD * TEXTURE_PERIOD)
            .map(|_| rng.random_range(0.05f32..0.95))
            .collect();
        Self {
            depth,
            cell_size,
            values,
        }
    }

    fn intersect(&self, origin: DVec3, dir: DVec3) -> Option<(f64, f32)> {
        let t = intersect_plane(DVec3::new(0.0, 0.0, self.depth), DVec3::Z, origin, dir)?;
        let p = origin + dir * t;
        let cell = |v: f64| (v / self.cell_size).floor().rem_euclid(TEXTURE_PERIOD as f64) as usize;
        Some((t, self.values[cell(p.y) * TEXTURE_PERIOD + cell(p.x)]))
    }
}

/// Distance along `dir` to the plane through `point` with normal `normal`.
fn intersect_plane(point: DVec3, normal: DVec3, origin: DVec3, dir: DVec3) -> Option<f64> {
    let denom = dir.dot(normal);
    if denom.abs() < 1e-12 {
        return None;
    }
    let t = (point - origin).dot(normal) / denom;
    (t > 0.0 && t.is_finite()).then_some(t)
}

/// A scene made of an optional chessboard in front of an optional textured plane.
#[derive(Clone, Debug, PartialEq)]
pub struct SyntheticScene {
    /// The chessboard.
    pub board: Option<Checkerboard>,
    /// The textured background.
    pub background: Option<TexturedPlane>,
    /// Intensity of rays hitting nothing.
    pub ambient: f32,
}

impl SyntheticScene {
    /// A chessboard in front of a uniform background.
    pub fn chessboard(board: Checkerboard) -> Self {
        Self {
            board: Some(board),
            background: None,
            ambient: 0.5,
        }
    }

    /// A textured plane filling the view.
    pub fn textured(plane: TexturedPlane) -> Self {
        Self {
            board: None,
            background: Some(plane),
            ambient: 0.5,
        }
    }

    /// Put a textured plane behind the scene.
    pub fn with_background(mut self, plane: TexturedPlane) -> Self {
        self.background = Some(plane);
        self
    }

    /// Intensity seen along a world ray.
    pub fn trace(&self, origin: DVec3, dir: DVec3) -> f32 {
        let board = self.board.as_ref().and_then(|b| b.intersect(origin, dir));
        let background = self.background.as_ref().and_then(|p| p.intersect(origin, dir));
        match (board, background) {
            (Some((tb, vb)), Some((tp, vp))) => {
                if tb <= tp {
                    vb
                } else {
                    vp
                }
            }
            (Some((_, v)), None) | (None, Some((_, v))) => v,
            (None, None) => self.ambient,
        }
    }

    /// Render the scene through `camera` placed at `pose`.
    ///
    /// Every pixel averages `supersampling`² rays spread over its footprint.
    /// Pixels without a valid ray get the ambient intensity.
    pub fn render<P: CameraProjection + ?Sized>(
        &self,
        camera: &P,
        pose: &RectificationPose,
        supersampling: usize,
    ) -> Result<Image<f32, 1>, ImageError> {
        let size = camera.size();
        if size.is_empty() {
            return Err(ImageError::EmptyImage(size));
        }
        let (center, to_world) = camera_frame(pose);
        let n = supersampling.max(1);
        let offsets: Vec<f64> = (0..n).map(|i| (i as f64 + 0.5) / n as f64 - 0.5).collect();
        let weight = 1.0 / (n * n) as f32;

        let mut data = vec![0.0f32; size.area()];
        data.par_chunks_mut(size.width)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, px) in row.iter_mut().enumerate() {
                    let mut acc = 0.0;
                    for dy in &offsets {
                        for dx in &offsets {
                            let pixel = DVec2::new(x as f64 + dx, y as f64 + dy);
                            acc += match camera.unproject(pixel) {
                                Some(ray) => self.trace(center, to_world * ray),
                                None => self.ambient,
                            };
                        }
                    }
                    *px = acc * weight;
                }
            });

        Image::new(size, data)
    }

    /// Pixel locations of the chessboard inner corners seen by `camera` at `pose`.
    ///
    /// Returns `None` for corners the camera cannot see, and an empty list
    /// without a chessboard.
    pub fn project_corners<P: CameraProjection + ?Sized>(
        &self,
        camera: &P,
        pose: &RectificationPose,
    ) -> Vec<Option<DVec2>> {
        let r = mat3_from_rows(&pose.rotation);
        let t = DVec3::from_array(pose.translation);
        self.board
            .as_ref()
            .map(|board| {
                board
                    .inner_corners()
                    .into_iter()
                    .map(|p| camera.project(r * p + t))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Centre and camera to world rotation of a camera at `pose`.
fn camera_frame(pose: &RectificationPose) -> (DVec3, DMat3) {
    let rt = mat3_from_rows(&pose.rotation).transpose();
    (-(rt * DVec3::from_array(pose.translation)), rt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use stereocheck_image::ImageSize;
    use stereocheck_imgproc::calibration::stereo::BaselineAxis;
    use stereocheck_imgproc::calibration::{CameraIntrinsic, FisheyeCamera, FisheyeDistortion};

    fn camera() -> Result<FisheyeCamera, Box<dyn std::error::Error>> {
        Ok(FisheyeCamera::new(
            CameraIntrinsic::new(200.0, 200.0, 80.0, 60.0),
            FisheyeDistortion::default(),
            ImageSize {
                width: 160,
                height: 120,
            },
        )?)
    }

    #[test]
    fn test_board_corners() {
        let board = Checkerboard::new(DVec3::new(0.0, 0.0, 1.0), PatternSize::new(3, 2), 0.1);
        assert_eq!(board.pattern(), PatternSize::new(3, 2));
        assert_relative_eq!(board.center().x, 0.0, epsilon = 1e-12);

        let corners = board.inner_corners();
        assert_eq!(corners.len(), 6);
        assert_relative_eq!(corners[0].x, -0.1, epsilon = 1e-12);
        assert_relative_eq!(corners[0].y, -0.05, epsilon = 1e-12);
        assert_relative_eq!(corners[5].x, 0.1, epsilon = 1e-12);
        assert_relative_eq!(corners[5].y, 0.05, epsilon = 1e-12);
    }

    #[test]
    fn test_trace_squares() {
        let board = Checkerboard::new(DVec3::new(0.0, 0.0, 1.0), PatternSize::new(3, 2), 0.1);
        let scene = SyntheticScene::chessboard(board.clone());
        let eye = DVec3::ZERO;
        let through = |x: f64, y: f64| DVec3::new(x, y, 1.0);

        // first square is dark, its right neighbour light
        assert_eq!(scene.trace(eye, through(-0.19, -0.14)), board.dark);
        assert_eq!(scene.trace(eye, through(-0.09, -0.14)), board.light);
        // border and beyond
        assert_eq!(scene.trace(eye, through(-0.25, 0.0)), board.light);
        assert_eq!(scene.trace(eye, through(-0.35, 0.0)), scene.ambient);
        // looking away from the board
        assert_eq!(scene.trace(eye, DVec3::new(0.0, 0.0, -1.0)), scene.ambient);
    }

    #[test]
    fn test_board_occludes_background() {
        let board = Checkerboard::new(DVec3::new(0.0, 0.0, 1.0), PatternSize::new(3, 2), 0.1);
        let scene = SyntheticScene::chessboard(board.clone())
            .with_background(TexturedPlane::new(3.0, 0.05, 1));
        assert_eq!(scene.trace(DVec3::ZERO, DVec3::new(-0.19, -0.14, 1.0)), board.dark);
        let far = scene.trace(DVec3::ZERO, DVec3::new(0.5, 0.5, 1.0));
        assert!((0.05..0.95).contains(&far));
    }

    #[test]
    fn test_render_projects_board_centre() -> Result<(), Box<dyn std::error::Error>> {
        let camera = camera()?;
        let identity = RectificationPose::from_baseline(0.0, BaselineAxis::X);
        let board = Checkerboard::new(DVec3::new(0.0, 0.0, 1.0), PatternSize::new(3, 2), 0.1);
        let scene = SyntheticScene::chessboard(board);
        let img = scene.render(&camera, &identity, 2)?;

        assert_eq!(img.size(), camera.size());
        // the centre corner of the board sits on the principal point
        let corners = scene.project_corners(&camera, &identity);
        let centre = corners[1].ok_or("corner not visible")?;
        assert_relative_eq!(centre.x, 80.0, epsilon = 1e-9);
        assert_relative_eq!(centre.y, 60.0 - 200.0 * 0.05f64.atan(), epsilon = 1e-9);
        // image corners see the uniform background
        assert_eq!(img.get_pixel(0, 0, 0)?, 0.5);
        Ok(())
    }

    #[test]
    fn test_second_camera_sees_shifted_board() -> Result<(), Box<dyn std::error::Error>> {
        let camera = camera()?;
        let identity = RectificationPose::from_baseline(0.0, BaselineAxis::X);
        let pose = RectificationPose::from_baseline(0.1, BaselineAxis::X);
        let board = Checkerboard::new(DVec3::new(0.0, 0.0, 1.0), PatternSize::new(3, 2), 0.1);
        let scene = SyntheticScene::chessboard(board);

        let left = scene.project_corners(&camera, &identity);
        let right = scene.project_corners(&camera, &pose);
        for (l, r) in left.iter().zip(right.iter()) {
            let (l, r) = (l.ok_or("not visible")?, r.ok_or("not visible")?);
            assert!(r.x > l.x);
        }
        Ok(())
    }
}
