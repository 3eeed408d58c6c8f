use serde::{Deserialize, Serialize};
use stereocheck_3d::pose::{CorrespondencePair, MIN_CORRESPONDENCES};
use stereocheck_image::{Image, ImageError};
use stereocheck_imgproc::features::{
    find_chessboard_corners, match_descriptors_ratio, ChessboardError, ChessboardParams,
    OrbDetector, OrbFeature, PatternSize,
};

/// Errors of the correspondence search.
#[derive(thiserror::Error, Debug)]
pub enum CorrespondenceError {
    /// The full pattern was not detected in one of the images.
    #[error("chessboard {expected} not found in image {image}, {found} corner candidates")]
    NoPatternFound {
        /// Index of the image, 0 or 1.
        image: usize,
        /// Number of corner candidates detected.
        found: usize,
        /// The pattern that was searched for.
        expected: PatternSize,
    },

    /// The pattern size cannot be detected.
    #[error("invalid chessboard pattern {0}")]
    InvalidPattern(PatternSize),

    /// Too few keypoint matches survived the filters.
    #[error("{found} keypoint matches, at least {required} are required")]
    InsufficientMatches {
        /// Number of accepted matches.
        found: usize,
        /// Number of matches required.
        required: usize,
    },

    /// Image processing failed.
    #[error(transparent)]
    Image(#[from] ImageError),
}

impl CorrespondenceError {
    fn from_chessboard(image: usize, err: ChessboardError) -> Self {
        match err {
            ChessboardError::NotFound { found, expected } => Self::NoPatternFound {
                image,
                found,
                expected,
            },
            ChessboardError::InvalidPattern(pattern) => Self::InvalidPattern(pattern),
            ChessboardError::Image(err) => Self::Image(err),
        }
    }
}

/// Finds matching points in two grayscale images.
///
/// Point `i` of the first list and point `i` of the second list are the same
/// scene point. Images hold intensities in `[0, 1]`.
pub trait CorrespondenceFinder: Send + Sync {
    /// Detect points in both images and pair them.
    fn find_correspondences(
        &self,
        image1: &Image<f32, 1>,
        image2: &Image<f32, 1>,
    ) -> Result<CorrespondencePair, CorrespondenceError>;
}

fn to_f64(points: Vec<[f32; 2]>) -> Vec<[f64; 2]> {
    points
        .into_iter()
        .map(|[x, y]| [x as f64, y as f64])
        .collect()
}

/// Pairs the inner corners of a chessboard seen by both cameras.
#[derive(Clone, Debug, Default)]
pub struct ChessboardCorrespondence {
    params: ChessboardParams,
}

impl ChessboardCorrespondence {
    /// Create the finder for the given pattern and detector parameters.
    pub fn new(params: ChessboardParams) -> Self {
        Self { params }
    }

    /// The detector parameters.
    pub fn params(&self) -> &ChessboardParams {
        &self.params
    }
}

impl CorrespondenceFinder for ChessboardCorrespondence {
    fn find_correspondences(
        &self,
        image1: &Image<f32, 1>,
        image2: &Image<f32, 1>,
    ) -> Result<CorrespondencePair, CorrespondenceError> {
        let (corners1, corners2) = rayon::join(
            || find_chessboard_corners(image1, &self.params),
            || find_chessboard_corners(image2, &self.params),
        );
        let corners1 = corners1.map_err(|e| CorrespondenceError::from_chessboard(0, e))?;
        let corners2 = corners2.map_err(|e| CorrespondenceError::from_chessboard(1, e))?;
        log::debug!("chessboard {} found in both images", self.params.pattern);

        // both detections are ordered row by row from the top left corner
        let found = corners2.len();
        CorrespondencePair::new(to_f64(corners1), to_f64(corners2)).map_err(|_| {
            CorrespondenceError::NoPatternFound {
                image: 1,
                found,
                expected: self.params.pattern,
            }
        })
    }
}

/// Parameters of the keypoint correspondence search.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeypointMatchParams {
    /// Number of keypoints detected per image.
    pub n_keypoints: usize,
    /// A match is kept when its descriptor distance is below `ratio` times the
    /// distance of the second best candidate.
    pub ratio: f32,
    /// Matches closer than this many pixels to an image border are dropped.
    pub border_margin: f64,
}

impl Default for KeypointMatchParams {
    fn default() -> Self {
        Self {
            n_keypoints: 1000,
            ratio: 0.8,
            border_margin: 100.0,
        }
    }
}

/// Pairs oriented keypoints by descriptor matching with a ratio test.
#[derive(Clone, Debug)]
pub struct KeypointCorrespondence {
    params: KeypointMatchParams,
    detector: OrbDetector,
}

impl Default for KeypointCorrespondence {
    fn default() -> Self {
        Self::new(KeypointMatchParams::default())
    }
}

impl KeypointCorrespondence {
    /// Create the finder with the default detector.
    pub fn new(params: KeypointMatchParams) -> Self {
        let detector = OrbDetector::new().with_n_keypoints(params.n_keypoints);
        Self { params, detector }
    }

    /// Replace the keypoint detector.
    pub fn with_detector(mut self, detector: OrbDetector) -> Self {
        self.detector = detector;
        self
    }

    /// The matching parameters.
    pub fn params(&self) -> &KeypointMatchParams {
        &self.params
    }

    fn inside_margin(&self, point: [f64; 2], image: &Image<f32, 1>) -> bool {
        let m = self.params.border_margin;
        let (w, h) = (image.width() as f64, image.height() as f64);
        point[0] > m && point[0] < w - m && point[1] > m && point[1] < h - m
    }
}

fn descriptors(features: &[OrbFeature]) -> Vec<[u8; 32]> {
    features.iter().map(|f| f.descriptor).collect()
}

impl CorrespondenceFinder for KeypointCorrespondence {
    fn find_correspondences(
        &self,
        image1: &Image<f32, 1>,
        image2: &Image<f32, 1>,
    ) -> Result<CorrespondencePair, CorrespondenceError> {
        let (features1, features2) = rayon::join(
            || self.detector.detect_and_extract(image1),
            || self.detector.detect_and_extract(image2),
        );
        let (features1, features2) = (features1?, features2?);

        let matches = match_descriptors_ratio(
            &descriptors(&features1),
            &descriptors(&features2),
            self.params.ratio,
        );
        let num_matches = matches.len();

        let pairs: CorrespondencePair = matches
            .into_iter()
            .map(|m| {
                let (f1, f2) = (&features1[m.query], &features2[m.train]);
                ([f1.x as f64, f1.y as f64], [f2.x as f64, f2.y as f64])
            })
            .filter(|(p1, p2)| self.inside_margin(*p1, image1) && self.inside_margin(*p2, image2))
            .collect();

        log::debug!(
            "keypoints: {}/{} features, {} ratio test matches, {} inside the margin",
            features1.len(),
            features2.len(),
            num_matches,
            pairs.len()
        );

        if pairs.len() < MIN_CORRESPONDENCES {
            return Err(CorrespondenceError::InsufficientMatches {
                found: pairs.len(),
                required: MIN_CORRESPONDENCES,
            });
        }
        Ok(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stereocheck_image::ImageSize;

    fn flat(width: usize, height: usize) -> Result<Image<f32, 1>, ImageError> {
        Image::from_size_val(ImageSize { width, height }, 0.5)
    }

    #[test]
    fn test_chessboard_missing_reports_image() -> Result<(), ImageError> {
        let img = flat(120, 100)?;
        let finder = ChessboardCorrespondence::default();
        match finder.find_correspondences(&img, &img) {
            Err(CorrespondenceError::NoPatternFound {
                image, expected, ..
            }) => {
                assert_eq!(image, 0);
                assert_eq!(expected, PatternSize::new(8, 6));
            }
            other => panic!("unexpected result {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_invalid_pattern() -> Result<(), ImageError> {
        let img = flat(60, 60)?;
        let finder = ChessboardCorrespondence::new(ChessboardParams {
            pattern: PatternSize::new(1, 5),
            ..Default::default()
        });
        assert!(matches!(
            finder.find_correspondences(&img, &img),
            Err(CorrespondenceError::InvalidPattern(_))
        ));
        Ok(())
    }

    #[test]
    fn test_keypoints_on_flat_images_are_insufficient() -> Result<(), ImageError> {
        let img = flat(320, 240)?;
        let finder = KeypointCorrespondence::default();
        assert!(matches!(
            finder.find_correspondences(&img, &img),
            Err(CorrespondenceError::InsufficientMatches {
                found: 0,
                required: 8
            })
        ));
        Ok(())
    }

    #[test]
    fn test_border_margin_is_strict() -> Result<(), ImageError> {
        let img = flat(640, 480)?;
        let finder = KeypointCorrespondence::default();
        assert!(finder.inside_margin([320.0, 240.0], &img));
        assert!(!finder.inside_margin([100.0, 240.0], &img));
        assert!(finder.inside_margin([100.5, 240.0], &img));
        assert!(!finder.inside_margin([320.0, 380.0], &img));
        assert!(!finder.inside_margin([540.0, 200.0], &img));
        Ok(())
    }
}
