use serde::{Deserialize, Serialize};
use stereocheck_image::ImageSize;
use stereocheck_imgproc::calibration::{
    distortion::RectifiedCamera, CameraIntrinsic, FisheyeCamera, FisheyeDistortion,
};

use crate::error::StereoCheckError;

/// Distortion model names accepted for the fisheye camera.
const FISHEYE_MODELS: [&str; 2] = ["equidistant", "fisheye"];

fn default_distortion_model() -> String {
    FISHEYE_MODELS[0].to_string()
}

/// A row-major matrix as stored in a calibration file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatrixData {
    /// Number of rows.
    pub rows: usize,
    /// Number of columns.
    pub cols: usize,
    /// The entries, row by row.
    pub data: Vec<f64>,
}

impl MatrixData {
    /// Store a fixed size matrix.
    pub fn from_rows<const R: usize, const C: usize>(m: &[[f64; C]; R]) -> Self {
        Self {
            rows: R,
            cols: C,
            data: m.iter().flatten().copied().collect(),
        }
    }

    /// Read the matrix as `R` rows of `C` columns.
    ///
    /// # Errors
    ///
    /// Returns [`StereoCheckError::InvalidIntrinsics`] naming `name` when the
    /// declared shape or the data length differ from `R x C`, or an entry is not
    /// finite.
    pub fn to_rows<const R: usize, const C: usize>(
        &self,
        name: &str,
    ) -> Result<[[f64; C]; R], StereoCheckError> {
        self.check_shape(name, R, C)?;
        let mut out = [[0.0; C]; R];
        for (row, chunk) in out.iter_mut().zip(self.data.chunks_exact(C)) {
            row.copy_from_slice(chunk);
        }
        Ok(out)
    }

    fn check_shape(&self, name: &str, rows: usize, cols: usize) -> Result<(), StereoCheckError> {
        if self.rows != rows || self.cols != cols {
            return Err(StereoCheckError::InvalidIntrinsics(format!(
                "{name} must be {rows}x{cols}, got {}x{}",
                self.rows, self.cols
            )));
        }
        if self.data.len() != rows * cols {
            return Err(StereoCheckError::InvalidIntrinsics(format!(
                "{name} declares {rows}x{cols} but holds {} values",
                self.data.len()
            )));
        }
        if self.data.iter().any(|v| !v.is_finite()) {
            return Err(StereoCheckError::InvalidIntrinsics(format!(
                "{name} has non-finite entries"
            )));
        }
        Ok(())
    }
}

/// Calibration of one camera, in the ROS `camera_info` layout.
///
/// The rectification and projection matrices are those the calibration tool
/// produced for its own stereo rectification, they are optional.
///
/// ```
/// use stereocheck::CameraInfo;
///
/// let info: CameraInfo = serde_json::from_str(
///     r#"{
///         "image_width": 640,
///         "image_height": 512,
///         "distortion_model": "equidistant",
///         "camera_matrix": {"rows": 3, "cols": 3, "data": [500, 0, 320, 0, 500, 256, 0, 0, 1]},
///         "distortion_coefficients": {"rows": 1, "cols": 4, "data": [0.01, 0, 0, 0]}
///     }"#,
/// ).unwrap();
/// let camera = info.to_fisheye_camera().unwrap();
/// assert_eq!(camera.intrinsic().fx, 500.0);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraInfo {
    /// Width of the raw images.
    pub image_width: usize,
    /// Height of the raw images.
    pub image_height: usize,
    /// Name of the camera.
    #[serde(default)]
    pub camera_name: String,
    /// Name of the distortion model.
    #[serde(default = "default_distortion_model")]
    pub distortion_model: String,
    /// The 3x3 camera matrix.
    pub camera_matrix: MatrixData,
    /// The four fisheye coefficients, as a 1x4 or 4x1 matrix.
    pub distortion_coefficients: MatrixData,
    /// The 3x3 rectification rotation.
    #[serde(default)]
    pub rectification_matrix: Option<MatrixData>,
    /// The 3x4 projection matrix of the rectified camera.
    #[serde(default)]
    pub projection_matrix: Option<MatrixData>,
}

impl CameraInfo {
    /// A calibration record describing `camera`, without rectification.
    pub fn from_camera(name: impl Into<String>, camera: &FisheyeCamera) -> Self {
        let size = camera.size();
        Self {
            image_width: size.width,
            image_height: size.height,
            camera_name: name.into(),
            distortion_model: default_distortion_model(),
            camera_matrix: MatrixData::from_rows(&camera.intrinsic().to_matrix()),
            distortion_coefficients: MatrixData::from_rows(&[camera.distortion().to_array()]),
            rectification_matrix: None,
            projection_matrix: None,
        }
    }

    /// Attach a rectification rotation and projection matrix.
    pub fn with_rectification(
        mut self,
        rotation: &[[f64; 3]; 3],
        projection: &[[f64; 4]; 3],
    ) -> Self {
        self.rectification_matrix = Some(MatrixData::from_rows(rotation));
        self.projection_matrix = Some(MatrixData::from_rows(projection));
        self
    }

    /// Size of the raw images.
    pub fn size(&self) -> ImageSize {
        ImageSize {
            width: self.image_width,
            height: self.image_height,
        }
    }

    /// Check the whole record.
    ///
    /// # Errors
    ///
    /// Returns [`StereoCheckError::InvalidIntrinsics`] for an unsupported
    /// distortion model, an empty image size, malformed matrices, non-positive
    /// focal lengths or a rectification matrix that is not a rotation.
    pub fn validate(&self) -> Result<(), StereoCheckError> {
        self.to_fisheye_camera()?;
        self.rectification_matrix()?;
        self.projection_matrix()?;
        self.rectified_camera()?;
        Ok(())
    }

    /// The camera matrix.
    pub fn camera_matrix(&self) -> Result<[[f64; 3]; 3], StereoCheckError> {
        self.camera_matrix.to_rows("camera_matrix")
    }

    /// The fisheye distortion coefficients.
    pub fn distortion(&self) -> Result<FisheyeDistortion, StereoCheckError> {
        let model = self.distortion_model.to_ascii_lowercase();
        if !FISHEYE_MODELS.contains(&model.as_str()) {
            return Err(StereoCheckError::InvalidIntrinsics(format!(
                "unsupported distortion model '{}', expected one of {FISHEYE_MODELS:?}",
                self.distortion_model
            )));
        }
        let coeffs = &self.distortion_coefficients;
        let [k] = if coeffs.rows == 4 && coeffs.cols == 1 {
            let column: [[f64; 1]; 4] = coeffs.to_rows("distortion_coefficients")?;
            [column.map(|[k]| k)]
        } else {
            coeffs.to_rows::<1, 4>("distortion_coefficients")?
        };
        Ok(FisheyeDistortion::from_slice(&k)?)
    }

    /// The rectification rotation, if the record has one.
    pub fn rectification_matrix(&self) -> Result<Option<[[f64; 3]; 3]>, StereoCheckError> {
        self.rectification_matrix
            .as_ref()
            .map(|m| m.to_rows("rectification_matrix"))
            .transpose()
    }

    /// The rectified projection matrix, if the record has one.
    pub fn projection_matrix(&self) -> Result<Option<[[f64; 4]; 3]>, StereoCheckError> {
        self.projection_matrix
            .as_ref()
            .map(|m| m.to_rows("projection_matrix"))
            .transpose()
    }

    /// Build the fisheye camera model of the record.
    pub fn to_fisheye_camera(&self) -> Result<FisheyeCamera, StereoCheckError> {
        let size = self.size();
        if size.is_empty() {
            return Err(StereoCheckError::InvalidIntrinsics(format!(
                "image size must be positive, got {size}"
            )));
        }
        let intrinsic = CameraIntrinsic::from_matrix(&self.camera_matrix()?)?;
        Ok(FisheyeCamera::new(intrinsic, self.distortion()?, size)?)
    }

    /// The rectified view stored in the record.
    ///
    /// Returns `None` unless both the rectification and projection matrices are
    /// present. The rectified image has the raw image size.
    pub fn rectified_camera(&self) -> Result<Option<RectifiedCamera>, StereoCheckError> {
        match (self.rectification_matrix()?, self.projection_matrix()?) {
            (Some(r), Some(p)) => Ok(Some(RectifiedCamera::new(&r, &p, self.size())?)),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stereocheck_imgproc::calibration::CameraError;

    const INFO: &str = r#"{
        "image_width": 640,
        "image_height": 512,
        "camera_name": "left",
        "distortion_model": "equidistant",
        "camera_matrix": {"rows": 3, "cols": 3, "data": [500, 0, 320, 0, 500, 256, 0, 0, 1]},
        "distortion_coefficients": {"rows": 1, "cols": 4, "data": [0.02, -0.01, 0, 0]},
        "rectification_matrix": {"rows": 3, "cols": 3, "data": [1, 0, 0, 0, 1, 0, 0, 0, 1]},
        "projection_matrix": {"rows": 3, "cols": 4, "data": [450, 0, 320, 0, 0, 450, 256, 0, 0, 0, 1, 0]}
    }"#;

    #[test]
    fn test_parse_camera_info() -> Result<(), Box<dyn std::error::Error>> {
        let info: CameraInfo = serde_json::from_str(INFO)?;
        info.validate()?;

        let camera = info.to_fisheye_camera()?;
        assert_eq!(camera.size(), ImageSize::from([640, 512]));
        assert_eq!(camera.distortion().k1, 0.02);
        assert_eq!(camera.distortion().k2, -0.01);

        let rectified = info.rectified_camera()?.ok_or("missing rectification")?;
        assert_eq!(rectified.intrinsic().fx, 450.0);
        Ok(())
    }

    #[test]
    fn test_column_distortion_and_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let info: CameraInfo = serde_json::from_str(
            r#"{
                "image_width": 100,
                "image_height": 80,
                "camera_matrix": {"rows": 3, "cols": 3, "data": [90, 0, 50, 0, 90, 40, 0, 0, 1]},
                "distortion_coefficients": {"rows": 4, "cols": 1, "data": [0.1, 0.2, 0.3, 0.4]}
            }"#,
        )?;
        assert_eq!(info.distortion_model, "equidistant");
        assert_eq!(info.distortion()?.to_array(), [0.1, 0.2, 0.3, 0.4]);
        assert!(info.rectified_camera()?.is_none());
        Ok(())
    }

    #[test]
    fn test_rejects_malformed_records() -> Result<(), Box<dyn std::error::Error>> {
        let base: CameraInfo = serde_json::from_str(INFO)?;

        let mut short = base.clone();
        short.camera_matrix.data.pop();
        assert!(matches!(
            short.validate(),
            Err(StereoCheckError::InvalidIntrinsics(_))
        ));

        let mut radtan = base.clone();
        radtan.distortion_model = "plumb_bob".to_string();
        assert!(matches!(
            radtan.validate(),
            Err(StereoCheckError::InvalidIntrinsics(_))
        ));

        let mut empty = base.clone();
        empty.image_width = 0;
        assert!(matches!(
            empty.validate(),
            Err(StereoCheckError::InvalidIntrinsics(_))
        ));

        let mut negative = base.clone();
        negative.camera_matrix.data[0] = -500.0;
        assert!(matches!(
            negative.validate(),
            Err(StereoCheckError::Camera(_))
        ));

        let mut projection = base;
        projection.projection_matrix = Some(MatrixData {
            rows: 3,
            cols: 3,
            data: vec![0.0; 9],
        });
        assert!(matches!(
            projection.validate(),
            Err(StereoCheckError::InvalidIntrinsics(_))
        ));
        Ok(())
    }

    #[test]
    fn test_rejects_sheared_rectification() -> Result<(), Box<dyn std::error::Error>> {
        let mut info: CameraInfo = serde_json::from_str(INFO)?;
        info.rectification_matrix = Some(MatrixData {
            rows: 3,
            cols: 3,
            data: vec![1.0, 0.2, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        });
        assert!(matches!(
            info.rectified_camera(),
            Err(StereoCheckError::Camera(CameraError::InvalidIntrinsics(_)))
        ));
        assert!(info.validate().is_err());
        Ok(())
    }

    #[test]
    fn test_record_from_camera() -> Result<(), Box<dyn std::error::Error>> {
        let info: CameraInfo = serde_json::from_str(INFO)?;
        let camera = info.to_fisheye_camera()?;
        let rebuilt = CameraInfo::from_camera("left", &camera);
        assert_eq!(rebuilt.to_fisheye_camera()?, camera);

        let json = serde_json::to_string(&rebuilt)?;
        let back: CameraInfo = serde_json::from_str(&json)?;
        assert_eq!(back, rebuilt);
        Ok(())
    }
}
