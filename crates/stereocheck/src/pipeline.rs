use stereocheck_3d::pose::{EpipolarReport, EpipolarValidator};
use stereocheck_image::{Image, ImageDtype, ImageError, ImageSize};
use stereocheck_imgproc::calibration::distortion::{generate_remap_map, RectifiedCamera};
use stereocheck_imgproc::calibration::stereo::{
    stereo_rectify, RectificationPose, RectificationResult,
};
use stereocheck_imgproc::calibration::{CameraProjection, FisheyeCamera};
use stereocheck_imgproc::interpolation::{remap, InterpolationMode, PixelMap};

use crate::camera_info::CameraInfo;
use crate::config::StereoCheckConfig;
use crate::correspondence::CorrespondenceFinder;
use crate::error::StereoCheckError;

/// The pixel maps resampling the images of both cameras of a stereo pair.
#[derive(Clone, Debug, PartialEq)]
pub struct StereoMaps {
    maps: [PixelMap; 2],
    source_sizes: [ImageSize; 2],
}

impl StereoMaps {
    /// Build the maps resampling images of `src[i]` into the pixel grid of `dst[i]`.
    ///
    /// Both maps are generated concurrently.
    pub fn build<D, S>(dst: [&D; 2], src: [&S; 2]) -> Result<Self, ImageError>
    where
        D: CameraProjection + ?Sized,
        S: CameraProjection + ?Sized,
    {
        let (first, second) = rayon::join(
            || generate_remap_map(dst[0], src[0]),
            || generate_remap_map(dst[1], src[1]),
        );
        Ok(Self {
            maps: [first?, second?],
            source_sizes: [src[0].size(), src[1].size()],
        })
    }

    /// The map of camera `index` (0 or 1).
    pub fn map(&self, index: usize) -> Option<&PixelMap> {
        self.maps.get(index)
    }

    /// Size of the images the map of camera `index` samples from.
    pub fn source_size(&self, index: usize) -> Option<ImageSize> {
        self.source_sizes.get(index).copied()
    }

    /// Resample both images with bilinear interpolation.
    ///
    /// Destination pixels without a source location take `fill_value` in every
    /// channel.
    ///
    /// # Errors
    ///
    /// Each image must have the source size of its map.
    pub fn apply<T: ImageDtype, const C: usize>(
        &self,
        image1: &Image<T, C>,
        image2: &Image<T, C>,
        fill_value: f32,
    ) -> Result<(Image<T, C>, Image<T, C>), ImageError> {
        let fill = [T::from_f32(fill_value); C];
        let warp = |src: &Image<T, C>, index: usize| -> Result<Image<T, C>, ImageError> {
            let expected = self.source_sizes[index];
            if src.size() != expected {
                return Err(ImageError::InvalidImageSize(
                    src.width(),
                    src.height(),
                    expected.width,
                    expected.height,
                ));
            }
            let map = &self.maps[index];
            let mut dst = Image::from_size_val(map.size(), T::default())?;
            remap(src, &mut dst, map, InterpolationMode::Bilinear, fill)?;
            Ok(dst)
        };
        let (warped1, warped2) = rayon::join(|| warp(image1, 0), || warp(image2, 1));
        Ok((warped1?, warped2?))
    }
}

/// Epipolar checks of the three stages of a rectification round trip.
#[derive(Debug)]
pub struct RoundTripReport {
    /// Check of the input rectified pair.
    pub rectified: Result<EpipolarReport, StereoCheckError>,
    /// Check of the pair distorted back to the fisheye images.
    pub distorted: Result<EpipolarReport, StereoCheckError>,
    /// Check of the distorted pair rectified again with the computed rectification.
    pub rerectified: Result<EpipolarReport, StereoCheckError>,
    /// The distorted images.
    pub distorted_images: (Image<f32, 1>, Image<f32, 1>),
    /// The re-rectified images.
    pub rerectified_images: (Image<f32, 1>, Image<f32, 1>),
}

impl RoundTripReport {
    /// The stage names with their results, in pipeline order.
    pub fn stages(&self) -> [(&'static str, &Result<EpipolarReport, StereoCheckError>); 3] {
        [
            ("rectified", &self.rectified),
            ("distorted", &self.distorted),
            ("rerectified", &self.rerectified),
        ]
    }

    /// Whether both rectified stages succeeded with residuals below `max_residual`.
    ///
    /// The distorted stage is not a pinhole pair, its residuals are informative only.
    pub fn is_consistent(&self, max_residual: f64) -> bool {
        [&self.rectified, &self.rerectified]
            .iter()
            .all(|stage| matches!(stage, Ok(report) if report.is_consistent(max_residual)))
    }
}

/// A calibrated stereo fisheye pair with its rectification and cached pixel maps.
///
/// The maps are built once when the pair is created and reused for every
/// image.
#[derive(Clone, Debug)]
pub struct StereoCheck {
    config: StereoCheckConfig,
    cameras: [FisheyeCamera; 2],
    pose: RectificationPose,
    rectification: RectificationResult,
    rectified: [RectifiedCamera; 2],
    rectify_maps: StereoMaps,
    distort_maps: StereoMaps,
    calibrated_maps: Option<StereoMaps>,
    validator: EpipolarValidator,
}

impl StereoCheck {
    /// Create the check from two calibration records.
    ///
    /// The cameras are rectified for the configured baseline with an identity
    /// relative rotation. When both records carry their own rectification and
    /// projection matrices, the maps distorting those rectified views are built
    /// too. Both cameras accept rays up to `config.max_theta` from their axis.
    pub fn new(
        left: &CameraInfo,
        right: &CameraInfo,
        config: StereoCheckConfig,
    ) -> Result<Self, StereoCheckError> {
        let max_theta = config.max_theta;
        if !(max_theta > 0.0 && max_theta < std::f64::consts::PI) {
            return Err(StereoCheckError::InvalidIntrinsics(format!(
                "max_theta must be in (0, pi), got {max_theta}"
            )));
        }
        let cameras = [
            left.to_fisheye_camera()?.with_max_theta(max_theta),
            right.to_fisheye_camera()?.with_max_theta(max_theta),
        ];
        let pose = RectificationPose::from_baseline(config.baseline, config.rectify.baseline_axis);
        let check = Self::from_cameras(cameras, pose, config)?;

        match (left.rectified_camera()?, right.rectified_camera()?) {
            (Some(view1), Some(view2)) => check.with_calibrated_views([view1, view2]),
            (None, None) => Ok(check),
            _ => Err(StereoCheckError::InvalidIntrinsics(
                "only one calibration record has a rectification".to_string(),
            )),
        }
    }

    /// Create the check from two camera models and their relative pose.
    pub fn from_cameras(
        cameras: [FisheyeCamera; 2],
        pose: RectificationPose,
        config: StereoCheckConfig,
    ) -> Result<Self, StereoCheckError> {
        let rectification = stereo_rectify(&cameras[0], &cameras[1], &pose, &config.rectify)?;
        let rectified = [
            RectifiedCamera::from_rectification(&rectification, 0)?,
            RectifiedCamera::from_rectification(&rectification, 1)?,
        ];
        log::info!(
            "rectified {} cameras with focal length {:.2} and baseline {:.4}",
            rectification.size,
            rectification.focal_length(),
            rectification.baseline()
        );

        let (rectify_maps, distort_maps) = rayon::join(
            || StereoMaps::build([&rectified[0], &rectified[1]], [&cameras[0], &cameras[1]]),
            || StereoMaps::build([&cameras[0], &cameras[1]], [&rectified[0], &rectified[1]]),
        );

        Ok(Self {
            validator: EpipolarValidator::new(config.lmeds.clone()),
            rectify_maps: rectify_maps?,
            distort_maps: distort_maps?,
            calibrated_maps: None,
            config,
            cameras,
            pose,
            rectification,
            rectified,
        })
    }

    /// Use the rectified views of the calibration to distort rectified images.
    pub fn with_calibrated_views(
        mut self,
        views: [RectifiedCamera; 2],
    ) -> Result<Self, StereoCheckError> {
        let cameras = [&self.cameras[0], &self.cameras[1]];
        self.calibrated_maps = Some(StereoMaps::build(cameras, [&views[0], &views[1]])?);
        Ok(self)
    }

    /// The configuration.
    pub fn config(&self) -> &StereoCheckConfig {
        &self.config
    }

    /// The camera models.
    pub fn cameras(&self) -> &[FisheyeCamera; 2] {
        &self.cameras
    }

    /// The relative pose the rectification was computed for.
    pub fn pose(&self) -> &RectificationPose {
        &self.pose
    }

    /// The computed rectification.
    pub fn rectification(&self) -> &RectificationResult {
        &self.rectification
    }

    /// The rectified view of camera `index` (0 or 1).
    pub fn rectified_camera(&self, index: usize) -> Option<&RectifiedCamera> {
        self.rectified.get(index)
    }

    /// The maps from the raw fisheye images to the rectified views.
    pub fn rectify_maps(&self) -> &StereoMaps {
        &self.rectify_maps
    }

    /// The maps from the rectified views to the raw fisheye images.
    pub fn distort_maps(&self) -> &StereoMaps {
        &self.distort_maps
    }

    /// Rectify a pair of raw fisheye images.
    pub fn rectify_pair<T: ImageDtype, const C: usize>(
        &self,
        raw1: &Image<T, C>,
        raw2: &Image<T, C>,
    ) -> Result<(Image<T, C>, Image<T, C>), StereoCheckError> {
        Ok(self.rectify_maps.apply(raw1, raw2, self.config.fill_value)?)
    }

    /// Distort a pair rectified with the computed rectification back to fisheye.
    pub fn distort_pair<T: ImageDtype, const C: usize>(
        &self,
        rectified1: &Image<T, C>,
        rectified2: &Image<T, C>,
    ) -> Result<(Image<T, C>, Image<T, C>), StereoCheckError> {
        Ok(self
            .distort_maps
            .apply(rectified1, rectified2, self.config.fill_value)?)
    }

    /// Distort a pair rectified with the calibration's own rectification back to
    /// fisheye.
    ///
    /// # Errors
    ///
    /// Returns [`StereoCheckError::InvalidIntrinsics`] if the calibration records
    /// had no rectification and projection matrices.
    pub fn distort_calibrated_pair<T: ImageDtype, const C: usize>(
        &self,
        rectified1: &Image<T, C>,
        rectified2: &Image<T, C>,
    ) -> Result<(Image<T, C>, Image<T, C>), StereoCheckError> {
        let maps = self.calibrated_maps.as_ref().ok_or_else(|| {
            StereoCheckError::InvalidIntrinsics(
                "the calibration records have no rectification and projection matrices"
                    .to_string(),
            )
        })?;
        Ok(maps.apply(rectified1, rectified2, self.config.fill_value)?)
    }

    /// Compute the rectification for another relative pose and the maps from the
    /// current rectified views into the new ones.
    pub fn rerectify(
        &self,
        pose: &RectificationPose,
    ) -> Result<(RectificationResult, StereoMaps), StereoCheckError> {
        let (camera1, camera2) = (&self.cameras[0], &self.cameras[1]);
        let result = stereo_rectify(camera1, camera2, pose, &self.config.rectify)?;
        let views = [
            RectifiedCamera::from_rectification(&result, 0)?,
            RectifiedCamera::from_rectification(&result, 1)?,
        ];
        let maps =
            StereoMaps::build([&views[0], &views[1]], [&self.rectified[0], &self.rectified[1]])?;
        Ok((result, maps))
    }

    /// Re-rectify for another baseline, keeping the relative rotation and the
    /// direction of the translation.
    pub fn rebaseline(
        &self,
        baseline: f64,
    ) -> Result<(RectificationResult, StereoMaps), StereoCheckError> {
        let current = self.pose.baseline();
        let translation = if current > 0.0 {
            self.pose.translation.map(|t| t * baseline / current)
        } else {
            RectificationPose::from_baseline(baseline, self.config.rectify.baseline_axis)
                .translation
        };
        log::info!("re-rectifying for baseline {baseline} (was {current})");
        self.rerectify(&RectificationPose {
            rotation: self.pose.rotation,
            translation,
        })
    }

    /// Match points in two rectified images and check their epipolar geometry.
    pub fn validate<F: CorrespondenceFinder + ?Sized>(
        &self,
        image1: &Image<f32, 1>,
        image2: &Image<f32, 1>,
        finder: &F,
    ) -> Result<EpipolarReport, StereoCheckError> {
        let pairs = finder.find_correspondences(image1, image2)?;
        let report = self.validator.validate(&pairs)?;
        log::info!(
            "epipolar check: {} of {} pairs are inliers, mean {:.3} px, max {:.3} px, \
             row difference median {:.3} px",
            report.num_inliers(),
            pairs.len(),
            report.stats.mean,
            report.stats.max,
            report.row_alignment.median
        );
        if !report.is_consistent(self.config.max_residual) {
            log::warn!(
                "epipolar residuals up to {:.3} px exceed {:.3} px",
                report.stats.max,
                self.config.max_residual
            );
        }
        Ok(report)
    }

    /// Rectify two raw fisheye images and check their epipolar geometry.
    pub fn check_raw_pair<F: CorrespondenceFinder + ?Sized>(
        &self,
        raw1: &Image<f32, 1>,
        raw2: &Image<f32, 1>,
        finder: &F,
    ) -> Result<EpipolarReport, StereoCheckError> {
        let (rectified1, rectified2) = self.rectify_pair(raw1, raw2)?;
        self.validate(&rectified1, &rectified2, finder)
    }

    /// Check a rectified pair, distort it back to fisheye, check it again,
    /// rectify it with the computed rectification and check it a third time.
    ///
    /// The input pair is expected in the calibration's own rectified views when
    /// the records carry them, in the computed rectified views otherwise.
    /// Failures of a stage are kept in the report, only resampling errors abort.
    pub fn round_trip<F: CorrespondenceFinder + ?Sized>(
        &self,
        rectified1: &Image<f32, 1>,
        rectified2: &Image<f32, 1>,
        finder: &F,
    ) -> Result<RoundTripReport, StereoCheckError> {
        log::info!("round trip: checking the rectified input");
        let rectified = self.validate(rectified1, rectified2, finder);

        let distorted_images = match &self.calibrated_maps {
            Some(maps) => maps.apply(rectified1, rectified2, self.config.fill_value)?,
            None => {
                log::warn!("no calibration rectification, distorting with the computed one");
                self.distort_maps
                    .apply(rectified1, rectified2, self.config.fill_value)?
            }
        };
        log::info!("round trip: checking the distorted pair");
        let distorted = self.validate(&distorted_images.0, &distorted_images.1, finder);

        let rerectified_images = self.rectify_pair(&distorted_images.0, &distorted_images.1)?;
        log::info!("round trip: checking the re-rectified pair");
        let rerectified = self.validate(&rerectified_images.0, &rerectified_images.1, finder);

        Ok(RoundTripReport {
            rectified,
            distorted,
            rerectified,
            distorted_images,
            rerectified_images,
        })
    }
}
