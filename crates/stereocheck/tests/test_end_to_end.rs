use glam::DVec3;
use stereocheck::imgproc::calibration::stereo::{BaselineAxis, RectificationPose};
use stereocheck::imgproc::calibration::CameraProjection;
use stereocheck::imgproc::features::PatternSize;
use stereocheck::synthetic::{Checkerboard, SyntheticScene, TexturedPlane};
use stereocheck::{
    CameraInfo, ChessboardCorrespondence, CorrespondenceError, KeypointCorrespondence,
    StereoCheck, StereoCheckConfig, StereoCheckError,
};

type TestResult = Result<(), Box<dyn std::error::Error>>;

const CALIBRATION: &str = r#"{
    "image_width": 640,
    "image_height": 512,
    "distortion_model": "equidistant",
    "camera_matrix": {"rows": 3, "cols": 3, "data": [500, 0, 320, 0, 500, 256, 0, 0, 1]},
    "distortion_coefficients": {"rows": 1, "cols": 4, "data": [0, 0, 0, 0]}
}"#;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn stereo_check() -> Result<StereoCheck, Box<dyn std::error::Error>> {
    let info: CameraInfo = serde_json::from_str(CALIBRATION)?;
    Ok(StereoCheck::new(&info, &info, StereoCheckConfig::default())?)
}

fn poses(check: &StereoCheck) -> [RectificationPose; 2] {
    [
        RectificationPose::from_baseline(0.0, BaselineAxis::X),
        *check.pose(),
    ]
}

fn chessboard_scene() -> SyntheticScene {
    // centred between the two cameras, the second one sits at x = -0.12
    let board = Checkerboard::new(DVec3::new(-0.06, 0.0, 1.2), PatternSize::new(8, 6), 0.06);
    SyntheticScene::chessboard(board)
}

fn render_rectified(
    check: &StereoCheck,
    scene: &SyntheticScene,
    supersampling: usize,
) -> Result<[stereocheck::image::Image<f32, 1>; 2], Box<dyn std::error::Error>> {
    let poses = poses(check);
    let view = |i: usize| check.rectified_camera(i).ok_or("missing rectified view");
    Ok([
        scene.render(view(0)?, &poses[0], supersampling)?,
        scene.render(view(1)?, &poses[1], supersampling)?,
    ])
}

#[test]
fn rectified_to_raw_and_back_matches() -> TestResult {
    init_logger();
    let check = stereo_check()?;
    let [rect1, rect2] = render_rectified(&check, &chessboard_scene(), 3)?;

    let (raw1, raw2) = check.distort_pair(&rect1, &rect2)?;
    assert_eq!(raw1.size(), check.cameras()[0].size());
    let (back1, back2) = check.rectify_pair(&raw1, &raw2)?;

    let size = rect1.size();
    let border = 20;
    for (original, back) in [(&rect1, &back1), (&rect2, &back2)] {
        let mut total = 0.0f64;
        let mut count = 0usize;
        for y in border..size.height - border {
            for x in border..size.width - border {
                let a = original.get_pixel(x, y, 0)?;
                let b = back.get_pixel(x, y, 0)?;
                total += (a - b).abs() as f64;
                count += 1;
            }
        }
        let mean = total / count as f64;
        assert!(mean < 0.02, "mean round trip error {mean}");
    }
    Ok(())
}

#[test]
fn chessboard_in_rectified_views_is_row_aligned() -> TestResult {
    init_logger();
    let check = stereo_check()?;
    let scene = chessboard_scene();
    let [rect1, rect2] = render_rectified(&check, &scene, 4)?;

    let finder = ChessboardCorrespondence::new(check.config().chessboard.clone());
    let report = check.validate(&rect1, &rect2, &finder)?;

    assert!(report.num_inliers() >= 24, "{} inliers", report.num_inliers());
    assert!(report.stats.max < 0.5, "max residual {}", report.stats.max);
    assert!(report.row_alignment.median < 0.5);

    // detected corners sit on the projected board corners
    let poses = poses(&check);
    let view = check.rectified_camera(0).ok_or("missing rectified view")?;
    let expected = scene.project_corners(view, &poses[0]);
    let detected = stereocheck::imgproc::features::find_chessboard_corners(
        &rect1,
        &check.config().chessboard,
    )?;
    assert_eq!(detected.len(), expected.len());
    for (d, e) in detected.iter().zip(expected.iter()) {
        let e = e.ok_or("corner not visible")?;
        let err = ((d[0] as f64 - e.x).powi(2) + (d[1] as f64 - e.y).powi(2)).sqrt();
        assert!(err < 0.3, "corner error {err}");
    }
    Ok(())
}

#[test]
fn round_trip_with_calibration_rectification() -> TestResult {
    init_logger();
    let base: CameraInfo = serde_json::from_str(CALIBRATION)?;
    let fresh = stereo_check()?;
    let rect = fresh.rectification();
    let left = base.clone().with_rectification(&rect.r1, &rect.p1);
    let right = base.with_rectification(&rect.r2, &rect.p2);
    let check = StereoCheck::new(&left, &right, StereoCheckConfig::default())?;

    let [rect1, rect2] = render_rectified(&check, &chessboard_scene(), 4)?;
    let finder = ChessboardCorrespondence::default();
    let report = check.round_trip(&rect1, &rect2, &finder)?;

    for (name, stage) in report.stages() {
        match stage {
            Ok(r) => println!("{name}: {} inliers, max {:.3} px", r.num_inliers(), r.stats.max),
            Err(err) => println!("{name}: {err}"),
        }
    }
    assert!(report.is_consistent(0.5));
    assert_eq!(report.rerectified_images.0.size(), rect1.size());
    Ok(())
}

#[test]
fn keypoints_on_textured_scene() -> TestResult {
    init_logger();
    let check = stereo_check()?;
    let scene = SyntheticScene::textured(TexturedPlane::new(3.0, 0.05, 7));
    let [rect1, rect2] = render_rectified(&check, &scene, 3)?;

    let finder = KeypointCorrespondence::new(check.config().keypoints.clone());
    let report = check.validate(&rect1, &rect2, &finder)?;

    assert!(report.num_inliers() >= 8);
    assert!(report.stats.median < 1.0, "median residual {}", report.stats.median);
    assert!(report.row_alignment.median < 1.0);
    Ok(())
}

#[test]
fn missing_chessboard_is_reported() -> TestResult {
    let check = stereo_check()?;
    let scene = SyntheticScene::textured(TexturedPlane::new(3.0, 0.05, 7));
    let [rect1, rect2] = render_rectified(&check, &scene, 1)?;

    let res = check.validate(&rect1, &rect2, &ChessboardCorrespondence::default());
    assert!(matches!(
        res,
        Err(StereoCheckError::Correspondence(
            CorrespondenceError::NoPatternFound { image: 0, .. }
        ))
    ));
    Ok(())
}

#[test]
fn raw_pair_check() -> TestResult {
    init_logger();
    let check = stereo_check()?;
    let scene = chessboard_scene();
    let poses = poses(&check);
    let raw1 = scene.render(&check.cameras()[0], &poses[0], 3)?;
    let raw2 = scene.render(&check.cameras()[1], &poses[1], 3)?;

    // the raw images are not row aligned, the rectified ones are
    let corners1 = scene.project_corners(&check.cameras()[0], &poses[0]);
    let corners2 = scene.project_corners(&check.cameras()[1], &poses[1]);
    let raw_row_error = corners1
        .iter()
        .zip(corners2.iter())
        .filter_map(|(a, b)| Some((a.as_ref()?.y - b.as_ref()?.y).abs()))
        .fold(0.0f64, f64::max);
    assert!(raw_row_error > 0.1);

    let report = check.check_raw_pair(&raw1, &raw2, &ChessboardCorrespondence::default())?;
    assert!(report.stats.max < 0.5, "max residual {}", report.stats.max);
    assert!(check.rectified_camera(0).is_some_and(|v| v.size() == raw1.size()));
    Ok(())
}
