use argh::FromArgs;
use glam::DVec3;
use std::path::PathBuf;

use stereocheck::imgproc::calibration::stereo::{BaselineAxis, RectificationPose};
use stereocheck::imgproc::calibration::{
    CameraIntrinsic, CameraProjection, FisheyeCamera, FisheyeDistortion,
};
use stereocheck::synthetic::{Checkerboard, SyntheticScene, TexturedPlane};
use stereocheck::{
    CameraInfo, ChessboardCorrespondence, CorrespondenceFinder, KeypointCorrespondence,
    StereoCheck, StereoCheckConfig,
};

/// Render a synthetic stereo fisheye scene and run the rectification round trip on it.
#[derive(FromArgs)]
struct Args {
    /// path to a JSON configuration, the defaults when omitted
    #[argh(option)]
    config: Option<PathBuf>,

    /// path to a JSON calibration record used for both cameras
    #[argh(option)]
    calibration: Option<PathBuf>,

    /// first fisheye distortion coefficient of the generated calibration
    #[argh(option, default = "0.0")]
    k1: f64,

    /// correspondence strategy, chessboard or keypoints
    #[argh(option, default = "String::from(\"chessboard\")")]
    strategy: String,

    /// distance of the chessboard to the cameras in meters
    #[argh(option, default = "1.2")]
    distance: f64,

    /// side of a chessboard square in meters
    #[argh(option, default = "0.06")]
    square_size: f64,

    /// rotation of the chessboard about the vertical axis in degrees
    #[argh(option, default = "0.0")]
    yaw: f64,

    /// rays traced per pixel side
    #[argh(option, default = "3")]
    supersampling: usize,

    /// print the round trip reports as JSON
    #[argh(switch)]
    json: bool,
}

fn load_calibration(args: &Args) -> Result<CameraInfo, Box<dyn std::error::Error>> {
    if let Some(path) = &args.calibration {
        return Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?);
    }
    let camera = FisheyeCamera::new(
        CameraIntrinsic::new(500.0, 500.0, 320.0, 256.0),
        FisheyeDistortion {
            k1: args.k1,
            ..Default::default()
        },
        [640, 512].into(),
    )?;
    Ok(CameraInfo::from_camera("synthetic", &camera))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let config: StereoCheckConfig = match &args.config {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => StereoCheckConfig::default(),
    };
    let info = load_calibration(&args)?;

    // rectify once to obtain the views the calibration tool would have stored
    let fresh = StereoCheck::new(&info, &info, config.clone())?;
    let rect = fresh.rectification().clone();
    println!("rectification: {}", serde_json::to_string_pretty(&rect)?);

    let left = info.clone().with_rectification(&rect.r1, &rect.p1);
    let right = info.with_rectification(&rect.r2, &rect.p2);
    let check = StereoCheck::new(&left, &right, config.clone())?;

    let baseline = config.baseline;
    let yaw = args.yaw.to_radians();
    let board = Checkerboard::new(
        DVec3::new(-baseline / 2.0, 0.0, args.distance),
        config.chessboard.pattern,
        args.square_size,
    )
    .rotated(glam::DMat3::from_rotation_y(yaw));
    let scene = SyntheticScene::chessboard(board)
        .with_background(TexturedPlane::new(args.distance * 2.5, 0.05, 7));

    let poses = [
        RectificationPose::from_baseline(0.0, BaselineAxis::X),
        *check.pose(),
    ];
    let view = |i: usize| check.rectified_camera(i).ok_or("missing rectified view");
    let rect1 = scene.render(view(0)?, &poses[0], args.supersampling)?;
    let rect2 = scene.render(view(1)?, &poses[1], args.supersampling)?;
    log::info!(
        "rendered {} rectified views, focal length {:.1}",
        view(0)?.size(),
        check.rectification().focal_length()
    );

    let finder: Box<dyn CorrespondenceFinder> = match args.strategy.as_str() {
        "chessboard" => Box::new(ChessboardCorrespondence::new(config.chessboard.clone())),
        "keypoints" => Box::new(KeypointCorrespondence::new(config.keypoints.clone())),
        other => return Err(format!("unknown strategy '{other}'").into()),
    };

    let report = check.round_trip(&rect1, &rect2, finder.as_ref())?;
    for (name, stage) in report.stages() {
        match stage {
            Ok(r) if args.json => println!("{name}: {}", serde_json::to_string_pretty(r)?),
            Ok(r) => println!(
                "{name}: {} inliers, residual mean {:.3} px, max {:.3} px, row difference {:.3} px",
                r.num_inliers(),
                r.stats.mean,
                r.stats.max,
                r.row_alignment.median
            ),
            Err(err) => println!("{name}: failed, {err}"),
        }
    }
    println!(
        "consistent below {} px: {}",
        config.max_residual,
        report.is_consistent(config.max_residual)
    );

    // depth of the matched points from their median disparity
    if let Ok(pairs) = finder.find_correspondences(&rect1, &rect2) {
        let mut disparities: Vec<f64> = pairs.iter().map(|(p1, p2)| p1[0] - p2[0]).collect();
        disparities.sort_by(f64::total_cmp);
        let depth = disparities
            .get(disparities.len() / 2)
            .and_then(|d| check.rectification().depth_from_disparity(*d));
        if let Some(depth) = depth {
            println!("median depth from disparity: {depth:.3} m");
        }
    }

    Ok(())
}
