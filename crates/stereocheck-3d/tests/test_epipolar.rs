use rand::{rngs::StdRng, Rng, SeedableRng};
use stereocheck_3d::pose::{
    compute_epilines, CorrespondencePair, EpipolarValidator, FundamentalError, LmedsParams, View,
};

// points seen by two parallel pinhole cameras, the second shifted along x
fn rectified_pairs(n: usize, noise: f64, seed: u64) -> CorrespondencePair {
    let mut rng = StdRng::seed_from_u64(seed);
    let (f, cx, cy, baseline) = (455.0, 320.0, 256.0, 0.12);
    (0..n)
        .map(|_| {
            let p = [
                rng.random_range(-1.5..1.5),
                rng.random_range(-1.0..1.0),
                rng.random_range(1.5..8.0),
            ];
            let u1 = f * p[0] / p[2] + cx;
            let v = f * p[1] / p[2] + cy;
            let u2 = f * (p[0] - baseline) / p[2] + cx;
            let jitter = |rng: &mut StdRng| rng.random_range(-noise..=noise);
            (
                [u1 + jitter(&mut rng), v + jitter(&mut rng)],
                [u2 + jitter(&mut rng), v + jitter(&mut rng)],
            )
        })
        .collect()
}

#[test]
fn test_exact_rectified_pairs() -> Result<(), FundamentalError> {
    let pairs = rectified_pairs(80, 0.0, 1);
    let report = EpipolarValidator::default().validate(&pairs)?;

    assert_eq!(report.fundamental.num_inliers(), 80);
    assert!(report.stats.max < 1e-2);
    assert!(report.row_alignment.max < 1e-9);

    // the epipolar line of a left point is its row in the right image
    let lines = compute_epilines(pairs.points1(), View::First, &report.fundamental.matrix);
    for (line, p) in lines.iter().zip(pairs.points1()) {
        let (a, b) = line.endpoints(640.0).expect("horizontal line");
        assert!((a[1] - p[1]).abs() < 1e-6 && (b[1] - p[1]).abs() < 1e-6);
    }
    Ok(())
}

#[test]
fn test_noisy_pairs_with_outliers() -> Result<(), FundamentalError> {
    let mut pairs = rectified_pairs(100, 0.1, 2);
    let outliers: Vec<([f64; 2], [f64; 2])> = (0..15)
        .map(|i| ([50.0 + 30.0 * i as f64, 100.0], [20.0 + 30.0 * i as f64, 140.0 + i as f64]))
        .collect();
    for (p1, p2) in outliers {
        pairs.push(p1, p2);
    }

    let validator = EpipolarValidator::new(LmedsParams {
        random_seed: Some(3),
        ..Default::default()
    });
    let report = validator.validate(&pairs)?;

    // none of the appended outliers survive
    assert!(report.fundamental.inliers[100..].iter().all(|&b| !b));
    assert!(report.fundamental.num_inliers() >= 90);
    assert!(report.stats.max < 0.5, "max residual {}", report.stats.max);
    Ok(())
}

#[test]
fn test_five_pairs_are_rejected() {
    let pairs = rectified_pairs(5, 0.0, 4);
    assert!(matches!(
        EpipolarValidator::default().validate(&pairs),
        Err(FundamentalError::InsufficientCorrespondences { found: 5, .. })
    ));
}
