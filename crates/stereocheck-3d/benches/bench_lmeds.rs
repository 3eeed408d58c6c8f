use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::hint::black_box;

use stereocheck_3d::pose::{
    find_fundamental_lmeds, fundamental_8point, CorrespondencePair, LmedsParams,
};

// rectified pair with outliers along y
fn gen_pairs(n: usize, outlier_ratio: f64) -> CorrespondencePair {
    let mut rng = StdRng::seed_from_u64(0);
    (0..n)
        .map(|_| {
            let p1 = [rng.random_range(0.0..640.0), rng.random_range(0.0..512.0)];
            let disparity = rng.random_range(5.0..60.0);
            let dy = if rng.random_bool(outlier_ratio) {
                rng.random_range(5.0..30.0)
            } else {
                rng.random_range(-0.2..0.2)
            };
            (p1, [p1[0] - disparity, p1[1] + dy])
        })
        .collect()
}

fn bench_fundamental(c: &mut Criterion) {
    let mut group = c.benchmark_group("Fundamental");

    for n in [50, 200, 1000] {
        let pairs = gen_pairs(n, 0.2);

        group.bench_with_input(BenchmarkId::new("8point", n), &pairs, |b, pairs| {
            b.iter(|| fundamental_8point(black_box(pairs.points1()), black_box(pairs.points2())))
        });

        group.bench_with_input(BenchmarkId::new("lmeds", n), &pairs, |b, pairs| {
            b.iter(|| find_fundamental_lmeds(black_box(pairs), &LmedsParams::default()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_fundamental);
criterion_main!(benches);
