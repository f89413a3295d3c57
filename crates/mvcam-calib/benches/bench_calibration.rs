use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use mvcam_calib::engine::{CalibrationEngine, CalibrationParams};
use mvcam_calib::pattern::{ChessboardPattern, PatternSize};
use mvcam_calib::solver::{calibrate_views, SolverOptions};
use mvcam_calib::synthetic::SyntheticBoard;
use mvcam_calib::CalibrationSample;
use mvcam_pnp as mpnp;

fn generate_board(views: usize) -> SyntheticBoard {
    let camera = mpnp::CameraModel::with_distortion(
        mpnp::CameraIntrinsics::new(1400.0, 1400.0, 968.0, 608.0),
        mpnp::PolynomialDistortion::radial(-0.12, 0.03),
    );
    let pattern = ChessboardPattern::new(PatternSize::new(9, 6), 0.025).unwrap();
    SyntheticBoard::orbit(pattern, camera, views)
}

fn samples(board: &SyntheticBoard) -> Vec<CalibrationSample> {
    (0..board.len())
        .map(|view| CalibrationSample {
            sequence: view as u64,
            corners: board.corners(view).unwrap().to_vec(),
        })
        .collect()
}

fn bench_calibrate_views(c: &mut Criterion) {
    let mut group = c.benchmark_group("calibrate_views");
    group.sample_size(20);
    for &n in &[10usize, 25, 50] {
        let board = generate_board(n);
        let template = board.pattern().template();
        let views: Vec<&[[f64; 2]]> = (0..n).map(|v| board.corners(v).unwrap()).collect();
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                let res = calibrate_views(&template, &views, &SolverOptions::default()).unwrap();
                std::hint::black_box(res);
            });
        });
    }
    group.finish();
}

fn bench_subset_solve(c: &mut Criterion) {
    let mut group = c.benchmark_group("subset_average");
    group.sample_size(10);
    let board = generate_board(60);
    let samples = samples(&board);
    for &per_batch in &[1usize, 4] {
        group.bench_with_input(
            BenchmarkId::from_parameter(per_batch),
            &per_batch,
            |b, &per_batch| {
                let mut engine = CalibrationEngine::new(
                    board.detector(),
                    CalibrationParams {
                        iterations_per_batch: per_batch,
                        random_seed: Some(42),
                        ..Default::default()
                    },
                );
                b.iter(|| {
                    let res = engine.solve(board.pattern(), &samples).unwrap();
                    std::hint::black_box(res);
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_calibrate_views, bench_subset_solve);
criterion_main!(benches);
