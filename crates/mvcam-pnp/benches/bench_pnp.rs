use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use mvcam_pnp as mpnp;
use rand::{rngs::StdRng, Rng, SeedableRng};

type PnpDataset = (Vec<[f64; 3]>, Vec<[f64; 2]>, mpnp::CameraModel);

fn generate_board_dataset_with_seed(columns: usize, rows: usize, noise_px: f64, seed: u64) -> PnpDataset {
    let camera = mpnp::CameraModel::with_distortion(
        mpnp::CameraIntrinsics::new(1400.0, 1400.0, 968.0, 608.0),
        mpnp::PolynomialDistortion::radial(-0.18, 0.04),
    );

    let world: Vec<[f64; 3]> = (0..rows)
        .flat_map(|r| (0..columns).map(move |c| [c as f64 * 0.02, r as f64 * 0.02, 0.0]))
        .collect();

    let truth = mpnp::PnPResult::from_rvec([0.2, -0.3, 0.05], [-0.1, -0.05, 0.8]);
    let mut rng = StdRng::seed_from_u64(seed);
    let image = mpnp::project_points(&world, &truth, &camera)
        .into_iter()
        .map(|[u, v]| {
            [
                u + rng.random_range(-noise_px..noise_px),
                v + rng.random_range(-noise_px..noise_px),
            ]
        })
        .collect();

    (world, image, camera)
}

fn bench_ippe(c: &mut Criterion) {
    let mut group = c.benchmark_group("pnp_ippe");
    for &(columns, rows) in &[(4usize, 3usize), (9, 6), (16, 12)] {
        let n = columns * rows;
        let (world, image, camera) = generate_board_dataset_with_seed(columns, rows, 0.3, 42);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                let res = mpnp::solve_pnp(
                    &world,
                    &image,
                    &camera,
                    mpnp::PnPMethod::Ippe(mpnp::IPPEParams { refine_lm: None }),
                )
                .unwrap();
                std::hint::black_box(res);
            });
        });
    }
    group.finish();
}

fn bench_ippe_refined(c: &mut Criterion) {
    let mut group = c.benchmark_group("pnp_ippe_lm");
    for &(columns, rows) in &[(9usize, 6usize), (16, 12)] {
        let n = columns * rows;
        let (world, image, camera) = generate_board_dataset_with_seed(columns, rows, 0.3, 7);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                let res =
                    mpnp::solve_pnp(&world, &image, &camera, mpnp::PnPMethod::IppeDefault).unwrap();
                std::hint::black_box(res);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_ippe, bench_ippe_refined);
criterion_main!(benches);
