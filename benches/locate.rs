use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use findpts::{FindPoints, FindPtsConfig, Mesh, PointLocator};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

/// `m x m` elements covering a quarter of the annulus with radii 1 and 2.
fn annulus(m: usize, n: usize) -> Mesh<2> {
    Mesh::from_fn([n, n], m * m, |e, [r, t]| {
        let (i, j) = ((e % m) as f64, (e / m) as f64);
        let rho = 1. + (i + 0.5 * (r + 1.)) / m as f64;
        let theta = std::f64::consts::FRAC_PI_2 * (j + 0.5 * (t + 1.)) / m as f64;
        [rho * theta.cos(), rho * theta.sin()]
    })
    .unwrap()
}

pub fn setup(c: &mut Criterion) {
    for m in [4, 16, 64] {
        let mesh = annulus(m, 8);

        c.bench_with_input(BenchmarkId::new("Setup annulus", m), &mesh, |b, mesh| {
            b.iter(|| FindPoints::new(mesh.clone(), FindPtsConfig::default()).unwrap());
        });
    }
}

pub fn locate_points_2d(c: &mut Criterion) {
    let mut group = c.benchmark_group("Annulus");
    for m in [4, 16, 64] {
        let findpts = FindPoints::new(annulus(m, 8), FindPtsConfig::default()).unwrap();

        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let query: Vec<_> = (0..10_000)
            .map(|_| {
                let rho = rng.gen_range(1.0..2.0);
                let theta = rng.gen_range(0.0..std::f64::consts::FRAC_PI_2);
                [rho * f64::cos(theta), rho * f64::sin(theta)]
            })
            .collect();

        group.bench_with_input(BenchmarkId::new("locate_many", m), &query, |b, q| {
            b.iter(|| findpts.locate_many(q));
        });
        group.bench_with_input(BenchmarkId::new("par_locate_many", m), &query, |b, q| {
            b.iter(|| findpts.par_locate_many(q));
        });
    }
    group.finish();
}

pub fn locate_points_3d(c: &mut Criterion) {
    let mut group = c.benchmark_group("Box");
    for m in [2, 6, 12] {
        let mesh = Mesh::grid([0.; 3], [1.; 3], [m; 3], [6; 3]).unwrap();
        let findpts = FindPoints::new(mesh, FindPtsConfig::default()).unwrap();

        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let query: Vec<[f64; 3]> = (0..10_000).map(|_| rng.gen()).collect();

        group.bench_with_input(BenchmarkId::new("locate_many", m), &query, |b, q| {
            b.iter(|| findpts.locate_many(q));
        });
        group.bench_with_input(BenchmarkId::new("par_locate_many", m), &query, |b, q| {
            b.iter(|| findpts.par_locate_many(q));
        });
    }
    group.finish();
}

criterion_group!(benches, setup, locate_points_2d, locate_points_3d);
criterion_main!(benches);
