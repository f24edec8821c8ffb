//! Benchmarks for the comb-test stages
//!
//! Covers:
//! - Single-period design construction and fit
//! - Cholesky factorization with and without ridge
//! - Monte Carlo null calibration across trial counts

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fingerprint_core::calibration::calibrate_null;
use fingerprint_core::periodic::{build_designs, PeriodDesign};
use fingerprint_core::whitening::factorize_covariance;
use fingerprint_core::{CovMatrix, PeriodSet, Whitener};
use std::f64::consts::PI;

const PERIODS: [u32; 6] = [8, 16, 32, 64, 128, 255];

/// Sinusoid at period 255 with deterministic pseudo-noise
fn generate_residual(n: usize) -> (Vec<u32>, Vec<f64>) {
    let ell: Vec<u32> = (2..2 + n as u32).collect();
    let r = ell
        .iter()
        .enumerate()
        .map(|(i, &l)| 0.3 * (2.0 * PI * l as f64 / 255.0).sin() + (17.3 * i as f64).sin())
        .collect();
    (ell, r)
}

fn ar1_cov(n: usize, rho: f64) -> CovMatrix {
    let mut data = vec![0.0; n * n];
    for i in 0..n {
        for j in 0..n {
            data[i * n + j] = rho.powi((i as i32 - j as i32).abs());
        }
    }
    CovMatrix::from_row_major(data, n, n).unwrap()
}

fn bench_period_fit(c: &mut Criterion) {
    let mut group = c.benchmark_group("PeriodFit");

    for size in [600, 1200, 2500].iter() {
        let (ell, r) = generate_residual(*size);
        let w = Whitener::Identity {
            sigma: vec![1.0; *size],
        };
        group.bench_with_input(BenchmarkId::new("design", size), size, |b, _| {
            b.iter(|| PeriodDesign::new(black_box(255), black_box(&ell), &w).unwrap())
        });

        let design = PeriodDesign::new(255, &ell, &w).unwrap();
        group.bench_with_input(BenchmarkId::new("delta_chi2", size), size, |b, _| {
            b.iter(|| design.delta_chi2(black_box(&r)))
        });
    }

    group.finish();
}

fn bench_covariance(c: &mut Criterion) {
    let mut group = c.benchmark_group("Covariance");

    for size in [50, 100, 200].iter() {
        let cov = ar1_cov(*size, 0.7);
        group.bench_with_input(BenchmarkId::new("factorize", size), size, |b, _| {
            b.iter(|| factorize_covariance(black_box(&cov)).unwrap())
        });

        let singular = CovMatrix::from_row_major(vec![1.0; size * size], *size, *size).unwrap();
        group.bench_with_input(BenchmarkId::new("factorize_ridge", size), size, |b, _| {
            b.iter(|| factorize_covariance(black_box(&singular)).unwrap())
        });
    }

    group.finish();
}

fn bench_calibration(c: &mut Criterion) {
    let mut group = c.benchmark_group("Calibration");
    group.sample_size(10);

    let (ell, _) = generate_residual(1200);
    let w = Whitener::Diagonal {
        sigma: vec![1.0; ell.len()],
    };
    let designs = build_designs(&PeriodSet::new(PERIODS).unwrap(), &ell, &w).unwrap();

    for n_trials in [1_000, 10_000].iter() {
        group.bench_with_input(
            BenchmarkId::new("diagonal_1200_bins", n_trials),
            n_trials,
            |b, &n| b.iter(|| calibrate_null(black_box(&designs), &w, n, 42)),
        );
    }

    group.finish();
}

criterion_group!(benches, bench_period_fit, bench_covariance, bench_calibration);
criterion_main!(benches);
