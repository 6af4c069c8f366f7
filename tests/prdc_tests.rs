//! Properties of the manifold metrics on random point clouds.

use genmetrics::{compute_prdc, PrdcEngine};
use ndarray::{array, Array2};
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn cloud(n: usize, dims: usize, offset: f64, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array2::<f64>::random_using((n, dims), StandardNormal, &mut rng) + offset
}

#[test]
fn test_scores_within_bounds() {
    for (seed, offset) in [(1, 0.0), (2, 0.5), (3, 1.5)] {
        let real = cloud(120, 4, 0.0, seed);
        let fake = cloud(90, 4, offset, seed + 100);
        let s = compute_prdc(real.view(), fake.view(), 5).unwrap();

        for value in [s.precision, s.recall, s.coverage] {
            assert!((0.0..=1.0).contains(&value), "{s:?}");
        }
        assert!(s.density >= 0.0);
    }
}

#[test]
fn test_identical_sets() {
    let x = cloud(100, 3, 0.0, 4);
    for k in [1, 3, 5] {
        let s = compute_prdc(x.view(), x.view(), k).unwrap();
        assert_eq!(s.precision, 1.0);
        assert_eq!(s.recall, 1.0);
        assert_eq!(s.coverage, 1.0);
        // Each ball holds its own centre and at least k neighbours.
        assert!(s.density >= (k as f64 + 1.0) / k as f64);
    }
}

#[test]
fn test_unit_square_with_outlier() {
    let pts = array![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0], [2.0, 2.0]];
    let s = compute_prdc(pts.view(), pts.view(), 2).unwrap();
    assert_eq!((s.precision, s.recall, s.coverage), (1.0, 1.0, 1.0));
    assert!((s.density - 1.6).abs() < 1e-12);
}

#[test]
fn test_coverage_non_decreasing_in_k() {
    let real = cloud(150, 5, 0.0, 5);
    let fake = cloud(150, 5, 0.8, 6);

    let coverage: Vec<f64> = (1..=8)
        .map(|k| compute_prdc(real.view(), fake.view(), k).unwrap().coverage)
        .collect();
    for pair in coverage.windows(2) {
        assert!(pair[0] <= pair[1], "{coverage:?}");
    }
}

#[test]
fn test_far_shift_scores_zero() {
    let real = cloud(100, 4, 0.0, 7);
    let fake = cloud(100, 4, 50.0, 8);
    let s = compute_prdc(real.view(), fake.view(), 3).unwrap();

    assert_eq!(s.precision, 0.0);
    assert_eq!(s.recall, 0.0);
    assert_eq!(s.density, 0.0);
    assert_eq!(s.coverage, 0.0);
}

#[test]
fn test_narrow_fake_set_trades_recall_for_precision() {
    let real = cloud(200, 2, 0.0, 9);
    let fake = cloud(200, 2, 0.0, 10) * 0.1;
    let s = compute_prdc(real.view(), fake.view(), 5).unwrap();

    assert!(s.precision > 0.9, "{s:?}");
    assert!(s.recall < 0.5, "{s:?}");
    assert!(s.coverage < 0.5, "{s:?}");
}

#[test]
fn test_engine_averages_classes() {
    let mut engine = PrdcEngine::new(1, 3);
    let real_a = cloud(50, 3, 0.0, 11);
    let real_b = cloud(50, 3, 10.0, 12);

    let same = engine
        .compute_metric(0, Some(0), None, real_a.view(), real_a.view())
        .unwrap();
    let apart = engine
        .compute_metric(0, Some(1), Some(3), real_a.view(), real_b.view())
        .unwrap();

    let agg = engine.aggregate(0).unwrap();
    assert!((agg.precision - (same.precision + apart.precision) / 2.0).abs() < 1e-12);
    assert!((agg.density - (same.density + apart.density) / 2.0).abs() < 1e-12);
    assert_eq!(engine.results(0).unwrap()[1].class, Some(1));
}

#[test]
fn test_five_sigma_shift_in_eight_dims() {
    let real = cloud(100, 8, 0.0, 13);
    let fake = cloud(100, 8, 5.0, 14);
    let s = compute_prdc(real.view(), fake.view(), 3).unwrap();

    assert!(s.precision < 0.05, "{s:?}");
    assert!(s.recall < 0.05, "{s:?}");
}
