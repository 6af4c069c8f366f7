//! Statistical behaviour of the Fréchet distance on Gaussian samples.

use approx::{assert_abs_diff_eq, assert_relative_eq};
use genmetrics::{frechet_distance, summarize, FidEngine, FrechetOptions, MetricError};
use ndarray::{s, Array2};
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn gaussian(n: usize, dims: usize, offset: f64, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array2::<f64>::random_using((n, dims), StandardNormal, &mut rng) + offset
}

fn fid(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
    let sa = summarize(a.view()).unwrap();
    let sb = summarize(b.view()).unwrap();
    frechet_distance(&sa, &sb, &FrechetOptions::default()).unwrap()
}

#[test]
fn test_identical_sets_score_zero() {
    let x = gaussian(500, 8, 0.0, 1);
    assert_abs_diff_eq!(fid(&x, &x), 0.0, epsilon = 1e-6);
}

#[test]
fn test_symmetric() {
    let a = gaussian(400, 6, 0.0, 2);
    let b = gaussian(300, 6, 0.7, 3);
    assert_relative_eq!(fid(&a, &b), fid(&b, &a), max_relative = 1e-6);
}

#[test]
fn test_five_sigma_shift() {
    // ||μa − μb||² = 8 · 5² = 200; covariances agree up to sampling noise.
    let a = gaussian(2000, 8, 0.0, 4);
    let b = gaussian(2000, 8, 5.0, 5);
    let value = fid(&a, &b);
    assert!((180.0..240.0).contains(&value), "fid = {value}");
}

#[test]
fn test_grows_with_offset() {
    let base = gaussian(1000, 4, 0.0, 6);
    let scores: Vec<f64> = [0.5, 1.0, 2.0, 4.0]
        .iter()
        .map(|&offset| fid(&base, &gaussian(1000, 4, offset, 7)))
        .collect();

    for pair in scores.windows(2) {
        assert!(pair[0] < pair[1], "scores not increasing: {scores:?}");
    }
}

#[test]
fn test_independent_samples_score_near_zero() {
    let a = gaussian(3000, 4, 0.0, 8);
    let b = gaussian(3000, 4, 0.0, 9);
    let value = fid(&a, &b);
    assert!(value >= -1e-9 && value < 0.1, "fid = {value}");
}

#[test]
fn test_engine_batches_match_single_push() {
    let real = gaussian(200, 5, 0.0, 10);
    let fake = gaussian(150, 5, 0.3, 11);

    let mut whole = FidEngine::new(1, FrechetOptions::default());
    whole.push_real(real.clone()).unwrap();
    whole.push_fake(0, fake.clone()).unwrap();

    let mut chunked = FidEngine::new(1, FrechetOptions::default());
    for start in (0..200).step_by(64) {
        let end = (start + 64).min(200);
        chunked.push_real(real.slice(s![start..end, ..]).to_owned()).unwrap();
    }
    for start in (0..150).step_by(40) {
        let end = (start + 40).min(150);
        chunked
            .push_fake(0, fake.slice(s![start..end, ..]).to_owned())
            .unwrap();
    }

    assert_eq!(chunked.real_rows(), 200);
    assert_eq!(chunked.fake_rows(0).unwrap(), 150);
    assert_relative_eq!(
        whole.compute_fid(0).unwrap(),
        chunked.compute_fid(0).unwrap(),
        max_relative = 1e-9
    );
}

#[test]
fn test_engine_layers_are_independent() {
    let real = gaussian(300, 3, 0.0, 12);
    let mut engine = FidEngine::new(2, FrechetOptions::default());
    engine.push_real(real).unwrap();
    engine.push_fake(0, gaussian(300, 3, 0.1, 13)).unwrap();
    engine.push_fake(1, gaussian(300, 3, 3.0, 14)).unwrap();

    let near = engine.compute_fid(0).unwrap();
    let far = engine.compute_fid(1).unwrap();
    assert!(near < far);
    assert_eq!(engine.score(0), Some(near));

    assert!(matches!(
        engine.push_fake(0, gaussian(10, 3, 0.0, 15)),
        Err(MetricError::LayerFinalized(0))
    ));
}

#[test]
fn test_degenerate_covariance_is_regularized() {
    // Every embedding lies on a line: both covariances have rank 1.
    let t = gaussian(200, 1, 0.0, 16);
    let a = ndarray::concatenate![ndarray::Axis(1), t, &t * 2.0, &t * -1.0];
    let u = gaussian(200, 1, 0.0, 17);
    let b = ndarray::concatenate![ndarray::Axis(1), u, &u * 2.0, &u * -1.0];

    let value = fid(&a, &b);
    assert!(value.is_finite());
    assert!(value < 1.0, "fid = {value}");
}

#[test]
fn test_rank_deficient_clouds_scale_quadratically() {
    // Fewer samples than dimensions: both covariances are rank-deficient and
    // the product carries hundreds of rounding-noise eigenvalues.
    let a = gaussian(50, 256, 0.0, 18);
    let b = gaussian(50, 256, 0.0, 19);
    let base = fid(&a, &b);

    for scale in [10.0, 100.0, 1000.0] {
        let scaled = fid(&(&a * scale), &(&b * scale));
        assert_relative_eq!(scaled / (scale * scale), base, max_relative = 1e-4);
    }
}
