//! Inference timing on random inputs.

use std::time::{Duration, Instant};

use ndarray::{ArrayD, IxDyn};
use rand::Rng;

use crate::error::{Error, Result};
use crate::model::{ModelCache, ModelKind, Predictor};

/// Side of the square random test image.
pub const BENCH_IMAGE_SIZE: usize = 256;

/// Width of the random style bottleneck fed to transformers.
pub const BOTTLENECK_DIMS: usize = 100;

/// Timing of one model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchReport {
    pub model: ModelKind,
    pub runs: usize,
    /// First run, which includes session warm-up.
    pub first: Duration,
    /// Mean of the remaining runs, or the first run if there is only one.
    pub mean: Duration,
}

fn random_array<R: Rng>(shape: &[usize], rng: &mut R) -> ArrayD<f32> {
    ArrayD::from_shape_simple_fn(IxDyn(shape), || rng.random_range(0.0..1.0))
}

/// Inputs shaped for `kind`: an image, plus a bottleneck for transformers.
pub fn random_inputs<R: Rng>(kind: ModelKind, rng: &mut R) -> Vec<ArrayD<f32>> {
    let image = random_array(&[1, BENCH_IMAGE_SIZE, BENCH_IMAGE_SIZE, 3], rng);
    match kind {
        ModelKind::Style(_) => vec![image],
        ModelKind::Transformer(_) => {
            vec![image, random_array(&[1, 1, 1, BOTTLENECK_DIMS], rng)]
        }
    }
}

/// Run `predictor` `runs` times on one set of random inputs.
///
/// # Errors
///
/// Returns an error if `runs` is zero or any run fails.
pub fn bench_predictor<R: Rng>(
    predictor: &dyn Predictor,
    kind: ModelKind,
    runs: usize,
    rng: &mut R,
) -> Result<BenchReport> {
    if runs == 0 {
        return Err(Error::InvalidParameter {
            name: "runs".to_string(),
            reason: "must be greater than 0".to_string(),
        });
    }

    let inputs = random_inputs(kind, rng);
    let mut timings = Vec::with_capacity(runs);
    for _ in 0..runs {
        let start = Instant::now();
        predictor.predict(&inputs)?;
        timings.push(start.elapsed());
    }

    let first = timings[0];
    let rest = &timings[1..];
    let mean = match u32::try_from(rest.len()) {
        Ok(0) | Err(_) => first,
        Ok(count) => rest.iter().sum::<Duration>() / count,
    };

    tracing::info!("{kind}: first run {first:.2?}, mean of {runs} runs {mean:.2?}");
    Ok(BenchReport {
        model: kind,
        runs,
        first,
        mean,
    })
}

/// Benchmark every model variant, loading each through `cache`.
///
/// # Errors
///
/// Returns the first load or inference error.
pub fn bench_all<R: Rng>(
    cache: &ModelCache,
    runs: usize,
    rng: &mut R,
) -> Result<Vec<BenchReport>> {
    ModelKind::ALL
        .into_iter()
        .map(|kind| {
            let predictor = cache.load(kind)?;
            bench_predictor(predictor.as_ref(), kind, runs, rng)
        })
        .collect()
}
