//! Resampling schemes over (possibly unnormalized) log-weights.
//!
//! Grounded on `examples/BazzaCipher-robotics-rs/src/localization/particle_filter.rs`'s
//! `resampling`/`resampling_stratified`/`resampling_systematic`/`resample`
//! functions: every scheme reduces to drawing a set of `[0, 1)` points and
//! walking the weight CDF once, so the schemes differ only in how the
//! points are drawn.

use crate::utils::normalize;
use rand::Rng;
use rand::RngCore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResamplingScheme {
    Multinomial,
    Systematic,
    Stratified,
}

/// Draws `n_out` ancestor indices into a weight vector of length
/// `log_w.len()`, according to `scheme`.
pub fn resample_indices(
    log_w: &[f64],
    n_out: usize,
    scheme: ResamplingScheme,
    rng: &mut dyn RngCore,
) -> Vec<usize> {
    let w = normalize(log_w);
    let draws = match scheme {
        ResamplingScheme::Multinomial => {
            let mut d: Vec<f64> = (0..n_out).map(|_| rng.gen::<f64>()).collect();
            d.sort_by(|a, b| a.partial_cmp(b).expect("draws are never NaN"));
            d
        }
        ResamplingScheme::Systematic => {
            let u0: f64 = rng.gen::<f64>() / n_out as f64;
            (0..n_out).map(|i| u0 + i as f64 / n_out as f64).collect()
        }
        ResamplingScheme::Stratified => {
            (0..n_out).map(|i| (i as f64 + rng.gen::<f64>()) / n_out as f64).collect()
        }
    };
    resample_from_sorted_draws(&w, &draws)
}

/// Walks the weight CDF once against a vector of non-decreasing draws in
/// `[0, 1)`, assigning each draw the smallest index whose cumulative weight
/// exceeds it.
fn resample_from_sorted_draws(w: &[f64], sorted_draws: &[f64]) -> Vec<usize> {
    let mut cdf = Vec::with_capacity(w.len());
    let mut running = 0.0;
    for wi in w {
        running += wi;
        cdf.push(running);
    }
    let last = cdf.len() - 1;

    let mut indices = Vec::with_capacity(sorted_draws.len());
    let mut j = 0;
    for &d in sorted_draws {
        while j < last && d > cdf[j] {
            j += 1;
        }
        indices.push(j);
    }
    indices
}
