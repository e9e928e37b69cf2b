//! The nested-SMC parameter-inference layer: an outer ensemble of `M`
//! parameter particles, each carrying its own state-space model instance
//! and its own inner filter (state particles or a closed-form Kalman
//! approximation).
//!
//! Grounded on `original_source/pyfilter/algorithms/{base,ness,smc2}.py`
//! and `original_source/pyfilter/filters/nessmc2.py`. The outer ensemble is
//! `Vec<OuterParticle>` rather than the batched `[M, N, d]` tensor the
//! originating implementation uses — see DESIGN.md.

pub mod ness;
pub mod nessmc2;
pub mod smc2;

pub use ness::{JitterKernel, NESS};
pub use nessmc2::NESSMC2;
pub use smc2::SMC2;

use crate::error::Result;
use crate::filter::InnerFilter;
use crate::process::StateSpaceModel;
use crate::resampling::{resample_indices, ResamplingScheme};
use crate::utils::normalize;
use nalgebra::DVector;
use rand::RngCore;
use rand_pcg::Pcg64Mcg;

/// One outer-ensemble member: its own copy of the model (and therefore its
/// own current parameter values), its own inner filter instance and
/// history, and its own RNG stream so that `rayon`-parallel iteration over
/// the ensemble never shares mutable RNG state between particles.
pub(crate) struct OuterParticle {
    pub model: StateSpaceModel,
    pub inner: Box<dyn InnerFilter>,
    pub rng: Pcg64Mcg,
    pub log_weight: f64,
}

impl OuterParticle {
    pub(crate) fn forked(&self, reseed_from: &mut dyn RngCore) -> OuterParticle {
        OuterParticle {
            model: self.model.clone(),
            inner: self.inner.box_clone(),
            rng: new_rng(reseed_from),
            log_weight: self.log_weight,
        }
    }
}

/// Derives an independent, deterministic RNG stream from `rng` — used both
/// to seed each outer particle at `initialize` and to reseed forked copies
/// after an outer resample, so duplicated particles never replay identical
/// future randomness.
pub(crate) fn new_rng(rng: &mut dyn RngCore) -> Pcg64Mcg {
    Pcg64Mcg::new(rng.next_u64() as u128)
}

/// Weighted posterior mean of every trainable parameter (natural scale, in
/// `StateSpaceModel::p_map` order) across the outer ensemble — the
/// parameter-inference counterpart to `combined_filtermeans`' state
/// estimate.
pub(crate) fn weighted_parameter_means(particles: &[OuterParticle]) -> Vec<f64> {
    if particles.is_empty() {
        return Vec::new();
    }
    let log_w: Vec<f64> = particles.iter().map(|p| p.log_weight).collect();
    let w = normalize(&log_w);
    let p = particles[0].model.trainable_count();
    let mut out = vec![0.0; p];
    for (particle, wi) in particles.iter().zip(w.iter()) {
        let vals = particle.model.p_map(|x| x.value());
        for k in 0..p {
            out[k] += wi * vals[k];
        }
    }
    out
}

/// Forward-simulates `steps` timesteps from the current (weighted)
/// posterior: draws one outer particle by its parameter weight, then
/// forward-simulates from that particle's own inner filter, which
/// internally draws an ancestor state particle (or, for `KalmanLaplace`,
/// starts from the filtered mean) before applying the hidden transition.
pub(crate) fn combined_predict(
    particles: &[OuterParticle],
    steps: usize,
    rng: &mut dyn RngCore,
) -> Vec<DVector<f64>> {
    if particles.is_empty() {
        return Vec::new();
    }
    let log_w: Vec<f64> = particles.iter().map(|p| p.log_weight).collect();
    let chosen = resample_indices(&log_w, 1, ResamplingScheme::Systematic, rng)[0];
    let particle = &particles[chosen];
    particle.inner.predict(steps, &particle.model, rng)
}

pub(crate) fn combined_filtermeans(particles: &[OuterParticle]) -> Vec<DVector<f64>> {
    if particles.is_empty() {
        return Vec::new();
    }
    let log_w: Vec<f64> = particles.iter().map(|p| p.log_weight).collect();
    let w = normalize(&log_w);

    let steps = particles.iter().map(|p| p.inner.filter_means().len()).min().unwrap_or(0);
    let dim = particles[0].inner.filter_means().first().map(|m| m.len()).unwrap_or(0);
    let mut out = vec![DVector::<f64>::zeros(dim); steps];
    for (p, wi) in particles.iter().zip(w.iter()) {
        for t in 0..steps {
            out[t] += &p.inner.filter_means()[t] * *wi;
        }
    }
    out
}

/// Weight-normalized mean noise realization per step processed so far,
/// the `noisemeans()` counterpart to `combined_filtermeans`.
pub(crate) fn combined_noisemeans(particles: &[OuterParticle]) -> Vec<DVector<f64>> {
    if particles.is_empty() {
        return Vec::new();
    }
    let log_w: Vec<f64> = particles.iter().map(|p| p.log_weight).collect();
    let w = normalize(&log_w);

    let steps = particles.iter().map(|p| p.inner.noise_means().len()).min().unwrap_or(0);
    let dim = particles[0].inner.noise_means().first().map(|m| m.len()).unwrap_or(0);
    let mut out = vec![DVector::<f64>::zeros(dim); steps];
    for (p, wi) in particles.iter().zip(w.iter()) {
        for t in 0..steps {
            out[t] += &p.inner.noise_means()[t] * *wi;
        }
    }
    out
}

/// Common contract for the nested-SMC parameter-inference algorithms:
/// `NESS`, `SMC2`, and the `NESSMC2` hybrid.
pub trait Algorithm {
    fn initialize(&mut self, rng: &mut dyn RngCore) -> Result<()>;

    /// Processes one observation.
    fn update(&mut self, y: &DVector<f64>, rng: &mut dyn RngCore) -> Result<()>;

    /// Processes a whole observation sequence, optionally driving an
    /// `indicatif` progress bar.
    fn longfilter(&mut self, data: &[DVector<f64>], show_progress: bool, rng: &mut dyn RngCore) -> Result<()> {
        let bar = if show_progress { Some(indicatif::ProgressBar::new(data.len() as u64)) } else { None };
        for y in data {
            self.update(y, rng)?;
            if let Some(bar) = &bar {
                bar.inc(1);
            }
        }
        if let Some(bar) = bar {
            bar.finish();
        }
        Ok(())
    }

    /// One weight-normalized mean state per step processed so far, averaged
    /// over both the outer parameter ensemble and each outer particle's own
    /// inner filter weights.
    fn filtermeans(&self) -> Vec<DVector<f64>>;

    /// One weight-normalized mean noise realization per step processed so
    /// far, in the same sense as [`Algorithm::filtermeans`].
    fn noisemeans(&self) -> Vec<DVector<f64>>;

    /// Forward-simulates `steps` timesteps from the current weighted
    /// posterior without recording history or mutating any filter state.
    fn predict(&self, steps: usize, rng: &mut dyn RngCore) -> Vec<DVector<f64>>;

    fn outer_particle_count(&self) -> usize;
}
