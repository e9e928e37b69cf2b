use super::InnerFilter;
use crate::error::{FilterError, Result};
use crate::process::StateSpaceModel;
use crate::proposal::Proposal;
use crate::resampling::{resample_indices, ResamplingScheme};
use crate::utils::{all_degenerate, ess, logsumexp, normalize, weighted_mean};
use log::{debug, trace};
use nalgebra::DVector;
use rand::RngCore;
use std::sync::Arc;

/// A sequential importance sampling / resampling (SISR) particle filter,
/// generalized over any [`Proposal`] — bootstrap recovers the plain SISR
/// filter, any of the other proposals recovers an auxiliary particle
/// filter in the sense of using extra information about `y_t` when
/// proposing `x_t`.
///
/// Grounded on `examples/BazzaCipher-robotics-rs/src/localization/particle_filter.rs`'s
/// `GeneralParticleFilter::update_estimate`: propagate, weight by the
/// observation density, and resample once ESS drops below a threshold.
pub struct ParticleFilter {
    n: usize,
    proposal: Arc<dyn Proposal>,
    resampling_scheme: ResamplingScheme,
    /// Resample when `ESS < ess_threshold * n`.
    ess_threshold: f64,
    particles: Vec<DVector<f64>>,
    log_weights: Vec<f64>,
    filter_means: Vec<DVector<f64>>,
    noise_means: Vec<DVector<f64>>,
    log_likelihoods: Vec<f64>,
}

impl ParticleFilter {
    pub fn new(
        n: usize,
        proposal: Arc<dyn Proposal>,
        resampling_scheme: ResamplingScheme,
        ess_threshold: f64,
    ) -> Result<ParticleFilter> {
        if n == 0 {
            return Err(FilterError::ShapeMismatch { context: "particle count must be positive".into() });
        }
        if !(0.0..=1.0).contains(&ess_threshold) {
            return Err(FilterError::ShapeMismatch {
                context: format!("ess_threshold must be in [0, 1], got {ess_threshold}"),
            });
        }
        Ok(ParticleFilter {
            n,
            proposal,
            resampling_scheme,
            ess_threshold,
            particles: Vec::new(),
            log_weights: Vec::new(),
            filter_means: Vec::new(),
            noise_means: Vec::new(),
            log_likelihoods: Vec::new(),
        })
    }

    pub fn particle_count(&self) -> usize {
        self.n
    }

    pub fn particles(&self) -> &[DVector<f64>] {
        &self.particles
    }

    pub fn log_weights(&self) -> &[f64] {
        &self.log_weights
    }

    /// Doubles (or otherwise resizes to `new_n`) the number of state
    /// particles by resampling the current ensemble, matching SMC²'s
    /// `_increase_states` response to a low PMMH acceptance rate. Per the
    /// originating implementation, the corrected weight is not
    /// recomputed — only the state-particle count changes.
    pub fn resize_states(&mut self, new_n: usize, rng: &mut dyn RngCore) {
        if self.particles.is_empty() {
            self.n = new_n;
            return;
        }
        let idx = resample_indices(&self.log_weights, new_n, self.resampling_scheme, rng);
        self.particles = idx.iter().map(|&i| self.particles[i].clone()).collect();
        self.log_weights = vec![0.0; new_n];
        self.n = new_n;
        debug!("increased particle count to {new_n}");
    }
}

impl InnerFilter for ParticleFilter {
    fn initialize(&mut self, model: &StateSpaceModel, rng: &mut dyn RngCore) {
        self.particles = (0..self.n).map(|_| model.hidden.i_sample(rng)).collect();
        self.log_weights = vec![0.0; self.n];
        self.filter_means.clear();
        self.noise_means.clear();
        self.log_likelihoods.clear();
    }

    fn filter(&mut self, y: &DVector<f64>, model: &StateSpaceModel, rng: &mut dyn RngCore) -> Result<f64> {
        if self.particles.is_empty() {
            return Err(FilterError::UninitializedAccess { what: "ParticleFilter::filter".into() });
        }

        let (incremental_log_weights, noise_vectors): (Vec<f64>, Vec<DVector<f64>>) =
            if self.log_likelihoods.is_empty() {
                let i_mean = model.hidden.i_mean();
                let i_scale = model.hidden.i_scale();
                let incremental = self.particles.iter().map(|x0| model.observable.weight(y, x0)).collect();
                let noise = self.particles.iter().map(|x0| (x0 - &i_mean).component_div(&i_scale)).collect();
                (incremental, noise)
            } else {
                let old_particles = std::mem::take(&mut self.particles);
                let new_particles: Vec<DVector<f64>> = old_particles
                    .iter()
                    .map(|x_old| self.proposal.draw(y, x_old, model, rng))
                    .collect();
                let incremental: Vec<f64> = old_particles
                    .iter()
                    .zip(new_particles.iter())
                    .map(|(x_old, x_new)| self.proposal.log_weight(y, x_new, x_old, model))
                    .collect();
                let noise: Vec<DVector<f64>> = old_particles
                    .iter()
                    .zip(new_particles.iter())
                    .map(|(x_old, x_new)| {
                        (x_new - model.hidden.mean(x_old)).component_div(&model.hidden.scale(x_old))
                    })
                    .collect();
                self.particles = new_particles;
                (incremental, noise)
            };

        let combined: Vec<f64> =
            self.log_weights.iter().zip(incremental_log_weights.iter()).map(|(a, b)| a + b).collect();

        if all_degenerate(&combined) {
            return Err(FilterError::DegenerateWeights { step: self.log_likelihoods.len() });
        }

        let step_log_likelihood = logsumexp(&combined) - logsumexp(&self.log_weights);
        self.log_likelihoods.push(step_log_likelihood);
        self.log_weights = combined;

        let normalized = normalize(&self.log_weights);
        self.filter_means.push(weighted_mean(&self.particles, &normalized));
        self.noise_means.push(weighted_mean(&noise_vectors, &normalized));

        let ess_value = ess(&self.log_weights);
        if ess_value < self.ess_threshold * self.n as f64 {
            trace!("resampling: ess {ess_value:.2} below threshold");
            let idx = resample_indices(&self.log_weights, self.n, self.resampling_scheme, rng);
            self.particles = idx.iter().map(|&i| self.particles[i].clone()).collect();
            self.log_weights = vec![0.0; self.n];
        }

        Ok(step_log_likelihood)
    }

    fn filter_means(&self) -> &[DVector<f64>] {
        &self.filter_means
    }

    fn noise_means(&self) -> &[DVector<f64>] {
        &self.noise_means
    }

    fn log_likelihoods(&self) -> &[f64] {
        &self.log_likelihoods
    }

    fn reset(&mut self) {
        self.particles.clear();
        self.log_weights.clear();
        self.filter_means.clear();
        self.noise_means.clear();
        self.log_likelihoods.clear();
    }

    fn box_clone(&self) -> Box<dyn InnerFilter> {
        Box::new(ParticleFilter {
            n: self.n,
            proposal: Arc::clone(&self.proposal),
            resampling_scheme: self.resampling_scheme,
            ess_threshold: self.ess_threshold,
            particles: self.particles.clone(),
            log_weights: self.log_weights.clone(),
            filter_means: self.filter_means.clone(),
            noise_means: self.noise_means.clone(),
            log_likelihoods: self.log_likelihoods.clone(),
        })
    }

    fn increase_states(&mut self, factor: f64, rng: &mut dyn RngCore) {
        let new_n = ((self.n as f64) * factor).round().max(1.0) as usize;
        self.resize_states(new_n, rng);
    }

    /// An ancestor is drawn once, then the hidden transition kernel is
    /// applied repeatedly.
    fn predict(&self, steps: usize, model: &StateSpaceModel, rng: &mut dyn RngCore) -> Vec<DVector<f64>> {
        let ancestor = resample_indices(&self.log_weights, 1, self.resampling_scheme, rng)[0];
        let mut x = self.particles[ancestor].clone();
        let mut out = Vec::with_capacity(steps);
        for _ in 0..steps {
            x = model.hidden.propagate(&x, rng);
            out.push(x.clone());
        }
        out
    }
}
