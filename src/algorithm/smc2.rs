use super::{combined_filtermeans, combined_noisemeans, new_rng, weighted_parameter_means, Algorithm, OuterParticle};
use crate::distributions::multivariate::{mvn_log_pdf, mvn_sample};
use crate::error::{FilterError, Result};
use crate::filter::InnerFilter;
use crate::process::StateSpaceModel;
use crate::resampling::{resample_indices, ResamplingScheme};
use crate::utils::{ess, normalize};
use log::{debug, trace, warn};
use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand::RngCore;
use rayon::prelude::*;
use std::sync::Arc;

/// SMC² (Chopin, Jacob & Papaspiliopoulos): an outer ensemble where each
/// parameter particle carries its own inner filter, reweighted purely by
/// incremental marginal likelihood (no per-step jitter) and periodically
/// rejuvenated with a PMMH move once the outer ESS collapses.
///
/// Grounded on `original_source/pyfilter/algorithms/smc2.py`.
pub struct SMC2 {
    particles: Vec<OuterParticle>,
    model_template: StateSpaceModel,
    filter_factory: Arc<dyn Fn() -> Box<dyn InnerFilter> + Send + Sync>,
    m: usize,
    threshold: f64,
    acceptance_floor: f64,
    buffer: Vec<DVector<f64>>,
}

impl SMC2 {
    pub fn new(
        m: usize,
        threshold: f64,
        model_template: StateSpaceModel,
        filter_factory: Arc<dyn Fn() -> Box<dyn InnerFilter> + Send + Sync>,
    ) -> Result<SMC2> {
        if m == 0 {
            return Err(FilterError::ShapeMismatch { context: "outer particle count must be positive".into() });
        }
        if !(0.0..=1.0).contains(&threshold) {
            return Err(FilterError::ShapeMismatch {
                context: format!("threshold must be in [0, 1], got {threshold}"),
            });
        }
        Ok(SMC2 {
            particles: Vec::new(),
            model_template,
            filter_factory,
            m,
            threshold,
            acceptance_floor: 0.2,
            buffer: Vec::new(),
        })
    }

    pub fn outer_log_weights(&self) -> Vec<f64> {
        self.particles.iter().map(|p| p.log_weight).collect()
    }

    /// Weighted posterior mean of every trainable parameter, natural scale,
    /// in `StateSpaceModel::p_map` order.
    pub fn parameter_means(&self) -> Vec<f64> {
        weighted_parameter_means(&self.particles)
    }

    /// Weighted mean and covariance of the ensemble's unconstrained
    /// parameter vectors, used to build the PMMH independence proposal.
    fn proposal_moments(&self) -> (DVector<f64>, DMatrix<f64>) {
        let p = self.model_template.trainable_count();
        let log_w: Vec<f64> = self.particles.iter().map(|pp| pp.log_weight).collect();
        let w = normalize(&log_w);
        let all_vals: Vec<DVector<f64>> = self
            .particles
            .iter()
            .map(|pp| DVector::from_vec(pp.model.p_map(|x| x.unconstrained_value())))
            .collect();

        let mut mean = DVector::zeros(p);
        for (v, wi) in all_vals.iter().zip(w.iter()) {
            mean += v * *wi;
        }
        let mut cov = DMatrix::zeros(p, p);
        for (v, wi) in all_vals.iter().zip(w.iter()) {
            let d = v - &mean;
            cov += *wi * (&d * d.transpose());
        }
        // Ridge so near-degenerate ensembles still yield an invertible
        // proposal covariance.
        for i in 0..p {
            cov[(i, i)] += 1e-8;
        }
        (mean, cov)
    }

    fn rejuvenate(&mut self, rng: &mut dyn RngCore) -> Result<()> {
        let (mean, cov) = self.proposal_moments();
        let log_w: Vec<f64> = self.particles.iter().map(|pp| pp.log_weight).collect();
        let ancestor_idx = resample_indices(&log_w, self.m, ResamplingScheme::Systematic, rng);

        let ancestors: Vec<OuterParticle> =
            ancestor_idx.iter().map(|&i| self.particles[i].forked(rng)).collect();

        let filter_factory = Arc::clone(&self.filter_factory);
        let buffer = self.buffer.clone();

        let outcomes: Vec<(OuterParticle, bool)> = ancestors
            .into_iter()
            .map(|mut ancestor| {
                let old_vals = DVector::from_vec(ancestor.model.p_map(|x| x.unconstrained_value()));
                let old_log_prior = ancestor.model.log_prior();
                let old_log_lik = ancestor.inner.total_log_likelihood();

                let new_vals = mvn_sample(&mean, &cov, &mut ancestor.rng);
                let mut candidate_model = ancestor.model.clone();
                let mut idx = 0;
                candidate_model.p_apply(|pp| {
                    pp.set_unconstrained_value(new_vals[idx]);
                    idx += 1;
                });

                let mut candidate_inner = filter_factory();
                candidate_inner.initialize(&candidate_model, &mut ancestor.rng);
                let mut filter_ok = true;
                for y in &buffer {
                    if candidate_inner.filter(y, &candidate_model, &mut ancestor.rng).is_err() {
                        filter_ok = false;
                        break;
                    }
                }

                if !filter_ok {
                    return (ancestor, false);
                }

                let new_log_prior = candidate_model.log_prior();
                let new_log_lik = candidate_inner.total_log_likelihood();
                let kernel_correction = mvn_log_pdf(&(&old_vals - &mean), &cov) - mvn_log_pdf(&(&new_vals - &mean), &cov);
                let log_accept_ratio =
                    (new_log_lik - old_log_lik) + (new_log_prior - old_log_prior) + kernel_correction;

                let u: f64 = ancestor.rng.gen::<f64>().max(f64::MIN_POSITIVE).ln();
                if u < log_accept_ratio {
                    (
                        OuterParticle {
                            model: candidate_model,
                            inner: candidate_inner,
                            rng: ancestor.rng,
                            log_weight: 0.0,
                        },
                        true,
                    )
                } else {
                    (ancestor, false)
                }
            })
            .collect();

        let accepted = outcomes.iter().filter(|(_, acc)| *acc).count();
        let acceptance_rate = accepted as f64 / self.m as f64;
        debug!("SMC2 rejuvenation acceptance rate {acceptance_rate:.3}");

        let mut new_particles: Vec<OuterParticle> = outcomes.into_iter().map(|(p, _)| p).collect();
        for p in &mut new_particles {
            p.log_weight = 0.0;
        }

        if acceptance_rate < self.acceptance_floor {
            warn!("SMC2 acceptance rate {acceptance_rate:.3} below floor, doubling state-particle count");
            for p in &mut new_particles {
                p.inner.increase_states(2.0, &mut p.rng);
            }
        }

        self.particles = new_particles;
        Ok(())
    }
}

impl Algorithm for SMC2 {
    fn initialize(&mut self, rng: &mut dyn RngCore) -> Result<()> {
        self.buffer.clear();
        self.particles = (0..self.m)
            .map(|_| {
                let mut particle_rng = new_rng(rng);
                let mut model = self.model_template.clone();
                model.p_apply(|p| p.initialize(&mut particle_rng));
                let mut inner = (self.filter_factory)();
                inner.initialize(&model, &mut particle_rng);
                OuterParticle { model, inner, rng: particle_rng, log_weight: 0.0 }
            })
            .collect();
        Ok(())
    }

    fn update(&mut self, y: &DVector<f64>, rng: &mut dyn RngCore) -> Result<()> {
        self.buffer.push(y.clone());

        self.particles.par_iter_mut().try_for_each(|p| -> Result<()> {
            let ll = p.inner.filter(y, &p.model, &mut p.rng)?;
            p.log_weight += ll;
            Ok(())
        })?;

        let log_w: Vec<f64> = self.particles.iter().map(|p| p.log_weight).collect();
        let ess_value = ess(&log_w);
        if ess_value < self.threshold * self.m as f64 {
            trace!("SMC2 rejuvenation triggered: ess {ess_value:.2}");
            self.rejuvenate(rng)?;
        }
        Ok(())
    }

    fn filtermeans(&self) -> Vec<DVector<f64>> {
        combined_filtermeans(&self.particles)
    }

    fn noisemeans(&self) -> Vec<DVector<f64>> {
        combined_noisemeans(&self.particles)
    }

    fn predict(&self, steps: usize, rng: &mut dyn RngCore) -> Vec<DVector<f64>> {
        super::combined_predict(&self.particles, steps, rng)
    }

    fn outer_particle_count(&self) -> usize {
        self.m
    }
}
