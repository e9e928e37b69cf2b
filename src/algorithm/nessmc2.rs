use super::{combined_filtermeans, combined_noisemeans, new_rng, weighted_parameter_means, Algorithm, OuterParticle};
use crate::distributions::multivariate::{mvn_log_pdf, mvn_sample};
use crate::error::{FilterError, Result};
use crate::filter::InnerFilter;
use crate::process::StateSpaceModel;
use crate::resampling::{resample_indices, ResamplingScheme};
use crate::utils::{ess, normalize};
use log::{debug, info, trace};
use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand::RngCore;
use rand_distr::StandardNormal;
use rayon::prelude::*;
use std::sync::Arc;

/// Which half of the hybrid schedule the filter is currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// SMC²-like: reweight by incremental likelihood, rejuvenate with a
    /// PMMH move against the full observation buffer once ESS collapses.
    Smc2Like,
    /// NESS-like: jitter every step, resample without any MCMC move.
    NessLike,
}

/// The NESSMC² hybrid (Miguez & Crisan's handshake schedule): runs an
/// SMC²-style ensemble while the observation count is below
/// `handshake * expected_length`, then performs a one-time conversion
/// (an outer resample with no parameter change) and continues as a NESS
/// ensemble for the remainder of the series.
///
/// Grounded on `original_source/pyfilter/filters/nessmc2.py`. The
/// originating implementation's `_ior`/`_recw` bookkeeping (used there to
/// decide exactly when to hand off) is resolved here as a simple step
/// counter against a caller-supplied expected series length — see
/// DESIGN.md.
pub struct NESSMC2 {
    particles: Vec<OuterParticle>,
    model_template: StateSpaceModel,
    filter_factory: Arc<dyn Fn() -> Box<dyn InnerFilter> + Send + Sync>,
    m: usize,
    threshold: f64,
    acceptance_floor: f64,
    handshake: f64,
    expected_length: usize,
    buffer: Vec<DVector<f64>>,
    steps_seen: usize,
    phase: Phase,
    p: f64,
}

impl NESSMC2 {
    /// `p` (NESS-phase jitter exponent) defaults to 4, matching
    /// `ness.py`'s constructor default; use
    /// [`NESSMC2::with_jitter_exponent`] to override it.
    pub fn new(
        m: usize,
        threshold: f64,
        handshake: f64,
        expected_length: usize,
        model_template: StateSpaceModel,
        filter_factory: Arc<dyn Fn() -> Box<dyn InnerFilter> + Send + Sync>,
    ) -> Result<NESSMC2> {
        Self::with_jitter_exponent(m, threshold, handshake, expected_length, 4.0, model_template, filter_factory)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_jitter_exponent(
        m: usize,
        threshold: f64,
        handshake: f64,
        expected_length: usize,
        p: f64,
        model_template: StateSpaceModel,
        filter_factory: Arc<dyn Fn() -> Box<dyn InnerFilter> + Send + Sync>,
    ) -> Result<NESSMC2> {
        if m == 0 {
            return Err(FilterError::ShapeMismatch { context: "outer particle count must be positive".into() });
        }
        if !(0.0..=1.0).contains(&threshold) {
            return Err(FilterError::ShapeMismatch {
                context: format!("threshold must be in [0, 1], got {threshold}"),
            });
        }
        if !(0.0..=1.0).contains(&handshake) {
            return Err(FilterError::ShapeMismatch {
                context: format!("handshake must be in [0, 1], got {handshake}"),
            });
        }
        if !(p > 0.0) {
            return Err(FilterError::ShapeMismatch { context: format!("jitter exponent p must be positive, got {p}") });
        }
        Ok(NESSMC2 {
            particles: Vec::new(),
            model_template,
            filter_factory,
            m,
            threshold,
            acceptance_floor: 0.2,
            handshake,
            expected_length: expected_length.max(1),
            buffer: Vec::new(),
            steps_seen: 0,
            phase: Phase::Smc2Like,
            p,
        })
    }

    pub fn phase_is_ness(&self) -> bool {
        self.phase == Phase::NessLike
    }

    /// Weighted posterior mean of every trainable parameter, natural scale,
    /// in `StateSpaceModel::p_map` order.
    pub fn parameter_means(&self) -> Vec<f64> {
        weighted_parameter_means(&self.particles)
    }

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
        debug!("NESSMC2 (SMC2 phase) rejuvenation acceptance rate {acceptance_rate:.3}");

        let mut new_particles: Vec<OuterParticle> = outcomes.into_iter().map(|(p, _)| p).collect();
        for p in &mut new_particles {
            p.log_weight = 0.0;
        }
        if acceptance_rate < self.acceptance_floor {
            for p in &mut new_particles {
                p.inner.increase_states(2.0, &mut p.rng);
            }
        }
        self.particles = new_particles;
        Ok(())
    }

    fn jitter(&mut self) {
        if self.model_template.trainable_count() == 0 || self.particles.is_empty() {
            return;
        }
        let p = self.p;
        let scale = (self.m as f64).powf(-((p + 2.0) / p)).sqrt();
        for particle in &mut self.particles {
            let vals: Vec<f64> = particle.model.p_map(|pp| pp.unconstrained_value());
            let jittered: Vec<f64> =
                vals.iter().map(|v| v + scale * particle.rng.sample::<f64, _>(StandardNormal)).collect();
            let mut idx = 0;
            particle.model.p_apply(|pp| {
                pp.set_unconstrained_value(jittered[idx]);
                idx += 1;
            });
        }
    }

    /// One-time conversion at the handshake point: resample the ensemble
    /// by current outer weight and drop the observation buffer, since the
    /// NESS phase never replays history for an MCMC move.
    fn switch_to_ness(&mut self, rng: &mut dyn RngCore) {
        let log_w: Vec<f64> = self.particles.iter().map(|p| p.log_weight).collect();
        let idx = resample_indices(&log_w, self.m, ResamplingScheme::Systematic, rng);
        let mut new_particles: Vec<OuterParticle> = idx.iter().map(|&i| self.particles[i].forked(rng)).collect();
        for p in &mut new_particles {
            p.log_weight = 0.0;
        }
        self.particles = new_particles;
        self.buffer.clear();
        self.phase = Phase::NessLike;
        info!("NESSMC2 handshake reached at step {}, switching to NESS phase", self.steps_seen);
    }
}

impl Algorithm for NESSMC2 {
    fn initialize(&mut self, rng: &mut dyn RngCore) -> Result<()> {
        self.buffer.clear();
        self.steps_seen = 0;
        self.phase = Phase::Smc2Like;
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
        if self.phase == Phase::NessLike {
            self.jitter();
        } else {
            self.buffer.push(y.clone());
        }

        self.particles.par_iter_mut().try_for_each(|p| -> Result<()> {
            let ll = p.inner.filter(y, &p.model, &mut p.rng)?;
            p.log_weight += ll;
            Ok(())
        })?;

        self.steps_seen += 1;

        let log_w: Vec<f64> = self.particles.iter().map(|p| p.log_weight).collect();
        let ess_value = ess(&log_w);

        match self.phase {
            Phase::Smc2Like => {
                if ess_value < self.threshold * self.m as f64 {
                    trace!("NESSMC2 (SMC2 phase) rejuvenation triggered: ess {ess_value:.2}");
                    self.rejuvenate(rng)?;
                }
                if self.steps_seen as f64 >= self.handshake * self.expected_length as f64 {
                    self.switch_to_ness(rng);
                }
            }
            Phase::NessLike => {
                if ess_value < self.threshold * self.m as f64 {
                    trace!("NESSMC2 (NESS phase) outer resample: ess {ess_value:.2}");
                    let idx = resample_indices(&log_w, self.m, ResamplingScheme::Systematic, rng);
                    let mut new_particles: Vec<OuterParticle> =
                        idx.iter().map(|&i| self.particles[i].forked(rng)).collect();
                    for p in &mut new_particles {
                        p.log_weight = 0.0;
                    }
                    self.particles = new_particles;
                }
            }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::Distribution;
    use crate::filter::ParticleFilter;
    use crate::parameter::Parameter;
    use crate::proposal::Bootstrap;
    use crate::process::{BaseProcess, InitMeanFn, InitScaleFn, MeanFn, Observable, ScaleFn};
    use rand_pcg::Pcg64Mcg;

    fn trainable_ar1_template() -> StateSpaceModel {
        let prior = Distribution::uniform(0.1, 0.99).unwrap();
        let rho = Parameter::trainable("rho", prior, 0.5).unwrap();
        let f0: InitMeanFn = Arc::new(|_p| DVector::from_element(1, 0.0));
        let g0: InitScaleFn = Arc::new(|_p| DVector::from_element(1, 1.0));
        let f: MeanFn = Arc::new(|x, p: &[Parameter]| DVector::from_element(1, p[0].value() * x[0]));
        let g: ScaleFn = Arc::new(|_x, _p| DVector::from_element(1, 1.0));
        let hidden = BaseProcess::new(vec![rho], f0, g0, f, g).unwrap();
        let of: MeanFn = Arc::new(|x, _p| x.clone());
        let og: ScaleFn = Arc::new(|_x, _p| DVector::from_element(1, 0.5));
        let observable = Observable::new(vec![], of, og).unwrap();
        StateSpaceModel::new(hidden, observable)
    }

    fn filter_factory() -> Arc<dyn Fn() -> Box<dyn InnerFilter> + Send + Sync> {
        Arc::new(|| {
            Box::new(ParticleFilter::new(60, Arc::new(Bootstrap), ResamplingScheme::Systematic, 0.5).unwrap())
                as Box<dyn InnerFilter>
        })
    }

    #[test]
    fn switches_phase_once_the_handshake_point_is_passed() {
        let template = trainable_ar1_template();
        let mut rng = Pcg64Mcg::new(7);
        let (_, observations) = template.sample(20, &mut rng);

        let mut hybrid = NESSMC2::new(25, 0.7, 0.5, 20, template, filter_factory()).unwrap();
        hybrid.initialize(&mut rng).unwrap();
        assert!(!hybrid.phase_is_ness());
        for y in &observations {
            hybrid.update(y, &mut rng).unwrap();
        }
        assert!(hybrid.phase_is_ness());
        assert_eq!(hybrid.filtermeans().len(), observations.len());
    }

    #[test]
    fn invalid_handshake_is_rejected() {
        let template = trainable_ar1_template();
        assert!(NESSMC2::new(10, 0.5, 1.5, 10, template, filter_factory()).is_err());
    }

    #[test]
    fn predict_works_in_either_phase() {
        let template = trainable_ar1_template();
        let mut rng = Pcg64Mcg::new(202);
        let (_, observations) = template.sample(20, &mut rng);

        let mut hybrid = NESSMC2::new(25, 0.7, 0.5, 20, template, filter_factory()).unwrap();
        hybrid.initialize(&mut rng).unwrap();
        for y in &observations {
            hybrid.update(y, &mut rng).unwrap();
        }
        assert!(hybrid.phase_is_ness());
        let forecast = hybrid.predict(6, &mut rng);
        assert_eq!(forecast.len(), 6);
        assert_eq!(hybrid.noisemeans().len(), observations.len());
    }
}
