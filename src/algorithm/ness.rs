use super::{combined_filtermeans, combined_noisemeans, new_rng, weighted_parameter_means, Algorithm, OuterParticle};
use crate::error::{FilterError, Result};
use crate::filter::InnerFilter;
use crate::process::StateSpaceModel;
use crate::resampling::{resample_indices, ResamplingScheme};
use crate::utils::{ess, normalize};
use log::{debug, trace};
use nalgebra::DVector;
use rand::Rng;
use rand::RngCore;
use rand_distr::StandardNormal;
use rayon::prelude::*;
use std::sync::Arc;

/// Selects how trainable parameters are perturbed ("jittered") between
/// observations to counteract the parameter ensemble's gradual
/// degeneracy.
///
/// Grounded on `original_source/pyfilter/algorithms/ness.py`'s
/// `cont_jitter`/`disc_jitter`.
#[derive(Debug, Clone, Copy)]
pub enum JitterKernel {
    /// `u' = u + scale * Z`, `scale = M^{-(p+2)/(2p)}`.
    Continuous,
    /// Liu & West shrinkage kernel, with an occasional full jump.
    Discrete { shrinkage: f64 },
}

/// Nested effective-sample-size parameter filter (Miguez & Crisan): jitters
/// the whole ensemble every step and resamples only when the outer ESS
/// drops below `threshold * m`.
pub struct NESS {
    particles: Vec<OuterParticle>,
    model_template: StateSpaceModel,
    filter_factory: Arc<dyn Fn() -> Box<dyn InnerFilter> + Send + Sync>,
    m: usize,
    threshold: f64,
    kernel: JitterKernel,
    p: f64,
}

impl NESS {
    /// `p` controls the jittering kernel's variance (higher `p` ⇒ higher
    /// variance); defaults to 4, matching `ness.py`'s constructor default.
    /// Use [`NESS::new`] for that default or [`NESS::with_jitter_exponent`]
    /// to override it.
    pub fn new(
        m: usize,
        threshold: f64,
        kernel: JitterKernel,
        model_template: StateSpaceModel,
        filter_factory: Arc<dyn Fn() -> Box<dyn InnerFilter> + Send + Sync>,
    ) -> Result<NESS> {
        Self::with_jitter_exponent(m, threshold, kernel, 4.0, model_template, filter_factory)
    }

    pub fn with_jitter_exponent(
        m: usize,
        threshold: f64,
        kernel: JitterKernel,
        p: f64,
        model_template: StateSpaceModel,
        filter_factory: Arc<dyn Fn() -> Box<dyn InnerFilter> + Send + Sync>,
    ) -> Result<NESS> {
        if m == 0 {
            return Err(FilterError::ShapeMismatch { context: "outer particle count must be positive".into() });
        }
        if !(0.0..=1.0).contains(&threshold) {
            return Err(FilterError::ShapeMismatch {
                context: format!("threshold must be in [0, 1], got {threshold}"),
            });
        }
        if !(p > 0.0) {
            return Err(FilterError::ShapeMismatch { context: format!("jitter exponent p must be positive, got {p}") });
        }
        Ok(NESS { particles: Vec::new(), model_template, filter_factory, m, threshold, kernel, p })
    }

    pub fn outer_log_weights(&self) -> Vec<f64> {
        self.particles.iter().map(|p| p.log_weight).collect()
    }

    /// Weighted posterior mean of every trainable parameter, natural scale,
    /// in `StateSpaceModel::p_map` order.
    pub fn parameter_means(&self) -> Vec<f64> {
        weighted_parameter_means(&self.particles)
    }

    fn jitter(&mut self) {
        let dim = self.model_template.trainable_count();
        if dim == 0 || self.particles.is_empty() {
            return;
        }
        let p = self.p;

        match self.kernel {
            JitterKernel::Continuous => {
                let scale = (self.m as f64).powf(-((p + 2.0) / p)).sqrt();
                for particle in &mut self.particles {
                    let vals: Vec<f64> = particle.model.p_map(|pp| pp.unconstrained_value());
                    let jittered: Vec<f64> = vals
                        .iter()
                        .map(|v| v + scale * particle.rng.sample::<f64, _>(StandardNormal))
                        .collect();
                    let mut idx = 0;
                    particle.model.p_apply(|pp| {
                        pp.set_unconstrained_value(jittered[idx]);
                        idx += 1;
                    });
                }
            }
            JitterKernel::Discrete { shrinkage } => {
                let log_w: Vec<f64> = self.particles.iter().map(|pp| pp.log_weight).collect();
                let w = normalize(&log_w);
                let all_vals: Vec<Vec<f64>> =
                    self.particles.iter().map(|pp| pp.model.p_map(|x| x.unconstrained_value())).collect();

                let mut weighted_mean = vec![0.0; dim];
                for (vals, wi) in all_vals.iter().zip(w.iter()) {
                    for k in 0..dim {
                        weighted_mean[k] += wi * vals[k];
                    }
                }
                let mut weighted_msd = vec![0.0; dim];
                for (vals, wi) in all_vals.iter().zip(w.iter()) {
                    for k in 0..dim {
                        weighted_msd[k] += wi * (vals[k] - weighted_mean[k]).powi(2);
                    }
                }

                let a = (1.0 - shrinkage * shrinkage).sqrt();
                let jump_prob = (self.m as f64).powf(-p / 2.0);

                for (particle, vals) in self.particles.iter_mut().zip(all_vals.iter()) {
                    let mut new_vals = vec![0.0; dim];
                    for k in 0..dim {
                        let blended_mean = a * vals[k] + (1.0 - a) * weighted_mean[k];
                        let std = shrinkage * weighted_msd[k].sqrt();
                        let draw: f64 = particle.rng.gen();
                        new_vals[k] = if draw < jump_prob {
                            blended_mean + std * particle.rng.sample::<f64, _>(StandardNormal)
                        } else {
                            blended_mean
                        };
                    }
                    let mut idx = 0;
                    particle.model.p_apply(|pp| {
                        pp.set_unconstrained_value(new_vals[idx]);
                        idx += 1;
                    });
                }
            }
        }
    }
}

impl Algorithm for NESS {
    fn initialize(&mut self, rng: &mut dyn RngCore) -> Result<()> {
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
        self.jitter();

        self.particles.par_iter_mut().try_for_each(|p| -> Result<()> {
            let ll = p.inner.filter(y, &p.model, &mut p.rng)?;
            p.log_weight += ll;
            Ok(())
        })?;

        let log_w: Vec<f64> = self.particles.iter().map(|p| p.log_weight).collect();
        let ess_value = ess(&log_w);
        if ess_value < self.threshold * self.m as f64 {
            trace!("NESS outer resample: ess {ess_value:.2} below threshold of {}", self.threshold * self.m as f64);
            let idx = resample_indices(&log_w, self.m, ResamplingScheme::Systematic, rng);
            let mut new_particles: Vec<OuterParticle> = idx.iter().map(|&i| self.particles[i].forked(rng)).collect();
            for p in &mut new_particles {
                p.log_weight = 0.0;
            }
            self.particles = new_particles;
            debug!("NESS outer ensemble resampled");
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
            Box::new(
                ParticleFilter::new(100, Arc::new(Bootstrap), ResamplingScheme::Systematic, 0.5).unwrap(),
            ) as Box<dyn InnerFilter>
        })
    }

    #[test]
    fn running_ness_on_a_short_series_yields_one_mean_per_step() {
        let template = trainable_ar1_template();
        let mut rng = Pcg64Mcg::new(42);
        let (_, observations) = template.sample(10, &mut rng);

        let mut ness = NESS::new(30, 0.9, JitterKernel::Continuous, template, filter_factory()).unwrap();
        ness.initialize(&mut rng).unwrap();
        for y in &observations {
            ness.update(y, &mut rng).unwrap();
        }
        assert_eq!(ness.filtermeans().len(), observations.len());
        assert_eq!(ness.outer_particle_count(), 30);
    }

    #[test]
    fn discrete_kernel_also_runs_to_completion() {
        let template = trainable_ar1_template();
        let mut rng = Pcg64Mcg::new(43);
        let (_, observations) = template.sample(8, &mut rng);

        let mut ness =
            NESS::new(20, 0.9, JitterKernel::Discrete { shrinkage: 0.1 }, template, filter_factory()).unwrap();
        ness.initialize(&mut rng).unwrap();
        for y in &observations {
            ness.update(y, &mut rng).unwrap();
        }
        assert_eq!(ness.filtermeans().len(), observations.len());
    }

    #[test]
    fn zero_outer_particles_is_rejected() {
        let template = trainable_ar1_template();
        assert!(NESS::new(0, 0.9, JitterKernel::Continuous, template, filter_factory()).is_err());
    }

    #[test]
    fn non_positive_jitter_exponent_is_rejected() {
        let template = trainable_ar1_template();
        assert!(
            NESS::with_jitter_exponent(20, 0.9, JitterKernel::Continuous, 0.0, template, filter_factory()).is_err()
        );
    }

    #[test]
    fn predict_forward_simulates_without_mutating_filter_state() {
        let template = trainable_ar1_template();
        let mut rng = Pcg64Mcg::new(11);
        let (_, observations) = template.sample(10, &mut rng);

        let mut ness = NESS::new(30, 0.9, JitterKernel::Continuous, template, filter_factory()).unwrap();
        ness.initialize(&mut rng).unwrap();
        for y in &observations {
            ness.update(y, &mut rng).unwrap();
        }
        let means_before = ness.filtermeans();
        let forecast = ness.predict(5, &mut rng);
        assert_eq!(forecast.len(), 5);
        assert_eq!(ness.filtermeans(), means_before);
        assert_eq!(ness.noisemeans().len(), observations.len());
    }
}
