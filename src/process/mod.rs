//! Hidden Markov process and observation process abstractions, and the
//! `StateSpaceModel` pair that joins them.
//!
//! Grounded on `original_source/pyfilter/timeseries/base.py`'s `BaseModel`/
//! `Observable` split: an initial mean/scale pair plus a transition
//! mean/scale pair, both as functions of the previous state and the
//! process's own parameters. Mean/scale functions are `Arc<dyn Fn>` rather
//! than raw function pointers so that derived constructors (Euler–Maruyama)
//! can close over caller-supplied drift/diffusion closures and still keep
//! `BaseProcess` cheaply `Clone`-able — required since every outer particle
//! in the nested-SMC layer owns its own model clone.

use crate::error::{FilterError, Result};
use crate::parameter::Parameter;
use crate::utils::standard_normal_log_pdf;
use nalgebra::DVector;
use rand::Rng;
use rand::RngCore;
use rand_distr::StandardNormal;
use std::sync::Arc;

pub type MeanFn = Arc<dyn Fn(&DVector<f64>, &[Parameter]) -> DVector<f64> + Send + Sync>;
pub type ScaleFn = Arc<dyn Fn(&DVector<f64>, &[Parameter]) -> DVector<f64> + Send + Sync>;
pub type InitMeanFn = Arc<dyn Fn(&[Parameter]) -> DVector<f64> + Send + Sync>;
pub type InitScaleFn = Arc<dyn Fn(&[Parameter]) -> DVector<f64> + Send + Sync>;

fn standard_normal_vector(dim: usize, rng: &mut dyn RngCore) -> DVector<f64> {
    DVector::from_iterator(dim, (0..dim).map(|_| rng.sample::<f64, _>(StandardNormal)))
}

/// `log p(y | mean, scale)` for independent per-dimension Gaussian noise,
/// the shared weighting rule used by both [`BaseProcess`] and
/// [`Observable`].
fn gaussian_log_weight(y: &DVector<f64>, mean: &DVector<f64>, scale: &DVector<f64>) -> f64 {
    let mut total = 0.0;
    for i in 0..y.len() {
        let z = (y[i] - mean[i]) / scale[i];
        total += standard_normal_log_pdf(z) - scale[i].ln();
    }
    total
}

/// A hidden Markov process: an initial distribution plus a transition
/// kernel, both Gaussian with state-and-parameter-dependent mean/scale.
#[derive(Clone)]
pub struct BaseProcess {
    parameters: Vec<Parameter>,
    f0: InitMeanFn,
    g0: InitScaleFn,
    f: MeanFn,
    g: ScaleFn,
}

impl BaseProcess {
    pub fn new(
        parameters: Vec<Parameter>,
        f0: InitMeanFn,
        g0: InitScaleFn,
        f: MeanFn,
        g: ScaleFn,
    ) -> Result<BaseProcess> {
        Ok(BaseProcess { parameters, f0, g0, f, g })
    }

    /// Discretizes a drift/diffusion pair by a single Euler–Maruyama step of
    /// size `dt`: `x_{t+1} = x_t + drift(x_t) dt + diffusion(x_t) sqrt(dt) Z`.
    pub fn euler_maruyama(
        parameters: Vec<Parameter>,
        f0: InitMeanFn,
        g0: InitScaleFn,
        drift: MeanFn,
        diffusion: ScaleFn,
        dt: f64,
    ) -> Result<BaseProcess> {
        if !(dt > 0.0) {
            return Err(FilterError::ShapeMismatch {
                context: format!("Euler-Maruyama step dt must be positive, got {dt}"),
            });
        }
        let sqrt_dt = dt.sqrt();
        let f: MeanFn = Arc::new(move |x, p| x + drift(x, p) * dt);
        let g: ScaleFn = Arc::new(move |x, p| diffusion(x, p) * sqrt_dt);
        BaseProcess::new(parameters, f0, g0, f, g)
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn parameters_mut(&mut self) -> &mut [Parameter] {
        &mut self.parameters
    }

    pub fn dim(&self) -> usize {
        self.i_mean().len()
    }

    pub fn i_mean(&self) -> DVector<f64> {
        (self.f0)(&self.parameters)
    }

    pub fn i_scale(&self) -> DVector<f64> {
        (self.g0)(&self.parameters)
    }

    pub fn mean(&self, x: &DVector<f64>) -> DVector<f64> {
        (self.f)(x, &self.parameters)
    }

    pub fn scale(&self, x: &DVector<f64>) -> DVector<f64> {
        (self.g)(x, &self.parameters)
    }

    /// `log p(x0)` under the initial distribution.
    pub fn i_weight(&self, x0: &DVector<f64>) -> f64 {
        gaussian_log_weight(x0, &self.i_mean(), &self.i_scale())
    }

    /// `log p(x_{t+1} | x_t)`.
    pub fn weight(&self, x_new: &DVector<f64>, x_old: &DVector<f64>) -> f64 {
        gaussian_log_weight(x_new, &self.mean(x_old), &self.scale(x_old))
    }

    pub fn i_sample(&self, rng: &mut dyn RngCore) -> DVector<f64> {
        let mean = self.i_mean();
        let scale = self.i_scale();
        mean + standard_normal_vector(scale.len(), rng).component_mul(&scale)
    }

    pub fn propagate(&self, x: &DVector<f64>, rng: &mut dyn RngCore) -> DVector<f64> {
        let mean = self.mean(x);
        let scale = self.scale(x);
        mean + standard_normal_vector(scale.len(), rng).component_mul(&scale)
    }
}

/// An observation process: a `BaseProcess` without its own initial
/// distribution, conditioned on the hidden state instead of its own past.
#[derive(Clone)]
pub struct Observable {
    parameters: Vec<Parameter>,
    f: MeanFn,
    g: ScaleFn,
}

impl Observable {
    pub fn new(parameters: Vec<Parameter>, f: MeanFn, g: ScaleFn) -> Result<Observable> {
        Ok(Observable { parameters, f, g })
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn parameters_mut(&mut self) -> &mut [Parameter] {
        &mut self.parameters
    }

    pub fn mean(&self, x: &DVector<f64>) -> DVector<f64> {
        (self.f)(x, &self.parameters)
    }

    pub fn scale(&self, x: &DVector<f64>) -> DVector<f64> {
        (self.g)(x, &self.parameters)
    }

    /// `log p(y | x)`.
    pub fn weight(&self, y: &DVector<f64>, x: &DVector<f64>) -> f64 {
        gaussian_log_weight(y, &self.mean(x), &self.scale(x))
    }

    pub fn sample_given(&self, x: &DVector<f64>, rng: &mut dyn RngCore) -> DVector<f64> {
        let mean = self.mean(x);
        let scale = self.scale(x);
        mean + standard_normal_vector(scale.len(), rng).component_mul(&scale)
    }
}

/// A hidden process paired with its observation process.
#[derive(Clone)]
pub struct StateSpaceModel {
    pub hidden: BaseProcess,
    pub observable: Observable,
}

impl StateSpaceModel {
    pub fn new(hidden: BaseProcess, observable: Observable) -> StateSpaceModel {
        StateSpaceModel { hidden, observable }
    }

    /// Simulates `steps` timesteps forward, returning `(states, observations)`.
    pub fn sample(
        &self,
        steps: usize,
        rng: &mut dyn RngCore,
    ) -> (Vec<DVector<f64>>, Vec<DVector<f64>>) {
        let mut states = Vec::with_capacity(steps);
        let mut observations = Vec::with_capacity(steps);
        let mut x = self.hidden.i_sample(rng);
        for t in 0..steps {
            if t > 0 {
                x = self.hidden.propagate(&x, rng);
            }
            let y = self.observable.sample_given(&x, rng);
            states.push(x.clone());
            observations.push(y);
        }
        (states, observations)
    }

    /// Sum of `log p(theta)` over every trainable parameter in both
    /// processes.
    pub fn log_prior(&self) -> f64 {
        self.hidden.parameters().iter().map(Parameter::log_prior).sum::<f64>()
            + self.observable.parameters().iter().map(Parameter::log_prior).sum::<f64>()
    }

    /// Applies `f` to every trainable parameter across both processes, in
    /// place. Used by the jitter kernels and PMMH rejuvenation moves, which
    /// operate uniformly over "all trainable parameters" without caring
    /// whether a parameter belongs to the hidden process or the observable.
    pub fn p_apply(&mut self, mut f: impl FnMut(&mut Parameter)) {
        for p in self.hidden.parameters_mut().iter_mut().filter(|p| p.is_trainable()) {
            f(p);
        }
        for p in self.observable.parameters_mut().iter_mut().filter(|p| p.is_trainable()) {
            f(p);
        }
    }

    /// Maps `f` over every trainable parameter across both processes,
    /// collecting the results in hidden-then-observable order.
    pub fn p_map<T>(&self, mut f: impl FnMut(&Parameter) -> T) -> Vec<T> {
        let mut out: Vec<T> = self
            .hidden
            .parameters()
            .iter()
            .filter(|p| p.is_trainable())
            .map(|p| f(p))
            .collect();
        out.extend(
            self.observable
                .parameters()
                .iter()
                .filter(|p| p.is_trainable())
                .map(|p| f(p)),
        );
        out
    }

    pub fn trainable_count(&self) -> usize {
        self.hidden.parameters().iter().filter(|p| p.is_trainable()).count()
            + self.observable.parameters().iter().filter(|p| p.is_trainable()).count()
    }
}
