//! Shared scenario builders for the integration tests: the linear-Gaussian
//! SSM used throughout spec scenarios S2-S5, both with fixed parameters
//! (for filter-accuracy checks) and with one trainable parameter (for the
//! NESS/SMC²/NESSMC² consistency checks).

use nalgebra::DVector;
use pfilter::{BaseProcess, Distribution, Observable, Parameter, StateSpaceModel};
use std::sync::Arc;

/// `x_t = rho * x_{t-1} + sigma * eps_t`, `y_t = x_t + obs_sigma * eta_t`,
/// with every parameter fixed.
pub fn fixed_linear_gaussian_ssm(rho: f64, sigma: f64, obs_sigma: f64) -> StateSpaceModel {
    let f0 = Arc::new(|_p: &[Parameter]| DVector::from_element(1, 0.0));
    let g0 = Arc::new(|_p: &[Parameter]| DVector::from_element(1, 1.0));
    let f = Arc::new(|x: &DVector<f64>, p: &[Parameter]| DVector::from_element(1, p[0].value() * x[0]));
    let g = Arc::new(|_x: &DVector<f64>, p: &[Parameter]| DVector::from_element(1, p[1].value()));
    let hidden =
        BaseProcess::new(vec![Parameter::fixed("rho", rho), Parameter::fixed("sigma", sigma)], f0, g0, f, g)
            .unwrap();

    let of = Arc::new(|x: &DVector<f64>, _p: &[Parameter]| x.clone());
    let og = Arc::new(|_x: &DVector<f64>, p: &[Parameter]| DVector::from_element(1, p[0].value()));
    let observable = Observable::new(vec![Parameter::fixed("obs_sigma", obs_sigma)], of, og).unwrap();

    StateSpaceModel::new(hidden, observable)
}

/// The same model with `rho` trainable under a Beta(5, 1) prior rescaled
/// onto `(0, 1)` (matching S5's autoregressive-coefficient prior), used by
/// the SMC²/NESS/NESSMC² posterior-consistency scenarios.
pub fn trainable_rho_linear_gaussian_ssm(sigma: f64, obs_sigma: f64) -> StateSpaceModel {
    let prior = Distribution::beta(5.0, 1.0).unwrap();
    let rho = Parameter::trainable("rho", prior, 0.8).unwrap();

    let f0 = Arc::new(|_p: &[Parameter]| DVector::from_element(1, 0.0));
    let g0 = Arc::new(|_p: &[Parameter]| DVector::from_element(1, 1.0));
    let f = Arc::new(|x: &DVector<f64>, p: &[Parameter]| DVector::from_element(1, p[0].value() * x[0]));
    let g = Arc::new(move |_x: &DVector<f64>, _p: &[Parameter]| DVector::from_element(1, sigma));
    let hidden = BaseProcess::new(vec![rho], f0, g0, f, g).unwrap();

    let of = Arc::new(|x: &DVector<f64>, _p: &[Parameter]| x.clone());
    let og = Arc::new(move |_x: &DVector<f64>, _p: &[Parameter]| DVector::from_element(1, obs_sigma));
    let observable = Observable::new(vec![], of, og).unwrap();

    StateSpaceModel::new(hidden, observable)
}
