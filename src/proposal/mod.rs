//! Proposal strategies for the particle filter's propagate-and-weight step.
//!
//! Grounded on `original_source/pyfilter/proposals/`: `Bootstrap` propagates
//! from the hidden transition kernel unchanged; `Linearized` and
//! `LinearGaussianObservations` share the same affine-Gaussian update (the
//! latter with an exactly known observation matrix instead of a
//! finite-difference Jacobian); `Unscented`/`GlobalUnscented` live in
//! `unscented.rs`.

pub mod bootstrap;
pub mod linearized;
pub mod optimal;
pub mod unscented;

pub use bootstrap::Bootstrap;
pub use linearized::Linearized;
pub use optimal::LinearGaussianObservations;
pub use unscented::{GlobalUnscented, Unscented};

use crate::distributions::multivariate::{mvn_log_pdf, mvn_sample};
use crate::process::StateSpaceModel;
use nalgebra::{DMatrix, DVector};
use rand::RngCore;

/// Draws a new state and corrects the particle weight for having sampled
/// from something other than the hidden transition kernel.
pub trait Proposal: Send + Sync {
    fn draw(
        &self,
        y: &DVector<f64>,
        x_old: &DVector<f64>,
        model: &StateSpaceModel,
        rng: &mut dyn RngCore,
    ) -> DVector<f64>;

    fn log_weight(
        &self,
        y: &DVector<f64>,
        x_new: &DVector<f64>,
        x_old: &DVector<f64>,
        model: &StateSpaceModel,
    ) -> f64;
}

/// Posterior mean/covariance of `x` under a Gaussian prior `N(loc, h_var)`
/// and a single affine-Gaussian observation `y ~ N(c x + (y_hat - c loc), o_var)`
/// — i.e. the ordinary Kalman update, shared by [`Linearized`] (where `c` is
/// a finite-difference Jacobian) and [`LinearGaussianObservations`] (where
/// `c` is supplied exactly).
pub(crate) fn affine_gaussian_posterior(
    loc: &DVector<f64>,
    h_var: &DMatrix<f64>,
    c: &DMatrix<f64>,
    o_var: &DMatrix<f64>,
    y: &DVector<f64>,
    y_hat: &DVector<f64>,
) -> (DVector<f64>, DMatrix<f64>) {
    let h_var_inv = h_var.clone().try_inverse().expect("diagonal variance is invertible");
    let o_var_inv = o_var.clone().try_inverse().expect("diagonal variance is invertible");
    let precision = &h_var_inv + c.transpose() * &o_var_inv * c;
    let cov = precision.try_inverse().expect("posterior precision is invertible");
    let innovation = y - y_hat;
    let mean = loc + &cov * c.transpose() * &o_var_inv * &innovation;
    (mean, cov)
}

/// `log p(y)` under the same affine-Gaussian model, marginalizing `x` out:
/// `y ~ N(y_hat, c h_var c^T + o_var)`.
pub(crate) fn affine_marginal_log_weight(
    h_var: &DMatrix<f64>,
    c: &DMatrix<f64>,
    o_var: &DMatrix<f64>,
    y: &DVector<f64>,
    y_hat: &DVector<f64>,
) -> f64 {
    let innovation_cov = c * h_var * c.transpose() + o_var;
    let innovation = y - y_hat;
    mvn_log_pdf(&innovation, &innovation_cov)
}

pub(crate) fn sample_posterior(
    mean: &DVector<f64>,
    cov: &DMatrix<f64>,
    rng: &mut dyn RngCore,
) -> DVector<f64> {
    mvn_sample(mean, cov, rng)
}
