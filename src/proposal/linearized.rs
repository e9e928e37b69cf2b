use super::{affine_gaussian_posterior, sample_posterior, Proposal};
use crate::process::StateSpaceModel;
use crate::utils::numerical_jacobian;
use nalgebra::{DMatrix, DVector};
use rand::RngCore;

/// First-order (EKF-style) linearization of the observation mean around the
/// hidden transition's predicted mean, used as a Gaussian importance
/// proposal for the next state.
#[derive(Debug, Clone, Copy, Default)]
pub struct Linearized;

impl Proposal for Linearized {
    fn draw(
        &self,
        y: &DVector<f64>,
        x_old: &DVector<f64>,
        model: &StateSpaceModel,
        rng: &mut dyn RngCore,
    ) -> DVector<f64> {
        let loc = model.hidden.mean(x_old);
        let h_scale = model.hidden.scale(x_old);
        let h_var = DMatrix::from_diagonal(&h_scale.map(|s| s * s));
        let y_hat = model.observable.mean(&loc);
        let c = numerical_jacobian(|x| model.observable.mean(x), &loc, y.len());
        let o_scale = model.observable.scale(&loc);
        let o_var = DMatrix::from_diagonal(&o_scale.map(|s| s * s));
        let (mean, cov) = affine_gaussian_posterior(&loc, &h_var, &c, &o_var, y, &y_hat);
        sample_posterior(&mean, &cov, rng)
    }

    fn log_weight(
        &self,
        y: &DVector<f64>,
        x_new: &DVector<f64>,
        x_old: &DVector<f64>,
        model: &StateSpaceModel,
    ) -> f64 {
        let loc = model.hidden.mean(x_old);
        let h_scale = model.hidden.scale(x_old);
        let h_var = DMatrix::from_diagonal(&h_scale.map(|s| s * s));
        let y_hat = model.observable.mean(&loc);
        let c = numerical_jacobian(|x| model.observable.mean(x), &loc, y.len());
        let o_scale = model.observable.scale(&loc);
        let o_var = DMatrix::from_diagonal(&o_scale.map(|s| s * s));

        // Importance weight is the target joint density at (x_new, y) under
        // the true model, divided by the proposal density used to draw
        // x_new: p(x_new|x_old) p(y|x_new) / q(x_new | y, x_old).
        let target = model.hidden.weight(x_new, x_old) + model.observable.weight(y, x_new);
        let (mean, cov) = affine_gaussian_posterior(&loc, &h_var, &c, &o_var, y, &y_hat);
        let residual = x_new - &mean;
        let proposal_log_density = crate::distributions::multivariate::mvn_log_pdf(&residual, &cov);
        target - proposal_log_density
    }
}
