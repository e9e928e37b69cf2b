use super::{affine_gaussian_posterior, affine_marginal_log_weight, sample_posterior, Proposal};
use crate::error::{FilterError, Result};
use crate::process::StateSpaceModel;
use nalgebra::{DMatrix, DVector};
use rand::RngCore;

/// The exact optimal proposal for a hidden process with Gaussian transition
/// noise and an observation model that is affine in the hidden state:
/// `y = C x + noise`, `noise ~ N(0, o_var)`.
///
/// Grounded on `original_source/pyfilter/proposals/linear.py`'s
/// `LinearGaussianObservations`, which special-cases the 1-D and 2-D
/// observation dimension. That branching exists only because the source
/// language has no generic small-matrix type; `nalgebra::DMatrix` handles
/// the 1x1 case the same way it handles any other size, so this is a single
/// code path here — see DESIGN.md.
pub struct LinearGaussianObservations {
    c: DMatrix<f64>,
}

impl LinearGaussianObservations {
    pub fn new(c: DMatrix<f64>) -> Self {
        LinearGaussianObservations { c }
    }

    fn check_dims(&self, hidden_dim: usize, obs_dim: usize) -> Result<()> {
        if self.c.nrows() != obs_dim || self.c.ncols() != hidden_dim {
            return Err(FilterError::IncompatibleModel {
                reason: format!(
                    "observation matrix is {}x{} but model has hidden dim {} and observation dim {}",
                    self.c.nrows(),
                    self.c.ncols(),
                    hidden_dim,
                    obs_dim
                ),
            });
        }
        Ok(())
    }
}

impl Proposal for LinearGaussianObservations {
    fn draw(
        &self,
        y: &DVector<f64>,
        x_old: &DVector<f64>,
        model: &StateSpaceModel,
        rng: &mut dyn RngCore,
    ) -> DVector<f64> {
        self.check_dims(x_old.len(), y.len())
            .expect("dimension mismatch must be caught before filtering starts");
        let loc = model.hidden.mean(x_old);
        let h_scale = model.hidden.scale(x_old);
        let h_var = DMatrix::from_diagonal(&h_scale.map(|s| s * s));
        let y_hat = &self.c * &loc;
        let o_scale = model.observable.scale(&loc);
        let o_var = DMatrix::from_diagonal(&o_scale.map(|s| s * s));
        let (mean, cov) = affine_gaussian_posterior(&loc, &h_var, &self.c, &o_var, y, &y_hat);
        sample_posterior(&mean, &cov, rng)
    }

    fn log_weight(
        &self,
        y: &DVector<f64>,
        _x_new: &DVector<f64>,
        x_old: &DVector<f64>,
        model: &StateSpaceModel,
    ) -> f64 {
        // The optimal proposal's weight is exactly the marginal predictive
        // density p(y | x_old), with x_new integrated out analytically —
        // it does not depend on the particular x_new drawn.
        let loc = model.hidden.mean(x_old);
        let h_scale = model.hidden.scale(x_old);
        let h_var = DMatrix::from_diagonal(&h_scale.map(|s| s * s));
        let y_hat = &self.c * &loc;
        let o_scale = model.observable.scale(&loc);
        let o_var = DMatrix::from_diagonal(&o_scale.map(|s| s * s));
        affine_marginal_log_weight(&h_var, &self.c, &o_var, y, &y_hat)
    }
}
