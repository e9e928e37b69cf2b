//! A hand-rolled multivariate Gaussian, used by the linearized/unscented/
//! optimal proposals and nowhere else. Deliberately not routed through
//! `statrs` (whose own multivariate-normal type pulls in its own nalgebra
//! version) — see DESIGN.md.

use nalgebra::{Cholesky, DMatrix, DVector};
use rand::RngCore;
use rand_distr::StandardNormal;

const LOG_2PI: f64 = 1.8378770664093453;

/// `log N(residual; 0, cov)`, i.e. the log-density of a zero-mean
/// multivariate Gaussian at `residual`.
pub fn mvn_log_pdf(residual: &DVector<f64>, cov: &DMatrix<f64>) -> f64 {
    let chol = Cholesky::new(cov.clone()).expect("covariance must be positive definite");
    let l = chol.l();
    let k = residual.len() as f64;
    let log_det: f64 = 2.0 * l.diagonal().iter().map(|d| d.ln()).sum::<f64>();
    let z = chol.solve(residual);
    let quad = residual.dot(&z);
    -0.5 * (k * LOG_2PI + log_det + quad)
}

/// Draws one sample from `N(mean, cov)`.
pub fn mvn_sample(mean: &DVector<f64>, cov: &DMatrix<f64>, rng: &mut dyn RngCore) -> DVector<f64> {
    let chol = Cholesky::new(cov.clone()).expect("covariance must be positive definite");
    let l = chol.l();
    let z = DVector::from_iterator(mean.len(), (0..mean.len()).map(|_| rng.sample::<f64, _>(StandardNormal)));
    mean + l * z
}
