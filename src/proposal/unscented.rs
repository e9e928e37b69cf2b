use super::Proposal;
use crate::distributions::multivariate::{mvn_log_pdf, mvn_sample};
use crate::process::StateSpaceModel;
use nalgebra::{Cholesky, DMatrix, DVector};
use rand::RngCore;
use std::sync::RwLock;

/// Sigma-point parameters, matching the conventional `(alpha, beta, kappa)`
/// unscented-transform scaling triple.
#[derive(Debug, Clone, Copy)]
pub struct UnscentedParams {
    pub alpha: f64,
    pub beta: f64,
    pub kappa: f64,
}

impl Default for UnscentedParams {
    fn default() -> Self {
        UnscentedParams { alpha: 1e-3, beta: 2.0, kappa: 0.0 }
    }
}

/// Sigma points plus the weights used to recombine them into a mean and
/// covariance.
struct SigmaPoints {
    points: Vec<DVector<f64>>,
    mean_weights: Vec<f64>,
    cov_weights: Vec<f64>,
}

fn sigma_points(mean: &DVector<f64>, cov: &DMatrix<f64>, p: UnscentedParams) -> SigmaPoints {
    let n = mean.len() as f64;
    let lambda = p.alpha * p.alpha * (n + p.kappa) - n;
    let chol = Cholesky::new(cov.clone()).expect("covariance must be positive definite");
    let sqrt_cov = chol.l() * (n + lambda).sqrt();

    let mut points = Vec::with_capacity(2 * mean.len() + 1);
    points.push(mean.clone());
    for i in 0..mean.len() {
        let col = sqrt_cov.column(i).clone_owned();
        points.push(mean + &col);
    }
    for i in 0..mean.len() {
        let col = sqrt_cov.column(i).clone_owned();
        points.push(mean - &col);
    }

    let mut mean_weights = vec![0.0; points.len()];
    let mut cov_weights = vec![0.0; points.len()];
    mean_weights[0] = lambda / (n + lambda);
    cov_weights[0] = mean_weights[0] + (1.0 - p.alpha * p.alpha + p.beta);
    for i in 1..points.len() {
        mean_weights[i] = 1.0 / (2.0 * (n + lambda));
        cov_weights[i] = mean_weights[i];
    }

    SigmaPoints { points, mean_weights, cov_weights }
}

/// Propagates sigma points through `obs_mean`/`obs_scale` and returns the
/// Kalman-style posterior over the hidden state implied by observing `y`.
fn unscented_posterior(
    prior_mean: &DVector<f64>,
    prior_cov: &DMatrix<f64>,
    obs_mean: impl Fn(&DVector<f64>) -> DVector<f64>,
    obs_scale: impl Fn(&DVector<f64>) -> DVector<f64>,
    y: &DVector<f64>,
    params: UnscentedParams,
) -> (DVector<f64>, DMatrix<f64>) {
    let sp = sigma_points(prior_mean, prior_cov, params);
    let y_sigmas: Vec<DVector<f64>> = sp.points.iter().map(|x| obs_mean(x)).collect();
    let obs_dim = y_sigmas[0].len();

    let mut y_hat = DVector::zeros(obs_dim);
    for (w, ys) in sp.mean_weights.iter().zip(y_sigmas.iter()) {
        y_hat += *w * ys;
    }

    let mut pyy = DMatrix::zeros(obs_dim, obs_dim);
    let mut pxy = DMatrix::zeros(prior_mean.len(), obs_dim);
    for ((w, x), ys) in sp.cov_weights.iter().zip(sp.points.iter()).zip(y_sigmas.iter()) {
        let dy = ys - &y_hat;
        let dx = x - prior_mean;
        pyy += *w * (&dy * dy.transpose());
        pxy += *w * (&dx * dy.transpose());
    }
    let obs_noise_scale = obs_scale(prior_mean);
    let obs_noise_var = DMatrix::from_diagonal(&obs_noise_scale.map(|s| s * s));
    pyy += obs_noise_var;

    let pyy_inv = pyy.clone().try_inverse().expect("innovation covariance must be invertible");
    let kalman_gain = &pxy * &pyy_inv;
    let innovation = y - &y_hat;
    let mean = prior_mean + &kalman_gain * &innovation;
    let cov = prior_cov - &kalman_gain * &pyy * kalman_gain.transpose();
    (mean, cov)
}

/// Local unscented proposal: the sigma points are rebuilt per-particle
/// around that particle's own predicted state.
///
/// Grounded on `original_source/pyfilter/proposals/unscented.py`'s
/// `Unscented`, which recomputes its transform from `x` on every `draw`.
pub struct Unscented {
    params: UnscentedParams,
}

impl Unscented {
    pub fn new(params: UnscentedParams) -> Self {
        Unscented { params }
    }
}

impl Default for Unscented {
    fn default() -> Self {
        Unscented { params: UnscentedParams::default() }
    }
}

impl Proposal for Unscented {
    fn draw(
        &self,
        y: &DVector<f64>,
        x_old: &DVector<f64>,
        model: &StateSpaceModel,
        rng: &mut dyn RngCore,
    ) -> DVector<f64> {
        let prior_mean = model.hidden.mean(x_old);
        let prior_scale = model.hidden.scale(x_old);
        let prior_cov = DMatrix::from_diagonal(&prior_scale.map(|s| s * s));
        let (mean, cov) = unscented_posterior(
            &prior_mean,
            &prior_cov,
            |x| model.observable.mean(x),
            |x| model.observable.scale(x),
            y,
            self.params,
        );
        mvn_sample(&mean, &cov, rng)
    }

    fn log_weight(
        &self,
        y: &DVector<f64>,
        x_new: &DVector<f64>,
        x_old: &DVector<f64>,
        model: &StateSpaceModel,
    ) -> f64 {
        let prior_mean = model.hidden.mean(x_old);
        let prior_scale = model.hidden.scale(x_old);
        let prior_cov = DMatrix::from_diagonal(&prior_scale.map(|s| s * s));
        let target = model.hidden.weight(x_new, x_old) + model.observable.weight(y, x_new);
        let (mean, cov) = unscented_posterior(
            &prior_mean,
            &prior_cov,
            |x| model.observable.mean(x),
            |x| model.observable.scale(x),
            y,
            self.params,
        );
        let proposal_log_density = mvn_log_pdf(&(x_new - &mean), &cov);
        target - proposal_log_density
    }
}

/// Global unscented proposal: the sigma-point transform is built once per
/// timestep from the whole particle ensemble's empirical mean/covariance
/// rather than per-particle — the caller (the particle filter's update
/// loop) must call [`GlobalUnscented::set_ensemble_moments`] before
/// drawing from any particle. Falls back to the particle's own local
/// moments if that has not happened yet, matching the "first step has no
/// ensemble history" edge case.
///
/// Grounded on `original_source/pyfilter/proposals/unscented.py`'s
/// `GlobalUnscented`, which calls `globalconstruct` once across the
/// ensemble instead of per-particle.
pub struct GlobalUnscented {
    params: UnscentedParams,
    moments: RwLock<Option<(DVector<f64>, DMatrix<f64>)>>,
}

impl GlobalUnscented {
    pub fn new(params: UnscentedParams) -> Self {
        GlobalUnscented { params, moments: RwLock::new(None) }
    }

    pub fn set_ensemble_moments(&self, mean: DVector<f64>, cov: DMatrix<f64>) {
        *self.moments.write().expect("ensemble moments lock poisoned") = Some((mean, cov));
    }

    fn moments_or(&self, fallback_mean: DVector<f64>, fallback_cov: DMatrix<f64>) -> (DVector<f64>, DMatrix<f64>) {
        self.moments
            .read()
            .expect("ensemble moments lock poisoned")
            .clone()
            .unwrap_or((fallback_mean, fallback_cov))
    }
}

impl Default for GlobalUnscented {
    fn default() -> Self {
        GlobalUnscented::new(UnscentedParams::default())
    }
}

impl Proposal for GlobalUnscented {
    fn draw(
        &self,
        y: &DVector<f64>,
        x_old: &DVector<f64>,
        model: &StateSpaceModel,
        rng: &mut dyn RngCore,
    ) -> DVector<f64> {
        let fallback_mean = model.hidden.mean(x_old);
        let fallback_scale = model.hidden.scale(x_old);
        let fallback_cov = DMatrix::from_diagonal(&fallback_scale.map(|s| s * s));
        let (prior_mean, prior_cov) = self.moments_or(fallback_mean, fallback_cov);
        let (mean, cov) = unscented_posterior(
            &prior_mean,
            &prior_cov,
            |x| model.observable.mean(x),
            |x| model.observable.scale(x),
            y,
            self.params,
        );
        mvn_sample(&mean, &cov, rng)
    }

    fn log_weight(
        &self,
        y: &DVector<f64>,
        x_new: &DVector<f64>,
        x_old: &DVector<f64>,
        model: &StateSpaceModel,
    ) -> f64 {
        let fallback_mean = model.hidden.mean(x_old);
        let fallback_scale = model.hidden.scale(x_old);
        let fallback_cov = DMatrix::from_diagonal(&fallback_scale.map(|s| s * s));
        let (prior_mean, prior_cov) = self.moments_or(fallback_mean, fallback_cov);
        let target = model.hidden.weight(x_new, x_old) + model.observable.weight(y, x_new);
        let (mean, cov) = unscented_posterior(
            &prior_mean,
            &prior_cov,
            |x| model.observable.mean(x),
            |x| model.observable.scale(x),
            y,
            self.params,
        );
        let proposal_log_density = mvn_log_pdf(&(x_new - &mean), &cov);
        target - proposal_log_density
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{BaseProcess, InitMeanFn, InitScaleFn, MeanFn, Observable, ScaleFn};
    use rand_pcg::Pcg64Mcg;
    use std::sync::Arc;

    fn linear_gaussian_model() -> StateSpaceModel {
        let f0: InitMeanFn = Arc::new(|_p| DVector::from_element(1, 0.0));
        let g0: InitScaleFn = Arc::new(|_p| DVector::from_element(1, 1.0));
        let f: MeanFn = Arc::new(|x, _p| x.clone() * 0.9);
        let g: ScaleFn = Arc::new(|_x, _p| DVector::from_element(1, 1.0));
        let hidden = BaseProcess::new(vec![], f0, g0, f, g).unwrap();
        let of: MeanFn = Arc::new(|x, _p| x.clone());
        let og: ScaleFn = Arc::new(|_x, _p| DVector::from_element(1, 0.4));
        let observable = Observable::new(vec![], of, og).unwrap();
        StateSpaceModel::new(hidden, observable)
    }

    #[test]
    fn local_unscented_draw_is_finite_on_a_linear_model() {
        let m = linear_gaussian_model();
        let proposal = Unscented::default();
        let mut rng = Pcg64Mcg::new(2);
        let x_old = DVector::from_element(1, 0.5);
        let y = DVector::from_element(1, 0.6);
        let x_new = proposal.draw(&y, &x_old, &m, &mut rng);
        assert!(x_new[0].is_finite());
    }

    #[test]
    fn global_unscented_falls_back_to_local_moments_before_set() {
        let m = linear_gaussian_model();
        let proposal = GlobalUnscented::default();
        let mut rng = Pcg64Mcg::new(4);
        let x_old = DVector::from_element(1, 0.5);
        let y = DVector::from_element(1, 0.6);
        let x_new = proposal.draw(&y, &x_old, &m, &mut rng);
        assert!(x_new[0].is_finite());
    }

    #[test]
    fn global_unscented_uses_ensemble_moments_once_set() {
        let m = linear_gaussian_model();
        let proposal = GlobalUnscented::default();
        proposal.set_ensemble_moments(DVector::from_element(1, 10.0), DMatrix::identity(1, 1));
        let x_old = DVector::from_element(1, 0.5);
        let y = DVector::from_element(1, 0.6);
        let w_with_ensemble_mean = proposal.log_weight(&y, &DVector::from_element(1, 10.0), &x_old, &m);
        assert!(w_with_ensemble_mean.is_finite());
    }
}
