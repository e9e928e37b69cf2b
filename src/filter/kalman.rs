use super::InnerFilter;
use crate::distributions::multivariate::mvn_log_pdf;
use crate::error::{FilterError, Result};
use crate::process::StateSpaceModel;
use crate::utils::numerical_jacobian;
use log::trace;
use nalgebra::{DMatrix, DVector};
use rand::RngCore;

/// A closed-form filter that linearizes the hidden transition and
/// observation means at each step's current estimate (a Laplace/EKF-style
/// approximation), in place of drawing state particles at all.
///
/// Grounded on `examples/BazzaCipher-robotics-rs/src/localization/extended_kalman_filter.rs`'s
/// `ExtendedKalmanFilter::estimate` predict/update structure; generalized
/// to an arbitrary mean/scale model via [`numerical_jacobian`] rather than
/// caller-supplied Jacobian closures.
#[derive(Clone)]
pub struct KalmanLaplaceFilter {
    mean: Option<DVector<f64>>,
    cov: Option<DMatrix<f64>>,
    filter_means: Vec<DVector<f64>>,
    noise_means: Vec<DVector<f64>>,
    log_likelihoods: Vec<f64>,
}

impl KalmanLaplaceFilter {
    pub fn new() -> KalmanLaplaceFilter {
        KalmanLaplaceFilter {
            mean: None,
            cov: None,
            filter_means: Vec::new(),
            noise_means: Vec::new(),
            log_likelihoods: Vec::new(),
        }
    }
}

impl Default for KalmanLaplaceFilter {
    fn default() -> Self {
        KalmanLaplaceFilter::new()
    }
}

impl InnerFilter for KalmanLaplaceFilter {
    fn initialize(&mut self, model: &StateSpaceModel, _rng: &mut dyn RngCore) {
        let mean = model.hidden.i_mean();
        let scale = model.hidden.i_scale();
        self.cov = Some(DMatrix::from_diagonal(&scale.map(|s| s * s)));
        self.mean = Some(mean);
        self.filter_means.clear();
        self.noise_means.clear();
        self.log_likelihoods.clear();
    }

    fn filter(&mut self, y: &DVector<f64>, model: &StateSpaceModel, _rng: &mut dyn RngCore) -> Result<f64> {
        let mean = self.mean.clone().ok_or_else(|| FilterError::UninitializedAccess {
            what: "KalmanLaplaceFilter::filter".into(),
        })?;
        let cov = self.cov.clone().ok_or_else(|| FilterError::UninitializedAccess {
            what: "KalmanLaplaceFilter::filter".into(),
        })?;

        let f_jac = numerical_jacobian(|x| model.hidden.mean(x), &mean, mean.len());
        let pred_mean = model.hidden.mean(&mean);
        let process_scale = model.hidden.scale(&mean);
        let process_var = DMatrix::from_diagonal(&process_scale.map(|s| s * s));
        let pred_cov = &f_jac * &cov * f_jac.transpose() + process_var;

        let h_jac = numerical_jacobian(|x| model.observable.mean(x), &pred_mean, y.len());
        let y_hat = model.observable.mean(&pred_mean);
        let obs_scale = model.observable.scale(&pred_mean);
        let obs_var = DMatrix::from_diagonal(&obs_scale.map(|s| s * s));
        let innovation_cov = &h_jac * &pred_cov * h_jac.transpose() + &obs_var;
        let innovation = y - &y_hat;

        let innovation_cov_inv =
            innovation_cov.clone().try_inverse().expect("innovation covariance must be invertible");
        let kalman_gain = &pred_cov * h_jac.transpose() * &innovation_cov_inv;

        let new_mean = &pred_mean + &kalman_gain * &innovation;
        let identity = DMatrix::<f64>::identity(pred_cov.nrows(), pred_cov.ncols());
        let new_cov = (&identity - &kalman_gain * &h_jac) * &pred_cov;

        let step_log_likelihood = mvn_log_pdf(&innovation, &innovation_cov);
        trace!("kalman-laplace step log-likelihood {step_log_likelihood:.4}");

        self.mean = Some(new_mean.clone());
        self.cov = Some(new_cov);
        self.filter_means.push(new_mean);
        // The Gaussian posterior already marginalizes the process noise,
        // so its expected standardized realization is exactly zero.
        self.noise_means.push(DVector::zeros(pred_mean.len()));
        self.log_likelihoods.push(step_log_likelihood);
        Ok(step_log_likelihood)
    }

    fn filter_means(&self) -> &[DVector<f64>] {
        &self.filter_means
    }

    fn noise_means(&self) -> &[DVector<f64>] {
        &self.noise_means
    }

    fn log_likelihoods(&self) -> &[f64] {
        &self.log_likelihoods
    }

    fn reset(&mut self) {
        self.mean = None;
        self.cov = None;
        self.filter_means.clear();
        self.noise_means.clear();
        self.log_likelihoods.clear();
    }

    fn box_clone(&self) -> Box<dyn InnerFilter> {
        Box::new(self.clone())
    }

    /// Starts from the current filtered mean (there being no state
    /// particles to resample an ancestor from) and applies the hidden
    /// transition kernel repeatedly.
    fn predict(&self, steps: usize, model: &StateSpaceModel, rng: &mut dyn RngCore) -> Vec<DVector<f64>> {
        let mut x = self.mean.clone().unwrap_or_else(|| model.hidden.i_mean());
        let mut out = Vec::with_capacity(steps);
        for _ in 0..steps {
            x = model.hidden.propagate(&x, rng);
            out.push(x.clone());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameter::Parameter;
    use crate::process::{BaseProcess, InitMeanFn, InitScaleFn, MeanFn, Observable, ScaleFn};
    use rand_pcg::Pcg64Mcg;
    use std::sync::Arc;

    fn ar1_model() -> StateSpaceModel {
        let f0: InitMeanFn = Arc::new(|_p| DVector::from_element(1, 0.0));
        let g0: InitScaleFn = Arc::new(|_p| DVector::from_element(1, 1.0));
        let f: MeanFn = Arc::new(|x, p: &[Parameter]| DVector::from_element(1, p[0].value() * x[0]));
        let g: ScaleFn = Arc::new(|_x, p: &[Parameter]| DVector::from_element(1, p[1].value()));
        let hidden =
            BaseProcess::new(vec![Parameter::fixed("rho", 0.9), Parameter::fixed("sigma", 1.0)], f0, g0, f, g)
                .unwrap();
        let of: MeanFn = Arc::new(|x, _p| x.clone());
        let og: ScaleFn = Arc::new(|_x, p: &[Parameter]| DVector::from_element(1, p[0].value()));
        let observable = Observable::new(vec![Parameter::fixed("obs_sigma", 0.5)], of, og).unwrap();
        StateSpaceModel::new(hidden, observable)
    }

    #[test]
    fn filtering_tracks_a_linear_gaussian_series() {
        let model = ar1_model();
        let mut rng = Pcg64Mcg::new(7);
        let (_, observations) = model.sample(30, &mut rng);

        let mut filter = KalmanLaplaceFilter::new();
        filter.initialize(&model, &mut rng);
        for y in &observations {
            filter.filter(y, &model, &mut rng).unwrap();
        }
        assert_eq!(filter.filter_means().len(), 30);
        assert!(filter.total_log_likelihood().is_finite());
    }

    #[test]
    fn filtering_before_initialize_is_an_error() {
        let model = ar1_model();
        let mut rng = Pcg64Mcg::new(9);
        let mut filter = KalmanLaplaceFilter::new();
        let err = filter.filter(&DVector::from_element(1, 0.1), &model, &mut rng).unwrap_err();
        assert!(matches!(err, FilterError::UninitializedAccess { .. }));
    }

    #[test]
    fn reset_drops_the_running_estimate() {
        let model = ar1_model();
        let mut rng = Pcg64Mcg::new(8);
        let mut filter = KalmanLaplaceFilter::new();
        filter.initialize(&model, &mut rng);
        filter.filter(&DVector::from_element(1, 0.1), &model, &mut rng).unwrap();
        filter.reset();
        assert!(filter.filter_means().is_empty());
        assert!(filter.mean.is_none());
    }
}
