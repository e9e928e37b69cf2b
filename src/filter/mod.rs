//! State filters: the particle-filter engine (`SISR`/auxiliary) and the
//! `KalmanLaplace` closed-form filter, unified behind one `InnerFilter`
//! trait so the nested-SMC parameter layer (`crate::algorithm`) can hold a
//! mix of filter kinds, one per outer parameter particle.
//!
//! Grounded on `examples/BazzaCipher-robotics-rs/src/localization/particle_filter.rs`
//! (the SISR update loop and resampling dispatch) and `extended_kalman_filter.rs`
//! (the predict/update structure reused by `KalmanLaplace`).

pub mod kalman;
pub mod particle;

pub use kalman::KalmanLaplaceFilter;
pub use particle::ParticleFilter;

use crate::error::Result;
use crate::process::StateSpaceModel;
use nalgebra::DVector;
use rand::RngCore;

/// Common contract for anything that can filter a state-space model
/// sequentially and report its running marginal log-likelihood.
pub trait InnerFilter: Send {
    fn initialize(&mut self, model: &StateSpaceModel, rng: &mut dyn RngCore);

    /// Processes one observation, returning the incremental log-likelihood
    /// `log p(y_t | y_{1:t-1})` contributed by this step.
    fn filter(&mut self, y: &DVector<f64>, model: &StateSpaceModel, rng: &mut dyn RngCore) -> Result<f64>;

    fn filter_means(&self) -> &[DVector<f64>];

    /// One realized noise vector per step processed so far: the
    /// weighted-mean standardized innovation driving that step's hidden
    /// transition. Closed-form filters that never draw an explicit noise
    /// term (e.g. [`KalmanLaplaceFilter`]) report an all-zero vector per
    /// step, since the Gaussian assumption already has zero expected
    /// standardized noise.
    fn noise_means(&self) -> &[DVector<f64>];

    fn log_likelihoods(&self) -> &[f64];

    fn total_log_likelihood(&self) -> f64 {
        self.log_likelihoods().iter().sum()
    }

    /// Drops all accumulated history and returns to the pre-`initialize`
    /// state, without touching any configuration (resampling scheme,
    /// proposal, thresholds).
    fn reset(&mut self);

    /// Scales the filter's internal state-particle count by `factor`
    /// (SMC²'s response to a low PMMH acceptance rate). A no-op for
    /// filters with no notion of a state-particle count, such as
    /// [`KalmanLaplaceFilter`].
    fn increase_states(&mut self, _factor: f64, _rng: &mut dyn RngCore) {}

    /// An independent copy, used when the nested-SMC layer needs to fork a
    /// filter's full state and history (SMC²'s `entire_history = true`
    /// outer resample).
    fn box_clone(&self) -> Box<dyn InnerFilter>;

    /// Forward-simulates `steps` timesteps from the current weighted
    /// posterior without recording history or mutating filter state.
    fn predict(&self, steps: usize, model: &StateSpaceModel, rng: &mut dyn RngCore) -> Vec<DVector<f64>>;
}
