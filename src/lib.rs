//! Online Bayesian inference over nonlinear, non-Gaussian state-space
//! models: a state-space model abstraction (`process`), a sequential
//! Monte Carlo / Kalman-Laplace filtering engine (`filter`, `proposal`,
//! `resampling`), and a nested-SMC parameter-inference layer built on top
//! of it (`algorithm`: NESS, SMC², and the NESSMC² hybrid).
//!
//! Grounded on `original_source/pyfilter`, restructured in the idiom of
//! `examples/BazzaCipher-robotics-rs` — trait-based filter/proposal
//! polymorphism in place of the originating implementation's duck typing,
//! `thiserror` error enums in place of raised exceptions, and `rayon` data
//! parallelism over the particle and outer-parameter ensembles in place of
//! its batched-tensor vectorization. See `DESIGN.md` for the full grounding
//! ledger.

pub mod algorithm;
pub mod distributions;
pub mod error;
pub mod filter;
pub mod parameter;
pub mod process;
pub mod proposal;
pub mod resampling;
pub mod utils;

pub use algorithm::{Algorithm, JitterKernel, NESSMC2, NESS, SMC2};
pub use distributions::Distribution;
pub use error::{FilterError, Result};
pub use filter::{InnerFilter, KalmanLaplaceFilter, ParticleFilter};
pub use parameter::Parameter;
pub use process::{BaseProcess, Observable, StateSpaceModel};
pub use proposal::{Bootstrap, GlobalUnscented, LinearGaussianObservations, Linearized, Proposal, Unscented};
pub use resampling::{resample_indices, ResamplingScheme};
