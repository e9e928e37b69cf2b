use thiserror::Error;

/// Errors surfaced by the distribution, process, and filtering layers.
///
/// Constructor-time problems (`InvalidSupport`, `ShapeMismatch`) are eager
/// and fatal. Runtime numerical issues (`DegenerateWeights`) are surfaced
/// to the caller rather than silently retried. `IncompatibleModel` guards
/// proposals that only make sense for a particular model shape.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("value {value} lies outside support ({low}, {high})")]
    InvalidSupport { value: f64, low: f64, high: f64 },

    #[error("shape mismatch: {context}")]
    ShapeMismatch { context: String },

    #[error("all particles received -infinity log-weight at step {step}")]
    DegenerateWeights { step: usize },

    #[error("proposal incompatible with model: {reason}")]
    IncompatibleModel { reason: String },

    #[error("{what} queried before the filter was initialized")]
    UninitializedAccess { what: String },
}

pub type Result<T> = std::result::Result<T, FilterError>;
