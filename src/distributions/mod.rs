//! Univariate distribution interface: `sample`, `log_pdf`, `mean`, `std`,
//! `bounds`, plus the unconstrained-space transform used for jittering.
//!
//! A closed enumeration is deliberately used in place of the duck-typed
//! distribution hierarchy of the originating Python implementation — see
//! DESIGN.md. Sampling defers to `rand_distr`; density evaluation defers to
//! `statrs`, which is the crate the closest reference implementation in
//! this corpus (the nested-sampling inference crate) already reaches for.

pub mod multivariate;
pub mod transforms;

use crate::error::{FilterError, Result};
use rand::RngCore;
use rand_distr::{Distribution as RandDist, Gamma as RGamma, Normal as RNormal, StudentT as RStudentT};
use statrs::distribution::{
    Beta as SBeta, Continuous, Exp as SExp, Gamma as SGamma, InverseGamma as SInverseGamma,
    Normal as SNormal, StudentsT as SStudentsT, Uniform as SUniform,
};
use transforms::Transform;

/// A univariate distribution used as a noise source or a parameter prior.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Distribution {
    Normal { loc: f64, scale: f64 },
    Uniform { low: f64, high: f64 },
    Student { nu: f64, loc: f64, scale: f64 },
    Gamma { shape: f64, scale: f64 },
    InverseGamma { shape: f64, scale: f64 },
    /// Standard Beta on `(0, 1)`. Per the originating implementation's own
    /// acknowledged limitation, `loc`/`scale` generalizations are not
    /// supported — see DESIGN.md.
    Beta { a: f64, b: f64 },
    Exponential { lambda: f64 },
}

impl Distribution {
    pub fn normal(loc: f64, scale: f64) -> Result<Self> {
        if !(scale > 0.0) {
            return Err(FilterError::ShapeMismatch {
                context: format!("Normal scale must be positive, got {scale}"),
            });
        }
        Ok(Distribution::Normal { loc, scale })
    }

    pub fn uniform(low: f64, high: f64) -> Result<Self> {
        if !(high > low) {
            return Err(FilterError::ShapeMismatch {
                context: format!("Uniform requires high > low, got [{low}, {high}]"),
            });
        }
        Ok(Distribution::Uniform { low, high })
    }

    pub fn student(nu: f64, loc: f64, scale: f64) -> Result<Self> {
        if !(nu > 0.0) || !(scale > 0.0) {
            return Err(FilterError::ShapeMismatch {
                context: format!("Student-t requires nu, scale > 0, got nu={nu}, scale={scale}"),
            });
        }
        Ok(Distribution::Student { nu, loc, scale })
    }

    pub fn gamma(shape: f64, scale: f64) -> Result<Self> {
        if !(shape > 0.0) || !(scale > 0.0) {
            return Err(FilterError::ShapeMismatch {
                context: format!("Gamma requires shape, scale > 0, got {shape}, {scale}"),
            });
        }
        Ok(Distribution::Gamma { shape, scale })
    }

    pub fn inverse_gamma(shape: f64, scale: f64) -> Result<Self> {
        if !(shape > 0.0) || !(scale > 0.0) {
            return Err(FilterError::ShapeMismatch {
                context: format!(
                    "InverseGamma requires shape, scale > 0, got {shape}, {scale}"
                ),
            });
        }
        Ok(Distribution::InverseGamma { shape, scale })
    }

    pub fn beta(a: f64, b: f64) -> Result<Self> {
        if !(a > 0.0) || !(b > 0.0) {
            return Err(FilterError::ShapeMismatch {
                context: format!("Beta requires a, b > 0, got {a}, {b}"),
            });
        }
        Ok(Distribution::Beta { a, b })
    }

    pub fn exponential(lambda: f64) -> Result<Self> {
        if !(lambda > 0.0) {
            return Err(FilterError::ShapeMismatch {
                context: format!("Exponential requires lambda > 0, got {lambda}"),
            });
        }
        Ok(Distribution::Exponential { lambda })
    }

    pub fn bounds(&self) -> (f64, f64) {
        match *self {
            Distribution::Normal { .. } => (f64::NEG_INFINITY, f64::INFINITY),
            Distribution::Uniform { low, high } => (low, high),
            Distribution::Student { .. } => (f64::NEG_INFINITY, f64::INFINITY),
            Distribution::Gamma { .. } => (0.0, f64::INFINITY),
            Distribution::InverseGamma { .. } => (0.0, f64::INFINITY),
            Distribution::Beta { .. } => (0.0, 1.0),
            Distribution::Exponential { .. } => (0.0, f64::INFINITY),
        }
    }

    pub fn transform(&self) -> Transform {
        let (low, high) = self.bounds();
        Transform::for_bounds(low, high)
    }

    pub fn mean(&self) -> f64 {
        match *self {
            Distribution::Normal { loc, .. } => loc,
            Distribution::Uniform { low, high } => 0.5 * (low + high),
            Distribution::Student { nu, loc, .. } => {
                if nu > 1.0 {
                    loc
                } else {
                    f64::NAN
                }
            }
            Distribution::Gamma { shape, scale } => shape * scale,
            Distribution::InverseGamma { shape, scale } => {
                if shape > 1.0 {
                    scale / (shape - 1.0)
                } else {
                    f64::INFINITY
                }
            }
            Distribution::Beta { a, b } => a / (a + b),
            Distribution::Exponential { lambda } => 1.0 / lambda,
        }
    }

    pub fn std(&self) -> f64 {
        match *self {
            Distribution::Normal { scale, .. } => scale,
            Distribution::Uniform { low, high } => (high - low) / (12.0_f64).sqrt(),
            Distribution::Student { nu, scale, .. } => {
                if nu > 2.0 {
                    scale * (nu / (nu - 2.0)).sqrt()
                } else {
                    f64::INFINITY
                }
            }
            Distribution::Gamma { shape, scale } => shape.sqrt() * scale,
            Distribution::InverseGamma { shape, scale } => {
                if shape > 2.0 {
                    scale / ((shape - 1.0) * (shape - 2.0).sqrt())
                } else {
                    f64::INFINITY
                }
            }
            Distribution::Beta { a, b } => {
                (a * b / ((a + b).powi(2) * (a + b + 1.0))).sqrt()
            }
            Distribution::Exponential { lambda } => 1.0 / lambda,
        }
    }

    pub fn log_pdf(&self, x: f64) -> f64 {
        match *self {
            Distribution::Normal { loc, scale } => {
                SNormal::new(loc, scale).expect("validated at construction").ln_pdf(x)
            }
            Distribution::Uniform { low, high } => {
                SUniform::new(low, high).expect("validated at construction").ln_pdf(x)
            }
            Distribution::Student { nu, loc, scale } => SStudentsT::new(loc, scale, nu)
                .expect("validated at construction")
                .ln_pdf(x),
            Distribution::Gamma { shape, scale } => {
                SGamma::new(shape, 1.0 / scale).expect("validated at construction").ln_pdf(x)
            }
            Distribution::InverseGamma { shape, scale } => SInverseGamma::new(shape, scale)
                .expect("validated at construction")
                .ln_pdf(x),
            Distribution::Beta { a, b } => {
                SBeta::new(a, b).expect("validated at construction").ln_pdf(x)
            }
            Distribution::Exponential { lambda } => {
                SExp::new(lambda).expect("validated at construction").ln_pdf(x)
            }
        }
    }

    pub fn sample(&self, rng: &mut dyn RngCore) -> f64 {
        match *self {
            Distribution::Normal { loc, scale } => {
                RNormal::new(loc, scale).expect("validated at construction").sample(rng)
            }
            Distribution::Uniform { low, high } => {
                rand::distributions::Uniform::new(low, high).sample(rng)
            }
            Distribution::Student { nu, loc, scale } => {
                let z: f64 = RStudentT::new(nu).expect("validated at construction").sample(rng);
                loc + scale * z
            }
            Distribution::Gamma { shape, scale } => {
                RGamma::new(shape, scale).expect("validated at construction").sample(rng)
            }
            Distribution::InverseGamma { shape, scale } => {
                let y: f64 = RGamma::new(shape, 1.0 / scale)
                    .expect("validated at construction")
                    .sample(rng);
                1.0 / y
            }
            Distribution::Beta { a, b } => {
                rand_distr::Beta::new(a, b).expect("validated at construction").sample(rng)
            }
            Distribution::Exponential { lambda } => {
                rand_distr::Exp::new(lambda).expect("validated at construction").sample(rng)
            }
        }
    }

    pub fn sample_n(&self, n: usize, rng: &mut dyn RngCore) -> Vec<f64> {
        (0..n).map(|_| self.sample(rng)).collect()
    }

    /// Validates that `x` lies within this distribution's support, for use
    /// by [`crate::parameter::Parameter`]'s natural-value setter.
    pub fn check_support(&self, x: f64) -> Result<()> {
        let (low, high) = self.bounds();
        if x < low || x > high {
            return Err(FilterError::InvalidSupport { value: x, low, high });
        }
        Ok(())
    }
}
