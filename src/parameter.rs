//! A scalar model parameter: either fixed (never touched by inference) or
//! trainable, with a prior distribution and a cached constrained/
//! unconstrained pair of values.
//!
//! Mirrors the `theta`/`theta_dists`/`t_values` split of the originating
//! implementation's parameter handling (`original_source/pyfilter/timeseries/base.py`),
//! but as an explicit struct rather than duck-typed attributes.

use crate::distributions::Distribution;
use crate::error::Result;
use rand::RngCore;

#[derive(Debug, Clone)]
enum Kind {
    Fixed(f64),
    Trainable {
        prior: Distribution,
        /// Natural-scale value.
        value: f64,
        /// Unconstrained-scale value, kept in sync with `value` by every
        /// setter so repeated jitter/rejuvenation passes never need to
        /// re-derive it from scratch.
        unconstrained: f64,
    },
}

/// A single named model parameter.
#[derive(Debug, Clone)]
pub struct Parameter {
    name: String,
    kind: Kind,
}

impl Parameter {
    pub fn fixed(name: impl Into<String>, value: f64) -> Parameter {
        Parameter { name: name.into(), kind: Kind::Fixed(value) }
    }

    pub fn trainable(name: impl Into<String>, prior: Distribution, initial: f64) -> Result<Parameter> {
        prior.check_support(initial)?;
        let unconstrained = prior.transform().to_unconstrained(initial);
        Ok(Parameter {
            name: name.into(),
            kind: Kind::Trainable { prior, value: initial, unconstrained },
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_trainable(&self) -> bool {
        matches!(self.kind, Kind::Trainable { .. })
    }

    /// Natural-scale (constrained) value.
    pub fn value(&self) -> f64 {
        match self.kind {
            Kind::Fixed(v) => v,
            Kind::Trainable { value, .. } => value,
        }
    }

    /// Unconstrained-scale value. Panics on a fixed parameter — callers must
    /// check [`Parameter::is_trainable`] first, mirroring
    /// [`crate::error::FilterError::UninitializedAccess`]'s "accessed when
    /// it doesn't make sense" class of bug rather than a recoverable error.
    pub fn unconstrained_value(&self) -> f64 {
        match self.kind {
            Kind::Fixed(_) => panic!("unconstrained_value called on a fixed parameter"),
            Kind::Trainable { unconstrained, .. } => unconstrained,
        }
    }

    pub fn prior(&self) -> Option<&Distribution> {
        match &self.kind {
            Kind::Fixed(_) => None,
            Kind::Trainable { prior, .. } => Some(prior),
        }
    }

    /// Sets the natural-scale value directly, invalidating and recomputing
    /// the cached unconstrained value. Validates against the prior's
    /// support.
    pub fn set_value(&mut self, new_value: f64) -> Result<()> {
        match &mut self.kind {
            Kind::Fixed(v) => {
                *v = new_value;
                Ok(())
            }
            Kind::Trainable { prior, value, unconstrained } => {
                prior.check_support(new_value)?;
                *value = new_value;
                *unconstrained = prior.transform().to_unconstrained(new_value);
                Ok(())
            }
        }
    }

    /// Sets the unconstrained-scale value, invalidating and recomputing the
    /// cached natural-scale value. This is the entry point used by jitter
    /// kernels and PMMH rejuvenation moves, which always operate in
    /// unconstrained space.
    pub fn set_unconstrained_value(&mut self, new_unconstrained: f64) {
        match &mut self.kind {
            Kind::Fixed(_) => panic!("set_unconstrained_value called on a fixed parameter"),
            Kind::Trainable { prior, value, unconstrained } => {
                *unconstrained = new_unconstrained;
                *value = prior.transform().from_unconstrained(new_unconstrained);
            }
        }
    }

    /// `log p(value)` under the prior, zero for a fixed parameter (it
    /// contributes nothing to the joint log-prior).
    pub fn log_prior(&self) -> f64 {
        match &self.kind {
            Kind::Fixed(_) => 0.0,
            Kind::Trainable { prior, value, .. } => prior.log_pdf(*value),
        }
    }

    /// Draws a fresh natural-scale value from the prior and resets the
    /// cached unconstrained value accordingly. No-op on a fixed parameter.
    pub fn initialize(&mut self, rng: &mut dyn RngCore) {
        if let Kind::Trainable { prior, value, unconstrained } = &mut self.kind {
            *value = prior.sample(rng);
            *unconstrained = prior.transform().to_unconstrained(*value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand_pcg::Pcg64Mcg;

    #[test]
    fn fixed_parameter_has_no_prior_and_zero_log_prior() {
        let p = Parameter::fixed("sigma", 1.5);
        assert_eq!(p.value(), 1.5);
        assert!(p.prior().is_none());
        assert_eq!(p.log_prior(), 0.0);
        assert!(!p.is_trainable());
    }

    #[test]
    fn trainable_round_trips_through_unconstrained_space() {
        let prior = Distribution::gamma(2.0, 1.0).unwrap();
        let mut p = Parameter::trainable("alpha", prior, 3.0).unwrap();
        let u = p.unconstrained_value();
        p.set_unconstrained_value(u);
        assert_relative_eq!(p.value(), 3.0, epsilon = 1e-9);
    }

    #[test]
    fn set_value_rejects_out_of_support() {
        let prior = Distribution::beta(2.0, 2.0).unwrap();
        let mut p = Parameter::trainable("rho", prior, 0.5).unwrap();
        assert!(p.set_value(1.5).is_err());
        assert_relative_eq!(p.value(), 0.5);
    }

    #[test]
    fn initialize_draws_from_prior_and_keeps_cache_consistent() {
        let prior = Distribution::normal(0.0, 1.0).unwrap();
        let mut p = Parameter::trainable("mu", prior, 0.0).unwrap();
        let mut rng = Pcg64Mcg::new(3);
        p.initialize(&mut rng);
        let expected_u = prior.transform().to_unconstrained(p.value());
        assert_relative_eq!(p.unconstrained_value(), expected_u, epsilon = 1e-9);
    }
}
