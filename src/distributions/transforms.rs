//! Transforms between a distribution's constrained (natural) support and an
//! unconstrained real line, used by [`Parameter`](crate::parameter::Parameter)
//! to jitter and rejuvenate trainable parameters in unconstrained space.
//!
//! Three families suffice for every distribution in [`super::Distribution`]:
//! identity for unbounded support, a shifted log for a half-line, and a
//! generalized logit for a finite interval (which subsumes the `(0, 1)`
//! case used by [`super::Distribution::Beta`]).

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transform {
    Identity,
    /// `x = low + exp(u)`, for support `(low, +inf)`.
    Log { low: f64 },
    /// `x = low + (high - low) * sigmoid(u)`, for finite support `(low, high)`.
    Logit { low: f64, high: f64 },
}

impl Transform {
    /// No distribution in [`super::Distribution`] currently has
    /// upper-bounded-only support (`(-inf, high)`); that combination is
    /// rejected rather than silently mistransformed.
    pub fn for_bounds(low: f64, high: f64) -> Transform {
        match (low.is_finite(), high.is_finite()) {
            (false, false) => Transform::Identity,
            (true, false) => Transform::Log { low },
            (false, true) => {
                unreachable!("upper-bounded-only support (-inf, {high}) has no Transform implementation")
            }
            (true, true) => Transform::Logit { low, high },
        }
    }

    pub fn to_unconstrained(&self, x: f64) -> f64 {
        match *self {
            Transform::Identity => x,
            Transform::Log { low } => (x - low).ln(),
            Transform::Logit { low, high } => {
                let p = (x - low) / (high - low);
                (p / (1.0 - p)).ln()
            }
        }
    }

    pub fn from_unconstrained(&self, u: f64) -> f64 {
        match *self {
            Transform::Identity => u,
            Transform::Log { low } => low + u.exp(),
            Transform::Logit { low, high } => {
                let p = 1.0 / (1.0 + (-u).exp());
                low + (high - low) * p
            }
        }
    }

    /// `log |dx/du|` evaluated at the constrained value `x`.
    pub fn log_abs_det_jacobian(&self, x: f64) -> f64 {
        match *self {
            Transform::Identity => 0.0,
            Transform::Log { low } => (x - low).ln(),
            Transform::Logit { low, high } => {
                let p = (x - low) / (high - low);
                (high - low).ln() + p.ln() + (1.0 - p).ln()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn round_trip(t: Transform, x: f64) {
        let u = t.to_unconstrained(x);
        let back = t.from_unconstrained(u);
        assert_relative_eq!(back, x, epsilon = 1e-9);
    }

    #[test]
    fn identity_round_trips() {
        round_trip(Transform::Identity, -3.7);
        round_trip(Transform::Identity, 42.0);
    }

    #[test]
    fn log_round_trips_on_half_line() {
        let t = Transform::Log { low: 0.0 };
        round_trip(t, 0.001);
        round_trip(t, 5.0);
        round_trip(t, 1000.0);
    }

    #[test]
    fn logit_round_trips_on_interval() {
        let t = Transform::Logit { low: 0.0, high: 1.0 };
        round_trip(t, 0.001);
        round_trip(t, 0.5);
        round_trip(t, 0.999);

        let t2 = Transform::Logit { low: -2.0, high: 7.0 };
        round_trip(t2, 0.0);
        round_trip(t2, 6.9);
    }

    #[test]
    fn jacobian_matches_finite_difference() {
        let t = Transform::Log { low: 0.0 };
        let x = 2.0;
        let h = 1e-6;
        let u = t.to_unconstrained(x);
        let dxdu_fd = (t.from_unconstrained(u + h) - t.from_unconstrained(u - h)) / (2.0 * h);
        let analytic = t.log_abs_det_jacobian(x).exp();
        assert_relative_eq!(analytic, dxdu_fd, epsilon = 1e-4);

        let t2 = Transform::Logit { low: 0.0, high: 1.0 };
        let x2 = 0.3;
        let u2 = t2.to_unconstrained(x2);
        let dxdu_fd2 =
            (t2.from_unconstrained(u2 + h) - t2.from_unconstrained(u2 - h)) / (2.0 * h);
        let analytic2 = t2.log_abs_det_jacobian(x2).exp();
        assert_relative_eq!(analytic2, dxdu_fd2, epsilon = 1e-4);
    }
}
