//! Small numerical helpers shared across the resampling, filtering, and
//! algorithm layers: log-sum-exp, weight normalization with the uniform
//! fallback required by the error-handling policy, effective sample size,
//! and a central finite-difference Jacobian used by the filters/proposals
//! that linearize a model function in place of an analytic derivative.

use nalgebra::{DMatrix, DVector};

/// Numerically stable `ln(sum(exp(w)))`.
pub fn logsumexp(log_w: &[f64]) -> f64 {
    let max = log_w.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    let sum: f64 = log_w.iter().map(|w| (w - max).exp()).sum();
    max + sum.ln()
}

/// Normalizes log-weights to linear-scale weights summing to one.
///
/// If normalization underflows to all-zero (every weight maps to `0.0`
/// after rescaling), weights default to uniform rather than failing —
/// resampling must never fail per the error-handling policy.
pub fn normalize(log_w: &[f64]) -> Vec<f64> {
    let max = log_w.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let n = log_w.len();

    if !max.is_finite() {
        return vec![1.0 / n as f64; n];
    }

    let mut out: Vec<f64> = log_w.iter().map(|w| (w - max).exp()).collect();
    let total: f64 = out.iter().sum();

    if total <= 0.0 || !total.is_finite() {
        return vec![1.0 / n as f64; n];
    }

    for w in &mut out {
        *w /= total;
    }
    out
}

/// Effective sample size `1 / sum(normalize(log_w)^2)`.
pub fn ess(log_w: &[f64]) -> f64 {
    let w = normalize(log_w);
    let sq: f64 = w.iter().map(|x| x * x).sum();
    1.0 / sq
}

/// `true` when every log-weight is `-infinity` — the degenerate case the
/// filter cannot recover from within a step.
pub fn all_degenerate(log_w: &[f64]) -> bool {
    log_w.iter().all(|w| *w == f64::NEG_INFINITY)
}

const LOG_SQRT_2PI: f64 = 0.9189385332046727;

/// `log` density of the standard normal at `z`.
pub fn standard_normal_log_pdf(z: f64) -> f64 {
    -0.5 * z * z - LOG_SQRT_2PI
}

/// Weighted mean of a particle set under already-normalized weights.
pub fn weighted_mean(particles: &[DVector<f64>], weights: &[f64]) -> DVector<f64> {
    let dim = particles[0].len();
    let mut mean = DVector::zeros(dim);
    for (x, w) in particles.iter().zip(weights.iter()) {
        mean += x * *w;
    }
    mean
}

const FD_STEP: f64 = 1e-5;

/// Central finite-difference Jacobian of `f` at `x`, used in place of an
/// analytic derivative by the linearized/Kalman-Laplace filters.
pub fn numerical_jacobian(
    f: impl Fn(&DVector<f64>) -> DVector<f64>,
    x: &DVector<f64>,
    out_dim: usize,
) -> DMatrix<f64> {
    let n = x.len();
    let mut jac = DMatrix::zeros(out_dim, n);
    for j in 0..n {
        let mut xp = x.clone();
        let mut xm = x.clone();
        xp[j] += FD_STEP;
        xm[j] -= FD_STEP;
        let fp = f(&xp);
        let fm = f(&xm);
        for i in 0..out_dim {
            jac[(i, j)] = (fp[i] - fm[i]) / (2.0 * FD_STEP);
        }
    }
    jac
}
