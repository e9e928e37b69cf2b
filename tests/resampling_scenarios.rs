//! S4 and testable property 3 (resampler unbiasedness) across all three
//! schemes.

use pfilter::{resample_indices, ResamplingScheme};
use rand_pcg::Pcg64Mcg;

/// S4: given log-weights log([0.1, 0.2, 0.3, 0.4]), 1e5 systematic
/// resamples should yield child-count proportions within 0.005 of
/// [0.1, 0.2, 0.3, 0.4].
#[test]
fn s4_systematic_resampler_round_trip() {
    let weights = [0.1_f64, 0.2, 0.3, 0.4];
    let log_w: Vec<f64> = weights.iter().map(|w| w.ln()).collect();
    let mut rng = Pcg64Mcg::new(42);
    let n = 100_000;
    let idx = resample_indices(&log_w, n, ResamplingScheme::Systematic, &mut rng);

    let mut counts = [0usize; 4];
    for i in idx {
        counts[i] += 1;
    }
    for k in 0..4 {
        let freq = counts[k] as f64 / n as f64;
        assert!((freq - weights[k]).abs() < 0.005, "freq {freq} vs weight {}", weights[k]);
    }
}

/// Property 3: for every resampling scheme, averaged over >=1e4 draws, the
/// empirical child-count of each index is within 3 sigma of N*normalize(w).
#[test]
fn property_3_resampler_unbiasedness_across_schemes() {
    let weights = [0.05_f64, 0.15, 0.3, 0.5];
    let log_w: Vec<f64> = weights.iter().map(|w| w.ln()).collect();
    let n = 20_000usize;

    for (seed, scheme) in [
        (10u64, ResamplingScheme::Multinomial),
        (11u64, ResamplingScheme::Systematic),
        (12u64, ResamplingScheme::Stratified),
    ] {
        let mut rng = Pcg64Mcg::new(seed);
        let idx = resample_indices(&log_w, n, scheme, &mut rng);
        let mut counts = [0usize; 4];
        for i in idx {
            counts[i] += 1;
        }
        for k in 0..4 {
            let p = weights[k];
            let expected = n as f64 * p;
            let sigma = (n as f64 * p * (1.0 - p)).sqrt();
            let observed = counts[k] as f64;
            assert!(
                (observed - expected).abs() < 3.0 * sigma.max(1.0),
                "scheme {scheme:?} index {k}: observed {observed}, expected {expected}, sigma {sigma}"
            );
        }
    }
}
