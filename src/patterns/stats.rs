//! Confidence and recency-decay math for distilled patterns.
//!
//! Confidence is the lower bound of a 95% Wilson score interval over the
//! binomial success proportion. It is deliberately conservative versus the
//! naive rate: small samples are penalized, so a single lucky success never
//! produces a falsely confident pattern.

use super::types::Reliability;

/// z-score for a 95% confidence interval
pub const WILSON_Z: f64 = 1.96;

/// Lower bound of the 95% Wilson score interval, clamped to [0, 1]
pub fn wilson_lower_bound(successes: usize, attempts: usize) -> f64 {
    if attempts == 0 {
        return 0.0;
    }

    let n = attempts as f64;
    let p_hat = successes.min(attempts) as f64 / n;
    let z = WILSON_Z;
    let z2 = z * z;

    let center = p_hat + z2 / (2.0 * n);
    let spread = z * (p_hat * (1.0 - p_hat) / n + z2 / (4.0 * n * n)).sqrt();
    let bound = (center - spread) / (1.0 + z2 / n);

    bound.clamp(0.0, 1.0)
}

/// Exponential recency decay: halves for every `half_life_ms` of age
pub fn decay_factor(age_ms: f64, half_life_ms: f64) -> f64 {
    if half_life_ms <= 0.0 {
        return 1.0;
    }
    0.5_f64.powf(age_ms.max(0.0) / half_life_ms)
}

/// Reliability ladder over confidence and sample size
pub fn reliability(confidence: f64, attempts: usize) -> Reliability {
    if attempts < 5 {
        Reliability::Uncertain
    } else if confidence >= 0.7 && attempts >= 10 {
        Reliability::High
    } else if confidence >= 0.5 && attempts >= 7 {
        Reliability::Medium
    } else if confidence >= 0.3 {
        Reliability::Low
    } else {
        Reliability::Uncertain
    }
}
