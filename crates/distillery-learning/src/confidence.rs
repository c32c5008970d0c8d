//! Confidence scoring for learned patterns.
//!
//! Everything here is pure arithmetic over counts, ages and rewards. The
//! final confidence blends three views of the same pattern:
//!
//! | Component | Formula |
//! |-----------|---------|
//! | Bayesian | mean of `Beta(positive + 1, negative + 1)` |
//! | Decayed | `current × 2^(-age_days / half_life_days)` |
//! | Reinforced | `current + lr × (reward - current)` |
//!
//! blended by [`AggregationWeights`] and clamped to `[0, 1]`.

use distillery_core::AppConfig;
use serde::Serialize;

const DEFAULT_HALF_LIFE_DAYS: f64 = 30.0;
const DEFAULT_LEARNING_RATE: f64 = 0.1;
const DEFAULT_OUTLIER_Z: f64 = 3.0;

/// Fewer prior observations than this and no submission is judged an outlier.
pub const MIN_OUTLIER_POPULATION: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AggregationWeights {
    pub bayesian: f64,
    pub decayed: f64,
    pub reinforced: f64,
}

impl Default for AggregationWeights {
    fn default() -> Self {
        Self {
            bayesian: 0.4,
            decayed: 0.3,
            reinforced: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScorerConfig {
    pub half_life_days: f64,
    pub learning_rate: f64,
    pub outlier_z_threshold: f64,
    pub weights: AggregationWeights,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            half_life_days: DEFAULT_HALF_LIFE_DAYS,
            learning_rate: DEFAULT_LEARNING_RATE,
            outlier_z_threshold: DEFAULT_OUTLIER_Z,
            weights: AggregationWeights::default(),
        }
    }
}

impl ScorerConfig {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            half_life_days: config.decay_half_life_days,
            learning_rate: config.learning_rate,
            outlier_z_threshold: config.outlier_z_threshold,
            weights: AggregationWeights {
                bayesian: config.weight_bayesian,
                decayed: config.weight_decayed,
                reinforced: config.weight_reinforced,
            },
        }
    }
}

/// Posterior summary of a pattern's positive/negative feedback counts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BayesianEstimate {
    pub alpha: f64,
    pub beta: f64,
    pub mean: f64,
    /// 2.5% quantile of the posterior.
    pub lower: f64,
    /// 97.5% quantile of the posterior.
    pub upper: f64,
}

/// Every component of one confidence update, for logging and analytics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConfidenceUpdate {
    pub bayesian: BayesianEstimate,
    pub decayed: f64,
    pub reinforced: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConfidenceScorer {
    config: ScorerConfig,
}

impl ConfidenceScorer {
    #[must_use]
    pub fn new(config: ScorerConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    /// Beta posterior with a uniform prior. Negative counts are treated as 0.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn bayesian(&self, positive: i64, negative: i64) -> BayesianEstimate {
        let alpha = positive.max(0) as f64 + 1.0;
        let beta = negative.max(0) as f64 + 1.0;
        BayesianEstimate {
            alpha,
            beta,
            mean: alpha / (alpha + beta),
            lower: beta_quantile(0.025, alpha, beta),
            upper: beta_quantile(0.975, alpha, beta),
        }
    }

    /// `2^(-age_days / half_life)`, in `(0, 1]`. Negative ages count as fresh.
    #[must_use]
    pub fn decay_factor(&self, age_days: f64) -> f64 {
        if !age_days.is_finite() || age_days <= 0.0 || self.config.half_life_days <= 0.0 {
            return 1.0;
        }
        (-age_days / self.config.half_life_days).exp2()
    }

    #[must_use]
    pub fn decayed(&self, confidence: f64, age_days: f64) -> f64 {
        clamp_unit(confidence * self.decay_factor(age_days))
    }

    /// One reinforcement step towards `reward` (0 or 1).
    #[must_use]
    pub fn reinforce(&self, current: f64, reward: f64) -> f64 {
        let current = clamp_unit(current);
        clamp_unit(current + self.config.learning_rate * (reward - current))
    }

    #[must_use]
    pub fn aggregate(&self, bayesian: f64, decayed: f64, reinforced: f64) -> f64 {
        let w = self.config.weights;
        clamp_unit(w.bayesian * bayesian + w.decayed * decayed + w.reinforced * reinforced)
    }

    /// Score a pattern after its counts already include the new feedback.
    #[must_use]
    pub fn update(
        &self,
        current: f64,
        positive: i64,
        negative: i64,
        age_days: f64,
        reward: f64,
    ) -> ConfidenceUpdate {
        let bayesian = self.bayesian(positive, negative);
        let decayed = self.decayed(current, age_days);
        let reinforced = self.reinforce(current, reward);
        ConfidenceUpdate {
            bayesian,
            decayed,
            reinforced,
            confidence: self.aggregate(bayesian.mean, decayed, reinforced),
        }
    }

    /// Whether `value` sits more than the configured number of standard
    /// deviations from the mean of `population`.
    ///
    /// Small or constant populations never produce outliers.
    #[must_use]
    pub fn is_outlier(&self, value: f64, population: &[f64]) -> bool {
        z_score(value, population)
            .is_some_and(|z| z.abs() > self.config.outlier_z_threshold)
    }
}

/// Population z-score of `value`, or `None` when the population is too small
/// or has no spread.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn z_score(value: f64, population: &[f64]) -> Option<f64> {
    let finite: Vec<f64> = population.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.len() < MIN_OUTLIER_POPULATION || !value.is_finite() {
        return None;
    }
    let n = finite.len() as f64;
    let mean = finite.iter().sum::<f64>() / n;
    let variance = finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();
    if stddev <= f64::EPSILON {
        return None;
    }
    Some((value - mean) / stddev)
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

// ---------------------------------------------------------------------------
// Beta distribution helpers
// ---------------------------------------------------------------------------

const LANCZOS_G: f64 = 7.0;
const LANCZOS_COEFFICIENTS: [f64; 9] = [
    0.999_999_999_999_809_9,
    676.520_368_121_885_1,
    -1_259.139_216_722_402_8,
    771.323_428_777_653_1,
    -176.615_029_162_140_6,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_572e-6,
    1.505_632_735_149_311_6e-7,
];

#[allow(clippy::cast_precision_loss)]
fn ln_gamma(x: f64) -> f64 {
    if x < 0.5 {
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let t = x + LANCZOS_G + 0.5;
    let mut series = LANCZOS_COEFFICIENTS[0];
    for (i, coefficient) in LANCZOS_COEFFICIENTS.iter().enumerate().skip(1) {
        series += coefficient / (x + i as f64);
    }
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + series.ln()
}

/// Continued fraction for the incomplete beta function (modified Lentz).
fn beta_continued_fraction(a: f64, b: f64, x: f64) -> f64 {
    const MAX_ITERATIONS: u32 = 300;
    const EPSILON: f64 = 3.0e-14;
    const TINY: f64 = 1.0e-300;

    let nonzero = |v: f64| if v.abs() < TINY { TINY } else { v };

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;
    let mut c = 1.0;
    let mut d = 1.0 / nonzero(1.0 - qab * x / qap);
    let mut h = d;

    for m in 1..=MAX_ITERATIONS {
        let m = f64::from(m);
        let m2 = 2.0 * m;

        let even = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 / nonzero(1.0 + even * d);
        c = nonzero(1.0 + even / c);
        h *= d * c;

        let odd = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 / nonzero(1.0 + odd * d);
        c = nonzero(1.0 + odd / c);
        let delta = d * c;
        h *= delta;

        if (delta - 1.0).abs() < EPSILON {
            break;
        }
    }
    h
}

/// Regularized incomplete beta `I_x(a, b)`, i.e. the Beta CDF.
#[must_use]
pub fn beta_cdf(x: f64, a: f64, b: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let ln_front =
        ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(a, b, x) / a
    } else {
        1.0 - front * beta_continued_fraction(b, a, 1.0 - x) / b
    }
}

/// Inverse Beta CDF by bisection; accurate to ~1e-12.
#[must_use]
pub fn beta_quantile(p: f64, a: f64, b: f64) -> f64 {
    if p <= 0.0 {
        return 0.0;
    }
    if p >= 1.0 {
        return 1.0;
    }
    let (mut lo, mut hi) = (0.0_f64, 1.0_f64);
    for _ in 0..60 {
        let mid = 0.5 * (lo + hi);
        if beta_cdf(mid, a, b) < p {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn three_confirmations_from_scratch_give_point_eight() {
        let scorer = ConfidenceScorer::default();
        let estimate = scorer.bayesian(3, 0);
        assert!(close(estimate.mean, 0.8, 1e-12));
        assert!(close(estimate.alpha, 4.0, 1e-12));
        assert!(close(estimate.beta, 1.0, 1e-12));
    }

    #[test]
    fn credible_interval_matches_closed_form() {
        // Beta(4, 1) has CDF x^4, so the quantile of p is p^(1/4).
        let estimate = ConfidenceScorer::default().bayesian(3, 0);
        assert!(close(estimate.lower, 0.025_f64.powf(0.25), 1e-6));
        assert!(close(estimate.upper, 0.975_f64.powf(0.25), 1e-6));

        let uniform = ConfidenceScorer::default().bayesian(0, 0);
        assert!(close(uniform.mean, 0.5, 1e-12));
        assert!(close(uniform.lower, 0.025, 1e-6));
        assert!(close(uniform.upper, 0.975, 1e-6));
    }

    #[test]
    fn symmetric_posterior_has_symmetric_interval() {
        let estimate = ConfidenceScorer::default().bayesian(7, 7);
        assert!(close(estimate.lower, 1.0 - estimate.upper, 1e-6));
        assert!(estimate.lower < estimate.mean && estimate.mean < estimate.upper);
    }

    #[test]
    fn decay_halves_every_half_life() {
        let scorer = ConfidenceScorer::default();
        assert!(close(scorer.decay_factor(0.0), 1.0, 1e-12));
        assert!(close(scorer.decay_factor(30.0), 0.5, 1e-12));
        assert!(close(scorer.decay_factor(60.0), 0.25, 1e-12));
        assert!(close(scorer.decayed(0.8, 30.0), 0.4, 1e-12));
    }

    #[test]
    fn negative_age_is_treated_as_fresh() {
        let scorer = ConfidenceScorer::default();
        assert!(close(scorer.decay_factor(-5.0), 1.0, 1e-12));
        assert!(close(scorer.decayed(0.7, -5.0), 0.7, 1e-12));
    }

    #[test]
    fn decay_is_monotonic_in_age() {
        let scorer = ConfidenceScorer::default();
        let mut previous = scorer.decayed(0.9, 0.0);
        for day in 1..=120 {
            let next = scorer.decayed(0.9, f64::from(day));
            assert!(next <= previous);
            previous = next;
        }
    }

    #[test]
    fn reinforcement_moves_towards_reward() {
        let scorer = ConfidenceScorer::default();
        assert!(close(scorer.reinforce(0.5, 1.0), 0.55, 1e-12));
        assert!(close(scorer.reinforce(0.5, 0.0), 0.45, 1e-12));
    }

    #[test]
    fn aggregate_uses_weights_and_clamps() {
        let scorer = ConfidenceScorer::default();
        assert!(close(scorer.aggregate(0.8, 0.5, 0.55), 0.635, 1e-12));
        assert!(close(scorer.aggregate(2.0, 2.0, 2.0), 1.0, 1e-12));
        assert!(close(scorer.aggregate(-1.0, 0.0, 0.0), 0.0, 1e-12));
        assert!(close(scorer.aggregate(f64::NAN, 0.0, 0.0), 0.0, 1e-12));
    }

    #[test]
    fn updates_stay_within_bounds() {
        let scorer = ConfidenceScorer::default();
        let mut confidence = 0.5;
        let (mut positive, mut negative) = (0, 0);
        for step in 0..200 {
            let reward = if step % 3 == 0 { 0.0 } else { 1.0 };
            if reward > 0.5 {
                positive += 1;
            } else {
                negative += 1;
            }
            let update = scorer.update(confidence, positive, negative, f64::from(step % 40), reward);
            assert!((0.0..=1.0).contains(&update.confidence));
            confidence = update.confidence;
        }
    }

    #[test]
    fn extreme_self_reported_confidence_is_an_outlier() {
        let scorer = ConfidenceScorer::default();
        let population = [0.8, 0.9, 0.85, 0.8, 0.9, 0.85, 0.8, 0.9, 0.85, 0.8, 0.9, 0.85];
        assert!(scorer.is_outlier(0.0, &population));
        assert!(!scorer.is_outlier(0.82, &population));
    }

    #[test]
    fn small_or_flat_populations_never_flag_outliers() {
        let scorer = ConfidenceScorer::default();
        assert!(!scorer.is_outlier(0.0, &[0.9, 0.8, 0.85]));
        assert!(!scorer.is_outlier(0.0, &[0.9; 10]));
    }
}
