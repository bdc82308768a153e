//! Pure scoring math — cosine similarity, the composite relevance formula,
//! and exponential decay. No state, no I/O.

use chrono::{DateTime, Utc};

use crate::memory::types::ScoringWeights;

/// Cosine similarity between two vectors.
///
/// Returns 0.0 for mismatched lengths, empty vectors, or a zero norm on
/// either side.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for i in 0..a.len() {
        let (ai, bi) = (a[i] as f64, b[i] as f64);
        dot += ai * bi;
        norm_a += ai * ai;
        norm_b += bi * bi;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// The blended relevance score:
///
/// ```text
/// recency   = exp(-0.02 × days_since_access)
/// raw       = w.sim×similarity + w.sal×salience + w.rec×recency + w.link×link_weight
/// composite = raw × sector_weight
/// ```
///
/// No clamping — the result may exceed 1.0. Callers are responsible for
/// substituting 1.0 for a zero `sector_weight`.
pub fn composite_score(
    similarity: f64,
    salience: f64,
    days_since_access: f64,
    link_weight: f64,
    sector_weight: f64,
    weights: &ScoringWeights,
) -> f64 {
    let recency = (-0.02 * days_since_access).exp();
    let raw = weights.similarity * similarity
        + weights.salience * salience
        + weights.recency * recency
        + weights.link_weight * link_weight;
    raw * sector_weight
}

/// The exponential decay multiplier for a memory:
///
/// ```text
/// decay = exp(-λ × days / (salience + 0.1))
/// ```
///
/// Higher salience dampens decay; the +0.1 offset keeps the result finite
/// at zero salience.
pub fn decay_factor(lambda: f64, days_since_access: f64, salience: f64) -> f64 {
    (-lambda * days_since_access / (salience + 0.1)).exp()
}

/// Fractional days elapsed between a past instant and now.
pub fn days_since(t: DateTime<Utc>) -> f64 {
    let elapsed = Utc::now().signed_duration_since(t);
    elapsed.num_milliseconds() as f64 / 86_400_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_identical_vectors_is_one() {
        let v = vec![0.5f32, 0.5, 0.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_orthogonal_vectors_is_zero() {
        let a = vec![1.0f32, 0.0];
        let b = vec![0.0f32, 1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn cosine_opposite_vectors_is_negative_one() {
        let a = vec![1.0f32, 0.0];
        let b = vec![-1.0f32, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_degenerate_inputs_are_zero() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn composite_at_defaults_saturates_to_one() {
        let score = composite_score(1.0, 1.0, 0.0, 1.0, 1.0, &ScoringWeights::default());
        assert!((score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn composite_sector_weight_scales_linearly() {
        let w = ScoringWeights::default();
        let base = composite_score(0.8, 0.5, 3.0, 0.0, 1.0, &w);
        let doubled = composite_score(0.8, 0.5, 3.0, 0.0, 2.0, &w);
        assert!((doubled - 2.0 * base).abs() < 1e-9);
    }

    #[test]
    fn composite_recency_falls_off_with_age() {
        let w = ScoringWeights::default();
        let fresh = composite_score(0.0, 0.0, 0.0, 0.0, 1.0, &w);
        let stale = composite_score(0.0, 0.0, 90.0, 0.0, 1.0, &w);
        assert!(fresh > stale);
        assert!(stale > 0.0);
    }

    #[test]
    fn decay_high_salience_outlasts_low() {
        let weak = decay_factor(0.02, 30.0, 0.1);
        let strong = decay_factor(0.02, 30.0, 0.9);
        assert!(strong > weak);
    }

    #[test]
    fn decay_is_finite_at_zero_salience() {
        let f = decay_factor(0.05, 365.0, 0.0);
        assert!(f.is_finite());
        assert!(f > 0.0);
    }

    #[test]
    fn days_since_recent_instant_is_near_zero() {
        let d = days_since(Utc::now());
        assert!(d.abs() < 0.001);
    }
}
