//! Allow-rate versus block-rate scoring of one indexed sequence

use serde::{Deserialize, Serialize};

/// Minimum per-class total below which a candidate scores zero
pub const MIN_SAMPLES: i64 = 3;

/// Snapshot of the counters for one sequence identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RuleCandidate {
    /// Record index of the sequence in its sequence log
    pub index: i64,
    pub allow_count: i64,
    pub allow_total: i64,
    pub block_count: i64,
    pub block_total: i64,
}

impl RuleCandidate {
    /// Allow rate minus block rate, or 0 without enough samples
    pub fn raw_score(&self) -> f64 {
        if self.allow_total < MIN_SAMPLES || self.block_total < MIN_SAMPLES {
            return 0.0;
        }

        let allow = self.allow_count as f64 / self.allow_total as f64;
        let block = self.block_count as f64 / self.block_total as f64;
        allow - block
    }

    /// Magnitude of the discrimination
    pub fn score(&self) -> f64 {
        self.raw_score().abs()
    }

    /// Whether this candidate strictly outscores `other`
    pub fn better_than(&self, other: &RuleCandidate) -> bool {
        self.score() > other.score()
    }

    /// `true` if the sequence should be required, `false` if forbidden
    pub fn require_forbid(&self) -> bool {
        self.raw_score() > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-9;

    fn candidate(
        allow_count: i64,
        allow_total: i64,
        block_count: i64,
        block_total: i64,
    ) -> RuleCandidate {
        RuleCandidate {
            index: 0,
            allow_count,
            allow_total,
            block_count,
            block_total,
        }
    }

    #[test]
    fn test_allow_correlated_sequence_is_required() {
        let c = candidate(8, 10, 2, 10);
        assert!((c.score() - 0.6).abs() < EPSILON);
        assert!(c.require_forbid());
    }

    #[test]
    fn test_block_correlated_sequence_is_forbidden() {
        let c = candidate(2, 10, 8, 10);
        assert!((c.score() - 0.6).abs() < EPSILON);
        assert!(!c.require_forbid());
    }

    #[test]
    fn test_low_samples_score_zero() {
        assert_eq!(candidate(2, 2, 0, 10).score(), 0.0);
        assert_eq!(candidate(10, 10, 0, 2).score(), 0.0);
        assert!(!candidate(2, 2, 0, 10).require_forbid());
    }

    #[test]
    fn test_better_than_is_strict() {
        let a = candidate(8, 10, 2, 10);
        let b = candidate(2, 10, 8, 10);
        assert!(!a.better_than(&b));
        assert!(!b.better_than(&a));
        assert!(candidate(10, 10, 0, 10).better_than(&a));
    }
}
