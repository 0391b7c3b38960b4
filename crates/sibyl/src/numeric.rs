//! Tolerant floating-point comparison and base-2 log-space arithmetic.
//!
//! Every probability in the engine is carried in log2 space until the last
//! possible moment; `log_add` is the accumulation primitive for the
//! partition function, where terms routinely differ by hundreds of orders
//! of magnitude.

use serde::{Deserialize, Serialize};

/// Tolerant floating-point comparator.
///
/// Passed explicitly into anything that needs fuzzy comparison, rather than
/// living in a shared static.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Precision {
    pub epsilon: f64,
}

impl Default for Precision {
    fn default() -> Self {
        Self { epsilon: 1e-9 }
    }
}

impl Precision {
    pub fn new(epsilon: f64) -> Self {
        Self { epsilon }
    }

    pub fn is_zero(&self, d: f64) -> bool {
        d.abs() <= self.epsilon
    }

    pub fn is_nonzero(&self, d: f64) -> bool {
        d.abs() > self.epsilon
    }

    pub fn is_pos(&self, d: f64) -> bool {
        d > self.epsilon
    }

    pub fn is_neg(&self, d: f64) -> bool {
        d < -self.epsilon
    }

    pub fn is_nonneg(&self, d: f64) -> bool {
        d >= -self.epsilon
    }

    pub fn is_equal(&self, a: f64, b: f64) -> bool {
        self.is_zero(b - a)
    }
}

/// Stable log-space addition: returns `log2(2^a + 2^b)`.
///
/// Always folds the smaller term into the larger, so the `2^(b-a)` factor
/// never overflows. `-inf` (a zero term) returns the other operand.
pub fn log_add(log_a: f64, log_b: f64) -> f64 {
    let (hi, lo) = if log_a >= log_b {
        (log_a, log_b)
    } else {
        (log_b, log_a)
    };

    if lo == f64::NEG_INFINITY {
        return hi;
    }

    (1.0 + (lo - hi).exp2()).log2() + hi
}

/// `log2` of `a * (a+1) * ... * b`, or 0 for an empty range.
pub fn sum_logs(a: u32, b: u32) -> f64 {
    (a..=b).map(|k| (k as f64).log2()).sum()
}

/// `log2` of the binomial coefficient `C(n, k)`.
pub fn log_binomial(n: u32, k: u32) -> f64 {
    debug_assert!(k <= n);
    sum_logs(k + 1, n) - sum_logs(2, n - k)
}

pub fn all_close(lhs: &[f64], rhs: &[f64], eps: f64) -> bool {
    lhs.len() == rhs.len()
        && lhs
            .iter()
            .zip(rhs.iter())
            .all(|(l, r)| (l - r).abs() <= eps)
}

#[cfg(test)]
mod test {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn precision_default() {
        let p = Precision::default();
        assert!(p.is_zero(5e-10));
        assert!(!p.is_zero(2e-9));
        assert!(p.is_pos(1e-8));
        assert!(!p.is_pos(1e-10));
        assert!(p.is_nonneg(-5e-10));
        assert!(p.is_equal(1.0, 1.0 + 1e-10));
    }

    #[test]
    fn log_add_matches_direct() {
        let a: f64 = 0.375;
        let b: f64 = 0.0625;
        let sum = log_add(a.log2(), b.log2());
        assert!((sum.exp2() - (a + b)).abs() < 1e-12);
    }

    #[test]
    fn log_add_extreme_magnitudes() {
        // the small term is far below representable linear precision but
        // must not destroy the large one
        let sum = log_add(-2000.0, 0.0);
        assert_eq!(sum, 0.0);
        assert_eq!(log_add(f64::NEG_INFINITY, -3.0), -3.0);
        assert_eq!(log_add(-3.0, f64::NEG_INFINITY), -3.0);
    }

    #[quickcheck]
    fn log_add_commutes(a: f64, b: f64) -> bool {
        if !a.is_finite() || !b.is_finite() {
            return true;
        }
        let a = a % 100.0;
        let b = b % 100.0;
        (log_add(a, b) - log_add(b, a)).abs() < 1e-12
    }

    #[test]
    fn binomial_small_values() {
        assert!((log_binomial(4, 2).exp2() - 6.0).abs() < 1e-9);
        assert!((log_binomial(5, 0).exp2() - 1.0).abs() < 1e-9);
        assert!((log_binomial(5, 5).exp2() - 1.0).abs() < 1e-9);
        assert!((log_binomial(10, 3).exp2() - 120.0).abs() < 1e-6);
    }

    #[test]
    fn binomial_large_n_stays_finite() {
        let lb = log_binomial(10_000, 5_000);
        assert!(lb.is_finite());
        assert!(lb > 0.0);
    }
}
