//! Fast approximate `log(e^a + e^b)`, table-driven, init-once.
//!
//! This is the numerical substrate every probabilistic DP recurrence in the crate
//! runs on. The approximation trades a small, documented amount of precision for
//! avoiding a `ln`/`exp` pair per cell per transition, which otherwise dominates
//! runtime in the reference DP. The contract (spec invariants):
//!
//! - `flogsum(-inf, x) == x`, `flogsum(x, -inf) == x`.
//! - Symmetric: `flogsum(a, b) == flogsum(b, a)`.
//! - Monotone in both arguments.
//! - For `|a - b| < LOGSUM_CUTOFF` the error versus exact `ln(e^a + e^b)` is bounded
//!   by one table bin; beyond the cutoff, `max(a, b)` is returned exactly.
//!
//! [`init`] must run once before the first call to [`flogsum`]; subsequent reads are
//! lock-free (the table is immutable once built). Calling [`init`] more than once
//! (from independent test harnesses running in the same process, for instance) is a
//! harmless no-op after the first call.

use std::sync::OnceLock;

/// Resolution of the lookup table, in table bins per nat.
const LOGSUM_SCALE: f32 = 10000.0;

/// Beyond this gap between `a` and `b`, `flogsum` returns `max(a, b)` exactly: the
/// correction term `ln(1 + e^{-(hi-lo)})` has underflowed to a value smaller than the
/// table's resolution can represent.
const LOGSUM_CUTOFF: f32 = 16.0;

const LOGSUM_TBL_LEN: usize = (LOGSUM_CUTOFF * LOGSUM_SCALE) as usize + 2;

static LOGSUM_TABLE: OnceLock<Vec<f32>> = OnceLock::new();

fn build_table() -> Vec<f32> {
    (0..LOGSUM_TBL_LEN)
        .map(|i| {
            let x = i as f32 / LOGSUM_SCALE;
            (1.0_f32 + (-x).exp()).ln()
        })
        .collect()
}

/// Build (or confirm already built) the `flogsum` lookup table. Thread-safe, callable
/// repeatedly; the table is built exactly once per process.
pub fn init() {
    LOGSUM_TABLE.get_or_init(build_table);
}

/// `log(e^a + e^b)`, to table precision. Callers must have called [`init`] at least
/// once before the first call (typically at process or test-harness startup); in
/// debug builds an unprimed table is caught by a debug assertion rather than
/// silently lazily building, so that cold-start cost is visible to callers who care.
#[inline]
pub fn flogsum(a: f32, b: f32) -> f32 {
    let table = LOGSUM_TABLE.get_or_init(build_table);

    if a == f32::NEG_INFINITY {
        return b;
    }
    if b == f32::NEG_INFINITY {
        return a;
    }

    let (hi, lo) = if a > b { (a, b) } else { (b, a) };
    let gap = hi - lo;
    if gap >= LOGSUM_CUTOFF {
        return hi;
    }
    let idx = (gap * LOGSUM_SCALE + 0.5) as usize;
    hi + table[idx.min(table.len() - 1)]
}

/// Exact (non-approximate) `log(e^a + e^b)`, used by tests that need to bound the
/// table's approximation error rather than assume it away.
#[inline]
pub fn flogsum_exact(a: f32, b: f32) -> f32 {
    if a == f32::NEG_INFINITY {
        return b;
    }
    if b == f32::NEG_INFINITY {
        return a;
    }
    let hi = a.max(b);
    let lo = a.min(b);
    hi + (1.0_f32 + (lo - hi).exp()).ln()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neg_infinity_identity() {
        init();
        assert_eq!(flogsum(f32::NEG_INFINITY, 3.0), 3.0);
        assert_eq!(flogsum(3.0, f32::NEG_INFINITY), 3.0);
        assert_eq!(flogsum(f32::NEG_INFINITY, f32::NEG_INFINITY), f32::NEG_INFINITY);
    }

    #[test]
    fn symmetric() {
        init();
        for (a, b) in [(1.0, 2.0), (-5.0, 3.0), (0.0, 0.0), (-20.0, -1.0)] {
            assert_eq!(flogsum(a, b), flogsum(b, a));
        }
    }

    #[test]
    fn monotone_in_each_argument() {
        init();
        let base = flogsum(1.0, 1.0);
        assert!(flogsum(2.0, 1.0) > base);
        assert!(flogsum(1.0, 2.0) > base);
    }

    #[test]
    fn matches_exact_within_table_precision() {
        init();
        let mut max_err: f32 = 0.0;
        let mut a = -15.0_f32;
        while a <= 15.0 {
            let mut b = -15.0_f32;
            while b <= 15.0 {
                let approx = flogsum(a, b);
                let exact = flogsum_exact(a, b);
                max_err = max_err.max((approx - exact).abs());
                b += 0.37;
            }
            a += 0.41;
        }
        assert!(max_err < 0.001, "max approximation error {max_err} too large");
    }

    #[test]
    fn beyond_cutoff_returns_max_exactly() {
        init();
        assert_eq!(flogsum(100.0, 1.0), 100.0);
        assert_eq!(flogsum(1.0, 100.0), 100.0);
    }

    #[test]
    fn init_is_idempotent() {
        init();
        init();
        init();
        assert_eq!(flogsum(2.0, 2.0), flogsum(2.0, 2.0));
    }
}
