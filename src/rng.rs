//! RNG collaborator boundary.
//!
//! The core never chooses an RNG algorithm; it only consumes "a source of uniform
//! random floats on `[0,1)`", per the external-interfaces contract. [`Rng01`] is that
//! boundary trait. We ship one concrete, deterministic-for-a-seed implementation
//! backed by `rand`'s `StdRng`, since that is the RNG crate already in use across the
//! retrieval pack (the teacher crate seeds `StdRng` the same way for its SRS
//! ceremony).

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A source of uniform random floats on `[0, 1)`.
pub trait Rng01 {
    /// Draw one uniform sample in `[0, 1)`.
    fn next_f64(&mut self) -> f64;
}

/// A `StdRng`-backed [`Rng01`], deterministic given a seed.
pub struct StdRng01(StdRng);

impl StdRng01 {
    /// Seed a new generator deterministically.
    pub fn seed_from_u64(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }

    /// Seed from OS entropy (non-deterministic).
    pub fn from_entropy() -> Self {
        Self(StdRng::from_entropy())
    }
}

impl Rng01 for StdRng01 {
    #[inline]
    fn next_f64(&mut self) -> f64 {
        self.0.gen_range(0.0..1.0)
    }
}

/// Sample an index from a (not necessarily normalized) slice of non-negative
/// weights, via a single draw from `rng`. Used by stochastic traceback (sampling an
/// incoming edge) and by emission (sampling a next state / residue).
///
/// If `weights` sums to zero, returns `None` (no legal edge to sample).
pub fn sample_categorical(rng: &mut dyn Rng01, weights: &[f32]) -> Option<usize> {
    let total: f32 = weights.iter().sum();
    if total <= 0.0 || !total.is_finite() {
        return None;
    }
    let draw = rng.next_f64() as f32 * total;
    let mut acc = 0.0_f32;
    for (i, &w) in weights.iter().enumerate() {
        acc += w;
        if draw < acc {
            return Some(i);
        }
    }
    // Floating-point rounding: fall back to the last nonzero-weight index.
    weights.iter().rposition(|&w| w > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorical_respects_zero_weights() {
        let mut rng = StdRng01::seed_from_u64(1);
        for _ in 0..50 {
            let idx = sample_categorical(&mut rng, &[0.0, 5.0, 0.0]).unwrap();
            assert_eq!(idx, 1);
        }
    }

    #[test]
    fn categorical_all_zero_is_none() {
        let mut rng = StdRng01::seed_from_u64(1);
        assert_eq!(sample_categorical(&mut rng, &[0.0, 0.0]), None);
    }

    #[test]
    fn deterministic_for_seed() {
        let mut r1 = StdRng01::seed_from_u64(42);
        let mut r2 = StdRng01::seed_from_u64(42);
        let seq1: Vec<f64> = (0..10).map(|_| r1.next_f64()).collect();
        let seq2: Vec<f64> = (0..10).map(|_| r2.next_f64()).collect();
        assert_eq!(seq1, seq2);
    }
}
