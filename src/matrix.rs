//! Dense reference DP matrix: an `(L+1) x (M+1)` array of 6-float main supercells
//! plus a 9-float specials supercell per row.
//!
//! Row `i` lays out as `[main(k=0) main(k=1) .. main(k=M) specials]`, matching the
//! layout `reference_fwdback.c` relies on (so that a special-cell lookup is always
//! `row[(M+1)*NSCELLS ..]`). Growing to a larger `(M, L)` reallocates; growing to a
//! smaller or equal shape reuses the existing buffer without freeing it, per spec.md
//! §3.4's "grow/reuse" clause.

use crate::error::{PhmmError, Result};
use crate::profile::{MainCell, Special, NSCELLS, NXCELLS};

/// Which recurrence last filled a [`DenseMatrix`]; purely informational (used in
/// `Debug`/dump output and to catch programmer errors early, e.g. running
/// `Decoding` logic against a matrix tagged `Viterbi`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixKind {
    Viterbi,
    Forward,
    Backward,
    Decoding,
    Alignment,
    Uninitialized,
}

/// A dense `(L+1) x (M+1)` DP matrix of main and special score cells.
#[derive(Debug, Clone)]
pub struct DenseMatrix {
    m: usize,
    l: usize,
    /// Allocated row capacity (>= current `l+1`); never shrinks.
    alloc_l: usize,
    /// Allocated per-row main-cell capacity in nodes (>= current `m+1`).
    alloc_m: usize,
    row_width: usize,
    dp: Vec<f32>,
    pub kind: MatrixKind,
}

impl DenseMatrix {
    /// Allocate a fresh matrix sized for model length `m` and sequence length `l`.
    pub fn new(m: usize, l: usize) -> Result<Self> {
        let mut mx = Self {
            m: 0,
            l: 0,
            alloc_l: 0,
            alloc_m: 0,
            row_width: 0,
            dp: Vec::new(),
            kind: MatrixKind::Uninitialized,
        };
        mx.grow_to(m, l)?;
        Ok(mx)
    }

    #[inline]
    pub fn m(&self) -> usize {
        self.m
    }

    #[inline]
    pub fn l(&self) -> usize {
        self.l
    }

    #[inline]
    fn row_width_for(m: usize) -> usize {
        (m + 1) * NSCELLS + NXCELLS
    }

    /// Reallocate (if needed) so the matrix can hold model length `m` and sequence
    /// length `l`. Reusable: growing to a shape that already fits the current
    /// allocation is free (no reallocation, existing capacity is just reinterpreted
    /// with the new logical `(m, l)`).
    pub fn grow_to(&mut self, m: usize, l: usize) -> Result<()> {
        if m == 0 {
            return Err(PhmmError::InvalidArg("matrix model length M must be positive".into()));
        }
        let need_realloc = m > self.alloc_m || l > self.alloc_l;
        if need_realloc {
            let new_alloc_m = m.max(self.alloc_m);
            let new_alloc_l = l.max(self.alloc_l);
            let row_width = Self::row_width_for(new_alloc_m);
            let total = row_width
                .checked_mul(new_alloc_l + 1)
                .ok_or_else(|| PhmmError::AllocFail("matrix size overflow".into()))?;
            let mut dp = vec![f32::NEG_INFINITY; total];
            std::mem::swap(&mut self.dp, &mut dp);
            self.alloc_m = new_alloc_m;
            self.alloc_l = new_alloc_l;
            self.row_width = row_width;
            tracing::debug!(m = new_alloc_m, l = new_alloc_l, bytes = total * 4, "dense matrix grown");
        }
        self.m = m;
        self.l = l;
        self.kind = MatrixKind::Uninitialized;
        Ok(())
    }

    /// Clear logical contents (fill with `-inf`) without freeing the backing
    /// allocation, so the matrix can be reused for a new, no-larger DP call.
    pub fn reuse(&mut self) {
        for v in self.dp.iter_mut() {
            *v = f32::NEG_INFINITY;
        }
        self.kind = MatrixKind::Uninitialized;
    }

    #[inline]
    fn row_offset(&self, i: usize) -> usize {
        i * self.row_width
    }

    /// Get a main-cell score at row `i`, node `k`, cell type `which`.
    #[inline]
    pub fn main(&self, i: usize, k: usize, which: MainCell) -> f32 {
        self.dp[self.row_offset(i) + k * NSCELLS + which as usize]
    }

    #[inline]
    pub fn set_main(&mut self, i: usize, k: usize, which: MainCell, v: f32) {
        let off = self.row_offset(i) + k * NSCELLS + which as usize;
        self.dp[off] = v;
    }

    /// Get a specials-cell score at row `i`.
    #[inline]
    pub fn special(&self, i: usize, which: Special) -> f32 {
        let off = self.row_offset(i) + (self.m + 1) * NSCELLS + which as usize;
        self.dp[off]
    }

    #[inline]
    pub fn set_special(&mut self, i: usize, which: Special, v: f32) {
        let off = self.row_offset(i) + (self.m + 1) * NSCELLS + which as usize;
        self.dp[off] = v;
    }

    /// Mutable access to an entire row's main-cell region, `[0..=M] x NSCELLS`
    /// floats, for the inner DP loop's pointer-stepping style. Specials follow
    /// immediately after in the same row.
    #[inline]
    pub fn row_mut(&mut self, i: usize) -> &mut [f32] {
        let off = self.row_offset(i);
        &mut self.dp[off..off + self.row_width]
    }

    #[inline]
    pub fn row(&self, i: usize) -> &[f32] {
        let off = self.row_offset(i);
        &self.dp[off..off + self.row_width]
    }

    /// Render the matrix as a human-readable table, for debugging. Mirrors the
    /// `p7_refmx_Dump`-style debug dumps in the original implementation, minus the
    /// SIMD-specific vector layout notes (not applicable to a dense `f32` matrix).
    pub fn dump(&self) -> String {
        use std::fmt::Write;
        let mut s = String::new();
        let _ = writeln!(s, "# DenseMatrix kind={:?} M={} L={}", self.kind, self.m, self.l);
        for i in 0..=self.l {
            let _ = write!(s, "i={i:>4} |");
            for k in 0..=self.m {
                let _ = write!(
                    s,
                    " k{k}:[{:.2},{:.2},{:.2},{:.2},{:.2},{:.2}]",
                    self.main(i, k, MainCell::ML),
                    self.main(i, k, MainCell::MG),
                    self.main(i, k, MainCell::IL),
                    self.main(i, k, MainCell::IG),
                    self.main(i, k, MainCell::DL),
                    self.main(i, k, MainCell::DG),
                );
            }
            let _ = writeln!(
                s,
                " | E={:.2} N={:.2} J={:.2} B={:.2} L={:.2} G={:.2} C={:.2} JJ={:.2} CC={:.2}",
                self.special(i, Special::E),
                self.special(i, Special::N),
                self.special(i, Special::J),
                self.special(i, Special::B),
                self.special(i, Special::L),
                self.special(i, Special::G),
                self.special(i, Special::C),
                self.special(i, Special::JJ),
                self.special(i, Special::CC),
            );
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grow_and_reuse_roundtrip() {
        let mut mx = DenseMatrix::new(5, 10).unwrap();
        mx.set_main(3, 2, MainCell::ML, 1.25);
        assert_eq!(mx.main(3, 2, MainCell::ML), 1.25);

        mx.reuse();
        assert_eq!(mx.main(3, 2, MainCell::ML), f32::NEG_INFINITY);

        // Growing to a smaller shape reuses storage (no crash, consistent reads).
        mx.grow_to(3, 4).unwrap();
        assert_eq!(mx.m(), 3);
        assert_eq!(mx.l(), 4);
    }

    #[test]
    fn grow_to_larger_preserves_addressability() {
        let mut mx = DenseMatrix::new(2, 2).unwrap();
        mx.grow_to(50, 200).unwrap();
        mx.set_special(200, Special::C, -3.0);
        assert_eq!(mx.special(200, Special::C), -3.0);
    }

    #[test]
    fn rejects_zero_m() {
        assert!(DenseMatrix::new(0, 10).is_err());
    }
}
