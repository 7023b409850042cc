//! Crate root: public surface and module-wide invariants.
//!
//! This module is the **single canonical entry-point** for downstream users of
//! the library. It re-exports the submodules that implement profile HMM
//! dynamic programming over a finite, digitized alphabet.
//!
//! ## Invariants
//!
//! - **Scores are log-probabilities.** Every score this crate produces or
//!   consumes is a natural-log probability (or log-odds against a background
//!   null model for emissions), always `<= 0`, with `f32::NEG_INFINITY`
//!   permitted to mean "impossible." `NaN` is never a valid score.
//!
//! - **`flogsum` is the numerical substrate.** Forward/Backward/Decoding never
//!   call `ln`/`exp` directly in the hot loop; they combine alternative paths via
//!   [`logsum::flogsum`], a table-driven approximation primed once by
//!   [`logsum::init`]. Viterbi instead combines by `max`.
//!
//! - **Off-by-one entry storage.** `L -> M_k` / `G -> M_k` entry scores are
//!   stored at `tsc(k-1, Lm/Gm)`; see [`profile::Profile::lm_entry`] and
//!   [`profile::Profile::gm_entry`].
//!
//! - **Wing retraction.** A glocal entry `G -> M_k` for `k > 1` represents a
//!   folded `D_{G,1} .. D_{G,k-1}` chain; traceback and trace scoring unfold it
//!   explicitly rather than storing per-step scores for it (see
//!   [`trace::Trace::score`]).
//!
//! - **No panics in non-test code.** Every fallible operation returns
//!   [`error::PhmmError`] via [`error::Result`]; the only place `unwrap()`/
//!   `expect()` appear outside `#[cfg(test)]` is where a prior check in the same
//!   function has already made the branch infallible.
//!
//! This crate does not choose an alphabet, read profile/alignment file formats,
//! or provide a command-line driver; those are external collaborators' concerns
//! (spec.md Non-goals).

#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms)]

/// Alphabet-agnostic digital sequence representation.
pub mod alphabet;
/// Anchor-set-constrained (ASC) dynamic programming.
pub mod asc;
/// Checkpointed (`O(sqrt(L))`-memory) Forward/Backward.
pub mod checkpoint;
/// Sampling traces and residues directly from a profile.
pub mod emission;
/// Crate-wide error type.
pub mod error;
/// Fast approximate `log(e^a + e^b)`, table-driven.
pub mod logsum;
/// Dense reference DP matrix.
pub mod matrix;
/// Query profile: emissions, transitions, flanking states.
pub mod profile;
/// RNG collaborator boundary (stochastic traceback, emission).
pub mod rng;
/// Reference (dense) Viterbi / Forward / Backward / Decoding / Alignment.
pub mod reference;
/// Sparse (prefilter-masked) dynamic programming.
pub mod sparse;
/// Traceback: reconstructive and stochastic.
pub mod traceback;
/// Ordered state path through a profile, with domain indexing and validation.
pub mod trace;

pub use alphabet::DigitalSequence;
pub use error::{PhmmError, Result};
pub use matrix::{DenseMatrix, MatrixKind};
pub use profile::Profile;
pub use trace::{Trace, TraceState};

/// Initialize process-wide shared state (currently: the [`logsum::flogsum`]
/// lookup table). Idempotent; callers may call this more than once, including
/// from independent test harnesses sharing a process, at no extra cost after
/// the first call. Not required before constructing a [`Profile`] or
/// [`DigitalSequence`] — only before running a DP recurrence that calls
/// `flogsum` (Forward, Backward, Decoding, their checkpointed/sparse/ASC
/// variants).
pub fn init() {
    logsum::init();
}
