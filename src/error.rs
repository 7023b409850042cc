//! Crate-wide error types.
//!
//! The core surfaces four error categories to callers, per the external-interfaces
//! contract: allocation failure, invalid argument, unreachable path (in traceback),
//! and an internal inconsistency (a reconstructive-traceback edge that fails to
//! match within float tolerance). These map 1:1 onto [`PhmmError`] variants so
//! callers can match on failure kind without parsing strings.

use thiserror::Error;

/// Errors surfaced by any DP entry point, matrix operation, or traceback routine.
#[derive(Debug, Error)]
pub enum PhmmError {
    /// A matrix grow/create call could not obtain the memory it needed.
    #[error("allocation failure: {0}")]
    AllocFail(String),

    /// Bad caller input: profile/sequence mismatch, non-increasing anchors, M=0, etc.
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    /// Stochastic traceback (or any trace consumer that cannot tolerate an empty
    /// trace) was asked to trace back from a cell whose value is -infinity.
    #[error("unreachable path at state={state}, k={k}, i={i}")]
    UnreachablePath {
        state: &'static str,
        k: usize,
        i: usize,
    },

    /// Reconstructive traceback could not find any incoming edge whose recomputed
    /// score matches the stored cell value within tolerance. Indicates a bug in the
    /// DP fill, not a property of the input.
    #[error("internal traceback inconsistency at state={state}, k={k}, i={i}: stored={stored}, best_candidate={best_candidate}")]
    Internal {
        state: &'static str,
        k: usize,
        i: usize,
        stored: f32,
        best_candidate: f32,
    },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PhmmError>;
