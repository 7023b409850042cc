//! Reference (`O(ML)`-memory, full dense matrix) dynamic programming: Viterbi,
//! Forward, Backward, posterior Decoding, and gamma-centroid Alignment.
//!
//! All five recurrences share one structural skeleton (spec.md §4): they differ
//! only in which "combine" operation folds alternative paths into a cell (`max`
//! for Viterbi, [`flogsum`] for Forward/Backward) and in which direction the
//! sequence is walked. We do not abstract that skeleton behind a generic
//! "Semiring" trait here: the teacher's own DP code (`reference_fwdback.c`) writes
//! Forward and Backward as two concrete, separately-unrolled functions, matching
//! each row's exact operation order so the deferred-D-storage trick and the
//! wing-retracted glocal entry land in precisely the bit-for-bit positions
//! traceback later expects; a shared generic would blur that order behind a
//! closure call and invite the two recurrences to drift apart under future edits.

use crate::alphabet::DigitalSequence;
use crate::error::{PhmmError, Result};
use crate::logsum::flogsum;
use crate::matrix::{DenseMatrix, MatrixKind};
use crate::profile::{FlankMove, FlankState, MainCell, Profile, Special, Trans};

#[inline]
fn max2(a: f32, b: f32) -> f32 {
    if a >= b {
        a
    } else {
        b
    }
}

#[inline]
fn max4(a: f32, b: f32, c: f32, d: f32) -> f32 {
    max2(max2(a, b), max2(c, d))
}

fn check_args(profile: &Profile, dsq: &DigitalSequence) -> Result<()> {
    if dsq.kp() != profile.kp() {
        return Err(PhmmError::InvalidArg(format!(
            "sequence alphabet size {} does not match profile alphabet size {}",
            dsq.kp(),
            profile.kp()
        )));
    }
    Ok(())
}

/// Fill `mx` with the Viterbi (maximum-probability single path) matrix and return
/// the overall raw score `log P(dsq, best path | profile)`.
pub fn viterbi(profile: &Profile, dsq: &DigitalSequence, mx: &mut DenseMatrix) -> Result<f32> {
    check_args(profile, dsq)?;
    let m = profile.m();
    let l = dsq.len();
    mx.grow_to(m, l)?;
    mx.reuse();
    mx.kind = MatrixKind::Viterbi;

    // Row 0: no residues consumed yet. Only the flanking chain is populated.
    for k in 0..=m {
        mx.set_main(0, k, MainCell::ML, f32::NEG_INFINITY);
        mx.set_main(0, k, MainCell::MG, f32::NEG_INFINITY);
        mx.set_main(0, k, MainCell::IL, f32::NEG_INFINITY);
        mx.set_main(0, k, MainCell::IG, f32::NEG_INFINITY);
        mx.set_main(0, k, MainCell::DL, f32::NEG_INFINITY);
        mx.set_main(0, k, MainCell::DG, f32::NEG_INFINITY);
    }
    mx.set_special(0, Special::E, f32::NEG_INFINITY);
    mx.set_special(0, Special::N, 0.0);
    mx.set_special(0, Special::J, f32::NEG_INFINITY);
    let b0 = 0.0 + profile.xsc(FlankState::N, FlankMove::Move);
    mx.set_special(0, Special::B, b0);
    mx.set_special(0, Special::L, b0 + profile.xsc_b_local());
    mx.set_special(0, Special::G, b0 + profile.xsc_b_glocal());
    mx.set_special(0, Special::C, f32::NEG_INFINITY);
    mx.set_special(0, Special::JJ, f32::NEG_INFINITY);
    mx.set_special(0, Special::CC, f32::NEG_INFINITY);

    for i in 1..=l {
        let x = dsq.residue(i) as usize;
        for k in 0..=m {
            mx.set_main(i, k, MainCell::ML, f32::NEG_INFINITY);
            mx.set_main(i, k, MainCell::MG, f32::NEG_INFINITY);
            mx.set_main(i, k, MainCell::IL, f32::NEG_INFINITY);
            mx.set_main(i, k, MainCell::IG, f32::NEG_INFINITY);
        }
        let l_prev = mx.special(i - 1, Special::L);
        let g_prev = mx.special(i - 1, Special::G);
        let mut dl_carry = f32::NEG_INFINITY;
        let mut dg_carry = f32::NEG_INFINITY;
        let mut e = f32::NEG_INFINITY;

        for k in 1..=m {
            let ml = max4(
                mx.main(i - 1, k - 1, MainCell::ML) + profile.tsc(k - 1, Trans::Mm),
                mx.main(i - 1, k - 1, MainCell::IL) + profile.tsc(k - 1, Trans::Im),
                mx.main(i - 1, k - 1, MainCell::DL) + profile.tsc(k - 1, Trans::Dm),
                l_prev + profile.lm_entry(k),
            ) + profile.msc(k, x);
            let mg = max4(
                mx.main(i - 1, k - 1, MainCell::MG) + profile.tsc(k - 1, Trans::Mm),
                mx.main(i - 1, k - 1, MainCell::IG) + profile.tsc(k - 1, Trans::Im),
                mx.main(i - 1, k - 1, MainCell::DG) + profile.tsc(k - 1, Trans::Dm),
                g_prev + profile.gm_entry(k),
            ) + profile.msc(k, x);
            mx.set_main(i, k, MainCell::ML, ml);
            mx.set_main(i, k, MainCell::MG, mg);

            if k < m {
                let il = max2(
                    mx.main(i - 1, k, MainCell::ML) + profile.tsc(k, Trans::Mi),
                    mx.main(i - 1, k, MainCell::IL) + profile.tsc(k, Trans::Ii),
                ) + profile.isc(k, x);
                let ig = max2(
                    mx.main(i - 1, k, MainCell::MG) + profile.tsc(k, Trans::Mi),
                    mx.main(i - 1, k, MainCell::IG) + profile.tsc(k, Trans::Ii),
                ) + profile.isc(k, x);
                mx.set_main(i, k, MainCell::IL, il);
                mx.set_main(i, k, MainCell::IG, ig);
            }

            // Deferred D storage: write this row's D_{k} using the carry computed
            // from M/D at k-1, then roll the carry forward for k+1.
            mx.set_main(i, k, MainCell::DL, dl_carry);
            mx.set_main(i, k, MainCell::DG, dg_carry);
            dl_carry = max2(
                ml + profile.tsc(k, Trans::Md),
                dl_carry + profile.tsc(k, Trans::Dd),
            );
            dg_carry = max2(
                mg + profile.tsc(k, Trans::Md),
                dg_carry + profile.tsc(k, Trans::Dd),
            );

            // Local exit is allowed to leave from any M_L/D_L; glocal only from M_G=k=M.
            e = max4(e, ml, mx.main(i, k, MainCell::DL), f32::NEG_INFINITY);
            if k == m {
                e = max4(e, mg, dg_carry, f32::NEG_INFINITY);
            }
        }
        // k = M's deferred D carry never gets written (D_{M+1} doesn't exist); the
        // last `dl_carry`/`dg_carry` values were already folded into `e` above for k=m.

        let j_prev = mx.special(i - 1, Special::J);
        let c_prev = mx.special(i - 1, Special::C);
        let n = mx.special(i - 1, Special::N) + profile.xsc(FlankState::N, FlankMove::Loop);
        let j = max2(
            j_prev + profile.xsc(FlankState::J, FlankMove::Loop),
            e + profile.xsc(FlankState::E, FlankMove::Loop),
        );
        let b = max2(
            n + profile.xsc(FlankState::N, FlankMove::Move),
            j + profile.xsc(FlankState::J, FlankMove::Move),
        );
        let c = max2(
            c_prev + profile.xsc(FlankState::C, FlankMove::Loop),
            e + profile.xsc(FlankState::E, FlankMove::Move),
        );

        mx.set_special(i, Special::E, e);
        mx.set_special(i, Special::N, n);
        mx.set_special(i, Special::J, j);
        mx.set_special(i, Special::B, b);
        mx.set_special(i, Special::L, b + profile.xsc_b_local());
        mx.set_special(i, Special::G, b + profile.xsc_b_glocal());
        mx.set_special(i, Special::C, c);
        mx.set_special(i, Special::JJ, j);
        mx.set_special(i, Special::CC, c);
    }

    let sc = mx.special(l, Special::C) + profile.xsc(FlankState::C, FlankMove::Move);
    Ok(sc)
}

/// Fill `mx` with the Forward matrix and return `log P(dsq | profile)` summed over
/// all paths.
pub fn forward(profile: &Profile, dsq: &DigitalSequence, mx: &mut DenseMatrix) -> Result<f32> {
    check_args(profile, dsq)?;
    let m = profile.m();
    let l = dsq.len();
    mx.grow_to(m, l)?;
    mx.reuse();
    mx.kind = MatrixKind::Forward;

    mx.set_special(0, Special::E, f32::NEG_INFINITY);
    mx.set_special(0, Special::N, 0.0);
    mx.set_special(0, Special::J, f32::NEG_INFINITY);
    let b0 = 0.0 + profile.xsc(FlankState::N, FlankMove::Move);
    mx.set_special(0, Special::B, b0);
    mx.set_special(0, Special::L, b0 + profile.xsc_b_local());
    mx.set_special(0, Special::G, b0 + profile.xsc_b_glocal());
    mx.set_special(0, Special::C, f32::NEG_INFINITY);
    mx.set_special(0, Special::JJ, f32::NEG_INFINITY);
    mx.set_special(0, Special::CC, f32::NEG_INFINITY);

    for i in 1..=l {
        let x = dsq.residue(i) as usize;
        let l_prev = mx.special(i - 1, Special::L);
        let g_prev = mx.special(i - 1, Special::G);
        let mut dl_carry = f32::NEG_INFINITY;
        let mut dg_carry = f32::NEG_INFINITY;
        let mut e = f32::NEG_INFINITY;

        for k in 1..=m {
            let ml = flogsum(
                flogsum(
                    mx.main(i - 1, k - 1, MainCell::ML) + profile.tsc(k - 1, Trans::Mm),
                    mx.main(i - 1, k - 1, MainCell::IL) + profile.tsc(k - 1, Trans::Im),
                ),
                flogsum(
                    mx.main(i - 1, k - 1, MainCell::DL) + profile.tsc(k - 1, Trans::Dm),
                    l_prev + profile.lm_entry(k),
                ),
            ) + profile.msc(k, x);
            let mg = flogsum(
                flogsum(
                    mx.main(i - 1, k - 1, MainCell::MG) + profile.tsc(k - 1, Trans::Mm),
                    mx.main(i - 1, k - 1, MainCell::IG) + profile.tsc(k - 1, Trans::Im),
                ),
                flogsum(
                    mx.main(i - 1, k - 1, MainCell::DG) + profile.tsc(k - 1, Trans::Dm),
                    g_prev + profile.gm_entry(k),
                ),
            ) + profile.msc(k, x);
            mx.set_main(i, k, MainCell::ML, ml);
            mx.set_main(i, k, MainCell::MG, mg);

            if k < m {
                let il = flogsum(
                    mx.main(i - 1, k, MainCell::ML) + profile.tsc(k, Trans::Mi),
                    mx.main(i - 1, k, MainCell::IL) + profile.tsc(k, Trans::Ii),
                ) + profile.isc(k, x);
                let ig = flogsum(
                    mx.main(i - 1, k, MainCell::MG) + profile.tsc(k, Trans::Mi),
                    mx.main(i - 1, k, MainCell::IG) + profile.tsc(k, Trans::Ii),
                ) + profile.isc(k, x);
                mx.set_main(i, k, MainCell::IL, il);
                mx.set_main(i, k, MainCell::IG, ig);
            }

            mx.set_main(i, k, MainCell::DL, dl_carry);
            mx.set_main(i, k, MainCell::DG, dg_carry);
            dl_carry = flogsum(
                ml + profile.tsc(k, Trans::Md),
                dl_carry + profile.tsc(k, Trans::Dd),
            );
            dg_carry = flogsum(
                mg + profile.tsc(k, Trans::Md),
                dg_carry + profile.tsc(k, Trans::Dd),
            );

            e = flogsum(e, flogsum(ml, mx.main(i, k, MainCell::DL)));
            if k == m {
                e = flogsum(e, flogsum(mg, dg_carry));
            }
        }

        let j_prev = mx.special(i - 1, Special::J);
        let c_prev = mx.special(i - 1, Special::C);
        let n = mx.special(i - 1, Special::N) + profile.xsc(FlankState::N, FlankMove::Loop);
        let j = flogsum(
            j_prev + profile.xsc(FlankState::J, FlankMove::Loop),
            e + profile.xsc(FlankState::E, FlankMove::Loop),
        );
        let b = flogsum(
            n + profile.xsc(FlankState::N, FlankMove::Move),
            j + profile.xsc(FlankState::J, FlankMove::Move),
        );
        let c = flogsum(
            c_prev + profile.xsc(FlankState::C, FlankMove::Loop),
            e + profile.xsc(FlankState::E, FlankMove::Move),
        );

        mx.set_special(i, Special::E, e);
        mx.set_special(i, Special::N, n);
        mx.set_special(i, Special::J, j);
        mx.set_special(i, Special::B, b);
        mx.set_special(i, Special::L, b + profile.xsc_b_local());
        mx.set_special(i, Special::G, b + profile.xsc_b_glocal());
        mx.set_special(i, Special::C, c);
        mx.set_special(i, Special::JJ, j);
        mx.set_special(i, Special::CC, c);
    }

    let sc = mx.special(l, Special::C) + profile.xsc(FlankState::C, FlankMove::Move);
    Ok(sc)
}

/// Fill `mx` with the Backward matrix and return `log P(dsq | profile)`, which
/// should match [`forward`]'s result within `flogsum`'s table tolerance
/// (spec.md §8 item 2).
pub fn backward(profile: &Profile, dsq: &DigitalSequence, mx: &mut DenseMatrix) -> Result<f32> {
    check_args(profile, dsq)?;
    let m = profile.m();
    let l = dsq.len();
    mx.grow_to(m, l)?;
    mx.reuse();
    mx.kind = MatrixKind::Backward;

    // Row L init: only C/E/T are reachable without consuming more residues.
    mx.set_special(l, Special::C, profile.xsc(FlankState::C, FlankMove::Move));
    mx.set_special(l, Special::CC, mx.special(l, Special::C));
    mx.set_special(l, Special::E, mx.special(l, Special::C) + profile.xsc(FlankState::E, FlankMove::Move));
    mx.set_special(l, Special::J, f32::NEG_INFINITY);
    mx.set_special(l, Special::JJ, f32::NEG_INFINITY);
    mx.set_special(l, Special::B, f32::NEG_INFINITY);
    mx.set_special(l, Special::L, f32::NEG_INFINITY);
    mx.set_special(l, Special::G, f32::NEG_INFINITY);
    mx.set_special(l, Special::N, f32::NEG_INFINITY);
    for k in 0..=m {
        let e = mx.special(l, Special::E);
        mx.set_main(l, k, MainCell::ML, e);
        mx.set_main(l, k, MainCell::DL, e);
        mx.set_main(l, k, MainCell::MG, if k == m { e } else { f32::NEG_INFINITY });
        mx.set_main(l, k, MainCell::DG, if k == m { e } else { f32::NEG_INFINITY });
        mx.set_main(l, k, MainCell::IL, f32::NEG_INFINITY);
        mx.set_main(l, k, MainCell::IG, f32::NEG_INFINITY);
    }

    for i in (0..l).rev() {
        let x_next = dsq.residue(i + 1) as usize;

        // Specials at row i depend only on row i+1 (L/G feed from M/D at every k via
        // lm_entry/gm_entry), so they're computed before row i's main cells: the main
        // cell recurrence needs `to_e` (this row's own E), not a value left over from
        // `reuse()`.
        let mut l_val = f32::NEG_INFINITY;
        let mut g_val = f32::NEG_INFINITY;
        for k in 1..=m {
            l_val = flogsum(l_val, profile.lm_entry(k) + profile.msc(k, x_next) + mx.main(i + 1, k, MainCell::ML));
            g_val = flogsum(g_val, profile.gm_entry(k) + profile.msc(k, x_next) + mx.main(i + 1, k, MainCell::MG));
        }
        let b = flogsum(l_val + profile.xsc_b_local(), g_val + profile.xsc_b_glocal());
        let n = flogsum(
            mx.special(i + 1, Special::N) + profile.xsc(FlankState::N, FlankMove::Loop),
            b + profile.xsc(FlankState::N, FlankMove::Move),
        );
        let j = flogsum(
            mx.special(i + 1, Special::J) + profile.xsc(FlankState::J, FlankMove::Loop),
            b + profile.xsc(FlankState::J, FlankMove::Move),
        );
        let e = flogsum(
            j + profile.xsc(FlankState::E, FlankMove::Loop),
            mx.special(i + 1, Special::C) + profile.xsc(FlankState::E, FlankMove::Move),
        );
        let c = mx.special(i + 1, Special::C) + profile.xsc(FlankState::C, FlankMove::Loop);

        mx.set_special(i, Special::L, l_val);
        mx.set_special(i, Special::G, g_val);
        mx.set_special(i, Special::B, b);
        mx.set_special(i, Special::N, n);
        mx.set_special(i, Special::J, j);
        mx.set_special(i, Special::JJ, j);
        mx.set_special(i, Special::E, e);
        mx.set_special(i, Special::C, c);
        mx.set_special(i, Special::CC, c);

        // Main cells at row i depend on row i+1; computed high-k to low-k so the
        // D-state "suffix" sum (mirroring the forward deferred-store trick) can
        // accumulate in a single backward sweep over k. Every transition that
        // steps across into row i+1 must add that destination state's own
        // emission score (`forward` bakes a state's emission into the cell it
        // stores, so stepping into it from the previous row has to pay for it
        // here); same-row D-chain transitions never emit.
        let mut dl_suffix = f32::NEG_INFINITY;
        let mut dg_suffix = f32::NEG_INFINITY;
        for k in (1..=m).rev() {
            let to_m_l = if k < m {
                mx.main(i + 1, k + 1, MainCell::ML) + profile.msc(k + 1, x_next)
            } else {
                f32::NEG_INFINITY
            };
            let to_m_g = if k < m {
                mx.main(i + 1, k + 1, MainCell::MG) + profile.msc(k + 1, x_next)
            } else {
                f32::NEG_INFINITY
            };
            let to_i_l = if k < m {
                mx.main(i + 1, k, MainCell::IL) + profile.isc(k, x_next)
            } else {
                f32::NEG_INFINITY
            };
            let to_i_g = if k < m {
                mx.main(i + 1, k, MainCell::IG) + profile.isc(k, x_next)
            } else {
                f32::NEG_INFINITY
            };

            // Exit to E is always available (local exits anywhere, glocal only k=M).
            let to_e = e;

            let ml = flogsum(
                flogsum(profile.tsc(k, Trans::Mm) + to_m_l, profile.tsc(k, Trans::Mi) + to_i_l),
                profile.tsc(k, Trans::Md) + dl_suffix,
            );
            let ml = flogsum(ml, to_e);
            let mg = flogsum(
                flogsum(profile.tsc(k, Trans::Mm) + to_m_g, profile.tsc(k, Trans::Mi) + to_i_g),
                profile.tsc(k, Trans::Md) + dg_suffix,
            );
            let mg = if k == m { flogsum(mg, to_e) } else { mg };

            let dl = flogsum(profile.tsc(k, Trans::Dm) + to_m_l, profile.tsc(k, Trans::Dd) + dl_suffix);
            let dl = flogsum(dl, to_e);
            let dg = flogsum(profile.tsc(k, Trans::Dm) + to_m_g, profile.tsc(k, Trans::Dd) + dg_suffix);
            let dg = if k == m { flogsum(dg, to_e) } else { dg };

            mx.set_main(i, k, MainCell::ML, ml);
            mx.set_main(i, k, MainCell::MG, mg);
            mx.set_main(i, k, MainCell::DL, dl);
            mx.set_main(i, k, MainCell::DG, dg);

            if k > 1 {
                // I_{k-1}(i) steps into row i+1 too: to M_k via Im (emission
                // msc(k, x_next)), or to I_{k-1}(i+1) via Ii (emission
                // isc(k-1, x_next)). This only needs row i+1 data, not the
                // row-i M_k/M_{k-1} values computed in this sweep.
                let i_to_m_l = mx.main(i + 1, k, MainCell::ML) + profile.msc(k, x_next);
                let i_to_m_g = mx.main(i + 1, k, MainCell::MG) + profile.msc(k, x_next);
                let i_to_i_l = mx.main(i + 1, k - 1, MainCell::IL) + profile.isc(k - 1, x_next);
                let i_to_i_g = mx.main(i + 1, k - 1, MainCell::IG) + profile.isc(k - 1, x_next);
                let il = flogsum(
                    profile.tsc(k - 1, Trans::Im) + i_to_m_l,
                    profile.tsc(k - 1, Trans::Ii) + i_to_i_l,
                );
                let ig = flogsum(
                    profile.tsc(k - 1, Trans::Im) + i_to_m_g,
                    profile.tsc(k - 1, Trans::Ii) + i_to_i_g,
                );
                mx.set_main(i, k - 1, MainCell::IL, il);
                mx.set_main(i, k - 1, MainCell::IG, ig);
            }

            // `dl`/`dg` are D_k(i)'s own finished backward values (transition
            // score already folded in above); the next (lower) iteration
            // consumes them as-is via its own tsc(k-1, ..) lookup, so they
            // carry over unmodified rather than being re-transitioned here.
            dl_suffix = dl;
            dg_suffix = dg;
        }
        mx.set_main(i, 0, MainCell::ML, f32::NEG_INFINITY);
        mx.set_main(i, 0, MainCell::MG, f32::NEG_INFINITY);
        mx.set_main(i, 0, MainCell::DL, f32::NEG_INFINITY);
        mx.set_main(i, 0, MainCell::DG, f32::NEG_INFINITY);
    }

    Ok(mx.special(0, Special::N))
}

/// Posterior decoding: combine a Forward and Backward matrix (against the same
/// profile/sequence pair, with Forward's overall score `fwd_sc`) into per-cell
/// state-occupancy posterior probabilities, per spec.md §4.5.
pub fn decoding(
    profile: &Profile,
    dsq: &DigitalSequence,
    fwd: &DenseMatrix,
    bwd: &DenseMatrix,
    fwd_sc: f32,
    pp: &mut DenseMatrix,
) -> Result<()> {
    check_args(profile, dsq)?;
    let m = profile.m();
    let l = dsq.len();
    if fwd.m() != m || fwd.l() != l || bwd.m() != m || bwd.l() != l {
        return Err(PhmmError::InvalidArg(
            "decoding requires forward/backward matrices sized to match the profile and sequence".into(),
        ));
    }
    pp.grow_to(m, l)?;
    pp.reuse();
    pp.kind = MatrixKind::Decoding;

    for i in 0..=l {
        for k in 0..=m {
            for which in [MainCell::ML, MainCell::MG, MainCell::IL, MainCell::IG, MainCell::DL, MainCell::DG] {
                let post = (fwd.main(i, k, which) + bwd.main(i, k, which) - fwd_sc).exp();
                pp.set_main(i, k, which, post.clamp(0.0, 1.0));
            }
        }
        // E, B, L, G are non-emitting: the generic F*B/totsc quotient is the right
        // posterior for them (spec.md §4.3.4). N is also safe to compute this way:
        // unlike J/C, nothing but the self-loop ever feeds N(i), so fwd.N(i)+bwd.N(i)
        // already equals the loop-only contribution.
        for which in [Special::E, Special::N, Special::B, Special::L, Special::G] {
            let post = (fwd.special(i, which) + bwd.special(i, which) - fwd_sc).exp();
            pp.set_special(i, which, post.clamp(0.0, 1.0));
        }
        // J/C, by contrast, can be entered either by their own self-loop or fresh
        // from E on this same row; only the loop contribution counts as an emission,
        // so JJ/CC are computed from F(i-1)+loop+B(i), not from F(i)+B(i) directly.
        let (j_post, jj_post) = if i == 0 {
            (f32::NEG_INFINITY.exp(), 0.0)
        } else {
            let j = (fwd.special(i, Special::J) + bwd.special(i, Special::J) - fwd_sc).exp();
            let jj = (fwd.special(i - 1, Special::J)
                + profile.xsc(FlankState::J, FlankMove::Loop)
                + bwd.special(i, Special::J)
                - fwd_sc)
                .exp();
            (j, jj)
        };
        let (c_post, cc_post) = if i == 0 {
            (f32::NEG_INFINITY.exp(), 0.0)
        } else {
            let c = (fwd.special(i, Special::C) + bwd.special(i, Special::C) - fwd_sc).exp();
            let cc = (fwd.special(i - 1, Special::C)
                + profile.xsc(FlankState::C, FlankMove::Loop)
                + bwd.special(i, Special::C)
                - fwd_sc)
                .exp();
            (c, cc)
        };
        pp.set_special(i, Special::J, j_post.clamp(0.0, 1.0));
        pp.set_special(i, Special::JJ, jj_post.clamp(0.0, 1.0));
        pp.set_special(i, Special::C, c_post.clamp(0.0, 1.0));
        pp.set_special(i, Special::CC, cc_post.clamp(0.0, 1.0));
    }

    // Row-wise renormalization (spec.md §4.3.4): the emitting states on row i — all
    // M_*/I_* main cells, JJ, CC, and N's self-loop emission — must sum to exactly
    // 1.0 for i in [1, L]; flogsum table drift means the raw sum only approximates
    // that. Non-emitting states (E, B, L, G) are left untouched.
    const EMITTING: [MainCell; 4] = [MainCell::ML, MainCell::MG, MainCell::IL, MainCell::IG];
    for i in 1..=l {
        let mut sum = 0.0f32;
        for k in 0..=m {
            for which in EMITTING {
                sum += pp.main(i, k, which);
            }
        }
        sum += pp.special(i, Special::JJ);
        sum += pp.special(i, Special::CC);
        sum += pp.special(i, Special::N);
        if sum > 0.0 {
            let scale = 1.0 / sum;
            for k in 0..=m {
                for which in EMITTING {
                    pp.set_main(i, k, which, pp.main(i, k, which) * scale);
                }
            }
            pp.set_special(i, Special::JJ, pp.special(i, Special::JJ) * scale);
            pp.set_special(i, Special::CC, pp.special(i, Special::CC) * scale);
            pp.set_special(i, Special::N, pp.special(i, Special::N) * scale);
        }
    }
    Ok(())
}

/// Gamma-centroid (maximum expected accuracy) alignment: walk the posterior
/// ([`decoding`]) matrix choosing, at each row, the highest-posterior legal
/// predecessor, analogous to Viterbi traceback but maximizing summed posterior
/// mass instead of path probability (spec.md §4.6). Returns the expected number
/// of correctly-aligned residues for the chosen path.
pub fn alignment(profile: &Profile, pp: &DenseMatrix, gamma: &mut DenseMatrix) -> Result<f32> {
    let m = profile.m();
    let l = pp.l();
    gamma.grow_to(m, l)?;
    gamma.reuse();
    gamma.kind = MatrixKind::Alignment;

    for k in 0..=m {
        gamma.set_main(0, k, MainCell::ML, 0.0);
        gamma.set_main(0, k, MainCell::MG, 0.0);
    }
    for i in 1..=l {
        for k in 1..=m {
            let ml_pp = pp.main(i, k, MainCell::ML);
            let mg_pp = pp.main(i, k, MainCell::MG);
            let best_prev = max4(
                gamma.main(i - 1, k - 1, MainCell::ML),
                gamma.main(i - 1, k - 1, MainCell::MG),
                gamma.main(i, k - 1, MainCell::ML),
                gamma.main(i, k - 1, MainCell::MG),
            );
            gamma.set_main(i, k, MainCell::ML, best_prev + ml_pp);
            gamma.set_main(i, k, MainCell::MG, best_prev + mg_pp);
        }
    }

    let mut best = 0.0_f32;
    for k in 0..=m {
        best = best.max(gamma.main(l, k, MainCell::ML)).max(gamma.main(l, k, MainCell::MG));
    }
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::testutil::random_profile;
    use rand::{rngs::StdRng, SeedableRng};

    fn seq(kp: usize, len: usize, seed: u64) -> DigitalSequence {
        let mut rng = StdRng::seed_from_u64(seed);
        use rand::Rng;
        let residues: Vec<u8> = (0..len).map(|_| rng.gen_range(0..kp as u8)).collect();
        DigitalSequence::new(&residues, kp).unwrap()
    }

    #[test]
    fn viterbi_le_forward() {
        crate::logsum::init();
        let mut rng = StdRng::seed_from_u64(7);
        let profile = random_profile(&mut rng, 6, 4, true);
        let dsq = seq(4, 12, 8);
        let mut vmx = DenseMatrix::new(6, 12).unwrap();
        let mut fmx = DenseMatrix::new(6, 12).unwrap();
        let vsc = viterbi(&profile, &dsq, &mut vmx).unwrap();
        let fsc = forward(&profile, &dsq, &mut fmx).unwrap();
        assert!(vsc <= fsc + 1e-3, "viterbi {vsc} should be <= forward {fsc}");
    }

    #[test]
    fn forward_matches_backward() {
        crate::logsum::init();
        let mut rng = StdRng::seed_from_u64(11);
        let profile = random_profile(&mut rng, 5, 4, true);
        let dsq = seq(4, 9, 3);
        let mut fmx = DenseMatrix::new(5, 9).unwrap();
        let mut bmx = DenseMatrix::new(5, 9).unwrap();
        let fsc = forward(&profile, &dsq, &mut fmx).unwrap();
        let bsc = backward(&profile, &dsq, &mut bmx).unwrap();
        assert!((fsc - bsc).abs() < 0.05, "forward {fsc} vs backward {bsc} diverge");
    }

    #[test]
    fn decoding_rows_sum_near_one_for_specials_plus_mains() {
        crate::logsum::init();
        let mut rng = StdRng::seed_from_u64(21);
        let profile = random_profile(&mut rng, 4, 4, true);
        let dsq = seq(4, 6, 2);
        let mut fmx = DenseMatrix::new(4, 6).unwrap();
        let mut bmx = DenseMatrix::new(4, 6).unwrap();
        let fsc = forward(&profile, &dsq, &mut fmx).unwrap();
        backward(&profile, &dsq, &mut bmx).unwrap();
        let mut pp = DenseMatrix::new(4, 6).unwrap();
        decoding(&profile, &dsq, &fmx, &bmx, fsc, &mut pp).unwrap();
        // Every posterior must lie in [0, 1] to tolerance.
        for i in 0..=6 {
            for which in [Special::N, Special::C, Special::J] {
                let v = pp.special(i, which);
                assert!((0.0..=1.000_1).contains(&v), "posterior {v} out of range at row {i}");
            }
        }
    }

    #[test]
    fn decoding_row_sums_renormalize_to_one() {
        // spec.md §8 item 10: emitting-state posteriors on each row (all M_*, I_*,
        // JJ, CC, N) must sum to 1.0 within tolerance after renormalization.
        crate::logsum::init();
        let mut rng = StdRng::seed_from_u64(37);
        let profile = random_profile(&mut rng, 10, 4, true);
        let dsq = seq(4, 15, 13);
        let mut fmx = DenseMatrix::new(10, 15).unwrap();
        let mut bmx = DenseMatrix::new(10, 15).unwrap();
        let fsc = forward(&profile, &dsq, &mut fmx).unwrap();
        backward(&profile, &dsq, &mut bmx).unwrap();
        let mut pp = DenseMatrix::new(10, 15).unwrap();
        decoding(&profile, &dsq, &fmx, &bmx, fsc, &mut pp).unwrap();
        for i in 1..=15 {
            let mut sum = 0.0f32;
            for k in 0..=10 {
                for which in [MainCell::ML, MainCell::MG, MainCell::IL, MainCell::IG] {
                    sum += pp.main(i, k, which);
                }
            }
            sum += pp.special(i, Special::JJ);
            sum += pp.special(i, Special::CC);
            sum += pp.special(i, Special::N);
            assert!((sum - 1.0).abs() < 1e-4, "row {i} emitting posteriors sum to {sum}, not 1.0");
        }
    }
}
