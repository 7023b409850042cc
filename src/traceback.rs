//! Traceback: recover a [`Trace`] from a filled DP matrix.
//!
//! Two flavors, per spec.md §4.4: *reconstructive* traceback walks backward from
//! `C`/`T`, recomputing each candidate incoming edge's score and matching it
//! against the stored cell value within a float tolerance (no parent pointers are
//! stored by the DP routines themselves — a [`DenseMatrix`] is exactly the score
//! table, nothing more); *stochastic* traceback instead samples an incoming edge
//! with probability proportional to its contribution to the cell's log-sum.

use crate::alphabet::DigitalSequence;
use crate::error::{PhmmError, Result};
use crate::logsum::flogsum;
use crate::matrix::DenseMatrix;
use crate::profile::{FlankMove, FlankState, MainCell, Profile, Special, Trans};
use crate::rng::{sample_categorical, Rng01};
use crate::trace::{Trace, TraceState};

const TOL: f32 = 1e-5;

fn close(a: f32, b: f32) -> bool {
    if a == f32::NEG_INFINITY && b == f32::NEG_INFINITY {
        return true;
    }
    (a - b).abs() <= TOL
}

#[derive(Clone, Copy)]
enum Cursor {
    Main { state: TraceState, k: usize, i: usize },
    Special { state: TraceState, i: usize },
    Done,
}

/// Reconstructive Viterbi traceback against a filled [`crate::reference::viterbi`]
/// matrix. Returns `Ok(empty trace)` if the overall score is `-inf` (no path).
pub fn viterbi_trace(profile: &Profile, dsq: &DigitalSequence, mx: &DenseMatrix) -> Result<Trace> {
    let l = mx.l();
    let overall = mx.special(l, Special::C) + profile.xsc(FlankState::C, FlankMove::Move);
    if overall == f32::NEG_INFINITY {
        return Ok(Trace::new());
    }

    let mut tr = Trace::new();
    tr.append(TraceState::T, 0, l);
    tr.append(TraceState::C, 0, l);

    let mut cur = Cursor::Special { state: TraceState::C, i: l };
    let mut guard = 0usize;
    loop {
        guard += 1;
        if guard > 10_000_000 {
            return Err(PhmmError::Internal {
                state: "traceback",
                k: 0,
                i: 0,
                stored: 0.0,
                best_candidate: 0.0,
            });
        }
        cur = step_viterbi(profile, dsq, mx, cur, &mut tr)?;
        if matches!(cur, Cursor::Done) {
            break;
        }
    }
    tr.append(TraceState::S, 0, 0);
    tr.reverse();
    Ok(tr)
}

fn step_viterbi(
    profile: &Profile,
    dsq: &DigitalSequence,
    mx: &DenseMatrix,
    cur: Cursor,
    tr: &mut Trace,
) -> Result<Cursor> {
    match cur {
        Cursor::Special { state: TraceState::C, i } => {
            let stored = mx.special(i, Special::C);
            let stay = if i > 0 {
                mx.special(i - 1, Special::C) + profile.xsc(FlankState::C, FlankMove::Loop)
            } else {
                f32::NEG_INFINITY
            };
            if close(stored, stay) && i > 0 {
                tr.append(TraceState::C, 0, i - 1);
                return Ok(Cursor::Special { state: TraceState::C, i: i - 1 });
            }
            tr.append(TraceState::E, 0, i);
            Ok(Cursor::Special { state: TraceState::E, i })
        }
        Cursor::Special { state: TraceState::E, i } => {
            let m = profile.m();
            for k in 1..=m {
                let ml = mx.main(i, k, MainCell::ML);
                if close(mx.special(i, Special::E), ml) {
                    tr.append(TraceState::ML, k, i);
                    return Ok(Cursor::Main { state: TraceState::ML, k, i });
                }
                let dl = mx.main(i, k, MainCell::DL);
                if close(mx.special(i, Special::E), dl) {
                    tr.append(TraceState::DL, k, i);
                    return Ok(Cursor::Main { state: TraceState::DL, k, i });
                }
            }
            let mg = mx.main(i, m, MainCell::MG);
            if close(mx.special(i, Special::E), mg) {
                tr.append(TraceState::MG, m, i);
                return Ok(Cursor::Main { state: TraceState::MG, k: m, i });
            }
            let dg = mx.main(i, m, MainCell::DG);
            if close(mx.special(i, Special::E), dg) {
                tr.append(TraceState::DG, m, i);
                return Ok(Cursor::Main { state: TraceState::DG, k: m, i });
            }
            Err(PhmmError::UnreachablePath { state: "E", k: 0, i })
        }
        Cursor::Special { state: TraceState::J, i } => {
            let stored = mx.special(i, Special::J);
            let stay = if i > 0 {
                mx.special(i - 1, Special::J) + profile.xsc(FlankState::J, FlankMove::Loop)
            } else {
                f32::NEG_INFINITY
            };
            if i > 0 && close(stored, stay) {
                tr.append(TraceState::J, 0, i - 1);
                return Ok(Cursor::Special { state: TraceState::J, i: i - 1 });
            }
            tr.append(TraceState::E, 0, i);
            Ok(Cursor::Special { state: TraceState::E, i })
        }
        Cursor::Special { state: TraceState::B, i } => {
            let stored = mx.special(i, Special::B);
            let n = mx.special(i, Special::N) + profile.xsc(FlankState::N, FlankMove::Move);
            if close(stored, n) {
                tr.append(TraceState::N, 0, i);
                return Ok(Cursor::Special { state: TraceState::N, i });
            }
            let j = mx.special(i, Special::J) + profile.xsc(FlankState::J, FlankMove::Move);
            if close(stored, j) {
                tr.append(TraceState::J, 0, i);
                return Ok(Cursor::Special { state: TraceState::J, i });
            }
            Err(PhmmError::UnreachablePath { state: "B", k: 0, i })
        }
        Cursor::Special { state: TraceState::N, i } => {
            if i == 0 {
                return Ok(Cursor::Done);
            }
            tr.append(TraceState::N, 0, i - 1);
            Ok(Cursor::Special { state: TraceState::N, i: i - 1 })
        }
        Cursor::Main { state: TraceState::ML, k, i } => {
            let stored = mx.main(i, k, MainCell::ML) - profile.msc(k, dsq.residue(i) as usize);
            let l_prev = mx.special(i - 1, Special::L) + profile.lm_entry(k);
            if k == 1 && close(stored, l_prev) {
                tr.append(TraceState::L, 0, i - 1);
                tr.append(TraceState::B, 0, i - 1);
                return Ok(Cursor::Special { state: TraceState::B, i: i - 1 });
            }
            if close(stored, l_prev) {
                tr.append(TraceState::L, 0, i - 1);
                tr.append(TraceState::B, 0, i - 1);
                return Ok(Cursor::Special { state: TraceState::B, i: i - 1 });
            }
            let from_m = mx.main(i - 1, k - 1, MainCell::ML) + profile.tsc(k - 1, Trans::Mm);
            if close(stored, from_m) {
                tr.append(TraceState::ML, k - 1, i - 1);
                return Ok(Cursor::Main { state: TraceState::ML, k: k - 1, i: i - 1 });
            }
            let from_i = mx.main(i - 1, k - 1, MainCell::IL) + profile.tsc(k - 1, Trans::Im);
            if close(stored, from_i) {
                tr.append(TraceState::IL, k - 1, i - 1);
                return Ok(Cursor::Main { state: TraceState::IL, k: k - 1, i: i - 1 });
            }
            let from_d = mx.main(i - 1, k - 1, MainCell::DL) + profile.tsc(k - 1, Trans::Dm);
            if close(stored, from_d) {
                tr.append(TraceState::DL, k - 1, i - 1);
                return Ok(Cursor::Main { state: TraceState::DL, k: k - 1, i: i - 1 });
            }
            Err(PhmmError::UnreachablePath { state: "ML", k, i })
        }
        Cursor::Main { state: TraceState::MG, k, i } => {
            let stored = mx.main(i, k, MainCell::MG) - profile.msc(k, dsq.residue(i) as usize);
            let g_prev = mx.special(i - 1, Special::G) + profile.gm_entry(k);
            if close(stored, g_prev) {
                if k > 1 {
                    tr.push_domain_wing_retraction_glocal(1, k - 1, i - 1);
                }
                tr.append(TraceState::G, 0, i - 1);
                tr.append(TraceState::B, 0, i - 1);
                return Ok(Cursor::Special { state: TraceState::B, i: i - 1 });
            }
            let from_m = mx.main(i - 1, k - 1, MainCell::MG) + profile.tsc(k - 1, Trans::Mm);
            if close(stored, from_m) {
                tr.append(TraceState::MG, k - 1, i - 1);
                return Ok(Cursor::Main { state: TraceState::MG, k: k - 1, i: i - 1 });
            }
            let from_i = mx.main(i - 1, k - 1, MainCell::IG) + profile.tsc(k - 1, Trans::Im);
            if close(stored, from_i) {
                tr.append(TraceState::IG, k - 1, i - 1);
                return Ok(Cursor::Main { state: TraceState::IG, k: k - 1, i: i - 1 });
            }
            let from_d = mx.main(i - 1, k - 1, MainCell::DG) + profile.tsc(k - 1, Trans::Dm);
            if close(stored, from_d) {
                tr.append(TraceState::DG, k - 1, i - 1);
                return Ok(Cursor::Main { state: TraceState::DG, k: k - 1, i: i - 1 });
            }
            Err(PhmmError::UnreachablePath { state: "MG", k, i })
        }
        Cursor::Main { state: TraceState::IL, k, i } => {
            let stored = mx.main(i, k, MainCell::IL) - profile.isc(k, dsq.residue(i) as usize);
            let from_m = mx.main(i - 1, k, MainCell::ML) + profile.tsc(k, Trans::Mi);
            if close(stored, from_m) {
                tr.append(TraceState::ML, k, i - 1);
                return Ok(Cursor::Main { state: TraceState::ML, k, i: i - 1 });
            }
            let from_i = mx.main(i - 1, k, MainCell::IL) + profile.tsc(k, Trans::Ii);
            if close(stored, from_i) {
                tr.append(TraceState::IL, k, i - 1);
                return Ok(Cursor::Main { state: TraceState::IL, k, i: i - 1 });
            }
            Err(PhmmError::UnreachablePath { state: "IL", k, i })
        }
        Cursor::Main { state: TraceState::IG, k, i } => {
            let stored = mx.main(i, k, MainCell::IG) - profile.isc(k, dsq.residue(i) as usize);
            let from_m = mx.main(i - 1, k, MainCell::MG) + profile.tsc(k, Trans::Mi);
            if close(stored, from_m) {
                tr.append(TraceState::MG, k, i - 1);
                return Ok(Cursor::Main { state: TraceState::MG, k, i: i - 1 });
            }
            let from_i = mx.main(i - 1, k, MainCell::IG) + profile.tsc(k, Trans::Ii);
            if close(stored, from_i) {
                tr.append(TraceState::IG, k, i - 1);
                return Ok(Cursor::Main { state: TraceState::IG, k, i: i - 1 });
            }
            Err(PhmmError::UnreachablePath { state: "IG", k, i })
        }
        Cursor::Main { state: TraceState::DL, k, i } => {
            let stored = mx.main(i, k, MainCell::DL);
            let from_m = mx.main(i, k - 1, MainCell::ML) + profile.tsc(k - 1, Trans::Md);
            if close(stored, from_m) {
                tr.append(TraceState::ML, k - 1, i);
                return Ok(Cursor::Main { state: TraceState::ML, k: k - 1, i });
            }
            let from_d = mx.main(i, k - 1, MainCell::DL) + profile.tsc(k - 1, Trans::Dd);
            if close(stored, from_d) {
                tr.append(TraceState::DL, k - 1, i);
                return Ok(Cursor::Main { state: TraceState::DL, k: k - 1, i });
            }
            Err(PhmmError::UnreachablePath { state: "DL", k, i })
        }
        Cursor::Main { state: TraceState::DG, k, i } => {
            let stored = mx.main(i, k, MainCell::DG);
            let from_m = mx.main(i, k - 1, MainCell::MG) + profile.tsc(k - 1, Trans::Md);
            if close(stored, from_m) {
                tr.append(TraceState::MG, k - 1, i);
                return Ok(Cursor::Main { state: TraceState::MG, k: k - 1, i });
            }
            let from_d = mx.main(i, k - 1, MainCell::DG) + profile.tsc(k - 1, Trans::Dd);
            if close(stored, from_d) {
                tr.append(TraceState::DG, k - 1, i);
                return Ok(Cursor::Main { state: TraceState::DG, k: k - 1, i });
            }
            Err(PhmmError::UnreachablePath { state: "DG", k, i })
        }
        _ => Ok(Cursor::Done),
    }
}

/// Stochastic traceback: at every branch point, sample the incoming edge with
/// probability proportional to its contribution to the stored (Forward) cell's
/// log-sum, using `rng` for the draw. Returns [`PhmmError::UnreachablePath`] if a
/// visited cell is `-inf` (no legal edge to sample from).
pub fn stochastic_trace(
    profile: &Profile,
    dsq: &DigitalSequence,
    fwd: &DenseMatrix,
    rng: &mut dyn Rng01,
) -> Result<Trace> {
    let l = fwd.l();
    let overall = fwd.special(l, Special::C) + profile.xsc(FlankState::C, FlankMove::Move);
    if overall == f32::NEG_INFINITY {
        return Ok(Trace::new());
    }
    let mut tr = Trace::new();
    tr.append(TraceState::T, 0, l);
    tr.append(TraceState::C, 0, l);

    let mut i = l;
    let mut state = TraceState::C;
    let mut k = 0usize;
    let mut guard = 0usize;
    loop {
        guard += 1;
        if guard > 10_000_000 {
            return Err(PhmmError::UnreachablePath { state: "traceback-guard", k, i });
        }
        match state {
            TraceState::C => {
                if i == 0 {
                    return Err(PhmmError::UnreachablePath { state: "C", k, i });
                }
                let stay = fwd.special(i - 1, Special::C) + profile.xsc(FlankState::C, FlankMove::Loop);
                let from_e = fwd.special(i, Special::E) + profile.xsc(FlankState::E, FlankMove::Move);
                let choice = sample_categorical(rng, &[stay.exp(), from_e.exp()])
                    .ok_or(PhmmError::UnreachablePath { state: "C", k, i })?;
                if choice == 0 {
                    tr.append(TraceState::C, 0, i - 1);
                    i -= 1;
                } else {
                    tr.append(TraceState::E, 0, i);
                    state = TraceState::E;
                }
            }
            TraceState::E => {
                let m = profile.m();
                let mut cands: Vec<(TraceState, usize, f32)> = Vec::new();
                for kk in 1..=m {
                    cands.push((TraceState::ML, kk, fwd.main(i, kk, MainCell::ML)));
                    cands.push((TraceState::DL, kk, fwd.main(i, kk, MainCell::DL)));
                }
                cands.push((TraceState::MG, m, fwd.main(i, m, MainCell::MG)));
                cands.push((TraceState::DG, m, fwd.main(i, m, MainCell::DG)));
                let weights: Vec<f32> = cands.iter().map(|c| c.2.exp()).collect();
                let idx = sample_categorical(rng, &weights).ok_or(PhmmError::UnreachablePath { state: "E", k, i })?;
                let (st, kk, _) = cands[idx];
                tr.append(st, kk, i);
                state = st;
                k = kk;
            }
            TraceState::ML | TraceState::MG | TraceState::IL | TraceState::IG | TraceState::DL | TraceState::DG => {
                // Reuse the reconstructive step logic's edge weights, but sample instead
                // of matching: build the candidate list, weight by exp(score), draw.
                let (cands, is_main_entry) = candidates(profile, dsq, fwd, state, k, i)?;
                let weights: Vec<f32> = cands.iter().map(|c| c.1.exp()).collect();
                let idx = sample_categorical(rng, &weights).ok_or(PhmmError::UnreachablePath {
                    state: "main",
                    k,
                    i,
                })?;
                let (next, _w) = cands[idx];
                match next {
                    Cursor::Special { state: TraceState::B, i: bi } => {
                        if is_main_entry {
                            if state == TraceState::MG && k > 1 {
                                tr.push_domain_wing_retraction_glocal(1, k - 1, bi);
                            }
                            tr.append(if state == TraceState::MG { TraceState::G } else { TraceState::L }, 0, bi);
                        }
                        tr.append(TraceState::B, 0, bi);
                        state = TraceState::B;
                        i = bi;
                    }
                    Cursor::Main { state: ns, k: nk, i: ni } => {
                        tr.append(ns, nk, ni);
                        state = ns;
                        k = nk;
                        i = ni;
                    }
                    _ => unreachable!(),
                }
            }
            TraceState::B => {
                let n = fwd.special(i, Special::N) + profile.xsc(FlankState::N, FlankMove::Move);
                let j = fwd.special(i, Special::J) + profile.xsc(FlankState::J, FlankMove::Move);
                let choice =
                    sample_categorical(rng, &[n.exp(), j.exp()]).ok_or(PhmmError::UnreachablePath { state: "B", k, i })?;
                if choice == 0 {
                    tr.append(TraceState::N, 0, i);
                    state = TraceState::N;
                } else {
                    tr.append(TraceState::J, 0, i);
                    state = TraceState::J;
                }
            }
            TraceState::J => {
                let stay = fwd.special(i - 1, Special::J) + profile.xsc(FlankState::J, FlankMove::Loop);
                let from_e = fwd.special(i, Special::E) + profile.xsc(FlankState::E, FlankMove::Loop);
                let choice = sample_categorical(rng, &[stay.exp(), from_e.exp()])
                    .ok_or(PhmmError::UnreachablePath { state: "J", k, i })?;
                if choice == 0 {
                    tr.append(TraceState::J, 0, i - 1);
                    i -= 1;
                } else {
                    tr.append(TraceState::E, 0, i);
                    state = TraceState::E;
                }
            }
            TraceState::N => {
                if i == 0 {
                    tr.append(TraceState::S, 0, 0);
                    tr.reverse();
                    return Ok(tr);
                }
                tr.append(TraceState::N, 0, i - 1);
                i -= 1;
            }
            _ => unreachable!(),
        }
    }
}

type MainCand = (Cursor, f32);

fn candidates(
    profile: &Profile,
    dsq: &DigitalSequence,
    fwd: &DenseMatrix,
    state: TraceState,
    k: usize,
    i: usize,
) -> Result<(Vec<MainCand>, bool)> {
    let mut v = Vec::new();
    let x = dsq.residue(i) as usize;
    match state {
        TraceState::ML => {
            v.push((
                Cursor::Special { state: TraceState::B, i: i - 1 },
                fwd.special(i - 1, Special::L) + profile.lm_entry(k),
            ));
            if k > 1 {
                v.push((
                    Cursor::Main { state: TraceState::ML, k: k - 1, i: i - 1 },
                    fwd.main(i - 1, k - 1, MainCell::ML) + profile.tsc(k - 1, Trans::Mm),
                ));
                v.push((
                    Cursor::Main { state: TraceState::IL, k: k - 1, i: i - 1 },
                    fwd.main(i - 1, k - 1, MainCell::IL) + profile.tsc(k - 1, Trans::Im),
                ));
                v.push((
                    Cursor::Main { state: TraceState::DL, k: k - 1, i: i - 1 },
                    fwd.main(i - 1, k - 1, MainCell::DL) + profile.tsc(k - 1, Trans::Dm),
                ));
            }
            let _ = x;
            Ok((v, true))
        }
        TraceState::MG => {
            v.push((
                Cursor::Special { state: TraceState::B, i: i - 1 },
                fwd.special(i - 1, Special::G) + profile.gm_entry(k),
            ));
            if k > 1 {
                v.push((
                    Cursor::Main { state: TraceState::MG, k: k - 1, i: i - 1 },
                    fwd.main(i - 1, k - 1, MainCell::MG) + profile.tsc(k - 1, Trans::Mm),
                ));
                v.push((
                    Cursor::Main { state: TraceState::IG, k: k - 1, i: i - 1 },
                    fwd.main(i - 1, k - 1, MainCell::IG) + profile.tsc(k - 1, Trans::Im),
                ));
                v.push((
                    Cursor::Main { state: TraceState::DG, k: k - 1, i: i - 1 },
                    fwd.main(i - 1, k - 1, MainCell::DG) + profile.tsc(k - 1, Trans::Dm),
                ));
            }
            Ok((v, true))
        }
        TraceState::IL => {
            v.push((
                Cursor::Main { state: TraceState::ML, k, i: i - 1 },
                fwd.main(i - 1, k, MainCell::ML) + profile.tsc(k, Trans::Mi),
            ));
            v.push((
                Cursor::Main { state: TraceState::IL, k, i: i - 1 },
                fwd.main(i - 1, k, MainCell::IL) + profile.tsc(k, Trans::Ii),
            ));
            Ok((v, false))
        }
        TraceState::IG => {
            v.push((
                Cursor::Main { state: TraceState::MG, k, i: i - 1 },
                fwd.main(i - 1, k, MainCell::MG) + profile.tsc(k, Trans::Mi),
            ));
            v.push((
                Cursor::Main { state: TraceState::IG, k, i: i - 1 },
                fwd.main(i - 1, k, MainCell::IG) + profile.tsc(k, Trans::Ii),
            ));
            Ok((v, false))
        }
        TraceState::DL => {
            v.push((
                Cursor::Main { state: TraceState::ML, k: k - 1, i },
                fwd.main(i, k - 1, MainCell::ML) + profile.tsc(k - 1, Trans::Md),
            ));
            v.push((
                Cursor::Main { state: TraceState::DL, k: k - 1, i },
                fwd.main(i, k - 1, MainCell::DL) + profile.tsc(k - 1, Trans::Dd),
            ));
            Ok((v, false))
        }
        TraceState::DG => {
            v.push((
                Cursor::Main { state: TraceState::MG, k: k - 1, i },
                fwd.main(i, k - 1, MainCell::MG) + profile.tsc(k - 1, Trans::Md),
            ));
            v.push((
                Cursor::Main { state: TraceState::DG, k: k - 1, i },
                fwd.main(i, k - 1, MainCell::DG) + profile.tsc(k - 1, Trans::Dd),
            ));
            Ok((v, false))
        }
        _ => Ok((v, false)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::testutil::random_profile;
    use crate::reference::viterbi;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn viterbi_trace_scores_match_viterbi_cell() {
        crate::logsum::init();
        let mut rng = StdRng::seed_from_u64(99);
        let profile = random_profile(&mut rng, 5, 4, true);
        let residues: Vec<u8> = (0..8).map(|_| rng.gen_range(0..4)).collect();
        let dsq = DigitalSequence::new(&residues, 4).unwrap();
        let mut mx = DenseMatrix::new(5, 8).unwrap();
        let vsc = viterbi(&profile, &dsq, &mut mx).unwrap();
        let tr = viterbi_trace(&profile, &dsq, &mx).unwrap();
        if vsc.is_finite() {
            let tsc = tr.score(&profile, dsq.as_slice()).unwrap();
            assert!((tsc - vsc).abs() < 1e-2, "trace score {tsc} vs viterbi {vsc}");
        }
    }

    #[test]
    fn stochastic_trace_is_legal() {
        crate::logsum::init();
        let mut rng = StdRng::seed_from_u64(5);
        let profile = random_profile(&mut rng, 4, 4, true);
        let residues: Vec<u8> = (0..6).map(|_| rng.gen_range(0..4)).collect();
        let dsq = DigitalSequence::new(&residues, 4).unwrap();
        let mut fmx = DenseMatrix::new(4, 6).unwrap();
        crate::reference::forward(&profile, &dsq, &mut fmx).unwrap();
        let mut sampler = crate::rng::StdRng01::seed_from_u64(123);
        let tr = stochastic_trace(&profile, &dsq, &fmx, &mut sampler).unwrap();
        assert!(tr.validate(6).is_ok());
    }
}
