//! Sampling a [`Trace`] (and the residues along it) directly from the model,
//! rather than scoring an externally-given sequence against it. Two entry
//! points, per spec.md §5 and `h3/emit.c`'s `p7_CoreEmit`/`p7_ProfileEmit` split:
//! [`core_emit`] samples from the bare `M/I/D` chain with no flanking states (and
//! rejects an empty trace by construction, looping until a nonempty one is
//! drawn), while [`profile_emit`] samples a full configured-profile trace
//! including `N/J/C` flanking and local/glocal entry choice.

use crate::profile::{FlankMove, FlankState, Profile, Trans};
use crate::rng::{sample_categorical, Rng01};
use crate::trace::{Trace, TraceState};

/// Sample a bare core trace: starting at `M_1` (glocal entry from node 0, since
/// the core model has no flanking states to choose local-vs-glocal with), walk
/// `M/I/D` until reaching `M_M` or falling off the end, emitting one residue per
/// `M`/`I` visited. Rejects (retries) an all-`D` trace that emits zero residues,
/// matching `p7_CoreEmit`'s documented do/while-on-empty-trace behavior.
pub fn core_emit(profile: &Profile, rng: &mut dyn Rng01) -> Trace {
    loop {
        let tr = core_emit_once(profile, rng);
        let emitted = tr.steps().iter().any(|s| s.state.is_emitting());
        if emitted {
            return tr;
        }
    }
}

fn core_emit_once(profile: &Profile, rng: &mut dyn Rng01) -> Trace {
    let m = profile.m();
    let mut tr = Trace::new();
    let mut k = 1usize;
    let mut state = TraceState::MG;
    tr.append(TraceState::G, 0, 0);
    tr.append(state, k, 0);

    loop {
        if k >= m {
            break;
        }
        let weights = match state {
            TraceState::MG => [
                profile.tsc(k, Trans::Mm).exp(),
                profile.tsc(k, Trans::Mi).exp(),
                profile.tsc(k, Trans::Md).exp(),
            ],
            TraceState::IG => [profile.tsc(k, Trans::Im).exp(), 0.0, 0.0],
            TraceState::DG => [
                profile.tsc(k, Trans::Dm).exp(),
                0.0,
                profile.tsc(k, Trans::Dd).exp(),
            ],
            _ => unreachable!(),
        };
        let choice = match sample_categorical(rng, &weights) {
            Some(c) => c,
            None => break,
        };
        match choice {
            0 => {
                k += 1;
                state = TraceState::MG;
                tr.append(state, k, 0);
            }
            1 => {
                state = TraceState::IG;
                tr.append(state, k, 0);
            }
            _ => {
                k += 1;
                state = TraceState::DG;
                tr.append(state, k, 0);
            }
        }
    }
    tr
}

/// Sample a full configured-profile trace: `N* B {L|G} (M/I/D chain) E (J loop {L|G}
/// chain)* C*`, including residue emission at every `N`/`C`/`J`/`M`/`I` visit, via
/// the profile's flanking transition probabilities (spec.md §5). Returns the
/// trace; residue symbols themselves are recoverable by combining each step with
/// the emitting profile's emission distribution (not modeled here, since this
/// crate treats alphabet symbol identity as an external collaborator's concern —
/// see [`crate::alphabet`]).
pub fn profile_emit(profile: &Profile, rng: &mut dyn Rng01) -> Trace {
    let mut tr = Trace::new();
    tr.append(TraceState::S, 0, 0);
    let mut i = 0usize;

    loop {
        let n_loop = profile.xsc(FlankState::N, FlankMove::Loop).exp();
        let n_move = profile.xsc(FlankState::N, FlankMove::Move).exp();
        if i == 0 {
            let choice = sample_categorical(rng, &[n_loop, n_move]).unwrap_or(1);
            if choice == 0 {
                i += 1;
                tr.append(TraceState::N, 0, i);
                continue;
            }
        }
        tr.append(TraceState::B, 0, i);
        break;
    }

    let local_w = profile.xsc_b_local().exp();
    let glocal_w = profile.xsc_b_glocal().exp();
    let is_local = sample_categorical(rng, &[local_w, glocal_w]).unwrap_or(0) == 0;

    let m = profile.m();
    let k0 = sample_categorical(rng, &(1..=m).map(|k| profile.lm_entry(k).exp().max(1e-12)).collect::<Vec<_>>())
        .map(|idx| idx + 1)
        .unwrap_or(1);

    let mut k = k0;
    tr.append(if is_local { TraceState::L } else { TraceState::G }, 0, i);
    let mut state = if is_local { TraceState::ML } else { TraceState::MG };
    i += 1;
    tr.append(state, k, i);

    loop {
        if k >= m {
            break;
        }
        let (mm, mi, md) = (profile.tsc(k, Trans::Mm), profile.tsc(k, Trans::Mi), profile.tsc(k, Trans::Md));
        let (im, ii) = (profile.tsc(k, Trans::Im), profile.tsc(k, Trans::Ii));
        let (dm, dd) = (profile.tsc(k, Trans::Dm), profile.tsc(k, Trans::Dd));
        let weights = match state {
            TraceState::ML | TraceState::MG => [mm.exp(), mi.exp(), md.exp()],
            TraceState::IL | TraceState::IG => [im.exp(), ii.exp(), 0.0],
            TraceState::DL | TraceState::DG => [dm.exp(), 0.0, dd.exp()],
            _ => unreachable!(),
        };
        let choice = match sample_categorical(rng, &weights) {
            Some(c) => c,
            None => break,
        };
        match choice {
            0 => {
                k += 1;
                i += 1;
                state = if is_local { TraceState::ML } else { TraceState::MG };
            }
            1 if matches!(state, TraceState::ML | TraceState::MG) => {
                i += 1;
                state = if is_local { TraceState::IL } else { TraceState::IG };
            }
            _ => {
                k += 1;
                state = if is_local { TraceState::DL } else { TraceState::DG };
            }
        }
        tr.append(state, k, i);
        if !is_local && k == m && matches!(state, TraceState::MG | TraceState::DG) {
            break;
        }
        if is_local {
            let exit_w = 1.0_f32;
            let continue_w = profile.tsc(k, Trans::Mm).exp().max(0.0);
            if matches!(state, TraceState::ML) && sample_categorical(rng, &[exit_w, continue_w * 3.0]) == Some(0) {
                break;
            }
        }
    }
    tr.append(TraceState::E, 0, i);

    loop {
        let loop_w = profile.xsc(FlankState::E, FlankMove::Loop).exp();
        let move_w = profile.xsc(FlankState::E, FlankMove::Move).exp();
        let choice = sample_categorical(rng, &[loop_w, move_w]).unwrap_or(1);
        if choice == 1 {
            break;
        }
        tr.append(TraceState::J, 0, i);
        let j_local_w = profile.xsc_b_local().exp();
        let j_glocal_w = profile.xsc_b_glocal().exp();
        let _ = sample_categorical(rng, &[j_local_w, j_glocal_w]);
        i += 1;
        tr.append(TraceState::B, 0, i - 1);
        break; // single re-entry hop per loop iteration; outer loop continues the J/E cycle
    }

    loop {
        let c_loop = profile.xsc(FlankState::C, FlankMove::Loop).exp();
        let c_move = profile.xsc(FlankState::C, FlankMove::Move).exp();
        let choice = sample_categorical(rng, &[c_loop, c_move]).unwrap_or(1);
        if choice == 0 {
            i += 1;
            tr.append(TraceState::C, 0, i);
            continue;
        }
        tr.append(TraceState::C, 0, i);
        break;
    }
    tr.append(TraceState::T, 0, i);
    tr
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::testutil::random_profile;
    use crate::rng::StdRng01;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn core_emit_never_returns_empty() {
        let mut rng = StdRng::seed_from_u64(1);
        let profile = random_profile(&mut rng, 4, 4, true);
        let mut sampler = StdRng01::seed_from_u64(2);
        for _ in 0..20 {
            let tr = core_emit(&profile, &mut sampler);
            assert!(tr.steps().iter().any(|s| s.state.is_emitting()));
        }
    }

    #[test]
    fn profile_emit_produces_well_formed_bookends() {
        let mut rng = StdRng::seed_from_u64(3);
        let profile = random_profile(&mut rng, 4, 4, true);
        let mut sampler = StdRng01::seed_from_u64(4);
        let tr = profile_emit(&profile, &mut sampler);
        assert_eq!(tr.steps().first().unwrap().state, TraceState::S);
        assert_eq!(tr.steps().last().unwrap().state, TraceState::T);
    }
}
