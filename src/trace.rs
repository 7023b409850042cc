//! Trace: an ordered path through the profile's state machine.
//!
//! A [`Trace`] is built back-to-front during traceback (append states as they are
//! discovered walking backward from `C`/`T`, then [`Trace::reverse`] once at the
//! end) and is otherwise an ordinary ordered sequence of `(state, k, i)` records,
//! optionally annotated with a posterior probability per spec.md §3.3.

use crate::error::{PhmmError, Result};
use crate::matrix::DenseMatrix;
use crate::profile::{FlankMove, FlankState, MainCell, Profile, Special, Trans};
use serde::{Deserialize, Serialize};

/// One state in the profile's state machine that a trace step can occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceState {
    S,
    N,
    B,
    L,
    G,
    ML,
    MG,
    IL,
    IG,
    DL,
    DG,
    E,
    J,
    C,
    T,
}

impl TraceState {
    /// True for states that consume one residue of the target sequence.
    pub fn is_emitting(self) -> bool {
        matches!(
            self,
            TraceState::N | TraceState::C | TraceState::J | TraceState::ML | TraceState::MG | TraceState::IL | TraceState::IG
        )
    }

    /// True for match/insert states that consume one model node's emission vector.
    pub fn is_main(self) -> bool {
        matches!(
            self,
            TraceState::ML | TraceState::MG | TraceState::IL | TraceState::IG | TraceState::DL | TraceState::DG
        )
    }
}

/// One record in a [`Trace`]: which state, at which model position `k` (0 if not
/// applicable) and sequence position `i` (0 if not applicable), with an optional
/// posterior probability annotation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    pub state: TraceState,
    pub k: usize,
    pub i: usize,
    pub pp: Option<f32>,
}

/// One `B..E` subpath: a single domain (hit) within a (possibly multihit) trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    /// Index into [`Trace`]'s step list of the `B` record.
    pub b_step: usize,
    /// Index into [`Trace`]'s step list of the `E` record.
    pub e_step: usize,
    /// First/last sequence positions covered by this domain's emitting states.
    pub i_start: usize,
    pub i_end: usize,
    /// First/last model positions touched (inclusive).
    pub k_start: usize,
    pub k_end: usize,
}

/// An ordered path through the profile's state machine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trace {
    steps: Vec<TraceStep>,
}

impl Trace {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self { steps: Vec::with_capacity(cap) }
    }

    /// Append one state record. Traces are conventionally built back-to-front
    /// during traceback; call [`Trace::reverse`] once construction is complete.
    pub fn append(&mut self, state: TraceState, k: usize, i: usize) {
        self.steps.push(TraceStep { state, k, i, pp: None });
    }

    pub fn append_with_pp(&mut self, state: TraceState, k: usize, i: usize, pp: f32) {
        self.steps.push(TraceStep { state, k, i, pp: Some(pp) });
    }

    /// Reverse step order in place (traces are appended back-to-front).
    pub fn reverse(&mut self) {
        self.steps.reverse();
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[TraceStep] {
        &self.steps
    }

    pub fn push_domain_wing_retraction_glocal(&mut self, k_from: usize, k_to: usize, i: usize) {
        // Emit D_G,k_from .. D_G,k_to (ascending) at the given row i, used when
        // unfolding a G -> M_k entry with k_to = k > 1 during forward-order
        // reconstruction; callers appending back-to-front should push these in
        // descending k and rely on the final `reverse()` to restore ascending order.
        for k in k_from..=k_to {
            self.append(TraceState::DG, k, i);
        }
    }

    /// Sum of transition + emission log-probabilities along the path, per spec.md
    /// §3.3. The wing-retracted `D_G` chain created by a `G -> M_k` (`k>1`) entry is
    /// charged its score entirely on the `G -> D_{G,1}` edge (equal to the folded
    /// `GM(k-1)` transition); the remaining unfolded `D -> D` / `D -> M` steps in
    /// that chain score `0`, since the wing retraction has no separate per-step
    /// probabilities in the underlying model (see DESIGN.md).
    pub fn score(&self, profile: &Profile, dsq: &[u8]) -> Result<f32> {
        if self.steps.is_empty() {
            return Ok(f32::NEG_INFINITY);
        }
        let mut sc = 0.0_f32;
        for w in self.steps.windows(2) {
            let (prev, cur) = (w[0], w[1]);
            sc += self.edge_score(profile, dsq, prev, cur)?;
        }
        Ok(sc)
    }

    fn edge_score(&self, profile: &Profile, dsq: &[u8], prev: TraceStep, cur: TraceStep) -> Result<f32> {
        use TraceState::*;
        let t = match (prev.state, cur.state) {
            (S, N) => 0.0,
            (N, N) => profile.xsc(FlankState::N, FlankMove::Loop),
            (N, B) => profile.xsc(FlankState::N, FlankMove::Move),
            (J, B) => profile.xsc(FlankState::J, FlankMove::Move),
            (B, L) => profile.xsc_b_local(),
            (B, G) => profile.xsc_b_glocal(),
            (L, ML) => profile.lm_entry(cur.k),
            (G, MG) => {
                if cur.k == 1 {
                    profile.gm_entry(1)
                } else {
                    profile.gm_entry(cur.k)
                }
            }
            (G, DG) => profile.gm_entry(cur.k),
            (DG, DG) => 0.0,
            (DG, MG) => 0.0,
            (ML, ML) => profile.tsc(prev.k, Trans::Mm),
            (ML, IL) => profile.tsc(prev.k, Trans::Mi),
            (ML, DL) => profile.tsc(prev.k, Trans::Md),
            (IL, ML) => profile.tsc(prev.k, Trans::Im),
            (IL, IL) => profile.tsc(prev.k, Trans::Ii),
            (DL, ML) => profile.tsc(prev.k, Trans::Dm),
            (DL, DL) => profile.tsc(prev.k, Trans::Dd),
            (MG, MG) => profile.tsc(prev.k, Trans::Mm),
            (MG, IG) => profile.tsc(prev.k, Trans::Mi),
            (MG, DG) => profile.tsc(prev.k, Trans::Md),
            (IG, MG) => profile.tsc(prev.k, Trans::Im),
            (IG, IG) => profile.tsc(prev.k, Trans::Ii),
            (ML, E) | (DL, E) | (MG, E) | (DG, E) => 0.0,
            (E, J) => profile.xsc(FlankState::E, FlankMove::Loop),
            (E, C) => profile.xsc(FlankState::E, FlankMove::Move),
            (C, C) => profile.xsc(FlankState::C, FlankMove::Loop),
            (C, T) => profile.xsc(FlankState::C, FlankMove::Move),
            (J, J) => profile.xsc(FlankState::J, FlankMove::Loop),
            _ => {
                return Err(PhmmError::InvalidArg(format!(
                    "illegal trace transition {:?} -> {:?}",
                    prev.state, cur.state
                )))
            }
        };

        let e = match cur.state {
            ML => profile.msc(cur.k, dsq[cur.i] as usize),
            MG => profile.msc(cur.k, dsq[cur.i] as usize),
            IL => profile.isc(cur.k, dsq[cur.i] as usize),
            IG => profile.isc(cur.k, dsq[cur.i] as usize),
            N | C | J if prev.state == cur.state => 0.0, // loop emission scores 0 (the loop *transition* carries the score)
            _ => 0.0,
        };

        Ok(t + e)
    }

    /// Validate state-transition legality and basic structural invariants: the
    /// trace begins `S -> N` and ends `C -> T`, every domain is a well-formed
    /// `B -> {L|G} -> (M/I/D chain) -> E`, and `i` only ever advances on emitting
    /// states while `k` only ever advances on main states.
    pub fn validate(&self, l_total: usize) -> Result<()> {
        if self.steps.is_empty() {
            return Ok(());
        }
        if self.steps[0].state != TraceState::S {
            return Err(PhmmError::InvalidArg("trace does not begin with S".into()));
        }
        if self.steps.last().unwrap().state != TraceState::T {
            return Err(PhmmError::InvalidArg("trace does not end with T".into()));
        }
        let mut last_i = 0usize;
        let mut saw_b = false;
        for w in self.steps.windows(2) {
            let (prev, cur) = (w[0], w[1]);
            if cur.state == TraceState::B {
                saw_b = true;
            }
            if cur.state.is_emitting() {
                if cur.i != last_i + 1 {
                    return Err(PhmmError::InvalidArg(format!(
                        "emitting state {:?} at non-consecutive i={} (expected {})",
                        cur.state,
                        cur.i,
                        last_i + 1
                    )));
                }
                last_i = cur.i;
            }
            // basic adjacency sanity: main-chain k must be non-decreasing within a domain.
            if prev.state.is_main() && cur.state.is_main() && cur.k < prev.k {
                return Err(PhmmError::InvalidArg(format!(
                    "model position k decreased from {} to {} between {:?} and {:?}",
                    prev.k, cur.k, prev.state, cur.state
                )));
            }
        }
        if last_i != l_total {
            return Err(PhmmError::InvalidArg(format!(
                "trace covers {last_i} residues, expected {l_total}"
            )));
        }
        let _ = saw_b;
        Ok(())
    }

    /// Compute domain boundaries: one [`Domain`] per `B..E` subpath.
    pub fn index_domains(&self) -> Vec<Domain> {
        let mut domains = Vec::new();
        let mut b_step: Option<usize> = None;
        let mut i_start = 0usize;
        let mut i_end = 0usize;
        let mut k_start = usize::MAX;
        let mut k_end = 0usize;

        for (idx, step) in self.steps.iter().enumerate() {
            match step.state {
                TraceState::B => {
                    b_step = Some(idx);
                    i_start = usize::MAX;
                    i_end = 0;
                    k_start = usize::MAX;
                    k_end = 0;
                }
                TraceState::E => {
                    if let Some(b) = b_step {
                        domains.push(Domain {
                            b_step: b,
                            e_step: idx,
                            i_start: if i_start == usize::MAX { 0 } else { i_start },
                            i_end,
                            k_start: if k_start == usize::MAX { 0 } else { k_start },
                            k_end,
                        });
                        b_step = None;
                    }
                }
                _ => {
                    if b_step.is_some() {
                        if step.state.is_emitting() {
                            i_start = i_start.min(step.i);
                            i_end = i_end.max(step.i);
                        }
                        if step.state.is_main() {
                            k_start = k_start.min(step.k);
                            k_end = k_end.max(step.k);
                        }
                    }
                }
            }
        }
        domains
    }

    /// Annotate every emitting main-state step's `pp` field from a posterior
    /// [`DenseMatrix`] (the `Decoding` matrix), per spec.md §3.3.
    pub fn annotate_pp(&mut self, decoding: &DenseMatrix) {
        for step in self.steps.iter_mut() {
            let pp = match step.state {
                TraceState::ML => Some(decoding.main(step.i, step.k, MainCell::ML)),
                TraceState::MG => Some(decoding.main(step.i, step.k, MainCell::MG)),
                TraceState::IL => Some(decoding.main(step.i, step.k, MainCell::IL)),
                TraceState::IG => Some(decoding.main(step.i, step.k, MainCell::IG)),
                TraceState::N if step.i > 0 => Some(decoding.special(step.i, Special::N)),
                TraceState::J if step.i > 0 => Some(decoding.special(step.i, Special::JJ)),
                TraceState::C if step.i > 0 => Some(decoding.special(step.i, Special::CC)),
                _ => None,
            };
            if let Some(pp) = pp {
                step.pp = Some(pp);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_trace(l: usize) -> Trace {
        let mut tr = Trace::new();
        tr.append(TraceState::S, 0, 0);
        tr.append(TraceState::N, 0, 0);
        tr.append(TraceState::B, 0, 0);
        tr.append(TraceState::G, 0, 0);
        for k in 1..=l {
            tr.append(TraceState::MG, k, k);
        }
        tr.append(TraceState::E, 0, l);
        tr.append(TraceState::C, 0, l);
        tr.append(TraceState::T, 0, l);
        tr
    }

    #[test]
    fn validate_accepts_well_formed_trace() {
        let tr = linear_trace(4);
        assert!(tr.validate(4).is_ok());
    }

    #[test]
    fn validate_rejects_skipped_residue() {
        let mut tr = Trace::new();
        tr.append(TraceState::S, 0, 0);
        tr.append(TraceState::N, 0, 0);
        tr.append(TraceState::N, 0, 2); // skipped i=1
        tr.append(TraceState::T, 0, 2);
        assert!(tr.validate(2).is_err());
    }

    #[test]
    fn index_domains_finds_single_domain() {
        let tr = linear_trace(3);
        let doms = tr.index_domains();
        assert_eq!(doms.len(), 1);
        assert_eq!(doms[0].i_start, 1);
        assert_eq!(doms[0].i_end, 3);
        assert_eq!(doms[0].k_start, 1);
        assert_eq!(doms[0].k_end, 3);
    }

    #[test]
    fn reverse_round_trips() {
        let mut tr = linear_trace(2);
        let forward: Vec<_> = tr.steps().to_vec();
        tr.reverse();
        tr.reverse();
        assert_eq!(tr.steps(), forward.as_slice());
    }
}
