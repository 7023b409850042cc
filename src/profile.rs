//! Query profile: match/insert emissions, transitions, and flanking special states.
//!
//! A [`Profile`] has `M >= 1` consensus positions ("nodes"), numbered `1..=M`; node
//! `0` is a virtual boundary used only to hold the `L->M_1`/`G->M_1` entry scores at
//! the usual off-by-one storage slot. All scores are `f32` log-probabilities (or, for
//! emissions, log-odds against a background null model) and are always `<= 0`, with
//! `-inf` permitted to mean "impossible".

use crate::error::{PhmmError, Result};
use serde::{Deserialize, Serialize};

/// Number of per-node main-state score cells, `[ML, MG, IL, IG, DL, DG]`.
pub const NSCELLS: usize = 6;
/// Number of per-row special-state score cells,
/// `[E, N, J, B, L, G, C, JJ, CC]`.
pub const NXCELLS: usize = 9;
/// Number of transition scores stored per node.
pub const NTRANS: usize = 9;

/// Index into a main-cell supercell `[ML, MG, IL, IG, DL, DG]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum MainCell {
    ML = 0,
    MG = 1,
    IL = 2,
    IG = 3,
    DL = 4,
    DG = 5,
}

/// Index into a specials supercell `[E, N, J, B, L, G, C, JJ, CC]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Special {
    E = 0,
    N = 1,
    J = 2,
    B = 3,
    L = 4,
    G = 5,
    C = 6,
    JJ = 7,
    CC = 8,
}

/// Transition type, indexing the 9 stored transition scores per node.
///
/// `Lm`/`Gm` are stored off-by-one: `tsc(k-1, Lm)` holds the score of `L -> M_k`
/// (and analogously `Gm` for `G -> M_k`). See the module docs and spec.md §4.9.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Trans {
    Mm = 0,
    Im = 1,
    Dm = 2,
    Lm = 3,
    Gm = 4,
    Md = 5,
    Dd = 6,
    Mi = 7,
    Ii = 8,
}

/// Which of the two transitions a flanking state exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum FlankMove {
    Loop = 0,
    Move = 1,
}

/// The five flanking ("special") states that carry LOOP/MOVE transition pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlankState {
    N,
    J,
    C,
    E,
    /// `B`'s two transitions are not LOOP/MOVE but local-entry / glocal-entry;
    /// see [`Profile::xsc_b`].
    B,
}

/// A configured query profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    m: usize,
    kp: usize,
    /// `(M+1) * Kp`, row-major by node.
    msc: Vec<f32>,
    /// `(M+1) * Kp`, row-major by node (row `M` unused: no I_M state).
    isc: Vec<f32>,
    /// `(M+1) * NTRANS`, row-major by node.
    tsc: Vec<f32>,
    xsc_n: [f32; 2],
    xsc_j: [f32; 2],
    xsc_c: [f32; 2],
    xsc_e: [f32; 2],
    /// `[0] = ln(P(local entry))`, `[1] = ln(P(glocal entry))`.
    xsc_b: [f32; 2],
    is_local: bool,
    /// Background frequencies, used only to combine degenerate-symbol emission
    /// scores by weighted sum; canonical symbols never consult this.
    bg_freq: Vec<f32>,
    /// Expected target length used for the last [`Profile::set_length`] call, if any.
    configured_length: Option<usize>,
}

impl Profile {
    /// Construct an all-`-inf` profile of length `m` over an alphabet of `kp`
    /// symbols. Callers populate scores with the `set_*` methods before running DP.
    pub fn new(m: usize, kp: usize) -> Result<Self> {
        if m == 0 {
            return Err(PhmmError::InvalidArg("profile length M must be positive".into()));
        }
        if kp == 0 {
            return Err(PhmmError::InvalidArg("alphabet size Kp must be positive".into()));
        }
        let neg_inf = f32::NEG_INFINITY;
        Ok(Self {
            m,
            kp,
            msc: vec![neg_inf; (m + 1) * kp],
            isc: vec![neg_inf; (m + 1) * kp],
            tsc: vec![neg_inf; (m + 1) * NTRANS],
            xsc_n: [neg_inf; 2],
            xsc_j: [neg_inf; 2],
            xsc_c: [neg_inf; 2],
            xsc_e: [neg_inf; 2],
            xsc_b: [neg_inf; 2],
            is_local: true,
            bg_freq: vec![1.0 / kp as f32; kp],
            configured_length: None,
        })
    }

    #[inline]
    pub fn m(&self) -> usize {
        self.m
    }

    #[inline]
    pub fn kp(&self) -> usize {
        self.kp
    }

    #[inline]
    pub fn is_local(&self) -> bool {
        self.is_local
    }

    pub fn set_local(&mut self, is_local: bool) {
        self.is_local = is_local;
    }

    pub fn set_background(&mut self, freqs: &[f32]) -> Result<()> {
        if freqs.len() != self.kp {
            return Err(PhmmError::InvalidArg(format!(
                "background frequency vector length {} != Kp={}",
                freqs.len(),
                self.kp
            )));
        }
        self.bg_freq = freqs.to_vec();
        Ok(())
    }

    /// Match emission log-odds at node `k` (`1..=M`) for canonical symbol `x`
    /// (`x < Kp`, where `Kp` excludes degeneracy codes the caller hasn't registered
    /// a weighted combination for — see [`Profile::msc_combined`] for degenerate
    /// symbols).
    #[inline]
    pub fn msc(&self, k: usize, x: usize) -> f32 {
        self.msc[k * self.kp + x]
    }

    pub fn set_msc(&mut self, k: usize, x: usize, score: f32) {
        self.msc[k * self.kp + x] = score;
    }

    /// Insert emission log-odds at node `k` (`1..M`; `I_M` does not exist).
    #[inline]
    pub fn isc(&self, k: usize, x: usize) -> f32 {
        if k >= self.m {
            return f32::NEG_INFINITY;
        }
        self.isc[k * self.kp + x]
    }

    pub fn set_isc(&mut self, k: usize, x: usize, score: f32) {
        self.isc[k * self.kp + x] = score;
    }

    /// Emission score combining canonical-symbol log-odds for a degenerate residue
    /// code by a background-frequency-weighted sum, per spec.md §3.2. `weights` must
    /// sum to 1 over the canonical alphabet (the first `kp - degenerate` symbols);
    /// the degenerate code itself never has its own row in `msc`/`isc`.
    pub fn msc_combined(&self, k: usize, weights: &[f32]) -> f32 {
        debug_assert_eq!(weights.len(), self.kp);
        let mut acc = 0.0_f64;
        for (x, &w) in weights.iter().enumerate() {
            if w > 0.0 {
                let p = self.bg_freq[x] as f64 * (self.msc(k, x) as f64).exp();
                acc += w as f64 * p;
            }
        }
        if acc <= 0.0 {
            f32::NEG_INFINITY
        } else {
            acc.ln() as f32
        }
    }

    /// Transition score from node `k` of the given type. `Lm`/`Gm` use the
    /// off-by-one storage convention: `tsc(k-1, Lm)` is the score of `L -> M_k`.
    #[inline]
    pub fn tsc(&self, k: usize, which: Trans) -> f32 {
        self.tsc[k * NTRANS + which as usize]
    }

    pub fn set_tsc(&mut self, k: usize, which: Trans, score: f32) {
        self.tsc[k * NTRANS + which as usize] = score;
    }

    /// `L -> M_k` entry score (handles the off-by-one storage internally).
    #[inline]
    pub fn lm_entry(&self, k: usize) -> f32 {
        self.tsc(k - 1, Trans::Lm)
    }

    /// `G -> M_k` entry score (handles the off-by-one storage internally).
    #[inline]
    pub fn gm_entry(&self, k: usize) -> f32 {
        self.tsc(k - 1, Trans::Gm)
    }

    pub fn set_lm_entry(&mut self, k: usize, score: f32) {
        self.set_tsc(k - 1, Trans::Lm, score);
    }

    pub fn set_gm_entry(&mut self, k: usize, score: f32) {
        self.set_tsc(k - 1, Trans::Gm, score);
    }

    /// Flanking-state transition score. For `FlankState::B`, `which` is interpreted
    /// as local-entry (`Loop`, index 0) / glocal-entry (`Move`, index 1) rather than
    /// a true loop/move pair.
    #[inline]
    pub fn xsc(&self, state: FlankState, which: FlankMove) -> f32 {
        let arr = match state {
            FlankState::N => &self.xsc_n,
            FlankState::J => &self.xsc_j,
            FlankState::C => &self.xsc_c,
            FlankState::E => &self.xsc_e,
            FlankState::B => &self.xsc_b,
        };
        arr[which as usize]
    }

    pub fn set_xsc(&mut self, state: FlankState, which: FlankMove, score: f32) {
        let arr = match state {
            FlankState::N => &mut self.xsc_n,
            FlankState::J => &mut self.xsc_j,
            FlankState::C => &mut self.xsc_c,
            FlankState::E => &mut self.xsc_e,
            FlankState::B => &mut self.xsc_b,
        };
        arr[which as usize] = score;
    }

    /// `log(1 - p_glocal)`: probability mass routed to local (`L`) entry.
    #[inline]
    pub fn xsc_b_local(&self) -> f32 {
        self.xsc_b[0]
    }

    /// `log(p_glocal)`: probability mass routed to glocal (`G`) entry.
    #[inline]
    pub fn xsc_b_glocal(&self) -> f32 {
        self.xsc_b[1]
    }

    pub fn set_entry_mix(&mut self, log_p_local: f32, log_p_glocal: f32) {
        self.xsc_b[0] = log_p_local;
        self.xsc_b[1] = log_p_glocal;
    }

    /// Reconfigure the N/J/C flanking loop/move scores for an expected target
    /// length `target_length`, modeling a uniform single-residue self-loop whose
    /// expected number of iterations matches the random-segment length expected for
    /// a comparison against a sequence of this length, under `expected_domains`
    /// hits (1 for unihit mode). This must be called before DP against a sequence of
    /// this length (spec.md §3.2 lifecycle clause); a `Profile` is otherwise
    /// immutable for the duration of one DP call.
    pub fn set_length(&mut self, target_length: usize, expected_domains: usize) -> Result<()> {
        if expected_domains == 0 {
            return Err(PhmmError::InvalidArg("expected_domains must be >= 1".into()));
        }
        // Expected length is distributed across N + C + (expected_domains-1) J segments,
        // i.e. (expected_domains + 1) flanking segments total emit the L - (alignment
        // length) residues between them; we approximate alignment length as 0 here,
        // which is the same "all flank, no hit yet" baseline HMMER's length model
        // reconfiguration uses before a hit is actually placed.
        let segments = (expected_domains + 1) as f32;
        let l = target_length as f32;
        let p_move = segments / (l + segments);
        let p_loop = 1.0 - p_move;
        let log_move = p_move.ln();
        let log_loop = if p_loop > 0.0 { p_loop.ln() } else { f32::NEG_INFINITY };

        self.xsc_n = [log_loop, log_move];
        self.xsc_c = [log_loop, log_move];
        self.xsc_j = [log_loop, log_move];
        self.configured_length = Some(target_length);
        Ok(())
    }

    pub fn configured_length(&self) -> Option<usize> {
        self.configured_length
    }

    /// Validate that every score array has been populated with finite-or-`-inf`
    /// values (no `NaN`), and that `is_local=false` profiles have `-inf` local exits
    /// at every non-final node, per spec.md §3.2's invariant. Intended for tests and
    /// for callers building profiles by hand.
    pub fn validate(&self) -> Result<()> {
        let check_finite = |v: f32, what: &str| -> Result<()> {
            if v.is_nan() {
                return Err(PhmmError::InvalidArg(format!("{what} is NaN")));
            }
            if v > 0.0 {
                return Err(PhmmError::InvalidArg(format!(
                    "{what} = {v} is a positive log-probability"
                )));
            }
            Ok(())
        };
        for k in 1..=self.m {
            for x in 0..self.kp {
                check_finite(self.msc(k, x), "msc")?;
                if k < self.m {
                    check_finite(self.isc(k, x), "isc")?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use rand::Rng;

    /// Build a small random profile over a DNA-like 4-symbol alphabet, with finite
    /// transition and emission scores everywhere a real profile would have them, for
    /// use by property tests (spec.md §8).
    pub fn random_profile(rng: &mut impl Rng, m: usize, kp: usize, is_local: bool) -> Profile {
        let mut p = Profile::new(m, kp).unwrap();
        p.set_local(is_local);

        let rand_logprob = |rng: &mut dyn rand::RngCore, n: usize| -> Vec<f32> {
            let raw: Vec<f32> = (0..n).map(|_| rng.gen_range(0.01..1.0)).collect();
            let sum: f32 = raw.iter().sum();
            raw.iter().map(|v| (v / sum).ln()).collect()
        };

        for k in 1..=m {
            for x in 0..kp {
                p.set_msc(k, x, rng.gen_range(-3.0..2.0));
                if k < m {
                    p.set_isc(k, x, rng.gen_range(-3.0..0.5));
                }
            }
        }
        for k in 0..=m {
            // [MM, IM, DM] sum to 1 at k<m; at k=m there's no forward M state so it
            // doesn't matter numerically (E exit handles k=M specially in the DP).
            let probs = rand_logprob(rng, 3);
            p.set_tsc(k, Trans::Mm, probs[0]);
            p.set_tsc(k, Trans::Im, probs[1]);
            p.set_tsc(k, Trans::Dm, probs[2]);

            let dprobs = rand_logprob(rng, 2);
            p.set_tsc(k, Trans::Md, dprobs[0]);
            p.set_tsc(k, Trans::Dd, dprobs[1]);

            let iprobs = rand_logprob(rng, 2);
            p.set_tsc(k, Trans::Mi, iprobs[0]);
            p.set_tsc(k, Trans::Ii, iprobs[1]);

            // uniform local entry across all M positions; arbitrary-but-fixed glocal
            // entry mass at k=0 only matters via its k-th slot being L->M_{k+1}.
            p.set_tsc(k, Trans::Lm, -(m as f32).ln());
            p.set_tsc(k, Trans::Gm, -(m as f32).ln());
        }
        // D_M -> E / M_M -> E are log(1) = 0 in the glocal end case; local uses the
        // uniform exit convention (handled in the DP itself, not stored here).
        p.set_entry_mix((0.5_f32).ln(), (0.5_f32).ln());
        p.set_xsc(FlankState::E, FlankMove::Loop, (0.5_f32).ln());
        p.set_xsc(FlankState::E, FlankMove::Move, (0.5_f32).ln());
        p.set_length(100, 1).unwrap();
        p
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn off_by_one_entry_storage() {
        let mut p = Profile::new(5, 4).unwrap();
        p.set_lm_entry(3, -1.5);
        assert_eq!(p.tsc(2, Trans::Lm), -1.5);
        assert_eq!(p.lm_entry(3), -1.5);
    }

    #[test]
    fn set_length_produces_valid_log_probs() {
        let mut p = Profile::new(5, 4).unwrap();
        p.set_length(200, 1).unwrap();
        assert!(p.xsc(FlankState::N, FlankMove::Loop) <= 0.0);
        assert!(p.xsc(FlankState::N, FlankMove::Move) <= 0.0);
        let loop_p = p.xsc(FlankState::N, FlankMove::Loop).exp();
        let move_p = p.xsc(FlankState::N, FlankMove::Move).exp();
        assert!((loop_p + move_p - 1.0).abs() < 1e-5);
    }

    #[test]
    fn insert_at_m_is_impossible() {
        let p = Profile::new(5, 4).unwrap();
        assert_eq!(p.isc(5, 0), f32::NEG_INFINITY);
    }

    #[test]
    fn rejects_zero_length_or_alphabet() {
        assert!(Profile::new(0, 4).is_err());
        assert!(Profile::new(4, 0).is_err());
    }
}
