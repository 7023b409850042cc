//! Sparse DP: restrict the dense `(L+1) x (M+1)` grid to a prefilter-supplied set
//! of plausible `(i, k)` cells, per spec.md §6. A [`SparseMask`] names, for every
//! sequence row, which model positions are "in" (worth computing); cells outside
//! the mask behave as `-inf` predecessors without ever being materialized.

use crate::alphabet::DigitalSequence;
use crate::error::{PhmmError, Result};
use crate::logsum::flogsum;
use crate::profile::{FlankMove, FlankState, Profile, Trans};

/// Per-row list of included model positions (ascending, deduplicated), one entry
/// per sequence row `1..=L` (row 0 has no mask entry: it's the all-flanking init row).
#[derive(Debug, Clone)]
pub struct SparseMask {
    l: usize,
    m: usize,
    rows: Vec<Vec<usize>>,
}

impl SparseMask {
    /// Build a mask from per-row included-position lists. Each nonempty row must
    /// list at least 2 positions (spec.md §6 invariant) and positions must be
    /// ascending and `<= m`.
    pub fn new(m: usize, l: usize, rows: Vec<Vec<usize>>) -> Result<Self> {
        if rows.len() != l {
            return Err(PhmmError::InvalidArg(format!(
                "sparse mask has {} rows, expected L={}",
                rows.len(),
                l
            )));
        }
        for (i, row) in rows.iter().enumerate() {
            if !row.is_empty() && row.len() < 2 {
                return Err(PhmmError::InvalidArg(format!(
                    "sparse mask row {} has {} < 2 included positions",
                    i + 1,
                    row.len()
                )));
            }
            for w in row.windows(2) {
                if w[0] >= w[1] {
                    return Err(PhmmError::InvalidArg(format!("sparse mask row {} is not strictly ascending", i + 1)));
                }
            }
            if let Some(&last) = row.last() {
                if last > m {
                    return Err(PhmmError::InvalidArg(format!("sparse mask row {} references k={} > M={}", i + 1, last, m)));
                }
            }
        }
        Ok(Self { l, m, rows })
    }

    pub fn l(&self) -> usize {
        self.l
    }
    pub fn m(&self) -> usize {
        self.m
    }

    pub fn row(&self, i: usize) -> &[usize] {
        if i == 0 {
            &[]
        } else {
            &self.rows[i - 1]
        }
    }

    pub fn contains(&self, i: usize, k: usize) -> bool {
        self.row(i).binary_search(&k).is_ok()
    }
}

/// Scores for one included `(i, k)` cell: `[ML, MG, IL, IG, DL, DG]`.
#[derive(Debug, Clone, Copy, Default)]
struct SparseCell([f32; 6]);

/// A sparse DP matrix: one [`SparseCell`] per mask-included `(i, k)`, plus a dense
/// per-row special-state supercell (specials are always dense: spec.md §6).
#[derive(Debug, Clone)]
pub struct SparseMatrix {
    mask: SparseMask,
    /// Parallel to `mask`'s rows: cell scores in the same order.
    cells: Vec<Vec<SparseCell>>,
    specials: Vec<[f32; crate::profile::NXCELLS]>,
}

impl SparseMatrix {
    fn new_for(mask: SparseMask) -> Self {
        let cells = mask.rows.iter().map(|r| vec![SparseCell::default(); r.len()]).collect();
        let specials = vec![[f32::NEG_INFINITY; crate::profile::NXCELLS]; mask.l + 1];
        Self { mask, cells, specials }
    }

    pub fn mask(&self) -> &SparseMask {
        &self.mask
    }

    fn cell_idx(&self, i: usize, k: usize) -> Option<usize> {
        if i == 0 {
            return None;
        }
        self.mask.rows[i - 1].binary_search(&k).ok()
    }

    fn get(&self, i: usize, k: usize, which: usize) -> f32 {
        match self.cell_idx(i, k) {
            Some(idx) => self.cells[i - 1][idx].0[which],
            None => f32::NEG_INFINITY,
        }
    }

    fn set(&mut self, i: usize, k: usize, which: usize, v: f32) {
        if let Some(idx) = self.cell_idx(i, k) {
            self.cells[i - 1][idx].0[which] = v;
        }
    }

    pub fn special(&self, i: usize, which: crate::profile::Special) -> f32 {
        self.specials[i][which as usize]
    }

    fn set_special(&mut self, i: usize, which: crate::profile::Special, v: f32) {
        self.specials[i][which as usize] = v;
    }
}

const ML: usize = 0;
const MG: usize = 1;
const IL: usize = 2;
const IG: usize = 3;
const DL: usize = 4;
const DG: usize = 5;

/// Sparse Forward: identical recurrence to [`crate::reference::forward`], but a
/// predecessor `(i-1, k-1)` etc. that the mask excludes contributes `-inf`
/// (exactly as if that cell had been computed and come out `-inf`), and rows with
/// an empty mask entry are a pure flanking-state pass-through.
pub fn sparse_forward(profile: &Profile, dsq: &DigitalSequence, mask: SparseMask) -> Result<(f32, SparseMatrix)> {
    use crate::profile::Special;
    if dsq.kp() != profile.kp() {
        return Err(PhmmError::InvalidArg("alphabet mismatch".into()));
    }
    let mut mx = SparseMatrix::new_for(mask);
    mx.set_special(0, Special::N, 0.0);
    let b0 = profile.xsc(FlankState::N, FlankMove::Move);
    mx.set_special(0, Special::B, b0);
    mx.set_special(0, Special::L, b0 + profile.xsc_b_local());
    mx.set_special(0, Special::G, b0 + profile.xsc_b_glocal());

    for i in 1..=mx.mask.l() {
        let x = dsq.residue(i) as usize;
        let row: Vec<usize> = mx.mask.row(i).to_vec();
        let l_prev = mx.special(i - 1, Special::L);
        let g_prev = mx.special(i - 1, Special::G);
        let mut e = f32::NEG_INFINITY;

        for &k in &row {
            let ml = flogsum(
                flogsum(
                    mx.get(i - 1, k - 1, ML) + profile.tsc(k - 1, Trans::Mm),
                    mx.get(i - 1, k - 1, IL) + profile.tsc(k - 1, Trans::Im),
                ),
                flogsum(
                    mx.get(i - 1, k - 1, DL) + profile.tsc(k - 1, Trans::Dm),
                    l_prev + profile.lm_entry(k),
                ),
            ) + profile.msc(k, x);
            let mg = flogsum(
                flogsum(
                    mx.get(i - 1, k - 1, MG) + profile.tsc(k - 1, Trans::Mm),
                    mx.get(i - 1, k - 1, IG) + profile.tsc(k - 1, Trans::Im),
                ),
                flogsum(
                    mx.get(i - 1, k - 1, DG) + profile.tsc(k - 1, Trans::Dm),
                    g_prev + profile.gm_entry(k),
                ),
            ) + profile.msc(k, x);
            let il = flogsum(
                mx.get(i - 1, k, ML) + profile.tsc(k, Trans::Mi),
                mx.get(i - 1, k, IL) + profile.tsc(k, Trans::Ii),
            ) + profile.isc(k, x);
            let ig = flogsum(
                mx.get(i - 1, k, MG) + profile.tsc(k, Trans::Mi),
                mx.get(i - 1, k, IG) + profile.tsc(k, Trans::Ii),
            ) + profile.isc(k, x);

            // Neighboring D predecessor: previous included position in this same
            // row (sparse DP never walks the excluded k's, so a D-chain simply
            // skips them, same as "deferred storage" but keyed off row membership
            // rather than k-1 arithmetic).
            let prev_in_row = row.iter().rev().find(|&&kk| kk < k).copied();
            let (dl_src, dg_src) = match prev_in_row {
                Some(pk) => (
                    flogsum(mx.get(i, pk, ML) + profile.tsc(pk, Trans::Md), mx.get(i, pk, DL) + profile.tsc(pk, Trans::Dd)),
                    flogsum(mx.get(i, pk, MG) + profile.tsc(pk, Trans::Md), mx.get(i, pk, DG) + profile.tsc(pk, Trans::Dd)),
                ),
                None => (f32::NEG_INFINITY, f32::NEG_INFINITY),
            };

            mx.set(i, k, ML, ml);
            mx.set(i, k, MG, mg);
            mx.set(i, k, IL, il);
            mx.set(i, k, IG, ig);
            mx.set(i, k, DL, dl_src);
            mx.set(i, k, DG, dg_src);

            e = flogsum(e, flogsum(ml, dl_src));
            if k == mx.mask.m() {
                e = flogsum(e, flogsum(mg, dg_src));
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
    }

    let sc = mx.special(mx.mask.l(), Special::C) + profile.xsc(FlankState::C, FlankMove::Move);
    Ok((sc, mx))
}

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

/// Sparse Viterbi: same max-plus recurrence as [`crate::reference::viterbi`],
/// restricted to mask-included cells; excluded predecessors contribute `-inf`.
pub fn sparse_viterbi(profile: &Profile, dsq: &DigitalSequence, mask: SparseMask) -> Result<(f32, SparseMatrix)> {
    use crate::profile::Special;
    if dsq.kp() != profile.kp() {
        return Err(PhmmError::InvalidArg("alphabet mismatch".into()));
    }
    let mut mx = SparseMatrix::new_for(mask);
    mx.set_special(0, Special::N, 0.0);
    let b0 = profile.xsc(FlankState::N, FlankMove::Move);
    mx.set_special(0, Special::B, b0);
    mx.set_special(0, Special::L, b0 + profile.xsc_b_local());
    mx.set_special(0, Special::G, b0 + profile.xsc_b_glocal());

    for i in 1..=mx.mask.l() {
        let x = dsq.residue(i) as usize;
        let row: Vec<usize> = mx.mask.row(i).to_vec();
        let l_prev = mx.special(i - 1, Special::L);
        let g_prev = mx.special(i - 1, Special::G);
        let mut e = f32::NEG_INFINITY;

        for &k in &row {
            let ml = max4(
                mx.get(i - 1, k - 1, ML) + profile.tsc(k - 1, Trans::Mm),
                mx.get(i - 1, k - 1, IL) + profile.tsc(k - 1, Trans::Im),
                mx.get(i - 1, k - 1, DL) + profile.tsc(k - 1, Trans::Dm),
                l_prev + profile.lm_entry(k),
            ) + profile.msc(k, x);
            let mg = max4(
                mx.get(i - 1, k - 1, MG) + profile.tsc(k - 1, Trans::Mm),
                mx.get(i - 1, k - 1, IG) + profile.tsc(k - 1, Trans::Im),
                mx.get(i - 1, k - 1, DG) + profile.tsc(k - 1, Trans::Dm),
                g_prev + profile.gm_entry(k),
            ) + profile.msc(k, x);
            let il = max2(
                mx.get(i - 1, k, ML) + profile.tsc(k, Trans::Mi),
                mx.get(i - 1, k, IL) + profile.tsc(k, Trans::Ii),
            ) + profile.isc(k, x);
            let ig = max2(
                mx.get(i - 1, k, MG) + profile.tsc(k, Trans::Mi),
                mx.get(i - 1, k, IG) + profile.tsc(k, Trans::Ii),
            ) + profile.isc(k, x);

            let prev_in_row = row.iter().rev().find(|&&kk| kk < k).copied();
            let (dl_src, dg_src) = match prev_in_row {
                Some(pk) => (
                    max2(mx.get(i, pk, ML) + profile.tsc(pk, Trans::Md), mx.get(i, pk, DL) + profile.tsc(pk, Trans::Dd)),
                    max2(mx.get(i, pk, MG) + profile.tsc(pk, Trans::Md), mx.get(i, pk, DG) + profile.tsc(pk, Trans::Dd)),
                ),
                None => (f32::NEG_INFINITY, f32::NEG_INFINITY),
            };

            mx.set(i, k, ML, ml);
            mx.set(i, k, MG, mg);
            mx.set(i, k, IL, il);
            mx.set(i, k, IG, ig);
            mx.set(i, k, DL, dl_src);
            mx.set(i, k, DG, dg_src);

            e = max4(e, ml, dl_src, f32::NEG_INFINITY);
            if k == mx.mask.m() {
                e = max4(e, mg, dg_src, f32::NEG_INFINITY);
            }
        }

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
    }

    let sc = mx.special(mx.mask.l(), Special::C) + profile.xsc(FlankState::C, FlankMove::Move);
    Ok((sc, mx))
}

/// Sparse Backward: mirrors [`crate::reference::backward`]'s emission-aware,
/// descending-`k` recurrence, restricted to mask-included cells. A transition
/// that steps into a mask-excluded `(i+1, k')` reads `-inf` through [`SparseMatrix::get`],
/// exactly as if that cell had been computed and come out `-inf`.
pub fn sparse_backward(profile: &Profile, dsq: &DigitalSequence, mask: SparseMask) -> Result<(f32, SparseMatrix)> {
    use crate::profile::Special;
    if dsq.kp() != profile.kp() {
        return Err(PhmmError::InvalidArg("alphabet mismatch".into()));
    }
    let m = mask.m();
    let l = mask.l();
    let mut mx = SparseMatrix::new_for(mask);

    mx.set_special(l, Special::C, profile.xsc(FlankState::C, FlankMove::Move));
    mx.set_special(l, Special::E, mx.special(l, Special::C) + profile.xsc(FlankState::E, FlankMove::Move));
    mx.set_special(l, Special::J, f32::NEG_INFINITY);
    mx.set_special(l, Special::B, f32::NEG_INFINITY);
    mx.set_special(l, Special::L, f32::NEG_INFINITY);
    mx.set_special(l, Special::G, f32::NEG_INFINITY);
    mx.set_special(l, Special::N, f32::NEG_INFINITY);
    let e_l = mx.special(l, Special::E);
    for &k in mx.mask.row(l).to_vec().iter() {
        mx.set(l, k, ML, e_l);
        mx.set(l, k, DL, e_l);
        mx.set(l, k, MG, if k == m { e_l } else { f32::NEG_INFINITY });
        mx.set(l, k, DG, if k == m { e_l } else { f32::NEG_INFINITY });
        mx.set(l, k, IL, f32::NEG_INFINITY);
        mx.set(l, k, IG, f32::NEG_INFINITY);
    }

    for i in (0..l).rev() {
        let x_next = dsq.residue(i + 1) as usize;

        let mut l_val = f32::NEG_INFINITY;
        let mut g_val = f32::NEG_INFINITY;
        for &k in mx.mask.row(i + 1) {
            l_val = flogsum(l_val, profile.lm_entry(k) + profile.msc(k, x_next) + mx.get(i + 1, k, ML));
            g_val = flogsum(g_val, profile.gm_entry(k) + profile.msc(k, x_next) + mx.get(i + 1, k, MG));
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
        mx.set_special(i, Special::E, e);
        mx.set_special(i, Special::C, c);

        let row: Vec<usize> = mx.mask.row(i).to_vec();
        let mut dl_suffix = f32::NEG_INFINITY;
        let mut dg_suffix = f32::NEG_INFINITY;
        for &k in row.iter().rev() {
            let to_m_l = if k < m { mx.get(i + 1, k + 1, ML) + profile.msc(k + 1, x_next) } else { f32::NEG_INFINITY };
            let to_m_g = if k < m { mx.get(i + 1, k + 1, MG) + profile.msc(k + 1, x_next) } else { f32::NEG_INFINITY };
            let to_i_l = if k < m { mx.get(i + 1, k, IL) + profile.isc(k, x_next) } else { f32::NEG_INFINITY };
            let to_i_g = if k < m { mx.get(i + 1, k, IG) + profile.isc(k, x_next) } else { f32::NEG_INFINITY };
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

            mx.set(i, k, ML, ml);
            mx.set(i, k, MG, mg);
            mx.set(i, k, DL, dl);
            mx.set(i, k, DG, dg);

            if k > 1 {
                let i_to_m_l = mx.get(i + 1, k, ML) + profile.msc(k, x_next);
                let i_to_m_g = mx.get(i + 1, k, MG) + profile.msc(k, x_next);
                let i_to_i_l = mx.get(i + 1, k - 1, IL) + profile.isc(k - 1, x_next);
                let i_to_i_g = mx.get(i + 1, k - 1, IG) + profile.isc(k - 1, x_next);
                let il = flogsum(profile.tsc(k - 1, Trans::Im) + i_to_m_l, profile.tsc(k - 1, Trans::Ii) + i_to_i_l);
                let ig = flogsum(profile.tsc(k - 1, Trans::Im) + i_to_m_g, profile.tsc(k - 1, Trans::Ii) + i_to_i_g);
                mx.set(i, k - 1, IL, il);
                mx.set(i, k - 1, IG, ig);
            }

            dl_suffix = dl;
            dg_suffix = dg;
        }
    }

    Ok((mx.special(0, Special::N), mx))
}

/// Posterior decoding over sparse Forward/Backward matrices (same mask): the
/// dense recurrence of [`crate::reference::decoding`], restricted to the cells
/// the mask actually materializes, with the same JJ/CC loop-only accounting and
/// per-row renormalization (spec.md §4.3.4, §6).
pub fn sparse_decoding(
    profile: &Profile,
    dsq: &DigitalSequence,
    fwd: &SparseMatrix,
    bwd: &SparseMatrix,
    fwd_sc: f32,
) -> Result<SparseMatrix> {
    use crate::profile::Special;
    if dsq.kp() != profile.kp() {
        return Err(PhmmError::InvalidArg("alphabet mismatch".into()));
    }
    let mask = fwd.mask.clone();
    let l = mask.l();
    let mut pp = SparseMatrix::new_for(mask);

    for i in 0..=l {
        for &k in pp.mask.row(i).to_vec().iter() {
            for which in [ML, MG, IL, IG, DL, DG] {
                let post = (fwd.get(i, k, which) + bwd.get(i, k, which) - fwd_sc).exp();
                pp.set(i, k, which, post.clamp(0.0, 1.0));
            }
        }
        for which in [Special::E, Special::N, Special::B, Special::L, Special::G] {
            let post = (fwd.special(i, which) + bwd.special(i, which) - fwd_sc).exp();
            pp.set_special(i, which, post.clamp(0.0, 1.0));
        }
        let (j_post, jj_post) = if i == 0 {
            (0.0, 0.0)
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
            (0.0, 0.0)
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

    const EMITTING: [usize; 4] = [ML, MG, IL, IG];
    for i in 1..=l {
        let mut sum = 0.0f32;
        for &k in pp.mask.row(i) {
            for which in EMITTING {
                sum += pp.get(i, k, which);
            }
        }
        sum += pp.special(i, Special::JJ);
        sum += pp.special(i, Special::CC);
        sum += pp.special(i, Special::N);
        if sum > 0.0 {
            let scale = 1.0 / sum;
            let row: Vec<usize> = pp.mask.row(i).to_vec();
            for k in row {
                for which in EMITTING {
                    pp.set(i, k, which, pp.get(i, k, which) * scale);
                }
            }
            pp.set_special(i, Special::JJ, pp.special(i, Special::JJ) * scale);
            pp.set_special(i, Special::CC, pp.special(i, Special::CC) * scale);
            pp.set_special(i, Special::N, pp.special(i, Special::N) * scale);
        }
    }

    Ok(pp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::testutil::random_profile;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn full_mask_matches_dense_forward() {
        crate::logsum::init();
        let mut rng = StdRng::seed_from_u64(31);
        let m = 5;
        let profile = random_profile(&mut rng, m, 4, true);
        let residues: Vec<u8> = (0..10).map(|_| rng.gen_range(0..4)).collect();
        let dsq = DigitalSequence::new(&residues, 4).unwrap();

        let rows: Vec<Vec<usize>> = (0..10).map(|_| (1..=m).collect()).collect();
        let mask = SparseMask::new(m, 10, rows).unwrap();
        let (sparse_sc, _) = sparse_forward(&profile, &dsq, mask).unwrap();

        let mut dense = crate::matrix::DenseMatrix::new(m, 10).unwrap();
        let dense_sc = crate::reference::forward(&profile, &dsq, &mut dense).unwrap();

        assert!((sparse_sc - dense_sc).abs() < 1e-2);
    }

    #[test]
    fn mask_rejects_single_entry_row() {
        assert!(SparseMask::new(5, 1, vec![vec![3]]).is_err());
    }

    #[test]
    fn full_mask_viterbi_matches_dense() {
        crate::logsum::init();
        let mut rng = StdRng::seed_from_u64(41);
        let m = 6;
        let profile = random_profile(&mut rng, m, 4, true);
        let residues: Vec<u8> = (0..12).map(|_| rng.gen_range(0..4)).collect();
        let dsq = DigitalSequence::new(&residues, 4).unwrap();

        let rows: Vec<Vec<usize>> = (0..12).map(|_| (1..=m).collect()).collect();
        let mask = SparseMask::new(m, 12, rows).unwrap();
        let (sparse_sc, _) = sparse_viterbi(&profile, &dsq, mask).unwrap();

        let mut dense = crate::matrix::DenseMatrix::new(m, 12).unwrap();
        let dense_sc = crate::reference::viterbi(&profile, &dsq, &mut dense).unwrap();

        assert!((sparse_sc - dense_sc).abs() < 1e-2);
    }

    #[test]
    fn full_mask_forward_matches_backward() {
        crate::logsum::init();
        let mut rng = StdRng::seed_from_u64(51);
        let m = 5;
        let profile = random_profile(&mut rng, m, 4, true);
        let residues: Vec<u8> = (0..9).map(|_| rng.gen_range(0..4)).collect();
        let dsq = DigitalSequence::new(&residues, 4).unwrap();

        let rows: Vec<Vec<usize>> = (0..9).map(|_| (1..=m).collect()).collect();
        let fwd_mask = SparseMask::new(m, 9, rows.clone()).unwrap();
        let bwd_mask = SparseMask::new(m, 9, rows).unwrap();
        let (fsc, _) = sparse_forward(&profile, &dsq, fwd_mask).unwrap();
        let (bsc, _) = sparse_backward(&profile, &dsq, bwd_mask).unwrap();

        assert!((fsc - bsc).abs() < 0.05, "sparse forward {fsc} vs backward {bsc} diverge");
    }

    #[test]
    fn full_mask_decoding_row_sums_renormalize_to_one() {
        crate::logsum::init();
        let mut rng = StdRng::seed_from_u64(61);
        let m = 5;
        let profile = random_profile(&mut rng, m, 4, true);
        let residues: Vec<u8> = (0..8).map(|_| rng.gen_range(0..4)).collect();
        let dsq = DigitalSequence::new(&residues, 4).unwrap();

        let rows: Vec<Vec<usize>> = (0..8).map(|_| (1..=m).collect()).collect();
        let fwd_mask = SparseMask::new(m, 8, rows.clone()).unwrap();
        let bwd_mask = SparseMask::new(m, 8, rows).unwrap();
        let (fsc, fwd) = sparse_forward(&profile, &dsq, fwd_mask).unwrap();
        let (_, bwd) = sparse_backward(&profile, &dsq, bwd_mask).unwrap();
        let pp = sparse_decoding(&profile, &dsq, &fwd, &bwd, fsc).unwrap();

        for i in 1..=8usize {
            let mut sum = 0.0f32;
            for &k in pp.mask.row(i) {
                for which in [ML, MG, IL, IG] {
                    sum += pp.get(i, k, which);
                }
            }
            sum += pp.special(i, crate::profile::Special::JJ);
            sum += pp.special(i, crate::profile::Special::CC);
            sum += pp.special(i, crate::profile::Special::N);
            assert!((sum - 1.0).abs() < 0.05, "row {i} sum {sum} not close to 1.0");
        }
    }
}
