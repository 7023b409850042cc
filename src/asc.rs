//! Anchor-set-constrained (ASC) DP, per spec.md §7: given one anchor `(i*, k*)`
//! per domain, split the DP plane per domain into an UP sector (rows before the
//! anchor row, columns before the anchor column, no `E`-exit) and a DOWN sector
//! (rows at/after the anchor row, columns at/after the anchor column, no `L`/`G`
//! entry). A domain `d`'s DOWN sector and the *next* domain's UP sector cover
//! almost the same row range (DOWN(d) additionally owns the anchor row itself):
//! they are two different path possibilities — still finishing domain `d`, or
//! already having exited it and started walking toward domain `d+1` — summed at
//! the same sequence positions, so their rows are built together in one sweep.
//! Specials (`E,N,J,B,L,G,C`) are written exactly once per row, by whichever
//! DOWN sector owns that row; the UP sector sharing the row only reads them back
//! (for `l_prev`/`g_prev`), mirroring how `reference.rs`'s Forward feeds `L`/`G`
//! into the next row's entry term without DOWN/UP ever racing on the same cell.

use crate::alphabet::DigitalSequence;
use crate::error::{PhmmError, Result};
use crate::logsum::flogsum;
use crate::profile::{FlankMove, FlankState, Profile, Special, Trans, NXCELLS};

/// One domain's anchor: the single `(i, k)` cell every path through that domain
/// is constrained to pass through as an `M` state (local or glocal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anchor {
    pub i: usize,
    pub k: usize,
}

/// An ordered, non-overlapping set of anchors, one per domain (ascending `i`).
#[derive(Debug, Clone)]
pub struct AnchorSet {
    anchors: Vec<Anchor>,
}

impl AnchorSet {
    pub fn new(anchors: Vec<Anchor>) -> Result<Self> {
        for w in anchors.windows(2) {
            if w[0].i >= w[1].i {
                return Err(PhmmError::InvalidArg("anchors must be strictly ascending in i".into()));
            }
        }
        Ok(Self { anchors })
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }
    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }
    pub fn get(&self, d: usize) -> Anchor {
        self.anchors[d]
    }
    pub fn iter(&self) -> impl Iterator<Item = &Anchor> {
        self.anchors.iter()
    }
}

const ML: usize = 0;
const MG: usize = 1;
const IL: usize = 2;
const IG: usize = 3;
const DL: usize = 4;
const DG: usize = 5;
const NCELLS: usize = 6;

/// One domain's sector: a dense-ish `(rows x cols)` table of the six main-cell
/// scores, offset so `(i0, k0)` is its first stored row/column. Reads outside
/// the stored range return `-inf` (the automatic encoding of "no path visits
/// this (row, column) from this sector" — e.g. `M(i, anchor.k)` for `i` past a
/// DOWN sector's anchor row is always `-inf`, since a single path occupies each
/// model column's `M` state exactly once).
struct SectorMx {
    i0: usize,
    k0: usize,
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl SectorMx {
    fn new(i0: usize, k0: usize, rows: usize, cols: usize) -> Self {
        Self { i0, k0, rows, cols, data: vec![f32::NEG_INFINITY; rows * cols * NCELLS] }
    }
    fn idx(&self, i: usize, k: usize, which: usize) -> usize {
        ((i - self.i0) * self.cols + (k - self.k0)) * NCELLS + which
    }
    fn get(&self, i: usize, k: usize, which: usize) -> f32 {
        if i < self.i0 || k < self.k0 || i - self.i0 >= self.rows || k - self.k0 >= self.cols {
            return f32::NEG_INFINITY;
        }
        self.data[self.idx(i, k, which)]
    }
    fn set(&mut self, i: usize, k: usize, which: usize, v: f32) {
        let idx = self.idx(i, k, which);
        self.data[idx] = v;
    }
}

/// A sparse-by-sector ASC matrix: an UP and a DOWN table per domain, plus a
/// flat per-row specials array spanning the whole sequence (specials are not
/// sector-local — `N`/`J`/`C` must propagate across every row regardless of
/// which domain's sector currently owns the main-cell computation there).
pub struct AscMatrix {
    m: usize,
    l: usize,
    anchors: AnchorSet,
    up: Vec<SectorMx>,
    down: Vec<SectorMx>,
    specials: Vec<[f32; NXCELLS]>,
}

impl AscMatrix {
    pub fn m(&self) -> usize {
        self.m
    }
    pub fn l(&self) -> usize {
        self.l
    }
    pub fn domain_count(&self) -> usize {
        self.down.len()
    }
    pub fn anchors(&self) -> &AnchorSet {
        &self.anchors
    }
    pub fn special(&self, i: usize, which: Special) -> f32 {
        self.specials[i][which as usize]
    }
}

fn validate_anchors(profile: &Profile, dsq: &DigitalSequence, anchors: &AnchorSet) -> Result<()> {
    if anchors.is_empty() {
        return Err(PhmmError::InvalidArg("ASC DP requires at least one anchor".into()));
    }
    let m = profile.m();
    let l = dsq.len();
    for a in anchors.iter() {
        if a.i == 0 || a.i > l || a.k == 0 || a.k > m {
            return Err(PhmmError::InvalidArg("anchor (i, k) out of bounds for this profile/sequence".into()));
        }
    }
    Ok(())
}

/// One row's worth of `E/N/J/B/L/G/C` forward specials, given the previous
/// row's specials and this row's own `E` (the local/glocal exit sum). `allow_j`
/// is false only while inside the last domain's own DOWN sector (no further
/// domain can be entered, so looping back through `J` is not a real option);
/// `allow_c` is true only there (an early exit to `C` would use fewer than the
/// anchor set's domain count).
fn fwd_specials_step(profile: &Profile, prev: &[f32; NXCELLS], e: f32, allow_j: bool, allow_c: bool) -> [f32; NXCELLS] {
    let mut row = [f32::NEG_INFINITY; NXCELLS];
    let n = prev[Special::N as usize] + profile.xsc(FlankState::N, FlankMove::Loop);
    let j = if allow_j {
        flogsum(
            prev[Special::J as usize] + profile.xsc(FlankState::J, FlankMove::Loop),
            e + profile.xsc(FlankState::E, FlankMove::Loop),
        )
    } else {
        f32::NEG_INFINITY
    };
    let c = if allow_c {
        flogsum(
            prev[Special::C as usize] + profile.xsc(FlankState::C, FlankMove::Loop),
            e + profile.xsc(FlankState::E, FlankMove::Move),
        )
    } else {
        f32::NEG_INFINITY
    };
    let b = flogsum(n + profile.xsc(FlankState::N, FlankMove::Move), j + profile.xsc(FlankState::J, FlankMove::Move));
    row[Special::E as usize] = e;
    row[Special::N as usize] = n;
    row[Special::J as usize] = j;
    row[Special::B as usize] = b;
    row[Special::L as usize] = b + profile.xsc_b_local();
    row[Special::G as usize] = b + profile.xsc_b_glocal();
    row[Special::C as usize] = c;
    row[Special::JJ as usize] = j;
    row[Special::CC as usize] = c;
    row
}

/// Fill one row of a forward UP sector (entering the domain anchored at
/// `(anchor_i, anchor_k)`), columns `1..anchor_k` exclusive, both local and
/// glocal tracks, using `l_prev`/`g_prev` (the previous row's `L`/`G` specials)
/// as the fresh-entry term alongside the usual M/I/D continuation.
#[allow(clippy::too_many_arguments)]
fn fwd_fill_up_row(profile: &Profile, up: &mut SectorMx, i: usize, anchor_k: usize, x: usize, l_prev: f32, g_prev: f32) {
    let mut dl_carry = f32::NEG_INFINITY;
    let mut dg_carry = f32::NEG_INFINITY;
    for k in 1..anchor_k {
        let ml = flogsum(
            flogsum(
                up.get(i - 1, k - 1, ML) + profile.tsc(k - 1, Trans::Mm),
                up.get(i - 1, k - 1, IL) + profile.tsc(k - 1, Trans::Im),
            ),
            flogsum(up.get(i - 1, k - 1, DL) + profile.tsc(k - 1, Trans::Dm), l_prev + profile.lm_entry(k)),
        ) + profile.msc(k, x);
        let mg = flogsum(
            flogsum(
                up.get(i - 1, k - 1, MG) + profile.tsc(k - 1, Trans::Mm),
                up.get(i - 1, k - 1, IG) + profile.tsc(k - 1, Trans::Im),
            ),
            flogsum(up.get(i - 1, k - 1, DG) + profile.tsc(k - 1, Trans::Dm), g_prev + profile.gm_entry(k)),
        ) + profile.msc(k, x);
        up.set(i, k, ML, ml);
        up.set(i, k, MG, mg);

        let il = flogsum(up.get(i - 1, k, ML) + profile.tsc(k, Trans::Mi), up.get(i - 1, k, IL) + profile.tsc(k, Trans::Ii))
            + profile.isc(k, x);
        let ig = flogsum(up.get(i - 1, k, MG) + profile.tsc(k, Trans::Mi), up.get(i - 1, k, IG) + profile.tsc(k, Trans::Ii))
            + profile.isc(k, x);
        up.set(i, k, IL, il);
        up.set(i, k, IG, ig);

        up.set(i, k, DL, dl_carry);
        up.set(i, k, DG, dg_carry);
        dl_carry = flogsum(ml + profile.tsc(k, Trans::Md), dl_carry + profile.tsc(k, Trans::Dd));
        dg_carry = flogsum(mg + profile.tsc(k, Trans::Md), dg_carry + profile.tsc(k, Trans::Dd));
    }
}

/// ASC Forward: run Forward restricted to each domain's UP/DOWN sectors,
/// chaining `J`/`C` across domains exactly as the unconstrained multihit
/// recursion would. Returns the overall score, which should match the
/// unconstrained Forward score when the anchors lie on the sequence's true
/// domain structure (spec.md §8 item 9's ASC analogue).
pub fn asc_forward(profile: &Profile, dsq: &DigitalSequence, anchors: &AnchorSet) -> Result<(f32, AscMatrix)> {
    validate_anchors(profile, dsq, anchors)?;
    let m = profile.m();
    let l = dsq.len();
    let d_count = anchors.len();

    let mut specials = vec![[f32::NEG_INFINITY; NXCELLS]; l + 1];
    specials[0][Special::N as usize] = 0.0;
    let b0 = profile.xsc(FlankState::N, FlankMove::Move);
    specials[0][Special::B as usize] = b0;
    specials[0][Special::L as usize] = b0 + profile.xsc_b_local();
    specials[0][Special::G as usize] = b0 + profile.xsc_b_glocal();

    let mut up: Vec<SectorMx> = Vec::with_capacity(d_count);
    let mut down: Vec<SectorMx> = Vec::with_capacity(d_count);

    // Segment 0: rows 1..anchor(0).i-1, pure flanking plus UP(0). No domain has
    // started, so E/J/C stay at -inf; only N/B/L/G propagate.
    let anchor0 = anchors.get(0);
    {
        let lo = 1usize;
        let hi = anchor0.i.saturating_sub(1);
        let rows = if hi >= lo { hi - lo + 1 } else { 0 };
        let mut up0 = SectorMx::new(lo.max(1), 1, rows, anchor0.k.saturating_sub(1));
        for i in lo..=hi {
            let x = dsq.residue(i) as usize;
            let l_prev = specials[i - 1][Special::L as usize];
            let g_prev = specials[i - 1][Special::G as usize];
            fwd_fill_up_row(profile, &mut up0, i, anchor0.k, x, l_prev, g_prev);
            let n = specials[i - 1][Special::N as usize] + profile.xsc(FlankState::N, FlankMove::Loop);
            let b = n + profile.xsc(FlankState::N, FlankMove::Move);
            specials[i][Special::N as usize] = n;
            specials[i][Special::B as usize] = b;
            specials[i][Special::L as usize] = b + profile.xsc_b_local();
            specials[i][Special::G as usize] = b + profile.xsc_b_glocal();
        }
        up.push(up0);
    }

    for d in 0..d_count {
        let anchor = anchors.get(d);
        let is_last = d + 1 == d_count;
        let domain_end = if is_last { l } else { anchors.get(d + 1).i - 1 };
        let mut down_mx = SectorMx::new(anchor.i, anchor.k, domain_end - anchor.i + 1, m - anchor.k + 1);

        // Seed the anchor cell from UP(d)'s last row (prev_row = anchor.i - 1) and
        // the L/G entry score; both local and glocal diagonal-continuation terms
        // are needed (a path can arrive at the anchor already mid-UP-chain, not
        // only via a fresh L/G entry).
        let prev_row = anchor.i - 1;
        let (mlp, ilp, dlp, mgp, igp, dgp) = if anchor.k >= 2 {
            let up_d = &up[d];
            (
                up_d.get(prev_row, anchor.k - 1, ML),
                up_d.get(prev_row, anchor.k - 1, IL),
                up_d.get(prev_row, anchor.k - 1, DL),
                up_d.get(prev_row, anchor.k - 1, MG),
                up_d.get(prev_row, anchor.k - 1, IG),
                up_d.get(prev_row, anchor.k - 1, DG),
            )
        } else {
            let n = f32::NEG_INFINITY;
            (n, n, n, n, n, n)
        };
        let entry_l = specials[prev_row][Special::L as usize] + profile.lm_entry(anchor.k);
        let entry_g = specials[prev_row][Special::G as usize] + profile.gm_entry(anchor.k);
        let x0 = dsq.residue(anchor.i) as usize;
        let ml0 = flogsum(
            flogsum(mlp + profile.tsc(anchor.k - 1, Trans::Mm), ilp + profile.tsc(anchor.k - 1, Trans::Im)),
            flogsum(dlp + profile.tsc(anchor.k - 1, Trans::Dm), entry_l),
        ) + profile.msc(anchor.k, x0);
        let mg0 = flogsum(
            flogsum(mgp + profile.tsc(anchor.k - 1, Trans::Mm), igp + profile.tsc(anchor.k - 1, Trans::Im)),
            flogsum(dgp + profile.tsc(anchor.k - 1, Trans::Dm), entry_g),
        ) + profile.msc(anchor.k, x0);
        down_mx.set(anchor.i, anchor.k, ML, ml0);
        down_mx.set(anchor.i, anchor.k, MG, mg0);

        let next_anchor = if is_last { None } else { Some(anchors.get(d + 1)) };
        let mut next_up = next_anchor.map(|na| {
            let lo = anchor.i + 1;
            let hi = na.i.saturating_sub(1);
            let rows = if hi >= lo { hi - lo + 1 } else { 0 };
            SectorMx::new(lo.max(anchor.i + 1), 1, rows, na.k.saturating_sub(1))
        });

        for i in anchor.i..=domain_end {
            let x = dsq.residue(i) as usize;
            let mut dl_carry = f32::NEG_INFINITY;
            let mut dg_carry = f32::NEG_INFINITY;
            let mut e_i = f32::NEG_INFINITY;

            for k in anchor.k..=m {
                let (ml, mg) = if i == anchor.i && k == anchor.k {
                    (ml0, mg0)
                } else {
                    let mlp = down_mx.get(i - 1, k - 1, ML);
                    let ilp = down_mx.get(i - 1, k - 1, IL);
                    let dlp = down_mx.get(i - 1, k - 1, DL);
                    let mgp = down_mx.get(i - 1, k - 1, MG);
                    let igp = down_mx.get(i - 1, k - 1, IG);
                    let dgp = down_mx.get(i - 1, k - 1, DG);
                    let ml = flogsum(
                        flogsum(mlp + profile.tsc(k - 1, Trans::Mm), ilp + profile.tsc(k - 1, Trans::Im)),
                        dlp + profile.tsc(k - 1, Trans::Dm),
                    ) + profile.msc(k, x);
                    let mg = flogsum(
                        flogsum(mgp + profile.tsc(k - 1, Trans::Mm), igp + profile.tsc(k - 1, Trans::Im)),
                        dgp + profile.tsc(k - 1, Trans::Dm),
                    ) + profile.msc(k, x);
                    (ml, mg)
                };
                down_mx.set(i, k, ML, ml);
                down_mx.set(i, k, MG, mg);

                let il = if k < m {
                    flogsum(down_mx.get(i - 1, k, ML) + profile.tsc(k, Trans::Mi), down_mx.get(i - 1, k, IL) + profile.tsc(k, Trans::Ii))
                        + profile.isc(k, x)
                } else {
                    f32::NEG_INFINITY
                };
                let ig = if k < m {
                    flogsum(down_mx.get(i - 1, k, MG) + profile.tsc(k, Trans::Mi), down_mx.get(i - 1, k, IG) + profile.tsc(k, Trans::Ii))
                        + profile.isc(k, x)
                } else {
                    f32::NEG_INFINITY
                };
                down_mx.set(i, k, IL, il);
                down_mx.set(i, k, IG, ig);

                down_mx.set(i, k, DL, dl_carry);
                down_mx.set(i, k, DG, dg_carry);
                dl_carry = flogsum(ml + profile.tsc(k, Trans::Md), dl_carry + profile.tsc(k, Trans::Dd));
                dg_carry = flogsum(mg + profile.tsc(k, Trans::Md), dg_carry + profile.tsc(k, Trans::Dd));

                e_i = flogsum(e_i, flogsum(ml, down_mx.get(i, k, DL)));
                if k == m {
                    e_i = flogsum(e_i, flogsum(mg, dg_carry));
                }
            }

            if let (Some(na), Some(nu)) = (next_anchor, next_up.as_mut()) {
                if i > anchor.i && i < na.i {
                    let l_prev = specials[i - 1][Special::L as usize];
                    let g_prev = specials[i - 1][Special::G as usize];
                    fwd_fill_up_row(profile, nu, i, na.k, x, l_prev, g_prev);
                }
            }

            specials[i] = fwd_specials_step(profile, &specials[i - 1], e_i, !is_last, is_last);
        }

        if let Some(nu) = next_up {
            up.push(nu);
        }
        down.push(down_mx);
    }

    let sc = specials[l][Special::C as usize] + profile.xsc(FlankState::C, FlankMove::Move);
    Ok((sc, AscMatrix { m, l, anchors: anchors.clone(), up, down, specials }))
}

/// Entry-track backward sum toward domain `d`'s anchor at row `row + 1`: sums
/// `lm_entry(k)`/`gm_entry(k)` weighted by the backward `M` value at `(row+1,
/// k)`, reading the anchor column from `down_d` and every other column from
/// `up_d` (columns `>= anchor.k` besides the anchor itself are never valid
/// fresh-entry targets, since the anchor row's `M` state must land exactly on
/// `anchor.k`; `SectorMx::get` encodes that automatically).
fn bwd_entry_track(
    profile: &Profile,
    dsq: &DigitalSequence,
    up_d: &SectorMx,
    down_d: &SectorMx,
    anchor: Anchor,
    row: usize,
) -> (f32, f32) {
    let mut l_val = f32::NEG_INFINITY;
    let mut g_val = f32::NEG_INFINITY;
    let x = dsq.residue(row) as usize;
    for k in 1..=anchor.k {
        let (mlv, mgv) = if k == anchor.k {
            (down_d.get(row, k, ML), down_d.get(row, k, MG))
        } else {
            (up_d.get(row, k, ML), up_d.get(row, k, MG))
        };
        l_val = flogsum(l_val, profile.lm_entry(k) + profile.msc(k, x) + mlv);
        g_val = flogsum(g_val, profile.gm_entry(k) + profile.msc(k, x) + mgv);
    }
    (l_val, g_val)
}

/// One row's worth of backward specials (mirrors `fwd_specials_step`'s masking,
/// in the reverse direction): `l_val`/`g_val` are the entry-track sums toward
/// whichever domain follows the row this is computed for (`-inf`/`-inf` if
/// there is none); `next` is row `i+1`'s already-known specials.
fn bwd_specials_step(profile: &Profile, next: &[f32; NXCELLS], l_val: f32, g_val: f32, allow_j: bool, allow_c_branch: bool) -> [f32; NXCELLS] {
    let mut row = [f32::NEG_INFINITY; NXCELLS];
    let b = flogsum(l_val + profile.xsc_b_local(), g_val + profile.xsc_b_glocal());
    let n = flogsum(next[Special::N as usize] + profile.xsc(FlankState::N, FlankMove::Loop), b + profile.xsc(FlankState::N, FlankMove::Move));
    let j = if allow_j {
        flogsum(next[Special::J as usize] + profile.xsc(FlankState::J, FlankMove::Loop), b + profile.xsc(FlankState::J, FlankMove::Move))
    } else {
        f32::NEG_INFINITY
    };
    let e = if allow_c_branch {
        flogsum(j + profile.xsc(FlankState::E, FlankMove::Loop), next[Special::C as usize] + profile.xsc(FlankState::E, FlankMove::Move))
    } else {
        j + profile.xsc(FlankState::E, FlankMove::Loop)
    };
    let c = next[Special::C as usize] + profile.xsc(FlankState::C, FlankMove::Loop);
    row[Special::L as usize] = l_val;
    row[Special::G as usize] = g_val;
    row[Special::B as usize] = b;
    row[Special::N as usize] = n;
    row[Special::J as usize] = j;
    row[Special::JJ as usize] = j;
    row[Special::E as usize] = e;
    row[Special::C as usize] = c;
    row[Special::CC as usize] = c;
    row
}

fn bwd_seed_down_boundary(down_mx: &mut SectorMx, anchor_k: usize, m: usize, row: usize, e: f32) {
    for k in anchor_k..=m {
        down_mx.set(row, k, ML, e);
        down_mx.set(row, k, DL, e);
        down_mx.set(row, k, MG, if k == m { e } else { f32::NEG_INFINITY });
        down_mx.set(row, k, DG, if k == m { e } else { f32::NEG_INFINITY });
        down_mx.set(row, k, IL, f32::NEG_INFINITY);
        down_mx.set(row, k, IG, f32::NEG_INFINITY);
    }
}

/// Generic backward main-cell recurrence for one DOWN-sector row, restricted
/// to columns `[anchor_k, m]`; `to_e` is this row's own `E` (already computed
/// by `bwd_specials_step`), matching `reference.rs::backward`'s fixed bug of
/// reading a fresh, same-row `E` rather than a stale one.
fn bwd_down_row(
    profile: &Profile,
    dsq: &DigitalSequence,
    down_mx: &mut SectorMx,
    anchor_k: usize,
    m: usize,
    i: usize,
    to_e: f32,
) {
    let x_next = dsq.residue(i + 1) as usize;
    let mut dl_suffix = f32::NEG_INFINITY;
    let mut dg_suffix = f32::NEG_INFINITY;
    for k in (anchor_k..=m).rev() {
        let to_m_l = if k < m { down_mx.get(i + 1, k + 1, ML) + profile.msc(k + 1, x_next) } else { f32::NEG_INFINITY };
        let to_m_g = if k < m { down_mx.get(i + 1, k + 1, MG) + profile.msc(k + 1, x_next) } else { f32::NEG_INFINITY };
        let to_i_l = if k < m { down_mx.get(i + 1, k, IL) + profile.isc(k, x_next) } else { f32::NEG_INFINITY };
        let to_i_g = if k < m { down_mx.get(i + 1, k, IG) + profile.isc(k, x_next) } else { f32::NEG_INFINITY };

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

        down_mx.set(i, k, ML, ml);
        down_mx.set(i, k, MG, mg);
        down_mx.set(i, k, DL, dl);
        down_mx.set(i, k, DG, dg);

        if k > anchor_k {
            // I_{k-1}(i) steps into row i+1: to M_k via Im (emission at k), or
            // to I_{k-1}(i+1) via Ii (emission at k-1). Row i+1 data only.
            let i_to_m_l = down_mx.get(i + 1, k, ML) + profile.msc(k, x_next);
            let i_to_m_g = down_mx.get(i + 1, k, MG) + profile.msc(k, x_next);
            let i_to_i_l = down_mx.get(i + 1, k - 1, IL) + profile.isc(k - 1, x_next);
            let i_to_i_g = down_mx.get(i + 1, k - 1, IG) + profile.isc(k - 1, x_next);
            let il = flogsum(profile.tsc(k - 1, Trans::Im) + i_to_m_l, profile.tsc(k - 1, Trans::Ii) + i_to_i_l);
            let ig = flogsum(profile.tsc(k - 1, Trans::Im) + i_to_m_g, profile.tsc(k - 1, Trans::Ii) + i_to_i_g);
            down_mx.set(i, k - 1, IL, il);
            down_mx.set(i, k - 1, IG, ig);
        }
        // `dl`/`dg` are D_k(i)'s own finished backward values (transition
        // score already folded in above); the next (lower) iteration
        // consumes them as-is via its own tsc(k-1, ..) lookup, so they
        // carry over unmodified rather than being re-transitioned here.
        dl_suffix = dl;
        dg_suffix = dg;
    }
}

/// Generic backward main-cell recurrence for one UP-sector row, restricted to
/// columns `[1, anchor_k)`. UP states never exit to `E` (`M -> E` is `-inf` in
/// UP, spec.md §7), so unlike DOWN there is no `to_e` term; the top of the
/// column range (`k+1 == anchor_k`) reads across into `down_mx`'s anchor
/// column, since that's where that column's backward value actually lives.
fn bwd_up_row(
    profile: &Profile,
    dsq: &DigitalSequence,
    up_mx: &mut SectorMx,
    down_mx: &SectorMx,
    anchor_k: usize,
    i: usize,
) {
    if anchor_k <= 1 {
        return;
    }
    let x_next = dsq.residue(i + 1) as usize;
    let mut dl_suffix = f32::NEG_INFINITY;
    let mut dg_suffix = f32::NEG_INFINITY;
    for k in (1..anchor_k).rev() {
        let (to_m_l, to_m_g) = if k + 1 == anchor_k {
            (
                down_mx.get(i + 1, anchor_k, ML) + profile.msc(anchor_k, x_next),
                down_mx.get(i + 1, anchor_k, MG) + profile.msc(anchor_k, x_next),
            )
        } else {
            (
                up_mx.get(i + 1, k + 1, ML) + profile.msc(k + 1, x_next),
                up_mx.get(i + 1, k + 1, MG) + profile.msc(k + 1, x_next),
            )
        };
        let to_i_l = up_mx.get(i + 1, k, IL) + profile.isc(k, x_next);
        let to_i_g = up_mx.get(i + 1, k, IG) + profile.isc(k, x_next);

        let ml = flogsum(
            flogsum(profile.tsc(k, Trans::Mm) + to_m_l, profile.tsc(k, Trans::Mi) + to_i_l),
            profile.tsc(k, Trans::Md) + dl_suffix,
        );
        let mg = flogsum(
            flogsum(profile.tsc(k, Trans::Mm) + to_m_g, profile.tsc(k, Trans::Mi) + to_i_g),
            profile.tsc(k, Trans::Md) + dg_suffix,
        );
        let dl = flogsum(profile.tsc(k, Trans::Dm) + to_m_l, profile.tsc(k, Trans::Dd) + dl_suffix);
        let dg = flogsum(profile.tsc(k, Trans::Dm) + to_m_g, profile.tsc(k, Trans::Dd) + dg_suffix);

        up_mx.set(i, k, ML, ml);
        up_mx.set(i, k, MG, mg);
        up_mx.set(i, k, DL, dl);
        up_mx.set(i, k, DG, dg);

        if k > 1 {
            // I_{k-1}(i) steps into row i+1: to M_k via Im, or to I_{k-1}(i+1)
            // via Ii. Reads row i+1 only, same caveat as `bwd_down_row`.
            let i_to_m_l = up_mx.get(i + 1, k, ML) + profile.msc(k, x_next);
            let i_to_m_g = up_mx.get(i + 1, k, MG) + profile.msc(k, x_next);
            let i_to_i_l = up_mx.get(i + 1, k - 1, IL) + profile.isc(k - 1, x_next);
            let i_to_i_g = up_mx.get(i + 1, k - 1, IG) + profile.isc(k - 1, x_next);
            let il = flogsum(profile.tsc(k - 1, Trans::Im) + i_to_m_l, profile.tsc(k - 1, Trans::Ii) + i_to_i_l);
            let ig = flogsum(profile.tsc(k - 1, Trans::Im) + i_to_m_g, profile.tsc(k - 1, Trans::Ii) + i_to_i_g);
            up_mx.set(i, k - 1, IL, il);
            up_mx.set(i, k - 1, IG, ig);
        }
        // See `bwd_down_row`: carry D's own finished value forward unmodified.
        dl_suffix = dl;
        dg_suffix = dg;
    }
}

/// ASC Backward: the mirror image of [`asc_forward`], processing domains in
/// descending order. Returns `specials[0][N]`, which should match
/// [`asc_forward`]'s score within `flogsum` table tolerance (spec.md §8 item 2
/// carried into the ASC setting).
pub fn asc_backward(profile: &Profile, dsq: &DigitalSequence, anchors: &AnchorSet) -> Result<(f32, AscMatrix)> {
    validate_anchors(profile, dsq, anchors)?;
    let m = profile.m();
    let l = dsq.len();
    let d_count = anchors.len();

    let mut specials = vec![[f32::NEG_INFINITY; NXCELLS]; l + 1];
    let c_l = profile.xsc(FlankState::C, FlankMove::Move);
    specials[l][Special::C as usize] = c_l;
    specials[l][Special::CC as usize] = c_l;
    specials[l][Special::E as usize] = c_l + profile.xsc(FlankState::E, FlankMove::Move);

    let mut down: Vec<SectorMx> = (0..d_count).map(|_| SectorMx::new(0, 0, 0, 0)).collect();
    let mut up: Vec<SectorMx> = (0..d_count).map(|_| SectorMx::new(0, 0, 0, 0)).collect();

    for d in (0..d_count).rev() {
        let anchor = anchors.get(d);
        let is_last = d + 1 == d_count;
        let domain_end = if is_last { l } else { anchors.get(d + 1).i - 1 };
        down[d] = SectorMx::new(anchor.i, anchor.k, domain_end - anchor.i + 1, m - anchor.k + 1);
        if !is_last {
            let next = anchors.get(d + 1);
            let lo = anchor.i + 1;
            let hi = domain_end;
            let rows = if hi >= lo { hi - lo + 1 } else { 0 };
            up[d + 1] = SectorMx::new(lo.max(anchor.i + 1), 1, rows, next.k.saturating_sub(1));
        }

        if !is_last {
            let next = anchors.get(d + 1);
            let (l_val, g_val) = bwd_entry_track(profile, dsq, &up[d + 1], &down[d + 1], next, domain_end + 1);
            specials[domain_end] = bwd_specials_step(profile, &specials[domain_end + 1], l_val, g_val, true, false);
        }
        // is_last: specials[l] already set above.

        bwd_seed_down_boundary(&mut down[d], anchor.k, m, domain_end, specials[domain_end][Special::E as usize]);
        if !is_last && domain_end > anchor.i {
            let next = anchors.get(d + 1);
            bwd_up_row(profile, dsq, &mut up[d + 1], &down[d + 1], next.k, domain_end);
        }

        for i in (anchor.i..domain_end).rev() {
            let (l_val, g_val) = if is_last {
                (f32::NEG_INFINITY, f32::NEG_INFINITY)
            } else {
                let next = anchors.get(d + 1);
                bwd_entry_track(profile, dsq, &up[d + 1], &down[d + 1], next, i + 1)
            };
            specials[i] = bwd_specials_step(profile, &specials[i + 1], l_val, g_val, !is_last, is_last);
            bwd_down_row(profile, dsq, &mut down[d], anchor.k, m, i, specials[i][Special::E as usize]);
            if !is_last && i > anchor.i {
                let next = anchors.get(d + 1);
                bwd_up_row(profile, dsq, &mut up[d + 1], &down[d + 1], next.k, i);
            }
        }
    }

    // Segment 0: rows 1..anchor(0).i-1, entering domain 0 (up[0]) and the pure
    // flanking propagation down to row 0 (no domain precedes this segment, so
    // J is always allowed and E never takes the C-branch).
    let anchor0 = anchors.get(0);
    {
        let lo = 1usize;
        let hi = anchor0.i.saturating_sub(1);
        let rows = if hi >= lo { hi - lo + 1 } else { 0 };
        up[0] = SectorMx::new(lo.max(1), 1, rows, anchor0.k.saturating_sub(1));
        for i in (0..=hi).rev() {
            let (l_val, g_val) = bwd_entry_track(profile, dsq, &up[0], &down[0], anchor0, i + 1);
            specials[i] = bwd_specials_step(profile, &specials[i + 1], l_val, g_val, true, false);
            if i >= lo {
                bwd_up_row(profile, dsq, &mut up[0], &down[0], anchor0.k, i);
            }
        }
    }

    let sc = specials[0][Special::N as usize];
    Ok((sc, AscMatrix { m, l, anchors: anchors.clone(), up, down, specials }))
}

/// Posterior state-occupancy probabilities restricted to the UP/DOWN sectors
/// an anchor set actually populates, plus a row-wise renormalization matching
/// `reference::decoding`'s (spec.md §4.3.4).
pub struct AscPosterior {
    m: usize,
    l: usize,
    up: Vec<SectorMx>,
    down: Vec<SectorMx>,
    specials: Vec<[f32; NXCELLS]>,
}

impl AscPosterior {
    pub fn m(&self) -> usize {
        self.m
    }
    pub fn l(&self) -> usize {
        self.l
    }
    pub fn special(&self, i: usize, which: Special) -> f32 {
        self.specials[i][which as usize]
    }
    pub fn down_main(&self, d: usize, i: usize, k: usize, which: usize) -> f32 {
        self.down[d].get(i, k, which)
    }
    pub fn up_main(&self, d: usize, i: usize, k: usize, which: usize) -> f32 {
        self.up[d].get(i, k, which)
    }
}

const EMITTING: [usize; 4] = [ML, MG, IL, IG];

fn post(fwd_v: f32, bwd_v: f32, totsc: f32) -> f32 {
    (fwd_v + bwd_v - totsc).exp().clamp(0.0, 1.0)
}

fn posterior_sector(fwd_mx: &SectorMx, bwd_mx: &SectorMx, totsc: f32) -> SectorMx {
    let mut out = SectorMx::new(fwd_mx.i0, fwd_mx.k0, fwd_mx.rows, fwd_mx.cols);
    for i in fwd_mx.i0..fwd_mx.i0 + fwd_mx.rows {
        for k in fwd_mx.k0..fwd_mx.k0 + fwd_mx.cols {
            for which in [ML, MG, IL, IG, DL, DG] {
                out.set(i, k, which, post(fwd_mx.get(i, k, which), bwd_mx.get(i, k, which), totsc));
            }
        }
    }
    out
}

/// ASC posterior decoding: combine an [`asc_forward`] and [`asc_backward`]
/// pair (against the same profile/sequence/anchors, with Forward's overall
/// score `fwd_sc`) into per-cell state-occupancy posteriors.
pub fn asc_decoding(profile: &Profile, fwd: &AscMatrix, bwd: &AscMatrix, fwd_sc: f32) -> Result<AscPosterior> {
    if fwd.m != bwd.m || fwd.l != bwd.l || fwd.down.len() != bwd.down.len() {
        return Err(PhmmError::InvalidArg(
            "ASC decoding requires forward/backward matrices built from the same profile/sequence/anchors".into(),
        ));
    }
    let l = fwd.l;
    let d_count = fwd.down.len();

    let down: Vec<SectorMx> = (0..d_count).map(|d| posterior_sector(&fwd.down[d], &bwd.down[d], fwd_sc)).collect();
    let up: Vec<SectorMx> = (0..=d_count).map(|d| posterior_sector(&fwd.up[d], &bwd.up[d], fwd_sc)).collect();

    let mut specials = vec![[0.0f32; NXCELLS]; l + 1];
    for i in 0..=l {
        for which in [Special::E, Special::N, Special::B, Special::L, Special::G] {
            specials[i][which as usize] = post(fwd.special(i, which), bwd.special(i, which), fwd_sc);
        }
        let (j_post, jj_post) = if i == 0 {
            (0.0, 0.0)
        } else {
            let j = post(fwd.special(i, Special::J), bwd.special(i, Special::J), fwd_sc);
            let jj = (fwd.special(i - 1, Special::J) + profile.xsc(FlankState::J, FlankMove::Loop) + bwd.special(i, Special::J) - fwd_sc)
                .exp()
                .clamp(0.0, 1.0);
            (j, jj)
        };
        let (c_post, cc_post) = if i == 0 {
            (0.0, 0.0)
        } else {
            let c = post(fwd.special(i, Special::C), bwd.special(i, Special::C), fwd_sc);
            let cc = (fwd.special(i - 1, Special::C) + profile.xsc(FlankState::C, FlankMove::Loop) + bwd.special(i, Special::C) - fwd_sc)
                .exp()
                .clamp(0.0, 1.0);
            (c, cc)
        };
        specials[i][Special::J as usize] = j_post;
        specials[i][Special::JJ as usize] = jj_post;
        specials[i][Special::C as usize] = c_post;
        specials[i][Special::CC as usize] = cc_post;
    }

    let mut pp = AscPosterior { m: fwd.m, l, up, down, specials };

    // Row-wise renormalization: every sector cell touching row i, summed with
    // JJ/CC/N, should total 1.0.
    for i in 1..=l {
        let mut sum = 0.0f32;
        for mx in pp.down.iter().chain(pp.up.iter()) {
            if i < mx.i0 || i - mx.i0 >= mx.rows {
                continue;
            }
            for k in mx.k0..mx.k0 + mx.cols {
                for which in EMITTING {
                    sum += mx.get(i, k, which);
                }
            }
        }
        sum += pp.specials[i][Special::JJ as usize];
        sum += pp.specials[i][Special::CC as usize];
        sum += pp.specials[i][Special::N as usize];
        if sum > 0.0 {
            let scale = 1.0 / sum;
            for mx in pp.down.iter_mut().chain(pp.up.iter_mut()) {
                if i < mx.i0 || i - mx.i0 >= mx.rows {
                    continue;
                }
                for k in mx.k0..mx.k0 + mx.cols {
                    for which in EMITTING {
                        let v = mx.get(i, k, which) * scale;
                        mx.set(i, k, which, v);
                    }
                }
            }
            pp.specials[i][Special::JJ as usize] *= scale;
            pp.specials[i][Special::CC as usize] *= scale;
            pp.specials[i][Special::N as usize] *= scale;
        }
    }

    Ok(pp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alphabet::DigitalSequence;
    use crate::matrix::DenseMatrix;
    use crate::profile::testutil::random_profile;
    use crate::profile::Profile;
    use crate::reference::{forward, viterbi};
    use crate::trace::TraceState;
    use crate::traceback::viterbi_trace;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn anchor_set_rejects_unordered_anchors() {
        let r = AnchorSet::new(vec![Anchor { i: 5, k: 1 }, Anchor { i: 3, k: 2 }]);
        assert!(r.is_err());
    }

    #[test]
    fn anchor_set_accepts_ordered_anchors() {
        let set = AnchorSet::new(vec![Anchor { i: 3, k: 1 }, Anchor { i: 9, k: 4 }]).unwrap();
        assert_eq!(set.len(), 2);
    }

    fn seq(kp: usize, len: usize, seed: u64) -> DigitalSequence {
        let mut rng = StdRng::seed_from_u64(seed);
        let residues: Vec<u8> = (0..len).map(|_| rng.gen_range(0..kp as u8)).collect();
        DigitalSequence::new(&residues, kp).unwrap()
    }

    /// Derive a single-domain anchor set from a Viterbi trace: the trace's first
    /// `ML`/`MG` step becomes the domain's anchor.
    fn anchor_from_viterbi(profile: &Profile, dsq: &DigitalSequence) -> AnchorSet {
        let mut vmx = DenseMatrix::new(profile.m(), dsq.len()).unwrap();
        viterbi(profile, dsq, &mut vmx).unwrap();
        let trace = viterbi_trace(profile, dsq, &vmx).unwrap();
        let step = trace
            .steps()
            .iter()
            .find(|s| matches!(s.state, TraceState::ML | TraceState::MG))
            .expect("viterbi trace on a non-empty sequence must visit at least one match state");
        AnchorSet::new(vec![Anchor { i: step.i, k: step.k }]).unwrap()
    }

    #[test]
    fn asc_forward_bracketed_by_viterbi_and_plain_forward() {
        crate::logsum::init();
        let mut rng = StdRng::seed_from_u64(42);
        let profile = random_profile(&mut rng, 6, 4, true);
        let dsq = seq(4, 10, 43);

        let mut vmx = DenseMatrix::new(profile.m(), dsq.len()).unwrap();
        let viterbi_sc = viterbi(&profile, &dsq, &mut vmx).unwrap();

        let mut fmx = DenseMatrix::new(profile.m(), dsq.len()).unwrap();
        let forward_sc = forward(&profile, &dsq, &mut fmx).unwrap();

        let anchors = anchor_from_viterbi(&profile, &dsq);
        let (asc_sc, _) = asc_forward(&profile, &dsq, &anchors).unwrap();

        assert!(asc_sc <= forward_sc + 1e-3, "ASC forward {asc_sc} exceeded plain forward {forward_sc}");
        assert!(asc_sc >= viterbi_sc - 1e-3, "ASC forward {asc_sc} fell below viterbi {viterbi_sc}");
    }

    #[test]
    fn asc_forward_and_backward_totals_agree() {
        crate::logsum::init();
        let mut rng = StdRng::seed_from_u64(11);
        let profile = random_profile(&mut rng, 5, 4, true);
        let dsq = seq(4, 9, 12);
        let anchors = anchor_from_viterbi(&profile, &dsq);

        let (fwd_sc, _) = asc_forward(&profile, &dsq, &anchors).unwrap();
        let (bwd_sc, _) = asc_backward(&profile, &dsq, &anchors).unwrap();

        assert!((fwd_sc - bwd_sc).abs() < 1e-2, "ASC forward {fwd_sc} and backward {bwd_sc} disagree");
    }

    #[test]
    fn asc_decoding_row_sums_to_one() {
        crate::logsum::init();
        let mut rng = StdRng::seed_from_u64(21);
        let profile = random_profile(&mut rng, 5, 4, true);
        let dsq = seq(4, 9, 13);
        let anchors = anchor_from_viterbi(&profile, &dsq);

        let (fwd_sc, fwd_mx) = asc_forward(&profile, &dsq, &anchors).unwrap();
        let (_, bwd_mx) = asc_backward(&profile, &dsq, &anchors).unwrap();
        let pp = asc_decoding(&profile, &fwd_mx, &bwd_mx, fwd_sc).unwrap();

        for i in 1..=dsq.len() {
            let mut sum = 0.0f32;
            for d in 0..pp.down.len() {
                for k in pp.down[d].k0..pp.down[d].k0 + pp.down[d].cols {
                    if i < pp.down[d].i0 || i - pp.down[d].i0 >= pp.down[d].rows {
                        continue;
                    }
                    for which in EMITTING {
                        sum += pp.down_main(d, i, k, which);
                    }
                }
            }
            for d in 0..pp.up.len() {
                if i < pp.up[d].i0 || i - pp.up[d].i0 >= pp.up[d].rows {
                    continue;
                }
                for k in pp.up[d].k0..pp.up[d].k0 + pp.up[d].cols {
                    for which in EMITTING {
                        sum += pp.up_main(d, i, k, which);
                    }
                }
            }
            sum += pp.special(i, Special::JJ);
            sum += pp.special(i, Special::CC);
            sum += pp.special(i, Special::N);
            assert!((sum - 1.0).abs() < 1e-3, "row {i} posterior sum {sum} != 1.0");
        }
    }
}
