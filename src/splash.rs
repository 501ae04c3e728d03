// C8 Splasher/Copier: disaggregating a consolidated write down to base
// cells, and copying/like-copying one sub-area onto another.
// Grounded in `setCellValue`'s splash modes and
// `copyCellValues`/`copyLikeCellValues`'s compatible-subtree pairing;
// `AreaStorage.cpp` itself turned out to be mostly buffer-sizing
// boilerplate, so the pairing descent below is a cycle-detecting descent
// over accessed sets rather than transliterated from that file.

use crate::element::{base_elements, Dimension, ElementKind};
use crate::error::{Error, Result};
use rustc_hash::FxHashSet;

const SPLASH_FACTOR_EPSILON: f64 = 1e-10;
/// Crude per-cell byte estimate used only to compare a splash's working set
/// against the megabyte-denominated `splash_limit*` config knobs.
const ESTIMATED_BYTES_PER_CELL: u64 = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SplashMode {
    Disabled,
    SetBase,
    AddBase,
    Default,
}

/// Calls `body` once per base cell in the cartesian product of `base`
/// (`base[d]` is a dimension's weighted base-element expansion), handing it
/// the full coordinate tuple and the product of that cell's per-dimension
/// weights. Iterative odometer increment, not recursion — `base`'s
/// dimension count is unbounded in principle.
pub fn for_each_base_cell(base: &[Vec<(u32, f64)>], mut body: impl FnMut(&[u32], f64)) {
    let dims = base.len();
    if dims == 0 || base.iter().any(|d| d.is_empty()) {
        return;
    }
    let mut idx = vec![0usize; dims];
    let mut coords = vec![0u32; dims];
    loop {
        let mut weight = 1.0;
        for d in 0..dims {
            let (id, w) = base[d][idx[d]];
            coords[d] = id;
            weight *= w;
        }
        body(&coords, weight);

        let mut d = dims - 1;
        loop {
            idx[d] += 1;
            if idx[d] < base[d].len() {
                break;
            }
            idx[d] = 0;
            if d == 0 {
                return;
            }
            d -= 1;
        }
    }
}

/// Rejects a splash whose working set exceeds `limit1` MB, logging at
/// warn/info as it crosses `limit2`/`limit3`. Compares raw byte counts rather than rounding down to
/// whole megabytes first, so small working sets still trip a `limit` of 0.
fn check_working_set(total_cells: u64, limit1: u64, limit2: u64, limit3: u64) -> Result<()> {
    let bytes = total_cells.saturating_mul(ESTIMATED_BYTES_PER_CELL);
    let mb = bytes / (1024 * 1024);
    if bytes > limit1.saturating_mul(1024 * 1024) {
        return Err(Error::SplashNotPossible);
    }
    if bytes > limit2.saturating_mul(1024 * 1024) {
        log::warn!("splash working set {}MB exceeds splash_limit2 {}MB", mb, limit2);
    } else if bytes > limit3.saturating_mul(1024 * 1024) {
        log::info!("splash working set {}MB exceeds splash_limit3 {}MB", mb, limit3);
    }
    Ok(())
}

/// Disaggregates `new` down over `base`'s cartesian product of base cells
///. `existing` reads a base cell's current value (`None` if
/// absent); `write` stores the new value; `record_prior` is told every
/// value about to be overwritten, for the caller's rollback log.
#[allow(clippy::too_many_arguments)]
pub fn splash(
    mode: SplashMode,
    base: &[Vec<(u32, f64)>],
    current: f64,
    new: f64,
    limits: (u64, u64, u64),
    existing: &mut dyn FnMut(&[u32]) -> Option<f64>,
    write: &mut dyn FnMut(&[u32], f64),
    record_prior: &mut dyn FnMut(&[u32], Option<f64>),
) -> Result<()> {
    if mode == SplashMode::Disabled {
        return Err(Error::SplashDisabled);
    }

    let total_cells: u64 = base.iter().map(|d| d.len() as u64).product();
    check_working_set(total_cells, limits.0, limits.1, limits.2)?;

    match mode {
        SplashMode::Disabled => unreachable!(),
        SplashMode::SetBase => {
            for_each_base_cell(base, |ids, _weight| {
                record_prior(ids, existing(ids));
                write(ids, new);
            });
            Ok(())
        }
        SplashMode::AddBase => {
            for_each_base_cell(base, |ids, _weight| {
                let prior = existing(ids);
                record_prior(ids, prior);
                write(ids, prior.unwrap_or(0.0) + new);
            });
            Ok(())
        }
        SplashMode::Default => splash_default(base, current, new, existing, write, record_prior),
    }
}

fn splash_default(
    base: &[Vec<(u32, f64)>],
    current: f64,
    new: f64,
    existing: &mut dyn FnMut(&[u32]) -> Option<f64>,
    write: &mut dyn FnMut(&[u32], f64),
    record_prior: &mut dyn FnMut(&[u32], Option<f64>),
) -> Result<()> {
    if current == 0.0 || current.is_nan() {
        let sum_weights: f64 = base
            .iter()
            .map(|d| d.iter().map(|&(_, w)| w).sum::<f64>())
            .product();
        if sum_weights == 0.0 {
            return Err(Error::SplashNotPossible);
        }
        let per_cell = new / sum_weights;
        for_each_base_cell(base, |ids, _weight| {
            record_prior(ids, existing(ids));
            write(ids, per_cell);
        });
        return Ok(());
    }

    let factor = new / current;
    if (factor - 1.0).abs() <= SPLASH_FACTOR_EPSILON {
        return Ok(());
    }
    for_each_base_cell(base, |ids, _weight| {
        let prior = existing(ids).unwrap_or(0.0);
        record_prior(ids, Some(prior));
        write(ids, prior * factor);
    });
    Ok(())
}

/// Descends `src`/`dst` in lockstep within one dimension, pairing leaves up
/// as it goes. Two subtrees are compatible only if they have the same
/// shape down to matching numeric (or string) leaves and identical child
/// weights at every consolidated node along the way. `accessed` records
/// every `(src, dst)` pair visited in this dimension; revisiting one means
/// the hierarchy looped back on itself, which this treats as incompatible
/// rather than recursing forever.
fn pair_subtrees(
    dim: &dyn Dimension,
    src: u32,
    dst: u32,
    accessed: &mut FxHashSet<(u32, u32)>,
    leaves: &mut Vec<(u32, u32)>,
) -> bool {
    if !accessed.insert((src, dst)) {
        return false;
    }
    let (Some(se), Some(de)) = (dim.element(src), dim.element(dst)) else {
        return false;
    };
    match (se.kind, de.kind) {
        (ElementKind::Consolidated, ElementKind::Consolidated) => {
            if se.children.len() != de.children.len() {
                return false;
            }
            for (&(sc, sw), &(dc, dw)) in se.children.iter().zip(&de.children) {
                if (sw - dw).abs() > f64::EPSILON {
                    return false;
                }
                if !pair_subtrees(dim, sc, dc, accessed, leaves) {
                    return false;
                }
            }
            true
        }
        (sk, dk) if sk.is_leaf() && dk == sk => {
            leaves.push((src, dst));
            true
        }
        _ => false,
    }
}

/// Per-dimension leaf-to-leaf pairing between a source and destination
/// sub-tree, or `None` if the two are structurally incompatible.
fn pair_dimension(dim: &dyn Dimension, src_root: u32, dst_root: u32) -> Option<Vec<(u32, u32)>> {
    let mut accessed = FxHashSet::default();
    let mut leaves = Vec::new();
    if pair_subtrees(dim, src_root, dst_root, &mut accessed, &mut leaves) {
        Some(leaves)
    } else {
        None
    }
}

/// The full-path pairing found by [`plan_copy`]: `(source_ids, dest_ids)`
/// per base cell, in matching cartesian-grid position across every
/// dimension.
pub struct CopyPlan {
    pub pairs: Vec<(Vec<u32>, Vec<u32>)>,
}

/// Computes a leaf-to-leaf copy plan for `copyCellValues`/
/// `copyLikeCellValues`. Fails with `CircularReference` if
/// every dimension's source and destination base-element sets overlap
/// (meaning some single base cell lies in both paths at once). Returns
/// `Ok(None)` when the sub-trees are structurally incompatible in at least
/// one dimension; the caller should splash the source's aggregate value
/// into the whole destination area instead.
pub fn plan_copy(
    dims: &[&dyn Dimension],
    source_ids: &[u32],
    dest_ids: &[u32],
) -> Result<Option<CopyPlan>> {
    debug_assert_eq!(dims.len(), source_ids.len());
    debug_assert_eq!(dims.len(), dest_ids.len());

    let overlaps_every_dim = dims.iter().enumerate().all(|(d, dim)| {
        let src_base: FxHashSet<u32> = base_elements(*dim, source_ids[d])
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        base_elements(*dim, dest_ids[d])
            .into_iter()
            .any(|(id, _)| src_base.contains(&id))
    });
    if overlaps_every_dim {
        return Err(Error::CircularReference);
    }

    let mut per_dim_pairs = Vec::with_capacity(dims.len());
    for (d, dim) in dims.iter().enumerate() {
        match pair_dimension(*dim, source_ids[d], dest_ids[d]) {
            Some(pairs) => per_dim_pairs.push(pairs),
            None => return Ok(None),
        }
    }

    Ok(Some(CopyPlan {
        pairs: cartesian_pairs(&per_dim_pairs),
    }))
}

fn cartesian_pairs(per_dim_pairs: &[Vec<(u32, u32)>]) -> Vec<(Vec<u32>, Vec<u32>)> {
    let dims = per_dim_pairs.len();
    if dims == 0 || per_dim_pairs.iter().any(|d| d.is_empty()) {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut idx = vec![0usize; dims];
    loop {
        let mut src = vec![0u32; dims];
        let mut dst = vec![0u32; dims];
        for d in 0..dims {
            let (s, t) = per_dim_pairs[d][idx[d]];
            src[d] = s;
            dst[d] = t;
        }
        out.push((src, dst));

        let mut d = dims - 1;
        loop {
            idx[d] += 1;
            if idx[d] < per_dim_pairs[d].len() {
                break;
            }
            idx[d] = 0;
            if d == 0 {
                return out;
            }
            d -= 1;
        }
    }
}
