// C4 Consolidator: aggregation across hierarchies.
//
// The `dims >= 3` case walks each partition's sorted page once, row by
// row, rather than recursing per dimension. A row's change-depth (the
// highest dimension index where it differs from its predecessor, set by
// `CellPage::sort`) says how many of the coarser per-dimension weights
// still apply unchanged from the previous row, so the per-row weight
// product only ever recomputes the levels at or below that depth.

use crate::key::Key;
use crate::page::CellPage;
use crate::store::CubeStore;
use rustc_hash::FxHashMap;
use std::ops::Range;

/// Resolves a marker row's cached value by invoking the rule engine
///. `stored_value` is the row's currently-stored number, handed in
/// because a `CubeStore` is already mutably borrowed by `consolidate` for
/// page sorting — the resolver cannot re-borrow it to read a fallback
/// baseline itself, so it gets one for free.
pub trait MarkerResolver {
    fn resolve(&mut self, key: &Key, stored_value: f64) -> f64;
}

impl<F: FnMut(&Key, f64) -> f64> MarkerResolver for F {
    fn resolve(&mut self, key: &Key, stored_value: f64) -> f64 {
        self(key, stored_value)
    }
}

fn sum_range(
    page: &CellPage<f64>,
    range: Range<usize>,
    resolver: &mut dyn MarkerResolver,
) -> f64 {
    let mut total = 0.0;
    for idx in range {
        let row = page.row(idx);
        total += if row.is_marker() {
            resolver.resolve(&row.key, row.value)
        } else {
            row.value
        };
    }
    total
}

/// Counts the base cells that would be touched by a consolidated read over
/// `base` (the product of each dimension's weighted base-element count).
/// Used by the result cache's admission policy.
pub fn count_base_cells(base: &[Vec<(u32, f64)>]) -> u64 {
    base.iter()
        .map(|d| d.len() as u64)
        .fold(1u64, |acc, n| acc.saturating_mul(n.max(1)))
}

/// Computes a consolidated value over `store`, given each dimension's
/// weighted base-element expansion (`base[d]` = `base_elements(path[d])`).
/// `resolver` supplies the value of any marker row encountered along the
/// way.
pub fn consolidate(
    store: &mut CubeStore<f64>,
    base: &[Vec<(u32, f64)>],
    resolver: &mut dyn MarkerResolver,
) -> f64 {
    let dims = store.dims();
    debug_assert_eq!(base.len(), dims);

    match dims {
        0 => 0.0,
        1 => consolidate_single_dim(store, base, resolver),
        2 => consolidate_two_dims(store, base, resolver),
        _ => consolidate_many_dims(store, base, resolver),
    }
}

fn consolidate_single_dim(
    store: &mut CubeStore<f64>,
    base: &[Vec<(u32, f64)>],
    resolver: &mut dyn MarkerResolver,
) -> f64 {
    if let Some(page) = store.page_mut(&[0]) {
        page.sort();
    }
    let Some(page) = store.page(&[0]) else {
        return 0.0;
    };
    let mut total = 0.0;
    for &(id, w) in &base[0] {
        let range = page.equal_range(0..page.len(), 0, id);
        total += w * sum_range(page, range, resolver);
    }
    total
}

fn consolidate_two_dims(
    store: &mut CubeStore<f64>,
    base: &[Vec<(u32, f64)>],
    resolver: &mut dyn MarkerResolver,
) -> f64 {
    let first = store.first_dim();
    let mut total = 0.0;
    for &(id1, w1) in &base[first] {
        if let Some(page) = store.page_by_partition_mut(id1, 0) {
            page.sort();
        }
        let Some(page) = store.page_by_partition(id1, 0) else {
            continue;
        };
        for &(id2, w2) in &base[1] {
            let range = page.equal_range(0..page.len(), 1, id2);
            total += w1 * w2 * sum_range(page, range, resolver);
        }
    }
    total
}

/// Builds, for every dimension but `first`/`second` (the store's two
/// partition dims, already pinned by the page a given call is walking), a
/// lookup from element id to its weight in `base`. Shared across every
/// partition `consolidate_many_dims` visits.
fn other_dim_weight_maps(
    base: &[Vec<(u32, f64)>],
    first: usize,
    second: Option<usize>,
) -> Vec<FxHashMap<u32, f64>> {
    (0..base.len())
        .map(|d| {
            if d == first || Some(d) == second {
                FxHashMap::default()
            } else {
                base[d].iter().copied().collect()
            }
        })
        .collect()
}

fn consolidate_many_dims(
    store: &mut CubeStore<f64>,
    base: &[Vec<(u32, f64)>],
    resolver: &mut dyn MarkerResolver,
) -> f64 {
    let dims = store.dims();
    let first = store.first_dim();
    let second = store.second_dim();
    let minimal = store.minimal_dim().unwrap_or(dims - 1);
    let weight_maps = other_dim_weight_maps(base, first, second);

    let mut total = 0.0;

    let second_pairs: Vec<(u32, f64)> = match second {
        Some(d) => base[d].clone(),
        None => vec![(0, 1.0)],
    };

    for &(id1, w1) in &base[first] {
        for &(id2, w2) in &second_pairs {
            if let Some(page) = store.page_by_partition_mut(id1, id2) {
                page.sort();
            }
            let Some(page) = store.page_by_partition(id1, id2) else {
                continue;
            };
            if page.is_empty() {
                continue;
            }

            // `level_weight[d]` is the weight dimension `d` contributes to
            // the row currently being walked.
            let mut level_weight = vec![0.0f64; dims];
            for idx in 0..page.len() {
                let row = page.row(idx);
                let changed_at = row.change_depth() as usize;

                let mut d = changed_at;
                loop {
                    if d != first && Some(d) != second {
                        level_weight[d] = *weight_maps[d].get(&row.key.id(d)).unwrap_or(&0.0);
                    }
                    if d <= minimal {
                        break;
                    }
                    d -= 1;
                }

                let mut weight = w1 * w2;
                let mut d = dims - 1;
                loop {
                    if d != first && Some(d) != second {
                        weight *= level_weight[d];
                    }
                    if d <= minimal {
                        break;
                    }
                    d -= 1;
                }
                if weight == 0.0 {
                    continue;
                }

                let value = if row.is_marker() {
                    resolver.resolve(&row.key, row.value)
                } else {
                    row.value
                };
                total += weight * value;
            }
        }
    }

    total
}
