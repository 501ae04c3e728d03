// Goal seek. Grounded in
// `examples/original_source/molap/server/Source/Olap/GoalSeekSolver.cpp`,
// simplified down to a single target cell: the original solves simultaneous
// goals across several related cells with a full Gaussian-elimination system
// (`make_diagonal`/`check_state` over a weight matrix); this crate only
// ever seeks a single target cell, so that reduces to weighted-even
// distribution across its base leaves, the same shape `splash`'s `default`
// mode already uses for an unlocked consolidated write.

use crate::error::{Error, Result};
use std::time::{Duration, Instant};

const EPSILON: f64 = 1e-10;

/// Iterates `base`'s cartesian product like `splash::for_each_base_cell`,
/// but checks a wall-clock deadline every cell.
fn for_each_base_cell_checked(
    base: &[Vec<(u32, f64)>],
    deadline: Instant,
    mut body: impl FnMut(&[u32], f64),
) -> Result<()> {
    let dims = base.len();
    if dims == 0 || base.iter().any(|d| d.is_empty()) {
        return Ok(());
    }
    let mut idx = vec![0usize; dims];
    let mut coords = vec![0u32; dims];
    loop {
        if Instant::now() > deadline {
            return Err(Error::GoalSeek);
        }
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
                return Ok(());
            }
            d -= 1;
        }
    }
}

/// Solves for the base-leaf values that make a consolidated cell equal
/// `target`, given its current aggregated value. `existing`/`write`/
/// `record_prior` mirror `splash::splash`'s callbacks. Fails with
/// `Error::GoalSeek` if the base-cell count exceeds `cell_limit` or the
/// solve runs past `timeout`.
pub fn goal_seek(
    base: &[Vec<(u32, f64)>],
    current: f64,
    target: f64,
    cell_limit: u64,
    timeout: Duration,
    existing: &mut dyn FnMut(&[u32]) -> Option<f64>,
    write: &mut dyn FnMut(&[u32], f64),
    record_prior: &mut dyn FnMut(&[u32], Option<f64>),
) -> Result<()> {
    let total_cells: u64 = base.iter().map(|d| d.len() as u64).product();
    if total_cells > cell_limit {
        return Err(Error::GoalSeek);
    }
    let deadline = Instant::now() + timeout;

    if current == 0.0 || current.is_nan() {
        let sum_weights: f64 = base
            .iter()
            .map(|d| d.iter().map(|&(_, w)| w).sum::<f64>())
            .product();
        if sum_weights == 0.0 {
            return Err(Error::GoalSeek);
        }
        let per_cell = target / sum_weights;
        return for_each_base_cell_checked(base, deadline, |ids, _weight| {
            record_prior(ids, existing(ids));
            write(ids, per_cell);
        });
    }

    let factor = target / current;
    if (factor - 1.0).abs() <= EPSILON {
        return Ok(());
    }
    for_each_base_cell_checked(base, deadline, |ids, _weight| {
        let prior = existing(ids).unwrap_or(0.0);
        record_prior(ids, Some(prior));
        write(ids, prior * factor);
    })
}
