// C6 RuleEngine: rule classification and the `get_cell_value` evaluation
// order. Grounded in
// `examples/original_source/molap/server/Source/Olap/Rule.h` for the
// `option`/`linear`/`restricted`/`has_markers` flag shape, `within`/
// `contains`, and the direct/indirect match order of `Rule::getValue`.
//
// Rule parsing and AST construction are an explicit Non-goal;
// a rule's body is an opaque `RuleBody` port supplied by the caller. This
// module only drives evaluation order, cycle detection, and indirect-match
// aggregation over that port.

use crate::cell_path::{CellPath, PathKind};
use crate::error::{Error, Result};
use crate::key::Key;
use crate::marker::MarkerSpec;
use rustc_hash::FxHashSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuleOption {
    Base,
    Consolidation,
    Any,
}

impl RuleOption {
    fn matches(self, path: &CellPath) -> bool {
        match self {
            RuleOption::Any => true,
            RuleOption::Base => path.is_base(),
            RuleOption::Consolidation => path.path_kind() == PathKind::Consolidated,
        }
    }
}

/// Per-dimension element membership for a rule's destination or restricted
/// area. `None` in a slot means "every element of that dimension" (a
/// wildcard); `Some(ids)` restricts to exactly those ids.
#[derive(Clone, Debug, Default)]
pub struct Area(pub Vec<Option<Vec<u32>>>);

impl Area {
    pub fn all(dims: usize) -> Self {
        Area(vec![None; dims])
    }

    /// Literal membership check used by `within`: does `path` sit inside
    /// this area dimension-by-dimension.
    fn within(&self, path: &CellPath) -> bool {
        self.within_ids(path.ids())
    }

    /// Same check against a bare coordinate tuple, used by marker
    /// propagation which only ever has raw ids to test.
    pub fn within_ids(&self, ids: &[u32]) -> bool {
        self.0
            .iter()
            .zip(ids)
            .all(|(slot, &id)| match slot {
                None => true,
                Some(allowed) => allowed.contains(&id),
            })
    }

    /// `contains`: the rule's area is a strict subset of the subcube below
    /// `path` — every id this area names, in every dimension, must appear
    /// among `path`'s base expansion for that dimension.
    fn contained_in_subtree(&self, base: &[Vec<(u32, f64)>]) -> bool {
        self.0.iter().zip(base).all(|(slot, expansion)| match slot {
            None => false, // a wildcard dimension can never be a strict subset
            Some(ids) => ids
                .iter()
                .all(|id| expansion.iter().any(|&(bid, _)| bid == *id)),
        })
    }
}

/// Outcome of driving a rule body at a path.
pub enum RuleEvalResult {
    Value { value: f64, cachable: bool },
    /// The rule declined this path (`skip_rule`); evaluation falls through
    /// to the next matching rule or the fallback.
    Skip,
    /// STET: the rule explicitly leaves the cell untouched.
    Stet,
}

/// The compiled body of a rule. Parsing/compiling the rule language itself
/// is out of scope; this is the port a `RuleCompiler` is expected to
/// implement.
pub trait RuleBody: Send + Sync {
    fn destination_area(&self) -> &Area;
    fn restricted_area(&self) -> Option<&Area>;
    fn is_linear(&self) -> bool;
    fn is_restricted(&self) -> bool;
    fn markers(&self) -> &[MarkerSpec];

    /// Evaluates the body at `path`. `resolve` lets the body ask for the
    /// value of another cell, which may recurse back into
    /// `RuleEngine::get_cell_value`.
    fn evaluate(
        &self,
        path: &CellPath,
        resolve: &mut dyn FnMut(&CellPath) -> Result<f64>,
    ) -> Result<RuleEvalResult>;
}

pub struct Rule {
    pub id: u32,
    pub option: RuleOption,
    pub active: bool,
    pub timestamp: u64,
    pub body: Box<dyn RuleBody>,
}

impl Rule {
    fn within(&self, path: &CellPath) -> bool {
        self.option.matches(path) && self.body.destination_area().within(path)
    }

    fn contains(&self, _path: &CellPath, base: &[Vec<(u32, f64)>]) -> bool {
        self.body.destination_area().contained_in_subtree(base)
    }

    pub fn has_markers(&self) -> bool {
        !self.body.markers().is_empty()
    }
}

/// Drives evaluation order for a single cube's rules.
/// Holds the in-flight `(rule, path)` call stack used for the circular
/// reference guard, since rule bodies recurse back into the engine through
/// the `resolve` callback passed to `RuleBody::evaluate`.
#[derive(Default)]
pub struct RuleEngine {
    in_flight: FxHashSet<(u32, Key)>,
}

impl RuleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Implements the four-step evaluation order. `base` gives
    /// each dimension's weighted base-element expansion of `path` (used
    /// only for indirect-match `contains` checks and child aggregation);
    /// `children` enumerates `path`'s immediate weighted children for the
    /// indirect-match recursion; `fallback` reads the store directly.
    ///
    /// Returns the resolved value and, if a rule produced it, that rule's
    /// id — the caller uses this to populate `RuleCache`.
    pub fn get_cell_value(
        &mut self,
        path: &CellPath,
        rules: &[Rule],
        base: &[Vec<(u32, f64)>],
        children: &mut dyn FnMut(&CellPath) -> Vec<(CellPath, f64)>,
        fallback: &mut dyn FnMut(&CellPath) -> Result<f64>,
    ) -> Result<(f64, Option<u32>, bool)> {
        // Step 2: direct match.
        for rule in rules.iter().filter(|r| r.active) {
            if !rule.within(path) {
                continue;
            }
            if rule.body.is_restricted() {
                if let Some(restricted) = rule.body.restricted_area() {
                    if !restricted.within(path) {
                        // STET: restricted rule declines outside its subset.
                        continue;
                    }
                }
            }
            match self.evaluate_guarded(rule, path, rules, base, children, fallback)? {
                RuleEvalResult::Value { value, cachable } => {
                    return Ok((value, Some(rule.id), cachable));
                }
                RuleEvalResult::Skip | RuleEvalResult::Stet => continue,
            }
        }

        // Step 3: indirect match, only for consolidated paths.
        if path.path_kind() == PathKind::Consolidated {
            let candidates: Vec<&Rule> = rules
                .iter()
                .filter(|r| r.active && !r.within(path) && r.contains(path, base))
                .collect();

            let marker_count = candidates.iter().filter(|r| r.has_markers()).count();
            if marker_count == 0 && !candidates.is_empty() {
                let linear: Vec<&&Rule> =
                    candidates.iter().filter(|r| r.body.is_linear()).collect();

                if linear.len() == 1 && candidates.len() == 1 {
                    if let RuleEvalResult::Value { value, cachable } =
                        self.evaluate_guarded(linear[0], path, rules, base, children, fallback)?
                    {
                        return Ok((value, Some(linear[0].id), cachable));
                    }
                } else if candidates.len() == 1 && candidates[0].body.is_restricted() {
                    // Single restricted candidate: STET, stop without a value.
                    return fallback(path).map(|v| (v, None, true));
                } else if !candidates.is_empty() {
                    let kids = children(path);
                    let mut total = 0.0;
                    let mut all_cachable = true;
                    for (child_path, weight) in &kids {
                        let (value, _, cachable) =
                            self.get_cell_value(child_path, rules, base, children, fallback)?;
                        total += weight * value;
                        all_cachable &= cachable;
                    }
                    return Ok((total, None, all_cachable));
                }
            }
        }

        // Step 4: fallback to the store.
        fallback(path).map(|v| (v, None, true))
    }

    fn evaluate_guarded(
        &mut self,
        rule: &Rule,
        path: &CellPath,
        rules: &[Rule],
        base: &[Vec<(u32, f64)>],
        children: &mut dyn FnMut(&CellPath) -> Vec<(CellPath, f64)>,
        fallback: &mut dyn FnMut(&CellPath) -> Result<f64>,
    ) -> Result<RuleEvalResult> {
        let stack_key = (rule.id, path.key());
        if !self.in_flight.insert(stack_key.clone()) {
            return Err(Error::RuleHasCircularReference);
        }
        let mut resolve = |p: &CellPath| -> Result<f64> {
            self.get_cell_value(p, rules, base, children, fallback)
                .map(|(value, _, _)| value)
        };
        let result = rule.body.evaluate(path, &mut resolve);
        self.in_flight.remove(&stack_key);
        result
    }
}
