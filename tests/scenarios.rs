//! End-to-end scenarios against a three-dimensional Sales(Year, Region,
//! Product) cube, exercising consolidation, rules, markers, locks/rollback,
//! splash, and copy together the way a host process would drive `Cube`.

use palo_cube::cache::SharedCacheBudget;
use palo_cube::cell_path::CellPath;
use palo_cube::config::CubeConfig;
use palo_cube::cube::{CellValue, Cube};
use palo_cube::element::{Dimension, Element, ElementKind};
use palo_cube::error::{self, Error};
use palo_cube::key::Key;
use palo_cube::marker::MarkerSpec;
use palo_cube::ports::{Authorizer, Right};
use palo_cube::rollback::{RollbackEntry, Spill, SpillFactory};
use palo_cube::rule::{Area, RuleBody, RuleEvalResult, RuleOption};
use palo_cube::splash::SplashMode;
use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex};

struct TestDimension {
    elements: FxHashMap<u32, Element>,
}

impl TestDimension {
    fn new() -> Self {
        Self {
            elements: FxHashMap::default(),
        }
    }

    fn leaf(&mut self, id: u32) -> &mut Self {
        self.elements.insert(id, Element::new(id, ElementKind::Numeric));
        self
    }

    fn consolidated(&mut self, id: u32, children: &[(u32, f64)]) -> &mut Self {
        let mut element = Element::new(id, ElementKind::Consolidated);
        for &(child, weight) in children {
            element.children.push((child, weight));
            self.elements
                .get_mut(&child)
                .expect("child registered before parent")
                .parents
                .push(id);
        }
        self.elements.insert(id, element);
        self
    }
}

impl Dimension for TestDimension {
    fn id(&self) -> u32 {
        0
    }

    fn element(&self, id: u32) -> Option<&Element> {
        self.elements.get(&id)
    }

    fn element_count(&self) -> usize {
        self.elements.len()
    }

    fn element_ids(&self) -> Vec<u32> {
        self.elements.keys().copied().collect()
    }
}

struct AllowAll;
impl Authorizer for AllowAll {
    fn min_right(&self, _user: u32, _path_ids: &[u32]) -> Right {
        Right::Splash
    }
}

#[derive(Default)]
struct MemorySpill {
    pages: Mutex<FxHashMap<usize, Vec<RollbackEntry>>>,
}

impl Spill for MemorySpill {
    fn write_page(&mut self, page_no: usize, entries: &[RollbackEntry]) -> palo_cube::error::Result<()> {
        self.pages.lock().unwrap().insert(page_no, entries.to_vec());
        Ok(())
    }

    fn read_page(&mut self, page_no: usize) -> palo_cube::error::Result<Vec<RollbackEntry>> {
        Ok(self.pages.lock().unwrap().get(&page_no).cloned().unwrap_or_default())
    }
}

struct MemorySpillFactory;
impl SpillFactory for MemorySpillFactory {
    fn create(&self, _lock_id: u32) -> Box<dyn Spill> {
        Box::new(MemorySpill::default())
    }
}

// Year: 0=2022, 1=2023, 2=Total(0,1)
// Region: 0=North, 1=South, 2=Tot(0,1)
// Product: 0=A, 1=B, 2=AB(0,1)
fn sales_dims() -> Vec<Arc<dyn Dimension>> {
    let mut year = TestDimension::new();
    year.leaf(0).leaf(1).consolidated(2, &[(0, 1.0), (1, 1.0)]);

    let mut region = TestDimension::new();
    region.leaf(0).leaf(1).consolidated(2, &[(0, 1.0), (1, 1.0)]);

    let mut product = TestDimension::new();
    product.leaf(0).leaf(1).consolidated(2, &[(0, 1.0), (1, 1.0)]);

    vec![Arc::new(year), Arc::new(region), Arc::new(product)]
}

fn sales_cube() -> Cube {
    Cube::new(
        1,
        sales_dims(),
        CubeConfig::new(),
        Arc::new(AllowAll),
        Arc::new(MemorySpillFactory),
        SharedCacheBudget::new(),
    )
}

#[test]
fn consolidation_aggregates_across_every_dimension() {
    let cube = sales_cube();
    cube.set_cell_numeric(1, &[0, 0, 0], 100.0, SplashMode::Default, None).unwrap();
    cube.set_cell_numeric(1, &[1, 1, 1], 50.0, SplashMode::Default, None).unwrap();

    let (total, _, _) = cube.get_cell(1, &[2, 2, 2]).unwrap();
    assert_eq!(total, CellValue::Numeric(150.0));

    let (year_total, _, _) = cube.get_cell(1, &[2, 0, 0]).unwrap();
    assert_eq!(year_total, CellValue::Numeric(100.0));
}

#[test]
fn write_to_base_cell_invalidates_only_its_consolidation_path() {
    let cube = sales_cube();
    cube.set_cell_numeric(1, &[0, 0, 0], 10.0, SplashMode::Default, None).unwrap();
    let (before, _, _) = cube.get_cell(1, &[2, 0, 0]).unwrap();
    assert_eq!(before, CellValue::Numeric(10.0));

    cube.set_cell_numeric(1, &[0, 0, 0], 40.0, SplashMode::Default, None).unwrap();
    let (after, _, _) = cube.get_cell(1, &[2, 0, 0]).unwrap();
    assert_eq!(after, CellValue::Numeric(40.0));
}

#[test]
fn splash_set_base_overwrites_every_leaf_under_the_target() {
    let cube = sales_cube();
    cube.set_cell_numeric(1, &[0, 0, 0], 10.0, SplashMode::Default, None).unwrap();
    cube.set_cell_numeric(1, &[0, 1, 0], 20.0, SplashMode::Default, None).unwrap();

    cube.set_cell_numeric(1, &[0, 2, 0], 100.0, SplashMode::SetBase, None).unwrap();

    let (north, _, _) = cube.get_cell(1, &[0, 0, 0]).unwrap();
    let (south, _, _) = cube.get_cell(1, &[0, 1, 0]).unwrap();
    assert_eq!(north, CellValue::Numeric(50.0));
    assert_eq!(south, CellValue::Numeric(50.0));
}

#[test]
fn splash_default_scales_proportionally_to_existing_values() {
    let cube = sales_cube();
    cube.set_cell_numeric(1, &[0, 0, 0], 10.0, SplashMode::Default, None).unwrap();
    cube.set_cell_numeric(1, &[0, 1, 0], 30.0, SplashMode::Default, None).unwrap();

    // current total for (2022, Tot, A) is 40; doubling it should scale both
    // leaves by the same factor rather than redistributing evenly.
    cube.set_cell_numeric(1, &[0, 2, 0], 80.0, SplashMode::Default, None).unwrap();

    let (north, _, _) = cube.get_cell(1, &[0, 0, 0]).unwrap();
    let (south, _, _) = cube.get_cell(1, &[0, 1, 0]).unwrap();
    assert_eq!(north, CellValue::Numeric(20.0));
    assert_eq!(south, CellValue::Numeric(60.0));
}

#[test]
fn lock_blocks_other_users_and_rollback_undoes_each_step() {
    let cube = sales_cube();
    let lock_id = cube
        .acquire_lock(1, "2022/*/*".into(), &[vec![0], vec![], vec![]])
        .unwrap();

    let blocked = cube.set_cell_numeric(2, &[0, 0, 0], 1.0, SplashMode::Default, None);
    assert!(matches!(blocked, Err(Error::CubeBlockedByLock)));

    cube.set_cell_numeric(1, &[0, 0, 0], 10.0, SplashMode::Default, Some(lock_id)).unwrap();
    cube.set_cell_numeric(1, &[0, 0, 0], 20.0, SplashMode::Default, Some(lock_id)).unwrap();
    cube.set_cell_numeric(1, &[0, 0, 0], 30.0, SplashMode::Default, Some(lock_id)).unwrap();

    cube.rollback_lock(1, lock_id, 1).unwrap();
    let (value, _, _) = cube.get_cell(1, &[0, 0, 0]).unwrap();
    assert_eq!(value, CellValue::Numeric(20.0));

    cube.rollback_lock(1, lock_id, 2).unwrap();
    let (value, _, found) = cube.get_cell(1, &[0, 0, 0]).unwrap();
    assert_eq!(value, CellValue::Numeric(0.0));
    assert!(!found);

    cube.commit_lock(1, lock_id).unwrap();
}

#[test]
fn copy_between_disjoint_leaves_pairs_matching_structure() {
    let cube = sales_cube();
    cube.set_cell_numeric(1, &[0, 0, 0], 10.0, SplashMode::Default, None).unwrap();
    cube.set_cell_numeric(1, &[0, 0, 1], 20.0, SplashMode::Default, None).unwrap();

    // copy (2022, North, *) onto (2023, South, *) — same per-product shape.
    cube.copy(1, &[0, 0, 2], &[1, 1, 2], None, SplashMode::Default, None).unwrap();

    let (a, _, _) = cube.get_cell(1, &[1, 1, 0]).unwrap();
    let (b, _, _) = cube.get_cell(1, &[1, 1, 1]).unwrap();
    assert_eq!(a, CellValue::Numeric(10.0));
    assert_eq!(b, CellValue::Numeric(20.0));
}

#[test]
fn goal_seek_rescales_base_cells_to_hit_the_target() {
    let cube = sales_cube();
    cube.set_cell_numeric(1, &[0, 0, 0], 10.0, SplashMode::Default, None).unwrap();
    cube.set_cell_numeric(1, &[0, 1, 0], 10.0, SplashMode::Default, None).unwrap();

    cube.goal_seek(1, &[0, 2, 0], 100.0, None).unwrap();

    let (north, _, _) = cube.get_cell(1, &[0, 0, 0]).unwrap();
    let (south, _, _) = cube.get_cell(1, &[0, 1, 0]).unwrap();
    assert_eq!(north, CellValue::Numeric(50.0));
    assert_eq!(south, CellValue::Numeric(50.0));
}

#[test]
fn clear_cell_removes_rather_than_zeroing_in_place() {
    let cube = sales_cube();
    cube.set_cell_numeric(1, &[0, 0, 0], 10.0, SplashMode::Default, None).unwrap();
    cube.clear_cell(1, &[0, 0, 0], None).unwrap();

    let (value, _, found) = cube.get_cell(1, &[0, 0, 0]).unwrap();
    assert_eq!(value, CellValue::Numeric(0.0));
    assert!(!found);
}

#[test]
fn unauthorized_user_is_rejected_before_touching_the_store() {
    struct ReadOnly;
    impl Authorizer for ReadOnly {
        fn min_right(&self, _user: u32, _path_ids: &[u32]) -> Right {
            Right::Read
        }
    }

    let cube = Cube::new(
        2,
        sales_dims(),
        CubeConfig::new(),
        Arc::new(ReadOnly),
        Arc::new(MemorySpillFactory),
        SharedCacheBudget::new(),
    );

    let result = cube.set_cell_numeric(1, &[0, 0, 0], 1.0, SplashMode::Default, None);
    assert!(matches!(result, Err(Error::NotAuthorized)));
}

/// `['Year'].['Tot'].['*'] = ['Year'].['North'].['*'] * 2 if ... > 0 else STET`
/// — a rule whose body resolves a different cell's value through the
/// `resolve` callback rather than just returning a constant.
struct DoubleNorthRule {
    dims: Vec<Arc<dyn Dimension>>,
    area: Area,
}

impl DoubleNorthRule {
    fn new(dims: Vec<Arc<dyn Dimension>>) -> Self {
        Self {
            dims,
            area: Area(vec![None, Some(vec![2]), None]),
        }
    }
}

impl RuleBody for DoubleNorthRule {
    fn destination_area(&self) -> &Area {
        &self.area
    }

    fn restricted_area(&self) -> Option<&Area> {
        None
    }

    fn is_linear(&self) -> bool {
        true
    }

    fn is_restricted(&self) -> bool {
        false
    }

    fn markers(&self) -> &[palo_cube::marker::MarkerSpec] {
        &[]
    }

    fn evaluate(
        &self,
        path: &CellPath,
        resolve: &mut dyn FnMut(&CellPath) -> error::Result<f64>,
    ) -> error::Result<RuleEvalResult> {
        let dim_refs: Vec<&dyn Dimension> = self.dims.iter().map(|d| d.as_ref()).collect();
        let north_ids = [path.id(0), 0, path.id(2)];
        let north_path = CellPath::new(&dim_refs, &north_ids)?;
        let north_value = resolve(&north_path)?;
        let doubled = north_value * 2.0;
        if doubled > 0.0 {
            Ok(RuleEvalResult::Value {
                value: doubled,
                cachable: true,
            })
        } else {
            Ok(RuleEvalResult::Stet)
        }
    }
}

#[test]
fn rule_resolves_another_cells_value_through_the_callback() {
    let cube = sales_cube();
    cube.set_cell_numeric(1, &[0, 0, 0], 10.0, SplashMode::Default, None).unwrap();
    cube.set_cell_numeric(1, &[0, 1, 0], 999.0, SplashMode::Default, None).unwrap();

    cube.create_rule(RuleOption::Any, Box::new(DoubleNorthRule::new(sales_dims())), true, 0);

    let (value, rule_id, _) = cube.get_cell(1, &[0, 2, 0]).unwrap();
    assert_eq!(value, CellValue::Numeric(20.0));
    assert_eq!(rule_id, Some(0));
}

#[test]
fn rule_stets_when_resolved_value_is_not_positive() {
    let cube = sales_cube();
    // North leaf left unset (defaults to 0.0), so doubled <= 0 and the rule
    // declines, leaving the real consolidated total in place.
    cube.set_cell_numeric(1, &[0, 1, 0], 5.0, SplashMode::Default, None).unwrap();

    cube.create_rule(RuleOption::Any, Box::new(DoubleNorthRule::new(sales_dims())), true, 0);

    let (value, rule_id, _) = cube.get_cell(1, &[0, 2, 0]).unwrap();
    assert_eq!(value, CellValue::Numeric(5.0));
    assert_eq!(rule_id, None);
}

/// A rule body that declares no value logic of its own (always `Stet`) and
/// exists only to carry marker specs for `create_rule` to activate.
struct MarkerOnlyRule {
    area: Area,
    specs: Vec<MarkerSpec>,
}

impl RuleBody for MarkerOnlyRule {
    fn destination_area(&self) -> &Area {
        &self.area
    }

    fn restricted_area(&self) -> Option<&Area> {
        None
    }

    fn is_linear(&self) -> bool {
        false
    }

    fn is_restricted(&self) -> bool {
        false
    }

    fn markers(&self) -> &[MarkerSpec] {
        &self.specs
    }

    fn evaluate(
        &self,
        _path: &CellPath,
        _resolve: &mut dyn FnMut(&CellPath) -> error::Result<f64>,
    ) -> error::Result<RuleEvalResult> {
        Ok(RuleEvalResult::Stet)
    }
}

#[test]
fn cross_cube_marker_propagates_through_create_rule_and_register_to_marker() {
    let source = sales_cube();
    let dest = Cube::new(
        2,
        sales_dims(),
        CubeConfig::new(),
        Arc::new(AllowAll),
        Arc::new(MemorySpillFactory),
        SharedCacheBudget::new(),
    );

    source.set_cell_numeric(1, &[0, 0, 0], 100.0, SplashMode::Default, None).unwrap();

    let spec = MarkerSpec {
        rule_id: 0,
        from_cube: 1,
        to_cube: 2,
        from_area: Area::all(3),
        permutation: vec![Some(0), Some(1), Some(2)],
        fixed: vec![None, None, None],
        mapping: vec![None, None, None],
    };

    let (_, pending) = source.create_rule(
        RuleOption::Any,
        Box::new(MarkerOnlyRule {
            area: Area::all(3),
            specs: vec![spec.clone()],
        }),
        true,
        0,
    );
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].to_cube, 2);
    assert_eq!(pending[0].dest_ids, vec![0, 0, 0]);

    // Unregistered: the destination has no marker row yet.
    let (_, _, found_before) = dest.get_cell(1, &[0, 0, 0]).unwrap();
    assert!(!found_before);

    // A coordinator routing `pending` registers the spec on the
    // destination cube, replaying it against the source rows it names.
    dest.register_to_marker(spec, std::iter::once(Key::new(vec![0, 0, 0])));

    assert!(dest.markers_rebuild_due());
    let (value, rule_id, found_after) = dest.get_cell(1, &[0, 0, 0]).unwrap();
    assert_eq!(value, CellValue::Numeric(0.0));
    assert_eq!(rule_id, None);
    assert!(found_after);
}
