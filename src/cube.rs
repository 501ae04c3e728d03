// Cube: ties every other module into the engine's public surface. One
// write lock per cube — a single writer, many readers, one operation runs
// to completion before the next begins — held with `parking_lot::RwLock`
// rather than `std::sync`'s.

use crate::cache::{ConsolidationCache, RuleCache, SharedCacheBudget};
use crate::cell_path::{CellPath, PathKind};
use crate::config::CubeConfig;
use crate::consolidate::{self, count_base_cells};
use crate::element::{base_elements, Dimension, ElementKind};
use crate::error::{Error, Result};
use crate::export::{self, ExportCursor, ExportPage, ExportResolver};
use crate::key::Key;
use crate::lock::LockManager;
use crate::marker::{MarkerPropagator, MarkerSpec};
use crate::ports::{Authorizer, Right, SideEffects};
use crate::rollback::{PriorValue, RollbackLog, Spill, SpillFactory};
use crate::rule::{Rule, RuleBody, RuleEngine, RuleOption};
use crate::splash::{self, CopyPlan, SplashMode};
use crate::store::CubeStore;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// A cell's resolved value, tagged by kind.
#[derive(Clone, Debug, PartialEq)]
pub enum CellValue {
    Numeric(f64),
    Str(String),
}

/// A marker activation this cube could not apply itself because it targets
/// a different cube. The caller — a multi-cube coordinator outside this
/// crate's scope — is expected to route it to the right cube's
/// `activate_marker_external`.
#[derive(Clone, Debug)]
pub struct PendingMarker {
    pub to_cube: u32,
    pub dest_ids: Vec<u32>,
}

struct Inner {
    numeric: CubeStore<f64>,
    strings: CubeStore<String>,
    rules: Vec<Rule>,
    next_rule_id: u32,
    markers: MarkerPropagator,
    locks: LockManager,
    rollback_logs: FxHashMap<u32, RollbackLog>,
    spills: FxHashMap<u32, Box<dyn Spill>>,
    consolidation_cache: ConsolidationCache,
    rule_cache: RuleCache,
}

/// One cube: a fixed dimension list, its numeric and string stores, rules,
/// markers, locks, and result caches, all behind one lock.
pub struct Cube {
    id: u32,
    dims: Vec<Arc<dyn Dimension>>,
    config: CubeConfig,
    authorizer: Arc<dyn Authorizer>,
    spill_factory: Arc<dyn SpillFactory>,
    side_effects: Option<Arc<dyn SideEffects>>,
    inner: parking_lot::RwLock<Inner>,
}

impl Cube {
    pub fn new(
        id: u32,
        dims: Vec<Arc<dyn Dimension>>,
        config: CubeConfig,
        authorizer: Arc<dyn Authorizer>,
        spill_factory: Arc<dyn SpillFactory>,
        cache_budget: SharedCacheBudget,
    ) -> Self {
        let inner = Inner {
            numeric: CubeStore::new(dims.len()),
            strings: CubeStore::new(dims.len()),
            rules: Vec::new(),
            next_rule_id: 0,
            markers: MarkerPropagator::new(),
            locks: LockManager::new(),
            rollback_logs: FxHashMap::default(),
            spills: FxHashMap::default(),
            consolidation_cache: ConsolidationCache::new(
                id,
                config.max_consolidation_cache_bytes,
                cache_budget.clone(),
            ),
            rule_cache: RuleCache::new(id, config.max_rule_cache_bytes, cache_budget),
        };
        Self {
            id,
            dims,
            config,
            authorizer,
            spill_factory,
            side_effects: None,
            inner: parking_lot::RwLock::new(inner),
        }
    }

    pub fn with_side_effects(mut self, side_effects: Arc<dyn SideEffects>) -> Self {
        self.side_effects = Some(side_effects);
        self
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    fn dim_refs(&self) -> Vec<&dyn Dimension> {
        self.dims.iter().map(|d| d.as_ref()).collect()
    }

    fn base_expansion(&self, ids: &[u32]) -> Vec<Vec<(u32, f64)>> {
        self.dims
            .iter()
            .zip(ids)
            .map(|(dim, &id)| base_elements(dim.as_ref(), id))
            .collect()
    }

    fn check_right(&self, user: u32, path_ids: &[u32], minimum: Right) -> Result<()> {
        if self.authorizer.min_right(user, path_ids) < minimum {
            return Err(Error::NotAuthorized);
        }
        Ok(())
    }

    fn notify_changed(&self, key: &Key) {
        if let Some(side_effects) = &self.side_effects {
            side_effects.on_cell_changed(key);
        }
    }

    // ---- read path -----------------------------------------------------

    /// Reads one cell, running it through the rule engine and consolidation
    /// cache as needed.
    pub fn get_cell(&self, user: u32, path_ids: &[u32]) -> Result<(CellValue, Option<u32>, bool)> {
        self.check_right(user, path_ids, Right::Read)?;
        let dims = self.dim_refs();
        let path = CellPath::new(&dims, path_ids)?;
        let key = path.key();

        if path.path_kind() == PathKind::String {
            let inner = self.inner.read();
            let found = inner.strings.contains(&key);
            let value = inner.strings.get(&key).cloned().unwrap_or_default();
            return Ok((CellValue::Str(value), None, found));
        }

        {
            let inner = self.inner.read();
            if let Some((value, rule_id)) = inner.rule_cache.get(&key) {
                return Ok((CellValue::Numeric(value), Some(rule_id), true));
            }
            if path.path_kind() == PathKind::Consolidated {
                if let Some(value) = inner.consolidation_cache.get(&key) {
                    let (found, resolved) = if value.is_nan() { (false, 0.0) } else { (true, value) };
                    return Ok((CellValue::Numeric(resolved), None, found));
                }
            }
        }

        let base = self.base_expansion(path_ids);
        let mut inner = self.inner.write();
        let found_raw = path.is_base() && inner.numeric.contains(&key);
        let (value, rule_id, cachable) = evaluate_numeric(&dims, &mut inner, &path, &base)?;

        if let Some(rid) = rule_id {
            let has_markers = inner
                .rules
                .iter()
                .find(|r| r.id == rid)
                .map(Rule::has_markers)
                .unwrap_or(false);
            if cachable && !has_markers {
                inner
                    .rule_cache
                    .insert(&key, value, rid, self.config.max_rule_cache_bytes);
            }
        } else if path.path_kind() == PathKind::Consolidated && cachable {
            let count = count_base_cells(&base);
            if count > self.config.cache_barrier {
                if value == 0.0 {
                    inner
                        .consolidation_cache
                        .insert_empty(&key, self.config.max_consolidation_cache_bytes);
                } else {
                    inner.consolidation_cache.insert(
                        &key,
                        value,
                        self.config.max_consolidation_cache_bytes,
                    );
                }
            }
        }

        let found = match path.path_kind() {
            PathKind::Consolidated => value != 0.0,
            _ => rule_id.is_some() || found_raw,
        };
        Ok((CellValue::Numeric(value), rule_id, found))
    }

    // ---- write path ------------------------------------------------------

    /// Writes a numeric cell. A consolidated target disaggregates through
    /// `splash_mode`; a base target writes directly.
    pub fn set_cell_numeric(
        &self,
        user: u32,
        path_ids: &[u32],
        value: f64,
        splash_mode: SplashMode,
        lock_id: Option<u32>,
    ) -> Result<Vec<PendingMarker>> {
        self.check_right(user, path_ids, Right::Write)?;
        let dims = self.dim_refs();
        let path = CellPath::new(&dims, path_ids)?;
        if path.path_kind() == PathKind::String {
            return Err(Error::InvalidElementType);
        }

        let mut inner = self.inner.write();
        if inner.locks.blocking_lock(path_ids, user).is_some() {
            return Err(Error::CubeBlockedByLock);
        }

        let pending = if path.is_base() {
            let key = path.key();
            let prior = inner.numeric.get(&key).copied();
            let writes = vec![(path_ids.to_vec(), value)];
            let priors = vec![(path_ids.to_vec(), prior)];
            apply_numeric_writes(
                &mut inner,
                self.spill_factory.as_ref(),
                self.config.maximum_memory_rollback_bytes,
                self.config.maximum_file_rollback_bytes,
                lock_id,
                &writes,
                &priors,
            )?
        } else {
            let base = self.base_expansion(path_ids);
            let rules = std::mem::take(&mut inner.rules);
            let current = {
                let mut resolver = |key: &Key, stored: f64| resolve_marker(&dims, &rules, key, stored);
                consolidate::consolidate(&mut inner.numeric, &base, &mut resolver)
            };
            inner.rules = rules;

            let limits = (
                self.config.splash_limit1,
                self.config.splash_limit2,
                self.config.splash_limit3,
            );
            let mut writes = Vec::new();
            let mut priors = Vec::new();
            {
                let mut existing = |ids: &[u32]| inner.numeric.get(&Key::new(ids.to_vec())).copied();
                let mut write = |ids: &[u32], v: f64| writes.push((ids.to_vec(), v));
                let mut record_prior =
                    |ids: &[u32], prior: Option<f64>| priors.push((ids.to_vec(), prior));
                splash::splash(
                    splash_mode,
                    &base,
                    current,
                    value,
                    limits,
                    &mut existing,
                    &mut write,
                    &mut record_prior,
                )?;
            }
            apply_numeric_writes(
                &mut inner,
                self.spill_factory.as_ref(),
                self.config.maximum_memory_rollback_bytes,
                self.config.maximum_file_rollback_bytes,
                lock_id,
                &writes,
                &priors,
            )?
        };

        inner.rule_cache.clear();
        invalidate_consolidation(&mut inner.consolidation_cache, &self.config, path_ids.len());
        drop(inner);

        let (local, remote) = split_pending(self.id, pending);
        for dest_ids in local {
            self.activate_marker_local(&dest_ids);
        }
        for dest in &remote {
            self.notify_changed(&Key::new(dest.dest_ids.clone()));
        }
        Ok(remote)
    }

    pub fn set_cell_string(
        &self,
        user: u32,
        path_ids: &[u32],
        value: String,
    ) -> Result<()> {
        self.check_right(user, path_ids, Right::Write)?;
        let dims = self.dim_refs();
        let path = CellPath::new(&dims, path_ids)?;
        if path.path_kind() != PathKind::String {
            return Err(Error::InvalidElementType);
        }
        let mut inner = self.inner.write();
        if inner.locks.blocking_lock(path_ids, user).is_some() {
            return Err(Error::CubeBlockedByLock);
        }
        inner.strings.set(path.key(), value, false);
        inner.rule_cache.clear();
        Ok(())
    }

    /// Writes a marker row activated by a rule in another cube. The destination's own base-cell insert propagation does not
    /// run for marker activations — only for genuine user writes.
    pub fn activate_marker_external(&self, dest_ids: &[u32]) {
        self.activate_marker_local(dest_ids);
    }

    /// Registers a marker declared by a rule on a different cube: records
    /// it in this (destination) cube's `markers_out` bookkeeping and
    /// activates it against every already-live source row the caller
    /// supplies. A multi-cube coordinator calls this on `spec.to_cube`
    /// once it has routed a `create_rule`/write's `PendingMarker`s.
    pub fn register_to_marker(&self, spec: MarkerSpec, source_rows: impl Iterator<Item = Key>) {
        let mut inner = self.inner.write();
        for key in source_rows.filter(|k| spec.from_area.within_ids(k.ids())) {
            if let Some(dest_ids) = spec.project(key.ids()) {
                let dest_key = Key::new(dest_ids);
                inner.numeric.set(dest_key.clone(), 0.0, true);
                inner.consolidation_cache.invalidate(&dest_key);
            }
        }
        inner.markers.add_to_marker(spec);
        inner.rule_cache.clear();
    }

    /// True once a marker registration (`register_to_marker`) or a source
    /// dimension change has scheduled a full marker rebuild that hasn't run
    /// yet.
    pub fn markers_rebuild_due(&self) -> bool {
        self.inner.read().markers.rebuild_due()
    }

    pub fn markers_epoch(&self) -> u64 {
        self.inner.read().markers.epoch()
    }

    /// Full marker rebuild: tombstones every marker-tagged cell in this
    /// cube, then replays every registered "from" marker against the rows
    /// `source_rows` returns for it. Called by a host process after
    /// learning a source dimension's hierarchy changed structurally enough
    /// that incremental marker maintenance (`check_from` on each write)
    /// can't be trusted to have kept up.
    pub fn rebuild_markers(&self, mut source_rows: impl FnMut(&MarkerSpec) -> Vec<Key>) {
        let mut inner = self.inner.write();
        for (_, page) in inner.numeric.pages_mut() {
            for idx in 0..page.len() {
                if page.row(idx).is_marker() && !page.row(idx).is_deleted() {
                    page.mark_deleted(idx);
                }
            }
        }
        let Inner {
            numeric,
            consolidation_cache,
            markers,
            ..
        } = &mut *inner;
        let mut activate = |_: &MarkerSpec, dest_ids: &[u32]| {
            let key = Key::new(dest_ids.to_vec());
            numeric.set(key.clone(), 0.0, true);
            consolidation_cache.invalidate(&key);
        };
        markers.rebuild(|| {}, &mut source_rows, &mut activate);
        inner.rule_cache.clear();
    }

    fn activate_marker_local(&self, dest_ids: &[u32]) {
        let mut inner = self.inner.write();
        let key = Key::new(dest_ids.to_vec());
        inner.numeric.set(key.clone(), 0.0, true);
        inner.consolidation_cache.invalidate(&key);
        inner.rule_cache.clear();
    }

    pub fn clear_cell(&self, user: u32, path_ids: &[u32], lock_id: Option<u32>) -> Result<()> {
        self.check_right(user, path_ids, Right::Delete)?;
        let dims = self.dim_refs();
        let path = CellPath::new(&dims, path_ids)?;
        let mut inner = self.inner.write();
        if inner.locks.blocking_lock(path_ids, user).is_some() {
            return Err(Error::CubeBlockedByLock);
        }

        if path.path_kind() == PathKind::String {
            inner.strings.remove(&path.key());
            return Ok(());
        }

        let base = self.base_expansion(path_ids);
        let mut targets = Vec::new();
        splash::for_each_base_cell(&base, |ids, _weight| targets.push(ids.to_vec()));
        clear_numeric_cells(
            &mut inner,
            self.spill_factory.as_ref(),
            self.config.maximum_memory_rollback_bytes,
            self.config.maximum_file_rollback_bytes,
            lock_id,
            &targets,
        )?;
        inner.rule_cache.clear();
        invalidate_consolidation(&mut inner.consolidation_cache, &self.config, path_ids.len());
        Ok(())
    }

    pub fn clear_cells(
        &self,
        user: u32,
        paths: &[Vec<u32>],
        lock_id: Option<u32>,
    ) -> Result<()> {
        for path_ids in paths {
            self.clear_cell(user, path_ids, lock_id)?;
        }
        Ok(())
    }

    /// Copies values between two compatible sub-areas, or splashes the
    /// source's aggregate into the destination when the shapes don't line
    /// up leaf-for-leaf.
    pub fn copy(
        &self,
        user: u32,
        source_ids: &[u32],
        dest_ids: &[u32],
        factor: Option<f64>,
        splash_mode: SplashMode,
        lock_id: Option<u32>,
    ) -> Result<()> {
        self.check_right(user, dest_ids, Right::Write)?;
        let dims = self.dim_refs();
        let src_path = CellPath::new(&dims, source_ids)?;
        let dst_path = CellPath::new(&dims, dest_ids)?;
        if src_path.path_kind() == PathKind::String || dst_path.path_kind() == PathKind::String {
            return Err(Error::InvalidElementType);
        }

        let mut inner = self.inner.write();
        if inner.locks.blocking_lock(dest_ids, user).is_some() {
            return Err(Error::CubeBlockedByLock);
        }

        let plan: Option<CopyPlan> = splash::plan_copy(&dims, source_ids, dest_ids)?;
        match plan {
            Some(plan) => {
                let mut writes = Vec::with_capacity(plan.pairs.len());
                let mut priors = Vec::with_capacity(plan.pairs.len());
                for (src, dst) in &plan.pairs {
                    let src_value = inner.numeric.get(&Key::new(src.clone())).copied().unwrap_or(0.0);
                    let value = factor.map(|f| src_value * f).unwrap_or(src_value);
                    priors.push((dst.clone(), inner.numeric.get(&Key::new(dst.clone())).copied()));
                    writes.push((dst.clone(), value));
                }
                apply_numeric_writes(
                    &mut inner,
                    self.spill_factory.as_ref(),
                    self.config.maximum_memory_rollback_bytes,
                    self.config.maximum_file_rollback_bytes,
                    lock_id,
                    &writes,
                    &priors,
                )?;
            }
            None => {
                let base_src = self.base_expansion(source_ids);
                let rules = std::mem::take(&mut inner.rules);
                let current_src = {
                    let mut resolver =
                        |key: &Key, stored: f64| resolve_marker(&dims, &rules, key, stored);
                    consolidate::consolidate(&mut inner.numeric, &base_src, &mut resolver)
                };
                inner.rules = rules;
                let value = factor.map(|f| current_src * f).unwrap_or(current_src);

                let base_dst = self.base_expansion(dest_ids);
                let limits = (
                    self.config.splash_limit1,
                    self.config.splash_limit2,
                    self.config.splash_limit3,
                );
                let mut writes = Vec::new();
                let mut priors = Vec::new();
                {
                    let mut existing =
                        |ids: &[u32]| inner.numeric.get(&Key::new(ids.to_vec())).copied();
                    let mut write = |ids: &[u32], v: f64| writes.push((ids.to_vec(), v));
                    let mut record_prior =
                        |ids: &[u32], prior: Option<f64>| priors.push((ids.to_vec(), prior));
                    splash::splash(
                        splash_mode,
                        &base_dst,
                        0.0,
                        value,
                        limits,
                        &mut existing,
                        &mut write,
                        &mut record_prior,
                    )?;
                }
                apply_numeric_writes(
                    &mut inner,
                    self.spill_factory.as_ref(),
                    self.config.maximum_memory_rollback_bytes,
                    self.config.maximum_file_rollback_bytes,
                    lock_id,
                    &writes,
                    &priors,
                )?;
            }
        }

        inner.rule_cache.clear();
        inner.consolidation_cache.clear();
        Ok(())
    }

    pub fn copy_like(
        &self,
        user: u32,
        source_ids: &[u32],
        dest_ids: &[u32],
        lock_id: Option<u32>,
    ) -> Result<()> {
        self.copy(user, source_ids, dest_ids, None, SplashMode::Default, lock_id)
    }

    /// Solves for the base cells that make `path_ids` equal `target`
    ///.
    pub fn goal_seek(
        &self,
        user: u32,
        path_ids: &[u32],
        target: f64,
        lock_id: Option<u32>,
    ) -> Result<()> {
        self.check_right(user, path_ids, Right::Write)?;
        let dims = self.dim_refs();
        let path = CellPath::new(&dims, path_ids)?;
        if path.path_kind() == PathKind::String {
            return Err(Error::InvalidElementType);
        }

        let mut inner = self.inner.write();
        if inner.locks.blocking_lock(path_ids, user).is_some() {
            return Err(Error::CubeBlockedByLock);
        }

        let base = self.base_expansion(path_ids);
        let rules = std::mem::take(&mut inner.rules);
        let current = {
            let mut resolver = |key: &Key, stored: f64| resolve_marker(&dims, &rules, key, stored);
            consolidate::consolidate(&mut inner.numeric, &base, &mut resolver)
        };
        inner.rules = rules;

        let timeout = std::time::Duration::from_millis(self.config.goalseek_timeout_ms);
        let mut writes = Vec::new();
        let mut priors = Vec::new();
        {
            let mut existing = |ids: &[u32]| inner.numeric.get(&Key::new(ids.to_vec())).copied();
            let mut write = |ids: &[u32], v: f64| writes.push((ids.to_vec(), v));
            let mut record_prior =
                |ids: &[u32], prior: Option<f64>| priors.push((ids.to_vec(), prior));
            crate::goalseek::goal_seek(
                &base,
                current,
                target,
                self.config.goalseek_cell_limit,
                timeout,
                &mut existing,
                &mut write,
                &mut record_prior,
            )?;
        }
        apply_numeric_writes(
            &mut inner,
            self.spill_factory.as_ref(),
            self.config.maximum_memory_rollback_bytes,
            self.config.maximum_file_rollback_bytes,
            lock_id,
            &writes,
            &priors,
        )?;
        inner.rule_cache.clear();
        inner.consolidation_cache.clear();
        Ok(())
    }

    // ---- export / area ---------------------------------------------------

    /// Streams a bounded, cursor-resumable block of `(path, value)` pairs
    ///.
    pub fn export_block(
        &self,
        user: u32,
        cursor: &ExportCursor,
        area: Option<&[Vec<u32>]>,
        block_size: usize,
        skip_empty: bool,
        resolve_markers: bool,
    ) -> Result<ExportPage<f64>> {
        let zero_path = vec![0u32; self.dims.len()];
        self.check_right(user, &zero_path, Right::Read)?;
        let dims = self.dim_refs();
        let inner = self.inner.read();
        let mut resolver = |key: &Key, stored: f64| resolve_marker(&dims, &inner.rules, key, stored);
        let mut condition = |_: &Key, _: f64| true;
        Ok(export::export_block(
            &inner.numeric,
            cursor,
            area,
            block_size,
            skip_empty,
            resolve_markers,
            &mut ExportResolverAdapter(&mut resolver),
            &mut condition,
        ))
    }

    // ---- locks -------------------------------------------------------------

    pub fn acquire_lock(&self, user: u32, area_string: String, area: &[Vec<u32>]) -> Result<u32> {
        let dims = self.dim_refs();
        let mut inner = self.inner.write();
        inner.locks.acquire(user, area_string, area, &dims)
    }

    pub fn commit_lock(&self, user: u32, lock_id: u32) -> Result<()> {
        let mut inner = self.inner.write();
        inner.locks.release(lock_id, user)?;
        inner.rollback_logs.remove(&lock_id);
        inner.spills.remove(&lock_id);
        Ok(())
    }

    pub fn rollback_lock(&self, user: u32, lock_id: u32, n_steps: usize) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner
            .locks
            .locks()
            .iter()
            .any(|l| l.id == lock_id && l.user_id == user)
        {
            return Err(Error::CubeWrongLock);
        }
        let Some(mut log) = inner.rollback_logs.remove(&lock_id) else {
            return Ok(());
        };
        let mut spill = inner
            .spills
            .remove(&lock_id)
            .unwrap_or_else(|| self.spill_factory.create(lock_id));

        let mut restore: Vec<(Key, PriorValue)> = Vec::new();
        let result = log.rollback(n_steps, spill.as_mut(), |path, prior| {
            restore.push((path.clone(), prior.clone()));
        });
        inner.rollback_logs.insert(lock_id, log);
        inner.spills.insert(lock_id, spill);
        result?;

        for (key, prior) in restore {
            match prior {
                PriorValue::Present(v) => {
                    inner.numeric.set(key, v, false);
                }
                PriorValue::Absent => {
                    inner.numeric.remove(&key);
                }
            }
        }
        inner.rule_cache.clear();
        inner.consolidation_cache.clear();
        Ok(())
    }

    // ---- rules -----------------------------------------------------------

    /// Registers a new rule and activates any markers it declares. Returns the rule id plus any activation that targets a
    /// different cube for the caller to route.
    pub fn create_rule(
        &self,
        option: RuleOption,
        body: Box<dyn RuleBody>,
        active: bool,
        timestamp: u64,
    ) -> (u32, Vec<PendingMarker>) {
        let mut inner = self.inner.write();
        let id = inner.next_rule_id;
        inner.next_rule_id += 1;
        let marker_specs: Vec<MarkerSpec> = body.markers().to_vec();
        inner.rules.push(Rule {
            id,
            option,
            active,
            timestamp,
            body,
        });

        let self_id = self.id;
        let mut pending = Vec::new();
        for spec in marker_specs {
            let rows: Vec<Key> = inner
                .numeric
                .pages()
                .flat_map(|(_, page)| page.rows().iter())
                .filter(|row| !row.is_deleted())
                .filter(|row| spec.from_area.within_ids(row.key.ids()))
                .map(|row| row.key.clone())
                .collect();
            let to_cube = spec.to_cube;
            inner.markers.add_from_marker(spec, rows.into_iter(), |_, ids| {
                if to_cube == self_id {
                    let key = Key::new(ids.to_vec());
                    inner.numeric.set(key, 0.0, true);
                } else {
                    pending.push(PendingMarker {
                        to_cube,
                        dest_ids: ids.to_vec(),
                    });
                }
            });
        }
        inner.rule_cache.clear();
        inner.consolidation_cache.clear();
        (id, pending)
    }

    pub fn activate_rule(&self, rule_id: u32, active: bool) -> Result<()> {
        let mut inner = self.inner.write();
        let rule = inner
            .rules
            .iter_mut()
            .find(|r| r.id == rule_id)
            .ok_or(Error::RuleNotFound)?;
        rule.active = active;
        inner.rule_cache.clear();
        Ok(())
    }

    pub fn delete_rule(&self, rule_id: u32) -> Result<()> {
        let mut inner = self.inner.write();
        let pos = inner
            .rules
            .iter()
            .position(|r| r.id == rule_id)
            .ok_or(Error::RuleNotFound)?;
        inner.rules.remove(pos);
        inner.rule_cache.clear();
        Ok(())
    }

    pub fn rule_summary(&self, rule_id: u32) -> Result<(RuleOption, bool, u64)> {
        let inner = self.inner.read();
        let rule = inner
            .rules
            .iter()
            .find(|r| r.id == rule_id)
            .ok_or(Error::RuleNotFound)?;
        Ok((rule.option, rule.active, rule.timestamp))
    }
}

/// Adapts a `FnMut(&Key, f64) -> f64` closure to `ExportResolver` — needed
/// because `export_block` takes a trait object and closures can't directly
/// coerce to it across this crate's module boundary without the wrapper.
struct ExportResolverAdapter<'a>(&'a mut dyn FnMut(&Key, f64) -> f64);

impl ExportResolver for ExportResolverAdapter<'_> {
    fn resolve(&mut self, key: &Key) -> f64 {
        (self.0)(key, 0.0)
    }
}

fn split_pending(self_id: u32, pending: Vec<PendingMarker>) -> (Vec<Vec<u32>>, Vec<PendingMarker>) {
    let mut local = Vec::new();
    let mut remote = Vec::new();
    for marker in pending {
        if marker.to_cube == self_id {
            local.push(marker.dest_ids);
        } else {
            remote.push(marker);
        }
    }
    (local, remote)
}

fn invalidate_consolidation(cache: &mut ConsolidationCache, config: &CubeConfig, touched: usize) {
    if cache.invalidate_counter() as u64 >= config.cache_clear_barrier
        || touched as u64 >= config.cache_clear_barrier_cells
    {
        cache.clear();
    }
}

/// One-level weighted children of `path` across every dimension at once —
/// the indirect-match recursion's "child" unit.
fn children_of(dims: &[&dyn Dimension], path: &CellPath) -> Vec<(CellPath, f64)> {
    let mut per_dim: Vec<Vec<(u32, f64)>> = Vec::with_capacity(path.dims());
    for d in 0..path.dims() {
        if path.kind(d) == ElementKind::Consolidated {
            let element = match dims[d].element(path.id(d)) {
                Some(e) => e,
                None => return Vec::new(),
            };
            let kids: Vec<(u32, f64)> = element
                .children
                .iter()
                .copied()
                .filter(|&(_, w)| w != 0.0)
                .collect();
            per_dim.push(kids);
        } else {
            per_dim.push(vec![(path.id(d), 1.0)]);
        }
    }
    let mut out = Vec::new();
    splash::for_each_base_cell(&per_dim, |ids, weight| {
        if let Ok(child) = CellPath::new(dims, ids) {
            out.push((child, weight));
        }
    });
    out
}

/// Resolves a marker row's value for `consolidate`'s `MarkerResolver`.
/// Marker rows only ever sit at base cells, so this only needs the direct-
/// match step of rule evaluation, with `stored_value` as the fallback.
fn resolve_marker(dims: &[&dyn Dimension], rules: &[Rule], key: &Key, stored_value: f64) -> f64 {
    let Ok(path) = CellPath::new(dims, key.ids()) else {
        return stored_value;
    };
    let mut engine = RuleEngine::new();
    let mut children = |_: &CellPath| Vec::new();
    let mut fallback = |_: &CellPath| Ok(stored_value);
    engine
        .get_cell_value(&path, rules, &[], &mut children, &mut fallback)
        .map(|(value, _, _)| value)
        .unwrap_or(stored_value)
}

/// Drives `RuleEngine::get_cell_value` for one numeric/consolidated path,
/// wiring `children_of` and a store-backed fallback that consolidates over
/// `inner.numeric`, resolving any marker rows it crosses.
fn evaluate_numeric(
    dims: &[&dyn Dimension],
    inner: &mut Inner,
    path: &CellPath,
    base: &[Vec<(u32, f64)>],
) -> Result<(f64, Option<u32>, bool)> {
    let mut engine = RuleEngine::new();
    let mut children = |p: &CellPath| children_of(dims, p);
    let mut fallback = |p: &CellPath| -> Result<f64> {
        if p.is_base() {
            Ok(inner.numeric.get(&p.key()).copied().unwrap_or(0.0))
        } else {
            let sub_base: Vec<Vec<(u32, f64)>> = dims
                .iter()
                .zip(p.ids())
                .map(|(dim, &id)| base_elements(*dim, id))
                .collect();
            let rules = &inner.rules;
            let mut resolver = |key: &Key, stored: f64| resolve_marker(dims, rules, key, stored);
            Ok(consolidate::consolidate(&mut inner.numeric, &sub_base, &mut resolver))
        }
    };
    engine.get_cell_value(path, &inner.rules, base, &mut children, &mut fallback)
}

#[allow(clippy::too_many_arguments)]
fn apply_numeric_writes(
    inner: &mut Inner,
    spill_factory: &dyn SpillFactory,
    mem_budget: u64,
    disk_budget: u64,
    lock_id: Option<u32>,
    writes: &[(Vec<u32>, f64)],
    priors: &[(Vec<u32>, Option<f64>)],
) -> Result<Vec<PendingMarker>> {
    if let Some(lock_id) = lock_id {
        inner
            .rollback_logs
            .entry(lock_id)
            .or_insert_with(|| RollbackLog::new(mem_budget, disk_budget))
            .begin_step();
        for (ids, prior) in priors {
            let key = Key::new(ids.clone());
            let prior_value = match prior {
                Some(v) => PriorValue::Present(*v),
                None => PriorValue::Absent,
            };
            let spill = inner
                .spills
                .entry(lock_id)
                .or_insert_with(|| spill_factory.create(lock_id));
            inner
                .rollback_logs
                .get_mut(&lock_id)
                .expect("inserted above")
                .record(key, prior_value, spill.as_mut())?;
        }
    }

    let mut pending = Vec::new();
    for (ids, value) in writes {
        let key = Key::new(ids.clone());
        inner.numeric.set(key.clone(), *value, false);
        for (to_cube, dest_ids) in inner.markers.check_from(&key) {
            pending.push(PendingMarker { to_cube, dest_ids });
        }
    }
    Ok(pending)
}

fn clear_numeric_cells(
    inner: &mut Inner,
    spill_factory: &dyn SpillFactory,
    mem_budget: u64,
    disk_budget: u64,
    lock_id: Option<u32>,
    targets: &[Vec<u32>],
) -> Result<()> {
    if let Some(lock_id) = lock_id {
        inner
            .rollback_logs
            .entry(lock_id)
            .or_insert_with(|| RollbackLog::new(mem_budget, disk_budget))
            .begin_step();
    }
    for ids in targets {
        let key = Key::new(ids.clone());
        let prior = inner.numeric.get(&key).copied();
        if prior.is_none() {
            continue;
        }
        if let Some(lock_id) = lock_id {
            let spill = inner
                .spills
                .entry(lock_id)
                .or_insert_with(|| spill_factory.create(lock_id));
            inner
                .rollback_logs
                .get_mut(&lock_id)
                .expect("inserted above")
                .record(key.clone(), PriorValue::Present(prior.unwrap()), spill.as_mut())?;
        }
        let is_marker = inner
            .numeric
            .page(key.ids())
            .and_then(|page| page.lookup(&key).map(|slot| page.row(slot).is_marker()))
            .unwrap_or(false);
        if is_marker {
            inner.numeric.clear_marker(&key, 0.0);
        } else {
            inner.numeric.remove(&key);
        }
    }
    Ok(())
}
