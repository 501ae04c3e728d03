// Engine-wide tunables: no process-wide mutable globals. A `CubeConfig` is
// constructed once per cube and passed/cloned into every engine entry point
// that needs it, built once and threaded through rather than read from
// ambient state.

/// Tunables recognised by the engine.
#[derive(Clone, Debug, PartialEq)]
pub struct CubeConfig {
    /// Minimum base-cell count for a consolidated read to be cached.
    pub cache_barrier: u64,

    /// Point-invalidation count above which the consolidation cache is
    /// cleared wholesale.
    pub cache_clear_barrier: u64,

    /// Touched-cell count above which a single write's invalidation clears
    /// the cache instead of removing matching entries.
    pub cache_clear_barrier_cells: u64,

    /// Byte budget for the consolidation cache (shared process-wide).
    pub max_consolidation_cache_bytes: u64,

    /// Byte budget for the rule cache (shared process-wide).
    pub max_rule_cache_bytes: u64,

    /// Splash working-set size (MB) above which splash fails outright.
    pub splash_limit1: u64,
    /// Splash working-set size (MB) above which splash warns.
    pub splash_limit2: u64,
    /// Splash working-set size (MB) above which splash logs at info level.
    pub splash_limit3: u64,

    /// Maximum number of base cells goal-seek may touch.
    pub goalseek_cell_limit: u64,
    /// Wall-clock budget for goal-seek, in milliseconds.
    pub goalseek_timeout_ms: u64,

    /// Rollback log on-disk spill budget, in bytes.
    pub maximum_file_rollback_bytes: u64,
    /// Rollback log in-memory budget, in bytes.
    pub maximum_memory_rollback_bytes: u64,

    /// Initial row capacity for a freshly created `CellPage`.
    pub page_size: usize,

    /// When set, reads never fall through to stored cell data (rules and
    /// consolidation only); used by specialised cube kinds (§9).
    pub ignore_cell_data: bool,
}

impl Default for CubeConfig {
    fn default() -> Self {
        Self {
            cache_barrier: 5_000,
            cache_clear_barrier: 5,
            cache_clear_barrier_cells: 1_000,
            max_consolidation_cache_bytes: 64 * 1024 * 1024,
            max_rule_cache_bytes: 16 * 1024 * 1024,
            splash_limit1: 512,
            splash_limit2: 128,
            splash_limit3: 32,
            goalseek_cell_limit: 10_000,
            goalseek_timeout_ms: 5_000,
            maximum_file_rollback_bytes: 256 * 1024 * 1024,
            maximum_memory_rollback_bytes: 32 * 1024 * 1024,
            page_size: 1_024,
            ignore_cell_data: false,
        }
    }
}

impl CubeConfig {
    /// Starts from engine defaults.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache_barrier(mut self, value: u64) -> Self {
        self.cache_barrier = value;
        self
    }

    pub fn with_cache_clear_barrier(mut self, value: u64) -> Self {
        self.cache_clear_barrier = value;
        self
    }

    pub fn with_cache_clear_barrier_cells(mut self, value: u64) -> Self {
        self.cache_clear_barrier_cells = value;
        self
    }

    pub fn with_max_consolidation_cache_bytes(mut self, value: u64) -> Self {
        self.max_consolidation_cache_bytes = value;
        self
    }

    pub fn with_max_rule_cache_bytes(mut self, value: u64) -> Self {
        self.max_rule_cache_bytes = value;
        self
    }

    pub fn with_splash_limits(mut self, limit1: u64, limit2: u64, limit3: u64) -> Self {
        self.splash_limit1 = limit1;
        self.splash_limit2 = limit2;
        self.splash_limit3 = limit3;
        self
    }

    pub fn with_goalseek(mut self, cell_limit: u64, timeout_ms: u64) -> Self {
        self.goalseek_cell_limit = cell_limit;
        self.goalseek_timeout_ms = timeout_ms;
        self
    }

    pub fn with_rollback_budgets(mut self, memory_bytes: u64, file_bytes: u64) -> Self {
        self.maximum_memory_rollback_bytes = memory_bytes;
        self.maximum_file_rollback_bytes = file_bytes;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_ignore_cell_data(mut self, value: bool) -> Self {
        self.ignore_cell_data = value;
        self
    }
}
