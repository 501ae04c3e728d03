// External collaborator ports.
// This crate never implements these — only the traits the engine calls
// against. Production implementations (file I/O, the user/role model, the
// rule-language parser) live outside this crate; tests supply fakes.

use crate::error::Result;
use crate::key::Key;
use crate::rule::RuleBody;

/// Access level, ordered low to high. Grounded in the original's
/// `RIGHT_READ < RIGHT_WRITE < RIGHT_DELETE < RIGHT_SPLASH` comparisons
/// (`Olap/Cube.cpp`); `None` is the floor below `Read`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Right {
    None,
    Read,
    Write,
    Delete,
    Splash,
}

/// Authentication/session/user-role model. The
/// engine only ever asks for the weakest right a user holds over every
/// element on a cell's path.
pub trait Authorizer: Send + Sync {
    fn min_right(&self, user: u32, path_ids: &[u32]) -> Right;
}

/// Rule parsing and AST construction. Compiles rule
/// source text into the opaque body the engine drives through
/// `rule::RuleBody`; the rule language itself never enters this crate.
pub trait RuleCompiler: Send + Sync {
    fn compile(&self, ast_text: &str) -> Result<Box<dyn RuleBody>>;
}

/// One command appended to the journal.
#[derive(Clone, Debug)]
pub enum JournalCommand {
    SetDouble { path: Key, value: f64 },
    SetString { path: Key, value: String },
    ClearCell { path: Key },
    ClearCells { paths: Vec<Key> },
    CopyValues { from: Key, to: Key, factor: Option<f64> },
    DeleteElement { dimension: u32, element: u32 },
}

/// Append-only command log. The engine appends one command per
/// committed write.
pub trait Journal: Send + Sync {
    fn append(&mut self, command: JournalCommand) -> Result<()>;
}

/// Persisted cube/rule file load and save. `Cube`
/// only calls this at the boundaries §6 names ("cube file", "rules file");
/// the on-disk format itself is out of scope.
pub trait Snapshot: Send + Sync {
    fn save_numeric_row(&mut self, path: &Key, value: f64) -> Result<()>;
    fn save_string_row(&mut self, path: &Key, value: &str) -> Result<()>;
    fn load_numeric_rows(&mut self) -> Result<Vec<(Key, f64)>>;
    fn load_string_rows(&mut self) -> Result<Vec<(Key, String)>>;
}

/// Tag distinguishing the handful of specialised cube behaviours the
/// original expressed via multiple inheritance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CubeKind {
    Normal,
    Rights,
    Attributes,
    Configuration,
    SubsetView,
    UserInfo,
}

/// Behaviour a specialised cube kind hooks into the core for — e.g. a
/// `Rights` cube recomputing its authorizer view on write, or a
/// `UserInfo` cube enforcing a `Right::Delete` floor. `Cube` only ever
/// holds this behind a shared `Arc`, so any implementor that needs to
/// mutate state on notification wraps its own interior mutability.
pub trait SideEffects: Send + Sync {
    fn on_cell_changed(&self, path: &Key);
}
