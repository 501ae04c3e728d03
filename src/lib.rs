//! Core computation and storage engine of a multidimensional OLAP cube
//! server: a packed-key cell store, consolidation across element
//! hierarchies, rule evaluation with marker propagation, a two-tier result
//! cache, a rollback log for locked edits, and the splash/copy/goal-seek
//! algorithms that disaggregate a consolidated write back down to base
//! cells.
//!
//! ##### NOTE
//!
//! > This crate is the engine, not a server. It has no network listener, no
//! > user/session model, no rule-language parser, and no on-disk format —
//! > those live in [`ports`] as traits a host process implements and wires
//! > in (see [`ports::Authorizer`], [`ports::RuleCompiler`], [`ports::Journal`],
//! > [`ports::Snapshot`]).
//!
//! ##### About
//!
//! A [`cube::Cube`] holds one cube's dimensions, numeric and string cell
//! stores, rules, markers, locks, and caches behind a single read/write
//! lock (one writer, many readers, per spec). Reading a consolidated cell
//! walks its hierarchy bottom-up ([`consolidate`]); a rule can intercept
//! that walk at any path ([`rule`]) and activate a marker row in another
//! cube ([`marker`]). Writing a consolidated cell disaggregates the new
//! value down across its base leaves ([`splash`]); writing under a lock
//! records the prior value so the edit can be undone ([`rollback`]).

pub mod cache;
pub mod cell_path;
pub mod config;
pub mod consolidate;
pub mod cube;
pub mod element;
pub mod error;
pub mod export;
pub mod goalseek;
pub mod key;
pub mod key_index;
pub mod lock;
pub mod marker;
pub mod page;
pub mod ports;
pub mod rollback;
pub mod rule;
pub mod splash;
pub mod store;

pub use cache::SharedCacheBudget;
pub use cell_path::{CellPath, PathKind};
pub use config::CubeConfig;
pub use cube::{CellValue, Cube, PendingMarker};
pub use element::{Dimension, Element, ElementKind};
pub use error::{Error, Result};
pub use export::{ExportCursor, ExportPage};
pub use key::Key;
pub use ports::{Authorizer, CubeKind, Journal, JournalCommand, Right, RuleCompiler, SideEffects, Snapshot};
pub use rollback::{Spill, SpillFactory};
pub use rule::{Area, Rule, RuleBody, RuleEvalResult, RuleOption};
pub use splash::SplashMode;
