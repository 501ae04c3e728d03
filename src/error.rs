// Error taxonomy for the cube engine.
//
// A hand-rolled `Error` enum: no `thiserror`, just `Display`/
// `std::error::Error` impls and a handful of `From` conversions.

use std::fmt;

/// A single error kind, matching the cube engine's error taxonomy.
#[derive(Debug)]
pub enum Error {
    /// An internal invariant was violated; the operation aborted and state
    /// was left as found.
    Internal(String),

    /// Caller-supplied path does not match the cube's dimension count.
    InvalidCoordinates,

    /// Caller addressed a cell with the wrong value kind (e.g. a string
    /// write against a numeric path).
    InvalidElementType,

    /// Splash attempted against a consolidated target with `splash_mode ==
    /// disabled`.
    SplashDisabled,

    /// Splash is not possible: zero total weight, or the working set
    /// exceeds `splash_limit1`.
    SplashNotPossible,

    /// Copy/copy_like source and destination overlap at the base-element
    /// level.
    CircularReference,

    /// The authorizer denied the operation.
    NotAuthorized,

    /// No such rule.
    RuleNotFound,

    /// Rule evaluation detected a `(rule, path)` cycle on the call stack.
    RuleHasCircularReference,

    /// The rule compiler (external collaborator) rejected the AST.
    ParsingRule(String),

    /// A write inside another user's lock overlap area was rejected.
    CubeBlockedByLock,

    /// Lock operation attempted by a user who does not own the lock.
    CubeWrongUser,

    /// Commit/rollback referenced a lock id that exists but isn't the
    /// caller's.
    CubeWrongLock,

    /// No lock with that id.
    CubeLockNotFound,

    /// The rollback log's memory+disk budget is exhausted.
    CubeLockNoCapacity,

    /// A dimension filter produced more elements than the configured limit.
    MaxElemReached,

    /// Allocation failed; operation aborted, caches cleared.
    OutOfMemory,

    /// Goal seek was infeasible or exceeded its cell/time budget.
    GoalSeek,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal(detail) => write!(f, "internal error: {detail}"),
            Self::InvalidCoordinates => write!(f, "invalid coordinates"),
            Self::InvalidElementType => write!(f, "invalid element type"),
            Self::SplashDisabled => write!(f, "splash disabled"),
            Self::SplashNotPossible => write!(f, "splash not possible"),
            Self::CircularReference => write!(f, "circular reference"),
            Self::NotAuthorized => write!(f, "not authorized"),
            Self::RuleNotFound => write!(f, "rule not found"),
            Self::RuleHasCircularReference => write!(f, "rule has circular reference"),
            Self::ParsingRule(detail) => write!(f, "error parsing rule: {detail}"),
            Self::CubeBlockedByLock => write!(f, "cube blocked by lock"),
            Self::CubeWrongUser => write!(f, "cube wrong user"),
            Self::CubeWrongLock => write!(f, "cube wrong lock"),
            Self::CubeLockNotFound => write!(f, "cube lock not found"),
            Self::CubeLockNoCapacity => write!(f, "cube lock has no capacity left"),
            Self::MaxElemReached => write!(f, "maximum number of elements reached"),
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::GoalSeek => write!(f, "goal seek infeasible or timed out"),
        }
    }
}

impl std::error::Error for Error {}

/// Cube engine result.
pub type Result<T> = std::result::Result<T, Error>;
