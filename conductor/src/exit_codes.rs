//! Stable exit codes for conductor CLI commands.

/// Command succeeded; for `run`, the queue completed.
pub const OK: i32 = 0;
/// Command failed due to invalid seed/config/state or another error.
pub const INVALID: i32 = 1;
/// `conductor run` paused on a failed or blocked task awaiting guidance.
pub const PAUSED: i32 = 2;
/// `conductor run` found open tasks but none could make progress.
pub const STALLED: i32 = 3;
/// `conductor run` stopped at the token budget or call limit.
pub const LIMIT: i32 = 4;
