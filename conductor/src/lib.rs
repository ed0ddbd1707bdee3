//! Crash-safe, dependency-aware pipeline for model-driven code changes.
//!
//! A single-process scheduler pulls tasks off a dependency graph and drives
//! each one through analysis, coding, review and (when retries pile up)
//! supervision, persisting a full snapshot after every transition. The
//! architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (graph checks, change sets,
//!   path normalization). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (filesystem, git, subprocesses,
//!   the model client). Isolated behind traits to enable scripting in tests.
//!
//! Orchestration modules ([`step`], [`looping`], [`start`]) coordinate core
//! logic with I/O to implement CLI commands.

pub mod agents;
pub mod core;
pub mod exit_codes;
pub mod governor;
pub mod io;
pub mod logging;
pub mod looping;
pub mod start;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
