//! I/O adapters for pipeline commands.

pub mod approval;
pub mod config;
pub mod git;
pub mod model;
pub mod process;
pub mod state_store;
pub mod tools;
pub mod workspace;
