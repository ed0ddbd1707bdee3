//! Git adapter behind the version-control seam.
//!
//! The pipeline commits deterministically and reverts on unrecoverable
//! attempt errors, so we keep a small, explicit wrapper around `git`
//! subprocess calls with a per-command timeout.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::io::process::run_command_with_timeout;

const GIT_OUTPUT_LIMIT_BYTES: usize = 100_000;

/// Version-control operations the state machine depends on.
///
/// A trait seam so tests can script commit results without a repository.
pub trait VersionControl {
    /// True when the worktree has uncommitted changes (including untracked).
    fn has_changes(&self) -> Result<bool>;

    /// Stage everything and commit. Returns the new commit hash.
    fn commit(&self, message: &str) -> Result<String>;

    /// Throw away all uncommitted changes, tracked and untracked.
    fn revert_workspace(&self) -> Result<()>;
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    timeout: Duration,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            workdir: workdir.into(),
            timeout,
        }
    }

    fn run_checked(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(&self.workdir);
        let out = run_command_with_timeout(cmd, None, self.timeout, GIT_OUTPUT_LIMIT_BYTES)?;
        if out.timed_out {
            return Err(anyhow!("git {} timed out", args.join(" ")));
        }
        if !out.status.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                out.stderr_text().trim()
            ));
        }
        Ok(out.stdout_text())
    }
}

impl VersionControl for Git {
    fn has_changes(&self) -> Result<bool> {
        let out = self.run_checked(&["status", "--porcelain"])?;
        Ok(!out.trim().is_empty())
    }

    #[instrument(skip_all)]
    fn commit(&self, message: &str) -> Result<String> {
        self.run_checked(&["add", "-A"])?;
        self.run_checked(&["commit", "-m", message])?;
        let hash = self.run_checked(&["rev-parse", "HEAD"])?;
        let hash = hash.trim().to_string();
        debug!(%hash, "committed");
        Ok(hash)
    }

    #[instrument(skip_all)]
    fn revert_workspace(&self) -> Result<()> {
        warn!("reverting uncommitted changes");
        self.run_checked(&["checkout", "HEAD", "--", "."])?;
        // Drop untracked files the attempt created.
        self.run_checked(&["clean", "-fd"])?;
        Ok(())
    }
}

/// Commit message for a finished task.
pub fn commit_message(task_id: &str, title: &str) -> String {
    format!("agent: {task_id} - {title}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_message_format_is_stable() {
        assert_eq!(
            commit_message("T1", "Add parser"),
            "agent: T1 - Add parser"
        );
    }
}
