//! Operator interaction after a task fails terminally.

use std::io::{BufRead, IsTerminal, Write};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::core::task::Task;

/// Seam for the pause-on-failure prompt.
///
/// `None` means no guidance was given and the run should stop; `Some(hint)`
/// re-queues the failed task with the hint attached.
pub trait ApprovalChannel {
    fn request_hint(&mut self, task: &Task) -> Result<Option<String>>;
}

/// Interactive channel reading one line from stdin.
///
/// A non-interactive stdin never blocks the run: the prompt is skipped and
/// the run stops as if the operator had pressed enter.
#[derive(Debug, Default)]
pub struct StdinApproval;

impl ApprovalChannel for StdinApproval {
    fn request_hint(&mut self, task: &Task) -> Result<Option<String>> {
        let stdin = std::io::stdin();
        if !stdin.is_terminal() {
            debug!(task_id = %task.id, "stdin is not a terminal, skipping hint prompt");
            return Ok(None);
        }

        let mut stderr = std::io::stderr();
        write!(
            stderr,
            "task {} failed: {}\nhint to retry (empty to stop)> ",
            task.id,
            task.error.as_deref().unwrap_or("unknown error"),
        )
        .context("write hint prompt")?;
        stderr.flush().context("flush hint prompt")?;

        let mut line = String::new();
        stdin
            .lock()
            .read_line(&mut line)
            .context("read hint from stdin")?;
        let hint = line.trim();
        if hint.is_empty() {
            info!(task_id = %task.id, "no hint given, stopping");
            Ok(None)
        } else {
            info!(task_id = %task.id, "hint given, re-queueing task");
            Ok(Some(hint.to_string()))
        }
    }
}

/// Channel that never re-queues; used for non-interactive runs.
#[derive(Debug, Default)]
pub struct NoApproval;

impl ApprovalChannel for NoApproval {
    fn request_hint(&mut self, _task: &Task) -> Result<Option<String>> {
        Ok(None)
    }
}
