//! Shared run state threaded through the scheduler and the state machine.

use std::collections::BTreeMap;
use std::fmt;

use crate::core::task::{Task, TaskStatus};

/// Default token budget for one run.
pub const DEFAULT_BUDGET_LIMIT: u64 = 500_000;
/// Default quota of dynamically generated tasks per run.
pub const DEFAULT_MAX_DYNAMIC_TASKS: u32 = 10;

/// Knobs fixed for the duration of one scheduler run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub dry_run: bool,
    /// Token ceiling. 0 disables the check.
    pub budget_limit: u64,
    /// Model-call ceiling. 0 disables the check.
    pub call_limit: u64,
    /// Cap on planner-generated tasks. Once hit, missing dependencies fail
    /// their dependents instead of growing the queue.
    pub max_dynamic_tasks: u32,
    /// Restrict the run to a single task id.
    pub only_task: Option<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            budget_limit: DEFAULT_BUDGET_LIMIT,
            call_limit: 0,
            max_dynamic_tasks: DEFAULT_MAX_DYNAMIC_TASKS,
            only_task: None,
        }
    }
}

/// Per-status task counts, used for the status command and the run report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub blocked: usize,
    pub done: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.pending + self.in_progress + self.blocked + self.done + self.failed + self.skipped
    }
}

impl fmt::Display for StatusCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pending={} in-progress={} blocked={} done={} failed={} skipped={}",
            self.pending, self.in_progress, self.blocked, self.done, self.failed, self.skipped
        )
    }
}

/// The live run: queue, completed map and cumulative usage.
///
/// Usage counters are pulled from the model client once per scheduler
/// iteration; nothing else writes them.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub queue: Vec<Task>,
    /// Tasks that reached a terminal status, keyed by id. `done` entries here
    /// are what satisfies dependencies.
    pub completed: BTreeMap<String, Task>,
    pub tokens_used: u64,
    pub calls_made: u64,
    pub dynamic_tasks_created: u32,
    pub options: RunOptions,
}

impl RunContext {
    pub fn new(options: RunOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Look a task up by id across the queue and the completed map.
    pub fn find_task(&self, id: &str) -> Option<&Task> {
        self.queue
            .iter()
            .find(|t| t.id == id)
            .or_else(|| self.completed.get(id))
    }

    /// All tasks the run knows about, queue first.
    pub fn all_tasks(&self) -> impl Iterator<Item = &Task> {
        self.queue.iter().chain(self.completed.values())
    }

    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for task in self.all_tasks() {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::InProgress => counts.in_progress += 1,
                TaskStatus::Blocked => counts.blocked += 1,
                TaskStatus::Done => counts.done += 1,
                TaskStatus::Failed => counts.failed += 1,
                TaskStatus::Skipped => counts.skipped += 1,
            }
        }
        counts
    }

    /// True while the queue still holds a task that could run this pass.
    pub fn has_open_tasks(&self) -> bool {
        self.queue.iter().any(Task::is_open)
    }

    /// True once the dynamic-task quota is spent.
    pub fn dynamic_quota_exhausted(&self) -> bool {
        self.dynamic_tasks_created >= self.options.max_dynamic_tasks
    }
}
