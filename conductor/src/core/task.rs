//! Task records shared by the scheduler, the state machine and the snapshot.

use serde::{Deserialize, Serialize};

/// Default retry budget for newly created tasks.
pub const DEFAULT_MAX_RETRIES: u32 = 20;

/// Lifecycle status of a task.
///
/// `Done`, `Failed` and `Skipped` are terminal for a run; `Failed` and
/// `Blocked` can be flipped back to `Pending` from outside (approval channel
/// or `reset-failed`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Blocked,
    Done,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
        }
    }
}

/// Origin of a task definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreatedBy {
    /// Seeded from the initial task list.
    Initial,
    /// Generated dynamically (missing dependency or subtask decomposition).
    Planner,
}

/// Outcome of one review attempt. Replaces the task's previous result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewResult {
    pub passed: bool,
    pub issues: Vec<String>,
    pub suggestions: Vec<String>,
    /// Reviewer-confirmed facts handed back to the coder to avoid rediscovery.
    pub context_for_coder: String,
}

impl ReviewResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            ..Self::default()
        }
    }

    pub fn fail(issues: Vec<String>) -> Self {
        Self {
            passed: false,
            issues,
            ..Self::default()
        }
    }
}

/// A file the analysis report declares relevant to the task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisFile {
    pub path: String,
    pub action: String,
}

/// A subtask the analyst asks the scheduler to split off.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubtaskSpec {
    pub title: String,
    pub description: String,
    pub dependencies: Vec<String>,
    pub category: String,
}

/// Structured report cached on the task after the analysis phase.
///
/// Stored as a JSON string in [`Task::analysis_cache`]; presence of the cache
/// means analysis is skipped on re-entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisReport {
    pub summary: String,
    pub files: Vec<AnalysisFile>,
    pub gaps: Vec<String>,
    pub subtasks: Vec<SubtaskSpec>,
}

impl AnalysisReport {
    /// Parse a report from a cached JSON string. Returns `None` when the cache
    /// does not hold a report-shaped object (e.g. a dry-run stub).
    pub fn from_cache(cache: &str) -> Option<Self> {
        serde_json::from_str(cache).ok()
    }
}

/// Unit of work moving through the pipeline.
///
/// Tasks are never deleted; they only transition status or get parked as
/// `blocked`. `retry_count <= max_retries` holds only at the point retries
/// are consumed, because escalation may raise `max_retries` mid-run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub dependencies: Vec<String>,
    /// Lower is more urgent.
    pub priority: i64,
    /// Secondary sort key after priority.
    pub phase: i64,
    pub category: String,
    pub created_by: CreatedBy,
    pub retry_count: u32,
    pub max_retries: u32,
    pub analysis_cache: Option<String>,
    pub coder_output_summary: Option<String>,
    pub review_result: Option<ReviewResult>,
    pub error: Option<String>,
    pub commit_hash: Option<String>,
    pub supervisor_hint: Option<String>,
    pub supervisor_plan: Option<String>,
    pub supervisor_must_change_files: Vec<String>,
    /// Idempotence guard: subtasks are materialized at most once per task.
    pub analysis_subtasks_generated: bool,
}

impl Default for Task {
    fn default() -> Self {
        Self {
            id: String::new(),
            title: String::new(),
            description: String::new(),
            status: TaskStatus::Pending,
            dependencies: Vec::new(),
            priority: 0,
            phase: 0,
            category: String::new(),
            created_by: CreatedBy::Initial,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            analysis_cache: None,
            coder_output_summary: None,
            review_result: None,
            error: None,
            commit_hash: None,
            supervisor_hint: None,
            supervisor_plan: None,
            supervisor_must_change_files: Vec::new(),
            analysis_subtasks_generated: false,
        }
    }
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
            ..Self::default()
        }
    }

    /// True when the task may still be picked up in this run, directly
    /// (pending) or after an operator requeue (blocked, failed).
    pub fn is_open(&self) -> bool {
        matches!(
            self.status,
            TaskStatus::Pending | TaskStatus::Blocked | TaskStatus::Failed
        )
    }
}
