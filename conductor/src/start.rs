//! Run setup: on-disk layout, seeding, resume and the full pipeline wiring.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::core::context::{RunContext, RunOptions, StatusCounts};
use crate::core::graph::validate_no_cycles;
use crate::core::task::{CreatedBy, Task, TaskStatus};
use crate::io::approval::{ApprovalChannel, NoApproval, StdinApproval};
use crate::io::config::{ConductorConfig, load_config, write_config};
use crate::io::git::Git;
use crate::io::model::CommandModelClient;
use crate::io::state_store::{StateSnapshot, load_snapshot, write_snapshot};
use crate::io::tools::WorkspaceTools;
use crate::io::workspace::Workspace;
use crate::looping::{LoopOutcome, run_loop};
use crate::step::TaskRunner;

/// Canonical on-disk layout under a project root.
///
/// Everything the pipeline persists lives below `.conductor/`; the project
/// tree itself is only touched through the workspace.
#[derive(Debug, Clone)]
pub struct ConductorPaths {
    pub root: PathBuf,
    pub conductor_dir: PathBuf,
    pub seed_path: PathBuf,
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub tasks_path: PathBuf,
    pub reflections_dir: PathBuf,
}

impl ConductorPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let conductor_dir = root.join(".conductor");
        let state_dir = conductor_dir.join("state");
        Self {
            seed_path: conductor_dir.join("seed.json"),
            config_path: state_dir.join("config.toml"),
            tasks_path: state_dir.join("tasks.json"),
            reflections_dir: conductor_dir.join("reflections"),
            root,
            conductor_dir,
            state_dir,
        }
    }
}

/// Seed the task queue from `.conductor/seed.json`.
///
/// The seed is either a JSON array of task definitions or an object with a
/// `tasks` array. Refuses to overwrite an existing snapshot. Returns the
/// number of seeded tasks.
#[instrument(skip_all, fields(root = %paths.root.display()))]
pub fn init(paths: &ConductorPaths) -> Result<usize> {
    if paths.tasks_path.exists() {
        return Err(anyhow!(
            "state already exists at {}; delete it to reinitialize",
            paths.tasks_path.display()
        ));
    }
    let config = load_config(&paths.config_path)?;
    let tasks = load_seed(&paths.seed_path, &config)?;
    validate_seed(&tasks)?;

    if !paths.config_path.exists() {
        write_config(&paths.config_path, &config)?;
    }
    let snapshot = StateSnapshot {
        version: crate::io::state_store::STATE_VERSION,
        tasks,
    };
    write_snapshot(&paths.tasks_path, &snapshot)?;
    info!(count = snapshot.tasks.len(), "task queue seeded");
    Ok(snapshot.tasks.len())
}

fn load_seed(path: &Path, config: &ConductorConfig) -> Result<Vec<Task>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read seed {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse seed {}", path.display()))?;
    let tasks_value = match value {
        Value::Array(_) => value,
        Value::Object(mut map) => map
            .remove("tasks")
            .ok_or_else(|| anyhow!("seed object in {} has no tasks array", path.display()))?,
        _ => return Err(anyhow!("seed {} is neither an array nor an object", path.display())),
    };
    let mut tasks: Vec<Task> = serde_json::from_value(tasks_value)
        .with_context(|| format!("deserialize seed tasks from {}", path.display()))?;
    for task in &mut tasks {
        task.status = TaskStatus::Pending;
        task.created_by = CreatedBy::Initial;
        task.max_retries = config.max_retries_default;
    }
    Ok(tasks)
}

fn validate_seed(tasks: &[Task]) -> Result<()> {
    if tasks.is_empty() {
        return Err(anyhow!("seed contains no tasks"));
    }
    let mut seen = HashSet::new();
    for task in tasks {
        if task.id.trim().is_empty() {
            return Err(anyhow!("seed task with empty id (title: {:?})", task.title));
        }
        if !seen.insert(task.id.as_str()) {
            return Err(anyhow!("duplicate task id in seed: {}", task.id));
        }
    }
    validate_no_cycles(tasks).map_err(|err| anyhow!("invalid seed: {err}"))?;
    let known: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    for task in tasks {
        for dep in &task.dependencies {
            if !known.contains(dep.as_str()) {
                // Legal; the planner will be asked to define it at run time.
                warn!(task_id = %task.id, missing = %dep, "seed references an undefined task");
            }
        }
    }
    Ok(())
}

/// Rebuild the run context from the snapshot on disk.
///
/// Tasks that were `in-progress` when the previous process died go back to
/// `pending`; their cached analysis survives, so little work is repeated.
pub fn load_run(paths: &ConductorPaths, options: RunOptions) -> Result<RunContext> {
    let snapshot = load_snapshot(&paths.tasks_path)?;
    let mut ctx = RunContext::new(options);
    for mut task in snapshot.tasks {
        if task.status == TaskStatus::InProgress {
            info!(task_id = %task.id, "interrupted task requeued");
            task.status = TaskStatus::Pending;
        }
        if task.created_by == CreatedBy::Planner {
            ctx.dynamic_tasks_created += 1;
        }
        match task.status {
            TaskStatus::Done | TaskStatus::Skipped => {
                ctx.completed.insert(task.id.clone(), task);
            }
            _ => ctx.queue.push(task),
        }
    }
    Ok(ctx)
}

/// Flip every failed task back to pending with a fresh retry budget.
/// Returns how many tasks were reset.
#[instrument(skip_all)]
pub fn reset_failed(paths: &ConductorPaths) -> Result<usize> {
    let mut snapshot = load_snapshot(&paths.tasks_path)?;
    let mut reset = 0;
    for task in &mut snapshot.tasks {
        if task.status == TaskStatus::Failed {
            task.status = TaskStatus::Pending;
            task.retry_count = 0;
            task.error = None;
            reset += 1;
        }
    }
    if reset > 0 {
        write_snapshot(&paths.tasks_path, &snapshot)?;
    }
    info!(reset, "failed tasks reset");
    Ok(reset)
}

/// Per-status counts straight from the snapshot.
pub fn status(paths: &ConductorPaths) -> Result<StatusCounts> {
    let snapshot = load_snapshot(&paths.tasks_path)?;
    let mut counts = StatusCounts::default();
    for task in &snapshot.tasks {
        match task.status {
            TaskStatus::Pending => counts.pending += 1,
            TaskStatus::InProgress => counts.in_progress += 1,
            TaskStatus::Blocked => counts.blocked += 1,
            TaskStatus::Done => counts.done += 1,
            TaskStatus::Failed => counts.failed += 1,
            TaskStatus::Skipped => counts.skipped += 1,
        }
    }
    Ok(counts)
}

/// Wire the real collaborators together and drive the queue.
///
/// Without `resume` a snapshot showing earlier progress is refused, so a
/// half-finished run is never restarted by accident.
#[instrument(skip_all, fields(root = %paths.root.display()))]
pub fn run(paths: &ConductorPaths, options: RunOptions, resume: bool) -> Result<LoopOutcome> {
    let config = load_config(&paths.config_path)?;
    let ctx_options = apply_config_defaults(options, &config);
    let mut ctx = load_run(paths, ctx_options)?;
    if !resume
        && ctx
            .all_tasks()
            .any(|t| t.status != TaskStatus::Pending || t.retry_count > 0)
    {
        return Err(anyhow!(
            "snapshot shows a run in progress; pass --resume to continue it"
        ));
    }

    let workspace = Workspace::new(&paths.root);
    let tools = WorkspaceTools::new(workspace.clone());
    let git = Git::new(&paths.root, Duration::from_secs(config.git_timeout_secs));
    let mut model = CommandModelClient::new(
        config.model_command.clone(),
        Duration::from_secs(config.model_timeout_secs),
        config.model_output_limit_bytes,
    );
    // A dry run never blocks on the operator.
    let mut interactive = StdinApproval;
    let mut non_interactive = NoApproval;
    let approval: &mut dyn ApprovalChannel = if ctx.options.dry_run {
        &mut non_interactive
    } else {
        &mut interactive
    };

    let mut runner = TaskRunner {
        model: &mut model,
        tools: &tools,
        vcs: &git,
        workspace: &workspace,
        config: &config,
        state_path: &paths.tasks_path,
        reflections_dir: &paths.reflections_dir,
        supervise: true,
    };
    run_loop(&mut runner, &mut ctx, approval)
}

/// CLI flags win over config; zero-valued flags fall back to the config.
fn apply_config_defaults(mut options: RunOptions, config: &ConductorConfig) -> RunOptions {
    if options.budget_limit == crate::core::context::DEFAULT_BUDGET_LIMIT {
        options.budget_limit = config.budget_limit;
    }
    if options.max_dynamic_tasks == crate::core::context::DEFAULT_MAX_DYNAMIC_TASKS {
        options.max_dynamic_tasks = config.max_dynamic_tasks;
    }
    options
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_paths(seed: &str) -> (tempfile::TempDir, ConductorPaths) {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ConductorPaths::new(temp.path());
        fs::create_dir_all(&paths.conductor_dir).expect("conductor dir");
        fs::write(&paths.seed_path, seed).expect("seed");
        (temp, paths)
    }

    #[test]
    fn init_seeds_and_refuses_to_reseed() {
        let (_temp, paths) = seeded_paths(
            r#"[{"id": "T0", "title": "First", "description": "d"},
                {"id": "T1", "title": "Second", "description": "d", "dependencies": ["T0"]}]"#,
        );
        let count = init(&paths).expect("init");
        assert_eq!(count, 2);
        assert!(paths.tasks_path.exists());
        assert!(paths.config_path.exists());

        let err = init(&paths).expect_err("reseed");
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn init_accepts_wrapped_seed_object() {
        let (_temp, paths) =
            seeded_paths(r#"{"tasks": [{"id": "T0", "title": "t", "description": "d"}]}"#);
        assert_eq!(init(&paths).expect("init"), 1);
    }

    #[test]
    fn init_rejects_duplicate_ids_and_cycles() {
        let (_temp, paths) = seeded_paths(
            r#"[{"id": "T0", "title": "a", "description": "d"},
                {"id": "T0", "title": "b", "description": "d"}]"#,
        );
        assert!(init(&paths).expect_err("dup").to_string().contains("duplicate"));

        let (_temp2, paths2) = seeded_paths(
            r#"[{"id": "A", "title": "a", "description": "d", "dependencies": ["B"]},
                {"id": "B", "title": "b", "description": "d", "dependencies": ["A"]}]"#,
        );
        assert!(init(&paths2).expect_err("cycle").to_string().contains("cyclic"));
    }

    #[test]
    fn load_run_requeues_interrupted_tasks() {
        let (_temp, paths) = seeded_paths(
            r#"[{"id": "T0", "title": "a", "description": "d"},
                {"id": "T1", "title": "b", "description": "d"}]"#,
        );
        init(&paths).expect("init");
        let mut snapshot = load_snapshot(&paths.tasks_path).expect("load");
        snapshot.tasks[0].status = TaskStatus::Done;
        snapshot.tasks[1].status = TaskStatus::InProgress;
        snapshot.tasks[1].analysis_cache = Some("cached".to_string());
        write_snapshot(&paths.tasks_path, &snapshot).expect("write");

        let ctx = load_run(&paths, RunOptions::default()).expect("run context");
        assert!(ctx.completed.contains_key("T0"));
        assert_eq!(ctx.queue.len(), 1);
        assert_eq!(ctx.queue[0].status, TaskStatus::Pending);
        assert_eq!(ctx.queue[0].analysis_cache.as_deref(), Some("cached"));
    }

    #[test]
    fn load_run_counts_planner_tasks_against_the_quota() {
        let (_temp, paths) =
            seeded_paths(r#"[{"id": "T0", "title": "a", "description": "d"}]"#);
        init(&paths).expect("init");
        let mut snapshot = load_snapshot(&paths.tasks_path).expect("load");
        let mut dynamic = Task::new("T0-sub-1", "sub", "d");
        dynamic.created_by = CreatedBy::Planner;
        snapshot.tasks.push(dynamic);
        write_snapshot(&paths.tasks_path, &snapshot).expect("write");

        let ctx = load_run(&paths, RunOptions::default()).expect("run context");
        assert_eq!(ctx.dynamic_tasks_created, 1);
    }

    #[test]
    fn reset_failed_requeues_only_failures() {
        let (_temp, paths) = seeded_paths(
            r#"[{"id": "T0", "title": "a", "description": "d"},
                {"id": "T1", "title": "b", "description": "d"}]"#,
        );
        init(&paths).expect("init");
        let mut snapshot = load_snapshot(&paths.tasks_path).expect("load");
        snapshot.tasks[0].status = TaskStatus::Failed;
        snapshot.tasks[0].error = Some("broken".to_string());
        snapshot.tasks[0].retry_count = 7;
        snapshot.tasks[1].status = TaskStatus::Done;
        write_snapshot(&paths.tasks_path, &snapshot).expect("write");

        assert_eq!(reset_failed(&paths).expect("reset"), 1);
        let after = load_snapshot(&paths.tasks_path).expect("load");
        assert_eq!(after.tasks[0].status, TaskStatus::Pending);
        assert_eq!(after.tasks[0].retry_count, 0);
        assert!(after.tasks[0].error.is_none());
        assert_eq!(after.tasks[1].status, TaskStatus::Done);
    }

    #[test]
    fn status_reports_snapshot_counts() {
        let (_temp, paths) = seeded_paths(
            r#"[{"id": "T0", "title": "a", "description": "d"},
                {"id": "T1", "title": "b", "description": "d"}]"#,
        );
        init(&paths).expect("init");
        let counts = status(&paths).expect("status");
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.total(), 2);
    }
}
