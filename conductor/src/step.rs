//! One task through the pipeline: analysis, decomposition, the retry loop
//! with review and escalation, commit and reflection.
//!
//! Every status transition is persisted before the next side effect, so a
//! crash at any point leaves a snapshot the next run can resume from.

use std::collections::HashSet;
use std::path::Path;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::agents::analyst::Analyst;
use crate::agents::coder::Coder;
use crate::agents::reflector::{Reflector, save_reflection};
use crate::agents::reviewer::Reviewer;
use crate::agents::supervisor::{Supervisor, SupervisorAction};
use crate::core::changes::ChangeSet;
use crate::core::context::RunContext;
use crate::core::graph::validate_no_cycles;
use crate::core::paths;
use crate::core::task::{AnalysisReport, CreatedBy, ReviewResult, SubtaskSpec, Task, TaskStatus};
use crate::io::config::ConductorConfig;
use crate::io::git::{VersionControl, commit_message};
use crate::io::model::ModelClient;
use crate::io::state_store::{StateSnapshot, write_snapshot};
use crate::io::tools::ToolExecutor;
use crate::io::workspace::Workspace;

/// Escalate to the supervisor once the retry count exceeds this many
/// failures, regardless of how much retry budget remains.
pub const FUSE_THRESHOLD: u32 = 3;

/// Cache stub written instead of a real analysis during dry runs.
const DRY_RUN_ANALYSIS: &str = r#"{"dry_run": true}"#;

/// Advisory suggestions appended per failed review are capped here.
const MAX_ALIGNMENT_SUGGESTIONS: usize = 5;

/// Collaborators for executing tasks, bundled so the scheduler passes one
/// handle around instead of six.
pub struct TaskRunner<'a> {
    pub model: &'a mut dyn ModelClient,
    pub tools: &'a dyn ToolExecutor,
    pub vcs: &'a dyn VersionControl,
    pub workspace: &'a Workspace,
    pub config: &'a ConductorConfig,
    pub state_path: &'a Path,
    pub reflections_dir: &'a Path,
    /// When false the fuse never trips and exhausted tasks fail directly.
    pub supervise: bool,
}

/// Run the task at `index` to its next resting status.
///
/// Returns the status the task ended the step with: `Done` (moved to the
/// completed map), `Pending` (split into subtasks, requeued), `Blocked`
/// (supervisor halt) or `Failed`. Errors out of the pipeline itself become
/// `Failed` with the error recorded on the task; only snapshot-write
/// failures propagate as `Err`.
#[instrument(skip_all, fields(task_id = %ctx.queue[index].id))]
pub fn run_single_task(
    runner: &mut TaskRunner<'_>,
    ctx: &mut RunContext,
    index: usize,
) -> Result<TaskStatus> {
    let mut task = ctx.queue[index].clone();
    info!(title = %task.title, retry = task.retry_count, "task started");

    task.status = TaskStatus::InProgress;
    checkpoint(runner.state_path, ctx, index, &task)?;

    let status = match execute(runner, ctx, index, &mut task) {
        Ok(status) => status,
        Err(err) => {
            warn!(error = %format!("{err:#}"), "task errored");
            task.error = Some(format!("{err:#}"));
            // Only an error mid-attempt reverts; ordinary review failures
            // keep their files on disk for the next attempt.
            if !ctx.options.dry_run
                && let Err(revert_err) = runner.vcs.revert_workspace()
            {
                warn!(error = %format!("{revert_err:#}"), "revert after error did not succeed");
            }
            TaskStatus::Failed
        }
    };
    task.status = status;

    if matches!(
        status,
        TaskStatus::Done | TaskStatus::Failed | TaskStatus::Blocked
    ) && !ctx.options.dry_run
    {
        reflect(runner, ctx, &task);
    }

    info!(status = status.as_str(), "task finished step");
    ctx.queue[index] = task;
    if status == TaskStatus::Done {
        let done = ctx.queue.remove(index);
        ctx.completed.insert(done.id.clone(), done);
    }
    persist(runner.state_path, ctx)?;
    Ok(status)
}

fn execute(
    runner: &mut TaskRunner<'_>,
    ctx: &mut RunContext,
    index: usize,
    task: &mut Task,
) -> Result<TaskStatus> {
    // Analysis runs once; re-entry after a crash or requeue reuses the cache.
    if task.analysis_cache.is_none() {
        let raw = if ctx.options.dry_run {
            DRY_RUN_ANALYSIS.to_string()
        } else {
            Analyst::with_governor(runner.config.governor()).run(
                runner.model,
                runner.tools,
                task,
                ctx,
                &runner.config.project,
            )?
        };
        task.analysis_cache = Some(raw);
        checkpoint(runner.state_path, ctx, index, task)?;
    }

    let analysis = task.analysis_cache.clone().unwrap_or_default();
    let report = AnalysisReport::from_cache(&analysis).unwrap_or_default();

    // Decomposition happens at most once and never for planner-made tasks.
    if !task.analysis_subtasks_generated && task.created_by != CreatedBy::Planner {
        task.analysis_subtasks_generated = true;
        if !report.subtasks.is_empty()
            && let Some(subtasks) = materialize_subtasks(ctx, task, &report.subtasks, runner.config)
        {
            info!(count = subtasks.len(), "task split into subtasks");
            ctx.dynamic_tasks_created += subtasks.len() as u32;
            ctx.queue.extend(subtasks);
            task.status = TaskStatus::Pending;
            checkpoint(runner.state_path, ctx, index, task)?;
            return Ok(TaskStatus::Pending);
        }
        checkpoint(runner.state_path, ctx, index, task)?;
    }

    if ctx.options.dry_run {
        info!("dry run, marking done without changes");
        task.review_result = Some(ReviewResult::pass());
        task.error = None;
        return Ok(TaskStatus::Done);
    }

    let project_root = runner.workspace.root().to_string_lossy().to_string();
    let mut escalated = false;

    loop {
        let out_of_budget = task.retry_count >= task.max_retries;
        if runner.supervise && !escalated && (out_of_budget || task.retry_count > FUSE_THRESHOLD) {
            escalated = true;
            let decision =
                Supervisor::default().run(runner.model, task, ctx, &runner.config.project)?;
            match decision.action {
                SupervisorAction::Halt => {
                    warn!(reason = %decision.reason, "supervisor halted the task");
                    task.error = Some(decision.reason);
                    return Ok(TaskStatus::Blocked);
                }
                SupervisorAction::Continue => {
                    info!(
                        extra_retries = decision.extra_retries,
                        "supervisor extended the retry budget"
                    );
                    task.max_retries += decision.extra_retries;
                    if !decision.hint.is_empty() {
                        task.supervisor_hint = Some(decision.hint.clone());
                    }
                    task.supervisor_plan = decision.rendered_plan();
                    if !decision.must_change_files.is_empty() {
                        task.supervisor_must_change_files = decision.must_change_files.clone();
                    }
                    checkpoint(runner.state_path, ctx, index, task)?;
                }
            }
        }
        if task.retry_count >= task.max_retries {
            let message = task
                .review_result
                .as_ref()
                .filter(|r| !r.issues.is_empty())
                .map(|r| r.issues.join("\n"))
                .unwrap_or_else(|| {
                    format!("review did not pass after {} attempts", task.retry_count)
                });
            warn!(retries = task.retry_count, "retry budget exhausted, task failed");
            task.error = Some(message);
            return Ok(TaskStatus::Failed);
        }

        let changes = Coder::with_governor(runner.config.governor()).run(
            runner.model,
            runner.tools,
            task,
            ctx,
            &runner.config.project,
            &analysis,
        )?;
        if changes.is_empty() {
            task.retry_count += 1;
            task.review_result = Some(ReviewResult::fail(vec![
                "the coder produced no change set".to_string(),
            ]));
            checkpoint(runner.state_path, ctx, index, task)?;
            continue;
        }
        task.coder_output_summary = Some(changes.summary());
        runner.workspace.apply(&changes)?;

        // Supervisor-required files gate the attempt before any review.
        if let Some(missing) = first_uncovered(&task.supervisor_must_change_files, &changes, &project_root)
        {
            warn!(path = %missing, "required file untouched, attempt rejected");
            task.retry_count += 1;
            task.review_result = Some(ReviewResult::fail(vec![format!(
                "the required file {missing} was not part of the change set; \
                 every attempt on this task must change it"
            )]));
            checkpoint(runner.state_path, ctx, index, task)?;
            continue;
        }

        let mut review = Reviewer::with_governor(runner.config.governor()).run(
            runner.model,
            runner.tools,
            task,
            &runner.config.project,
            &changes,
        )?;
        // Advisory only; a passing review stays passing.
        for path in alignment_gaps(&report, &changes, &project_root, runner.workspace) {
            review.suggestions.push(format!(
                "the analysis expected {path} to change and no attempt has touched it"
            ));
        }
        if review.passed {
            task.review_result = Some(review);
            task.error = None;
            if runner.config.git_auto_commit {
                commit_best_effort(runner.vcs, task);
            }
            return Ok(TaskStatus::Done);
        }

        debug!(issues = review.issues.len(), "review failed, retrying");
        task.review_result = Some(review);
        task.retry_count += 1;
        checkpoint(runner.state_path, ctx, index, task)?;
    }
}

/// Commit the passing attempt. Commit failures are logged, never fatal: the
/// work is already on disk and the review has passed.
fn commit_best_effort(vcs: &dyn VersionControl, task: &mut Task) {
    match vcs.has_changes() {
        Ok(false) => debug!("nothing to commit"),
        Ok(true) => match vcs.commit(&commit_message(&task.id, &task.title)) {
            Ok(hash) => {
                debug!(%hash, "attempt committed");
                task.commit_hash = Some(hash);
            }
            Err(err) => warn!(error = %format!("{err:#}"), "commit did not succeed"),
        },
        Err(err) => warn!(error = %format!("{err:#}"), "worktree status check did not succeed"),
    }
}

/// Build subtasks from the analysis report, capped by the dynamic-task
/// quota. Returns `None` without touching anything when the quota is spent
/// or the split would close a dependency cycle; the parent then runs whole.
fn materialize_subtasks(
    ctx: &RunContext,
    parent: &mut Task,
    specs: &[SubtaskSpec],
    config: &ConductorConfig,
) -> Option<Vec<Task>> {
    let remaining =
        ctx.options.max_dynamic_tasks.saturating_sub(ctx.dynamic_tasks_created) as usize;
    if remaining == 0 {
        warn!("dynamic task quota spent, running the task whole");
        return None;
    }

    let mut ids: HashSet<String> = ctx.all_tasks().map(|t| t.id.clone()).collect();
    let mut subtasks = Vec::new();
    for (n, spec) in specs.iter().take(remaining).enumerate() {
        let mut serial = n + 1;
        let mut id = format!("{}-sub-{serial}", parent.id);
        while ids.contains(&id) {
            serial += 1;
            id = format!("{}-sub-{serial}", parent.id);
        }
        ids.insert(id.clone());

        let mut sub = Task::new(id, &spec.title, &spec.description);
        sub.dependencies = spec.dependencies.clone();
        for dep in &parent.dependencies {
            if !sub.dependencies.contains(dep) {
                sub.dependencies.push(dep.clone());
            }
        }
        sub.category = if spec.category.is_empty() {
            parent.category.clone()
        } else {
            spec.category.clone()
        };
        // One notch less urgent than the parent by default.
        sub.priority = parent.priority + 1;
        sub.phase = parent.phase;
        sub.created_by = CreatedBy::Planner;
        sub.max_retries = config.max_retries_default;
        subtasks.push(sub);
    }

    let mut parent_deps = parent.dependencies.clone();
    parent_deps.extend(subtasks.iter().map(|s| s.id.clone()));

    // Trial validation before anything is mutated.
    let mut trial: Vec<Task> = ctx.all_tasks().cloned().collect();
    for t in &mut trial {
        if t.id == parent.id {
            t.dependencies = parent_deps.clone();
        }
    }
    trial.extend(subtasks.iter().cloned());
    if let Err(err) = validate_no_cycles(&trial) {
        warn!(%err, "splitting would close a dependency cycle, running the task whole");
        return None;
    }

    parent.dependencies = parent_deps;
    Some(subtasks)
}

/// First supervisor-required path not covered by the change set.
fn first_uncovered(
    required: &[String],
    changes: &ChangeSet,
    project_root: &str,
) -> Option<String> {
    let changed: Vec<String> = changes.paths().map(str::to_string).collect();
    required
        .iter()
        .find(|path| !paths::covers(&changed, path, project_root))
        .cloned()
}

/// Paths the analysis expected to change that no attempt has touched and
/// that do not exist on disk either. Advisory only.
fn alignment_gaps(
    report: &AnalysisReport,
    changes: &ChangeSet,
    project_root: &str,
    workspace: &Workspace,
) -> Vec<String> {
    let changed: Vec<String> = changes.paths().map(str::to_string).collect();
    let mut expected: Vec<String> = report.files.iter().map(|f| f.path.clone()).collect();
    for gap in &report.gaps {
        expected.extend(paths::path_like_tokens(gap));
    }

    let mut seen = HashSet::new();
    expected
        .into_iter()
        .filter(|p| seen.insert(paths::normalize(p, project_root)))
        .filter(|p| !paths::covers(&changed, p, project_root))
        .filter(|p| !workspace.exists(&paths::normalize(p, project_root)))
        .take(MAX_ALIGNMENT_SUGGESTIONS)
        .collect()
}

fn reflect(runner: &mut TaskRunner<'_>, ctx: &RunContext, task: &Task) {
    let report = match Reflector::default().run(runner.model, task, ctx, &runner.config.project) {
        Ok(report) => report,
        Err(err) => {
            warn!(error = %format!("{err:#}"), "reflection did not run");
            return;
        }
    };
    if let Err(err) = save_reflection(runner.reflections_dir, &report) {
        warn!(error = %format!("{err:#}"), "reflection not saved");
    }
}

fn checkpoint(state_path: &Path, ctx: &mut RunContext, index: usize, task: &Task) -> Result<()> {
    ctx.queue[index] = task.clone();
    persist(state_path, ctx)
}

/// Write the snapshot for the whole run.
pub fn persist(state_path: &Path, ctx: &RunContext) -> Result<()> {
    write_snapshot(state_path, &StateSnapshot::capture(ctx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::RunOptions;
    use crate::test_support::{ScriptedModelClient, ScriptedVcs, task};
    use crate::io::tools::WorkspaceTools;

    const ANALYSIS_PLAIN: &str = r#"{"summary": "small change", "files": [], "gaps": [], "subtasks": []}"#;
    const REVIEW_PASS: &str = r#"{"passed": true, "issues": [], "suggestions": []}"#;
    const REVIEW_FAIL: &str = r#"{"passed": false, "issues": ["logic is wrong"]}"#;
    const REFLECTION: &str = r#"{"lessons_learned": ["keep changes small"]}"#;

    fn coder_change(path: &str) -> String {
        format!(
            r#"{{"files": [{{"path": "{path}", "content": "fn main() {{}}", "action": "create"}}]}}"#
        )
    }

    struct Fixture {
        _temp: tempfile::TempDir,
        workspace: Workspace,
        config: ConductorConfig,
        state_path: std::path::PathBuf,
        reflections_dir: std::path::PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = tempfile::tempdir().expect("tempdir");
            let workspace = Workspace::new(temp.path().join("project"));
            std::fs::create_dir_all(workspace.root()).expect("project dir");
            let state_path = temp.path().join("state/tasks.json");
            let reflections_dir = temp.path().join("reflections");
            Self {
                _temp: temp,
                workspace,
                config: ConductorConfig::default(),
                state_path,
                reflections_dir,
            }
        }
    }

    fn run(
        fixture: &Fixture,
        model: &mut ScriptedModelClient,
        vcs: &ScriptedVcs,
        ctx: &mut RunContext,
        supervise: bool,
    ) -> TaskStatus {
        let tools = WorkspaceTools::new(fixture.workspace.clone());
        let mut runner = TaskRunner {
            model,
            tools: &tools,
            vcs,
            workspace: &fixture.workspace,
            config: &fixture.config,
            state_path: &fixture.state_path,
            reflections_dir: &fixture.reflections_dir,
            supervise,
        };
        run_single_task(&mut runner, ctx, 0).expect("step")
    }

    #[test]
    fn passing_review_commits_and_completes() {
        let fixture = Fixture::new();
        let mut model = ScriptedModelClient::from_texts(&[
            ANALYSIS_PLAIN,
            &coder_change("src/a.rs"),
            REVIEW_PASS,
            REFLECTION,
        ]);
        let vcs = ScriptedVcs::with_changes();
        let mut ctx = RunContext::default();
        ctx.queue.push(task("T1", &[]));

        let status = run(&fixture, &mut model, &vcs, &mut ctx, true);

        assert_eq!(status, TaskStatus::Done);
        assert!(ctx.queue.is_empty());
        let done = ctx.completed.get("T1").expect("completed");
        assert_eq!(done.status, TaskStatus::Done);
        assert_eq!(done.commit_hash.as_deref(), Some("hash1"));
        assert!(done.error.is_none());
        assert_eq!(vcs.commit_messages(), vec!["agent: T1 - T1 title".to_string()]);
        assert!(fixture.workspace.exists("src/a.rs"));
        assert!(fixture.state_path.exists());
        assert_eq!(model.remaining(), 0);
    }

    #[test]
    fn commit_failure_does_not_fail_the_task() {
        let fixture = Fixture::new();
        let mut model = ScriptedModelClient::from_texts(&[
            ANALYSIS_PLAIN,
            &coder_change("src/a.rs"),
            REVIEW_PASS,
            REFLECTION,
        ]);
        let vcs = ScriptedVcs::with_changes();
        vcs.fail_commits();
        let mut ctx = RunContext::default();
        ctx.queue.push(task("T1", &[]));

        let status = run(&fixture, &mut model, &vcs, &mut ctx, true);

        assert_eq!(status, TaskStatus::Done);
        let done = ctx.completed.get("T1").expect("completed");
        assert!(done.commit_hash.is_none());
        assert!(done.error.is_none());
        assert!(vcs.commit_messages().is_empty());
        assert_eq!(vcs.revert_count(), 0);
    }

    #[test]
    fn clean_worktree_skips_the_commit() {
        let fixture = Fixture::new();
        let mut model = ScriptedModelClient::from_texts(&[
            ANALYSIS_PLAIN,
            &coder_change("src/a.rs"),
            REVIEW_PASS,
            REFLECTION,
        ]);
        let vcs = ScriptedVcs::default();
        let mut ctx = RunContext::default();
        ctx.queue.push(task("T1", &[]));

        let status = run(&fixture, &mut model, &vcs, &mut ctx, true);

        assert_eq!(status, TaskStatus::Done);
        let done = ctx.completed.get("T1").expect("completed");
        assert!(done.commit_hash.is_none());
        assert!(vcs.commit_messages().is_empty());
    }

    #[test]
    fn fuse_escalates_exactly_once_after_fourth_failure() {
        let fixture = Fixture::new();
        let mut texts = vec![ANALYSIS_PLAIN.to_string()];
        for _ in 0..4 {
            texts.push(coder_change("src/a.rs"));
            texts.push(REVIEW_FAIL.to_string());
        }
        texts.push(
            r#"{"action": "continue", "reason": "fixable", "hint": "reread the data model",
                "extra_retries": 2}"#
                .to_string(),
        );
        texts.push(coder_change("src/a.rs"));
        texts.push(REVIEW_PASS.to_string());
        texts.push(REFLECTION.to_string());
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let mut model = ScriptedModelClient::from_texts(&refs);
        let vcs = ScriptedVcs::with_changes();
        let mut ctx = RunContext::default();
        let mut t = task("T1", &[]);
        t.max_retries = 10;
        ctx.queue.push(t);

        let status = run(&fixture, &mut model, &vcs, &mut ctx, true);

        assert_eq!(status, TaskStatus::Done);
        let done = ctx.completed.get("T1").expect("completed");
        assert_eq!(done.retry_count, 4);
        assert_eq!(done.max_retries, 12);
        assert_eq!(done.supervisor_hint.as_deref(), Some("reread the data model"));
        assert_eq!(model.remaining(), 0);
    }

    #[test]
    fn required_file_gate_rejects_without_review() {
        let fixture = Fixture::new();
        let mut model = ScriptedModelClient::from_texts(&[
            ANALYSIS_PLAIN,
            &coder_change("src/other.rs"),
            &coder_change("src/core/critical.rs"),
            REVIEW_PASS,
            REFLECTION,
        ]);
        let vcs = ScriptedVcs::with_changes();
        let mut ctx = RunContext::default();
        let mut t = task("T1", &[]);
        t.supervisor_must_change_files = vec!["src/core/critical.rs".to_string()];
        ctx.queue.push(t);

        let status = run(&fixture, &mut model, &vcs, &mut ctx, true);

        assert_eq!(status, TaskStatus::Done);
        let done = ctx.completed.get("T1").expect("completed");
        // One attempt burned on the gate; the reviewer saw only the second.
        assert_eq!(done.retry_count, 1);
        assert_eq!(model.calls_seen(), 5);
    }

    #[test]
    fn supervisor_halt_blocks_the_task() {
        let fixture = Fixture::new();
        let reason = "the task depends on an external schema that does not exist \
                      in this repository and cannot be generated here";
        let halt = format!(r#"{{"action": "halt", "reason": "{reason}"}}"#);
        let mut model = ScriptedModelClient::from_texts(&[
            ANALYSIS_PLAIN,
            &coder_change("src/a.rs"),
            REVIEW_FAIL,
            &halt,
            REFLECTION,
        ]);
        let vcs = ScriptedVcs::with_changes();
        let mut ctx = RunContext::default();
        let mut t = task("T1", &[]);
        t.max_retries = 1;
        ctx.queue.push(t);

        let status = run(&fixture, &mut model, &vcs, &mut ctx, true);

        assert_eq!(status, TaskStatus::Blocked);
        assert_eq!(ctx.queue[0].status, TaskStatus::Blocked);
        assert_eq!(ctx.queue[0].error.as_deref(), Some(reason));
        assert!(ctx.completed.is_empty());
        // Files stay on disk for whoever picks the task up next.
        assert_eq!(vcs.revert_count(), 0);
    }

    #[test]
    fn exhausted_retries_fail_without_a_supervisor() {
        let fixture = Fixture::new();
        let mut model = ScriptedModelClient::from_texts(&[
            ANALYSIS_PLAIN,
            &coder_change("src/a.rs"),
            REVIEW_FAIL,
            &coder_change("src/a.rs"),
            REVIEW_FAIL,
            REFLECTION,
        ]);
        let vcs = ScriptedVcs::with_changes();
        let mut ctx = RunContext::default();
        let mut t = task("T1", &[]);
        t.max_retries = 2;
        ctx.queue.push(t);

        let status = run(&fixture, &mut model, &vcs, &mut ctx, false);

        assert_eq!(status, TaskStatus::Failed);
        assert_eq!(ctx.queue[0].retry_count, 2);
        // The last review's issues become the recorded error.
        assert_eq!(ctx.queue[0].error.as_deref(), Some("logic is wrong"));
        assert_eq!(vcs.revert_count(), 0);
    }

    #[test]
    fn dry_run_completes_without_model_or_git() {
        let fixture = Fixture::new();
        let mut model = ScriptedModelClient::from_texts(&[]);
        let vcs = ScriptedVcs::with_changes();
        let mut ctx = RunContext::new(RunOptions {
            dry_run: true,
            ..RunOptions::default()
        });
        ctx.queue.push(task("T1", &[]));

        let status = run(&fixture, &mut model, &vcs, &mut ctx, true);

        assert_eq!(status, TaskStatus::Done);
        assert_eq!(model.calls_seen(), 0);
        assert!(vcs.commit_messages().is_empty());
        assert_eq!(vcs.revert_count(), 0);
        let done = ctx.completed.get("T1").expect("completed");
        assert_eq!(done.analysis_cache.as_deref(), Some(DRY_RUN_ANALYSIS));
    }

    #[test]
    fn subtasks_split_and_requeue_the_parent() {
        let fixture = Fixture::new();
        let analysis = r#"{"summary": "too big", "subtasks": [
            {"title": "first half", "description": "do the first half", "category": "feature"},
            {"title": "second half", "description": "do the second half"}]}"#;
        let mut model = ScriptedModelClient::from_texts(&[analysis]);
        let vcs = ScriptedVcs::default();
        let mut ctx = RunContext::default();
        ctx.queue.push(task("T1", &["T0"]));
        ctx.completed
            .insert("T0".to_string(), crate::test_support::done_task("T0"));

        let status = run(&fixture, &mut model, &vcs, &mut ctx, true);

        assert_eq!(status, TaskStatus::Pending);
        assert_eq!(ctx.queue.len(), 3);
        assert_eq!(ctx.dynamic_tasks_created, 2);
        let parent = &ctx.queue[0];
        assert!(parent.analysis_subtasks_generated);
        assert_eq!(
            parent.dependencies,
            vec!["T0".to_string(), "T1-sub-1".to_string(), "T1-sub-2".to_string()]
        );
        let sub = ctx.find_task("T1-sub-1").expect("subtask");
        assert_eq!(sub.created_by, CreatedBy::Planner);
        assert_eq!(sub.title, "first half");
        assert_eq!(sub.priority, 1);
        // Subtasks inherit the parent's dependencies.
        assert_eq!(sub.dependencies, vec!["T0".to_string()]);
    }

    #[test]
    fn subtask_quota_caps_the_split() {
        let fixture = Fixture::new();
        let analysis = r#"{"subtasks": [
            {"title": "a", "description": "a"},
            {"title": "b", "description": "b"},
            {"title": "c", "description": "c"}]}"#;
        let mut model = ScriptedModelClient::from_texts(&[analysis]);
        let vcs = ScriptedVcs::default();
        let mut ctx = RunContext::new(RunOptions {
            max_dynamic_tasks: 1,
            ..RunOptions::default()
        });
        ctx.queue.push(task("T1", &[]));

        let status = run(&fixture, &mut model, &vcs, &mut ctx, true);

        assert_eq!(status, TaskStatus::Pending);
        assert_eq!(ctx.queue.len(), 2);
        assert_eq!(ctx.dynamic_tasks_created, 1);
    }

    #[test]
    fn planner_created_tasks_are_never_split() {
        let fixture = Fixture::new();
        let analysis = r#"{"subtasks": [{"title": "a", "description": "a"}]}"#;
        let mut model = ScriptedModelClient::from_texts(&[
            analysis,
            &coder_change("src/a.rs"),
            REVIEW_PASS,
            REFLECTION,
        ]);
        let vcs = ScriptedVcs::with_changes();
        let mut ctx = RunContext::default();
        let mut t = task("T1", &[]);
        t.created_by = CreatedBy::Planner;
        ctx.queue.push(t);

        let status = run(&fixture, &mut model, &vcs, &mut ctx, true);

        assert_eq!(status, TaskStatus::Done);
        assert!(ctx.queue.is_empty());
        assert_eq!(ctx.dynamic_tasks_created, 0);
    }

    #[test]
    fn pipeline_error_fails_the_task_and_persists() {
        let fixture = Fixture::new();
        // The scripted model is empty, so the analysis call itself errors.
        let mut model = ScriptedModelClient::from_texts(&[]);
        let vcs = ScriptedVcs::default();
        let mut ctx = RunContext::default();
        ctx.queue.push(task("T1", &[]));

        let status = run(&fixture, &mut model, &vcs, &mut ctx, true);

        assert_eq!(status, TaskStatus::Failed);
        assert!(
            ctx.queue[0]
                .error
                .as_deref()
                .expect("error")
                .contains("ran out of responses")
        );
        assert_eq!(vcs.revert_count(), 1);
        assert!(fixture.state_path.exists());
    }
}
