//! The scheduler loop: pick ready tasks, run them, resolve stuck queues,
//! stop on ceilings or an operator pause.

use anyhow::{Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::agents::planner::Planner;
use crate::core::context::{RunContext, StatusCounts};
use crate::core::graph::{
    DependencyStatus, check_dependencies, known_ids, next_pending, validate_no_cycles,
};
use crate::core::task::{Task, TaskStatus};
use crate::io::approval::ApprovalChannel;
use crate::step::{TaskRunner, persist, run_single_task};

/// Why the loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStop {
    /// Nothing left to run.
    Complete,
    /// Token ceiling reached.
    BudgetExhausted,
    /// Model-call ceiling reached.
    CallLimitReached,
    /// Operator declined to resume a failed or blocked task.
    Paused,
    /// Open tasks remain but none can make progress.
    Stalled,
}

/// Final report of one scheduler run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub stop: LoopStop,
    pub counts: StatusCounts,
    pub tokens_used: u64,
    pub calls_made: u64,
}

/// Drive the queue until it completes, hits a ceiling, stalls or the
/// operator pauses the run.
#[instrument(skip_all)]
pub fn run_loop(
    runner: &mut TaskRunner<'_>,
    ctx: &mut RunContext,
    approval: &mut dyn ApprovalChannel,
) -> Result<LoopOutcome> {
    loop {
        // Usage is pulled from the client once per iteration; ceilings are
        // checked before starting work, never mid-task.
        let usage = runner.model.usage();
        ctx.tokens_used = usage.total_tokens();
        ctx.calls_made = usage.calls;
        if ctx.options.budget_limit > 0 && ctx.tokens_used >= ctx.options.budget_limit {
            warn!(tokens = ctx.tokens_used, limit = ctx.options.budget_limit, "token budget spent");
            return Ok(finish(LoopStop::BudgetExhausted, ctx));
        }
        if ctx.options.call_limit > 0 && ctx.calls_made >= ctx.options.call_limit {
            warn!(calls = ctx.calls_made, limit = ctx.options.call_limit, "call limit reached");
            return Ok(finish(LoopStop::CallLimitReached, ctx));
        }

        if let Some(index) = select(ctx) {
            let status = run_single_task(runner, ctx, index)?;
            if matches!(status, TaskStatus::Failed | TaskStatus::Blocked)
                && !consult_operator(runner, ctx, approval, index)?
            {
                return Ok(finish(LoopStop::Paused, ctx));
            }
            continue;
        }

        // A restricted run is over once its target is no longer open; the
        // deliberately-untouched rest of the queue does not count.
        let open = match &ctx.options.only_task {
            Some(id) => ctx.queue.iter().any(|t| t.id == *id && t.is_open()),
            None => ctx.has_open_tasks(),
        };
        if !open {
            return Ok(finish(LoopStop::Complete, ctx));
        }

        if resolve_missing(runner, ctx)? {
            continue;
        }

        if let Some(index) = ctx.queue.iter().position(|t| {
            matches!(t.status, TaskStatus::Failed | TaskStatus::Blocked)
                && ctx
                    .options
                    .only_task
                    .as_deref()
                    .is_none_or(|id| t.id == id)
        }) {
            if consult_operator(runner, ctx, approval, index)? {
                continue;
            }
            return Ok(finish(LoopStop::Paused, ctx));
        }

        // Pending tasks remain but nothing is ready, resolvable or pausable.
        warn!("queue can make no further progress");
        return Ok(finish(LoopStop::Stalled, ctx));
    }
}

fn finish(stop: LoopStop, ctx: &RunContext) -> LoopOutcome {
    let counts = ctx.status_counts();
    info!(
        stop = ?stop,
        %counts,
        tokens = ctx.tokens_used,
        calls = ctx.calls_made,
        "run finished"
    );
    LoopOutcome {
        stop,
        counts,
        tokens_used: ctx.tokens_used,
        calls_made: ctx.calls_made,
    }
}

/// Pick the next queue index to run, honoring a single-task restriction.
fn select(ctx: &RunContext) -> Option<usize> {
    match &ctx.options.only_task {
        None => next_pending(&ctx.queue, &ctx.completed),
        Some(id) => {
            let index = ctx.queue.iter().position(|t| t.id == *id)?;
            if ctx.queue[index].status != TaskStatus::Pending {
                return None;
            }
            let ids = known_ids(&ctx.queue, &ctx.completed);
            (check_dependencies(&ctx.queue[index], &ctx.completed, &ids)
                == DependencyStatus::Ready)
                .then_some(index)
        }
    }
}

/// Ask the operator about a failed or blocked task.
///
/// A hint requeues the task with a fresh retry budget; no hint means the
/// operator wants the run paused. Returns whether the run continues.
fn consult_operator(
    runner: &TaskRunner<'_>,
    ctx: &mut RunContext,
    approval: &mut dyn ApprovalChannel,
    index: usize,
) -> Result<bool> {
    let Some(hint) = approval.request_hint(&ctx.queue[index])? else {
        info!(task_id = %ctx.queue[index].id, "no operator guidance, pausing the run");
        return Ok(false);
    };
    let task = &mut ctx.queue[index];
    info!(task_id = %task.id, "operator requeued the task");
    task.status = TaskStatus::Pending;
    task.retry_count = 0;
    task.error = None;
    if !hint.is_empty() {
        task.supervisor_hint = Some(hint);
    }
    persist(runner.state_path, ctx)?;
    Ok(true)
}

/// Resolve pending tasks whose dependencies reference unknown ids.
///
/// The planner defines the missing tasks within the dynamic-task quota; ids
/// it cannot or may not define fail their dependents instead. Returns
/// whether anything changed.
fn resolve_missing(runner: &mut TaskRunner<'_>, ctx: &mut RunContext) -> Result<bool> {
    let ids = known_ids(&ctx.queue, &ctx.completed);
    let mut missing: Vec<String> = Vec::new();
    for task in ctx.queue.iter().filter(|t| t.status == TaskStatus::Pending) {
        for dep in &task.dependencies {
            if !ids.contains(dep) && !missing.contains(dep) {
                missing.push(dep.clone());
            }
        }
    }
    if missing.is_empty() {
        return Ok(false);
    }

    let mut changed = false;
    let remaining =
        ctx.options.max_dynamic_tasks.saturating_sub(ctx.dynamic_tasks_created) as usize;
    if remaining > 0 && !ctx.options.dry_run {
        let mut existing: Vec<String> = ids.iter().cloned().collect();
        existing.sort();
        let mut generated = Planner::default().generate_missing(
            runner.model,
            &missing,
            &existing,
            remaining,
            &runner.config.project,
        )?;
        generated.retain(|t| !ids.contains(&t.id));
        for task in &mut generated {
            task.max_retries = runner.config.max_retries_default;
        }
        if !generated.is_empty() {
            let mut trial: Vec<Task> = ctx.all_tasks().cloned().collect();
            trial.extend(generated.iter().cloned());
            validate_no_cycles(&trial)
                .map_err(|err| anyhow!("generated tasks are unusable: {err}"))?;
            info!(count = generated.len(), "planner defined missing dependencies");
            ctx.dynamic_tasks_created += generated.len() as u32;
            ctx.queue.extend(generated);
            changed = true;
        }
    } else {
        debug!(missing = missing.len(), "dynamic task quota spent, not planning");
    }

    // Whatever is still unknown parks its dependents; retrying the planner
    // on the same ids would loop forever. An operator can still requeue.
    let ids = known_ids(&ctx.queue, &ctx.completed);
    for task in &mut ctx.queue {
        if task.status != TaskStatus::Pending {
            continue;
        }
        if let Some(dep) = task.dependencies.iter().find(|d| !ids.contains(*d)) {
            warn!(task_id = %task.id, missing = %dep, "dependency could not be defined");
            task.status = TaskStatus::Blocked;
            task.error = Some(format!(
                "depends on unknown task {dep} and no definition could be generated"
            ));
            changed = true;
        }
    }
    if changed {
        persist(runner.state_path, ctx)?;
    }
    Ok(changed)
}
