//! Supervision agent: decides what to do with a task that keeps failing.

use anyhow::Result;
use minijinja::context;
use serde_json::Value;
use tracing::{instrument, warn};

use crate::agents::{extract_object, prompts};
use crate::core::context::RunContext;
use crate::core::task::Task;
use crate::io::config::ProjectConfig;
use crate::io::model::{Message, ModelClient, ModelRequest};

/// Minimum length for a halt reason to count as verifiable evidence.
const MIN_HALT_REASON_CHARS: usize = 30;

const UNVERIFIABLE_HALT_REASON: &str = "the halt reason given was too short to verify, so the \
default policy is to keep retrying; the next halt must cite concrete blocking evidence";
const UNVERIFIABLE_HALT_HINT: &str = "address the most recent review issues one by one, \
naming for each issue the file changed and the change made";
const UNPARSEABLE_REASON: &str = "the supervision output could not be parsed and no repair \
path could be confirmed; an operator must check the decision format and the blocking \
evidence before resuming this task";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorAction {
    Continue,
    Halt,
}

/// Decision consumed once to mutate a task, then discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorDecision {
    pub action: SupervisorAction,
    pub reason: String,
    pub hint: String,
    /// Extra retry budget when continuing. Always at least 1.
    pub extra_retries: u32,
    pub plan_summary: String,
    pub must_change_files: Vec<String>,
    pub execution_checklist: Vec<String>,
    pub validation_steps: Vec<String>,
    pub unknowns: Vec<String>,
}

impl SupervisorDecision {
    fn halt(reason: impl Into<String>) -> Self {
        Self {
            action: SupervisorAction::Halt,
            reason: reason.into(),
            hint: String::new(),
            extra_retries: 1,
            plan_summary: String::new(),
            must_change_files: Vec::new(),
            execution_checklist: Vec::new(),
            validation_steps: Vec::new(),
            unknowns: Vec::new(),
        }
    }

    /// Flatten the plan fields into one text block stored on the task.
    pub fn rendered_plan(&self) -> Option<String> {
        if self.plan_summary.is_empty()
            && self.must_change_files.is_empty()
            && self.execution_checklist.is_empty()
            && self.validation_steps.is_empty()
            && self.unknowns.is_empty()
        {
            return None;
        }
        let mut out = String::new();
        if !self.plan_summary.is_empty() {
            out.push_str(&format!("Plan: {}\n", self.plan_summary));
        }
        push_section(&mut out, "Must change files", &self.must_change_files);
        push_section(&mut out, "Checklist", &self.execution_checklist);
        push_section(&mut out, "Validation", &self.validation_steps);
        push_section(&mut out, "Unknowns", &self.unknowns);
        Some(out.trim_end().to_string())
    }
}

fn push_section(out: &mut String, label: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    out.push_str(&format!("{label}:\n"));
    for item in items {
        out.push_str(&format!("- {item}\n"));
    }
}

#[derive(Default)]
pub struct Supervisor;

impl Supervisor {
    /// Consult the supervisor with the task's full failure history.
    #[instrument(skip_all, fields(task_id = %task.id, retries = task.retry_count))]
    pub fn run(
        &self,
        model: &mut dyn ModelClient,
        task: &Task,
        ctx: &RunContext,
        project: &ProjectConfig,
    ) -> Result<SupervisorDecision> {
        let system = prompts::render(
            "supervisor",
            context! {
                project_name => project.name,
                project_description => project.description,
            },
        )?;
        let user = build_user_message(task, ctx);
        let response = model.call(&ModelRequest {
            system,
            messages: vec![Message::user_text(user)],
            tools: vec![],
        })?;
        Ok(parse_decision(&response.content))
    }
}

fn build_user_message(task: &Task, ctx: &RunContext) -> String {
    let issues = task
        .review_result
        .as_ref()
        .filter(|r| !r.issues.is_empty())
        .map(|r| {
            r.issues
                .iter()
                .map(|i| format!("- {i}"))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_else(|| "no recorded issues".to_string());
    let suggestions = task
        .review_result
        .as_ref()
        .filter(|r| !r.suggestions.is_empty())
        .map(|r| {
            r.suggestions
                .iter()
                .map(|s| format!("- {s}"))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_else(|| "none".to_string());
    let completed = if ctx.completed.is_empty() {
        "none".to_string()
    } else {
        ctx.completed
            .values()
            .map(|t| format!("- [{}] {}", t.id, t.title))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "## Task\n\n\
         **ID**: {}\n\
         **Title**: {}\n\
         **Description**: {}\n\
         **Category**: {}\n\n\
         ## History\n\n\
         - retried {} times (budget {}), still failing review\n\
         - previous supervision hint: {}\n\n\
         ## Latest review issues\n\n{}\n\n\
         ## Review suggestions\n\n{}\n\n\
         ## Completed dependencies\n\n{}\n\n\
         Output the JSON decision.",
        task.id,
        task.title,
        task.description,
        task.category,
        task.retry_count,
        task.max_retries,
        task.supervisor_hint.as_deref().unwrap_or("none"),
        issues,
        suggestions,
        completed,
    )
}

/// Parse the decision with guardrails against careless halts.
///
/// Unknown actions become `halt`. A halt whose reason is too short to verify
/// is downgraded to `continue` with a canned hint. Output with no JSON at
/// all becomes a canned halt.
pub fn parse_decision(content: &str) -> SupervisorDecision {
    let Some(data) = extract_object(content) else {
        warn!("supervision output had no parseable decision, halting");
        return SupervisorDecision::halt(UNPARSEABLE_REASON);
    };

    let mut action = match data
        .get("action")
        .and_then(Value::as_str)
        .map(|a| a.trim().to_ascii_lowercase())
        .as_deref()
    {
        Some("continue") => SupervisorAction::Continue,
        _ => SupervisorAction::Halt,
    };
    let mut reason = str_field(&data, "reason");
    let mut hint = str_field(&data, "hint");
    let mut extra_retries = data
        .get("extra_retries")
        .and_then(Value::as_u64)
        .unwrap_or(3)
        .max(1) as u32;

    if action == SupervisorAction::Halt && reason.chars().count() < MIN_HALT_REASON_CHARS {
        warn!("halt reason too short to verify, continuing instead");
        action = SupervisorAction::Continue;
        reason = UNVERIFIABLE_HALT_REASON.to_string();
        if hint.is_empty() {
            hint = UNVERIFIABLE_HALT_HINT.to_string();
        }
        extra_retries = extra_retries.max(2);
    }

    SupervisorDecision {
        action,
        reason,
        hint,
        extra_retries,
        plan_summary: str_field(&data, "plan_summary"),
        must_change_files: list_field(&data, "must_change_files"),
        execution_checklist: list_field(&data, "execution_checklist"),
        validation_steps: list_field(&data, "validation_steps"),
        unknowns: list_field(&data, "unknowns"),
    }
}

fn str_field(data: &Value, key: &str) -> String {
    data.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn list_field(data: &Value, key: &str) -> Vec<String> {
    data.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
