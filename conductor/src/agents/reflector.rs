//! Reflection agent: records lessons after a task reaches a terminal state.
//!
//! Reflection is best-effort throughout. Failures are logged by callers and
//! never change a task's outcome.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use minijinja::context;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::agents::{completed_tasks_block, extract_object, prompts};
use crate::core::context::RunContext;
use crate::core::task::{Task, TaskStatus};
use crate::io::config::ProjectConfig;
use crate::io::model::{Message, ModelClient, ModelRequest};

const SNIPPET_CHARS: usize = 1500;

/// Parsed (or fallback) reflection payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ReflectionReport {
    pub task_id: String,
    pub task_title: String,
    pub raw: Value,
}

#[derive(Default)]
pub struct Reflector;

impl Reflector {
    #[instrument(skip_all, fields(task_id = %task.id))]
    pub fn run(
        &self,
        model: &mut dyn ModelClient,
        task: &Task,
        ctx: &RunContext,
        project: &ProjectConfig,
    ) -> Result<ReflectionReport> {
        let system = prompts::render(
            "reflector",
            context! {
                coding_conventions => project.coding_conventions,
                completed_tasks => completed_tasks_block(&ctx.completed),
            },
        )?;
        let user = build_user_message(task, ctx);
        let response = model.call(&ModelRequest {
            system,
            messages: vec![Message::user_text(user)],
            tools: vec![],
        })?;
        Ok(parse_report(task, &response.content))
    }
}

fn build_user_message(task: &Task, ctx: &RunContext) -> String {
    let outcome = if task.status == TaskStatus::Done {
        "succeeded"
    } else {
        "failed"
    };
    let analysis: String = task
        .analysis_cache
        .as_deref()
        .unwrap_or("none")
        .chars()
        .take(SNIPPET_CHARS)
        .collect();
    let coder: String = task
        .coder_output_summary
        .as_deref()
        .unwrap_or("none")
        .chars()
        .take(SNIPPET_CHARS)
        .collect();
    let review = task
        .review_result
        .as_ref()
        .and_then(|r| serde_json::to_string_pretty(r).ok())
        .unwrap_or_else(|| "none".to_string());

    format!(
        "## Reflect on this task execution\n\n\
         **ID**: {}\n\
         **Title**: {}\n\
         **Outcome**: {}\n\
         **Retries**: {}\n\n\
         ### Analysis (snippet)\n```\n{}\n```\n\n\
         ### Coder output (snippet)\n```\n{}\n```\n\n\
         ### Review result\n```json\n{}\n```\n\n\
         ### Error\n{}\n\n\
         ### Run context\n\
         - completed tasks: {}\n\
         - tokens used: {}\n\n\
         Output the JSON reflection report.",
        task.id,
        task.title,
        outcome,
        task.retry_count,
        analysis,
        coder,
        review,
        task.error.as_deref().unwrap_or("none"),
        ctx.completed.len(),
        ctx.tokens_used,
    )
}

fn parse_report(task: &Task, content: &str) -> ReflectionReport {
    let raw = extract_object(content).unwrap_or_else(|| fallback_payload(task));
    ReflectionReport {
        task_id: task.id.clone(),
        task_title: task.title.clone(),
        raw,
    }
}

fn fallback_payload(task: &Task) -> Value {
    json!({
        "execution_summary": {
            "analysis_quality": "unknown",
            "coding_quality": "unknown",
            "review_quality": "unknown",
            "retry_count": task.retry_count,
            "passed_review": task.status == TaskStatus::Done,
        },
        "lessons_learned": ["reflection output could not be parsed"],
        "improvement_suggestions": {},
        "best_practices": [],
        "risk_warnings": [],
    })
}

/// Persist a report under the reflections directory.
///
/// Files are named `{unix_secs}_{task_id}.json` so a directory listing sorts
/// chronologically.
pub fn save_reflection(dir: &Path, report: &ReflectionReport) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock before epoch")?
        .as_secs();
    let safe_id: String = report
        .task_id
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    let path = dir.join(format!("{secs}_{safe_id}.json"));

    let mut payload = report.raw.clone();
    if let Value::Object(map) = &mut payload {
        map.entry("task_id".to_string())
            .or_insert_with(|| Value::String(report.task_id.clone()));
        map.entry("task_title".to_string())
            .or_insert_with(|| Value::String(report.task_title.clone()));
    }
    let mut buf = serde_json::to_string_pretty(&payload)?;
    buf.push('\n');
    fs::write(&path, buf).with_context(|| format!("write reflection {}", path.display()))?;
    debug!(path = %path.display(), "reflection saved");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_falls_back_on_garbled_output() {
        let task = Task::new("T1", "t", "d");
        let report = parse_report(&task, "nothing useful");
        assert_eq!(report.task_id, "T1");
        assert_eq!(
            report.raw["lessons_learned"][0],
            "reflection output could not be parsed"
        );
    }

    #[test]
    fn save_writes_task_metadata() {
        let temp = tempfile::tempdir().expect("tempdir");
        let report = ReflectionReport {
            task_id: "T1".to_string(),
            task_title: "Title".to_string(),
            raw: json!({"lessons_learned": ["keep changes small"]}),
        };
        let path = save_reflection(temp.path(), &report).expect("save");
        let written: Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(written["task_id"], "T1");
        assert_eq!(written["lessons_learned"][0], "keep changes small");
    }
}
