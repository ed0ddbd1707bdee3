//! Planning agent: defines tasks for dependency ids that do not exist.

use anyhow::Result;
use minijinja::context;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::agents::{extract_array, prompts};
use crate::core::task::{CreatedBy, Task};
use crate::io::config::ProjectConfig;
use crate::io::model::{Message, ModelClient, ModelRequest};

#[derive(Default)]
pub struct Planner;

impl Planner {
    /// Ask the model to define the missing tasks. `limit` is the remaining
    /// dynamic-task quota; anything past it is dropped. Unparseable output
    /// yields an empty list, leaving the dependent task blocked.
    #[instrument(skip_all, fields(missing = missing_ids.len(), limit))]
    pub fn generate_missing(
        &self,
        model: &mut dyn ModelClient,
        missing_ids: &[String],
        existing_ids: &[String],
        limit: usize,
        project: &ProjectConfig,
    ) -> Result<Vec<Task>> {
        if missing_ids.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let system = prompts::render(
            "planner",
            context! {
                project_name => project.name,
                project_description => project.description,
                task_categories => project.task_categories,
            },
        )?;
        let user = format!(
            "These dependency ids are referenced but missing from the queue. \
             Define them.\n\n\
             Missing ids: {}\n\n\
             Existing ids: {}\n\n\
             Output the JSON array of task definitions.",
            serde_json::to_string(missing_ids)?,
            serde_json::to_string(existing_ids)?,
        );

        let response = model.call(&ModelRequest {
            system,
            messages: vec![Message::user_text(user)],
            tools: vec![],
        })?;
        let tasks = parse_generated_tasks(&response.content, limit);
        debug!(generated = tasks.len(), "dynamic tasks generated");
        Ok(tasks)
    }
}

/// Parse generated task definitions, capped at `limit`.
///
/// Entries without an id are skipped; a completely garbled reply yields an
/// empty list rather than an error.
pub fn parse_generated_tasks(content: &str, limit: usize) -> Vec<Task> {
    let Some(Value::Array(items)) = extract_array(content) else {
        warn!("planner output had no parseable task array");
        return Vec::new();
    };
    items
        .iter()
        .filter_map(task_from_value)
        .take(limit)
        .collect()
}

fn task_from_value(item: &Value) -> Option<Task> {
    let id = item.get("id")?.as_str()?.trim();
    if id.is_empty() {
        return None;
    }
    let mut task = Task::new(
        id,
        item.get("title").and_then(Value::as_str).unwrap_or(id),
        item.get("description").and_then(Value::as_str).unwrap_or(""),
    );
    task.dependencies = item
        .get("dependencies")
        .and_then(Value::as_array)
        .map(|deps| {
            deps.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    task.priority = item.get("priority").and_then(Value::as_i64).unwrap_or(0);
    task.phase = item.get("phase").and_then(Value::as_i64).unwrap_or(0);
    task.category = item
        .get("category")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    task.created_by = CreatedBy::Planner;
    Some(task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::TaskStatus;

    #[test]
    fn parses_tasks_and_caps_at_limit() {
        let content = r#"Here you go:
[{"id": "A", "title": "Task A", "description": "a", "priority": 1},
 {"id": "B", "title": "Task B", "dependencies": ["A"]},
 {"id": "C", "title": "Task C"}]"#;
        let tasks = parse_generated_tasks(content, 2);
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].id, "A");
        assert_eq!(tasks[0].priority, 1);
        assert_eq!(tasks[0].created_by, CreatedBy::Planner);
        assert_eq!(tasks[0].status, TaskStatus::Pending);
        assert_eq!(tasks[1].dependencies, vec!["A".to_string()]);
    }

    #[test]
    fn entries_without_id_are_dropped() {
        let tasks = parse_generated_tasks(r#"[{"title": "no id"}, {"id": "ok"}]"#, 10);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "ok");
    }

    #[test]
    fn garbled_output_yields_no_tasks() {
        assert!(parse_generated_tasks("cannot help", 10).is_empty());
    }
}
