//! Review agent: judges a change set against the task.

use anyhow::Result;
use minijinja::context;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::agents::{extract_object, prompts};
use crate::core::changes::ChangeSet;
use crate::core::task::{ReviewResult, Task};
use crate::governor::Governor;
use crate::io::config::ProjectConfig;
use crate::io::model::{Message, ModelClient};
use crate::io::tools::ToolExecutor;

const CONTENT_SNIPPET_CHARS: usize = 2000;

pub struct Reviewer {
    governor: Governor,
}

impl Default for Reviewer {
    fn default() -> Self {
        Self {
            governor: Governor::default(),
        }
    }
}

impl Reviewer {
    pub fn with_governor(governor: Governor) -> Self {
        Self { governor }
    }

    /// Review one attempt. Unparseable reviewer output is a failed review,
    /// never an error; the retry loop owns the consequences.
    #[instrument(skip_all, fields(task_id = %task.id))]
    pub fn run(
        &self,
        model: &mut dyn ModelClient,
        tools: &dyn ToolExecutor,
        task: &Task,
        project: &ProjectConfig,
        changes: &ChangeSet,
    ) -> Result<ReviewResult> {
        let system = prompts::render(
            "reviewer",
            context! {
                project_name => project.name,
                project_description => project.description,
                coding_conventions => project.coding_conventions,
                review_checklist => project.review_checklist,
            },
        )?;

        let mut summary = String::new();
        for file in &changes.files {
            let snippet: String = file
                .content
                .as_deref()
                .unwrap_or("(written through the tool loop, read it from disk)")
                .chars()
                .take(CONTENT_SNIPPET_CHARS)
                .collect();
            summary.push_str(&format!(
                "\n### {} ({:?})\n```\n{}\n```\n",
                file.path, file.action, snippet
            ));
        }
        let user = format!(
            "## Review task\n\n\
             **ID**: {}\n\
             **Title**: {}\n\
             **Description**: {}\n\n\
             ## Changes\n{}\n\n\
             Check the changes on disk with the tools where the snippet is \
             insufficient, then output the JSON review result.",
            task.id, task.title, task.description, summary,
        );

        let response = self
            .governor
            .run(model, tools, &system, vec![Message::user_text(user)])?;
        let result = parse_review(&response.content);
        debug!(passed = result.passed, issues = result.issues.len(), "review finished");
        Ok(result)
    }
}

/// Parse the reviewer's JSON reply, failing the review when it is garbled.
pub fn parse_review(content: &str) -> ReviewResult {
    let Some(data) = extract_object(content) else {
        return ReviewResult::fail(vec!["review output could not be parsed".to_string()]);
    };
    ReviewResult {
        passed: data.get("passed").and_then(Value::as_bool).unwrap_or(false),
        issues: string_list(&data, "issues"),
        suggestions: string_list(&data, "suggestions"),
        context_for_coder: data
            .get("context_for_coder")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    }
}

fn string_list(data: &Value, key: &str) -> Vec<String> {
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
