//! Coding agent: turns an analysis report into a change set.

use anyhow::Result;
use minijinja::context;
use tracing::{debug, instrument};

use crate::agents::{completed_tasks_block, prompts};
use crate::core::changes::ChangeSet;
use crate::core::context::RunContext;
use crate::core::task::Task;
use crate::governor::Governor;
use crate::io::config::ProjectConfig;
use crate::io::model::{Message, ModelClient};
use crate::io::tools::ToolExecutor;

pub struct Coder {
    governor: Governor,
}

impl Default for Coder {
    fn default() -> Self {
        Self {
            governor: Governor::default(),
        }
    }
}

impl Coder {
    pub fn with_governor(governor: Governor) -> Self {
        Self { governor }
    }

    /// Produce the change set for one attempt. Malformed output comes back
    /// as an empty set and burns a retry upstream.
    #[instrument(skip_all, fields(task_id = %task.id, retry = task.retry_count))]
    pub fn run(
        &self,
        model: &mut dyn ModelClient,
        tools: &dyn ToolExecutor,
        task: &Task,
        ctx: &RunContext,
        project: &ProjectConfig,
        analysis: &str,
    ) -> Result<ChangeSet> {
        let system = prompts::render(
            "coder",
            context! {
                project_name => project.name,
                project_description => project.description,
                coding_conventions => project.coding_conventions,
                completed_tasks => completed_tasks_block(&ctx.completed),
            },
        )?;
        let user = self.build_user_message(task, analysis);

        let response = self
            .governor
            .run(model, tools, &system, vec![Message::user_text(user)])?;
        let changes = ChangeSet::from_response_text(&response.content);
        debug!(files = changes.files.len(), "change set produced");
        Ok(changes)
    }

    fn build_user_message(&self, task: &Task, analysis: &str) -> String {
        let mut message = format!(
            "## Task\n\n\
             **ID**: {}\n\
             **Title**: {}\n\
             **Description**: {}\n\n\
             ## Analysis report\n\n{}\n",
            task.id, task.title, task.description, analysis,
        );
        if task.retry_count > 0
            && let Some(review) = &task.review_result
        {
            message.push_str("\n## Previous review failure\n\n");
            for issue in &review.issues {
                message.push_str(&format!("- issue: {issue}\n"));
            }
            for suggestion in &review.suggestions {
                message.push_str(&format!("- suggestion: {suggestion}\n"));
            }
            if !review.context_for_coder.is_empty() {
                message.push_str(&format!(
                    "\nVerified context: {}\n",
                    review.context_for_coder
                ));
            }
            message.push_str("Fix these before anything else.\n");
        }
        if let Some(hint) = &task.supervisor_hint {
            message.push_str(&format!("\n## Supervisor hint\n\n{hint}\n"));
        }
        if let Some(plan) = &task.supervisor_plan {
            message.push_str(&format!("\n## Supervisor plan\n\n{plan}\n"));
        }
        if !task.supervisor_must_change_files.is_empty() {
            message.push_str("\n## Files every attempt must change\n\n");
            for path in &task.supervisor_must_change_files {
                message.push_str(&format!("- {path}\n"));
            }
        }
        message.push_str(
            "\n## Output\n\nOutput the JSON change list covering every file \
             this task touches.\n",
        );
        message
    }
}
