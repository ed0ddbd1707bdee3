//! Analysis agent: explores the project and produces a structured report.

use anyhow::Result;
use minijinja::context;
use tracing::{debug, instrument};

use crate::agents::{completed_tasks_block, prompts};
use crate::core::context::RunContext;
use crate::core::task::{CreatedBy, Task};
use crate::governor::Governor;
use crate::io::config::ProjectConfig;
use crate::io::model::{Message, ModelClient};
use crate::io::tools::ToolExecutor;

pub struct Analyst {
    governor: Governor,
}

impl Default for Analyst {
    fn default() -> Self {
        Self {
            governor: Governor::default(),
        }
    }
}

impl Analyst {
    pub fn with_governor(governor: Governor) -> Self {
        Self { governor }
    }

    /// Run analysis. Returns the raw report text; callers cache it on the
    /// task and parse it where structure is needed.
    #[instrument(skip_all, fields(task_id = %task.id))]
    pub fn run(
        &self,
        model: &mut dyn ModelClient,
        tools: &dyn ToolExecutor,
        task: &Task,
        ctx: &RunContext,
        project: &ProjectConfig,
    ) -> Result<String> {
        let subtask_policy = if task.created_by == CreatedBy::Planner {
            "This task was generated by the planner and must not be split \
             further. Output an empty subtasks array."
        } else {
            "Propose subtasks only when the task is too large for a single \
             coding pass."
        };
        let system = prompts::render(
            "analyst",
            context! {
                project_name => project.name,
                project_description => project.description,
                coding_conventions => project.coding_conventions,
                completed_tasks => completed_tasks_block(&ctx.completed),
                subtask_policy => subtask_policy,
            },
        )?;
        let user = format!(
            "## Task\n\n\
             **ID**: {}\n\
             **Title**: {}\n\
             **Description**: {}\n\
             **Category**: {}\n\n\
             Investigate the project with the tools, then output the JSON \
             analysis report.",
            task.id, task.title, task.description, task.category,
        );

        let response = self
            .governor
            .run(model, tools, &system, vec![Message::user_text(user)])?;
        debug!(len = response.content.len(), "analysis produced");
        Ok(response.content)
    }
}
