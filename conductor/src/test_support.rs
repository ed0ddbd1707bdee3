//! Test-only doubles and builders for exercising the pipeline without a
//! model backend, a git repository or an operator.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use anyhow::{Result, anyhow};
use serde_json::{Value, json};

use crate::core::task::{Task, TaskStatus};
use crate::io::approval::ApprovalChannel;
use crate::io::git::VersionControl;
use crate::io::model::{ModelClient, ModelRequest, ModelResponse, ToolDefinition, Usage};
use crate::io::tools::ToolExecutor;

/// Create a deterministic pending task with default fields.
pub fn task(id: &str, deps: &[&str]) -> Task {
    let mut t = Task::new(id, format!("{id} title"), format!("{id} description"));
    t.dependencies = deps.iter().map(|d| (*d).to_string()).collect();
    t
}

/// Create a task already in `done` state.
pub fn done_task(id: &str) -> Task {
    let mut t = task(id, &[]);
    t.status = TaskStatus::Done;
    t
}

/// Model client that replays a fixed list of responses.
///
/// Every request is recorded for assertions. Running out of scripted
/// responses is an error, which makes missing expectations loud.
pub struct ScriptedModelClient {
    responses: VecDeque<ModelResponse>,
    requests: Vec<ModelRequest>,
    usage: Usage,
}

impl ScriptedModelClient {
    pub fn new(responses: Vec<ModelResponse>) -> Self {
        Self {
            responses: responses.into(),
            requests: Vec::new(),
            usage: Usage::default(),
        }
    }

    /// Convenience: script plain text replies.
    pub fn from_texts(texts: &[&str]) -> Self {
        Self::new(
            texts
                .iter()
                .map(|t| ModelResponse {
                    content: (*t).to_string(),
                    ..ModelResponse::default()
                })
                .collect(),
        )
    }

    pub fn calls_seen(&self) -> usize {
        self.requests.len()
    }

    pub fn requests(&self) -> &[ModelRequest] {
        &self.requests
    }

    pub fn remaining(&self) -> usize {
        self.responses.len()
    }
}

impl ModelClient for ScriptedModelClient {
    fn call(&mut self, request: &ModelRequest) -> Result<ModelResponse> {
        self.requests.push(request.clone());
        let response = self
            .responses
            .pop_front()
            .ok_or_else(|| anyhow!("scripted model ran out of responses"))?;
        self.usage.total_input += response.input_tokens;
        self.usage.total_output += response.output_tokens;
        self.usage.calls += 1;
        Ok(response)
    }

    fn usage(&self) -> Usage {
        self.usage
    }
}

/// Tool executor with a single `echo` tool. Never fails.
pub struct EchoTools;

impl ToolExecutor for EchoTools {
    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: "echo".to_string(),
            description: "Echo the input text back.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            }),
        }]
    }

    fn execute(&self, name: &str, input: &Value) -> String {
        match name {
            "echo" => input
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
            other => format!("unknown tool: {other}"),
        }
    }
}

/// Version control double that records commits instead of running git.
#[derive(Debug, Default)]
pub struct ScriptedVcs {
    has_changes: Cell<bool>,
    fail_commits: Cell<bool>,
    commits: RefCell<Vec<String>>,
    reverts: Cell<u32>,
}

impl ScriptedVcs {
    pub fn with_changes() -> Self {
        let vcs = Self::default();
        vcs.has_changes.set(true);
        vcs
    }

    pub fn fail_commits(&self) {
        self.fail_commits.set(true);
    }

    pub fn commit_messages(&self) -> Vec<String> {
        self.commits.borrow().clone()
    }

    pub fn revert_count(&self) -> u32 {
        self.reverts.get()
    }
}

impl VersionControl for ScriptedVcs {
    fn has_changes(&self) -> Result<bool> {
        Ok(self.has_changes.get())
    }

    fn commit(&self, message: &str) -> Result<String> {
        if self.fail_commits.get() {
            return Err(anyhow!("scripted commit failure"));
        }
        let mut commits = self.commits.borrow_mut();
        commits.push(message.to_string());
        Ok(format!("hash{}", commits.len()))
    }

    fn revert_workspace(&self) -> Result<()> {
        self.reverts.set(self.reverts.get() + 1);
        Ok(())
    }
}

/// Approval channel that replays a fixed list of hints.
///
/// Once the script is exhausted it answers "stop" (no hint).
#[derive(Debug, Default)]
pub struct ScriptedApproval {
    hints: VecDeque<Option<String>>,
    prompts_seen: u32,
}

impl ScriptedApproval {
    pub fn new(hints: Vec<Option<String>>) -> Self {
        Self {
            hints: hints.into(),
            prompts_seen: 0,
        }
    }

    pub fn prompts_seen(&self) -> u32 {
        self.prompts_seen
    }
}

impl ApprovalChannel for ScriptedApproval {
    fn request_hint(&mut self, _task: &Task) -> Result<Option<String>> {
        self.prompts_seen += 1;
        Ok(self.hints.pop_front().unwrap_or(None))
    }
}
