//! Model client abstraction.
//!
//! The [`ModelClient`] trait decouples agents from the actual inference
//! backend. The production backend spawns a configurable command and speaks
//! JSON over stdin/stdout; tests use scripted clients that return
//! predetermined responses without spawning processes.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::io::process::run_command_with_timeout;

/// Conversation role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One block of a message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
    ToolResult { tool_use_id: String, content: String },
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }

    pub fn tool_results(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content,
        }
    }
}

/// A tool offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// One inference request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRequest {
    pub system: String,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

/// One inference result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelResponse {
    /// Concatenated text blocks.
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub stop_reason: String,
}

impl ModelResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Cumulative usage across all calls made through one client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub total_input: u64,
    pub total_output: u64,
    pub calls: u64,
}

impl Usage {
    pub fn total_tokens(&self) -> u64 {
        self.total_input + self.total_output
    }
}

/// Abstraction over inference backends.
///
/// `call` takes `&mut self` because every backend accumulates usage.
pub trait ModelClient {
    fn call(&mut self, request: &ModelRequest) -> Result<ModelResponse>;

    /// Cumulative usage. The scheduler pulls this once per loop iteration.
    fn usage(&self) -> Usage;
}

/// Attempts per call before a transient backend failure becomes fatal.
const MODEL_CALL_ATTEMPTS: u32 = 3;

/// Backend that spawns a command per call.
///
/// The request is written to the child's stdin as JSON; the child must print
/// a [`ModelResponse`] as JSON on stdout. Timeouts and non-zero exits are
/// treated as transient and retried up to [`MODEL_CALL_ATTEMPTS`] times;
/// unparseable output is not.
pub struct CommandModelClient {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
    usage: Usage,
}

impl CommandModelClient {
    pub fn new(command: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            command,
            timeout,
            output_limit_bytes,
            usage: Usage::default(),
        }
    }
}

impl ModelClient for CommandModelClient {
    #[instrument(skip_all, fields(timeout_secs = self.timeout.as_secs()))]
    fn call(&mut self, request: &ModelRequest) -> Result<ModelResponse> {
        let program = self
            .command
            .first()
            .ok_or_else(|| anyhow!("model command is empty"))?;
        let input = serde_json::to_vec(request).context("serialize model request")?;

        let mut attempt = 0;
        let out = loop {
            attempt += 1;
            let mut cmd = Command::new(program);
            cmd.args(&self.command[1..]);
            let out =
                run_command_with_timeout(cmd, Some(&input), self.timeout, self.output_limit_bytes)
                    .context("run model command")?;

            let failure = if out.timed_out {
                format!("timed out after {:?}", self.timeout)
            } else if !out.status.success() {
                format!(
                    "exit status {:?}: {}",
                    out.status.code(),
                    out.stderr_text().trim()
                )
            } else {
                break out;
            };
            warn!(attempt, %failure, "model command attempt failed");
            if attempt >= MODEL_CALL_ATTEMPTS {
                return Err(anyhow!(
                    "model command failed after {attempt} attempts: {failure}"
                ));
            }
        };

        let response: ModelResponse =
            serde_json::from_slice(&out.stdout).context("parse model response")?;
        self.usage.total_input += response.input_tokens;
        self.usage.total_output += response.output_tokens;
        self.usage.calls += 1;
        debug!(
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            tool_calls = response.tool_calls.len(),
            "model call finished"
        );
        Ok(response)
    }

    fn usage(&self) -> Usage {
        self.usage
    }
}
