//! Bounded tool-invocation loop shared by all agents.
//!
//! Any agent that lets the model request tool calls runs through this loop.
//! Two limits bound it: a soft checkpoint where the model must justify
//! continuing, and a hard cap that force-terminates runaway loops.

use anyhow::{Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::io::model::{ContentBlock, Message, ModelClient, ModelRequest, ModelResponse};
use crate::io::tools::ToolExecutor;

/// Hard cap on loop iterations.
pub const DEFAULT_HARD_CAP: u32 = 300;
/// Iteration at which the reflection checkpoint fires (once).
pub const DEFAULT_SOFT_LIMIT: u32 = 30;

const REFLECTION_PROMPT: &str = "You have made a large number of tool calls. \
Reply with exactly one line: 'CONTINUE: <short plan>' if more tool work is \
genuinely required, or 'DONE: <short summary>' if you already have everything \
needed to produce your final answer.";

/// Limits for one governed tool loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Governor {
    pub hard_cap: u32,
    pub soft_limit: u32,
}

impl Default for Governor {
    fn default() -> Self {
        Self {
            hard_cap: DEFAULT_HARD_CAP,
            soft_limit: DEFAULT_SOFT_LIMIT,
        }
    }
}

impl Governor {
    /// Drive the model until it stops requesting tools or a limit fires.
    ///
    /// At the soft-limit iteration (first time only) the model is asked,
    /// without tools, for a `CONTINUE:`/`DONE:` verdict. `DONE` terminates
    /// the loop and returns the last real tool-bearing response, not the
    /// verdict text, so callers that parse structured output never see a
    /// plain status line. Reaching the hard cap returns the last response
    /// obtained and logs a forced abort.
    #[instrument(skip_all, fields(hard_cap = self.hard_cap, soft_limit = self.soft_limit))]
    pub fn run<M, T>(
        &self,
        model: &mut M,
        executor: &T,
        system: &str,
        initial_messages: Vec<Message>,
    ) -> Result<ModelResponse>
    where
        M: ModelClient + ?Sized,
        T: ToolExecutor + ?Sized,
    {
        let tool_defs = executor.definitions();
        let mut messages = initial_messages;
        let mut last_tool_bearing: Option<ModelResponse> = None;
        let mut reflected = false;

        for iteration in 1..=self.hard_cap {
            if !reflected && iteration == self.soft_limit {
                reflected = true;
                debug!(iteration, "soft limit reached, asking for a verdict");
                let mut checkpoint = messages.clone();
                checkpoint.push(Message::user_text(REFLECTION_PROMPT));
                let verdict = model.call(&ModelRequest {
                    system: system.to_string(),
                    messages: checkpoint,
                    tools: vec![],
                })?;
                if is_done_verdict(&verdict.content) {
                    info!(iteration, "model declared the tool work done");
                    return Ok(last_tool_bearing.unwrap_or(verdict));
                }
                // Keep the exchange in history so the model remembers the
                // plan it just committed to.
                messages.push(Message::user_text(REFLECTION_PROMPT));
                messages.push(Message::assistant(vec![ContentBlock::Text {
                    text: verdict.content,
                }]));
                continue;
            }

            let response = model.call(&ModelRequest {
                system: system.to_string(),
                messages: messages.clone(),
                tools: tool_defs.clone(),
            })?;
            if !response.has_tool_calls() {
                debug!(iteration, "model stopped requesting tools");
                return Ok(response);
            }

            let mut assistant_blocks = Vec::new();
            if !response.content.is_empty() {
                assistant_blocks.push(ContentBlock::Text {
                    text: response.content.clone(),
                });
            }
            let mut result_blocks = Vec::new();
            for call in &response.tool_calls {
                assistant_blocks.push(ContentBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.input.clone(),
                });
                let result = executor.execute(&call.name, &call.input);
                result_blocks.push(ContentBlock::ToolResult {
                    tool_use_id: call.id.clone(),
                    content: result,
                });
            }
            messages.push(Message::assistant(assistant_blocks));
            messages.push(Message::tool_results(result_blocks));
            last_tool_bearing = Some(response);
        }

        match last_tool_bearing {
            Some(response) => {
                warn!(hard_cap = self.hard_cap, "tool loop hit the hard cap, forced abort");
                Ok(response)
            }
            None => Err(anyhow!(
                "tool loop ended without a model response (hard cap {})",
                self.hard_cap
            )),
        }
    }
}

fn is_done_verdict(content: &str) -> bool {
    content
        .lines()
        .find(|l| !l.trim().is_empty())
        .is_some_and(|l| l.trim().to_ascii_uppercase().starts_with("DONE"))
}
