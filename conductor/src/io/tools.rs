//! Workspace tools exposed to agents through the tool loop.
//!
//! Tool failures never abort a model call: every failure is encoded as a
//! descriptive string so the model can react to it in the next turn.

use anyhow::Result;
use regex::RegexBuilder;
use serde_json::{Value, json};
use tracing::debug;

use crate::io::model::ToolDefinition;
use crate::io::workspace::Workspace;

const SEARCH_MAX_MATCHES: usize = 50;
const LIST_MAX_ENTRIES: usize = 200;

/// Executes tool calls on behalf of the model.
pub trait ToolExecutor {
    /// Tools this executor understands, in wire form.
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Run one tool call. Failures come back as descriptive strings.
    fn execute(&self, name: &str, input: &Value) -> String;
}

/// Read/write/search tools over the project workspace.
#[derive(Debug, Clone)]
pub struct WorkspaceTools {
    workspace: Workspace,
}

impl WorkspaceTools {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }

    fn read_file(&self, input: &Value) -> String {
        let Some(path) = str_arg(input, "path") else {
            return "read_file: missing required argument 'path'".to_string();
        };
        match self.workspace.read(path) {
            Ok(content) => content,
            Err(err) => format!("read_file failed: {err:#}"),
        }
    }

    fn write_file(&self, input: &Value) -> String {
        let Some(path) = str_arg(input, "path") else {
            return "write_file: missing required argument 'path'".to_string();
        };
        let Some(content) = str_arg(input, "content") else {
            return "write_file: missing required argument 'content'".to_string();
        };
        match self.workspace.write(path, content) {
            Ok(()) => format!("wrote {path} ({} bytes)", content.len()),
            Err(err) => format!("write_file failed: {err:#}"),
        }
    }

    fn list_directory(&self, input: &Value) -> String {
        let path = str_arg(input, "path").unwrap_or(".");
        match self.list_entries(path) {
            Ok(entries) if entries.is_empty() => format!("{path}: empty directory"),
            Ok(entries) => entries.join("\n"),
            Err(err) => format!("list_directory failed: {err:#}"),
        }
    }

    fn list_entries(&self, rel_path: &str) -> Result<Vec<String>> {
        let dir = self.workspace.resolve(rel_path)?;
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let kind = if entry.file_type()?.is_dir() { "dir" } else { "file" };
            entries.push(format!("{kind} {}", entry.file_name().to_string_lossy()));
            if entries.len() >= LIST_MAX_ENTRIES {
                entries.push("... (listing truncated)".to_string());
                break;
            }
        }
        entries.sort();
        Ok(entries)
    }

    fn search_text(&self, input: &Value) -> String {
        let Some(path) = str_arg(input, "path") else {
            return "search_text: missing required argument 'path'".to_string();
        };
        let Some(pattern) = str_arg(input, "pattern") else {
            return "search_text: missing required argument 'pattern'".to_string();
        };
        let regex = match RegexBuilder::new(pattern).case_insensitive(true).build() {
            Ok(r) => r,
            Err(err) => return format!("search_text: invalid pattern: {err}"),
        };
        let content = match self.workspace.read(path) {
            Ok(c) => c,
            Err(err) => return format!("search_text failed: {err:#}"),
        };
        let mut matches = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            if regex.is_match(line) {
                matches.push(format!("{}: {}", idx + 1, line.trim_end()));
                if matches.len() >= SEARCH_MAX_MATCHES {
                    break;
                }
            }
        }
        if matches.is_empty() {
            format!("no matches for '{pattern}' in {path}")
        } else {
            matches.join("\n")
        }
    }
}

fn str_arg<'a>(input: &'a Value, key: &str) -> Option<&'a str> {
    input.get(key).and_then(Value::as_str)
}

impl ToolExecutor for WorkspaceTools {
    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: "read_file".to_string(),
                description: "Read a file relative to the project root.".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string"}
                    },
                    "required": ["path"]
                }),
            },
            ToolDefinition {
                name: "write_file".to_string(),
                description: "Write a file relative to the project root, creating directories as needed.".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string"},
                        "content": {"type": "string"}
                    },
                    "required": ["path", "content"]
                }),
            },
            ToolDefinition {
                name: "list_directory".to_string(),
                description: "List entries of a directory relative to the project root.".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string", "default": "."}
                    }
                }),
            },
            ToolDefinition {
                name: "search_text".to_string(),
                description: "Search a file for a case-insensitive regex, returning matching lines with line numbers.".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string"},
                        "pattern": {"type": "string"}
                    },
                    "required": ["path", "pattern"]
                }),
            },
        ]
    }

    fn execute(&self, name: &str, input: &Value) -> String {
        debug!(tool = name, "executing tool call");
        match name {
            "read_file" => self.read_file(input),
            "write_file" => self.write_file(input),
            "list_directory" => self.list_directory(input),
            "search_text" => self.search_text(input),
            other => format!("unknown tool: {other}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tools() -> (tempfile::TempDir, WorkspaceTools) {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::new(temp.path());
        (temp, WorkspaceTools::new(ws))
    }

    #[test]
    fn read_missing_file_reports_instead_of_failing() {
        let (_temp, tools) = tools();
        let out = tools.execute("read_file", &json!({"path": "nope.txt"}));
        assert!(out.starts_with("read_file failed:"));
    }

    #[test]
    fn write_then_read_round_trips() {
        let (_temp, tools) = tools();
        tools.execute("write_file", &json!({"path": "a/b.txt", "content": "data"}));
        let out = tools.execute("read_file", &json!({"path": "a/b.txt"}));
        assert_eq!(out, "data");
    }

    #[test]
    fn paths_outside_the_root_report_instead_of_escaping() {
        let (_temp, tools) = tools();
        let out = tools.execute(
            "write_file",
            &json!({"path": "../evil.txt", "content": "x"}),
        );
        assert!(out.starts_with("write_file failed:"));
        assert!(out.contains("escapes the workspace root"));

        let out = tools.execute("read_file", &json!({"path": "/etc/hostname"}));
        assert!(out.starts_with("read_file failed:"));
    }

    #[test]
    fn search_reports_line_numbers() {
        let (_temp, tools) = tools();
        tools.execute(
            "write_file",
            &json!({"path": "x.txt", "content": "alpha\nBETA\ngamma"}),
        );
        let out = tools.execute("search_text", &json!({"path": "x.txt", "pattern": "beta"}));
        assert_eq!(out, "2: BETA");
    }

    #[test]
    fn unknown_tool_is_a_string_result() {
        let (_temp, tools) = tools();
        let out = tools.execute("explode", &json!({}));
        assert_eq!(out, "unknown tool: explode");
    }
}
