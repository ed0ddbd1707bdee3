//! Pipeline configuration stored under `.conductor/state/config.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::context::{DEFAULT_BUDGET_LIMIT, DEFAULT_MAX_DYNAMIC_TASKS};
use crate::core::task::DEFAULT_MAX_RETRIES;
use crate::governor::{DEFAULT_HARD_CAP, DEFAULT_SOFT_LIMIT, Governor};

/// Pipeline configuration (TOML).
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to sensible values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConductorConfig {
    /// Command spawned per model call (request JSON on stdin, response JSON
    /// on stdout), e.g. `["agent-backend", "--json"]`.
    pub model_command: Vec<String>,

    /// Wall-clock budget for one model call in seconds.
    pub model_timeout_secs: u64,

    /// Truncate model stdout/stderr beyond this many bytes.
    pub model_output_limit_bytes: usize,

    /// Commit after each passing review.
    pub git_auto_commit: bool,

    /// Wall-clock budget for each git subprocess in seconds.
    pub git_timeout_secs: u64,

    /// Retry budget assigned to newly created tasks.
    pub max_retries_default: u32,

    /// Hard cap on tool-loop iterations per agent call.
    pub tool_hard_cap: u32,

    /// Tool-loop iteration at which the model must justify continuing.
    pub tool_soft_limit: u32,

    /// Token ceiling for one run. 0 disables the check.
    pub budget_limit: u64,

    /// Cap on dynamically generated tasks per run.
    pub max_dynamic_tasks: u32,

    pub project: ProjectConfig,
}

/// Human-authored description of the project under change, rendered into
/// every agent prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProjectConfig {
    pub name: String,
    pub description: String,
    pub coding_conventions: String,
    pub review_checklist: Vec<String>,
    pub task_categories: Vec<String>,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            model_command: vec!["agent-backend".to_string()],
            model_timeout_secs: 180,
            model_output_limit_bytes: 1_000_000,
            git_auto_commit: true,
            git_timeout_secs: 30,
            max_retries_default: DEFAULT_MAX_RETRIES,
            tool_hard_cap: DEFAULT_HARD_CAP,
            tool_soft_limit: DEFAULT_SOFT_LIMIT,
            budget_limit: DEFAULT_BUDGET_LIMIT,
            max_dynamic_tasks: DEFAULT_MAX_DYNAMIC_TASKS,
            project: ProjectConfig::default(),
        }
    }
}

impl ConductorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.model_command.is_empty() || self.model_command[0].trim().is_empty() {
            return Err(anyhow!("model_command must be a non-empty array"));
        }
        if self.model_timeout_secs == 0 {
            return Err(anyhow!("model_timeout_secs must be > 0"));
        }
        if self.git_timeout_secs == 0 {
            return Err(anyhow!("git_timeout_secs must be > 0"));
        }
        if self.model_output_limit_bytes == 0 {
            return Err(anyhow!("model_output_limit_bytes must be > 0"));
        }
        if self.max_retries_default == 0 {
            return Err(anyhow!("max_retries_default must be > 0"));
        }
        if self.tool_hard_cap == 0 {
            return Err(anyhow!("tool_hard_cap must be > 0"));
        }
        Ok(())
    }

    /// Tool-loop limits for agent calls.
    pub fn governor(&self) -> Governor {
        Governor {
            hard_cap: self.tool_hard_cap,
            soft_limit: self.tool_soft_limit,
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ConductorConfig::default()`.
pub fn load_config(path: &Path) -> Result<ConductorConfig> {
    if !path.exists() {
        let cfg = ConductorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ConductorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ConductorConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
