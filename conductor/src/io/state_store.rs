//! Task snapshot storage with schema validation and atomic writes.
//!
//! The snapshot is the single durability point of the pipeline: it is written
//! after every task transition so a crash at any moment leaves a consistent
//! file behind. Writes go through a temp file and rename.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::core::context::RunContext;
use crate::core::task::Task;

/// Current snapshot format version.
pub const STATE_VERSION: u32 = 1;

const STATE_SCHEMA: &str = include_str!("../../schemas/task_state.schema.json");

/// Persisted snapshot (`.conductor/state/tasks.json`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateSnapshot {
    pub version: u32,
    pub tasks: Vec<Task>,
}

impl StateSnapshot {
    /// Capture the full task set of a run, queue first, completed after.
    pub fn capture(ctx: &RunContext) -> Self {
        let mut tasks = ctx.queue.clone();
        tasks.extend(ctx.completed.values().cloned());
        Self {
            version: STATE_VERSION,
            tasks,
        }
    }
}

/// Load and validate a snapshot from disk (schema, then version).
pub fn load_snapshot(path: &Path) -> Result<StateSnapshot> {
    debug!(path = %path.display(), "loading snapshot");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read snapshot {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse snapshot {}", path.display()))?;
    validate_schema(&value)?;
    let snapshot: StateSnapshot = serde_json::from_value(value)
        .with_context(|| format!("deserialize snapshot {}", path.display()))?;
    if snapshot.version != STATE_VERSION {
        return Err(anyhow!(
            "unsupported snapshot version {} (expected {})",
            snapshot.version,
            STATE_VERSION
        ));
    }
    debug!(task_count = snapshot.tasks.len(), "snapshot loaded");
    Ok(snapshot)
}

/// Atomically write a snapshot to disk (temp file + rename).
pub fn write_snapshot(path: &Path, snapshot: &StateSnapshot) -> Result<()> {
    debug!(path = %path.display(), task_count = snapshot.tasks.len(), "writing snapshot");
    let mut buf = serde_json::to_string_pretty(snapshot)?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn validate_schema(snapshot: &Value) -> Result<()> {
    let schema_value: Value =
        serde_json::from_str(STATE_SCHEMA).context("parse embedded snapshot schema")?;
    let compiled =
        validator_for(&schema_value).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(snapshot) {
        let messages = compiled
            .iter_errors(snapshot)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "snapshot schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("snapshot path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp snapshot {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace snapshot {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::{ReviewResult, TaskStatus};

    #[test]
    fn snapshot_round_trips_exactly() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tasks.json");

        let mut task = Task::new("T1", "Title", "Desc");
        task.status = TaskStatus::Done;
        task.retry_count = 2;
        task.review_result = Some(ReviewResult::fail(vec!["broken".to_string()]));
        task.commit_hash = Some("abc123".to_string());
        task.supervisor_must_change_files = vec!["core/a.ts".to_string()];
        let snapshot = StateSnapshot {
            version: STATE_VERSION,
            tasks: vec![task],
        };

        write_snapshot(&path, &snapshot).expect("write");
        let loaded = load_snapshot(&path).expect("load");
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn rejects_unknown_status() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tasks.json");
        fs::write(
            &path,
            r#"{"version":1,"tasks":[{"id":"T1","title":"t","description":"d","status":"exploded"}]}"#,
        )
        .expect("write");
        assert!(load_snapshot(&path).is_err());
    }

    #[test]
    fn rejects_future_version() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tasks.json");
        fs::write(&path, r#"{"version":2,"tasks":[]}"#).expect("write");
        let err = load_snapshot(&path).expect_err("version mismatch");
        assert!(err.to_string().contains("unsupported snapshot version"));
    }

    #[test]
    fn capture_spans_queue_and_completed() {
        let mut ctx = RunContext::default();
        ctx.queue.push(Task::new("A", "a", "a"));
        let mut done = Task::new("B", "b", "b");
        done.status = TaskStatus::Done;
        ctx.completed.insert("B".to_string(), done);

        let snapshot = StateSnapshot::capture(&ctx);
        let ids: Vec<&str> = snapshot.tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
    }
}
