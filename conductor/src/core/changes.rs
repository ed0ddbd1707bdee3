//! Change-set model produced by the coder and consumed by the
//! reconciliation gate and the workspace writer.

use serde::{Deserialize, Serialize};

/// What to do with a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    #[default]
    Create,
    Modify,
    Delete,
}

/// One file-level change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileChange {
    pub path: String,
    /// `None` means the coder already wrote the file through its own tool
    /// loop; the workspace writer skips such entries.
    pub content: Option<String>,
    pub action: FileAction,
}

/// Ordered list of file changes for one coding attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeSet {
    pub files: Vec<FileChange>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|f| f.path.as_str())
    }

    /// Extract a change set from raw model output.
    ///
    /// Takes the outermost `{...}` block from the text; anything malformed
    /// yields an empty set, never an error, so an unparseable coder reply is
    /// treated as an empty attempt and burns a retry.
    pub fn from_response_text(text: &str) -> Self {
        let Some(start) = text.find('{') else {
            return Self::default();
        };
        let Some(end) = text.rfind('}') else {
            return Self::default();
        };
        if end < start {
            return Self::default();
        }
        serde_json::from_str(&text[start..=end]).unwrap_or_default()
    }

    /// One-line summary recorded on the task for later inspection.
    pub fn summary(&self) -> String {
        if self.files.is_empty() {
            return "no file changes".to_string();
        }
        let listed: Vec<String> = self
            .files
            .iter()
            .map(|f| {
                let action = match f.action {
                    FileAction::Create => "create",
                    FileAction::Modify => "modify",
                    FileAction::Delete => "delete",
                };
                format!("{action} {}", f.path)
            })
            .collect();
        listed.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_change_set_embedded_in_prose() {
        let text = r#"Here is the change:
{"files":[{"path":"src/a.rs","content":"fn a() {}","action":"create"}]}
Done."#;
        let changes = ChangeSet::from_response_text(text);
        assert_eq!(changes.files.len(), 1);
        assert_eq!(changes.files[0].path, "src/a.rs");
        assert_eq!(changes.files[0].action, FileAction::Create);
    }

    #[test]
    fn malformed_output_yields_empty_set() {
        assert!(ChangeSet::from_response_text("no json here").is_empty());
        assert!(ChangeSet::from_response_text("{not valid json").is_empty());
        assert!(ChangeSet::from_response_text("}{").is_empty());
    }

    #[test]
    fn delete_without_content_parses() {
        let text = r#"{"files":[{"path":"old.rs","action":"delete"}]}"#;
        let changes = ChangeSet::from_response_text(text);
        assert_eq!(changes.files[0].action, FileAction::Delete);
        assert!(changes.files[0].content.is_none());
    }

    #[test]
    fn summary_lists_actions_and_paths() {
        let text = r#"{"files":[{"path":"a.rs","content":"x","action":"create"},{"path":"b.rs","action":"delete"}]}"#;
        let changes = ChangeSet::from_response_text(text);
        assert_eq!(changes.summary(), "create a.rs, delete b.rs");
    }
}
