//! Filesystem access rooted at the project under change.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, warn};

use crate::core::changes::{ChangeSet, FileAction};

/// Project tree the pipeline is allowed to touch.
///
/// All paths are interpreted relative to the root; agents never see absolute
/// paths except through normalization.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a model-supplied path against the root.
    ///
    /// Absolute paths and any `..` component are rejected, so everything the
    /// pipeline reads or writes stays under the root.
    pub fn resolve(&self, rel_path: &str) -> Result<PathBuf> {
        let rel = Path::new(rel_path);
        for component in rel.components() {
            match component {
                Component::ParentDir => {
                    return Err(anyhow!("path {rel_path} escapes the workspace root"));
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(anyhow!(
                        "absolute path {rel_path} is outside the workspace root"
                    ));
                }
                Component::Normal(_) | Component::CurDir => {}
            }
        }
        Ok(self.root.join(rel))
    }

    pub fn exists(&self, rel_path: &str) -> bool {
        self.resolve(rel_path).is_ok_and(|p| p.exists())
    }

    pub fn read(&self, rel_path: &str) -> Result<String> {
        let path = self.resolve(rel_path)?;
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }

    /// Write a file, creating intermediate directories.
    pub fn write(&self, rel_path: &str, content: &str) -> Result<()> {
        let path = self.resolve(rel_path)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&path, content).with_context(|| format!("write {}", path.display()))
    }

    /// Remove a file. Missing files are not an error.
    pub fn delete(&self, rel_path: &str) -> Result<()> {
        let path = self.resolve(rel_path)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("delete {}", path.display())),
        }
    }

    /// Apply a change set to the tree. Returns the number of entries applied.
    ///
    /// Entries with no content (other than deletes) are skipped: the coder
    /// already wrote those through its own tool loop, this path is only a
    /// safety net.
    pub fn apply(&self, changes: &ChangeSet) -> Result<usize> {
        let mut applied = 0;
        for change in &changes.files {
            match change.action {
                FileAction::Delete => {
                    self.delete(&change.path)?;
                    applied += 1;
                }
                FileAction::Create | FileAction::Modify => {
                    let Some(content) = &change.content else {
                        warn!(path = %change.path, "change entry without content, skipping");
                        continue;
                    };
                    self.write(&change.path, content)?;
                    applied += 1;
                }
            }
        }
        debug!(applied, total = changes.files.len(), "change set applied");
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::changes::FileChange;

    fn workspace() -> (tempfile::TempDir, Workspace) {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::new(temp.path());
        (temp, ws)
    }

    #[test]
    fn write_creates_intermediate_directories() {
        let (_temp, ws) = workspace();
        ws.write("deep/nested/a.txt", "hi").expect("write");
        assert_eq!(ws.read("deep/nested/a.txt").expect("read"), "hi");
    }

    #[test]
    fn delete_missing_is_not_an_error() {
        let (_temp, ws) = workspace();
        ws.delete("never-existed.txt").expect("delete");
    }

    #[test]
    fn apply_skips_entries_without_content() {
        let (_temp, ws) = workspace();
        let changes = ChangeSet {
            files: vec![
                FileChange {
                    path: "a.txt".to_string(),
                    content: Some("a".to_string()),
                    action: FileAction::Create,
                },
                FileChange {
                    path: "b.txt".to_string(),
                    content: None,
                    action: FileAction::Modify,
                },
            ],
        };
        let applied = ws.apply(&changes).expect("apply");
        assert_eq!(applied, 1);
        assert!(ws.exists("a.txt"));
        assert!(!ws.exists("b.txt"));
    }

    #[test]
    fn parent_components_are_rejected() {
        let (_temp, ws) = workspace();
        let err = ws.write("../outside.txt", "x").expect_err("escape");
        assert!(err.to_string().contains("escapes the workspace root"));
        assert!(!ws.exists("../outside.txt"));
        assert!(ws.read("a/../../b.txt").is_err());
    }

    #[test]
    fn absolute_paths_are_rejected() {
        let (_temp, ws) = workspace();
        let err = ws.read("/etc/hostname").expect_err("absolute");
        assert!(err.to_string().contains("outside the workspace root"));
        assert!(!ws.exists("/etc"));
    }

    #[test]
    fn apply_refuses_changes_outside_the_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::new(temp.path().join("project"));
        std::fs::create_dir_all(ws.root()).expect("project dir");
        let changes = ChangeSet {
            files: vec![FileChange {
                path: "../outside.txt".to_string(),
                content: Some("x".to_string()),
                action: FileAction::Create,
            }],
        };
        assert!(ws.apply(&changes).is_err());
        assert!(!temp.path().join("outside.txt").exists());
    }

    #[test]
    fn apply_deletes_files() {
        let (_temp, ws) = workspace();
        ws.write("gone.txt", "x").expect("write");
        let changes = ChangeSet {
            files: vec![FileChange {
                path: "gone.txt".to_string(),
                content: None,
                action: FileAction::Delete,
            }],
        };
        ws.apply(&changes).expect("apply");
        assert!(!ws.exists("gone.txt"));
    }
}
