//! Executor contract and the workspace-backed reference implementation
//!
//! The router hands permitted actions to a virtual store as `next_action`
//! facts. The store dispatches to a concrete tool and returns its textual
//! output. Invocations are made under the route's timeout, so long-running
//! tools are unwound when the deadline passes.

use crate::error::{PraxisError, Result};
use crate::fact::{Fact, Term};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Synchronous tool dispatch surface.
#[async_trait]
pub trait VirtualStore: Send + Sync {
    /// Dispatch `action` (a `next_action` fact) and return the tool output.
    async fn route_action(&self, action: &Fact) -> Result<String>;
}

/// Minimal filesystem-backed store serving the default filesystem bindings
/// under a workspace root.
pub struct WorkspaceStore {
    root: PathBuf,
}

impl WorkspaceStore {
    /// Create a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The workspace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, target: &str) -> Result<PathBuf> {
        let relative = Path::new(target);
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(PraxisError::Tool(format!(
                "target escapes the workspace: {}",
                target
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl VirtualStore for WorkspaceStore {
    async fn route_action(&self, action: &Fact) -> Result<String> {
        let verb = action
            .arg(0)
            .and_then(Term::as_str)
            .ok_or_else(|| PraxisError::Tool("action fact has no verb".to_string()))?;
        let target = action.arg(1).and_then(Term::as_str).unwrap_or_default();
        let payload = action.arg(2).and_then(Term::as_map);

        match verb.trim_start_matches('/') {
            "read_file" => {
                let path = self.resolve(target)?;
                let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
                    PraxisError::Tool(format!("read_file {}: {}", path.display(), e))
                })?;
                Ok(content)
            }
            "write_file" => {
                let path = self.resolve(target)?;
                let content = payload
                    .and_then(|p| p.get("content"))
                    .and_then(Term::as_str)
                    .unwrap_or_default();
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await.map_err(|e| {
                        PraxisError::Tool(format!("write_file {}: {}", path.display(), e))
                    })?;
                }
                tokio::fs::write(&path, content).await.map_err(|e| {
                    PraxisError::Tool(format!("write_file {}: {}", path.display(), e))
                })?;
                Ok(format!("wrote {} bytes to {}", content.len(), target))
            }
            "list_dir" => {
                let path = if target.is_empty() {
                    self.root.clone()
                } else {
                    self.resolve(target)?
                };
                let mut entries = tokio::fs::read_dir(&path).await.map_err(|e| {
                    PraxisError::Tool(format!("list_dir {}: {}", path.display(), e))
                })?;
                let mut names = Vec::new();
                while let Some(entry) = entries.next_entry().await.map_err(|e| {
                    PraxisError::Tool(format!("list_dir {}: {}", path.display(), e))
                })? {
                    names.push(entry.file_name().to_string_lossy().into_owned());
                }
                names.sort();
                Ok(names.join("\n"))
            }
            other => Err(PraxisError::Tool(format!(
                "unsupported action: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn next_action(verb: &str, target: &str, payload: Vec<(String, Term)>) -> Fact {
        Fact::new(
            crate::fact::predicates::NEXT_ACTION,
            vec![
                Term::atom(verb),
                Term::str(target),
                Term::map(payload),
            ],
        )
    }

    #[tokio::test]
    async fn test_read_file() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        std::fs::write(dir.path().join("hello.txt"), "hello\n").expect("write");

        let store = WorkspaceStore::new(dir.path());
        let output = store
            .route_action(&next_action("read_file", "hello.txt", vec![]))
            .await
            .expect("read failed");
        assert_eq!(output, "hello\n");
    }

    #[tokio::test]
    async fn test_write_then_list() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let store = WorkspaceStore::new(dir.path());

        store
            .route_action(&next_action(
                "write_file",
                "notes/a.txt",
                vec![("content".to_string(), Term::str("data"))],
            ))
            .await
            .expect("write failed");

        let listing = store
            .route_action(&next_action("list_dir", "notes", vec![]))
            .await
            .expect("list failed");
        assert_eq!(listing, "a.txt");
    }

    #[tokio::test]
    async fn test_rejects_escaping_target() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let store = WorkspaceStore::new(dir.path());

        let err = store
            .route_action(&next_action("read_file", "../outside.txt", vec![]))
            .await
            .expect_err("must refuse");
        assert!(err.to_string().contains("escapes"));
    }

    #[tokio::test]
    async fn test_unsupported_action() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let store = WorkspaceStore::new(dir.path());

        let err = store
            .route_action(&next_action("teleport", "", vec![]))
            .await
            .expect_err("must refuse");
        assert!(err.to_string().contains("unsupported"));
    }
}
