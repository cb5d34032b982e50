//! In-memory issue store for tests and dry runs.
//!
//! Mirrors [`FsStore`](super::FsStore) semantics: directories exist once
//! anything is placed at or below them, children come back sorted.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{Document, IssueStore, NodePath};
use crate::error::{Error, Result};
use crate::model::IssueId;

#[derive(Debug, Default)]
struct Node {
    documents: BTreeMap<Document, String>,
}

#[derive(Debug, Default)]
struct Tree {
    nodes: BTreeMap<NodePath, Node>,
    worktrees: BTreeSet<String>,
}

/// Issue store held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tree: Mutex<Tree>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: place a STATE.md at a `/`-separated node path.
    pub fn with_state(self, path: &str, contents: &str) -> Self {
        self.put(&NodePath::from_slash_str(path), Document::State, contents);
        self
    }

    /// Builder: place a PLAN.md at a `/`-separated node path.
    pub fn with_plan(self, path: &str, contents: &str) -> Self {
        self.put(&NodePath::from_slash_str(path), Document::Plan, contents);
        self
    }

    /// Builder: mark a worktree as present for a qualified id.
    pub fn with_worktree(self, id: &str) -> Self {
        self.tree().worktrees.insert(id.to_string());
        self
    }

    /// Builder: create an empty directory.
    pub fn with_dir(self, path: &str) -> Self {
        self.ensure_dir(&NodePath::from_slash_str(path));
        self
    }

    pub fn put(&self, path: &NodePath, document: Document, contents: &str) {
        self.ensure_dir(path);
        let mut tree = self.tree();
        if let Some(node) = tree.nodes.get_mut(path) {
            node.documents.insert(document, contents.to_string());
        }
    }

    fn ensure_dir(&self, path: &NodePath) {
        let mut tree = self.tree();
        let mut current = Some(path.clone());
        while let Some(node) = current {
            if node.is_root() {
                break;
            }
            current = node.parent();
            tree.nodes.entry(node).or_default();
        }
    }

    fn tree(&self) -> MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl IssueStore for MemoryStore {
    fn locate(&self, path: &NodePath) -> PathBuf {
        PathBuf::from("issues").join(path.to_path_buf())
    }

    fn exists(&self, path: &NodePath) -> bool {
        let tree = self.tree();
        if path.is_root() {
            return !tree.nodes.is_empty();
        }
        tree.nodes.contains_key(path)
    }

    fn child_dirs(&self, path: &NodePath) -> Result<Vec<String>> {
        if !self.exists(path) {
            return Err(Error::NotFound(self.locate(path).display().to_string()));
        }
        let tree = self.tree();
        let names = tree
            .nodes
            .keys()
            .filter(|node| node.parent().as_ref() == Some(path))
            .filter_map(|node| node.name().map(str::to_string))
            .collect::<BTreeSet<_>>();
        Ok(names.into_iter().collect())
    }

    fn read_document(&self, path: &NodePath, document: Document) -> Result<Option<String>> {
        Ok(self
            .tree()
            .nodes
            .get(path)
            .and_then(|node| node.documents.get(&document).cloned()))
    }

    fn write_document(&self, path: &NodePath, document: Document, contents: &str) -> Result<()> {
        self.put(path, document, contents);
        Ok(())
    }

    fn worktree_path(&self, id: &IssueId) -> PathBuf {
        PathBuf::from(".worktrees").join(id.to_string())
    }

    fn worktree_exists(&self, id: &IssueId) -> bool {
        self.tree().worktrees.contains(&id.to_string())
    }
}
