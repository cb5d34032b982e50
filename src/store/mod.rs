//! Issue tree storage.
//!
//! All path and file I/O for the `issues/` tree goes through [`IssueStore`].
//! The store knows about directories and documents only; status rules,
//! dependencies and eligibility live above it in `tree` and `discovery`.

pub mod fs;
pub mod memory;

use std::path::PathBuf;

use crate::error::Result;
use crate::model::IssueId;

pub use fs::FsStore;
pub use memory::MemoryStore;

/// Location of a directory relative to the `issues/` root, one component per level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodePath(Vec<String>);

impl NodePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Split a `/`-separated relative path (`"v2/v2.1/fix-bug"`).
    pub fn from_slash_str(s: &str) -> Self {
        Self(
            s.split('/')
                .filter(|part| !part.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn join(&self, name: &str) -> Self {
        let mut parts = self.0.clone();
        parts.push(name.to_string());
        Self(parts)
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Last component, if any.
    pub fn name(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    pub fn parent(&self) -> Option<NodePath> {
        if self.0.is_empty() {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Relative filesystem path for this node.
    pub fn to_path_buf(&self) -> PathBuf {
        self.0.iter().collect()
    }
}

impl std::fmt::Display for NodePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

/// The two documents a node may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Document {
    /// STATE.md: status, dependencies, decomposition.
    State,
    /// PLAN.md: post-condition markers at version level.
    Plan,
}

impl Document {
    pub fn file_name(self) -> &'static str {
        match self {
            Document::State => "STATE.md",
            Document::Plan => "PLAN.md",
        }
    }
}

/// Read/write access to the issue tree. Pure I/O, no business rules.
pub trait IssueStore {
    /// Absolute (or display) location of a node, used in results and errors.
    fn locate(&self, path: &NodePath) -> PathBuf;

    /// Whether a directory exists at `path`.
    fn exists(&self, path: &NodePath) -> bool;

    /// Names of the subdirectories of `path`, sorted lexicographically.
    ///
    /// Fails with `Error::NotFound` if `path` does not exist.
    fn child_dirs(&self, path: &NodePath) -> Result<Vec<String>>;

    /// Contents of a document, or `None` if the node does not carry it.
    fn read_document(&self, path: &NodePath, document: Document) -> Result<Option<String>>;

    /// Replace a document's contents.
    fn write_document(&self, path: &NodePath, document: Document, contents: &str) -> Result<()>;

    /// Where the worktree for `id` would live.
    fn worktree_path(&self, id: &IssueId) -> PathBuf;

    /// Whether a worktree for `id` already exists.
    fn worktree_exists(&self, id: &IssueId) -> bool;

    fn has_document(&self, path: &NodePath, document: Document) -> bool {
        matches!(self.read_document(path, document), Ok(Some(_)))
    }

    /// All directories named `name` at most `max_depth` levels below the root,
    /// in depth-first lexicographic order.
    fn find_dirs_named(&self, name: &str, max_depth: usize) -> Result<Vec<NodePath>> {
        let mut found = Vec::new();
        let mut stack = vec![NodePath::root()];
        while let Some(dir) = stack.pop() {
            if dir.depth() >= max_depth {
                continue;
            }
            let Ok(children) = self.child_dirs(&dir) else {
                continue;
            };
            for child in children.iter().rev() {
                stack.push(dir.join(child));
            }
            for child in &children {
                if child == name {
                    found.push(dir.join(child));
                }
            }
        }
        found.sort();
        Ok(found)
    }
}

impl<S: IssueStore + ?Sized> IssueStore for &S {
    fn locate(&self, path: &NodePath) -> PathBuf {
        (**self).locate(path)
    }

    fn exists(&self, path: &NodePath) -> bool {
        (**self).exists(path)
    }

    fn child_dirs(&self, path: &NodePath) -> Result<Vec<String>> {
        (**self).child_dirs(path)
    }

    fn read_document(&self, path: &NodePath, document: Document) -> Result<Option<String>> {
        (**self).read_document(path, document)
    }

    fn write_document(&self, path: &NodePath, document: Document, contents: &str) -> Result<()> {
        (**self).write_document(path, document, contents)
    }

    fn worktree_path(&self, id: &IssueId) -> PathBuf {
        (**self).worktree_path(id)
    }

    fn worktree_exists(&self, id: &IssueId) -> bool {
        (**self).worktree_exists(id)
    }

    fn find_dirs_named(&self, name: &str, max_depth: usize) -> Result<Vec<NodePath>> {
        (**self).find_dirs_named(name, max_depth)
    }
}
