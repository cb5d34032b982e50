//! On-disk issue store rooted at `<project>/issues`.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use uuid::Uuid;
use walkdir::WalkDir;

use super::{Document, IssueStore, NodePath};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::IssueId;

/// Issue store backed by the real filesystem.
#[derive(Debug, Clone)]
pub struct FsStore {
    issues_root: PathBuf,
    worktrees_dir: PathBuf,
}

impl FsStore {
    pub fn new(project_root: impl AsRef<Path>, worktrees_dir: impl Into<PathBuf>) -> Self {
        Self {
            issues_root: project_root.as_ref().join("issues"),
            worktrees_dir: worktrees_dir.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.project_root, config.worktrees_dir.clone())
    }

    pub fn issues_root(&self) -> &Path {
        &self.issues_root
    }

    fn dir(&self, path: &NodePath) -> PathBuf {
        self.issues_root.join(path.to_path_buf())
    }
}

impl IssueStore for FsStore {
    fn locate(&self, path: &NodePath) -> PathBuf {
        self.dir(path)
    }

    fn exists(&self, path: &NodePath) -> bool {
        self.dir(path).is_dir()
    }

    fn child_dirs(&self, path: &NodePath) -> Result<Vec<String>> {
        let dir = self.dir(path);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(dir.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    fn read_document(&self, path: &NodePath, document: Document) -> Result<Option<String>> {
        match fs::read_to_string(self.dir(path).join(document.file_name())) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_document(&self, path: &NodePath, document: Document, contents: &str) -> Result<()> {
        let dir = self.dir(path);
        fs::create_dir_all(&dir)?;
        write_atomic(&dir.join(document.file_name()), contents.as_bytes())
    }

    fn worktree_path(&self, id: &IssueId) -> PathBuf {
        self.worktrees_dir.join(id.to_string())
    }

    fn worktree_exists(&self, id: &IssueId) -> bool {
        self.worktree_path(id).exists()
    }

    fn find_dirs_named(&self, name: &str, max_depth: usize) -> Result<Vec<NodePath>> {
        if !self.issues_root.is_dir() {
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        let walker = WalkDir::new(&self.issues_root)
            .min_depth(1)
            .max_depth(max_depth)
            .sort_by_file_name();
        for entry in walker.into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_dir() || entry.file_name().to_str() != Some(name) {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.issues_root) else {
                continue;
            };
            let Some(relative) = relative.to_str() else {
                continue;
            };
            found.push(NodePath::from_slash_str(
                &relative.replace(std::path::MAIN_SEPARATOR, "/"),
            ));
        }
        found.sort();
        Ok(found)
    }
}

/// Write bytes to `path` via a uniquely named temp file in the same directory
/// followed by `rename`, so readers never observe a partial file.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = temp_sibling(path);
    let result = (|| -> Result<()> {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

/// Temp file path next to `path`: hidden, and unique across processes and threads.
pub(crate) fn temp_sibling(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or(Path::new("."));
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    parent.join(format!(
        ".{file_name}.tmp-{}-{}",
        std::process::id(),
        Uuid::new_v4().simple()
    ))
}
