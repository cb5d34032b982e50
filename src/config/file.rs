//! Optional `issuelock.toml` at the project root.
//!
//! ```toml
//! locks_dir = ".issuelock/locks"
//! worktrees_dir = "../worktrees"
//! max_listed_locks = 500
//! walk_depth = 4
//! log_level = "info"
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

pub const FILE_NAME: &str = "issuelock.toml";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub locks_dir: Option<PathBuf>,
    pub worktrees_dir: Option<PathBuf>,
    pub max_listed_locks: Option<usize>,
    pub walk_depth: Option<usize>,
    pub log_level: Option<String>,
}

impl FileConfig {
    /// Read `<root>/issuelock.toml`; an absent file yields all defaults.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(FILE_NAME);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(Error::Config(format!("cannot read {}: {e}", path.display())));
            }
        };
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("bad config {}: {e}", path.display())))
    }
}
