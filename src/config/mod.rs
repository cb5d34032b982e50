//! Typed configuration from environment variables and `issuelock.toml`.
//!
//! Loads once at startup, fails fast on malformed values. Environment
//! variables win over the file; the file wins over built-in defaults.

pub mod file;

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

use file::FileConfig;

/// Default cap on lock files enumerated by `list`.
pub const DEFAULT_MAX_LISTED_LOCKS: usize = 1000;

/// Default depth of the fallback walk used to resolve bare references.
/// `v<M>/v<M>.<m>/v<M>.<m>.<p>/<name>` is four levels below `issues/`.
pub const DEFAULT_WALK_DEPTH: usize = 4;

#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing `issues/`.
    pub project_root: PathBuf,
    pub locks_dir: PathBuf,
    pub worktrees_dir: PathBuf,
    pub max_listed_locks: usize,
    pub walk_depth: usize,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration with an explicit project root, ignoring `ISSUELOCK_ROOT`.
    pub fn for_root(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        Self::from_lookup(|name| match name {
            "ISSUELOCK_ROOT" => Some(root.display().to_string()),
            other => std::env::var(other).ok(),
        })
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let project_root = match lookup("ISSUELOCK_ROOT") {
            Some(root) if !root.trim().is_empty() => PathBuf::from(root),
            _ => std::env::current_dir()?,
        };
        let file = FileConfig::load(&project_root)?;

        let locks_dir = lookup("ISSUELOCK_LOCKS_DIR")
            .map(PathBuf::from)
            .or(file.locks_dir)
            .map(|dir| resolve(&project_root, dir))
            .unwrap_or_else(|| project_root.join("locks"));

        let worktrees_dir = lookup("ISSUELOCK_WORKTREES_DIR")
            .map(PathBuf::from)
            .or(file.worktrees_dir)
            .map(|dir| resolve(&project_root, dir))
            .unwrap_or_else(|| project_root.join(".worktrees"));

        let max_listed_locks = parse_var(&lookup, "ISSUELOCK_MAX_LISTED_LOCKS")?
            .or(file.max_listed_locks)
            .unwrap_or(DEFAULT_MAX_LISTED_LOCKS);
        if max_listed_locks == 0 {
            return Err(Error::Config("max_listed_locks must be at least 1".to_string()));
        }

        let walk_depth = parse_var(&lookup, "ISSUELOCK_WALK_DEPTH")?
            .or(file.walk_depth)
            .unwrap_or(DEFAULT_WALK_DEPTH);

        Ok(Self {
            project_root,
            locks_dir,
            worktrees_dir,
            max_listed_locks,
            walk_depth,
            otel_endpoint: lookup("OTEL_ENDPOINT").filter(|e| !e.trim().is_empty()),
            log_level: lookup("LOG_LEVEL")
                .or(file.log_level)
                .unwrap_or_else(|| "warn".to_string()),
        })
    }
}

fn resolve(root: &Path, dir: PathBuf) -> PathBuf {
    if dir.is_absolute() { dir } else { root.join(dir) }
}

fn parse_var(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<usize>> {
    lookup(name)
        .map(|value| {
            value.trim().parse::<usize>().map_err(|e| {
                Error::Config(format!("{name} must be a non-negative integer, got {value:?}: {e}"))
            })
        })
        .transpose()
}
