//! Session-scoped mutual exclusion over issues.
//!
//! One JSON lock file per issue id under the lock directory. The presence of
//! that file is the only authority on whether an issue is claimed. Locks never
//! expire; a crashed session's lock stays until an operator force-releases it.
//!
//! Acquisition writes the record to a uniquely named temp file and publishes
//! it with `link(2)`, which fails instead of replacing when the lock already
//! exists. Losing that race is an expected outcome: the loser re-reads the
//! winner's record and reports it as `Locked`.

pub mod record;

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use opentelemetry::KeyValue;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{Config, DEFAULT_MAX_LISTED_LOCKS};
use crate::error::{Error, Result};
use crate::model::{IssueId, SessionId};
use crate::store::fs::{temp_sibling, write_atomic};
use crate::telemetry::{metrics, spans};

pub use record::{LockRecord, sanitize_id};

const LOCK_EXTENSION: &str = "lock";

/// Attempts at reading a lock that is mid-write or vanished mid-race.
const ACQUIRE_ATTEMPTS: u32 = 5;
const ACQUIRE_BACKOFF: Duration = Duration::from_millis(20);

/// Returned with every `Locked` outcome.
pub const LOCKED_GUIDANCE: &str = "This issue is claimed by another session. Choose a different \
     issue. Do not inspect, remove, or wait on this lock.";

/// Result of [`LockManager::acquire`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AcquireOutcome {
    /// The caller's session now holds (or already held) the lock.
    Acquired {
        id: String,
        session_id: String,
        worktree: Option<String>,
    },
    /// Another session holds the lock.
    Locked {
        id: String,
        owner: String,
        guidance: String,
    },
}

impl AcquireOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, AcquireOutcome::Acquired { .. })
    }

    fn label(&self) -> &'static str {
        match self {
            AcquireOutcome::Acquired { .. } => "acquired",
            AcquireOutcome::Locked { .. } => "locked",
        }
    }
}

/// Result of [`LockManager::release`] and [`LockManager::force_release`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReleaseOutcome {
    Released {
        id: String,
        /// No lock existed; release is idempotent.
        already_released: bool,
    },
    ForceReleased {
        id: String,
        previous_owner: Option<String>,
    },
}

/// Read-only view of one lock, from [`LockManager::check`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockStatus {
    pub id: String,
    pub locked: bool,
    pub owner: Option<String>,
    pub age_seconds: Option<u64>,
    pub worktree: Option<String>,
    pub created_iso: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockSummary {
    pub id: String,
    pub owner: String,
    pub age_seconds: u64,
    pub worktree: Option<String>,
}

/// Result of [`LockManager::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockListing {
    pub locks: Vec<LockSummary>,
    /// The enumeration cap was hit; more lock files exist than were read.
    pub truncated: bool,
}

/// Lock manager over one lock directory.
#[derive(Debug, Clone)]
pub struct LockManager {
    dir: PathBuf,
    max_listed: usize,
}

impl LockManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_listed: DEFAULT_MAX_LISTED_LOCKS,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.locks_dir.clone()).with_max_listed(config.max_listed_locks)
    }

    /// Cap the number of lock files `list` will enumerate.
    pub fn with_max_listed(mut self, max_listed: usize) -> Self {
        self.max_listed = max_listed.max(1);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the lock file for `id`. Qualified ids are canonicalized first,
    /// so `v2.1-x` and `2.1-x` share one lock.
    pub fn lock_path(&self, id: &str) -> Result<PathBuf> {
        Ok(self.path_for(&canonical_id(id)?))
    }

    fn path_for(&self, canonical: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{LOCK_EXTENSION}", sanitize_id(canonical)))
    }

    /// Claim `id` for `session`.
    ///
    /// Re-acquiring a lock the session already holds returns `Acquired`
    /// without touching the file.
    pub fn acquire(
        &self,
        id: &str,
        session: &SessionId,
        worktree: Option<&str>,
    ) -> Result<AcquireOutcome> {
        let span = spans::start_lock_span("acquire", id);
        let _entered = span.enter();

        let canonical = canonical_id(id)?;
        let id = canonical.as_str();
        let path = self.path_for(id);
        fs::create_dir_all(&self.dir)?;

        let record = LockRecord::new(id, session, worktree, Utc::now());
        let outcome = acquire_at(&path, id, session, &record)?;

        spans::record_lock_outcome(&span, outcome.label());
        record_operation("acquire", outcome.label());
        match &outcome {
            AcquireOutcome::Acquired { .. } => info!(id, session = %session, "lock acquired"),
            AcquireOutcome::Locked { owner, .. } => {
                debug!(id, session = %session, owner = %owner, "lock held by another session")
            }
        }
        Ok(outcome)
    }

    /// Replace the worktree of a lock `session` owns. Creation time is kept.
    pub fn update(&self, id: &str, session: &SessionId, worktree: &str) -> Result<LockRecord> {
        let _span = spans::start_lock_span("update", id).entered();

        let canonical = canonical_id(id)?;
        let id = canonical.as_str();
        let path = self.path_for(id);
        let mut record = read_record(&path)?.ok_or_else(|| Error::LockNotFound(id.to_string()))?;
        if !record.is_owned_by(session) {
            record_operation("update", "ownership_error");
            return Err(Error::Ownership {
                id: id.to_string(),
                owner: record.session_id,
            });
        }

        record.worktree = Some(worktree.to_string());
        record.issue_id.get_or_insert_with(|| id.to_string());
        write_atomic(&path, &serde_json::to_vec_pretty(&record)?)?;

        record_operation("update", "updated");
        info!(id, session = %session, worktree, "lock updated");
        Ok(record)
    }

    /// Release a lock `session` owns. Releasing an absent lock succeeds.
    pub fn release(&self, id: &str, session: &SessionId) -> Result<ReleaseOutcome> {
        let _span = spans::start_lock_span("release", id).entered();

        let canonical = canonical_id(id)?;
        let id = canonical.as_str();
        let path = self.path_for(id);
        let Some(record) = read_record(&path)? else {
            record_operation("release", "already_released");
            return Ok(ReleaseOutcome::Released {
                id: id.to_string(),
                already_released: true,
            });
        };
        if !record.is_owned_by(session) {
            record_operation("release", "ownership_error");
            return Err(Error::Ownership {
                id: id.to_string(),
                owner: record.session_id,
            });
        }

        let already_released = !remove_if_present(&path)?;
        record_operation("release", "released");
        info!(id, session = %session, "lock released");
        Ok(ReleaseOutcome::Released {
            id: id.to_string(),
            already_released,
        })
    }

    /// Remove a lock regardless of owner. Operator escape hatch for crashed sessions.
    pub fn force_release(&self, id: &str) -> Result<ReleaseOutcome> {
        let _span = spans::start_lock_span("force_release", id).entered();

        let canonical = canonical_id(id)?;
        let id = canonical.as_str();
        let path = self.path_for(id);
        let previous_owner = match read_record(&path) {
            Ok(record) => record.map(|r| r.session_id),
            Err(e) => {
                warn!(id, error = %e, "removing unreadable lock file");
                None
            }
        };
        remove_if_present(&path)?;

        record_operation("force_release", "force_released");
        warn!(id, previous_owner = ?previous_owner, "lock force-released");
        Ok(ReleaseOutcome::ForceReleased {
            id: id.to_string(),
            previous_owner,
        })
    }

    /// Report whether `id` is locked, by whom, and for how long. Never mutates.
    pub fn check(&self, id: &str) -> Result<LockStatus> {
        let canonical = canonical_id(id)?;
        let id = canonical.as_str();
        let path = self.path_for(id);
        let status = match read_record(&path)? {
            Some(record) => LockStatus {
                id: id.to_string(),
                locked: true,
                age_seconds: Some(record.age_seconds(Utc::now())),
                owner: Some(record.session_id),
                worktree: record.worktree,
                created_iso: Some(record.created_iso),
            },
            None => LockStatus {
                id: id.to_string(),
                locked: false,
                owner: None,
                age_seconds: None,
                worktree: None,
                created_iso: None,
            },
        };
        Ok(status)
    }

    /// Enumerate lock files. Corrupt entries are skipped with a warning and
    /// at most `max_listed` files are read.
    pub fn list(&self) -> Result<LockListing> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(LockListing {
                    locks: Vec::new(),
                    truncated: false,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let now = Utc::now();
        let mut locks = Vec::new();
        let mut enumerated = 0usize;
        let mut truncated = false;

        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable lock directory entry");
                    continue;
                }
            };
            if !is_lock_file(&path) {
                continue;
            }
            if enumerated >= self.max_listed {
                truncated = true;
                warn!(
                    cap = self.max_listed,
                    dir = %self.dir.display(),
                    "lock listing truncated; lock directory exceeds the enumeration cap"
                );
                break;
            }
            enumerated += 1;

            match read_record(&path) {
                Ok(Some(record)) => {
                    let id = record.issue_id.clone().unwrap_or_else(|| file_stem(&path));
                    locks.push(LockSummary {
                        id,
                        age_seconds: record.age_seconds(now),
                        owner: record.session_id,
                        worktree: record.worktree,
                    });
                }
                Ok(None) => {} // released while listing
                Err(e) => warn!(path = %path.display(), error = %e, "skipping corrupt lock file"),
            }
        }

        locks.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(LockListing { locks, truncated })
    }

    /// Locks currently owned by `session`, read from disk.
    pub fn held_by(&self, session: &SessionId) -> Result<LockListing> {
        let mut listing = self.list()?;
        listing.locks.retain(|lock| {
            SessionId::parse(&lock.owner).is_ok_and(|owner| owner == *session)
        });
        Ok(listing)
    }
}

fn acquire_at(
    path: &Path,
    id: &str,
    session: &SessionId,
    record: &LockRecord,
) -> Result<AcquireOutcome> {
    for attempt in 1..=ACQUIRE_ATTEMPTS {
        match read_record(path) {
            Ok(Some(existing)) => return Ok(contended(id, session, existing)),
            Ok(None) => {}
            Err(Error::CorruptLock { .. }) if attempt < ACQUIRE_ATTEMPTS => {
                // A fallback-mode winner may still be writing its record.
                std::thread::sleep(ACQUIRE_BACKOFF);
                continue;
            }
            Err(e) => return Err(e),
        }

        if install(path, record)? {
            return Ok(AcquireOutcome::Acquired {
                id: id.to_string(),
                session_id: session.to_string(),
                worktree: record.worktree.clone(),
            });
        }
        debug!(id, attempt, "lost lock creation race, re-reading winner");
    }

    Err(Error::Other(format!(
        "could not acquire or read lock for {id} after {ACQUIRE_ATTEMPTS} attempts"
    )))
}

/// Trimmed id, in `IssueId` display form when it parses as one.
fn canonical_id(id: &str) -> Result<String> {
    let id = id.trim();
    if id.is_empty() {
        return Err(Error::Validation("issue id is empty".to_string()));
    }
    Ok(id
        .parse::<IssueId>()
        .map_or_else(|_| id.to_string(), |parsed| parsed.to_string()))
}

fn contended(id: &str, session: &SessionId, existing: LockRecord) -> AcquireOutcome {
    if existing.is_owned_by(session) {
        AcquireOutcome::Acquired {
            id: id.to_string(),
            session_id: session.to_string(),
            worktree: existing.worktree,
        }
    } else {
        AcquireOutcome::Locked {
            id: id.to_string(),
            owner: existing.session_id,
            guidance: LOCKED_GUIDANCE.to_string(),
        }
    }
}

/// Read and parse a lock file; `None` if it does not exist.
fn read_record(path: &Path) -> Result<Option<LockRecord>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|e| Error::CorruptLock {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Publish `record` at `path` unless a lock already exists there.
/// Returns `false` when another writer got there first.
fn install(path: &Path, record: &LockRecord) -> Result<bool> {
    let bytes = serde_json::to_vec_pretty(record)?;
    let tmp_path = temp_sibling(path);

    let written = (|| -> Result<()> {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        Ok(())
    })();
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    let linked = fs::hard_link(&tmp_path, path);
    let _ = fs::remove_file(&tmp_path);
    match linked {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e)
            if matches!(
                e.kind(),
                std::io::ErrorKind::Unsupported | std::io::ErrorKind::PermissionDenied
            ) =>
        {
            debug!(path = %path.display(), error = %e, "hard links unavailable, using exclusive create");
            install_exclusive(path, &bytes)
        }
        Err(e) => Err(e.into()),
    }
}

/// Fallback for filesystems without hard links: `O_CREAT | O_EXCL`.
fn install_exclusive(path: &Path, bytes: &[u8]) -> Result<bool> {
    let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    let written = file.write_all(bytes).and_then(|()| file.sync_all());
    if let Err(e) = written {
        let _ = fs::remove_file(path);
        return Err(e.into());
    }
    Ok(true)
}

/// Remove `path`; `false` if it was already gone.
fn remove_if_present(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn is_lock_file(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_none_or(|n| n.starts_with('.'));
    !hidden && path.extension().is_some_and(|ext| ext == LOCK_EXTENSION)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn record_operation(operation: &'static str, outcome: &'static str) {
    metrics::lock_operations().add(
        1,
        &[
            KeyValue::new("operation", operation),
            KeyValue::new("outcome", outcome),
        ],
    );
}
