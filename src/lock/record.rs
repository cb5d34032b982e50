//! Lock file contents and lock file naming.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::SessionId;

/// One lock file: `<locks>/<sanitized-id>.lock`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Owning session, as written at acquisition.
    pub session_id: String,
    /// Creation time in epoch seconds.
    pub created_at: i64,
    #[serde(default)]
    pub worktree: Option<String>,
    pub created_iso: String,
    /// The unsanitized id. Older files may lack it; the file stem stands in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<String>,
}

impl LockRecord {
    pub fn new(id: &str, session: &SessionId, worktree: Option<&str>, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session.to_string(),
            created_at: now.timestamp(),
            worktree: worktree.map(str::to_string),
            created_iso: now.to_rfc3339(),
            issue_id: Some(id.to_string()),
        }
    }

    /// Whether `session` owns this lock. Compares as UUIDs when possible so
    /// case differences in hand-edited files do not split ownership.
    pub fn is_owned_by(&self, session: &SessionId) -> bool {
        match SessionId::parse(&self.session_id) {
            Ok(owner) => owner == *session,
            Err(_) => self.session_id == session.to_string(),
        }
    }

    /// Seconds since creation, never negative.
    pub fn age_seconds(&self, now: DateTime<Utc>) -> u64 {
        u64::try_from(now.timestamp().saturating_sub(self.created_at)).unwrap_or(0)
    }
}

/// Map an issue id to a safe lock file stem: path separators become `-` and
/// `..` sequences become `__`, so no id can address a file outside the lock directory.
pub fn sanitize_id(id: &str) -> String {
    let replaced: String = id
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' => '-',
            '\0' => '_',
            other => other,
        })
        .collect();
    let replaced = replaced.replace("..", "__");
    if replaced.starts_with('.') {
        format!("_{}", &replaced[1..])
    } else {
        replaced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_blocks_traversal() {
        assert_eq!(sanitize_id("2.1-fix-bug"), "2.1-fix-bug");
        assert_eq!(sanitize_id("../../etc/passwd"), "__-__-etc-passwd");
        assert_eq!(sanitize_id("a\\b"), "a-b");
        assert_eq!(sanitize_id(".hidden"), "_hidden");
        assert!(!sanitize_id("x/../../y").contains(".."));
    }

    #[test]
    fn age_never_negative() {
        let now = Utc::now();
        let mut record = LockRecord::new("x", &SessionId::new(), None, now);
        record.created_at += 3600;
        assert_eq!(record.age_seconds(now), 0);
    }

    #[test]
    fn ownership_ignores_uuid_case() {
        let session = SessionId::new();
        let mut record = LockRecord::new("x", &session, None, Utc::now());
        record.session_id = record.session_id.to_uppercase();
        assert!(record.is_owned_by(&session));
        assert!(!record.is_owned_by(&SessionId::new()));
    }

    #[test]
    fn legacy_file_without_issue_id_parses() {
        let json = r#"{"session_id":"3f2c8d2e-9a4b-4c1e-8f3a-2b6d7e9f0a1b","created_at":1700000000,"worktree":"/tmp/wt","created_iso":"2023-11-14T22:13:20+00:00"}"#;
        let record: LockRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.issue_id, None);
        assert_eq!(record.worktree.as_deref(), Some("/tmp/wt"));
    }
}
