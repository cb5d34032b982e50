//! Core data model.
//!
//! An issue is a directory in the version tree holding a STATE.md. It has a
//! hierarchical identity (version + name), a lifecycle status, dependencies
//! on other issues, and optionally a list of children it was decomposed into.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store::NodePath;

// ---------------------------------------------------------------------------
// Version
// ---------------------------------------------------------------------------

/// A node in the `major[.minor[.patch]]` hierarchy.
///
/// Ordering is numeric, component by component, with a parent sorting before
/// its children (`2 < 2.0 < 2.0.1 < 2.1 < 2.10`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minor: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<u32>,
}

impl Version {
    pub fn major(major: u32) -> Self {
        Self {
            major,
            minor: None,
            patch: None,
        }
    }

    pub fn minor(major: u32, minor: u32) -> Self {
        Self {
            major,
            minor: Some(minor),
            patch: None,
        }
    }

    pub fn patch(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor: Some(minor),
            patch: Some(patch),
        }
    }

    /// Parse `2`, `v2`, `2.1`, `v2.1.3`.
    pub fn parse(s: &str) -> Option<Self> {
        let digits = s.strip_prefix('v').unwrap_or(s);
        let mut parts = digits.split('.');
        let major = parse_component(parts.next()?)?;
        let minor = parts.next().map(parse_component);
        let patch = parts.next().map(parse_component);
        if parts.next().is_some() {
            return None;
        }
        match (minor, patch) {
            (None, None) => Some(Self::major(major)),
            (Some(Some(minor)), None) => Some(Self::minor(major, minor)),
            (Some(Some(minor)), Some(Some(patch))) => Some(Self::patch(major, minor, patch)),
            _ => None,
        }
    }

    /// Parse a version directory name. Only the `v`-prefixed form is a directory.
    pub fn from_dir_name(name: &str) -> Option<Self> {
        if !name.starts_with('v') {
            return None;
        }
        Self::parse(name)
    }

    /// `v2`, `v2.1`, `v2.1.3`.
    pub fn dir_name(&self) -> String {
        format!("v{self}")
    }

    pub fn parent(&self) -> Option<Version> {
        match (self.minor, self.patch) {
            (Some(minor), Some(_)) => Some(Self::minor(self.major, minor)),
            (Some(_), None) => Some(Self::major(self.major)),
            _ => None,
        }
    }

    /// This version and its ancestors, outermost first (`2`, `2.1`, `2.1.3`).
    pub fn lineage(&self) -> Vec<Version> {
        let mut chain = vec![*self];
        while let Some(parent) = chain.last().and_then(Version::parent) {
            chain.push(parent);
        }
        chain.reverse();
        chain
    }

    /// Whether `self` is a direct child node of `parent`.
    pub fn is_child_of(&self, parent: &Version) -> bool {
        self.parent().as_ref() == Some(parent)
    }

    /// Path of this version node below the `issues/` root.
    pub fn node_path(&self) -> NodePath {
        let mut path = NodePath::root().join(&Self::major(self.major).dir_name());
        if let Some(minor) = self.minor {
            path = path.join(&Self::minor(self.major, minor).dir_name());
        }
        if let (Some(minor), Some(patch)) = (self.minor, self.patch) {
            path = path.join(&Self::patch(self.major, minor, patch).dir_name());
        }
        path
    }

    /// Recover a version from a node path (`["v2", "v2.1"]`), checking that
    /// every component is a correctly nested version directory.
    pub fn from_node_path(path: &NodePath) -> Option<Self> {
        let mut current: Option<Version> = None;
        for component in path.components() {
            let next = Self::from_dir_name(component)?;
            match current {
                None if next.minor.is_none() => {}
                Some(parent) if next.is_child_of(&parent) => {}
                _ => return None,
            }
            current = Some(next);
        }
        current
    }
}

fn parse_component(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.major)?;
        if let Some(minor) = self.minor {
            write!(f, ".{minor}")?;
        }
        if let Some(patch) = self.patch {
            write!(f, ".{patch}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Issue ID
// ---------------------------------------------------------------------------

/// Fully qualified issue identifier: `major[.minor[.patch]]-name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct IssueId {
    pub version: Version,
    pub name: String,
}

fn issue_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^v?(\d+(?:\.\d+){0,2})-(.+)$").expect("valid issue id regex"))
}

impl IssueId {
    pub fn new(version: Version, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self { version, name })
    }

    /// Whether `s` has the shape of a fully qualified id.
    pub fn is_qualified(s: &str) -> bool {
        Self::from_str(s).is_ok()
    }

    pub fn node_path(&self) -> NodePath {
        self.version.node_path().join(&self.name)
    }

    /// Recover an id from the node path of an issue directory.
    pub fn from_node_path(path: &NodePath) -> Option<Self> {
        let name = path.name()?;
        let version = Version::from_node_path(&path.parent()?)?;
        Self::new(version, name).ok()
    }
}

/// Issue names become directory names; reject anything that would escape the
/// version directory or collide with a version node.
fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Validation("issue name is empty".to_string()));
    }
    if name.contains('/') || name.contains('\\') || name.contains('\0') || name.contains("..") {
        return Err(Error::Validation(format!("invalid issue name: {name:?}")));
    }
    if Version::from_dir_name(name).is_some() {
        return Err(Error::Validation(format!(
            "issue name {name:?} collides with a version directory"
        )));
    }
    Ok(())
}

impl FromStr for IssueId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let caps = issue_id_regex()
            .captures(s.trim())
            .ok_or_else(|| Error::Validation(format!("not a qualified issue id: {s:?}")))?;
        let version = Version::parse(&caps[1])
            .ok_or_else(|| Error::Validation(format!("invalid version in issue id: {s:?}")))?;
        Self::new(version, &caps[2])
    }
}

impl TryFrom<String> for IssueId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<IssueId> for String {
    fn from(id: IssueId) -> Self {
        id.to_string()
    }
}

impl std::fmt::Display for IssueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.version, self.name)
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Canonical lifecycle status of an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    Open,
    InProgress,
    Closed,
    Blocked,
}

impl Status {
    /// Open or in progress: the only statuses discovery will hand out.
    pub fn is_workable(self) -> bool {
        matches!(self, Status::Open | Status::InProgress)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Open => "open",
            Status::InProgress => "in-progress",
            Status::Closed => "closed",
            Status::Blocked => "blocked",
        }
    }
}

impl FromStr for Status {
    type Err = String;

    /// Normalizes legacy aliases. Anything unrecognized is an error, never a default.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" | "pending" => Ok(Status::Open),
            "in-progress" | "in_progress" | "active" => Ok(Status::InProgress),
            "closed" | "completed" | "complete" | "done" => Ok(Status::Closed),
            "blocked" => Ok(Status::Blocked),
            other => Err(format!("unknown status {other:?}")),
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Issue
// ---------------------------------------------------------------------------

/// An issue as read from disk, after status normalization.
#[derive(Debug, Clone, Serialize)]
pub struct Issue {
    pub id: IssueId,
    pub status: Status,
    /// References as written in STATE.md; qualified ids or bare names.
    pub dependencies: Vec<String>,
    /// Child names from the "Decomposed Into" section. Empty unless decomposed.
    pub decomposed_into: Vec<String>,
    pub path: PathBuf,
}

impl Issue {
    pub fn is_decomposed(&self) -> bool {
        !self.decomposed_into.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Identity of an agent session. Always a UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| Error::Validation(format!("session id {s:?} is not a UUID: {e}")))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

// ---------------------------------------------------------------------------
// Search scope
// ---------------------------------------------------------------------------

/// Breadth of a discovery search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SearchScope {
    All,
    Major { major: u32 },
    /// A minor version node including its patch sub-nodes.
    Minor { major: u32, minor: u32 },
    Issue { id: IssueId },
    /// An unqualified name, resolved by searching the whole tree.
    BareName { name: String },
}

impl SearchScope {
    /// Interpret a CLI target: nothing, a version, a qualified id, or a bare name.
    pub fn from_target(target: Option<&str>) -> Result<Self> {
        let Some(target) = target.map(str::trim).filter(|t| !t.is_empty()) else {
            return Ok(SearchScope::All);
        };

        if let Some(version) = Version::parse(target) {
            return match (version.minor, version.patch) {
                (None, _) => Ok(SearchScope::Major {
                    major: version.major,
                }),
                (Some(minor), None) => Ok(SearchScope::Minor {
                    major: version.major,
                    minor,
                }),
                (Some(_), Some(_)) => Err(Error::Validation(format!(
                    "patch-level scope {target} is not supported; search its minor version or name the issue"
                ))),
            };
        }

        if let Ok(id) = target.parse::<IssueId>() {
            return Ok(SearchScope::Issue { id });
        }

        validate_name(target)?;
        Ok(SearchScope::BareName {
            name: target.to_string(),
        })
    }

    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            SearchScope::All => "all",
            SearchScope::Major { .. } => "major",
            SearchScope::Minor { .. } => "minor",
            SearchScope::Issue { .. } => "issue",
            SearchScope::BareName { .. } => "bare_name",
        }
    }
}

impl std::fmt::Display for SearchScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchScope::All => write!(f, "all"),
            SearchScope::Major { major } => write!(f, "v{major}"),
            SearchScope::Minor { major, minor } => write!(f, "v{major}.{minor}"),
            SearchScope::Issue { id } => write!(f, "{id}"),
            SearchScope::BareName { name } => write!(f, "{name}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_aliases_normalize() {
        let cases = [
            ("pending", Status::Open),
            ("open", Status::Open),
            ("completed", Status::Closed),
            ("complete", Status::Closed),
            ("done", Status::Closed),
            ("closed", Status::Closed),
            ("in_progress", Status::InProgress),
            ("active", Status::InProgress),
            ("in-progress", Status::InProgress),
            ("blocked", Status::Blocked),
        ];
        for (raw, expected) in cases {
            assert_eq!(raw.parse::<Status>().unwrap(), expected, "alias {raw}");
        }
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert!("wip".parse::<Status>().is_err());
        assert!("".parse::<Status>().is_err());
    }

    #[test]
    fn issue_id_parses_all_levels() {
        let id: IssueId = "2.1-fix-bug".parse().unwrap();
        assert_eq!(id.version, Version::minor(2, 1));
        assert_eq!(id.name, "fix-bug");
        assert_eq!(id.to_string(), "2.1-fix-bug");

        let id: IssueId = "3-setup".parse().unwrap();
        assert_eq!(id.version, Version::major(3));

        let id: IssueId = "1.0.2-hotfix".parse().unwrap();
        assert_eq!(id.version, Version::patch(1, 0, 2));
        assert_eq!(
            id.node_path().to_string(),
            "v1/v1.0/v1.0.2/hotfix"
        );
    }

    #[test]
    fn issue_id_rejects_traversal() {
        assert!("2.1-../etc".parse::<IssueId>().is_err());
        assert!("2.1-a/b".parse::<IssueId>().is_err());
        assert!("fix-bug".parse::<IssueId>().is_err());
    }

    #[test]
    fn versions_order_numerically() {
        let mut versions = vec![
            Version::minor(2, 10),
            Version::minor(2, 9),
            Version::major(2),
            Version::patch(2, 9, 1),
        ];
        versions.sort();
        assert_eq!(
            versions,
            vec![
                Version::major(2),
                Version::minor(2, 9),
                Version::patch(2, 9, 1),
                Version::minor(2, 10),
            ]
        );
    }

    #[test]
    fn lineage_is_outermost_first() {
        assert_eq!(
            Version::patch(2, 1, 3).lineage(),
            vec![Version::major(2), Version::minor(2, 1), Version::patch(2, 1, 3)]
        );
        assert_eq!(Version::major(4).lineage(), vec![Version::major(4)]);
    }

    #[test]
    fn version_node_path_round_trips_through_directories() {
        let version = Version::patch(2, 1, 3);
        let path = version.node_path();
        assert_eq!(path.to_string(), "v2/v2.1/v2.1.3");
        assert_eq!(Version::from_node_path(&path), Some(version));

        let mismatched = NodePath::root().join("v2").join("v3.1");
        assert_eq!(Version::from_node_path(&mismatched), None);
    }

    #[test]
    fn scope_from_target() {
        assert_eq!(SearchScope::from_target(None).unwrap(), SearchScope::All);
        assert_eq!(
            SearchScope::from_target(Some("v2")).unwrap(),
            SearchScope::Major { major: 2 }
        );
        assert_eq!(
            SearchScope::from_target(Some("2.1")).unwrap(),
            SearchScope::Minor { major: 2, minor: 1 }
        );
        assert!(matches!(
            SearchScope::from_target(Some("2.1-fix-bug")).unwrap(),
            SearchScope::Issue { .. }
        ));
        assert_eq!(
            SearchScope::from_target(Some("fix-bug")).unwrap(),
            SearchScope::BareName {
                name: "fix-bug".to_string()
            }
        );
        assert!(SearchScope::from_target(Some("2.1.3")).is_err());
    }

    #[test]
    fn session_id_must_be_uuid() {
        assert!(SessionId::parse("not-a-uuid").is_err());
        let session = SessionId::new();
        assert_eq!(SessionId::parse(&session.to_string()).unwrap(), session);
    }
}
