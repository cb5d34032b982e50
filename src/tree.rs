//! The version tree: navigation, issue loading and dependency rules.
//!
//! Everything here reads through an [`IssueStore`]; nothing is cached, so
//! every answer reflects the tree at the moment it is asked. Reads race with
//! other sessions editing STATE.md files and that is accepted: only lock
//! acquisition settles who works on what.

use std::collections::BTreeSet;
use std::path::Path;

use tracing::{debug, info};

use crate::config::{Config, DEFAULT_WALK_DEPTH};
use crate::document::{self, StateDocument};
use crate::error::{Error, Result};
use crate::model::{Issue, IssueId, Status, Version};
use crate::store::{Document, IssueStore};

/// Read and write access to issues, layered over a store.
#[derive(Debug)]
pub struct IssueTree<S> {
    store: S,
    walk_depth: usize,
}

impl<S: IssueStore> IssueTree<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            walk_depth: DEFAULT_WALK_DEPTH,
        }
    }

    pub fn from_config(store: S, config: &Config) -> Self {
        Self::new(store).with_walk_depth(config.walk_depth)
    }

    /// Depth limit for the fallback walk that resolves unqualified references.
    pub fn with_walk_depth(mut self, walk_depth: usize) -> Self {
        self.walk_depth = walk_depth;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Navigation
    // -----------------------------------------------------------------------

    /// Version nodes directly below `parent` (majors when `None`), in numeric order.
    ///
    /// Fails with `Error::NotFound` when the parent node does not exist.
    pub fn child_versions(&self, parent: Option<&Version>) -> Result<Vec<Version>> {
        let path = parent.map(Version::node_path).unwrap_or_default();
        let mut versions: Vec<Version> = self
            .store
            .child_dirs(&path)?
            .iter()
            .filter_map(|name| Version::from_dir_name(name))
            .filter(|version| match parent {
                Some(parent) => version.is_child_of(parent),
                None => version.minor.is_none(),
            })
            .collect();
        versions.sort();
        Ok(versions)
    }

    /// Issues placed directly in `version`, sorted by name. A directory is an
    /// issue when it carries a STATE.md and is not itself a version node.
    pub fn issues_in(&self, version: &Version) -> Result<Vec<IssueId>> {
        let node = version.node_path();
        let mut issues = Vec::new();
        for name in self.store.child_dirs(&node)? {
            if Version::from_dir_name(&name).is_some() {
                continue;
            }
            if !self.store.has_document(&node.join(&name), Document::State) {
                continue;
            }
            match IssueId::new(*version, &name) {
                Ok(id) => issues.push(id),
                Err(e) => debug!(version = %version, name, error = %e, "ignoring directory"),
            }
        }
        Ok(issues)
    }

    pub fn version_exists(&self, version: &Version) -> bool {
        self.store.exists(&version.node_path())
    }

    // -----------------------------------------------------------------------
    // Loading
    // -----------------------------------------------------------------------

    /// Read an issue's STATE.md.
    ///
    /// A closed decomposed parent must have every child resolve to a closed
    /// issue; otherwise the read itself fails with `Error::Status`.
    pub fn load_issue(&self, id: &IssueId) -> Result<Issue> {
        self.load(id, &mut Vec::new())
    }

    fn load(&self, id: &IssueId, visiting: &mut Vec<IssueId>) -> Result<Issue> {
        let node = id.node_path();
        let path = self.store.locate(&node).join(Document::State.file_name());
        let text = self
            .store
            .read_document(&node, Document::State)?
            .ok_or_else(|| Error::NotFound(format!("issue {id}")))?;
        let state = StateDocument::parse(&path, &text)?;

        let issue = Issue {
            id: id.clone(),
            status: state.status,
            dependencies: state.dependencies,
            decomposed_into: state.decomposed_into,
            path: self.store.locate(&node),
        };

        if issue.status == Status::Closed && issue.is_decomposed() {
            visiting.push(id.clone());
            let validated = self.validate_closed_children(&issue, &path, visiting);
            visiting.pop();
            validated?;
        }
        Ok(issue)
    }

    fn validate_closed_children(
        &self,
        parent: &Issue,
        path: &Path,
        visiting: &mut Vec<IssueId>,
    ) -> Result<()> {
        for child in &parent.decomposed_into {
            let Some(child_id) = self.resolve(child, &parent.id.version) else {
                return Err(Error::status(
                    path,
                    format!("closed, but child {child} cannot be resolved"),
                ));
            };
            if visiting.contains(&child_id) {
                return Err(Error::status(
                    path,
                    format!("decomposition of {} loops through {child_id}", parent.id),
                ));
            }
            match self.load(&child_id, visiting) {
                Ok(loaded) if loaded.status == Status::Closed => {}
                Ok(loaded) => {
                    return Err(Error::status(
                        path,
                        format!("closed, but child {child_id} is {}", loaded.status),
                    ));
                }
                Err(e) => {
                    return Err(Error::status(
                        path,
                        format!("closed, but child {child_id} is unreadable: {e}"),
                    ));
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reference resolution
    // -----------------------------------------------------------------------

    /// Resolve a dependency or child reference written in an issue under `near`.
    ///
    /// Tries the qualified id's own path, then a sibling in `near`, then a
    /// bounded walk matching the directory name. A qualified reference whose
    /// path is gone falls back to its bare name, so an issue that moved to
    /// another version still resolves. The walk prefers the lowest version
    /// when a name appears more than once.
    pub fn resolve(&self, reference: &str, near: &Version) -> Option<IssueId> {
        let reference = reference.trim();
        let qualified = reference.parse::<IssueId>().ok();
        if let Some(id) = &qualified
            && self.is_issue(id)
        {
            return Some(id.clone());
        }

        let mut names = vec![reference];
        if let Some(id) = &qualified {
            names.push(id.name.as_str());
        }

        names
            .iter()
            .filter_map(|name| IssueId::new(*near, *name).ok())
            .find(|sibling| self.is_issue(sibling))
            .or_else(|| names.iter().find_map(|name| self.walk_for(name)))
    }

    /// First issue named `name` anywhere in the tree, in version order.
    pub fn find_by_name(&self, name: &str) -> Option<IssueId> {
        self.walk_for(name)
    }

    fn walk_for(&self, name: &str) -> Option<IssueId> {
        let found = match self.store.find_dirs_named(name, self.walk_depth) {
            Ok(found) => found,
            Err(e) => {
                debug!(name, error = %e, "reference walk failed");
                return None;
            }
        };
        found
            .iter()
            .filter_map(IssueId::from_node_path)
            .filter(|id| self.is_issue(id))
            .min()
    }

    /// Whether `id` names an issue directory with a STATE.md.
    pub fn is_issue(&self, id: &IssueId) -> bool {
        self.store.has_document(&id.node_path(), Document::State)
    }

    // -----------------------------------------------------------------------
    // Gating
    // -----------------------------------------------------------------------

    /// Whether a dependency reference is met. Anything that cannot be
    /// resolved or read counts as unmet.
    pub fn reference_satisfied(&self, reference: &str, near: &Version) -> bool {
        if let Some(version) = version_reference(reference) {
            return self.version_closed(&version);
        }
        self.resolve(reference, near)
            .and_then(|id| self.load_issue(&id).ok())
            .is_some_and(|dep| dep.status == Status::Closed)
    }

    /// Dependencies of `issue` that are not yet met, as written.
    pub fn unmet_dependencies(&self, issue: &Issue) -> Vec<String> {
        issue
            .dependencies
            .iter()
            .filter(|dep| !self.reference_satisfied(dep, &issue.id.version))
            .cloned()
            .collect()
    }

    /// Children of a decomposed parent that are not closed.
    pub fn open_children(&self, issue: &Issue) -> Vec<String> {
        issue
            .decomposed_into
            .iter()
            .filter(|child| !self.reference_satisfied(child, &issue.id.version))
            .cloned()
            .collect()
    }

    /// Unmet dependencies declared in the STATE.md of a version node.
    pub fn version_blockers(&self, version: &Version) -> Vec<String> {
        let node = version.node_path();
        let text = match self.store.read_document(&node, Document::State) {
            Ok(Some(text)) => text,
            Ok(None) => return Vec::new(),
            Err(e) => return vec![format!("{}: {e}", version.dir_name())],
        };
        document::parse_dependencies(&text)
            .into_iter()
            .filter(|dep| !self.reference_satisfied(dep, version))
            .collect()
    }

    /// Whether a version is done: its own status line says closed, or, without
    /// one, every issue beneath it is closed.
    pub fn version_closed(&self, version: &Version) -> bool {
        let node = version.node_path();
        if !self.store.exists(&node) {
            return false;
        }
        match self.store.read_document(&node, Document::State) {
            Ok(Some(text)) => {
                if let Some(raw) = document::raw_status(&text) {
                    return raw.parse::<Status>() == Ok(Status::Closed);
                }
            }
            Ok(None) => {}
            Err(_) => return false,
        }
        self.all_closed_beneath(version)
    }

    fn all_closed_beneath(&self, version: &Version) -> bool {
        let Ok(issues) = self.issues_in(version) else {
            return false;
        };
        let issues_closed = issues.iter().all(|id| {
            self.load_issue(id)
                .is_ok_and(|issue| issue.status == Status::Closed)
        });
        issues_closed
            && self
                .child_versions(Some(version))
                .is_ok_and(|children| children.iter().all(|v| self.all_closed_beneath(v)))
    }

    /// Names marked as post-condition items in the PLAN.md of `version`.
    pub fn postconditions(&self, version: &Version) -> BTreeSet<String> {
        match self.store.read_document(&version.node_path(), Document::Plan) {
            Ok(Some(plan)) => document::parse_postconditions(&plan),
            Ok(None) => BTreeSet::new(),
            Err(e) => {
                debug!(version = %version, error = %e, "unreadable PLAN.md");
                BTreeSet::new()
            }
        }
    }

    /// For a post-condition item, the other items in its version that are
    /// not closed yet. A minor version's patch sub-nodes count as part of it.
    /// Empty for ordinary items. Other post-condition items do not count.
    pub fn postcondition_blockers(&self, id: &IssueId) -> Result<Vec<String>> {
        let markers = self.postconditions(&id.version);
        let is_marked = |candidate: &IssueId| {
            markers.contains(&candidate.name) || markers.contains(&candidate.to_string())
        };
        if !is_marked(id) {
            return Ok(Vec::new());
        }

        let mut versions = vec![id.version];
        if id.version.minor.is_some() && id.version.patch.is_none() {
            versions.extend(self.child_versions(Some(&id.version))?);
        }
        let mut candidates = Vec::new();
        for version in &versions {
            candidates.extend(self.issues_in(version)?);
        }

        let mut blocking = Vec::new();
        for other in candidates {
            if other == *id || is_marked(&other) {
                continue;
            }
            let closed = self
                .load_issue(&other)
                .is_ok_and(|issue| issue.status == Status::Closed);
            if !closed {
                blocking.push(other.to_string());
            }
        }
        Ok(blocking)
    }

    /// A dependency chain that leads from `start` back to itself, if any.
    ///
    /// Only open dependencies are followed; a closed issue breaks the chain.
    /// The returned path begins and ends with `start`.
    pub fn dependency_cycle(&self, start: &IssueId) -> Option<Vec<IssueId>> {
        let mut path = vec![start.clone()];
        let mut explored = BTreeSet::new();
        self.cycle_from(start, start, &mut path, &mut explored)
            .then_some(path)
    }

    fn cycle_from(
        &self,
        start: &IssueId,
        current: &IssueId,
        path: &mut Vec<IssueId>,
        explored: &mut BTreeSet<IssueId>,
    ) -> bool {
        let Ok(issue) = self.load_issue(current) else {
            return false;
        };
        for dep in &issue.dependencies {
            if version_reference(dep).is_some() {
                continue;
            }
            let Some(dep_id) = self.resolve(dep, &current.version) else {
                continue;
            };
            if dep_id == *start {
                path.push(dep_id);
                return true;
            }
            if explored.contains(&dep_id) || path.contains(&dep_id) {
                continue;
            }
            let open = self
                .load_issue(&dep_id)
                .is_ok_and(|dep| dep.status != Status::Closed);
            if !open {
                continue;
            }
            path.push(dep_id.clone());
            if self.cycle_from(start, &dep_id, path, explored) {
                return true;
            }
            path.pop();
            explored.insert(dep_id);
        }
        false
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Rewrite the status line of an issue's STATE.md.
    ///
    /// Closing a decomposed parent requires every child to be closed already.
    /// The current status may be malformed; this is how it gets repaired.
    pub fn set_status(&self, id: &IssueId, status: Status) -> Result<Issue> {
        let node = id.node_path();
        let path = self.store.locate(&node).join(Document::State.file_name());
        let text = self
            .store
            .read_document(&node, Document::State)?
            .ok_or_else(|| Error::NotFound(format!("issue {id}")))?;

        if status == Status::Closed {
            let children = document::parse_decomposition(&text);
            let open: Vec<String> = children
                .iter()
                .filter(|child| !self.reference_satisfied(child, &id.version))
                .cloned()
                .collect();
            if !open.is_empty() {
                return Err(Error::Validation(format!(
                    "cannot close {id}: children not closed: {}",
                    open.join(", ")
                )));
            }
        }

        let updated = document::replace_status(&text, status)
            .ok_or_else(|| Error::status(&path, "missing status line"))?;
        self.store.write_document(&node, Document::State, &updated)?;
        info!(issue = %id, status = %status, "status updated");

        self.load_issue(id)
    }
}

/// A dependency naming a whole version (`2.0`, `v2`) rather than an issue.
fn version_reference(reference: &str) -> Option<Version> {
    Version::parse(reference.trim())
}

/// Render a dependency cycle as `a -> b -> a`.
pub fn format_cycle(cycle: &[IssueId]) -> String {
    cycle
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}
