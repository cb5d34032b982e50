//! Next-issue discovery.
//!
//! A request names a [`SearchScope`]. Scoped searches walk the version tree
//! in numeric version order, issues by name within each version, and hand out
//! the first eligible issue whose lock the requesting session manages to
//! acquire. Every eligibility check before the lock is advisory; the lock is
//! the claim.
//!
//! Single-issue requests explain themselves instead: the outcome says why
//! the issue cannot run (complete, blocked, decomposed, locked elsewhere).

mod eligibility;

use std::path::PathBuf;
use std::time::Instant;

use opentelemetry::KeyValue;
use serde::Serialize;
use tracing::{Span, debug, info, warn};

use crate::error::{Error, Result};
use crate::lock::{AcquireOutcome, LockManager};
use crate::model::{Issue, IssueId, SearchScope, SessionId, Status, Version};
use crate::store::IssueStore;
use crate::telemetry::{metrics, spans};
use crate::tree::{IssueTree, format_cycle};

use eligibility::Verdict;

// ---------------------------------------------------------------------------
// Request and outcome
// ---------------------------------------------------------------------------

/// One "give me the next issue" call.
#[derive(Debug, Clone)]
pub struct DiscoveryRequest {
    pub scope: SearchScope,
    pub session: SessionId,
    /// Glob matched against each candidate's name and qualified id.
    pub exclude: Option<String>,
    /// Hand out post-condition items even while their version has open work.
    pub override_postconditions: bool,
}

impl DiscoveryRequest {
    pub fn new(scope: SearchScope, session: SessionId) -> Self {
        Self {
            scope,
            session,
            exclude: None,
            override_postconditions: false,
        }
    }

    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude = Some(pattern.into());
        self
    }

    pub fn override_postconditions(mut self, enabled: bool) -> Self {
        self.override_postconditions = enabled;
        self
    }
}

/// Every result a discovery call can produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DiscoveryOutcome {
    /// The issue is eligible and now locked by the requesting session.
    Found {
        id: IssueId,
        version: Version,
        name: String,
        path: PathBuf,
        /// Where the session should create its worktree.
        worktree: PathBuf,
        scope: SearchScope,
    },
    NotFound {
        scope: SearchScope,
        exclude_pattern: Option<String>,
        excluded_count: usize,
    },
    AlreadyComplete {
        id: IssueId,
    },
    /// Malformed status, a non-workable status, or locked by another session.
    NotExecutable {
        id: IssueId,
        reason: String,
    },
    Blocked {
        id: IssueId,
        blocking: Vec<String>,
    },
    Decomposed {
        id: IssueId,
        open_children: Vec<String>,
    },
    /// A worktree already exists for the issue, so someone is probably on it.
    ExistingWorktree {
        id: IssueId,
        version: Version,
        name: String,
        path: PathBuf,
        worktree: PathBuf,
    },
    Error {
        message: String,
    },
}

impl DiscoveryOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            DiscoveryOutcome::Found { .. } => "found",
            DiscoveryOutcome::NotFound { .. } => "not_found",
            DiscoveryOutcome::AlreadyComplete { .. } => "already_complete",
            DiscoveryOutcome::NotExecutable { .. } => "not_executable",
            DiscoveryOutcome::Blocked { .. } => "blocked",
            DiscoveryOutcome::Decomposed { .. } => "decomposed",
            DiscoveryOutcome::ExistingWorktree { .. } => "existing_worktree",
            DiscoveryOutcome::Error { .. } => "error",
        }
    }

    /// The issue the outcome is about, if it names one.
    pub fn issue_id(&self) -> Option<&IssueId> {
        match self {
            DiscoveryOutcome::Found { id, .. }
            | DiscoveryOutcome::AlreadyComplete { id }
            | DiscoveryOutcome::NotExecutable { id, .. }
            | DiscoveryOutcome::Blocked { id, .. }
            | DiscoveryOutcome::Decomposed { id, .. }
            | DiscoveryOutcome::ExistingWorktree { id, .. } => Some(id),
            DiscoveryOutcome::NotFound { .. } | DiscoveryOutcome::Error { .. } => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, DiscoveryOutcome::Error { .. })
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Selects and claims issues.
#[derive(Debug)]
pub struct DiscoveryEngine<S> {
    tree: IssueTree<S>,
    locks: LockManager,
}

/// Per-call state of a scoped search.
struct Scan<'a> {
    request: &'a DiscoveryRequest,
    exclude: Option<glob::Pattern>,
    excluded: usize,
}

impl<'a> Scan<'a> {
    fn new(request: &'a DiscoveryRequest) -> Result<Self> {
        let exclude = request
            .exclude
            .as_deref()
            .map(|pattern| {
                glob::Pattern::new(pattern).map_err(|e| {
                    Error::Validation(format!("invalid exclude pattern {pattern:?}: {e}"))
                })
            })
            .transpose()?;
        Ok(Self {
            request,
            exclude,
            excluded: 0,
        })
    }

    fn excludes(&self, id: &IssueId) -> bool {
        self.exclude
            .as_ref()
            .is_some_and(|p| p.matches(&id.name) || p.matches(&id.to_string()))
    }

    fn not_found(&self) -> DiscoveryOutcome {
        DiscoveryOutcome::NotFound {
            scope: self.request.scope.clone(),
            exclude_pattern: self.request.exclude.clone(),
            excluded_count: self.excluded,
        }
    }
}

impl<S: IssueStore> DiscoveryEngine<S> {
    pub fn new(tree: IssueTree<S>, locks: LockManager) -> Self {
        Self { tree, locks }
    }

    pub fn tree(&self) -> &IssueTree<S> {
        &self.tree
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Find and claim the next issue for `request.session`.
    ///
    /// Never fails: I/O problems and malformed requests come back as
    /// [`DiscoveryOutcome::Error`].
    pub fn next(&self, request: &DiscoveryRequest) -> DiscoveryOutcome {
        let started = Instant::now();
        let scope = request.scope.label();
        let span = spans::start_discovery_span(scope, &request.session.to_string());
        let _entered = span.enter();

        let outcome = match self.dispatch(request) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(scope = %request.scope, error = %e, "discovery failed");
                DiscoveryOutcome::Error {
                    message: e.to_string(),
                }
            }
        };

        let issue = outcome.issue_id().map(ToString::to_string);
        spans::record_discovery_outcome(&span, outcome.label(), issue.as_deref());
        metrics::discovery_outcomes().add(
            1,
            &[
                KeyValue::new("scope", scope),
                KeyValue::new("outcome", outcome.label()),
            ],
        );
        metrics::discovery_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("scope", scope)],
        );
        outcome
    }

    fn dispatch(&self, request: &DiscoveryRequest) -> Result<DiscoveryOutcome> {
        match &request.scope {
            SearchScope::All => self.scan(request, None),
            SearchScope::Major { major } => self.scan(request, Some(Version::major(*major))),
            SearchScope::Minor { major, minor } => {
                self.scan(request, Some(Version::minor(*major, *minor)))
            }
            SearchScope::Issue { id } if self.tree.is_issue(id) => self.next_issue(id, request),
            // Names like `3-way-merge` look qualified; try them as a bare name too.
            SearchScope::Issue { id } => self.next_named(&id.to_string(), request),
            SearchScope::BareName { name } => self.next_named(name, request),
        }
    }

    fn next_named(&self, name: &str, request: &DiscoveryRequest) -> Result<DiscoveryOutcome> {
        match self.tree.find_by_name(name) {
            Some(id) => {
                debug!(name, issue = %id, "resolved bare name");
                self.next_issue(&id, request)
            }
            None => Ok(DiscoveryOutcome::Error {
                message: format!("no issue named {name:?} found"),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Scoped search
    // -----------------------------------------------------------------------

    fn scan(&self, request: &DiscoveryRequest, root: Option<Version>) -> Result<DiscoveryOutcome> {
        let mut scan = Scan::new(request)?;

        let roots = match root {
            None => self.tree.child_versions(None)?,
            Some(version) => {
                if !self.tree.version_exists(&version) {
                    return Err(Error::NotFound(format!(
                        "version {} does not exist",
                        version.dir_name()
                    )));
                }
                let lineage = version.lineage();
                for ancestor in &lineage[..lineage.len() - 1] {
                    if self.version_gated(ancestor) {
                        return Ok(scan.not_found());
                    }
                }
                vec![version]
            }
        };

        for version in &roots {
            if let Some(outcome) = self.scan_version(version, &mut scan)? {
                return Ok(outcome);
            }
        }
        Ok(scan.not_found())
    }

    /// Issues placed directly in `version` first, then its sub-versions.
    fn scan_version(&self, version: &Version, scan: &mut Scan<'_>) -> Result<Option<DiscoveryOutcome>> {
        if self.version_gated(version) {
            return Ok(None);
        }

        let issues = match self.tree.issues_in(version) {
            Ok(issues) => issues,
            Err(e) => {
                warn!(version = %version, error = %e, "skipping unreadable version");
                return Ok(None);
            }
        };
        for id in &issues {
            if let Some(outcome) = self.try_candidate(id, scan)? {
                return Ok(Some(outcome));
            }
        }

        let children = match self.tree.child_versions(Some(version)) {
            Ok(children) => children,
            Err(e) => {
                warn!(version = %version, error = %e, "skipping unreadable version");
                return Ok(None);
            }
        };
        for child in &children {
            if let Some(outcome) = self.scan_version(child, scan)? {
                return Ok(Some(outcome));
            }
        }
        Ok(None)
    }

    fn version_gated(&self, version: &Version) -> bool {
        let blocking = self.tree.version_blockers(version);
        if blocking.is_empty() {
            return false;
        }
        debug!(version = %version, blocking = ?blocking, "version gated by dependencies");
        record_skip(&version.dir_name(), "version_gate");
        true
    }

    /// Check one candidate and try to claim it. `None` means keep looking.
    fn try_candidate(&self, id: &IssueId, scan: &mut Scan<'_>) -> Result<Option<DiscoveryOutcome>> {
        let label = id.to_string();
        if scan.excludes(id) {
            scan.excluded += 1;
            record_skip(&label, "excluded");
            return Ok(None);
        }

        let issue = match self.tree.load_issue(id) {
            Ok(issue) => issue,
            Err(e) => {
                warn!(issue = %id, error = %e, "skipping unreadable issue");
                record_skip(&label, "unreadable");
                return Ok(None);
            }
        };

        let verdict = eligibility::assess(&self.tree, &issue, scan.request.override_postconditions);
        if verdict != Verdict::Eligible {
            if matches!(verdict, Verdict::UnmetDependencies(_))
                && let Some(cycle) = self.tree.dependency_cycle(id)
            {
                warn!(issue = %id, cycle = %format_cycle(&cycle), "skipping issue in a dependency cycle");
            }
            record_skip(&label, verdict.reason());
            return Ok(None);
        }

        if self.tree.store().worktree_exists(id) {
            record_skip(&label, "existing_worktree");
            return Ok(None);
        }

        match self.claim(&issue, &scan.request.session) {
            Ok(AcquireOutcome::Acquired { .. }) => {
                info!(issue = %id, session = %scan.request.session, "issue claimed");
                Ok(Some(self.found(&issue, &scan.request.scope)))
            }
            Ok(AcquireOutcome::Locked { owner, .. }) => {
                debug!(issue = %id, owner = %owner, "candidate locked by another session");
                record_skip(&label, "locked");
                Ok(None)
            }
            Err(e @ Error::CorruptLock { .. }) => {
                warn!(issue = %id, error = %e, "skipping issue with a corrupt lock file");
                record_skip(&label, "corrupt_lock");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    // -----------------------------------------------------------------------
    // Single issue
    // -----------------------------------------------------------------------

    fn next_issue(&self, id: &IssueId, request: &DiscoveryRequest) -> Result<DiscoveryOutcome> {
        let issue = match self.tree.load_issue(id) {
            Ok(issue) => issue,
            Err(Error::NotFound(_)) => {
                return Ok(DiscoveryOutcome::Error {
                    message: format!("issue {id} not found"),
                });
            }
            Err(e @ Error::Status { .. }) => {
                return Ok(DiscoveryOutcome::NotExecutable {
                    id: id.clone(),
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        };

        if issue.status == Status::Closed {
            return Ok(DiscoveryOutcome::AlreadyComplete { id: id.clone() });
        }

        let mut blocking: Vec<String> = id
            .version
            .lineage()
            .iter()
            .flat_map(|version| self.tree.version_blockers(version))
            .collect();

        match eligibility::assess(&self.tree, &issue, request.override_postconditions) {
            Verdict::Eligible => {}
            Verdict::NotWorkable(status) => {
                return Ok(DiscoveryOutcome::NotExecutable {
                    id: id.clone(),
                    reason: format!("status is {status}"),
                });
            }
            Verdict::OpenChildren(open_children) => {
                return Ok(DiscoveryOutcome::Decomposed {
                    id: id.clone(),
                    open_children,
                });
            }
            Verdict::UnmetDependencies(unmet) | Verdict::PostCondition(unmet) => {
                blocking.extend(unmet);
            }
        }

        if !blocking.is_empty() {
            if let Some(cycle) = self.tree.dependency_cycle(id) {
                return Ok(DiscoveryOutcome::Error {
                    message: format!("dependency cycle: {}", format_cycle(&cycle)),
                });
            }
            return Ok(DiscoveryOutcome::Blocked {
                id: id.clone(),
                blocking,
            });
        }

        if self.tree.store().worktree_exists(id) {
            return Ok(DiscoveryOutcome::ExistingWorktree {
                id: id.clone(),
                version: id.version,
                name: id.name.clone(),
                path: issue.path.clone(),
                worktree: self.tree.store().worktree_path(id),
            });
        }

        match self.claim(&issue, &request.session)? {
            AcquireOutcome::Acquired { .. } => {
                info!(issue = %id, session = %request.session, "issue claimed");
                Ok(self.found(&issue, &request.scope))
            }
            AcquireOutcome::Locked { owner, .. } => Ok(DiscoveryOutcome::NotExecutable {
                id: id.clone(),
                reason: format!("locked by session {owner}"),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Claiming
    // -----------------------------------------------------------------------

    fn claim(&self, issue: &Issue, session: &SessionId) -> Result<AcquireOutcome> {
        let worktree = self.tree.store().worktree_path(&issue.id);
        self.locks.acquire(
            &issue.id.to_string(),
            session,
            Some(&worktree.display().to_string()),
        )
    }

    fn found(&self, issue: &Issue, scope: &SearchScope) -> DiscoveryOutcome {
        DiscoveryOutcome::Found {
            id: issue.id.clone(),
            version: issue.id.version,
            name: issue.id.name.clone(),
            path: issue.path.clone(),
            worktree: self.tree.store().worktree_path(&issue.id),
            scope: scope.clone(),
        }
    }
}

fn record_skip(candidate: &str, reason: &'static str) {
    spans::record_skip(&Span::current(), candidate, reason);
    metrics::discovery_skipped().add(1, &[KeyValue::new("reason", reason)]);
}
