//! Per-issue gating shared by tree scans and single-issue requests.

use crate::model::{Issue, Status};
use crate::store::IssueStore;
use crate::tree::IssueTree;

/// Why an issue can or cannot be handed out, checked in this order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Verdict {
    Eligible,
    NotWorkable(Status),
    OpenChildren(Vec<String>),
    UnmetDependencies(Vec<String>),
    PostCondition(Vec<String>),
}

impl Verdict {
    /// Metric label for a skipped candidate.
    pub(crate) fn reason(&self) -> &'static str {
        match self {
            Verdict::Eligible => "eligible",
            Verdict::NotWorkable(_) => "status",
            Verdict::OpenChildren(_) => "decomposed",
            Verdict::UnmetDependencies(_) => "dependencies",
            Verdict::PostCondition(_) => "postcondition",
        }
    }
}

/// Status, decomposition, dependency and post-condition checks.
/// Version gates and worktree presence are checked by the caller.
pub(crate) fn assess<S: IssueStore>(
    tree: &IssueTree<S>,
    issue: &Issue,
    override_postconditions: bool,
) -> Verdict {
    if !issue.status.is_workable() {
        return Verdict::NotWorkable(issue.status);
    }

    if issue.is_decomposed() {
        let open = tree.open_children(issue);
        if !open.is_empty() {
            return Verdict::OpenChildren(open);
        }
    }

    let unmet = tree.unmet_dependencies(issue);
    if !unmet.is_empty() {
        return Verdict::UnmetDependencies(unmet);
    }

    if !override_postconditions {
        let blocking = match tree.postcondition_blockers(&issue.id) {
            Ok(blocking) => blocking,
            Err(e) => vec![format!("{}: {e}", issue.id.version.dir_name())],
        };
        if !blocking.is_empty() {
            return Verdict::PostCondition(blocking);
        }
    }

    Verdict::Eligible
}
