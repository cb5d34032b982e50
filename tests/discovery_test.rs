//! Integration tests for next-issue discovery.

use issuelock::discovery::{DiscoveryEngine, DiscoveryOutcome, DiscoveryRequest};
use issuelock::lock::LockManager;
use issuelock::model::{IssueId, SearchScope, SessionId, Status, Version};
use issuelock::store::{FsStore, MemoryStore};
use issuelock::tree::IssueTree;

const OPEN: &str = "- **Status:** open\n";
const CLOSED: &str = "- **Status:** closed\n";

fn state(status: &str, deps: &[&str]) -> String {
    format!(
        "- **Status:** {status}\n- **Dependencies:** [{}]\n",
        deps.join(", ")
    )
}

struct Harness {
    _dir: tempfile::TempDir,
    engine: DiscoveryEngine<MemoryStore>,
}

impl Harness {
    fn new(store: MemoryStore) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let locks = LockManager::new(dir.path().join("locks"));
        Self {
            engine: DiscoveryEngine::new(IssueTree::new(store), locks),
            _dir: dir,
        }
    }

    fn next(&self, scope: SearchScope) -> DiscoveryOutcome {
        self.engine
            .next(&DiscoveryRequest::new(scope, SessionId::new()))
    }

    fn close(&self, id: &str) {
        self.engine
            .tree()
            .set_status(&id.parse().unwrap(), Status::Closed)
            .unwrap();
    }

    fn lock_elsewhere(&self, id: &str) {
        let outcome = self
            .engine
            .locks()
            .acquire(id, &SessionId::new(), None)
            .unwrap();
        assert!(outcome.is_acquired());
    }
}

fn minor(major: u32, minor: u32) -> SearchScope {
    SearchScope::Minor { major, minor }
}

fn issue(id: &str) -> SearchScope {
    SearchScope::Issue {
        id: id.parse().unwrap(),
    }
}

fn found_id(outcome: &DiscoveryOutcome) -> String {
    match outcome {
        DiscoveryOutcome::Found { id, .. } => id.to_string(),
        other => panic!("expected Found, got {other:?}"),
    }
}

fn assert_not_found(outcome: &DiscoveryOutcome) {
    assert!(
        matches!(outcome, DiscoveryOutcome::NotFound { .. }),
        "expected NotFound, got {outcome:?}"
    );
}

// ---------------------------------------------------------------------------
// Scoped search
// ---------------------------------------------------------------------------

#[test]
fn dependency_order_within_a_minor_version() {
    let h = Harness::new(
        MemoryStore::new()
            .with_state("v2/v2.1/x", &state("open", &[]))
            .with_state("v2/v2.1/y", &state("open", &["x"])),
    );

    assert_eq!(found_id(&h.next(minor(2, 1))), "2.1-x");

    h.close("2.1-x");
    assert_eq!(found_id(&h.next(minor(2, 1))), "2.1-y");
}

#[test]
fn found_issue_is_locked_for_the_session() {
    let h = Harness::new(MemoryStore::new().with_state("v1/v1.0/task", OPEN));
    let session = SessionId::new();

    let outcome = h
        .engine
        .next(&DiscoveryRequest::new(SearchScope::All, session));
    assert_eq!(found_id(&outcome), "1.0-task");

    let status = h.engine.locks().check("1.0-task").unwrap();
    assert_eq!(status.owner, Some(session.to_string()));
    assert_eq!(status.worktree.as_deref(), Some(".worktrees/1.0-task"));

    // A second session gets nothing.
    assert_not_found(&h.next(SearchScope::All));
}

#[test]
fn locked_candidates_are_passed_over() {
    let h = Harness::new(
        MemoryStore::new()
            .with_state("v1/v1.0/alpha", OPEN)
            .with_state("v1/v1.0/beta", OPEN),
    );
    h.lock_elsewhere("1.0-alpha");

    assert_eq!(found_id(&h.next(SearchScope::All)), "1.0-beta");
}

#[test]
fn versions_are_searched_in_numeric_order() {
    let h = Harness::new(
        MemoryStore::new()
            .with_state("v1/v1.10/late", OPEN)
            .with_state("v1/v1.9/early", OPEN)
            .with_state("v10/v10.0/much-later", OPEN),
    );

    assert_eq!(found_id(&h.next(SearchScope::All)), "1.9-early");
    assert_eq!(found_id(&h.next(SearchScope::All)), "1.10-late");
    assert_eq!(found_id(&h.next(SearchScope::All)), "10.0-much-later");
    assert_not_found(&h.next(SearchScope::All));
}

#[test]
fn major_level_issues_come_before_minor_versions() {
    let h = Harness::new(
        MemoryStore::new()
            .with_state("v3/v3.0/nested", OPEN)
            .with_state("v3/direct", OPEN),
    );

    let outcome = h.next(SearchScope::Major { major: 3 });
    assert_eq!(found_id(&outcome), "3-direct");
    assert_eq!(found_id(&h.next(SearchScope::Major { major: 3 })), "3.0-nested");
}

#[test]
fn minor_scope_includes_patch_versions() {
    let h = Harness::new(
        MemoryStore::new()
            .with_state("v1/v1.0/v1.0.1/hotfix", OPEN)
            .with_state("v1/v1.1/other", OPEN),
    );

    let outcome = h.next(minor(1, 0));
    assert_eq!(found_id(&outcome), "1.0.1-hotfix");
    match outcome {
        DiscoveryOutcome::Found { version, name, .. } => {
            assert_eq!(version, Version::patch(1, 0, 1));
            assert_eq!(name, "hotfix");
        }
        other => panic!("expected Found, got {other:?}"),
    }
    assert_not_found(&h.next(minor(1, 0)));
}

#[test]
fn never_hands_out_ineligible_issues() {
    let h = Harness::new(
        MemoryStore::new()
            .with_state("v1/v1.0/closed-one", CLOSED)
            .with_state("v1/v1.0/blocked-one", "- **Status:** blocked\n")
            .with_state("v1/v1.0/waiting", &state("open", &["ghost"]))
            .with_state("v1/v1.0/in-use", OPEN)
            .with_worktree("1.0-in-use"),
    );

    assert_not_found(&h.next(SearchScope::All));
}

#[test]
fn malformed_issue_does_not_abort_the_scan() {
    let h = Harness::new(
        MemoryStore::new()
            .with_state("v1/v1.0/aaa-broken", "- **Status:** someday\n")
            .with_state("v1/v1.0/bbb-missing-status", "# Notes only\n")
            .with_state("v1/v1.0/ccc-good", OPEN),
    );

    assert_eq!(found_id(&h.next(SearchScope::All)), "1.0-ccc-good");
}

#[test]
fn in_progress_issues_are_eligible() {
    let h = Harness::new(MemoryStore::new().with_state("v1/v1.0/resume", "- **Status:** active\n"));
    assert_eq!(found_id(&h.next(SearchScope::All)), "1.0-resume");
}

#[test]
fn exclude_pattern_counts_skips() {
    let h = Harness::new(
        MemoryStore::new()
            .with_state("v1/v1.0/alpha", OPEN)
            .with_state("v1/v1.0/beta", OPEN),
    );

    let request = DiscoveryRequest::new(SearchScope::All, SessionId::new()).exclude("al*");
    assert_eq!(found_id(&h.engine.next(&request)), "1.0-beta");

    let request = DiscoveryRequest::new(SearchScope::All, SessionId::new()).exclude("1.0-*");
    match h.engine.next(&request) {
        DiscoveryOutcome::NotFound {
            exclude_pattern,
            excluded_count,
            ..
        } => {
            assert_eq!(exclude_pattern.as_deref(), Some("1.0-*"));
            assert_eq!(excluded_count, 2);
        }
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[test]
fn invalid_exclude_pattern_is_an_error() {
    let h = Harness::new(MemoryStore::new().with_state("v1/v1.0/alpha", OPEN));
    let request = DiscoveryRequest::new(SearchScope::All, SessionId::new()).exclude("[");
    assert!(h.engine.next(&request).is_error());
}

#[test]
fn missing_version_scope_is_an_error() {
    let h = Harness::new(MemoryStore::new().with_state("v1/v1.0/alpha", OPEN));
    assert!(h.next(minor(4, 2)).is_error());
}

#[test]
fn empty_tree_is_an_error() {
    let h = Harness::new(MemoryStore::new());
    assert!(h.next(SearchScope::All).is_error());
}

// ---------------------------------------------------------------------------
// Decomposition
// ---------------------------------------------------------------------------

#[test]
fn decomposed_parent_waits_for_children() {
    let parent = "- **Status:** open\n\n## Decomposed Into\n- c1\n- c2\n";
    let h = Harness::new(
        MemoryStore::new()
            .with_state("v1/v1.0/parent", parent)
            .with_state("v1/v1.0/c1", OPEN)
            .with_state("v1/v1.0/c2", CLOSED),
    );

    assert_eq!(
        h.next(issue("1.0-parent")),
        DiscoveryOutcome::Decomposed {
            id: "1.0-parent".parse().unwrap(),
            open_children: vec!["c1".to_string()],
        }
    );

    h.close("1.0-c1");
    assert_eq!(found_id(&h.next(issue("1.0-parent"))), "1.0-parent");
}

#[test]
fn closed_parent_with_open_child_is_not_executable() {
    let h = Harness::new(
        MemoryStore::new()
            .with_state(
                "v1/v1.0/parent",
                "- **Status:** closed\n\n## Decomposed Into\n- kid\n",
            )
            .with_state("v1/v1.0/kid", OPEN),
    );

    match h.next(issue("1.0-parent")) {
        DiscoveryOutcome::NotExecutable { reason, .. } => {
            assert!(reason.contains("child 1.0-kid"), "reason: {reason}");
        }
        other => panic!("expected NotExecutable, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Version and post-condition gating
// ---------------------------------------------------------------------------

#[test]
fn postcondition_item_waits_for_the_rest_of_its_version() {
    let h = Harness::new(
        MemoryStore::new()
            .with_plan("v2/v2.1", "# Plan\n\n- [issue] final-release\n")
            .with_state("v2/v2.1/a-work", OPEN)
            .with_state("v2/v2.1/final-release", OPEN),
    );
    h.lock_elsewhere("2.1-a-work");

    assert_not_found(&h.next(minor(2, 1)));
    assert_eq!(
        h.next(issue("2.1-final-release")),
        DiscoveryOutcome::Blocked {
            id: "2.1-final-release".parse().unwrap(),
            blocking: vec!["2.1-a-work".to_string()],
        }
    );

    h.close("2.1-a-work");
    assert_eq!(found_id(&h.next(minor(2, 1))), "2.1-final-release");
}

#[test]
fn postcondition_item_waits_for_patch_versions() {
    let h = Harness::new(
        MemoryStore::new()
            .with_plan("v2/v2.1", "- [issue] final-release\n")
            .with_state("v2/v2.1/final-release", OPEN)
            .with_state("v2/v2.1/v2.1.1/hotfix", OPEN),
    );

    assert_eq!(
        h.next(issue("2.1-final-release")),
        DiscoveryOutcome::Blocked {
            id: "2.1-final-release".parse().unwrap(),
            blocking: vec!["2.1.1-hotfix".to_string()],
        }
    );

    h.close("2.1.1-hotfix");
    assert_eq!(found_id(&h.next(issue("2.1-final-release"))), "2.1-final-release");
}

#[test]
fn postcondition_override_allows_early_claim() {
    let h = Harness::new(
        MemoryStore::new()
            .with_plan("v2/v2.1", "- [issue] final-release\n")
            .with_state("v2/v2.1/a-work", OPEN)
            .with_state("v2/v2.1/final-release", OPEN),
    );

    let request = DiscoveryRequest::new(issue("2.1-final-release"), SessionId::new())
        .override_postconditions(true);
    assert_eq!(found_id(&h.engine.next(&request)), "2.1-final-release");
}

#[test]
fn version_dependencies_gate_the_whole_version() {
    let h = Harness::new(
        MemoryStore::new()
            .with_state("v2/v2.0/setup", OPEN)
            .with_state("v2/v2.1", "- **Dependencies:** [2.0]\n")
            .with_state("v2/v2.1/feature", OPEN),
    );
    h.lock_elsewhere("2.0-setup");

    assert_not_found(&h.next(SearchScope::All));
    assert_not_found(&h.next(minor(2, 1)));
    assert_eq!(
        h.next(issue("2.1-feature")),
        DiscoveryOutcome::Blocked {
            id: "2.1-feature".parse().unwrap(),
            blocking: vec!["2.0".to_string()],
        }
    );

    h.close("2.0-setup");
    assert_eq!(found_id(&h.next(SearchScope::All)), "2.1-feature");
}

#[test]
fn closed_version_status_satisfies_version_dependency() {
    let h = Harness::new(
        MemoryStore::new()
            .with_state("v1", CLOSED)
            .with_state("v1/v1.0/leftover", OPEN)
            .with_state("v2", "- **Dependencies:** [v1]\n")
            .with_state("v2/v2.0/next", OPEN),
    );

    assert_eq!(found_id(&h.next(SearchScope::Major { major: 2 })), "2.0-next");
}

// ---------------------------------------------------------------------------
// Single issue and bare name
// ---------------------------------------------------------------------------

#[test]
fn single_issue_outcomes() {
    let h = Harness::new(
        MemoryStore::new()
            .with_state("v1/v1.0/done", "- **Status:** completed\n")
            .with_state("v1/v1.0/parked", "- **Status:** blocked\n")
            .with_state("v1/v1.0/garbled", "- **Status:** ???\n")
            .with_state("v1/v1.0/needs", &state("open", &["1.0-parked"]))
            .with_state("v1/v1.0/taken", OPEN),
    );
    h.lock_elsewhere("1.0-taken");

    assert_eq!(
        h.next(issue("1.0-done")),
        DiscoveryOutcome::AlreadyComplete {
            id: "1.0-done".parse().unwrap()
        }
    );
    assert!(matches!(
        h.next(issue("1.0-parked")),
        DiscoveryOutcome::NotExecutable { .. }
    ));
    assert!(matches!(
        h.next(issue("1.0-garbled")),
        DiscoveryOutcome::NotExecutable { .. }
    ));
    assert_eq!(
        h.next(issue("1.0-needs")),
        DiscoveryOutcome::Blocked {
            id: "1.0-needs".parse().unwrap(),
            blocking: vec!["1.0-parked".to_string()],
        }
    );
    match h.next(issue("1.0-taken")) {
        DiscoveryOutcome::NotExecutable { reason, .. } => assert!(reason.contains("locked")),
        other => panic!("expected NotExecutable, got {other:?}"),
    }
    assert!(h.next(issue("1.0-nowhere")).is_error());
}

#[test]
fn single_issue_with_worktree_reports_it() {
    let h = Harness::new(
        MemoryStore::new()
            .with_state("v1/v1.0/busy", OPEN)
            .with_worktree("1.0-busy"),
    );

    match h.next(issue("1.0-busy")) {
        DiscoveryOutcome::ExistingWorktree { id, worktree, .. } => {
            assert_eq!(id.to_string(), "1.0-busy");
            assert!(worktree.ends_with("1.0-busy"));
        }
        other => panic!("expected ExistingWorktree, got {other:?}"),
    }
    assert!(!h.engine.locks().check("1.0-busy").unwrap().locked);
}

#[test]
fn dependency_cycle_is_reported() {
    let h = Harness::new(
        MemoryStore::new()
            .with_state("v1/v1.0/a", &state("open", &["b"]))
            .with_state("v1/v1.0/b", &state("open", &["1.0-a"])),
    );

    match h.next(issue("1.0-a")) {
        DiscoveryOutcome::Error { message } => {
            assert_eq!(message, "dependency cycle: 1.0-a -> 1.0-b -> 1.0-a");
        }
        other => panic!("expected Error, got {other:?}"),
    }
    assert_not_found(&h.next(SearchScope::All));
}

#[test]
fn bare_name_resolves_by_tree_walk() {
    let h = Harness::new(
        MemoryStore::new()
            .with_state("v1/v1.1/thing", OPEN)
            .with_state("v2/v2.0/thing", OPEN),
    );

    let outcome = h.next(SearchScope::BareName {
        name: "thing".to_string(),
    });
    assert_eq!(found_id(&outcome), "1.1-thing");

    let outcome = h.next(SearchScope::BareName {
        name: "unknown".to_string(),
    });
    assert!(outcome.is_error());
}

#[test]
fn outcomes_serialize_with_status_tag() {
    let h = Harness::new(MemoryStore::new().with_state("v2/v2.1/fix-bug", OPEN));

    let json = serde_json::to_value(h.next(minor(2, 1))).unwrap();
    assert_eq!(json["status"], "found");
    assert_eq!(json["id"], "2.1-fix-bug");
    assert_eq!(json["version"]["major"], 2);
    assert_eq!(json["version"]["minor"], 1);
    assert_eq!(json["name"], "fix-bug");
    assert_eq!(json["scope"]["kind"], "minor");

    let json = serde_json::to_value(h.next(minor(2, 1))).unwrap();
    assert_eq!(json["status"], "not_found");
    assert_eq!(json["excluded_count"], 0);
}

#[test]
fn prefixed_lock_blocks_unprefixed_claim() {
    let h = Harness::new(MemoryStore::new().with_state("v2/v2.1/x", OPEN));
    h.lock_elsewhere("v2.1-x");

    assert!(matches!(
        h.next(issue("2.1-x")),
        DiscoveryOutcome::NotExecutable { .. }
    ));
    assert_not_found(&h.next(minor(2, 1)));
}

#[test]
fn digit_led_name_falls_back_to_name_search() {
    let h = Harness::new(MemoryStore::new().with_state("v1/v1.0/3-way-merge", OPEN));

    let scope = SearchScope::from_target(Some("3-way-merge")).unwrap();
    assert!(matches!(scope, SearchScope::Issue { .. }));
    assert_eq!(found_id(&h.next(scope)), "1.0-3-way-merge");
}

#[test]
fn missing_qualified_issue_is_an_error() {
    let h = Harness::new(MemoryStore::new().with_state("v1/v1.0/alpha", OPEN));
    assert!(h.next(issue("1.0-ghost")).is_error());
}

// ---------------------------------------------------------------------------
// Real filesystem
// ---------------------------------------------------------------------------

#[test]
fn discovers_and_claims_on_disk() {
    let root = tempfile::tempdir().unwrap();
    let issue_dir = root.path().join("issues/v1/v1.0/task");
    std::fs::create_dir_all(&issue_dir).unwrap();
    std::fs::write(issue_dir.join("STATE.md"), "# Task\n\n- **Status:** pending\n").unwrap();

    let worktrees = root.path().join(".worktrees");
    let engine = DiscoveryEngine::new(
        IssueTree::new(FsStore::new(root.path(), &worktrees)),
        LockManager::new(root.path().join("locks")),
    );

    let outcome = engine.next(&DiscoveryRequest::new(SearchScope::All, SessionId::new()));
    match &outcome {
        DiscoveryOutcome::Found { path, worktree, .. } => {
            assert_eq!(path, &issue_dir);
            assert_eq!(worktree, &worktrees.join("1.0-task"));
        }
        other => panic!("expected Found, got {other:?}"),
    }
    assert!(root.path().join("locks/1.0-task.lock").is_file());

    std::fs::create_dir_all(worktrees.join("1.0-task")).unwrap();
    let id: IssueId = "1.0-task".parse().unwrap();
    let outcome = engine.next(&DiscoveryRequest::new(
        SearchScope::Issue { id },
        SessionId::new(),
    ));
    assert!(matches!(outcome, DiscoveryOutcome::ExistingWorktree { .. }));
}
