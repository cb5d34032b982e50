//! Span helpers for lock operations and discovery requests.
//!
//! Outcome fields are declared empty at creation and filled in once the
//! operation settles.

use tracing::Span;

/// Start a span for one lock operation on `id`.
pub fn start_lock_span(operation: &str, id: &str) -> Span {
    tracing::info_span!(
        "lock.operation",
        "lock.operation" = operation,
        "lock.id" = id,
        "lock.outcome" = tracing::field::Empty,
    )
}

pub fn record_lock_outcome(span: &Span, outcome: &str) {
    span.record("lock.outcome", outcome);
}

/// Start a span for one discovery request.
pub fn start_discovery_span(scope: &str, session: &str) -> Span {
    tracing::info_span!(
        "discovery.next",
        "discovery.scope" = scope,
        "discovery.session" = session,
        "discovery.outcome" = tracing::field::Empty,
        "discovery.issue" = tracing::field::Empty,
    )
}

/// Record the settled outcome, and the chosen issue if there is one.
pub fn record_discovery_outcome(span: &Span, outcome: &str, issue: Option<&str>) {
    span.record("discovery.outcome", outcome);
    if let Some(issue) = issue {
        span.record("discovery.issue", issue);
    }
}

/// Emit a debug event explaining why a candidate was passed over.
pub fn record_skip(span: &Span, issue: &str, reason: &str) {
    span.in_scope(|| {
        tracing::debug!(issue, reason, "candidate skipped");
    });
}
