//! Metric instrument factories.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without an OTLP endpoint the global provider is a no-op, so recording
//! is always safe.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("issuelock")
}

/// Counter: lock operations.
/// Labels: `operation` ("acquire" | "update" | "release" | "force_release"), `outcome`.
pub fn lock_operations() -> Counter<u64> {
    meter()
        .u64_counter("issuelock.lock.operations")
        .with_description("Number of lock operations by outcome")
        .build()
}

/// Counter: discovery results.
/// Labels: `scope` ("all" | "major" | "minor" | "issue" | "bare_name"), `outcome`.
pub fn discovery_outcomes() -> Counter<u64> {
    meter()
        .u64_counter("issuelock.discovery.outcomes")
        .with_description("Number of discovery requests by outcome")
        .build()
}

/// Counter: candidates passed over during a scan.
/// Labels: `reason`.
pub fn discovery_skipped() -> Counter<u64> {
    meter()
        .u64_counter("issuelock.discovery.skipped")
        .with_description("Candidate issues skipped during discovery")
        .build()
}

/// Histogram: discovery duration in milliseconds.
/// Labels: `scope`.
pub fn discovery_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("issuelock.discovery.duration_ms")
        .with_description("Discovery duration in milliseconds")
        .with_unit("ms")
        .build()
}
