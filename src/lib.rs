//! # issuelock
//!
//! Coordination for agent sessions that pull work from a shared,
//! version-organized issue tree on disk.
//!
//! Provides session-scoped lock files with atomic no-clobber creation
//! ([`lock`]), the issue tree and its dependency rules ([`tree`]), and
//! next-issue discovery that claims what it finds ([`discovery`]).

pub mod config;
pub mod discovery;
pub mod document;
pub mod error;
pub mod lock;
pub mod model;
pub mod store;
pub mod telemetry;
pub mod tree;
