//! issuelock CLI: lock, release and discover issues from agent sessions.
//!
//! Every command prints one JSON document to stdout. Failures print
//! `{"status":"error",...}` to stderr and exit 1. Logs go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use issuelock::config::Config;
use issuelock::discovery::{DiscoveryEngine, DiscoveryOutcome, DiscoveryRequest};
use issuelock::error::Error;
use issuelock::lock::LockManager;
use issuelock::model::{IssueId, SearchScope, SessionId, Status};
use issuelock::store::FsStore;
use issuelock::telemetry::{TelemetryConfig, init_telemetry};
use issuelock::tree::IssueTree;
use serde::Serialize;
use serde_json::json;

#[derive(Parser)]
#[command(
    name = "issuelock",
    about = "Session locks and next-issue discovery over a versioned issue tree"
)]
struct Cli {
    /// Project root containing `issues/` (overrides ISSUELOCK_ROOT)
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Claim an issue for a session (exit 1 if another session holds it)
    Acquire {
        id: String,
        session: String,
        worktree: Option<String>,
    },
    /// Change the worktree recorded in a lock the session owns
    Update {
        id: String,
        session: String,
        worktree: String,
    },
    /// Release a lock the session owns
    Release { id: String, session: String },
    /// Remove a lock regardless of owner
    ForceRelease { id: String },
    /// Show whether an issue is locked
    Check { id: String },
    /// List all locks
    List {
        /// Only locks owned by this session
        #[arg(long)]
        session: Option<String>,
    },
    /// Find and claim the next eligible issue
    Next {
        session: String,
        /// Version (`2`, `2.1`), qualified id (`2.1-fix-bug`) or bare name
        target: Option<String>,
        /// Skip issues whose name or id matches this glob
        #[arg(long)]
        exclude: Option<String>,
        /// Ignore post-condition gating
        #[arg(long)]
        override_postconditions: bool,
    },
    /// Rewrite an issue's status
    SetStatus { id: String, status: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            let code = e.downcast_ref::<Error>().map_or("error", Error::code);
            eprintln!(
                "{}",
                json!({ "status": "error", "error": code, "message": format!("{e:#}") })
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = match cli.root {
        Some(root) => Config::for_root(root)?,
        None => Config::from_env()?,
    };
    let _guard = init_telemetry(TelemetryConfig::from_config(&config))?;
    let locks = LockManager::from_config(&config);

    match cli.command {
        Command::Acquire {
            id,
            session,
            worktree,
        } => {
            let session = SessionId::parse(&session)?;
            let outcome = locks.acquire(&id, &session, worktree.as_deref())?;
            emit(&outcome)?;
            Ok(exit_code(outcome.is_acquired()))
        }
        Command::Update {
            id,
            session,
            worktree,
        } => {
            let session = SessionId::parse(&session)?;
            let record = locks.update(&id, &session, &worktree)?;
            emit(&json!({
                "status": "updated",
                "id": id,
                "session_id": record.session_id,
                "worktree": record.worktree,
                "created_iso": record.created_iso,
            }))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Release { id, session } => {
            let session = SessionId::parse(&session)?;
            emit(&locks.release(&id, &session)?)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::ForceRelease { id } => {
            emit(&locks.force_release(&id)?)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Check { id } => {
            emit(&locks.check(&id)?)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::List { session } => {
            let listing = match session {
                Some(session) => locks.held_by(&SessionId::parse(&session)?)?,
                None => locks.list()?,
            };
            emit(&listing)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Next {
            session,
            target,
            exclude,
            override_postconditions,
        } => {
            let session = SessionId::parse(&session)?;
            let outcome = match SearchScope::from_target(target.as_deref()) {
                Ok(scope) => {
                    let mut request = DiscoveryRequest::new(scope, session)
                        .override_postconditions(override_postconditions);
                    if let Some(pattern) = exclude {
                        request = request.exclude(pattern);
                    }
                    let tree = IssueTree::from_config(FsStore::from_config(&config), &config);
                    DiscoveryEngine::new(tree, locks).next(&request)
                }
                Err(e) => DiscoveryOutcome::Error {
                    message: e.to_string(),
                },
            };
            emit(&outcome)?;
            Ok(exit_code(!outcome.is_error()))
        }
        Command::SetStatus { id, status } => {
            let id: IssueId = id.parse()?;
            let status: Status = status.parse().map_err(Error::Validation)?;
            let tree = IssueTree::from_config(FsStore::from_config(&config), &config);
            let issue = tree.set_status(&id, status)?;
            emit(&json!({
                "status": "status_updated",
                "id": issue.id,
                "new_status": issue.status,
                "path": issue.path,
            }))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn emit(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
