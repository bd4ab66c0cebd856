//! Structured error kinds for the orchestrator library boundary.
//!
//! Internal aggregation (reading a document, building a plan, running a
//! schedule) uses `anyhow::Result` so intermediate steps can freely attach
//! `.context(...)`. At the points callers actually branch on *what kind* of
//! failure occurred -- the CLI's exit-code mapping, a caller retrying only on
//! `RunnerError` -- we hand back one of the variants below instead of an
//! opaque string.

use std::fmt;

/// The four error kinds the orchestrator distinguishes.
///
/// Exit codes (CLI): `UsageError` -> 2, everything else -> 1 (0 on success).
#[derive(Debug)]
pub enum OrchestratorError {
    /// Bad CLI invocation or a reference to an unknown `definitions` entry.
    Usage(String),
    /// A plan-time failure: missing required field, unresolved `takes` tag,
    /// missing `definitions` entry, or (with strict pairing) an arity mismatch.
    Plan(String),
    /// The wait-for-upstream loop was exhausted before every expected input
    /// file appeared in an executable's ingest directory.
    UpstreamTimeout {
        /// The canonical string of the executable that timed out.
        canonical: String,
    },
    /// The external script runner returned a failure for an executable.
    Runner(String),
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usage(msg) => write!(f, "usage error: {msg}"),
            Self::Plan(msg) => write!(f, "plan error: {msg}"),
            Self::UpstreamTimeout { canonical } => {
                write!(f, "failed script:\n{canonical}")
            }
            Self::Runner(msg) => write!(f, "runner error: {msg}"),
        }
    }
}

impl std::error::Error for OrchestratorError {}

impl OrchestratorError {
    /// The process exit code this error kind maps to on the CLI.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => 2,
            Self::Plan(_) | Self::UpstreamTimeout { .. } | Self::Runner(_) => 1,
        }
    }
}
