//! The external script runner collaborator.
//!
//! The core never interprets a script's body; it resolves `script_path`
//! under `script_directory` and hands off a `(input_packet, out_path)` pair,
//! trusting the runner to write the textual result to `out_path`. The
//! [`ScriptRunner`] trait is the seam between the scheduler and whatever
//! actually executes a script; [`ProcessRunner`] is the production
//! implementation, invoking the resolved path as a child process the way
//! the original tool's own run-handler does (`-i <in> -o <out>`).

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::OrchestratorError;

/// Given an already-written in-file and a target out-file, run one script
/// to completion and leave its textual output behind at `out_path`.
pub trait ScriptRunner: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the script cannot be resolved or invoked, or
    /// terminates with a failure status.
    fn run(&self, script_directory: &str, script_path: &str, in_path: &Path, out_path: &Path) -> Result<()>;
}

/// Resolves `script_path` under `script_directory` and invokes it as a
/// child process with `-i <in_path> -o <out_path>`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessRunner;

impl ScriptRunner for ProcessRunner {
    fn run(&self, script_directory: &str, script_path: &str, in_path: &Path, out_path: &Path) -> Result<()> {
        let resolved: PathBuf = Path::new(script_directory).join(script_path);

        let status = Command::new(&resolved)
            .arg("-i")
            .arg(in_path)
            .arg("-o")
            .arg(out_path)
            .status()
            .with_context(|| format!("invoking script {}", resolved.display()))?;

        if !status.success() {
            return Err(OrchestratorError::Runner(format!(
                "script {} exited with {status}",
                resolved.display()
            ))
            .into());
        }

        // A script that produced no data leaves out_path absent; the
        // contract is an empty string, not a missing file.
        if !out_path.exists() {
            std::fs::write(out_path, "")
                .with_context(|| format!("creating empty output {}", out_path.display()))?;
        }

        Ok(())
    }
}
