//! # Orchestrator
//!
//! A **declarative pipeline orchestrator**: you describe a pipeline as
//! data -- blocks of scripts, ordered by serial, each carrying a parameter
//! context -- and this crate expands that description into a flat plan of
//! work units, links each one to its upstream producers, and drives a
//! bounded-parallelism worker pool that runs them through an external
//! script runner, one serial at a time.
//!
//! ## Key concepts
//!
//! - **Context** ([`context`]) -- a parameter map whose values may be
//!   scalars, lists, or numeric ranges; [`context::flatten`] expands one
//!   into every concrete assignment it denotes.
//! - **Document** ([`document`]) -- the on-disk (JSON or YAML) shape a
//!   pipeline is authored in, normalized to one internal representation
//!   regardless of which of the two accepted script shapes it uses.
//! - **Executable** ([`executable`]) -- a materialized (script, flattened
//!   context) pair pinned to a block; the atom the scheduler dispatches.
//! - **Planner** ([`planner`]) -- expands a document into a deduplicated,
//!   linked [`planner::Plan`].
//! - **Ingest protocol** ([`ingest`]) -- the file-backed rendezvous that
//!   lets logically isolated workers hand data to each other without
//!   shared memory.
//! - **Scheduler** ([`scheduler`]) -- runs a plan's executables serial by
//!   serial, barriering on each serial's completion.
//!
//! ## Quick start
//!
//! ```no_run
//! use cue_orchestrator::document;
//! use cue_orchestrator::planner;
//! use cue_orchestrator::context::PairingMode;
//! use cue_orchestrator::scheduler::{RunConfig, Scheduler};
//! use cue_orchestrator::runner::ProcessRunner;
//! # use anyhow::Result;
//!
//! # fn main() -> Result<()> {
//! let doc = document::read_pipeline_doc("pipeline.yaml")?;
//! let plan = planner::plan(&doc, PairingMode::default())?;
//!
//! let config = RunConfig::default();
//! let runner = ProcessRunner;
//! let scheduler = Scheduler::new(&plan, &config, &runner, &doc.script_directory);
//! let report = scheduler.run()?;
//! assert!(report.is_success());
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod document;
pub mod error;
pub mod executable;
pub mod ingest;
pub mod planner;
pub mod runner;
pub mod scheduler;

pub use context::{Context, FlatContext, PairingMode};
pub use document::{read_pipeline_doc, BlockDoc, PipelineDoc, ScriptDoc};
pub use error::OrchestratorError;
pub use executable::{Executable, ExecutableId, Pipe};
pub use planner::Plan;
pub use runner::{ProcessRunner, ScriptRunner};
pub use scheduler::{RunConfig, RunReport, Scheduler};

use anyhow::Result;
use std::path::Path;

/// Facade tying document reading, planning, scheduling, and scratch-state
/// cleanup together, mirroring the shape of the original tool's own
/// `read().queue_tasks().run()` builder chain.
pub struct Orchestrator {
    config: RunConfig,
}

impl Orchestrator {
    #[must_use]
    pub fn new(config: RunConfig) -> Self {
        Self { config }
    }

    /// Read and plan the document at `path`.
    ///
    /// # Errors
    ///
    /// Propagates document-reading and planning failures.
    pub fn read(&self, path: impl AsRef<Path>) -> Result<(PipelineDoc, Plan)> {
        let doc = document::read_pipeline_doc(path)?;
        let mode = PairingMode { lenient: self.config.lenient_pairing };
        let plan = planner::plan(&doc, mode)?;
        Ok((doc, plan))
    }

    /// Run a planned document to completion against `runner`.
    ///
    /// # Errors
    ///
    /// Propagates pool-construction failures; per-executable failures are
    /// reported in [`RunReport::failures`] rather than returned as an error.
    pub fn run(&self, doc: &PipelineDoc, plan: &Plan, runner: &dyn ScriptRunner) -> Result<RunReport> {
        Scheduler::new(plan, &self.config, runner, &doc.script_directory).run()
    }

    /// Remove all scratch state (ingest directories and in/out files) under
    /// the configured scratch root.
    ///
    /// # Errors
    ///
    /// Propagates filesystem errors; a missing scratch root is not an error.
    pub fn clean(&self) -> Result<()> {
        ingest::clean(&self.config.scratch_root)
    }
}
