//! Serial-barrier scheduling over a bounded-parallelism worker pool.
//!
//! Executables group by `block_serial`; the scheduler runs one serial's
//! group to completion -- successfully or by timeout, never both blocking
//! the other -- before starting the next. Within a serial, dispatch to the
//! pool is unordered: the external script must be position-independent
//! against its same-serial peers.

use anyhow::Result;
use rayon::prelude::*;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::error::OrchestratorError;
use crate::executable::Executable;
use crate::ingest::{self, FilePipe, InputPacket};
use crate::planner::Plan;
use crate::runner::ScriptRunner;

/// Run-time configuration threaded from the CLI into the scheduler.
///
/// Defaults mirror the original tool's own: 20 poll attempts, a tenth of a
/// second between them, a CPU-derived worker count, starting at serial 0,
/// scratch state under `./.orchestrator_temp/`.
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub n_times_before_timeout: u32,
    pub wait_time_between_tries: f64,
    pub max_processes: usize,
    pub from_serial: i64,
    pub scratch_root: PathBuf,
    pub verbose: bool,
    pub lenient_pairing: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            n_times_before_timeout: 20,
            wait_time_between_tries: 0.1,
            max_processes: num_cpus::get().max(1),
            from_serial: 0,
            scratch_root: PathBuf::from("./.orchestrator_temp/"),
            verbose: false,
            lenient_pairing: false,
        }
    }
}

/// Outcome of running one executable.
///
/// `TimedOut` and `Failed` are kept distinct: the former is the wait-for-
/// upstream loop being exhausted (spec's `UpstreamTimeout`), the latter is
/// everything else that can go wrong in a worker (a non-zero-exit
/// `RunnerError`, or an ingest/out-file I/O error) -- its `anyhow` chain is
/// surfaced at the point it's caught rather than discarded.
enum WorkerOutcome {
    Success,
    TimedOut { canonical: String },
    Failed { canonical: String },
}

/// Summary of a complete run: wall-clock duration and the canonical strings
/// of any executables that cascaded or timed out.
#[derive(Debug)]
pub struct RunReport {
    pub elapsed: Duration,
    pub failures: Vec<String>,
}

impl RunReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Drives a [`Plan`] to completion against a [`ScriptRunner`].
pub struct Scheduler<'a> {
    plan: &'a Plan,
    config: &'a RunConfig,
    runner: &'a dyn ScriptRunner,
    script_directory: &'a str,
}

impl<'a> Scheduler<'a> {
    #[must_use]
    pub fn new(plan: &'a Plan, config: &'a RunConfig, runner: &'a dyn ScriptRunner, script_directory: &'a str) -> Self {
        Self { plan, config, runner, script_directory }
    }

    /// Run every serial from `config.from_serial` onward, in ascending
    /// order, barriered so no executable at serial `s' > s` starts before
    /// every executable at `s` has finished (successfully or by timeout).
    ///
    /// # Errors
    ///
    /// Returns an error only if the pool itself cannot be built; individual
    /// script/runner failures are reported in [`RunReport::failures`]
    /// instead of aborting the run.
    pub fn run(&self) -> Result<RunReport> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.max_processes)
            .build()?;

        let started = Instant::now();
        let mut failures = Vec::new();

        for &serial in &self.plan.serials {
            if serial < self.config.from_serial {
                continue;
            }
            let units = self.plan.executables_at(serial);
            if self.config.verbose {
                println!("serial {serial}: dispatching {} unit(s)", units.len());
            }

            let serial_started = Instant::now();
            let outcomes: Vec<WorkerOutcome> =
                pool.install(|| units.par_iter().map(|e| self.run_one(e)).collect());

            for outcome in outcomes {
                match outcome {
                    WorkerOutcome::Success => {}
                    WorkerOutcome::TimedOut { canonical } => {
                        eprintln!("{}", OrchestratorError::UpstreamTimeout { canonical: canonical.clone() });
                        failures.push(canonical);
                    }
                    WorkerOutcome::Failed { canonical } => {
                        // The underlying anyhow chain was already surfaced in
                        // `run_one` when it was still in scope.
                        failures.push(canonical);
                    }
                }
            }

            if self.config.verbose {
                println!(
                    "serial {serial}: finished in {:.3}s",
                    serial_started.elapsed().as_secs_f64()
                );
            }
        }

        let elapsed = started.elapsed();
        if self.config.verbose {
            println!("run finished in {:.3}s", elapsed.as_secs_f64());
        }

        Ok(RunReport { elapsed, failures })
    }

    fn run_one(&self, exe: &Executable) -> WorkerOutcome {
        match self.run_one_inner(exe) {
            Ok(()) => WorkerOutcome::Success,
            Err(e) => match e.downcast_ref::<OrchestratorError>() {
                Some(OrchestratorError::UpstreamTimeout { canonical }) => {
                    WorkerOutcome::TimedOut { canonical: canonical.clone() }
                }
                _ => {
                    eprintln!("{e:#}");
                    WorkerOutcome::Failed { canonical: exe.canonical_string() }
                }
            },
        }
    }

    fn run_one_inner(&self, exe: &Executable) -> Result<()> {
        let dir = ingest::ensure_ingest_dir(&self.config.scratch_root, &exe.hash)?;
        let file_pipe = FilePipe::new(&self.config.scratch_root, &exe.hash);

        let outcome = ingest::wait_for_upstream(
            &dir,
            exe.pipes_in,
            &file_pipe.in_path,
            self.config.n_times_before_timeout,
            self.config.wait_time_between_tries,
        )?;
        if outcome == ingest::WaitOutcome::TimedOut {
            return Err(OrchestratorError::UpstreamTimeout {
                canonical: exe.canonical_string(),
            }
            .into());
        }

        let data = ingest::read_ingest_data(&dir)?;
        let packet = InputPacket {
            script_directory: self.script_directory.to_string(),
            script_path: exe.import_path.clone(),
            params: exe.context.clone(),
            data,
        };
        ingest::write_input_packet(&file_pipe.in_path, &packet)?;

        self.runner
            .run(self.script_directory, &exe.import_path, &file_pipe.in_path, &file_pipe.out_path)?;
        let output = file_pipe.read_out()?;

        for downstream_id in &exe.outgoing {
            let downstream = &self.plan.executables[downstream_id.index()];
            let downstream_dir = ingest::ingest_dir(&self.config.scratch_root, &downstream.hash);
            ingest::transfer(&output, &downstream_dir, &exe.hash)?;
        }

        if self.config.verbose {
            println!("ran {}", exe.canonical_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Context, PairingMode};
    use crate::document::{BlockDoc, PipelineDoc, ScriptDoc};
    use crate::planner;
    use crate::runner::ProcessRunner;
    use tempfile::tempdir;

    struct EchoRunner;
    impl ScriptRunner for EchoRunner {
        fn run(&self, _dir: &str, _path: &str, in_path: &std::path::Path, out_path: &std::path::Path) -> Result<()> {
            let contents = std::fs::read_to_string(in_path)?;
            std::fs::write(out_path, contents)?;
            Ok(())
        }
    }

    fn doc() -> PipelineDoc {
        PipelineDoc {
            name: "p".into(),
            version: "1".into(),
            script_directory: "/scripts".into(),
            context: Context::new(),
            blocks: vec![BlockDoc {
                name: "b".into(),
                serial: 0,
                description: String::new(),
                context: Context::new(),
                scripts: vec![ScriptDoc {
                    producer_tag: "out".into(),
                    import_path: "x".into(),
                    takes: None,
                    context: Context::new(),
                }],
            }],
        }
    }

    #[test]
    fn single_source_run_reports_no_failures() {
        let doc = doc();
        let plan = planner::plan(&doc, PairingMode::default()).unwrap();
        let scratch = tempdir().unwrap();
        let config = RunConfig {
            scratch_root: scratch.path().to_path_buf(),
            max_processes: 1,
            ..RunConfig::default()
        };
        let runner = EchoRunner;
        let scheduler = Scheduler::new(&plan, &config, &runner, &doc.script_directory);
        let report = scheduler.run().unwrap();
        assert!(report.is_success());
    }

    struct FailingRunner;
    impl ScriptRunner for FailingRunner {
        fn run(&self, _dir: &str, _path: &str, _in_path: &std::path::Path, _out_path: &std::path::Path) -> Result<()> {
            anyhow::bail!("script blew up")
        }
    }

    #[test]
    fn runner_error_is_reported_distinctly_from_upstream_timeout() {
        let doc = doc();
        let plan = planner::plan(&doc, PairingMode::default()).unwrap();
        let scratch = tempdir().unwrap();
        let config = RunConfig {
            scratch_root: scratch.path().to_path_buf(),
            max_processes: 1,
            ..RunConfig::default()
        };
        let runner = FailingRunner;
        let scheduler = Scheduler::new(&plan, &config, &runner, &doc.script_directory);

        // A genuine RunnerError must not be collapsed into WorkerOutcome::TimedOut.
        let outcome = scheduler.run_one(&plan.executables[0]);
        assert!(matches!(outcome, WorkerOutcome::Failed { .. }));

        let report = scheduler.run().unwrap();
        assert_eq!(report.failures.len(), 1);
    }

    #[test]
    fn upstream_timeout_downcasts_to_orchestrator_error() {
        let doc = doc();
        let mut plan = planner::plan(&doc, PairingMode::default()).unwrap();
        plan.executables[0].pipes_in = 1;
        let scratch = tempdir().unwrap();
        let config = RunConfig {
            scratch_root: scratch.path().to_path_buf(),
            max_processes: 1,
            n_times_before_timeout: 2,
            wait_time_between_tries: 0.001,
            ..RunConfig::default()
        };
        let runner = ProcessRunner;
        let scheduler = Scheduler::new(&plan, &config, &runner, &doc.script_directory);

        let outcome = scheduler.run_one(&plan.executables[0]);
        assert!(matches!(outcome, WorkerOutcome::TimedOut { .. }));
    }

    #[test]
    fn timeout_is_reported_without_aborting_run() {
        let doc = doc();
        let mut plan = planner::plan(&doc, PairingMode::default()).unwrap();
        // Force a wait by pretending this source script has an upstream.
        plan.executables[0].pipes_in = 1;
        let scratch = tempdir().unwrap();
        let config = RunConfig {
            scratch_root: scratch.path().to_path_buf(),
            max_processes: 1,
            n_times_before_timeout: 2,
            wait_time_between_tries: 0.001,
            ..RunConfig::default()
        };
        let runner = ProcessRunner;
        let scheduler = Scheduler::new(&plan, &config, &runner, &doc.script_directory);
        let report = scheduler.run().unwrap();
        assert_eq!(report.failures.len(), 1);
    }
}
