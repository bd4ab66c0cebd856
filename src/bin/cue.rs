//! Command-line front end for the orchestrator.
//!
//! Flag surface and exit codes match the original tool's own CLI: `-i` the
//! input document, `-n`/`-w` timeout-poll tuning, `-p` worker count, `-f`
//! start-from serial, `-d` scratch directory, `-v` verbose, `--clean` purge
//! scratch state and exit. No argument-parsing crate is pulled in for this
//! -- nothing in this corpus reaches for one, so the flags are parsed by
//! hand, getopt-style.

use std::path::PathBuf;
use std::process::ExitCode;

use cue_orchestrator::error::OrchestratorError;
use cue_orchestrator::runner::ProcessRunner;
use cue_orchestrator::scheduler::RunConfig;
use cue_orchestrator::Orchestrator;

const USAGE: &str = "\
Usage: cue -i <document> [options]

Options:
  -i <path>   Input pipeline document (JSON or YAML). Required unless --clean.
  -n <count>  Poll attempts before declaring an upstream wait timed out (default 20).
  -w <secs>   Wait time between upstream polls, in seconds (default 0.1).
  -p <count>  Maximum parallel workers (default: number of CPUs).
  -f <serial> Start scheduling from this serial (inclusive; default 0).
  -d <dir>    Scratch directory root (default ./.orchestrator_temp/).
  -v          Verbose progress output.
  --clean     Remove the scratch directory and exit.
  -h, --help  Show this message.";

struct Cli {
    input: Option<PathBuf>,
    n_times_before_timeout: Option<u32>,
    wait_time_between_tries: Option<f64>,
    max_processes: Option<usize>,
    from_serial: Option<i64>,
    scratch_dir: Option<PathBuf>,
    verbose: bool,
    clean: bool,
    help: bool,
}

fn parse_args(args: &[String]) -> Result<Cli, OrchestratorError> {
    let mut cli = Cli {
        input: None,
        n_times_before_timeout: None,
        wait_time_between_tries: None,
        max_processes: None,
        from_serial: None,
        scratch_dir: None,
        verbose: false,
        clean: false,
        help: false,
    };

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let mut take_value = |flag: &str| -> Result<String, OrchestratorError> {
            iter.next()
                .cloned()
                .ok_or_else(|| OrchestratorError::Usage(format!("{flag} requires a value")))
        };

        match arg.as_str() {
            "-i" | "--input" => cli.input = Some(PathBuf::from(take_value("-i")?)),
            "-n" | "--n_times_before_timeout" => {
                let v = take_value("-n")?;
                cli.n_times_before_timeout =
                    Some(v.parse().map_err(|_| OrchestratorError::Usage(format!("-n expects an integer, got {v:?}")))?);
            }
            "-w" | "--wait_time_between_tries" => {
                let v = take_value("-w")?;
                cli.wait_time_between_tries =
                    Some(v.parse().map_err(|_| OrchestratorError::Usage(format!("-w expects a number, got {v:?}")))?);
            }
            "-p" | "--max_processes" => {
                let v = take_value("-p")?;
                cli.max_processes =
                    Some(v.parse().map_err(|_| OrchestratorError::Usage(format!("-p expects an integer, got {v:?}")))?);
            }
            "-f" | "--from" => {
                let v = take_value("-f")?;
                cli.from_serial =
                    Some(v.parse().map_err(|_| OrchestratorError::Usage(format!("-f expects an integer, got {v:?}")))?);
            }
            "-d" | "--dir" => cli.scratch_dir = Some(PathBuf::from(take_value("-d")?)),
            "-v" | "--verbose" => cli.verbose = true,
            "--clean" => cli.clean = true,
            "-h" | "--help" => cli.help = true,
            other => return Err(OrchestratorError::Usage(format!("unrecognized argument {other:?}"))),
        }
    }

    Ok(cli)
}

fn run() -> Result<bool, OrchestratorError> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_args(&args)?;

    if cli.help {
        println!("{USAGE}");
        return Ok(true);
    }

    let mut config = RunConfig::default();
    if let Some(n) = cli.n_times_before_timeout {
        config.n_times_before_timeout = n;
    }
    if let Some(w) = cli.wait_time_between_tries {
        config.wait_time_between_tries = w;
    }
    if let Some(p) = cli.max_processes {
        config.max_processes = p;
    }
    if let Some(f) = cli.from_serial {
        config.from_serial = f;
    }
    if let Some(d) = cli.scratch_dir {
        config.scratch_root = d;
    }
    config.verbose = cli.verbose;
    let verbose = config.verbose;

    let orchestrator = Orchestrator::new(config);

    if cli.clean {
        orchestrator
            .clean()
            .map_err(|e| OrchestratorError::Runner(e.to_string()))?;
        return Ok(true);
    }

    let input = cli
        .input
        .ok_or_else(|| OrchestratorError::Usage("-i <document> is required".to_string()))?;

    let (doc, plan) = orchestrator
        .read(&input)
        .map_err(|e| OrchestratorError::Plan(e.to_string()))?;

    let runner = ProcessRunner;
    let report = orchestrator
        .run(&doc, &plan, &runner)
        .map_err(|e| OrchestratorError::Runner(e.to_string()))?;

    // Verbose mode already prints this line itself (once per run, after the
    // last serial); avoid printing it a second time here.
    if !verbose {
        println!("run finished in {:.3}s", report.elapsed.as_secs_f64());
    }
    Ok(report.is_success())
}

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::from(0),
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("{e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
