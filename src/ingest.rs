//! File-backed rendezvous between logically isolated workers.
//!
//! Each executable owns an *ingest directory* named by its hash. An upstream
//! worker delivers its output by writing a file named after its own hash
//! into the downstream's ingest directory -- disjoint filenames mean
//! concurrent upstreams never race on a write. A worker's own scratch files
//! (the packet it hands the external runner, and the runner's reply) live
//! flat under the scratch root, also named by the executable's hash.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::context::FlatContext;

/// The in/out scratch files a worker hands to the external runner.
#[derive(Clone, Debug)]
pub struct FilePipe {
    pub in_path: PathBuf,
    pub out_path: PathBuf,
}

impl FilePipe {
    #[must_use]
    pub fn new(scratch_root: &Path, hash: &str) -> Self {
        Self {
            in_path: scratch_root.join(format!("pipe{hash}.in")),
            out_path: scratch_root.join(format!("pipe{hash}.out")),
        }
    }

    /// Read whatever bytes the external runner wrote to the out-file.
    pub fn read_out(&self) -> Result<String> {
        fs::read_to_string(&self.out_path)
            .with_context(|| format!("reading runner output {}", self.out_path.display()))
    }
}

/// The JSON packet written to an executable's in-file before the external
/// runner is invoked.
#[derive(Serialize, Debug, Clone)]
pub struct InputPacket {
    pub script_directory: String,
    pub script_path: String,
    pub params: FlatContext,
    pub data: Vec<String>,
}

/// Path to an executable's ingest directory.
#[must_use]
pub fn ingest_dir(scratch_root: &Path, hash: &str) -> PathBuf {
    scratch_root.join(hash)
}

/// Create an executable's ingest directory if it doesn't already exist.
pub fn ensure_ingest_dir(scratch_root: &Path, hash: &str) -> Result<PathBuf> {
    let dir = ingest_dir(scratch_root, hash);
    fs::create_dir_all(&dir).with_context(|| format!("creating ingest directory {}", dir.display()))?;
    Ok(dir)
}

/// `count(files in dir) < pipes_in`.
pub fn is_waiting_for_upstream(dir: &Path, pipes_in: usize) -> Result<bool> {
    let count = fs::read_dir(dir)
        .with_context(|| format!("listing ingest directory {}", dir.display()))?
        .count();
    Ok(count < pipes_in)
}

/// Outcome of [`wait_for_upstream`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    Ready,
    TimedOut,
}

/// Poll `dir` for the arrival of `pipes_in` upstream files, sampling every
/// `wait_time_between_tries` seconds up to `n_times_before_timeout` times.
///
/// Short-circuits to [`WaitOutcome::Ready`] immediately if `in_file` already
/// holds a non-empty packet from a prior partial run, and (naturally) if
/// `pipes_in == 0` -- a source script has nothing to wait for.
pub fn wait_for_upstream(
    dir: &Path,
    pipes_in: usize,
    in_file: &Path,
    n_times_before_timeout: u32,
    wait_time_between_tries: f64,
) -> Result<WaitOutcome> {
    if pipes_in == 0 {
        return Ok(WaitOutcome::Ready);
    }
    if fs::metadata(in_file).map(|m| m.len() > 0).unwrap_or(false) {
        return Ok(WaitOutcome::Ready);
    }

    for _ in 0..n_times_before_timeout {
        if !is_waiting_for_upstream(dir, pipes_in)? {
            return Ok(WaitOutcome::Ready);
        }
        std::thread::sleep(Duration::from_secs_f64(wait_time_between_tries.max(0.0)));
    }

    if is_waiting_for_upstream(dir, pipes_in)? {
        Ok(WaitOutcome::TimedOut)
    } else {
        Ok(WaitOutcome::Ready)
    }
}

/// Read the contents of every file currently in an ingest directory, in
/// whatever order the filesystem hands them back -- callers must not rely
/// on this order (O3).
pub fn read_ingest_data(dir: &Path) -> Result<Vec<String>> {
    let mut data = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("listing ingest directory {}", dir.display()))? {
        let entry = entry?;
        if entry.path().is_file() {
            data.push(
                fs::read_to_string(entry.path())
                    .with_context(|| format!("reading ingest file {}", entry.path().display()))?,
            );
        }
    }
    Ok(data)
}

/// Write an executable's input packet to its in-file, unless this is a
/// resumed run with nothing new to say: if `packet.data` is empty and the
/// in-file already holds a non-empty packet, that prior packet is left in
/// place instead of being overwritten.
pub fn write_input_packet(in_file: &Path, packet: &InputPacket) -> Result<()> {
    if packet.data.is_empty() && fs::metadata(in_file).map(|m| m.len() > 0).unwrap_or(false) {
        return Ok(());
    }
    let json = serde_json::to_string(packet).context("serializing input packet")?;
    fs::write(in_file, json).with_context(|| format!("writing input packet {}", in_file.display()))
}

/// Deliver an upstream's output into a downstream's ingest directory, named
/// by the upstream's own hash so concurrent upstreams never collide.
pub fn transfer(output: &str, downstream_ingest_dir: &Path, upstream_hash: &str) -> Result<()> {
    fs::create_dir_all(downstream_ingest_dir)
        .with_context(|| format!("creating ingest directory {}", downstream_ingest_dir.display()))?;
    let dest = downstream_ingest_dir.join(upstream_hash);
    fs::write(&dest, output).with_context(|| format!("writing ingest file {}", dest.display()))
}

/// Remove every per-run scratch file and ingest directory under
/// `scratch_root`. Idempotent: a missing root is not an error.
pub fn clean(scratch_root: &Path) -> Result<()> {
    if scratch_root.exists() {
        fs::remove_dir_all(scratch_root)
            .with_context(|| format!("removing scratch root {}", scratch_root.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn wait_ready_once_enough_files_arrive() {
        let root = tempdir().unwrap();
        let dir = ensure_ingest_dir(root.path(), "downhash").unwrap();
        fs::write(dir.join("uphash1"), "a").unwrap();
        let in_file = root.path().join("pipedownhash.in");
        let outcome = wait_for_upstream(&dir, 1, &in_file, 5, 0.001).unwrap();
        assert_eq!(outcome, WaitOutcome::Ready);
    }

    #[test]
    fn wait_times_out_when_files_never_arrive() {
        let root = tempdir().unwrap();
        let dir = ensure_ingest_dir(root.path(), "downhash").unwrap();
        let in_file = root.path().join("pipedownhash.in");
        let outcome = wait_for_upstream(&dir, 1, &in_file, 2, 0.001).unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }

    #[test]
    fn zero_pipes_in_never_waits() {
        let root = tempdir().unwrap();
        let dir = ensure_ingest_dir(root.path(), "downhash").unwrap();
        let in_file = root.path().join("pipedownhash.in");
        let outcome = wait_for_upstream(&dir, 0, &in_file, 1, 0.001).unwrap();
        assert_eq!(outcome, WaitOutcome::Ready);
    }

    #[test]
    fn transfer_writes_distinct_files_per_upstream() {
        let root = tempdir().unwrap();
        let dir = ensure_ingest_dir(root.path(), "downhash").unwrap();
        transfer("one", &dir, "up1").unwrap();
        transfer("two", &dir, "up2").unwrap();
        let mut data = read_ingest_data(&dir).unwrap();
        data.sort();
        assert_eq!(data, vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn resume_keeps_prior_packet_when_no_new_data() {
        let root = tempdir().unwrap();
        fs::create_dir_all(&root).unwrap();
        let in_file = root.path().join("pipex.in");
        fs::write(&in_file, r#"{"script_directory":"/s","script_path":"x","params":{},"data":["kept"]}"#).unwrap();

        let empty_packet = InputPacket {
            script_directory: "/s".into(),
            script_path: "x".into(),
            params: FlatContext::new(),
            data: vec![],
        };
        write_input_packet(&in_file, &empty_packet).unwrap();
        let contents = fs::read_to_string(&in_file).unwrap();
        assert!(contents.contains("kept"));
    }

    #[test]
    fn clean_is_idempotent_on_missing_root() {
        let root = tempdir().unwrap();
        let missing = root.path().join("nonexistent");
        clean(&missing).unwrap();
        clean(&missing).unwrap();
    }
}
