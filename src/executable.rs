//! Materialized work units and the directed pipes between them.
//!
//! An [`Executable`] is a single (script, flattened context) pair pinned to a
//! block; it is the atom the scheduler dispatches to a worker. Identity for
//! deduplication purposes is `(context, block_name, producer_tag)` -- the
//! hash is *not* part of equality, since re-running with a new `version`
//! should produce the same plan shape against fresh scratch directories.

use crate::context::FlatContext;
use sha1::{Digest, Sha1};
use std::fmt;

/// Opaque index of an [`Executable`] within a [`crate::planner::Plan`].
///
/// Plans reference executables by position rather than by hash so that
/// linking doesn't need to round-trip through string comparisons.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct ExecutableId(usize);

impl ExecutableId {
    pub(crate) fn new(v: usize) -> Self {
        Self(v)
    }

    /// The raw plan index. Mainly useful for diagnostics.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// A materialized work unit: one script invoked with one concrete, flattened
/// parameter assignment, scoped to one block.
#[derive(Clone, Debug)]
pub struct Executable {
    pub id: ExecutableId,
    pub context: FlatContext,
    pub producer_tag: String,
    pub import_path: String,
    pub block_name: String,
    pub block_serial: i64,
    pub pipeline_version: String,
    pub pipeline_name: String,
    pub hash: String,
    pub pipes_in: usize,
    pub outgoing: Vec<ExecutableId>,
}

impl Executable {
    /// Construct a new executable and compute its content hash.
    ///
    /// `id` is assigned by the planner once the executable has survived
    /// deduplication; `pipes_in`/`outgoing` start empty and are populated
    /// exclusively by the linker during planning.
    pub(crate) fn new(
        id: ExecutableId,
        context: FlatContext,
        producer_tag: String,
        import_path: String,
        block_name: String,
        block_serial: i64,
        pipeline_version: String,
        pipeline_name: String,
    ) -> Self {
        let mut exe = Self {
            id,
            context,
            producer_tag,
            import_path,
            block_name,
            block_serial,
            pipeline_version,
            pipeline_name,
            hash: String::new(),
            pipes_in: 0,
            outgoing: Vec::new(),
        };
        exe.hash = exe.compute_hash();
        exe
    }

    /// The tuple dedup/equality is defined over: `(context, block, tag)`.
    /// Deliberately excludes `hash` (and therefore `pipeline_version`).
    #[must_use]
    pub fn identity_key(&self) -> (FlatContext, &str, &str) {
        (self.context.clone(), self.block_name.as_str(), self.producer_tag.as_str())
    }

    /// `{pipeline}({version})/{block}/{tag}:{path}\n{context-as-indented-JSON}`
    #[must_use]
    pub fn canonical_string(&self) -> String {
        format!(
            "{}({})/{}/{}:{}\n{}",
            self.pipeline_name,
            self.pipeline_version,
            self.block_name,
            self.producer_tag,
            self.import_path,
            crate::context::to_indented_json(&self.context),
        )
    }

    fn compute_hash(&self) -> String {
        let mut hasher = Sha1::new();
        hasher.update(self.canonical_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl fmt::Display for Executable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical_string())
    }
}

/// A directed dataflow edge from an upstream [`Executable`] to a downstream
/// one. Constructing a pipe is what increments the downstream's `pipes_in`
/// counter; the upstream records it in its `outgoing` list so the scheduler
/// knows where to fan the result out to.
#[derive(Clone, Copy, Debug)]
pub struct Pipe {
    pub from: ExecutableId,
    pub to: ExecutableId,
}
