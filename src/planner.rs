//! Turns a normalized [`PipelineDoc`] into a flat, linked [`Plan`].
//!
//! Planning happens in three passes nested inside one pass over the
//! document: expand the pipeline context, then for each block expand and
//! merge the block context down onto it, then for each resulting frame
//! expand and merge each script's own context. Every resulting
//! `(FlatContext, block, producer_tag)` triple that hasn't been seen before
//! becomes a new [`Executable`]; the linker runs inline, wiring a freshly
//! admitted executable to its upstream producers the moment it's created.
//!
//! Blocks are processed in ascending `serial` order (stable, so two blocks
//! sharing a serial keep their document order) -- this is what guarantees a
//! `takes` tag always resolves against an already-planned producer.

use anyhow::Result;
use std::collections::{BTreeSet, HashMap};

use crate::context::{flatten, merge, FlatContext, PairingMode};
use crate::document::PipelineDoc;
use crate::error::OrchestratorError;
use crate::executable::{Executable, ExecutableId, Pipe};

/// The output of planning: every executable the document denotes, the pipes
/// linking them, and the ascending-unique set of serials to schedule.
#[derive(Debug, Default)]
pub struct Plan {
    pub executables: Vec<Executable>,
    pub pipes: Vec<Pipe>,
    pub serials: Vec<i64>,
}

impl Plan {
    #[must_use]
    pub fn executables_at(&self, serial: i64) -> Vec<&Executable> {
        self.executables
            .iter()
            .filter(|e| e.block_serial == serial)
            .collect()
    }
}

type IdentityKey = (FlatContext, String, String);

/// Build a [`Plan`] from a normalized document.
///
/// # Errors
///
/// Returns a [`OrchestratorError::Plan`] if a context fails to flatten
/// (e.g. a strict paired-key arity mismatch) or a script's `takes` tag
/// resolves against neither the current block-local producer index nor the
/// pipeline-global one.
pub fn plan(doc: &PipelineDoc, mode: PairingMode) -> Result<Plan> {
    let pipeline_ctxs = flatten(&doc.context, mode)?;

    let mut blocks: Vec<&crate::document::BlockDoc> = doc.blocks.iter().collect();
    blocks.sort_by_key(|b| b.serial);

    let mut executables: Vec<Executable> = Vec::new();
    let mut pipes: Vec<Pipe> = Vec::new();
    let mut global_index: HashMap<String, Vec<ExecutableId>> = HashMap::new();
    let mut identity_seen: HashMap<IdentityKey, ExecutableId> = HashMap::new();
    let mut serials: BTreeSet<i64> = BTreeSet::new();

    for block in &blocks {
        serials.insert(block.serial);
        let block_flat = flatten(&block.context, mode)?;
        let block_ctxs = merge(&pipeline_ctxs, &block_flat);

        for bc in &block_ctxs {
            let mut local_index: HashMap<String, Vec<ExecutableId>> = HashMap::new();

            for script in &block.scripts {
                let script_flat = flatten(&script.context, mode)?;
                let script_ctxs = merge(std::slice::from_ref(bc), &script_flat);

                for ec in script_ctxs {
                    let key: IdentityKey = (ec.clone(), block.name.clone(), script.producer_tag.clone());

                    if identity_seen.contains_key(&key) {
                        // Duplicate candidate: discard, already linked when first admitted.
                        continue;
                    }

                    let new_id = ExecutableId::new(executables.len());
                    let exe = Executable::new(
                        new_id,
                        ec,
                        script.producer_tag.clone(),
                        script.import_path.clone(),
                        block.name.clone(),
                        block.serial,
                        doc.version.clone(),
                        doc.name.clone(),
                    );
                    executables.push(exe);
                    identity_seen.insert(key, new_id);
                    local_index.entry(script.producer_tag.clone()).or_default().push(new_id);
                    global_index.entry(script.producer_tag.clone()).or_default().push(new_id);

                    if let Some(takes) = &script.takes {
                        let upstream_ids = local_index
                            .get(takes)
                            .or_else(|| global_index.get(takes))
                            .cloned()
                            .ok_or_else(|| {
                                OrchestratorError::Plan(format!(
                                    "script {:?} in block {:?} takes unresolved tag {takes:?}",
                                    script.producer_tag, block.name
                                ))
                            })?;

                        for up in upstream_ids {
                            pipes.push(Pipe { from: up, to: new_id });
                            executables[new_id.index()].pipes_in += 1;
                            executables[up.index()].outgoing.push(new_id);
                        }
                    }
                }
            }
        }
    }

    Ok(Plan {
        executables,
        pipes,
        serials: serials.into_iter().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Context, RangeSpec, ValueSpec};
    use crate::document::{BlockDoc, ScriptDoc};
    use serde_json::Value;

    fn doc_with_blocks(blocks: Vec<BlockDoc>) -> PipelineDoc {
        PipelineDoc {
            name: "p".into(),
            version: "1".into(),
            script_directory: "/s".into(),
            context: Context::new(),
            blocks,
        }
    }

    fn script(tag: &str, takes: Option<&str>) -> ScriptDoc {
        ScriptDoc {
            producer_tag: tag.into(),
            import_path: "x".into(),
            takes: takes.map(str::to_string),
            context: Context::new(),
        }
    }

    #[test]
    fn single_source_script_no_upstream() {
        let doc = doc_with_blocks(vec![BlockDoc {
            name: "b".into(),
            serial: 0,
            description: String::new(),
            context: Context::new(),
            scripts: vec![script("out", None)],
        }]);
        let plan = plan(&doc, PairingMode::default()).unwrap();
        assert_eq!(plan.executables.len(), 1);
        assert_eq!(plan.executables[0].pipes_in, 0);
    }

    #[test]
    fn two_stage_pipe_binds_pointwise_per_k() {
        let mut doc = doc_with_blocks(vec![BlockDoc {
            name: "b".into(),
            serial: 0,
            description: String::new(),
            context: Context::new(),
            scripts: vec![script("X", None), script("Y", Some("X"))],
        }]);
        doc.context = Context(vec![(
            "k".into(),
            ValueSpec::List(vec![Value::from(1), Value::from(2)]),
        )]);

        let plan = plan(&doc, PairingMode::default()).unwrap();
        assert_eq!(plan.executables.len(), 4);
        for e in &plan.executables {
            if e.producer_tag == "Y" {
                assert_eq!(e.pipes_in, 1);
            }
        }
        assert_eq!(plan.pipes.len(), 2);
        for pipe in &plan.pipes {
            let from = &plan.executables[pipe.from.index()];
            let to = &plan.executables[pipe.to.index()];
            assert_eq!(from.context["k"], to.context["k"]);
        }
    }

    #[test]
    fn cross_block_fan_in_via_pipeline_global_index() {
        let doc = doc_with_blocks(vec![
            BlockDoc {
                name: "b0".into(),
                serial: 0,
                description: String::new(),
                context: Context(vec![(
                    "k".into(),
                    ValueSpec::Range(RangeSpec { start: 1, end: 3, step: 1 }),
                )]),
                scripts: vec![script("X", None)],
            },
            BlockDoc {
                name: "b1".into(),
                serial: 1,
                description: String::new(),
                context: Context::new(),
                scripts: vec![script("Y", Some("X"))],
            },
        ]);

        let plan = plan(&doc, PairingMode::default()).unwrap();
        let b = plan
            .executables
            .iter()
            .find(|e| e.producer_tag == "Y")
            .unwrap();
        assert_eq!(b.pipes_in, 2);
    }

    #[test]
    fn unresolved_takes_tag_is_plan_error() {
        let doc = doc_with_blocks(vec![BlockDoc {
            name: "b".into(),
            serial: 0,
            description: String::new(),
            context: Context::new(),
            scripts: vec![script("Y", Some("missing"))],
        }]);
        assert!(plan(&doc, PairingMode::default()).is_err());
    }

    #[test]
    fn dedup_is_idempotent_across_replans() {
        let doc = doc_with_blocks(vec![BlockDoc {
            name: "b".into(),
            serial: 0,
            description: String::new(),
            context: Context(vec![(
                "k".into(),
                ValueSpec::List(vec![Value::from(1), Value::from(1)]),
            )]),
            scripts: vec![script("out", None)],
        }]);
        let plan1 = plan(&doc, PairingMode::default()).unwrap();
        let plan2 = plan(&doc, PairingMode::default()).unwrap();
        assert_eq!(plan1.executables.len(), 1);
        assert_eq!(plan1.executables.len(), plan2.executables.len());
    }
}
