//! Reading and normalizing the on-disk pipeline document.
//!
//! The core's own reader is a small stand-in for what the distilled spec
//! calls out as an external collaborator -- nothing else in the corpus this
//! crate grew from ships one, so it's carried here rather than left as a
//! hole. It accepts either JSON or YAML (dispatched by file extension),
//! accumulates both legacy and current field spellings into one shape, and
//! runs the `$see definitions` substitution pass before anything is handed
//! to the planner.

use anyhow::{Context as _, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

use crate::context::{Context, RangeSpec, ValueSpec};
use crate::error::OrchestratorError;

/// Sentinel value that gets replaced by a `definitions` lookup.
const DEFINITIONS_SENTINEL: &str = "$see definitions";

/// Raw, mostly-untyped document shape as it comes off the wire. Field
/// spellings accumulated by the original tool over time are accepted side by
/// side and reconciled in [`RawDocument::into_pipeline_doc`].
#[derive(Deserialize, Debug, Clone)]
struct RawDocument {
    name: String,
    version: Option<String>,
    iteration: Option<String>,
    #[serde(rename = "script_directory")]
    script_directory: Option<String>,
    #[serde(rename = "script directory")]
    script_directory_spaced: Option<String>,
    #[serde(default)]
    definitions: HashMap<String, Value>,
    #[serde(default)]
    context: Value,
    #[serde(default)]
    blocks: Vec<RawBlock>,
}

#[derive(Deserialize, Debug, Clone)]
struct RawBlock {
    name: String,
    serial: i64,
    #[serde(default)]
    description: String,
    #[serde(default)]
    context: Value,
    #[serde(default)]
    scripts: Vec<RawScript>,
    #[serde(default)]
    runs: Vec<RawScript>,
}

#[derive(Deserialize, Debug, Clone)]
struct RawScript {
    // current shape
    script: Option<String>,
    returns: Option<String>,
    takes: Option<String>,
    // legacy shape
    name: Option<String>,
    guid: Option<String>,
    pipe_from: Option<i64>,
    path: String,
    #[serde(default)]
    context: Value,
}

/// A normalized script definition: both input shapes collapse to this.
#[derive(Clone, Debug)]
pub struct ScriptDoc {
    pub producer_tag: String,
    pub import_path: String,
    pub takes: Option<String>,
    pub context: Context,
}

/// A normalized block definition.
#[derive(Clone, Debug)]
pub struct BlockDoc {
    pub name: String,
    pub serial: i64,
    pub description: String,
    pub context: Context,
    pub scripts: Vec<ScriptDoc>,
}

/// A normalized pipeline document, ready for the planner.
#[derive(Clone, Debug)]
pub struct PipelineDoc {
    pub name: String,
    pub version: String,
    pub script_directory: String,
    pub context: Context,
    pub blocks: Vec<BlockDoc>,
}

/// Read a pipeline document from `path`, dispatching JSON vs. YAML by the
/// file extension, and run the `definitions` substitution pass.
///
/// # Errors
///
/// Returns an error if the file cannot be read, the content does not parse
/// as the expected schema, or a `$see definitions` sentinel references a
/// missing `definitions` entry.
pub fn read_pipeline_doc(path: impl AsRef<Path>) -> Result<PipelineDoc> {
    let path = path.as_ref();
    let raw_text = std::fs::read_to_string(path)
        .with_context(|| format!("reading pipeline document {}", path.display()))?;

    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yml") | Some("yaml")
    );

    let mut doc: RawDocument = if is_yaml {
        serde_yaml::from_str(&raw_text)
            .with_context(|| format!("parsing YAML pipeline document {}", path.display()))?
    } else {
        serde_json::from_str(&raw_text)
            .with_context(|| format!("parsing JSON pipeline document {}", path.display()))?
    };

    substitute_definitions(&mut doc)?;
    doc.into_pipeline_doc()
}

impl RawDocument {
    fn into_pipeline_doc(self) -> Result<PipelineDoc> {
        let version = self
            .version
            .or(self.iteration)
            .ok_or_else(|| OrchestratorError::Plan("missing `version`/`iteration` field".into()))?;

        let script_directory = self
            .script_directory
            .or(self.script_directory_spaced)
            .ok_or_else(|| {
                OrchestratorError::Plan("missing `script_directory`/`script directory` field".into())
            })?;

        let context = value_to_context(&self.context)?;

        let mut blocks = Vec::with_capacity(self.blocks.len());
        for raw_block in self.blocks {
            blocks.push(raw_block.into_block_doc()?);
        }

        Ok(PipelineDoc {
            name: self.name,
            version,
            script_directory,
            context,
            blocks,
        })
    }
}

impl RawBlock {
    fn into_block_doc(self) -> Result<BlockDoc> {
        let context = value_to_context(&self.context)?;
        let raw_scripts = if !self.scripts.is_empty() {
            self.scripts
        } else {
            self.runs
        };

        let mut scripts = Vec::with_capacity(raw_scripts.len());
        for raw_script in raw_scripts {
            scripts.push(raw_script.into_script_doc()?);
        }

        Ok(BlockDoc {
            name: self.name,
            serial: self.serial,
            description: self.description,
            context,
            scripts,
        })
    }
}

impl RawScript {
    fn into_script_doc(self) -> Result<ScriptDoc> {
        let context = value_to_context(&self.context)?;

        if let Some(producer_tag) = self.returns {
            return Ok(ScriptDoc {
                producer_tag,
                import_path: self.path,
                takes: self.takes,
                context,
            });
        }

        // Legacy shape: identified by `guid`, upstream named by `pipe_from`;
        // `-1` and an absent `takes` tag are equivalent (no upstream).
        let guid = self
            .guid
            .ok_or_else(|| OrchestratorError::Plan("script has neither `returns` nor `guid`".into()))?;
        let takes = match self.pipe_from {
            Some(-1) | None => None,
            Some(n) => Some(n.to_string()),
        };
        let _ = self.name; // kept only for diagnostics in the legacy shape
        Ok(ScriptDoc {
            producer_tag: guid,
            import_path: self.path,
            takes,
            context,
        })
    }
}

/// Convert a parsed JSON/YAML `context` value into a [`Context`].
fn value_to_context(value: &Value) -> Result<Context> {
    let Value::Object(map) = value else {
        if value.is_null() {
            return Ok(Context::new());
        }
        return Err(OrchestratorError::Plan(format!("`context` must be a mapping, got {value}")).into());
    };

    let mut entries = Vec::with_capacity(map.len());
    for (key, v) in map {
        let spec = match v {
            Value::Array(items) => ValueSpec::List(items.clone()),
            Value::Object(obj) if obj.contains_key("start") && obj.contains_key("end") => {
                let start = obj["start"]
                    .as_i64()
                    .ok_or_else(|| OrchestratorError::Plan(format!("range `start` must be an integer in {key}")))?;
                let end = obj["end"]
                    .as_i64()
                    .ok_or_else(|| OrchestratorError::Plan(format!("range `end` must be an integer in {key}")))?;
                let step = obj.get("step").and_then(Value::as_i64).unwrap_or(1);
                ValueSpec::Range(RangeSpec { start, end, step })
            }
            other => ValueSpec::Scalar(other.clone()),
        };
        entries.push((key.clone(), spec));
    }
    Ok(Context(entries))
}

/// Replace every `"$see definitions"` sentinel reachable from a `context`
/// sub-map with the matching `definitions[key]` entry, recursing through
/// every nested map and list in the document.
fn substitute_definitions(doc: &mut RawDocument) -> Result<()> {
    substitute_in_value(&mut doc.context, &doc.definitions)?;
    for block in &mut doc.blocks {
        substitute_in_value(&mut block.context, &doc.definitions)?;
        for script in block.scripts.iter_mut().chain(block.runs.iter_mut()) {
            substitute_in_value(&mut script.context, &doc.definitions)?;
        }
    }
    Ok(())
}

fn substitute_in_value(value: &mut Value, definitions: &HashMap<String, Value>) -> Result<()> {
    match value {
        Value::Object(map) => {
            for (key, v) in map.iter_mut() {
                if v.as_str() == Some(DEFINITIONS_SENTINEL) {
                    let replacement = definitions.get(key).ok_or_else(|| {
                        OrchestratorError::Plan(format!("no `definitions` entry for key {key:?}"))
                    })?;
                    *v = replacement.clone();
                } else {
                    substitute_in_value(v, definitions)?;
                }
            }
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                substitute_in_value(item, definitions)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
