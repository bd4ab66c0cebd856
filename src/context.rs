//! Parameter contexts and their expansion into concrete flat assignments.
//!
//! A [`Context`] is the mapping attached to a pipeline, a block, or a script.
//! Its values may be scalars, ordered lists, or numeric ranges; [`flatten`]
//! expands one into every concrete [`FlatContext`] it denotes, and [`merge`]
//! composes two expanded lists the way the pipeline/block/script scoping
//! hierarchy requires -- a cartesian cross with right-biased key collision.
//!
//! Keys may be *paired*: a key containing `,` names several parameters at
//! once, and the matching value is a comma-joined scalar string that is
//! zipped against the key components positionally (see [`unpair`]).

use anyhow::{anyhow, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// The reserved delimiter that marks a paired key/value.
const PAIR_DELIM: char = ',';

/// A single parameter value before expansion: scalar, list, or numeric range.
#[derive(Clone, Debug, PartialEq)]
pub enum ValueSpec {
    /// A leaf scalar -- string, number, or boolean.
    Scalar(Value),
    /// An ordered list of scalars; contributes a cartesian factor of `len()`.
    List(Vec<Value>),
    /// A half-open integer range `[start, end)` stepping by `step` (default 1).
    Range(RangeSpec),
}

/// `{start, end, step=1}`, interpreted as the half-open interval `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RangeSpec {
    pub start: i64,
    pub end: i64,
    pub step: i64,
}

impl RangeSpec {
    /// Iterate the concrete integers this range denotes.
    fn values(self) -> impl Iterator<Item = i64> {
        let step = if self.step == 0 { 1 } else { self.step };
        let mut cur = self.start;
        std::iter::from_fn(move || {
            if (step > 0 && cur >= self.end) || (step < 0 && cur <= self.end) {
                None
            } else {
                let v = cur;
                cur += step;
                Some(v)
            }
        })
    }
}

/// A mapping from parameter key to [`ValueSpec`], in insertion order.
///
/// Order matters: flattening relies on the source document's key order for
/// determinism, so this is a `Vec` of pairs rather than a `HashMap`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Context(pub Vec<(String, ValueSpec)>);

impl Context {
    #[must_use]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A fully-expanded, scalar-only parameter assignment.
///
/// Keys are sorted so that two semantically identical assignments compare
/// and hash identically regardless of the order keys were inserted in --
/// this is what the planner's dedup/canonicalization relies on.
pub type FlatContext = BTreeMap<String, Value>;

/// How strictly paired key/value arity mismatches are treated.
///
/// The original tool silently drops the excess components on whichever side
/// is longer (zip-shortest). The default here fails loudly instead; set this
/// to `true` to restore the original's silent-drop behavior.
#[derive(Clone, Copy, Debug, Default)]
pub struct PairingMode {
    pub lenient: bool,
}

/// Split a paired `key` (`"host,port"`) and its paired scalar `val`
/// (`"a,1"`) into a single-valued sub-mapping `{host: "a", port: "1"}`.
///
/// Unpaired keys just produce the single-entry mapping `{key: val}`. Paired
/// values are always treated as strings -- `unpair` is never called with a
/// non-string `val` for a paired key because range values can't be paired
/// (see [`flatten`]).
fn unpair(key: &str, val: &Value, mode: PairingMode) -> Result<Vec<(String, Value)>> {
    if !key.contains(PAIR_DELIM) {
        return Ok(vec![(key.to_string(), val.clone())]);
    }

    let val_str = val
        .as_str()
        .ok_or_else(|| anyhow!("paired key {key:?} requires a string value, got {val}"))?;

    let keys: Vec<&str> = key.split(PAIR_DELIM).map(str::trim).collect();
    let vals: Vec<&str> = val_str.split(PAIR_DELIM).map(str::trim).collect();

    if !mode.lenient && keys.len() != vals.len() {
        return Err(anyhow!(
            "paired key {key:?} has arity {} but value {val_str:?} has arity {}",
            keys.len(),
            vals.len()
        ));
    }

    Ok(keys
        .into_iter()
        .zip(vals)
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect())
}

/// Expand a [`Context`] into every concrete [`FlatContext`] it denotes.
///
/// `flatten({}) == [{}]` (E1). The result's length is the product of every
/// list/range cardinality in `context` (E2); scalars contribute a factor of 1.
pub fn flatten(context: &Context, mode: PairingMode) -> Result<Vec<FlatContext>> {
    let mut partials: Vec<FlatContext> = vec![FlatContext::new()];

    for (key, spec) in &context.0 {
        partials = match spec {
            ValueSpec::List(values) => {
                let mut expanded = Vec::with_capacity(partials.len() * values.len().max(1));
                for v in values {
                    for partial in &partials {
                        let mut next = partial.clone();
                        for (k, v) in unpair(key, v, mode)? {
                            next.insert(k, v);
                        }
                        expanded.push(next);
                    }
                }
                expanded
            }
            ValueSpec::Range(range) => {
                let ints: Vec<i64> = range.values().collect();
                let mut expanded = Vec::with_capacity(partials.len() * ints.len().max(1));
                for i in &ints {
                    for partial in &partials {
                        let mut next = partial.clone();
                        next.insert(key.clone(), Value::from(*i));
                        expanded.push(next);
                    }
                }
                expanded
            }
            ValueSpec::Scalar(v) => {
                for partial in &mut partials {
                    for (k, v) in unpair(key, v, mode)? {
                        partial.insert(k, v);
                    }
                }
                partials
            }
        };
    }

    Ok(partials)
}

/// Cartesian cross of two expanded context lists; on key collision `b`'s
/// value wins (P2, right-bias). Used to compose pipeline ⊕ block ⊕ script
/// scoping -- associative, but not commutative in its collision resolution.
#[must_use]
pub fn merge(a: &[FlatContext], b: &[FlatContext]) -> Vec<FlatContext> {
    let mut out = Vec::with_capacity(a.len() * b.len());
    for left in a {
        for right in b {
            let mut combined = left.clone();
            for (k, v) in right {
                combined.insert(k.clone(), v.clone());
            }
            out.push(combined);
        }
    }
    out
}

/// Render a `FlatContext` as indented JSON, matching the canonical textual
/// rendering the executable hash is computed over.
#[must_use]
pub fn to_indented_json(ctx: &FlatContext) -> String {
    let map: Map<String, Value> = ctx
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    serde_json::to_string_pretty(&Value::Object(map)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar(s: &str) -> ValueSpec {
        ValueSpec::Scalar(Value::String(s.to_string()))
    }

    fn list(items: &[&str]) -> ValueSpec {
        ValueSpec::List(items.iter().map(|s| Value::String((*s).to_string())).collect())
    }

    #[test]
    fn flatten_empty_is_singleton_empty() {
        let ctx = Context::new();
        let out = flatten(&ctx, PairingMode::default()).unwrap();
        assert_eq!(out, vec![FlatContext::new()]);
    }

    #[test]
    fn flatten_list_cardinality() {
        let ctx = Context(vec![("region".into(), list(&["us", "eu"]))]);
        let out = flatten(&ctx, PairingMode::default()).unwrap();
        assert_eq!(out.len(), 2);
        let regions: Vec<_> = out.iter().map(|c| c["region"].clone()).collect();
        assert!(regions.contains(&Value::String("us".into())));
        assert!(regions.contains(&Value::String("eu".into())));
    }

    #[test]
    fn flatten_range_is_half_open() {
        let ctx = Context(vec![(
            "n".into(),
            ValueSpec::Range(RangeSpec { start: 0, end: 3, step: 1 }),
        )]);
        let out = flatten(&ctx, PairingMode::default()).unwrap();
        let mut ns: Vec<i64> = out.iter().map(|c| c["n"].as_i64().unwrap()).collect();
        ns.sort_unstable();
        assert_eq!(ns, vec![0, 1, 2]);
    }

    #[test]
    fn flatten_paired_key_zips_positionally() {
        let ctx = Context(vec![("host,port".into(), scalar("a,1"))]);
        let out = flatten(&ctx, PairingMode::default()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["host"], Value::String("a".into()));
        // "1" stays a string, not a number -- it came from a string split.
        assert_eq!(out[0]["port"], Value::String("1".into()));
    }

    #[test]
    fn flatten_paired_arity_mismatch_fails_by_default() {
        let ctx = Context(vec![("host,port,extra".into(), scalar("a,1"))]);
        assert!(flatten(&ctx, PairingMode::default()).is_err());
    }

    #[test]
    fn flatten_paired_arity_mismatch_lenient_drops_excess() {
        let ctx = Context(vec![("host,port,extra".into(), scalar("a,1"))]);
        let out = flatten(&ctx, PairingMode { lenient: true }).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].len(), 2);
        assert_eq!(out[0]["host"], Value::String("a".into()));
        assert_eq!(out[0]["port"], Value::String("1".into()));
    }

    #[test]
    fn merge_cardinality_and_right_bias() {
        let a = vec![FlatContext::from([("k".to_string(), Value::from(1))])];
        let b = vec![
            FlatContext::from([("k".to_string(), Value::from(2))]),
            FlatContext::from([("j".to_string(), Value::from(3))]),
        ];
        let out = merge(&a, &b);
        assert_eq!(out.len(), a.len() * b.len());
        assert_eq!(out[0]["k"], Value::from(2));
        assert_eq!(out[1]["k"], Value::from(1));
        assert_eq!(out[1]["j"], Value::from(3));
    }
}
