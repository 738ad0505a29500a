//! Idempotency-key hashing
//!
//! A key is the SHA-256 of `(kind, name, canonicalized args, version tag)`.
//! Canonicalization sorts mapping keys, normalizes integral floats, and
//! collapses placeholders/artifact refs to their upstream node's own key
//! (see `Value::canonical`), so keys compose along the DAG and are
//! computable in topological order before anything runs.

use crate::plan::{NodeKind, NodeSpec};
use crate::value::Value;
use ring::digest::{digest, SHA256};
use std::collections::BTreeMap;

/// Compute the idempotency key for a node.
///
/// `node_key` maps an upstream node id to its already-computed key; the
/// executor calls this in topological order so every referenced upstream is
/// present.
pub fn idempotency_key(
    kind: NodeKind,
    name: &str,
    args: &BTreeMap<String, Value>,
    node_key: &dyn Fn(&str) -> Option<String>,
    version_tag: &str,
) -> String {
    let canonical_args: serde_json::Value = serde_json::Value::Object(
        args.iter()
            .map(|(k, v)| (k.clone(), v.canonical(node_key)))
            .collect(),
    );
    // serde_json objects iterate in sorted key order, so this is stable.
    let material = format!("{kind}|{name}|{canonical_args}|{version_tag}");
    hex(digest(&SHA256, material.as_bytes()).as_ref())
}

/// Key for a full node spec.
pub fn node_idempotency_key(
    spec: &NodeSpec,
    node_key: &dyn Fn(&str) -> Option<String>,
    version_tag: &str,
) -> String {
    idempotency_key(spec.kind, &spec.name, &spec.args, node_key, version_tag)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
