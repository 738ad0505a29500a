//! The argument value language: literals, artifact references, placeholders
//!
//! Wire form is plain JSON. Two string shapes are promoted to tagged
//! variants on the way in so resolvers can walk argument trees uniformly:
//!
//!   "artifact://{node_id}/{filename}"   -> Value::Artifact
//!   "${node_id.output_field}"           -> Value::Placeholder
//!
//! Placeholders are resolved at dispatch time against the producing node's
//! recorded output, never at plan time.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Reference to an artifact produced by a plan node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactRef {
    pub node: String,
    pub filename: String,
}

impl ArtifactRef {
    pub fn parse(s: &str) -> Option<Self> {
        let rest = s.strip_prefix("artifact://")?;
        let (node, filename) = rest.split_once('/')?;
        if node.is_empty() || filename.is_empty() {
            return None;
        }
        Some(Self {
            node: node.to_string(),
            filename: filename.to_string(),
        })
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "artifact://{}/{}", self.node, self.filename)
    }
}

/// `${node.field}` reference into an upstream node's output. The field part
/// may be a dotted path into nested output objects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Placeholder {
    pub node: String,
    pub field: String,
}

impl Placeholder {
    pub fn parse(s: &str) -> Option<Self> {
        let inner = s.strip_prefix("${")?.strip_suffix('}')?;
        let (node, field) = inner.split_once('.')?;
        if node.is_empty() || field.is_empty() || inner.contains(['{', '}', '$']) {
            return None;
        }
        Some(Self {
            node: node.to_string(),
            field: field.to_string(),
        })
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{}.{}}}", self.node, self.field)
    }
}

/// A node argument value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Artifact(ArtifactRef),
    Placeholder(Placeholder),
}

impl Value {
    /// Promote a plain JSON tree, recognizing the two tagged string forms.
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n),
            serde_json::Value::String(s) => {
                if let Some(art) = ArtifactRef::parse(&s) {
                    Self::Artifact(art)
                } else if let Some(ph) = Placeholder::parse(&s) {
                    Self::Placeholder(ph)
                } else {
                    Self::String(s)
                }
            }
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(map) => Self::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Back to plain JSON, tagged variants as their string forms.
    pub fn to_wire(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => serde_json::Value::Number(n.clone()),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::List(items) => {
                serde_json::Value::Array(items.iter().map(Self::to_wire).collect())
            }
            Self::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_wire())).collect(),
            ),
            Self::Artifact(art) => serde_json::Value::String(art.to_string()),
            Self::Placeholder(ph) => serde_json::Value::String(ph.to_string()),
        }
    }

    /// Node ids referenced by placeholders and artifact refs in this tree.
    pub fn referenced_nodes(&self, out: &mut Vec<String>) {
        match self {
            Self::Artifact(art) => out.push(art.node.clone()),
            Self::Placeholder(ph) => out.push(ph.node.clone()),
            Self::List(items) => {
                for item in items {
                    item.referenced_nodes(out);
                }
            }
            Self::Map(map) => {
                for value in map.values() {
                    value.referenced_nodes(out);
                }
            }
            _ => {}
        }
    }

    /// Resolve this value to plain JSON against recorded upstream outputs.
    ///
    /// `lookup` returns the full recorded output of a node; placeholders walk
    /// their dotted field path into it. Artifact refs resolve to their URI
    /// string (inlining, when a tool wants it, happens in the executor).
    pub fn resolve(
        &self,
        lookup: &dyn Fn(&str) -> Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        match self {
            Self::Placeholder(ph) => {
                let output = lookup(&ph.node).ok_or_else(|| {
                    Error::SchemaViolation(format!("no recorded output for node `{}`", ph.node))
                })?;
                let mut cursor = &output;
                for segment in ph.field.split('.') {
                    cursor = cursor.get(segment).ok_or_else(|| {
                        Error::SchemaViolation(format!(
                            "output of `{}` has no field `{}`",
                            ph.node, ph.field
                        ))
                    })?;
                }
                Ok(cursor.clone())
            }
            Self::Artifact(art) => Ok(serde_json::Value::String(art.to_string())),
            Self::List(items) => Ok(serde_json::Value::Array(
                items
                    .iter()
                    .map(|item| item.resolve(lookup))
                    .collect::<Result<_>>()?,
            )),
            Self::Map(map) => {
                let mut out = serde_json::Map::new();
                for (k, v) in map {
                    out.insert(k.clone(), v.resolve(lookup)?);
                }
                Ok(serde_json::Value::Object(out))
            }
            other => Ok(other.to_wire()),
        }
    }

    /// Canonical JSON for idempotency hashing.
    ///
    /// Placeholders and artifact refs collapse to their *key* form — the
    /// upstream node id is substituted by that node's own idempotency key
    /// via `node_key` — so the result is computable without running
    /// upstream, yet differs whenever upstream inputs differ. Integral
    /// floats are normalized to integers.
    pub fn canonical(&self, node_key: &dyn Fn(&str) -> Option<String>) -> serde_json::Value {
        match self {
            Self::Number(n) => serde_json::Value::Number(normalize_number(n)),
            Self::List(items) => serde_json::Value::Array(
                items.iter().map(|item| item.canonical(node_key)).collect(),
            ),
            Self::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.canonical(node_key)))
                    .collect(),
            ),
            Self::Artifact(art) => {
                let node = node_key(&art.node).unwrap_or_else(|| art.node.clone());
                serde_json::Value::String(format!("artifact://{}/{}", node, art.filename))
            }
            Self::Placeholder(ph) => {
                let node = node_key(&ph.node).unwrap_or_else(|| ph.node.clone());
                serde_json::Value::String(format!("${{{}.{}}}", node, ph.field))
            }
            other => other.to_wire(),
        }
    }
}

fn normalize_number(n: &serde_json::Number) -> serde_json::Number {
    if let Some(f) = n.as_f64() {
        if n.as_i64().is_none() && n.as_u64().is_none() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
            return serde_json::Number::from(f as i64);
        }
    }
    n.clone()
}

impl Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Ok(Self::from_json(serde_json::Value::deserialize(deserializer)?))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::from_json(serde_json::Value::String(s.to_string()))
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Self::from_json(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tagged_string_forms_promote() {
        let v = Value::from_json(json!("artifact://sql/rows.csv"));
        assert_eq!(
            v,
            Value::Artifact(ArtifactRef {
                node: "sql".into(),
                filename: "rows.csv".into()
            })
        );

        let v = Value::from_json(json!("${sql.table}"));
        assert_eq!(
            v,
            Value::Placeholder(Placeholder {
                node: "sql".into(),
                field: "table".into()
            })
        );
    }

    #[test]
    fn plain_strings_stay_strings() {
        for s in ["hello", "artifact://", "${no_dot}", "$not_a_placeholder", "artifact://x"] {
            let v = Value::from_json(json!(s));
            assert_eq!(v, Value::String(s.to_string()), "{s}");
        }
    }

    #[test]
    fn wire_roundtrip() {
        let json = json!({
            "where": "outlet_id = 42",
            "table": "${sql.table}",
            "spec": "artifact://viz_spec/spec.json",
            "limits": [1, 2.5, null, true],
        });
        let v = Value::from_json(json.clone());
        assert_eq!(v.to_wire(), json);
    }

    #[test]
    fn resolve_walks_nested_fields() {
        let v = Value::from_json(json!({"data": "${sql.result.table}"}));
        let lookup = |node: &str| {
            (node == "sql").then(|| json!({"result": {"table": [["a", 1]]}}))
        };
        let resolved = v.resolve(&lookup).unwrap();
        assert_eq!(resolved, json!({"data": [["a", 1]]}));
    }

    #[test]
    fn resolve_missing_field_is_schema_violation() {
        let v = Value::from_json(json!("${sql.missing}"));
        let lookup = |_: &str| Some(json!({"table": []}));
        let err = v.resolve(&lookup).unwrap_err();
        assert_eq!(err.kind(), "SchemaViolation");
    }

    #[test]
    fn canonical_substitutes_upstream_keys() {
        let v = Value::from_json(json!("${sql.table}"));
        let key = |node: &str| (node == "sql").then(|| "abc123".to_string());
        assert_eq!(v.canonical(&key), json!("${abc123.table}"));
    }

    #[test]
    fn canonical_normalizes_integral_floats() {
        let v = Value::from_json(json!({"n": 4.0, "m": 4.5}));
        let canon = v.canonical(&|_| None);
        assert_eq!(canon, json!({"n": 4, "m": 4.5}));
    }

    #[test]
    fn referenced_nodes_collects_all() {
        let v = Value::from_json(json!({
            "a": "${x.out}",
            "b": ["artifact://y/f.bin", {"c": "${z.out}"}],
        }));
        let mut nodes = Vec::new();
        v.referenced_nodes(&mut nodes);
        nodes.sort();
        assert_eq!(nodes, vec!["x", "y", "z"]);
    }
}
