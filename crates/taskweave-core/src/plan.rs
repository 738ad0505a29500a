//! Plans: immutable DAGs of typed nodes with argument bindings

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Whether a node dispatches to an external tool server or an in-process agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Tool,
    Agent,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tool => write!(f, "tool"),
            Self::Agent => write!(f, "agent"),
        }
    }
}

/// One unit of work in a plan.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeSpec {
    pub node_id: String,
    pub kind: NodeKind,
    pub name: String,
    #[serde(default)]
    pub args: BTreeMap<String, Value>,
    #[serde(default)]
    pub upstream: Vec<String>,
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    1
}

impl NodeSpec {
    pub fn new(node_id: impl Into<String>, kind: NodeKind, name: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            kind,
            name: name.into(),
            args: BTreeMap::new(),
            upstream: Vec::new(),
            timeout_ms: 30_000,
            max_retries: default_max_retries(),
        }
    }

    pub fn arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    pub fn after(mut self, node_id: impl Into<String>) -> Self {
        self.upstream.push(node_id.into());
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }

    /// All node ids this spec depends on: explicit upstream plus any nodes
    /// referenced by placeholders or artifact refs in the args.
    pub fn dependencies(&self) -> BTreeSet<String> {
        let mut deps: BTreeSet<String> = self.upstream.iter().cloned().collect();
        let mut referenced = Vec::new();
        for value in self.args.values() {
            value.referenced_nodes(&mut referenced);
        }
        deps.extend(referenced);
        deps
    }
}

/// A materialized DAG derived from a flow and a context. Immutable once stored.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: String,
    pub flow_kind: crate::types::FlowKind,
    pub nodes: Vec<NodeSpec>,
    pub edges: BTreeSet<(String, String)>,
}

impl Plan {
    /// Build a plan from node specs; edges are derived from each node's
    /// upstream list and arg references.
    pub fn from_nodes(flow_kind: crate::types::FlowKind, nodes: Vec<NodeSpec>) -> Self {
        let mut edges = BTreeSet::new();
        for node in &nodes {
            for dep in node.dependencies() {
                edges.insert((dep, node.node_id.clone()));
            }
        }
        Self {
            plan_id: uuid::Uuid::new_v4().to_string(),
            flow_kind,
            nodes,
            edges,
        }
    }

    pub fn node(&self, node_id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }

    pub fn downstream_of(&self, node_id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|(from, _)| from == node_id)
            .map(|(_, to)| to.as_str())
            .collect()
    }

    /// In-degree per node, counting only edges between plan nodes.
    pub fn in_degrees(&self) -> BTreeMap<String, usize> {
        let mut degrees: BTreeMap<String, usize> = self
            .nodes
            .iter()
            .map(|n| (n.node_id.clone(), 0))
            .collect();
        for (_, to) in &self.edges {
            if let Some(d) = degrees.get_mut(to) {
                *d += 1;
            }
        }
        degrees
    }

    /// Kahn's algorithm. Returns node ids in a valid execution order, or
    /// None when the edge set contains a cycle.
    pub fn topological_order(&self) -> Option<Vec<String>> {
        let mut degrees = self.in_degrees();
        let mut ready: Vec<String> = degrees
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| id.clone())
            .collect();
        ready.sort();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(id) = ready.pop() {
            order.push(id.clone());
            for next in self.downstream_of(&id) {
                if let Some(d) = degrees.get_mut(next) {
                    *d -= 1;
                    if *d == 0 {
                        ready.push(next.to_string());
                    }
                }
            }
        }

        (order.len() == self.nodes.len()).then_some(order)
    }

    pub fn is_dag(&self) -> bool {
        self.topological_order().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FlowKind;

    fn linear_plan() -> Plan {
        Plan::from_nodes(
            FlowKind::Plot,
            vec![
                NodeSpec::new("a", NodeKind::Tool, "sql"),
                NodeSpec::new("b", NodeKind::Tool, "pandas").arg("table", "${a.table}"),
                NodeSpec::new("c", NodeKind::Agent, "reducer").after("b"),
            ],
        )
    }

    #[test]
    fn edges_derive_from_args_and_upstream() {
        let plan = linear_plan();
        assert!(plan.edges.contains(&("a".into(), "b".into())));
        assert!(plan.edges.contains(&("b".into(), "c".into())));
        assert_eq!(plan.edges.len(), 2);
    }

    #[test]
    fn topological_order_is_complete() {
        let plan = linear_plan();
        let order = plan.topological_order().unwrap();
        assert_eq!(order.len(), 3);
        let pos = |id: &str| order.iter().position(|n| n == id).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("b") < pos("c"));
    }

    #[test]
    fn cycle_is_detected() {
        let mut plan = linear_plan();
        plan.edges.insert(("c".into(), "a".into()));
        assert!(!plan.is_dag());
        assert!(plan.topological_order().is_none());
    }

    #[test]
    fn max_retries_defaults_to_one() {
        let json = serde_json::json!({
            "node_id": "x", "kind": "tool", "name": "sql", "timeout_ms": 1000
        });
        let spec: NodeSpec = serde_json::from_value(json).unwrap();
        assert_eq!(spec.max_retries, 1);
    }
}
