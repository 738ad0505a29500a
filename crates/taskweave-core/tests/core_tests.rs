//! Tests for taskweave-core: plan serde, value language, state machines, errors

use std::collections::BTreeMap;
use taskweave_core::*;

// ===========================================================================
// Plan serde
// ===========================================================================

fn plot_like_plan() -> Plan {
    Plan::from_nodes(
        FlowKind::Plot,
        vec![
            NodeSpec::new("sql", NodeKind::Tool, "sql")
                .arg("where", "week BETWEEN '2024-W17' AND '2024-W20'"),
            NodeSpec::new("pandas_transform", NodeKind::Tool, "pandas_transform")
                .arg("table", "${sql.table}"),
            NodeSpec::new("viz_spec", NodeKind::Agent, "viz_spec")
                .arg("table", "${pandas_transform.table}"),
            NodeSpec::new("plotly_render", NodeKind::Tool, "plotly_render")
                .arg("data", "${pandas_transform.table}")
                .arg("spec", "${viz_spec.spec}"),
            NodeSpec::new("validator", NodeKind::Agent, "validator")
                .arg("table", "${pandas_transform.table}"),
            NodeSpec::new("reducer", NodeKind::Agent, "reducer")
                .after("plotly_render")
                .after("validator"),
        ],
    )
}

#[test]
fn plan_roundtrips_through_json() {
    let plan = plot_like_plan();
    let json = serde_json::to_string(&plan).unwrap();
    let back: Plan = serde_json::from_str(&json).unwrap();
    assert_eq!(back.plan_id, plan.plan_id);
    assert_eq!(back.nodes.len(), plan.nodes.len());
    assert_eq!(back.edges, plan.edges);
    // Placeholders survive the roundtrip as tagged variants.
    let pandas = back.node("pandas_transform").unwrap();
    assert!(matches!(pandas.args["table"], Value::Placeholder(_)));
}

#[test]
fn plan_edges_capture_fan_out_and_fan_in() {
    let plan = plot_like_plan();
    // pandas_transform fans out to viz_spec, plotly_render, validator.
    assert_eq!(plan.downstream_of("pandas_transform").len(), 3);
    // reducer fans in from plotly_render and validator.
    let degrees = plan.in_degrees();
    assert_eq!(degrees["reducer"], 2);
    assert!(plan.is_dag());
}

#[test]
fn node_ids_stay_stable_across_serde() {
    let plan = plot_like_plan();
    let back: Plan =
        serde_json::from_str(&serde_json::to_string(&plan).unwrap()).unwrap();
    let ids: Vec<_> = back.nodes.iter().map(|n| n.node_id.as_str()).collect();
    assert_eq!(
        ids,
        ["sql", "pandas_transform", "viz_spec", "plotly_render", "validator", "reducer"]
    );
}

// ===========================================================================
// Context
// ===========================================================================

#[test]
fn context_skips_absent_fields() {
    let ctx = Context {
        week_count: Some(4),
        week_range: Some((
            "2024-W17".parse().unwrap(),
            "2024-W20".parse().unwrap(),
        )),
        ..Default::default()
    };
    let json = serde_json::to_value(&ctx).unwrap();
    assert_eq!(json["week_count"], 4);
    assert_eq!(json["week_range"][0], "2024-W17");
    assert!(json.get("outlet_id").is_none());
    assert!(json.get("tracking_id").is_none());
}

#[test]
fn flow_kind_wire_names() {
    assert_eq!(serde_json::to_string(&FlowKind::Plot).unwrap(), r#""plot""#);
    assert_eq!(
        serde_json::to_string(&FlowKind::PdfTracking).unwrap(),
        r#""pdf_tracking""#
    );
    assert_eq!(serde_json::to_string(&FlowKind::Dynamic).unwrap(), r#""dynamic""#);
}

// ===========================================================================
// Idempotency keys across a plan
// ===========================================================================

#[test]
fn keys_computable_in_topological_order() {
    let plan = plot_like_plan();
    let order = plan.topological_order().unwrap();
    let mut keys: BTreeMap<String, String> = BTreeMap::new();
    for id in &order {
        let spec = plan.node(id).unwrap();
        let key = hash::node_idempotency_key(
            spec,
            &|n| keys.get(n).cloned(),
            "test-1",
        );
        keys.insert(id.clone(), key);
    }
    assert_eq!(keys.len(), plan.nodes.len());
    // All keys distinct.
    let distinct: std::collections::BTreeSet<_> = keys.values().collect();
    assert_eq!(distinct.len(), keys.len());
}

#[test]
fn upstream_arg_change_ripples_downstream() {
    let key_chain = |where_clause: &str| {
        let plan = Plan::from_nodes(
            FlowKind::Plot,
            vec![
                NodeSpec::new("sql", NodeKind::Tool, "sql").arg("where", where_clause),
                NodeSpec::new("pandas_transform", NodeKind::Tool, "pandas_transform")
                    .arg("table", "${sql.table}"),
            ],
        );
        let mut keys: BTreeMap<String, String> = BTreeMap::new();
        for id in plan.topological_order().unwrap() {
            let spec = plan.node(&id).unwrap();
            let key = hash::node_idempotency_key(spec, &|n| keys.get(n).cloned(), "1");
            keys.insert(id, key);
        }
        keys
    };

    let a = key_chain("outlet_id = 1");
    let b = key_chain("outlet_id = 2");
    assert_ne!(a["sql"], b["sql"]);
    // Downstream args are textually identical, but the key must still differ.
    assert_ne!(a["pandas_transform"], b["pandas_transform"]);
}

// ===========================================================================
// Error taxonomy
// ===========================================================================

#[test]
fn retryable_classification() {
    assert!(Error::Timeout { tool: "sql".into(), ms: 100 }.is_retryable());
    assert!(Error::spawn("sql", "not found").is_retryable());
    assert!(Error::tool("sql", 503, "busy", true).is_retryable());
    assert!(!Error::tool("sql", 400, "bad request", false).is_retryable());
    assert!(!Error::protocol("sql", "garbage on stdout").is_retryable());
    assert!(!Error::MissingArtifact("artifact://x/y".into()).is_retryable());
    assert!(!Error::AgentTimeout { agent: "validator".into(), ms: 100 }.is_retryable());
}

#[test]
fn node_error_preserves_kind_and_message() {
    let err = Error::tool("sql", 503, "busy", true);
    let node_err = NodeError::from_error(&err);
    assert_eq!(node_err.kind, "ToolError");
    assert!(node_err.message.contains("503"));
    assert!(node_err.message.contains("busy"));
}
