//! Planner — expand a routed flow into an executable DAG
//!
//! Known flows use hard-coded templates with parameter slots filled from
//! the context. Dynamic flows are synthesized by backward-chaining over the
//! capability index. Either way the planner validates its own output before
//! handing it to the executor.

use std::collections::BTreeSet;
use std::sync::Arc;
use taskweave_core::{Context, Error, FlowKind, NodeKind, NodeSpec, Plan, Result};
use taskweave_tools::CapabilityIndex;
use tracing::debug;

const DEFAULT_AGENT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_TOOL_TIMEOUT_MS: u64 = 30_000;

pub struct Planner {
    index: Arc<CapabilityIndex>,
}

impl Planner {
    pub fn new(index: Arc<CapabilityIndex>) -> Self {
        Self { index }
    }

    pub fn plan(
        &self,
        flow_kind: FlowKind,
        context: &Context,
        suggested_tools: &[String],
    ) -> Result<Plan> {
        let plan = match flow_kind {
            FlowKind::Plot => self.plot_template(context),
            FlowKind::PdfTracking => self.pdf_tracking_template(context)?,
            FlowKind::Dynamic => self.synthesize(context, suggested_tools)?,
        };
        self.validate(&plan)?;
        debug!(plan_id = %plan.plan_id, flow = %plan.flow_kind, nodes = plan.nodes.len(), "plan ready");
        Ok(plan)
    }

    fn tool_timeout(&self, name: &str) -> u64 {
        self.index
            .get(name)
            .map(|t| t.entry.default_timeout_ms)
            .unwrap_or(DEFAULT_TOOL_TIMEOUT_MS)
    }

    fn tool_node(&self, name: &str) -> NodeSpec {
        NodeSpec::new(name, NodeKind::Tool, name).timeout_ms(self.tool_timeout(name))
    }

    fn agent_node(&self, name: &str) -> NodeSpec {
        NodeSpec::new(name, NodeKind::Agent, name).timeout_ms(DEFAULT_AGENT_TIMEOUT_MS)
    }

    /// plot: sql -> pandas_transform -> viz_spec -> plotly_render -> reducer,
    /// with validator parallel to plotly_render, both gated on pandas_transform.
    fn plot_template(&self, ctx: &Context) -> Plan {
        let where_clause = sql_where(ctx);
        let title = plot_title(ctx);

        Plan::from_nodes(
            FlowKind::Plot,
            vec![
                self.tool_node("sql").arg("where", where_clause.as_str()),
                self.tool_node("pandas_transform").arg("table", "${sql.table}"),
                self.agent_node("viz_spec")
                    .arg("table", "${pandas_transform.table}")
                    .arg("title", title.as_str()),
                self.tool_node("plotly_render")
                    .arg("data", "${pandas_transform.table}")
                    .arg("spec", "${viz_spec.spec}"),
                self.agent_node("validator").arg("table", "${pandas_transform.table}"),
                self.agent_node("reducer")
                    .arg(
                        "render",
                        serde_json::json!({"artifacts": "${plotly_render.artifacts}"}),
                    )
                    .arg(
                        "validation",
                        serde_json::json!({
                            "ok": "${validator.ok}",
                            "problems": "${validator.problems}",
                        }),
                    ),
            ],
        )
    }

    /// pdf_tracking: file_read -> extraction -> tracking_upsert -> validator -> reducer.
    fn pdf_tracking_template(&self, ctx: &Context) -> Result<Plan> {
        let file_path = ctx
            .file_path
            .as_deref()
            .ok_or_else(|| Error::plan("pdf_tracking flow requires a file_path"))?;

        Ok(Plan::from_nodes(
            FlowKind::PdfTracking,
            vec![
                self.tool_node("file_read").arg("path", file_path),
                self.agent_node("extraction").arg("data", "${file_read.data}"),
                self.tool_node("tracking_upsert")
                    .arg("record", "${extraction.record}")
                    // Upsert key preference: tracking_id, else invoice_number.
                    .arg(
                        "key_fields",
                        serde_json::json!(["tracking_id", "invoice_number"]),
                    ),
                self.agent_node("validator")
                    .arg("record", "${extraction.record}")
                    .after("tracking_upsert"),
                self.agent_node("reducer")
                    .arg(
                        "upsert",
                        serde_json::json!({"artifacts": "${tracking_upsert.artifacts}"}),
                    )
                    .arg(
                        "validation",
                        serde_json::json!({
                            "ok": "${validator.ok}",
                            "problems": "${validator.problems}",
                        }),
                    ),
            ],
        ))
    }

    /// Greedy backward-chaining over the capability index.
    ///
    /// Start from the best suggested tool as the terminal, then satisfy each
    /// required input either from the context or from another tool whose
    /// declared outputs provide it. Ties prefer tools that need no further
    /// chaining, then the lexicographically earlier name. A validator and a
    /// reducer close the plan.
    fn synthesize(&self, ctx: &Context, suggested_tools: &[String]) -> Result<Plan> {
        let terminal = suggested_tools
            .iter()
            .find(|name| self.index.get_available(name.as_str()).is_some())
            .ok_or_else(|| Error::plan("dynamic flow: no available tool matches the query"))?;

        let mut nodes: Vec<NodeSpec> = Vec::new();
        let mut planned: BTreeSet<String> = BTreeSet::new();
        self.chain_tool(terminal, ctx, &mut nodes, &mut planned, 0)?;

        // Source-first order reads better in stored plans.
        nodes.reverse();

        let terminal_id = terminal.clone();
        nodes.push(
            self.agent_node("validator")
                .arg("result", format!("${{{terminal_id}.artifacts}}").as_str())
                .after(terminal_id.as_str()),
        );
        nodes.push(
            self.agent_node("reducer")
                .arg(
                    "result",
                    serde_json::json!({"artifacts": format!("${{{terminal_id}.artifacts}}")}),
                )
                .arg(
                    "validation",
                    serde_json::json!({
                        "ok": "${validator.ok}",
                        "problems": "${validator.problems}",
                    }),
                ),
        );

        Ok(Plan::from_nodes(FlowKind::Dynamic, nodes))
    }

    /// Plan `tool_name`, recursively planning producers for inputs the
    /// context cannot provide. Appends terminal-first; caller reverses.
    fn chain_tool(
        &self,
        tool_name: &str,
        ctx: &Context,
        nodes: &mut Vec<NodeSpec>,
        planned: &mut BTreeSet<String>,
        depth: usize,
    ) -> Result<()> {
        if depth > 8 {
            return Err(Error::plan(format!(
                "dynamic flow: chain too deep at `{tool_name}`"
            )));
        }
        if !planned.insert(tool_name.to_string()) {
            return Ok(());
        }

        let tool = self
            .index
            .get_available(tool_name)
            .ok_or_else(|| Error::plan(format!("dynamic flow: tool `{tool_name}` unavailable")))?;
        let method = tool
            .default_method()
            .ok_or_else(|| Error::plan(format!("tool `{tool_name}` declares no methods")))?;

        let mut spec = self.tool_node(tool_name);
        let mut producers: Vec<String> = Vec::new();

        for input in method.required_inputs() {
            if let Some(value) = context_value(input, ctx) {
                spec.args.insert(input.to_string(), value);
                continue;
            }
            let producer = self.find_producer(input, tool_name, planned)?;
            spec.args.insert(
                input.to_string(),
                taskweave_core::Value::from(format!("${{{producer}.{input}}}").as_str()),
            );
            producers.push(producer);
        }

        nodes.push(spec);
        for producer in producers {
            self.chain_tool(&producer, ctx, nodes, planned, depth + 1)?;
        }
        Ok(())
    }

    /// Pick the tool whose declared outputs include `input`. Prefer tools
    /// with no unsatisfied inputs of their own (fewer nodes), then the
    /// lexicographically earlier name; the index iterates sorted by name.
    fn find_producer(
        &self,
        input: &str,
        consumer: &str,
        planned: &BTreeSet<String>,
    ) -> Result<String> {
        let mut best: Option<(bool, String)> = None;
        for tool in self.index.available() {
            if tool.name == consumer || planned.contains(&tool.name) {
                continue;
            }
            let Some(method) = tool.default_method() else {
                continue;
            };
            if !method.declared_outputs().contains(&input) {
                continue;
            }
            let needs_chaining = !method.required_inputs().is_empty();
            let candidate = (needs_chaining, tool.name.clone());
            if best.as_ref().map(|b| candidate < *b).unwrap_or(true) {
                best = Some(candidate);
            }
        }
        best.map(|(_, name)| name).ok_or_else(|| {
            Error::plan(format!(
                "dynamic flow: no tool produces `{input}` required by `{consumer}`"
            ))
        })
    }

    /// The planner rejects its own output before anyone executes it.
    fn validate(&self, plan: &Plan) -> Result<()> {
        if plan.nodes.is_empty() {
            return Err(Error::plan("plan has no nodes"));
        }

        let ids: BTreeSet<&str> = plan.nodes.iter().map(|n| n.node_id.as_str()).collect();
        if ids.len() != plan.nodes.len() {
            return Err(Error::plan("duplicate node ids"));
        }

        for node in &plan.nodes {
            for dep in node.dependencies() {
                if !ids.contains(dep.as_str()) {
                    return Err(Error::plan(format!(
                        "node `{}` references `{dep}`, which is not in the plan",
                        node.node_id
                    )));
                }
            }
            // Required tool inputs must be bound.
            if node.kind == NodeKind::Tool {
                if let Some(method) = self
                    .index
                    .get(&node.name)
                    .and_then(|t| t.default_method())
                {
                    for input in method.required_inputs() {
                        if !node.args.contains_key(input) {
                            return Err(Error::plan(format!(
                                "node `{}` is missing required arg `{input}`",
                                node.node_id
                            )));
                        }
                    }
                }
            }
        }

        if !plan.is_dag() {
            return Err(Error::plan("edge set contains a cycle"));
        }
        Ok(())
    }
}

fn sql_where(ctx: &Context) -> String {
    let mut predicates = Vec::new();
    if let Some(outlet) = ctx.outlet_id {
        predicates.push(format!("outlet_id = {outlet}"));
    }
    if let Some(product) = &ctx.product_filter {
        predicates.push(format!("product = '{product}'"));
    }
    if let Some((lo, hi)) = &ctx.week_range {
        predicates.push(format!("week BETWEEN '{lo}' AND '{hi}'"));
    }
    if predicates.is_empty() {
        "1 = 1".to_string()
    } else {
        predicates.join(" AND ")
    }
}

/// Map a schema input name to a context-provided literal, when one exists.
fn context_value(input: &str, ctx: &Context) -> Option<taskweave_core::Value> {
    use taskweave_core::Value;
    match input {
        "where" => Some(Value::from(sql_where(ctx).as_str())),
        "path" | "file_path" => ctx.file_path.as_deref().map(Value::from),
        "outlet_id" => ctx
            .outlet_id
            .map(|o| Value::from_json(serde_json::json!(o))),
        "product" | "product_filter" => ctx.product_filter.as_deref().map(Value::from),
        "tracking_id" => ctx.tracking_id.as_deref().map(Value::from),
        "invoice_number" => ctx.invoice_number.as_deref().map(Value::from),
        "week_range" => ctx.week_range.map(|(lo, hi)| {
            Value::from_json(serde_json::json!([lo.to_string(), hi.to_string()]))
        }),
        _ => None,
    }
}

fn plot_title(ctx: &Context) -> String {
    let subject = ctx.product_filter.as_deref().unwrap_or("sales");
    match ctx.outlet_id {
        Some(outlet) => format!("{subject} for outlet {outlet} by week"),
        None => format!("{subject} by week"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskweave_core::{IsoWeek, Value};

    fn week(s: &str) -> IsoWeek {
        s.parse().unwrap()
    }

    fn planner() -> Planner {
        Planner::new(Arc::new(CapabilityIndex::default()))
    }

    fn full_context() -> Context {
        Context {
            outlet_id: Some(42),
            product_filter: Some("widget".into()),
            week_count: Some(2),
            week_range: Some((week("2024-W19"), week("2024-W20"))),
            ..Default::default()
        }
    }

    #[test]
    fn plot_template_shape() {
        let plan = planner().plan(FlowKind::Plot, &full_context(), &[]).unwrap();
        let ids: Vec<_> = plan.nodes.iter().map(|n| n.node_id.as_str()).collect();
        assert_eq!(
            ids,
            ["sql", "pandas_transform", "viz_spec", "plotly_render", "validator", "reducer"]
        );
        // Validator gates on pandas_transform, in parallel with plotly_render.
        assert!(plan.edges.contains(&("pandas_transform".into(), "validator".into())));
        assert!(plan.edges.contains(&("pandas_transform".into(), "plotly_render".into())));
        assert!(!plan.edges.contains(&("plotly_render".into(), "validator".into())));
        assert!(plan.is_dag());
    }

    #[test]
    fn plot_where_clause_has_all_predicates() {
        let plan = planner().plan(FlowKind::Plot, &full_context(), &[]).unwrap();
        let sql = plan.node("sql").unwrap();
        let Value::String(where_clause) = &sql.args["where"] else {
            panic!("where must be a literal string");
        };
        assert!(where_clause.contains("outlet_id = 42"));
        assert!(where_clause.contains("product = 'widget'"));
        assert!(where_clause.contains("week BETWEEN '2024-W19' AND '2024-W20'"));
    }

    #[test]
    fn plot_without_filters_still_plans() {
        let plan = planner().plan(FlowKind::Plot, &Context::default(), &[]).unwrap();
        let sql = plan.node("sql").unwrap();
        assert_eq!(sql.args["where"], Value::from("1 = 1"));
    }

    #[test]
    fn pdf_template_requires_file() {
        let err = planner()
            .plan(FlowKind::PdfTracking, &Context::default(), &[])
            .unwrap_err();
        assert_eq!(err.kind(), "PlanError");
    }

    #[test]
    fn pdf_template_is_sequential() {
        let ctx = Context {
            file_path: Some("/p/inv.pdf".into()),
            ..Default::default()
        };
        let plan = planner().plan(FlowKind::PdfTracking, &ctx, &[]).unwrap();
        let ids: Vec<_> = plan.nodes.iter().map(|n| n.node_id.as_str()).collect();
        assert_eq!(
            ids,
            ["file_read", "extraction", "tracking_upsert", "validator", "reducer"]
        );
        assert!(plan.edges.contains(&("tracking_upsert".into(), "validator".into())));
        let order = plan.topological_order().unwrap();
        let pos = |id: &str| order.iter().position(|n| n == id).unwrap();
        assert!(pos("file_read") < pos("extraction"));
        assert!(pos("extraction") < pos("tracking_upsert"));
        assert!(pos("tracking_upsert") < pos("validator"));
        assert!(pos("validator") < pos("reducer"));
    }

    fn chaining_index() -> Arc<CapabilityIndex> {
        let entries: std::collections::BTreeMap<String, taskweave_tools::ToolEntry> =
            serde_json::from_value(serde_json::json!({
                "sql": {
                    "binary_path": "/bin/sql",
                    "methods": [{
                        "name": "query",
                        "input_schema": {"required": ["where"]},
                        "output_schema": {"properties": {"table": {}}},
                    }],
                },
                "chart_export": {
                    "binary_path": "/bin/chart_export",
                    "keywords": [r"\bexport\b"],
                    "methods": [{
                        "name": "export",
                        "input_schema": {"required": ["table"]},
                        "output_schema": {"properties": {"artifacts": {}}},
                    }],
                },
            }))
            .unwrap();
        Arc::new(CapabilityIndex::from_entries(entries).unwrap())
    }

    #[test]
    fn dynamic_chains_back_to_a_source() {
        let planner = Planner::new(chaining_index());
        let ctx = Context {
            week_range: Some((week("2024-W19"), week("2024-W20"))),
            ..Default::default()
        };
        let plan = planner
            .plan(FlowKind::Dynamic, &ctx, &["chart_export".to_string()])
            .unwrap();

        let ids: Vec<_> = plan.nodes.iter().map(|n| n.node_id.as_str()).collect();
        assert_eq!(ids, ["sql", "chart_export", "validator", "reducer"]);
        // chart_export's table input is chained to sql's declared output.
        let export = plan.node("chart_export").unwrap();
        assert_eq!(export.args["table"], Value::from("${sql.table}"));
        // sql's where input came from the context.
        let sql = plan.node("sql").unwrap();
        assert!(matches!(&sql.args["where"], Value::String(s) if s.contains("BETWEEN")));
    }

    #[test]
    fn dynamic_with_no_candidates_is_a_plan_error() {
        let planner = Planner::new(chaining_index());
        let err = planner
            .plan(FlowKind::Dynamic, &Context::default(), &["nonexistent".to_string()])
            .unwrap_err();
        assert_eq!(err.kind(), "PlanError");
    }

    #[test]
    fn dynamic_unsatisfiable_input_is_a_plan_error() {
        let entries: std::collections::BTreeMap<String, taskweave_tools::ToolEntry> =
            serde_json::from_value(serde_json::json!({
                "lonely": {
                    "binary_path": "/bin/lonely",
                    "methods": [{
                        "name": "run",
                        "input_schema": {"required": ["mystery_input"]},
                        "output_schema": {"properties": {"artifacts": {}}},
                    }],
                },
            }))
            .unwrap();
        let planner = Planner::new(Arc::new(CapabilityIndex::from_entries(entries).unwrap()));
        let err = planner
            .plan(FlowKind::Dynamic, &Context::default(), &["lonely".to_string()])
            .unwrap_err();
        assert_eq!(err.kind(), "PlanError");
        assert!(err.to_string().contains("mystery_input"));
    }
}
