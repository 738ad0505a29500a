//! viz_spec agent — synthesize a chart spec from a tabular result

use crate::registry::Agent;
use serde_json::{json, Value};
use taskweave_core::{Error, Result};

/// Derives a render spec from a table: x is the first column, y the first
/// numeric column after it. Chart kind defaults to "line" unless requested.
pub struct VizSpecAgent;

impl VizSpecAgent {
    pub fn new() -> Self {
        Self
    }
}

impl Default for VizSpecAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Agent for VizSpecAgent {
    fn name(&self) -> &str {
        "viz_spec"
    }

    async fn run(&self, args: Value) -> Result<Value> {
        let (columns, rows) = parse_table(args.get("table")).ok_or_else(|| {
            Error::agent("viz_spec", "args.table is not a recognizable table")
        })?;
        if rows.is_empty() {
            return Err(Error::agent("viz_spec", "table has no data rows"));
        }

        let x = columns.first().cloned().unwrap_or_else(|| "x".to_string());
        let y = first_numeric_column(&columns, &rows)
            .ok_or_else(|| Error::agent("viz_spec", "table has no numeric column"))?;

        let kind = args
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or("line")
            .to_string();
        let title = args
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(json!({
            "spec": {
                "kind": kind,
                "x": x,
                "y": y,
                "title": title,
            }
        }))
    }
}

/// Accepts `{columns: [...], rows: [[...]]}` or a bare array of rows whose
/// first row is the header.
fn parse_table(table: Option<&Value>) -> Option<(Vec<String>, Vec<Vec<Value>>)> {
    let table = table?;
    if let Some(obj) = table.as_object() {
        let columns = obj
            .get("columns")?
            .as_array()?
            .iter()
            .map(|c| c.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()?;
        let rows = rows_of(obj.get("rows")?)?;
        return Some((columns, rows));
    }
    let all = rows_of(table)?;
    let (header, rows) = all.split_first()?;
    let columns = header
        .iter()
        .map(|c| c.as_str().map(str::to_string))
        .collect::<Option<Vec<_>>>()?;
    Some((columns, rows.to_vec()))
}

fn rows_of(value: &Value) -> Option<Vec<Vec<Value>>> {
    value
        .as_array()?
        .iter()
        .map(|row| row.as_array().cloned())
        .collect()
}

fn first_numeric_column(columns: &[String], rows: &[Vec<Value>]) -> Option<String> {
    let probe = rows.first()?;
    for (i, cell) in probe.iter().enumerate().skip(1) {
        if cell.is_number() {
            return columns.get(i).cloned();
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn spec_from_columns_and_rows() {
        let agent = VizSpecAgent::new();
        let out = agent
            .run(json!({
                "table": {"columns": ["week", "sales"], "rows": [["2024-W17", 10], ["2024-W18", 12]]},
                "title": "Sales",
            }))
            .await
            .unwrap();
        assert_eq!(out["spec"]["x"], "week");
        assert_eq!(out["spec"]["y"], "sales");
        assert_eq!(out["spec"]["kind"], "line");
        assert_eq!(out["spec"]["title"], "Sales");
    }

    #[tokio::test]
    async fn spec_from_header_row_table() {
        let agent = VizSpecAgent::new();
        let out = agent
            .run(json!({"table": [["week", "units"], ["2024-W17", 3]], "kind": "bar"}))
            .await
            .unwrap();
        assert_eq!(out["spec"]["y"], "units");
        assert_eq!(out["spec"]["kind"], "bar");
    }

    #[tokio::test]
    async fn empty_table_is_an_agent_error() {
        let agent = VizSpecAgent::new();
        let err = agent
            .run(json!({"table": {"columns": ["week"], "rows": []}}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "AgentError");
    }

    #[tokio::test]
    async fn deterministic_output() {
        let agent = VizSpecAgent::new();
        let args = json!({"table": [["w", "n"], ["a", 1]]});
        let a = agent.run(args.clone()).await.unwrap();
        let b = agent.run(args).await.unwrap();
        assert_eq!(a, b);
    }
}
