//! validator agent — shape checks over upstream outputs

use crate::registry::Agent;
use serde_json::{json, Value};
use taskweave_core::Result;

/// Validates whichever upstream shape it was bound to: a `table`, a
/// `record`, or a generic `result`. Problems are reported in the output,
/// not as node failure — the reducer folds them into the run summary.
pub struct ValidatorAgent;

impl ValidatorAgent {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ValidatorAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Agent for ValidatorAgent {
    fn name(&self) -> &str {
        "validator"
    }

    async fn run(&self, args: Value) -> Result<Value> {
        let mut problems: Vec<String> = Vec::new();

        if let Some(table) = args.get("table") {
            validate_table(table, &mut problems);
        }
        if let Some(record) = args.get("record") {
            validate_record(record, &mut problems);
        }
        if let Some(result) = args.get("result") {
            if result.is_null() {
                problems.push("result is null".into());
            }
        }
        if args.get("table").is_none()
            && args.get("record").is_none()
            && args.get("result").is_none()
        {
            problems.push("nothing to validate: no table, record, or result bound".into());
        }

        Ok(json!({ "ok": problems.is_empty(), "problems": problems }))
    }
}

fn validate_table(table: &Value, problems: &mut Vec<String>) {
    let rows = match table {
        Value::Array(rows) => Some(rows),
        Value::Object(obj) => obj.get("rows").and_then(Value::as_array),
        _ => None,
    };
    let Some(rows) = rows else {
        problems.push("table is not an array of rows".into());
        return;
    };
    if rows.is_empty() {
        problems.push("table has no rows".into());
        return;
    }
    let widths: Vec<usize> = rows
        .iter()
        .filter_map(|r| r.as_array().map(Vec::len))
        .collect();
    if widths.len() != rows.len() {
        problems.push("table contains non-array rows".into());
    } else if widths.windows(2).any(|w| w[0] != w[1]) {
        problems.push("table rows have inconsistent widths".into());
    }
}

fn validate_record(record: &Value, problems: &mut Vec<String>) {
    let Some(obj) = record.as_object() else {
        problems.push("record is not an object".into());
        return;
    };
    if obj.is_empty() {
        problems.push("record is empty".into());
        return;
    }
    if !obj.contains_key("tracking_id") && !obj.contains_key("invoice_number") {
        problems.push("record has neither tracking_id nor invoice_number".into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn valid_table_passes() {
        let out = ValidatorAgent::new()
            .run(json!({"table": [["2024-W17", 1], ["2024-W18", 2]]}))
            .await
            .unwrap();
        assert_eq!(out["ok"], true);
        assert!(out["problems"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn ragged_table_is_flagged() {
        let out = ValidatorAgent::new()
            .run(json!({"table": [["a", 1], ["b"]]}))
            .await
            .unwrap();
        assert_eq!(out["ok"], false);
        assert!(out["problems"][0].as_str().unwrap().contains("inconsistent"));
    }

    #[tokio::test]
    async fn record_needs_an_upsert_key() {
        let out = ValidatorAgent::new()
            .run(json!({"record": {"vendor": "Acme"}}))
            .await
            .unwrap();
        assert_eq!(out["ok"], false);

        let out = ValidatorAgent::new()
            .run(json!({"record": {"invoice_number": "INV-42"}}))
            .await
            .unwrap();
        assert_eq!(out["ok"], true);
    }

    #[tokio::test]
    async fn nothing_bound_is_a_problem_not_an_error() {
        let out = ValidatorAgent::new().run(json!({})).await.unwrap();
        assert_eq!(out["ok"], false);
    }
}
