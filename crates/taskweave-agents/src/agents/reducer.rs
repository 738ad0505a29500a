//! reducer agent — fold terminal node outputs into the run summary

use crate::registry::Agent;
use serde_json::{json, Value};
use taskweave_core::Result;

/// The last node of every flow. Collects artifact URIs from all bound
/// inputs, folds in validation verdicts, and emits a one-line summary.
pub struct ReducerAgent;

impl ReducerAgent {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ReducerAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Agent for ReducerAgent {
    fn name(&self) -> &str {
        "reducer"
    }

    async fn run(&self, args: Value) -> Result<Value> {
        let mut artifacts = Vec::new();
        collect_artifacts(&args, &mut artifacts);
        artifacts.sort();
        artifacts.dedup();

        let validation_ok = args
            .get("validation")
            .and_then(|v| v.get("ok"))
            .and_then(Value::as_bool);
        let input_count = args.as_object().map(|o| o.len()).unwrap_or(0);

        let summary = match validation_ok {
            Some(true) | None => format!(
                "reduced {} input(s); {} artifact(s)",
                input_count,
                artifacts.len()
            ),
            Some(false) => {
                let problems = args
                    .get("validation")
                    .and_then(|v| v.get("problems"))
                    .and_then(Value::as_array)
                    .map(Vec::len)
                    .unwrap_or(0);
                format!(
                    "reduced {} input(s) with {} validation problem(s); {} artifact(s)",
                    input_count,
                    problems,
                    artifacts.len()
                )
            }
        };

        Ok(json!({
            "summary": summary,
            "ok": validation_ok.unwrap_or(true),
            "artifacts": artifacts,
        }))
    }
}

fn collect_artifacts(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) if s.starts_with("artifact://") => out.push(s.clone()),
        Value::Array(items) => {
            for item in items {
                collect_artifacts(item, out);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_artifacts(item, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn collects_artifacts_recursively() {
        let out = ReducerAgent::new()
            .run(json!({
                "render": {"artifacts": ["artifact://plotly_render/plot.png"]},
                "validation": {"ok": true, "problems": []},
            }))
            .await
            .unwrap();
        assert_eq!(out["artifacts"], json!(["artifact://plotly_render/plot.png"]));
        assert_eq!(out["ok"], true);
    }

    #[tokio::test]
    async fn duplicate_artifacts_are_deduped() {
        let out = ReducerAgent::new()
            .run(json!({
                "a": "artifact://x/f.bin",
                "b": ["artifact://x/f.bin"],
            }))
            .await
            .unwrap();
        assert_eq!(out["artifacts"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn validation_problems_reach_the_summary() {
        let out = ReducerAgent::new()
            .run(json!({
                "validation": {"ok": false, "problems": ["table has no rows"]},
            }))
            .await
            .unwrap();
        assert_eq!(out["ok"], false);
        assert!(out["summary"].as_str().unwrap().contains("1 validation problem"));
    }
}
