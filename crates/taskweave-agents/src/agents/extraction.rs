//! extraction agent — normalize raw document text into a tracking record

use crate::registry::Agent;
use base64::Engine;
use regex::Regex;
use serde_json::{json, Map, Value};
use taskweave_core::{Error, Result};

/// Pulls invoice number, tracking id, vendor, and total out of extracted
/// document text. The input is `args.text`, or `args.data` which may be
/// base64 (as delivered by an inline-materialized file artifact) or plain
/// text. Fields that don't match are absent from the record.
pub struct ExtractionAgent {
    invoice: Regex,
    tracking: Regex,
    vendor: Regex,
    total: Regex,
}

impl ExtractionAgent {
    pub fn new() -> Self {
        // These patterns are anchored on labels, not layout, so they survive
        // whatever the upstream extractor did to whitespace.
        Self {
            invoice: Regex::new(r"(?i)invoice\s*(?:no\.?|number|#)?\s*[:#]?\s*([A-Z]{2,4}-?\d+)")
                .expect("static regex"),
            tracking: Regex::new(r"(?i)tracking\s*(?:id|no\.?|number|#)?\s*[:#]?\s*([A-Z0-9]{6,})")
                .expect("static regex"),
            vendor: Regex::new(r"(?im)^\s*vendor\s*[:\-]\s*(\S.*?)\s*$").expect("static regex"),
            total: Regex::new(r"(?i)total\s*[:\-]?\s*\$?\s*([0-9][0-9,]*(?:\.[0-9]{1,2})?)")
                .expect("static regex"),
        }
    }

    fn text_of(&self, args: &Value) -> Option<String> {
        if let Some(text) = args.get("text").and_then(Value::as_str) {
            return Some(text.to_string());
        }
        let data = args.get("data").and_then(Value::as_str)?;
        if let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(data) {
            if let Ok(text) = String::from_utf8(bytes) {
                return Some(text);
            }
        }
        Some(data.to_string())
    }

    fn capture(&self, re: &Regex, text: &str) -> Option<String> {
        re.captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
    }
}

impl Default for ExtractionAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Agent for ExtractionAgent {
    fn name(&self) -> &str {
        "extraction"
    }

    async fn run(&self, args: Value) -> Result<Value> {
        let text = self
            .text_of(&args)
            .ok_or_else(|| Error::agent("extraction", "args.text or args.data required"))?;

        let mut record = Map::new();
        if let Some(invoice) = self.capture(&self.invoice, &text) {
            record.insert("invoice_number".into(), json!(invoice));
        }
        if let Some(tracking) = self.capture(&self.tracking, &text) {
            record.insert("tracking_id".into(), json!(tracking));
        }
        if let Some(vendor) = self.capture(&self.vendor, &text) {
            record.insert("vendor".into(), json!(vendor));
        }
        if let Some(total) = self.capture(&self.total, &text) {
            record.insert("total".into(), json!(total));
        }

        // Downstream upsert is keyed on one of these; a record with neither
        // cannot be stored.
        if !record.contains_key("invoice_number") && !record.contains_key("tracking_id") {
            return Err(Error::agent(
                "extraction",
                "no invoice number or tracking id found in document",
            ));
        }

        Ok(json!({ "record": Value::Object(record) }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const INVOICE_TEXT: &str = "ACME LOGISTICS\nVendor: Acme Corp\nInvoice Number: INV-42\nTracking #: TRK99881\nTotal: $1,234.50\n";

    #[tokio::test]
    async fn extracts_all_labeled_fields() {
        let agent = ExtractionAgent::new();
        let out = agent.run(json!({"text": INVOICE_TEXT})).await.unwrap();
        let record = &out["record"];
        assert_eq!(record["invoice_number"], "INV-42");
        assert_eq!(record["tracking_id"], "TRK99881");
        assert_eq!(record["vendor"], "Acme Corp");
        assert_eq!(record["total"], "1,234.50");
    }

    #[tokio::test]
    async fn base64_data_is_decoded() {
        let agent = ExtractionAgent::new();
        let encoded = base64::engine::general_purpose::STANDARD.encode("Invoice No: AB-7\n");
        let out = agent.run(json!({"data": encoded})).await.unwrap();
        assert_eq!(out["record"]["invoice_number"], "AB-7");
    }

    #[tokio::test]
    async fn plain_data_falls_back_to_text() {
        let agent = ExtractionAgent::new();
        let out = agent
            .run(json!({"data": "invoice number INV-9"}))
            .await
            .unwrap();
        assert_eq!(out["record"]["invoice_number"], "INV-9");
    }

    #[tokio::test]
    async fn missing_keys_are_an_agent_error() {
        let agent = ExtractionAgent::new();
        let err = agent
            .run(json!({"text": "nothing recognizable here"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "AgentError");
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn absent_fields_are_omitted_not_null() {
        let agent = ExtractionAgent::new();
        let out = agent.run(json!({"text": "Invoice # INV-1"})).await.unwrap();
        let record = out["record"].as_object().unwrap();
        assert!(record.contains_key("invoice_number"));
        assert!(!record.contains_key("vendor"));
        assert!(!record.contains_key("total"));
    }
}
