//! Capability index — the static registry of available tool servers
//!
//! Loaded once at startup from a JSON file mapping tool name to entry, then
//! shared immutably by every run. Keyword patterns are compiled here so the
//! router can score queries without recompiling regexes.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use taskweave_core::{Error, Result};

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_version() -> String {
    "0".to_string()
}

/// One method a tool server answers, with its schemas and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodSpec {
    pub name: String,
    #[serde(default)]
    pub input_schema: serde_json::Value,
    #[serde(default)]
    pub output_schema: serde_json::Value,
    /// JSON-RPC error codes the tool declares transient.
    #[serde(default)]
    pub retryable_codes: Vec<i64>,
    /// Tool wants artifact bytes inlined (base64) instead of URIs.
    #[serde(default)]
    pub wants_inline: bool,
}

impl MethodSpec {
    /// Parameter names the input schema marks `required`.
    pub fn required_inputs(&self) -> Vec<&str> {
        self.input_schema
            .get("required")
            .and_then(|r| r.as_array())
            .map(|items| items.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default()
    }

    /// Output field names declared in the output schema.
    pub fn declared_outputs(&self) -> Vec<&str> {
        self.output_schema
            .get("properties")
            .and_then(|p| p.as_object())
            .map(|props| props.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

/// Raw index entry for one tool, as it appears in the index file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEntry {
    pub binary_path: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub methods: Vec<MethodSpec>,
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "default_version")]
    pub version: String,
}

/// A tool entry with its keyword patterns compiled and its availability
/// resolved by manifest discovery.
#[derive(Debug)]
pub struct ToolCapability {
    pub name: String,
    pub entry: ToolEntry,
    keyword_patterns: Vec<Regex>,
    pub available: bool,
}

impl ToolCapability {
    fn compile(name: String, entry: ToolEntry) -> Result<Self> {
        let mut keyword_patterns = Vec::with_capacity(entry.keywords.len());
        for pattern in &entry.keywords {
            let re = RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| {
                    Error::Config(format!("tool `{name}` keyword `{pattern}`: {e}"))
                })?;
            keyword_patterns.push(re);
        }
        Ok(Self {
            name,
            entry,
            keyword_patterns,
            available: true,
        })
    }

    /// How many keyword patterns match the query text.
    pub fn keyword_score(&self, text: &str) -> usize {
        self.keyword_patterns
            .iter()
            .filter(|re| re.is_match(text))
            .count()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.entry.tags.iter().any(|t| t == tag)
    }

    pub fn method(&self, name: &str) -> Option<&MethodSpec> {
        self.entry.methods.iter().find(|m| m.name == name)
    }

    /// The method a plan node dispatches when it names only the tool.
    /// Servers in this system are single-method; the first declared method
    /// is the default.
    pub fn default_method(&self) -> Option<&MethodSpec> {
        self.entry.methods.first()
    }

    pub fn is_retryable_code(&self, method: &str, code: i64) -> bool {
        self.method(method)
            .map(|m| m.retryable_codes.contains(&code))
            .unwrap_or(false)
    }

    /// Version tag folded into idempotency keys.
    pub fn version_tag(&self) -> String {
        format!("{}@{}", self.name, self.entry.version)
    }
}

/// The full registry. Immutable after startup; manifest verification runs
/// before the index is shared and may mark tools unavailable.
#[derive(Debug, Default)]
pub struct CapabilityIndex {
    tools: BTreeMap<String, ToolCapability>,
}

impl CapabilityIndex {
    /// Load and compile the index from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!(
                "cannot read capability index {}: {e}",
                path.as_ref().display()
            ))
        })?;
        let entries: BTreeMap<String, ToolEntry> = serde_json::from_str(&raw)?;
        Self::from_entries(entries)
    }

    pub fn from_entries(entries: BTreeMap<String, ToolEntry>) -> Result<Self> {
        let mut tools = BTreeMap::new();
        for (name, entry) in entries {
            let cap = ToolCapability::compile(name.clone(), entry)?;
            tools.insert(name, cap);
        }
        Ok(Self { tools })
    }

    pub fn get(&self, name: &str) -> Option<&ToolCapability> {
        self.tools.get(name)
    }

    /// Lookup that treats unavailable tools as absent.
    pub fn get_available(&self, name: &str) -> Option<&ToolCapability> {
        self.tools.get(name).filter(|t| t.available)
    }

    pub fn mark_unavailable(&mut self, name: &str) {
        if let Some(tool) = self.tools.get_mut(name) {
            tool.available = false;
        }
    }

    pub fn set_version(&mut self, name: &str, version: impl Into<String>) {
        if let Some(tool) = self.tools.get_mut(name) {
            tool.entry.version = version.into();
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolCapability> {
        self.tools.values()
    }

    pub fn available(&self) -> impl Iterator<Item = &ToolCapability> {
        self.tools.values().filter(|t| t.available)
    }

    pub fn available_count(&self) -> usize {
        self.tools.values().filter(|t| t.available).count()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(keywords: &[&str], tags: &[&str]) -> ToolEntry {
        serde_json::from_value(json!({
            "binary_path": "/usr/local/bin/tool",
            "tags": tags,
            "keywords": keywords,
            "methods": [{
                "name": "query",
                "input_schema": {"required": ["where"], "properties": {"where": {"type": "string"}}},
                "output_schema": {"properties": {"table": {}, "rows": {}}},
                "retryable_codes": [503],
            }],
        }))
        .unwrap()
    }

    #[test]
    fn keyword_scoring_is_case_insensitive() {
        let cap = ToolCapability::compile("sql".into(), entry(&["sales", "outlet"], &[])).unwrap();
        assert_eq!(cap.keyword_score("Plot SALES for Outlet 42"), 2);
        assert_eq!(cap.keyword_score("draw a picture"), 0);
    }

    #[test]
    fn method_schema_introspection() {
        let cap = ToolCapability::compile("sql".into(), entry(&[], &[])).unwrap();
        let method = cap.default_method().unwrap();
        assert_eq!(method.required_inputs(), vec!["where"]);
        let mut outputs = method.declared_outputs();
        outputs.sort();
        assert_eq!(outputs, vec!["rows", "table"]);
        assert!(cap.is_retryable_code("query", 503));
        assert!(!cap.is_retryable_code("query", 500));
    }

    #[test]
    fn invalid_keyword_regex_is_config_error() {
        let err = ToolCapability::compile("bad".into(), entry(&["("], &[])).unwrap_err();
        assert_eq!(err.kind(), "ConfigError");
    }

    #[test]
    fn unavailable_tools_hidden_from_available_lookup() {
        let mut entries = BTreeMap::new();
        entries.insert("sql".to_string(), entry(&[], &["data"]));
        let mut index = CapabilityIndex::from_entries(entries).unwrap();
        assert!(index.get_available("sql").is_some());
        index.mark_unavailable("sql");
        assert!(index.get_available("sql").is_none());
        assert!(index.get("sql").is_some());
        assert_eq!(index.available_count(), 0);
    }

    #[test]
    fn version_tag_format() {
        let cap = ToolCapability::compile("sql".into(), entry(&[], &[])).unwrap();
        assert_eq!(cap.version_tag(), "sql@0");
    }
}
