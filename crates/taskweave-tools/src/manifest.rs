//! Manifest discovery — `--manifest` handshake at startup
//!
//! Every declared tool is invoked once with `--manifest`; it must print its
//! method descriptors as one JSON document and exit 0. A tool whose manifest
//! disagrees with the capability index is marked unavailable. Discovery
//! failures never abort startup.

use crate::capability::CapabilityIndex;
use serde::Deserialize;
use std::time::Duration;
use taskweave_core::{Error, Result};
use tracing::{info, warn};

const MANIFEST_TIMEOUT: Duration = Duration::from_secs(5);

/// What a tool prints in response to `--manifest`.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolManifest {
    pub name: String,
    #[serde(default)]
    pub version: String,
    pub methods: Vec<ManifestMethod>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestMethod {
    pub name: String,
    #[serde(default)]
    pub retryable_codes: Vec<i64>,
    #[serde(default)]
    pub wants_inline: bool,
}

/// Run `<binary> --manifest` and parse the output.
pub async fn discover_manifest(
    binary_path: &std::path::Path,
    tool_name: &str,
) -> Result<ToolManifest> {
    let mut command = tokio::process::Command::new(binary_path);
    command.arg("--manifest").kill_on_drop(true);

    let output = tokio::time::timeout(MANIFEST_TIMEOUT, command.output())
        .await
        .map_err(|_| Error::Timeout {
            tool: tool_name.to_string(),
            ms: MANIFEST_TIMEOUT.as_millis() as u64,
        })?
        .map_err(|e| Error::spawn(tool_name, e.to_string()))?;

    if !output.status.success() {
        return Err(Error::protocol(
            tool_name,
            format!("--manifest exited with {}", output.status),
        ));
    }

    serde_json::from_slice(&output.stdout)
        .map_err(|e| Error::protocol(tool_name, format!("invalid manifest: {e}")))
}

/// Verify every index entry against its tool's live manifest.
///
/// Mismatched or unreachable tools are marked unavailable; versions reported
/// by reachable tools are adopted into their idempotency version tags.
/// Returns `(tool, reason)` for every tool taken out of service.
pub async fn verify_index(index: &mut CapabilityIndex) -> Vec<(String, String)> {
    let names: Vec<String> = index.names().map(str::to_string).collect();
    let mut failures = Vec::new();

    for name in names {
        let (binary, declared_methods) = match index.get(&name) {
            Some(tool) => (
                tool.entry.binary_path.clone(),
                tool.entry
                    .methods
                    .iter()
                    .map(|m| (m.name.clone(), m.retryable_codes.clone()))
                    .collect::<Vec<_>>(),
            ),
            None => continue,
        };

        match discover_manifest(&binary, &name).await {
            Ok(manifest) => {
                if let Some(reason) = mismatch(&declared_methods, &manifest) {
                    warn!(tool = %name, %reason, "manifest mismatch; marking unavailable");
                    index.mark_unavailable(&name);
                    failures.push((name, reason));
                } else {
                    if !manifest.version.is_empty() {
                        index.set_version(&name, &manifest.version);
                    }
                    info!(tool = %name, version = %manifest.version, "manifest verified");
                }
            }
            Err(e) => {
                warn!(tool = %name, error = %e, "manifest discovery failed; marking unavailable");
                index.mark_unavailable(&name);
                failures.push((name, e.to_string()));
            }
        }
    }

    failures
}

fn mismatch(declared: &[(String, Vec<i64>)], manifest: &ToolManifest) -> Option<String> {
    for (method, retryable_codes) in declared {
        let Some(live) = manifest.methods.iter().find(|m| &m.name == method) else {
            return Some(format!("method `{method}` not in manifest"));
        };
        let mut declared_codes = retryable_codes.clone();
        let mut live_codes = live.retryable_codes.clone();
        declared_codes.sort_unstable();
        live_codes.sort_unstable();
        if declared_codes != live_codes {
            return Some(format!("retryable codes for `{method}` differ from manifest"));
        }
    }
    None
}
