//! Taskweave Tools — capability index and the stdio JSON-RPC tool client
//!
//! Tool servers are external binaries. Each is declared in a capability
//! index file loaded once at startup; each call spawns the binary, writes a
//! single JSON-RPC request line to its stdin, and reads a single response
//! line from its stdout. Standard error is captured for diagnostics only.

pub mod capability;
pub mod client;
pub mod manifest;

pub use capability::{CapabilityIndex, MethodSpec, ToolCapability, ToolEntry};
pub use client::{ToolClient, ToolClientConfig, ToolFailure};
pub use manifest::{discover_manifest, verify_index, ManifestMethod, ToolManifest};
