//! Taskweave Core - data model, error taxonomy, and the value/placeholder language

pub mod error;
pub mod hash;
pub mod plan;
pub mod run;
pub mod types;
pub mod value;
pub mod wire;

pub use error::{Error, Result};
pub use hash::idempotency_key;
pub use plan::{NodeKind, NodeSpec, Plan};
pub use run::{NodeError, NodeRun, NodeState, Run, RunState};
pub use types::{Context, FlowKind, IsoWeek, Query};
pub use value::{ArtifactRef, Placeholder, Value};
pub use wire::{RpcError, RpcRequest, RpcResponse};
