//! Taskweave Engine — routing, planning, and DAG execution
//!
//! The pipeline: Router classifies a query into a flow and extracts
//! context; Planner materializes the flow into a DAG with argument
//! bindings; Executor schedules the DAG across tool servers and agents
//! with idempotency caching, retries, and cancellation. The run/node store
//! is the single source of truth for state; the artifact store carries the
//! bytes between nodes.

pub mod artifact;
pub mod executor;
pub mod metrics;
pub mod orchestrator;
pub mod planner;
pub mod router;
pub mod store;

pub use artifact::ArtifactStore;
pub use executor::{Executor, ExecutorConfig};
pub use metrics::Metrics;
pub use orchestrator::{NodeView, Orchestrator, RunView, Submission};
pub use planner::Planner;
pub use router::{RouteDecision, Router};
pub use store::{FsRunStore, MemoryRunStore, RunStore};
