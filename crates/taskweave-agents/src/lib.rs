//! Taskweave Agents — in-process pure data transforms
//!
//! Agents are the non-tool half of a plan: deterministic functions from
//! resolved JSON args to a JSON output, indexed by name. They hold no state
//! and do no I/O; the executor supervises their timeout from outside.
//!
//! To add an agent: create a file in agents/, implement the Agent trait,
//! register it in create_default_registry().

pub mod agents;
pub mod registry;

pub use registry::{Agent, AgentRegistry};

/// The default registry with all builtin agents.
pub fn create_default_registry() -> AgentRegistry {
    let mut registry = AgentRegistry::new();
    registry.register(agents::viz_spec::VizSpecAgent::new());
    registry.register(agents::extraction::ExtractionAgent::new());
    registry.register(agents::validator::ValidatorAgent::new());
    registry.register(agents::reducer::ReducerAgent::new());
    registry
}
