//! Agent trait and registry

use std::collections::HashMap;
use std::sync::Arc;
use taskweave_core::{Error, Result};
use tracing::{debug, warn};

/// An in-process pure transform. Implementations must be deterministic
/// given their inputs — the idempotency cache depends on it.
#[async_trait::async_trait]
pub trait Agent: Send + Sync {
    /// Unique agent name (e.g. "viz_spec", "validator").
    fn name(&self) -> &str;

    /// Version tag folded into idempotency keys. Bump when output for the
    /// same input changes.
    fn version(&self) -> &str {
        "1"
    }

    /// Whether this agent's failures may be retried. Default: fatal.
    fn retryable(&self) -> bool {
        false
    }

    /// Transform resolved args into an output document.
    async fn run(&self, args: serde_json::Value) -> Result<serde_json::Value>;
}

pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn Agent>>,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
        }
    }

    /// Register an agent. Replaces any existing agent with the same name.
    pub fn register(&mut self, agent: impl Agent + 'static) {
        let name = agent.name().to_string();
        self.agents.insert(name, Arc::new(agent));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(name).cloned()
    }

    pub async fn execute(&self, name: &str, args: serde_json::Value) -> Result<serde_json::Value> {
        let Some(agent) = self.agents.get(name) else {
            warn!(agent = name, "agent not registered");
            return Err(Error::agent(name, "agent not registered"));
        };
        debug!(agent = name, "dispatching agent");
        match agent.run(args).await {
            // Agents opt into retryability per-implementation, not per-call.
            Err(Error::Agent {
                agent: who,
                message,
                ..
            }) => {
                warn!(agent = name, %message, "agent failed");
                Err(Error::Agent {
                    agent: who,
                    message,
                    retryable: agent.retryable(),
                })
            }
            other => other,
        }
    }

    /// Version tag for idempotency keys, `name@version`.
    pub fn version_tag(&self, name: &str) -> String {
        match self.agents.get(name) {
            Some(agent) => format!("{}@{}", agent.name(), agent.version()),
            None => format!("{name}@unknown"),
        }
    }

    pub fn list(&self) -> Vec<&str> {
        self.agents.keys().map(String::as_str).collect()
    }
}
