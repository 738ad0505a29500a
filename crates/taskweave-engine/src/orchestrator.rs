//! Orchestrator — route, plan, and execute behind one facade
//!
//! This is the seam the HTTP gateway (and tests) talk to: submit a query to
//! get a run + plan, start it, watch it, cancel it.

use crate::artifact::ArtifactStore;
use crate::executor::{Executor, ExecutorConfig};
use crate::metrics::Metrics;
use crate::planner::Planner;
use crate::router::Router;
use crate::store::RunStore;
use serde::Serialize;
use std::sync::Arc;
use taskweave_agents::AgentRegistry;
use taskweave_core::{Error, IsoWeek, NodeError, Query, Result, RunState};
use taskweave_tools::{CapabilityIndex, ToolClient, ToolClientConfig};
use tracing::info;

pub struct Orchestrator {
    router: Router,
    planner: Planner,
    executor: Arc<Executor>,
    store: Arc<dyn RunStore>,
    metrics: Arc<Metrics>,
    index: Arc<CapabilityIndex>,
}

/// Result of accepting a query: identifiers the caller polls with.
#[derive(Clone, Debug, Serialize)]
pub struct Submission {
    pub run_id: String,
    pub plan_id: String,
    pub flow_kind: taskweave_core::FlowKind,
}

/// The user-visible view of a run.
#[derive(Clone, Debug, Serialize)]
pub struct RunView {
    pub run_id: String,
    pub state: RunState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<NodeError>,
    pub nodes: Vec<NodeView>,
    pub artifacts: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct NodeView {
    pub node_id: String,
    pub state: taskweave_core::NodeState,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<NodeError>,
}

impl Orchestrator {
    pub fn new(
        index: Arc<CapabilityIndex>,
        agents: Arc<AgentRegistry>,
        store: Arc<dyn RunStore>,
        artifacts: Arc<ArtifactStore>,
        executor_config: ExecutorConfig,
        client_config: ToolClientConfig,
    ) -> Self {
        let metrics = Arc::new(Metrics::default());
        let executor = Arc::new(Executor::new(
            store.clone(),
            artifacts,
            index.clone(),
            ToolClient::new(client_config),
            agents,
            executor_config,
            metrics.clone(),
        ));
        Self {
            router: Router::new(index.clone()),
            planner: Planner::new(index.clone()),
            executor,
            store,
            metrics,
            index,
        }
    }

    /// Route a query, materialize its plan, and create the run (not started).
    /// Router and planner errors surface here; no run is created on failure.
    pub async fn submit(&self, query: &Query) -> Result<Submission> {
        self.submit_at(query, IsoWeek::current()).await
    }

    /// `submit` with an explicit current week, for deterministic callers.
    pub async fn submit_at(&self, query: &Query, current_week: IsoWeek) -> Result<Submission> {
        let decision = self.router.route_at(query, current_week)?;
        let plan = self.planner.plan(
            decision.flow_kind,
            &decision.context,
            &decision.suggested_tools,
        )?;
        let run = self.executor.create_run(&plan).await?;
        info!(
            run_id = %run.run_id,
            plan_id = %plan.plan_id,
            flow = %plan.flow_kind,
            "query accepted"
        );
        Ok(Submission {
            run_id: run.run_id,
            plan_id: plan.plan_id,
            flow_kind: decision.flow_kind,
        })
    }

    pub async fn start(&self, run_id: &str) -> Result<()> {
        self.executor.start_run(run_id).await
    }

    pub async fn cancel(&self, run_id: &str) -> Result<()> {
        self.executor.cancel_run(run_id).await
    }

    /// Assemble the run view: run state, per-node states, and every
    /// artifact URI referenced by a successful node. The run's own error is
    /// the first failing node's, already promoted at finalize time.
    pub async fn status(&self, run_id: &str) -> Result<RunView> {
        let run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| Error::Store(format!("unknown run `{run_id}`")))?;
        let nodes = self.store.list_nodes(run_id).await?;

        let mut artifacts: Vec<String> = Vec::new();
        for node in &nodes {
            if node.state.is_success() {
                if let Some(uris) = node.output.get("artifacts").and_then(|a| a.as_array()) {
                    artifacts.extend(uris.iter().filter_map(|u| u.as_str().map(str::to_string)));
                }
            }
        }
        artifacts.sort();
        artifacts.dedup();

        Ok(RunView {
            run_id: run.run_id,
            state: run.state,
            error: run.error,
            nodes: nodes
                .into_iter()
                .map(|n| NodeView {
                    node_id: n.node_id,
                    state: n.state,
                    attempts: n.attempts,
                    error: n.error,
                })
                .collect(),
            artifacts,
        })
    }

    /// Wait until the run reaches a terminal state. Polling against the
    /// store keeps this usable from tests and CLIs alike.
    pub async fn wait_terminal(&self, run_id: &str) -> Result<RunView> {
        loop {
            let view = self.status(run_id).await?;
            if view.state.is_terminal() {
                return Ok(view);
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    }

    pub fn metrics_snapshot(&self) -> serde_json::Value {
        self.metrics.snapshot()
    }

    pub fn index(&self) -> &CapabilityIndex {
        &self.index
    }
}
