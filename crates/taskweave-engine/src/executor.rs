//! Executor — topological DAG scheduling with bounded parallelism
//!
//! One driver task per run owns all scheduling state (ready set, in-degree
//! counters, recorded outputs); it is the single serialization point the
//! store's happens-before guarantee hangs off. Workers are semaphore-bounded
//! spawned tasks that report completions back over a channel.
//!
//! Per-node dispatch: resolve placeholders, compute the idempotency key,
//! consult the cache, call the tool client or agent registry, persist the
//! output. Retryable failures get one backoff retry; any terminal failure
//! cancels the rest of the run.

use crate::artifact::ArtifactStore;
use crate::metrics::Metrics;
use crate::store::RunStore;
use base64::Engine;
use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use taskweave_agents::AgentRegistry;
use taskweave_core::{
    hash, ArtifactRef, Error, NodeError, NodeKind, NodeRun, NodeSpec, Plan, Result, Run, RunState,
};
use taskweave_tools::{CapabilityIndex, ToolClient};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct ExecutorConfig {
    /// Concurrent node dispatches per run.
    pub workers: usize,
    /// Fixed backoff before the single retry of a retryable failure.
    pub retry_backoff: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            retry_backoff: Duration::from_millis(250),
        }
    }
}

pub struct Executor {
    store: Arc<dyn RunStore>,
    artifacts: Arc<ArtifactStore>,
    index: Arc<CapabilityIndex>,
    client: ToolClient,
    agents: Arc<AgentRegistry>,
    config: ExecutorConfig,
    metrics: Arc<Metrics>,
    cancels: DashMap<String, CancellationToken>,
}

/// What a worker reports back to the driver.
enum Completion {
    Success {
        node_id: String,
        key: String,
        output: serde_json::Value,
    },
    Failure {
        node_id: String,
        error: NodeError,
    },
    Skipped {
        node_id: String,
    },
}

/// Everything a worker needs, snapshotted by the driver at dispatch time.
struct Dispatch {
    run_id: String,
    spec: NodeSpec,
    /// Recorded outputs of all terminal-successful nodes so far.
    outputs: HashMap<String, serde_json::Value>,
    /// Idempotency keys of all terminal-successful nodes so far.
    keys: HashMap<String, String>,
    cancel: CancellationToken,
}

impl Executor {
    pub fn new(
        store: Arc<dyn RunStore>,
        artifacts: Arc<ArtifactStore>,
        index: Arc<CapabilityIndex>,
        client: ToolClient,
        agents: Arc<AgentRegistry>,
        config: ExecutorConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            artifacts,
            index,
            client,
            agents,
            config,
            metrics,
            cancels: DashMap::new(),
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Persist the plan, a fresh run, and one pending node run per node.
    pub async fn create_run(&self, plan: &Plan) -> Result<Run> {
        self.store.put_plan(plan).await?;
        let run = Run::new(&plan.plan_id);
        self.store.put_run(&run).await?;
        for node in &plan.nodes {
            self.store
                .put_node(&NodeRun::new(&run.run_id, &node.node_id))
                .await?;
        }
        Ok(run)
    }

    /// Begin executing a created run. Idempotent: a run that already left
    /// `created` is not started twice.
    pub async fn start_run(self: &Arc<Self>, run_id: &str) -> Result<()> {
        let mut run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| Error::Store(format!("unknown run `{run_id}`")))?;
        if run.state != RunState::Created {
            return Ok(());
        }
        let plan = self
            .store
            .get_plan(&run.plan_id)
            .await?
            .ok_or_else(|| Error::Store(format!("unknown plan `{}`", run.plan_id)))?;

        run.start();
        self.store.put_run(&run).await?;
        Metrics::incr(&self.metrics.runs_started);
        self.cancels
            .insert(run.run_id.clone(), CancellationToken::new());

        let executor = self.clone();
        tokio::spawn(async move {
            executor.drive(run, plan).await;
        });
        Ok(())
    }

    /// Cancel a run. Running nodes get their child processes terminated via
    /// the run's token; a run that never started is finalized directly.
    pub async fn cancel_run(&self, run_id: &str) -> Result<()> {
        if let Some(token) = self.cancels.get(run_id) {
            token.cancel();
            return Ok(());
        }

        let mut run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| Error::Store(format!("unknown run `{run_id}`")))?;
        if run.state.is_terminal() {
            return Ok(());
        }
        for mut node in self.store.list_nodes(run_id).await? {
            if !node.state.is_terminal() {
                node.skip();
                self.store.put_node(&node).await?;
            }
        }
        run.finish(RunState::Cancelled, None);
        self.store.put_run(&run).await?;
        Metrics::incr(&self.metrics.runs_cancelled);
        Ok(())
    }

    /// The per-run driver: owns the ready set and in-degree counters, feeds
    /// workers, applies completions, finalizes the run.
    async fn drive(self: Arc<Self>, mut run: Run, plan: Plan) {
        let run_id = run.run_id.clone();
        let cancel = self
            .cancels
            .get(&run_id)
            .map(|t| t.clone())
            .unwrap_or_default();

        let plan = Arc::new(plan);
        let mut indegree = plan.in_degrees();
        // BTreeMap iteration keeps the initial ready order deterministic.
        let mut ready: VecDeque<String> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| id.clone())
            .collect();

        let workers = Arc::new(Semaphore::new(self.config.workers));
        let (done_tx, mut done_rx) = mpsc::channel::<Completion>(plan.nodes.len().max(1));

        let mut outputs: HashMap<String, serde_json::Value> = HashMap::new();
        let mut keys: HashMap<String, String> = HashMap::new();
        let mut first_error: Option<NodeError> = None;
        let mut all_success = true;
        let mut in_flight = 0usize;

        loop {
            while let Some(node_id) = ready.pop_front() {
                let Some(spec) = plan.node(&node_id).cloned() else {
                    continue;
                };
                let dispatch = Dispatch {
                    run_id: run_id.clone(),
                    spec,
                    outputs: outputs.clone(),
                    keys: keys.clone(),
                    cancel: cancel.clone(),
                };
                let executor = self.clone();
                let permits = workers.clone();
                let done = done_tx.clone();
                tokio::spawn(async move {
                    let _permit = permits.acquire().await;
                    let completion = executor.dispatch_node(&dispatch).await;
                    let _ = done.send(completion).await;
                });
                in_flight += 1;
            }

            if in_flight == 0 {
                break;
            }
            let Some(completion) = done_rx.recv().await else {
                break;
            };
            in_flight -= 1;

            match completion {
                Completion::Success {
                    node_id,
                    key,
                    output,
                } => {
                    for next in plan.downstream_of(&node_id) {
                        if let Some(d) = indegree.get_mut(next) {
                            *d -= 1;
                            if *d == 0 && first_error.is_none() && !cancel.is_cancelled() {
                                ready.push_back(next.to_string());
                            }
                        }
                    }
                    keys.insert(node_id.clone(), key);
                    outputs.insert(node_id, output);
                }
                Completion::Failure { node_id, error } => {
                    all_success = false;
                    if error.kind != "Cancelled" && first_error.is_none() {
                        warn!(run_id, node_id, kind = %error.kind, "node failed; cancelling run");
                        first_error = Some(error);
                        cancel.cancel();
                    }
                }
                Completion::Skipped { .. } => {
                    all_success = false;
                }
            }
        }

        // Anything never dispatched is skipped.
        if let Ok(nodes) = self.store.list_nodes(&run_id).await {
            for mut node in nodes {
                if !node.state.is_terminal() {
                    node.skip();
                    let _ = self.store.put_node(&node).await;
                }
            }
        }

        let state = if first_error.is_some() {
            Metrics::incr(&self.metrics.runs_failed);
            RunState::Failed
        } else if cancel.is_cancelled() {
            Metrics::incr(&self.metrics.runs_cancelled);
            RunState::Cancelled
        } else if all_success {
            Metrics::incr(&self.metrics.runs_succeeded);
            RunState::Succeeded
        } else {
            Metrics::incr(&self.metrics.runs_failed);
            RunState::Failed
        };
        run.finish(state, first_error);
        if let Err(e) = self.store.put_run(&run).await {
            warn!(run_id, error = %e, "failed to persist final run state");
        }
        self.cancels.remove(&run_id);
        info!(run_id, state = %run.state, "run finished");
    }

    /// Execute one node end to end: resolve, cache-check, dispatch, retry.
    async fn dispatch_node(&self, d: &Dispatch) -> Completion {
        let node_id = d.spec.node_id.clone();

        // Cooperative cancellation, checked before every dispatch.
        if d.cancel.is_cancelled() {
            self.skip_node(&d.run_id, &node_id).await;
            return Completion::Skipped { node_id };
        }

        let mut node = match self.store.get_node(&d.run_id, &node_id).await {
            Ok(Some(node)) => node,
            _ => NodeRun::new(&d.run_id, &node_id),
        };

        let lookup = |name: &str| d.outputs.get(name).cloned();
        let resolved = match resolve_args(&d.spec, &lookup) {
            Ok(value) => value,
            Err(error) => return self.fail_node(node, error, None).await,
        };

        let version_tag = match d.spec.kind {
            NodeKind::Tool => self
                .index
                .get(&d.spec.name)
                .map(|t| t.version_tag())
                .unwrap_or_else(|| format!("{}@unknown", d.spec.name)),
            NodeKind::Agent => self.agents.version_tag(&d.spec.name),
        };
        let key = hash::node_idempotency_key(&d.spec, &|n| d.keys.get(n).cloned(), &version_tag);
        node.idempotency_key = key.clone();

        // Idempotency cache: reuse a prior succeeded record with this key,
        // as long as its artifacts still resolve.
        if let Ok(Some(prior)) = self.store.find_cached(&key).await {
            match self.adopt_cached(&d.run_id, &prior).await {
                Ok(true) => {
                    debug!(run_id = %d.run_id, node_id, "idempotency cache hit");
                    node.mark_cached(&key, prior.output.clone());
                    if let Err(e) = self.store.put_node(&node).await {
                        return self.fail_node(node, Error::Store(e.to_string()), None).await;
                    }
                    Metrics::incr(&self.metrics.cache_hits);
                    return Completion::Success {
                        node_id,
                        key,
                        output: prior.output,
                    };
                }
                Ok(false) => {
                    debug!(run_id = %d.run_id, node_id, "cache entry stale; dispatching fresh");
                }
                Err(error) => return self.fail_node(node, error, None).await,
            }
        }

        loop {
            node.begin_attempt();
            if let Err(e) = self.store.put_node(&node).await {
                return self.fail_node(node, Error::Store(e.to_string()), None).await;
            }
            Metrics::incr(&self.metrics.nodes_dispatched);

            let result = match d.spec.kind {
                NodeKind::Tool => self.call_tool(d, &resolved).await,
                NodeKind::Agent => self.call_agent(&d.spec, resolved.clone()).await.map_err(|e| (e, None)),
            };

            match result {
                Ok(raw) => {
                    let output = match self.finish_output(&d.run_id, &node_id, raw).await {
                        Ok(output) => output,
                        Err(error) => return self.fail_node(node, error, None).await,
                    };
                    node.succeed(output.clone());
                    if let Err(e) = self.store.put_node(&node).await {
                        warn!(run_id = %d.run_id, node_id, error = %e, "failed to persist node success");
                    }
                    return Completion::Success {
                        node_id,
                        key,
                        output,
                    };
                }
                Err((error, stderr)) => {
                    let budget_left = node.attempts < d.spec.max_retries + 1;
                    if error.is_retryable() && budget_left && !d.cancel.is_cancelled() {
                        debug!(
                            run_id = %d.run_id,
                            node_id,
                            attempt = node.attempts,
                            error = %error,
                            "retryable failure; backing off"
                        );
                        node.fail(&error, stderr);
                        if let Err(e) = self.store.put_node(&node).await {
                            warn!(run_id = %d.run_id, node_id, error = %e, "failed to persist retry state");
                        }
                        Metrics::incr(&self.metrics.node_retries);
                        tokio::time::sleep(self.config.retry_backoff).await;
                        continue;
                    }
                    return self.fail_node(node, error, stderr).await;
                }
            }
        }
    }

    async fn call_tool(
        &self,
        d: &Dispatch,
        resolved: &serde_json::Value,
    ) -> std::result::Result<serde_json::Value, (Error, Option<String>)> {
        let tool = self
            .index
            .get_available(&d.spec.name)
            .ok_or_else(|| (Error::spawn(&d.spec.name, "tool unavailable"), None))?;
        let method = tool
            .default_method()
            .cloned()
            .ok_or_else(|| (Error::protocol(&d.spec.name, "no methods declared"), None))?;

        let params = self
            .prepare_params(&d.run_id, resolved.clone(), method.wants_inline)
            .await
            .map_err(|e| (e, None))?;

        Metrics::incr(&self.metrics.tool_calls);
        self.client
            .call(
                tool,
                &method.name,
                params,
                Duration::from_millis(d.spec.timeout_ms),
                &d.cancel,
            )
            .await
            .map_err(|failure| {
                let stderr = (!failure.stderr.is_empty()).then_some(failure.stderr);
                (failure.error, stderr)
            })
    }

    /// Agents run in-process under a supervising timer; they are never
    /// interrupted mid-call.
    async fn call_agent(&self, spec: &NodeSpec, args: serde_json::Value) -> Result<serde_json::Value> {
        Metrics::incr(&self.metrics.agent_calls);
        match tokio::time::timeout(
            Duration::from_millis(spec.timeout_ms),
            self.agents.execute(&spec.name, args),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::AgentTimeout {
                agent: spec.name.clone(),
                ms: spec.timeout_ms,
            }),
        }
    }

    /// Verify artifact references in resolved params exist; inline their
    /// bytes (base64) when the method asks for it.
    async fn prepare_params(
        &self,
        run_id: &str,
        mut params: serde_json::Value,
        wants_inline: bool,
    ) -> Result<serde_json::Value> {
        let mut refs = Vec::new();
        collect_artifact_refs(&params, &mut refs);
        for art in &refs {
            if !self.artifacts.exists(run_id, art).await {
                return Err(Error::MissingArtifact(format!("{art} (run {run_id})")));
            }
        }
        if wants_inline {
            for art in &refs {
                let bytes = self.artifacts.read(run_id, art).await?;
                let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
                replace_string(&mut params, &art.to_string(), &encoded);
            }
        }
        Ok(params)
    }

    /// Normalize a node's raw result: persist declared blobs as artifacts
    /// and guarantee an `artifacts` array on every output.
    async fn finish_output(
        &self,
        run_id: &str,
        node_id: &str,
        raw: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let mut obj = match raw {
            serde_json::Value::Object(map) => map,
            other => {
                let mut map = serde_json::Map::new();
                map.insert("result".to_string(), other);
                map
            }
        };

        let mut artifacts: Vec<String> = obj
            .get("artifacts")
            .and_then(|a| a.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        if let Some(blobs) = obj.remove("blobs") {
            let blobs = blobs
                .as_array()
                .cloned()
                .ok_or_else(|| Error::SchemaViolation("blobs must be an array".into()))?;
            for blob in blobs {
                let name = blob
                    .get("name")
                    .and_then(|n| n.as_str())
                    .ok_or_else(|| Error::SchemaViolation("blob without a name".into()))?;
                let data = blob
                    .get("data_base64")
                    .and_then(|d| d.as_str())
                    .ok_or_else(|| Error::SchemaViolation(format!("blob `{name}` without data")))?;
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(data)
                    .map_err(|e| Error::SchemaViolation(format!("blob `{name}`: {e}")))?;
                let art = self.artifacts.put(run_id, node_id, name, &bytes).await?;
                artifacts.push(art.to_string());
            }
        }

        artifacts.sort();
        artifacts.dedup();
        obj.insert("artifacts".to_string(), serde_json::json!(artifacts));
        Ok(serde_json::Value::Object(obj))
    }

    /// Check a prior record's artifacts are resolvable, then copy them into
    /// this run's scope so its URIs resolve for the run's lifetime.
    async fn adopt_cached(&self, run_id: &str, prior: &NodeRun) -> Result<bool> {
        let mut uris = Vec::new();
        collect_artifact_refs(&prior.output, &mut uris);
        for art in &uris {
            if !self.artifacts.exists(&prior.run_id, art).await {
                return Ok(false);
            }
        }
        for art in &uris {
            if prior.run_id != run_id {
                self.artifacts
                    .copy_between_runs(&prior.run_id, run_id, art)
                    .await?;
            }
        }
        Ok(true)
    }

    async fn fail_node(
        &self,
        mut node: NodeRun,
        error: Error,
        stderr: Option<String>,
    ) -> Completion {
        let node_id = node.node_id.clone();
        if node.attempts == 0 {
            // Failures before any attempt (resolution, store) still count one.
            node.begin_attempt();
        }
        node.fail(&error, stderr);
        if let Err(e) = self.store.put_node(&node).await {
            warn!(node_id, error = %e, "failed to persist node failure");
        }
        Completion::Failure {
            node_id,
            error: NodeError::from_error(&error),
        }
    }

    async fn skip_node(&self, run_id: &str, node_id: &str) {
        if let Ok(Some(mut node)) = self.store.get_node(run_id, node_id).await {
            if !node.state.is_terminal() {
                node.skip();
                let _ = self.store.put_node(&node).await;
            }
        }
    }
}

fn resolve_args(
    spec: &NodeSpec,
    lookup: &dyn Fn(&str) -> Option<serde_json::Value>,
) -> Result<serde_json::Value> {
    let mut resolved = serde_json::Map::new();
    for (key, value) in &spec.args {
        resolved.insert(key.clone(), value.resolve(lookup)?);
    }
    Ok(serde_json::Value::Object(resolved))
}

fn collect_artifact_refs(value: &serde_json::Value, out: &mut Vec<ArtifactRef>) {
    match value {
        serde_json::Value::String(s) => {
            if let Some(art) = ArtifactRef::parse(s) {
                out.push(art);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                collect_artifact_refs(item, out);
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values() {
                collect_artifact_refs(item, out);
            }
        }
        _ => {}
    }
}

fn replace_string(value: &mut serde_json::Value, from: &str, to: &str) {
    match value {
        serde_json::Value::String(s) if s == from => *s = to.to_string(),
        serde_json::Value::Array(items) => {
            for item in items {
                replace_string(item, from, to);
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values_mut() {
                replace_string(item, from, to);
            }
        }
        _ => {}
    }
}
