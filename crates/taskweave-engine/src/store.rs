//! Run/node store — the single source of truth for execution state
//!
//! Keyed by `run_id` and `(run_id, node_id)`, records are JSON. Two
//! backends: a DashMap store for tests and embedded use, and a filesystem
//! store that mirrors every write through the memory store so reads and
//! idempotency-cache lookups never touch disk.

use dashmap::DashMap;
use std::path::{Path, PathBuf};
use taskweave_core::{Error, NodeRun, NodeState, Plan, Result, Run};

#[async_trait::async_trait]
pub trait RunStore: Send + Sync {
    async fn put_plan(&self, plan: &Plan) -> Result<()>;
    async fn get_plan(&self, plan_id: &str) -> Result<Option<Plan>>;

    async fn put_run(&self, run: &Run) -> Result<()>;
    async fn get_run(&self, run_id: &str) -> Result<Option<Run>>;

    async fn put_node(&self, node: &NodeRun) -> Result<()>;
    async fn get_node(&self, run_id: &str, node_id: &str) -> Result<Option<NodeRun>>;
    async fn list_nodes(&self, run_id: &str) -> Result<Vec<NodeRun>>;

    /// Latest `succeeded` node run with this idempotency key, if any.
    /// `cached` records never serve further cache hits; they point back at
    /// an original that is already indexed.
    async fn find_cached(&self, idempotency_key: &str) -> Result<Option<NodeRun>>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryRunStore {
    plans: DashMap<String, Plan>,
    runs: DashMap<String, Run>,
    nodes: DashMap<(String, String), NodeRun>,
    by_key: DashMap<String, NodeRun>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl RunStore for MemoryRunStore {
    async fn put_plan(&self, plan: &Plan) -> Result<()> {
        self.plans.insert(plan.plan_id.clone(), plan.clone());
        Ok(())
    }

    async fn get_plan(&self, plan_id: &str) -> Result<Option<Plan>> {
        Ok(self.plans.get(plan_id).map(|p| p.clone()))
    }

    async fn put_run(&self, run: &Run) -> Result<()> {
        self.runs.insert(run.run_id.clone(), run.clone());
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<Run>> {
        Ok(self.runs.get(run_id).map(|r| r.clone()))
    }

    async fn put_node(&self, node: &NodeRun) -> Result<()> {
        if node.state == NodeState::Succeeded && !node.idempotency_key.is_empty() {
            self.by_key.insert(node.idempotency_key.clone(), node.clone());
        }
        self.nodes
            .insert((node.run_id.clone(), node.node_id.clone()), node.clone());
        Ok(())
    }

    async fn get_node(&self, run_id: &str, node_id: &str) -> Result<Option<NodeRun>> {
        Ok(self
            .nodes
            .get(&(run_id.to_string(), node_id.to_string()))
            .map(|n| n.clone()))
    }

    async fn list_nodes(&self, run_id: &str) -> Result<Vec<NodeRun>> {
        let mut nodes: Vec<NodeRun> = self
            .nodes
            .iter()
            .filter(|entry| entry.key().0 == run_id)
            .map(|entry| entry.value().clone())
            .collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        Ok(nodes)
    }

    async fn find_cached(&self, idempotency_key: &str) -> Result<Option<NodeRun>> {
        Ok(self.by_key.get(idempotency_key).map(|n| n.clone()))
    }
}

// ---------------------------------------------------------------------------
// Filesystem store
// ---------------------------------------------------------------------------

/// JSON files on disk, memory mirror for every read path.
///
/// Layout:
///   {root}/plans/{plan_id}.json
///   {root}/runs/{run_id}/run.json
///   {root}/runs/{run_id}/{node_id}.json
pub struct FsRunStore {
    root: PathBuf,
    mirror: MemoryRunStore,
}

impl FsRunStore {
    /// Open the store, replaying any existing records into the mirror.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let store = Self {
            root: root.as_ref().to_path_buf(),
            mirror: MemoryRunStore::new(),
        };
        tokio::fs::create_dir_all(store.root.join("plans")).await?;
        tokio::fs::create_dir_all(store.root.join("runs")).await?;
        store.replay().await?;
        Ok(store)
    }

    async fn replay(&self) -> Result<()> {
        let mut plans = tokio::fs::read_dir(self.root.join("plans")).await?;
        while let Some(entry) = plans.next_entry().await? {
            if let Ok(plan) = read_json::<Plan>(&entry.path()).await {
                self.mirror.put_plan(&plan).await?;
            }
        }

        let mut runs = tokio::fs::read_dir(self.root.join("runs")).await?;
        while let Some(run_dir) = runs.next_entry().await? {
            if !run_dir.file_type().await?.is_dir() {
                continue;
            }
            let mut files = tokio::fs::read_dir(run_dir.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let path = file.path();
                if path.file_name().and_then(|n| n.to_str()) == Some("run.json") {
                    if let Ok(run) = read_json::<Run>(&path).await {
                        self.mirror.put_run(&run).await?;
                    }
                } else if let Ok(node) = read_json::<NodeRun>(&path).await {
                    self.mirror.put_node(&node).await?;
                }
            }
        }
        Ok(())
    }

    fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join("runs").join(run_id)
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| Error::Store(format!("write {}: {e}", path.display())))
}

#[async_trait::async_trait]
impl RunStore for FsRunStore {
    async fn put_plan(&self, plan: &Plan) -> Result<()> {
        write_json(
            &self.root.join("plans").join(format!("{}.json", plan.plan_id)),
            plan,
        )
        .await?;
        self.mirror.put_plan(plan).await
    }

    async fn get_plan(&self, plan_id: &str) -> Result<Option<Plan>> {
        self.mirror.get_plan(plan_id).await
    }

    async fn put_run(&self, run: &Run) -> Result<()> {
        write_json(&self.run_dir(&run.run_id).join("run.json"), run).await?;
        self.mirror.put_run(run).await
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<Run>> {
        self.mirror.get_run(run_id).await
    }

    async fn put_node(&self, node: &NodeRun) -> Result<()> {
        write_json(
            &self.run_dir(&node.run_id).join(format!("{}.json", node.node_id)),
            node,
        )
        .await?;
        self.mirror.put_node(node).await
    }

    async fn get_node(&self, run_id: &str, node_id: &str) -> Result<Option<NodeRun>> {
        self.mirror.get_node(run_id, node_id).await
    }

    async fn list_nodes(&self, run_id: &str) -> Result<Vec<NodeRun>> {
        self.mirror.list_nodes(run_id).await
    }

    async fn find_cached(&self, idempotency_key: &str) -> Result<Option<NodeRun>> {
        self.mirror.find_cached(idempotency_key).await
    }
}
