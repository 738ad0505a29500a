//! Run and node-run state machines
//!
//! Runs transition only forward. Node runs go
//! pending -> running -> (succeeded | failed | cached); `failed` may re-enter
//! `running` while the retry budget lasts; `skipped` is terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Created,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One execution of a plan.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub plan_id: String,
    pub state: RunState,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<NodeError>,
}

impl Run {
    pub fn new(plan_id: impl Into<String>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            plan_id: plan_id.into(),
            state: RunState::Created,
            created_at: Utc::now(),
            finished_at: None,
            error: None,
        }
    }

    pub fn start(&mut self) {
        self.state = RunState::Running;
    }

    pub fn finish(&mut self, state: RunState, error: Option<NodeError>) {
        debug_assert!(state.is_terminal());
        self.state = state;
        self.error = error;
        self.finished_at = Some(Utc::now());
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cached,
    Skipped,
}

impl NodeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cached | Self::Skipped)
    }

    /// Terminal and usable by downstream nodes.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Cached)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cached => write!(f, "cached"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Persisted error detail on a failed node (and promoted to the run view).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeError {
    pub kind: String,
    pub message: String,
}

impl NodeError {
    pub fn from_error(err: &crate::Error) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Execution record for one plan node within one run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeRun {
    pub run_id: String,
    pub node_id: String,
    pub state: NodeState,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub idempotency_key: String,
    #[serde(default)]
    pub output: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<NodeError>,
    /// Child process stderr, captured on tool failure for diagnostics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

impl NodeRun {
    pub fn new(run_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            node_id: node_id.into(),
            state: NodeState::Pending,
            attempts: 0,
            started_at: None,
            finished_at: None,
            idempotency_key: String::new(),
            output: serde_json::Value::Null,
            error: None,
            stderr: None,
        }
    }

    /// Begin an attempt. First call records `started_at`.
    pub fn begin_attempt(&mut self) {
        self.state = NodeState::Running;
        self.attempts += 1;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    pub fn succeed(&mut self, output: serde_json::Value) {
        self.state = NodeState::Succeeded;
        self.output = output;
        self.error = None;
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: &crate::Error, stderr: Option<String>) {
        self.state = NodeState::Failed;
        self.error = Some(NodeError::from_error(error));
        self.stderr = stderr;
        self.finished_at = Some(Utc::now());
    }

    /// Reuse a prior successful record's output without dispatching.
    pub fn mark_cached(&mut self, key: &str, output: serde_json::Value) {
        self.state = NodeState::Cached;
        self.idempotency_key = key.to_string();
        self.output = output;
        self.started_at = Some(Utc::now());
        self.finished_at = self.started_at;
    }

    pub fn skip(&mut self) {
        self.state = NodeState::Skipped;
        self.finished_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_run_lifecycle() {
        let mut node = NodeRun::new("run-1", "sql");
        assert_eq!(node.state, NodeState::Pending);
        assert_eq!(node.attempts, 0);

        node.begin_attempt();
        assert_eq!(node.state, NodeState::Running);
        assert_eq!(node.attempts, 1);
        let first_start = node.started_at;

        node.fail(&crate::Error::Timeout { tool: "sql".into(), ms: 10 }, Some("boom".into()));
        assert_eq!(node.state, NodeState::Failed);
        assert_eq!(node.error.as_ref().unwrap().kind, "Timeout");

        // Retry keeps the original start timestamp.
        node.begin_attempt();
        assert_eq!(node.attempts, 2);
        assert_eq!(node.started_at, first_start);

        node.succeed(serde_json::json!({"rows": 4}));
        assert!(node.state.is_success());
        assert!(node.error.is_none());
    }

    #[test]
    fn cached_counts_as_success() {
        let mut node = NodeRun::new("run-1", "sql");
        node.mark_cached("key", serde_json::json!({"rows": 4}));
        assert!(node.state.is_terminal());
        assert!(node.state.is_success());
    }

    #[test]
    fn run_states_serialize_lowercase() {
        assert_eq!(serde_json::to_string(&RunState::Succeeded).unwrap(), r#""succeeded""#);
        assert_eq!(serde_json::to_string(&NodeState::Cached).unwrap(), r#""cached""#);
    }
}
