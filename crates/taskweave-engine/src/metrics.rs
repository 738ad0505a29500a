//! Engine counters, served at /metrics

use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Metrics {
    pub runs_started: AtomicU64,
    pub runs_succeeded: AtomicU64,
    pub runs_failed: AtomicU64,
    pub runs_cancelled: AtomicU64,
    pub nodes_dispatched: AtomicU64,
    pub node_retries: AtomicU64,
    pub cache_hits: AtomicU64,
    pub tool_calls: AtomicU64,
    pub agent_calls: AtomicU64,
}

impl Metrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> serde_json::Value {
        json!({
            "runs_started": self.runs_started.load(Ordering::Relaxed),
            "runs_succeeded": self.runs_succeeded.load(Ordering::Relaxed),
            "runs_failed": self.runs_failed.load(Ordering::Relaxed),
            "runs_cancelled": self.runs_cancelled.load(Ordering::Relaxed),
            "nodes_dispatched": self.nodes_dispatched.load(Ordering::Relaxed),
            "node_retries": self.node_retries.load(Ordering::Relaxed),
            "cache_hits": self.cache_hits.load(Ordering::Relaxed),
            "tool_calls": self.tool_calls.load(Ordering::Relaxed),
            "agent_calls": self.agent_calls.load(Ordering::Relaxed),
        })
    }
}
