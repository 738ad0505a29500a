//! Tool client — one-shot JSON-RPC over a child process's stdio
//!
//! Each call owns exactly one child process: spawn, write one request line,
//! close stdin, read one response line, reap. Every exit path tears down the
//! process handle, the timeout, and the stderr capture. A global semaphore
//! caps in-flight tool processes across all runs.

use crate::capability::ToolCapability;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taskweave_core::wire::{RpcRequest, RpcResponse};
use taskweave_core::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Clone, Debug)]
pub struct ToolClientConfig {
    /// Global cap on concurrently running tool processes.
    pub max_inflight: usize,
    /// Grace period between a timeout/cancel and SIGKILL.
    pub kill_grace: Duration,
}

impl Default for ToolClientConfig {
    fn default() -> Self {
        Self {
            max_inflight: 16,
            kill_grace: Duration::from_millis(500),
        }
    }
}

/// A failed tool call: the classified error plus whatever the child wrote
/// to stderr, preserved as a diagnostic blob for the node record.
#[derive(Debug)]
pub struct ToolFailure {
    pub error: Error,
    pub stderr: String,
}

impl ToolFailure {
    fn new(error: Error, stderr: String) -> Self {
        Self { error, stderr }
    }
}

pub struct ToolClient {
    permits: Arc<Semaphore>,
    kill_grace: Duration,
    next_id: AtomicU64,
}

impl ToolClient {
    pub fn new(config: ToolClientConfig) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(config.max_inflight)),
            kill_grace: config.kill_grace,
            next_id: AtomicU64::new(1),
        }
    }

    /// Perform one JSON-RPC call against the tool's server binary.
    ///
    /// The returned value is the JSON-RPC `result`. On failure the child's
    /// stderr rides along in the `ToolFailure`.
    pub async fn call(
        &self,
        tool: &ToolCapability,
        method: &str,
        params: serde_json::Value,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, ToolFailure> {
        let permit = match self.permits.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => return Err(ToolFailure::new(Error::Cancelled, String::new())),
        };
        if cancel.is_cancelled() {
            return Err(ToolFailure::new(Error::Cancelled, String::new()));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest::new(id, method, params);

        let mut command = Command::new(&tool.entry.binary_path);
        command
            .args(&tool.entry.args)
            .envs(&tool.entry.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &tool.entry.cwd {
            command.current_dir(cwd);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return Err(ToolFailure::new(
                    Error::spawn(&tool.name, e.to_string()),
                    String::new(),
                ))
            }
        };

        debug!(tool = %tool.name, method, id, "dispatching tool call");

        // Drain stderr concurrently so the child can never block on a full pipe.
        let stderr_task = spawn_stderr_reader(&mut child);

        let result = self
            .exchange(tool, method, &request, &mut child, timeout, cancel)
            .await;

        // Reap first: once the child is gone its stderr pipe is closed and
        // the capture task is guaranteed to finish.
        self.reap(&tool.name, child).await;
        let stderr = finish_stderr(stderr_task, self.kill_grace).await;
        drop(permit);

        result.map_err(|error| ToolFailure::new(error, stderr))
    }

    /// Write the request, read one response line, classify it.
    async fn exchange(
        &self,
        tool: &ToolCapability,
        method: &str,
        request: &RpcRequest,
        child: &mut Child,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, Error> {
        let name = tool.name.as_str();
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::protocol(name, "child has no stdin"))?;
        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            return Err(Error::protocol(name, format!("request write failed: {e}")));
        }
        // Close the write side so line-oriented servers see EOF after the request.
        drop(stdin);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::protocol(name, "child has no stdout"))?;
        let mut reader = BufReader::new(stdout);
        let mut response_line = String::new();

        let read = tokio::select! {
            read = tokio::time::timeout(timeout, reader.read_line(&mut response_line)) => read,
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        };

        match read {
            Err(_) => Err(Error::Timeout {
                tool: name.to_string(),
                ms: timeout.as_millis() as u64,
            }),
            Ok(Err(e)) => Err(Error::protocol(name, format!("stdout read failed: {e}"))),
            Ok(Ok(0)) => Err(Error::protocol(name, "closed stdout without a response")),
            Ok(Ok(_)) => classify(tool, method, request.id, response_line.trim()),
        }
    }

    /// Let the child exit on its own briefly, then SIGKILL. Every call path
    /// comes through here, so no child outlives its node run.
    async fn reap(&self, tool_name: &str, mut child: Child) {
        if tokio::time::timeout(self.kill_grace, child.wait()).await.is_ok() {
            return;
        }
        warn!(tool = tool_name, "child did not exit within grace; killing");
        let _ = child.kill().await;
    }
}

fn classify(
    tool: &ToolCapability,
    method: &str,
    id: u64,
    line: &str,
) -> Result<serde_json::Value, Error> {
    let name = tool.name.as_str();
    let response: RpcResponse = serde_json::from_str(line)
        .map_err(|e| Error::protocol(name, format!("invalid JSON-RPC response: {e}")))?;
    if !response.matches(id) {
        return Err(Error::protocol(
            name,
            format!("response id does not match request id {id}"),
        ));
    }
    if let Some(rpc_err) = response.error {
        return Err(Error::Tool {
            tool: name.to_string(),
            code: rpc_err.code,
            message: rpc_err.message,
            retryable: tool.is_retryable_code(method, rpc_err.code),
        });
    }
    response
        .result
        .ok_or_else(|| Error::protocol(name, "response has neither result nor error"))
}

fn spawn_stderr_reader(child: &mut Child) -> Option<JoinHandle<String>> {
    let mut stderr = child.stderr.take()?;
    Some(tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stderr.read_to_end(&mut buf).await;
        String::from_utf8_lossy(&buf).into_owned()
    }))
}

async fn finish_stderr(task: Option<JoinHandle<String>>, grace: Duration) -> String {
    match task {
        Some(handle) => match tokio::time::timeout(grace, handle).await {
            Ok(Ok(s)) => s,
            _ => String::new(),
        },
        None => String::new(),
    }
}
