//! Error taxonomy for Taskweave
//!
//! Retryable: `Timeout`, transient `Tool` codes, `Spawn`. Everything else is
//! fatal to the node; `AmbiguousFlow` and `Plan` never create a run at all.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("ambiguous flow: {0}")]
    AmbiguousFlow(String),

    #[error("plan error: {0}")]
    Plan(String),

    #[error("tool `{tool}` timed out after {ms}ms")]
    Timeout { tool: String, ms: u64 },

    #[error("tool `{tool}` error (code {code}): {message}")]
    Tool {
        tool: String,
        code: i64,
        message: String,
        retryable: bool,
    },

    #[error("failed to spawn tool `{tool}`: {message}")]
    Spawn { tool: String, message: String },

    #[error("protocol error from `{tool}`: {message}")]
    Protocol { tool: String, message: String },

    #[error("schema violation: {0}")]
    SchemaViolation(String),

    #[error("missing artifact: {0}")]
    MissingArtifact(String),

    #[error("agent `{agent}` timed out after {ms}ms")]
    AgentTimeout { agent: String, ms: u64 },

    #[error("agent `{agent}` error: {message}")]
    Agent {
        agent: String,
        message: String,
        retryable: bool,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("config error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn plan(message: impl Into<String>) -> Self {
        Self::Plan(message.into())
    }

    pub fn tool(tool: impl Into<String>, code: i64, message: impl Into<String>, retryable: bool) -> Self {
        Self::Tool {
            tool: tool.into(),
            code,
            message: message.into(),
            retryable,
        }
    }

    pub fn spawn(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Spawn {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn protocol(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Protocol {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn agent(agent: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Agent {
            agent: agent.into(),
            message: message.into(),
            retryable: false,
        }
    }

    /// Whether the executor may re-dispatch the node after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Spawn { .. } => true,
            Self::Tool { retryable, .. } => *retryable,
            Self::Agent { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Stable kind label, used in persisted node records and run views.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AmbiguousFlow(_) => "AmbiguousFlow",
            Self::Plan(_) => "PlanError",
            Self::Timeout { .. } => "Timeout",
            Self::Tool { .. } => "ToolError",
            Self::Spawn { .. } => "SpawnError",
            Self::Protocol { .. } => "ProtocolError",
            Self::SchemaViolation(_) => "SchemaViolation",
            Self::MissingArtifact(_) => "MissingArtifact",
            Self::AgentTimeout { .. } => "AgentTimeout",
            Self::Agent { .. } => "AgentError",
            Self::Cancelled => "Cancelled",
            Self::Config(_) => "ConfigError",
            Self::Store(_) => "StoreError",
            Self::Io(_) => "IoError",
            Self::Json(_) => "JsonError",
        }
    }
}
