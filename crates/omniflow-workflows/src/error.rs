//! Workflow error types

use omniflow_core::NodeId;
use thiserror::Error;

/// The resolver could not linearize the graph.
///
/// `ordered` holds the nodes Kahn's algorithm managed to place, `remaining`
/// the nodes trapped in or downstream of a cycle, both in node-list order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cycle detected: {} node(s) could not be ordered ({})", .remaining.len(), .remaining.join(", "))]
pub struct CycleError {
    pub ordered: Vec<NodeId>,
    pub remaining: Vec<NodeId>,
}

/// Errors raised by the registry, engine and controller
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkflowError {
    #[error("no executor registered for node type '{node_type}'")]
    ExecutorNotFound { node_type: String },

    #[error("node '{node_id}' failed: {message}")]
    NodeExecutionFailed { node_id: String, message: String },

    #[error(transparent)]
    CyclicGraph(#[from] CycleError),

    #[error("a workflow run is already in progress")]
    RunAlreadyInProgress,

    #[error("workflow run timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("workflow run was manually stopped")]
    ManualStop,

    #[error("workflow run was cancelled")]
    Cancelled,

    #[error("sandbox error: {0}")]
    Sandbox(String),
}

impl WorkflowError {
    /// Whether this error ended the whole run rather than a single node
    pub fn is_run_level(&self) -> bool {
        !matches!(
            self,
            Self::ExecutorNotFound { .. } | Self::NodeExecutionFailed { .. }
        )
    }

    /// Text recorded in a failed node's `{error}` output
    pub fn failure_message(&self) -> String {
        match self {
            Self::NodeExecutionFailed { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Result alias for workflow operations
pub type WorkflowResult<T> = std::result::Result<T, WorkflowError>;
