//! Workflow Engine - Executes workflow graphs
//!
//! One call to [`WorkflowEngine::execute_with`] is one run:
//! - Determines execution order via the dependency resolver
//! - Gathers each node's inputs from the outputs of its upstream nodes
//! - Dispatches nodes one at a time through the executor registry
//! - Contains per-node failures: a failed node records `{error}` and the run
//!   continues
//!
//! Input merge, per connection in connection-list order: when both handles
//! are set, the source port's value is written to the target port; otherwise
//! every source output key is copied. Later connections win.

use omniflow_core::{Connection, Node, NodeId, PortMap};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{WorkflowError, WorkflowResult};
use crate::registry::ExecutorRegistry;
use crate::resolver::{resolve_order, CyclePolicy};

/// Error handling mode requested by the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorHandling {
    Stop,
    #[default]
    Continue,
    Retry,
}

/// Per-run options.
///
/// `parallel`, `error_handling` other than `Continue`, and `retry_count` are
/// accepted for compatibility with editor payloads but not acted on: runs are
/// always sequential and catch-and-continue. `timeout_ms` is enforced by the
/// controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionOptions {
    pub parallel: bool,
    #[serde(alias = "timeout", skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_handling: Option<ErrorHandling>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    pub cycle_policy: CyclePolicy,
}

impl ExecutionOptions {
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_cycle_policy(mut self, policy: CyclePolicy) -> Self {
        self.cycle_policy = policy;
        self
    }

    /// Names of requested options the engine does not implement
    pub fn unwired_options(&self) -> Vec<&'static str> {
        let mut unwired = Vec::new();
        if self.parallel {
            unwired.push("parallel");
        }
        if matches!(
            self.error_handling,
            Some(ErrorHandling::Stop | ErrorHandling::Retry)
        ) {
            unwired.push("errorHandling");
        }
        if self.retry_count.unwrap_or(0) > 0 {
            unwired.push("retryCount");
        }
        unwired
    }
}

/// Progress notifications emitted during a run, in order
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    NodeStarted {
        node_id: NodeId,
        /// Position in the execution order
        index: usize,
        total: usize,
    },
    NodeCompleted {
        node_id: NodeId,
        inputs: PortMap,
        outputs: PortMap,
    },
    NodeFailed {
        node_id: NodeId,
        inputs: PortMap,
        error: WorkflowError,
    },
    /// No executor is registered for the node's type
    NodeSkipped { node_id: NodeId, node_type: String },
}

/// Callback receiving engine events
pub type EngineObserver = Arc<dyn Fn(&EngineEvent) + Send + Sync>;

/// Workflow execution result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecutionResult {
    /// Outputs per executed node; failed nodes hold `{error}`
    pub node_outputs: BTreeMap<NodeId, PortMap>,
    /// Merged inputs each executed node received
    pub node_inputs: BTreeMap<NodeId, PortMap>,
    pub execution_order: Vec<NodeId>,
    /// Nodes with no registered executor
    pub skipped_nodes: Vec<NodeId>,
    /// The order is the node-list fallback, not a topological order
    pub cycle_detected: bool,
    pub duration_ms: u64,
}

impl WorkflowExecutionResult {
    /// Ids of nodes whose output is an `{error}` record
    pub fn failed_nodes(&self) -> Vec<&str> {
        self.execution_order
            .iter()
            .filter(|id| {
                self.node_outputs
                    .get(id.as_str())
                    .is_some_and(is_error_output)
            })
            .map(String::as_str)
            .collect()
    }
}

/// Output recorded for a failed node
pub fn error_output(message: &str) -> PortMap {
    let mut outputs = PortMap::new();
    outputs.insert("error".to_string(), Value::String(message.to_string()));
    outputs
}

fn is_error_output(outputs: &PortMap) -> bool {
    outputs.len() == 1 && outputs.get("error").is_some_and(Value::is_string)
}

/// Merge upstream outputs into one input map for a node.
///
/// `incoming` must be in connection-list order.
pub fn merge_inputs(incoming: &[&Connection], outputs: &BTreeMap<NodeId, PortMap>) -> PortMap {
    let mut inputs = PortMap::new();
    for conn in incoming {
        let Some(source_outputs) = outputs.get(&conn.source) else {
            continue;
        };
        match (conn.source_port(), conn.target_port()) {
            (Some(source_port), Some(target_port)) => {
                if let Some(value) = source_outputs.get(source_port) {
                    inputs.insert(target_port.to_string(), value.clone());
                }
            }
            _ => {
                for (key, value) in source_outputs {
                    inputs.insert(key.clone(), value.clone());
                }
            }
        }
    }
    inputs
}

/// Workflow Engine - Executes workflows
#[derive(Clone)]
pub struct WorkflowEngine {
    registry: Arc<ExecutorRegistry>,
}

impl WorkflowEngine {
    /// Create a new workflow engine
    pub fn new(registry: Arc<ExecutorRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ExecutorRegistry> {
        &self.registry
    }

    /// Execute with default options and no cancellation
    pub async fn execute(
        &self,
        nodes: &[Node],
        connections: &[Connection],
    ) -> WorkflowResult<WorkflowExecutionResult> {
        self.execute_with(
            nodes,
            connections,
            &ExecutionOptions::default(),
            &CancellationToken::new(),
            None,
        )
        .await
    }

    /// Execute a workflow.
    ///
    /// Only run-level problems are returned as errors: a cycle under
    /// `CyclePolicy::Fail`, or cancellation through `token`.
    pub async fn execute_with(
        &self,
        nodes: &[Node],
        connections: &[Connection],
        options: &ExecutionOptions,
        token: &CancellationToken,
        observer: Option<EngineObserver>,
    ) -> WorkflowResult<WorkflowExecutionResult> {
        let start = Instant::now();

        let unwired = options.unwired_options();
        if !unwired.is_empty() {
            warn!(
                options = ?unwired,
                "Execution options not implemented, running sequentially with catch-and-continue"
            );
        }

        let (execution_order, cycle_detected) =
            resolve_order(nodes, connections, options.cycle_policy)?;

        info!(
            nodes = nodes.len(),
            connections = connections.len(),
            cycle_detected,
            "Starting workflow execution"
        );

        let mut by_id: HashMap<&str, &Node> = HashMap::new();
        for node in nodes {
            by_id.entry(node.id.as_str()).or_insert(node);
        }

        let mut incoming: HashMap<&str, Vec<&Connection>> = HashMap::new();
        for conn in connections {
            incoming.entry(conn.target.as_str()).or_default().push(conn);
        }

        let emit = |event: EngineEvent| {
            if let Some(observer) = &observer {
                observer(&event);
            }
        };

        let mut result = WorkflowExecutionResult {
            execution_order: execution_order.clone(),
            cycle_detected,
            ..Default::default()
        };
        let total = execution_order.len();

        for (index, node_id) in execution_order.iter().enumerate() {
            if token.is_cancelled() {
                info!(node_id = %node_id, "Workflow execution cancelled");
                return Err(WorkflowError::Cancelled);
            }

            let Some(node) = by_id.get(node_id.as_str()).copied() else {
                continue;
            };

            if !self.registry.contains(&node.node_type).await {
                warn!(
                    node_id = %node.id,
                    node_type = %node.node_type,
                    "No executor for node type, skipping"
                );
                result.skipped_nodes.push(node.id.clone());
                emit(EngineEvent::NodeSkipped {
                    node_id: node.id.clone(),
                    node_type: node.node_type.clone(),
                });
                continue;
            }

            let upstream = incoming.get(node.id.as_str()).map(Vec::as_slice).unwrap_or(&[]);
            let inputs = merge_inputs(upstream, &result.node_outputs);

            debug!(
                node_id = %node.id,
                node_type = %node.node_type,
                name = %node.display_name(),
                "Executing node"
            );
            emit(EngineEvent::NodeStarted {
                node_id: node.id.clone(),
                index,
                total,
            });

            let node_start = Instant::now();
            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => Err(WorkflowError::Cancelled),
                outcome = self.registry.execute_node(node, &inputs, token) => outcome,
            };
            let duration_ms = node_start.elapsed().as_millis() as u64;

            result.node_inputs.insert(node.id.clone(), inputs.clone());

            match outcome {
                Ok(outputs) => {
                    debug!(node_id = %node.id, duration_ms, "Node completed");
                    result.node_outputs.insert(node.id.clone(), outputs.clone());
                    emit(EngineEvent::NodeCompleted {
                        node_id: node.id.clone(),
                        inputs,
                        outputs,
                    });
                }
                Err(WorkflowError::Cancelled) => {
                    info!(node_id = %node.id, "Workflow execution cancelled");
                    return Err(WorkflowError::Cancelled);
                }
                Err(e) => {
                    let message = e.failure_message();
                    error!(node_id = %node.id, duration_ms, error = %message, "Node execution failed");
                    result
                        .node_outputs
                        .insert(node.id.clone(), error_output(&message));
                    emit(EngineEvent::NodeFailed {
                        node_id: node.id.clone(),
                        inputs,
                        error: e,
                    });
                }
            }
        }

        result.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            executed = result.node_outputs.len(),
            skipped = result.skipped_nodes.len(),
            duration_ms = result.duration_ms,
            "Workflow execution complete"
        );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outputs(pairs: &[(&str, Value)]) -> PortMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_merge_flat_later_wins() {
        let mut recorded = BTreeMap::new();
        recorded.insert("a".to_string(), outputs(&[("x", json!(1)), ("shared", json!("a"))]));
        recorded.insert("b".to_string(), outputs(&[("y", json!(2)), ("shared", json!("b"))]));

        let c1 = Connection::new("a", "t");
        let c2 = Connection::new("b", "t");
        let merged = merge_inputs(&[&c1, &c2], &recorded);

        assert_eq!(
            merged,
            outputs(&[("x", json!(1)), ("y", json!(2)), ("shared", json!("b"))])
        );
    }

    #[test]
    fn test_merge_port_matched() {
        let mut recorded = BTreeMap::new();
        recorded.insert(
            "sel".to_string(),
            outputs(&[("model", json!("m")), ("apiKey", json!("k"))]),
        );
        recorded.insert("txt".to_string(), outputs(&[("text", json!("hello"))]));

        let c1 = Connection::new("sel", "q").with_handles("output-apiKey", "input-apiKey");
        let c2 = Connection::new("txt", "q").with_handles("output-text", "input-prompt");
        let c3 = Connection::new("missing", "q");
        let merged = merge_inputs(&[&c1, &c2, &c3], &recorded);

        assert_eq!(
            merged,
            outputs(&[("apiKey", json!("k")), ("prompt", json!("hello"))])
        );
    }

    #[test]
    fn test_options_camel_case_and_unwired() {
        let options: ExecutionOptions = serde_json::from_value(json!({
            "parallel": true,
            "timeout": 500,
            "errorHandling": "retry",
            "retryCount": 3,
            "cyclePolicy": "fail"
        }))
        .unwrap();

        assert_eq!(options.timeout_ms, Some(500));
        assert_eq!(options.cycle_policy, CyclePolicy::Fail);
        assert_eq!(
            options.unwired_options(),
            vec!["parallel", "errorHandling", "retryCount"]
        );
        assert!(ExecutionOptions::default().unwired_options().is_empty());
    }

    #[test]
    fn test_failed_nodes() {
        let mut result = WorkflowExecutionResult {
            execution_order: vec!["a".into(), "b".into()],
            ..Default::default()
        };
        result.node_outputs.insert("a".into(), error_output("boom"));
        result.node_outputs.insert("b".into(), outputs(&[("text", json!("ok"))]));
        assert_eq!(result.failed_nodes(), vec!["a"]);
    }
}
