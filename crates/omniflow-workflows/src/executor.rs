//! Node Executor - runtime behavior of one node type
//!
//! Executors receive the node (for its local port configuration), the inputs
//! merged from upstream outputs, and the run's cancellation token. They read
//! each port from the node first and fall back to the upstream value only when
//! the local one is absent.

use anyhow::Result;
use async_trait::async_trait;
use omniflow_core::{value_is_present, Node, OmniflowConfig, PortMap};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::WorkflowError;

/// Trait for node executors
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Node type this executor handles (e.g. "LLM_QUERY")
    fn node_type(&self) -> &str;

    /// Execute the node with inputs merged from upstream nodes.
    ///
    /// Long-running work should stop at its next suspension point once
    /// `token` is cancelled.
    async fn execute(
        &self,
        node: &Node,
        inputs: &PortMap,
        token: &CancellationToken,
    ) -> Result<PortMap>;
}

/// Shared executor handle
pub type BoxedExecutor = Arc<dyn NodeExecutor>;

/// Limits applied to CUSTOM node scripts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxConfig {
    /// Wall-clock budget for one script
    pub timeout: Duration,
    /// Maximum iterations of one loop; nested loops are counted separately
    pub loop_iteration_limit: u64,
    /// Maximum call depth
    pub recursion_limit: usize,
    /// Maximum script size in bytes
    pub max_code_bytes: usize,
    /// Scripts allowed to occupy a worker thread at once, including timed-out
    /// ones that are still running
    pub max_concurrent_scripts: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5_000),
            loop_iteration_limit: 1_000_000,
            recursion_limit: 256,
            max_code_bytes: 64 * 1024,
            max_concurrent_scripts: 4,
        }
    }
}

/// Settings shared by the built-in executors
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutorSettings {
    /// Artificial latency added by mock responses
    pub mock_latency: Duration,
    /// Fixed seed for the sampler; entropy-seeded when unset
    pub sampler_seed: Option<u64>,
    pub sandbox: SandboxConfig,
}

impl ExecutorSettings {
    /// Build settings from environment-derived configuration
    pub fn from_config(config: &OmniflowConfig) -> Self {
        Self {
            mock_latency: config.mock_latency(),
            sampler_seed: config.sampler_seed,
            sandbox: SandboxConfig {
                timeout: config.sandbox_timeout(),
                loop_iteration_limit: config.sandbox_loop_iteration_limit,
                max_code_bytes: config.sandbox_max_code_bytes,
                max_concurrent_scripts: config.sandbox_max_concurrent_scripts,
                ..SandboxConfig::default()
            },
        }
    }
}

/// Node-local port value, else the upstream input under `upstream_key`
pub fn resolve_input<'a>(
    node: &'a Node,
    inputs: &'a PortMap,
    port: &str,
    upstream_key: &str,
) -> Option<&'a Value> {
    node.local_value(port)
        .or_else(|| upstream_value(inputs, upstream_key))
}

/// Upstream input value if present
pub fn upstream_value<'a>(inputs: &'a PortMap, key: &str) -> Option<&'a Value> {
    inputs.get(key).filter(|v| value_is_present(v))
}

/// Sleep for `latency`, giving up early when the token is cancelled
pub async fn simulated_latency(latency: Duration, token: &CancellationToken) -> Result<()> {
    if latency.is_zero() {
        return Ok(());
    }
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(WorkflowError::Cancelled.into()),
        _ = tokio::time::sleep(latency) => Ok(()),
    }
}

/// Executor that always returns fixed outputs.
///
/// Useful for prototyping node types that have no real implementation yet.
pub struct MockExecutor {
    node_type: String,
    outputs: PortMap,
}

impl MockExecutor {
    pub fn new(node_type: &str, outputs: PortMap) -> Self {
        Self {
            node_type: node_type.to_string(),
            outputs,
        }
    }
}

#[async_trait]
impl NodeExecutor for MockExecutor {
    fn node_type(&self) -> &str {
        &self.node_type
    }

    async fn execute(
        &self,
        _node: &Node,
        _inputs: &PortMap,
        _token: &CancellationToken,
    ) -> Result<PortMap> {
        Ok(self.outputs.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_local_beats_upstream() {
        let node = Node::new("n", "LLM_QUERY").with_input("prompt", "local");
        let mut inputs = PortMap::new();
        inputs.insert("text".into(), json!("upstream"));

        assert_eq!(
            resolve_input(&node, &inputs, "prompt", "text"),
            Some(&json!("local"))
        );

        let blank = Node::new("n", "LLM_QUERY").with_input("prompt", "");
        assert_eq!(
            resolve_input(&blank, &inputs, "prompt", "text"),
            Some(&json!("upstream"))
        );
        assert!(resolve_input(&blank, &PortMap::new(), "prompt", "text").is_none());
    }

    #[test]
    fn test_settings_from_config() {
        let config = OmniflowConfig {
            mock_latency_ms: 25,
            sandbox_timeout_ms: 100,
            sandbox_loop_iteration_limit: 10,
            sandbox_max_concurrent_scripts: 2,
            sampler_seed: Some(7),
            ..OmniflowConfig::default()
        };
        let settings = ExecutorSettings::from_config(&config);
        assert_eq!(settings.mock_latency, Duration::from_millis(25));
        assert_eq!(settings.sandbox.timeout, Duration::from_millis(100));
        assert_eq!(settings.sandbox.loop_iteration_limit, 10);
        assert_eq!(settings.sandbox.max_concurrent_scripts, 2);
        assert_eq!(settings.sampler_seed, Some(7));
    }

    #[tokio::test]
    async fn test_simulated_latency_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let err = simulated_latency(Duration::from_secs(30), &token)
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<WorkflowError>(),
            Some(&WorkflowError::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_mock_executor() {
        let mut outputs = PortMap::new();
        outputs.insert("text".into(), json!("fixed"));
        let executor = MockExecutor::new("PLACEHOLDER", outputs.clone());

        let result = executor
            .execute(
                &Node::new("n", "PLACEHOLDER"),
                &PortMap::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result, outputs);
        assert_eq!(executor.node_type(), "PLACEHOLDER");
    }
}
