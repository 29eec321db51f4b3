//! Executor Registry - lookup from node type to executor
//!
//! Keys are normalized to trimmed upper case (`TEXT_INPUT`). Every registered
//! type also gets lowercase (`text_input`) and camelCase (`textInput`)
//! aliases so editor payloads using either spelling still resolve.
//!
//! Registries are plain values: construct one, register executors, and share
//! it with engines as `Arc<ExecutorRegistry>`.

use omniflow_core::{Node, PortMap};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::builtin::{self, BuiltinDependencies};
use crate::error::{WorkflowError, WorkflowResult};
use crate::executor::{BoxedExecutor, MockExecutor};

#[derive(Default)]
struct RegistryInner {
    executors: HashMap<String, BoxedExecutor>,
    /// alias -> canonical key
    aliases: HashMap<String, String>,
}

/// Registry of node executors
#[derive(Default)]
pub struct ExecutorRegistry {
    inner: RwLock<RegistryInner>,
    builtins_registered: AtomicBool,
}

impl ExecutorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in executors already registered
    pub async fn with_builtins(deps: BuiltinDependencies) -> Self {
        let registry = Self::new();
        registry.register_builtin_executors(deps).await;
        registry
    }

    /// Register an executor, replacing (and returning) any previous one
    pub async fn register_executor(
        &self,
        node_type: &str,
        executor: BoxedExecutor,
    ) -> Option<BoxedExecutor> {
        let key = canonical_key(node_type);
        let mut inner = self.inner.write().await;

        for alias in [key.to_lowercase(), camel_case(&key)] {
            if alias != key {
                inner.aliases.insert(alias, key.clone());
            }
        }

        let previous = inner.executors.insert(key.clone(), executor);
        if previous.is_some() {
            warn!(node_type = %key, "Overwriting existing executor");
        } else {
            debug!(node_type = %key, "Registered executor");
        }
        previous
    }

    /// Register an executor that always returns `outputs`
    pub async fn register_mock_executor(
        &self,
        node_type: &str,
        outputs: PortMap,
    ) -> Option<BoxedExecutor> {
        let executor = Arc::new(MockExecutor::new(&canonical_key(node_type), outputs));
        self.register_executor(node_type, executor).await
    }

    /// Look up an executor by type, accepting alias spellings
    pub async fn get_executor(&self, node_type: &str) -> Option<BoxedExecutor> {
        let inner = self.inner.read().await;
        let key = canonical_key(node_type);
        if let Some(executor) = inner.executors.get(&key) {
            return Some(executor.clone());
        }
        inner
            .aliases
            .get(node_type.trim())
            .and_then(|canonical| inner.executors.get(canonical))
            .cloned()
    }

    /// Whether an executor is registered for the type
    pub async fn contains(&self, node_type: &str) -> bool {
        self.get_executor(node_type).await.is_some()
    }

    /// All registered canonical types, sorted
    pub async fn registered_types(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut types: Vec<String> = inner.executors.keys().cloned().collect();
        types.sort();
        types
    }

    /// Run the executor for `node.node_type`.
    ///
    /// Executor failures are wrapped into `NodeExecutionFailed`; cancellation
    /// is passed through unchanged.
    pub async fn execute_node(
        &self,
        node: &Node,
        inputs: &PortMap,
        token: &CancellationToken,
    ) -> WorkflowResult<PortMap> {
        let executor = self.get_executor(&node.node_type).await.ok_or_else(|| {
            WorkflowError::ExecutorNotFound {
                node_type: node.node_type.clone(),
            }
        })?;

        executor
            .execute(node, inputs, token)
            .await
            .map_err(|e| match e.downcast_ref::<WorkflowError>() {
                Some(WorkflowError::Cancelled) => WorkflowError::Cancelled,
                _ => WorkflowError::NodeExecutionFailed {
                    node_id: node.id.clone(),
                    message: format!("{:#}", e),
                },
            })
    }

    /// Register the eight built-in executors.
    ///
    /// Runs at most once per registry; later calls return `false` and change
    /// nothing.
    pub async fn register_builtin_executors(&self, deps: BuiltinDependencies) -> bool {
        if self
            .builtins_registered
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Built-in executors already registered");
            return false;
        }

        let executors = builtin::builtin_executors(deps);
        let count = executors.len();
        for executor in executors {
            let node_type = executor.node_type().to_string();
            self.register_executor(&node_type, executor).await;
        }

        info!(count, "Registered built-in executors");
        true
    }
}

/// Normalized registry key
pub fn canonical_key(node_type: &str) -> String {
    node_type.trim().to_uppercase()
}

// "TEXT_INPUT" -> "textInput"
fn camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for (i, part) in key.split('_').filter(|p| !p.is_empty()).enumerate() {
        let lower = part.to_lowercase();
        if i == 0 {
            out.push_str(&lower);
            continue;
        }
        let mut chars = lower.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::NodeExecutor;
    use async_trait::async_trait;
    use serde_json::json;

    struct FailingExecutor;

    #[async_trait]
    impl NodeExecutor for FailingExecutor {
        fn node_type(&self) -> &str {
            "FAILING"
        }

        async fn execute(
            &self,
            _node: &Node,
            _inputs: &PortMap,
            _token: &CancellationToken,
        ) -> anyhow::Result<PortMap> {
            Err(anyhow::anyhow!("disk on fire").context("reading input"))
        }
    }

    fn outputs(key: &str, value: serde_json::Value) -> PortMap {
        let mut map = PortMap::new();
        map.insert(key.to_string(), value);
        map
    }

    #[test]
    fn test_camel_case() {
        assert_eq!(camel_case("TEXT_INPUT"), "textInput");
        assert_eq!(camel_case("LLM_QUERY"), "llmQuery");
        assert_eq!(camel_case("CUSTOM"), "custom");
    }

    #[tokio::test]
    async fn test_lookup_aliases() {
        let registry = ExecutorRegistry::new();
        registry
            .register_mock_executor(" text_input ", outputs("text", json!("x")))
            .await;

        assert!(registry.contains("TEXT_INPUT").await);
        assert!(registry.contains("text_input").await);
        assert!(registry.contains("textInput").await);
        assert!(!registry.contains("TEXT").await);
        assert_eq!(registry.registered_types().await, vec!["TEXT_INPUT"]);
    }

    #[tokio::test]
    async fn test_overwrite_returns_previous() {
        let registry = ExecutorRegistry::new();
        assert!(registry
            .register_mock_executor("A", outputs("v", json!(1)))
            .await
            .is_none());
        assert!(registry
            .register_mock_executor("a", outputs("v", json!(2)))
            .await
            .is_some());

        let result = registry
            .execute_node(&Node::new("n", "A"), &PortMap::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result["v"], json!(2));
    }

    #[tokio::test]
    async fn test_execute_node_missing_executor() {
        let registry = ExecutorRegistry::new();
        let err = registry
            .execute_node(&Node::new("n", "NOPE"), &PortMap::new(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            WorkflowError::ExecutorNotFound {
                node_type: "NOPE".into()
            }
        );
    }

    #[tokio::test]
    async fn test_execute_node_wraps_failure() {
        let registry = ExecutorRegistry::new();
        registry
            .register_executor("FAILING", Arc::new(FailingExecutor))
            .await;

        let err = registry
            .execute_node(&Node::new("n7", "FAILING"), &PortMap::new(), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            WorkflowError::NodeExecutionFailed { node_id, message } => {
                assert_eq!(node_id, "n7");
                assert_eq!(message, "reading input: disk on fire");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_builtins_registered_once() {
        let registry = ExecutorRegistry::new();
        assert!(registry.register_builtin_executors(BuiltinDependencies::default()).await);
        assert!(!registry.register_builtin_executors(BuiltinDependencies::default()).await);

        assert_eq!(
            registry.registered_types().await,
            vec![
                "CUSTOM",
                "DOCUMENT_QUERY",
                "ENCODER",
                "LLM_QUERY",
                "MODEL_SELECTOR",
                "SAMPLER",
                "TEXT_INPUT",
                "WEB_SEARCH",
            ]
        );
    }
}
