//! Custom Node - user JavaScript run in the script sandbox

use anyhow::Result;
use async_trait::async_trait;
use omniflow_core::{value_as_text, Node, PortMap};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::node_types;
use crate::executor::{NodeExecutor, SandboxConfig};
use crate::sandbox::ScriptSandbox;

const NO_RESULT: &str = "Code executed successfully";

/// Outputs `{result}`: the script's return value, or a success message when
/// it returns nothing.
pub struct CustomExecutor {
    sandbox: ScriptSandbox,
}

impl CustomExecutor {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            sandbox: ScriptSandbox::new(config),
        }
    }
}

#[async_trait]
impl NodeExecutor for CustomExecutor {
    fn node_type(&self) -> &str {
        node_types::CUSTOM
    }

    async fn execute(
        &self,
        node: &Node,
        inputs: &PortMap,
        token: &CancellationToken,
    ) -> Result<PortMap> {
        let code = node.local_value("code").map(value_as_text).unwrap_or_default();
        debug!(node_id = %node.id, bytes = code.len(), "Running custom script");

        let result = self.sandbox.run(&code, inputs, token).await.map_err(|e| {
            warn!(node_id = %node.id, error = %e, "Custom script failed");
            e
        })?;

        let mut outputs = PortMap::new();
        outputs.insert(
            "result".to_string(),
            result.unwrap_or_else(|| Value::String(NO_RESULT.to_string())),
        );
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkflowError;
    use serde_json::json;

    fn executor() -> CustomExecutor {
        CustomExecutor::new(SandboxConfig::default())
    }

    #[tokio::test]
    async fn test_returns_script_value() {
        let node = Node::new("c", "CUSTOM").with_input("code", "return inputs.text.length;");
        let mut inputs = PortMap::new();
        inputs.insert("text".into(), json!("four"));

        let outputs = executor()
            .execute(&node, &inputs, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outputs["result"], json!(4));
    }

    #[tokio::test]
    async fn test_empty_code_reports_success() {
        let outputs = executor()
            .execute(&Node::new("c", "CUSTOM"), &PortMap::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outputs["result"], json!(NO_RESULT));
    }

    #[tokio::test]
    async fn test_script_error_is_failure() {
        let node = Node::new("c", "CUSTOM").with_input("code", "undefinedFunction();");
        let err = executor()
            .execute(&node, &PortMap::new(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WorkflowError>(),
            Some(WorkflowError::Sandbox(_))
        ));
    }
}
