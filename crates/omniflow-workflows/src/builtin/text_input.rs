//! Text Input Node - emits the text typed into the node

use anyhow::Result;
use async_trait::async_trait;
use omniflow_core::{value_as_text, Node, PortMap};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::node_types;
use crate::executor::NodeExecutor;

/// Outputs `{text}` from the node's `text` port, or `""`
pub struct TextInputExecutor;

#[async_trait]
impl NodeExecutor for TextInputExecutor {
    fn node_type(&self) -> &str {
        node_types::TEXT_INPUT
    }

    async fn execute(
        &self,
        node: &Node,
        _inputs: &PortMap,
        _token: &CancellationToken,
    ) -> Result<PortMap> {
        let text = node.local_value("text").map(value_as_text).unwrap_or_default();

        let mut outputs = PortMap::new();
        outputs.insert("text".to_string(), Value::String(text));
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn run(node: Node) -> PortMap {
        TextInputExecutor
            .execute(&node, &PortMap::new(), &CancellationToken::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_text_passthrough() {
        let outputs = run(Node::new("n", "TEXT_INPUT").with_input("text", "hello")).await;
        assert_eq!(outputs["text"], json!("hello"));
    }

    #[tokio::test]
    async fn test_defaults_and_rendering() {
        assert_eq!(run(Node::new("n", "TEXT_INPUT")).await["text"], json!(""));
        assert_eq!(
            run(Node::new("n", "TEXT_INPUT").with_input("text", 42)).await["text"],
            json!("42")
        );
    }
}
