//! Document Query Node - placeholder document retrieval

use anyhow::Result;
use async_trait::async_trait;
use omniflow_core::{value_as_text, Node, PortMap};
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::node_types;
use crate::executor::{resolve_input, simulated_latency, NodeExecutor};

/// Outputs `{text}` describing the query; no document backend exists yet
pub struct DocumentQueryExecutor {
    mock_latency: Duration,
}

impl DocumentQueryExecutor {
    pub fn new(mock_latency: Duration) -> Self {
        Self { mock_latency }
    }
}

#[async_trait]
impl NodeExecutor for DocumentQueryExecutor {
    fn node_type(&self) -> &str {
        node_types::DOCUMENT_QUERY
    }

    async fn execute(
        &self,
        node: &Node,
        inputs: &PortMap,
        token: &CancellationToken,
    ) -> Result<PortMap> {
        let query = resolve_input(node, inputs, "query", "text")
            .map(value_as_text)
            .unwrap_or_default();
        let path = node.local_value("path").map(value_as_text).unwrap_or_default();

        simulated_latency(self.mock_latency, token).await?;

        let text = format!(
            "Mock document query result:\nQuery: {}\nDocument: {}\nResult: ...",
            query, path
        );
        let mut outputs = PortMap::new();
        outputs.insert("text".to_string(), Value::String(text));
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_result() {
        let node = Node::new("d", "DOCUMENT_QUERY").with_input("path", "/docs/guide.md");
        let mut inputs = PortMap::new();
        inputs.insert("text".into(), json!("install steps"));

        let outputs = DocumentQueryExecutor::new(Duration::ZERO)
            .execute(&node, &inputs, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            outputs["text"],
            json!("Mock document query result:\nQuery: install steps\nDocument: /docs/guide.md\nResult: ...")
        );
    }
}
