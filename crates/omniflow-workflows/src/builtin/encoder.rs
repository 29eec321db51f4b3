//! Encoder Node - text embedding (mock)

use anyhow::Result;
use async_trait::async_trait;
use omniflow_core::{value_as_text, Node, PortMap};
use rand::Rng;
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::node_types;
use crate::executor::{resolve_input, simulated_latency, NodeExecutor};

/// Length of generated embeddings
pub const EMBEDDING_DIMENSIONS: usize = 128;

const DEFAULT_MODEL: &str = "clip";

/// Outputs `{embedding}`: 128 uniform floats in `[0, 1)`
pub struct EncoderExecutor {
    mock_latency: Duration,
}

impl EncoderExecutor {
    pub fn new(mock_latency: Duration) -> Self {
        Self { mock_latency }
    }
}

#[async_trait]
impl NodeExecutor for EncoderExecutor {
    fn node_type(&self) -> &str {
        node_types::ENCODER
    }

    async fn execute(
        &self,
        node: &Node,
        inputs: &PortMap,
        token: &CancellationToken,
    ) -> Result<PortMap> {
        let text = resolve_input(node, inputs, "text", "text")
            .map(value_as_text)
            .unwrap_or_default();
        let model = node
            .local_value("model")
            .map(value_as_text)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        debug!(node_id = %node.id, model = %model, chars = text.chars().count(), "Encoding text");
        simulated_latency(self.mock_latency, token).await?;

        let mut rng = rand::thread_rng();
        let embedding: Vec<f64> = (0..EMBEDDING_DIMENSIONS).map(|_| rng.gen::<f64>()).collect();

        let mut outputs = PortMap::new();
        outputs.insert("embedding".to_string(), json!(embedding));
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[tokio::test]
    async fn test_embedding_shape() {
        let node = Node::new("e", "ENCODER").with_input("text", "a cat on a mat");
        let outputs = EncoderExecutor::new(Duration::ZERO)
            .execute(&node, &PortMap::new(), &CancellationToken::new())
            .await
            .unwrap();

        let embedding = outputs["embedding"].as_array().unwrap();
        assert_eq!(embedding.len(), EMBEDDING_DIMENSIONS);
        assert!(embedding
            .iter()
            .filter_map(Value::as_f64)
            .all(|v| (0.0..1.0).contains(&v)));
    }
}
