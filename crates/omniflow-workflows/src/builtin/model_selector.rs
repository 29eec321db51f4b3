//! Model Selector Node - LLM settings consumed by downstream LLM_QUERY nodes

use anyhow::Result;
use async_trait::async_trait;
use omniflow_core::{value_as_bool, value_as_text, Node, PortMap};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::node_types;
use crate::executor::NodeExecutor;

pub const DEFAULT_MODEL: &str = "deepseek-chat";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant";
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_MAX_TOKENS: u64 = 1000;

/// Emits `model`, `apiKey`, `systemPrompt`, `temperature`, `maxTokens` and
/// `stream` from node-local values with defaults. Makes no external call.
pub struct ModelSelectorExecutor;

#[async_trait]
impl NodeExecutor for ModelSelectorExecutor {
    fn node_type(&self) -> &str {
        node_types::MODEL_SELECTOR
    }

    async fn execute(
        &self,
        node: &Node,
        _inputs: &PortMap,
        _token: &CancellationToken,
    ) -> Result<PortMap> {
        let text_or = |port: &str, default: &str| {
            node.local_value(port)
                .map(value_as_text)
                .unwrap_or_else(|| default.to_string())
        };

        let mut outputs = PortMap::new();
        outputs.insert("model".into(), Value::String(text_or("model", DEFAULT_MODEL)));
        outputs.insert("apiKey".into(), Value::String(text_or("apiKey", "")));
        outputs.insert(
            "systemPrompt".into(),
            Value::String(text_or("systemPrompt", DEFAULT_SYSTEM_PROMPT)),
        );
        outputs.insert(
            "temperature".into(),
            node.local_value("temperature")
                .cloned()
                .unwrap_or_else(|| json!(DEFAULT_TEMPERATURE)),
        );
        outputs.insert(
            "maxTokens".into(),
            node.local_value("maxTokens")
                .cloned()
                .unwrap_or_else(|| json!(DEFAULT_MAX_TOKENS)),
        );
        outputs.insert(
            "stream".into(),
            Value::Bool(
                node.local_value("stream")
                    .and_then(value_as_bool)
                    .unwrap_or(false),
            ),
        );
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run(node: Node) -> PortMap {
        ModelSelectorExecutor
            .execute(&node, &PortMap::new(), &CancellationToken::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_defaults() {
        let outputs = run(Node::new("m", "MODEL_SELECTOR")).await;
        assert_eq!(
            Value::Object(outputs),
            json!({
                "model": "deepseek-chat",
                "apiKey": "",
                "systemPrompt": "You are a helpful assistant",
                "temperature": 0.7,
                "maxTokens": 1000,
                "stream": false
            })
        );
    }

    #[tokio::test]
    async fn test_values_passed_verbatim() {
        let outputs = run(Node::new("m", "MODEL_SELECTOR")
            .with_input("model", "deepseek-reasoner")
            .with_input("apiKey", "sk-123")
            .with_input("temperature", "0.2")
            .with_input("stream", "true"))
        .await;

        assert_eq!(outputs["model"], json!("deepseek-reasoner"));
        assert_eq!(outputs["apiKey"], json!("sk-123"));
        assert_eq!(outputs["temperature"], json!("0.2"));
        assert_eq!(outputs["stream"], json!(true));
    }
}
