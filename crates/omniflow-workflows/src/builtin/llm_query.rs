//! LLM Query Node - chat completion against the configured provider

use anyhow::Result;
use async_trait::async_trait;
use omniflow_core::{value_as_bool, value_as_f64, value_as_text, value_as_u64, Node, PortMap};
use omniflow_llm::{ChatRequest, LlmProvider};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::model_selector::{
    DEFAULT_MAX_TOKENS, DEFAULT_MODEL, DEFAULT_SYSTEM_PROMPT, DEFAULT_TEMPERATURE,
};
use super::node_types;
use crate::error::WorkflowError;
use crate::executor::{resolve_input, upstream_value, NodeExecutor};

/// Resolved request parameters
#[derive(Debug, Clone, PartialEq)]
struct QueryParams {
    prompt: String,
    model: String,
    system_prompt: String,
    temperature: f64,
    max_tokens: u64,
    stream: bool,
}

impl QueryParams {
    fn resolve(node: &Node, inputs: &PortMap) -> Self {
        let text = |port: &str, upstream: &str, default: &str| {
            resolve_input(node, inputs, port, upstream)
                .map(value_as_text)
                .unwrap_or_else(|| default.to_string())
        };

        let stream = node.local_value("stream").and_then(value_as_bool) == Some(true)
            || upstream_value(inputs, "stream") == Some(&Value::Bool(true));

        Self {
            prompt: text("prompt", "text", ""),
            model: text("model", "model", DEFAULT_MODEL),
            system_prompt: text("systemPrompt", "systemPrompt", DEFAULT_SYSTEM_PROMPT),
            temperature: resolve_input(node, inputs, "temperature", "temperature")
                .and_then(value_as_f64)
                .unwrap_or(DEFAULT_TEMPERATURE),
            max_tokens: resolve_input(node, inputs, "maxTokens", "maxTokens")
                .and_then(value_as_u64)
                .unwrap_or(DEFAULT_MAX_TOKENS),
            stream,
        }
    }

    fn request(&self) -> ChatRequest {
        ChatRequest::prompt(&self.model, &self.system_prompt, &self.prompt)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens)
            .with_stream(self.stream)
    }

    fn mock_response(&self) -> String {
        format!(
            "Mock DeepSeek response:\n\
             Input: {}\n\
             System prompt: {}\n\
             Model: {}\n\
             Temperature: {}\n\
             Max tokens: {}\n\
             Stream: {}\n\n\
             Note: this is a mock response. Connect a model selector with a valid \
             DeepSeek API key to get real completions.",
            self.prompt, self.system_prompt, self.model, self.temperature, self.max_tokens,
            self.stream
        )
    }
}

/// Outputs `{text}` with the model's answer.
///
/// The API key only comes from upstream (normally a MODEL_SELECTOR). Without
/// one, or when the provider call fails, a mock response is returned.
pub struct LlmQueryExecutor {
    provider: Arc<dyn LlmProvider>,
}

impl LlmQueryExecutor {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl NodeExecutor for LlmQueryExecutor {
    fn node_type(&self) -> &str {
        node_types::LLM_QUERY
    }

    async fn execute(
        &self,
        node: &Node,
        inputs: &PortMap,
        token: &CancellationToken,
    ) -> Result<PortMap> {
        let params = QueryParams::resolve(node, inputs);
        let api_key = upstream_value(inputs, "apiKey")
            .map(value_as_text)
            .unwrap_or_default();

        let text = if api_key.trim().is_empty() {
            debug!(node_id = %node.id, "No API key, returning mock response");
            params.mock_response()
        } else {
            let call = self.provider.chat(&api_key, params.request());
            let answered = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(WorkflowError::Cancelled.into()),
                answered = call => answered,
            };
            match answered {
                Ok(response) => response.message.content,
                Err(e) => {
                    warn!(
                        node_id = %node.id,
                        provider = %self.provider.provider_type(),
                        error = %e,
                        "LLM call failed, returning mock response"
                    );
                    params.mock_response()
                }
            }
        };

        let mut outputs = PortMap::new();
        outputs.insert("text".to_string(), Value::String(text));
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omniflow_llm::{ChatMessage, ChatResponse, ProviderType};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedProvider {
        fail: bool,
        requests: Mutex<Vec<(String, ChatRequest)>>,
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn provider_type(&self) -> ProviderType {
            ProviderType::Custom("scripted".into())
        }

        async fn chat(&self, api_key: &str, request: ChatRequest) -> Result<ChatResponse> {
            self.requests
                .lock()
                .unwrap()
                .push((api_key.to_string(), request.clone()));
            if self.fail {
                return Err(anyhow::anyhow!("HTTP 503"));
            }
            Ok(ChatResponse {
                message: ChatMessage::assistant(format!("echo: {}", request.messages[1].content)),
                model: request.model,
                provider: "scripted".into(),
                finish_reason: Some("stop".into()),
                usage: None,
            })
        }
    }

    fn upstream(pairs: &[(&str, Value)]) -> PortMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_mock_without_api_key() {
        let provider = Arc::new(ScriptedProvider::default());
        let executor = LlmQueryExecutor::new(provider.clone());
        let node = Node::new("q", "LLM_QUERY").with_input("apiKey", "sk-local-is-ignored");

        let outputs = executor
            .execute(
                &node,
                &upstream(&[("text", json!("hello"))]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let text = outputs["text"].as_str().unwrap();
        assert!(text.starts_with("Mock DeepSeek response:"));
        assert!(text.contains("Input: hello"));
        assert!(text.contains("Model: deepseek-chat"));
        assert!(text.contains("Temperature: 0.7"));
        assert!(text.contains("Max tokens: 1000"));
        assert!(provider.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_calls_provider_with_resolved_params() {
        let provider = Arc::new(ScriptedProvider::default());
        let executor = LlmQueryExecutor::new(provider.clone());
        let node = Node::new("q", "LLM_QUERY")
            .with_input("prompt", "local prompt")
            .with_input("maxTokens", "64");
        let inputs = upstream(&[
            ("text", json!("upstream text")),
            ("apiKey", json!("sk-abc")),
            ("model", json!("deepseek-reasoner")),
            ("temperature", json!(0.1)),
            ("stream", json!(true)),
        ]);

        let outputs = executor
            .execute(&node, &inputs, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outputs["text"], json!("echo: local prompt"));

        let requests = provider.requests.lock().unwrap();
        let (key, request) = &requests[0];
        assert_eq!(key, "sk-abc");
        assert_eq!(request.model, "deepseek-reasoner");
        assert_eq!(request.messages[0].content, DEFAULT_SYSTEM_PROMPT);
        assert_eq!(request.temperature, Some(0.1));
        assert_eq!(request.max_tokens, Some(64));
        assert!(request.stream);
    }

    #[tokio::test]
    async fn test_provider_failure_falls_back_to_mock() {
        let provider = Arc::new(ScriptedProvider {
            fail: true,
            ..Default::default()
        });
        let executor = LlmQueryExecutor::new(provider);
        let inputs = upstream(&[("text", json!("hi")), ("apiKey", json!("sk-abc"))]);

        let outputs = executor
            .execute(&Node::new("q", "LLM_QUERY"), &inputs, &CancellationToken::new())
            .await
            .unwrap();
        assert!(outputs["text"].as_str().unwrap().contains("Input: hi"));
    }

    #[tokio::test]
    async fn test_cancelled_before_call() {
        let executor = LlmQueryExecutor::new(Arc::new(ScriptedProvider::default()));
        let token = CancellationToken::new();
        token.cancel();
        let inputs = upstream(&[("apiKey", json!("sk-abc"))]);

        let err = executor
            .execute(&Node::new("q", "LLM_QUERY"), &inputs, &token)
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<WorkflowError>(),
            Some(&WorkflowError::Cancelled)
        );
    }
}
