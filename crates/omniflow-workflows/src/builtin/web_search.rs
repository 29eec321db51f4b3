//! Web Search Node - queries the configured search provider

use anyhow::Result;
use async_trait::async_trait;
use omniflow_core::{value_as_text, value_as_u64, Node, PortMap};
use serde_json::Value;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::node_types;
use crate::error::WorkflowError;
use crate::executor::{resolve_input, simulated_latency, NodeExecutor};
use crate::search::{SearchProvider, SearchResult};

const DEFAULT_SEARCH_ENGINE: &str = "google";
const DEFAULT_MAX_RESULTS: usize = 5;

/// Outputs `{text}` with formatted search results.
///
/// Provider failures are logged and answered with mock results.
pub struct WebSearchExecutor {
    provider: Arc<dyn SearchProvider>,
    mock_latency: Duration,
}

impl WebSearchExecutor {
    pub fn new(provider: Arc<dyn SearchProvider>, mock_latency: Duration) -> Self {
        Self {
            provider,
            mock_latency,
        }
    }
}

#[async_trait]
impl NodeExecutor for WebSearchExecutor {
    fn node_type(&self) -> &str {
        node_types::WEB_SEARCH
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
        let engine = node
            .local_value("searchEngine")
            .map(value_as_text)
            .unwrap_or_else(|| DEFAULT_SEARCH_ENGINE.to_string());
        let max_results = node
            .local_value("maxResults")
            .and_then(value_as_u64)
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_RESULTS);

        debug!(node_id = %node.id, query = %query, engine = %engine, max_results, "Web search");

        let searched = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(WorkflowError::Cancelled.into()),
            result = self.provider.search_web(&query, &engine, max_results) => result,
        };

        let text = match searched {
            Ok(mut results) => {
                results.truncate(max_results);
                format_results(&query, &engine, &results)
            }
            Err(e) => {
                warn!(node_id = %node.id, error = %e, "Search failed, using mock results");
                simulated_latency(self.mock_latency, token).await?;
                mock_results(&query)
            }
        };

        let mut outputs = PortMap::new();
        outputs.insert("text".to_string(), Value::String(text));
        Ok(outputs)
    }
}

/// Render hits as a numbered plain-text list
pub fn format_results(query: &str, engine: &str, results: &[SearchResult]) -> String {
    let mut text = format!(
        "Search query: \"{}\"\nSearch engine: {}\n\nResults:\n\n",
        query, engine
    );
    for (i, result) in results.iter().enumerate() {
        let _ = write!(
            text,
            "{}. {}\n   URL: {}\n   {}\n\n",
            i + 1,
            result.title,
            result.url,
            result.snippet
        );
    }
    text
}

fn mock_results(query: &str) -> String {
    format!(
        "Mock search results:\nQuery: {}\nResults: sample results related to the query...",
        query
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::UnconfiguredSearchProvider;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingProvider {
        calls: Mutex<Vec<(String, String, usize)>>,
    }

    #[async_trait]
    impl SearchProvider for RecordingProvider {
        async fn search_web(
            &self,
            query: &str,
            provider_id: &str,
            max_results: usize,
        ) -> Result<Vec<SearchResult>> {
            self.calls
                .lock()
                .unwrap()
                .push((query.to_string(), provider_id.to_string(), max_results));
            Ok(vec![
                SearchResult::new("Rust", "https://www.rust-lang.org", "A language"),
                SearchResult::new("Tokio", "https://tokio.rs", "An async runtime"),
                SearchResult::new("Serde", "https://serde.rs", "Serialization"),
            ])
        }
    }

    #[tokio::test]
    async fn test_formats_provider_results() {
        let provider = Arc::new(RecordingProvider::default());
        let executor = WebSearchExecutor::new(provider.clone(), Duration::ZERO);
        let node = Node::new("s", "WEB_SEARCH")
            .with_input("searchEngine", "bing")
            .with_input("maxResults", "2");
        let mut inputs = PortMap::new();
        inputs.insert("text".into(), json!("rust async"));

        let outputs = executor
            .execute(&node, &inputs, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            outputs["text"],
            json!(
                "Search query: \"rust async\"\nSearch engine: bing\n\nResults:\n\n\
                 1. Rust\n   URL: https://www.rust-lang.org\n   A language\n\n\
                 2. Tokio\n   URL: https://tokio.rs\n   An async runtime\n\n"
            )
        );
        assert_eq!(
            provider.calls.lock().unwrap().as_slice(),
            &[("rust async".to_string(), "bing".to_string(), 2)]
        );
    }

    #[tokio::test]
    async fn test_provider_failure_falls_back_to_mock() {
        let executor = WebSearchExecutor::new(Arc::new(UnconfiguredSearchProvider), Duration::ZERO);
        let node = Node::new("s", "WEB_SEARCH").with_input("query", "weather");

        let outputs = executor
            .execute(&node, &PortMap::new(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            outputs["text"],
            json!("Mock search results:\nQuery: weather\nResults: sample results related to the query...")
        );
    }
}
