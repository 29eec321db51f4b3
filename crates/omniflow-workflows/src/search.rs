//! Web search capability consumed by WEB_SEARCH nodes
//!
//! Providers are supplied by the host application (credential management lives
//! outside the engine). Until one is wired in, `UnconfiguredSearchProvider`
//! fails every call and WEB_SEARCH answers with mock results.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

impl SearchResult {
    pub fn new(title: &str, url: &str, snippet: &str) -> Self {
        Self {
            title: title.to_string(),
            url: url.to_string(),
            snippet: snippet.to_string(),
            source: None,
            date: None,
        }
    }
}

/// Search backend
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Search with the provider identified by `provider_id` (e.g. "google").
    ///
    /// Implementations should return at most `max_results` hits.
    async fn search_web(
        &self,
        query: &str,
        provider_id: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>>;
}

/// Provider used when the host has not configured search
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredSearchProvider;

#[async_trait]
impl SearchProvider for UnconfiguredSearchProvider {
    async fn search_web(
        &self,
        _query: &str,
        provider_id: &str,
        _max_results: usize,
    ) -> Result<Vec<SearchResult>> {
        Err(anyhow::anyhow!(
            "No search provider configured for '{}'",
            provider_id
        ))
    }
}
