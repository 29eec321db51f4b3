//! Built-in node executors
//!
//! Provides the standard node types of the editor palette:
//! - Input nodes (text input, model selector)
//! - Retrieval nodes (web search, document query)
//! - Model nodes (LLM query, encoder)
//! - Utility nodes (sampler, custom script)

pub mod custom;
pub mod document_query;
pub mod encoder;
pub mod llm_query;
pub mod model_selector;
pub mod sampler;
pub mod text_input;
pub mod web_search;

pub use custom::CustomExecutor;
pub use document_query::DocumentQueryExecutor;
pub use encoder::EncoderExecutor;
pub use llm_query::LlmQueryExecutor;
pub use model_selector::ModelSelectorExecutor;
pub use sampler::SamplerExecutor;
pub use text_input::TextInputExecutor;
pub use web_search::WebSearchExecutor;

use omniflow_core::OmniflowConfig;
use omniflow_llm::{DeepSeekClient, LlmProvider};
use std::sync::Arc;

use crate::executor::{BoxedExecutor, ExecutorSettings};
use crate::search::{SearchProvider, UnconfiguredSearchProvider};

/// Node type keys of the built-in executors
pub mod node_types {
    pub const TEXT_INPUT: &str = "TEXT_INPUT";
    pub const WEB_SEARCH: &str = "WEB_SEARCH";
    pub const DOCUMENT_QUERY: &str = "DOCUMENT_QUERY";
    pub const MODEL_SELECTOR: &str = "MODEL_SELECTOR";
    pub const LLM_QUERY: &str = "LLM_QUERY";
    pub const ENCODER: &str = "ENCODER";
    pub const SAMPLER: &str = "SAMPLER";
    pub const CUSTOM: &str = "CUSTOM";
}

/// Collaborators injected into the built-in executors
#[derive(Clone)]
pub struct BuiltinDependencies {
    pub search: Arc<dyn SearchProvider>,
    pub llm: Arc<dyn LlmProvider>,
    pub settings: ExecutorSettings,
}

impl BuiltinDependencies {
    /// Wire the DeepSeek client and executor settings from configuration
    pub fn from_config(config: &OmniflowConfig) -> Self {
        Self {
            search: Arc::new(UnconfiguredSearchProvider),
            llm: Arc::new(DeepSeekClient::with_endpoint(
                config.deepseek_base_url.clone(),
                config.http_timeout(),
            )),
            settings: ExecutorSettings::from_config(config),
        }
    }

    pub fn with_search(mut self, search: Arc<dyn SearchProvider>) -> Self {
        self.search = search;
        self
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmProvider>) -> Self {
        self.llm = llm;
        self
    }

    pub fn with_settings(mut self, settings: ExecutorSettings) -> Self {
        self.settings = settings;
        self
    }
}

impl Default for BuiltinDependencies {
    fn default() -> Self {
        Self {
            search: Arc::new(UnconfiguredSearchProvider),
            llm: Arc::new(DeepSeekClient::new()),
            settings: ExecutorSettings::default(),
        }
    }
}

/// Instantiate every built-in executor
pub fn builtin_executors(deps: BuiltinDependencies) -> Vec<BoxedExecutor> {
    let settings = deps.settings;
    vec![
        Arc::new(TextInputExecutor),
        Arc::new(WebSearchExecutor::new(deps.search, settings.mock_latency)),
        Arc::new(DocumentQueryExecutor::new(settings.mock_latency)),
        Arc::new(ModelSelectorExecutor),
        Arc::new(LlmQueryExecutor::new(deps.llm)),
        Arc::new(EncoderExecutor::new(settings.mock_latency)),
        Arc::new(SamplerExecutor::new(settings.sampler_seed)),
        Arc::new(CustomExecutor::new(settings.sandbox)),
    ]
}
