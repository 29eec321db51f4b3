//! omniflow-llm: chat-completion providers for LLM workflow nodes
//!
//! ## Supported Providers & Endpoints
//!
//! | Provider | Base URL | Auth Method |
//! |----------|----------|-------------|
//! | DeepSeek | `https://api.deepseek.com/v1` | `Bearer {API_KEY}` |
//!
//! The API key is not read from the environment: it travels with each request,
//! because workflows carry it on their model-selector nodes.

pub mod deepseek;
pub mod provider;

pub use deepseek::DeepSeekClient;
pub use provider::{ChatMessage, ChatRequest, ChatResponse, LlmProvider, ProviderType, TokenUsage};
