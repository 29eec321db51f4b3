//! Core types and utilities for omniflow
//!
//! # Modules
//!
//! - `config`: Environment loading and typed settings
//! - `error`: Error types and Result alias
//! - `types`: Workflow graph data model (nodes, connections, port maps)

pub mod config;
pub mod error;
pub mod types;

// Re-exports
pub use config::OmniflowConfig;
pub use error::{Error, Result};
pub use types::*;
