//! omniflow-workflows: Workflow engine with pluggable node executors
//!
//! Features:
//! - Topological ordering with best-effort cycle fallback
//! - Executor registry keyed by node type, with aliases
//! - Eight built-in node executors (text, search, LLM, sampling, scripts)
//! - Per-node failure isolation
//! - Run controller with progress snapshots, stop and timeout

pub mod builtin;
pub mod controller;
pub mod engine;
pub mod error;
pub mod executor;
pub mod registry;
pub mod resolver;
pub mod sandbox;
pub mod search;
pub mod validation;

pub use builtin::{builtin_executors, node_types, BuiltinDependencies};
pub use controller::{RunState, SubscriptionId, WorkflowController};
pub use engine::{
    merge_inputs, EngineEvent, EngineObserver, ErrorHandling, ExecutionOptions, WorkflowEngine,
    WorkflowExecutionResult,
};
pub use error::{CycleError, WorkflowError, WorkflowResult};
pub use executor::{BoxedExecutor, ExecutorSettings, MockExecutor, NodeExecutor, SandboxConfig};
pub use registry::ExecutorRegistry;
pub use resolver::{determine_execution_order, resolve_order, CyclePolicy};
pub use search::{SearchProvider, SearchResult};
pub use validation::{are_port_types_compatible, validate_workflow, ValidationIssue};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::builtin::BuiltinDependencies;
    pub use super::controller::{RunState, WorkflowController};
    pub use super::engine::{ExecutionOptions, WorkflowEngine, WorkflowExecutionResult};
    pub use super::error::{WorkflowError, WorkflowResult};
    pub use super::executor::NodeExecutor;
    pub use super::registry::ExecutorRegistry;
    pub use super::resolver::CyclePolicy;
}
