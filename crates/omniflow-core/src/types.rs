//! Workflow graph data model
//!
//! These types mirror the JSON produced by the visual editor: nodes carry a
//! `type` key selecting their executor and a `data.inputs` map of per-port
//! configuration, connections link a source node to a target node.
//! Fields that only matter to the canvas (positions, labels) are accepted and
//! carried along but never interpreted by the engine.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};

/// Unique identifier of a node within one workflow
pub type NodeId = String;

/// Named values flowing into or out of a node, keyed by port name
pub type PortMap = Map<String, Value>;

/// Canvas position of a node (ignored by the engine)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
}

/// A single configured port on a node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortValue {
    /// Declared data type ("text", "number", "embedding", ...)
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub port_type: Option<String>,
    /// Current value entered in the editor
    #[serde(default)]
    pub value: Value,
    /// Any additional editor metadata (labels, options, placeholders)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PortValue {
    /// Create a port holding a value
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            port_type: None,
            value: value.into(),
            extra: Map::new(),
        }
    }

    /// Set the declared port type
    pub fn with_type(mut self, port_type: &str) -> Self {
        self.port_type = Some(port_type.to_string());
        self
    }
}

/// Node payload as stored by the editor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub inputs: HashMap<String, PortValue>,
    #[serde(default)]
    pub outputs: HashMap<String, PortValue>,
}

/// A unit of work in the workflow graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Node ID (unique within workflow)
    pub id: NodeId,
    /// Executor key (e.g. "TEXT_INPUT", "LLM_QUERY")
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub data: NodeData,
}

impl Node {
    /// Create a node with no configured ports
    pub fn new(id: &str, node_type: &str) -> Self {
        Self {
            id: id.to_string(),
            node_type: node_type.to_string(),
            position: Position::default(),
            data: NodeData::default(),
        }
    }

    /// Set the display label
    pub fn with_label(mut self, label: &str) -> Self {
        self.data.label = label.to_string();
        self
    }

    /// Configure a node-local input port value
    pub fn with_input(mut self, port: &str, value: impl Into<Value>) -> Self {
        self.data
            .inputs
            .insert(port.to_string(), PortValue::new(value));
        self
    }

    /// Label for log output, falling back to the id
    pub fn display_name(&self) -> &str {
        if self.data.label.trim().is_empty() {
            &self.id
        } else {
            &self.data.label
        }
    }

    /// The node-local value of an input port, if one is present.
    ///
    /// Missing ports, `null` and blank strings count as absent.
    pub fn local_value(&self, port: &str) -> Option<&Value> {
        self.data
            .inputs
            .get(port)
            .map(|p| &p.value)
            .filter(|v| value_is_present(v))
    }
}

/// A directed link from one node's output to another node's input
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    #[serde(default)]
    pub id: String,
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

impl Connection {
    /// Create a handle-less connection
    pub fn new(source: &str, target: &str) -> Self {
        Self {
            id: format!("{}-{}", source, target),
            source: source.to_string(),
            target: target.to_string(),
            source_handle: None,
            target_handle: None,
        }
    }

    /// Attach source and target handles (e.g. "output-text", "input-prompt")
    pub fn with_handles(mut self, source_handle: &str, target_handle: &str) -> Self {
        self.source_handle = Some(source_handle.to_string());
        self.target_handle = Some(target_handle.to_string());
        self
    }

    /// Port name addressed by the source handle
    pub fn source_port(&self) -> Option<&str> {
        self.source_handle.as_deref().and_then(handle_port)
    }

    /// Port name addressed by the target handle
    pub fn target_port(&self) -> Option<&str> {
        self.target_handle.as_deref().and_then(handle_port)
    }
}

/// Extract the port name from an editor handle id.
///
/// Handles look like `output-text`; the port is the segment after the first
/// `-`. A handle without `-` is the port name itself.
pub fn handle_port(handle: &str) -> Option<&str> {
    let handle = handle.trim();
    let port = match handle.split_once('-') {
        Some((_, rest)) => rest.split('-').next().unwrap_or(rest),
        None => handle,
    };
    if port.is_empty() {
        None
    } else {
        Some(port)
    }
}

/// A complete graph as handed over by the editor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDocument {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default, alias = "edges")]
    pub connections: Vec<Connection>,
}

impl WorkflowDocument {
    /// Parse a document from JSON text
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a document from disk
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content)
    }
}

/// Whether a value counts as supplied: not `null` and not a blank string.
pub fn value_is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}

/// Render a value as text; strings are returned without JSON quoting.
pub fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Read a number, accepting numeric strings such as `"0.7"`.
pub fn value_as_f64(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|v| v.is_finite())
}

/// Read a non-negative integer, accepting numeric strings such as `"5"`.
pub fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.trunc() as u64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>()
                .ok()
                .or_else(|| leading_digits(s).and_then(|d| d.parse().ok()))
        }
        _ => None,
    }
}

/// Read a boolean, accepting `"true"` / `"false"` strings.
pub fn value_as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

// parseInt-style prefix: "3 items" -> "3"
fn leading_digits(s: &str) -> Option<&str> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    if end == 0 {
        None
    } else {
        Some(&s[..end])
    }
}
