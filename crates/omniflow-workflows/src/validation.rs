//! Graph validation
//!
//! Static checks over a workflow document. The engine never calls these: it
//! runs whatever it is given. Front ends use them to warn before running.

use omniflow_core::{handle_port, Connection, Node, NodeId};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

use crate::resolver::determine_execution_order;

/// A problem found in a workflow graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ValidationIssue {
    DuplicateNodeId { node_id: NodeId },
    UnknownSource { connection_id: String, node_id: NodeId },
    UnknownTarget { connection_id: String, node_id: NodeId },
    SelfLoop { connection_id: String, node_id: NodeId },
    /// Nodes that could not be ordered: cycle members and everything
    /// downstream of them
    Cycle { node_ids: Vec<NodeId> },
    IncompatiblePorts {
        connection_id: String,
        output_type: String,
        input_type: String,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateNodeId { node_id } => write!(f, "duplicate node id '{}'", node_id),
            Self::UnknownSource {
                connection_id,
                node_id,
            } => write!(
                f,
                "connection '{}' starts at unknown node '{}'",
                connection_id, node_id
            ),
            Self::UnknownTarget {
                connection_id,
                node_id,
            } => write!(
                f,
                "connection '{}' ends at unknown node '{}'",
                connection_id, node_id
            ),
            Self::SelfLoop {
                connection_id,
                node_id,
            } => write!(
                f,
                "connection '{}' links node '{}' to itself",
                connection_id, node_id
            ),
            Self::Cycle { node_ids } => {
                write!(f, "nodes in or behind a cycle: {}", node_ids.join(", "))
            }
            Self::IncompatiblePorts {
                connection_id,
                output_type,
                input_type,
            } => write!(
                f,
                "connection '{}' links a '{}' output to a '{}' input",
                connection_id, output_type, input_type
            ),
        }
    }
}

/// Check a graph, returning every issue found (empty when valid)
pub fn validate_workflow(nodes: &[Node], connections: &[Connection]) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    let mut ids = HashSet::new();
    for node in nodes {
        if !ids.insert(node.id.as_str()) {
            issues.push(ValidationIssue::DuplicateNodeId {
                node_id: node.id.clone(),
            });
        }
    }

    let find = |id: &str| nodes.iter().find(|n| n.id == id);

    for conn in connections {
        let source = find(&conn.source);
        let target = find(&conn.target);

        if source.is_none() {
            issues.push(ValidationIssue::UnknownSource {
                connection_id: conn.id.clone(),
                node_id: conn.source.clone(),
            });
        }
        if target.is_none() {
            issues.push(ValidationIssue::UnknownTarget {
                connection_id: conn.id.clone(),
                node_id: conn.target.clone(),
            });
        }
        if conn.source == conn.target {
            issues.push(ValidationIssue::SelfLoop {
                connection_id: conn.id.clone(),
                node_id: conn.source.clone(),
            });
        }

        if let (Some(source), Some(target)) = (source, target) {
            if let Some(issue) = check_port_types(conn, source, target) {
                issues.push(issue);
            }
        }
    }

    if let Err(cycle) = determine_execution_order(nodes, connections) {
        issues.push(ValidationIssue::Cycle {
            node_ids: cycle.remaining,
        });
    }

    issues
}

// Only checked when both ports are declared with a type
fn check_port_types(conn: &Connection, source: &Node, target: &Node) -> Option<ValidationIssue> {
    let source_port = conn.source_handle.as_deref().and_then(handle_port)?;
    let target_port = conn.target_handle.as_deref().and_then(handle_port)?;
    let output_type = source.data.outputs.get(source_port)?.port_type.as_deref()?;
    let input_type = target.data.inputs.get(target_port)?.port_type.as_deref()?;

    if are_port_types_compatible(output_type, input_type) {
        None
    } else {
        Some(ValidationIssue::IncompatiblePorts {
            connection_id: conn.id.clone(),
            output_type: output_type.to_string(),
            input_type: input_type.to_string(),
        })
    }
}

/// Whether an output of `output_type` may feed an input of `input_type`.
///
/// Types outside the table connect only to themselves or to `any`.
pub fn are_port_types_compatible(output_type: &str, input_type: &str) -> bool {
    if output_type == input_type || output_type == "any" || input_type == "any" {
        return true;
    }
    let accepted: &[&str] = match output_type {
        "text" | "string" => &["text", "string", "prompt"],
        "image" | "video" | "audio" => &["media"],
        "embedding" => &["array"],
        _ => &[],
    };
    accepted.contains(&input_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use omniflow_core::PortValue;

    #[test]
    fn test_port_type_table() {
        assert!(are_port_types_compatible("text", "prompt"));
        assert!(are_port_types_compatible("string", "text"));
        assert!(are_port_types_compatible("image", "media"));
        assert!(are_port_types_compatible("embedding", "array"));
        assert!(are_port_types_compatible("any", "number"));
        assert!(are_port_types_compatible("model", "any"));
        assert!(are_port_types_compatible("custom", "custom"));

        assert!(!are_port_types_compatible("number", "text"));
        assert!(!are_port_types_compatible("array", "embedding"));
        assert!(!are_port_types_compatible("media", "image"));
        assert!(!are_port_types_compatible("custom", "other"));
    }

    #[test]
    fn test_valid_graph() {
        let nodes = vec![Node::new("a", "TEXT_INPUT"), Node::new("b", "LLM_QUERY")];
        let conns = vec![Connection::new("a", "b")];
        assert!(validate_workflow(&nodes, &conns).is_empty());
    }

    #[test]
    fn test_reports_structural_issues() {
        let nodes = vec![
            Node::new("a", "TEXT_INPUT"),
            Node::new("a", "TEXT_INPUT"),
            Node::new("b", "LLM_QUERY"),
        ];
        let conns = vec![
            Connection::new("ghost", "b"),
            Connection::new("b", "b"),
        ];

        let issues = validate_workflow(&nodes, &conns);
        assert_eq!(
            issues,
            vec![
                ValidationIssue::DuplicateNodeId {
                    node_id: "a".into()
                },
                ValidationIssue::UnknownSource {
                    connection_id: "ghost-b".into(),
                    node_id: "ghost".into()
                },
                ValidationIssue::SelfLoop {
                    connection_id: "b-b".into(),
                    node_id: "b".into()
                },
                ValidationIssue::Cycle {
                    node_ids: vec!["b".into()]
                },
            ]
        );
        assert_eq!(issues[3].to_string(), "nodes in or behind a cycle: b");
    }

    #[test]
    fn test_cycle_issue_includes_downstream_nodes() {
        let nodes = vec![
            Node::new("a", "TEXT_INPUT"),
            Node::new("b", "LLM_QUERY"),
            Node::new("tail", "ENCODER"),
        ];
        let conns = vec![
            Connection::new("a", "b"),
            Connection::new("b", "a"),
            Connection::new("b", "tail"),
        ];

        let issues = validate_workflow(&nodes, &conns);
        assert_eq!(issues.len(), 1);
        assert_eq!(
            issues[0].to_string(),
            "nodes in or behind a cycle: a, b, tail"
        );
    }

    #[test]
    fn test_incompatible_declared_ports() {
        let mut source = Node::new("enc", "ENCODER");
        source.data.outputs.insert(
            "embedding".into(),
            PortValue::default().with_type("embedding"),
        );
        let mut target = Node::new("q", "LLM_QUERY");
        target
            .data
            .inputs
            .insert("prompt".into(), PortValue::default().with_type("text"));

        let conns =
            vec![Connection::new("enc", "q").with_handles("output-embedding", "input-prompt")];
        let issues = validate_workflow(&[source, target], &conns);
        assert_eq!(
            issues,
            vec![ValidationIssue::IncompatiblePorts {
                connection_id: "enc-q".into(),
                output_type: "embedding".into(),
                input_type: "text".into(),
            }]
        );
    }
}
