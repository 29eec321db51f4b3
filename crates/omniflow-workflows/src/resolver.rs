//! Dependency Resolver - execution order for a workflow graph
//!
//! Kahn's algorithm over the connection list. Roots are seeded in node-list
//! order and processed FIFO, so the result is deterministic for a given input.
//! Node ids are expected to be unique; a repeated id collapses onto its first
//! occurrence.

use omniflow_core::{Connection, Node, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::warn;

use crate::error::CycleError;

/// What to do when the graph contains a cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CyclePolicy {
    /// Warn and run in node-list order
    #[default]
    BestEffort,
    /// Refuse to run
    Fail,
}

/// Compute a dependency-respecting order.
///
/// Duplicate `source -> target` connections count once. Connections that
/// reference unknown node ids are ignored.
pub fn determine_execution_order(
    nodes: &[Node],
    connections: &[Connection],
) -> Result<Vec<NodeId>, CycleError> {
    let ids = unique_ids(nodes);
    let index: HashMap<&str, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); ids.len()];
    let mut in_degree = vec![0usize; ids.len()];
    let mut seen_edges = HashSet::new();

    for conn in connections {
        let (Some(&from), Some(&to)) = (
            index.get(conn.source.as_str()),
            index.get(conn.target.as_str()),
        ) else {
            continue;
        };
        if seen_edges.insert((from, to)) {
            successors[from].push(to);
            in_degree[to] += 1;
        }
    }

    let mut queue: VecDeque<usize> = (0..ids.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(ids.len());

    while let Some(current) = queue.pop_front() {
        order.push(current);
        for &next in &successors[current] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if order.len() < ids.len() {
        let placed: HashSet<usize> = order.iter().copied().collect();
        return Err(CycleError {
            ordered: order.iter().map(|&i| ids[i].to_string()).collect(),
            remaining: (0..ids.len())
                .filter(|i| !placed.contains(i))
                .map(|i| ids[i].to_string())
                .collect(),
        });
    }

    Ok(order.into_iter().map(|i| ids[i].to_string()).collect())
}

/// Lenient ordering: on a cycle, warn and fall back to node-list order.
///
/// Returns the order and whether a cycle was detected. In the fallback case
/// nodes downstream of the cycle may run before their inputs are ready.
pub fn execution_order_or_fallback(
    nodes: &[Node],
    connections: &[Connection],
) -> (Vec<NodeId>, bool) {
    match determine_execution_order(nodes, connections) {
        Ok(order) => (order, false),
        Err(cycle) => {
            warn!(
                remaining = ?cycle.remaining,
                "Workflow graph contains a cycle, falling back to node-list order"
            );
            let order = unique_ids(nodes).into_iter().map(str::to_string).collect();
            (order, true)
        }
    }
}

/// Resolve an order under the given policy
pub fn resolve_order(
    nodes: &[Node],
    connections: &[Connection],
    policy: CyclePolicy,
) -> Result<(Vec<NodeId>, bool), CycleError> {
    match policy {
        CyclePolicy::BestEffort => Ok(execution_order_or_fallback(nodes, connections)),
        CyclePolicy::Fail => determine_execution_order(nodes, connections).map(|o| (o, false)),
    }
}

fn unique_ids(nodes: &[Node]) -> Vec<&str> {
    let mut seen = HashSet::new();
    nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| seen.insert(*id))
        .collect()
}
