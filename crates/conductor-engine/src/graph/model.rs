use chrono::{DateTime, Utc};
use conductor_core::{EngineError, InterruptEffect, NodeExecution, PlanExecution, Result, Status};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

/// Version of the vertex layout below. Graphs built by a different layout
/// are never served from cache.
pub const GRAPH_ALGORITHM_ID: &str = "chain-tree-v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphVertex {
    pub id: String,
    pub name: String,
    pub identifier: String,
    pub step_type: String,
    pub status: Status,
    pub start_ts: Option<DateTime<Utc>>,
    pub end_ts: Option<DateTime<Utc>>,
    pub interrupt_histories: Vec<InterruptEffect>,
    pub retry_ids: Vec<String>,
    /// Heads of the child chains, ordered by start time.
    pub children: Vec<GraphVertex>,
    pub next: Option<Box<GraphVertex>>,
}

/// Cached projection of a plan execution's node tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationGraph {
    pub plan_execution_id: String,
    pub root_node_id: String,
    pub status: Status,
    pub start_ts: Option<DateTime<Utc>>,
    pub end_ts: Option<DateTime<Utc>>,
    /// Watermark of the node executions the graph was built from.
    pub cache_context_order: i64,
    pub structure_hash: String,
    pub algorithm_id: String,
    pub generated_at: DateTime<Utc>,
    pub root: GraphVertex,
}

impl OrchestrationGraph {
    /// Whether this graph still reflects node executions last updated at `watermark`.
    pub fn is_fresh(&self, watermark: i64) -> bool {
        self.algorithm_id == GRAPH_ALGORITHM_ID && self.cache_context_order >= watermark
    }

    pub fn vertex_count(&self) -> usize {
        count(&self.root)
    }

    pub fn find_vertex(&self, id: &str) -> Option<&GraphVertex> {
        find(&self.root, id)
    }
}

fn count(vertex: &GraphVertex) -> usize {
    1 + vertex.children.iter().map(count).sum::<usize>() + vertex.next.as_deref().map(count).unwrap_or(0)
}

fn find<'a>(vertex: &'a GraphVertex, id: &str) -> Option<&'a GraphVertex> {
    if vertex.id == id {
        return Some(vertex);
    }
    vertex
        .children
        .iter()
        .find_map(|child| find(child, id))
        .or_else(|| vertex.next.as_deref().and_then(|next| find(next, id)))
}

/// Hex SHA-256 over the sorted `(id, parent, previous)` triples.
pub fn structure_hash(nodes: &[NodeExecution]) -> String {
    let mut triples: Vec<(&str, &str, &str)> = nodes
        .iter()
        .map(|node| {
            (
                node.id.as_str(),
                node.parent_id.as_deref().unwrap_or(""),
                node.previous_id.as_deref().unwrap_or(""),
            )
        })
        .collect();
    triples.sort_unstable();

    let mut hasher = Sha256::new();
    for (id, parent, previous) in triples {
        hasher.update(id.as_bytes());
        hasher.update([0u8]);
        hasher.update(parent.as_bytes());
        hasher.update([0u8]);
        hasher.update(previous.as_bytes());
        hasher.update([b'\n']);
    }
    hex::encode(hasher.finalize())
}

/// Builds the vertex tree of `plan` from its current node executions.
pub(crate) fn build_graph(plan: &PlanExecution, nodes: &[NodeExecution], watermark: i64) -> Result<OrchestrationGraph> {
    let mut roots = nodes.iter().filter(|node| node.is_root());
    let root = match (roots.next(), roots.next()) {
        (Some(root), None) => root,
        _ => return Err(EngineError::root_node_missing(plan.id.clone())),
    };

    let index = NodeIndex::new(nodes);
    let mut visited = HashSet::new();
    let root_vertex = index.vertex(root, &mut visited)?;

    Ok(OrchestrationGraph {
        plan_execution_id: plan.id.clone(),
        root_node_id: root.id.clone(),
        status: plan.status,
        start_ts: plan.start_ts,
        end_ts: plan.end_ts,
        cache_context_order: watermark,
        structure_hash: structure_hash(nodes),
        algorithm_id: GRAPH_ALGORITHM_ID.to_string(),
        generated_at: Utc::now(),
        root: root_vertex,
    })
}

struct NodeIndex<'a> {
    chain_heads: HashMap<&'a str, Vec<&'a NodeExecution>>,
    successors: HashMap<&'a str, &'a NodeExecution>,
}

impl<'a> NodeIndex<'a> {
    fn new(nodes: &'a [NodeExecution]) -> Self {
        let mut chain_heads: HashMap<&str, Vec<&NodeExecution>> = HashMap::new();
        let mut successors = HashMap::new();
        for node in nodes {
            match (node.previous_id.as_deref(), node.parent_id.as_deref()) {
                (Some(previous), _) => {
                    successors.insert(previous, node);
                }
                (None, Some(parent)) => chain_heads.entry(parent).or_default().push(node),
                (None, None) => {}
            }
        }
        for heads in chain_heads.values_mut() {
            heads.sort_by(|a, b| a.start_ts.cmp(&b.start_ts).then_with(|| a.id.cmp(&b.id)));
        }
        Self {
            chain_heads,
            successors,
        }
    }

    /// The node following `node` in its chain. A retried node is still
    /// pointed at by the ids it superseded.
    fn successor(&self, node: &NodeExecution) -> Option<&'a NodeExecution> {
        self.successors.get(node.id.as_str()).copied().or_else(|| {
            node.retry_ids
                .iter()
                .rev()
                .find_map(|id| self.successors.get(id.as_str()).copied())
        })
    }

    fn vertex(&self, node: &'a NodeExecution, visited: &mut HashSet<&'a str>) -> Result<GraphVertex> {
        if !visited.insert(node.id.as_str()) {
            return Err(EngineError::internal(format!(
                "cycle through node execution {} in plan execution {}",
                node.id, node.plan_execution_id
            )));
        }

        let mut children = Vec::new();
        for head in self.chain_heads.get(node.id.as_str()).into_iter().flatten().copied() {
            children.push(self.vertex(head, visited)?);
        }
        let next = match self.successor(node) {
            Some(successor) => Some(Box::new(self.vertex(successor, visited)?)),
            None => None,
        };

        Ok(GraphVertex {
            id: node.id.clone(),
            name: node.name.clone(),
            identifier: node.identifier.clone(),
            step_type: node.step_type.clone(),
            status: node.status,
            start_ts: node.start_ts,
            end_ts: node.end_ts,
            interrupt_histories: node.interrupt_histories.clone(),
            retry_ids: node.retry_ids.clone(),
            children,
            next,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes() -> Vec<NodeExecution> {
        vec![
            NodeExecution::new("pipeline", "p1"),
            NodeExecution::new("stage-1", "p1").with_parent("pipeline"),
            NodeExecution::new("stage-2", "p1").with_parent("pipeline").with_previous("stage-1"),
            NodeExecution::new("step-a", "p1").with_parent("stage-1"),
            NodeExecution::new("step-b", "p1").with_parent("stage-1").with_previous("step-a"),
        ]
    }

    #[test]
    fn vertex_tree_follows_parent_and_chain_pointers() {
        let nodes = nodes();
        let graph = build_graph(&PlanExecution::new("p1", "build"), &nodes, 42).expect("graph");

        assert_eq!(graph.root_node_id, "pipeline");
        assert_eq!(graph.cache_context_order, 42);
        assert_eq!(graph.vertex_count(), 5);
        let stage = &graph.root.children[0];
        assert_eq!(stage.id, "stage-1");
        assert_eq!(stage.next.as_ref().map(|v| v.id.as_str()), Some("stage-2"));
        assert_eq!(stage.children[0].next.as_ref().map(|v| v.id.as_str()), Some("step-b"));
    }

    #[test]
    fn missing_root_is_reported() {
        let nodes = vec![NodeExecution::new("orphan", "p1").with_parent("gone")];
        let err = build_graph(&PlanExecution::new("p1", "build"), &nodes, 0).unwrap_err();
        assert!(matches!(err, EngineError::RootNodeMissing { .. }));
    }

    #[test]
    fn structure_hash_ignores_order_but_not_shape() {
        let mut nodes = nodes();
        let hash = structure_hash(&nodes);
        nodes.reverse();
        assert_eq!(structure_hash(&nodes), hash);

        nodes[0].previous_id = None;
        assert_ne!(structure_hash(&nodes), hash);
        assert_eq!(hash.len(), 64);
    }
}
