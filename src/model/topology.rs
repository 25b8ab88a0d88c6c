//! Derived adjacency index over a diagram.
//!
//! The diagram itself stays a flat node/edge list; this index answers the
//! structural questions the orchestrator needs (do endpoints exist, which
//! edges touch a node) and the occupancy queries the port allocator runs
//! before every connection.

use std::collections::{HashMap, HashSet};

use petgraph::{
    Direction,
    graph::{DiGraph, NodeIndex},
};

use crate::{
    Result, ToposyncError,
    model::{DiagramEdge, DiagramModel, EdgeId, HandleId, NodeId},
};

pub struct Topology {
    graph: DiGraph<NodeId, EdgeId>,
    node_map: HashMap<NodeId, NodeIndex>,
}

impl Topology {
    /// Build the index, rejecting edges with dangling endpoints.
    pub fn from_model(model: &DiagramModel) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut node_map = HashMap::new();

        for node in &model.nodes {
            let idx = graph.add_node(node.id.clone());
            node_map.insert(node.id.clone(), idx);
        }

        for edge in &model.edges {
            let source = node_map.get(&edge.source).ok_or_else(|| ToposyncError::Model(format!("edge {} references missing source node {}", edge.id, edge.source)))?;
            let target = node_map.get(&edge.target).ok_or_else(|| ToposyncError::Model(format!("edge {} references missing target node {}", edge.id, edge.target)))?;
            graph.add_edge(*source, *target, edge.id.clone());
        }

        Ok(Self {
            graph,
            node_map,
        })
    }

    pub fn contains_node(
        &self,
        id: &str,
    ) -> bool {
        self.node_map.contains_key(id)
    }

    /// Every edge touching the node, in either direction.
    pub fn incident_edges(
        &self,
        id: &str,
    ) -> Vec<EdgeId> {
        let Some(idx) = self.node_map.get(id) else {
            return Vec::new();
        };

        let mut edges: Vec<EdgeId> = self.graph.edges_directed(*idx, Direction::Outgoing).map(|e| e.weight().clone()).collect();
        edges.extend(self.graph.edges_directed(*idx, Direction::Incoming).map(|e| e.weight().clone()));
        edges.sort();
        edges.dedup();
        edges
    }
}

/// Out-handles already taken on `node_id` as edge source endpoints.
///
/// `exclude` removes one edge from consideration so a reconnection can
/// reclaim its own prior port.
pub fn occupied_source_handles(
    edges: &[DiagramEdge],
    node_id: &str,
    exclude: Option<&str>,
) -> HashSet<HandleId> {
    edges
        .iter()
        .filter(|e| e.source == node_id && exclude.is_none_or(|x| e.id != x))
        .map(|e| e.source_handle.clone())
        .collect()
}

/// In-handles already taken on `node_id` as edge target endpoints.
pub fn occupied_target_handles(
    edges: &[DiagramEdge],
    node_id: &str,
    exclude: Option<&str>,
) -> HashSet<HandleId> {
    edges
        .iter()
        .filter(|e| e.target == node_id && exclude.is_none_or(|x| e.id != x))
        .map(|e| e.target_handle.clone())
        .collect()
}
