//! Counterexample paths through the ARG.

use std::collections::BTreeSet;
use std::fmt;

use crate::arg::{Arg, NodeId};
use crate::cfa::{Edge, LocationId, ProgramGraph};
use crate::error::{CpaError, Result};

/// Path from the ARG root to a node.
///
/// Holds `n` nodes with their locations and the `n - 1` edges between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterexamplePath {
    nodes: Vec<NodeId>,
    locations: Vec<LocationId>,
    edges: Vec<Edge>,
}

impl CounterexamplePath {
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn locations(&self) -> &[LocationId] {
        &self.locations
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Number of nodes on the path.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The last node of the path.
    pub fn target(&self) -> Option<NodeId> {
        self.nodes.last().copied()
    }
}

impl fmt::Display for CounterexamplePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(first) = self.locations.first() {
            write!(f, "{}", first)?;
        }
        for edge in &self.edges {
            write!(f, " -{{{}}}-> {}", edge.effect, edge.to)?;
        }
        Ok(())
    }
}

impl<S> Arg<S> {
    /// Extracts the path from the root to `target`.
    ///
    /// At nodes with several parents the first-inserted one is followed.
    /// Fails with [`CpaError::MalformedPath`] if the parent chain is broken
    /// or does not reach the root, and with [`CpaError::UnknownLocation`] if
    /// an edge is missing from the graph.
    pub fn path_to(&self, target: NodeId, graph: &dyn ProgramGraph) -> Result<CounterexamplePath> {
        let root = self.root().ok_or(CpaError::MalformedPath(target))?;
        let mut node = self.node(target).ok_or(CpaError::NodeNotFound(target))?;

        let mut visited = BTreeSet::from([target]);
        let mut chain = Vec::new();
        while node.id() != root {
            let (parent, edge) = node.first_parent().ok_or(CpaError::MalformedPath(target))?;
            if !visited.insert(parent) {
                return Err(CpaError::MalformedPath(target));
            }
            chain.push((parent, edge));
            node = self.node(parent).ok_or(CpaError::MalformedPath(target))?;
        }
        chain.reverse();

        let mut nodes = Vec::with_capacity(chain.len() + 1);
        let mut locations = Vec::with_capacity(chain.len() + 1);
        let mut edges = Vec::with_capacity(chain.len());
        for (i, &(parent, edge_id)) in chain.iter().enumerate() {
            let from = self.get_location(parent, target)?;
            let edge = graph
                .outgoing_edges(from)?
                .iter()
                .find(|e| e.id == edge_id)
                .ok_or(CpaError::MalformedPath(target))?;
            let child = chain.get(i + 1).map_or(target, |&(c, _)| c);
            if edge.to != self.get_location(child, target)? {
                return Err(CpaError::MalformedPath(target));
            }
            nodes.push(parent);
            locations.push(from);
            edges.push(edge.clone());
        }
        nodes.push(target);
        locations.push(self.get_location(target, target)?);

        Ok(CounterexamplePath { nodes, locations, edges })
    }

    fn get_location(&self, node: NodeId, target: NodeId) -> Result<LocationId> {
        self.node(node).map(|n| n.location()).ok_or(CpaError::MalformedPath(target))
    }
}
