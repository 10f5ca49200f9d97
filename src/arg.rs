//! Abstract Reachability Graph.
//!
//! The ARG records how every reached state was derived: each node wraps an
//! abstract state and links to the parent nodes (with the CFA edge taken)
//! it was computed from. Nodes live in an arena and are addressed by
//! [`NodeId`]; removed nodes leave a tombstone, so ids are never reused and
//! are ordered by creation time.
//!
//! Structural invariants (checked by [`Arg::check_invariants`]):
//! - every node except the root has at least one parent,
//! - covered nodes have no children,
//! - parent and child links are symmetric,
//! - the parent relation has no cycles other than self-loops.

use std::collections::BTreeSet;
use std::fmt;

use crate::cfa::{EdgeId, LocationId};
use crate::error::{CpaError, Result};

/// Handle to an ARG node.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub const fn new(index: usize) -> Self {
        NodeId(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Node of the ARG.
#[derive(Debug, Clone)]
pub struct ArgNode<S> {
    id: NodeId,
    state: S,
    location: LocationId,
    parents: Vec<(NodeId, EdgeId)>,
    children: Vec<NodeId>,
    covered_by: Vec<NodeId>,
    covering: Vec<NodeId>,
    target: bool,
}

impl<S> ArgNode<S> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn location(&self) -> LocationId {
        self.location
    }

    /// Parents in insertion order, with the edge that leads to this node.
    pub fn parents(&self) -> &[(NodeId, EdgeId)] {
        &self.parents
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Nodes whose states cover this one. Empty for uncovered nodes.
    pub fn covered_by(&self) -> &[NodeId] {
        &self.covered_by
    }

    /// Nodes this node covers.
    pub fn covering(&self) -> &[NodeId] {
        &self.covering
    }

    pub fn is_covered(&self) -> bool {
        !self.covered_by.is_empty()
    }

    pub fn is_target(&self) -> bool {
        self.target
    }

    /// The first-inserted parent other than the node itself.
    pub fn first_parent(&self) -> Option<(NodeId, EdgeId)> {
        self.parents.iter().copied().find(|&(p, _)| p != self.id)
    }
}

/// Outcome of [`Arg::remove_subtree`].
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Removal {
    /// Removed nodes, in id order.
    pub removed: Vec<NodeId>,
    /// Surviving nodes that lost their coverer and are no longer covered.
    pub uncovered: Vec<NodeId>,
    /// Surviving parents of the removed nodes.
    pub frontier: Vec<NodeId>,
}

/// Arena-backed abstract reachability graph.
#[derive(Debug, Clone)]
pub struct Arg<S> {
    nodes: Vec<Option<ArgNode<S>>>,
    root: Option<NodeId>,
    live: usize,
}

impl<S> Default for Arg<S> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            root: None,
            live: 0,
        }
    }
}

impl<S> Arg<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn node(&self, id: NodeId) -> Option<&ArgNode<S>> {
        self.nodes.get(id.index())?.as_ref()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    pub fn state(&self, id: NodeId) -> Option<&S> {
        self.node(id).map(|n| &n.state)
    }

    /// Live nodes in creation order.
    pub fn nodes(&self) -> impl Iterator<Item = &ArgNode<S>> {
        self.nodes.iter().flatten()
    }

    /// Target nodes in creation order.
    pub fn targets(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes().filter(|n| n.target).map(|n| n.id)
    }

    fn get(&self, id: NodeId) -> &ArgNode<S> {
        match self.node(id) {
            Some(node) => node,
            None => panic!("ARG node {} does not exist", id),
        }
    }

    fn get_mut(&mut self, id: NodeId) -> &mut ArgNode<S> {
        match self.nodes.get_mut(id.index()).and_then(|n| n.as_mut()) {
            Some(node) => node,
            None => panic!("ARG node {} does not exist", id),
        }
    }

    fn alloc(&mut self, state: S, location: LocationId) -> NodeId {
        let id = NodeId::new(self.nodes.len());
        self.nodes.push(Some(ArgNode {
            id,
            state,
            location,
            parents: Vec::new(),
            children: Vec::new(),
            covered_by: Vec::new(),
            covering: Vec::new(),
            target: false,
        }));
        self.live += 1;
        id
    }

    /// Creates the root node.
    ///
    /// # Panics
    ///
    /// Panics if the ARG already has a root.
    pub fn add_root(&mut self, state: S, location: LocationId) -> NodeId {
        assert!(self.root.is_none(), "ARG already has a root");
        let id = self.alloc(state, location);
        self.root = Some(id);
        id
    }

    /// Creates a child of `parent` reached along `edge`.
    ///
    /// # Panics
    ///
    /// Panics if `parent` does not exist or is covered.
    pub fn add_child(&mut self, parent: NodeId, edge: EdgeId, state: S, location: LocationId) -> NodeId {
        assert!(!self.get(parent).is_covered(), "Covered node {} cannot get children", parent);
        let id = self.alloc(state, location);
        self.get_mut(id).parents.push((parent, edge));
        self.get_mut(parent).children.push(id);
        id
    }

    /// Links `node` as an additional child of `parent`.
    ///
    /// The link is skipped (returning `false`) if it already exists or if it
    /// would close a cycle longer than a self-loop.
    pub fn add_parent(&mut self, node: NodeId, parent: NodeId, edge: EdgeId) -> bool {
        assert!(!self.get(parent).is_covered(), "Covered node {} cannot get children", parent);
        if self.get(node).parents.contains(&(parent, edge)) {
            return false;
        }
        if node != parent && self.reaches(node, parent) {
            return false;
        }
        self.get_mut(node).parents.push((parent, edge));
        let children = &mut self.get_mut(parent).children;
        if !children.contains(&node) {
            children.push(node);
        }
        true
    }

    /// Whether `to` is reachable from `from` along child links.
    pub fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        let mut visited = BTreeSet::new();
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            if id == to {
                return true;
            }
            if visited.insert(id) {
                stack.extend(self.get(id).children.iter().copied());
            }
        }
        false
    }

    /// Marks `node` as covered by `by`.
    ///
    /// # Panics
    ///
    /// Panics if `node` has children or `by` is empty.
    pub fn cover(&mut self, node: NodeId, by: &[NodeId]) {
        assert!(!by.is_empty(), "Coverage needs at least one covering node");
        assert!(self.get(node).children.is_empty(), "Node {} with children cannot be covered", node);
        for &coverer in by {
            self.get_mut(coverer).covering.push(node);
        }
        self.get_mut(node).covered_by = by.to_vec();
    }

    pub fn mark_target(&mut self, node: NodeId) {
        self.get_mut(node).target = true;
    }

    /// Replaces the state of `node`, e.g. after a merge.
    pub fn replace_state(&mut self, node: NodeId, state: S) {
        self.get_mut(node).state = state;
    }

    /// All nodes reachable from `node` along child links, including itself.
    pub fn descendants(&self, node: NodeId) -> BTreeSet<NodeId> {
        let mut result = BTreeSet::new();
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            if result.insert(id) {
                stack.extend(self.get(id).children.iter().copied());
            }
        }
        result
    }

    /// Removes `cut` and every descendant that is not reachable through a
    /// surviving parent.
    ///
    /// Nodes covered by a removed node become uncovered leaves. Removing the
    /// root empties the graph.
    pub fn remove_subtree(&mut self, cut: NodeId) -> Result<Removal> {
        self.remove_subtrees(&[cut])
    }

    /// Removes all `cuts` (even if they have surviving parents) and every
    /// descendant that is left without a surviving parent.
    pub fn remove_subtrees(&mut self, cuts: &[NodeId]) -> Result<Removal> {
        if let Some(&missing) = cuts.iter().find(|&&c| !self.contains(c)) {
            return Err(CpaError::NodeNotFound(missing));
        }

        let mut doomed: BTreeSet<NodeId> = cuts.iter().copied().collect();
        let mut stack = cuts.to_vec();
        while let Some(id) = stack.pop() {
            for &child in &self.get(id).children {
                if doomed.contains(&child) {
                    continue;
                }
                let orphaned = self
                    .get(child)
                    .parents
                    .iter()
                    .all(|(p, _)| *p == child || doomed.contains(p));
                if orphaned {
                    doomed.insert(child);
                    stack.push(child);
                }
            }
        }

        let mut uncovered = BTreeSet::new();
        let mut frontier = BTreeSet::new();
        for &id in &doomed {
            let node = self.get(id);
            uncovered.extend(node.covering.iter().filter(|c| !doomed.contains(c)));
            frontier.extend(node.parents.iter().map(|&(p, _)| p).filter(|p| !doomed.contains(p)));
        }

        for &id in &doomed {
            let node = match self.nodes[id.index()].take() {
                Some(node) => node,
                None => continue,
            };
            self.live -= 1;
            for &(parent, _) in &node.parents {
                if let Some(Some(p)) = self.nodes.get_mut(parent.index()) {
                    p.children.retain(|&c| c != id);
                }
            }
            for &child in &node.children {
                if let Some(Some(c)) = self.nodes.get_mut(child.index()) {
                    c.parents.retain(|&(p, _)| p != id);
                }
            }
            for &coverer in &node.covered_by {
                if let Some(Some(c)) = self.nodes.get_mut(coverer.index()) {
                    c.covering.retain(|&n| n != id);
                }
            }
        }

        for &id in &uncovered {
            let coverers = std::mem::take(&mut self.get_mut(id).covered_by);
            for coverer in coverers {
                if let Some(Some(c)) = self.nodes.get_mut(coverer.index()) {
                    c.covering.retain(|&n| n != id);
                }
            }
        }

        if self.root.is_some_and(|r| doomed.contains(&r)) {
            self.root = None;
        }

        Ok(Removal {
            removed: doomed.into_iter().collect(),
            uncovered: uncovered.into_iter().collect(),
            frontier: frontier.into_iter().collect(),
        })
    }

    /// Drops all nodes. Ids of dropped nodes stay retired.
    pub fn clear(&mut self) {
        self.nodes.iter_mut().for_each(|slot| *slot = None);
        self.root = None;
        self.live = 0;
    }

    /// Checks the structural invariants, describing the first violation found.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        for node in self.nodes() {
            let id = node.id;
            if Some(id) != self.root && node.parents.iter().all(|&(p, _)| p == id) {
                return Err(format!("Node {} has no parent", id));
            }
            if node.is_covered() && !node.children.is_empty() {
                return Err(format!("Covered node {} has children", id));
            }
            for &(parent, _) in &node.parents {
                match self.node(parent) {
                    Some(p) if p.children.contains(&id) => {}
                    Some(_) => return Err(format!("Parent {} does not list {} as child", parent, id)),
                    None => return Err(format!("Node {} has removed parent {}", id, parent)),
                }
            }
            for &child in &node.children {
                match self.node(child) {
                    Some(c) if c.parents.iter().any(|&(p, _)| p == id) => {}
                    Some(_) => return Err(format!("Child {} does not list {} as parent", child, id)),
                    None => return Err(format!("Node {} has removed child {}", id, child)),
                }
            }
            for &coverer in &node.covered_by {
                match self.node(coverer) {
                    Some(c) if c.covering.contains(&id) => {}
                    Some(_) => return Err(format!("Coverer {} does not list {}", coverer, id)),
                    None => return Err(format!("Node {} is covered by removed node {}", id, coverer)),
                }
            }
        }
        if let Some(cycle) = self.find_cycle() {
            return Err(format!("Cycle through node {}", cycle));
        }
        Ok(())
    }

    /// Finds a node on a cycle longer than a self-loop, if any.
    fn find_cycle(&self) -> Option<NodeId> {
        #[derive(Copy, Clone, Eq, PartialEq)]
        enum Mark {
            White,
            Grey,
            Black,
        }

        let mut marks = vec![Mark::White; self.nodes.len()];
        for start in self.nodes() {
            if marks[start.id.index()] != Mark::White {
                continue;
            }
            // (node, index of the next child to visit)
            let mut stack = vec![(start.id, 0usize)];
            marks[start.id.index()] = Mark::Grey;
            while let Some(&mut (id, ref mut next)) = stack.last_mut() {
                let children = &self.get(id).children;
                if *next < children.len() {
                    let child = children[*next];
                    *next += 1;
                    if child == id {
                        continue;
                    }
                    match marks[child.index()] {
                        Mark::Grey => return Some(child),
                        Mark::White => {
                            marks[child.index()] = Mark::Grey;
                            stack.push((child, 0));
                        }
                        Mark::Black => {}
                    }
                } else {
                    marks[id.index()] = Mark::Black;
                    stack.pop();
                }
            }
        }
        None
    }
}
