//! Reached set, partitioned by program location, and its coupling with the
//! ARG and the waitlist.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::arg::{Arg, NodeId};
use crate::cfa::{EdgeId, LocationId};
use crate::cpa::AbstractState;
use crate::error::{CpaError, Result};
use crate::waitlist::Waitlist;

/// Set of reached ARG nodes with their precisions.
///
/// Nodes are grouped by location, so merge and stop only look at states
/// sharing the location of the new state.
#[derive(Debug, Clone)]
pub struct ReachedSet<P> {
    partitions: BTreeMap<LocationId, BTreeSet<NodeId>>,
    locations: BTreeMap<NodeId, LocationId>,
    precisions: BTreeMap<NodeId, P>,
}

impl<P> Default for ReachedSet<P> {
    fn default() -> Self {
        Self {
            partitions: BTreeMap::new(),
            locations: BTreeMap::new(),
            precisions: BTreeMap::new(),
        }
    }
}

impl<P> ReachedSet<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `node`, or replaces its precision if already present.
    pub fn add(&mut self, node: NodeId, location: LocationId, precision: P) {
        if let Some(old) = self.locations.insert(node, location) {
            if old != location {
                self.remove_from_partition(node, old);
            }
        }
        self.partitions.entry(location).or_default().insert(node);
        self.precisions.insert(node, precision);
    }

    pub fn remove(&mut self, node: NodeId) -> bool {
        match self.locations.remove(&node) {
            Some(location) => {
                self.remove_from_partition(node, location);
                self.precisions.remove(&node);
                true
            }
            None => false,
        }
    }

    fn remove_from_partition(&mut self, node: NodeId, location: LocationId) {
        if let Some(partition) = self.partitions.get_mut(&location) {
            partition.remove(&node);
            if partition.is_empty() {
                self.partitions.remove(&location);
            }
        }
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.locations.contains_key(&node)
    }

    pub fn precision(&self, node: NodeId) -> Option<&P> {
        self.precisions.get(&node)
    }

    pub fn location(&self, node: NodeId) -> Option<LocationId> {
        self.locations.get(&node).copied()
    }

    /// Replaces the precision of a reached node. Returns `false` if the node
    /// is not reached.
    pub fn set_precision(&mut self, node: NodeId, precision: P) -> bool {
        match self.precisions.get_mut(&node) {
            Some(p) => {
                *p = precision;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// The oldest reached node.
    pub fn first(&self) -> Option<NodeId> {
        self.locations.keys().next().copied()
    }

    /// The most recently created reached node.
    pub fn last(&self) -> Option<NodeId> {
        self.locations.keys().next_back().copied()
    }

    /// Reached nodes at `location`, oldest first.
    pub fn at_location(&self, location: LocationId) -> impl Iterator<Item = NodeId> + '_ {
        self.partitions.get(&location).into_iter().flatten().copied()
    }

    pub fn count_at(&self, location: LocationId) -> usize {
        self.partitions.get(&location).map_or(0, |p| p.len())
    }

    /// Locations with at least one reached node.
    pub fn locations(&self) -> impl Iterator<Item = LocationId> + '_ {
        self.partitions.keys().copied()
    }

    /// All reached nodes, oldest first.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.locations.keys().copied()
    }

    pub fn clear(&mut self) {
        self.partitions.clear();
        self.locations.clear();
        self.precisions.clear();
    }
}

/// Reached set together with the ARG and the waitlist.
///
/// All three are only updated together, which keeps them consistent:
/// every waitlisted node is reached, every reached node is a live uncovered
/// ARG node, and covered ARG nodes are leaves outside the reached set.
pub struct ArgReachedSet<S, P> {
    arg: Arg<S>,
    reached: ReachedSet<P>,
    waitlist: Box<dyn Waitlist<S>>,
    initial: Option<(S, P)>,
}

impl<S: fmt::Debug, P: fmt::Debug> fmt::Debug for ArgReachedSet<S, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArgReachedSet")
            .field("arg", &self.arg.len())
            .field("reached", &self.reached.len())
            .field("waitlist", &self.waitlist.nodes())
            .finish()
    }
}

impl<S: AbstractState, P: Clone> ArgReachedSet<S, P> {
    pub fn new(waitlist: Box<dyn Waitlist<S>>) -> Self {
        Self {
            arg: Arg::new(),
            reached: ReachedSet::new(),
            waitlist,
            initial: None,
        }
    }

    pub fn arg(&self) -> &Arg<S> {
        &self.arg
    }

    pub fn reached(&self) -> &ReachedSet<P> {
        &self.reached
    }

    pub fn waitlist(&self) -> &dyn Waitlist<S> {
        self.waitlist.as_ref()
    }

    /// Number of reached states.
    pub fn len(&self) -> usize {
        self.reached.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reached.is_empty()
    }

    pub fn has_waiting(&self) -> bool {
        !self.waitlist.is_empty()
    }

    pub fn state(&self, node: NodeId) -> Option<&S> {
        self.arg.state(node)
    }

    pub fn precision(&self, node: NodeId) -> Option<&P> {
        self.reached.precision(node)
    }

    /// Initial state and precision the set was seeded with.
    pub fn initial(&self) -> Option<&(S, P)> {
        self.initial.as_ref()
    }

    fn location_of(state: &S) -> Result<LocationId> {
        state.location().ok_or(CpaError::MissingLocation)
    }

    fn enqueue(&mut self, node: NodeId) -> Result<()> {
        let n = self.arg.node(node).ok_or(CpaError::NodeNotFound(node))?;
        self.waitlist.add(node, n.state(), n.location());
        Ok(())
    }

    /// Creates the ARG root and puts it into the reached set and waitlist.
    ///
    /// A target root stays queued so that the algorithm reports it when popped.
    pub fn seed(&mut self, state: S, precision: P) -> Result<NodeId> {
        let location = Self::location_of(&state)?;
        self.initial = Some((state.clone(), precision.clone()));
        let target = state.is_target();
        let root = self.arg.add_root(state, location);
        if target {
            self.arg.mark_target(root);
        }
        self.reached.add(root, location, precision);
        self.enqueue(root)?;
        Ok(root)
    }

    /// Drops everything and seeds the set again.
    pub fn reset(&mut self, state: S, precision: P) -> Result<NodeId> {
        self.arg.clear();
        self.reached.clear();
        self.waitlist.clear();
        self.seed(state, precision)
    }

    pub fn pop(&mut self) -> Option<NodeId> {
        self.waitlist.pop()
    }

    /// Puts a reached node back into the waitlist, optionally with a new precision.
    pub fn readd(&mut self, node: NodeId, precision: Option<P>) -> Result<()> {
        if !self.reached.contains(node) {
            return Err(CpaError::NodeNotFound(node));
        }
        if let Some(precision) = precision {
            self.reached.set_precision(node, precision);
        }
        self.enqueue(node)
    }

    /// Adds a new successor of `parent` to the ARG, the reached set and the waitlist.
    pub fn add_successor(&mut self, parent: NodeId, edge: EdgeId, state: S, precision: P) -> Result<NodeId> {
        let location = Self::location_of(&state)?;
        let node = self.arg.add_child(parent, edge, state, location);
        self.reached.add(node, location, precision);
        self.enqueue(node)?;
        Ok(node)
    }

    /// Adds a target successor. It is reached but never expanded.
    pub fn add_target(&mut self, parent: NodeId, edge: EdgeId, state: S, precision: P) -> Result<NodeId> {
        let location = Self::location_of(&state)?;
        let node = self.arg.add_child(parent, edge, state, location);
        self.arg.mark_target(node);
        self.reached.add(node, location, precision);
        Ok(node)
    }

    /// Records a successor that is covered by existing reached nodes.
    ///
    /// The node only lives in the ARG.
    pub fn add_covered(&mut self, parent: NodeId, edge: EdgeId, state: S, covered_by: &[NodeId]) -> Result<NodeId> {
        let location = Self::location_of(&state)?;
        if let Some(&missing) = covered_by.iter().find(|&&n| !self.reached.contains(n)) {
            return Err(CpaError::NodeNotFound(missing));
        }
        let target = state.is_target();
        let node = self.arg.add_child(parent, edge, state, location);
        if target {
            self.arg.mark_target(node);
        }
        self.arg.cover(node, covered_by);
        Ok(node)
    }

    /// Replaces the state of a reached node with the result of merging a
    /// new successor of `parent` into it, and puts it back to the waitlist.
    ///
    /// `parent` becomes an additional parent of `node` unless that would
    /// close a cycle in the ARG.
    pub fn replace_merged(&mut self, node: NodeId, state: S, precision: P, parent: NodeId, edge: EdgeId) -> Result<()> {
        if !self.reached.contains(node) {
            return Err(CpaError::NodeNotFound(node));
        }
        debug_assert_eq!(state.location(), self.reached.location(node), "Merged state moved to another location");
        if state.is_target() {
            self.arg.mark_target(node);
        }
        self.arg.replace_state(node, state);
        self.arg.add_parent(node, parent, edge);
        self.reached.set_precision(node, precision);
        self.enqueue(node)
    }

    /// Removes `cut` and its orphaned descendants.
    ///
    /// The surviving parents of removed nodes are re-queued with their
    /// precision passed through `refine`, so the removed part gets rebuilt.
    /// Nodes that were covered by a removed node are added back to the
    /// reached set with the refined precision of their parent. Returns the
    /// removed nodes.
    pub fn remove_subtree(&mut self, cut: NodeId, refine: impl Fn(&P) -> P) -> Result<Vec<NodeId>> {
        self.remove_subtrees(&[cut], refine)
    }

    /// Like [`remove_subtree`][Self::remove_subtree], removing every node of
    /// `cuts` even if it is still reachable through another parent.
    pub fn remove_subtrees(&mut self, cuts: &[NodeId], refine: impl Fn(&P) -> P) -> Result<Vec<NodeId>> {
        let removal = self.arg.remove_subtrees(cuts)?;
        for &node in &removal.removed {
            self.reached.remove(node);
            self.waitlist.remove(node);
        }

        for &parent in &removal.frontier {
            let precision = self.reached.precision(parent).ok_or(CpaError::NodeNotFound(parent))?;
            let refined = refine(precision);
            self.reached.set_precision(parent, refined);
            self.enqueue(parent)?;
        }

        for &node in &removal.uncovered {
            let n = self.arg.node(node).ok_or(CpaError::NodeNotFound(node))?;
            let (parent, _) = n.first_parent().ok_or(CpaError::MalformedPath(node))?;
            let location = n.location();
            let precision = self.reached.precision(parent).ok_or(CpaError::NodeNotFound(parent))?;
            let refined = refine(precision);
            self.reached.add(node, location, refined);
            self.enqueue(node)?;
        }

        Ok(removal.removed)
    }

    /// Checks that ARG, reached set and waitlist agree.
    pub fn check_consistency(&self) -> std::result::Result<(), String> {
        self.arg.check_invariants()?;
        for node in self.waitlist.nodes() {
            if !self.reached.contains(node) {
                return Err(format!("Waitlisted node {} is not reached", node));
            }
        }
        for node in self.reached.nodes() {
            match self.arg.node(node) {
                None => return Err(format!("Reached node {} is not in the ARG", node)),
                Some(n) if n.is_covered() => return Err(format!("Reached node {} is covered", node)),
                Some(n) if Some(n.location()) != self.reached.location(node) => {
                    return Err(format!("Reached node {} is in the wrong partition", node));
                }
                Some(_) => {}
            }
        }
        for n in self.arg.nodes() {
            if !n.is_covered() && !self.reached.contains(n.id()) {
                return Err(format!("Uncovered ARG node {} is not reached", n.id()));
            }
        }
        Ok(())
    }
}
