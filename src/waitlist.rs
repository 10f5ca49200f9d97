//! Waitlists: the frontier of states still to be expanded.
//!
//! Every implementation tracks membership, so a node is never queued twice
//! and can be removed when its ARG subtree is pruned.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;

use crate::arg::NodeId;
use crate::cfa::{reverse_postorder, LocationId, ProgramGraph};
use crate::error::{CpaError, Result};

/// Frontier of ARG nodes awaiting expansion.
pub trait Waitlist<S> {
    /// Queues `node`. Returns `false` if it is already queued.
    fn add(&mut self, node: NodeId, state: &S, location: LocationId) -> bool;

    /// Removes and returns the next node to expand.
    fn pop(&mut self) -> Option<NodeId>;

    /// Removes `node` if it is queued. Returns whether it was.
    fn remove(&mut self, node: NodeId) -> bool;

    fn contains(&self, node: NodeId) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queued nodes, in no particular order.
    fn nodes(&self) -> Vec<NodeId>;

    fn clear(&mut self);
}

/// Traversal order of a [`SimpleWaitlist`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Traversal {
    Lifo,
    Fifo,
}

/// Stack- or queue-ordered waitlist.
#[derive(Debug, Clone)]
pub struct SimpleWaitlist {
    traversal: Traversal,
    queue: VecDeque<NodeId>,
    members: HashSet<NodeId>,
}

impl SimpleWaitlist {
    /// Depth-first: the most recently added node is expanded first.
    pub fn dfs() -> Self {
        Self::with_traversal(Traversal::Lifo)
    }

    /// Breadth-first: the oldest node is expanded first.
    pub fn bfs() -> Self {
        Self::with_traversal(Traversal::Fifo)
    }

    fn with_traversal(traversal: Traversal) -> Self {
        Self {
            traversal,
            queue: VecDeque::new(),
            members: HashSet::new(),
        }
    }
}

impl<S> Waitlist<S> for SimpleWaitlist {
    fn add(&mut self, node: NodeId, _state: &S, _location: LocationId) -> bool {
        if !self.members.insert(node) {
            return false;
        }
        self.queue.push_back(node);
        true
    }

    fn pop(&mut self) -> Option<NodeId> {
        let node = match self.traversal {
            Traversal::Lifo => self.queue.pop_back(),
            Traversal::Fifo => self.queue.pop_front(),
        }?;
        self.members.remove(&node);
        Some(node)
    }

    fn remove(&mut self, node: NodeId) -> bool {
        if !self.members.remove(&node) {
            return false;
        }
        self.queue.retain(|&n| n != node);
        true
    }

    fn contains(&self, node: NodeId) -> bool {
        self.members.contains(&node)
    }

    fn len(&self) -> usize {
        self.queue.len()
    }

    fn nodes(&self) -> Vec<NodeId> {
        self.queue.iter().copied().collect()
    }

    fn clear(&mut self) {
        self.queue.clear();
        self.members.clear();
    }
}

/// Expands nodes in reverse postorder of their locations.
///
/// Nodes at locations closer to the entry (in topological order) come first;
/// nodes at the same location are expanded in insertion order. Locations
/// without a rank are expanded last.
#[derive(Debug, Clone)]
pub struct TopologicalWaitlist {
    ranks: HashMap<LocationId, usize>,
    buckets: BTreeMap<usize, VecDeque<NodeId>>,
    members: HashMap<NodeId, usize>,
}

impl TopologicalWaitlist {
    pub fn new(ranks: HashMap<LocationId, usize>) -> Self {
        Self {
            ranks,
            buckets: BTreeMap::new(),
            members: HashMap::new(),
        }
    }

    /// Ranks locations by [`reverse_postorder`] of `graph`.
    pub fn for_graph(graph: &dyn ProgramGraph) -> Result<Self> {
        Ok(Self::new(reverse_postorder(graph)?))
    }
}

impl<S> Waitlist<S> for TopologicalWaitlist {
    fn add(&mut self, node: NodeId, _state: &S, location: LocationId) -> bool {
        if self.members.contains_key(&node) {
            return false;
        }
        let rank = self.ranks.get(&location).copied().unwrap_or(usize::MAX);
        self.members.insert(node, rank);
        self.buckets.entry(rank).or_default().push_back(node);
        true
    }

    fn pop(&mut self) -> Option<NodeId> {
        let mut entry = self.buckets.first_entry()?;
        let node = entry.get_mut().pop_front();
        if entry.get().is_empty() {
            entry.remove();
        }
        let node = node?;
        self.members.remove(&node);
        Some(node)
    }

    fn remove(&mut self, node: NodeId) -> bool {
        let Some(rank) = self.members.remove(&node) else {
            return false;
        };
        if let Some(bucket) = self.buckets.get_mut(&rank) {
            bucket.retain(|&n| n != node);
            if bucket.is_empty() {
                self.buckets.remove(&rank);
            }
        }
        true
    }

    fn contains(&self, node: NodeId) -> bool {
        self.members.contains_key(&node)
    }

    fn len(&self) -> usize {
        self.members.len()
    }

    fn nodes(&self) -> Vec<NodeId> {
        self.buckets.values().flatten().copied().collect()
    }

    fn clear(&mut self) {
        self.buckets.clear();
        self.members.clear();
    }
}

/// Expands the node with the highest priority first.
///
/// Ties are broken by insertion order (oldest first).
pub struct PriorityWaitlist<S> {
    priority: Box<dyn Fn(&S) -> i64>,
    heap: BinaryHeap<(i64, Reverse<u64>, NodeId)>,
    // Sequence number of the live heap entry of each member.
    members: HashMap<NodeId, u64>,
    next_seq: u64,
}

impl<S> PriorityWaitlist<S> {
    pub fn new(priority: impl Fn(&S) -> i64 + 'static) -> Self {
        Self {
            priority: Box::new(priority),
            heap: BinaryHeap::new(),
            members: HashMap::new(),
            next_seq: 0,
        }
    }
}

impl<S> fmt::Debug for PriorityWaitlist<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriorityWaitlist").field("len", &self.members.len()).finish()
    }
}

impl<S> Waitlist<S> for PriorityWaitlist<S> {
    fn add(&mut self, node: NodeId, state: &S, _location: LocationId) -> bool {
        if self.members.contains_key(&node) {
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.members.insert(node, seq);
        self.heap.push(((self.priority)(state), Reverse(seq), node));
        true
    }

    fn pop(&mut self) -> Option<NodeId> {
        // Entries of removed nodes are dropped lazily.
        while let Some((_, Reverse(seq), node)) = self.heap.pop() {
            if self.members.get(&node) == Some(&seq) {
                self.members.remove(&node);
                return Some(node);
            }
        }
        None
    }

    fn remove(&mut self, node: NodeId) -> bool {
        self.members.remove(&node).is_some()
    }

    fn contains(&self, node: NodeId) -> bool {
        self.members.contains_key(&node)
    }

    fn len(&self) -> usize {
        self.members.len()
    }

    fn nodes(&self) -> Vec<NodeId> {
        self.members.keys().copied().collect()
    }

    fn clear(&mut self) {
        self.heap.clear();
        self.members.clear();
    }
}

/// Built-in waitlist orderings, selectable by name.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub enum WaitlistOrder {
    #[default]
    Dfs,
    Bfs,
    /// Reverse postorder of the locations in the program graph.
    Topological,
}

impl WaitlistOrder {
    pub fn build<S: 'static>(self, graph: &dyn ProgramGraph) -> Result<Box<dyn Waitlist<S>>> {
        Ok(match self {
            WaitlistOrder::Dfs => Box::new(SimpleWaitlist::dfs()),
            WaitlistOrder::Bfs => Box::new(SimpleWaitlist::bfs()),
            WaitlistOrder::Topological => Box::new(TopologicalWaitlist::for_graph(graph)?),
        })
    }
}

impl fmt::Display for WaitlistOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WaitlistOrder::Dfs => "dfs",
            WaitlistOrder::Bfs => "bfs",
            WaitlistOrder::Topological => "topological",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for WaitlistOrder {
    type Err = CpaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dfs" => Ok(WaitlistOrder::Dfs),
            "bfs" => Ok(WaitlistOrder::Bfs),
            "topological" | "rpo" => Ok(WaitlistOrder::Topological),
            other => Err(CpaError::InvalidConfiguration(format!("unknown waitlist order '{}'", other))),
        }
    }
}
