//! Program graph (control-flow automaton) consumed by the engine.
//!
//! The engine only needs read access to an immutable graph of locations and
//! edges, expressed by the [`ProgramGraph`] trait. Front-ends that build the
//! graph from source text live outside this crate; [`Cfa`] together with
//! [`CfaBuilder`] is a plain in-memory implementation used by tests and demos.
//!
//! # Example
//!
//! ```
//! use cpa_rs::cfa::{CfaBuilder, EdgeEffect, ProgramGraph};
//! use cpa_rs::expr::Expr;
//!
//! let mut builder = CfaBuilder::new();
//! let entry = builder.add_location("main");
//! let exit = builder.add_location("main");
//! builder.add_edge(entry, exit, EdgeEffect::Assume(Expr::var("x").gt(Expr::constant(0))));
//! let cfa = builder.build(entry).unwrap();
//!
//! assert_eq!(cfa.entry_location(), entry);
//! assert_eq!(cfa.outgoing_edges(entry).unwrap().len(), 1);
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::error::{CpaError, Result};
use crate::expr::{Cond, Expr};

/// Stable numeric identifier of a program location.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct LocationId(u32);

impl LocationId {
    pub const fn new(id: u32) -> Self {
        LocationId(id)
    }

    pub const fn id(self) -> u32 {
        self.0
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N{}", self.0)
    }
}

/// Stable numeric identifier of an edge.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct EdgeId(u32);

impl EdgeId {
    pub const fn new(id: u32) -> Self {
        EdgeId(id)
    }

    pub const fn id(self) -> u32 {
        self.0
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{}", self.0)
    }
}

/// Program location: a node of the program graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    pub id: LocationId,
    /// Name of the function this location belongs to.
    pub function: String,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.function)
    }
}

/// Position of an edge in the analyzed source text.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SourcePosition {
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Semantic effect of an edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EdgeEffect {
    /// `var := expr`
    Assign { var: String, expr: Expr },
    /// Branch guard: the edge is only taken if the condition holds.
    Assume(Cond),
    /// Call into `function`, binding each parameter to an argument.
    Call { function: String, bindings: Vec<(String, Expr)> },
    /// Return from `function`, optionally assigning the returned value.
    Return { function: String, result: Option<(String, Expr)> },
    /// Blank edge without effect.
    Nop,
}

impl fmt::Display for EdgeEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeEffect::Assign { var, expr } => write!(f, "{} := {}", var, expr),
            EdgeEffect::Assume(cond) => write!(f, "[{}]", cond),
            EdgeEffect::Call { function, bindings } => {
                write!(f, "call {}(", function)?;
                for (i, (param, arg)) in bindings.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} = {}", param, arg)?;
                }
                write!(f, ")")
            }
            EdgeEffect::Return { function, result } => match result {
                Some((var, expr)) => write!(f, "{} := return {} from {}", var, expr, function),
                None => write!(f, "return from {}", function),
            },
            EdgeEffect::Nop => write!(f, "skip"),
        }
    }
}

/// Directed edge between two locations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge {
    pub id: EdgeId,
    pub from: LocationId,
    pub to: LocationId,
    pub effect: EdgeEffect,
    pub position: SourcePosition,
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -{{{}}}-> {}", self.from, self.effect, self.to)
    }
}

/// Read-only view of a program graph.
pub trait ProgramGraph {
    /// All locations of the graph, in id order.
    fn locations(&self) -> Box<dyn Iterator<Item = &Location> + '_>;

    /// Looks up a location by id.
    fn location(&self, id: LocationId) -> Option<&Location>;

    /// Edges leaving `location`, in insertion order.
    fn outgoing_edges(&self, location: LocationId) -> Result<&[Edge]>;

    /// The location where program execution starts.
    fn entry_location(&self) -> LocationId;
}

/// In-memory control-flow automaton.
#[derive(Debug, Clone)]
pub struct Cfa {
    locations: Vec<Location>,
    outgoing: Vec<Vec<Edge>>,
    entry: LocationId,
    num_edges: usize,
}

impl Cfa {
    pub fn num_locations(&self) -> usize {
        self.locations.len()
    }

    pub fn num_edges(&self) -> usize {
        self.num_edges
    }

    /// Looks up an edge by id.
    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.outgoing.iter().flatten().find(|e| e.id == id)
    }
}

impl ProgramGraph for Cfa {
    fn locations(&self) -> Box<dyn Iterator<Item = &Location> + '_> {
        Box::new(self.locations.iter())
    }

    fn location(&self, id: LocationId) -> Option<&Location> {
        self.locations.get(id.index())
    }

    fn outgoing_edges(&self, location: LocationId) -> Result<&[Edge]> {
        self.outgoing
            .get(location.index())
            .map(|edges| edges.as_slice())
            .ok_or(CpaError::UnknownLocation(location))
    }

    fn entry_location(&self) -> LocationId {
        self.entry
    }
}

/// Incremental constructor for [`Cfa`].
#[derive(Debug, Default)]
pub struct CfaBuilder {
    locations: Vec<Location>,
    outgoing: Vec<Vec<Edge>>,
    next_edge: u32,
    line: u32,
}

impl CfaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_location(&mut self, function: impl Into<String>) -> LocationId {
        let id = LocationId::new(self.locations.len() as u32);
        self.locations.push(Location {
            id,
            function: function.into(),
        });
        self.outgoing.push(Vec::new());
        id
    }

    /// Adds an edge; its source position defaults to the next line number.
    pub fn add_edge(&mut self, from: LocationId, to: LocationId, effect: EdgeEffect) -> EdgeId {
        self.line += 1;
        let position = SourcePosition {
            line: self.line,
            column: 1,
        };
        self.add_edge_at(from, to, effect, position)
    }

    pub fn add_edge_at(
        &mut self,
        from: LocationId,
        to: LocationId,
        effect: EdgeEffect,
        position: SourcePosition,
    ) -> EdgeId {
        assert!(from.index() < self.locations.len(), "Unknown source location {}", from);
        assert!(to.index() < self.locations.len(), "Unknown target location {}", to);

        let id = EdgeId::new(self.next_edge);
        self.next_edge += 1;
        self.outgoing[from.index()].push(Edge {
            id,
            from,
            to,
            effect,
            position,
        });
        id
    }

    pub fn build(self, entry: LocationId) -> Result<Cfa> {
        if entry.index() >= self.locations.len() {
            return Err(CpaError::UnknownLocation(entry));
        }
        Ok(Cfa {
            locations: self.locations,
            outgoing: self.outgoing,
            entry,
            num_edges: self.next_edge as usize,
        })
    }
}

/// Computes the reverse-postorder rank of every location reachable from the entry.
///
/// Lower ranks come first in a topological traversal; back edges of loops are
/// the only edges going from a higher to a lower rank. Unreachable locations
/// get no rank.
pub fn reverse_postorder(graph: &dyn ProgramGraph) -> Result<HashMap<LocationId, usize>> {
    let entry = graph.entry_location();
    let mut postorder = Vec::new();
    let mut visited = HashSet::new();

    // Iterative DFS: (location, index of the next outgoing edge to explore).
    let mut stack = vec![(entry, 0usize)];
    visited.insert(entry);
    while let Some((loc, next)) = stack.pop() {
        let edges = graph.outgoing_edges(loc)?;
        if next < edges.len() {
            stack.push((loc, next + 1));
            let succ = edges[next].to;
            if visited.insert(succ) {
                stack.push((succ, 0));
            }
        } else {
            postorder.push(loc);
        }
    }

    let n = postorder.len();
    Ok(postorder
        .into_iter()
        .enumerate()
        .map(|(i, loc)| (loc, n - 1 - i))
        .collect())
}
