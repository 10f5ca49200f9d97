//! Precision adjustment and precision increments.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::cfa::LocationId;
use crate::cpa::AbstractState;
use crate::error::Result;
use crate::expr::Cond;

/// Whether the algorithm keeps exploring after a state was adjusted.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Action {
    Continue,
    /// Interrupt exploration: the state is a target (or otherwise interesting).
    Break,
}

/// Result of a precision adjustment.
#[derive(Debug, Clone, PartialEq)]
pub struct Adjustment<S, P> {
    pub state: S,
    pub precision: P,
    pub action: Action,
}

/// What the algorithm knows about the surroundings of the adjusted state.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct AdjustmentContext {
    /// Location of the adjusted state.
    pub location: Option<LocationId>,
    /// Number of states in the reached set.
    pub reached_size: usize,
    /// Number of reached states at `location`.
    pub reached_at_location: usize,
}

/// Hook run on every successor before merge and stop.
pub trait PrecisionAdjustment<S, P> {
    fn adjust(&self, state: &S, precision: &P, context: &AdjustmentContext) -> Result<Adjustment<S, P>>;
}

/// Keeps state and precision, signals `Break` on target states.
#[derive(Debug, Copy, Clone, Default)]
pub struct StaticPrecisionAdjustment;

impl<S: AbstractState, P: Clone> PrecisionAdjustment<S, P> for StaticPrecisionAdjustment {
    fn adjust(&self, state: &S, precision: &P, _context: &AdjustmentContext) -> Result<Adjustment<S, P>> {
        let action = if state.is_target() { Action::Break } else { Action::Continue };
        Ok(Adjustment {
            state: state.clone(),
            precision: precision.clone(),
            action,
        })
    }
}

/// Facts to add to a precision, grouped by program location.
///
/// Produced by refinement from the interpolants of an infeasible path.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct PrecisionIncrement {
    facts: BTreeMap<LocationId, BTreeSet<Cond>>,
}

impl PrecisionIncrement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `fact` at `location`. Returns `false` if it was already present.
    pub fn add(&mut self, location: LocationId, fact: Cond) -> bool {
        self.facts.entry(location).or_default().insert(fact)
    }

    /// Adds every fact of `other`. Returns the number of new facts.
    pub fn extend(&mut self, other: &PrecisionIncrement) -> usize {
        let mut added = 0;
        for (&location, facts) in &other.facts {
            for fact in facts {
                if self.add(location, fact.clone()) {
                    added += 1;
                }
            }
        }
        added
    }

    pub fn contains(&self, location: LocationId, fact: &Cond) -> bool {
        self.facts.get(&location).is_some_and(|facts| facts.contains(fact))
    }

    /// Facts recorded at `location`.
    pub fn facts_at(&self, location: LocationId) -> impl Iterator<Item = &Cond> {
        self.facts.get(&location).into_iter().flatten()
    }

    /// Variables mentioned by the facts at `location`.
    pub fn variables_at(&self, location: LocationId) -> BTreeSet<String> {
        let mut vars = BTreeSet::new();
        for fact in self.facts_at(location) {
            fact.variables(&mut vars);
        }
        vars
    }

    pub fn locations(&self) -> impl Iterator<Item = LocationId> + '_ {
        self.facts.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (LocationId, &Cond)> {
        self.facts
            .iter()
            .flat_map(|(&location, facts)| facts.iter().map(move |fact| (location, fact)))
    }

    /// Total number of facts.
    pub fn len(&self) -> usize {
        self.facts.values().map(|facts| facts.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.values().all(|facts| facts.is_empty())
    }
}

impl fmt::Display for PrecisionIncrement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (location, fact)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", location, fact)?;
        }
        write!(f, "}}")
    }
}
