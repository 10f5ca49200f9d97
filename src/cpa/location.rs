//! Location analysis: tracks the program counter and flags target locations.

use std::collections::BTreeSet;
use std::fmt;

use crate::cfa::{Edge, LocationId};
use crate::cpa::{
    AbstractDomain, AbstractState, ConfigurableProgramAnalysis, MergeOperator, MergeSep, PrecisionAdjustment,
    StaticPrecisionAdjustment, StopOperator, StopSep, TransferRelation,
};
use crate::error::Result;

/// Element of the flat location lattice.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum LocationState {
    At { location: LocationId, target: bool },
    /// Any location. Only produced by joining states at different locations.
    Top,
}

impl LocationState {
    pub fn at(location: LocationId) -> Self {
        LocationState::At { location, target: false }
    }
}

impl AbstractState for LocationState {
    fn location(&self) -> Option<LocationId> {
        match self {
            LocationState::At { location, .. } => Some(*location),
            LocationState::Top => None,
        }
    }

    fn is_target(&self) -> bool {
        matches!(self, LocationState::At { target: true, .. })
    }
}

impl fmt::Display for LocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationState::At { location, target: false } => write!(f, "{}", location),
            LocationState::At { location, target: true } => write!(f, "{} (target)", location),
            LocationState::Top => write!(f, "⊤"),
        }
    }
}

/// Flat lattice over locations.
#[derive(Debug, Copy, Clone, Default)]
pub struct LocationDomain;

impl AbstractDomain<LocationState> for LocationDomain {
    fn join(&self, a: &LocationState, b: &LocationState) -> LocationState {
        if a == b {
            *a
        } else {
            LocationState::Top
        }
    }

    fn is_less_or_equal(&self, a: &LocationState, b: &LocationState) -> bool {
        a == b || *b == LocationState::Top
    }
}

/// Location CPA.
///
/// States at one of the configured target locations are target states, so
/// the default precision adjustment interrupts exploration there.
#[derive(Debug, Clone, Default)]
pub struct LocationCpa {
    targets: BTreeSet<LocationId>,
}

impl LocationCpa {
    pub fn new(targets: impl IntoIterator<Item = LocationId>) -> Self {
        Self {
            targets: targets.into_iter().collect(),
        }
    }

    pub fn targets(&self) -> &BTreeSet<LocationId> {
        &self.targets
    }

    fn state_at(&self, location: LocationId) -> LocationState {
        LocationState::At {
            location,
            target: self.targets.contains(&location),
        }
    }
}

impl TransferRelation<LocationState, ()> for LocationCpa {
    fn successors(&self, state: &LocationState, _precision: &(), edge: &Edge) -> Result<Vec<LocationState>> {
        match state {
            LocationState::At { location, .. } if *location != edge.from => Ok(Vec::new()),
            _ => Ok(vec![self.state_at(edge.to)]),
        }
    }
}

impl ConfigurableProgramAnalysis for LocationCpa {
    type State = LocationState;
    type Precision = ();

    fn domain(&self) -> &dyn AbstractDomain<LocationState> {
        &LocationDomain
    }

    fn transfer_relation(&self) -> &dyn TransferRelation<LocationState, ()> {
        self
    }

    fn merge_operator(&self) -> &dyn MergeOperator<LocationState, ()> {
        &MergeSep
    }

    fn stop_operator(&self) -> &dyn StopOperator<LocationState, ()> {
        &StopSep
    }

    fn precision_adjustment(&self) -> &dyn PrecisionAdjustment<LocationState, ()> {
        &StaticPrecisionAdjustment
    }

    fn initial_state(&self, entry: LocationId) -> LocationState {
        self.state_at(entry)
    }

    fn initial_precision(&self, _entry: LocationId) {}
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::cfa::{CfaBuilder, EdgeEffect, ProgramGraph};

    #[test]
    fn test_transfer_follows_edge() {
        let mut b = CfaBuilder::new();
        let l0 = b.add_location("main");
        let l1 = b.add_location("main");
        let l2 = b.add_location("main");
        b.add_edge(l0, l1, EdgeEffect::Nop);
        b.add_edge(l1, l2, EdgeEffect::Nop);
        let cfa = b.build(l0).unwrap();

        let cpa = LocationCpa::new([l2]);
        let s0 = cpa.initial_state(l0);
        assert_eq!(s0.location(), Some(l0));
        assert!(!s0.is_target());

        let e01 = &cfa.outgoing_edges(l0).unwrap()[0];
        let e12 = &cfa.outgoing_edges(l1).unwrap()[0];
        let s1 = cpa.successors(&s0, &(), e01).unwrap();
        assert_eq!(s1, vec![LocationState::at(l1)]);
        // Edge does not start at the state's location.
        assert!(cpa.successors(&s0, &(), e12).unwrap().is_empty());

        let s2 = cpa.successors(&s1[0], &(), e12).unwrap();
        assert!(s2[0].is_target());
    }

    #[test]
    fn test_flat_lattice() {
        let a = LocationState::at(LocationId::new(0));
        let b = LocationState::at(LocationId::new(1));
        let d = LocationDomain;
        assert!(d.is_less_or_equal(&a, &a));
        assert!(!d.is_less_or_equal(&a, &b));
        let top = d.join(&a, &b);
        assert_eq!(top, LocationState::Top);
        assert!(d.is_less_or_equal(&a, &top));
        assert!(!d.is_less_or_equal(&top, &a));
        assert_eq!(top.location(), None);
    }
}
