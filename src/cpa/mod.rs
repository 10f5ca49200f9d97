//! Configurable program analyses.
//!
//! A CPA bundles an abstract domain with the operators the reachability
//! algorithm needs:
//!
//! - [`AbstractDomain`]: partial order (`⊑`) and join (`⊔`) on states,
//! - [`TransferRelation`]: abstract successors along a CFA edge,
//! - [`MergeOperator`]: whether and how a new state is combined with a reached one,
//! - [`StopOperator`]: whether a new state is covered by the reached set,
//! - [`PrecisionAdjustment`]: per-state precision handling and the CONTINUE/BREAK signal.
//!
//! Domain authors implement [`ConfigurableProgramAnalysis`] with concrete
//! state and precision types. Several CPAs are combined with
//! [`CompositeCpa`][composite::CompositeCpa], which erases the component types.
//!
//! # Lattice Contract
//!
//! Every domain must satisfy, for all states `a`, `b`, `c`:
//! - Reflexivity: `a ⊑ a`
//! - Transitivity: `a ⊑ b ∧ b ⊑ c ⇒ a ⊑ c`
//! - Join is an upper bound: `a ⊑ a ⊔ b` and `b ⊑ a ⊔ b`
//!
//! The engine does not check these laws; the property tests do.

use std::any::Any;
use std::fmt::Debug;

use crate::cfa::{Edge, LocationId};
use crate::error::Result;

pub mod composite;
pub mod location;
pub mod merge;
pub mod precision;
pub mod sign;
pub mod stop;

pub use self::merge::{MergeJoin, MergeOperator, MergeSep};
pub use self::precision::{Action, Adjustment, AdjustmentContext, PrecisionAdjustment, PrecisionIncrement, StaticPrecisionAdjustment};
pub use self::stop::{Coverage, StopAlways, StopJoin, StopNever, StopOperator, StopSep};

/// Element of an abstract domain.
///
/// Equality is the domain's structural equality; the order lives in the
/// [`AbstractDomain`].
pub trait AbstractState: Clone + Debug + PartialEq + 'static {
    /// Program location this state belongs to, if the state tracks one.
    fn location(&self) -> Option<LocationId> {
        None
    }

    /// Whether the state violates the property under analysis.
    fn is_target(&self) -> bool {
        false
    }
}

/// Immutable description of what an analysis tracks.
///
/// Refinement never mutates a precision; it produces a new value.
pub trait Precision: Clone + Debug + PartialEq + 'static {}

impl Precision for () {}

/// Partial order and join over abstract states.
pub trait AbstractDomain<S> {
    /// Least upper bound (or some upper bound) of `a` and `b`.
    fn join(&self, a: &S, b: &S) -> S;

    /// `a ⊑ b`: every concrete state represented by `a` is represented by `b`.
    fn is_less_or_equal(&self, a: &S, b: &S) -> bool;
}

/// Abstract post operator.
pub trait TransferRelation<S, P> {
    /// Abstract successors of `state` along `edge`.
    ///
    /// An infeasible edge yields an empty vector; that is not an error.
    fn successors(&self, state: &S, precision: &P, edge: &Edge) -> Result<Vec<S>>;

    /// Refines a freshly computed state using the other members of its composite tuple.
    ///
    /// `siblings` holds every component state of the tuple (including
    /// `state` itself) before any strengthening; components downcast the
    /// sibling types they understand. Returns `None` to keep `state`,
    /// `Some(vec![])` to drop the whole tuple, or the replacement states.
    fn strengthen(&self, state: &S, siblings: &[&dyn Any], edge: &Edge, precision: &P) -> Result<Option<Vec<S>>> {
        let _ = (state, siblings, edge, precision);
        Ok(None)
    }
}

/// A configurable program analysis.
pub trait ConfigurableProgramAnalysis {
    type State: AbstractState;
    type Precision: Precision;

    fn domain(&self) -> &dyn AbstractDomain<Self::State>;

    fn transfer_relation(&self) -> &dyn TransferRelation<Self::State, Self::Precision>;

    fn merge_operator(&self) -> &dyn MergeOperator<Self::State, Self::Precision>;

    fn stop_operator(&self) -> &dyn StopOperator<Self::State, Self::Precision>;

    fn precision_adjustment(&self) -> &dyn PrecisionAdjustment<Self::State, Self::Precision>;

    /// The state the analysis starts from at `entry`.
    fn initial_state(&self, entry: LocationId) -> Self::State;

    fn initial_precision(&self, entry: LocationId) -> Self::Precision;

    /// Extends `precision` with the facts of `increment`.
    ///
    /// The result must track at least everything `precision` tracks.
    /// Analyses without a refinable precision keep the default, which
    /// returns the precision unchanged.
    fn refine_precision(&self, precision: &Self::Precision, increment: &PrecisionIncrement) -> Self::Precision {
        let _ = increment;
        precision.clone()
    }

    /// Whether refining `precision` with `increment` changes how states at
    /// `location` are abstracted.
    ///
    /// The default compares whole precisions, so any change counts for
    /// every location. Analyses with per-location precisions override it.
    fn refines_at(&self, precision: &Self::Precision, increment: &PrecisionIncrement, location: LocationId) -> bool {
        let _ = location;
        self.refine_precision(precision, increment) != *precision
    }
}
