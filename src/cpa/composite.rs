//! Composite analysis: several CPAs run in lockstep over tuple states.
//!
//! Component types are erased behind [`DynState`] and [`DynPrecision`], so a
//! [`CompositeCpa`] can hold any number of heterogeneous analyses. Operators
//! are computed componentwise:
//!
//! - order and join are pointwise,
//! - transfer takes the cross product of the component successor sets and
//!   then lets every component strengthen itself against its siblings,
//! - merge only happens if every component agrees to merge,
//! - a tuple is covered only by a single reached tuple that covers it in
//!   every component,
//! - precision adjustment breaks if any component breaks.

use std::any::{type_name, Any};
use std::fmt;
use std::rc::Rc;

use crate::cfa::{Edge, LocationId};
use crate::cpa::{
    AbstractDomain, AbstractState, Action, Adjustment, AdjustmentContext, ConfigurableProgramAnalysis, Coverage,
    MergeOperator, Precision, PrecisionAdjustment, PrecisionIncrement, StopOperator, TransferRelation,
};
use crate::error::Result;

/// Type-erased abstract state.
pub trait DynState: fmt::Debug {
    fn as_any(&self) -> &dyn Any;
    fn dyn_eq(&self, other: &dyn DynState) -> bool;
    fn dyn_location(&self) -> Option<LocationId>;
    fn dyn_is_target(&self) -> bool;
}

impl<S: AbstractState> DynState for S {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn DynState) -> bool {
        other.as_any().downcast_ref::<S>().is_some_and(|other| self == other)
    }

    fn dyn_location(&self) -> Option<LocationId> {
        self.location()
    }

    fn dyn_is_target(&self) -> bool {
        self.is_target()
    }
}

/// Type-erased precision.
pub trait DynPrecision: fmt::Debug {
    fn as_any(&self) -> &dyn Any;
    fn dyn_eq(&self, other: &dyn DynPrecision) -> bool;
}

impl<P: Precision> DynPrecision for P {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn DynPrecision) -> bool {
        other.as_any().downcast_ref::<P>().is_some_and(|other| self == other)
    }
}

/// Tuple of component states, one per component of the [`CompositeCpa`].
#[derive(Clone, Default)]
pub struct CompositeState {
    components: Vec<Rc<dyn DynState>>,
}

impl CompositeState {
    pub(crate) fn new(components: Vec<Rc<dyn DynState>>) -> Self {
        Self { components }
    }

    /// Appends a component, in the order the components of the CPA were added.
    pub fn with<T: AbstractState>(mut self, state: T) -> Self {
        self.components.push(Rc::new(state));
        self
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// The component at `index`, if it has type `T`.
    pub fn get<T: AbstractState>(&self, index: usize) -> Option<&T> {
        self.components.get(index)?.as_any().downcast_ref()
    }

    /// The first component of type `T`.
    pub fn find<T: AbstractState>(&self) -> Option<&T> {
        self.components.iter().find_map(|c| c.as_any().downcast_ref())
    }

    pub fn components(&self) -> impl Iterator<Item = &dyn DynState> {
        self.components.iter().map(|c| c.as_ref())
    }
}

impl PartialEq for CompositeState {
    fn eq(&self, other: &Self) -> bool {
        self.components.len() == other.components.len()
            && self
                .components
                .iter()
                .zip(&other.components)
                .all(|(a, b)| Rc::ptr_eq(a, b) || a.dyn_eq(b.as_ref()))
    }
}

impl fmt::Debug for CompositeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CompositeState").field(&self.components).finish()
    }
}

impl AbstractState for CompositeState {
    fn location(&self) -> Option<LocationId> {
        self.components.iter().find_map(|c| c.dyn_location())
    }

    fn is_target(&self) -> bool {
        self.components.iter().any(|c| c.dyn_is_target())
    }
}

/// Tuple of component precisions.
#[derive(Clone)]
pub struct CompositePrecision {
    components: Vec<Rc<dyn DynPrecision>>,
}

impl CompositePrecision {
    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn get<T: Precision>(&self, index: usize) -> Option<&T> {
        self.components.get(index)?.as_any().downcast_ref()
    }

    pub fn find<T: Precision>(&self) -> Option<&T> {
        self.components.iter().find_map(|c| c.as_any().downcast_ref())
    }
}

impl PartialEq for CompositePrecision {
    fn eq(&self, other: &Self) -> bool {
        self.components.len() == other.components.len()
            && self
                .components
                .iter()
                .zip(&other.components)
                .all(|(a, b)| Rc::ptr_eq(a, b) || a.dyn_eq(b.as_ref()))
    }
}

impl fmt::Debug for CompositePrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CompositePrecision").field(&self.components).finish()
    }
}

impl Precision for CompositePrecision {}

type Erased = Rc<dyn DynState>;
type ErasedPrecision = Rc<dyn DynPrecision>;

/// Object-safe view of a [`ConfigurableProgramAnalysis`].
trait ErasedCpa {
    fn name(&self) -> &'static str;
    fn join_dyn(&self, a: &dyn DynState, b: &dyn DynState) -> Erased;
    fn le_dyn(&self, a: &dyn DynState, b: &dyn DynState) -> bool;
    fn successors_dyn(&self, state: &dyn DynState, precision: &dyn DynPrecision, edge: &Edge) -> Result<Vec<Erased>>;
    fn strengthen_dyn(
        &self,
        state: &dyn DynState,
        siblings: &[&dyn Any],
        edge: &Edge,
        precision: &dyn DynPrecision,
    ) -> Result<Option<Vec<Erased>>>;
    fn merge_dyn(&self, new: &dyn DynState, reached: &dyn DynState, precision: &dyn DynPrecision) -> Option<Erased>;
    fn stop_dyn(&self, state: &dyn DynState, reached: &dyn DynState, precision: &dyn DynPrecision) -> bool;
    fn adjust_dyn(
        &self,
        state: &dyn DynState,
        precision: &dyn DynPrecision,
        context: &AdjustmentContext,
    ) -> Result<(Erased, ErasedPrecision, Action)>;
    fn initial_state_dyn(&self, entry: LocationId) -> Erased;
    fn initial_precision_dyn(&self, entry: LocationId) -> ErasedPrecision;
    fn refine_dyn(&self, precision: &dyn DynPrecision, increment: &PrecisionIncrement) -> ErasedPrecision;
    fn refines_at_dyn(&self, precision: &dyn DynPrecision, increment: &PrecisionIncrement, location: LocationId) -> bool;
}

/// Recovers the concrete type of a component value.
///
/// A mismatch means the composite handed a tuple member to the wrong
/// component, which is a bug in this module.
fn downcast<'a, T: 'static>(value: &'a dyn Any, component: &str) -> &'a T {
    match value.downcast_ref::<T>() {
        Some(v) => v,
        None => panic!("Component {} received a value that is not a {}", component, type_name::<T>()),
    }
}

impl<C: ConfigurableProgramAnalysis> ErasedCpa for C {
    fn name(&self) -> &'static str {
        type_name::<C>()
    }

    fn join_dyn(&self, a: &dyn DynState, b: &dyn DynState) -> Erased {
        let a = downcast::<C::State>(a.as_any(), self.name());
        let b = downcast::<C::State>(b.as_any(), self.name());
        Rc::new(self.domain().join(a, b))
    }

    fn le_dyn(&self, a: &dyn DynState, b: &dyn DynState) -> bool {
        let a = downcast::<C::State>(a.as_any(), self.name());
        let b = downcast::<C::State>(b.as_any(), self.name());
        self.domain().is_less_or_equal(a, b)
    }

    fn successors_dyn(&self, state: &dyn DynState, precision: &dyn DynPrecision, edge: &Edge) -> Result<Vec<Erased>> {
        let state = downcast::<C::State>(state.as_any(), self.name());
        let precision = downcast::<C::Precision>(precision.as_any(), self.name());
        let successors = self.transfer_relation().successors(state, precision, edge)?;
        Ok(successors.into_iter().map(|s| Rc::new(s) as Erased).collect())
    }

    fn strengthen_dyn(
        &self,
        state: &dyn DynState,
        siblings: &[&dyn Any],
        edge: &Edge,
        precision: &dyn DynPrecision,
    ) -> Result<Option<Vec<Erased>>> {
        let state = downcast::<C::State>(state.as_any(), self.name());
        let precision = downcast::<C::Precision>(precision.as_any(), self.name());
        let strengthened = self.transfer_relation().strengthen(state, siblings, edge, precision)?;
        Ok(strengthened.map(|states| states.into_iter().map(|s| Rc::new(s) as Erased).collect()))
    }

    fn merge_dyn(&self, new: &dyn DynState, reached: &dyn DynState, precision: &dyn DynPrecision) -> Option<Erased> {
        let new = downcast::<C::State>(new.as_any(), self.name());
        let reached = downcast::<C::State>(reached.as_any(), self.name());
        let precision = downcast::<C::Precision>(precision.as_any(), self.name());
        self.merge_operator()
            .merge(self.domain(), new, reached, precision)
            .map(|merged| Rc::new(merged) as Erased)
    }

    fn stop_dyn(&self, state: &dyn DynState, reached: &dyn DynState, precision: &dyn DynPrecision) -> bool {
        let state = downcast::<C::State>(state.as_any(), self.name());
        let reached = downcast::<C::State>(reached.as_any(), self.name());
        let precision = downcast::<C::Precision>(precision.as_any(), self.name());
        self.stop_operator()
            .stop(self.domain(), state, &[reached], precision)
            .is_some()
    }

    fn adjust_dyn(
        &self,
        state: &dyn DynState,
        precision: &dyn DynPrecision,
        context: &AdjustmentContext,
    ) -> Result<(Erased, ErasedPrecision, Action)> {
        let state = downcast::<C::State>(state.as_any(), self.name());
        let precision = downcast::<C::Precision>(precision.as_any(), self.name());
        let Adjustment {
            state,
            precision,
            action,
        } = self.precision_adjustment().adjust(state, precision, context)?;
        Ok((Rc::new(state) as Erased, Rc::new(precision) as ErasedPrecision, action))
    }

    fn initial_state_dyn(&self, entry: LocationId) -> Erased {
        Rc::new(ConfigurableProgramAnalysis::initial_state(self, entry))
    }

    fn initial_precision_dyn(&self, entry: LocationId) -> ErasedPrecision {
        Rc::new(ConfigurableProgramAnalysis::initial_precision(self, entry))
    }

    fn refine_dyn(&self, precision: &dyn DynPrecision, increment: &PrecisionIncrement) -> ErasedPrecision {
        let precision = downcast::<C::Precision>(precision.as_any(), self.name());
        Rc::new(ConfigurableProgramAnalysis::refine_precision(self, precision, increment))
    }

    fn refines_at_dyn(&self, precision: &dyn DynPrecision, increment: &PrecisionIncrement, location: LocationId) -> bool {
        let precision = downcast::<C::Precision>(precision.as_any(), self.name());
        ConfigurableProgramAnalysis::refines_at(self, precision, increment, location)
    }
}

/// All combinations picking one element of every choice list, in order.
fn cartesian<T: Clone>(choices: &[Vec<T>]) -> Vec<Vec<T>> {
    let mut tuples = vec![Vec::with_capacity(choices.len())];
    for options in choices {
        tuples = tuples
            .into_iter()
            .flat_map(|prefix| {
                options.iter().map(move |option| {
                    let mut tuple = prefix.clone();
                    tuple.push(option.clone());
                    tuple
                })
            })
            .collect();
    }
    tuples
}

/// Product of several analyses.
///
/// # Examples
///
/// ```
/// use cpa_rs::cfa::LocationId;
/// use cpa_rs::cpa::composite::CompositeCpa;
/// use cpa_rs::cpa::location::{LocationCpa, LocationState};
/// use cpa_rs::cpa::sign::{SignCpa, SignState};
/// use cpa_rs::cpa::{AbstractState, ConfigurableProgramAnalysis};
///
/// let entry = LocationId::new(0);
/// let cpa = CompositeCpa::new()
///     .with_component(LocationCpa::new([]))
///     .with_component(SignCpa::default());
///
/// let init = cpa.initial_state(entry);
/// assert_eq!(init.location(), Some(entry));
/// assert_eq!(init.find::<LocationState>(), Some(&LocationState::at(entry)));
/// assert!(init.find::<SignState>().unwrap().is_empty());
/// ```
#[derive(Default)]
pub struct CompositeCpa {
    components: Vec<Box<dyn ErasedCpa>>,
}

impl CompositeCpa {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a component analysis.
    pub fn with_component<C: ConfigurableProgramAnalysis + 'static>(mut self, cpa: C) -> Self {
        self.components.push(Box::new(cpa));
        self
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    fn check_arity(&self, len: usize) {
        assert_eq!(
            len,
            self.components.len(),
            "Composite tuple has {} components, analysis has {}",
            len,
            self.components.len()
        );
    }
}

impl fmt::Debug for CompositeCpa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.components.iter().map(|c| c.name())).finish()
    }
}

impl AbstractDomain<CompositeState> for CompositeCpa {
    fn join(&self, a: &CompositeState, b: &CompositeState) -> CompositeState {
        self.check_arity(a.len());
        self.check_arity(b.len());
        let components = self
            .components
            .iter()
            .zip(a.components.iter().zip(&b.components))
            .map(|(c, (x, y))| c.join_dyn(x.as_ref(), y.as_ref()))
            .collect();
        CompositeState::new(components)
    }

    fn is_less_or_equal(&self, a: &CompositeState, b: &CompositeState) -> bool {
        self.check_arity(a.len());
        self.check_arity(b.len());
        self.components
            .iter()
            .zip(a.components.iter().zip(&b.components))
            .all(|(c, (x, y))| c.le_dyn(x.as_ref(), y.as_ref()))
    }
}

impl TransferRelation<CompositeState, CompositePrecision> for CompositeCpa {
    fn successors(
        &self,
        state: &CompositeState,
        precision: &CompositePrecision,
        edge: &Edge,
    ) -> Result<Vec<CompositeState>> {
        self.check_arity(state.len());
        self.check_arity(precision.len());

        let mut per_component = Vec::with_capacity(self.components.len());
        for (i, c) in self.components.iter().enumerate() {
            let successors = c.successors_dyn(state.components[i].as_ref(), precision.components[i].as_ref(), edge)?;
            if successors.is_empty() {
                return Ok(Vec::new());
            }
            per_component.push(successors);
        }

        let mut result = Vec::new();
        'tuples: for tuple in cartesian(&per_component) {
            let siblings: Vec<&dyn Any> = tuple.iter().map(|s| s.as_any()).collect();
            let mut choices = Vec::with_capacity(tuple.len());
            for (i, c) in self.components.iter().enumerate() {
                match c.strengthen_dyn(tuple[i].as_ref(), &siblings, edge, precision.components[i].as_ref())? {
                    None => choices.push(vec![tuple[i].clone()]),
                    Some(states) if states.is_empty() => continue 'tuples,
                    Some(states) => choices.push(states),
                }
            }
            result.extend(cartesian(&choices).into_iter().map(CompositeState::new));
        }
        Ok(result)
    }
}

impl MergeOperator<CompositeState, CompositePrecision> for CompositeCpa {
    fn merge(
        &self,
        _domain: &dyn AbstractDomain<CompositeState>,
        new: &CompositeState,
        reached: &CompositeState,
        precision: &CompositePrecision,
    ) -> Option<CompositeState> {
        self.check_arity(new.len());
        self.check_arity(reached.len());

        let mut merged = Vec::with_capacity(self.components.len());
        let mut changed = false;
        for (i, c) in self.components.iter().enumerate() {
            let r = &reached.components[i];
            let m = c.merge_dyn(new.components[i].as_ref(), r.as_ref(), precision.components[i].as_ref())?;
            if m.dyn_eq(r.as_ref()) {
                merged.push(r.clone());
            } else {
                changed = true;
                merged.push(m);
            }
        }
        if changed {
            Some(CompositeState::new(merged))
        } else {
            Some(reached.clone())
        }
    }
}

impl StopOperator<CompositeState, CompositePrecision> for CompositeCpa {
    fn stop(
        &self,
        _domain: &dyn AbstractDomain<CompositeState>,
        state: &CompositeState,
        reached: &[&CompositeState],
        precision: &CompositePrecision,
    ) -> Option<Coverage> {
        self.check_arity(state.len());
        reached
            .iter()
            .position(|r| {
                self.components.iter().enumerate().all(|(i, c)| {
                    c.stop_dyn(
                        state.components[i].as_ref(),
                        r.components[i].as_ref(),
                        precision.components[i].as_ref(),
                    )
                })
            })
            .map(Coverage::By)
    }
}

impl PrecisionAdjustment<CompositeState, CompositePrecision> for CompositeCpa {
    fn adjust(
        &self,
        state: &CompositeState,
        precision: &CompositePrecision,
        context: &AdjustmentContext,
    ) -> Result<Adjustment<CompositeState, CompositePrecision>> {
        self.check_arity(state.len());
        self.check_arity(precision.len());

        let mut states = Vec::with_capacity(self.components.len());
        let mut precisions = Vec::with_capacity(self.components.len());
        let mut action = Action::Continue;
        for (i, c) in self.components.iter().enumerate() {
            let (s, p, a) = c.adjust_dyn(state.components[i].as_ref(), precision.components[i].as_ref(), context)?;
            if a == Action::Break {
                action = Action::Break;
            }
            states.push(s);
            // Keep sharing unchanged precisions.
            if p.dyn_eq(precision.components[i].as_ref()) {
                precisions.push(precision.components[i].clone());
            } else {
                precisions.push(p);
            }
        }
        Ok(Adjustment {
            state: CompositeState::new(states),
            precision: CompositePrecision { components: precisions },
            action,
        })
    }
}

impl ConfigurableProgramAnalysis for CompositeCpa {
    type State = CompositeState;
    type Precision = CompositePrecision;

    fn domain(&self) -> &dyn AbstractDomain<CompositeState> {
        self
    }

    fn transfer_relation(&self) -> &dyn TransferRelation<CompositeState, CompositePrecision> {
        self
    }

    fn merge_operator(&self) -> &dyn MergeOperator<CompositeState, CompositePrecision> {
        self
    }

    fn stop_operator(&self) -> &dyn StopOperator<CompositeState, CompositePrecision> {
        self
    }

    fn precision_adjustment(&self) -> &dyn PrecisionAdjustment<CompositeState, CompositePrecision> {
        self
    }

    fn initial_state(&self, entry: LocationId) -> CompositeState {
        CompositeState::new(self.components.iter().map(|c| c.initial_state_dyn(entry)).collect())
    }

    fn initial_precision(&self, entry: LocationId) -> CompositePrecision {
        CompositePrecision {
            components: self.components.iter().map(|c| c.initial_precision_dyn(entry)).collect(),
        }
    }

    fn refine_precision(&self, precision: &CompositePrecision, increment: &PrecisionIncrement) -> CompositePrecision {
        self.check_arity(precision.len());
        let components = self
            .components
            .iter()
            .zip(&precision.components)
            .map(|(c, p)| {
                let refined = c.refine_dyn(p.as_ref(), increment);
                if refined.dyn_eq(p.as_ref()) {
                    p.clone()
                } else {
                    refined
                }
            })
            .collect();
        CompositePrecision { components }
    }

    fn refines_at(&self, precision: &CompositePrecision, increment: &PrecisionIncrement, location: LocationId) -> bool {
        self.check_arity(precision.len());
        self.components
            .iter()
            .zip(&precision.components)
            .any(|(c, p)| c.refines_at_dyn(p.as_ref(), increment, location))
    }
}
