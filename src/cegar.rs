//! Counterexample-guided abstraction refinement.
//!
//! [`CegarAlgorithm`] wraps the reachability algorithm. Whenever exploration
//! stops at a target node, the path from the ARG root to it is handed to a
//! [`FeasibilityChecker`]:
//!
//! - a **feasible** path is a real counterexample and ends the analysis,
//! - an **infeasible** path comes with one interpolant per path location; their
//!   atoms are added to the tracked facts, the ARG is pruned below the first
//!   path node whose precision grows, and exploration resumes.
//!
//! If no path node's precision grows, the same spurious path would be found
//! again; the loop gives up with [`CegarStatus::NonProgress`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use log::{debug, info, warn};

use crate::algorithm::{AlgorithmStatus, CpaAlgorithm};
use crate::arg::NodeId;
use crate::cpa::{ConfigurableProgramAnalysis, PrecisionIncrement};
use crate::error::{CpaError, Result};
use crate::expr::Cond;
use crate::limits::LimitReason;
use crate::path::CounterexamplePath;
use crate::reached::ArgReachedSet;

/// Concrete variable assignment witnessing a feasible path.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Model {
    assignments: BTreeMap<String, i64>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, var: impl Into<String>, value: i64) {
        self.assignments.insert(var.into(), value);
    }

    pub fn get(&self, var: &str) -> Option<i64> {
        self.assignments.get(var).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.assignments.iter().map(|(k, &v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}

impl From<BTreeMap<String, i64>> for Model {
    fn from(assignments: BTreeMap<String, i64>) -> Self {
        Self { assignments }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (var, value)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} = {}", var, value)?;
        }
        write!(f, "}}")
    }
}

/// Conjunction of atoms that holds at one location of an infeasible path.
///
/// The empty conjunction is `true`.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Interpolant {
    atoms: BTreeSet<Cond>,
}

impl Interpolant {
    /// The trivial interpolant `true`.
    pub fn top() -> Self {
        Self::default()
    }

    /// The interpolant `false`.
    pub fn bottom() -> Self {
        Self::from_atoms([Cond::False])
    }

    pub fn from_atoms(atoms: impl IntoIterator<Item = Cond>) -> Self {
        Self {
            atoms: atoms.into_iter().filter(|a| *a != Cond::True).collect(),
        }
    }

    pub fn atoms(&self) -> impl Iterator<Item = &Cond> {
        self.atoms.iter()
    }

    pub fn is_true(&self) -> bool {
        self.atoms.is_empty()
    }

    pub fn is_false(&self) -> bool {
        self.atoms.contains(&Cond::False)
    }
}

impl fmt::Display for Interpolant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.atoms.is_empty() {
            return write!(f, "true");
        }
        for (i, atom) in self.atoms.iter().enumerate() {
            if i > 0 {
                write!(f, " && ")?;
            }
            write!(f, "{}", atom)?;
        }
        Ok(())
    }
}

/// Verdict of a feasibility check.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Feasibility {
    Feasible(Model),
    /// One interpolant per location of the checked path.
    Infeasible(Vec<Interpolant>),
}

/// Decides whether a counterexample path is executable.
///
/// Implementations are typically backed by an SMT solver.
pub trait FeasibilityChecker {
    fn check_path_feasibility(&self, path: &CounterexamplePath) -> Result<Feasibility>;
}

/// What to do with the ARG after a successful refinement.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub enum RefinementStrategy {
    /// Remove the infeasible part of the ARG and re-explore from the pivot.
    #[default]
    Prune,
    /// Start over from the initial state with the refined precision.
    Restart,
}

impl fmt::Display for RefinementStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefinementStrategy::Prune => write!(f, "prune"),
            RefinementStrategy::Restart => write!(f, "restart"),
        }
    }
}

impl FromStr for RefinementStrategy {
    type Err = CpaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "prune" => Ok(RefinementStrategy::Prune),
            "restart" => Ok(RefinementStrategy::Restart),
            other => Err(CpaError::InvalidConfiguration(format!(
                "unknown refinement strategy '{}'",
                other
            ))),
        }
    }
}

/// How the CEGAR loop ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CegarStatus {
    /// Fixpoint without reachable target.
    Safe,
    /// Feasible path to a target.
    Unsafe { path: CounterexamplePath, model: Model },
    ResourceExhausted(LimitReason),
    /// Refinement could not exclude this spurious path.
    NonProgress { path: CounterexamplePath, tracked: PrecisionIncrement },
}

/// CEGAR loop around a [`CpaAlgorithm`].
pub struct CegarAlgorithm<'a, C: ConfigurableProgramAnalysis> {
    algorithm: CpaAlgorithm<'a, C>,
    checker: &'a dyn FeasibilityChecker,
    strategy: RefinementStrategy,
    tracked: PrecisionIncrement,
}

impl<'a, C: ConfigurableProgramAnalysis> CegarAlgorithm<'a, C> {
    /// Every target is checked, so the wrapped algorithm always stops at targets.
    pub fn new(algorithm: CpaAlgorithm<'a, C>, checker: &'a dyn FeasibilityChecker) -> Self {
        Self {
            algorithm: algorithm.with_stop_after_target(true),
            checker,
            strategy: RefinementStrategy::default(),
            tracked: PrecisionIncrement::new(),
        }
    }

    pub fn with_strategy(mut self, strategy: RefinementStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn algorithm(&self) -> &CpaAlgorithm<'a, C> {
        &self.algorithm
    }

    pub fn into_algorithm(self) -> CpaAlgorithm<'a, C> {
        self.algorithm
    }

    /// All facts learned from interpolants so far.
    pub fn tracked(&self) -> &PrecisionIncrement {
        &self.tracked
    }

    pub fn run(&mut self, reached: &mut ArgReachedSet<C::State, C::Precision>) -> Result<CegarStatus> {
        loop {
            if let Some(reason) = self.algorithm.monitor().check(reached.len()) {
                warn!("Stopping CEGAR loop: {}", reason);
                return Ok(CegarStatus::ResourceExhausted(reason));
            }

            let target = match self.algorithm.run(reached)? {
                AlgorithmStatus::Fixpoint => return Ok(CegarStatus::Safe),
                AlgorithmStatus::ResourceExhausted(reason) => return Ok(CegarStatus::ResourceExhausted(reason)),
                AlgorithmStatus::TargetFound(target) => target,
            };

            let start = Instant::now();
            let result = self.handle_target(reached, target);
            self.algorithm.stats_mut().refinement_time += start.elapsed();
            if let Some(status) = result? {
                return Ok(status);
            }
        }
    }

    /// Checks the path to `target` and refines if it is spurious.
    ///
    /// Returns `None` if exploration should resume.
    fn handle_target(
        &mut self,
        reached: &mut ArgReachedSet<C::State, C::Precision>,
        target: NodeId,
    ) -> Result<Option<CegarStatus>> {
        let path = reached.arg().path_to(target, self.algorithm.graph())?;
        debug!("Checking path {}", path);
        self.algorithm.stats_mut().feasibility_checks += 1;

        match self.checker.check_path_feasibility(&path)? {
            Feasibility::Feasible(model) => {
                info!("Path to {} is feasible with {}", target, model);
                Ok(Some(CegarStatus::Unsafe { path, model }))
            }
            Feasibility::Infeasible(interpolants) => {
                let done = self.algorithm.stats().refinements;
                if let Some(reason) = self.algorithm.monitor().check_refinements(done) {
                    warn!("Path to {} is spurious, but {}", target, reason);
                    return Ok(Some(CegarStatus::ResourceExhausted(reason)));
                }
                self.refine(reached, path, &interpolants)
            }
        }
    }

    fn refine(
        &mut self,
        reached: &mut ArgReachedSet<C::State, C::Precision>,
        path: CounterexamplePath,
        interpolants: &[Interpolant],
    ) -> Result<Option<CegarStatus>> {
        if interpolants.len() != path.len() {
            return Err(CpaError::InterpolantCount {
                expected: path.len(),
                actual: interpolants.len(),
            });
        }

        let mut increment = PrecisionIncrement::new();
        for (&location, interpolant) in path.locations().iter().zip(interpolants).take(path.len() - 1) {
            for atom in interpolant.atoms().filter(|a| **a != Cond::False) {
                increment.add(location, atom.clone());
            }
        }
        let added = self.tracked.extend(&increment);
        debug!("Refinement adds {} new facts: {}", added, increment);

        // The first node whose state would be abstracted differently is
        // recomputed, so the pivot is its predecessor on the path.
        let cpa = self.algorithm.cpa();
        let tracked = &self.tracked;
        let nodes = path.nodes();
        let locations = path.locations();
        let pivot = (1..nodes.len())
            .find(|&i| {
                reached
                    .precision(nodes[i])
                    .is_some_and(|p| cpa.refines_at(p, tracked, locations[i]))
            })
            .map(|i| i - 1);

        let Some(pivot) = pivot else {
            warn!(
                "Refinement of spurious path of length {} to {} made no progress",
                path.len(),
                path.locations().last().map_or_else(|| "?".to_string(), |l| l.to_string())
            );
            return Ok(Some(CegarStatus::NonProgress {
                path,
                tracked: self.tracked.clone(),
            }));
        };

        match self.strategy {
            RefinementStrategy::Prune => {
                let removed = reached.remove_subtrees(&nodes[pivot + 1..], |p| cpa.refine_precision(p, tracked))?;
                debug!("Pruned {} nodes below {}", removed.len(), nodes[pivot]);
            }
            RefinementStrategy::Restart => {
                let (state, precision) = reached.initial().cloned().ok_or(CpaError::EmptyReachedSet)?;
                reached.reset(state, cpa.refine_precision(&precision, tracked))?;
                debug!("Restarted from the initial state");
            }
        }

        let stats = self.algorithm.stats_mut();
        stats.refinements += 1;
        info!(
            "Refinement {} done: pivot at position {} of {}, {} facts tracked",
            stats.refinements,
            pivot,
            path.len(),
            self.tracked.len()
        );
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use test_log::test;

    use super::*;
    use crate::cfa::{Cfa, CfaBuilder, EdgeEffect, LocationId};
    use crate::cpa::composite::CompositeCpa;
    use crate::cpa::location::LocationCpa;
    use crate::cpa::sign::{SignCpa, SignPrecision};
    use crate::expr::Expr;
    use crate::limits::{ResourceLimits, ShutdownNotifier};
    use crate::waitlist::WaitlistOrder;

    /// Answers with a fixed verdict and counts calls.
    struct FixedChecker {
        verdict: Box<dyn Fn(&CounterexamplePath) -> Feasibility>,
        calls: Cell<usize>,
    }

    impl FixedChecker {
        fn new(verdict: impl Fn(&CounterexamplePath) -> Feasibility + 'static) -> Self {
            Self {
                verdict: Box::new(verdict),
                calls: Cell::new(0),
            }
        }
    }

    impl FeasibilityChecker for FixedChecker {
        fn check_path_feasibility(&self, path: &CounterexamplePath) -> Result<Feasibility> {
            self.calls.set(self.calls.get() + 1);
            Ok((self.verdict)(path))
        }
    }

    /// entry --x:=1--> l1 --[x <= 0]--> err, l1 --[x > 0]--> exit
    fn program() -> (Cfa, LocationId, LocationId) {
        let mut b = CfaBuilder::new();
        let entry = b.add_location("main");
        let l1 = b.add_location("main");
        let err = b.add_location("main");
        let exit = b.add_location("main");
        b.add_edge(
            entry,
            l1,
            EdgeEffect::Assign {
                var: "x".to_string(),
                expr: Expr::constant(1),
            },
        );
        b.add_edge(l1, err, EdgeEffect::Assume(Expr::var("x").le(Expr::constant(0))));
        b.add_edge(l1, exit, EdgeEffect::Assume(Expr::var("x").gt(Expr::constant(0))));
        (b.build(entry).unwrap(), l1, err)
    }

    fn cpa(err: LocationId) -> CompositeCpa {
        CompositeCpa::new()
            .with_component(LocationCpa::new([err]))
            .with_component(SignCpa::default().with_initial_precision(SignPrecision::empty()))
    }

    fn x_positive_at(l1: LocationId) -> impl Fn(&CounterexamplePath) -> Feasibility {
        move |path| {
            Feasibility::Infeasible(
                path.locations()
                    .iter()
                    .map(|&l| {
                        if l == l1 {
                            Interpolant::from_atoms([Expr::var("x").gt(Expr::constant(0))])
                        } else if Some(&l) == path.locations().last() {
                            Interpolant::bottom()
                        } else {
                            Interpolant::top()
                        }
                    })
                    .collect(),
            )
        }
    }

    #[test]
    fn test_feasible_path_is_unsafe() {
        let (cfa, _, err) = program();
        let cpa = cpa(err);
        let checker = FixedChecker::new(|_| Feasibility::Feasible(Model::new()));
        let algorithm = CpaAlgorithm::new(&cpa, &cfa);
        let mut reached = algorithm.create_reached_set(WaitlistOrder::Dfs).unwrap();
        let mut cegar = CegarAlgorithm::new(algorithm, &checker);

        let CegarStatus::Unsafe { path, .. } = cegar.run(&mut reached).unwrap() else {
            panic!("expected a counterexample");
        };
        assert_eq!(path.locations().last(), Some(&err));
        assert_eq!(checker.calls.get(), 1);
    }

    #[test]
    fn test_refinement_proves_safety() {
        for strategy in [RefinementStrategy::Prune, RefinementStrategy::Restart] {
            let (cfa, l1, err) = program();
            let cpa = cpa(err);
            let checker = FixedChecker::new(x_positive_at(l1));
            let algorithm = CpaAlgorithm::new(&cpa, &cfa);
            let mut reached = algorithm.create_reached_set(WaitlistOrder::Dfs).unwrap();
            let mut cegar = CegarAlgorithm::new(algorithm, &checker).with_strategy(strategy);

            assert_eq!(cegar.run(&mut reached).unwrap(), CegarStatus::Safe, "{}", strategy);
            assert_eq!(cegar.algorithm().stats().refinements, 1);
            assert_eq!(checker.calls.get(), 1);
            assert_eq!(reached.arg().targets().count(), 0);
            reached.check_consistency().unwrap();
        }
    }

    #[test]
    fn test_prune_keeps_nodes_before_first_refined_location() {
        // l0 --nop--> l1 --nop--> l2 --[x > 0]--> l3 --[x <= 0]--> err
        let mut b = CfaBuilder::new();
        let l0 = b.add_location("main");
        let l1 = b.add_location("main");
        let l2 = b.add_location("main");
        let l3 = b.add_location("main");
        let err = b.add_location("main");
        b.add_edge(l0, l1, EdgeEffect::Nop);
        b.add_edge(l1, l2, EdgeEffect::Nop);
        b.add_edge(l2, l3, EdgeEffect::Assume(Expr::var("x").gt(Expr::constant(0))));
        b.add_edge(l3, err, EdgeEffect::Assume(Expr::var("x").le(Expr::constant(0))));
        let cfa = b.build(l0).unwrap();

        let cpa = cpa(err);
        let paths = Rc::new(RefCell::new(Vec::new()));
        let checker = FixedChecker::new({
            let paths = paths.clone();
            let verdict = x_positive_at(l3);
            move |path: &CounterexamplePath| {
                paths.borrow_mut().push(path.nodes().to_vec());
                verdict(path)
            }
        });
        let algorithm = CpaAlgorithm::new(&cpa, &cfa);
        let mut reached = algorithm.create_reached_set(WaitlistOrder::Dfs).unwrap();
        let mut cegar = CegarAlgorithm::new(algorithm, &checker);

        assert_eq!(cegar.run(&mut reached).unwrap(), CegarStatus::Safe);
        assert_eq!(cegar.algorithm().stats().refinements, 1);

        let paths = paths.borrow();
        assert_eq!(paths.len(), 1);
        let nodes = &paths[0];
        assert_eq!(nodes.len(), 5);
        // Only l3 gained a tracked variable, so the prefix up to l2 survives.
        for &node in &nodes[..3] {
            assert!(reached.arg().contains(node), "{} was pruned", node);
        }
        for &node in &nodes[3..] {
            assert!(!reached.arg().contains(node), "{} survived", node);
        }
        assert_eq!(reached.reached().at_location(l1).collect::<Vec<_>>(), vec![nodes[1]]);
        assert_eq!(reached.reached().at_location(l2).collect::<Vec<_>>(), vec![nodes[2]]);
        assert_eq!(reached.reached().count_at(l3), 1);
        assert_eq!(reached.arg().len(), 4);
        reached.check_consistency().unwrap();
    }

    #[test]
    fn test_useless_interpolants_are_non_progress() {
        let (cfa, _, err) = program();
        let cpa = cpa(err);
        let checker = FixedChecker::new(|path| Feasibility::Infeasible(vec![Interpolant::top(); path.len()]));
        let algorithm = CpaAlgorithm::new(&cpa, &cfa);
        let mut reached = algorithm.create_reached_set(WaitlistOrder::Dfs).unwrap();
        let mut cegar = CegarAlgorithm::new(algorithm, &checker);

        let status = cegar.run(&mut reached).unwrap();
        assert!(matches!(status, CegarStatus::NonProgress { .. }), "{:?}", status);
    }

    #[test]
    fn test_wrong_interpolant_count() {
        let (cfa, _, err) = program();
        let cpa = cpa(err);
        let checker = FixedChecker::new(|_| Feasibility::Infeasible(vec![Interpolant::top()]));
        let algorithm = CpaAlgorithm::new(&cpa, &cfa);
        let mut reached = algorithm.create_reached_set(WaitlistOrder::Dfs).unwrap();
        let mut cegar = CegarAlgorithm::new(algorithm, &checker);

        assert!(matches!(
            cegar.run(&mut reached),
            Err(CpaError::InterpolantCount { expected: 3, actual: 1 })
        ));
    }

    #[test]
    fn test_refinement_budget() {
        let (cfa, l1, err) = program();
        let cpa = cpa(err);
        let checker = FixedChecker::new(x_positive_at(l1));
        let limits = ResourceLimits::default().with_max_refinements(0);
        let algorithm = CpaAlgorithm::new(&cpa, &cfa).with_limits(limits, ShutdownNotifier::new());
        let mut reached = algorithm.create_reached_set(WaitlistOrder::Dfs).unwrap();
        let mut cegar = CegarAlgorithm::new(algorithm, &checker);

        assert_eq!(
            cegar.run(&mut reached).unwrap(),
            CegarStatus::ResourceExhausted(LimitReason::Refinements(0))
        );
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("Restart".parse::<RefinementStrategy>().unwrap(), RefinementStrategy::Restart);
        assert!("nope".parse::<RefinementStrategy>().is_err());
        assert_eq!(RefinementStrategy::Prune.to_string(), "prune");
    }
}
