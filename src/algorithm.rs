//! Worklist-driven reachability algorithm.
//!
//! The algorithm repeatedly pops a node from the waitlist, computes the
//! abstract successors of its state along every outgoing CFA edge, and
//! inserts them into the [`ArgReachedSet`] according to the CPA's operators:
//!
//! 1. **Precision adjustment** may abstract the successor and decides
//!    whether exploration continues (`Continue`) or a target was hit (`Break`).
//! 2. **Merge** combines the successor with reached states at its location.
//! 3. **Stop** decides whether the successor is covered by the reached set.
//!
//! Exploration ends at a fixpoint (empty waitlist), on the first target state
//! (unless configured otherwise), or when a resource limit is hit.

use std::time::Instant;

use log::{debug, info, warn};

use crate::arg::NodeId;
use crate::cfa::{Edge, LocationId, ProgramGraph};
use crate::cpa::{AbstractState, Action, Adjustment, AdjustmentContext, ConfigurableProgramAnalysis, Coverage};
use crate::error::{CpaError, Result};
use crate::limits::{LimitReason, ResourceLimits, ResourceMonitor, ShutdownNotifier};
use crate::reached::ArgReachedSet;
use crate::stats::Statistics;
use crate::waitlist::WaitlistOrder;

/// How a run of the reachability algorithm ended.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum AlgorithmStatus {
    /// The waitlist is empty: the reached set over-approximates all reachable states.
    Fixpoint,
    /// A target state was inserted as this ARG node.
    TargetFound(NodeId),
    /// A limit was hit; the reached set is left as it was.
    ResourceExhausted(LimitReason),
}

/// The CPA algorithm over a program graph.
pub struct CpaAlgorithm<'a, C: ConfigurableProgramAnalysis> {
    cpa: &'a C,
    graph: &'a dyn ProgramGraph,
    stop_after_target: bool,
    monitor: ResourceMonitor,
    stats: Statistics,
}

impl<'a, C: ConfigurableProgramAnalysis> CpaAlgorithm<'a, C> {
    /// Creates an algorithm without resource limits that stops at the first target.
    pub fn new(cpa: &'a C, graph: &'a dyn ProgramGraph) -> Self {
        Self {
            cpa,
            graph,
            stop_after_target: true,
            monitor: ResourceMonitor::new(ResourceLimits::unlimited(), ShutdownNotifier::new()),
            stats: Statistics::default(),
        }
    }

    pub fn with_limits(mut self, limits: ResourceLimits, shutdown: ShutdownNotifier) -> Self {
        self.monitor = ResourceMonitor::new(limits, shutdown);
        self
    }

    /// With `false`, targets are recorded and exploration continues until a fixpoint.
    pub fn with_stop_after_target(mut self, stop: bool) -> Self {
        self.stop_after_target = stop;
        self
    }

    pub fn cpa(&self) -> &'a C {
        self.cpa
    }

    pub fn graph(&self) -> &'a dyn ProgramGraph {
        self.graph
    }

    pub fn monitor(&self) -> &ResourceMonitor {
        &self.monitor
    }

    pub fn stats(&self) -> &Statistics {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut Statistics {
        &mut self.stats
    }

    /// Creates a reached set seeded with the CPA's initial state and precision
    /// at the entry location.
    pub fn create_reached_set(&self, order: WaitlistOrder) -> Result<ArgReachedSet<C::State, C::Precision>> {
        let entry = self.graph.entry_location();
        if self.graph.location(entry).is_none() {
            return Err(CpaError::UnknownLocation(entry));
        }
        let mut reached = ArgReachedSet::new(order.build(self.graph)?);
        reached.seed(self.cpa.initial_state(entry), self.cpa.initial_precision(entry))?;
        Ok(reached)
    }

    /// Explores until fixpoint, target or resource exhaustion.
    pub fn run(&mut self, reached: &mut ArgReachedSet<C::State, C::Precision>) -> Result<AlgorithmStatus> {
        let start = Instant::now();
        let status = self.explore(reached);
        self.stats.exploration_time += start.elapsed();
        self.stats.reached_size = reached.len();
        self.stats.arg_size = reached.arg().len();
        let status = status?;
        info!(
            "Reachability finished with {:?}: {} reached, {} ARG nodes, {} iterations",
            status,
            reached.len(),
            reached.arg().len(),
            self.monitor.iterations()
        );
        Ok(status)
    }

    fn explore(&mut self, reached: &mut ArgReachedSet<C::State, C::Precision>) -> Result<AlgorithmStatus> {
        if reached.is_empty() {
            return Err(CpaError::EmptyReachedSet);
        }
        while reached.has_waiting() {
            if let Some(reason) = self.monitor.check(reached.len()) {
                warn!("Stopping exploration: {}", reason);
                return Ok(AlgorithmStatus::ResourceExhausted(reason));
            }
            let Some(node) = reached.pop() else {
                break;
            };
            self.monitor.tick();
            self.stats.iterations += 1;

            // Targets are never expanded. One gets here if refinement uncovered it.
            if reached.arg().node(node).is_some_and(|n| n.is_target()) {
                if self.stop_after_target {
                    return Ok(AlgorithmStatus::TargetFound(node));
                }
                continue;
            }

            let found = self.process(reached, node)?;
            self.stats.max_waitlist = self.stats.max_waitlist.max(reached.waitlist().len());
            if let Some(target) = found {
                return Ok(AlgorithmStatus::TargetFound(target));
            }
        }
        Ok(AlgorithmStatus::Fixpoint)
    }

    /// Expands `node`. Returns the target node if exploration must stop.
    fn process(&mut self, reached: &mut ArgReachedSet<C::State, C::Precision>, node: NodeId) -> Result<Option<NodeId>> {
        let state = reached.state(node).cloned().ok_or(CpaError::NodeNotFound(node))?;
        let precision = reached.precision(node).cloned().ok_or(CpaError::NodeNotFound(node))?;
        let location = state.location().ok_or(CpaError::MissingLocation)?;
        let edges = self.graph.outgoing_edges(location)?;
        debug!("Expanding {} at {} along {} edges", node, location, edges.len());

        for edge in edges {
            let successors = self.cpa.transfer_relation().successors(&state, &precision, edge)?;
            if successors.is_empty() {
                debug!("No successors along {}", edge);
            }
            for successor in successors {
                self.stats.successors += 1;
                let successor_location = successor.location().ok_or(CpaError::MissingLocation)?;
                let context = AdjustmentContext {
                    location: Some(successor_location),
                    reached_size: reached.len(),
                    reached_at_location: reached.reached().count_at(successor_location),
                };
                let Adjustment {
                    state: successor,
                    precision: successor_precision,
                    action,
                } = self.cpa.precision_adjustment().adjust(&successor, &precision, &context)?;

                match action {
                    Action::Break => {
                        if let Some(coverers) = self.coverage(reached, &successor, successor_location, &successor_precision)
                        {
                            self.stats.covered += 1;
                            reached.add_covered(node, edge.id, successor, &coverers)?;
                            continue;
                        }
                        let target = reached.add_target(node, edge.id, successor, successor_precision)?;
                        self.stats.targets += 1;
                        info!("Found target {} at {}", target, successor_location);
                        if self.stop_after_target {
                            // Remaining successors of `node` are recomputed when it is popped again.
                            reached.readd(node, None)?;
                            return Ok(Some(target));
                        }
                    }
                    Action::Continue => {
                        self.merge(reached, node, edge, &successor, successor_location, &successor_precision)?;
                        match self.coverage(reached, &successor, successor_location, &successor_precision) {
                            Some(coverers) => {
                                debug!("Successor at {} covered by {:?}", successor_location, coverers);
                                self.stats.covered += 1;
                                reached.add_covered(node, edge.id, successor, &coverers)?;
                            }
                            None => {
                                let child = reached.add_successor(node, edge.id, successor, successor_precision)?;
                                debug!("Added {} at {}", child, successor_location);
                            }
                        }
                    }
                }
            }
        }
        Ok(None)
    }

    /// Merges `successor` into every non-target reached state at its location.
    fn merge(
        &mut self,
        reached: &mut ArgReachedSet<C::State, C::Precision>,
        parent: NodeId,
        edge: &Edge,
        successor: &C::State,
        location: LocationId,
        precision: &C::Precision,
    ) -> Result<()> {
        let candidates: Vec<NodeId> = reached.reached().at_location(location).collect();
        for candidate in candidates {
            let Some(n) = reached.arg().node(candidate) else {
                continue;
            };
            if n.is_target() {
                continue;
            }
            let merged = self
                .cpa
                .merge_operator()
                .merge(self.cpa.domain(), successor, n.state(), precision)
                .filter(|merged| merged != n.state());
            if let Some(merged) = merged {
                debug!("Merged successor at {} into {}", location, candidate);
                self.stats.merges += 1;
                reached.replace_merged(candidate, merged, precision.clone(), parent, edge.id)?;
            }
        }
        Ok(())
    }

    /// Reached nodes covering `state`, if the stop operator reports coverage.
    fn coverage(
        &self,
        reached: &ArgReachedSet<C::State, C::Precision>,
        state: &C::State,
        location: LocationId,
        precision: &C::Precision,
    ) -> Option<Vec<NodeId>> {
        let candidates: Vec<NodeId> = reached.reached().at_location(location).collect();
        let states: Vec<&C::State> = candidates.iter().filter_map(|&n| reached.state(n)).collect();
        debug_assert_eq!(states.len(), candidates.len());
        match self.cpa.stop_operator().stop(self.cpa.domain(), state, &states, precision)? {
            Coverage::By(i) => candidates.get(i).map(|&n| vec![n]),
            Coverage::Join => Some(candidates),
        }
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::cfa::{Cfa, CfaBuilder, EdgeEffect};
    use crate::cpa::location::LocationCpa;
    use crate::expr::Expr;

    /// l0 -> l1 -> l2 -> l1 (loop), l1 -> l3
    fn loop_graph() -> (Cfa, [LocationId; 4]) {
        let mut b = CfaBuilder::new();
        let l0 = b.add_location("main");
        let l1 = b.add_location("main");
        let l2 = b.add_location("main");
        let l3 = b.add_location("main");
        b.add_edge(l0, l1, EdgeEffect::Nop);
        b.add_edge(
            l1,
            l2,
            EdgeEffect::Assume(Expr::var("i").lt(Expr::constant(10))),
        );
        b.add_edge(
            l2,
            l1,
            EdgeEffect::Assign {
                var: "i".to_string(),
                expr: Expr::var("i").add(Expr::constant(1)),
            },
        );
        b.add_edge(l1, l3, EdgeEffect::Assume(Expr::var("i").ge(Expr::constant(10))));
        (b.build(l0).unwrap(), [l0, l1, l2, l3])
    }

    #[test]
    fn test_fixpoint_on_loop() {
        let (cfa, [_, l1, _, _]) = loop_graph();
        let cpa = LocationCpa::default();
        let mut algorithm = CpaAlgorithm::new(&cpa, &cfa);
        let mut reached = algorithm.create_reached_set(WaitlistOrder::Dfs).unwrap();

        let status = algorithm.run(&mut reached).unwrap();
        assert_eq!(status, AlgorithmStatus::Fixpoint);
        assert_eq!(reached.len(), 4);
        // The loop head is reached once; the back edge produced a covered node.
        assert_eq!(reached.reached().count_at(l1), 1);
        assert_eq!(algorithm.stats().covered, 1);
        assert_eq!(reached.arg().len(), 5);
        reached.check_consistency().unwrap();
    }

    #[test]
    fn test_target_found() {
        let (cfa, [.., l3]) = loop_graph();
        let cpa = LocationCpa::new([l3]);
        let mut algorithm = CpaAlgorithm::new(&cpa, &cfa);
        let mut reached = algorithm.create_reached_set(WaitlistOrder::Bfs).unwrap();

        let status = algorithm.run(&mut reached).unwrap();
        let AlgorithmStatus::TargetFound(target) = status else {
            panic!("expected a target, got {:?}", status);
        };
        assert_eq!(reached.arg().node(target).unwrap().location(), l3);
        assert!(reached.reached().contains(target));
        assert!(!reached.waitlist().contains(target));
        reached.check_consistency().unwrap();

        let path = reached.arg().path_to(target, &cfa).unwrap();
        assert_eq!(path.len(), 3);
    }

    #[test]
    fn test_continue_after_target() {
        let (cfa, [.., l3]) = loop_graph();
        let cpa = LocationCpa::new([l3]);
        let mut algorithm = CpaAlgorithm::new(&cpa, &cfa).with_stop_after_target(false);
        let mut reached = algorithm.create_reached_set(WaitlistOrder::Dfs).unwrap();

        assert_eq!(algorithm.run(&mut reached).unwrap(), AlgorithmStatus::Fixpoint);
        assert_eq!(reached.arg().targets().count(), 1);
        assert_eq!(algorithm.stats().targets, 1);
    }

    #[test]
    fn test_zero_iterations_keeps_seed() {
        let (cfa, _) = loop_graph();
        let cpa = LocationCpa::default();
        let limits = ResourceLimits::default().with_max_iterations(0);
        let mut algorithm = CpaAlgorithm::new(&cpa, &cfa).with_limits(limits, ShutdownNotifier::new());
        let mut reached = algorithm.create_reached_set(WaitlistOrder::Dfs).unwrap();

        let status = algorithm.run(&mut reached).unwrap();
        assert_eq!(status, AlgorithmStatus::ResourceExhausted(LimitReason::Iterations(0)));
        assert_eq!(reached.len(), 1);
        assert_eq!(reached.waitlist().len(), 1);
    }

    #[test]
    fn test_shutdown() {
        let (cfa, _) = loop_graph();
        let cpa = LocationCpa::default();
        let shutdown = ShutdownNotifier::new();
        shutdown.request_shutdown("test");
        let mut algorithm = CpaAlgorithm::new(&cpa, &cfa).with_limits(ResourceLimits::default(), shutdown);
        let mut reached = algorithm.create_reached_set(WaitlistOrder::Dfs).unwrap();
        assert_eq!(
            algorithm.run(&mut reached).unwrap(),
            AlgorithmStatus::ResourceExhausted(LimitReason::Shutdown("test".to_string()))
        );
    }

    #[test]
    fn test_rerun_on_fixpoint_adds_nothing() {
        let (cfa, _) = loop_graph();
        let cpa = LocationCpa::default();
        let mut algorithm = CpaAlgorithm::new(&cpa, &cfa);
        let mut reached = algorithm.create_reached_set(WaitlistOrder::Dfs).unwrap();
        algorithm.run(&mut reached).unwrap();
        let (size, arg_size) = (reached.len(), reached.arg().len());
        assert_eq!(algorithm.run(&mut reached).unwrap(), AlgorithmStatus::Fixpoint);
        assert_eq!((reached.len(), reached.arg().len()), (size, arg_size));
    }
}
