//! Structural invariants of the ARG and reached set under random programs and policies.

mod common;

use cpa_rs::algorithm::{AlgorithmStatus, CpaAlgorithm};
use cpa_rs::analysis::Analysis;
use cpa_rs::cegar::{CegarAlgorithm, CegarStatus};
use cpa_rs::cfa::{Cfa, CfaBuilder, EdgeEffect, LocationId};
use cpa_rs::config::{AnalysisConfig, MergePolicy, RefinementStrategy, ResourceLimits, StopPolicy, WaitlistOrder};
use cpa_rs::cpa::sign::SignPrecision;
use cpa_rs::expr::Expr;
use cpa_rs::oracle::IntervalPathChecker;
use proptest::prelude::*;

use common::*;

const VARS: [&str; 2] = ["x", "y"];

#[derive(Debug, Clone)]
enum Step {
    Set(usize, i64),
    Add(usize, usize, i64),
    Less(usize, i64),
    AtLeast(usize, i64),
    Skip,
}

impl Step {
    fn effect(&self) -> EdgeEffect {
        match *self {
            Step::Set(v, c) => EdgeEffect::Assign {
                var: VARS[v].to_string(),
                expr: Expr::constant(c),
            },
            Step::Add(v, w, c) => EdgeEffect::Assign {
                var: VARS[v].to_string(),
                expr: Expr::var(VARS[w]).add(Expr::constant(c)),
            },
            Step::Less(v, c) => EdgeEffect::Assume(Expr::var(VARS[v]).lt(Expr::constant(c))),
            Step::AtLeast(v, c) => EdgeEffect::Assume(Expr::var(VARS[v]).ge(Expr::constant(c))),
            Step::Skip => EdgeEffect::Nop,
        }
    }
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0..2usize, -2..3i64).prop_map(|(v, c)| Step::Set(v, c)),
        (0..2usize, 0..2usize, -1..2i64).prop_map(|(v, w, c)| Step::Add(v, w, c)),
        (0..2usize, -2..3i64).prop_map(|(v, c)| Step::Less(v, c)),
        (0..2usize, -2..3i64).prop_map(|(v, c)| Step::AtLeast(v, c)),
        Just(Step::Skip),
    ]
}

/// Random CFA: location 0 is the entry, the last location is the error location.
fn program() -> impl Strategy<Value = (usize, Vec<(usize, usize, Step)>)> {
    (3..7usize).prop_flat_map(|n| (Just(n), prop::collection::vec((0..n, 0..n, step()), 1..14)))
}

fn build(n: usize, edges: &[(usize, usize, Step)]) -> (Cfa, LocationId) {
    let mut b = CfaBuilder::new();
    let locations: Vec<_> = (0..n).map(|_| b.add_location("main")).collect();
    for (from, to, step) in edges {
        b.add_edge(locations[*from], locations[*to], step.effect());
    }
    (b.build(locations[0]).unwrap(), locations[n - 1])
}

fn merge_policy() -> impl Strategy<Value = MergePolicy> {
    prop_oneof![Just(MergePolicy::Sep), Just(MergePolicy::Join)]
}

fn stop_policy() -> impl Strategy<Value = StopPolicy> {
    prop_oneof![
        Just(StopPolicy::Sep),
        Just(StopPolicy::Join),
        Just(StopPolicy::Never),
        Just(StopPolicy::Always)
    ]
}

fn waitlist_order() -> impl Strategy<Value = WaitlistOrder> {
    prop_oneof![
        Just(WaitlistOrder::Dfs),
        Just(WaitlistOrder::Bfs),
        Just(WaitlistOrder::Topological)
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(96))]

    #[test]
    fn arg_stays_well_formed_during_exploration(
        (n, edges) in program(),
        merge in merge_policy(),
        stop in stop_policy(),
        order in waitlist_order(),
        continue_after_target in any::<bool>(),
    ) {
        let (cfa, err) = build(n, &edges);
        let cpa = precise_cpa(err, merge, stop);
        let limits = ResourceLimits::unlimited().with_max_iterations(150);
        let mut algorithm = CpaAlgorithm::new(&cpa, &cfa)
            .with_limits(limits, Default::default())
            .with_stop_after_target(!continue_after_target);
        let mut reached = algorithm.create_reached_set(order).unwrap();

        // Several runs: a run stopped at a target resumes where it left off.
        for _ in 0..4 {
            algorithm.run(&mut reached).unwrap();
            prop_assert_eq!(reached.arg().check_invariants(), Ok(()));
            prop_assert_eq!(reached.check_consistency(), Ok(()));
        }
    }

    #[test]
    fn arg_stays_well_formed_during_refinement(
        (n, edges) in program(),
        order in waitlist_order(),
        restart in any::<bool>(),
    ) {
        let (cfa, err) = build(n, &edges);
        let strategy = if restart { RefinementStrategy::Restart } else { RefinementStrategy::Prune };
        let config = AnalysisConfig::new()
            .with_waitlist(order)
            .with_refinement(strategy)
            .with_limits(ResourceLimits::unlimited().with_max_iterations(300).with_max_refinements(6));
        let cpa = lazy_cpa(err);
        let analysis = Analysis::new(&cpa, &cfa, config);
        let mut reached = analysis.create_reached_set().unwrap();

        // Checker failures on relational paths end as UNKNOWN; the ARG must still be intact.
        let _report = analysis.run_with(&mut reached, Some(&IntervalPathChecker::new()));
        prop_assert_eq!(reached.arg().check_invariants(), Ok(()));
        prop_assert_eq!(reached.check_consistency(), Ok(()));
    }
}

#[test]
fn test_rerun_on_fixpoint_adds_nothing() {
    let program = counting_loop();
    for (merge, stop) in [
        (MergePolicy::Sep, StopPolicy::Sep),
        (MergePolicy::Join, StopPolicy::Sep),
        (MergePolicy::Join, StopPolicy::Join),
    ] {
        let cpa = precise_cpa(program.err, merge, stop);
        let mut algorithm = CpaAlgorithm::new(&cpa, &program.cfa).with_stop_after_target(false);
        let mut reached = algorithm.create_reached_set(WaitlistOrder::Bfs).unwrap();
        assert_eq!(algorithm.run(&mut reached).unwrap(), AlgorithmStatus::Fixpoint);
        let (states, nodes) = (reached.len(), reached.arg().len());

        assert_eq!(algorithm.run(&mut reached).unwrap(), AlgorithmStatus::Fixpoint);
        assert_eq!(reached.len(), states, "{} / {}", merge, stop);
        assert_eq!(reached.arg().len(), nodes, "{} / {}", merge, stop);
        assert!(reached.arg().targets().next().is_none());
    }
}

#[test]
fn test_refinement_never_drops_tracked_variables() {
    let program = counting_loop();
    let cpa = lazy_cpa(program.err);
    let checker = IntervalPathChecker::new();

    // The same deterministic run, cut off after 0, 1, 2, ... refinements.
    let mut root_precisions = Vec::new();
    for budget in 0..4 {
        let limits = ResourceLimits::unlimited().with_max_refinements(budget);
        let algorithm = CpaAlgorithm::new(&cpa, &program.cfa).with_limits(limits, Default::default());
        let mut reached = algorithm.create_reached_set(WaitlistOrder::Dfs).unwrap();
        let mut cegar = CegarAlgorithm::new(algorithm, &checker);
        let status = cegar.run(&mut reached).unwrap();

        let root = reached.arg().root().unwrap();
        let precision = reached.precision(root).unwrap();
        let sign = precision.find::<SignPrecision>().unwrap().clone();
        root_precisions.push(sign);
        if status == CegarStatus::Safe {
            break;
        }
    }

    assert!(root_precisions.len() >= 2, "the loop needs at least one refinement");
    assert_eq!(root_precisions[0], SignPrecision::empty());
    for pair in root_precisions.windows(2) {
        assert!(pair[0].is_subsumed_by(&pair[1]), "{} is not subsumed by {}", pair[0], pair[1]);
    }
    let last = root_precisions.last().unwrap();
    assert!(last.tracks(LocationId::new(1), "x"), "x must be tracked at the loop head: {}", last);
}
