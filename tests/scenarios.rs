//! End-to-end runs of the sign analysis over small branching programs.

mod common;

use cpa_rs::algorithm::{AlgorithmStatus, CpaAlgorithm};
use cpa_rs::analysis::{Analysis, AnalysisOutcome, UnknownReason};
use cpa_rs::cegar::{Feasibility, FeasibilityChecker};
use cpa_rs::cfa::{EdgeEffect, ProgramGraph};
use cpa_rs::config::{AnalysisConfig, MergePolicy, ResourceLimits, StopPolicy, WaitlistOrder};
use cpa_rs::cpa::sign::Sign;
use cpa_rs::expr::Expr;
use cpa_rs::limits::LimitReason;
use cpa_rs::oracle::IntervalPathChecker;
use test_log::test;

use common::*;

#[test]
fn test_unsafe_path_is_extracted() {
    let program = branching();
    let exit = program.exit.unwrap();
    let config = AnalysisConfig::new()
        .with_track_all_variables(true)
        .with_stop_after_target(false);
    let cpa = config.reference_cpa([program.err]);
    let analysis = Analysis::new(&cpa, &program.cfa, config);
    let mut reached = analysis.create_reached_set().unwrap();

    let report = analysis.run_with(&mut reached, None);

    assert!(!reached.has_waiting());
    let at_err: Vec<_> = reached.reached().at_location(program.err).collect();
    let at_exit: Vec<_> = reached.reached().at_location(exit).collect();
    assert_eq!(at_err.len(), 1);
    assert_eq!(at_exit.len(), 1);
    assert_eq!(sign_of(reached.state(at_err[0]).unwrap(), "x"), Sign::Pos);
    assert_eq!(sign_of(reached.state(at_exit[0]).unwrap(), "x"), Sign::NonPos);

    let AnalysisOutcome::Unsafe { counterexample } = report.outcome else {
        panic!("expected UNSAFE, got {}", report.outcome);
    };
    assert_eq!(counterexample.steps.len(), 1);
    let (location, edge) = &counterexample.steps[0];
    assert_eq!(location.id, program.entry);
    assert_eq!(edge.effect, EdgeEffect::Assume(Expr::var("x").gt(Expr::constant(0))));
    assert_eq!(counterexample.target.id, program.err);
    assert_eq!(counterexample.path.len(), 2);
}

#[test]
fn test_error_at_entry_is_unsafe() {
    let program = error_at_entry();
    let checker = IntervalPathChecker::new();
    let checkers: [Option<&dyn FeasibilityChecker>; 2] = [None, Some(&checker)];

    for stop_after_target in [true, false] {
        for checker in checkers {
            let config = AnalysisConfig::new().with_stop_after_target(stop_after_target);
            let cpa = config.reference_cpa([program.err]);
            let report = Analysis::new(&cpa, &program.cfa, config).run(checker);

            let AnalysisOutcome::Unsafe { counterexample } = report.outcome else {
                panic!("expected UNSAFE, got {}", report.outcome);
            };
            assert_eq!(counterexample.path.len(), 1);
            assert!(counterexample.steps.is_empty());
            assert_eq!(counterexample.target.id, program.entry);
        }
    }
}

#[test]
fn test_merge_join_keeps_single_state_at_exit() {
    let program = branching_twice_to_exit();
    let exit = program.exit.unwrap();

    let cpa = precise_cpa(program.err, MergePolicy::Join, StopPolicy::Sep);
    let mut algorithm = CpaAlgorithm::new(&cpa, &program.cfa).with_stop_after_target(false);
    let mut reached = algorithm.create_reached_set(WaitlistOrder::Dfs).unwrap();
    assert_eq!(algorithm.run(&mut reached).unwrap(), AlgorithmStatus::Fixpoint);

    // `-` from the first edge is joined with `≤0` from the second.
    let at_exit: Vec<_> = reached.reached().at_location(exit).collect();
    assert_eq!(at_exit.len(), 1);
    assert_eq!(sign_of(reached.state(at_exit[0]).unwrap(), "x"), Sign::NonPos);
    assert_eq!(algorithm.stats().merges, 1);
    assert_eq!(reached.arg().node(at_exit[0]).unwrap().parents().len(), 2);
    reached.check_consistency().unwrap();
}

#[test]
fn test_without_coverage_both_exit_states_are_kept() {
    let program = branching_twice_to_exit();
    let exit = program.exit.unwrap();

    let cpa = precise_cpa(program.err, MergePolicy::Sep, StopPolicy::Never);
    let mut algorithm = CpaAlgorithm::new(&cpa, &program.cfa).with_stop_after_target(false);
    let mut reached = algorithm.create_reached_set(WaitlistOrder::Bfs).unwrap();
    assert_eq!(algorithm.run(&mut reached).unwrap(), AlgorithmStatus::Fixpoint);

    let signs: Vec<_> = reached
        .reached()
        .at_location(exit)
        .map(|n| sign_of(reached.state(n).unwrap(), "x"))
        .collect();
    assert_eq!(signs.len(), 2);
    assert!(signs.contains(&Sign::NonPos));
    assert!(signs.contains(&Sign::Neg));
}

#[test]
fn test_infeasible_path_is_refined_to_safe() {
    let program = contradicting();
    let cpa = lazy_cpa(program.err);

    // Without tracking `x`, both guards look satisfiable.
    let mut algorithm = CpaAlgorithm::new(&cpa, &program.cfa);
    let mut reached = algorithm.create_reached_set(WaitlistOrder::Dfs).unwrap();
    let AlgorithmStatus::TargetFound(target) = algorithm.run(&mut reached).unwrap() else {
        panic!("expected a target");
    };
    let path = reached.arg().path_to(target, &program.cfa).unwrap();
    assert_eq!(path.len(), 3);
    let checker = IntervalPathChecker::new();
    assert!(matches!(
        checker.check_path_feasibility(&path).unwrap(),
        Feasibility::Infeasible(ref interpolants) if interpolants.len() == 3
    ));

    let config = AnalysisConfig::new();
    let analysis = Analysis::new(&cpa, &program.cfa, config);
    let mut reached = analysis.create_reached_set().unwrap();
    let report = analysis.run_with(&mut reached, Some(&checker));

    assert!(report.outcome.is_safe(), "got {}", report.outcome);
    assert_eq!(report.statistics.refinements, 1);
    assert_eq!(reached.reached().count_at(program.err), 0);
    assert!(reached.arg().targets().next().is_none());
    reached.arg().check_invariants().unwrap();
    reached.check_consistency().unwrap();
}

#[test]
fn test_feasible_path_survives_refinement() {
    let program = branching();
    let cpa = lazy_cpa(program.err);
    let report = Analysis::new(&cpa, &program.cfa, AnalysisConfig::new()).run(Some(&IntervalPathChecker::new()));

    let AnalysisOutcome::Unsafe { counterexample } = report.outcome else {
        panic!("expected UNSAFE, got {}", report.outcome);
    };
    let model = counterexample.model.unwrap();
    assert!(model.get("x").unwrap() > 0);
    assert_eq!(report.statistics.refinements, 0);
}

#[test]
fn test_zero_iterations_keep_seeded_reached_set() {
    let program = branching();
    let config = AnalysisConfig::new().with_limits(ResourceLimits::unlimited().with_max_iterations(0));
    let cpa = config.reference_cpa([program.err]);
    let analysis = Analysis::new(&cpa, &program.cfa, config);
    let mut reached = analysis.create_reached_set().unwrap();

    let report = analysis.run_with(&mut reached, Some(&IntervalPathChecker::new()));

    assert_eq!(
        report.outcome,
        AnalysisOutcome::Unknown {
            reason: UnknownReason::ResourceExhausted(LimitReason::Iterations(0)),
        }
    );
    assert_eq!(reached.len(), 1);
    assert_eq!(reached.arg().len(), 1);
    assert!(reached.has_waiting());
    let root = reached.arg().root().unwrap();
    assert_eq!(reached.arg().node(root).unwrap().location(), program.cfa.entry_location());
    assert_eq!(report.statistics.iterations, 0);
}
