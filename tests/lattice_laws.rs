//! Partial-order and join laws of the shipped abstract domains.

use cpa_rs::cfa::LocationId;
use cpa_rs::cpa::composite::{CompositeCpa, CompositeState};
use cpa_rs::cpa::location::{LocationCpa, LocationDomain, LocationState};
use cpa_rs::cpa::sign::{Sign, SignCpa, SignDomain, SignPrecision, SignState};
use cpa_rs::cpa::{AbstractDomain, ConfigurableProgramAnalysis, Coverage, PrecisionIncrement, StopOperator, StopSep};
use cpa_rs::expr::Expr;
use proptest::prelude::*;

const VARS: [&str; 3] = ["x", "y", "z"];

fn sign() -> impl Strategy<Value = Sign> {
    prop::sample::select(Sign::ALL.iter().copied().filter(|&s| s != Sign::Bottom).collect::<Vec<_>>())
}

fn sign_state() -> impl Strategy<Value = SignState> {
    prop::collection::vec(prop::option::of(sign()), VARS.len()).prop_map(|signs| {
        let mut state = SignState::new();
        for (var, sign) in VARS.iter().zip(signs) {
            if let Some(sign) = sign {
                state.set(*var, sign);
            }
        }
        state
    })
}

fn location_state() -> impl Strategy<Value = LocationState> {
    prop_oneof![
        4 => (0..3u32, any::<bool>()).prop_map(|(l, target)| LocationState::At {
            location: LocationId::new(l),
            target,
        }),
        1 => Just(LocationState::Top),
    ]
}

fn composite_state() -> impl Strategy<Value = CompositeState> {
    (location_state(), sign_state()).prop_map(|(l, s)| CompositeState::default().with(l).with(s))
}

fn composite_cpa() -> CompositeCpa {
    CompositeCpa::new()
        .with_component(LocationCpa::new([LocationId::new(2)]))
        .with_component(SignCpa::default())
}

/// Checks reflexivity, transitivity and the upper-bound property of `join`.
fn check_laws<S, D>(domain: &D, a: &S, b: &S, c: &S) -> Result<(), TestCaseError>
where
    S: std::fmt::Debug,
    D: AbstractDomain<S> + ?Sized,
{
    prop_assert!(domain.is_less_or_equal(a, a), "not reflexive: {:?}", a);
    if domain.is_less_or_equal(a, b) && domain.is_less_or_equal(b, c) {
        prop_assert!(domain.is_less_or_equal(a, c), "not transitive: {:?} {:?} {:?}", a, b, c);
    }
    let joined = domain.join(a, b);
    prop_assert!(domain.is_less_or_equal(a, &joined), "{:?} not below {:?}", a, joined);
    prop_assert!(domain.is_less_or_equal(b, &joined), "{:?} not below {:?}", b, joined);
    Ok(())
}

proptest! {
    #[test]
    fn sign_values_form_a_lattice(a in sign(), b in sign(), c in sign()) {
        prop_assert!(a.le(a));
        if a.le(b) && b.le(c) {
            prop_assert!(a.le(c));
        }
        prop_assert!(a.le(a.join(b)) && b.le(a.join(b)));
        prop_assert_eq!(a.join(b), b.join(a));
        prop_assert!(a.meet(b).le(a) && a.meet(b).le(b));
    }

    #[test]
    fn sign_domain_laws(a in sign_state(), b in sign_state(), c in sign_state()) {
        check_laws(&SignDomain, &a, &b, &c)?;
    }

    #[test]
    fn location_domain_laws(a in location_state(), b in location_state(), c in location_state()) {
        check_laws(&LocationDomain, &a, &b, &c)?;
    }

    #[test]
    fn composite_domain_laws(a in composite_state(), b in composite_state(), c in composite_state()) {
        let cpa = composite_cpa();
        check_laws(cpa.domain(), &a, &b, &c)?;
    }

    #[test]
    fn stop_sep_witness_dominates(state in sign_state(), reached in prop::collection::vec(sign_state(), 0..5)) {
        let refs: Vec<&SignState> = reached.iter().collect();
        if let Some(coverage) = StopSep.stop(&SignDomain, &state, &refs, &SignPrecision::Full) {
            let Coverage::By(i) = coverage else {
                return Err(TestCaseError::fail("stop-sep never covers by a join"));
            };
            prop_assert!(SignDomain.is_less_or_equal(&state, refs[i]));
        } else {
            prop_assert!(refs.iter().all(|r| !SignDomain.is_less_or_equal(&state, r)));
        }
    }

    #[test]
    fn composite_stop_witness_dominates(
        state in composite_state(),
        reached in prop::collection::vec(composite_state(), 0..5),
    ) {
        let cpa = composite_cpa();
        let precision = cpa.initial_precision(LocationId::new(0));
        let refs: Vec<&CompositeState> = reached.iter().collect();
        if let Some(Coverage::By(i)) = cpa.stop_operator().stop(cpa.domain(), &state, &refs, &precision) {
            prop_assert!(cpa.domain().is_less_or_equal(&state, refs[i]));
        }
    }

    #[test]
    fn sign_precision_refinement_is_monotone(
        initial in prop::collection::vec((0..4u32, 0..3usize), 0..6),
        facts in prop::collection::vec((0..4u32, 0..3usize, -2..3i64), 0..6),
    ) {
        let precision = SignPrecision::localized(initial.iter().map(|&(l, v)| (LocationId::new(l), VARS[v])));
        let mut increment = PrecisionIncrement::new();
        for &(l, v, c) in &facts {
            increment.add(LocationId::new(l), Expr::var(VARS[v]).ge(Expr::constant(c)));
        }
        let refined = precision.refine(&increment);
        prop_assert!(precision.is_subsumed_by(&refined));
        for &(l, v, _) in &facts {
            prop_assert!(refined.tracks(LocationId::new(l), VARS[v]));
        }
        prop_assert_eq!(refined.refine(&increment), refined.clone());
    }
}
