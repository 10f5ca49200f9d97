//! Program graphs and analyses shared by the integration tests.

#![allow(dead_code)]

use cpa_rs::cfa::{Cfa, CfaBuilder, EdgeEffect, LocationId};
use cpa_rs::config::{AnalysisConfig, MergePolicy, StopPolicy};
use cpa_rs::cpa::composite::{CompositeCpa, CompositeState};
use cpa_rs::cpa::sign::{Sign, SignState};
use cpa_rs::expr::{Cond, Expr};

pub struct Program {
    pub cfa: Cfa,
    pub entry: LocationId,
    pub err: LocationId,
    pub exit: Option<LocationId>,
}

fn gt(var: &str, c: i64) -> Cond {
    Expr::var(var).gt(Expr::constant(c))
}

fn le(var: &str, c: i64) -> Cond {
    Expr::var(var).le(Expr::constant(c))
}

/// `entry --[x > 0]--> err`, `entry --[x <= 0]--> exit`
pub fn branching() -> Program {
    let mut b = CfaBuilder::new();
    let entry = b.add_location("main");
    let err = b.add_location("main");
    let exit = b.add_location("main");
    b.add_edge(entry, err, EdgeEffect::Assume(gt("x", 0)));
    b.add_edge(entry, exit, EdgeEffect::Assume(le("x", 0)));
    Program {
        cfa: b.build(entry).unwrap(),
        entry,
        err,
        exit: Some(exit),
    }
}

/// [`branching`] with an extra edge `entry --[x < 0]--> exit`, taken before the `x <= 0` one.
pub fn branching_twice_to_exit() -> Program {
    let mut b = CfaBuilder::new();
    let entry = b.add_location("main");
    let err = b.add_location("main");
    let exit = b.add_location("main");
    b.add_edge(entry, err, EdgeEffect::Assume(gt("x", 0)));
    b.add_edge(entry, exit, EdgeEffect::Assume(Expr::var("x").lt(Expr::constant(0))));
    b.add_edge(entry, exit, EdgeEffect::Assume(le("x", 0)));
    Program {
        cfa: b.build(entry).unwrap(),
        entry,
        err,
        exit: Some(exit),
    }
}

/// `entry --[x > 0]--> l1 --[x <= 0]--> err`
pub fn contradicting() -> Program {
    let mut b = CfaBuilder::new();
    let entry = b.add_location("main");
    let l1 = b.add_location("main");
    let err = b.add_location("main");
    b.add_edge(entry, l1, EdgeEffect::Assume(gt("x", 0)));
    b.add_edge(l1, err, EdgeEffect::Assume(le("x", 0)));
    Program {
        cfa: b.build(entry).unwrap(),
        entry,
        err,
        exit: None,
    }
}

/// `entry --nop--> exit` where `entry` itself is the error location.
pub fn error_at_entry() -> Program {
    let mut b = CfaBuilder::new();
    let entry = b.add_location("main");
    let exit = b.add_location("main");
    b.add_edge(entry, exit, EdgeEffect::Nop);
    Program {
        cfa: b.build(entry).unwrap(),
        entry,
        err: entry,
        exit: Some(exit),
    }
}

/// Counting loop whose error branch needs `x < 0` after `x := 1`:
///
/// ```text
/// entry --x := 1--> head --[x < 10]--> body --x := x + 1--> head
///                   head --[x >= 10]--> exit
///                   head --[x < 0]--> err
/// ```
pub fn counting_loop() -> Program {
    let mut b = CfaBuilder::new();
    let entry = b.add_location("main");
    let head = b.add_location("main");
    let body = b.add_location("main");
    let exit = b.add_location("main");
    let err = b.add_location("main");
    b.add_edge(
        entry,
        head,
        EdgeEffect::Assign {
            var: "x".to_string(),
            expr: Expr::constant(1),
        },
    );
    b.add_edge(head, body, EdgeEffect::Assume(Expr::var("x").lt(Expr::constant(10))));
    b.add_edge(
        body,
        head,
        EdgeEffect::Assign {
            var: "x".to_string(),
            expr: Expr::var("x").add(Expr::constant(1)),
        },
    );
    b.add_edge(head, exit, EdgeEffect::Assume(Expr::var("x").ge(Expr::constant(10))));
    b.add_edge(head, err, EdgeEffect::Assume(Expr::var("x").lt(Expr::constant(0))));
    Program {
        cfa: b.build(entry).unwrap(),
        entry,
        err,
        exit: Some(exit),
    }
}

/// Location analysis targeting `err`, plus a sign analysis tracking every variable.
pub fn precise_cpa(err: LocationId, merge: MergePolicy, stop: StopPolicy) -> CompositeCpa {
    AnalysisConfig::new()
        .with_merge(merge)
        .with_stop(stop)
        .with_track_all_variables(true)
        .reference_cpa([err])
}

/// Location analysis targeting `err`, plus a sign analysis that tracks nothing until refined.
pub fn lazy_cpa(err: LocationId) -> CompositeCpa {
    AnalysisConfig::new().reference_cpa([err])
}

/// Sign of `var` in the sign component of a composite state.
pub fn sign_of(state: &CompositeState, var: &str) -> Sign {
    state.find::<SignState>().map_or(Sign::Top, |s| s.get(var))
}
