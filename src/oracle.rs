//! Interval-based path feasibility checker.
//!
//! [`IntervalPathChecker`] is a lightweight stand-in for an SMT-backed
//! [`FeasibilityChecker`]. It propagates variable intervals along a
//! counterexample path:
//!
//! - if some assumption becomes unsatisfiable, the path is **infeasible** and
//!   interpolants are read off the intervals of the variables the contradiction
//!   depends on (a backward slice from the failing assumption),
//! - otherwise it builds a candidate input assignment from the intervals and
//!   replays the path concretely; if the replay succeeds the path is
//!   **feasible** with that model.
//!
//! Non-relational reasoning is incomplete: a path whose infeasibility hinges on
//! a relation between variables may be neither refuted nor replayed, which is
//! reported as a [`CpaError::Feasibility`] error.

use std::cmp::{max, min};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use log::debug;

use crate::cegar::{Feasibility, FeasibilityChecker, Interpolant, Model};
use crate::cfa::{Edge, EdgeEffect};
use crate::error::{CpaError, Result};
use crate::expr::{CmpOp, Cond, Expr};
use crate::path::CounterexamplePath;

/// Bound of an interval: -∞, finite value, or +∞.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Bound {
    NegInf,
    Finite(i64),
    PosInf,
}

impl Bound {
    pub fn as_finite(&self) -> Option<i64> {
        match self {
            Bound::Finite(n) => Some(*n),
            _ => None,
        }
    }

    fn signum(&self) -> i64 {
        match self {
            Bound::NegInf => -1,
            Bound::Finite(n) => n.signum(),
            Bound::PosInf => 1,
        }
    }

    fn infinite(sign: i64) -> Bound {
        if sign < 0 {
            Bound::NegInf
        } else {
            Bound::PosInf
        }
    }

    /// Sum of two bounds of the same kind (both lower or both upper).
    pub fn add(&self, other: &Bound) -> Bound {
        match (self, other) {
            (Bound::Finite(a), Bound::Finite(b)) => a.checked_add(*b).map_or(Bound::infinite(a.signum()), Bound::Finite),
            (Bound::NegInf, _) | (_, Bound::NegInf) => Bound::NegInf,
            (Bound::PosInf, _) | (_, Bound::PosInf) => Bound::PosInf,
        }
    }

    pub fn mul(&self, other: &Bound) -> Bound {
        match (self, other) {
            (Bound::Finite(a), Bound::Finite(b)) => a
                .checked_mul(*b)
                .map_or(Bound::infinite(a.signum() * b.signum()), Bound::Finite),
            (Bound::Finite(0), _) | (_, Bound::Finite(0)) => Bound::Finite(0),
            _ => Bound::infinite(self.signum() * other.signum()),
        }
    }

    pub fn neg(&self) -> Bound {
        match self {
            Bound::NegInf => Bound::PosInf,
            Bound::Finite(n) => n.checked_neg().map_or(Bound::PosInf, Bound::Finite),
            Bound::PosInf => Bound::NegInf,
        }
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::NegInf => write!(f, "-∞"),
            Bound::Finite(n) => write!(f, "{}", n),
            Bound::PosInf => write!(f, "+∞"),
        }
    }
}

/// Interval: [low, high].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interval {
    pub low: Bound,
    pub high: Bound,
}

impl Interval {
    pub fn new(low: Bound, high: Bound) -> Self {
        if low > high {
            Self::bottom()
        } else {
            Self { low, high }
        }
    }

    pub fn constant(value: i64) -> Self {
        Self {
            low: Bound::Finite(value),
            high: Bound::Finite(value),
        }
    }

    pub fn top() -> Self {
        Self {
            low: Bound::NegInf,
            high: Bound::PosInf,
        }
    }

    pub fn bottom() -> Self {
        Self {
            low: Bound::PosInf,
            high: Bound::NegInf,
        }
    }

    pub fn at_most(high: i64) -> Self {
        Self::new(Bound::NegInf, Bound::Finite(high))
    }

    pub fn at_least(low: i64) -> Self {
        Self::new(Bound::Finite(low), Bound::PosInf)
    }

    pub fn is_empty(&self) -> bool {
        self.low > self.high
    }

    pub fn is_top(&self) -> bool {
        *self == Self::top()
    }

    pub fn contains(&self, value: i64) -> bool {
        self.low <= Bound::Finite(value) && Bound::Finite(value) <= self.high
    }

    pub fn join(&self, other: &Interval) -> Interval {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Interval {
            low: min(self.low, other.low),
            high: max(self.high, other.high),
        }
    }

    pub fn meet(&self, other: &Interval) -> Interval {
        Interval::new(max(self.low, other.low), min(self.high, other.high))
    }

    pub fn add(&self, other: &Interval) -> Interval {
        if self.is_empty() || other.is_empty() {
            return Interval::bottom();
        }
        Interval::new(self.low.add(&other.low), self.high.add(&other.high))
    }

    pub fn neg(&self) -> Interval {
        if self.is_empty() {
            return Interval::bottom();
        }
        Interval::new(self.high.neg(), self.low.neg())
    }

    pub fn sub(&self, other: &Interval) -> Interval {
        self.add(&other.neg())
    }

    pub fn mul(&self, other: &Interval) -> Interval {
        if self.is_empty() || other.is_empty() {
            return Interval::bottom();
        }
        let corners = [
            self.low.mul(&other.low),
            self.low.mul(&other.high),
            self.high.mul(&other.low),
            self.high.mul(&other.high),
        ];
        Interval::new(
            corners.iter().copied().min().unwrap_or(Bound::NegInf),
            corners.iter().copied().max().unwrap_or(Bound::PosInf),
        )
    }

    /// The element closest to zero.
    pub fn witness(&self) -> Option<i64> {
        if self.is_empty() {
            return None;
        }
        if self.contains(0) {
            return Some(0);
        }
        match (self.low, self.high) {
            (Bound::Finite(l), _) if l > 0 => Some(l),
            (_, Bound::Finite(h)) => Some(h),
            _ => None,
        }
    }

    /// Atoms describing `var ∈ self`.
    fn atoms(&self, var: &str) -> Vec<Cond> {
        match (self.low, self.high) {
            (Bound::Finite(l), Bound::Finite(h)) if l == h => vec![Expr::var(var).eq(Expr::constant(l))],
            (low, high) => {
                let mut atoms = Vec::new();
                if let Bound::Finite(l) = low {
                    atoms.push(Expr::var(var).ge(Expr::constant(l)));
                }
                if let Bound::Finite(h) = high {
                    atoms.push(Expr::var(var).le(Expr::constant(h)));
                }
                atoms
            }
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "⊥");
        }
        write!(f, "[{}, {}]", self.low, self.high)
    }
}

/// Variable intervals; missing variables are unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct IntervalEnv {
    intervals: BTreeMap<String, Interval>,
}

impl IntervalEnv {
    fn get(&self, var: &str) -> Interval {
        self.intervals.get(var).copied().unwrap_or(Interval::top())
    }

    fn set(&mut self, var: &str, interval: Interval) {
        if interval.is_top() {
            self.intervals.remove(var);
        } else {
            self.intervals.insert(var.to_string(), interval);
        }
    }

    fn eval(&self, expr: &Expr) -> Interval {
        match expr {
            Expr::Var(v) => self.get(v),
            Expr::Const(c) => Interval::constant(*c),
            Expr::Add(a, b) => self.eval(a).add(&self.eval(b)),
            Expr::Sub(a, b) => self.eval(a).sub(&self.eval(b)),
            Expr::Mul(a, b) => self.eval(a).mul(&self.eval(b)),
            Expr::Neg(e) => self.eval(e).neg(),
        }
    }

    fn join(&self, other: &IntervalEnv) -> IntervalEnv {
        let mut result = IntervalEnv::default();
        for (var, a) in &self.intervals {
            if let Some(b) = other.intervals.get(var) {
                result.set(var, a.join(b));
            }
        }
        result
    }

    /// Restricts the environment to states satisfying `cond`. `None` if none do.
    fn assume(&self, cond: &Cond) -> Option<IntervalEnv> {
        match cond {
            Cond::True => Some(self.clone()),
            Cond::False => None,
            Cond::Cmp(op, a, b) => self.assume_cmp(*op, a, b),
            Cond::And(a, b) => self.assume(a)?.assume(b),
            Cond::Or(a, b) => match (self.assume(a), self.assume(b)) {
                (Some(x), Some(y)) => Some(x.join(&y)),
                (Some(x), None) | (None, Some(x)) => Some(x),
                (None, None) => None,
            },
            // Only reachable for conditions not in negation normal form.
            Cond::Not(_) => Some(self.clone()),
        }
    }

    fn assume_cmp(&self, op: CmpOp, a: &Expr, b: &Expr) -> Option<IntervalEnv> {
        let diff = self.eval(a).sub(&self.eval(b));
        let possible = match op {
            CmpOp::Eq => diff.contains(0),
            CmpOp::Ne => diff != Interval::constant(0),
            CmpOp::Lt => diff.low < Bound::Finite(0),
            CmpOp::Le => diff.low <= Bound::Finite(0),
            CmpOp::Gt => diff.high > Bound::Finite(0),
            CmpOp::Ge => diff.high >= Bound::Finite(0),
        };
        if diff.is_empty() || !possible {
            return None;
        }

        let mut result = self.clone();
        if let Expr::Var(x) = a {
            result.refine(x, op, self.eval(b))?;
        }
        if let Expr::Var(y) = b {
            let a_value = result.eval(a);
            result.refine(y, op.flip(), a_value)?;
        }
        Some(result)
    }

    /// Meets `var` with the values `v` such that `v op other` is possible.
    fn refine(&mut self, var: &str, op: CmpOp, other: Interval) -> Option<()> {
        let current = self.get(var);
        let allowed = match op {
            CmpOp::Eq => other,
            CmpOp::Ne => match other.low.as_finite().filter(|_| other.low == other.high) {
                Some(c) if current.low == Bound::Finite(c) => Interval::new(Bound::Finite(c.checked_add(1)?), current.high),
                Some(c) if current.high == Bound::Finite(c) => Interval::new(current.low, Bound::Finite(c.checked_sub(1)?)),
                _ => Interval::top(),
            },
            CmpOp::Lt => match other.high {
                Bound::Finite(h) => h.checked_sub(1).map_or(Interval::bottom(), Interval::at_most),
                bound => Interval::new(Bound::NegInf, bound),
            },
            CmpOp::Le => Interval::new(Bound::NegInf, other.high),
            CmpOp::Gt => match other.low {
                Bound::Finite(l) => l.checked_add(1).map_or(Interval::bottom(), Interval::at_least),
                bound => Interval::new(bound, Bound::PosInf),
            },
            CmpOp::Ge => Interval::new(other.low, Bound::PosInf),
        };
        let refined = current.meet(&allowed);
        if refined.is_empty() {
            return None;
        }
        self.set(var, refined);
        Some(())
    }
}

fn variables(cond: &Cond) -> BTreeSet<String> {
    let mut vars = BTreeSet::new();
    cond.variables(&mut vars);
    vars
}

fn expr_variables(expr: &Expr) -> BTreeSet<String> {
    let mut vars = BTreeSet::new();
    expr.variables(&mut vars);
    vars
}

/// Variables relevant before `edge`, given those relevant after it.
fn relevant_before(edge: &Edge, after: &BTreeSet<String>) -> BTreeSet<String> {
    fn substitute(relevant: &mut BTreeSet<String>, var: &str, expr: &Expr) {
        if relevant.remove(var) {
            relevant.extend(expr_variables(expr));
        }
    }

    let mut before = after.clone();
    match &edge.effect {
        EdgeEffect::Assign { var, expr }
        | EdgeEffect::Return {
            result: Some((var, expr)),
            ..
        } => substitute(&mut before, var, expr),
        EdgeEffect::Call { bindings, .. } => {
            for (param, arg) in bindings {
                substitute(&mut before, param, arg);
            }
        }
        EdgeEffect::Assume(cond) => {
            let vars = variables(cond);
            if !vars.is_disjoint(after) {
                before.extend(vars);
            }
        }
        EdgeEffect::Return { result: None, .. } | EdgeEffect::Nop => {}
    }
    before
}

/// Path checker based on interval propagation.
#[derive(Debug, Copy, Clone, Default)]
pub struct IntervalPathChecker;

impl IntervalPathChecker {
    pub fn new() -> Self {
        Self
    }

    /// Interpolants for a path refuted at `edges[failed]`.
    fn interpolants(&self, edges: &[Edge], envs: &[IntervalEnv], failed: usize) -> Vec<Interpolant> {
        let n = edges.len() + 1;
        let mut result = vec![Interpolant::bottom(); n];

        let mut relevant = match &edges[failed].effect {
            EdgeEffect::Assume(cond) => variables(cond),
            _ => BTreeSet::new(),
        };
        for i in (0..=failed).rev() {
            if i < failed {
                relevant = relevant_before(&edges[i], &relevant);
            }
            let env = &envs[i];
            result[i] = Interpolant::from_atoms(relevant.iter().flat_map(|var| env.get(var).atoms(var)));
        }
        result
    }

    /// Replays the path concretely, reading unassigned variables from `inputs`.
    fn replay(&self, edges: &[Edge], inputs: &BTreeMap<String, Interval>) -> Option<Model> {
        let mut model = Model::new();
        let mut env = BTreeMap::<String, i64>::new();
        let mut read = |vars: BTreeSet<String>, env: &mut BTreeMap<String, i64>| -> Option<()> {
            for var in vars {
                if !env.contains_key(&var) {
                    let value = inputs.get(&var).map_or(Some(0), |i| i.witness())?;
                    model.set(var.clone(), value);
                    env.insert(var, value);
                }
            }
            Some(())
        };

        for edge in edges {
            match &edge.effect {
                EdgeEffect::Assign { var, expr }
                | EdgeEffect::Return {
                    result: Some((var, expr)),
                    ..
                } => {
                    read(expr_variables(expr), &mut env)?;
                    let value = expr.eval(&env)?;
                    env.insert(var.clone(), value);
                }
                EdgeEffect::Call { bindings, .. } => {
                    let mut values = Vec::with_capacity(bindings.len());
                    for (param, arg) in bindings {
                        read(expr_variables(arg), &mut env)?;
                        values.push((param.clone(), arg.eval(&env)?));
                    }
                    env.extend(values);
                }
                EdgeEffect::Assume(cond) => {
                    read(variables(cond), &mut env)?;
                    if !cond.eval(&env)? {
                        return None;
                    }
                }
                EdgeEffect::Return { result: None, .. } | EdgeEffect::Nop => {}
            }
        }
        Some(model)
    }
}

impl FeasibilityChecker for IntervalPathChecker {
    fn check_path_feasibility(&self, path: &CounterexamplePath) -> Result<Feasibility> {
        let edges = path.edges();
        let mut envs = vec![IntervalEnv::default()];
        let mut assigned = BTreeSet::<String>::new();
        let mut inputs = BTreeMap::<String, Interval>::new();

        for (i, edge) in edges.iter().enumerate() {
            let env = &envs[i];
            let next = match &edge.effect {
                EdgeEffect::Assign { var, expr }
                | EdgeEffect::Return {
                    result: Some((var, expr)),
                    ..
                } => {
                    let mut next = env.clone();
                    next.set(var, env.eval(expr));
                    assigned.insert(var.clone());
                    next
                }
                EdgeEffect::Call { bindings, .. } => {
                    let mut next = env.clone();
                    for (param, arg) in bindings {
                        next.set(param, env.eval(arg));
                        assigned.insert(param.clone());
                    }
                    next
                }
                EdgeEffect::Assume(cond) => match env.assume(&cond.nnf()) {
                    Some(next) => {
                        for var in variables(cond).into_iter().filter(|v| !assigned.contains(v)) {
                            inputs.insert(var.clone(), next.get(&var));
                        }
                        next
                    }
                    None => {
                        debug!("Path is infeasible at {}", edge);
                        let interpolants = self.interpolants(edges, &envs, i);
                        return Ok(Feasibility::Infeasible(interpolants));
                    }
                },
                EdgeEffect::Return { result: None, .. } | EdgeEffect::Nop => env.clone(),
            };
            envs.push(next);
        }

        match self.replay(edges, &inputs) {
            Some(model) => Ok(Feasibility::Feasible(model)),
            None => Err(CpaError::Feasibility(format!(
                "cannot refute or replay path of length {}",
                path.len()
            ))),
        }
    }
}
