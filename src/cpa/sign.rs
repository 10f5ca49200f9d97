//! Sign analysis with a variable-tracking precision.
//!
//! The sign domain tracks the sign of every integer variable, providing a
//! coarse but very cheap abstraction. Which variables are tracked at which
//! location is controlled by a [`SignPrecision`]: variables that are not
//! tracked at a location are forgotten there (lazy abstraction), and CEGAR
//! refinement adds the variables mentioned by interpolants.
//!
//! # Elements
//!
//! The lattice has 8 elements representing sign properties:
//! - `⊥` (Bottom): impossible/unreachable
//! - `-` (Neg): strictly negative
//! - `0` (Zero): exactly zero
//! - `+` (Pos): strictly positive
//! - `≤0` (NonPos): zero or negative
//! - `≥0` (NonNeg): zero or positive
//! - `≠0` (NonZero): negative or positive
//! - `⊤` (Top): any value
//!
//! # Lattice Structure
//!
//! ```text
//!           ⊤
//!       /   |   \
//!     ≤0   ≠0   ≥0
//!    / \  / \  / \
//!   -   0   +
//!    \  |  /
//!       ⊥
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

use log::debug;

use crate::cfa::{Edge, EdgeEffect, LocationId};
use crate::cpa::merge::MergePolicy;
use crate::cpa::stop::StopPolicy;
use crate::cpa::{
    AbstractDomain, AbstractState, Action, Adjustment, AdjustmentContext, ConfigurableProgramAnalysis, MergeOperator,
    Precision, PrecisionAdjustment, PrecisionIncrement, StopOperator, TransferRelation,
};
use crate::error::Result;
use crate::expr::{CmpOp, Cond, Expr};

/// Sign values representing abstract sign properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sign {
    /// Bottom (`⊥`): impossible/unreachable
    Bottom,
    /// Strictly negative (`< 0`)
    Neg,
    /// Exactly zero (`= 0`)
    Zero,
    /// Strictly positive (`> 0`)
    Pos,
    /// Non-positive (`≤ 0`): `Zero ∪ Neg`
    NonPos,
    /// Non-negative (`≥ 0`): `Zero ∪ Pos`
    NonNeg,
    /// Non-zero (`≠ 0`): `Neg ∪ Pos`
    NonZero,
    /// Top (`⊤`): any value
    Top,
}

impl Sign {
    pub const ALL: [Sign; 8] = [
        Sign::Bottom,
        Sign::Neg,
        Sign::Zero,
        Sign::Pos,
        Sign::NonPos,
        Sign::NonNeg,
        Sign::NonZero,
        Sign::Top,
    ];

    /// Check if sign contains negative values.
    pub fn has_negative(self) -> bool {
        matches!(self, Sign::Neg | Sign::NonPos | Sign::NonZero | Sign::Top)
    }

    /// Check if sign contains zero.
    pub fn has_zero(self) -> bool {
        matches!(self, Sign::Zero | Sign::NonPos | Sign::NonNeg | Sign::Top)
    }

    /// Check if sign contains positive values.
    pub fn has_positive(self) -> bool {
        matches!(self, Sign::Pos | Sign::NonNeg | Sign::NonZero | Sign::Top)
    }

    /// Build a sign from the parts it contains.
    pub fn from_parts(negative: bool, zero: bool, positive: bool) -> Self {
        match (negative, zero, positive) {
            (false, false, false) => Sign::Bottom,
            (true, false, false) => Sign::Neg,
            (false, true, false) => Sign::Zero,
            (false, false, true) => Sign::Pos,
            (true, true, false) => Sign::NonPos,
            (false, true, true) => Sign::NonNeg,
            (true, false, true) => Sign::NonZero,
            (true, true, true) => Sign::Top,
        }
    }

    /// Create sign from a concrete value.
    pub fn from_value(v: i64) -> Self {
        match v.cmp(&0) {
            std::cmp::Ordering::Less => Sign::Neg,
            std::cmp::Ordering::Equal => Sign::Zero,
            std::cmp::Ordering::Greater => Sign::Pos,
        }
    }

    pub fn contains(self, v: i64) -> bool {
        Sign::from_value(v).le(self)
    }

    /// Over-approximation of `{ x | x op c }`.
    pub fn satisfying(op: CmpOp, c: i64) -> Sign {
        match op {
            CmpOp::Eq => Sign::from_value(c),
            CmpOp::Ne if c == 0 => Sign::NonZero,
            CmpOp::Ne => Sign::Top,
            CmpOp::Gt if c >= 0 => Sign::Pos,
            CmpOp::Gt if c == -1 => Sign::NonNeg,
            CmpOp::Ge if c > 0 => Sign::Pos,
            CmpOp::Ge if c == 0 => Sign::NonNeg,
            CmpOp::Lt if c <= 0 => Sign::Neg,
            CmpOp::Lt if c == 1 => Sign::NonPos,
            CmpOp::Le if c < 0 => Sign::Neg,
            CmpOp::Le if c == 0 => Sign::NonPos,
            CmpOp::Gt | CmpOp::Ge | CmpOp::Lt | CmpOp::Le => Sign::Top,
        }
    }

    /// Partial order on signs: `self ⊑ other`.
    pub fn le(self, other: Sign) -> bool {
        (!self.has_negative() || other.has_negative())
            && (!self.has_zero() || other.has_zero())
            && (!self.has_positive() || other.has_positive())
    }

    /// Join (least upper bound) on signs.
    pub fn join(self, other: Sign) -> Sign {
        Sign::from_parts(
            self.has_negative() || other.has_negative(),
            self.has_zero() || other.has_zero(),
            self.has_positive() || other.has_positive(),
        )
    }

    /// Meet (greatest lower bound) on signs.
    pub fn meet(self, other: Sign) -> Sign {
        Sign::from_parts(
            self.has_negative() && other.has_negative(),
            self.has_zero() && other.has_zero(),
            self.has_positive() && other.has_positive(),
        )
    }

    fn parts(self) -> impl Iterator<Item = Sign> {
        [
            (self.has_negative(), Sign::Neg),
            (self.has_zero(), Sign::Zero),
            (self.has_positive(), Sign::Pos),
        ]
        .into_iter()
        .filter_map(|(present, s)| present.then_some(s))
    }

    /// Lifts an operation on the atomic signs `-`, `0`, `+` to all signs.
    fn lift(self, other: Sign, op: impl Fn(Sign, Sign) -> Sign) -> Sign {
        let mut result = Sign::Bottom;
        for a in self.parts() {
            for b in other.parts() {
                result = result.join(op(a, b));
            }
        }
        result
    }

    /// Addition on signs.
    pub fn add(self, other: Sign) -> Sign {
        use Sign::*;
        self.lift(other, |a, b| match (a, b) {
            (Zero, s) | (s, Zero) => s,
            (Pos, Pos) => Pos,
            (Neg, Neg) => Neg,
            // Opposite signs: anything
            _ => Top,
        })
    }

    /// Subtraction on signs.
    pub fn sub(self, other: Sign) -> Sign {
        self.add(other.neg())
    }

    /// Multiplication on signs.
    pub fn mul(self, other: Sign) -> Sign {
        use Sign::*;
        self.lift(other, |a, b| match (a, b) {
            (Zero, _) | (_, Zero) => Zero,
            (Pos, Pos) | (Neg, Neg) => Pos,
            _ => Neg,
        })
    }

    /// Negation on signs.
    pub fn neg(self) -> Sign {
        use Sign::*;
        match self {
            Bottom => Bottom,
            Neg => Pos,
            Zero => Zero,
            Pos => Neg,
            NonPos => NonNeg,
            NonNeg => NonPos,
            NonZero => NonZero,
            Top => Top,
        }
    }
}

impl fmt::Display for Sign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sign::Bottom => write!(f, "⊥"),
            Sign::Neg => write!(f, "-"),
            Sign::Zero => write!(f, "0"),
            Sign::Pos => write!(f, "+"),
            Sign::NonPos => write!(f, "≤0"),
            Sign::NonNeg => write!(f, "≥0"),
            Sign::NonZero => write!(f, "≠0"),
            Sign::Top => write!(f, "⊤"),
        }
    }
}

/// Abstract state of the sign analysis: variables mapped to signs.
///
/// Variables without an entry are `⊤`. Entries are never `⊤` or `⊥`, so
/// structural equality coincides with semantic equality.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SignState {
    signs: BTreeMap<String, Sign>,
}

impl SignState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the sign of a variable (returns Top if not defined).
    pub fn get(&self, var: &str) -> Sign {
        self.signs.get(var).copied().unwrap_or(Sign::Top)
    }

    /// Set the sign of a variable.
    pub fn set(&mut self, var: impl Into<String>, sign: Sign) {
        debug_assert_ne!(sign, Sign::Bottom, "bottom signs are represented by the absence of a state");
        let var = var.into();
        if sign == Sign::Top {
            self.signs.remove(&var);
        } else {
            self.signs.insert(var, sign);
        }
    }

    /// Drops all information about `var`.
    pub fn forget(&mut self, var: &str) {
        self.signs.remove(var);
    }

    /// Variables with a non-trivial sign.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.signs.keys().map(|v| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.signs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signs.is_empty()
    }

    /// Evaluate an expression to a sign.
    pub fn eval(&self, expr: &Expr) -> Sign {
        match expr {
            Expr::Var(v) => self.get(v),
            Expr::Const(n) => Sign::from_value(*n),
            Expr::Add(e1, e2) => self.eval(e1).add(self.eval(e2)),
            Expr::Sub(e1, e2) => self.eval(e1).sub(self.eval(e2)),
            Expr::Mul(e1, e2) => {
                // Special case: x * x is always non-negative
                if let (Expr::Var(v1), Expr::Var(v2)) = (e1.as_ref(), e2.as_ref()) {
                    if v1 == v2 {
                        let s = self.get(v1);
                        return s.mul(s).meet(Sign::NonNeg);
                    }
                }
                self.eval(e1).mul(self.eval(e2))
            }
            Expr::Neg(e) => self.eval(e).neg(),
        }
    }

    /// Restricts the state to the executions satisfying `cond`.
    ///
    /// Returns `None` if no execution can satisfy it.
    pub fn assume(&self, cond: &Cond) -> Option<SignState> {
        self.assume_nnf(&cond.nnf())
    }

    fn assume_nnf(&self, cond: &Cond) -> Option<SignState> {
        match cond {
            Cond::True => Some(self.clone()),
            Cond::False => None,
            Cond::And(a, b) => self.assume_nnf(a)?.assume_nnf(b),
            Cond::Or(a, b) => match (self.assume_nnf(a), self.assume_nnf(b)) {
                (Some(x), Some(y)) => Some(SignDomain.join(&x, &y)),
                (x, None) => x,
                (None, y) => y,
            },
            Cond::Cmp(op, lhs, rhs) => self.assume_cmp(*op, lhs, rhs),
            // Only reachable for conditions not in negation normal form.
            Cond::Not(_) => Some(self.clone()),
        }
    }

    fn assume_cmp(&self, op: CmpOp, lhs: &Expr, rhs: &Expr) -> Option<SignState> {
        match (lhs, rhs) {
            (Expr::Var(v), Expr::Const(c)) => return self.refine_var(v, Sign::satisfying(op, *c)),
            (Expr::Const(c), Expr::Var(v)) => return self.refine_var(v, Sign::satisfying(op.flip(), *c)),
            _ => {}
        }
        // lhs op rhs  <=>  lhs - rhs op 0
        let diff = self.eval(lhs).sub(self.eval(rhs));
        if diff.meet(Sign::satisfying(op, 0)) == Sign::Bottom {
            None
        } else {
            Some(self.clone())
        }
    }

    fn refine_var(&self, var: &str, region: Sign) -> Option<SignState> {
        let refined = self.get(var).meet(region);
        if refined == Sign::Bottom {
            return None;
        }
        let mut result = self.clone();
        result.set(var, refined);
        Some(result)
    }
}

impl AbstractState for SignState {}

impl fmt::Display for SignState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (var, sign)) in self.signs.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", var, sign)?;
        }
        write!(f, "}}")
    }
}

/// Pointwise sign lattice over variable maps.
#[derive(Debug, Copy, Clone, Default)]
pub struct SignDomain;

impl AbstractDomain<SignState> for SignDomain {
    fn join(&self, a: &SignState, b: &SignState) -> SignState {
        // Variables missing on either side are Top in the join.
        let mut result = SignState::new();
        for (var, &s1) in &a.signs {
            if let Some(&s2) = b.signs.get(var) {
                result.set(var.clone(), s1.join(s2));
            }
        }
        result
    }

    fn is_less_or_equal(&self, a: &SignState, b: &SignState) -> bool {
        b.signs.iter().all(|(var, &s2)| a.get(var).le(s2))
    }
}

/// Which variables the sign analysis tracks, per location.
///
/// Localized precisions share unchanged per-location sets between
/// refinements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignPrecision {
    /// Track every variable everywhere.
    Full,
    /// Track only the listed variables at each location.
    Localized(Rc<BTreeMap<LocationId, Rc<BTreeSet<String>>>>),
}

impl SignPrecision {
    /// Localized precision that tracks nothing.
    pub fn empty() -> Self {
        SignPrecision::Localized(Rc::new(BTreeMap::new()))
    }

    /// Localized precision from explicit `(location, variable)` pairs.
    pub fn localized<I, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (LocationId, V)>,
        V: Into<String>,
    {
        let mut map = BTreeMap::<LocationId, BTreeSet<String>>::new();
        for (location, var) in pairs {
            map.entry(location).or_default().insert(var.into());
        }
        SignPrecision::Localized(Rc::new(map.into_iter().map(|(l, vars)| (l, Rc::new(vars))).collect()))
    }

    pub fn tracks(&self, location: LocationId, var: &str) -> bool {
        match self {
            SignPrecision::Full => true,
            SignPrecision::Localized(map) => map.get(&location).is_some_and(|vars| vars.contains(var)),
        }
    }

    /// Tracked variables at `location`, or `None` if everything is tracked.
    pub fn tracked_at(&self, location: LocationId) -> Option<&BTreeSet<String>> {
        static EMPTY: BTreeSet<String> = BTreeSet::new();
        match self {
            SignPrecision::Full => None,
            SignPrecision::Localized(map) => Some(map.get(&location).map_or(&EMPTY, |vars| vars.as_ref())),
        }
    }

    /// Whether `other` tracks everything this precision tracks.
    pub fn is_subsumed_by(&self, other: &SignPrecision) -> bool {
        match (self, other) {
            (_, SignPrecision::Full) => true,
            (SignPrecision::Full, SignPrecision::Localized(_)) => false,
            (SignPrecision::Localized(mine), SignPrecision::Localized(theirs)) => mine
                .iter()
                .all(|(loc, vars)| vars.is_empty() || theirs.get(loc).is_some_and(|t| vars.is_subset(t))),
        }
    }

    /// Adds the variables mentioned by `increment` at each of its locations.
    pub fn refine(&self, increment: &PrecisionIncrement) -> SignPrecision {
        let SignPrecision::Localized(map) = self else {
            return SignPrecision::Full;
        };
        let mut refined = (**map).clone();
        let mut changed = false;
        for location in increment.locations() {
            let vars = increment.variables_at(location);
            if vars.is_empty() {
                continue;
            }
            let entry = refined.entry(location).or_default();
            if !vars.is_subset(&**entry) {
                let mut extended = (**entry).clone();
                extended.extend(vars);
                *entry = Rc::new(extended);
                changed = true;
            }
        }
        if changed {
            SignPrecision::Localized(Rc::new(refined))
        } else {
            self.clone()
        }
    }
}

impl Precision for SignPrecision {}

impl fmt::Display for SignPrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignPrecision::Full => write!(f, "full"),
            SignPrecision::Localized(map) => {
                write!(f, "{{")?;
                for (i, (loc, vars)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: [", loc)?;
                    for (j, var) in vars.iter().enumerate() {
                        if j > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", var)?;
                    }
                    write!(f, "]")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Sign transfer relation.
#[derive(Debug, Copy, Clone, Default)]
pub struct SignTransferRelation;

impl TransferRelation<SignState, SignPrecision> for SignTransferRelation {
    fn successors(&self, state: &SignState, _precision: &SignPrecision, edge: &Edge) -> Result<Vec<SignState>> {
        let successor = match &edge.effect {
            EdgeEffect::Assign { var, expr } => {
                let mut next = state.clone();
                next.set(var.clone(), state.eval(expr));
                Some(next)
            }
            EdgeEffect::Assume(cond) => state.assume(cond),
            EdgeEffect::Call { bindings, .. } => {
                let values: Vec<_> = bindings.iter().map(|(param, arg)| (param, state.eval(arg))).collect();
                let mut next = state.clone();
                for (param, sign) in values {
                    next.set(param.clone(), sign);
                }
                Some(next)
            }
            EdgeEffect::Return { result: Some((var, expr)), .. } => {
                let mut next = state.clone();
                next.set(var.clone(), state.eval(expr));
                Some(next)
            }
            EdgeEffect::Return { result: None, .. } | EdgeEffect::Nop => Some(state.clone()),
        };
        if successor.is_none() {
            debug!("Edge {} is infeasible from {}", edge, state);
        }
        Ok(successor.into_iter().collect())
    }
}

/// Forgets variables the precision does not track at the state's location.
#[derive(Debug, Copy, Clone, Default)]
pub struct SignPrecisionAdjustment;

impl PrecisionAdjustment<SignState, SignPrecision> for SignPrecisionAdjustment {
    fn adjust(
        &self,
        state: &SignState,
        precision: &SignPrecision,
        context: &AdjustmentContext,
    ) -> Result<Adjustment<SignState, SignPrecision>> {
        let mut adjusted = state.clone();
        if let Some(tracked) = context.location.and_then(|loc| precision.tracked_at(loc)) {
            adjusted.signs.retain(|var, _| tracked.contains(var));
        }
        Ok(Adjustment {
            state: adjusted,
            precision: precision.clone(),
            action: Action::Continue,
        })
    }
}

/// Sign CPA.
///
/// Does not track locations; combine it with a
/// [`LocationCpa`][crate::cpa::location::LocationCpa] in a
/// [`CompositeCpa`][crate::cpa::composite::CompositeCpa].
pub struct SignCpa {
    merge: Box<dyn MergeOperator<SignState, SignPrecision>>,
    stop: Box<dyn StopOperator<SignState, SignPrecision>>,
    initial_precision: SignPrecision,
}

impl SignCpa {
    /// Sign CPA with the given operators, tracking every variable.
    pub fn new(merge: MergePolicy, stop: StopPolicy) -> Self {
        Self {
            merge: merge.operator(),
            stop: stop.operator(),
            initial_precision: SignPrecision::Full,
        }
    }

    pub fn with_initial_precision(mut self, precision: SignPrecision) -> Self {
        self.initial_precision = precision;
        self
    }
}

impl Default for SignCpa {
    fn default() -> Self {
        Self::new(MergePolicy::Sep, StopPolicy::Sep)
    }
}

impl ConfigurableProgramAnalysis for SignCpa {
    type State = SignState;
    type Precision = SignPrecision;

    fn domain(&self) -> &dyn AbstractDomain<SignState> {
        &SignDomain
    }

    fn transfer_relation(&self) -> &dyn TransferRelation<SignState, SignPrecision> {
        &SignTransferRelation
    }

    fn merge_operator(&self) -> &dyn MergeOperator<SignState, SignPrecision> {
        self.merge.as_ref()
    }

    fn stop_operator(&self) -> &dyn StopOperator<SignState, SignPrecision> {
        self.stop.as_ref()
    }

    fn precision_adjustment(&self) -> &dyn PrecisionAdjustment<SignState, SignPrecision> {
        &SignPrecisionAdjustment
    }

    fn initial_state(&self, _entry: LocationId) -> SignState {
        SignState::new()
    }

    fn initial_precision(&self, _entry: LocationId) -> SignPrecision {
        self.initial_precision.clone()
    }

    fn refine_precision(&self, precision: &SignPrecision, increment: &PrecisionIncrement) -> SignPrecision {
        precision.refine(increment)
    }

    fn refines_at(&self, precision: &SignPrecision, increment: &PrecisionIncrement, location: LocationId) -> bool {
        precision
            .tracked_at(location)
            .is_some_and(|tracked| !increment.variables_at(location).is_subset(tracked))
    }
}
