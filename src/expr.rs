//! Integer expressions and conditions carried by CFA edges.
//!
//! These are the payloads of [`EdgeEffect`][crate::cfa::EdgeEffect]s and the
//! atoms of [`Interpolant`][crate::cegar::Interpolant]s. They are deliberately
//! small: the engine never interprets them itself, only the analyses and the
//! feasibility oracle do.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Integer expression over named program variables.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Expr {
    /// Variable reference
    Var(String),
    /// Constant value
    Const(i64),
    /// Addition: e1 + e2
    Add(Box<Expr>, Box<Expr>),
    /// Subtraction: e1 - e2
    Sub(Box<Expr>, Box<Expr>),
    /// Multiplication: e1 * e2
    Mul(Box<Expr>, Box<Expr>),
    /// Negation: -e
    Neg(Box<Expr>),
}

impl Expr {
    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var(name.into())
    }

    pub fn constant(value: i64) -> Self {
        Expr::Const(value)
    }

    pub fn add(self, other: Self) -> Self {
        Expr::Add(Box::new(self), Box::new(other))
    }

    pub fn sub(self, other: Self) -> Self {
        Expr::Sub(Box::new(self), Box::new(other))
    }

    pub fn mul(self, other: Self) -> Self {
        Expr::Mul(Box::new(self), Box::new(other))
    }

    pub fn neg(self) -> Self {
        Expr::Neg(Box::new(self))
    }

    pub fn eq(self, other: Self) -> Cond {
        Cond::Cmp(CmpOp::Eq, self, other)
    }

    pub fn ne(self, other: Self) -> Cond {
        Cond::Cmp(CmpOp::Ne, self, other)
    }

    pub fn lt(self, other: Self) -> Cond {
        Cond::Cmp(CmpOp::Lt, self, other)
    }

    pub fn le(self, other: Self) -> Cond {
        Cond::Cmp(CmpOp::Le, self, other)
    }

    pub fn gt(self, other: Self) -> Cond {
        Cond::Cmp(CmpOp::Gt, self, other)
    }

    pub fn ge(self, other: Self) -> Cond {
        Cond::Cmp(CmpOp::Ge, self, other)
    }

    /// Collects the variables occurring in the expression.
    pub fn variables(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Var(v) => {
                out.insert(v.clone());
            }
            Expr::Const(_) => {}
            Expr::Add(a, b) | Expr::Sub(a, b) | Expr::Mul(a, b) => {
                a.variables(out);
                b.variables(out);
            }
            Expr::Neg(e) => e.variables(out),
        }
    }

    /// Evaluates the expression under a concrete assignment.
    ///
    /// Returns `None` if a variable is unassigned or the arithmetic overflows.
    pub fn eval(&self, env: &BTreeMap<String, i64>) -> Option<i64> {
        match self {
            Expr::Var(v) => env.get(v).copied(),
            Expr::Const(c) => Some(*c),
            Expr::Add(a, b) => a.eval(env)?.checked_add(b.eval(env)?),
            Expr::Sub(a, b) => a.eval(env)?.checked_sub(b.eval(env)?),
            Expr::Mul(a, b) => a.eval(env)?.checked_mul(b.eval(env)?),
            Expr::Neg(e) => e.eval(env)?.checked_neg(),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Var(v) => write!(f, "{}", v),
            Expr::Const(c) => write!(f, "{}", c),
            Expr::Add(a, b) => write!(f, "({} + {})", a, b),
            Expr::Sub(a, b) => write!(f, "({} - {})", a, b),
            Expr::Mul(a, b) => write!(f, "({} * {})", a, b),
            Expr::Neg(e) => write!(f, "-{}", e),
        }
    }
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    /// The operator of the negated comparison: `!(a < b)` is `a >= b`.
    pub fn negate(self) -> Self {
        match self {
            CmpOp::Eq => CmpOp::Ne,
            CmpOp::Ne => CmpOp::Eq,
            CmpOp::Lt => CmpOp::Ge,
            CmpOp::Le => CmpOp::Gt,
            CmpOp::Gt => CmpOp::Le,
            CmpOp::Ge => CmpOp::Lt,
        }
    }

    /// The operator with swapped operands: `a < b` is `b > a`.
    pub fn flip(self) -> Self {
        match self {
            CmpOp::Eq => CmpOp::Eq,
            CmpOp::Ne => CmpOp::Ne,
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::Le => CmpOp::Ge,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::Ge => CmpOp::Le,
        }
    }

    pub fn holds(self, a: i64, b: i64) -> bool {
        match self {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        };
        write!(f, "{}", s)
    }
}

/// Boolean condition (branch guard, assumption, interpolant atom).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Cond {
    True,
    False,
    Cmp(CmpOp, Expr, Expr),
    Not(Box<Cond>),
    And(Box<Cond>, Box<Cond>),
    Or(Box<Cond>, Box<Cond>),
}

impl Cond {
    pub fn not(self) -> Self {
        Cond::Not(Box::new(self))
    }

    pub fn and(self, other: Self) -> Self {
        Cond::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Self) -> Self {
        Cond::Or(Box::new(self), Box::new(other))
    }

    /// Pushes negations down to the comparisons (negation normal form).
    pub fn nnf(&self) -> Cond {
        self.nnf_polarity(true)
    }

    fn nnf_polarity(&self, positive: bool) -> Cond {
        match (self, positive) {
            (Cond::True, true) | (Cond::False, false) => Cond::True,
            (Cond::True, false) | (Cond::False, true) => Cond::False,
            (Cond::Cmp(op, a, b), true) => Cond::Cmp(*op, a.clone(), b.clone()),
            (Cond::Cmp(op, a, b), false) => Cond::Cmp(op.negate(), a.clone(), b.clone()),
            (Cond::Not(c), _) => c.nnf_polarity(!positive),
            (Cond::And(a, b), true) => a.nnf_polarity(true).and(b.nnf_polarity(true)),
            (Cond::And(a, b), false) => a.nnf_polarity(false).or(b.nnf_polarity(false)),
            (Cond::Or(a, b), true) => a.nnf_polarity(true).or(b.nnf_polarity(true)),
            (Cond::Or(a, b), false) => a.nnf_polarity(false).and(b.nnf_polarity(false)),
        }
    }

    /// Collects the variables occurring in the condition.
    pub fn variables(&self, out: &mut BTreeSet<String>) {
        match self {
            Cond::True | Cond::False => {}
            Cond::Cmp(_, a, b) => {
                a.variables(out);
                b.variables(out);
            }
            Cond::Not(c) => c.variables(out),
            Cond::And(a, b) | Cond::Or(a, b) => {
                a.variables(out);
                b.variables(out);
            }
        }
    }

    /// Evaluates the condition under a concrete assignment.
    pub fn eval(&self, env: &BTreeMap<String, i64>) -> Option<bool> {
        match self {
            Cond::True => Some(true),
            Cond::False => Some(false),
            Cond::Cmp(op, a, b) => Some(op.holds(a.eval(env)?, b.eval(env)?)),
            Cond::Not(c) => c.eval(env).map(|v| !v),
            Cond::And(a, b) => Some(a.eval(env)? && b.eval(env)?),
            Cond::Or(a, b) => Some(a.eval(env)? || b.eval(env)?),
        }
    }
}

impl fmt::Display for Cond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cond::True => write!(f, "true"),
            Cond::False => write!(f, "false"),
            Cond::Cmp(op, a, b) => write!(f, "{} {} {}", a, op, b),
            Cond::Not(c) => write!(f, "!({})", c),
            Cond::And(a, b) => write!(f, "({} && {})", a, b),
            Cond::Or(a, b) => write!(f, "({} || {})", a, b),
        }
    }
}
