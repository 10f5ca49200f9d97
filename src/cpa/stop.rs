//! Stop operators (coverage checks).

use std::fmt;
use std::str::FromStr;

use crate::cpa::AbstractDomain;
use crate::error::CpaError;

/// Why a state was considered covered.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Coverage {
    /// Covered by the reached state at this index of the candidate slice.
    By(usize),
    /// Covered by the join of all candidate states.
    Join,
}

/// Decides whether a new state is already represented by the reached set.
pub trait StopOperator<S, P> {
    /// Checks `state` against the reached states at its location.
    ///
    /// Returns `None` if the state must be explored.
    fn stop(&self, domain: &dyn AbstractDomain<S>, state: &S, reached: &[&S], precision: &P) -> Option<Coverage>;
}

/// Covered iff a single reached state dominates the new one.
#[derive(Debug, Copy, Clone, Default)]
pub struct StopSep;

impl<S, P> StopOperator<S, P> for StopSep {
    fn stop(&self, domain: &dyn AbstractDomain<S>, state: &S, reached: &[&S], _precision: &P) -> Option<Coverage> {
        reached
            .iter()
            .position(|r| domain.is_less_or_equal(state, r))
            .map(Coverage::By)
    }
}

/// Covered iff the join of all reached states dominates the new one.
#[derive(Debug, Copy, Clone, Default)]
pub struct StopJoin;

impl<S: Clone, P> StopOperator<S, P> for StopJoin {
    fn stop(&self, domain: &dyn AbstractDomain<S>, state: &S, reached: &[&S], _precision: &P) -> Option<Coverage> {
        let (first, rest) = reached.split_first()?;
        if rest.is_empty() {
            return domain.is_less_or_equal(state, first).then_some(Coverage::By(0));
        }
        let joined = rest.iter().fold((*first).clone(), |acc, r| domain.join(&acc, r));
        domain.is_less_or_equal(state, &joined).then_some(Coverage::Join)
    }
}

/// Never covers anything.
#[derive(Debug, Copy, Clone, Default)]
pub struct StopNever;

impl<S, P> StopOperator<S, P> for StopNever {
    fn stop(&self, _domain: &dyn AbstractDomain<S>, _state: &S, _reached: &[&S], _precision: &P) -> Option<Coverage> {
        None
    }
}

/// Covers every state at an already visited location.
#[derive(Debug, Copy, Clone, Default)]
pub struct StopAlways;

impl<S, P> StopOperator<S, P> for StopAlways {
    fn stop(&self, _domain: &dyn AbstractDomain<S>, _state: &S, reached: &[&S], _precision: &P) -> Option<Coverage> {
        if reached.is_empty() {
            None
        } else {
            Some(Coverage::By(0))
        }
    }
}

/// Stop strategy selector, used to configure the reference analyses.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub enum StopPolicy {
    #[default]
    Sep,
    Join,
    Never,
    Always,
}

impl StopPolicy {
    pub fn operator<S: Clone + 'static, P: 'static>(self) -> Box<dyn StopOperator<S, P>> {
        match self {
            StopPolicy::Sep => Box::new(StopSep),
            StopPolicy::Join => Box::new(StopJoin),
            StopPolicy::Never => Box::new(StopNever),
            StopPolicy::Always => Box::new(StopAlways),
        }
    }
}

impl fmt::Display for StopPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopPolicy::Sep => "sep",
            StopPolicy::Join => "join",
            StopPolicy::Never => "never",
            StopPolicy::Always => "always",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for StopPolicy {
    type Err = CpaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sep" => Ok(StopPolicy::Sep),
            "join" => Ok(StopPolicy::Join),
            "never" => Ok(StopPolicy::Never),
            "always" => Ok(StopPolicy::Always),
            other => Err(CpaError::InvalidConfiguration(format!("unknown stop policy '{}'", other))),
        }
    }
}
