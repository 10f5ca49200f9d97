//! Merge operators.

use std::fmt;
use std::str::FromStr;

use crate::cpa::AbstractDomain;
use crate::error::CpaError;

/// Decides whether a new state is combined with an already reached one.
pub trait MergeOperator<S, P> {
    /// Returns the state that replaces `reached`, or `None` if the two
    /// states stay separate.
    ///
    /// Returning a value equal to `reached` means "nothing to update".
    fn merge(&self, domain: &dyn AbstractDomain<S>, new: &S, reached: &S, precision: &P) -> Option<S>;
}

/// Never merges distinct states.
#[derive(Debug, Copy, Clone, Default)]
pub struct MergeSep;

impl<S: Clone + PartialEq, P> MergeOperator<S, P> for MergeSep {
    fn merge(&self, _domain: &dyn AbstractDomain<S>, new: &S, reached: &S, _precision: &P) -> Option<S> {
        if new == reached {
            Some(reached.clone())
        } else {
            None
        }
    }
}

/// Replaces the reached state by its join with the new state.
#[derive(Debug, Copy, Clone, Default)]
pub struct MergeJoin;

impl<S, P> MergeOperator<S, P> for MergeJoin {
    fn merge(&self, domain: &dyn AbstractDomain<S>, new: &S, reached: &S, _precision: &P) -> Option<S> {
        Some(domain.join(new, reached))
    }
}

/// Merge strategy selector, used to configure the reference analyses.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub enum MergePolicy {
    #[default]
    Sep,
    Join,
}

impl MergePolicy {
    pub fn operator<S: Clone + PartialEq + 'static, P: 'static>(self) -> Box<dyn MergeOperator<S, P>> {
        match self {
            MergePolicy::Sep => Box::new(MergeSep),
            MergePolicy::Join => Box::new(MergeJoin),
        }
    }
}

impl fmt::Display for MergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergePolicy::Sep => write!(f, "sep"),
            MergePolicy::Join => write!(f, "join"),
        }
    }
}

impl FromStr for MergePolicy {
    type Err = CpaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sep" => Ok(MergePolicy::Sep),
            "join" => Ok(MergePolicy::Join),
            other => Err(CpaError::InvalidConfiguration(format!("unknown merge policy '{}'", other))),
        }
    }
}
