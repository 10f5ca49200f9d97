//! Typed analysis configuration.
//!
//! All policies parse from and print to short names, so a command-line
//! layer can map strings onto them:
//!
//! ```
//! use cpa_rs::config::{AnalysisConfig, MergePolicy, WaitlistOrder};
//!
//! let config = AnalysisConfig::default()
//!     .with_merge("join".parse().unwrap())
//!     .with_waitlist("bfs".parse().unwrap());
//! assert_eq!(config.merge, MergePolicy::Join);
//! assert_eq!(config.waitlist, WaitlistOrder::Bfs);
//! ```

use crate::cfa::LocationId;
use crate::cpa::composite::CompositeCpa;
use crate::cpa::location::LocationCpa;
use crate::cpa::sign::{SignCpa, SignPrecision};

pub use crate::cegar::RefinementStrategy;
pub use crate::cpa::merge::MergePolicy;
pub use crate::cpa::stop::StopPolicy;
pub use crate::limits::ResourceLimits;
pub use crate::waitlist::WaitlistOrder;

/// Settings of an [`Analysis`][crate::analysis::Analysis].
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AnalysisConfig {
    pub waitlist: WaitlistOrder,
    pub limits: ResourceLimits,
    /// Stop exploring at the first target (default: true).
    pub stop_after_target: bool,
    pub refinement: RefinementStrategy,
    /// Merge operator of the reference sign analysis.
    pub merge: MergePolicy,
    /// Stop operator of the reference sign analysis.
    pub stop: StopPolicy,
    /// Track every variable from the start instead of learning them through refinement.
    pub track_all_variables: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            waitlist: WaitlistOrder::default(),
            limits: ResourceLimits::unlimited(),
            stop_after_target: true,
            refinement: RefinementStrategy::default(),
            merge: MergePolicy::default(),
            stop: StopPolicy::default(),
            track_all_variables: false,
        }
    }
}

impl AnalysisConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_waitlist(mut self, order: WaitlistOrder) -> Self {
        self.waitlist = order;
        self
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_stop_after_target(mut self, stop: bool) -> Self {
        self.stop_after_target = stop;
        self
    }

    pub fn with_refinement(mut self, strategy: RefinementStrategy) -> Self {
        self.refinement = strategy;
        self
    }

    pub fn with_merge(mut self, merge: MergePolicy) -> Self {
        self.merge = merge;
        self
    }

    pub fn with_stop(mut self, stop: StopPolicy) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_track_all_variables(mut self, track: bool) -> Self {
        self.track_all_variables = track;
        self
    }

    /// Location analysis with the given targets, combined with the sign analysis.
    pub fn reference_cpa(&self, targets: impl IntoIterator<Item = LocationId>) -> CompositeCpa {
        let precision = if self.track_all_variables {
            SignPrecision::Full
        } else {
            SignPrecision::empty()
        };
        CompositeCpa::new()
            .with_component(LocationCpa::new(targets))
            .with_component(SignCpa::new(self.merge, self.stop).with_initial_precision(precision))
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = AnalysisConfig::new();
        assert!(config.stop_after_target);
        assert_eq!(config.waitlist, WaitlistOrder::Dfs);
        assert_eq!(config.merge, MergePolicy::Sep);
        assert_eq!(config.stop, StopPolicy::Sep);
        assert_eq!(config.refinement, RefinementStrategy::Prune);
        assert_eq!(config.limits, ResourceLimits::unlimited());
    }

    #[test]
    fn test_reference_cpa_has_two_components() {
        let cpa = AnalysisConfig::new().reference_cpa([LocationId::new(3)]);
        assert_eq!(cpa.len(), 2);
    }
}
