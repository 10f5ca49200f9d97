//! Statistics collected during an analysis.

use std::fmt;
use std::time::Duration;

/// Counters and timings of a run, accumulated over all CEGAR rounds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statistics {
    /// Number of waitlist pops
    pub iterations: u64,
    /// Number of successors produced by the transfer relation
    pub successors: u64,
    /// Number of merges that changed a reached state
    pub merges: u64,
    /// Number of successors covered by the stop operator
    pub covered: u64,
    /// Number of target states found
    pub targets: u64,
    /// Number of completed refinements
    pub refinements: usize,
    /// Number of feasibility checks issued
    pub feasibility_checks: usize,
    /// Largest waitlist size observed
    pub max_waitlist: usize,
    /// Reached-set size at the end of the run
    pub reached_size: usize,
    /// ARG size (including covered nodes) at the end of the run
    pub arg_size: usize,
    /// Time spent in the reachability algorithm
    pub exploration_time: Duration,
    /// Time spent checking paths and refining
    pub refinement_time: Duration,
}

impl Statistics {
    pub fn total_time(&self) -> Duration {
        self.exploration_time + self.refinement_time
    }

    /// Fraction of produced successors that were covered.
    pub fn coverage_ratio(&self) -> f64 {
        if self.successors == 0 {
            return 0.0;
        }
        self.covered as f64 / self.successors as f64
    }
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Iterations:          {}", self.iterations)?;
        writeln!(f, "Successors:          {}", self.successors)?;
        writeln!(f, "Merges:              {}", self.merges)?;
        writeln!(
            f,
            "Covered:             {} ({:.1}%)",
            self.covered,
            self.coverage_ratio() * 100.0
        )?;
        writeln!(f, "Targets:             {}", self.targets)?;
        writeln!(f, "Refinements:         {}", self.refinements)?;
        writeln!(f, "Feasibility checks:  {}", self.feasibility_checks)?;
        writeln!(f, "Max waitlist size:   {}", self.max_waitlist)?;
        writeln!(f, "Reached set size:    {}", self.reached_size)?;
        writeln!(f, "ARG size:            {}", self.arg_size)?;
        writeln!(f, "Exploration time:    {:.3?}", self.exploration_time)?;
        write!(f, "Refinement time:     {:.3?}", self.refinement_time)
    }
}
