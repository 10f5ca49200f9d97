//! Resource limits and cooperative cancellation.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Budgets for a single analysis run. `None` means unlimited.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct ResourceLimits {
    /// Maximum number of waitlist pops.
    pub max_iterations: Option<u64>,
    /// Maximum number of states in the reached set.
    pub max_states: Option<usize>,
    pub wall_time: Option<Duration>,
    /// Maximum number of CEGAR refinements.
    pub max_refinements: Option<usize>,
}

impl ResourceLimits {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn with_max_iterations(mut self, n: u64) -> Self {
        self.max_iterations = Some(n);
        self
    }

    pub fn with_max_states(mut self, n: usize) -> Self {
        self.max_states = Some(n);
        self
    }

    pub fn with_wall_time(mut self, limit: Duration) -> Self {
        self.wall_time = Some(limit);
        self
    }

    pub fn with_max_refinements(mut self, n: usize) -> Self {
        self.max_refinements = Some(n);
        self
    }
}

/// Why an analysis stopped before reaching a verdict.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum LimitReason {
    Iterations(u64),
    States(usize),
    WallTime(Duration),
    Refinements(usize),
    /// Cancelled through a [`ShutdownNotifier`].
    Shutdown(String),
}

impl fmt::Display for LimitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitReason::Iterations(n) => write!(f, "iteration limit of {} reached", n),
            LimitReason::States(n) => write!(f, "reached-set limit of {} states reached", n),
            LimitReason::WallTime(d) => write!(f, "time limit of {:?} exceeded", d),
            LimitReason::Refinements(n) => write!(f, "refinement limit of {} reached", n),
            LimitReason::Shutdown(reason) => write!(f, "shutdown requested: {}", reason),
        }
    }
}

/// Cloneable cancellation flag shared between the analysis and its owner.
#[derive(Debug, Clone, Default)]
pub struct ShutdownNotifier {
    requested: Arc<AtomicBool>,
    reason: Arc<Mutex<Option<String>>>,
}

impl ShutdownNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks the analysis to stop at the next iteration boundary.
    ///
    /// Only the first reason is kept.
    pub fn request_shutdown(&self, reason: impl Into<String>) {
        if let Ok(mut slot) = self.reason.lock() {
            slot.get_or_insert_with(|| reason.into());
        }
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn should_shutdown(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<String> {
        if !self.should_shutdown() {
            return None;
        }
        let reason = match self.reason.lock() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        Some(reason.unwrap_or_else(|| "unknown".to_string()))
    }
}

/// Polls limits and the shutdown flag during a run.
#[derive(Debug, Clone)]
pub struct ResourceMonitor {
    limits: ResourceLimits,
    shutdown: ShutdownNotifier,
    start: Instant,
    iterations: u64,
}

impl ResourceMonitor {
    pub fn new(limits: ResourceLimits, shutdown: ShutdownNotifier) -> Self {
        Self {
            limits,
            shutdown,
            start: Instant::now(),
            iterations: 0,
        }
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    pub fn shutdown_notifier(&self) -> &ShutdownNotifier {
        &self.shutdown
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Counts one waitlist pop.
    pub fn tick(&mut self) {
        self.iterations += 1;
    }

    /// Returns the first exceeded limit, if any.
    pub fn check(&self, reached_size: usize) -> Option<LimitReason> {
        if let Some(reason) = self.shutdown.reason() {
            return Some(LimitReason::Shutdown(reason));
        }
        if let Some(max) = self.limits.max_iterations {
            if self.iterations >= max {
                return Some(LimitReason::Iterations(max));
            }
        }
        if let Some(max) = self.limits.max_states {
            if reached_size >= max {
                return Some(LimitReason::States(max));
            }
        }
        if let Some(limit) = self.limits.wall_time {
            if self.elapsed() >= limit {
                return Some(LimitReason::WallTime(limit));
            }
        }
        None
    }

    /// Checks the refinement budget before refinement number `done + 1`.
    pub fn check_refinements(&self, done: usize) -> Option<LimitReason> {
        match self.limits.max_refinements {
            Some(max) if done >= max => Some(LimitReason::Refinements(max)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_unlimited() {
        let mut monitor = ResourceMonitor::new(ResourceLimits::unlimited(), ShutdownNotifier::new());
        for _ in 0..100 {
            monitor.tick();
        }
        assert_eq!(monitor.check(1_000_000), None);
        assert_eq!(monitor.check_refinements(1_000), None);
    }

    #[test]
    fn test_iteration_and_state_limits() {
        let limits = ResourceLimits::default().with_max_iterations(2).with_max_states(10);
        let mut monitor = ResourceMonitor::new(limits, ShutdownNotifier::new());
        assert_eq!(monitor.check(0), None);
        assert_eq!(monitor.check(10), Some(LimitReason::States(10)));
        monitor.tick();
        monitor.tick();
        assert_eq!(monitor.check(0), Some(LimitReason::Iterations(2)));
    }

    #[test]
    fn test_zero_iterations() {
        let monitor = ResourceMonitor::new(ResourceLimits::default().with_max_iterations(0), ShutdownNotifier::new());
        assert_eq!(monitor.check(1), Some(LimitReason::Iterations(0)));
    }

    #[test]
    fn test_wall_time() {
        let monitor = ResourceMonitor::new(ResourceLimits::default().with_wall_time(Duration::ZERO), ShutdownNotifier::new());
        assert!(matches!(monitor.check(0), Some(LimitReason::WallTime(_))));
    }

    #[test]
    fn test_refinement_budget() {
        let monitor = ResourceMonitor::new(ResourceLimits::default().with_max_refinements(1), ShutdownNotifier::new());
        assert_eq!(monitor.check_refinements(0), None);
        assert_eq!(monitor.check_refinements(1), Some(LimitReason::Refinements(1)));
    }

    #[test]
    fn test_shutdown_keeps_first_reason() {
        let notifier = ShutdownNotifier::new();
        let monitor = ResourceMonitor::new(ResourceLimits::default(), notifier.clone());
        assert_eq!(notifier.reason(), None);
        notifier.request_shutdown("user interrupt");
        notifier.request_shutdown("second");
        assert!(notifier.should_shutdown());
        assert_eq!(monitor.check(0), Some(LimitReason::Shutdown("user interrupt".to_string())));
    }
}
