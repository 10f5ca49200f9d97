//! Top-level analysis driver and verdict reporting.
//!
//! [`Analysis`] ties a CPA, a program graph and an [`AnalysisConfig`] together.
//! With a [`FeasibilityChecker`] it runs the CEGAR loop, otherwise plain
//! reachability where every reached target counts as a counterexample.
//!
//! A run always ends with exactly one of `Safe`, `Unsafe` or `Unknown`;
//! errors of collaborators are reported as [`UnknownReason::ExternalFailure`].

use std::fmt;

use log::{error, info, warn};

use crate::algorithm::{AlgorithmStatus, CpaAlgorithm};
use crate::arg::NodeId;
use crate::cegar::{CegarAlgorithm, CegarStatus, FeasibilityChecker, Model};
use crate::cfa::{Edge, Location, LocationId, ProgramGraph};
use crate::config::AnalysisConfig;
use crate::cpa::ConfigurableProgramAnalysis;
use crate::error::{CpaError, Result};
use crate::limits::{LimitReason, ShutdownNotifier};
use crate::path::CounterexamplePath;
use crate::reached::ArgReachedSet;
use crate::stats::Statistics;

/// Why no verdict could be reached.
#[derive(Debug, Clone, PartialEq)]
pub enum UnknownReason {
    ResourceExhausted(LimitReason),
    /// Refinement could not exclude a spurious path.
    NonProgress {
        target: LocationId,
        path_length: usize,
        diagnostic: String,
    },
    ExternalFailure(String),
}

impl fmt::Display for UnknownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnknownReason::ResourceExhausted(reason) => write!(f, "{}", reason),
            UnknownReason::NonProgress {
                target,
                path_length,
                diagnostic,
            } => write!(
                f,
                "refinement made no progress on a path of length {} to {} ({})",
                path_length, target, diagnostic
            ),
            UnknownReason::ExternalFailure(message) => write!(f, "{}", message),
        }
    }
}

/// Feasible path to a target location.
#[derive(Debug, Clone, PartialEq)]
pub struct Counterexample {
    pub path: CounterexamplePath,
    /// Every location of the path except the last, with the edge leaving it.
    pub steps: Vec<(Location, Edge)>,
    pub target: Location,
    /// Input values driving execution along the path, if a checker produced them.
    pub model: Option<Model>,
}

impl Counterexample {
    fn new(path: CounterexamplePath, model: Option<Model>, graph: &dyn ProgramGraph) -> Result<Self> {
        let lookup = |id: LocationId| graph.location(id).cloned().ok_or(CpaError::UnknownLocation(id));
        let steps = path
            .locations()
            .iter()
            .zip(path.edges())
            .map(|(&id, edge)| Ok((lookup(id)?, edge.clone())))
            .collect::<Result<Vec<_>>>()?;
        let target = lookup(path.locations().last().copied().ok_or(CpaError::EmptyPath)?)?;
        Ok(Self {
            path,
            steps,
            target,
            model,
        })
    }
}

impl fmt::Display for Counterexample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (location, edge) in &self.steps {
            writeln!(f, "  {}: {}", location, edge.effect)?;
        }
        write!(f, "  {}: target", self.target)?;
        if let Some(model) = &self.model {
            write!(f, "\n  with {}", model)?;
        }
        Ok(())
    }
}

/// Verdict of an analysis.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    Safe { reached_size: usize },
    Unsafe { counterexample: Counterexample },
    Unknown { reason: UnknownReason },
}

impl AnalysisOutcome {
    pub fn is_safe(&self) -> bool {
        matches!(self, AnalysisOutcome::Safe { .. })
    }

    pub fn is_unsafe(&self) -> bool {
        matches!(self, AnalysisOutcome::Unsafe { .. })
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, AnalysisOutcome::Unknown { .. })
    }
}

impl fmt::Display for AnalysisOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisOutcome::Safe { reached_size } => write!(f, "SAFE ({} reached states)", reached_size),
            AnalysisOutcome::Unsafe { counterexample } => write!(f, "UNSAFE\n{}", counterexample),
            AnalysisOutcome::Unknown { reason } => write!(f, "UNKNOWN: {}", reason),
        }
    }
}

/// Verdict plus run statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisReport {
    pub outcome: AnalysisOutcome,
    pub statistics: Statistics,
}

impl fmt::Display for AnalysisReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Verification result: {}", self.outcome)?;
        write!(f, "{}", self.statistics)
    }
}

/// Analysis of one program with one CPA.
pub struct Analysis<'a, C: ConfigurableProgramAnalysis> {
    cpa: &'a C,
    graph: &'a dyn ProgramGraph,
    config: AnalysisConfig,
    shutdown: ShutdownNotifier,
}

impl<'a, C: ConfigurableProgramAnalysis> Analysis<'a, C> {
    pub fn new(cpa: &'a C, graph: &'a dyn ProgramGraph, config: AnalysisConfig) -> Self {
        Self {
            cpa,
            graph,
            config,
            shutdown: ShutdownNotifier::new(),
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Handle for cancelling a running analysis, e.g. from another thread.
    pub fn shutdown_notifier(&self) -> ShutdownNotifier {
        self.shutdown.clone()
    }

    /// Reached set seeded at the entry location, with the configured waitlist.
    pub fn create_reached_set(&self) -> Result<ArgReachedSet<C::State, C::Precision>> {
        self.algorithm().create_reached_set(self.config.waitlist)
    }

    /// Runs the analysis from the entry location.
    pub fn run(&self, checker: Option<&dyn FeasibilityChecker>) -> AnalysisReport {
        match self.create_reached_set() {
            Ok(mut reached) => self.run_with(&mut reached, checker),
            Err(e) => {
                error!("Cannot start the analysis: {}", e);
                AnalysisReport {
                    outcome: AnalysisOutcome::Unknown {
                        reason: UnknownReason::ExternalFailure(e.to_string()),
                    },
                    statistics: Statistics::default(),
                }
            }
        }
    }

    /// Runs the analysis on an existing reached set, which is left in place for inspection.
    pub fn run_with(
        &self,
        reached: &mut ArgReachedSet<C::State, C::Precision>,
        checker: Option<&dyn FeasibilityChecker>,
    ) -> AnalysisReport {
        let (result, statistics) = match checker {
            Some(checker) => {
                let mut cegar =
                    CegarAlgorithm::new(self.algorithm(), checker).with_strategy(self.config.refinement);
                let result = cegar.run(reached).and_then(|status| self.cegar_outcome(reached, status));
                (result, cegar.algorithm().stats().clone())
            }
            None => {
                let mut algorithm = self.algorithm();
                let result = algorithm
                    .run(reached)
                    .and_then(|status| self.reachability_outcome(reached, status));
                (result, algorithm.stats().clone())
            }
        };

        let outcome = result.unwrap_or_else(|e| {
            error!("Analysis failed: {}", e);
            AnalysisOutcome::Unknown {
                reason: UnknownReason::ExternalFailure(e.to_string()),
            }
        });
        match &outcome {
            AnalysisOutcome::Unknown { reason } => warn!("Verification result: UNKNOWN, {}", reason),
            AnalysisOutcome::Safe { .. } => info!("Verification result: SAFE"),
            AnalysisOutcome::Unsafe { counterexample } => {
                info!("Verification result: UNSAFE, target {}", counterexample.target)
            }
        }
        AnalysisReport { outcome, statistics }
    }

    fn algorithm(&self) -> CpaAlgorithm<'a, C> {
        CpaAlgorithm::new(self.cpa, self.graph)
            .with_limits(self.config.limits, self.shutdown.clone())
            .with_stop_after_target(self.config.stop_after_target)
    }

    fn reachability_outcome(
        &self,
        reached: &ArgReachedSet<C::State, C::Precision>,
        status: AlgorithmStatus,
    ) -> Result<AnalysisOutcome> {
        let target = match status {
            AlgorithmStatus::ResourceExhausted(reason) => {
                return Ok(AnalysisOutcome::Unknown {
                    reason: UnknownReason::ResourceExhausted(reason),
                })
            }
            AlgorithmStatus::TargetFound(target) => Some(target),
            AlgorithmStatus::Fixpoint => reached.arg().targets().next(),
        };
        match target {
            Some(target) => self.unsafe_outcome(reached, target, None),
            None => Ok(AnalysisOutcome::Safe {
                reached_size: reached.len(),
            }),
        }
    }

    fn cegar_outcome(
        &self,
        reached: &ArgReachedSet<C::State, C::Precision>,
        status: CegarStatus,
    ) -> Result<AnalysisOutcome> {
        Ok(match status {
            CegarStatus::Safe => AnalysisOutcome::Safe {
                reached_size: reached.len(),
            },
            CegarStatus::Unsafe { path, model } => AnalysisOutcome::Unsafe {
                counterexample: Counterexample::new(path, Some(model), self.graph)?,
            },
            CegarStatus::ResourceExhausted(reason) => AnalysisOutcome::Unknown {
                reason: UnknownReason::ResourceExhausted(reason),
            },
            CegarStatus::NonProgress { path, tracked } => AnalysisOutcome::Unknown {
                reason: UnknownReason::NonProgress {
                    target: path.locations().last().copied().ok_or(CpaError::EmptyPath)?,
                    path_length: path.len(),
                    diagnostic: format!("spurious path {} survives tracking {}", path, tracked),
                },
            },
        })
    }

    fn unsafe_outcome(
        &self,
        reached: &ArgReachedSet<C::State, C::Precision>,
        target: NodeId,
        model: Option<Model>,
    ) -> Result<AnalysisOutcome> {
        let path = reached.arg().path_to(target, self.graph)?;
        Ok(AnalysisOutcome::Unsafe {
            counterexample: Counterexample::new(path, model, self.graph)?,
        })
    }
}
