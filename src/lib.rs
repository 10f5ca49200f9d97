//! # cpa-rs: Configurable Program Analysis in Rust
//!
//! **`cpa-rs`** is an engine for **Configurable Program Analysis (CPA)**: a single
//! reachability algorithm, parameterized by an abstract domain and a handful of
//! operators, that explores the state space of a program given as a control-flow
//! automaton (CFA).
//!
//! ## What is a CPA?
//!
//! A CPA is an abstract domain (a lattice of abstract states) together with a
//! transfer relation, a merge operator, a stop operator and a precision adjustment.
//! Changing these operators moves the analysis anywhere between a classic
//! data-flow analysis (merge everything at a location) and model checking
//! (never merge, check coverage one state at a time).
//!
//! ## Key Features
//!
//! - **Typed CPAs**: Domain authors implement [`ConfigurableProgramAnalysis`][crate::cpa::ConfigurableProgramAnalysis] with concrete state and precision types. [`CompositeCpa`][crate::cpa::composite::CompositeCpa] combines several of them.
//! - **Abstract Reachability Graph**: Every reached state is a node of an arena-allocated [`Arg`][crate::arg::Arg], kept consistent with the reached set and waitlist by [`ArgReachedSet`][crate::reached::ArgReachedSet].
//! - **CEGAR**: Spurious counterexamples are refuted by a [`FeasibilityChecker`][crate::cegar::FeasibilityChecker]; the learned facts refine the precision and the ARG is pruned.
//! - **Bounded runs**: Iteration, state, time and refinement budgets, plus cooperative cancellation via [`ShutdownNotifier`][crate::limits::ShutdownNotifier].
//!
//! ## Basic Usage
//!
//! ```rust
//! use cpa_rs::analysis::Analysis;
//! use cpa_rs::cfa::{CfaBuilder, EdgeEffect};
//! use cpa_rs::config::AnalysisConfig;
//! use cpa_rs::expr::Expr;
//! use cpa_rs::oracle::IntervalPathChecker;
//!
//! // 1. Build the program: entry --[x > 0]--> l1 --[x <= 0]--> err
//! let mut builder = CfaBuilder::new();
//! let entry = builder.add_location("main");
//! let l1 = builder.add_location("main");
//! let err = builder.add_location("main");
//! builder.add_edge(entry, l1, EdgeEffect::Assume(Expr::var("x").gt(Expr::constant(0))));
//! builder.add_edge(l1, err, EdgeEffect::Assume(Expr::var("x").le(Expr::constant(0))));
//! let cfa = builder.build(entry).unwrap();
//!
//! // 2. Location analysis with `err` as target, plus a sign analysis that starts tracking nothing
//! let config = AnalysisConfig::default();
//! let cpa = config.reference_cpa([err]);
//!
//! // 3. Run CEGAR with the interval path checker
//! let report = Analysis::new(&cpa, &cfa, config).run(Some(&IntervalPathChecker::new()));
//! assert!(report.outcome.is_safe());
//! assert_eq!(report.statistics.refinements, 1);
//! ```
//!
//! ## Core Components
//!
//! - **[`cpa`]**: The CPA contract and the shipped analyses (location, sign, composite).
//! - **[`algorithm`]**: The worklist-driven reachability algorithm.
//! - **[`cegar`]**: The refinement loop and the [`FeasibilityChecker`][crate::cegar::FeasibilityChecker] interface.
//! - **[`analysis`]**: The top-level driver producing an [`AnalysisReport`][crate::analysis::AnalysisReport].
//! - **[`dot`]**: Visualizing the ARG using Graphviz.

pub mod algorithm;
pub mod analysis;
pub mod arg;
pub mod cegar;
pub mod cfa;
pub mod config;
pub mod cpa;
pub mod dot;
pub mod error;
pub mod expr;
pub mod limits;
pub mod oracle;
pub mod path;
pub mod reached;
pub mod stats;
pub mod waitlist;

pub use crate::analysis::{Analysis, AnalysisOutcome, AnalysisReport};
pub use crate::error::{CpaError, Result};
