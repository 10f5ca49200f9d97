use std::time::Duration;

use clap::{Parser, ValueEnum};

use cpa_rs::analysis::Analysis;
use cpa_rs::cfa::{Cfa, CfaBuilder, EdgeEffect, LocationId};
use cpa_rs::config::{AnalysisConfig, MergePolicy, RefinementStrategy, ResourceLimits, StopPolicy, WaitlistOrder};
use cpa_rs::cpa::sign::SignState;
use cpa_rs::dot::DotConfig;
use cpa_rs::expr::Expr;
use cpa_rs::oracle::IntervalPathChecker;

#[derive(Debug, Copy, Clone, ValueEnum)]
enum Program {
    /// `x := 1; while (x < 10) x := x + 1; if (x < 0) error`
    Loop,
    /// `if (x > 0) error`
    Branch,
    /// `if (x > 0) if (x <= 0) error`
    Contradiction,
}

#[derive(Debug, Parser)]
#[command(author, version)]
struct Cli {
    /// Program to analyze.
    #[arg(value_enum, default_value = "loop")]
    program: Program,

    /// Merge operator of the sign analysis (sep, join).
    #[clap(long, value_name = "POLICY", default_value = "sep")]
    merge: MergePolicy,

    /// Stop operator of the sign analysis (sep, join, never, always).
    #[clap(long, value_name = "POLICY", default_value = "sep")]
    stop: StopPolicy,

    /// Waitlist order (dfs, bfs, topological).
    #[clap(long, value_name = "ORDER", default_value = "dfs")]
    waitlist: WaitlistOrder,

    /// What to do with the ARG after refinement (prune, restart).
    #[clap(long, value_name = "STRATEGY", default_value = "prune")]
    refinement: RefinementStrategy,

    /// Maximum number of waitlist iterations.
    #[clap(long, value_name = "INT")]
    max_iterations: Option<u64>,

    /// Maximum number of refinements.
    #[clap(long, value_name = "INT")]
    max_refinements: Option<usize>,

    /// Time limit in seconds.
    #[clap(long, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Track all variables from the start.
    #[clap(long)]
    track_all: bool,

    /// Skip counterexample checks: every reached target is reported.
    #[clap(long)]
    no_cegar: bool,

    /// Write the final ARG to this file in DOT format.
    #[clap(long, value_name = "FILE")]
    dot: Option<std::path::PathBuf>,
}

fn build(program: Program) -> color_eyre::Result<(Cfa, LocationId)> {
    let x = || Expr::var("x");
    let c = Expr::constant;
    let mut b = CfaBuilder::new();
    let err = match program {
        Program::Loop => {
            let entry = b.add_location("main");
            let head = b.add_location("main");
            let body = b.add_location("main");
            let exit = b.add_location("main");
            let err = b.add_location("main");
            b.add_edge(
                entry,
                head,
                EdgeEffect::Assign {
                    var: "x".to_string(),
                    expr: c(1),
                },
            );
            b.add_edge(head, body, EdgeEffect::Assume(x().lt(c(10))));
            b.add_edge(
                body,
                head,
                EdgeEffect::Assign {
                    var: "x".to_string(),
                    expr: x().add(c(1)),
                },
            );
            b.add_edge(head, exit, EdgeEffect::Assume(x().ge(c(10))));
            b.add_edge(head, err, EdgeEffect::Assume(x().lt(c(0))));
            err
        }
        Program::Branch => {
            let entry = b.add_location("main");
            let err = b.add_location("main");
            let exit = b.add_location("main");
            b.add_edge(entry, err, EdgeEffect::Assume(x().gt(c(0))));
            b.add_edge(entry, exit, EdgeEffect::Assume(x().le(c(0))));
            err
        }
        Program::Contradiction => {
            let entry = b.add_location("main");
            let l1 = b.add_location("main");
            let err = b.add_location("main");
            b.add_edge(entry, l1, EdgeEffect::Assume(x().gt(c(0))));
            b.add_edge(l1, err, EdgeEffect::Assume(x().le(c(0))));
            err
        }
    };
    Ok((b.build(LocationId::new(0))?, err))
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    simplelog::TermLogger::init(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    let args = Cli::parse();
    println!("args = {:?}", args);

    let (cfa, err) = build(args.program)?;
    println!("Program with {} locations and {} edges, error location {}", cfa.num_locations(), cfa.num_edges(), err);

    let mut limits = ResourceLimits::unlimited();
    if let Some(n) = args.max_iterations {
        limits = limits.with_max_iterations(n);
    }
    if let Some(n) = args.max_refinements {
        limits = limits.with_max_refinements(n);
    }
    if let Some(secs) = args.timeout {
        limits = limits.with_wall_time(Duration::from_secs(secs));
    }
    let config = AnalysisConfig::new()
        .with_merge(args.merge)
        .with_stop(args.stop)
        .with_waitlist(args.waitlist)
        .with_refinement(args.refinement)
        .with_limits(limits)
        .with_track_all_variables(args.track_all);

    let cpa = config.reference_cpa([err]);
    let analysis = Analysis::new(&cpa, &cfa, config);
    let mut reached = analysis.create_reached_set()?;
    let checker = IntervalPathChecker::new();
    let report = if args.no_cegar {
        analysis.run_with(&mut reached, None)
    } else {
        analysis.run_with(&mut reached, Some(&checker))
    };
    println!("{}", report);

    if let Some(path) = &args.dot {
        let dot = reached.arg().to_dot_with_labels(&DotConfig::default(), |state| {
            state.find::<SignState>().map_or_else(String::new, |s| s.to_string())
        })?;
        std::fs::write(path, dot)?;
        println!("ARG written to {}", path.display());
    }

    Ok(())
}
