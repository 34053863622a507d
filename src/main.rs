use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, ValueEnum};
use log::{error, SetLoggerError};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};

use int_constraints::analysis::ProgramAnalyses;
use int_constraints::expr::{BinOp, Clause, Expr, Literal, Predicate};
use int_constraints::ir::ValueId;
use int_constraints::scenarios;
use int_constraints::{Config, ConstraintSolver, Result, WORD_WIDTH};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Display, EnumIter)]
#[strum(serialize_all = "kebab-case")]
enum Scenario {
    Allocations,
    CountedLoop,
    GuardedLoop,
    PhiMerge,
    TwoCallers,
    AssertMarker,
    LoopExit,
    ThreadSpawn,
    AddressTaken,
}

#[derive(Parser)]
#[clap(about, version, author)]
struct Args {
    /// Which sample program to analyze; all of them when omitted
    #[clap(short, long, value_enum)]
    scenario: Option<Scenario>,

    /// SMT-LIB2 solver executable
    #[clap(long, default_value = "z3")]
    solver: String,

    /// Arguments passed to the solver
    #[clap(long, allow_hyphen_values = true, default_values = ["-smt2", "-in"])]
    solver_args: Vec<String>,

    /// Copy every solver command into this file
    #[clap(long)]
    replay: Option<PathBuf>,

    /// Capture nothing, so only tautologies are provable
    #[clap(long, action=ArgAction::SetTrue)]
    disable_constraints: bool,

    /// Log realized facts and solver traffic
    #[clap(short, long, action=ArgAction::SetTrue)]
    verbose: bool,
}

impl From<&Args> for Config {
    fn from(args: &Args) -> Self {
        Config {
            solver_program: args.solver.clone(),
            solver_args: args.solver_args.clone(),
            replay_file: args.replay.clone(),
            disable_constraints: args.disable_constraints,
        }
    }
}

fn init_logger(verbose: bool) -> std::result::Result<(), SetLoggerError> {
    let level = if verbose {
        simplelog::LevelFilter::Debug
    } else {
        simplelog::LevelFilter::Info
    };
    simplelog::TermLogger::init(
        level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )
}

fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(e) = init_logger(args.verbose) {
        eprintln!("cannot install the logger: {e}");
        return ExitCode::FAILURE;
    }

    let config = Config::from(&args);
    let selected: Vec<Scenario> = match args.scenario {
        Some(s) => vec![s],
        None => Scenario::iter().collect(),
    };
    for scenario in selected {
        println!("== {scenario}");
        if let Err(e) = run(scenario, &config) {
            error!("{scenario}: {e}");
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}

fn report(what: &str, answer: Result<bool>) -> Result<()> {
    println!("{what}: {}", answer?);
    Ok(())
}

fn word(v: i64) -> Literal {
    Literal::word(v)
}

fn run(scenario: Scenario, config: &Config) -> Result<()> {
    match scenario {
        Scenario::Allocations => {
            let s = scenarios::allocations();
            let a = ProgramAnalyses::compute(&s.program);
            let mut cs = ConstraintSolver::new(&s.program, &a, config.clone());
            let end = |v: ValueId, size: i64| {
                Expr::binary(BinOp::Add, Expr::leaf(&s.program, v), Expr::literal(WORD_WIDTH, size))
            };
            let (first, second) = (
                Expr::leaf(&s.program, s.first),
                Expr::leaf(&s.program, s.second),
            );
            report(
                "provable(first + 4 <= second)",
                cs.provable_clause(&Clause::cmp(Predicate::Sle, end(s.first, 4), second)),
            )?;
            report(
                "provable(second + 8 <= first)",
                cs.provable_clause(&Clause::cmp(Predicate::Sle, end(s.second, 8), first)),
            )?;
        }
        Scenario::CountedLoop => {
            let s = scenarios::counted_loop();
            let a = ProgramAnalyses::compute(&s.program);
            let mut cs = ConstraintSolver::new(&s.program, &a, config.clone());
            report(
                "provable(0 <= i)",
                cs.provable(Predicate::Sle, &[], word(0), &[], s.iv),
            )?;
            report("provable(i < n)", cs.provable(Predicate::Slt, &[], s.iv, &[], s.n))?;
        }
        Scenario::GuardedLoop => {
            let s = scenarios::guarded_loop();
            let a = ProgramAnalyses::compute(&s.program);
            let mut cs = ConstraintSolver::new(&s.program, &a, config.clone());
            report(
                "provable(0 <= i)",
                cs.provable(Predicate::Sle, &[], word(0), &[], s.iv),
            )?;
            report("provable(i < n)", cs.provable(Predicate::Slt, &[], s.iv, &[], s.n))?;
            report(
                "provable(i < n - 1)",
                cs.provable(Predicate::Slt, &[], s.iv, &[], s.n_minus_one),
            )?;
        }
        Scenario::PhiMerge => {
            let s = scenarios::phi_merge();
            let a = ProgramAnalyses::compute(&s.program);
            let mut cs = ConstraintSolver::new(&s.program, &a, config.clone());
            for k in [1, 2] {
                report(
                    &format!("satisfiable(phi == {k})"),
                    cs.satisfiable(Predicate::Eq, &[], s.phi, &[], word(k)),
                )?;
            }
            report(
                "provable(phi == 1)",
                cs.provable(Predicate::Eq, &[], s.phi, &[], word(1)),
            )?;
        }
        Scenario::TwoCallers => {
            let s = scenarios::two_callers();
            let a = ProgramAnalyses::compute(&s.program);
            let mut cs = ConstraintSolver::new(&s.program, &a, config.clone());
            for k in [5, 7] {
                report(
                    &format!("satisfiable(x == {k})"),
                    cs.satisfiable(Predicate::Eq, &[], s.formal, &[], word(k)),
                )?;
            }
            report(
                "provable(x == 5)",
                cs.provable(Predicate::Eq, &[], s.formal, &[], word(5)),
            )?;
        }
        Scenario::AssertMarker => {
            let s = scenarios::assert_marker();
            let a = ProgramAnalyses::compute(&s.program);
            let mut cs = ConstraintSolver::new(&s.program, &a, config.clone());
            report(
                "provable(var == 42)",
                cs.provable(Predicate::Eq, &[], s.var, &[], s.fortytwo),
            )?;
            for (v, lit) in cs.identify_fixed_values()? {
                let name = s.program.value(v).name.as_deref().unwrap_or("?");
                println!("fixed: {name} ({v}) = {lit}");
            }
        }
        Scenario::LoopExit => {
            let s = scenarios::loop_exit();
            let a = ProgramAnalyses::compute(&s.program);
            let mut cs = ConstraintSolver::new(&s.program, &a, config.clone());
            report(
                "provable(result >= n)",
                cs.provable(Predicate::Sge, &[], s.result, &[], s.n),
            )?;
            report(
                "provable(result == n)",
                cs.provable(Predicate::Eq, &[], s.result, &[], s.n),
            )?;
        }
        Scenario::ThreadSpawn => {
            let s = scenarios::thread_spawn();
            let a = ProgramAnalyses::compute(&s.program);
            let mut cs = ConstraintSolver::new(&s.program, &a, config.clone());
            report(
                "provable(doubled == 18)",
                cs.provable(Predicate::Eq, &[], s.doubled, &[], word(18)),
            )?;
        }
        Scenario::AddressTaken => {
            let s = scenarios::address_taken();
            let a = ProgramAnalyses::compute(&s.program);
            let mut cs = ConstraintSolver::new(&s.program, &a, config.clone());
            report(
                "provable(loaded == n)",
                cs.provable(Predicate::Eq, &[], s.loaded, &[], s.n),
            )?;
            report(
                "provable(seen == 3)",
                cs.provable(Predicate::Eq, &[], s.seen, &[], word(3)),
            )?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use test_log::test;

    use super::*;

    #[test]
    fn test_args() {
        Args::command().debug_assert();
        let args = Args::parse_from(["int-constraints", "-s", "phi-merge", "--replay", "out.smt2"]);
        assert_eq!(args.scenario, Some(Scenario::PhiMerge));
        let config = Config::from(&args);
        assert_eq!(config.solver_program, "z3");
        assert_eq!(config.solver_args, vec!["-smt2", "-in"]);
        assert_eq!(config.replay_file, Some(PathBuf::from("out.smt2")));
        assert!(!config.disable_constraints);
    }

    #[test]
    fn test_second_logger_is_reported() {
        // The test harness has installed its own logger already.
        assert!(init_logger(false).is_err());
    }

    #[test]
    fn test_scenario_names() {
        assert_eq!(Scenario::GuardedLoop.to_string(), "guarded-loop");
        assert_eq!(Scenario::AddressTaken.to_string(), "address-taken");
        assert_eq!(Scenario::iter().count(), 9);
    }
}
