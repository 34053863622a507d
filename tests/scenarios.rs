mod common;

use test_log::test;

use int_constraints::analysis::ProgramAnalyses;
use int_constraints::capture::ASSERT_EQ_MARKER;
use int_constraints::expr::{BinOp, Clause, Expr, Literal, Predicate};
use int_constraints::ir::{Op, Program, Terminator, Type};
use int_constraints::scenarios;
use int_constraints::{Config, ConstraintSolver, Error, WORD_WIDTH};

use common::solver_lock;

fn word(v: i64) -> Literal {
    Literal::word(v)
}

#[test]
fn test_allocations() {
    let Some(_lock) = solver_lock() else { return };
    let s = scenarios::allocations();
    let a = ProgramAnalyses::compute(&s.program);
    let end = |v, size| {
        Expr::binary(
            BinOp::Add,
            Expr::leaf(&s.program, v),
            Expr::literal(WORD_WIDTH, size),
        )
    };
    let ordered = Clause::cmp(Predicate::Sle, end(s.first, 4), Expr::leaf(&s.program, s.second));
    let reversed = Clause::cmp(Predicate::Sle, end(s.second, 8), Expr::leaf(&s.program, s.first));

    let mut cs = ConstraintSolver::new(&s.program, &a, Config::default());
    cs.check_consistency().expect("consistent");
    assert!(cs.provable_clause(&ordered).expect("query"));
    assert!(!cs.provable_clause(&reversed).expect("query"));
    drop(cs);

    // Without captured facts the order is unconstrained.
    let config = Config {
        disable_constraints: true,
        ..Config::default()
    };
    let mut cs = ConstraintSolver::new(&s.program, &a, config);
    assert!(!cs.provable_clause(&ordered).expect("query"));
}

#[test]
fn test_guarded_loop() {
    let Some(_lock) = solver_lock() else { return };
    let s = scenarios::guarded_loop();
    let a = ProgramAnalyses::compute(&s.program);
    let mut cs = ConstraintSolver::new(&s.program, &a, Config::default());
    assert!(cs.provable(Predicate::Sle, &[], word(0), &[], s.iv).expect("query"));
    assert!(cs.provable(Predicate::Slt, &[], s.iv, &[], s.n).expect("query"));
    assert!(!cs
        .provable(Predicate::Slt, &[], s.iv, &[], s.n_minus_one)
        .expect("query"));
    assert!(cs.satisfiable(Predicate::Sgt, &[], s.iv, &[], word(0)).expect("query"));
}

#[test]
fn test_counted_loop() {
    let Some(_lock) = solver_lock() else { return };
    let s = scenarios::counted_loop();
    let a = ProgramAnalyses::compute(&s.program);
    let mut cs = ConstraintSolver::new(&s.program, &a, Config::default());
    assert!(cs.provable(Predicate::Sle, &[], word(0), &[], s.iv).expect("query"));
    assert!(cs.provable(Predicate::Slt, &[], s.iv, &[], s.n).expect("query"));
    assert!(cs.provable(Predicate::Ne, &[], s.iv, &[], s.n).expect("query"));
    assert!(!cs.provable(Predicate::Eq, &[], s.iv, &[], word(0)).expect("query"));
}

/// Without an entry test the first iteration runs even for `n <= 0`.
#[test]
fn test_unguarded_counted_loop() {
    let Some(_lock) = solver_lock() else { return };
    let s = scenarios::unguarded_counted_loop();
    let a = ProgramAnalyses::compute(&s.program);
    let mut cs = ConstraintSolver::new(&s.program, &a, Config::default());
    assert!(cs.provable(Predicate::Sle, &[], word(0), &[], s.iv).expect("query"));
    assert!(!cs.provable(Predicate::Slt, &[], s.iv, &[], s.n).expect("query"));
    assert!(!cs.provable(Predicate::Ne, &[], s.iv, &[], s.n).expect("query"));
    assert!(cs.satisfiable(Predicate::Eq, &[], s.iv, &[], s.n).expect("query"));
}

#[test]
fn test_loop_exit() {
    let Some(_lock) = solver_lock() else { return };
    let s = scenarios::loop_exit();
    let a = ProgramAnalyses::compute(&s.program);
    let mut cs = ConstraintSolver::new(&s.program, &a, Config::default());
    assert!(cs.provable(Predicate::Sge, &[], s.result, &[], s.n).expect("query"));
    assert!(cs.provable(Predicate::Eq, &[], s.result, &[], s.n).expect("query"));
    assert!(!cs.provable(Predicate::Eq, &[], s.result, &[], word(1)).expect("query"));
}

#[test]
fn test_phi_merge() {
    let Some(_lock) = solver_lock() else { return };
    let s = scenarios::phi_merge();
    let a = ProgramAnalyses::compute(&s.program);
    let mut cs = ConstraintSolver::new(&s.program, &a, Config::default());
    assert!(cs.satisfiable(Predicate::Eq, &[], s.phi, &[], word(1)).expect("query"));
    assert!(cs.satisfiable(Predicate::Eq, &[], s.phi, &[], word(2)).expect("query"));
    assert!(!cs.satisfiable(Predicate::Eq, &[], s.phi, &[], word(3)).expect("query"));
    assert!(!cs.provable(Predicate::Eq, &[], s.phi, &[], word(1)).expect("query"));
    assert!(cs.provable(Predicate::Sge, &[], s.phi, &[], word(1)).expect("query"));
}

#[test]
fn test_two_callers() {
    let Some(_lock) = solver_lock() else { return };
    let s = scenarios::two_callers();
    let a = ProgramAnalyses::compute(&s.program);
    let mut cs = ConstraintSolver::new(&s.program, &a, Config::default());
    assert!(cs.satisfiable(Predicate::Eq, &[], s.formal, &[], word(5)).expect("query"));
    assert!(cs.satisfiable(Predicate::Eq, &[], s.formal, &[], word(7)).expect("query"));
    assert!(!cs.provable(Predicate::Eq, &[], s.formal, &[], word(5)).expect("query"));
    assert!(cs.provable(Predicate::Ne, &[], s.formal, &[], word(6)).expect("query"));
}

#[test]
fn test_thread_spawn() {
    let Some(_lock) = solver_lock() else { return };
    let s = scenarios::thread_spawn();
    let a = ProgramAnalyses::compute(&s.program);
    let mut cs = ConstraintSolver::new(&s.program, &a, Config::default());
    assert!(cs.provable(Predicate::Eq, &[], s.doubled, &[], word(18)).expect("query"));
    assert!(cs.provable(Predicate::Eq, &[s.spawn], s.arg, &[], word(9)).expect("query"));
}

#[test]
fn test_address_taken() {
    let Some(_lock) = solver_lock() else { return };
    let s = scenarios::address_taken();
    let a = ProgramAnalyses::compute(&s.program);
    let mut cs = ConstraintSolver::new(&s.program, &a, Config::default());
    assert!(cs.provable(Predicate::Eq, &[], s.loaded, &[], s.n).expect("query"));
    assert!(cs.provable(Predicate::Eq, &[], s.seen, &[], word(3)).expect("query"));
    assert!(!cs.satisfiable(Predicate::Ne, &[], s.seen, &[], word(3)).expect("query"));
    assert!(!cs.provable(Predicate::Eq, &[], s.loaded, &[], word(3)).expect("query"));
}

#[test]
fn test_assert_marker() {
    let Some(_lock) = solver_lock() else { return };
    let s = scenarios::assert_marker();
    let a = ProgramAnalyses::compute(&s.program);
    let mut cs = ConstraintSolver::new(&s.program, &a, Config::default());
    assert!(cs.provable(Predicate::Eq, &[], s.var, &[], s.fortytwo).expect("query"));

    let fixed = cs.identify_fixed_values().expect("discovery");
    assert!(fixed.contains(&(s.var, word(42))), "{fixed:?}");
    assert!(fixed.contains(&(s.plus_one, word(43))), "{fixed:?}");
    assert_eq!(cs.get_fixed_value(s.plus_one), Some(word(43)));
}

/// Two markers pin the same load to different constants.
#[test]
fn test_inconsistent_facts_are_diagnosed() {
    let Some(_lock) = solver_lock() else { return };
    let mut p = Program::new();
    let i32t = Type::Int(32);
    let marker = p.add_function(ASSERT_EQ_MARKER, &[i32t, i32t], Type::Void);
    let main = p.add_function("main", &[], Type::Void);
    let g = p.add_global("g");
    let b = p.add_block(main, "entry");
    let var = p.append(b, i32t, Op::Load(g));
    let one = p.const_int(i32t, 1);
    let two = p.const_int(i32t, 2);
    p.call(b, Type::Void, marker, vec![var, one]);
    p.call(b, Type::Void, marker, vec![var, two]);
    p.set_terminator(b, Terminator::Ret(None));

    let a = ProgramAnalyses::compute(&p);
    let mut cs = ConstraintSolver::new(&p, &a, Config::default());
    match cs.check_consistency() {
        Err(Error::Inconsistent { core }) => {
            assert_eq!(core.len(), 2, "{core:?}");
            assert!(core.contains(&format!("(x{} = 1)", var.0)));
            assert!(core.contains(&format!("(x{} = 2)", var.0)));
        }
        other => panic!("expected an inconsistency, got {other:?}"),
    }
}
