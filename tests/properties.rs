mod common;

use test_log::test;

use int_constraints::analysis::ProgramAnalyses;
use int_constraints::expr::{BinOp, Clause, Expr, Literal, Predicate, UnaryOp};
use int_constraints::ir::ValueId;
use int_constraints::scenarios;
use int_constraints::solver::{Response, Solver};
use int_constraints::{Config, ConstraintSolver, Error};

use common::solver_lock;

fn x(id: u32) -> Expr {
    Expr::value(ValueId(id), 32)
}

fn lit(v: i64) -> Expr {
    Expr::literal(32, v)
}

#[test]
fn test_complementarity() {
    let Some(_lock) = solver_lock() else { return };
    let s = scenarios::guarded_loop();
    let a = ProgramAnalyses::compute(&s.program);
    let mut cs = ConstraintSolver::new(&s.program, &a, Config::default());
    let mut iv = Expr::leaf(&s.program, s.iv);
    iv.set_context(1);
    let n = Expr::leaf(&s.program, s.n);
    let clauses = [
        Clause::cmp(Predicate::Slt, iv.clone(), n.clone()),
        Clause::cmp(Predicate::Sgt, iv.clone(), lit(3)),
        Clause::eq(iv.clone(), n.clone()),
        Clause::or(
            Clause::eq(iv.clone(), lit(0)),
            Clause::cmp(Predicate::Sgt, n, lit(1)),
        ),
    ];
    for c in &clauses {
        let sat = cs.satisfiable_clause(c).expect("query");
        let valid_negation = cs.provable_clause(&Clause::not(c.clone())).expect("query");
        assert_eq!(sat, !valid_negation, "{c}");
    }
}

#[test]
fn test_fixed_values_are_provable() {
    let Some(_lock) = solver_lock() else { return };
    let s = scenarios::assert_marker();
    let a = ProgramAnalyses::compute(&s.program);
    let fixed = {
        let mut cs = ConstraintSolver::new(&s.program, &a, Config::default());
        cs.identify_fixed_values().expect("discovery")
    };
    assert!(!fixed.is_empty());
    // A fresh instance has not bound anything yet.
    let mut cs = ConstraintSolver::new(&s.program, &a, Config::default());
    for (v, k) in fixed {
        assert!(cs.provable(Predicate::Eq, &[], v, &[], k).expect("query"), "{v} = {k}");
    }
}

#[test]
fn test_merged_value_is_not_fixed() {
    let Some(_lock) = solver_lock() else { return };
    let s = scenarios::phi_merge();
    let a = ProgramAnalyses::compute(&s.program);
    let mut cs = ConstraintSolver::new(&s.program, &a, Config::default());
    assert_eq!(cs.identify_fixed_values().expect("discovery"), vec![]);
    assert_eq!(cs.get_fixed_value(s.phi), None);
}

#[test]
fn test_recalculate_is_stable() {
    let Some(_lock) = solver_lock() else { return };
    let s = scenarios::allocations();
    let a = ProgramAnalyses::compute(&s.program);
    let mut cs = ConstraintSolver::new(&s.program, &a, Config::default());
    let before = cs.capture().fingerprint();
    let facts = cs.facts().to_vec();
    cs.recalculate().expect("consistent");
    assert_eq!(cs.capture().fingerprint(), before);
    assert_eq!(cs.facts(), facts.as_slice());
}

#[test]
fn test_single_solver() {
    let Some(_lock) = solver_lock() else { return };
    let first = Solver::new(&Config::default()).expect("solver");
    assert!(matches!(
        Solver::new(&Config::default()),
        Err(Error::SolverBusy)
    ));
    drop(first);
    Solver::new(&Config::default()).expect("lease released");
}

#[test]
fn test_scopes_forget_declarations() {
    let Some(_lock) = solver_lock() else { return };
    let mut solver = Solver::new(&Config::default()).expect("solver");
    {
        let mut scope = solver.scope().expect("push");
        scope.assert_clause(&Clause::eq(x(5), lit(1))).expect("assert");
        assert_eq!(scope.check().expect("check"), Response::Sat);
    }
    // x5 is declared again after the pop.
    solver.assert_clause(&Clause::eq(x(5), lit(2))).expect("assert");
    solver
        .assert_clause(&Clause::eq(x(6), Expr::binary(BinOp::Add, x(5), lit(3))))
        .expect("assert");
    assert_eq!(solver.check().expect("check"), Response::Sat);
    assert_eq!(
        solver.model_values(&[x(5), x(6)]).expect("model"),
        vec![Literal::word(2), Literal::word(5)]
    );
}

#[test]
fn test_translation() {
    let Some(_lock) = solver_lock() else { return };
    let mut solver = Solver::new(&Config::default()).expect("solver");
    let bits = |v: u32| format!("#b{v:032b}");

    let plus_zero = Clause::eq(Expr::binary(BinOp::Add, x(1), lit(0)), x(2));
    assert_eq!(solver.display_clause(&plus_zero).expect("translate"), "(= x1 x2)");

    let ne = Clause::cmp(Predicate::Ne, x(1), lit(7));
    assert_eq!(
        solver.display_clause(&ne).expect("translate"),
        format!("(not (= x1 {}))", bits(7))
    );

    let flag = Expr::value(ValueId(3), 1);
    let widened = Clause::eq(Expr::unary(UnaryOp::ZExt, flag), x(1));
    assert_eq!(
        solver.display_clause(&widened).expect("translate"),
        "(= ((_ zero_extend 31) x3) x1)"
    );

    let shift = Clause::eq(Expr::binary(BinOp::Shl, x(1), x(2)), x(4));
    assert_eq!(
        solver.display_clause(&shift).expect("translate"),
        format!("(= (bvshl x1 (bvurem x2 {})) x4)", bits(32))
    );
}

#[cfg(not(feature = "overflow-guards"))]
#[test]
fn test_power_of_two_product_is_a_shift() {
    let Some(_lock) = solver_lock() else { return };
    let mut solver = Solver::new(&Config::default()).expect("solver");
    let times_eight = Clause::eq(Expr::binary(BinOp::Mul, lit(8), x(1)), x(2));
    assert_eq!(
        solver.display_clause(&times_eight).expect("translate"),
        format!("(= (bvshl x1 #b{:032b}) x2)", 3)
    );
}

/// `x2 = x1 + 1` and `x2 <= x1` together need a wrapping addition.
fn successor_not_greater(solver: &mut Solver) -> Response {
    let mut scope = solver.scope().expect("push");
    scope
        .assert_clause(&Clause::eq(x(2), Expr::binary(BinOp::Add, x(1), lit(1))))
        .expect("assert");
    scope
        .assert_clause(&Clause::cmp(Predicate::Sle, x(2), x(1)))
        .expect("assert");
    scope.check().expect("check")
}

/// `x2 = x1 / x3` with `x3 = 0`.
fn division_by_zero(solver: &mut Solver) -> Response {
    let mut scope = solver.scope().expect("push");
    scope
        .assert_clause(&Clause::eq(x(2), Expr::binary(BinOp::SDiv, x(1), x(3))))
        .expect("assert");
    scope.assert_clause(&Clause::eq(x(3), lit(0))).expect("assert");
    scope.check().expect("check")
}

#[cfg(feature = "overflow-guards")]
#[test]
fn test_overflow_guards_rule_out_wrapping() {
    let Some(_lock) = solver_lock() else { return };
    let mut solver = Solver::new(&Config::default()).expect("solver");
    assert_eq!(successor_not_greater(&mut solver), Response::Unsat);
}

#[cfg(not(feature = "overflow-guards"))]
#[test]
fn test_addition_wraps_without_guards() {
    let Some(_lock) = solver_lock() else { return };
    let mut solver = Solver::new(&Config::default()).expect("solver");
    assert_eq!(successor_not_greater(&mut solver), Response::Sat);
}

#[cfg(feature = "division-guards")]
#[test]
fn test_division_guards_rule_out_zero_divisor() {
    let Some(_lock) = solver_lock() else { return };
    let mut solver = Solver::new(&Config::default()).expect("solver");
    assert_eq!(division_by_zero(&mut solver), Response::Unsat);
}

#[cfg(not(feature = "division-guards"))]
#[test]
fn test_division_by_zero_is_unconstrained() {
    let Some(_lock) = solver_lock() else { return };
    let mut solver = Solver::new(&Config::default()).expect("solver");
    assert_eq!(division_by_zero(&mut solver), Response::Sat);
}

/// `main(n)` computes `n + 1` on its only path.
#[cfg(feature = "overflow-guards")]
#[test]
fn test_successor_is_greater_under_guards() {
    use int_constraints::ir::{Program, Terminator, Type};

    let Some(_lock) = solver_lock() else { return };
    let mut p = Program::new();
    let i32t = Type::Int(32);
    let main = p.add_function("main", &[i32t], Type::Void);
    let n = p.func(main).params[0];
    let b = p.add_block(main, "entry");
    let one = p.const_int(i32t, 1);
    let succ = p.binary(b, BinOp::Add, n, one);
    p.set_terminator(b, Terminator::Ret(None));

    let a = ProgramAnalyses::compute(&p);
    let mut cs = ConstraintSolver::new(&p, &a, Config::default());
    assert!(cs.provable(Predicate::Sgt, &[], succ, &[], n).expect("query"));
}
