//! Satisfiability and validity queries over captured program facts.

use log::{debug, info, log_enabled, warn, Level};

use crate::canon::{is_tautology, Canonicalizer, Node};
use crate::capture::CaptureConstraints;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::expr::{Clause, Expr, Literal, Predicate};
use crate::ir::{Program, Use, ValueId};
use crate::oracle::Oracles;
use crate::realize::Realizer;
use crate::solver::{try_to_simplify, Response, Solver};

/// One side of a value-level query: a value's own result, or one operand
/// edge as seen by its user.
pub trait Operand {
    fn to_expr(&self, program: &Program) -> Expr;
}

impl Operand for ValueId {
    fn to_expr(&self, program: &Program) -> Expr {
        Expr::leaf(program, *self)
    }
}

impl Operand for Use {
    fn to_expr(&self, program: &Program) -> Expr {
        Expr::use_of(program, *self)
    }
}

impl Operand for Literal {
    fn to_expr(&self, _: &Program) -> Expr {
        Expr::Literal(*self)
    }
}

/// Answers queries about program values against the captured fact set.
///
/// The backend solver is started on the first query that needs it, at which
/// point the canonicalized fact set is asserted and checked for consistency.
pub struct ConstraintSolver<'a> {
    pub(crate) program: &'a Program,
    pub(crate) capture: CaptureConstraints<'a>,
    pub(crate) canon: Canonicalizer,
    /// Canonicalized facts that do not simplify to true.
    pub(crate) facts: Vec<Clause>,
    solver: Option<Solver>,
    config: Config,
}

impl<'a> ConstraintSolver<'a> {
    pub fn new(program: &'a Program, oracles: &'a dyn Oracles, config: Config) -> Self {
        let mut capture = CaptureConstraints::new(program, oracles);
        capture.set_disabled(config.disable_constraints);
        capture.capture();
        let mut this = Self {
            program,
            capture,
            canon: Canonicalizer::new(),
            facts: vec![],
            solver: None,
            config,
        };
        this.calculate();
        this
    }

    pub fn capture(&self) -> &CaptureConstraints<'a> {
        &self.capture
    }

    pub fn facts(&self) -> &[Clause] {
        &self.facts
    }

    /// Re-runs capture and rebuilds the canonical map and the backend.
    pub fn recalculate(&mut self) -> Result<()> {
        self.solver = None;
        self.capture.capture();
        self.calculate();
        self.check_consistency()
    }

    fn calculate(&mut self) {
        let capture = &self.capture;
        self.canon.clear();
        self.canon
            .identify_eqs(capture.facts(), |v| capture.is_fixed_integer(v));
        self.facts = capture
            .facts()
            .iter()
            .map(|c| self.canon.canonicalize(c))
            .filter(|c| try_to_simplify(c) != Some(true))
            .collect();
        debug!(
            "{} of {} captured facts left after canonicalization",
            self.facts.len(),
            capture.facts().len()
        );
    }

    /// Starts the backend if needed. Fails with `Error::Inconsistent` when
    /// the fact set has no model.
    pub fn check_consistency(&mut self) -> Result<()> {
        self.backend().map(|_| ())
    }

    pub(crate) fn backend(&mut self) -> Result<&mut Solver> {
        let solver = match self.solver.take() {
            Some(solver) => solver,
            None => self.start()?,
        };
        Ok(self.solver.insert(solver))
    }

    fn start(&self) -> Result<Solver> {
        let mut solver = Solver::new(&self.config)?;
        for c in &self.facts {
            solver.assert_clause(c)?;
        }
        match solver.check()? {
            Response::Sat => {
                info!("{} facts are consistent", self.facts.len());
                Ok(solver)
            }
            Response::Unsat => Err(self.diagnose(&mut solver)?),
            Response::Unknown => Err(Error::SolverFault {
                clause: "consistency of the captured facts".to_string(),
            }),
        }
    }

    /// Shrinks the captured facts to a minimal inconsistent subset by
    /// dropping one fact at a time.
    fn diagnose(&self, solver: &mut Solver) -> Result<Error> {
        warn!("captured facts are inconsistent, diagnosing");
        solver.restart()?;
        let facts: Vec<&Clause> = self
            .capture
            .facts()
            .iter()
            .filter(|c| try_to_simplify(c) != Some(true))
            .collect();
        let mut needed = vec![true; facts.len()];
        for j in 0..facts.len() {
            needed[j] = false;
            let mut scope = solver.scope()?;
            for (c, _) in facts.iter().zip(&needed).filter(|(_, keep)| **keep) {
                scope.assert_clause(c)?;
            }
            if scope.check()? != Response::Unsat {
                needed[j] = true;
            }
        }
        let core: Vec<String> = facts
            .iter()
            .zip(&needed)
            .filter(|(_, keep)| **keep)
            .map(|(c, _)| c.to_string())
            .collect();
        Ok(Error::Inconsistent { core })
    }

    /// Whether `c` holds in every execution.
    pub fn provable_clause(&mut self, c: &Clause) -> Result<bool> {
        let canonical = self.canon.canonicalize(c);
        debug!("provable? {c} as {canonical}");
        // Sound only while the realized facts are consistent.
        if is_tautology(&canonical) || try_to_simplify(&canonical) == Some(true) {
            return Ok(true);
        }

        let mut realizer = Realizer::new(&self.capture);
        realizer.realize_clause(c);
        let realized: Vec<Clause> = realizer
            .into_facts()
            .iter()
            .map(|f| self.canon.canonicalize(f))
            .filter(|f| try_to_simplify(f) != Some(true))
            .collect();

        let solver = self.backend()?;
        let mut scope = solver.scope()?;
        for f in &realized {
            scope.assert_clause(f)?;
        }
        scope.assert_clause(&Clause::not(canonical.clone()))?;
        match scope.check()? {
            Response::Unsat => Ok(true),
            Response::Sat => {
                if log_enabled!(Level::Debug) {
                    let mut leaves = vec![];
                    canonical.visit_leaves(&mut |e| {
                        if e.as_literal().is_none() {
                            leaves.push(e.clone());
                        }
                    });
                    let values = scope.model_values(&leaves)?;
                    for (leaf, value) in leaves.iter().zip(values) {
                        debug!("counterexample: {leaf} = {value}");
                    }
                }
                Ok(false)
            }
            Response::Unknown => Err(Error::SolverFault {
                clause: c.to_string(),
            }),
        }
    }

    /// Whether `c` holds in some execution.
    pub fn satisfiable_clause(&mut self, c: &Clause) -> Result<bool> {
        if is_tautology(&self.canon.canonicalize(c)) {
            return Ok(true);
        }
        Ok(!self.provable_clause(&Clause::not(c.clone()))?)
    }

    /// Whether `v1 pred v2` always holds, `v1` evaluated in context 1 along
    /// `cs1` and `v2` in context 2 along `cs2`.
    pub fn provable(
        &mut self,
        pred: Predicate,
        cs1: &[ValueId],
        v1: impl Operand,
        cs2: &[ValueId],
        v2: impl Operand,
    ) -> Result<bool> {
        let c = self.query_clause(pred, cs1, &v1, cs2, &v2)?;
        self.provable_clause(&c)
    }

    pub fn satisfiable(
        &mut self,
        pred: Predicate,
        cs1: &[ValueId],
        v1: impl Operand,
        cs2: &[ValueId],
        v2: impl Operand,
    ) -> Result<bool> {
        let c = self.query_clause(pred, cs1, &v1, cs2, &v2)?;
        self.satisfiable_clause(&c)
    }

    fn query_clause(
        &self,
        pred: Predicate,
        cs1: &[ValueId],
        v1: &dyn Operand,
        cs2: &[ValueId],
        v2: &dyn Operand,
    ) -> Result<Clause> {
        let side = |v: &dyn Operand, cs: &[ValueId], ctx| {
            let mut e = v.to_expr(self.program);
            self.capture.attach_context_expr(&mut e, ctx);
            e.set_callstack(cs);
            e
        };
        let (e1, e2) = (side(v1, cs1, 1), side(v2, cs2, 2));
        if e1.width() != e2.width() {
            return Err(Error::WidthMismatch {
                lhs: e1.width(),
                rhs: e2.width(),
            });
        }
        Ok(Clause::cmp(pred, e1, e2))
    }

    /// The literal `v` is known to equal, if any.
    pub fn get_fixed_value(&mut self, v: ValueId) -> Option<Literal> {
        if let Some(c) = self.program.const_value(v) {
            return Some(Literal::new(self.program.width(v), c));
        }
        match self.canon.root_of(v) {
            Node::Literal(lit) => Some(lit),
            Node::Value(_) => None,
        }
    }
}
