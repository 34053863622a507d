//! SMT backend for bit-vector clauses.
//!
//! Wraps an `easy_smt::Context` talking to an external SMT-LIB2 solver.
//! Only one `Solver` may be alive at a time; a second one fails with
//! `Error::SolverBusy`. Declarations follow push/pop scopes, so a name
//! declared inside a `Scope` is redeclared when next needed after the scope
//! is dropped.

mod simplify;
mod translate;

use std::collections::HashSet;
use std::fs::File;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

use easy_smt::{SExpr, SExprData};
use log::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::expr::{Clause, Expr, Literal};

pub use easy_smt::Response;
pub use simplify::{fold_expr, try_to_simplify};

static SOLVER_IN_USE: AtomicBool = AtomicBool::new(false);

pub struct Solver {
    smt: easy_smt::Context,
    config: Config,
    declared: HashSet<String>,
    /// Names declared at each push level; the first entry is the base level.
    scopes: Vec<Vec<String>>,
}

impl Solver {
    pub fn new(config: &Config) -> Result<Self> {
        if SOLVER_IN_USE.swap(true, Ordering::SeqCst) {
            return Err(Error::SolverBusy);
        }
        match Self::context(config) {
            Ok(smt) => Ok(Self {
                smt,
                config: config.clone(),
                declared: HashSet::new(),
                scopes: vec![vec![]],
            }),
            Err(e) => {
                SOLVER_IN_USE.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn context(config: &Config) -> Result<easy_smt::Context> {
        let mut builder = easy_smt::ContextBuilder::new();
        builder.solver(
            config.solver_program.as_str(),
            config.solver_args.iter().map(String::as_str),
        );
        if let Some(path) = &config.replay_file {
            builder.replay_file(Some(File::create(path)?));
        }
        let mut smt = builder.build()?;
        smt.set_option(":produce-models", smt.true_())?;
        Ok(smt)
    }

    /// Replaces the backend with a fresh process, keeping the lease.
    pub fn restart(&mut self) -> Result<()> {
        debug!("restarting {}", self.config.solver_program);
        self.smt = Self::context(&self.config)?;
        self.declared.clear();
        self.scopes = vec![vec![]];
        Ok(())
    }

    /// Opens a push scope that is popped when the guard drops.
    pub fn scope(&mut self) -> Result<Scope<'_>> {
        self.smt.push()?;
        self.scopes.push(vec![]);
        Ok(Scope { solver: self })
    }

    fn pop(&mut self) -> Result<()> {
        self.smt.pop()?;
        if let Some(names) = self.scopes.pop() {
            for name in names {
                self.declared.remove(&name);
            }
        }
        Ok(())
    }

    /// Asserts `c` together with the side conditions its arithmetic needs.
    pub fn assert_clause(&mut self, c: &Clause) -> Result<()> {
        let mut guards = vec![];
        let f = self.translate_clause(c, &mut guards)?;
        debug!("assert {}", self.smt.display(f));
        self.smt.assert(f)?;
        for guard in guards {
            self.smt.assert(guard)?;
        }
        Ok(())
    }

    pub fn check(&mut self) -> Result<Response> {
        Ok(self.smt.check()?)
    }

    /// Values of `exprs` in the model of the last satisfiable check.
    pub fn model_values(&mut self, exprs: &[Expr]) -> Result<Vec<Literal>> {
        if exprs.is_empty() {
            return Ok(vec![]);
        }
        let mut guards = vec![];
        let terms = exprs
            .iter()
            .map(|e| self.translate_expr(e, &mut guards))
            .collect::<Result<Vec<_>>>()?;
        let values = self.smt.get_value(terms)?;
        values
            .into_iter()
            .zip(exprs)
            .map(|((_, value), e)| self.parse_literal(value, e.width()))
            .collect()
    }

    fn parse_literal(&self, value: SExpr, width: u32) -> Result<Literal> {
        let SExprData::Atom(atom) = self.smt.get(value) else {
            return Err(Error::UnexpectedModel(self.smt.display(value).to_string()));
        };
        let bits = if let Some(digits) = atom.strip_prefix("#b") {
            u64::from_str_radix(digits, 2)
        } else if let Some(digits) = atom.strip_prefix("#x") {
            u64::from_str_radix(digits, 16)
        } else {
            return Err(Error::UnexpectedModel(atom.to_string()));
        };
        let bits = bits.map_err(|_| Error::UnexpectedModel(atom.to_string()))?;
        Ok(Literal::new(width, bits as i64))
    }

    /// SMT-LIB text of `c` without asserting it.
    pub fn display_clause(&mut self, c: &Clause) -> Result<String> {
        let mut guards = vec![];
        let f = self.translate_clause(c, &mut guards)?;
        Ok(self.smt.display(f).to_string())
    }
}

impl Drop for Solver {
    fn drop(&mut self) {
        SOLVER_IN_USE.store(false, Ordering::SeqCst);
    }
}

/// A push scope on a `Solver`; popped on drop.
pub struct Scope<'s> {
    solver: &'s mut Solver,
}

impl Deref for Scope<'_> {
    type Target = Solver;

    fn deref(&self) -> &Solver {
        self.solver
    }
}

impl DerefMut for Scope<'_> {
    fn deref_mut(&mut self) -> &mut Solver {
        self.solver
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.solver.pop() {
            warn!("failed to pop solver scope: {e}");
        }
    }
}
