//! Discovery of values that are constant in every execution although the
//! program does not spell them as literals.

use std::collections::HashSet;

use log::{debug, info};

use crate::canon::Node;
use crate::error::{Error, Result};
use crate::expr::{Clause, Expr, Literal, Predicate};
use crate::ir::ValueId;
use crate::query::ConstraintSolver;
use crate::solver::Response;

impl ConstraintSolver<'_> {
    /// Confirms candidate values against one model of the fact set and
    /// binds each confirmed value to its literal. Returns every fixed value
    /// known to equal a literal afterwards.
    pub fn identify_fixed_values(&mut self) -> Result<Vec<(ValueId, Literal)>> {
        let mut candidates: Vec<ValueId> = self
            .capture
            .fixed_integers()
            .iter()
            .copied()
            .filter(|v| {
                !self.program.is_constant(*v)
                    && self.program.ty(*v).is_integer_or_pointer()
            })
            .collect();
        candidates.retain(|v| self.canon.root_of(*v) == Node::Value(*v));
        self.refine_candidates(&mut candidates);
        debug!("{} fixed-value candidates", candidates.len());

        let exprs: Vec<Expr> = candidates
            .iter()
            .map(|v| Expr::leaf(self.program, *v))
            .collect();
        let solver = self.backend()?;
        match solver.check()? {
            Response::Sat => {}
            _ => {
                return Err(Error::SolverFault {
                    clause: "model of the captured facts".to_string(),
                })
            }
        }
        let guesses = solver.model_values(&exprs)?;
        let mut open: Vec<(ValueId, Expr, Literal)> = candidates
            .into_iter()
            .zip(exprs)
            .zip(guesses)
            .map(|((v, e), guess)| (v, e, guess))
            .collect();

        let mut confirmed = vec![];
        let mut i = 0;
        while i < open.len() {
            let (v, e, guess) = open[i].clone();
            let mut scope = solver.scope()?;
            scope.assert_clause(&Clause::cmp(Predicate::Ne, e, Expr::Literal(guess)))?;
            match scope.check()? {
                Response::Unsat => {
                    confirmed.push((v, guess));
                    i += 1;
                }
                Response::Sat => {
                    // Later candidates that moved in this model are not fixed.
                    let later = open.split_off(i + 1);
                    let exprs: Vec<Expr> = later.iter().map(|(_, e, _)| e.clone()).collect();
                    let values = scope.model_values(&exprs)?;
                    open.pop();
                    open.extend(
                        later
                            .into_iter()
                            .zip(values)
                            .filter(|((_, _, guess), value)| guess == value)
                            .map(|(candidate, _)| candidate),
                    );
                }
                Response::Unknown => {
                    return Err(Error::SolverFault {
                        clause: format!("{v} != {guess}"),
                    })
                }
            }
        }

        for (v, lit) in &confirmed {
            info!("{v} is fixed to {lit}");
            self.canon.bind(*v, *lit);
        }
        info!("confirmed {} fixed values", confirmed.len());

        let fixed: Vec<ValueId> = self.capture.fixed_integers().iter().copied().collect();
        Ok(fixed
            .into_iter()
            .filter_map(|v| match self.canon.root_of(v) {
                Node::Literal(lit) => Some((v, lit)),
                Node::Value(_) => None,
            })
            .collect())
    }

    /// Drops candidates that no non-trivial fact mentions.
    fn refine_candidates(&self, candidates: &mut Vec<ValueId>) {
        let mut mentioned = HashSet::new();
        for c in &self.facts {
            c.visit_leaves(&mut |leaf| {
                if let Some(v) = leaf.referenced_value() {
                    mentioned.insert(v);
                }
            });
        }
        candidates.retain(|v| mentioned.contains(v));
    }
}
