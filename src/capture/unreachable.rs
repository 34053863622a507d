use std::collections::HashSet;

use log::warn;

use super::CaptureConstraints;
use crate::expr::{Clause, Expr, Literal, Predicate};
use crate::ir::{BlockId, FuncId, Terminator, ValueId};
use crate::BOOL_WIDTH;

/// Calls to functions whose name starts with this are hand-inserted
/// `arg0 == arg1` invariants.
pub const ASSERT_EQ_MARKER: &str = "slicer_assert_eq";

impl CaptureConstraints<'_> {
    pub(super) fn capture_unreachable(&mut self) {
        for func in self.program.functions() {
            if self.program.func(func).is_declaration()
                || self.oracles.function_not_executed(func)
                || !self.oracles.function_executed_once(func)
            {
                continue;
            }
            let facts = self.get_unreachable_in_function(func);
            self.facts.extend(facts);
        }
    }

    /// The condition under which `block` does not take its successor edge
    /// `i`. Edge order follows `Terminator::successors`.
    pub fn get_avoid_branch(&self, block: BlockId, i: usize) -> Option<Clause> {
        match &self.program.block(block).term {
            Terminator::CondBr { cond, .. } => {
                if !self.is_reachable_integer(*cond) || self.program.width(*cond) != BOOL_WIDTH {
                    return None;
                }
                // Avoiding the true edge means the condition is false.
                let taken = match i {
                    0 => false,
                    1 => true,
                    _ => return None,
                };
                Some(Clause::eq(self.leaf(*cond), Expr::Literal(Literal::bool(taken))))
            }
            Terminator::Switch { cond, cases, .. } => {
                if !self.is_reachable_integer(*cond) {
                    return None;
                }
                if i == 0 {
                    // Some case matched.
                    Clause::any(
                        cases
                            .iter()
                            .map(|(value, _)| Clause::eq(self.leaf(*cond), self.leaf(*value))),
                    )
                } else {
                    let (value, _) = cases.get(i - 1)?;
                    Some(Clause::cmp(Predicate::Ne, self.leaf(*cond), self.leaf(*value)))
                }
            }
            Terminator::IndirectBr { .. } => {
                warn!("cannot exclude edge {i} of indirect branch in {block}");
                None
            }
            Terminator::Br(_) | Terminator::Ret(_) | Terminator::Unreachable => None,
        }
    }

    /// Edge exclusions for blocks that post-dominate the entry of `func`,
    /// plus its explicit equality assertions.
    pub fn get_unreachable_in_function(&self, func: FuncId) -> Vec<Clause> {
        let blocks = &self.program.func(func).blocks;
        let Some(entry) = self.program.func(func).entry() else {
            return vec![];
        };
        let mut facts = vec![];

        // Post-dominance of the entry, ignoring paths into marked blocks.
        let mut sink: HashSet<BlockId> = blocks
            .iter()
            .copied()
            .filter(|b| self.oracles.is_unreachable(*b))
            .collect();
        for block in blocks {
            let inserted = sink.insert(*block);
            let visited = self.oracles.floodfill(entry, &sink);
            let post_dominates = !visited
                .iter()
                .any(|b| !sink.contains(b) && self.program.block(*b).term.is_return());
            let succs = self.program.block(*block).term.successors();
            if post_dominates && succs.len() > 1 {
                for (i, succ) in succs.iter().enumerate() {
                    if self.oracles.is_unreachable(*succ) {
                        facts.extend(self.get_avoid_branch(*block, i));
                    }
                }
            }
            if inserted {
                sink.remove(block);
            }
        }

        for block in blocks {
            for inst in &self.program.block(*block).insts {
                if let Some((v, c)) = self.assert_eq_marker(*inst) {
                    facts.push(Clause::eq(self.leaf(v), self.leaf(c)));
                }
            }
        }
        facts
    }

    /// The two operands of an equality marker call.
    pub fn assert_eq_marker(&self, inst: ValueId) -> Option<(ValueId, ValueId)> {
        if !self.program.callee_name(inst)?.starts_with(ASSERT_EQ_MARKER) {
            return None;
        }
        match self.program.call_args(inst) {
            [v, c] if self.program.width(*v) == self.program.width(*c) => Some((*v, *c)),
            _ => {
                warn!("malformed {ASSERT_EQ_MARKER} call {inst}");
                None
            }
        }
    }
}
