use std::collections::HashSet;

use itertools::Itertools;
use log::debug;

use super::CaptureConstraints;
use crate::expr::{Clause, Expr};
use crate::ir::{BlockId, Op, ValueId};

impl CaptureConstraints<'_> {
    pub(super) fn capture_address_taken(&mut self) {
        let loads: Vec<ValueId> = self
            .program
            .instructions()
            .filter(|inst| self.is_integer_load(*inst))
            .collect();
        let mut captured = 0;
        for load in loads {
            if let Some(c) = self.get_must_assign(load) {
                self.facts.push(c);
                captured += 1;
            }
        }
        let globals: Vec<ValueId> = self
            .program
            .values()
            .filter(|v| self.program.is_global(*v))
            .collect();
        for g in globals {
            let facts = self.get_global_var(g);
            self.facts.extend(facts);
        }
        debug!("{captured} loads tied to a dominating access");
    }

    fn is_integer_load(&self, v: ValueId) -> bool {
        matches!(self.program.op(v), Some(Op::Load(_))) && self.is_reachable_integer(v)
    }

    /// `load = v` when the nearest dominating access to the loaded location
    /// stores `v` (or is an earlier load `v`), both run once, and nothing
    /// between the two may write the location.
    pub fn get_must_assign(&self, load: ValueId) -> Option<Clause> {
        let Some(Op::Load(q)) = self.program.op(load) else {
            return None;
        };
        if !self.oracles.executed_once(load) {
            return None;
        }
        let (source, value) = self.latest_overwriter(load, *q)?;
        if !self.oracles.executed_once(source)
            || !self.is_reachable_integer(value)
            || !self.is_fixed_integer(value)
            || self.program.width(value) != self.program.width(load)
        {
            return None;
        }
        if self.path_may_write(source, load, *q) {
            debug!("{q} may be written between {source} and {load}");
            return None;
        }
        Some(Clause::eq(self.leaf(load), self.leaf(value)))
    }

    /// Walks the dominators of `load` backwards to the first store or load
    /// through a pointer that must alias `q`. Returns it with the value it
    /// leaves in memory.
    fn latest_overwriter(&self, load: ValueId, q: ValueId) -> Option<(ValueId, ValueId)> {
        let mut block = self.program.block_of(load)?;
        let insts = self.program.block(block).insts.as_slice();
        let pos = insts.iter().position(|inst| *inst == load)?;
        let mut before = &insts[..pos];
        loop {
            for inst in before.iter().rev() {
                match self.program.op(*inst) {
                    Some(Op::Store { value, ptr }) if self.oracles.must_alias(*ptr, q) => {
                        return Some((*inst, *value));
                    }
                    Some(Op::Load(p)) if self.oracles.must_alias(*p, q) => {
                        return Some((*inst, *inst));
                    }
                    _ => {}
                }
            }
            block = self.oracles.idom(block)?;
            before = self.program.block(block).insts.as_slice();
        }
    }

    /// Whether an instruction strictly after `from` and strictly before
    /// `to` may write `q`. `from` dominates `to`.
    fn path_may_write(&self, from: ValueId, to: ValueId, q: ValueId) -> bool {
        let (Some(fb), Some(tb)) = (self.program.block_of(from), self.program.block_of(to)) else {
            return true;
        };
        let insts = |b: BlockId| self.program.block(b).insts.as_slice();
        let (Some(fi), Some(ti)) = (
            insts(fb).iter().position(|inst| *inst == from),
            insts(tb).iter().position(|inst| *inst == to),
        ) else {
            return true;
        };
        let writes = |range: &[ValueId]| range.iter().any(|inst| self.oracles.may_write(*inst, q));
        if fb == tb {
            return insts(fb).get(fi + 1..ti).map_or(true, writes);
        }
        let between = self
            .oracles
            .floodfill_reverse(tb, &HashSet::from([fb]));
        writes(&insts(fb)[fi + 1..])
            || writes(&insts(tb)[..ti])
            || between
                .iter()
                .filter(|b| **b != tb)
                .any(|b| writes(insts(*b)))
    }

    /// Loads of a global no running instruction may write. They all read
    /// its initializer, or without one at least agree with each other.
    pub fn get_global_var(&self, g: ValueId) -> Vec<Clause> {
        let Some(loads) = self.unwritten_global_loads(g) else {
            return vec![];
        };
        match self.program.global_initializer(g) {
            Some(init) => loads
                .iter()
                .map(|l| {
                    Clause::eq(
                        self.leaf(*l),
                        Expr::literal(self.program.width(*l), init),
                    )
                })
                .collect(),
            None => loads
                .iter()
                .tuple_windows()
                .filter(|(a, b)| self.program.width(**a) == self.program.width(**b))
                .map(|(a, b)| Clause::eq(self.leaf(*a), self.leaf(*b)))
                .collect(),
        }
    }

    /// `None` when `g` is not a global or something may write it.
    pub(super) fn unwritten_global_loads(&self, g: ValueId) -> Option<Vec<ValueId>> {
        if !self.program.is_global(g) {
            return None;
        }
        let written = self
            .program
            .instructions()
            .filter(|inst| !self.oracles.not_executed(*inst))
            .any(|inst| self.oracles.may_write(inst, g));
        if written {
            return None;
        }
        Some(
            self.program
                .instructions()
                .filter(|inst| {
                    matches!(self.program.op(*inst), Some(Op::Load(p)) if self.oracles.must_alias(*p, g))
                })
                .filter(|inst| self.is_reachable_integer(*inst))
                .collect(),
        )
    }
}
