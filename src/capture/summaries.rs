use itertools::Itertools;
use log::debug;

use super::CaptureConstraints;
use crate::expr::{BinOp, Clause, Expr, Predicate};
use crate::ir::{Op, ValueId};
use crate::{INT_MAX, WORD_WIDTH};

/// Known postconditions of a library routine's return value.
#[derive(Clone, Copy, Debug)]
pub struct LibcallSummary {
    /// `ret >= min_ret`.
    pub min_ret: i64,
    /// Argument holding a length that bounds `ret` when non-negative.
    pub len_arg: Option<usize>,
}

pub const LIBCALL_SUMMARIES: &[(&str, LibcallSummary)] = &[
    (
        "pwrite",
        LibcallSummary {
            min_ret: -1,
            len_arg: Some(2),
        },
    ),
    (
        "recv",
        LibcallSummary {
            min_ret: -1,
            len_arg: Some(2),
        },
    ),
    (
        "rand",
        LibcallSummary {
            min_ret: 0,
            len_arg: None,
        },
    ),
];

impl CaptureConstraints<'_> {
    pub(super) fn capture_function_summaries(&mut self) {
        let program = self.program;
        let mut blocks = vec![];
        for inst in program.instructions() {
            if let Some(block) = self.memory_allocation(inst) {
                blocks.push(block);
            }
            let facts = self.get_libcall_summary(inst);
            self.facts.extend(facts);
        }
        debug!("{} allocation sites", blocks.len());

        let int_max = Expr::literal(WORD_WIDTH, INT_MAX);
        for (start, size) in &blocks {
            // start <= INT_MAX - size
            self.facts.push(Clause::cmp(
                Predicate::Sle,
                start.clone(),
                Expr::binary(BinOp::Sub, int_max.clone(), size.clone()),
            ));
        }
        for ((start, size), (next, _)) in blocks.iter().tuple_windows() {
            self.facts.push(Clause::cmp(
                Predicate::Sle,
                Expr::binary(BinOp::Add, start.clone(), size.clone()),
                next.clone(),
            ));
        }
    }

    /// `(start, size)` of the block allocated by `inst`, for allocation
    /// sites that run exactly once.
    fn memory_allocation(&self, inst: ValueId) -> Option<(Expr, Expr)> {
        if !self.is_fixed_integer(inst) || !self.is_reachable_integer(inst) {
            return None;
        }
        if let Some(Op::Alloca { bytes }) = self.program.op(inst) {
            return Some((self.leaf(inst), Expr::literal(WORD_WIDTH, *bytes as i64)));
        }
        let args = self.program.call_args(inst);
        let size = match (self.program.callee_name(inst)?, args) {
            ("malloc" | "valloc", [size]) => self.word_arg(*size)?,
            ("calloc", [count, elem]) => {
                Expr::binary(BinOp::Mul, self.word_arg(*count)?, self.word_arg(*elem)?)
            }
            _ => return None,
        };
        Some((self.leaf(inst), size))
    }

    fn word_arg(&self, v: ValueId) -> Option<Expr> {
        let e = self.leaf(v);
        (self.is_reachable_integer(v) && e.width() == WORD_WIDTH).then_some(e)
    }

    /// Postconditions of a call to a summarized library routine.
    pub fn get_libcall_summary(&self, call: ValueId) -> Vec<Clause> {
        let Some(name) = self.program.callee_name(call) else {
            return vec![];
        };
        let Some((_, summary)) = LIBCALL_SUMMARIES.iter().find(|(n, _)| *n == name) else {
            return vec![];
        };
        if !self.is_reachable_integer(call) || self.program.width(call) != WORD_WIDTH {
            return vec![];
        }
        let ret = self.leaf(call);
        let mut facts = vec![Clause::cmp(
            Predicate::Sge,
            ret.clone(),
            Expr::literal(WORD_WIDTH, summary.min_ret),
        )];
        let len = summary
            .len_arg
            .and_then(|i| self.program.call_args(call).get(i).copied())
            .and_then(|len| self.word_arg(len));
        if let Some(len) = len {
            // len >= 0 ==> ret <= len
            facts.push(Clause::or(
                Clause::cmp(Predicate::Slt, len.clone(), Expr::literal(WORD_WIDTH, 0)),
                Clause::cmp(Predicate::Sle, ret, len),
            ));
        }
        facts
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::analysis::ProgramAnalyses;
    use crate::capture::tests::printed;
    use crate::ir::{Program, Terminator, Type};
    use crate::scenarios;

    #[test]
    fn test_allocations_are_ordered() {
        let s = scenarios::allocations();
        let a = ProgramAnalyses::compute(&s.program);
        let mut cc = CaptureConstraints::new(&s.program, &a);
        cc.capture();
        let facts = printed(cc.facts());
        let (a1, a2) = (s.first.0, s.second.0);
        assert!(facts.contains(&format!("(x{a1} <= (2147483647 - 4))")), "{facts:?}");
        assert!(facts.contains(&format!("(x{a2} <= (2147483647 - 8))")));
        assert!(facts.contains(&format!("((x{a1} + 4) <= x{a2})")));
        // The allocation inside the loop is not a fixed block.
        let looped = s.in_loop.0;
        assert!(!facts
            .iter()
            .any(|f| f.contains(&format!("x{looped} ")) || f.contains(&format!("x{looped})"))));
    }

    #[test]
    fn test_libcall_summaries() {
        let mut p = Program::new();
        let i32t = Type::Int(32);
        let recv = p.add_function("recv", &[i32t, Type::Ptr, i32t, i32t], i32t);
        let rand = p.add_function("rand", &[], i32t);
        let main = p.add_function("main", &[i32t, Type::Ptr], Type::Void);
        let b = p.add_block(main, "entry");
        let (fd, buf) = (p.func(main).params[0], p.func(main).params[1]);
        let len = p.const_int(i32t, 64);
        let zero = p.const_int(i32t, 0);
        let got = p.call(b, i32t, recv, vec![fd, buf, len, zero]);
        let r = p.call(b, i32t, rand, vec![]);
        p.set_terminator(b, Terminator::Ret(None));

        let a = ProgramAnalyses::compute(&p);
        let cc = CaptureConstraints::new(&p, &a);
        assert_eq!(
            printed(&cc.get_libcall_summary(got)),
            vec![
                format!("(x{} >= -1)", got.0),
                format!("((64 < 0) OR (x{} <= 64))", got.0),
            ]
        );
        assert_eq!(
            printed(&cc.get_libcall_summary(r)),
            vec![format!("(x{} >= 0)", r.0)]
        );
    }
}
