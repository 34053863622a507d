use std::collections::BTreeSet;

use log::debug;

use super::CaptureConstraints;
use crate::expr::{BinOp, Clause, Expr, Literal, UnaryOp};
use crate::ir::{CastOp, GepStep, Op, ValueId};
use crate::{BOOL_WIDTH, WORD_WIDTH};

const WORD_RANGE: i64 = 1 << 32;

impl CaptureConstraints<'_> {
    /// The fact defining the result of instruction `user` in terms of its
    /// operands, or `None` for shapes that are not modelled.
    pub fn get_in_user(&self, user: ValueId) -> Option<Clause> {
        let op = self.program.op(user)?;
        let c = match op {
            Op::Binary(bop, l, r) => self.get_in_binary(user, *bop, *l, *r),
            Op::ICmp(pred, l, r) => {
                self.all_reachable(&[*l, *r])?;
                let holds = Clause::cmp(*pred, self.leaf(*l), self.leaf(*r));
                // (icmp == false) XOR (l pred r)
                Some(Clause::xor(
                    Clause::eq(self.leaf(user), Expr::Literal(Literal::bool(false))),
                    holds,
                ))
            }
            Op::Cast(cast, x) => self.get_in_cast(user, *cast, *x),
            Op::Gep { base, steps } => self.get_in_gep(user, *base, steps),
            Op::Select {
                cond,
                if_true,
                if_false,
            } => {
                self.all_reachable(&[*cond, *if_true, *if_false])?;
                if self.program.width(*cond) != BOOL_WIDTH {
                    return None;
                }
                let c = self.leaf(*cond);
                let r = self.leaf(user);
                Some(Clause::and(
                    Clause::or(
                        Clause::eq(c.clone(), Expr::Literal(Literal::bool(false))),
                        Clause::eq(r.clone(), self.leaf(*if_true)),
                    ),
                    Clause::or(
                        Clause::eq(c, Expr::Literal(Literal::bool(true))),
                        Clause::eq(r, self.leaf(*if_false)),
                    ),
                ))
            }
            Op::Phi(incoming) => {
                let block = self.program.block_of(user)?;
                if !incoming
                    .iter()
                    .all(|(from, _)| self.comes_from_shallow(*from, block))
                {
                    return None;
                }
                Clause::any(
                    incoming
                        .iter()
                        .map(|(_, v)| Clause::eq(self.leaf(user), self.leaf(*v))),
                )
            }
            Op::Alloca { .. } | Op::Call { .. } | Op::Load(_) | Op::Store { .. } => None,
        };
        if c.is_none() {
            debug!("no semantics captured for {user}");
        }
        c
    }

    /// `formal` equals one of the distinct actuals passed at the call sites
    /// that may run.
    pub fn get_in_argument(&self, formal: ValueId) -> Option<Clause> {
        let crate::ir::ValueKind::Param { func, index } = self.program.value(formal).kind else {
            return None;
        };
        if self.program.func(func).is_declaration() {
            return None;
        }
        let actuals: BTreeSet<ValueId> = self
            .oracles
            .call_sites(func)
            .iter()
            .filter(|site| !self.oracles.not_executed(**site))
            .filter_map(|site| self.actual_for(*site, index))
            .collect();
        Clause::any(
            actuals
                .into_iter()
                .filter(|actual| self.is_reachable_integer(*actual))
                .map(|actual| Clause::eq(self.leaf(formal), self.leaf(actual))),
        )
    }

    /// The value bound to parameter `index` of the callee at `site`.
    pub(crate) fn actual_for(&self, site: ValueId, index: usize) -> Option<ValueId> {
        if self.program.spawned_function(site).is_some() {
            return match index {
                0 => self.program.call_args(site).get(3).copied(),
                _ => None,
            };
        }
        self.program.call_args(site).get(index).copied()
    }

    pub(crate) fn leaf(&self, v: ValueId) -> Expr {
        Expr::leaf(self.program, v)
    }

    fn all_reachable(&self, values: &[ValueId]) -> Option<()> {
        values
            .iter()
            .all(|v| self.is_reachable_integer(*v))
            .then_some(())
    }

    /// Operand of a multiplication. A constant that is a multiple of 2^32
    /// is scaled down by 2^32.
    fn mul_operand(&self, v: ValueId) -> Expr {
        match self.program.const_value(v) {
            Some(c) if c % WORD_RANGE == 0 => {
                Expr::literal(self.program.width(v), c / WORD_RANGE)
            }
            _ => self.leaf(v),
        }
    }

    fn get_in_binary(&self, user: ValueId, op: BinOp, l: ValueId, r: ValueId) -> Option<Clause> {
        self.all_reachable(&[l, r])?;
        let rhs = match op {
            BinOp::Shl | BinOp::LShr | BinOp::AShr => {
                let amount = match self.program.const_value(r) {
                    Some(c) => Expr::literal(self.program.width(r), c.rem_euclid(WORD_WIDTH as i64)),
                    None => self.leaf(r),
                };
                Expr::binary(op, self.leaf(l), amount)
            }
            BinOp::Mul => Expr::binary(op, self.mul_operand(l), self.mul_operand(r)),
            _ => Expr::binary(op, self.leaf(l), self.leaf(r)),
        };
        Some(Clause::eq(self.leaf(user), rhs))
    }

    fn get_in_cast(&self, user: ValueId, cast: CastOp, x: ValueId) -> Option<Clause> {
        self.all_reachable(&[x])?;
        let (wu, wx) = (self.program.width(user), self.program.width(x));
        let operand = self.leaf(x);
        let operand = if wu > wx {
            match cast {
                CastOp::ZExt => Expr::unary(UnaryOp::ZExt, operand),
                CastOp::SExt => Expr::unary(UnaryOp::SExt, operand),
                _ => {
                    debug!("widening {cast:?} at {user} is not an extension");
                    return None;
                }
            }
        } else if wu < wx {
            Expr::unary(UnaryOp::Trunc, operand)
        } else {
            operand
        };
        Some(Clause::eq(self.leaf(user), operand))
    }

    /// `user == base + Σ step`.
    fn get_in_gep(&self, user: ValueId, base: ValueId, steps: &[GepStep]) -> Option<Clause> {
        let indices: Vec<ValueId> = steps
            .iter()
            .filter_map(|step| match step {
                GepStep::Index { index, .. } => Some(*index),
                GepStep::Field { .. } => None,
            })
            .chain(std::iter::once(base))
            .collect();
        self.all_reachable(&indices)?;

        let mut cur = self.leaf(base);
        for step in steps {
            let delta = match step {
                GepStep::Index { elem_size, index } => {
                    let index = self.word(*index)?;
                    if elem_size.is_power_of_two() {
                        Expr::binary(
                            BinOp::Shl,
                            index,
                            Expr::literal(WORD_WIDTH, elem_size.trailing_zeros() as i64),
                        )
                    } else {
                        Expr::binary(BinOp::Mul, Expr::literal(WORD_WIDTH, *elem_size as i64), index)
                    }
                }
                GepStep::Field { offset } => Expr::literal(WORD_WIDTH, *offset as i64),
            };
            cur = Expr::binary(BinOp::Add, cur, delta);
        }
        Some(Clause::eq(self.leaf(user), cur))
    }

    /// A word-width reference to `v`; boolean indices are not modelled.
    fn word(&self, v: ValueId) -> Option<Expr> {
        let e = self.leaf(v);
        (e.width() == WORD_WIDTH).then_some(e)
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::analysis::ProgramAnalyses;
    use crate::expr::Predicate;
    use crate::ir::{Program, Terminator, Type};

    struct Straight {
        program: Program,
        block: crate::ir::BlockId,
        x: ValueId,
        y: ValueId,
    }

    fn straight() -> Straight {
        let mut program = Program::new();
        let main = program.add_function("main", &[Type::Int(32), Type::Int(32)], Type::Void);
        let block = program.add_block(main, "entry");
        program.set_terminator(block, Terminator::Ret(None));
        let x = program.func(main).params[0];
        let y = program.func(main).params[1];
        Straight {
            program,
            block,
            x,
            y,
        }
    }

    fn fact(s: &Straight, v: ValueId) -> String {
        let a = ProgramAnalyses::compute(&s.program);
        let cc = CaptureConstraints::new(&s.program, &a);
        cc.get_in_user(v)
            .map(|c| c.to_string())
            .unwrap_or_default()
    }

    #[test]
    fn test_binary_and_constant_shift() {
        let mut s = straight();
        let forty = s.program.const_int(Type::Int(32), 40);
        let add = s.program.binary(s.block, BinOp::Add, s.x, s.y);
        let shl = s.program.binary(s.block, BinOp::Shl, s.x, forty);
        assert_eq!(fact(&s, add), format!("(x{} = (x{} + x{}))", add.0, s.x.0, s.y.0));
        assert_eq!(fact(&s, shl), format!("(x{} = (x{} << 8))", shl.0, s.x.0));
    }

    #[test]
    fn test_mul_by_word_multiple() {
        let mut s = straight();
        let big = s.program.const_int(Type::Int(32), 3 << 32);
        let mul = s.program.binary(s.block, BinOp::Mul, s.x, big);
        assert_eq!(fact(&s, mul), format!("(x{} = (x{} * 3))", mul.0, s.x.0));
    }

    #[test]
    fn test_icmp() {
        let mut s = straight();
        let cmp = s.program.icmp(s.block, Predicate::Slt, s.x, s.y);
        assert_eq!(
            fact(&s, cmp),
            format!("((x{} = 0) XOR (x{} < x{}))", cmp.0, s.x.0, s.y.0)
        );
    }

    #[test]
    fn test_casts() {
        let mut s = straight();
        let cmp = s.program.icmp(s.block, Predicate::Eq, s.x, s.y);
        let wide = s.program.append(s.block, Type::Int(32), Op::Cast(CastOp::ZExt, cmp));
        let narrow = s.program.append(s.block, Type::Int(1), Op::Cast(CastOp::Trunc, s.x));
        let ptr = s.program.append(s.block, Type::Ptr, Op::Cast(CastOp::IntToPtr, s.x));
        assert_eq!(fact(&s, wide), format!("(x{} = (zext x{}))", wide.0, cmp.0));
        assert_eq!(fact(&s, narrow), format!("(x{} = (trunc x{}))", narrow.0, s.x.0));
        assert_eq!(fact(&s, ptr), format!("(x{} = x{})", ptr.0, s.x.0));
    }

    #[test]
    fn test_gep_strides() {
        let mut s = straight();
        let base = s.program.add_global("table");
        let gep = s.program.append(
            s.block,
            Type::Ptr,
            Op::Gep {
                base,
                steps: vec![
                    GepStep::Index {
                        elem_size: 12,
                        index: s.x,
                    },
                    GepStep::Field { offset: 4 },
                    GepStep::Index {
                        elem_size: 8,
                        index: s.y,
                    },
                ],
            },
        );
        assert_eq!(
            fact(&s, gep),
            format!(
                "(x{} = (((x{} + (12 * x{})) + 4) + (x{} << 3)))",
                gep.0, base.0, s.x.0, s.y.0
            )
        );
    }

    #[test]
    fn test_select() {
        let mut s = straight();
        let cmp = s.program.icmp(s.block, Predicate::Ult, s.x, s.y);
        let sel = s.program.append(
            s.block,
            Type::Int(32),
            Op::Select {
                cond: cmp,
                if_true: s.x,
                if_false: s.y,
            },
        );
        assert_eq!(
            fact(&s, sel),
            format!(
                "(((x{c} = 0) OR (x{r} = x{x})) AND ((x{c} = 1) OR (x{r} = x{y})))",
                c = cmp.0,
                r = sel.0,
                x = s.x.0,
                y = s.y.0
            )
        );
    }

    #[test]
    fn test_function_address_blocks_fact() {
        let mut s = straight();
        let main = s.program.entry().expect("main");
        let addr = s.program.func_addr(main);
        let cast = s.program.append(s.block, Type::Int(32), Op::Cast(CastOp::PtrToInt, addr));
        assert_eq!(fact(&s, cast), "");
    }
}
