use easy_smt::SExpr;

use super::Solver;
use crate::error::Result;
use crate::expr::{BinOp, Clause, Context, Expr, Literal, Predicate, UnaryOp};
use crate::{INT_MAX, WORD_WIDTH};

/// Solver-side name of a leaf: `x<id>` or `lb<id>`, suffixed by `_<ctx>`
/// outside the default context.
pub(crate) fn leaf_name(e: &Expr) -> Option<String> {
    match e {
        Expr::Value { value, context, .. } => Some(name("x", value.0, *context)),
        Expr::Use { site, context, .. } => Some(name("x", site.value.0, *context)),
        Expr::LoopBound { value, context, .. } => Some(name("lb", value.0, *context)),
        _ => None,
    }
}

fn name(prefix: &str, id: u32, context: Context) -> String {
    match context {
        0 => format!("{prefix}{id}"),
        ctx => format!("{prefix}{id}_{ctx}"),
    }
}

impl Solver {
    pub(super) fn translate_clause(&mut self, c: &Clause, guards: &mut Vec<SExpr>) -> Result<SExpr> {
        Ok(match c {
            Clause::Atom(be) => {
                let l = self.translate_expr(&be.lhs, guards)?;
                let r = self.translate_expr(&be.rhs, guards)?;
                self.compare(be.pred, l, r)
            }
            Clause::Not(c) => {
                let c = self.translate_clause(c, guards)?;
                self.smt.list(vec![self.smt.atom("not"), c])
            }
            Clause::And(a, b) | Clause::Or(a, b) | Clause::Xor(a, b) => {
                let op = match c {
                    Clause::And(..) => "and",
                    Clause::Or(..) => "or",
                    _ => "xor",
                };
                let a = self.translate_clause(a, guards)?;
                let b = self.translate_clause(b, guards)?;
                self.smt.list(vec![self.smt.atom(op), a, b])
            }
        })
    }

    fn compare(&self, pred: Predicate, l: SExpr, r: SExpr) -> SExpr {
        let op = match pred {
            Predicate::Eq | Predicate::Ne => "=",
            Predicate::Ugt => "bvugt",
            Predicate::Uge => "bvuge",
            Predicate::Ult => "bvult",
            Predicate::Ule => "bvule",
            Predicate::Sgt => "bvsgt",
            Predicate::Sge => "bvsge",
            Predicate::Slt => "bvslt",
            Predicate::Sle => "bvsle",
        };
        let cmp = self.smt.list(vec![self.smt.atom(op), l, r]);
        if pred == Predicate::Ne {
            self.smt.list(vec![self.smt.atom("not"), cmp])
        } else {
            cmp
        }
    }

    pub(super) fn translate_expr(&mut self, e: &Expr, guards: &mut Vec<SExpr>) -> Result<SExpr> {
        if let Some(name) = leaf_name(e) {
            return self.declare(name, e.width());
        }
        Ok(match e {
            Expr::Literal(lit) => self.bv(*lit),
            Expr::Value { .. } | Expr::Use { .. } | Expr::LoopBound { .. } => {
                unreachable!("leaves are declared by name")
            }
            Expr::Unary(op, x) => {
                let inner = self.translate_expr(x, guards)?;
                match op {
                    UnaryOp::Trunc => self.indexed(&["extract", "0", "0"], inner),
                    UnaryOp::ZExt | UnaryOp::SExt => {
                        let padding = op.result_width().saturating_sub(x.width());
                        if padding == 0 {
                            inner
                        } else {
                            let name = match op {
                                UnaryOp::ZExt => "zero_extend",
                                _ => "sign_extend",
                            };
                            self.indexed(&[name, &padding.to_string()], inner)
                        }
                    }
                }
            }
            Expr::Binary(op, l, r) => self.translate_binary(*op, l, r, guards)?,
        })
    }

    fn translate_binary(
        &mut self,
        op: BinOp,
        l: &Expr,
        r: &Expr,
        guards: &mut Vec<SExpr>,
    ) -> Result<SExpr> {
        let width = l.width();

        // x + 0
        if op == BinOp::Add {
            if r.as_literal().is_some_and(|lit| lit.bits == 0) {
                return self.translate_expr(l, guards);
            }
            if l.as_literal().is_some_and(|lit| lit.bits == 0) {
                return self.translate_expr(r, guards);
            }
        }
        // x * 2^k, unguarded since the shift keeps the low bits.
        if op == BinOp::Mul && !cfg!(feature = "overflow-guards") {
            let pow2 = |e: &Expr| e.as_literal().filter(|lit| lit.bits.is_power_of_two());
            let operands = match (pow2(l), pow2(r)) {
                (_, Some(k)) => Some((l, k)),
                (Some(k), None) => Some((r, k)),
                (None, None) => None,
            };
            if let Some((x, k)) = operands {
                let x = self.translate_expr(x, guards)?;
                let amount = self.bv(Literal::new(width, k.bits.trailing_zeros() as i64));
                return Ok(self.smt.list(vec![self.smt.atom("bvshl"), x, amount]));
            }
        }

        let a = self.translate_expr(l, guards)?;
        let mut b = self.translate_expr(r, guards)?;
        if op.is_shift() && r.as_literal().is_none() {
            let w = self.bv(Literal::new(width, width as i64));
            b = self.smt.list(vec![self.smt.atom("bvurem"), b, w]);
        }
        let name = match op {
            BinOp::Add => "bvadd",
            BinOp::Sub => "bvsub",
            BinOp::Mul => "bvmul",
            BinOp::UDiv => "bvudiv",
            BinOp::SDiv => "bvsdiv",
            BinOp::URem => "bvurem",
            BinOp::SRem => "bvsrem",
            BinOp::Shl => "bvshl",
            BinOp::LShr => "bvlshr",
            BinOp::AShr => "bvashr",
            BinOp::And => "bvand",
            BinOp::Or => "bvor",
            BinOp::Xor => "bvxor",
        };
        let result = self.smt.list(vec![self.smt.atom(name), a, b]);
        if width == WORD_WIDTH {
            guards.extend(self.guard(op, a, b, result));
        }
        Ok(result)
    }

    /// Side condition ruling out signed overflow or a zero divisor.
    fn guard(&self, op: BinOp, a: SExpr, b: SExpr, result: SExpr) -> Option<SExpr> {
        let smt = &self.smt;
        if op.is_division() {
            if !cfg!(feature = "division-guards") {
                return None;
            }
            let zero = self.bv(Literal::word(0));
            let is_zero = smt.list(vec![smt.atom("="), b, zero]);
            return Some(smt.list(vec![smt.atom("not"), is_zero]));
        }
        if !cfg!(feature = "overflow-guards") {
            return None;
        }
        match op {
            BinOp::Add | BinOp::Sub => {
                // Operands of equal sign must give a result of that sign.
                let b = match op {
                    BinOp::Sub => smt.list(vec![smt.atom("bvneg"), b]),
                    _ => b,
                };
                let (ha, hb, hr) = (self.sign_bit(a), self.sign_bit(b), self.sign_bit(result));
                let differ = smt.list(vec![
                    smt.atom("not"),
                    smt.list(vec![smt.atom("="), ha, hb]),
                ]);
                let kept = smt.list(vec![smt.atom("="), hb, hr]);
                Some(smt.list(vec![smt.atom("or"), differ, kept]))
            }
            BinOp::Mul => {
                let wide = |x| self.indexed(&["sign_extend", "32"], x);
                let product = smt.list(vec![smt.atom("bvmul"), wide(a), wide(b)]);
                let min = self.bv(Literal::new(64, i32::MIN as i64));
                let max = self.bv(Literal::new(64, INT_MAX));
                Some(smt.list(vec![
                    smt.atom("and"),
                    smt.list(vec![smt.atom("bvsge"), product, min]),
                    smt.list(vec![smt.atom("bvsle"), product, max]),
                ]))
            }
            BinOp::Shl => {
                let zero = self.bv(Literal::word(0));
                let limit = smt.list(vec![smt.atom("bvlshr"), self.bv(Literal::word(INT_MAX)), b]);
                Some(smt.list(vec![
                    smt.atom("and"),
                    smt.list(vec![smt.atom("bvsge"), a, zero]),
                    smt.list(vec![smt.atom("bvsle"), a, limit]),
                ]))
            }
            _ => None,
        }
    }

    fn sign_bit(&self, x: SExpr) -> SExpr {
        let top = (WORD_WIDTH - 1).to_string();
        self.indexed(&["extract", &top, &top], x)
    }

    /// `((_ name idx..) x)`
    fn indexed(&self, parts: &[&str], x: SExpr) -> SExpr {
        let mut head = vec![self.smt.atoms().und];
        head.extend(parts.iter().map(|p| self.smt.atom(*p)));
        self.smt.list(vec![self.smt.list(head), x])
    }

    fn bv(&self, lit: Literal) -> SExpr {
        self.smt.atom(format!(
            "#b{:0width$b}",
            lit.bits,
            width = lit.width as usize
        ))
    }

    fn declare(&mut self, name: String, width: u32) -> Result<SExpr> {
        if !self.declared.contains(&name) {
            let sort = self.smt.bit_vec_sort(self.smt.numeral(width));
            self.smt.declare_const(name.clone(), sort)?;
            self.declared.insert(name.clone());
            if let Some(scope) = self.scopes.last_mut() {
                scope.push(name.clone());
            }
        }
        Ok(self.smt.atom(name))
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::ir::{Use, ValueId};

    #[test]
    fn test_leaf_names() {
        let mut x = Expr::value(ValueId(3), 32);
        assert_eq!(leaf_name(&x).as_deref(), Some("x3"));
        x.set_context(2);
        assert_eq!(leaf_name(&x).as_deref(), Some("x3_2"));
        let lb = Expr::LoopBound {
            value: ValueId(4),
            width: 1,
            context: 0,
        };
        assert_eq!(leaf_name(&lb).as_deref(), Some("lb4"));
        let site = Expr::Use {
            site: Use {
                user: ValueId(9),
                index: 1,
                value: ValueId(5),
            },
            width: 32,
            context: 1,
            callstack: vec![],
        };
        assert_eq!(leaf_name(&site).as_deref(), Some("x5_1"));
        assert_eq!(leaf_name(&Expr::literal(32, 1)), None);
    }
}
