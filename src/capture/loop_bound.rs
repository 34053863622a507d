use log::debug;

use super::CaptureConstraints;
use crate::analysis::split_incoming;
use crate::expr::{BinOp, Clause, Expr, Literal, Predicate};
use crate::ir::{Op, Terminator};
use crate::oracle::{Loop, LoopId};
use crate::WORD_WIDTH;

impl CaptureConstraints<'_> {
    /// Bound and body facts of loop `l`; empty when no bound is known, since
    /// body facts alone say nothing about which iteration is meant.
    pub fn get_in_loop(&self, l: LoopId) -> Vec<Clause> {
        let Some(mut facts) = self.get_loop_bound(l) else {
            return vec![];
        };
        facts.extend(self.get_in_loop_body(l));
        facts
    }

    /// Facts of instructions in `l` but in none of its sub-loops.
    pub fn get_in_loop_body(&self, l: LoopId) -> Vec<Clause> {
        let data = self.oracles.loop_data(l);
        data.blocks
            .iter()
            .filter(|b| self.oracles.loop_depth(**b) == data.depth)
            .flat_map(|b| self.program.block(*b).insts.iter())
            .filter(|inst| self.is_reachable_integer(**inst))
            .filter_map(|inst| self.get_in_user(*inst))
            .collect()
    }

    pub fn get_loop_bound(&self, l: LoopId) -> Option<Vec<Clause>> {
        let data = self.oracles.loop_data(l);
        let Some(iv) = data.induction_variable else {
            debug!("loop at {} has no canonical induction variable", data.header);
            return None;
        };
        let Some(Op::Phi(incoming)) = self.program.op(iv) else {
            return None;
        };
        if incoming.len() != 2 {
            debug!("cannot bound {iv}: {} incoming values", incoming.len());
            return None;
        }
        let zero = Expr::literal(WORD_WIDTH, 0);
        let iv_expr = self.leaf(iv);

        if let Some(trip) = data.trip_count {
            return Some(vec![
                Clause::cmp(Predicate::Sge, iv_expr.clone(), zero),
                Clause::cmp(Predicate::Slt, iv_expr, self.leaf(trip)),
            ]);
        }

        // No closed form: relate this iteration to the previous one.
        let (_, (latch, _)) = split_incoming(data, incoming)?;
        let Terminator::CondBr { cond, if_true, .. } = &self.program.block(latch).term else {
            return None;
        };

        let mut facts: Vec<Clause> = self
            .get_in_loop_body(l)
            .into_iter()
            .map(|mut c| {
                self.replace_with_loop_bound_version(&mut c, data);
                c
            })
            .collect();

        let lb_iv = self.loop_bound_leaf(iv);
        facts.push(Clause::eq(
            lb_iv,
            Expr::binary(BinOp::Sub, iv_expr.clone(), Expr::literal(WORD_WIDTH, 1)),
        ));

        let stays = Literal::bool(*if_true == data.header);
        let backedge = Clause::eq(self.loop_bound_leaf(*cond), Expr::Literal(stays));
        facts.push(Clause::or(
            Clause::eq(iv_expr.clone(), zero.clone()),
            Clause::and(Clause::cmp(Predicate::Sgt, iv_expr, zero), backedge),
        ));
        Some(facts)
    }

    fn loop_bound_leaf(&self, v: crate::ir::ValueId) -> Expr {
        Expr::LoopBound {
            value: v,
            width: self.program.width(v),
            context: 0,
        }
    }

    /// Re-tags references to instructions of `l`'s own depth as their value
    /// one iteration earlier.
    fn replace_with_loop_bound_version(&self, c: &mut Clause, l: &Loop) {
        c.visit_leaves_mut(&mut |leaf| {
            if let Expr::Value {
                value,
                width,
                context,
                ..
            } = leaf
            {
                let same_depth = self.program.block_of(*value).is_some_and(|b| {
                    l.contains(b) && self.oracles.loop_depth(b) == l.depth
                });
                if same_depth {
                    *leaf = Expr::LoopBound {
                        value: *value,
                        width: *width,
                        context: *context,
                    };
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::analysis::ProgramAnalyses;
    use crate::capture::tests::printed;
    use crate::ir::{Program, Type};
    use crate::oracle::LoopForest;
    use crate::scenarios;

    #[test]
    fn test_trip_count_bound() {
        let s = scenarios::counted_loop();
        let a = ProgramAnalyses::compute(&s.program);
        let cc = CaptureConstraints::new(&s.program, &a);
        let l = a.loop_for(s.header).expect("loop");
        let bound = cc.get_loop_bound(l).expect("bounded");
        assert_eq!(
            printed(&bound),
            vec![
                format!("(x{} >= 0)", s.iv.0),
                format!("(x{} < x{})", s.iv.0, s.n.0),
            ]
        );
    }

    #[test]
    fn test_do_while_is_bounded_by_previous_iteration() {
        let s = scenarios::unguarded_counted_loop();
        let a = ProgramAnalyses::compute(&s.program);
        let cc = CaptureConstraints::new(&s.program, &a);
        let l = a.loop_for(s.header).expect("loop");
        let bound = printed(&cc.get_loop_bound(l).expect("bounded"));
        let (i, n) = (s.iv.0, s.n.0);
        assert!(!bound.contains(&format!("(x{i} < x{n})")), "{bound:?}");
        assert!(bound.contains(&format!("(lb{i} = (x{i} - 1))")), "{bound:?}");
    }

    #[test]
    fn test_recursive_bound() {
        let s = scenarios::guarded_loop();
        let a = ProgramAnalyses::compute(&s.program);
        let cc = CaptureConstraints::new(&s.program, &a);
        let l = a.loop_for(s.header).expect("loop");
        assert_eq!(a.loop_data(l).trip_count, None);
        let bound = printed(&cc.get_loop_bound(l).expect("bounded"));
        let (i, next, c, n) = (s.iv.0, s.next.0, s.latch_cond.0, s.n.0);
        assert!(bound.contains(&format!("(lb{next} = (lb{i} + 1))")), "{bound:?}");
        assert!(bound.contains(&format!("((lb{c} = 0) XOR (lb{next} < x{n}))")));
        assert!(bound.contains(&format!("(lb{i} = (x{i} - 1))")));
        assert!(bound.contains(&format!("((x{i} = 0) OR ((x{i} > 0) AND (lb{c} = 1)))")));

        let all = printed(&cc.get_in_loop(l));
        assert!(all.contains(&format!("(x{next} = (x{i} + 1))")));
    }

    #[test]
    fn test_loop_without_induction_variable() {
        let mut p = Program::new();
        let i32t = Type::Int(32);
        let main = p.add_function("main", &[i32t], Type::Void);
        let entry = p.add_block(main, "entry");
        let body = p.add_block(main, "body");
        let exit = p.add_block(main, "exit");
        let one = p.const_int(i32t, 1);
        let n = p.func(main).params[0];
        p.set_terminator(entry, Terminator::Br(body));
        let x = p.phi(body, i32t, vec![(entry, one)]);
        let next = p.binary(body, BinOp::Mul, x, n);
        let c = p.icmp(body, Predicate::Slt, next, n);
        p.set_terminator(
            body,
            Terminator::CondBr {
                cond: c,
                if_true: body,
                if_false: exit,
            },
        );
        p.add_phi_incoming(x, body, next);
        p.set_terminator(exit, Terminator::Ret(None));

        let a = ProgramAnalyses::compute(&p);
        let cc = CaptureConstraints::new(&p, &a);
        let l = a.loop_for(body).expect("loop");
        assert_eq!(a.loop_data(l).induction_variable, None);
        assert!(cc.get_loop_bound(l).is_none());
        assert!(cc.get_in_loop(l).is_empty());
        assert_eq!(cc.get_in_loop_body(l).len(), 2);
    }
}
