//! On-demand instantiation of captured facts for a query.
//!
//! Facts about values that may run more than once are not in the global
//! fact set. Before a query about such a value can be decided, the facts of
//! its function, its dominating loops, its dominating branches and its call
//! chain are instantiated under the query's context. `Realizer` computes
//! that list without touching the solver.

use std::collections::HashSet;

use log::{debug, warn};

use crate::capture::CaptureConstraints;
use crate::expr::{Clause, Context, Expr};
use crate::ir::{BlockId, FuncId, Program, ValueId, ValueKind};
use crate::oracle::{LoopId, Oracles};

pub struct Realizer<'c, 'a> {
    capture: &'c CaptureConstraints<'a>,
    program: &'a Program,
    oracles: &'a dyn Oracles,
    insts: HashSet<(ValueId, Context)>,
    funcs: HashSet<(FuncId, Context)>,
    loops: HashSet<(LoopId, Context)>,
    blocks: HashSet<(BlockId, Context)>,
    facts: Vec<Clause>,
}

impl<'c, 'a> Realizer<'c, 'a> {
    pub fn new(capture: &'c CaptureConstraints<'a>) -> Self {
        Self {
            capture,
            program: capture.program(),
            oracles: capture.oracles(),
            insts: HashSet::new(),
            funcs: HashSet::new(),
            loops: HashSet::new(),
            blocks: HashSet::new(),
            facts: vec![],
        }
    }

    /// The realized facts, context attached, in discovery order.
    pub fn into_facts(self) -> Vec<Clause> {
        self.facts
    }

    pub fn realize_clause(&mut self, c: &Clause) {
        let mut leaves = vec![];
        c.visit_leaves(&mut |leaf| leaves.push(leaf.clone()));
        for leaf in &leaves {
            self.realize_leaf(leaf);
        }
    }

    pub fn realize_leaf(&mut self, leaf: &Expr) {
        match leaf {
            Expr::Value {
                value,
                context,
                callstack,
                ..
            } => self.realize_callstack(callstack, *value, *context),
            Expr::Use { site, context, .. } => self.realize_instruction(site.user, *context),
            // Only loop facts mention these, never a query.
            Expr::LoopBound { .. } => {}
            Expr::Literal(_) | Expr::Unary(..) | Expr::Binary(..) => {}
        }
    }

    pub fn realize_callstack(&mut self, callstack: &[ValueId], v: ValueId, ctx: Context) {
        if self.program.is_instruction(v) {
            self.realize_instruction(v, ctx);
        } else if callstack.is_empty() {
            self.realize_parameter(v, ctx);
        }
        for site in callstack {
            self.realize_instruction(*site, ctx);
        }
        for (site, next) in callstack.iter().zip(callstack.iter().skip(1)) {
            if let Some(func) = self.program.container(*next) {
                self.realize_function_call(*site, func, ctx);
            }
        }
        if let (Some(last), Some(func)) = (callstack.last(), self.program.container(v)) {
            self.realize_function_call(*last, func, ctx);
        }
    }

    pub fn realize_instruction(&mut self, inst: ValueId, ctx: Context) {
        if !self.insts.insert((inst, ctx)) {
            return;
        }
        let Some(block) = self.program.block_of(inst) else {
            return;
        };
        let func = self.program.block(block).func;

        self.realize_function(func, ctx);

        // A unique caller pins down the calling context.
        if let [site] = self.oracles.call_sites(func) {
            self.realize_instruction(*site, ctx);
        }

        if self.blocks.insert((block, ctx)) {
            self.realize_dominating_loops(block, func, ctx);
            self.realize_dominating_branches(block, func, ctx);
            self.realize_dominating_loop_exits(block, func, ctx);
        }
    }

    /// Without a call stack, a parameter of a function that runs more than
    /// once still takes one of its actual arguments.
    fn realize_parameter(&mut self, v: ValueId, ctx: Context) {
        if !matches!(self.program.value(v).kind, ValueKind::Param { .. })
            || self.capture.is_fixed_integer(v)
            || !self.insts.insert((v, ctx))
        {
            return;
        }
        let binding = self.capture.get_in_argument(v);
        self.push_all(binding.into_iter().collect(), ctx);
    }

    fn realize_function(&mut self, func: FuncId, ctx: Context) {
        // Straight-line facts of run-once functions are already global.
        if self.oracles.function_executed_once(func) || !self.funcs.insert((func, ctx)) {
            return;
        }
        let facts = self.capture.get_in_function(func);
        self.push_all(facts, ctx);
    }

    fn realize_function_call(&mut self, site: ValueId, callee: FuncId, ctx: Context) {
        let formals = &self.program.func(callee).params;
        let spawn = self.program.spawned_function(site).is_some();
        if !spawn && self.program.call_args(site).len() != formals.len() {
            warn!(
                "call {site} does not match the signature of {}",
                self.program.func(callee).name
            );
            return;
        }
        let mut bindings = vec![];
        for (index, formal) in formals.iter().enumerate() {
            let Some(actual) = self.capture.actual_for(site, index) else {
                continue;
            };
            if self.program.width(actual) != self.program.width(*formal)
                || !self.capture.is_reachable_integer(*formal)
            {
                continue;
            }
            bindings.push(Clause::eq(
                Expr::leaf(self.program, actual),
                Expr::leaf(self.program, *formal),
            ));
        }
        self.push_all(bindings, ctx);
    }

    fn realize_dominating_loops(&mut self, block: BlockId, func: FuncId, ctx: Context) {
        for l in self.oracles.loops_top_down(func) {
            let header = self.oracles.loop_data(l).header;
            if !self.oracles.dominates(header, block) || !self.loops.insert((l, ctx)) {
                continue;
            }
            let facts = self.capture.get_in_loop(l);
            self.push_all(facts, ctx);
        }
    }

    /// For each dominator `p`, the successors of `p` that cannot reach the
    /// block without passing `p` again are not taken.
    fn realize_dominating_branches(&mut self, block: BlockId, func: FuncId, ctx: Context) {
        let entry = self.program.func(func).entry();
        let mut dom = block;
        while Some(dom) != entry {
            let Some(p) = self.oracles.idom(dom) else {
                break;
            };
            let visited = self.oracles.floodfill_reverse(dom, &HashSet::from([p]));
            let mut avoided = vec![];
            for (i, succ) in self.program.block(p).term.successors().iter().enumerate() {
                if !visited.contains(succ) {
                    avoided.extend(self.capture.get_avoid_branch(p, i));
                }
            }
            self.push_all(avoided, ctx);
            dom = p;
        }
    }

    /// A single-incoming φ fed from a deeper loop equals its incoming value.
    fn realize_dominating_loop_exits(&mut self, block: BlockId, func: FuncId, ctx: Context) {
        let entry = self.program.func(func).entry();
        let mut bb = block;
        while Some(bb) != entry {
            let mut exits = vec![];
            for (phi, incoming) in self.program.phis(bb) {
                if let [(from, value)] = incoming {
                    if !self.capture.comes_from_shallow(*from, bb)
                        && self.capture.is_reachable_integer(phi)
                        && self.capture.is_reachable_integer(*value)
                    {
                        exits.push(Clause::eq(
                            Expr::leaf(self.program, phi),
                            Expr::leaf(self.program, *value),
                        ));
                    }
                }
            }
            self.push_all(exits, ctx);
            let Some(p) = self.oracles.idom(bb) else {
                break;
            };
            bb = p;
        }
    }

    fn push_all(&mut self, facts: Vec<Clause>, ctx: Context) {
        for mut c in facts {
            self.capture.attach_context(&mut c, ctx);
            debug!("realize {c}");
            self.facts.push(c);
        }
    }
}
