//! Captures the facts that hold in every execution of a program.
//!
//! The global fact set covers values that execute at most once. Everything
//! else is described by per-function and per-loop fact lists that the
//! realization engine instantiates on demand under a context tag.

mod address_taken;
mod loop_bound;
mod semantics;
mod summaries;
mod unreachable;

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

use log::{debug, info};

use crate::expr::{Clause, Context, Expr};
use crate::ir::{BlockId, FuncId, Program, ValueId, ValueKind};
use crate::oracle::Oracles;

pub use summaries::{LibcallSummary, LIBCALL_SUMMARIES};
pub use unreachable::ASSERT_EQ_MARKER;

pub struct CaptureConstraints<'a> {
    program: &'a Program,
    oracles: &'a dyn Oracles,
    facts: Vec<Clause>,
    fixed_integers: BTreeSet<ValueId>,
    disabled: bool,
}

impl<'a> CaptureConstraints<'a> {
    pub fn new(program: &'a Program, oracles: &'a dyn Oracles) -> Self {
        Self {
            program,
            oracles,
            facts: vec![],
            fixed_integers: BTreeSet::new(),
            disabled: false,
        }
    }

    /// Keep capturing fixed integers but drop every fact.
    pub fn set_disabled(&mut self, disabled: bool) {
        self.disabled = disabled;
    }

    pub fn program(&self) -> &'a Program {
        self.program
    }

    pub fn oracles(&self) -> &'a dyn Oracles {
        self.oracles
    }

    /// Recomputes the fact set from scratch.
    pub fn capture(&mut self) {
        self.facts.clear();
        self.identify_fixed_integers();
        self.capture_top_level();
        self.capture_address_taken();
        self.capture_unreachable();
        self.capture_function_summaries();

        self.facts.sort_by_cached_key(Clause::sort_key);
        self.facts.dedup();
        if self.disabled {
            self.facts.clear();
        }
        info!(
            "captured {} facts over {} fixed integers, fingerprint {:#x}",
            self.facts.len(),
            self.fixed_integers.len(),
            self.fingerprint()
        );
    }

    pub fn facts(&self) -> &[Clause] {
        &self.facts
    }

    pub fn fixed_integers(&self) -> &BTreeSet<ValueId> {
        &self.fixed_integers
    }

    /// Constants, and values that take a single value per program run.
    pub fn is_fixed_integer(&self, v: ValueId) -> bool {
        self.program.is_constant(v) || self.fixed_integers.contains(&v)
    }

    /// Whether `v` is an integer or pointer that some execution observes.
    pub fn is_reachable_integer(&self, v: ValueId) -> bool {
        let data = self.program.value(v);
        if !data.ty.is_integer_or_pointer() {
            return false;
        }
        match &data.kind {
            ValueKind::Inst { .. } => !self.oracles.not_executed(v),
            ValueKind::Param { func, .. } => !self.oracles.function_not_executed(*func),
            ValueKind::Function(_) => false,
            ValueKind::Const(_) | ValueKind::Null | ValueKind::Global { .. } => true,
        }
    }

    /// Order-insensitive hash of the printed facts. Stable across runs of
    /// the same build, so drivers can stop re-capturing at a fixpoint.
    pub fn fingerprint(&self) -> u64 {
        self.facts.iter().fold(0u64, |acc, c| {
            let mut hasher = DefaultHasher::new();
            c.to_string().hash(&mut hasher);
            acc.wrapping_add(hasher.finish())
        })
    }

    fn add(&mut self, c: Option<Clause>) {
        if let Some(c) = c {
            self.facts.push(c);
        }
    }

    fn identify_fixed_integers(&mut self) {
        self.fixed_integers.clear();
        for v in self.program.values() {
            let data = self.program.value(v);
            if !data.ty.is_integer_or_pointer() {
                continue;
            }
            let fixed = match &data.kind {
                ValueKind::Global { .. } => true,
                ValueKind::Param { func, .. } => {
                    !self.oracles.function_not_executed(*func)
                        && self.oracles.function_executed_once(*func)
                }
                ValueKind::Inst { .. } => {
                    !self.oracles.not_executed(v) && self.oracles.executed_once(v)
                }
                ValueKind::Const(_) | ValueKind::Null | ValueKind::Function(_) => false,
            };
            if fixed {
                self.fixed_integers.insert(v);
            }
        }
        // A never-written global reads the same everywhere, however often
        // the load runs.
        let globals: Vec<ValueId> = self
            .program
            .values()
            .filter(|v| self.program.is_global(*v))
            .collect();
        for g in globals {
            let loads = self.unwritten_global_loads(g).unwrap_or_default();
            self.fixed_integers.extend(loads);
        }
    }

    fn capture_top_level(&mut self) {
        let fixed: Vec<ValueId> = self.fixed_integers.iter().copied().collect();
        for v in fixed {
            if self.program.is_instruction(v) {
                let c = self.get_in_user(v);
                self.add(c);
            }
        }
        for func in self.program.functions() {
            if self.oracles.function_not_executed(func) {
                continue;
            }
            for formal in self.program.func(func).params.clone() {
                if self.is_reachable_integer(formal) {
                    let c = self.get_in_argument(formal);
                    self.add(c);
                }
            }
        }
    }

    /// Tags every non-fixed leaf of `c` with `ctx`.
    pub fn attach_context(&self, c: &mut Clause, ctx: Context) {
        c.visit_leaves_mut(&mut |e| self.attach_context_to_leaf(e, ctx));
    }

    pub fn attach_context_expr(&self, e: &mut Expr, ctx: Context) {
        e.visit_leaves_mut(&mut |leaf| self.attach_context_to_leaf(leaf, ctx));
    }

    fn attach_context_to_leaf(&self, leaf: &mut Expr, ctx: Context) {
        if let Some(v) = leaf.referenced_value() {
            if !self.is_fixed_integer(v) {
                leaf.set_context(ctx);
            }
        }
    }

    /// Whether an edge from `from` into `to` never leaves a deeper loop and
    /// is not a back-edge of `to`'s loop.
    pub fn comes_from_shallow(&self, from: BlockId, to: BlockId) -> bool {
        let (df, dt) = (
            self.oracles.loop_depth(from),
            self.oracles.loop_depth(to),
        );
        if df != dt {
            return df < dt;
        }
        match self.oracles.loop_for(to) {
            Some(l) if self.oracles.is_loop_header(to) => {
                !self.oracles.loop_data(l).contains(from)
            }
            _ => true,
        }
    }

    /// Facts of `func` outside its loops, unqualified by context.
    pub fn get_in_function(&self, func: FuncId) -> Vec<Clause> {
        if self.oracles.function_not_executed(func) {
            return vec![];
        }
        let mut facts = vec![];
        for block in &self.program.func(func).blocks {
            if self.oracles.loop_for(*block).is_some() {
                continue;
            }
            for inst in &self.program.block(*block).insts {
                if !self.is_reachable_integer(*inst) {
                    continue;
                }
                facts.extend(self.get_in_user(*inst));
                facts.extend(self.get_libcall_summary(*inst));
            }
        }
        facts.extend(self.get_unreachable_in_function(func));
        debug!(
            "{} facts in function {}",
            facts.len(),
            self.program.func(func).name
        );
        facts
    }
}
