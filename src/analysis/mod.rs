//! Default oracles computed directly from a `Program`.

mod alias;
mod calls;
mod cfg;
mod loops;

use std::collections::HashSet;

use log::debug;

use crate::ir::{BlockId, FuncId, Program, ValueId};
use crate::oracle::{
    AliasInfo, CallGraph, DominatorTree, ExecOnce, IntraReach, Loop, LoopForest, LoopId,
    UnreachableBlocks,
};
use alias::MemoryInfo;
use calls::CallInfo;
use cfg::{floodfill, immediate_dominators, Cfg};

pub(crate) use loops::split_incoming;

pub struct ProgramAnalyses {
    cfg: Cfg,
    idom: Vec<Option<BlockId>>,
    loops: Vec<Loop>,
    top_loops: Vec<Vec<LoopId>>,
    innermost: Vec<Option<LoopId>>,
    calls: CallInfo,
    memory: MemoryInfo,
    reached: HashSet<FuncId>,
    once: HashSet<FuncId>,
    once_insts: HashSet<ValueId>,
    dead_insts: HashSet<ValueId>,
    marked: HashSet<BlockId>,
}

impl ProgramAnalyses {
    pub fn compute(program: &Program) -> Self {
        Self::with_unreachable(program, [])
    }

    /// Like `compute`, treating `marked` as blocks known never to run.
    pub fn with_unreachable(program: &Program, marked: impl IntoIterator<Item = BlockId>) -> Self {
        let marked: HashSet<BlockId> = marked.into_iter().collect();
        let cfg = Cfg::new(program);
        let n_blocks = cfg.succs.len();

        let mut idom = vec![None; n_blocks];
        let mut cfg_reachable = HashSet::new();
        for func in program.functions() {
            immediate_dominators(program, &cfg, func, &mut idom);
            if let Some(entry) = program.func(func).entry() {
                cfg_reachable.extend(floodfill(&cfg.succs, entry, &HashSet::new()));
            }
        }

        let dominates = |a: BlockId, b: BlockId| {
            let mut cur = Some(b);
            while let Some(block) = cur {
                if block == a {
                    return true;
                }
                cur = idom[block.index()];
            }
            false
        };
        let mut loops = vec![];
        let mut top_loops = vec![];
        for func in program.functions() {
            top_loops.push(loops::find_loops(
                program,
                &cfg,
                func,
                &idom,
                dominates,
                &cfg_reachable,
                &mut loops,
            ));
        }
        let mut innermost: Vec<Option<LoopId>> = vec![None; n_blocks];
        for (i, l) in loops.iter().enumerate() {
            for block in &l.blocks {
                let slot = &mut innermost[block.index()];
                if slot.map_or(true, |cur| loops[cur.0 as usize].depth < l.depth) {
                    *slot = Some(LoopId(i as u32));
                }
            }
        }

        let calls = CallInfo::new(program);
        let roots: Vec<FuncId> = program.entry().into_iter().collect();
        let reached = calls.reachable_from(program, &roots);

        let in_loop = |block: BlockId| innermost[block.index()].is_some();
        let runs = |block: BlockId| cfg_reachable.contains(&block) && !marked.contains(&block);

        let mut once: HashSet<FuncId> = roots.iter().copied().collect();
        let mut changed = true;
        while changed {
            changed = false;
            for func in program.functions() {
                if once.contains(&func) || !reached.contains(&func) {
                    continue;
                }
                let [site] = calls.sites[func.index()].as_slice() else {
                    continue;
                };
                let Some(block) = program.block_of(*site) else {
                    continue;
                };
                let caller = program.block(block).func;
                if once.contains(&caller)
                    && runs(block)
                    && !in_loop(block)
                    && !calls.is_recursive(program, func)
                {
                    once.insert(func);
                    changed = true;
                }
            }
        }

        let mut once_insts = HashSet::new();
        let mut dead_insts = HashSet::new();
        for func in program.functions() {
            for block in &program.func(func).blocks {
                for inst in &program.block(*block).insts {
                    if !reached.contains(&func) || !runs(*block) {
                        dead_insts.insert(*inst);
                    } else if once.contains(&func) && !in_loop(*block) {
                        once_insts.insert(*inst);
                    }
                }
            }
        }
        let memory = MemoryInfo::new(program, &calls);
        debug!(
            "analyses: {} loops, {} reached functions, {} run once",
            loops.len(),
            reached.len(),
            once.len()
        );

        Self {
            cfg,
            idom,
            loops,
            top_loops,
            innermost,
            calls,
            memory,
            reached,
            once,
            once_insts,
            dead_insts,
            marked,
        }
    }
}

impl CallGraph for ProgramAnalyses {
    fn call_sites(&self, func: FuncId) -> &[ValueId] {
        self.calls.sites.get(func.index()).map(Vec::as_slice).unwrap_or(&[])
    }

    fn callees(&self, call: ValueId) -> &[FuncId] {
        self.calls.callees.get(&call).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl LoopForest for ProgramAnalyses {
    fn top_level_loops(&self, func: FuncId) -> &[LoopId] {
        self.top_loops.get(func.index()).map(Vec::as_slice).unwrap_or(&[])
    }

    fn loop_data(&self, id: LoopId) -> &Loop {
        &self.loops[id.0 as usize]
    }

    fn loop_for(&self, block: BlockId) -> Option<LoopId> {
        self.innermost.get(block.index()).copied().flatten()
    }
}

impl DominatorTree for ProgramAnalyses {
    fn idom(&self, block: BlockId) -> Option<BlockId> {
        self.idom.get(block.index()).copied().flatten()
    }
}

impl IntraReach for ProgramAnalyses {
    fn floodfill(&self, from: BlockId, sink: &HashSet<BlockId>) -> HashSet<BlockId> {
        floodfill(&self.cfg.succs, from, sink)
    }

    fn floodfill_reverse(&self, to: BlockId, sink: &HashSet<BlockId>) -> HashSet<BlockId> {
        floodfill(&self.cfg.preds, to, sink)
    }
}

impl ExecOnce for ProgramAnalyses {
    fn function_executed_once(&self, func: FuncId) -> bool {
        self.once.contains(&func)
    }

    fn function_not_executed(&self, func: FuncId) -> bool {
        !self.reached.contains(&func)
    }

    fn executed_once(&self, inst: ValueId) -> bool {
        self.once_insts.contains(&inst)
    }

    fn not_executed(&self, inst: ValueId) -> bool {
        self.dead_insts.contains(&inst)
    }
}

impl AliasInfo for ProgramAnalyses {
    fn must_alias(&self, p: ValueId, q: ValueId) -> bool {
        self.memory.must_alias(p, q)
    }

    fn may_write(&self, inst: ValueId, q: ValueId) -> bool {
        self.memory.may_write(inst, q)
    }
}

impl UnreachableBlocks for ProgramAnalyses {
    fn is_unreachable(&self, block: BlockId) -> bool {
        self.marked.contains(&block)
    }
}
