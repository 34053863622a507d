//! Read-only analyses the constraint engine consumes.
//!
//! Each trait is a capability computed elsewhere. `crate::analysis` has a
//! default implementation of all of them; callers with sharper analyses
//! can plug in their own.

use std::collections::{BTreeSet, HashSet};

use crate::ir::{BlockId, FuncId, ValueId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoopId(pub u32);

#[derive(Clone, Debug)]
pub struct Loop {
    pub func: FuncId,
    pub header: BlockId,
    pub blocks: BTreeSet<BlockId>,
    /// 1 for an outermost loop.
    pub depth: u32,
    pub parent: Option<LoopId>,
    pub children: Vec<LoopId>,
    /// Header φ that starts at 0 and steps by 1 along the back-edge.
    pub induction_variable: Option<ValueId>,
    /// Loop-invariant value the induction variable counts up to.
    pub trip_count: Option<ValueId>,
}

impl Loop {
    pub fn contains(&self, block: BlockId) -> bool {
        self.blocks.contains(&block)
    }
}

pub trait CallGraph {
    /// Call sites (call instructions, thread spawns included) that may
    /// invoke `func`.
    fn call_sites(&self, func: FuncId) -> &[ValueId];

    /// Functions a call site may invoke.
    fn callees(&self, call: ValueId) -> &[FuncId];
}

pub trait LoopForest {
    fn top_level_loops(&self, func: FuncId) -> &[LoopId];

    fn loop_data(&self, id: LoopId) -> &Loop;

    /// Innermost loop containing `block`.
    fn loop_for(&self, block: BlockId) -> Option<LoopId>;

    fn loop_depth(&self, block: BlockId) -> u32 {
        self.loop_for(block)
            .map_or(0, |l| self.loop_data(l).depth)
    }

    fn is_loop_header(&self, block: BlockId) -> bool {
        self.loop_for(block)
            .is_some_and(|l| self.loop_data(l).header == block)
    }

    /// Loops of `func` in pre-order, outer loops before the loops they
    /// contain.
    fn loops_top_down(&self, func: FuncId) -> Vec<LoopId> {
        let mut order = vec![];
        let mut stack: Vec<LoopId> = self.top_level_loops(func).iter().rev().copied().collect();
        while let Some(l) = stack.pop() {
            order.push(l);
            stack.extend(self.loop_data(l).children.iter().rev().copied());
        }
        order
    }
}

pub trait DominatorTree {
    /// Immediate dominator, `None` for an entry or unreachable block.
    fn idom(&self, block: BlockId) -> Option<BlockId>;

    fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let mut cur = Some(b);
        while let Some(block) = cur {
            if block == a {
                return true;
            }
            cur = self.idom(block);
        }
        false
    }
}

pub trait IntraReach {
    /// Blocks reachable from `from` along CFG edges, never entering `sink`.
    /// `from` itself is included unless it is in `sink`.
    fn floodfill(&self, from: BlockId, sink: &HashSet<BlockId>) -> HashSet<BlockId>;

    /// Blocks that reach `to` along CFG edges without passing through `sink`.
    fn floodfill_reverse(&self, to: BlockId, sink: &HashSet<BlockId>) -> HashSet<BlockId>;
}

pub trait ExecOnce {
    fn function_executed_once(&self, func: FuncId) -> bool;

    fn function_not_executed(&self, func: FuncId) -> bool;

    /// Instructions only.
    fn executed_once(&self, inst: ValueId) -> bool;

    /// Instructions only.
    fn not_executed(&self, inst: ValueId) -> bool;
}

/// Memory facts behind the load/store capture.
pub trait AliasInfo {
    /// Whether pointers `p` and `q` always address the same location.
    fn must_alias(&self, p: ValueId, q: ValueId) -> bool;

    /// Whether running `inst` may change what `q` points to. A call counts
    /// every store of the functions it may reach.
    fn may_write(&self, inst: ValueId, q: ValueId) -> bool;
}

/// Blocks the slicing collaborator marked as never reached.
pub trait UnreachableBlocks {
    fn is_unreachable(&self, block: BlockId) -> bool;
}

pub trait Oracles:
    CallGraph + LoopForest + DominatorTree + IntraReach + ExecOnce + AliasInfo + UnreachableBlocks
{
}

impl<T> Oracles for T where
    T: CallGraph
        + LoopForest
        + DominatorTree
        + IntraReach
        + ExecOnce
        + AliasInfo
        + UnreachableBlocks
{
}
