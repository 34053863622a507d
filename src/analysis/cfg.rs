use std::collections::{HashMap, HashSet};

use crate::ir::{BlockId, FuncId, Program};

/// Successor and predecessor lists, indexed by block.
pub(crate) struct Cfg {
    pub succs: Vec<Vec<BlockId>>,
    pub preds: Vec<Vec<BlockId>>,
}

impl Cfg {
    pub fn new(program: &Program) -> Self {
        let n = program.blocks().count();
        let mut succs = vec![vec![]; n];
        let mut preds = vec![vec![]; n];
        for b in program.blocks() {
            for s in program.block(b).term.successors() {
                if !succs[b.index()].contains(&s) {
                    succs[b.index()].push(s);
                    preds[s.index()].push(b);
                }
            }
        }
        Self { succs, preds }
    }

    pub fn reverse_postorder(&self, entry: BlockId) -> Vec<BlockId> {
        let mut visited = HashSet::new();
        let mut postorder = vec![];
        // (block, next successor to look at)
        let mut stack = vec![(entry, 0)];
        visited.insert(entry);
        while let Some((block, next)) = stack.pop() {
            if let Some(s) = self.succs[block.index()].get(next).copied() {
                stack.push((block, next + 1));
                if visited.insert(s) {
                    stack.push((s, 0));
                }
            } else {
                postorder.push(block);
            }
        }
        postorder.reverse();
        postorder
    }
}

/// Immediate dominators of every block in `func`, by the iterative
/// Cooper-Harvey-Kennedy scheme. Entry and unreachable blocks get `None`.
pub(crate) fn immediate_dominators(
    program: &Program,
    cfg: &Cfg,
    func: FuncId,
    idom: &mut [Option<BlockId>],
) {
    let Some(entry) = program.func(func).entry() else {
        return;
    };
    let rpo = cfg.reverse_postorder(entry);
    let order: HashMap<BlockId, usize> = rpo.iter().enumerate().map(|(i, b)| (*b, i)).collect();

    let mut doms: HashMap<BlockId, BlockId> = HashMap::new();
    doms.insert(entry, entry);

    let intersect = |doms: &HashMap<BlockId, BlockId>, mut a: BlockId, mut b: BlockId| {
        while a != b {
            while order[&a] > order[&b] {
                a = doms[&a];
            }
            while order[&b] > order[&a] {
                b = doms[&b];
            }
        }
        a
    };

    let mut changed = true;
    while changed {
        changed = false;
        for block in rpo.iter().skip(1) {
            let mut new_idom = None;
            for pred in &cfg.preds[block.index()] {
                if !doms.contains_key(pred) {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => *pred,
                    Some(cur) => intersect(&doms, *pred, cur),
                });
            }
            if let Some(new_idom) = new_idom {
                if doms.get(block) != Some(&new_idom) {
                    doms.insert(*block, new_idom);
                    changed = true;
                }
            }
        }
    }

    for (block, dom) in doms {
        if block != entry {
            idom[block.index()] = Some(dom);
        }
    }
}

/// Breadth-first walk over `edges` from `start`, never entering `sink`.
pub(crate) fn floodfill(
    edges: &[Vec<BlockId>],
    start: BlockId,
    sink: &HashSet<BlockId>,
) -> HashSet<BlockId> {
    let mut visited = HashSet::new();
    if sink.contains(&start) {
        return visited;
    }
    let mut queue = vec![start];
    visited.insert(start);
    while let Some(block) = queue.pop() {
        for next in &edges[block.index()] {
            if !sink.contains(next) && visited.insert(*next) {
                queue.push(*next);
            }
        }
    }
    visited
}
