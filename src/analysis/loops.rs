use std::collections::{BTreeSet, HashSet};

use itertools::Itertools;
use log::debug;

use crate::analysis::cfg::{floodfill, Cfg};
use crate::expr::{BinOp, Predicate};
use crate::ir::{BlockId, FuncId, Op, Program, Terminator, ValueId};
use crate::oracle::{Loop, LoopId};

/// Natural loops of `func`, appended to `loops`. Returns the ids of the
/// outermost ones.
pub(crate) fn find_loops(
    program: &Program,
    cfg: &Cfg,
    func: FuncId,
    idom: &[Option<BlockId>],
    dominates: impl Fn(BlockId, BlockId) -> bool,
    reachable: &HashSet<BlockId>,
    loops: &mut Vec<Loop>,
) -> Vec<LoopId> {
    // header -> latches
    let mut latches: Vec<(BlockId, Vec<BlockId>)> = vec![];
    for block in &program.func(func).blocks {
        if !reachable.contains(block) {
            continue;
        }
        for succ in &cfg.succs[block.index()] {
            if dominates(*succ, *block) {
                match latches.iter_mut().find(|(h, _)| h == succ) {
                    Some((_, ls)) => ls.push(*block),
                    None => latches.push((*succ, vec![*block])),
                }
            }
        }
    }

    let mut found: Vec<Loop> = latches
        .into_iter()
        .map(|(header, latches)| {
            let sink = HashSet::from([header]);
            let mut blocks: BTreeSet<BlockId> = BTreeSet::from([header]);
            for latch in latches {
                blocks.extend(floodfill(&cfg.preds, latch, &sink));
            }
            Loop {
                func,
                header,
                blocks,
                depth: 1,
                parent: None,
                children: vec![],
                induction_variable: None,
                trip_count: None,
            }
        })
        .collect();

    // Outer loops first so a parent is always numbered before its children.
    found.sort_by_key(|l| std::cmp::Reverse(l.blocks.len()));
    let base = loops.len() as u32;
    let mut top = vec![];
    for i in 0..found.len() {
        let parent = (0..i)
            .filter(|j| found[*j].blocks.is_superset(&found[i].blocks))
            .min_by_key(|j| found[*j].blocks.len());
        match parent {
            Some(j) => {
                found[i].parent = Some(LoopId(base + j as u32));
                found[i].depth = found[j].depth + 1;
                found[j].children.push(LoopId(base + i as u32));
            }
            None => top.push(LoopId(base + i as u32)),
        }
    }

    for l in found.iter_mut() {
        l.induction_variable = canonical_induction_variable(program, l);
        l.trip_count = l
            .induction_variable
            .and_then(|iv| trip_count(program, cfg, idom, l, iv));
    }
    loops.extend(found);
    top
}

/// The incoming (block, value) pairs of a header φ split into the edge from
/// outside the loop and the back-edge.
pub(crate) fn split_incoming(
    l: &Loop,
    incoming: &[(BlockId, ValueId)],
) -> Option<((BlockId, ValueId), (BlockId, ValueId))> {
    let (a, b) = incoming.iter().copied().collect_tuple()?;
    match (l.contains(a.0), l.contains(b.0)) {
        (false, true) => Some((a, b)),
        (true, false) => Some((b, a)),
        _ => None,
    }
}

fn is_increment_of(program: &Program, next: ValueId, iv: ValueId) -> bool {
    match program.op(next) {
        Some(Op::Binary(BinOp::Add, l, r)) => {
            (*l == iv && program.const_value(*r) == Some(1))
                || (*r == iv && program.const_value(*l) == Some(1))
        }
        _ => false,
    }
}

fn canonical_induction_variable(program: &Program, l: &Loop) -> Option<ValueId> {
    program.phis(l.header).find_map(|(phi, incoming)| {
        let ((_, init), (_, next)) = split_incoming(l, incoming)?;
        (program.const_value(init) == Some(0) && is_increment_of(program, next, phi)).then_some(phi)
    })
}

/// `n` when the latch leaves the loop exactly when `iv.next` reaches a
/// loop-invariant `n` that is known positive on entry. Without the entry
/// test the body of a bottom-tested loop still runs once for `n <= 0`.
fn trip_count(
    program: &Program,
    cfg: &Cfg,
    idom: &[Option<BlockId>],
    l: &Loop,
    iv: ValueId,
) -> Option<ValueId> {
    let Some(Op::Phi(incoming)) = program.op(iv) else {
        return None;
    };
    let ((preheader, _), (latch, next)) = split_incoming(l, incoming)?;
    let Terminator::CondBr {
        cond,
        if_true,
        if_false,
    } = &program.block(latch).term
    else {
        return None;
    };
    let Some(Op::ICmp(pred, a, b)) = program.op(*cond) else {
        return None;
    };
    let n = if *a == next {
        *b
    } else if *b == next {
        *a
    } else {
        return None;
    };
    let invariant = program.block_of(n).map_or(true, |block| !l.contains(block));
    let exits_at_n = match pred {
        Predicate::Ne => *if_true == l.header,
        Predicate::Eq => *if_false == l.header,
        _ => false,
    };
    if !(invariant && exits_at_n) {
        return None;
    }
    if !positive_on_entry(program, cfg, idom, preheader, l.header, n) {
        debug!("no entry test shows {n} > 0 for the loop at {}", l.header);
        return None;
    }
    Some(n)
}

/// Whether `n > 0` holds whenever control takes the edge `from -> header`:
/// `n` is a positive constant, or the edge itself or an edge into one of
/// `from`'s single-predecessor dominators is the passing side of a test.
fn positive_on_entry(
    program: &Program,
    cfg: &Cfg,
    idom: &[Option<BlockId>],
    from: BlockId,
    header: BlockId,
    n: ValueId,
) -> bool {
    if program.const_value(n).is_some_and(|k| k > 0) {
        return true;
    }
    if edge_implies_positive(program, from, header, n) {
        return true;
    }
    let mut block = from;
    while let Some(up) = idom[block.index()] {
        if cfg.preds[block.index()] == [up] && edge_implies_positive(program, up, block, n) {
            return true;
        }
        block = up;
    }
    false
}

fn edge_implies_positive(program: &Program, from: BlockId, to: BlockId, n: ValueId) -> bool {
    let Terminator::CondBr {
        cond,
        if_true,
        if_false,
    } = &program.block(from).term
    else {
        return false;
    };
    if if_true == if_false {
        return false;
    }
    let Some(Op::ICmp(pred, a, b)) = program.op(*cond) else {
        return false;
    };
    let pred = if *if_true == to { *pred } else { pred.negated() };
    let at_least = |v: ValueId, k: i64| program.const_value(v).is_some_and(|c| c >= k);
    match pred {
        Predicate::Sgt => *a == n && at_least(*b, 0),
        Predicate::Sge => *a == n && at_least(*b, 1),
        Predicate::Slt => *b == n && at_least(*a, 0),
        Predicate::Sle => *b == n && at_least(*a, 1),
        _ => false,
    }
}
