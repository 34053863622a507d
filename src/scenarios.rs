//! Small hand-built programs exercising each part of the engine. Used by
//! the unit tests, the integration tests and the command line runner.

use crate::capture::ASSERT_EQ_MARKER;
use crate::expr::{BinOp, Predicate};
use crate::ir::{BlockId, Op, Program, Terminator, Type, ValueId, THREAD_SPAWN};

const I32: Type = Type::Int(32);

pub struct Allocations {
    pub program: Program,
    pub first: ValueId,
    pub second: ValueId,
    pub in_loop: ValueId,
}

/// `main` allocates 4 then 8 bytes on its straight-line path, and 16 bytes
/// on every iteration of a ten-step loop.
pub fn allocations() -> Allocations {
    let mut p = Program::new();
    let main = p.add_function("main", &[], Type::Void);
    let entry = p.add_block(main, "entry");
    let body = p.add_block(main, "body");
    let exit = p.add_block(main, "exit");
    let zero = p.const_int(I32, 0);
    let one = p.const_int(I32, 1);
    let ten = p.const_int(I32, 10);

    let first = p.append(entry, Type::Ptr, Op::Alloca { bytes: 4 });
    let second = p.append(entry, Type::Ptr, Op::Alloca { bytes: 8 });
    p.set_terminator(entry, Terminator::Br(body));

    let i = p.phi(body, I32, vec![(entry, zero)]);
    let in_loop = p.append(body, Type::Ptr, Op::Alloca { bytes: 16 });
    let next = p.binary(body, BinOp::Add, i, one);
    p.add_phi_incoming(i, body, next);
    let more = p.icmp(body, Predicate::Ne, next, ten);
    p.set_terminator(
        body,
        Terminator::CondBr {
            cond: more,
            if_true: body,
            if_false: exit,
        },
    );
    p.set_terminator(exit, Terminator::Ret(None));

    p.set_name(first, "first");
    p.set_name(second, "second");
    p.set_name(in_loop, "in_loop");
    Allocations {
        program: p,
        first,
        second,
        in_loop,
    }
}

pub struct CountedLoop {
    pub program: Program,
    pub n: ValueId,
    pub iv: ValueId,
    pub entry: BlockId,
    pub preheader: BlockId,
    pub header: BlockId,
    pub latch: BlockId,
    pub exit: BlockId,
}

/// `if (n > 0) for (i = 0; i + 1 != n; i++)` with the header and latch in
/// separate blocks, so the loop has a closed-form trip count.
pub fn counted_loop() -> CountedLoop {
    build_counted_loop(true)
}

/// The same loop as a bare do-while: nothing tests `n` before the first
/// iteration, which runs even when `n <= 0`.
pub fn unguarded_counted_loop() -> CountedLoop {
    build_counted_loop(false)
}

fn build_counted_loop(guarded: bool) -> CountedLoop {
    let mut p = Program::new();
    let main = p.add_function("main", &[I32], Type::Void);
    let n = p.func(main).params[0];
    let entry = p.add_block(main, "entry");
    let preheader = p.add_block(main, "preheader");
    let header = p.add_block(main, "header");
    let latch = p.add_block(main, "latch");
    let exit = p.add_block(main, "exit");
    let zero = p.const_int(I32, 0);
    let one = p.const_int(I32, 1);

    if guarded {
        let positive = p.icmp(entry, Predicate::Sgt, n, zero);
        p.set_terminator(
            entry,
            Terminator::CondBr {
                cond: positive,
                if_true: preheader,
                if_false: exit,
            },
        );
    } else {
        p.set_terminator(entry, Terminator::Br(preheader));
    }
    p.set_terminator(preheader, Terminator::Br(header));
    let iv = p.phi(header, I32, vec![(preheader, zero)]);
    p.set_terminator(header, Terminator::Br(latch));
    let next = p.binary(latch, BinOp::Add, iv, one);
    p.add_phi_incoming(iv, latch, next);
    let more = p.icmp(latch, Predicate::Ne, next, n);
    p.set_terminator(
        latch,
        Terminator::CondBr {
            cond: more,
            if_true: header,
            if_false: exit,
        },
    );
    p.set_terminator(exit, Terminator::Ret(None));

    p.set_name(n, "n");
    p.set_name(iv, "i");
    CountedLoop {
        program: p,
        n,
        iv,
        entry,
        preheader,
        header,
        latch,
        exit,
    }
}

pub struct GuardedLoop {
    pub program: Program,
    pub n: ValueId,
    /// `n > 0`, guarding entry to the loop.
    pub guard: ValueId,
    pub n_minus_one: ValueId,
    pub iv: ValueId,
    pub next: ValueId,
    /// `next < n`, taking the back-edge.
    pub latch_cond: ValueId,
    pub entry: BlockId,
    pub header: BlockId,
}

/// ```text
/// entry:  guard = n > 0; n_minus_one = n - 1; br guard, loop, exit
/// loop:   i = φ [0, entry], [next, loop]; next = i + 1
///         br next < n, loop, exit
/// ```
/// The signed latch test has no closed-form trip count, so the loop is
/// bounded through the previous iteration.
pub fn guarded_loop() -> GuardedLoop {
    let mut p = Program::new();
    let main = p.add_function("main", &[I32], Type::Void);
    let n = p.func(main).params[0];
    let entry = p.add_block(main, "entry");
    let header = p.add_block(main, "loop");
    let exit = p.add_block(main, "exit");
    let zero = p.const_int(I32, 0);
    let one = p.const_int(I32, 1);

    let guard = p.icmp(entry, Predicate::Sgt, n, zero);
    let n_minus_one = p.binary(entry, BinOp::Sub, n, one);
    p.set_terminator(
        entry,
        Terminator::CondBr {
            cond: guard,
            if_true: header,
            if_false: exit,
        },
    );
    let iv = p.phi(header, I32, vec![(entry, zero)]);
    let next = p.binary(header, BinOp::Add, iv, one);
    p.add_phi_incoming(iv, header, next);
    let latch_cond = p.icmp(header, Predicate::Slt, next, n);
    p.set_terminator(
        header,
        Terminator::CondBr {
            cond: latch_cond,
            if_true: header,
            if_false: exit,
        },
    );
    p.set_terminator(exit, Terminator::Ret(None));

    p.set_name(n, "n");
    p.set_name(iv, "i");
    GuardedLoop {
        program: p,
        n,
        guard,
        n_minus_one,
        iv,
        next,
        latch_cond,
        entry,
        header,
    }
}

pub struct PhiMerge {
    pub program: Program,
    pub input: ValueId,
    pub phi: ValueId,
}

/// `phi = input < 0 ? 1 : 2`, written as a diamond.
pub fn phi_merge() -> PhiMerge {
    let mut p = Program::new();
    let main = p.add_function("main", &[I32], Type::Void);
    let input = p.func(main).params[0];
    let entry = p.add_block(main, "entry");
    let neg = p.add_block(main, "neg");
    let pos = p.add_block(main, "pos");
    let merge = p.add_block(main, "merge");
    let zero = p.const_int(I32, 0);
    let one = p.const_int(I32, 1);
    let two = p.const_int(I32, 2);

    let cond = p.icmp(entry, Predicate::Slt, input, zero);
    p.set_terminator(
        entry,
        Terminator::CondBr {
            cond,
            if_true: neg,
            if_false: pos,
        },
    );
    p.set_terminator(neg, Terminator::Br(merge));
    p.set_terminator(pos, Terminator::Br(merge));
    let phi = p.phi(merge, I32, vec![(neg, one), (pos, two)]);
    p.set_terminator(merge, Terminator::Ret(None));

    p.set_name(input, "input");
    p.set_name(phi, "phi");
    PhiMerge {
        program: p,
        input,
        phi,
    }
}

pub struct TwoCallers {
    pub program: Program,
    pub formal: ValueId,
    /// `formal + 1`
    pub sum: ValueId,
}

/// `main` calls `f(5)` and then `f(7)`.
pub fn two_callers() -> TwoCallers {
    let mut p = Program::new();
    let main = p.add_function("main", &[], Type::Void);
    let f = p.add_function("f", &[I32], I32);
    let formal = p.func(f).params[0];
    let five = p.const_int(I32, 5);
    let seven = p.const_int(I32, 7);
    let one = p.const_int(I32, 1);

    let body = p.add_block(f, "entry");
    let sum = p.binary(body, BinOp::Add, formal, one);
    p.set_terminator(body, Terminator::Ret(Some(sum)));

    let entry = p.add_block(main, "entry");
    p.call(entry, I32, f, vec![five]);
    p.call(entry, I32, f, vec![seven]);
    p.set_terminator(entry, Terminator::Ret(None));

    p.set_name(formal, "x");
    p.set_name(sum, "sum");
    TwoCallers {
        program: p,
        formal,
        sum,
    }
}

pub struct AssertMarker {
    pub program: Program,
    /// Loaded from a global, so nothing but the marker pins it down.
    pub var: ValueId,
    pub fortytwo: ValueId,
    /// `var + 1`
    pub plus_one: ValueId,
}

/// `var = *g; slicer_assert_eq(var, 42); plus_one = var + 1`.
pub fn assert_marker() -> AssertMarker {
    let mut p = Program::new();
    let marker = p.add_function(ASSERT_EQ_MARKER, &[I32, I32], Type::Void);
    let main = p.add_function("main", &[], Type::Void);
    let g = p.add_global("g");
    let fortytwo = p.const_int(I32, 42);
    let one = p.const_int(I32, 1);

    let entry = p.add_block(main, "entry");
    let var = p.append(entry, I32, Op::Load(g));
    p.call(entry, Type::Void, marker, vec![var, fortytwo]);
    let plus_one = p.binary(entry, BinOp::Add, var, one);
    p.set_terminator(entry, Terminator::Ret(None));

    p.set_name(var, "var");
    p.set_name(plus_one, "plus_one");
    AssertMarker {
        program: p,
        var,
        fortytwo,
        plus_one,
    }
}

pub struct LoopExit {
    pub program: Program,
    pub n: ValueId,
    pub iv: ValueId,
    pub next: ValueId,
    /// `φ [next, latch]` in the block the loop exits to.
    pub result: ValueId,
    pub done: BlockId,
}

/// The guarded counted loop, leaving through its own block where
/// `result = φ [next, latch]` is the last value of `i + 1`.
pub fn loop_exit() -> LoopExit {
    let mut p = Program::new();
    let main = p.add_function("main", &[I32], Type::Void);
    let n = p.func(main).params[0];
    let entry = p.add_block(main, "entry");
    let preheader = p.add_block(main, "preheader");
    let header = p.add_block(main, "header");
    let latch = p.add_block(main, "latch");
    let done = p.add_block(main, "done");
    let exit = p.add_block(main, "exit");
    let zero = p.const_int(I32, 0);
    let one = p.const_int(I32, 1);

    let positive = p.icmp(entry, Predicate::Sgt, n, zero);
    p.set_terminator(
        entry,
        Terminator::CondBr {
            cond: positive,
            if_true: preheader,
            if_false: exit,
        },
    );
    p.set_terminator(preheader, Terminator::Br(header));
    let iv = p.phi(header, I32, vec![(preheader, zero)]);
    p.set_terminator(header, Terminator::Br(latch));
    let next = p.binary(latch, BinOp::Add, iv, one);
    p.add_phi_incoming(iv, latch, next);
    let more = p.icmp(latch, Predicate::Ne, next, n);
    p.set_terminator(
        latch,
        Terminator::CondBr {
            cond: more,
            if_true: header,
            if_false: done,
        },
    );
    let result = p.phi(done, I32, vec![(latch, next)]);
    p.set_terminator(done, Terminator::Br(exit));
    p.set_terminator(exit, Terminator::Ret(None));

    p.set_name(n, "n");
    p.set_name(iv, "i");
    p.set_name(result, "result");
    LoopExit {
        program: p,
        n,
        iv,
        next,
        result,
        done,
    }
}

pub struct ThreadSpawn {
    pub program: Program,
    /// The worker's only parameter.
    pub arg: ValueId,
    /// `arg + arg`
    pub doubled: ValueId,
    pub spawn: ValueId,
}

/// `main` starts `worker(9)` through `pthread_create`.
pub fn thread_spawn() -> ThreadSpawn {
    let mut p = Program::new();
    let main = p.add_function("main", &[], Type::Void);
    let spawn_fn = p.add_function(
        THREAD_SPAWN,
        &[Type::Ptr, Type::Ptr, Type::Ptr, I32],
        I32,
    );
    let worker = p.add_function("worker", &[I32], Type::Void);
    let arg = p.func(worker).params[0];
    let body = p.add_block(worker, "entry");
    let doubled = p.binary(body, BinOp::Add, arg, arg);
    p.set_terminator(body, Terminator::Ret(None));

    let entry = p.add_block(main, "entry");
    let null = p.null();
    let start = p.func_addr(worker);
    let nine = p.const_int(I32, 9);
    let spawn = p.call(entry, I32, spawn_fn, vec![null, null, start, nine]);
    p.set_terminator(entry, Terminator::Ret(None));

    p.set_name(arg, "arg");
    p.set_name(doubled, "doubled");
    ThreadSpawn {
        program: p,
        arg,
        doubled,
        spawn,
    }
}

pub struct AddressTaken {
    pub program: Program,
    pub n: ValueId,
    pub slot: ValueId,
    /// Read back from `slot` after the helper calls.
    pub loaded: ValueId,
    /// `limit`, read inside the helper.
    pub seen: ValueId,
    pub limit: ValueId,
}

/// ```text
/// int limit = 3;
/// void helper() { seen = limit; }
/// main(n) { *slot = n; helper(); helper(); loaded = *slot; }
/// ```
pub fn address_taken() -> AddressTaken {
    let mut p = Program::new();
    let main = p.add_function("main", &[I32], Type::Void);
    let helper = p.add_function("helper", &[], Type::Void);
    let n = p.func(main).params[0];
    let limit = p.add_initialized_global("limit", 3);

    let hb = p.add_block(helper, "entry");
    let seen = p.append(hb, I32, Op::Load(limit));
    p.set_terminator(hb, Terminator::Ret(None));

    let entry = p.add_block(main, "entry");
    let slot = p.append(entry, Type::Ptr, Op::Alloca { bytes: 4 });
    p.append(entry, Type::Void, Op::Store { value: n, ptr: slot });
    p.call(entry, Type::Void, helper, vec![]);
    p.call(entry, Type::Void, helper, vec![]);
    let loaded = p.append(entry, I32, Op::Load(slot));
    p.set_terminator(entry, Terminator::Ret(None));

    p.set_name(n, "n");
    p.set_name(slot, "slot");
    p.set_name(loaded, "loaded");
    p.set_name(seen, "seen");
    AddressTaken {
        program: p,
        n,
        slot,
        loaded,
        seen,
        limit,
    }
}
