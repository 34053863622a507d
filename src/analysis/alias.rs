use std::collections::HashMap;

use crate::ir::{CastOp, Callee, FuncId, GepStep, Op, Program, Type, ValueId, ValueKind};

use super::calls::CallInfo;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Base {
    /// An allocation site or a global: distinct objects never overlap.
    Object(ValueId),
    /// A pointer from a parameter, a load or a call.
    Opaque(ValueId),
    /// Null, a function address or an integer.
    NotData,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Location {
    base: Base,
    /// Byte offset from the base, when every step is constant.
    offset: Option<i64>,
}

/// Base-object alias facts and per-function write summaries.
pub(crate) struct MemoryInfo {
    locations: Vec<Location>,
    /// Pointers each instruction writes through, its callees aside. `None`
    /// for a call nothing is known about.
    direct: HashMap<ValueId, Option<Vec<ValueId>>>,
    /// The same, over a whole function and everything it may call.
    summaries: HashMap<FuncId, Option<Vec<ValueId>>>,
    callees: HashMap<ValueId, Vec<FuncId>>,
}

impl MemoryInfo {
    pub fn new(program: &Program, calls: &CallInfo) -> Self {
        let locations = program.values().map(|v| locate(program, v)).collect();

        let mut direct = HashMap::new();
        for inst in program.instructions() {
            let writes = match program.op(inst) {
                Some(Op::Store { ptr, .. }) => Some(vec![*ptr]),
                Some(Op::Call {
                    callee: Callee::Indirect(_),
                    ..
                }) => None,
                Some(Op::Call {
                    callee: Callee::Direct(func),
                    args,
                }) if program.func(*func).is_declaration() => Some(
                    args.iter()
                        .copied()
                        .filter(|a| program.ty(*a) == Type::Ptr)
                        .collect(),
                ),
                _ => continue,
            };
            direct.insert(inst, writes);
        }

        let mut summaries = HashMap::new();
        for func in program.functions() {
            if program.func(func).is_declaration() {
                continue;
            }
            let mut writes = Some(vec![]);
            for reached in calls.reachable_from(program, &[func]) {
                for block in &program.func(reached).blocks {
                    for inst in &program.block(*block).insts {
                        match direct.get(inst) {
                            Some(Some(ptrs)) => {
                                if let Some(all) = writes.as_mut() {
                                    all.extend(ptrs.iter().copied());
                                }
                            }
                            Some(None) => writes = None,
                            None => {}
                        }
                    }
                }
            }
            summaries.insert(func, writes);
        }

        Self {
            locations,
            direct,
            summaries,
            callees: calls.callees.clone(),
        }
    }

    pub fn must_alias(&self, p: ValueId, q: ValueId) -> bool {
        if p == q {
            return true;
        }
        let (a, b) = (self.locations[p.index()], self.locations[q.index()]);
        a.base != Base::NotData && a.base == b.base && a.offset.is_some() && a.offset == b.offset
    }

    pub fn may_alias(&self, p: ValueId, q: ValueId) -> bool {
        let (a, b) = (self.locations[p.index()], self.locations[q.index()]);
        match (a.base, b.base) {
            (Base::NotData, _) | (_, Base::NotData) => false,
            (Base::Object(x), Base::Object(y)) if x != y => false,
            _ => true,
        }
    }

    pub fn may_write(&self, inst: ValueId, q: ValueId) -> bool {
        let writes_q = |ptrs: &Option<Vec<ValueId>>| match ptrs {
            Some(ptrs) => ptrs.iter().any(|p| self.may_alias(*p, q)),
            None => true,
        };
        if self.direct.get(&inst).is_some_and(writes_q) {
            return true;
        }
        self.callees
            .get(&inst)
            .into_iter()
            .flatten()
            .filter_map(|func| self.summaries.get(func))
            .any(writes_q)
    }
}

fn locate(program: &Program, p: ValueId) -> Location {
    let mut cur = p;
    let mut offset = Some(0i64);
    loop {
        match &program.value(cur).kind {
            ValueKind::Inst { op, .. } => match op {
                Op::Gep { base, steps } => {
                    for step in steps {
                        let delta = match step {
                            GepStep::Field { offset } => Some(*offset as i64),
                            GepStep::Index { elem_size, index } => program
                                .const_value(*index)
                                .map(|i| i * *elem_size as i64),
                        };
                        offset = offset.zip(delta).map(|(o, d)| o + d);
                    }
                    cur = *base;
                }
                Op::Cast(CastOp::BitCast, x) => cur = *x,
                Op::Alloca { .. } => {
                    return Location {
                        base: Base::Object(cur),
                        offset,
                    }
                }
                _ => {
                    return Location {
                        base: Base::Opaque(cur),
                        offset,
                    }
                }
            },
            ValueKind::Global { .. } => {
                return Location {
                    base: Base::Object(cur),
                    offset,
                }
            }
            ValueKind::Param { .. } => {
                return Location {
                    base: Base::Opaque(cur),
                    offset,
                }
            }
            ValueKind::Const(_) | ValueKind::Null | ValueKind::Function(_) => {
                return Location {
                    base: Base::NotData,
                    offset,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::ir::Terminator;

    const I32: Type = Type::Int(32);

    #[test]
    fn test_alias_by_base_object() {
        let mut p = Program::new();
        let main = p.add_function("main", &[Type::Ptr], Type::Void);
        let param = p.func(main).params[0];
        let b = p.add_block(main, "entry");
        let g = p.add_global("g");
        let x = p.append(b, Type::Ptr, Op::Alloca { bytes: 8 });
        let y = p.append(b, Type::Ptr, Op::Alloca { bytes: 8 });
        let field = |p: &mut Program, offset| {
            p.append(
                b,
                Type::Ptr,
                Op::Gep {
                    base: x,
                    steps: vec![GepStep::Field { offset }],
                },
            )
        };
        let x4 = field(&mut p, 4);
        let x4_again = field(&mut p, 4);
        let x0 = field(&mut p, 0);
        let null = p.null();
        p.set_terminator(b, Terminator::Ret(None));

        let calls = CallInfo::new(&p);
        let m = MemoryInfo::new(&p, &calls);
        assert!(m.must_alias(x4, x4_again));
        assert!(m.must_alias(x0, x));
        assert!(!m.must_alias(x4, x));
        assert!(m.may_alias(x4, x));
        assert!(!m.may_alias(x, y));
        assert!(!m.may_alias(x, g));
        assert!(m.may_alias(param, x));
        assert!(!m.must_alias(param, x));
        assert!(!m.may_alias(null, param));
    }

    /// `main` stores to `a` directly and to `b` through `f`; `ext` is an
    /// external routine handed `c`.
    #[test]
    fn test_writes_through_calls() {
        let mut p = Program::new();
        let main = p.add_function("main", &[], Type::Void);
        let f = p.add_function("f", &[Type::Ptr], Type::Void);
        let ext = p.add_function("ext", &[Type::Ptr, I32], Type::Void);
        let formal = p.func(f).params[0];
        let fb = p.add_block(f, "entry");
        let one = p.const_int(I32, 1);
        p.append(
            fb,
            Type::Void,
            Op::Store {
                value: one,
                ptr: formal,
            },
        );
        p.set_terminator(fb, Terminator::Ret(None));

        let b = p.add_block(main, "entry");
        let a = p.append(b, Type::Ptr, Op::Alloca { bytes: 4 });
        let c = p.append(b, Type::Ptr, Op::Alloca { bytes: 4 });
        let d = p.append(b, Type::Ptr, Op::Alloca { bytes: 4 });
        let store = p.append(b, Type::Void, Op::Store { value: one, ptr: a });
        let to_f = p.call(b, Type::Void, f, vec![d]);
        let to_ext = p.call(b, Type::Void, ext, vec![c, one]);
        let load = p.append(b, I32, Op::Load(a));
        p.set_terminator(b, Terminator::Ret(None));

        let calls = CallInfo::new(&p);
        let m = MemoryInfo::new(&p, &calls);
        assert!(m.may_write(store, a));
        assert!(!m.may_write(store, c));
        // `f` stores through its parameter, which may be anything.
        assert!(m.may_write(to_f, a));
        assert!(m.may_write(to_ext, c));
        assert!(!m.may_write(to_ext, a));
        assert!(!m.may_write(load, a));
    }
}
