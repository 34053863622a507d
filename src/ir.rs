//! A small SSA program representation.
//!
//! This is the surface the constraint engine reads: typed values, basic
//! blocks ending in terminators, and functions. Programs are built through
//! the `Program` builder methods and are immutable while an analysis holds
//! them.

use std::collections::HashMap;
use std::fmt;

use crate::expr::{BinOp, Predicate};
use crate::{BOOL_WIDTH, WORD_WIDTH};

/// Name of the thread-spawn routine. Its fourth argument is passed to the
/// entry function named by its third argument.
pub const THREAD_SPAWN: &str = "pthread_create";

macro_rules! entity {
    ($name:ident, $prefix:literal) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

entity!(ValueId, "v");
entity!(BlockId, "bb");
entity!(FuncId, "fn");

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    Int(u32),
    Ptr,
    Void,
}

impl Type {
    pub fn is_integer_or_pointer(self) -> bool {
        matches!(self, Type::Int(_) | Type::Ptr)
    }

    /// Width of this type inside the constraint model: `i1` stays a single
    /// bit, everything else is widened or narrowed to the working width.
    pub fn model_width(self) -> u32 {
        match self {
            Type::Int(1) => BOOL_WIDTH,
            _ => WORD_WIDTH,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CastOp {
    Trunc,
    ZExt,
    SExt,
    PtrToInt,
    IntToPtr,
    BitCast,
}

/// One step of an address computation, with sizes already resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GepStep {
    /// Advance by `index` elements of `elem_size` bytes.
    Index { elem_size: u64, index: ValueId },
    /// Advance into a struct field at a fixed byte offset.
    Field { offset: u64 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Callee {
    Direct(FuncId),
    Indirect(ValueId),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    Binary(BinOp, ValueId, ValueId),
    ICmp(Predicate, ValueId, ValueId),
    Cast(CastOp, ValueId),
    Gep {
        base: ValueId,
        steps: Vec<GepStep>,
    },
    Select {
        cond: ValueId,
        if_true: ValueId,
        if_false: ValueId,
    },
    Phi(Vec<(BlockId, ValueId)>),
    Alloca {
        bytes: u64,
    },
    Call {
        callee: Callee,
        args: Vec<ValueId>,
    },
    Load(ValueId),
    Store {
        value: ValueId,
        ptr: ValueId,
    },
}

impl Op {
    /// Operands in use-edge order.
    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            Op::Binary(_, l, r) | Op::ICmp(_, l, r) => vec![*l, *r],
            Op::Cast(_, x) | Op::Load(x) => vec![*x],
            Op::Gep { base, steps } => std::iter::once(*base)
                .chain(steps.iter().filter_map(|step| match step {
                    GepStep::Index { index, .. } => Some(*index),
                    GepStep::Field { .. } => None,
                }))
                .collect(),
            Op::Select {
                cond,
                if_true,
                if_false,
            } => vec![*cond, *if_true, *if_false],
            Op::Phi(incoming) => incoming.iter().map(|(_, v)| *v).collect(),
            Op::Alloca { .. } => vec![],
            Op::Call { callee, args } => {
                let mut operands = args.clone();
                if let Callee::Indirect(target) = callee {
                    operands.push(*target);
                }
                operands
            }
            Op::Store { value, ptr } => vec![*value, *ptr],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Terminator {
    Br(BlockId),
    CondBr {
        cond: ValueId,
        if_true: BlockId,
        if_false: BlockId,
    },
    Switch {
        cond: ValueId,
        default: BlockId,
        cases: Vec<(ValueId, BlockId)>,
    },
    IndirectBr {
        addr: ValueId,
        dests: Vec<BlockId>,
    },
    Ret(Option<ValueId>),
    Unreachable,
}

impl Terminator {
    /// Successors in edge order: `[true, false]` for a two-way branch and
    /// `[default, cases...]` for a switch.
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Br(dest) => vec![*dest],
            Terminator::CondBr {
                if_true, if_false, ..
            } => vec![*if_true, *if_false],
            Terminator::Switch { default, cases, .. } => std::iter::once(*default)
                .chain(cases.iter().map(|(_, dest)| *dest))
                .collect(),
            Terminator::IndirectBr { dests, .. } => dests.clone(),
            Terminator::Ret(_) | Terminator::Unreachable => vec![],
        }
    }

    pub fn is_return(&self) -> bool {
        matches!(self, Terminator::Ret(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValueKind {
    Const(i64),
    Null,
    /// A global variable; `init` is the integer it holds before any store.
    Global { name: String, init: Option<i64> },
    Function(FuncId),
    Param { func: FuncId, index: usize },
    Inst { block: BlockId, op: Op },
}

#[derive(Clone, Debug)]
pub struct ValueData {
    pub ty: Type,
    pub kind: ValueKind,
    pub name: Option<String>,
}

#[derive(Clone, Debug)]
pub struct BlockData {
    pub func: FuncId,
    pub name: String,
    pub insts: Vec<ValueId>,
    pub term: Terminator,
}

#[derive(Clone, Debug)]
pub struct FunctionData {
    pub name: String,
    pub params: Vec<ValueId>,
    pub blocks: Vec<BlockId>,
    pub ret: Type,
}

impl FunctionData {
    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn entry(&self) -> Option<BlockId> {
        self.blocks.first().copied()
    }
}

/// One operand edge: operand `index` of `user`, which currently holds `value`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Use {
    pub user: ValueId,
    pub index: usize,
    pub value: ValueId,
}

#[derive(Clone, Debug, Default)]
pub struct Program {
    values: Vec<ValueData>,
    blocks: Vec<BlockData>,
    funcs: Vec<FunctionData>,
    consts: HashMap<(Type, i64), ValueId>,
    null: Option<ValueId>,
    entry: Option<FuncId>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_value(&mut self, ty: Type, kind: ValueKind) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(ValueData {
            ty,
            kind,
            name: None,
        });
        id
    }

    /// Adds a function. It stays a declaration until a block is added.
    pub fn add_function(&mut self, name: &str, params: &[Type], ret: Type) -> FuncId {
        let func = FuncId(self.funcs.len() as u32);
        let params = params
            .iter()
            .enumerate()
            .map(|(index, ty)| self.push_value(*ty, ValueKind::Param { func, index }))
            .collect();
        self.funcs.push(FunctionData {
            name: name.to_string(),
            params,
            blocks: vec![],
            ret,
        });
        func
    }

    pub fn add_block(&mut self, func: FuncId, name: &str) -> BlockId {
        let block = BlockId(self.blocks.len() as u32);
        self.blocks.push(BlockData {
            func,
            name: name.to_string(),
            insts: vec![],
            term: Terminator::Unreachable,
        });
        self.funcs[func.index()].blocks.push(block);
        block
    }

    pub fn set_entry(&mut self, func: FuncId) {
        self.entry = Some(func);
    }

    pub fn const_int(&mut self, ty: Type, value: i64) -> ValueId {
        if let Some(id) = self.consts.get(&(ty, value)) {
            return *id;
        }
        let id = self.push_value(ty, ValueKind::Const(value));
        self.consts.insert((ty, value), id);
        id
    }

    pub fn null(&mut self) -> ValueId {
        match self.null {
            Some(id) => id,
            None => {
                let id = self.push_value(Type::Ptr, ValueKind::Null);
                self.null = Some(id);
                id
            }
        }
    }

    pub fn add_global(&mut self, name: &str) -> ValueId {
        let id = self.push_value(
            Type::Ptr,
            ValueKind::Global {
                name: name.to_string(),
                init: None,
            },
        );
        self.set_name(id, name);
        id
    }

    /// Adds a global that starts out holding `init`.
    pub fn add_initialized_global(&mut self, name: &str, init: i64) -> ValueId {
        let id = self.add_global(name);
        if let ValueKind::Global { init: slot, .. } = &mut self.values[id.index()].kind {
            *slot = Some(init);
        }
        id
    }

    pub fn func_addr(&mut self, func: FuncId) -> ValueId {
        self.push_value(Type::Ptr, ValueKind::Function(func))
    }

    /// Appends an instruction to the end of `block`.
    pub fn append(&mut self, block: BlockId, ty: Type, op: Op) -> ValueId {
        let id = self.push_value(ty, ValueKind::Inst { block, op });
        self.blocks[block.index()].insts.push(id);
        id
    }

    pub fn binary(&mut self, block: BlockId, op: BinOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.ty(lhs);
        self.append(block, ty, Op::Binary(op, lhs, rhs))
    }

    pub fn icmp(&mut self, block: BlockId, pred: Predicate, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.append(block, Type::Int(1), Op::ICmp(pred, lhs, rhs))
    }

    pub fn phi(&mut self, block: BlockId, ty: Type, incoming: Vec<(BlockId, ValueId)>) -> ValueId {
        self.append(block, ty, Op::Phi(incoming))
    }

    pub fn add_phi_incoming(&mut self, phi: ValueId, block: BlockId, value: ValueId) {
        if let ValueKind::Inst {
            op: Op::Phi(incoming),
            ..
        } = &mut self.values[phi.index()].kind
        {
            incoming.push((block, value));
        }
    }

    pub fn call(&mut self, block: BlockId, ret: Type, callee: FuncId, args: Vec<ValueId>) -> ValueId {
        self.append(
            block,
            ret,
            Op::Call {
                callee: Callee::Direct(callee),
                args,
            },
        )
    }

    pub fn set_terminator(&mut self, block: BlockId, term: Terminator) {
        self.blocks[block.index()].term = term;
    }

    pub fn set_name(&mut self, value: ValueId, name: &str) {
        self.values[value.index()].name = Some(name.to_string());
    }

    pub fn value(&self, value: ValueId) -> &ValueData {
        &self.values[value.index()]
    }

    pub fn ty(&self, value: ValueId) -> Type {
        self.values[value.index()].ty
    }

    /// Model width of `value`.
    pub fn width(&self, value: ValueId) -> u32 {
        self.ty(value).model_width()
    }

    pub fn block(&self, block: BlockId) -> &BlockData {
        &self.blocks[block.index()]
    }

    pub fn func(&self, func: FuncId) -> &FunctionData {
        &self.funcs[func.index()]
    }

    pub fn values(&self) -> impl Iterator<Item = ValueId> + '_ {
        (0..self.values.len() as u32).map(ValueId)
    }

    pub fn blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        (0..self.blocks.len() as u32).map(BlockId)
    }

    pub fn functions(&self) -> impl Iterator<Item = FuncId> + '_ {
        (0..self.funcs.len() as u32).map(FuncId)
    }

    /// The program entry: the function set with `set_entry`, else `main`.
    pub fn entry(&self) -> Option<FuncId> {
        self.entry.or_else(|| {
            self.functions()
                .find(|f| self.func(*f).name == "main" && !self.func(*f).is_declaration())
        })
    }

    pub fn op(&self, value: ValueId) -> Option<&Op> {
        match &self.value(value).kind {
            ValueKind::Inst { op, .. } => Some(op),
            _ => None,
        }
    }

    pub fn is_instruction(&self, value: ValueId) -> bool {
        matches!(self.value(value).kind, ValueKind::Inst { .. })
    }

    pub fn block_of(&self, value: ValueId) -> Option<BlockId> {
        match &self.value(value).kind {
            ValueKind::Inst { block, .. } => Some(*block),
            _ => None,
        }
    }

    /// The function an instruction or parameter belongs to.
    pub fn container(&self, value: ValueId) -> Option<FuncId> {
        match &self.value(value).kind {
            ValueKind::Inst { block, .. } => Some(self.block(*block).func),
            ValueKind::Param { func, .. } => Some(*func),
            _ => None,
        }
    }

    /// Integer constants and the null pointer.
    pub fn is_constant(&self, value: ValueId) -> bool {
        matches!(self.value(value).kind, ValueKind::Const(_) | ValueKind::Null)
    }

    pub fn const_value(&self, value: ValueId) -> Option<i64> {
        match self.value(value).kind {
            ValueKind::Const(c) => Some(c),
            ValueKind::Null => Some(0),
            _ => None,
        }
    }

    pub fn is_global(&self, value: ValueId) -> bool {
        matches!(self.value(value).kind, ValueKind::Global { .. })
    }

    pub fn global_initializer(&self, global: ValueId) -> Option<i64> {
        match self.value(global).kind {
            ValueKind::Global { init, .. } => init,
            _ => None,
        }
    }

    pub fn use_of(&self, user: ValueId, index: usize) -> Option<Use> {
        let value = *self.op(user)?.operands().get(index)?;
        Some(Use { user, index, value })
    }

    /// The leading φ instructions of `block`.
    pub fn phis(&self, block: BlockId) -> impl Iterator<Item = (ValueId, &[(BlockId, ValueId)])> + '_ {
        self.block(block)
            .insts
            .iter()
            .map_while(move |inst| match self.op(*inst) {
                Some(Op::Phi(incoming)) => Some((*inst, incoming.as_slice())),
                _ => None,
            })
    }

    pub fn call_target(&self, call: ValueId) -> Option<FuncId> {
        match self.op(call)? {
            Op::Call {
                callee: Callee::Direct(func),
                ..
            } => Some(*func),
            _ => None,
        }
    }

    pub fn callee_name(&self, call: ValueId) -> Option<&str> {
        self.call_target(call).map(|f| self.func(f).name.as_str())
    }

    pub fn call_args(&self, call: ValueId) -> &[ValueId] {
        match self.op(call) {
            Some(Op::Call { args, .. }) => args,
            _ => &[],
        }
    }

    /// For a thread-spawn call, the function the new thread starts in.
    pub fn spawned_function(&self, call: ValueId) -> Option<FuncId> {
        if self.callee_name(call)? != THREAD_SPAWN {
            return None;
        }
        match self.value(*self.call_args(call).get(2)?).kind {
            ValueKind::Function(func) => Some(func),
            _ => None,
        }
    }

    /// All instructions in program order.
    pub fn instructions(&self) -> impl Iterator<Item = ValueId> + '_ {
        self.funcs
            .iter()
            .flat_map(|f| f.blocks.iter())
            .flat_map(|b| self.block(*b).insts.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_constants_are_interned() {
        let mut p = Program::new();
        let a = p.const_int(Type::Int(32), 7);
        let b = p.const_int(Type::Int(32), 7);
        let c = p.const_int(Type::Int(1), 1);
        assert_eq!(a, b);
        assert_ne!(a, c);
        let null = p.null();
        assert_eq!(p.null(), null);
        assert_eq!(p.const_value(null), Some(0));
    }

    #[test]
    fn test_operands_and_uses() {
        let mut p = Program::new();
        let f = p.add_function("f", &[Type::Ptr, Type::Int(32)], Type::Void);
        let b = p.add_block(f, "entry");
        let base = p.func(f).params[0];
        let idx = p.func(f).params[1];
        let gep = p.append(
            b,
            Type::Ptr,
            Op::Gep {
                base,
                steps: vec![
                    GepStep::Field { offset: 8 },
                    GepStep::Index {
                        elem_size: 4,
                        index: idx,
                    },
                ],
            },
        );
        assert_eq!(p.op(gep).map(Op::operands), Some(vec![base, idx]));
        let u = p.use_of(gep, 1).expect("operand 1 exists");
        assert_eq!(u.value, idx);
        assert!(p.use_of(gep, 2).is_none());
        assert_eq!(p.container(gep), Some(f));
        assert_eq!(p.container(idx), Some(f));
    }

    #[test]
    fn test_global_initializers() {
        let mut p = Program::new();
        let plain = p.add_global("plain");
        let counter = p.add_initialized_global("counter", 3);
        assert!(p.is_global(counter));
        assert_eq!(p.global_initializer(counter), Some(3));
        assert_eq!(p.global_initializer(plain), None);
        assert_eq!(p.value(counter).name.as_deref(), Some("counter"));
        assert!(!p.is_constant(counter));
    }

    #[test]
    fn test_successor_order() {
        let mut p = Program::new();
        let f = p.add_function("main", &[Type::Int(32)], Type::Void);
        let entry = p.add_block(f, "entry");
        let a = p.add_block(f, "a");
        let d = p.add_block(f, "d");
        let one = p.const_int(Type::Int(32), 1);
        let x = p.func(f).params[0];
        p.set_terminator(
            entry,
            Terminator::Switch {
                cond: x,
                default: d,
                cases: vec![(one, a)],
            },
        );
        assert_eq!(p.block(entry).term.successors(), vec![d, a]);
        assert_eq!(p.entry(), Some(f));
    }
}
