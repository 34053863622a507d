//! Symbolic expressions, comparisons and boolean clauses.

use std::fmt;

use strum_macros::{Display, EnumIter};

use crate::ir::{Program, Use, ValueId};
use crate::{BOOL_WIDTH, WORD_WIDTH};

/// Distinguishes evaluations of the same static value in different dynamic
/// activations. 0 is the default context.
pub type Context = u32;

pub(crate) fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// A bit-vector constant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Literal {
    pub width: u32,
    pub bits: u64,
}

impl Literal {
    pub fn new(width: u32, value: i64) -> Self {
        Self {
            width,
            bits: value as u64 & mask(width),
        }
    }

    pub fn bool(value: bool) -> Self {
        Self::new(BOOL_WIDTH, value as i64)
    }

    pub fn word(value: i64) -> Self {
        Self::new(WORD_WIDTH, value)
    }

    /// The value read as a two's complement number.
    pub fn signed(self) -> i64 {
        let shift = 64 - self.width;
        ((self.bits << shift) as i64) >> shift
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.width == BOOL_WIDTH {
            write!(f, "{}", self.bits)
        } else {
            write!(f, "{}", self.signed())
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter)]
pub enum BinOp {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "udiv")]
    UDiv,
    #[strum(serialize = "sdiv")]
    SDiv,
    #[strum(serialize = "urem")]
    URem,
    #[strum(serialize = "srem")]
    SRem,
    #[strum(serialize = "<<")]
    Shl,
    #[strum(serialize = ">>")]
    LShr,
    #[strum(serialize = ">>a")]
    AShr,
    #[strum(serialize = "&")]
    And,
    #[strum(serialize = "|")]
    Or,
    #[strum(serialize = "^")]
    Xor,
}

impl BinOp {
    pub fn is_shift(self) -> bool {
        matches!(self, BinOp::Shl | BinOp::LShr | BinOp::AShr)
    }

    pub fn is_division(self) -> bool {
        matches!(self, BinOp::UDiv | BinOp::SDiv | BinOp::URem | BinOp::SRem)
    }

    /// Folds the operation over two literals of the same width. Division by
    /// zero does not fold.
    pub fn eval(self, l: Literal, r: Literal) -> Option<Literal> {
        let w = l.width;
        let (a, b) = (l.bits, r.bits);
        let (sa, sb) = (l.signed(), r.signed());
        let value = match self {
            BinOp::Add => a.wrapping_add(b),
            BinOp::Sub => a.wrapping_sub(b),
            BinOp::Mul => a.wrapping_mul(b),
            BinOp::UDiv if b != 0 => a / b,
            BinOp::URem if b != 0 => a % b,
            BinOp::SDiv if b != 0 => sa.wrapping_div(sb) as u64,
            BinOp::SRem if b != 0 => sa.wrapping_rem(sb) as u64,
            BinOp::UDiv | BinOp::URem | BinOp::SDiv | BinOp::SRem => return None,
            BinOp::Shl => a << (b % w as u64),
            BinOp::LShr => a >> (b % w as u64),
            BinOp::AShr => (sa >> (b % w as u64)) as u64,
            BinOp::And => a & b,
            BinOp::Or => a | b,
            BinOp::Xor => a ^ b,
        };
        Some(Literal {
            width: w,
            bits: value & mask(w),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter)]
pub enum UnaryOp {
    #[strum(serialize = "trunc")]
    Trunc,
    #[strum(serialize = "zext")]
    ZExt,
    #[strum(serialize = "sext")]
    SExt,
}

impl UnaryOp {
    pub fn result_width(self) -> u32 {
        match self {
            UnaryOp::Trunc => BOOL_WIDTH,
            UnaryOp::ZExt | UnaryOp::SExt => WORD_WIDTH,
        }
    }

    pub fn eval(self, x: Literal) -> Literal {
        match self {
            UnaryOp::Trunc => Literal::new(BOOL_WIDTH, (x.bits & 1) as i64),
            UnaryOp::ZExt => Literal::new(WORD_WIDTH, x.bits as i64),
            UnaryOp::SExt => Literal::new(WORD_WIDTH, x.signed()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter)]
pub enum Predicate {
    #[strum(serialize = "=")]
    Eq,
    #[strum(serialize = "!=")]
    Ne,
    #[strum(serialize = "u>")]
    Ugt,
    #[strum(serialize = "u>=")]
    Uge,
    #[strum(serialize = "u<")]
    Ult,
    #[strum(serialize = "u<=")]
    Ule,
    #[strum(serialize = ">")]
    Sgt,
    #[strum(serialize = ">=")]
    Sge,
    #[strum(serialize = "<")]
    Slt,
    #[strum(serialize = "<=")]
    Sle,
}

impl Predicate {
    pub fn eval(self, l: Literal, r: Literal) -> bool {
        let (a, b) = (l.bits, r.bits);
        let (sa, sb) = (l.signed(), r.signed());
        match self {
            Predicate::Eq => a == b,
            Predicate::Ne => a != b,
            Predicate::Ugt => a > b,
            Predicate::Uge => a >= b,
            Predicate::Ult => a < b,
            Predicate::Ule => a <= b,
            Predicate::Sgt => sa > sb,
            Predicate::Sge => sa >= sb,
            Predicate::Slt => sa < sb,
            Predicate::Sle => sa <= sb,
        }
    }

    /// Whether `x pred x` holds.
    pub fn is_reflexive(self) -> bool {
        matches!(
            self,
            Predicate::Eq | Predicate::Uge | Predicate::Ule | Predicate::Sge | Predicate::Sle
        )
    }

    /// The predicate that holds exactly when `self` does not.
    pub fn negated(self) -> Predicate {
        match self {
            Predicate::Eq => Predicate::Ne,
            Predicate::Ne => Predicate::Eq,
            Predicate::Ugt => Predicate::Ule,
            Predicate::Uge => Predicate::Ult,
            Predicate::Ult => Predicate::Uge,
            Predicate::Ule => Predicate::Ugt,
            Predicate::Sgt => Predicate::Sle,
            Predicate::Sge => Predicate::Slt,
            Predicate::Slt => Predicate::Sge,
            Predicate::Sle => Predicate::Sgt,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Expr {
    Literal(Literal),
    /// The result of `value` in activation `context`, optionally pinned to
    /// the activation reached through `callstack`.
    Value {
        value: ValueId,
        width: u32,
        context: Context,
        callstack: Vec<ValueId>,
    },
    /// The operand edge `site` as seen by its user.
    Use {
        site: Use,
        width: u32,
        context: Context,
        callstack: Vec<ValueId>,
    },
    /// `value` one loop iteration earlier.
    LoopBound {
        value: ValueId,
        width: u32,
        context: Context,
    },
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn literal(width: u32, value: i64) -> Self {
        Expr::Literal(Literal::new(width, value))
    }

    pub fn value(value: ValueId, width: u32) -> Self {
        Expr::Value {
            value,
            width,
            context: 0,
            callstack: vec![],
        }
    }

    /// Reference to a program value. Constants and null become literals.
    pub fn leaf(program: &Program, value: ValueId) -> Self {
        let width = program.width(value);
        match program.const_value(value) {
            Some(c) => Expr::literal(width, c),
            None => Expr::value(value, width),
        }
    }

    /// Reference to an operand edge. A constant operand becomes a literal.
    pub fn use_of(program: &Program, site: Use) -> Self {
        let width = program.width(site.value);
        match program.const_value(site.value) {
            Some(c) => Expr::literal(width, c),
            None => Expr::Use {
                site,
                width,
                context: 0,
                callstack: vec![],
            },
        }
    }

    pub fn unary(op: UnaryOp, e: Expr) -> Self {
        Expr::Unary(op, Box::new(e))
    }

    pub fn binary(op: BinOp, l: Expr, r: Expr) -> Self {
        debug_assert_eq!(l.width(), r.width(), "{op} over mismatched widths");
        Expr::Binary(op, Box::new(l), Box::new(r))
    }

    pub fn width(&self) -> u32 {
        match self {
            Expr::Literal(lit) => lit.width,
            Expr::Value { width, .. } | Expr::Use { width, .. } | Expr::LoopBound { width, .. } => {
                *width
            }
            Expr::Unary(op, _) => op.result_width(),
            Expr::Binary(_, l, _) => l.width(),
        }
    }

    pub fn as_literal(&self) -> Option<Literal> {
        match self {
            Expr::Literal(lit) => Some(*lit),
            _ => None,
        }
    }

    pub fn set_context(&mut self, ctx: Context) {
        match self {
            Expr::Value { context, .. }
            | Expr::Use { context, .. }
            | Expr::LoopBound { context, .. } => *context = ctx,
            Expr::Literal(_) | Expr::Unary(..) | Expr::Binary(..) => {}
        }
    }

    pub fn set_callstack(&mut self, stack: &[ValueId]) {
        match self {
            Expr::Value { callstack, .. } | Expr::Use { callstack, .. } => {
                *callstack = stack.to_vec()
            }
            _ => {}
        }
    }

    /// The program value a leaf refers to.
    pub fn referenced_value(&self) -> Option<ValueId> {
        match self {
            Expr::Value { value, .. } | Expr::LoopBound { value, .. } => Some(*value),
            Expr::Use { site, .. } => Some(site.value),
            _ => None,
        }
    }

    pub fn visit_leaves(&self, f: &mut impl FnMut(&Expr)) {
        match self {
            Expr::Unary(_, e) => e.visit_leaves(f),
            Expr::Binary(_, l, r) => {
                l.visit_leaves(f);
                r.visit_leaves(f);
            }
            leaf => f(leaf),
        }
    }

    pub fn visit_leaves_mut(&mut self, f: &mut impl FnMut(&mut Expr)) {
        match self {
            Expr::Unary(_, e) => e.visit_leaves_mut(f),
            Expr::Binary(_, l, r) => {
                l.visit_leaves_mut(f);
                r.visit_leaves_mut(f);
            }
            leaf => f(leaf),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (prefix, id, ctx) = match self {
            Expr::Literal(lit) => return write!(f, "{lit}"),
            Expr::Unary(op, e) => return write!(f, "({op} {e})"),
            Expr::Binary(op, l, r) => return write!(f, "({l} {op} {r})"),
            Expr::Value { value, context, .. } => ("x", value.0, *context),
            Expr::Use { site, context, .. } => ("u", site.value.0, *context),
            Expr::LoopBound { value, context, .. } => ("lb", value.0, *context),
        };
        write!(f, "{prefix}{id}")?;
        if ctx != 0 {
            write!(f, "_{ctx}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BoolExpr {
    pub pred: Predicate,
    pub lhs: Expr,
    pub rhs: Expr,
}

impl fmt::Display for BoolExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} {} {})", self.lhs, self.pred, self.rhs)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Clause {
    Atom(BoolExpr),
    Not(Box<Clause>),
    And(Box<Clause>, Box<Clause>),
    Or(Box<Clause>, Box<Clause>),
    Xor(Box<Clause>, Box<Clause>),
}

impl Clause {
    pub fn cmp(pred: Predicate, lhs: Expr, rhs: Expr) -> Self {
        debug_assert_eq!(lhs.width(), rhs.width(), "{lhs} {pred} {rhs}");
        Clause::Atom(BoolExpr { pred, lhs, rhs })
    }

    pub fn eq(lhs: Expr, rhs: Expr) -> Self {
        Self::cmp(Predicate::Eq, lhs, rhs)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(c: Clause) -> Self {
        Clause::Not(Box::new(c))
    }

    pub fn and(a: Clause, b: Clause) -> Self {
        Clause::And(Box::new(a), Box::new(b))
    }

    pub fn or(a: Clause, b: Clause) -> Self {
        Clause::Or(Box::new(a), Box::new(b))
    }

    pub fn xor(a: Clause, b: Clause) -> Self {
        Clause::Xor(Box::new(a), Box::new(b))
    }

    /// Left-nested disjunction, `None` for an empty input.
    pub fn any(clauses: impl IntoIterator<Item = Clause>) -> Option<Self> {
        clauses.into_iter().reduce(Clause::or)
    }

    pub fn as_atom(&self) -> Option<&BoolExpr> {
        match self {
            Clause::Atom(be) => Some(be),
            _ => None,
        }
    }

    pub fn visit_exprs(&self, f: &mut impl FnMut(&Expr)) {
        match self {
            Clause::Atom(be) => {
                f(&be.lhs);
                f(&be.rhs);
            }
            Clause::Not(c) => c.visit_exprs(f),
            Clause::And(a, b) | Clause::Or(a, b) | Clause::Xor(a, b) => {
                a.visit_exprs(f);
                b.visit_exprs(f);
            }
        }
    }

    pub fn visit_exprs_mut(&mut self, f: &mut impl FnMut(&mut Expr)) {
        match self {
            Clause::Atom(be) => {
                f(&mut be.lhs);
                f(&mut be.rhs);
            }
            Clause::Not(c) => c.visit_exprs_mut(f),
            Clause::And(a, b) | Clause::Or(a, b) | Clause::Xor(a, b) => {
                a.visit_exprs_mut(f);
                b.visit_exprs_mut(f);
            }
        }
    }

    pub fn visit_leaves(&self, f: &mut impl FnMut(&Expr)) {
        self.visit_exprs(&mut |e| e.visit_leaves(f));
    }

    pub fn visit_leaves_mut(&mut self, f: &mut impl FnMut(&mut Expr)) {
        self.visit_exprs_mut(&mut |e| e.visit_leaves_mut(f));
    }

    /// Sort key giving captured facts a stable order: simpler clauses first,
    /// then by printed form.
    pub fn sort_key(&self) -> (usize, String) {
        let printed = self.to_string();
        (printed.matches('(').count(), printed)
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Clause::Atom(be) => write!(f, "{be}"),
            Clause::Not(c) => write!(f, "(NOT {c})"),
            Clause::And(a, b) => write!(f, "({a} AND {b})"),
            Clause::Or(a, b) => write!(f, "({a} OR {b})"),
            Clause::Xor(a, b) => write!(f, "({a} XOR {b})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;
    use test_log::test;

    use super::*;

    #[test]
    fn test_literal_sign() {
        assert_eq!(Literal::word(-1).bits, 0xffff_ffff);
        assert_eq!(Literal::word(-1).signed(), -1);
        assert_eq!(Literal::word(1 << 32).bits, 0);
        assert_eq!(Literal::bool(true).signed(), -1);
        assert_eq!(Literal::bool(true).to_string(), "1");
        assert_eq!(Literal::word(-5).to_string(), "-5");
    }

    #[test]
    fn test_binop_eval() {
        let w = Literal::word;
        assert_eq!(BinOp::Add.eval(w(i32::MAX as i64), w(1)), Some(w(i32::MIN as i64)));
        assert_eq!(BinOp::SDiv.eval(w(-7), w(2)), Some(w(-3)));
        assert_eq!(BinOp::UDiv.eval(w(7), w(0)), None);
        assert_eq!(BinOp::Shl.eval(w(1), w(33)), Some(w(2)));
        assert_eq!(BinOp::AShr.eval(w(-8), w(1)), Some(w(-4)));
        assert_eq!(BinOp::LShr.eval(w(-8), w(28)), Some(w(15)));
    }

    #[test]
    fn test_reflexive_predicates_agree_with_eval() {
        let x = Literal::word(-3);
        for pred in Predicate::iter() {
            assert_eq!(pred.eval(x, x), pred.is_reflexive(), "{pred}");
        }
    }

    #[test]
    fn test_negated_predicates_disagree() {
        let pairs = [(-3, 4), (4, -3), (2, 2)].map(|(a, b)| (Literal::word(a), Literal::word(b)));
        for pred in Predicate::iter() {
            assert_eq!(pred.negated().negated(), pred);
            for (a, b) in pairs {
                assert_ne!(pred.eval(a, b), pred.negated().eval(a, b), "{pred} {a} {b}");
            }
        }
    }

    #[test]
    fn test_signed_and_unsigned_order_differ() {
        let minus_one = Literal::word(-1);
        let one = Literal::word(1);
        assert!(Predicate::Slt.eval(minus_one, one));
        assert!(Predicate::Ugt.eval(minus_one, one));
    }

    #[test]
    fn test_print() {
        let mut x = Expr::value(ValueId(3), WORD_WIDTH);
        x.set_context(2);
        let c = Clause::or(
            Clause::not(Clause::cmp(Predicate::Ult, x.clone(), Expr::literal(32, 4))),
            Clause::eq(
                Expr::binary(BinOp::Add, x, Expr::literal(32, -1)),
                Expr::LoopBound {
                    value: ValueId(5),
                    width: WORD_WIDTH,
                    context: 0,
                },
            ),
        );
        assert_eq!(c.to_string(), "((NOT (x3_2 u< 4)) OR ((x3_2 + -1) = lb5))");
    }

    #[test]
    fn test_any() {
        assert_eq!(Clause::any(vec![]), None);
        let a = Clause::eq(Expr::literal(1, 0), Expr::literal(1, 1));
        assert_eq!(Clause::any(vec![a.clone()]), Some(a));
    }

    #[test]
    fn test_sort_key_prefers_shallow_clauses() {
        let x = Expr::value(ValueId(1), WORD_WIDTH);
        let shallow = Clause::eq(x.clone(), Expr::literal(32, 1));
        let deep = Clause::not(shallow.clone());
        assert!(shallow.sort_key() < deep.sort_key());
    }
}
