//! Union-find over values and literals known equal.
//!
//! Simple equalities between fixed values are folded into this map instead
//! of being handed to the solver, and every clause is rewritten onto the
//! roots before it is asserted or checked.

use std::collections::HashMap;

use log::{debug, warn};

use crate::expr::{Clause, Expr, Literal, Predicate};
use crate::ir::ValueId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Node {
    Value(ValueId),
    Literal(Literal),
}

impl Node {
    fn of(e: &Expr) -> Option<Node> {
        match e {
            Expr::Literal(lit) => Some(Node::Literal(*lit)),
            Expr::Value { value, .. } => Some(Node::Value(*value)),
            _ => None,
        }
    }
}

#[derive(Default)]
pub struct Canonicalizer {
    parent: HashMap<Node, Node>,
}

impl Canonicalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.parent.clear();
    }

    pub fn get_root(&mut self, node: Node) -> Node {
        let mut root = node;
        while let Some(next) = self.parent.get(&root) {
            root = *next;
        }
        // Path compression.
        let mut cur = node;
        while let Some(next) = self.parent.get(&cur).copied() {
            if next == root {
                break;
            }
            self.parent.insert(cur, root);
            cur = next;
        }
        root
    }

    pub fn root_of(&mut self, v: ValueId) -> Node {
        self.get_root(Node::Value(v))
    }

    /// Merges the classes of `a` and `b`. A literal always ends up as the
    /// root; two different literals are left apart.
    pub fn identify_eq(&mut self, a: Node, b: Node) {
        let (ra, rb) = (self.get_root(a), self.get_root(b));
        if ra == rb {
            return;
        }
        match (ra, rb) {
            (Node::Literal(la), Node::Literal(lb)) => {
                warn!("conflicting literals {la} and {lb} in one class");
            }
            (Node::Literal(_), _) => {
                self.parent.insert(rb, ra);
            }
            _ => {
                self.parent.insert(ra, rb);
            }
        }
    }

    pub fn bind(&mut self, v: ValueId, lit: Literal) {
        self.identify_eq(Node::Value(v), Node::Literal(lit));
    }

    /// Folds every simple equality among `facts`. `is_fixed` limits merging
    /// to values that take one value per run.
    pub fn identify_eqs<'c>(
        &mut self,
        facts: impl IntoIterator<Item = &'c Clause>,
        is_fixed: impl Fn(ValueId) -> bool,
    ) -> usize {
        let mut merged = 0;
        for c in facts {
            let Some((a, b)) = simple_eq(c) else {
                continue;
            };
            let fixed = |n: Node| match n {
                Node::Value(v) => is_fixed(v),
                Node::Literal(_) => true,
            };
            if fixed(a) && fixed(b) {
                self.identify_eq(a, b);
                merged += 1;
            }
        }
        debug!("folded {merged} simple equalities");
        merged
    }

    /// `c` with every value, use and loop-bound leaf replaced by its root.
    pub fn canonicalize(&mut self, c: &Clause) -> Clause {
        let mut c = c.clone();
        c.visit_leaves_mut(&mut |leaf| self.canonicalize_leaf(leaf));
        c
    }

    pub fn canonicalize_expr(&mut self, e: &Expr) -> Expr {
        let mut e = e.clone();
        e.visit_leaves_mut(&mut |leaf| self.canonicalize_leaf(leaf));
        e
    }

    fn canonicalize_leaf(&mut self, leaf: &mut Expr) {
        let replacement = match leaf {
            Expr::Value {
                value,
                width,
                context,
                callstack,
            } => match self.root_of(*value) {
                Node::Literal(lit) => Expr::Literal(lit),
                Node::Value(root) => Expr::Value {
                    value: root,
                    width: *width,
                    context: *context,
                    callstack: std::mem::take(callstack),
                },
            },
            Expr::Use {
                site,
                width,
                context,
                callstack,
            } => match self.root_of(site.value) {
                Node::Literal(lit) => Expr::Literal(lit),
                Node::Value(root) => Expr::Value {
                    value: root,
                    width: *width,
                    context: *context,
                    callstack: std::mem::take(callstack),
                },
            },
            Expr::LoopBound {
                value,
                width,
                context,
            } => match self.root_of(*value) {
                Node::Literal(lit) => Expr::Literal(lit),
                Node::Value(root) => Expr::LoopBound {
                    value: root,
                    width: *width,
                    context: *context,
                },
            },
            Expr::Literal(_) | Expr::Unary(..) | Expr::Binary(..) => return,
        };
        *leaf = replacement;
    }
}

/// The two sides of `c` if it is an equality between plain values or
/// literals in the default context.
pub fn simple_eq(c: &Clause) -> Option<(Node, Node)> {
    let be = c.as_atom()?;
    if be.pred != Predicate::Eq {
        return None;
    }
    let plain = |e: &Expr| match e {
        Expr::Literal(_) => true,
        Expr::Value {
            context, callstack, ..
        } => *context == 0 && callstack.is_empty(),
        _ => false,
    };
    if !plain(&be.lhs) || !plain(&be.rhs) {
        return None;
    }
    Some((Node::of(&be.lhs)?, Node::of(&be.rhs)?))
}

/// A comparison that holds by reflexivity once both sides are canonical.
pub fn is_tautology(c: &Clause) -> bool {
    c.as_atom()
        .is_some_and(|be| be.pred.is_reflexive() && be.lhs == be.rhs)
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::expr::BinOp;

    fn v(i: u32) -> ValueId {
        ValueId(i)
    }

    fn x(i: u32) -> Expr {
        Expr::value(v(i), 32)
    }

    #[test]
    fn test_literal_becomes_root() {
        let mut canon = Canonicalizer::new();
        canon.identify_eq(Node::Value(v(1)), Node::Value(v(2)));
        canon.bind(v(2), Literal::word(7));
        assert_eq!(canon.root_of(v(1)), Node::Literal(Literal::word(7)));
        // A second literal is not merged.
        canon.bind(v(1), Literal::word(8));
        assert_eq!(canon.root_of(v(2)), Node::Literal(Literal::word(7)));
    }

    #[test]
    fn test_canonicalize_is_idempotent() {
        let mut canon = Canonicalizer::new();
        canon.identify_eq(Node::Value(v(1)), Node::Value(v(2)));
        canon.identify_eq(Node::Value(v(2)), Node::Value(v(3)));
        let c = Clause::cmp(
            Predicate::Slt,
            Expr::binary(BinOp::Add, x(1), x(4)),
            x(2),
        );
        let once = canon.canonicalize(&c);
        assert_eq!(once.to_string(), "((x3 + x4) < x3)");
        assert_eq!(canon.canonicalize(&once), once);
    }

    #[test]
    fn test_simple_equalities() {
        let eq = Clause::eq(x(1), Expr::literal(32, 5));
        assert_eq!(
            simple_eq(&eq),
            Some((Node::Value(v(1)), Node::Literal(Literal::word(5))))
        );
        let mut ctx = x(1);
        ctx.set_context(2);
        assert_eq!(simple_eq(&Clause::eq(ctx, x(2))), None);
        assert_eq!(simple_eq(&Clause::cmp(Predicate::Ne, x(1), x(2))), None);
        let lb = Expr::LoopBound {
            value: v(1),
            width: 32,
            context: 0,
        };
        assert_eq!(simple_eq(&Clause::eq(lb, x(2))), None);
    }

    #[test]
    fn test_identify_eqs_skips_unfixed() {
        let facts = vec![
            Clause::eq(x(1), x(2)),
            Clause::eq(x(3), Expr::literal(32, 0)),
        ];
        let mut canon = Canonicalizer::new();
        let merged = canon.identify_eqs(&facts, |value| value != v(3));
        assert_eq!(merged, 1);
        assert_eq!(canon.root_of(v(3)), Node::Value(v(3)));
        assert!(is_tautology(&canon.canonicalize(&facts[0])));
        assert!(!is_tautology(&canon.canonicalize(&facts[1])));
    }
}
