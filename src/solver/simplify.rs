use crate::expr::{Clause, Expr};

/// Folds literal subexpressions. Division by a literal zero is left alone.
pub fn fold_expr(e: &Expr) -> Expr {
    match e {
        Expr::Unary(op, x) => {
            let x = fold_expr(x);
            match x.as_literal() {
                Some(lit) => Expr::Literal(op.eval(lit)),
                None => Expr::unary(*op, x),
            }
        }
        Expr::Binary(op, l, r) => {
            let (l, r) = (fold_expr(l), fold_expr(r));
            match (l.as_literal(), r.as_literal()) {
                (Some(a), Some(b)) => match op.eval(a, b) {
                    Some(lit) => Expr::Literal(lit),
                    None => Expr::binary(*op, l, r),
                },
                _ => Expr::binary(*op, l, r),
            }
        }
        _ => e.clone(),
    }
}

/// Decides `c` without a solver when its structure alone settles it.
pub fn try_to_simplify(c: &Clause) -> Option<bool> {
    match c {
        Clause::Atom(be) => {
            let (l, r) = (fold_expr(&be.lhs), fold_expr(&be.rhs));
            if let (Some(a), Some(b)) = (l.as_literal(), r.as_literal()) {
                return Some(be.pred.eval(a, b));
            }
            (l == r).then(|| be.pred.is_reflexive())
        }
        Clause::Not(c) => try_to_simplify(c).map(|b| !b),
        Clause::And(a, b) => match (try_to_simplify(a), try_to_simplify(b)) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        },
        Clause::Or(a, b) => match (try_to_simplify(a), try_to_simplify(b)) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        },
        Clause::Xor(a, b) => match (try_to_simplify(a), try_to_simplify(b)) {
            (Some(x), Some(y)) => Some(x != y),
            _ => None,
        },
    }
}
