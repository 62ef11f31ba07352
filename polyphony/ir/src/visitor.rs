//! Match-based visitors over IR expressions and statements. Every method has
//! a default that recurses into the children, so implementors override only
//! the variants they care about.
use crate::{Expr, StmKind, SymbolId};

/// Read-only walk over an expression tree.
pub trait ExprVisitor {
    fn visit_expr(&mut self, e: &Expr) {
        walk_expr(self, e)
    }

    /// Called for each variable occurrence (temps and attributes).
    fn visit_var(&mut self, _e: &Expr) {}

    fn visit_stm(&mut self, s: &StmKind) {
        for e in s.exprs() {
            self.visit_expr(e);
        }
    }
}

pub fn walk_expr<V: ExprVisitor + ?Sized>(v: &mut V, e: &Expr) {
    if e.is_var() {
        v.visit_var(e);
    }
    for k in e.kids() {
        v.visit_expr(k);
    }
}

/// In-place rewriting of expression trees. `mutate_expr` runs children
/// first, then offers the node itself to `rewrite`.
pub trait ExprMutator {
    /// Return a replacement for `e`, or `None` to keep it.
    fn rewrite(&mut self, e: &Expr) -> Option<Expr>;

    fn mutate_expr(&mut self, e: &mut Expr) {
        for k in e.kids_mut() {
            self.mutate_expr(k);
        }
        if let Some(new) = self.rewrite(e) {
            *e = new;
        }
    }

    fn mutate_stm(&mut self, s: &mut StmKind) {
        for e in s.exprs_mut() {
            self.mutate_expr(e);
        }
    }
}

/// Replaces loads of a symbol with a fixed expression.
pub struct VarReplacer<'a> {
    pub sym: SymbolId,
    pub replacement: &'a Expr,
    pub count: usize,
}

impl<'a> VarReplacer<'a> {
    pub fn new(sym: SymbolId, replacement: &'a Expr) -> Self {
        VarReplacer {
            sym,
            replacement,
            count: 0,
        }
    }
}

impl ExprMutator for VarReplacer<'_> {
    fn rewrite(&mut self, _e: &Expr) -> Option<Expr> {
        None
    }

    fn mutate_expr(&mut self, e: &mut Expr) {
        self.count += e.replace_uses(self.sym, self.replacement);
    }
}

/// Collects every symbol occurring in the visited expressions.
#[derive(Default)]
pub struct SymbolCollector {
    pub syms: Vec<SymbolId>,
}

impl ExprVisitor for SymbolCollector {
    fn visit_var(&mut self, e: &Expr) {
        if let Some(s) = e.symbol() {
            if !self.syms.contains(&s) {
                self.syms.push(s);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BinOpKind, Ctx};
    use polyphony_utils::idx::IndexRef;

    struct ConstDoubler;
    impl ExprMutator for ConstDoubler {
        fn rewrite(&mut self, e: &Expr) -> Option<Expr> {
            e.as_int().map(|i| Expr::int(i * 2))
        }
    }

    #[test]
    fn mutator_rewrites_bottom_up() {
        let mut e = Expr::binop(BinOpKind::Add, Expr::int(1), Expr::int(3));
        ConstDoubler.mutate_expr(&mut e);
        assert_eq!(e, Expr::binop(BinOpKind::Add, Expr::int(2), Expr::int(6)));
    }

    #[test]
    fn collector_sees_attributes_and_receivers() {
        let (s, a) = (SymbolId::new(0), SymbolId::new(1));
        let e = Expr::binop(
            BinOpKind::Add,
            Expr::attr(Expr::temp(s), a, Ctx::Load),
            Expr::temp(s),
        );
        let mut c = SymbolCollector::default();
        c.visit_expr(&e);
        assert_eq!(c.syms, vec![a, s]);
    }

    #[test]
    fn var_replacer_counts() {
        let x = SymbolId::new(2);
        let rep = Expr::int(5);
        let mut e = Expr::binop(BinOpKind::Mult, Expr::temp(x), Expr::temp(x));
        let mut v = VarReplacer::new(x, &rep);
        v.mutate_expr(&mut e);
        assert_eq!(v.count, 2);
    }
}
