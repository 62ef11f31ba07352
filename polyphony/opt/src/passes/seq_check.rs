use crate::analysis::typing::expr_type;
use crate::traversal::{
    Action, ConstructVisitor, DiagnosticContext, DiagnosticPass, Named, VisResult,
    Visitor,
};
use polyphony_ir::{self as ir, Expr, ScopeId, StmKind};
use polyphony_utils::{Error, ErrorKind, PolyResult};

/// Checks sequence initializers `[a, b, ...] * n`.
///
/// Reports:
/// 1. Items that are not integers.
/// 2. Multipliers that are not constant.
/// 3. Initializers with more items than the list they are stored into.
pub struct SeqCheck {
    diag: DiagnosticContext,
}

impl ConstructVisitor for SeqCheck {
    fn from(_ctx: &ir::Context) -> PolyResult<Self> {
        Ok(SeqCheck {
            diag: DiagnosticContext::default(),
        })
    }

    fn clear_data(&mut self) {}
}

impl Named for SeqCheck {
    fn name() -> &'static str {
        "seq-check"
    }

    fn description() -> &'static str {
        "Check item types and capacity of sequence initializers"
    }
}

impl DiagnosticPass for SeqCheck {
    fn diagnostics(&self) -> &DiagnosticContext {
        &self.diag
    }
}

impl Visitor for SeqCheck {
    fn start(&mut self, scope: ScopeId, ctx: &mut ir::Context) -> VisResult {
        for stm in ctx.scope_stms(scope) {
            let s = ctx.stm(stm);
            let StmKind::Move {
                dst,
                src: Expr::Array { items, repeat, .. },
            } = &s.kind
            else {
                continue;
            };
            if let Some(bad) = items
                .iter()
                .map(|i| expr_type(ctx, i))
                .find(|t| !t.is_int() && !t.is_bool() && !t.is_undef())
            {
                self.diag.err(
                    Error::new(ErrorKind::SeqItemMustBeInt(bad.to_string())).with_loc(s.loc),
                );
                continue;
            }
            let Some(n) = repeat.as_int() else {
                self.diag
                    .err(Error::new(ErrorKind::SeqMultiplierMustBeConst).with_loc(s.loc));
                continue;
            };
            let capacity = dst
                .symbol()
                .and_then(|d| ctx.sym(d).typ.length());
            let count = items.len() as i64 * n;
            if capacity.is_some_and(|c| count > c as i64) {
                self.diag
                    .err(Error::seq_capacity_overflowed().with_loc(s.loc));
            }
        }
        Ok(Action::SkipChildren)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ir::{Builder, Length, Type};

    #[test]
    fn initializers() {
        let mut ctx = ir::Context::default();
        let mut b = Builder::function(&mut ctx, "f");
        let n = b.param("n", Type::int(32, true));
        let small = b.local("small", Type::list(Type::int(8, true), Length::Fixed(2)));
        let any = b.local("any", Type::list(Type::int(8, true), Length::Any));
        b.mov(small, Expr::array(vec![Expr::int(0); 3], Expr::int(1)));
        b.mov(small, Expr::array(vec![Expr::int(0)], Expr::int(2)));
        b.mov(any, Expr::array(vec![Expr::str("a")], Expr::int(1)));
        b.mov(any, Expr::array(vec![Expr::int(0)], Expr::temp(n)));
        b.mov(any, Expr::array(vec![Expr::int(0)], Expr::int(100)));
        b.finish();
        let pass = SeqCheck::do_pass_default(&mut ctx).unwrap();
        let codes: Vec<_> = pass.diagnostics().errors_iter().map(|e| e.code()).collect();
        assert_eq!(
            codes,
            vec![
                "SEQ_CAPACITY_OVERFLOWED",
                "SEQ_ITEM_MUST_BE_INT",
                "SEQ_MULTIPLIER_MUST_BE_CONST"
            ]
        );
    }
}
