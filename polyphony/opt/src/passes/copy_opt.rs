use crate::traversal::{Action, Named, VisResult, Visitor};
use polyphony_ir::{self as ir, Ctx, Expr, ScopeId, StmId, StmKind, SymbolId};

/// Removes copies `x = y` where both sides have a single definition: every
/// read of `x` becomes a read of `y`.
#[derive(Default)]
pub struct CopyOpt;

impl Named for CopyOpt {
    fn name() -> &'static str {
        "copy-opt"
    }

    fn description() -> &'static str {
        "Propagate copies between single-assignment variables"
    }
}

/// `(dst, src)` of a removable copy.
fn copy_of(ctx: &ir::Context, scope: ScopeId, stm: StmId) -> Option<(SymbolId, SymbolId)> {
    let StmKind::Move {
        dst: Expr::Temp { sym: dst, .. },
        src: Expr::Temp {
            sym: src,
            ctx: Ctx::Load,
        },
    } = &ctx.stm(stm).kind
    else {
        return None;
    };
    let (d, s) = (ctx.sym(*dst), ctx.sym(*src));
    if dst == src || d.is_return() || d.is_field() || d.is_alias() || s.is_field() {
        return None;
    }
    // Narrowing copies truncate.
    if d.typ.explicit && d.typ != s.typ {
        return None;
    }
    let usedef = &ctx.scope(scope).usedef;
    let single = |sym: SymbolId| usedef.get_stms_defining(sym).len() <= 1;
    (usedef.get_stms_defining(*dst).len() == 1 && single(*src)).then_some((*dst, *src))
}

impl CopyOpt {
    fn propagate(ctx: &mut ir::Context, scope: ScopeId) -> usize {
        let mut n = 0;
        for stm in ctx.scope_stms(scope) {
            let Some((dst, src)) = copy_of(ctx, scope, stm) else {
                continue;
            };
            let uses = ctx.scope(scope).usedef.get_stms_using(dst);
            let value = Expr::temp(src);
            for u in uses {
                ctx.with_usedef_update(u, |kind| {
                    for e in kind.exprs_mut() {
                        e.replace_uses(dst, &value);
                    }
                });
            }
            ctx.remove_stm(stm);
            n += 1;
        }
        n
    }
}

impl Visitor for CopyOpt {
    fn start(&mut self, scope: ScopeId, ctx: &mut ir::Context) -> VisResult {
        ctx.build_usedef(scope);
        while Self::propagate(ctx, scope) > 0 {}
        Ok(Action::SkipChildren)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ir::{BinOpKind, Builder, Type};

    #[test]
    fn chains_of_copies_collapse() {
        let mut ctx = ir::Context::default();
        let int = Type::int(32, true);
        let mut b = Builder::function(&mut ctx, "f");
        let a = b.param("a", int.clone());
        let x = b.local("x", int.clone());
        let y = b.local("y", int.clone());
        let z = b.local("z", int.clone());
        b.mov(x, Expr::temp(a));
        b.mov(y, Expr::temp(x));
        let sum = b.mov(z, Expr::binop(BinOpKind::Add, Expr::temp(y), Expr::temp(x)));
        b.ret(Expr::temp(z));
        let f = b.finish();
        CopyOpt::do_pass_default(&mut ctx).unwrap();
        assert_eq!(
            ctx.stm(sum).kind.src(),
            Some(&Expr::binop(BinOpKind::Add, Expr::temp(a), Expr::temp(a)))
        );
        // The sum, the return move and the return remain.
        assert_eq!(ctx.scope_stms(f).len(), 3);
    }

    #[test]
    fn reassigned_variables_are_not_copies() {
        let mut ctx = ir::Context::default();
        let int = Type::int(32, true);
        let mut b = Builder::function(&mut ctx, "f");
        let a = b.param("a", int.clone());
        let x = b.local("x", int.clone());
        b.mov(x, Expr::temp(a));
        b.mov(x, Expr::binop(BinOpKind::Add, Expr::temp(x), Expr::int(1)));
        b.ret(Expr::temp(x));
        let f = b.finish();
        let before = ctx.scope_stms(f).len();
        CopyOpt::do_pass_default(&mut ctx).unwrap();
        assert_eq!(ctx.scope_stms(f).len(), before);
    }

    #[test]
    fn narrowing_copies_stay() {
        let mut ctx = ir::Context::default();
        let mut b = Builder::function(&mut ctx, "f");
        let a = b.param("a", Type::int(32, true));
        let x = b.local("x", Type::int(8, true).with_explicit(true));
        b.mov(x, Expr::temp(a));
        b.ret(Expr::temp(x));
        let f = b.finish();
        let before = ctx.scope_stms(f).len();
        CopyOpt::do_pass_default(&mut ctx).unwrap();
        assert_eq!(ctx.scope_stms(f).len(), before);
    }
}
