use crate::traversal::{Action, Named, VisResult, Visitor};
use polyphony_ir::{self as ir, ScopeId, StmKind};

/// Removes moves and phis whose results are never read, until no more can
/// be removed. Statements with side effects and writes of the return value
/// stay.
#[derive(Default)]
pub struct DeadCode;

impl Named for DeadCode {
    fn name() -> &'static str {
        "dead-code"
    }

    fn description() -> &'static str {
        "Remove definitions that are never used"
    }
}

impl DeadCode {
    fn sweep(ctx: &mut ir::Context, scope: ScopeId) -> usize {
        let mut dead = vec![];
        for stm in ctx.scope_stms(scope) {
            let kind = &ctx.stm(stm).kind;
            if !matches!(kind, StmKind::Move { .. } | StmKind::Phi(_)) || kind.has_side_effect()
            {
                continue;
            }
            let usedef = &ctx.scope(scope).usedef;
            let unused = kind.def_syms().iter().all(|d| {
                !ctx.sym(*d).is_return()
                    && usedef
                        .get_stms_using(*d)
                        .iter()
                        .all(|u| *u == stm)
            });
            if unused {
                dead.push(stm);
            }
        }
        for stm in dead.iter() {
            ctx.remove_stm(*stm);
        }
        dead.len()
    }
}

impl Visitor for DeadCode {
    fn start(&mut self, scope: ScopeId, ctx: &mut ir::Context) -> VisResult {
        ctx.build_usedef(scope);
        let mut total = 0;
        loop {
            let n = Self::sweep(ctx, scope);
            if n == 0 {
                break;
            }
            total += n;
        }
        if total > 0 {
            log::debug!("{}: removed {total} dead statement(s)", ctx.scope(scope).name);
        }
        Ok(Action::SkipChildren)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ir::{BinOpKind, Builder, Expr, Type};

    #[test]
    fn chains_of_unused_values_disappear() {
        let mut ctx = ir::Context::default();
        let int = Type::int(32, true);
        let mut b = Builder::function(&mut ctx, "f");
        let a = b.param("a", int.clone());
        let x = b.local("x", int.clone());
        let y = b.local("y", int.clone());
        let z = b.local("z", int.clone());
        b.mov(x, Expr::binop(BinOpKind::Add, Expr::temp(a), Expr::int(1)));
        b.mov(y, Expr::binop(BinOpKind::Mult, Expr::temp(x), Expr::int(2)));
        b.mov(z, Expr::temp(a));
        b.expr(Expr::syscall("print", vec![Expr::temp(z)]));
        b.ret(Expr::int(0));
        let f = b.finish();
        DeadCode::do_pass_default(&mut ctx).unwrap();
        let defined: Vec<_> = ctx
            .scope_stms(f)
            .into_iter()
            .flat_map(|s| ctx.stm(s).kind.def_syms())
            .collect();
        assert!(!defined.contains(&x));
        assert!(!defined.contains(&y));
        assert!(defined.contains(&z));
        assert_eq!(ctx.scope_stms(f).len(), 4);
    }
}
