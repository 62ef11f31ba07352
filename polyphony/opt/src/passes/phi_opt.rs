use crate::traversal::{Action, Named, VisResult, Visitor};
use polyphony_ir::{self as ir, Expr, ScopeId, StmId, SymbolId};

/// Removes trivial phis until none are left. A phi is trivial when every
/// argument that is not the phi's own result is the same value; its result
/// is then replaced by that value everywhere.
#[derive(Default)]
pub struct PhiOpt;

impl Named for PhiOpt {
    fn name() -> &'static str {
        "phi-opt"
    }

    fn description() -> &'static str {
        "Remove phis that merge a single value"
    }
}

/// The single value merged by a trivial phi.
fn trivial_value(ctx: &ir::Context, stm: StmId) -> Option<(SymbolId, Expr)> {
    let phi = ctx.stm(stm).kind.phi()?;
    let var = phi.var.symbol()?;
    let mut others = phi.args.iter().filter(|a| a.symbol() != Some(var));
    let first = others.next()?.clone();
    if others.all(|a| *a == first) {
        Some((var, first))
    } else {
        None
    }
}

impl PhiOpt {
    fn remove_one(ctx: &mut ir::Context, scope: ScopeId) -> bool {
        let phis = ctx
            .traverse_blocks(scope)
            .into_iter()
            .flat_map(|b| ctx.phis(b));
        for stm in phis.collect::<Vec<_>>() {
            let Some((var, value)) = trivial_value(ctx, stm) else {
                continue;
            };
            log::trace!("trivial phi of {}", ctx.sym_name(var));
            let uses = ctx.scope(scope).usedef.get_stms_using(var);
            ctx.remove_stm(stm);
            for u in uses {
                if u != stm {
                    ctx.with_usedef_update(u, |kind| {
                        for e in kind.exprs_mut() {
                            e.replace_uses(var, &value);
                        }
                    });
                }
            }
            return true;
        }
        false
    }
}

impl Visitor for PhiOpt {
    fn start(&mut self, scope: ScopeId, ctx: &mut ir::Context) -> VisResult {
        ctx.build_usedef(scope);
        let mut n = 0;
        while Self::remove_one(ctx, scope) {
            n += 1;
        }
        if n > 0 {
            log::debug!("{}: removed {n} trivial phi(s)", ctx.scope(scope).name);
        }
        Ok(Action::SkipChildren)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ir::{Builder, Phi, PhiKind, StmKind, Type};

    #[test]
    fn phis_of_one_value_fold() {
        let mut ctx = ir::Context::default();
        let int = Type::int(32, true);
        let mut b = Builder::function(&mut ctx, "f");
        let a = b.param("a", int.clone());
        let x = b.local("x", int.clone());
        let y = b.local("y", int.clone());
        let z = b.local("z", int.clone());
        let merge = b.if_else(Expr::temp(a), |_| {}, |_| {});
        let use_x = b.mov(y, Expr::temp(x));
        b.mov(z, Expr::temp(y));
        b.ret(Expr::temp(z));
        let f = b.finish();

        let mut phi = Phi::new(PhiKind::Phi, Expr::store(x));
        phi.args = vec![Expr::temp(a), Expr::temp(a)];
        let loc = ctx.stm(use_x).loc;
        ctx.insert_stm(merge, 0, StmKind::Phi(phi), loc);
        // A phi reading only itself besides `y` is trivial too.
        let mut self_phi = Phi::new(PhiKind::Phi, Expr::store(z));
        self_phi.args = vec![Expr::temp(y), Expr::temp(z)];
        ctx.insert_stm(merge, 1, StmKind::Phi(self_phi), loc);

        PhiOpt::do_pass_default(&mut ctx).unwrap();
        assert!(ctx.phis(merge).is_empty());
        assert_eq!(ctx.stm(use_x).kind.src(), Some(&Expr::temp(a)));
        assert!(ctx.scope_stms(f).iter().all(|s| !ctx.stm(*s).kind.is_phi()));
    }

    #[test]
    fn merging_distinct_values_stays() {
        let mut ctx = ir::Context::default();
        let int = Type::int(32, true);
        let mut b = Builder::function(&mut ctx, "f");
        let a = b.param("a", int.clone());
        let c = b.param("c", int.clone());
        let x = b.local("x", int.clone());
        let merge = b.if_else(Expr::temp(a), |_| {}, |_| {});
        b.ret(Expr::temp(x));
        b.finish();
        let mut phi = Phi::new(PhiKind::Phi, Expr::store(x));
        phi.args = vec![Expr::temp(a), Expr::temp(c)];
        ctx.insert_stm(merge, 0, StmKind::Phi(phi), polyphony_utils::Loc::default());
        PhiOpt::do_pass_default(&mut ctx).unwrap();
        assert_eq!(ctx.phis(merge).len(), 1);
    }
}
