use crate::analysis::TypeEvaluator;
use crate::analysis::typing::expr_type;
use crate::traversal::{Action, Named, Order, VisResult, Visitor};
use polyphony_ir::{self as ir, Expr, ScopeId, StmKind, SymbolId, Type};
use polyphony_utils::{Error, PolyResult};
use std::collections::HashMap;

/// Propagates types from values into the symbols that hold them until
/// nothing changes. Callees are visited first so that call results have
/// their return types.
///
/// Types written as expressions (`List[int8][N]`, `T` for a class name)
/// are evaluated once the symbols they mention are bound to constants.
#[derive(Default)]
pub struct TypeProp;

impl Named for TypeProp {
    fn name() -> &'static str {
        "typeprop"
    }

    fn description() -> &'static str {
        "Propagate types from values into symbols"
    }
}

/// Symbols defined exactly once, by a constant integer.
fn const_bindings(ctx: &ir::Context, scope: ScopeId) -> HashMap<SymbolId, i64> {
    let mut defs: HashMap<SymbolId, Vec<Option<i64>>> = HashMap::new();
    for stm in ctx.scope_stms(scope) {
        if let StmKind::Move { dst, src } = &ctx.stm(stm).kind {
            if let Some(d) = dst.symbol() {
                defs.entry(d).or_default().push(src.as_int());
            }
        }
    }
    defs.into_iter()
        .filter_map(|(s, vs)| match vs.as_slice() {
            [Some(v)] => Some((s, *v)),
            _ => None,
        })
        .collect()
}

impl TypeProp {
    /// Evaluate the type of every symbol of `scope` that is given by an
    /// expression.
    fn eval_symbol_types(ctx: &mut ir::Context, scope: ScopeId) -> PolyResult<()> {
        let bindings = const_bindings(ctx, scope);
        let syms: Vec<SymbolId> = ctx.scope(scope).symbols.values().copied().collect();
        let mut resolved = vec![];
        {
            let eval = TypeEvaluator::new(ctx, &bindings);
            for sym in syms {
                let s = ctx.sym(sym);
                let needs = s.typ.is_expr()
                    || matches!(
                        &s.typ.kind,
                        ir::TypeKind::List {
                            length: ir::Length::Expr(_),
                            ..
                        }
                    );
                if !needs {
                    continue;
                }
                match eval.eval(&s.typ) {
                    Ok(Some(t)) => resolved.push((sym, t)),
                    Ok(None) => (),
                    Err(e) => {
                        return Err(Error::misc(format!(
                            "type of '{}': {}",
                            s.name,
                            e.message()
                        )));
                    }
                }
            }
        }
        for (sym, t) in resolved {
            ctx.sym_mut(sym).typ = t;
        }
        Ok(())
    }

    fn assign(ctx: &mut ir::Context, sym: SymbolId, rhs: &Type) -> bool {
        let old = &ctx.sym(sym).typ;
        let new = old.propagate(rhs, &ctx.scopes);
        if new != *old {
            log::trace!("{}: {} -> {}", ctx.sym_name(sym), old, new);
            ctx.sym_mut(sym).typ = new;
            true
        } else {
            false
        }
    }

    /// One sweep over the statements; whether any type changed.
    fn sweep(ctx: &mut ir::Context, scope: ScopeId) -> bool {
        let mut changed = false;
        for stm in ctx.scope_stms(scope) {
            let updates: Vec<(SymbolId, Type)> = match &ctx.stm(stm).kind {
                StmKind::Move { dst, src } | StmKind::CMove { dst, src, .. } => {
                    match dst {
                        Expr::Temp { sym, .. } | Expr::Attr { attr: sym, .. } => {
                            vec![(*sym, expr_type(ctx, src))]
                        }
                        _ => vec![],
                    }
                }
                StmKind::Phi(phi) => match phi.var.symbol() {
                    Some(v) => phi
                        .args
                        .iter()
                        .filter(|a| a.symbol() != Some(v))
                        .map(|a| (v, expr_type(ctx, a)))
                        .collect(),
                    None => vec![],
                },
                _ => vec![],
            };
            for (sym, t) in updates {
                changed |= Self::assign(ctx, sym, &t);
            }
        }
        changed
    }
}

impl Visitor for TypeProp {
    fn iteration_order() -> Order {
        Order::Post
    }

    fn start(&mut self, scope: ScopeId, ctx: &mut ir::Context) -> VisResult {
        Self::eval_symbol_types(ctx, scope)?;
        while Self::sweep(ctx, scope) {}

        let ret = ctx
            .scope(scope)
            .symbols
            .values()
            .copied()
            .find(|s| ctx.sym(*s).is_return());
        if let Some(ret) = ret {
            let scope_ret = &ctx.scope(scope).return_type;
            let new = scope_ret.propagate(&ctx.sym(ret).typ, &ctx.scopes);
            ctx.scope_mut(scope).return_type = new;
        }
        Ok(Action::SkipChildren)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ir::{BinOpKind, Builder, Id, Length};

    #[test]
    fn values_flow_into_symbols_and_returns() {
        let mut ctx = ir::Context::default();
        let mut b = Builder::function(&mut ctx, "g");
        let a = b.param("a", Type::int(8, false).with_explicit(true));
        let t = b.local("t", Type::undef());
        b.mov(t, Expr::binop(BinOpKind::Add, Expr::temp(a), Expr::temp(a)));
        b.ret(Expr::temp(t));
        let g = b.finish();
        let global = ctx.global;
        let gsym = ctx
            .add_sym(global, Id::from("g"), ir::sym_tags(&[]), Type::function(g, Type::undef(), vec![]))
            .unwrap();

        let mut b = Builder::function(&mut ctx, "f");
        let r = b.local("r", Type::undef());
        b.mov(r, Expr::call(Expr::temp(gsym), vec![Expr::int(1)]));
        b.ret(Expr::temp(r));
        let f = b.finish();

        TypeProp::do_pass_default(&mut ctx).unwrap();
        assert_eq!(ctx.sym(t).typ, Type::int(8, false));
        assert_eq!(ctx.scope(g).return_type, Type::int(8, false));
        assert_eq!(ctx.sym(r).typ, Type::int(8, false));
        assert_eq!(ctx.scope(f).return_type, Type::int(8, false));
    }

    #[test]
    fn lengths_given_by_constants() {
        let mut ctx = ir::Context::default();
        let mut b = Builder::function(&mut ctx, "f");
        let n = b.local("n", Type::int(32, true));
        let len = Expr::binop(BinOpKind::Add, Expr::temp(n), Expr::int(1));
        let l = b.local(
            "l",
            Type::list(Type::int(8, true), Length::Expr(Box::new(len))).with_explicit(true),
        );
        b.mov(n, Expr::int(3));
        b.mov(l, Expr::array(vec![Expr::int(0)], Expr::int(4)));
        b.finish();
        TypeProp::do_pass_default(&mut ctx).unwrap();
        assert_eq!(ctx.sym(l).typ.length(), Some(4));
        assert!(ctx.sym(l).typ.explicit);
    }
}
