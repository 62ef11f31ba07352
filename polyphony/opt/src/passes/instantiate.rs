use crate::analysis::TypeEvaluator;
use crate::traversal::{Action, Named, VisResult, Visitor};
use itertools::Itertools;
use polyphony_ir::{
    self as ir, APPEND_WORKER, Expr, SELF_SYM, ScopeId, ScopeTag, StmId, SymbolId, Worker,
};
use polyphony_utils::{Error, Id, PolyResult};
use std::collections::{BTreeSet, HashMap};

/// Specializes synthesis targets and binds workers.
///
/// A target given constant arguments is cloned, the constants are
/// substituted for the parameters of its constructor (or of the function
/// itself), types depending on them are evaluated, and the clone replaces
/// the template. Every `append_worker(w, args...)` in a module constructor
/// then becomes a copy of `w` with the constant and field arguments bound.
/// The copy is recorded as a worker of the module together with the
/// arguments that are only known at run time.
#[derive(Default)]
pub struct Instantiate;

impl Named for Instantiate {
    fn name() -> &'static str {
        "instantiate"
    }

    fn description() -> &'static str {
        "Specialize modules and functions on constant arguments and bind workers"
    }
}

/// Suffix naming a specialization: the argument values joined by `_`.
fn inst_name(args: &[Expr]) -> String {
    args.iter()
        .map(|a| match a.as_int() {
            Some(v) if v < 0 => format!("n{}", -v),
            Some(v) => v.to_string(),
            None => "x".to_string(),
        })
        .join("_")
}

/// Unregister `scope` and everything under it.
fn remove_tree(ctx: &mut ir::Context, scope: ScopeId) {
    for child in ctx.scope(scope).children.clone() {
        remove_tree(ctx, child);
    }
    ctx.remove_scope(scope);
}

fn ctor_of(ctx: &ir::Context, class: ScopeId) -> Option<ScopeId> {
    ctx.scope(class)
        .children
        .iter()
        .copied()
        .find(|c| ctx.scope(*c).is_ctor())
}

/// Every scope of the tree rooted at `scope`.
fn tree_of(ctx: &ir::Context, scope: ScopeId) -> Vec<ScopeId> {
    let mut out = vec![scope];
    let mut i = 0;
    while i < out.len() {
        out.extend(ctx.scope(out[i]).children.iter().copied());
        i += 1;
    }
    out
}

/// Replace the parameters of `scope` given in `binding` by their values in
/// every statement, then drop them from the parameter list.
fn bind_params(ctx: &mut ir::Context, scope: ScopeId, binding: &[(SymbolId, Expr)]) {
    for stm in ctx.scope_stms(scope) {
        ctx.with_usedef_update(stm, |kind| {
            for e in kind.exprs_mut() {
                for (p, v) in binding {
                    e.replace_uses(*p, v);
                }
            }
        });
    }
    let bound: BTreeSet<SymbolId> = binding.iter().map(|(p, _)| *p).collect();
    ctx.scope_mut(scope).params.retain(|p| !bound.contains(&p.sym));
}

/// Evaluate types of the tree's symbols that depend on the bound values.
fn retype(ctx: &mut ir::Context, root: ScopeId, values: &HashMap<SymbolId, i64>) -> PolyResult<()> {
    let syms: Vec<SymbolId> = tree_of(ctx, root)
        .into_iter()
        .flat_map(|s| ctx.scope(s).symbols.values().copied().collect::<Vec<_>>())
        .collect();
    let mut resolved = vec![];
    {
        let eval = TypeEvaluator::new(ctx, values);
        for sym in syms {
            let t = &ctx.sym(sym).typ;
            let dependent = t.is_expr()
                || matches!(
                    &t.kind,
                    ir::TypeKind::List {
                        length: ir::Length::Expr(_),
                        ..
                    }
                );
            if dependent {
                if let Some(new) = eval.eval(t)? {
                    resolved.push((sym, new));
                }
            }
        }
    }
    for (sym, t) in resolved {
        ctx.sym_mut(sym).typ = t;
    }
    Ok(())
}

impl Instantiate {
    /// Clone the target at `idx` with its constant arguments bound.
    fn specialize(ctx: &mut ir::Context, idx: usize) -> PolyResult<()> {
        let target = ctx.targets[idx].clone();
        let s = ctx.scope(target.scope);
        let bound_scope_is_ctor = s.is_module();
        if target.args.iter().any(|a| !a.is_const()) {
            return Err(Error::misc(format!(
                "arguments of target '{}' must be constants",
                s.base_name
            ))
            .with_loc(s.loc));
        }
        let children = s.children.clone();
        let name = inst_name(&target.args);
        let (new, _) = ctx.instantiate(target.scope, &name, &children, None);
        let bind_in = if bound_scope_is_ctor {
            match ctor_of(ctx, new) {
                Some(c) => c,
                None => {
                    return Err(Error::misc(format!(
                        "module '{}' has no constructor to take its arguments",
                        ctx.scope(new).base_name
                    )));
                }
            }
        } else {
            new
        };
        let params: Vec<SymbolId> = ctx.scope(bind_in).param_symbols();
        let binding: Vec<(SymbolId, Expr)> =
            params.into_iter().zip(target.args.iter().cloned()).collect();
        let values: HashMap<SymbolId, i64> = binding
            .iter()
            .filter_map(|(p, v)| v.as_int().map(|i| (*p, i)))
            .collect();
        bind_params(ctx, bind_in, &binding);
        retype(ctx, new, &values)?;
        log::info!(
            "specialized {} as {} ({} constant(s))",
            ctx.scope(target.scope).name,
            ctx.scope(new).name,
            binding.len()
        );
        remove_tree(ctx, target.scope);
        ctx.targets.push(ir::Target {
            scope: new,
            args: vec![],
        });
        Ok(())
    }

    /// The `append_worker` calls of a constructor: statement, worker scope
    /// and arguments after the worker.
    fn append_worker_calls(
        ctx: &ir::Context,
        ctor: ScopeId,
    ) -> Vec<(StmId, ScopeId, Vec<Expr>)> {
        let mut out = vec![];
        for stm in ctx.scope_stms(ctor) {
            let ir::StmKind::Expr(Expr::Call { func, args }) = &ctx.stm(stm).kind else {
                continue;
            };
            if !func.symbol().is_some_and(|f| ctx.sym_name(f) == APPEND_WORKER) {
                continue;
            }
            let Some(worker) = args
                .first()
                .and_then(|a| a.symbol())
                .and_then(|w| ctx.sym(w).typ.scope())
            else {
                continue;
            };
            out.push((stm, worker, args[1..].to_vec()));
        }
        out
    }

    fn bind_workers(ctx: &mut ir::Context, module: ScopeId) {
        let Some(ctor) = ctor_of(ctx, module) else {
            return;
        };
        let ctor_self = ctx.scope(ctor).find_local(Id::from(SELF_SYM));
        let mut templates = BTreeSet::new();
        for (k, (stm, worker, args)) in Self::append_worker_calls(ctx, ctor)
            .into_iter()
            .enumerate()
        {
            let (copy, _) = ctx.clone_scope(worker, &format!("_{k}"), Some(module), true);
            ctx.scope_mut(copy).add_tag(ScopeTag::Worker);
            ctx.scope_mut(copy).add_tag(ScopeTag::Instantiated);
            let worker_self = ctx.scope(copy).find_local(Id::from(SELF_SYM));
            let to_worker = |s: SymbolId| {
                if Some(s) == ctor_self {
                    worker_self
                } else {
                    None
                }
            };
            let params = ctx.scope(copy).param_symbols();
            let mut binding = vec![];
            let mut runtime = vec![];
            for (p, mut arg) in params.into_iter().zip(args) {
                let fixed = arg.is_const()
                    || matches!(&arg, Expr::Attr { exp, .. } if exp.symbol() == ctor_self);
                if fixed {
                    arg.rename_syms(&to_worker);
                    binding.push((p, arg));
                } else {
                    runtime.push(arg);
                }
            }
            bind_params(ctx, copy, &binding);
            log::debug!(
                "worker {} of {}: {} bound, {} runtime argument(s)",
                ctx.scope(copy).name,
                ctx.scope(module).name,
                binding.len(),
                runtime.len()
            );
            ctx.scope_mut(module).workers.push(Worker {
                scope: copy,
                args: runtime,
            });
            ctx.remove_stm(stm);
            templates.insert(worker);
        }
        for t in templates {
            remove_tree(ctx, t);
        }
    }
}

impl Visitor for Instantiate {
    fn start_context(&mut self, ctx: &mut ir::Context) -> VisResult {
        let pending: Vec<usize> = (0..ctx.targets.len())
            .filter(|i| !ctx.targets[*i].args.is_empty())
            .collect();
        // Specialized targets are appended; the templates drop out.
        for idx in pending.into_iter().rev() {
            Self::specialize(ctx, idx)?;
        }
        let modules: Vec<ScopeId> = ctx
            .scopes_with(ScopeTag::Module)
            .into_iter()
            .filter(|m| !ctx.scope(*m).is_lib())
            .collect();
        for m in modules {
            Self::bind_workers(ctx, m);
        }
        Ok(Action::Stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ir::{BinOpKind, Builder, Ctx, Length, StmKind, Type};

    fn module_with_worker(ctx: &mut ir::Context) -> (ScopeId, ScopeId) {
        let int = Type::int(32, true);
        let m = Builder::class(ctx, "M", true);
        let n = Builder::field(
            ctx,
            m,
            "buf",
            Type::list(int.clone(), Length::Any),
        );
        let mut w = Builder::method(ctx, m, "w", &[]);
        let k = w.param("k", int.clone());
        let v = w.local("v", int.clone());
        w.mov(v, Expr::binop(BinOpKind::Add, Expr::temp(k), Expr::int(1)));
        let w = w.finish();
        let mut c = Builder::method(ctx, m, "__init__", &[ScopeTag::Ctor]);
        let size = c.param("size", int.clone());
        let field = c.self_attr(n, Ctx::Store).unwrap();
        c.store(field, Expr::array(vec![Expr::int(0)], Expr::temp(size)));
        c.append_worker(w, vec![Expr::temp(size)]);
        c.finish();
        (m, w)
    }

    #[test]
    fn module_arguments_and_workers_are_bound() {
        let mut ctx = ir::Context::default();
        let (m, w) = module_with_worker(&mut ctx);
        ctx.targets.push(ir::Target {
            scope: m,
            args: vec![Expr::int(4)],
        });
        Instantiate::do_pass_default(&mut ctx).unwrap();

        assert_eq!(ctx.targets.len(), 1);
        let inst = ctx.targets[0].scope;
        assert_eq!(ctx.scope(inst).name, "@top.M_4");
        assert!(ctx.scope_by_name("@top.M").is_none());
        assert!(ctx.scope(inst).is_instantiated());

        let ctor = ctor_of(&ctx, inst).unwrap();
        assert!(ctx.scope(ctor).params.is_empty());
        let has_array_of_4 = ctx.scope_stms(ctor).iter().any(|s| {
            matches!(&ctx.stm(*s).kind, StmKind::Move { src: Expr::Array { repeat, .. }, .. }
                if repeat.as_int() == Some(4))
        });
        assert!(has_array_of_4);
        assert!(
            !ctx.scope_stms(ctor)
                .iter()
                .any(|s| matches!(ctx.stm(*s).kind, StmKind::Expr(Expr::Call { .. })))
        );

        let workers = &ctx.scope(inst).workers;
        assert_eq!(workers.len(), 1);
        assert!(workers[0].args.is_empty());
        let wk = workers[0].scope;
        assert!(ctx.scope(wk).is_worker());
        assert!(ctx.scope(wk).params.is_empty());
        assert_ne!(wk, w);
        let uses_four = ctx.scope_stms(wk).iter().any(|s| {
            ctx.stm(*s)
                .kind
                .exprs()
                .iter()
                .any(|e| !e.find_exprs(|x| x.as_int() == Some(4)).is_empty())
        });
        assert!(uses_four);
    }

    #[test]
    fn non_constant_target_arguments_fail() {
        let mut ctx = ir::Context::default();
        let (m, _) = module_with_worker(&mut ctx);
        let g = ctx.global;
        let x = ctx
            .add_sym(g, Id::from("x"), ir::sym_tags(&[]), Type::int(32, true))
            .unwrap();
        ctx.targets.push(ir::Target {
            scope: m,
            args: vec![Expr::temp(x)],
        });
        assert!(Instantiate::do_pass_default(&mut ctx).is_err());
    }
}
