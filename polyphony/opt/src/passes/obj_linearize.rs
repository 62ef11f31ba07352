use crate::analysis::typing::expr_type;
use crate::traversal::{Action, Named, VisResult, Visitor};
use polyphony_ir::visitor::ExprMutator;
use polyphony_ir::{
    self as ir, Ctx, Expr, Phi, PhiKind, RelOpKind, ScopeId, StmId, StmKind, SymbolId, Type,
};
use polyphony_utils::bits_needed_for;

/// Resolves variables that alias one of several lists or objects.
///
/// `a = l1 if c else l2` leaves `a` naming whichever sequence was picked,
/// which hardware cannot express. Such an alias gets a small integer
/// `a_id` recording the choice instead. Each read through `a` becomes an
/// UPHI over the same read of every source keyed on `a_id`, and each write
/// becomes one guarded write per source.
///
/// A statement that hands the alias on, as a call argument or in a copy, is
/// repeated once per source under the same guard. Reads after such a call
/// select from the sources again, so they see whatever the callee wrote. A
/// copy becomes an alias of its own and is resolved in a later round.
/// Aliases reaching a phi are left alone.
#[derive(Default)]
pub struct ObjLinearize;

impl Named for ObjLinearize {
    fn name() -> &'static str {
        "obj-linearize"
    }

    fn description() -> &'static str {
        "Replace aliases of several sequences or objects by guarded accesses"
    }
}

fn is_aggregate(t: &Type) -> bool {
    t.is_seq() || t.is_object()
}

fn is_load_of(e: &Expr, a: SymbolId) -> bool {
    matches!(e, Expr::Temp { sym, ctx: Ctx::Load } if *sym == a)
}

/// Whether `e` reads `a` other than as the target of an element or
/// attribute access or as the argument of `len`. With `calls`, plain call
/// arguments do not count either.
fn escapes(e: &Expr, a: SymbolId, calls: bool) -> bool {
    let esc = |x: &Expr| escapes(x, a, calls);
    match e {
        Expr::MRef { mem, offset, .. } if is_load_of(mem, a) => esc(offset),
        Expr::MStore { mem, offset, exp } if is_load_of(mem, a) => esc(offset) || esc(exp),
        Expr::Attr { exp, .. } if is_load_of(exp, a) => false,
        Expr::Syscall { name, args } if name.as_str() == "len" && args.len() == 1 => {
            !is_load_of(&args[0], a) && esc(&args[0])
        }
        Expr::Call { func, args } if calls => {
            esc(func) || args.iter().any(|x| !is_load_of(x, a) && esc(x))
        }
        Expr::New { args, .. } | Expr::Syscall { args, .. } if calls => {
            args.iter().any(|x| !is_load_of(x, a) && esc(x))
        }
        _ if is_load_of(e, a) => true,
        _ => e.kids().into_iter().any(esc),
    }
}

fn is_local_aggregate(ctx: &ir::Context, s: SymbolId) -> bool {
    let sym = ctx.sym(s);
    is_aggregate(&sym.typ)
        && !sym.is_field()
        && !sym.is_param()
        && !sym.is_return()
        && !sym.is_static()
}

fn is_repeatable(kind: &StmKind) -> bool {
    matches!(
        kind,
        StmKind::Move { .. } | StmKind::CMove { .. } | StmKind::Expr(_) | StmKind::CExpr { .. }
    )
}

/// Whether the use of alias `a` in `stm` can be rewritten.
fn rewritable_use(ctx: &ir::Context, stm: StmId, a: SymbolId) -> bool {
    let kind = &ctx.stm(stm).kind;
    if !is_repeatable(kind) {
        return !kind.is_phi() && !kind.exprs().iter().any(|e| escapes(e, a, false));
    }
    if kind.src().is_some_and(|src| is_load_of(src, a)) {
        return kind
            .dst()
            .filter(|d| d.is_temp())
            .and_then(|d| d.symbol())
            .is_some_and(|d| is_local_aggregate(ctx, d));
    }
    !kind.exprs().iter().any(|e| escapes(e, a, true))
}

/// `kind` executed only when `sel` holds.
fn guarded(kind: &StmKind, sel: Expr) -> Option<StmKind> {
    Some(match kind {
        StmKind::Move { dst, src } => StmKind::CMove {
            cond: sel,
            dst: dst.clone(),
            src: src.clone(),
        },
        StmKind::CMove { cond, dst, src } => StmKind::CMove {
            cond: Expr::and(cond.clone(), sel),
            dst: dst.clone(),
            src: src.clone(),
        },
        StmKind::Expr(e) => StmKind::CExpr {
            cond: sel,
            exp: e.clone(),
        },
        StmKind::CExpr { cond, exp } => StmKind::CExpr {
            cond: Expr::and(cond.clone(), sel),
            exp: exp.clone(),
        },
        _ => return None,
    })
}

/// An alias and the statements that pick its source.
struct Alias {
    var: SymbolId,
    sources: Vec<SymbolId>,
    defs: Vec<StmId>,
}

fn find_alias(ctx: &ir::Context, scope: ScopeId, var: SymbolId) -> Option<Alias> {
    if !is_local_aggregate(ctx, var) {
        return None;
    }
    let usedef = &ctx.scope(scope).usedef;
    let defs: Vec<StmId> = usedef.get_stms_defining(var).into_iter().collect();
    let mut sources = vec![];
    for d in defs.iter() {
        let (StmKind::Move { dst, src } | StmKind::CMove { dst, src, .. }) = &ctx.stm(*d).kind
        else {
            return None;
        };
        let (Some(s), true) = (src.symbol(), src.is_temp() && dst.is_temp()) else {
            return None;
        };
        if !is_aggregate(&ctx.sym(s).typ) {
            return None;
        }
        if !sources.contains(&s) {
            sources.push(s);
        }
    }
    if sources.len() < 2 {
        return None;
    }
    for u in usedef.get_stms_using(var) {
        if defs.contains(&u) {
            continue;
        }
        if !rewritable_use(ctx, u, var) {
            return None;
        }
    }
    Some(Alias {
        var,
        sources,
        defs,
    })
}

/// Replaces the listed reads through the alias by temps.
struct ReadReplacer<'a> {
    reads: &'a [(Expr, SymbolId)],
}

impl ExprMutator for ReadReplacer<'_> {
    fn rewrite(&mut self, e: &Expr) -> Option<Expr> {
        self.reads
            .iter()
            .find(|(r, _)| r == e)
            .map(|(_, t)| Expr::temp(*t))
    }
}

/// `e` with the alias `a` replaced by `src` as its receiver.
fn retarget(e: &Expr, a: SymbolId, src: SymbolId) -> Expr {
    let mut e = e.clone();
    e.rename_syms(&|s| (s == a).then_some(src));
    e
}

impl ObjLinearize {
    fn selector(id: SymbolId, k: usize) -> Expr {
        Expr::relop(RelOpKind::Eq, Expr::temp(id), Expr::int(k as i64))
    }

    fn linearize(ctx: &mut ir::Context, scope: ScopeId, alias: Alias) {
        let a = alias.var;
        log::debug!(
            "{}: {} aliases {} sources",
            ctx.scope(scope).name,
            ctx.sym_name(a),
            alias.sources.len()
        );
        let name = format!("{}_id", ctx.sym(a).orig_name());
        let id = ctx.add_derived_sym(scope, a, &name);
        let width = bits_needed_for(alias.sources.len() as u64) as u32;
        ctx.sym_mut(id).typ = Type::int(width, false);

        for d in alias.defs.iter() {
            let new = match ctx.stm(*d).kind.clone() {
                StmKind::Move { src, .. } => src.symbol().and_then(|s| {
                    let k = alias.sources.iter().position(|x| *x == s)?;
                    Some(StmKind::mov(Expr::store(id), Expr::int(k as i64)))
                }),
                StmKind::CMove { cond, src, .. } => src.symbol().and_then(|s| {
                    let k = alias.sources.iter().position(|x| *x == s)?;
                    Some(StmKind::CMove {
                        cond,
                        dst: Expr::store(id),
                        src: Expr::int(k as i64),
                    })
                }),
                _ => None,
            };
            if let Some(new) = new {
                ctx.replace_stm_kind(*d, new);
            }
        }

        let uses = ctx.scope(scope).usedef.get_stms_using(a);
        for u in uses {
            if alias.defs.contains(&u) {
                continue;
            }
            Self::rewrite_use(ctx, scope, &alias, id, u);
        }
    }

    fn rewrite_use(ctx: &mut ir::Context, scope: ScopeId, alias: &Alias, id: SymbolId, stm: StmId) {
        let a = alias.var;
        let (blk, loc) = (ctx.stm(stm).block, ctx.stm(stm).loc);
        let mut kind = ctx.stm(stm).kind.clone();

        // Reads become UPHIs in front of the statement.
        let mut reads: Vec<Expr> = vec![];
        for e in kind.exprs() {
            for r in e.find_exprs(|x| match x {
                Expr::MRef {
                    mem,
                    ctx: Ctx::Load,
                    ..
                }
                | Expr::Attr {
                    exp: mem,
                    ctx: Ctx::Load,
                    ..
                } => is_load_of(mem, a),
                _ => false,
            }) {
                if !reads.contains(r) {
                    reads.push(r.clone());
                }
            }
        }
        let mut temps = vec![];
        for r in reads {
            let t = ctx.add_temp(scope, "@t");
            let typ = expr_type(ctx, &retarget(&r, a, alias.sources[0]));
            ctx.sym_mut(t).typ = typ;
            let mut phi = Phi::new(PhiKind::UPhi, Expr::store(t));
            for (k, s) in alias.sources.iter().enumerate() {
                phi.args.push(retarget(&r, a, *s));
                phi.ps.push(Self::selector(id, k));
                phi.defblks.push(None);
            }
            let idx = ctx
                .block(blk)
                .stms
                .iter()
                .position(|s| *s == stm)
                .unwrap_or(0);
            ctx.insert_stm(blk, idx, StmKind::Phi(phi), loc);
            temps.push((r, t));
        }
        ReadReplacer { reads: &temps }.mutate_stm(&mut kind);

        // Writes, and statements still handing the alias on, are repeated
        // once per source under its selector.
        let writes_alias = match &kind {
            StmKind::Move { dst, .. } | StmKind::CMove { dst, .. } => {
                dst.head_symbol() == Some(a) && !dst.is_temp()
            }
            StmKind::Expr(e) | StmKind::CExpr { exp: e, .. } => {
                matches!(e, Expr::MStore { mem, .. } if is_load_of(mem, a))
            }
            _ => false,
        };
        let repeat = writes_alias || kind.use_syms().contains(&a);
        if !repeat || !is_repeatable(&kind) {
            ctx.replace_stm_kind(stm, kind);
            return;
        }
        let idx = ctx
            .block(blk)
            .stms
            .iter()
            .position(|s| *s == stm)
            .unwrap_or(0);
        for (k, s) in alias.sources.iter().enumerate().rev() {
            let Some(mut copy) = guarded(&kind, Self::selector(id, k)) else {
                continue;
            };
            for e in copy.exprs_mut() {
                e.rename_syms(&|x| (x == a).then_some(*s));
            }
            ctx.insert_stm(blk, idx + 1, copy, loc);
        }
        ctx.remove_stm(stm);
    }
}

impl Visitor for ObjLinearize {
    fn start(&mut self, scope: ScopeId, ctx: &mut ir::Context) -> VisResult {
        ctx.build_usedef(scope);
        loop {
            let vars: Vec<SymbolId> = ctx.scope(scope).symbols.values().copied().collect();
            let Some(alias) = vars.into_iter().find_map(|v| find_alias(ctx, scope, v)) else {
                break;
            };
            Self::linearize(ctx, scope, alias);
            ctx.build_usedef(scope);
        }
        Ok(Action::SkipChildren)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ir::{Builder, Length};

    #[test]
    fn reads_and_writes_through_an_alias() {
        let mut ctx = ir::Context::default();
        let list = Type::list(Type::int(8, true), Length::Fixed(4));
        let mut b = Builder::function(&mut ctx, "f");
        let c = b.param("c", Type::bool());
        let l1 = b.local("l1", list.clone());
        let l2 = b.local("l2", list.clone());
        let a = b.local("a", list.clone());
        let x = b.local("x", Type::int(8, true));
        b.mov(l1, Expr::array(vec![Expr::int(1)], Expr::int(4)));
        b.mov(l2, Expr::array(vec![Expr::int(2)], Expr::int(4)));
        b.if_else(
            Expr::temp(c),
            |b| {
                b.mov(a, Expr::temp(l1));
            },
            |b| {
                b.mov(a, Expr::temp(l2));
            },
        );
        b.mov(x, Expr::mref(Expr::temp(a), Expr::int(1)));
        b.expr(Expr::mstore(Expr::temp(a), Expr::int(0), Expr::temp(x)));
        b.ret(Expr::temp(x));
        let f = b.finish();
        ObjLinearize::do_pass_default(&mut ctx).unwrap();

        let stms: Vec<StmKind> = ctx
            .scope_stms(f)
            .into_iter()
            .map(|s| ctx.stm(s).kind.clone())
            .collect();
        assert!(stms.iter().all(|k| !k.use_syms().contains(&a)));
        assert!(stms.iter().all(|k| !k.def_syms().contains(&a)));
        let uphi = stms
            .iter()
            .find_map(|k| k.phi())
            .expect("the read selects between both lists");
        assert_eq!(uphi.kind, PhiKind::UPhi);
        assert_eq!(uphi.args[0], Expr::mref(Expr::temp(l1), Expr::int(1)));
        assert_eq!(uphi.args[1], Expr::mref(Expr::temp(l2), Expr::int(1)));
        let guarded_stores = stms
            .iter()
            .filter(|k| matches!(k, StmKind::CExpr { exp: Expr::MStore { .. }, .. }))
            .count();
        assert_eq!(guarded_stores, 2);
    }

    fn pick(b: &mut Builder, c: SymbolId, a: SymbolId, l1: SymbolId, l2: SymbolId) {
        b.if_else(
            Expr::temp(c),
            |b| {
                b.mov(a, Expr::temp(l1));
            },
            |b| {
                b.mov(a, Expr::temp(l2));
            },
        );
    }

    fn kinds(ctx: &ir::Context, f: ScopeId) -> Vec<StmKind> {
        ctx.scope_stms(f)
            .into_iter()
            .map(|s| ctx.stm(s).kind.clone())
            .collect()
    }

    #[test]
    fn copies_of_an_alias_follow_it() {
        let mut ctx = ir::Context::default();
        let list = Type::list(Type::int(8, true), Length::Fixed(4));
        let mut b = Builder::function(&mut ctx, "f");
        let c = b.param("c", Type::bool());
        let l1 = b.local("l1", list.clone());
        let l2 = b.local("l2", list.clone());
        let a = b.local("a", list.clone());
        let d = b.local("d", list.clone());
        let x = b.local("x", Type::int(8, true));
        pick(&mut b, c, a, l1, l2);
        b.mov(d, Expr::temp(a));
        b.mov(x, Expr::mref(Expr::temp(d), Expr::int(1)));
        b.ret(Expr::temp(x));
        let f = b.finish();
        ObjLinearize::do_pass_default(&mut ctx).unwrap();

        let stms = kinds(&ctx, f);
        for v in [a, d] {
            assert!(stms.iter().all(|k| !k.def_syms().contains(&v)));
            assert!(stms.iter().all(|k| !k.use_syms().contains(&v)));
        }
        let uphi = stms.iter().find_map(|k| k.phi()).unwrap();
        assert_eq!(uphi.args[0], Expr::mref(Expr::temp(l1), Expr::int(1)));
        assert_eq!(uphi.args[1], Expr::mref(Expr::temp(l2), Expr::int(1)));
    }

    #[test]
    fn aliased_list_passed_to_a_call() {
        let mut ctx = ir::Context::default();
        let int = Type::int(8, true);
        let list = Type::list(int.clone(), Length::Fixed(4));
        let mut b = Builder::function(&mut ctx, "g");
        b.returns(int.clone());
        let xs = b.param("xs", list.clone());
        b.expr(Expr::mstore(Expr::temp(xs), Expr::int(0), Expr::int(9)));
        b.ret(Expr::int(0));
        let g = b.finish();
        let global = ctx.global;
        let gsym = ctx
            .add_sym(
                global,
                polyphony_utils::Id::from("g"),
                ir::sym_tags(&[]),
                Type::function(g, int.clone(), vec![list.clone()]),
            )
            .unwrap();

        let mut b = Builder::function(&mut ctx, "f");
        let c = b.param("c", Type::bool());
        let l1 = b.local("l1", list.clone());
        let l2 = b.local("l2", list.clone());
        let a = b.local("a", list.clone());
        let r = b.local("r", int.clone());
        let x = b.local("x", int.clone());
        pick(&mut b, c, a, l1, l2);
        let call = Expr::call(Expr::temp(gsym), vec![Expr::temp(a)]);
        b.mov(r, call);
        b.mov(x, Expr::mref(Expr::temp(a), Expr::int(0)));
        b.ret(Expr::temp(x));
        let f = b.finish();
        ObjLinearize::do_pass_default(&mut ctx).unwrap();

        let stms = kinds(&ctx, f);
        assert!(stms.iter().all(|k| !k.use_syms().contains(&a)));
        // One guarded call per list the alias may name.
        let calls: Vec<usize> = stms
            .iter()
            .enumerate()
            .filter_map(|(i, k)| match k {
                StmKind::CMove { dst, src: Expr::Call { args, .. }, .. } => {
                    assert_eq!(dst.symbol(), Some(r));
                    assert!(args[0] == Expr::temp(l1) || args[0] == Expr::temp(l2));
                    Some(i)
                }
                _ => None,
            })
            .collect();
        assert_eq!(calls.len(), 2);
        // The read after the call selects from the lists again.
        let read = stms
            .iter()
            .position(|k| k.phi().is_some_and(|p| p.kind == PhiKind::UPhi))
            .unwrap();
        assert!(calls.iter().all(|i| *i < read));
    }
}
