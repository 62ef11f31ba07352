use crate::analysis::typing::const_width;
use crate::traversal::{Action, Named, VisResult, Visitor};
use polyphony_ir::{self as ir, BinOpKind, Const, Expr, ScopeId, StmKind, SymbolId};

/// Narrows compiler temporaries to the widest integer they are assigned.
///
/// Only implicit integer temps are touched; a user-declared width is
/// never changed. Widths only shrink, so the pass repeats until stable.
#[derive(Default)]
pub struct Bitwidth;

impl Named for Bitwidth {
    fn name() -> &'static str {
        "bitwidth"
    }

    fn description() -> &'static str {
        "Tighten the width of integer temporaries"
    }
}

/// Bits needed to hold the value of `e`, if known.
fn width_of(ctx: &ir::Context, e: &Expr) -> Option<u32> {
    match e {
        Expr::Const(Const::Int(i)) => Some(const_width(*i)),
        Expr::Const(Const::Bool(_)) => Some(1),
        Expr::Temp { sym, .. } | Expr::Attr { attr: sym, .. } => ctx.sym(*sym).typ.width(),
        Expr::UnOp { exp, .. } => width_of(ctx, exp),
        // Products and left shifts grow past their operands.
        Expr::BinOp {
            op: BinOpKind::Mult | BinOpKind::LShift,
            ..
        } => None,
        Expr::BinOp { left, right, .. } => Some(width_of(ctx, left)?.max(width_of(ctx, right)?)),
        Expr::RelOp { .. } => Some(1),
        Expr::CondOp { left, right, .. } => {
            Some(width_of(ctx, left)?.max(width_of(ctx, right)?))
        }
        Expr::MRef { mem, .. } => mem
            .symbol()
            .and_then(|m| ctx.sym(m).typ.element().and_then(|t| t.width())),
        _ => None,
    }
}

fn candidates(ctx: &ir::Context, scope: ScopeId) -> Vec<SymbolId> {
    ctx.scope(scope)
        .symbols
        .values()
        .copied()
        .filter(|s| {
            let sym = ctx.sym(*s);
            sym.is_temp() && sym.typ.is_int() && !sym.typ.explicit
        })
        .collect()
}

impl Bitwidth {
    /// Widest value assigned to `sym` over all of its definitions.
    fn assigned_width(ctx: &ir::Context, scope: ScopeId, sym: SymbolId) -> Option<u32> {
        let defs = ctx.scope(scope).usedef.get_stms_defining(sym);
        if defs.is_empty() {
            return None;
        }
        let mut width = 0;
        for d in defs {
            let w = match &ctx.stm(d).kind {
                StmKind::Move { src, .. } | StmKind::CMove { src, .. } => width_of(ctx, src)?,
                StmKind::Phi(p) => p
                    .args
                    .iter()
                    .map(|a| width_of(ctx, a))
                    .collect::<Option<Vec<u32>>>()?
                    .into_iter()
                    .max()?,
                _ => return None,
            };
            width = width.max(w);
        }
        Some(width)
    }
}

impl Visitor for Bitwidth {
    fn start(&mut self, scope: ScopeId, ctx: &mut ir::Context) -> VisResult {
        ctx.build_usedef(scope);
        let temps = candidates(ctx, scope);
        let mut changed = true;
        while changed {
            changed = false;
            for t in temps.iter() {
                let Some(cur) = ctx.sym(*t).typ.width() else {
                    continue;
                };
                match Self::assigned_width(ctx, scope, *t) {
                    Some(w) if w > 0 && w < cur => {
                        log::trace!("{}: {} -> {} bits", ctx.sym_name(*t), cur, w);
                        let typ = ctx.sym(*t).typ.clone().with_width(w);
                        ctx.sym_mut(*t).typ = typ;
                        changed = true;
                    }
                    _ => (),
                }
            }
        }
        Ok(Action::SkipChildren)
    }
}
