use crate::analysis::calls::stm_syscall;
use crate::analysis::typing::const_width;
use crate::traversal::{Action, Named, VisResult, Visitor};
use polyphony_ir::visitor::ExprMutator;
use polyphony_ir::{
    self as ir, BlockId, Const, Expr, JumpKind, RelOpKind, ScopeId, StmId, StmKind, SymbolId,
    UnOpKind,
};
use polyphony_utils::Error;

/// Folds constant expressions and propagates constants into their uses
/// until nothing changes. Branches on constant conditions become jumps and
/// the blocks they no longer reach are removed.
///
/// An `assert` whose condition folds to false is reported as a warning.
#[derive(Default)]
pub struct ConstOpt;

impl Named for ConstOpt {
    fn name() -> &'static str {
        "const-opt"
    }

    fn description() -> &'static str {
        "Fold and propagate constants"
    }
}

/// Bottom-up constant folding of one expression.
struct Folder<'a> {
    ctx: &'a ir::Context,
}

impl ExprMutator for Folder<'_> {
    fn rewrite(&mut self, e: &Expr) -> Option<Expr> {
        match e {
            Expr::UnOp { op, exp } => {
                let v = exp.as_int()?;
                Some(match op {
                    UnOpKind::USub => Expr::int(v.wrapping_neg()),
                    UnOpKind::UAdd => Expr::int(v),
                    UnOpKind::Not => Expr::bool(v == 0),
                    UnOpKind::Invert => Expr::int(!v),
                })
            }
            Expr::BinOp { op, left, right } => {
                op.eval(left.as_int()?, right.as_int()?).map(Expr::int)
            }
            Expr::RelOp { op, left, right } => {
                match (op, left.as_int(), right.as_int()) {
                    (_, Some(l), Some(r)) => Some(Expr::bool(op.eval(l, r))),
                    (RelOpKind::And, Some(0), _) | (RelOpKind::And, _, Some(0)) => {
                        Some(Expr::bool(false))
                    }
                    (RelOpKind::Or, Some(l), _) | (RelOpKind::Or, _, Some(l)) if l != 0 => {
                        Some(Expr::bool(true))
                    }
                    (RelOpKind::And, Some(_), _) | (RelOpKind::Or, Some(0), _) => {
                        Some((**right).clone())
                    }
                    (RelOpKind::And, _, Some(_)) | (RelOpKind::Or, _, Some(0)) => {
                        Some((**left).clone())
                    }
                    _ => None,
                }
            }
            Expr::CondOp { cond, left, right } => {
                let c = cond.as_int()?;
                Some(if c != 0 { (**left).clone() } else { (**right).clone() })
            }
            Expr::Syscall { name, args } if name.as_str() == "len" => {
                let seq = args.first()?.symbol()?;
                let n = self.ctx.sym(seq).typ.length()?;
                Some(Expr::int(n as i64))
            }
            _ => None,
        }
    }
}

/// Whether `v` can be held by a variable of type `typ`.
fn fits(typ: &ir::Type, v: i64) -> bool {
    if !typ.is_int() || !typ.explicit {
        return true;
    }
    let Some(w) = typ.width() else {
        return true;
    };
    if typ.signed() {
        const_width(v) <= w
    } else {
        v >= 0 && 64 - (v as u64).leading_zeros() <= w
    }
}

/// `(var, value)` when `stm` binds a constant to a variable that can be
/// replaced by it.
fn const_binding(ctx: &ir::Context, scope: ScopeId, stm: StmId) -> Option<(SymbolId, Expr)> {
    let (var, value) = match &ctx.stm(stm).kind {
        StmKind::Move {
            dst: Expr::Temp { sym, .. },
            src: src @ Expr::Const(c),
        } if !matches!(c, Const::Str(_)) => (*sym, src.clone()),
        StmKind::Phi(phi) => {
            let var = phi.var.symbol()?;
            let mut others = phi.args.iter().filter(|a| a.symbol() != Some(var));
            let first = others.next()?.clone();
            if !first.is_const() || !others.all(|a| *a == first) {
                return None;
            }
            (var, first)
        }
        _ => return None,
    };
    let sym = ctx.sym(var);
    if sym.scope != scope || sym.is_return() || sym.is_field() || sym.typ.is_port() {
        return None;
    }
    if !fits(&sym.typ, value.as_int()?) {
        return None;
    }
    (ctx.scope(scope).usedef.get_stms_defining(var).len() == 1).then_some((var, value))
}

/// The branch left after dropping constant-false conditions; `None` when
/// nothing changes. The removed targets are returned alongside.
fn simplify_branch(kind: &StmKind, succs_loop: &[BlockId]) -> Option<(StmKind, Vec<BlockId>)> {
    let jump = |target: BlockId| StmKind::Jump {
        target,
        kind: if succs_loop.contains(&target) {
            JumpKind::LoopBack
        } else {
            JumpKind::Plain
        },
    };
    match kind {
        StmKind::CJump {
            exp,
            true_blk,
            false_blk,
        } => {
            let c = exp.as_int()?;
            let (taken, dropped) = if c != 0 {
                (*true_blk, *false_blk)
            } else {
                (*false_blk, *true_blk)
            };
            Some((jump(taken), vec![dropped]))
        }
        StmKind::MCJump { conds, targets } => {
            let mut kept: Vec<(Expr, BlockId)> = vec![];
            let mut dropped = vec![];
            let mut decided = false;
            for (c, t) in conds.iter().zip(targets.iter()) {
                if decided {
                    dropped.push(*t);
                    continue;
                }
                match c.as_int() {
                    Some(0) => dropped.push(*t),
                    Some(_) => {
                        kept.push((Expr::bool(true), *t));
                        decided = true;
                    }
                    None => kept.push((c.clone(), *t)),
                }
            }
            if dropped.is_empty() {
                return None;
            }
            let new = match kept.as_slice() {
                [(_, t)] => jump(*t),
                _ => StmKind::MCJump {
                    conds: kept.iter().map(|(c, _)| c.clone()).collect(),
                    targets: kept.iter().map(|(_, t)| *t).collect(),
                },
            };
            Some((new, dropped))
        }
        _ => None,
    }
}

impl ConstOpt {
    fn fold(ctx: &mut ir::Context, scope: ScopeId) -> bool {
        let mut changed = false;
        for stm in ctx.scope_stms(scope) {
            let mut kind = ctx.stm(stm).kind.clone();
            Folder { ctx: &*ctx }.mutate_stm(&mut kind);
            if kind != ctx.stm(stm).kind {
                ctx.replace_stm_kind(stm, kind);
                changed = true;
            }
        }
        changed
    }

    fn propagate(ctx: &mut ir::Context, scope: ScopeId) -> bool {
        let mut changed = false;
        for stm in ctx.scope_stms(scope) {
            let Some((var, value)) = const_binding(ctx, scope, stm) else {
                continue;
            };
            log::trace!("{} = {:?}", ctx.sym_name(var), value);
            let uses = ctx.scope(scope).usedef.get_stms_using(var);
            for u in uses {
                ctx.with_usedef_update(u, |kind| {
                    for e in kind.exprs_mut() {
                        e.replace_uses(var, &value);
                    }
                });
            }
            ctx.remove_stm(stm);
            changed = true;
        }
        changed
    }

    fn prune_branches(ctx: &mut ir::Context, scope: ScopeId) -> bool {
        let mut changed = false;
        for blk in ctx.traverse_blocks(scope) {
            let Some(term) = ctx.terminator(blk) else {
                continue;
            };
            let succs_loop = ctx.block(blk).succs_loop.clone();
            let Some((new, dropped)) = simplify_branch(&ctx.stm(term).kind, &succs_loop) else {
                continue;
            };
            let kept = new.targets();
            ctx.replace_stm_kind(term, new);
            for d in dropped {
                // A target reached by a kept branch keeps one edge.
                let edges = ctx.block(blk).succs.iter().filter(|s| **s == d).count();
                let needed = kept.iter().filter(|k| **k == d).count();
                if edges > needed {
                    ctx.disconnect(blk, d);
                }
            }
            changed = true;
        }
        if changed {
            ctx.remove_unreachable_blocks(scope);
            ctx.set_order(scope);
            ctx.build_usedef(scope);
        }
        changed
    }

    /// Drop assertions that always hold and warn about those that never do.
    fn check_asserts(ctx: &mut ir::Context, scope: ScopeId) {
        for stm in ctx.scope_stms(scope) {
            let kind = &ctx.stm(stm).kind;
            if !matches!(kind, StmKind::Expr(_)) {
                continue;
            }
            let verdict = match stm_syscall(kind) {
                Some(("assert", [c])) => c.as_int(),
                _ => None,
            };
            match verdict {
                Some(0) => {
                    let loc = ctx.stm(stm).loc;
                    ctx.warn(Error::misc("assertion always false").with_loc(loc));
                }
                Some(_) => ctx.remove_stm(stm),
                None => (),
            }
        }
    }
}

impl Visitor for ConstOpt {
    fn start(&mut self, scope: ScopeId, ctx: &mut ir::Context) -> VisResult {
        ctx.build_usedef(scope);
        loop {
            let folded = Self::fold(ctx, scope);
            let propagated = Self::propagate(ctx, scope);
            let pruned = Self::prune_branches(ctx, scope);
            if !(folded || propagated || pruned) {
                break;
            }
        }
        Self::check_asserts(ctx, scope);
        Ok(Action::SkipChildren)
    }
}
