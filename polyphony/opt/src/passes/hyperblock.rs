use super::path_exp::edge_cond;
use crate::analysis::calls::{is_wait, stm_call};
use crate::traversal::{Action, Named, VisResult, Visitor};
use polyphony_ir::{
    self as ir, BlockId, Ctx, Expr, JumpKind, Phi, PhiKind, ScopeId, StmKind,
};

/// Flattens if/else regions into their branching block.
///
/// A region qualifies when every successor of the branch is either the
/// common tail or a block reached only from the branch that jumps straight
/// to the tail. The arms' statements move into the branching block: values
/// computed into fresh variables run unconditionally, everything else is
/// guarded by the arm's condition. Phis at the tail become UPHIs selecting
/// by those conditions.
///
/// Arms with calls or waits are left alone since they need states of their
/// own.
#[derive(Default)]
pub struct Hyperblock;

impl Named for Hyperblock {
    fn name() -> &'static str {
        "hyperblock"
    }

    fn description() -> &'static str {
        "Convert if/else regions to guarded straight-line code"
    }
}

struct Region {
    head: BlockId,
    /// Successors of the head with the condition leading to each. A
    /// successor equal to `tail` is a direct edge.
    arms: Vec<(BlockId, Expr)>,
    tail: BlockId,
}

impl Region {
    fn is_arm(&self, b: BlockId) -> bool {
        b != self.tail
    }
}

fn enabled(ctx: &ir::Context, scope: ScopeId, blk: BlockId) -> bool {
    ctx.config.enable_hyperblock
        && ctx.scope(scope).synth_params.enable_hyperblock
        && ctx.block(blk).synth_params.enable_hyperblock
}

/// Where an arm candidate `blk` of `head` leads, when its statements can
/// be flattened.
fn arm_target(ctx: &ir::Context, head: BlockId, blk: BlockId) -> Option<BlockId> {
    let b = ctx.block(blk);
    if b.preds != vec![head] || b.is_loop_head() || !ctx.phis(blk).is_empty() {
        return None;
    }
    if b.synth_params != ctx.block(head).synth_params {
        return None;
    }
    let term = ctx.terminator(blk)?;
    let StmKind::Jump {
        target,
        kind: JumpKind::Plain,
    } = ctx.stm(term).kind
    else {
        return None;
    };
    let flat = b.stms.iter().filter(|s| **s != term).all(|s| {
        let k = &ctx.stm(*s).kind;
        matches!(
            k,
            StmKind::Move { .. }
                | StmKind::Expr(_)
                | StmKind::CMove { .. }
                | StmKind::CExpr { .. }
        ) && stm_call(k).is_none()
            && !is_wait(k)
    });
    flat.then_some(target)
}

fn find_region(ctx: &ir::Context, head: BlockId) -> Option<Region> {
    let term = ctx.terminator(head)?;
    if !matches!(
        ctx.stm(term).kind,
        StmKind::CJump { .. } | StmKind::MCJump { .. }
    ) || !ctx.block(head).succs_loop.is_empty()
    {
        return None;
    }
    let succs = ctx.block(head).succs.clone();
    let mut distinct = succs.clone();
    distinct.sort();
    distinct.dedup();
    if distinct.len() != succs.len() {
        return None;
    }
    let ends: Vec<BlockId> = succs
        .iter()
        .map(|s| arm_target(ctx, head, *s).unwrap_or(*s))
        .collect();
    let tail = ends[0];
    if ends.iter().any(|e| *e != tail) || tail == head || ctx.block(tail).is_loop_head() {
        return None;
    }
    if succs.iter().all(|s| *s == tail) {
        return None;
    }
    // Nothing else may enter the tail.
    let mut preds = ctx.block(tail).preds.clone();
    preds.sort();
    let mut expected: Vec<BlockId> = succs
        .iter()
        .map(|s| if *s == tail { head } else { *s })
        .collect();
    expected.sort();
    if preds != expected {
        return None;
    }
    let arms = succs
        .iter()
        .map(|s| (*s, edge_cond(ctx, head, *s)))
        .collect();
    Some(Region { head, arms, tail })
}

/// The guarded form of `kind` executed under `cond`.
fn guard(kind: StmKind, cond: &Expr, speculate: bool) -> StmKind {
    match kind {
        StmKind::Move { dst, src } if speculate => StmKind::Move { dst, src },
        StmKind::Move { dst, src } => StmKind::CMove {
            cond: cond.clone(),
            dst,
            src,
        },
        StmKind::Expr(exp) => StmKind::CExpr {
            cond: cond.clone(),
            exp,
        },
        StmKind::CMove { cond: c, dst, src } => StmKind::CMove {
            cond: Expr::and(cond.clone(), c),
            dst,
            src,
        },
        StmKind::CExpr { cond: c, exp } => StmKind::CExpr {
            cond: Expr::and(cond.clone(), c),
            exp,
        },
        other => other,
    }
}

impl Hyperblock {
    fn flatten(ctx: &mut ir::Context, scope: ScopeId, r: Region) {
        let head = r.head;
        log::debug!(
            "{}: flatten {} arm(s) into {}",
            ctx.scope(scope).name,
            r.arms.len(),
            ctx.block(head).name()
        );
        let cond_of = |b: BlockId| -> Expr {
            r.arms
                .iter()
                .find(|(a, _)| *a == b || (*a == r.tail && b == head))
                .map(|(_, c)| c.clone())
                .unwrap_or_else(|| Expr::bool(true))
        };

        // Phis at the tail select by the arm conditions.
        let mut uphis = vec![];
        let tail_preds = ctx.block(r.tail).preds.clone();
        for p in ctx.phis(r.tail) {
            if let Some(phi) = ctx.stm(p).kind.phi() {
                let mut u = Phi::new(PhiKind::UPhi, phi.var.clone());
                u.args = phi.args.clone();
                u.ps = tail_preds.iter().map(|b| cond_of(*b)).collect();
                u.defblks = vec![None; u.args.len()];
                uphis.push((StmKind::Phi(u), ctx.stm(p).loc));
            }
            ctx.remove_stm(p);
        }

        for (arm, cond) in r.arms.iter() {
            if !r.is_arm(*arm) {
                continue;
            }
            for stm in ctx.block(*arm).stms.clone() {
                let kind = ctx.stm(stm).kind.clone();
                if kind.is_terminator() {
                    ctx.remove_stm(stm);
                    continue;
                }
                let speculate = match &kind {
                    StmKind::Move {
                        dst:
                            Expr::Temp {
                                sym,
                                ctx: Ctx::Store,
                            },
                        src,
                    } => {
                        !src.has_side_effect()
                            && ctx.scope(scope).usedef.get_stms_defining(*sym).len() == 1
                    }
                    _ => false,
                };
                ctx.replace_stm_kind(stm, guard(kind, cond, speculate));
                ctx.move_stm(stm, head);
            }
            ctx.block_mut(*arm).preds.clear();
            ctx.block_mut(*arm).succs.clear();
        }
        for (kind, loc) in uphis {
            ctx.insert_before_terminator(head, kind, loc);
        }

        if let Some(term) = ctx.terminator(head) {
            ctx.replace_stm_kind(term, StmKind::jump(r.tail));
        }
        ctx.block_mut(head).succs = vec![r.tail];
        ctx.block_mut(r.tail).preds = vec![head];
        ctx.block_mut(head).is_hyperblock = true;

        let (h, t) = (ctx.block(head), ctx.block(r.tail));
        if h.synth_params == t.synth_params && ctx.scope(scope).entry_block != Some(r.tail) {
            ctx.merge_blocks(head, r.tail);
        }
    }

    fn flatten_one(ctx: &mut ir::Context, scope: ScopeId) -> bool {
        let mut blocks = ctx.traverse_blocks(scope);
        // Inner regions first.
        blocks.reverse();
        for head in blocks {
            if !enabled(ctx, scope, head) {
                continue;
            }
            if let Some(r) = find_region(ctx, head) {
                Self::flatten(ctx, scope, r);
                ctx.set_order(scope);
                ctx.build_usedef(scope);
                return true;
            }
        }
        false
    }
}

impl Visitor for Hyperblock {
    fn start(&mut self, scope: ScopeId, ctx: &mut ir::Context) -> VisResult {
        ctx.build_usedef(scope);
        while Self::flatten_one(ctx, scope) {}
        Ok(Action::SkipChildren)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passes::Ssa;
    use crate::traversal::Visitor;
    use ir::{Builder, Id, RelOpKind, SymbolId, Type};

    fn diamond(ctx: &mut ir::Context) -> (ScopeId, BlockId, SymbolId) {
        let mut b = Builder::function(ctx, "f");
        let a = b.param("a", Type::int(32, true));
        let x = b.local("x", Type::int(32, true));
        let entry = b.block();
        b.if_else(
            Expr::relop(RelOpKind::Lt, Expr::temp(a), Expr::int(0)),
            |b| {
                b.mov(x, Expr::int(1));
            },
            |b| {
                b.mov(x, Expr::int(2));
            },
        );
        b.ret(Expr::temp(x));
        (b.finish(), entry, x)
    }

    #[test]
    fn reassigned_variables_get_guarded_moves() {
        let mut ctx = ir::Context::default();
        let (f, entry, _) = diamond(&mut ctx);
        Hyperblock::do_pass_default(&mut ctx).unwrap();
        assert_eq!(ctx.traverse_blocks(f), vec![entry]);
        assert!(ctx.block(entry).is_hyperblock);
        let cmoves: Vec<&Expr> = ctx
            .block(entry)
            .stms
            .iter()
            .filter_map(|s| match &ctx.stm(*s).kind {
                StmKind::CMove { cond, .. } => Some(cond),
                _ => None,
            })
            .collect();
        assert_eq!(cmoves.len(), 2);
        assert_eq!(*cmoves[1], Expr::not(cmoves[0].clone()));
    }

    #[test]
    fn ssa_values_are_selected_by_uphis() {
        let mut ctx = ir::Context::default();
        let (f, entry, _) = diamond(&mut ctx);
        Ssa::do_pass_default(&mut ctx).unwrap();
        Hyperblock::do_pass_default(&mut ctx).unwrap();
        assert_eq!(ctx.traverse_blocks(f), vec![entry]);
        let kinds: Vec<StmKind> = ctx
            .block(entry)
            .stms
            .iter()
            .map(|s| ctx.stm(*s).kind.clone())
            .collect();
        assert!(!kinds.iter().any(|k| matches!(k, StmKind::CMove { .. })));
        let uphi = kinds
            .iter()
            .find_map(|k| k.phi().filter(|p| p.kind == PhiKind::UPhi))
            .expect("the merge becomes an UPHI");
        assert_eq!(uphi.args.len(), 2);
        assert_eq!(uphi.ps.len(), 2);
    }

    #[test]
    fn arms_with_calls_stay() {
        let mut ctx = ir::Context::default();
        let mut b = Builder::function(&mut ctx, "g");
        b.ret(Expr::int(0));
        let g = b.finish();
        let gsym = ctx
            .add_sym(
                ctx.global,
                Id::from("g"),
                ir::sym_tags(&[]),
                Type::function(g, Type::int(32, true), vec![]),
            )
            .unwrap();
        let mut b = Builder::function(&mut ctx, "f");
        let a = b.param("a", Type::bool());
        let entry = b.block();
        b.if_else(
            Expr::temp(a),
            |b| {
                b.expr(Expr::call(Expr::temp(gsym), vec![]));
            },
            |_| {},
        );
        b.ret(Expr::int(0));
        let f = b.finish();
        Hyperblock::do_pass_default(&mut ctx).unwrap();
        assert!(!ctx.block(entry).is_hyperblock);
        assert_eq!(ctx.traverse_blocks(f).len(), 4);
    }

    #[test]
    fn disabled_by_config() {
        let mut ctx = ir::Context::default();
        ctx.config.enable_hyperblock = false;
        let (f, _, _) = diamond(&mut ctx);
        Hyperblock::do_pass_default(&mut ctx).unwrap();
        assert_eq!(ctx.traverse_blocks(f).len(), 4);
    }
}
