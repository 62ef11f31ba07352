use crate::traversal::{Action, Named, VisResult, Visitor};
use polyphony_ir::{self as ir, BlockId, Expr, ScopeId, StmId, StmKind};

/// Turns `if a: ... elif b: ... else: ...` chains into one MCJUMP.
///
/// A CJUMP whose false branch is a block of its own that only computes the
/// next condition and branches again absorbs that block. Conditions after
/// the first are conjoined with the negations of the earlier ones, and the
/// final branch is taken unconditionally.
#[derive(Default)]
pub struct IfConversion;

impl Named for IfConversion {
    fn name() -> &'static str {
        "if-conversion"
    }

    fn description() -> &'static str {
        "Merge if/elif chains into multi-way jumps"
    }
}

/// `(cond, true, false)` of the CJUMP ending `blk`.
fn cjump_of(ctx: &ir::Context, blk: BlockId) -> Option<(StmId, Expr, BlockId, BlockId)> {
    let term = ctx.terminator(blk)?;
    match &ctx.stm(term).kind {
        StmKind::CJump {
            exp,
            true_blk,
            false_blk,
        } => Some((term, exp.clone(), *true_blk, *false_blk)),
        _ => None,
    }
}

/// Whether `blk` is an `elif` test that can be absorbed by `head`: it is
/// reached only from `head` and holds nothing but side-effect free moves in
/// front of its CJUMP.
fn is_elif(ctx: &ir::Context, head: BlockId, blk: BlockId) -> bool {
    let b = ctx.block(blk);
    b.preds == vec![head]
        && !b.is_loop_head()
        && b.synth_params == ctx.block(head).synth_params
        && cjump_of(ctx, blk).is_some()
        && b.stms.iter().all(|s| {
            let k = &ctx.stm(*s).kind;
            k.is_terminator() || (k.is_move() && !k.has_side_effect())
        })
}

impl IfConversion {
    /// Absorb the chain of tests starting at `head`; whether it had any.
    fn convert(ctx: &mut ir::Context, head: BlockId) -> bool {
        let Some((term, c0, t0, mut rest)) = cjump_of(ctx, head) else {
            return false;
        };
        let mut conds = vec![c0];
        let mut targets = vec![t0];
        let mut absorbed = vec![];
        while is_elif(ctx, head, rest) && rest != head {
            let Some((_, c, t, f)) = cjump_of(ctx, rest) else {
                break;
            };
            let seen = |b: &BlockId| targets.contains(b) || *b == head || absorbed.contains(b);
            if seen(&t) || seen(&f) || t == f || t == rest || f == rest {
                break;
            }
            // Later tests move up into the head.
            for s in ctx.block(rest).stms.clone() {
                if !ctx.stm(s).kind.is_terminator() {
                    ctx.move_stm(s, head);
                }
            }
            absorbed.push(rest);
            conds.push(c);
            targets.push(t);
            rest = f;
            // The next test is now reached from the head only.
            let b = absorbed[absorbed.len() - 1];
            ctx.replace_pred(t, b, head);
            ctx.replace_pred(f, b, head);
            ctx.block_mut(b).succs.clear();
            ctx.block_mut(b).preds.clear();
            if let Some(j) = ctx.terminator(b) {
                ctx.remove_stm(j);
            }
        }
        if absorbed.is_empty() {
            return false;
        }
        targets.push(rest);

        let mut guarded = vec![];
        let mut none_before = Expr::bool(true);
        for c in conds.iter() {
            guarded.push(Expr::and(none_before.clone(), c.clone()));
            none_before = Expr::and(none_before, Expr::not(c.clone()));
        }
        guarded.push(Expr::bool(true));
        log::trace!(
            "{}: {}-way branch",
            ctx.block(head).name(),
            targets.len()
        );
        ctx.block_mut(head).succs = targets.clone();
        ctx.replace_stm_kind(
            term,
            StmKind::MCJump {
                conds: guarded,
                targets,
            },
        );
        true
    }
}

impl Visitor for IfConversion {
    fn start(&mut self, scope: ScopeId, ctx: &mut ir::Context) -> VisResult {
        let mut changed = false;
        for blk in ctx.traverse_blocks(scope) {
            if !ctx.block(blk).stms.is_empty() {
                changed |= Self::convert(ctx, blk);
            }
        }
        if changed {
            ctx.remove_unreachable_blocks(scope);
            ctx.set_order(scope);
            ctx.build_usedef(scope);
        }
        Ok(Action::SkipChildren)
    }
}
