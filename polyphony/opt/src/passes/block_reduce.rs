use crate::traversal::{Action, Named, VisResult, Visitor};
use polyphony_ir::{self as ir, BlockId, JumpKind, ScopeId, StmKind};

/// Simplifies the CFG of each scope until it stops changing:
/// 1. Blocks unreachable from the entry are removed.
/// 2. A block reached by a plain jump from its only predecessor is merged
///    into that predecessor.
/// 3. Blocks holding nothing but a jump are bypassed.
///
/// Loop heads and the back edges into them are left alone.
#[derive(Default)]
pub struct BlockReduce;

impl Named for BlockReduce {
    fn name() -> &'static str {
        "block-reduce"
    }

    fn description() -> &'static str {
        "Merge straight-line blocks and drop empty ones"
    }
}

/// The target of `blk` when it ends in a plain forward jump.
fn plain_jump_target(ctx: &ir::Context, blk: BlockId) -> Option<BlockId> {
    let term = ctx.terminator(blk)?;
    match ctx.stm(term).kind {
        StmKind::Jump {
            target,
            kind: JumpKind::Plain,
        } => Some(target),
        _ => None,
    }
}

impl BlockReduce {
    fn merge_one(ctx: &mut ir::Context, scope: ScopeId) -> bool {
        let entry = ctx.scope(scope).entry_block;
        for pred in ctx.traverse_blocks(scope) {
            let Some(succ) = plain_jump_target(ctx, pred) else {
                continue;
            };
            let (p, s) = (ctx.block(pred), ctx.block(succ));
            let mergeable = p.succs.len() == 1
                && s.preds == vec![pred]
                && !s.is_loop_head()
                && Some(succ) != entry
                && succ != pred
                && s.synth_params == p.synth_params;
            if mergeable {
                log::trace!("merge {} into {}", s.name(), p.name());
                ctx.merge_blocks(pred, succ);
                return true;
            }
        }
        false
    }

    fn bypass_one(ctx: &mut ir::Context, scope: ScopeId) -> bool {
        let entry = ctx.scope(scope).entry_block;
        for blk in ctx.traverse_blocks(scope) {
            let b = ctx.block(blk);
            if b.stms.len() != 1 || Some(blk) == entry || b.is_loop_head() {
                continue;
            }
            let Some(target) = plain_jump_target(ctx, blk) else {
                continue;
            };
            if target == blk
                || !b.succs_loop.is_empty()
                || !ctx.phis(target).is_empty()
                || ctx.block(target).is_loop_head()
            {
                continue;
            }
            let preds = b.preds.clone();
            // A predecessor already jumping to the target would get two
            // edges to it.
            if preds.iter().any(|p| ctx.block(*p).succs.contains(&target)) {
                continue;
            }
            log::trace!("bypass {}", ctx.block(blk).name());
            for p in preds {
                ctx.replace_succ(p, blk, target);
                ctx.block_mut(target).preds.push(p);
            }
            ctx.disconnect(blk, target);
            ctx.block_mut(blk).preds.clear();
            if let Some(term) = ctx.terminator(blk) {
                ctx.remove_stm(term);
            }
            return true;
        }
        false
    }

    pub fn reduce(ctx: &mut ir::Context, scope: ScopeId) {
        loop {
            let removed = !ctx.remove_unreachable_blocks(scope).is_empty();
            ctx.set_order(scope);
            if !(removed || Self::merge_one(ctx, scope) || Self::bypass_one(ctx, scope)) {
                break;
            }
        }
        ctx.set_order(scope);
        ctx.build_usedef(scope);
    }
}

impl Visitor for BlockReduce {
    fn start(&mut self, scope: ScopeId, ctx: &mut ir::Context) -> VisResult {
        Self::reduce(ctx, scope);
        Ok(Action::SkipChildren)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ir::{Builder, Expr, SynthParams, Type};

    #[test]
    fn straight_line_collapses() {
        let mut ctx = ir::Context::default();
        let mut b = Builder::function(&mut ctx, "f");
        let x = b.local("x", Type::int(32, true));
        b.mov(x, Expr::int(1));
        let b1 = b.new_block("b");
        let b2 = b.new_block("b");
        b.jump(b1);
        b.set_block(b1);
        b.jump(b2);
        b.set_block(b2);
        b.ret(Expr::temp(x));
        let f = b.finish();
        BlockReduce::do_pass_default(&mut ctx).unwrap();
        let blocks = ctx.traverse_blocks(f);
        assert_eq!(blocks.len(), 1);
        assert_eq!(ctx.scope(f).exit_block, Some(blocks[0]));
        assert_eq!(ctx.block(blocks[0]).stms.len(), 3);
    }

    #[test]
    fn loops_keep_their_shape() {
        let mut ctx = ir::Context::default();
        let mut b = Builder::function(&mut ctx, "f");
        let s = b.local("s", Type::int(32, true));
        b.mov(s, Expr::int(0));
        let head = b.for_range("i", Expr::int(0), Expr::int(4), 1, SynthParams::default(), |b, i| {
            b.mov(s, Expr::temp(i));
        });
        b.ret(Expr::temp(s));
        let f = b.finish();
        let before = ctx.traverse_blocks(f).len();
        BlockReduce::do_pass_default(&mut ctx).unwrap();
        assert!(ctx.block(head).is_loop_head());
        assert!(ctx.traverse_blocks(f).contains(&head));
        // The exit's only predecessor is the branching head.
        assert_eq!(ctx.traverse_blocks(f).len(), before);
    }
}
