use crate::analysis::DominatorTree;
use crate::traversal::{Action, Named, VisResult, Visitor};
use polyphony_ir::{self as ir, BlockId, Expr, ScopeId, StmKind};
use std::collections::HashMap;

/// Annotates every block with the condition under which it runs.
///
/// The entry runs unconditionally. A block with a single forward
/// predecessor runs when the predecessor does and its branch goes there.
/// Where paths merge, the block runs whenever its immediate dominator does.
#[derive(Default)]
pub struct PathExp;

impl Named for PathExp {
    fn name() -> &'static str {
        "path-exp"
    }

    fn description() -> &'static str {
        "Compute the execution condition of each block"
    }
}

/// The condition under which the branch ending `pred` goes to `blk`.
pub fn edge_cond(ctx: &ir::Context, pred: BlockId, blk: BlockId) -> Expr {
    let Some(term) = ctx.terminator(pred) else {
        return Expr::bool(true);
    };
    match &ctx.stm(term).kind {
        StmKind::CJump {
            exp,
            true_blk,
            false_blk,
        } if true_blk != false_blk => {
            if *true_blk == blk {
                exp.clone()
            } else {
                Expr::not(exp.clone())
            }
        }
        StmKind::MCJump { conds, targets } => targets
            .iter()
            .position(|t| *t == blk)
            .map(|i| conds[i].clone())
            .unwrap_or_else(|| Expr::bool(true)),
        _ => Expr::bool(true),
    }
}

impl Visitor for PathExp {
    fn start(&mut self, scope: ScopeId, ctx: &mut ir::Context) -> VisResult {
        let dom = DominatorTree::new(ctx, scope);
        let mut paths: HashMap<BlockId, Expr> = HashMap::new();
        for blk in ctx.traverse_blocks(scope) {
            let preds: Vec<BlockId> = ctx.block(blk).forward_preds().collect();
            let path = match preds.as_slice() {
                [] => Expr::bool(true),
                [p] => {
                    let base = paths.get(p).cloned().unwrap_or_else(|| Expr::bool(true));
                    Expr::and(base, edge_cond(ctx, *p, blk))
                }
                _ => dom
                    .idom(blk)
                    .and_then(|d| paths.get(&d).cloned())
                    .unwrap_or_else(|| Expr::bool(true)),
            };
            paths.insert(blk, path);
        }
        for (blk, path) in paths {
            ctx.block_mut(blk).path_exp = Some(path);
        }
        Ok(Action::SkipChildren)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ir::{Builder, Type, UnOpKind};

    #[test]
    fn branches_and_merges() {
        let mut ctx = ir::Context::default();
        let mut b = Builder::function(&mut ctx, "f");
        let a = b.param("a", Type::bool());
        let entry = b.block();
        let merge = b.if_else(Expr::temp(a), |_| {}, |_| {});
        b.ret(Expr::int(0));
        b.finish();
        PathExp::do_pass_default(&mut ctx).unwrap();

        let succs = ctx.block(entry).succs.clone();
        let c = match &ctx.stm(ctx.terminator(entry).unwrap()).kind {
            StmKind::CJump { exp, .. } => exp.clone(),
            _ => panic!("expected a branch"),
        };
        assert_eq!(ctx.block(entry).path_exp, Some(Expr::bool(true)));
        assert_eq!(ctx.block(succs[0]).path_exp, Some(c.clone()));
        assert_eq!(
            ctx.block(succs[1]).path_exp,
            Some(Expr::unop(UnOpKind::Not, c))
        );
        assert_eq!(ctx.block(merge).path_exp, Some(Expr::bool(true)));
    }
}
