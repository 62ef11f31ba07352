//! Dominator and post-dominator trees over the forward edges of a CFG, and
//! dominance frontiers over all edges.
use polyphony_ir::{self as ir, BlockId, ScopeId};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DominatorTree {
    /// Blocks in the order the sets were computed.
    blocks: Vec<BlockId>,
    doms: HashMap<BlockId, BTreeSet<BlockId>>,
    idom: HashMap<BlockId, BlockId>,
    children: HashMap<BlockId, Vec<BlockId>>,
}

impl DominatorTree {
    /// Dominators of every reachable block of `scope`.
    pub fn new(ctx: &ir::Context, scope: ScopeId) -> Self {
        let blocks = ctx.traverse_blocks(scope);
        let preds = |b: BlockId| ctx.block(b).forward_preds().collect::<Vec<_>>();
        Self::compute(blocks, preds)
    }

    /// Post-dominators: dominators of the reversed forward CFG. Blocks
    /// without forward successors are the roots.
    pub fn post(ctx: &ir::Context, scope: ScopeId) -> Self {
        let mut blocks = ctx.traverse_blocks(scope);
        blocks.reverse();
        let succs = |b: BlockId| ctx.block(b).forward_succs().collect::<Vec<_>>();
        Self::compute(blocks, succs)
    }

    /// `Dom(b) = {b} U intersect(Dom(p))` over the given predecessor
    /// relation, iterated until nothing changes. The immediate dominator is
    /// the strict dominator computed last.
    fn compute<F>(blocks: Vec<BlockId>, preds: F) -> Self
    where
        F: Fn(BlockId) -> Vec<BlockId>,
    {
        let all: BTreeSet<BlockId> = blocks.iter().copied().collect();
        let mut doms: HashMap<BlockId, BTreeSet<BlockId>> = HashMap::new();
        for b in blocks.iter() {
            let ps: Vec<BlockId> =
                preds(*b).into_iter().filter(|p| all.contains(p)).collect();
            let init = if ps.is_empty() {
                BTreeSet::from([*b])
            } else {
                all.clone()
            };
            doms.insert(*b, init);
        }
        let mut changed = true;
        while changed {
            changed = false;
            for b in blocks.iter() {
                let ps: Vec<BlockId> =
                    preds(*b).into_iter().filter(|p| all.contains(p)).collect();
                if ps.is_empty() {
                    continue;
                }
                let mut new = ps
                    .iter()
                    .map(|p| doms[p].clone())
                    .reduce(|a, b| a.intersection(&b).copied().collect())
                    .unwrap_or_default();
                new.insert(*b);
                if new != doms[b] {
                    doms.insert(*b, new);
                    changed = true;
                }
            }
        }

        // Dominators of a block form a chain, ordered by position.
        let pos: HashMap<BlockId, usize> =
            blocks.iter().enumerate().map(|(i, b)| (*b, i)).collect();
        let mut idom = HashMap::new();
        let mut children: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
        for b in blocks.iter() {
            let closest = doms[b]
                .iter()
                .filter(|d| *d != b)
                .max_by_key(|d| pos[*d]);
            if let Some(d) = closest {
                idom.insert(*b, *d);
                children.entry(*d).or_default().push(*b);
            }
        }
        DominatorTree {
            blocks,
            doms,
            idom,
            children,
        }
    }

    pub fn idom(&self, b: BlockId) -> Option<BlockId> {
        self.idom.get(&b).copied()
    }

    pub fn children(&self, b: BlockId) -> &[BlockId] {
        self.children.get(&b).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether `a` dominates `b` (every block dominates itself).
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        self.doms.get(&b).is_some_and(|d| d.contains(&a))
    }

    pub fn dominators(&self, b: BlockId) -> Option<&BTreeSet<BlockId>> {
        self.doms.get(&b)
    }

    /// Roots of the tree: blocks without an immediate dominator.
    pub fn roots(&self) -> Vec<BlockId> {
        self.blocks
            .iter()
            .copied()
            .filter(|b| !self.idom.contains_key(b))
            .collect()
    }

    /// Blocks in dominator-tree pre-order.
    pub fn pre_order(&self) -> Vec<BlockId> {
        let mut out = vec![];
        let mut stack: Vec<BlockId> = self.roots().into_iter().rev().collect();
        while let Some(b) = stack.pop() {
            out.push(b);
            for c in self.children(b).iter().rev() {
                stack.push(*c);
            }
        }
        out
    }

    /// `DF[n] = DF_local[n] U union(DF_up[c])` for the children `c` of `n`,
    /// taken over every CFG edge including back edges.
    pub fn frontiers(&self, ctx: &ir::Context) -> HashMap<BlockId, BTreeSet<BlockId>> {
        let mut df: HashMap<BlockId, BTreeSet<BlockId>> = HashMap::new();
        let mut order = self.pre_order();
        order.reverse();
        for n in order {
            let mut set = BTreeSet::new();
            for s in ctx.block(n).succs.iter() {
                if self.idom(*s) != Some(n) {
                    set.insert(*s);
                }
            }
            for c in self.children(n) {
                for w in df.get(c).cloned().unwrap_or_default() {
                    if self.idom(w) != Some(n) {
                        set.insert(w);
                    }
                }
            }
            df.insert(n, set);
        }
        df
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ir::{Builder, Expr, RelOpKind, SynthParams, Type};

    #[test]
    fn diamond_and_loop() {
        let mut ctx = ir::Context::default();
        let mut b = Builder::function(&mut ctx, "f");
        let x = b.param("x", Type::int(32, true));
        let y = b.local("y", Type::int(32, true));
        let entry = b.block();
        let merge = b.if_else(
            Expr::relop(RelOpKind::Lt, Expr::temp(x), Expr::int(0)),
            |b| {
                b.mov(y, Expr::int(1));
            },
            |b| {
                b.mov(y, Expr::int(2));
            },
        );
        let head = b.for_range("i", Expr::int(0), Expr::int(3), 1, SynthParams::default(), |_, _| {});
        b.ret(Expr::temp(y));
        let f = b.finish();

        let dom = DominatorTree::new(&ctx, f);
        let then = ctx.block(entry).succs[0];
        assert_eq!(dom.idom(then), Some(entry));
        assert_eq!(dom.idom(merge), Some(entry));
        assert!(dom.dominates(merge, head));
        assert!(!dom.dominates(then, merge));

        let df = dom.frontiers(&ctx);
        assert!(df[&then].contains(&merge));
        // The loop body reaches the head through the back edge.
        let body = ctx.block(head).succs[0];
        assert!(df[&body].contains(&head));

        let pdom = DominatorTree::post(&ctx, f);
        assert_eq!(pdom.idom(then), Some(merge));
        assert!(pdom.dominates(merge, entry));
    }

    #[test]
    fn computation_is_idempotent() {
        let mut ctx = ir::Context::default();
        let mut b = Builder::function(&mut ctx, "g");
        let x = b.param("x", Type::int(32, true));
        b.if_else(Expr::temp(x), |_| {}, |_| {});
        b.ret(Expr::int(0));
        let g = b.finish();
        assert_eq!(DominatorTree::new(&ctx, g), DominatorTree::new(&ctx, g));
    }
}
