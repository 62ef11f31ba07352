//! Loop regions and the loop nest tree of a scope.
use crate::{BlockId, Expr, SymbolId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// A loop region. The root region of a scope is headed by the entry block and
/// covers every block outside a loop.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Loop {
    pub head: BlockId,
    /// Blocks of this region other than the head, excluding inner loops.
    pub bodies: Vec<BlockId>,
    pub counter: Option<SymbolId>,
    pub init: Option<Expr>,
    pub update: Option<Expr>,
    pub cond: Option<SymbolId>,
    pub exits: Vec<BlockId>,
    pub outer_defs: BTreeSet<SymbolId>,
    pub outer_uses: BTreeSet<SymbolId>,
    pub inner_defs: BTreeSet<SymbolId>,
    pub inner_uses: BTreeSet<SymbolId>,
}

impl Loop {
    pub fn new(head: BlockId, bodies: Vec<BlockId>) -> Self {
        Loop {
            head,
            bodies,
            ..Default::default()
        }
    }

    /// Head followed by the bodies.
    pub fn blocks(&self) -> Vec<BlockId> {
        std::iter::once(self.head)
            .chain(self.bodies.iter().copied())
            .collect()
    }

    pub fn is_counted(&self) -> bool {
        self.counter.is_some()
    }
}

/// Loop regions keyed by head, with the nesting relation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LoopNestTree {
    pub root: Option<BlockId>,
    loops: HashMap<BlockId, Loop>,
    parent: HashMap<BlockId, BlockId>,
    children: HashMap<BlockId, Vec<BlockId>>,
}

impl LoopNestTree {
    pub fn clear(&mut self) {
        *self = LoopNestTree::default();
    }

    pub fn set_root(&mut self, lp: Loop) {
        let head = lp.head;
        self.root = Some(head);
        self.loops.insert(head, lp);
    }

    pub fn add_loop(&mut self, lp: Loop, parent: BlockId) {
        let head = lp.head;
        self.loops.insert(head, lp);
        self.parent.insert(head, parent);
        self.children.entry(parent).or_default().push(head);
    }

    pub fn get(&self, head: BlockId) -> Option<&Loop> {
        self.loops.get(&head)
    }

    pub fn get_mut(&mut self, head: BlockId) -> Option<&mut Loop> {
        self.loops.get_mut(&head)
    }

    pub fn is_root(&self, head: BlockId) -> bool {
        self.root == Some(head)
    }

    pub fn parent_of(&self, head: BlockId) -> Option<BlockId> {
        self.parent.get(&head).copied()
    }

    pub fn children_of(&self, head: BlockId) -> &[BlockId] {
        self.children.get(&head).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_leaf(&self, head: BlockId) -> bool {
        self.children_of(head).is_empty()
    }

    /// Heads of every loop (the root excluded), children before parents.
    pub fn loop_heads_post_order(&self) -> Vec<BlockId> {
        let mut out = vec![];
        if let Some(root) = self.root {
            self.post_order(root, &mut out);
            out.pop();
        }
        out
    }

    /// Every region including the root, parents before children.
    pub fn regions_pre_order(&self) -> Vec<BlockId> {
        let mut out = vec![];
        if let Some(root) = self.root {
            self.pre_order(root, &mut out);
        }
        out
    }

    fn post_order(&self, head: BlockId, out: &mut Vec<BlockId>) {
        for c in self.children_of(head) {
            self.post_order(*c, out);
        }
        out.push(head);
    }

    fn pre_order(&self, head: BlockId, out: &mut Vec<BlockId>) {
        out.push(head);
        for c in self.children_of(head) {
            self.pre_order(*c, out);
        }
    }

    /// Blocks of `head`'s region together with all its inner loops.
    pub fn inner_blocks(&self, head: BlockId) -> Vec<BlockId> {
        let mut out = vec![];
        if let Some(lp) = self.get(head) {
            out.extend(lp.blocks());
            for c in self.children_of(head) {
                out.extend(self.inner_blocks(*c));
            }
        }
        out
    }

    /// Whether `child` is nested (transitively) in `parent`.
    pub fn is_ancestor(&self, parent: BlockId, child: BlockId) -> bool {
        let mut cur = self.parent_of(child);
        while let Some(p) = cur {
            if p == parent {
                return true;
            }
            cur = self.parent_of(p);
        }
        false
    }

    /// Head of the innermost region that owns `blk`.
    pub fn region_of(&self, blk: BlockId) -> Option<BlockId> {
        self.loops
            .values()
            .find(|lp| lp.head == blk || lp.bodies.contains(&blk))
            .map(|lp| lp.head)
    }

    /// A copy of this tree with every block and symbol mapped through `fb`
    /// and `fs`.
    pub fn remapped<FB, FS>(&self, fb: &FB, fs: &FS) -> LoopNestTree
    where
        FB: Fn(BlockId) -> BlockId,
        FS: Fn(SymbolId) -> Option<SymbolId>,
    {
        let map_syms = |set: &BTreeSet<SymbolId>| {
            set.iter().map(|s| fs(*s).unwrap_or(*s)).collect()
        };
        let map_expr = |e: &Option<Expr>| {
            e.clone().map(|mut e| {
                e.rename_syms(fs);
                e
            })
        };
        let loops = self
            .loops
            .values()
            .map(|lp| {
                let new = Loop {
                    head: fb(lp.head),
                    bodies: lp.bodies.iter().map(|b| fb(*b)).collect(),
                    counter: lp.counter.map(|s| fs(s).unwrap_or(s)),
                    init: map_expr(&lp.init),
                    update: map_expr(&lp.update),
                    cond: lp.cond.map(|s| fs(s).unwrap_or(s)),
                    exits: lp.exits.iter().map(|b| fb(*b)).collect(),
                    outer_defs: map_syms(&lp.outer_defs),
                    outer_uses: map_syms(&lp.outer_uses),
                    inner_defs: map_syms(&lp.inner_defs),
                    inner_uses: map_syms(&lp.inner_uses),
                };
                (new.head, new)
            })
            .collect();
        LoopNestTree {
            root: self.root.map(fb),
            loops,
            parent: self.parent.iter().map(|(k, v)| (fb(*k), fb(*v))).collect(),
            children: self
                .children
                .iter()
                .map(|(k, v)| (fb(*k), v.iter().map(|c| fb(*c)).collect()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyphony_utils::idx::IndexRef;

    fn b(i: usize) -> BlockId {
        BlockId::new(i)
    }

    #[test]
    fn nesting_queries() {
        let mut tree = LoopNestTree::default();
        tree.set_root(Loop::new(b(0), vec![b(5)]));
        tree.add_loop(Loop::new(b(1), vec![b(2)]), b(0));
        tree.add_loop(Loop::new(b(3), vec![b(4)]), b(1));
        assert_eq!(tree.loop_heads_post_order(), vec![b(3), b(1)]);
        assert_eq!(tree.regions_pre_order(), vec![b(0), b(1), b(3)]);
        assert_eq!(tree.inner_blocks(b(1)), vec![b(1), b(2), b(3), b(4)]);
        assert!(tree.is_ancestor(b(0), b(3)));
        assert!(!tree.is_leaf(b(1)));
        assert_eq!(tree.region_of(b(4)), Some(b(3)));
        assert_eq!(tree.region_of(b(5)), Some(b(0)));
    }
}
