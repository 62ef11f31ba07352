//! Control-flow graph editing on [Context].
use crate::{Block, BlockId, Context, Ctx, Expr, ScopeId, Stm, StmId, StmKind};
use polyphony_utils::{Id, Loc};
use std::collections::{HashSet, VecDeque};

impl Context {
    /// A new empty block in `scope`, named `<nametag><n>`.
    pub fn new_block(&mut self, scope: ScopeId, nametag: &str) -> BlockId {
        let num = self.scopes[scope].block_count;
        self.scopes[scope].block_count += 1;
        self.blocks.push(Block::new(Id::from(nametag), num, scope))
    }

    /// Add a forward edge `a -> b`.
    pub fn connect(&mut self, a: BlockId, b: BlockId) {
        self.blocks[a].succs.push(b);
        self.blocks[b].preds.push(a);
    }

    /// Add a back edge `a -> b`.
    pub fn connect_loop(&mut self, a: BlockId, b: BlockId) {
        self.connect(a, b);
        self.blocks[a].succs_loop.push(b);
        self.blocks[b].preds_loop.push(a);
    }

    /// Remove one edge `a -> b` from both adjacency lists. Phi arguments in
    /// `b` coming from `a` are dropped.
    pub fn disconnect(&mut self, a: BlockId, b: BlockId) {
        if let Some(pos) = self.blocks[a].succs.iter().position(|s| *s == b) {
            self.blocks[a].succs.remove(pos);
        }
        self.blocks[a].succs_loop.retain(|s| *s != b);
        if let Some(pos) = self.blocks[b].preds.iter().position(|p| *p == a) {
            self.blocks[b].preds.remove(pos);
            for stm in self.blocks[b].stms.clone() {
                if let Some(phi) = self.stms[stm].kind.phi_mut() {
                    if phi.args.len() > pos {
                        phi.remove_arg(pos);
                    }
                }
            }
        }
        self.blocks[b].preds_loop.retain(|p| *p != a);
    }

    /// Replace successor `old` of `blk` with `new`, in the adjacency lists
    /// and in the terminator. A multi-way jump whose targets all become the
    /// same block collapses into a JUMP; its condition's definition is
    /// dropped when nothing else reads it.
    pub fn replace_succ(&mut self, blk: BlockId, old: BlockId, new: BlockId) {
        for s in self.blocks[blk].succs.iter_mut() {
            if *s == old {
                *s = new;
            }
        }
        for s in self.blocks[blk].succs_loop.iter_mut() {
            if *s == old {
                *s = new;
            }
        }
        let Some(term) = self.terminator(blk) else {
            return;
        };
        self.stms[term].kind.replace_target(old, new);
        let targets = self.stms[term].kind.targets();
        let collapses = targets.len() > 1 && targets.iter().all(|t| *t == new);
        if !collapses {
            return;
        }
        let conds: Vec<Expr> = self.stms[term]
            .kind
            .exprs()
            .into_iter()
            .cloned()
            .collect();
        self.stms[term].kind = StmKind::jump(new);
        let mut seen = false;
        self.blocks[blk].succs.retain(|s| {
            if *s == new {
                let keep = !seen;
                seen = true;
                keep
            } else {
                true
            }
        });
        let mut seen = false;
        let mut drop_pred = vec![];
        for (i, p) in self.blocks[new].preds.iter().enumerate() {
            if *p == blk {
                if seen {
                    drop_pred.push(i);
                }
                seen = true;
            }
        }
        for i in drop_pred.into_iter().rev() {
            self.blocks[new].preds.remove(i);
            for stm in self.blocks[new].stms.clone() {
                if let Some(phi) = self.stms[stm].kind.phi_mut() {
                    if phi.args.len() > i {
                        phi.remove_arg(i);
                    }
                }
            }
        }
        let scope = self.blocks[blk].scope;
        for cond in conds {
            if let Expr::Temp { sym, .. } = cond {
                self.remove_dead_def(scope, sym);
            }
        }
    }

    /// Delete the definition of `sym` if no statement of `scope` reads it.
    fn remove_dead_def(&mut self, scope: ScopeId, sym: crate::SymbolId) {
        let stms = self.scope_stms(scope);
        if stms
            .iter()
            .any(|s| self.stms[*s].kind.use_syms().contains(&sym))
        {
            return;
        }
        for s in stms {
            let defines = self.stms[s].kind.def_syms() == vec![sym];
            let pure = !self.stms[s].kind.has_side_effect();
            if defines && pure {
                self.remove_stm(s);
            }
        }
    }

    /// Replace predecessor `old` of `blk` with `new`; phi def-blocks follow.
    pub fn replace_pred(&mut self, blk: BlockId, old: BlockId, new: BlockId) {
        for p in self.blocks[blk].preds.iter_mut() {
            if *p == old {
                *p = new;
            }
        }
        for p in self.blocks[blk].preds_loop.iter_mut() {
            if *p == old {
                *p = new;
            }
        }
        for stm in self.blocks[blk].stms.clone() {
            if let Some(phi) = self.stms[stm].kind.phi_mut() {
                for d in phi.defblks.iter_mut() {
                    if *d == Some(old) {
                        *d = Some(new);
                    }
                }
            }
        }
    }

    /* ============ Statements ============ */

    pub fn append_stm(&mut self, blk: BlockId, kind: StmKind, loc: Loc) -> StmId {
        let id = self.stms.push(Stm::new(kind, blk, loc));
        self.blocks[blk].stms.push(id);
        id
    }

    pub fn insert_stm(
        &mut self,
        blk: BlockId,
        idx: usize,
        kind: StmKind,
        loc: Loc,
    ) -> StmId {
        let id = self.stms.push(Stm::new(kind, blk, loc));
        self.blocks[blk].stms.insert(idx, id);
        id
    }

    /// Insert before the terminator of `blk` (or at the end if it has none).
    pub fn insert_before_terminator(
        &mut self,
        blk: BlockId,
        kind: StmKind,
        loc: Loc,
    ) -> StmId {
        let idx = match self.terminator(blk) {
            Some(_) => self.blocks[blk].stms.len() - 1,
            None => self.blocks[blk].stms.len(),
        };
        self.insert_stm(blk, idx, kind, loc)
    }

    /// Insert after the phis at the top of `blk`.
    pub fn insert_after_phis(&mut self, blk: BlockId, kind: StmKind, loc: Loc) -> StmId {
        let idx = self.blocks[blk]
            .stms
            .iter()
            .take_while(|s| self.stms[**s].kind.is_phi())
            .count();
        self.insert_stm(blk, idx, kind, loc)
    }

    /// Detach `stm` from its block and from the use-def table of its scope.
    pub fn remove_stm(&mut self, stm: StmId) {
        let blk = self.stms[stm].block;
        self.blocks[blk].stms.retain(|s| *s != stm);
        let scope = self.blocks[blk].scope;
        self.scopes[scope].usedef.remove_stm(stm);
    }

    /// Move `stm` to the end of `blk` (before its terminator).
    pub fn move_stm(&mut self, stm: StmId, blk: BlockId) {
        let old = self.stms[stm].block;
        self.blocks[old].stms.retain(|s| *s != stm);
        let idx = match self.terminator(blk) {
            Some(_) => self.blocks[blk].stms.len() - 1,
            None => self.blocks[blk].stms.len(),
        };
        self.blocks[blk].stms.insert(idx, stm);
        self.stms[stm].block = blk;
    }

    /// Replace the kind of `stm`, keeping the use-def table of its scope in
    /// sync.
    pub fn replace_stm_kind(&mut self, stm: StmId, kind: StmKind) {
        let scope = self.blocks[self.stms[stm].block].scope;
        self.scopes[scope].usedef.remove_stm(stm);
        self.stms[stm].kind = kind;
        self.scopes[scope].usedef.add_stm(stm, &self.stms[stm]);
    }

    /// Run `f` on `stm` and refresh its use-def entries afterwards.
    pub fn with_usedef_update<F>(&mut self, stm: StmId, f: F)
    where
        F: FnOnce(&mut StmKind),
    {
        let scope = self.blocks[self.stms[stm].block].scope;
        self.scopes[scope].usedef.remove_stm(stm);
        f(&mut self.stms[stm].kind);
        self.scopes[scope].usedef.add_stm(stm, &self.stms[stm]);
    }

    pub fn last_stm(&self, blk: BlockId) -> Option<StmId> {
        self.blocks[blk].stms.last().copied()
    }

    /// The jump or return ending `blk`.
    pub fn terminator(&self, blk: BlockId) -> Option<StmId> {
        self.last_stm(blk)
            .filter(|s| self.stms[*s].kind.is_terminator())
    }

    pub fn phis(&self, blk: BlockId) -> Vec<StmId> {
        self.blocks[blk]
            .stms
            .iter()
            .copied()
            .filter(|s| self.stms[*s].kind.is_phi())
            .collect()
    }

    /* ============ Traversal ============ */

    /// Blocks reachable from the entry of `scope`, in discovery order.
    pub fn reachable_blocks(&self, scope: ScopeId) -> Vec<BlockId> {
        let Some(entry) = self.scopes[scope].entry_block else {
            return vec![];
        };
        let mut seen = HashSet::new();
        let mut out = vec![];
        let mut stack = vec![entry];
        while let Some(b) = stack.pop() {
            if !seen.insert(b) {
                continue;
            }
            out.push(b);
            for s in self.blocks[b].succs.iter().rev() {
                if !seen.contains(s) {
                    stack.push(*s);
                }
            }
        }
        out
    }

    /// Reachable blocks of `scope` in topological order (back edges
    /// excluded); ties keep discovery order.
    pub fn traverse_blocks(&self, scope: ScopeId) -> Vec<BlockId> {
        let mut blks = self.reachable_blocks(scope);
        blks.sort_by_key(|b| self.blocks[*b].order);
        blks
    }

    /// Recompute block order numbers: the longest forward path from entry.
    pub fn set_order(&mut self, scope: ScopeId) {
        let reach = self.reachable_blocks(scope);
        for b in reach.iter() {
            self.blocks[*b].order = -1;
        }
        let Some(entry) = self.scopes[scope].entry_block else {
            return;
        };
        self.blocks[entry].order = 0;
        let mut queue = VecDeque::from([entry]);
        while let Some(b) = queue.pop_front() {
            let next = self.blocks[b].order + 1;
            let succs: Vec<BlockId> = self.blocks[b].forward_succs().collect();
            for s in succs {
                if self.blocks[s].order < next {
                    self.blocks[s].order = next;
                    queue.push_back(s);
                }
            }
        }
    }

    /// Drop blocks that cannot be reached from the entry, detaching their
    /// edges into reachable blocks.
    pub fn remove_unreachable_blocks(&mut self, scope: ScopeId) -> Vec<BlockId> {
        let reach: HashSet<BlockId> =
            self.reachable_blocks(scope).into_iter().collect();
        let dead: Vec<BlockId> = self
            .blocks
            .iter()
            .filter(|(id, b)| {
                b.scope == scope && !reach.contains(id) && !b.stms.is_empty()
                    || b.scope == scope
                        && !reach.contains(id)
                        && b.succs.iter().any(|s| reach.contains(s))
            })
            .map(|(id, _)| id)
            .collect();
        for d in dead.iter() {
            for s in self.blocks[*d].succs.clone() {
                if reach.contains(&s) {
                    self.disconnect(*d, s);
                }
            }
            for stm in self.blocks[*d].stms.clone() {
                self.scopes[scope].usedef.remove_stm(stm);
            }
            self.blocks[*d].stms.clear();
            self.blocks[*d].succs.clear();
            self.blocks[*d].preds.clear();
            self.blocks[*d].preds_loop.clear();
            self.blocks[*d].succs_loop.clear();
        }
        if let Some(exit) = self.scopes[scope].exit_block {
            if !reach.contains(&exit) {
                self.scopes[scope].exit_block = None;
            }
        }
        dead
    }

    /// Append the statements of `succ` to `pred` and take over its
    /// successors. `pred` must end in an unconditional jump to `succ`, which
    /// must have `pred` as its only predecessor.
    pub fn merge_blocks(&mut self, pred: BlockId, succ: BlockId) {
        if let Some(term) = self.terminator(pred) {
            self.remove_stm(term);
        }
        let moved = std::mem::take(&mut self.blocks[succ].stms);
        for s in moved.iter() {
            self.stms[*s].block = pred;
        }
        self.blocks[pred].stms.extend(moved);
        let succs = std::mem::take(&mut self.blocks[succ].succs);
        let succs_loop = std::mem::take(&mut self.blocks[succ].succs_loop);
        self.blocks[pred].succs = succs.clone();
        self.blocks[pred].succs_loop = succs_loop;
        for s in succs {
            self.replace_pred(s, succ, pred);
        }
        self.blocks[succ].preds.clear();
        let scope = self.blocks[pred].scope;
        if self.scopes[scope].exit_block == Some(succ) {
            self.scopes[scope].exit_block = Some(pred);
        }
        if self.blocks[succ].is_hyperblock {
            self.blocks[pred].is_hyperblock = true;
        }
    }

    /// The variable `sym` in load position.
    pub fn load(&self, sym: crate::SymbolId) -> Expr {
        Expr::Temp { sym, ctx: Ctx::Load }
    }
}
