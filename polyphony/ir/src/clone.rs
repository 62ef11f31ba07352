//! Deep copies of scopes. Every cross reference inside the copied tree is
//! rewritten through the symbol, block and scope maps built while copying.
use crate::{
    Block, BlockId, Context, Param, ScopeId, ScopeTag, Stm, StmKind, SymbolId,
    Worker,
};
use polyphony_utils::Id;
use std::collections::HashMap;

/// Old-to-new id maps produced by a clone.
#[derive(Default, Debug, Clone)]
pub struct CloneMaps {
    pub symbols: HashMap<SymbolId, SymbolId>,
    pub blocks: HashMap<BlockId, BlockId>,
    pub scopes: HashMap<ScopeId, ScopeId>,
}

impl CloneMaps {
    pub fn sym(&self, s: SymbolId) -> SymbolId {
        self.symbols.get(&s).copied().unwrap_or(s)
    }

    pub fn block(&self, b: BlockId) -> BlockId {
        self.blocks.get(&b).copied().unwrap_or(b)
    }

    pub fn scope(&self, s: ScopeId) -> ScopeId {
        self.scopes.get(&s).copied().unwrap_or(s)
    }
}

impl Context {
    /// Copy `orig` as `<base_name><postfix>` under `parent` (the original's
    /// parent when `None`). With `recursive`, child scopes are copied too.
    pub fn clone_scope(
        &mut self,
        orig: ScopeId,
        postfix: &str,
        parent: Option<ScopeId>,
        recursive: bool,
    ) -> (ScopeId, CloneMaps) {
        let select = |_: ScopeId| recursive;
        self.clone_tree(orig, postfix, parent, &select)
    }

    /// Copy `orig` and the children accepted by `select`.
    pub fn clone_tree(
        &mut self,
        orig: ScopeId,
        postfix: &str,
        parent: Option<ScopeId>,
        select: &dyn Fn(ScopeId) -> bool,
    ) -> (ScopeId, CloneMaps) {
        let mut maps = CloneMaps::default();
        let parent = parent.or(self.scopes[orig].parent);
        let new = self.copy_shell(orig, postfix, parent, select, &mut maps);
        let copied: Vec<(ScopeId, ScopeId)> =
            maps.scopes.iter().map(|(o, n)| (*o, *n)).collect();
        for (o, n) in copied {
            self.copy_body(o, n, &maps);
        }
        (new, maps)
    }

    /// Create the scope and its symbols; bodies are copied once every symbol
    /// of the tree has a counterpart.
    fn copy_shell(
        &mut self,
        orig: ScopeId,
        postfix: &str,
        parent: Option<ScopeId>,
        select: &dyn Fn(ScopeId) -> bool,
        maps: &mut CloneMaps,
    ) -> ScopeId {
        let (base, tags) = {
            let s = &self.scopes[orig];
            (s.base_name, s.tags.clone())
        };
        let new = self.add_scope(Id::from(format!("{base}{postfix}")), parent, tags);
        maps.scopes.insert(orig, new);
        let syms: Vec<(Id, SymbolId)> = self.scopes[orig]
            .symbols
            .iter()
            .map(|(n, s)| (*n, *s))
            .collect();
        for (name, sym) in syms {
            let mut copy = self.symbols[sym].clone();
            copy.scope = new;
            let id = self.symbols.push(copy);
            self.scopes[new].symbols.insert(name, id);
            self.scopes[new].namegen.add_names([name]);
            maps.symbols.insert(sym, id);
        }
        let children = self.scopes[orig].children.clone();
        for child in children {
            if select(child) {
                self.copy_shell(child, "", Some(new), select, maps);
            }
        }
        new
    }

    fn copy_body(&mut self, orig: ScopeId, new: ScopeId, maps: &CloneMaps) {
        let fs = |s: SymbolId| maps.symbols.get(&s).copied();
        let fc = |s: ScopeId| maps.scopes.get(&s).copied();
        let src = self.scopes[orig].clone();

        let new_syms: Vec<SymbolId> = self.scopes[new].symbols.values().copied().collect();
        for sym in new_syms {
            let s = &mut self.symbols[sym];
            s.typ.remap(&fs, &fc);
            if let Some(a) = s.ancestor.and_then(fs) {
                s.ancestor = Some(a);
            }
        }

        // Blocks first so that jump targets can be resolved.
        let mut blk_map: HashMap<BlockId, BlockId> = HashMap::new();
        let blocks: Vec<BlockId> = self
            .blocks
            .iter()
            .filter(|(_, b)| b.scope == orig)
            .map(|(id, _)| id)
            .collect();
        for b in blocks.iter() {
            let old = &self.blocks[*b];
            let mut blk = Block::new(old.nametag, old.num, new);
            blk.order = old.order;
            blk.is_hyperblock = old.is_hyperblock;
            blk.synth_params = old.synth_params.clone();
            blk.path_exp = old.path_exp.clone().map(|mut e| {
                e.rename_syms(&fs);
                e
            });
            blk_map.insert(*b, self.blocks.push(blk));
        }
        let fb = |b: BlockId| blk_map.get(&b).copied().unwrap_or(b);
        for b in blocks.iter() {
            let old = self.blocks[*b].clone();
            let nb = fb(*b);
            self.blocks[nb].preds = old.preds.iter().map(|p| fb(*p)).collect();
            self.blocks[nb].succs = old.succs.iter().map(|p| fb(*p)).collect();
            self.blocks[nb].preds_loop = old.preds_loop.iter().map(|p| fb(*p)).collect();
            self.blocks[nb].succs_loop = old.succs_loop.iter().map(|p| fb(*p)).collect();
            for stm in old.stms.iter() {
                let mut kind = self.stms[*stm].kind.clone();
                remap_stm(&mut kind, &fs, &fc, &fb);
                let loc = self.stms[*stm].loc;
                let id = self.stms.push(Stm::new(kind, nb, loc));
                self.blocks[nb].stms.push(id);
            }
        }

        let dst = &mut self.scopes[new];
        dst.params = src
            .params
            .iter()
            .map(|p| Param {
                sym: fs(p.sym).unwrap_or(p.sym),
                default: p.default.clone(),
            })
            .collect();
        dst.return_type = src.return_type.clone();
        dst.return_type.remap(&fs, &fc);
        dst.entry_block = src.entry_block.map(fb);
        dst.exit_block = src.exit_block.map(fb);
        dst.bases = src.bases.clone();
        dst.origin = Some(orig);
        dst.synth_params = src.synth_params.clone();
        dst.block_count = src.block_count;
        dst.loc = src.loc;
        dst.workers = src
            .workers
            .iter()
            .map(|w| Worker {
                scope: fc(w.scope).unwrap_or(w.scope),
                args: w
                    .args
                    .iter()
                    .cloned()
                    .map(|mut a| {
                        a.rename_syms(&fs);
                        a
                    })
                    .collect(),
            })
            .collect();
        dst.loop_tree = src.loop_tree.remapped(&fb, &fs);
        self.build_usedef(new);
    }

    /// Clone `scope` and the listed children as `<name>_<inst_name>` under
    /// `parent`. Object, class and function symbols of the copied tree that
    /// referred to an original scope are retyped to its copy.
    pub fn instantiate(
        &mut self,
        scope: ScopeId,
        inst_name: &str,
        children: &[ScopeId],
        parent: Option<ScopeId>,
    ) -> (ScopeId, CloneMaps) {
        let select = |c: ScopeId| children.contains(&c);
        let (new, maps) =
            self.clone_tree(scope, &format!("_{inst_name}"), parent, &select);
        for copy in maps.scopes.values() {
            self.scopes[*copy].add_tag(ScopeTag::Instantiated);
        }
        log::debug!(
            "instantiated {} as {}",
            self.scopes[scope].name,
            self.scopes[new].name
        );
        (new, maps)
    }
}

/// Rename symbols, scopes and jump targets of a statement.
pub fn remap_stm<FS, FC, FB>(kind: &mut StmKind, fs: &FS, fc: &FC, fb: &FB)
where
    FS: Fn(SymbolId) -> Option<SymbolId>,
    FC: Fn(ScopeId) -> Option<ScopeId>,
    FB: Fn(BlockId) -> BlockId,
{
    for e in kind.exprs_mut() {
        e.rename_syms(fs);
        remap_new(e, fc);
    }
    match kind {
        StmKind::Jump { target, .. } => *target = fb(*target),
        StmKind::CJump {
            true_blk,
            false_blk,
            ..
        } => {
            *true_blk = fb(*true_blk);
            *false_blk = fb(*false_blk);
        }
        StmKind::MCJump { targets, .. } => {
            targets.iter_mut().for_each(|t| *t = fb(*t))
        }
        StmKind::Phi(phi) => {
            for d in phi.defblks.iter_mut() {
                *d = d.map(fb);
            }
        }
        _ => (),
    }
}

fn remap_new<FC>(e: &mut crate::Expr, fc: &FC)
where
    FC: Fn(ScopeId) -> Option<ScopeId>,
{
    if let crate::Expr::New { scope, .. } = e {
        if let Some(n) = fc(*scope) {
            *scope = n;
        }
    }
    for k in e.kids_mut() {
        remap_new(k, fc);
    }
}

#[cfg(test)]
mod tests {
    use crate::{Builder, Context, Expr, Type};

    #[test]
    fn clone_rewrites_every_reference() {
        let mut ctx = Context::default();
        let mut b = Builder::function(&mut ctx, "f");
        let x = b.param("x", Type::int(32, true));
        let y = b.local("y", Type::int(32, true));
        b.mov(y, Expr::temp(x));
        b.ret(Expr::temp(y));
        let f = b.finish();

        let (g, maps) = ctx.clone_scope(f, "_copy", None, false);
        assert_eq!(ctx.scope(g).name, "@top.f_copy");
        assert_eq!(ctx.scope(g).origin, Some(f));
        let gx = maps.sym(x);
        assert_ne!(gx, x);
        assert_eq!(ctx.scope(g).params[0].sym, gx);
        for stm in ctx.scope_stms(g) {
            for s in ctx.stm(stm).kind.use_syms() {
                assert_eq!(ctx.sym(s).scope, g, "statement refers outside the copy");
            }
            assert_eq!(ctx.block(ctx.stm(stm).block).scope, g);
        }
        assert_eq!(ctx.scope_stms(g).len(), ctx.scope_stms(f).len());
    }
}
