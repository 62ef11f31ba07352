//! Use-def tables: which statements define and use each symbol.
use crate::{BlockId, Stm, StmId, SymbolId};
use std::collections::{BTreeSet, HashMap};

/// Def and use relations of one scope. Attribute variables are keyed by the
/// attribute symbol; the receiver of an attribute is recorded as a use.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UseDefTable {
    def_sym2stm: HashMap<SymbolId, BTreeSet<StmId>>,
    use_sym2stm: HashMap<SymbolId, BTreeSet<StmId>>,
    def_stm2sym: HashMap<StmId, BTreeSet<SymbolId>>,
    use_stm2sym: HashMap<StmId, BTreeSet<SymbolId>>,
    def_blk2sym: HashMap<BlockId, BTreeSet<SymbolId>>,
    use_blk2sym: HashMap<BlockId, BTreeSet<SymbolId>>,
    /// Statements using a constant operand, for constant folding.
    const_uses: BTreeSet<StmId>,
}

impl UseDefTable {
    pub fn clear(&mut self) {
        *self = UseDefTable::default();
    }

    pub fn add_var_def(&mut self, sym: SymbolId, stm: StmId, blk: BlockId) {
        self.def_sym2stm.entry(sym).or_default().insert(stm);
        self.def_stm2sym.entry(stm).or_default().insert(sym);
        self.def_blk2sym.entry(blk).or_default().insert(sym);
    }

    pub fn add_var_use(&mut self, sym: SymbolId, stm: StmId, blk: BlockId) {
        self.use_sym2stm.entry(sym).or_default().insert(stm);
        self.use_stm2sym.entry(stm).or_default().insert(sym);
        self.use_blk2sym.entry(blk).or_default().insert(sym);
    }

    pub fn remove_var_def(&mut self, sym: SymbolId, stm: StmId) {
        if let Some(s) = self.def_sym2stm.get_mut(&sym) {
            s.remove(&stm);
        }
        if let Some(s) = self.def_stm2sym.get_mut(&stm) {
            s.remove(&sym);
        }
    }

    pub fn remove_var_use(&mut self, sym: SymbolId, stm: StmId) {
        if let Some(s) = self.use_sym2stm.get_mut(&sym) {
            s.remove(&stm);
        }
        if let Some(s) = self.use_stm2sym.get_mut(&stm) {
            s.remove(&sym);
        }
    }

    /// Record every variable of `stm`.
    pub fn add_stm(&mut self, id: StmId, stm: &Stm) {
        for sym in stm.kind.def_syms() {
            self.add_var_def(sym, id, stm.block);
        }
        for sym in stm.kind.use_syms() {
            self.add_var_use(sym, id, stm.block);
        }
        if stm.kind.exprs().iter().any(|e| {
            e.is_const() || e.kids().iter().any(|k| k.is_const())
        }) {
            self.const_uses.insert(id);
        }
    }

    /// Forget every variable of `stm`. The block sets are rebuilt lazily by
    /// the next full build.
    pub fn remove_stm(&mut self, id: StmId) {
        if let Some(defs) = self.def_stm2sym.remove(&id) {
            for sym in defs {
                if let Some(s) = self.def_sym2stm.get_mut(&sym) {
                    s.remove(&id);
                }
            }
        }
        if let Some(uses) = self.use_stm2sym.remove(&id) {
            for sym in uses {
                if let Some(s) = self.use_sym2stm.get_mut(&sym) {
                    s.remove(&id);
                }
            }
        }
        self.const_uses.remove(&id);
    }

    pub fn get_stms_defining(&self, sym: SymbolId) -> BTreeSet<StmId> {
        self.def_sym2stm.get(&sym).cloned().unwrap_or_default()
    }

    pub fn get_stms_using(&self, sym: SymbolId) -> BTreeSet<StmId> {
        self.use_sym2stm.get(&sym).cloned().unwrap_or_default()
    }

    pub fn get_syms_defined_at(&self, stm: StmId) -> BTreeSet<SymbolId> {
        self.def_stm2sym.get(&stm).cloned().unwrap_or_default()
    }

    pub fn get_syms_used_at(&self, stm: StmId) -> BTreeSet<SymbolId> {
        self.use_stm2sym.get(&stm).cloned().unwrap_or_default()
    }

    pub fn get_syms_defined_at_blk(&self, blk: BlockId) -> BTreeSet<SymbolId> {
        self.def_blk2sym.get(&blk).cloned().unwrap_or_default()
    }

    pub fn get_syms_used_at_blk(&self, blk: BlockId) -> BTreeSet<SymbolId> {
        self.use_blk2sym.get(&blk).cloned().unwrap_or_default()
    }

    pub fn get_const_uses(&self) -> &BTreeSet<StmId> {
        &self.const_uses
    }

    /// Every symbol with at least one definition.
    pub fn get_all_def_syms(&self) -> BTreeSet<SymbolId> {
        self.def_sym2stm
            .iter()
            .filter(|(_, s)| !s.is_empty())
            .map(|(k, _)| *k)
            .collect()
    }

    /// Every symbol with at least one use.
    pub fn get_all_use_syms(&self) -> BTreeSet<SymbolId> {
        self.use_sym2stm
            .iter()
            .filter(|(_, s)| !s.is_empty())
            .map(|(k, _)| *k)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BinOpKind, Expr, StmKind};
    use polyphony_utils::{Loc, idx::IndexRef};

    #[test]
    fn add_and_remove_statements() {
        let (x, y) = (SymbolId::new(0), SymbolId::new(1));
        let blk = BlockId::new(0);
        let s0 = Stm::new(StmKind::mov(Expr::temp(x), Expr::int(1)), blk, Loc::default());
        let s1 = Stm::new(
            StmKind::mov(
                Expr::temp(y),
                Expr::binop(BinOpKind::Add, Expr::temp(x), Expr::int(1)),
            ),
            blk,
            Loc::default(),
        );
        let (i0, i1) = (StmId::new(0), StmId::new(1));
        let mut table = UseDefTable::default();
        table.add_stm(i0, &s0);
        table.add_stm(i1, &s1);
        assert_eq!(table.get_stms_defining(x).into_iter().collect::<Vec<_>>(), vec![i0]);
        assert_eq!(table.get_stms_using(x).into_iter().collect::<Vec<_>>(), vec![i1]);
        assert!(table.get_const_uses().contains(&i0));
        assert!(table.get_const_uses().contains(&i1));
        table.remove_stm(i1);
        assert!(table.get_stms_using(x).is_empty());
        assert_eq!(table.get_all_def_syms().len(), 1);
    }
}
