//! Which statements of a module's scopes define and use each of its fields.
use polyphony_ir::{self as ir, Ctx, Expr, ScopeId, StmId, SymbolId};
use std::collections::{BTreeSet, HashMap};

/// A `(scope, statement)` pair.
pub type FieldSite = (ScopeId, StmId);

#[derive(Debug, Default)]
pub struct FieldUseDef {
    defs: HashMap<SymbolId, BTreeSet<FieldSite>>,
    uses: HashMap<SymbolId, BTreeSet<FieldSite>>,
}

impl FieldUseDef {
    /// Scan the module, its methods and its workers for `self.<field>`
    /// accesses. Only the first attribute after `self` counts, so
    /// `self.c.put(x)` uses the field `c`.
    pub fn of_module(ctx: &ir::Context, module: ScopeId) -> Self {
        let mut table = FieldUseDef::default();
        let mut scopes = vec![module];
        scopes.extend(ctx.scope(module).children.iter().copied());
        scopes.extend(ctx.scope(module).workers.iter().map(|w| w.scope));
        scopes.sort();
        scopes.dedup();
        for scope in scopes {
            for stm in ctx.scope_stms(scope) {
                for e in ctx.stm(stm).kind.exprs() {
                    for v in e.vars() {
                        table.record(ctx, scope, stm, v);
                    }
                }
            }
        }
        table
    }

    fn record(&mut self, ctx: &ir::Context, scope: ScopeId, stm: StmId, v: &Expr) {
        let Expr::Attr { exp, attr, ctx: actx } = v else {
            return;
        };
        let Some(recv) = exp.symbol().filter(|_| exp.is_temp()) else {
            return;
        };
        if !ctx.sym(recv).is_self() || !ctx.sym(*attr).is_field() {
            return;
        }
        let map = match actx {
            Ctx::Store => &mut self.defs,
            Ctx::Load => &mut self.uses,
        };
        map.entry(*attr).or_default().insert((scope, stm));
    }

    pub fn defs(&self, field: SymbolId) -> BTreeSet<FieldSite> {
        self.defs.get(&field).cloned().unwrap_or_default()
    }

    pub fn uses(&self, field: SymbolId) -> BTreeSet<FieldSite> {
        self.uses.get(&field).cloned().unwrap_or_default()
    }

    /// Scopes that write `field`.
    pub fn writers(&self, field: SymbolId) -> BTreeSet<ScopeId> {
        self.defs(field).into_iter().map(|(s, _)| s).collect()
    }

    pub fn readers(&self, field: SymbolId) -> BTreeSet<ScopeId> {
        self.uses(field).into_iter().map(|(s, _)| s).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ir::{Builder, ScopeTag, Type};

    #[test]
    fn worker_and_ctor_accesses() {
        let mut ctx = ir::Context::default();
        let m = Builder::class(&mut ctx, "M", true);
        let x = Builder::field(&mut ctx, m, "x", Type::int(8, true));
        let mut ctor = Builder::method(&mut ctx, m, "__init__", &[ScopeTag::Ctor]);
        let dst = ctor.self_attr(x, Ctx::Store).unwrap();
        ctor.store(dst, Expr::int(0));
        let ctor = ctor.finish();

        let mut w = Builder::method(&mut ctx, m, "w", &[ScopeTag::Worker]);
        let y = w.local("y", Type::int(8, true));
        let src = w.self_attr(x, Ctx::Load).unwrap();
        let read = w.mov(y, src);
        let w = w.finish();

        let table = FieldUseDef::of_module(&ctx, m);
        assert_eq!(table.writers(x).into_iter().collect::<Vec<_>>(), vec![ctor]);
        assert_eq!(table.uses(x).into_iter().collect::<Vec<_>>(), vec![(w, read)]);
        assert!(table.defs(y).is_empty());
    }
}
