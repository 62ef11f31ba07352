//! The compilation context owning every IR arena.
use crate::{
    Block, BlockId, Config, Expr, HdlContext, ScopeId, Scope, ScopeTag, Scopes,
    Stm, StmId, SymTag, Symbol, SymbolId, Type, scope_tags,
};
use linked_hash_map::LinkedHashMap;
use polyphony_utils::{Error, ErrorKind, Id, PolyResult, SourceMap, idx::IndexedMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A scope registered for synthesis together with its constant arguments.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub scope: ScopeId,
    pub args: Vec<Expr>,
}

/// Owns all scopes, symbols, blocks and statements of a program, plus the
/// hardware-level scopes built from them.
#[derive(Debug, Serialize, Deserialize)]
pub struct Context {
    pub scopes: Scopes,
    pub symbols: IndexedMap<SymbolId, Symbol>,
    pub blocks: IndexedMap<BlockId, Block>,
    pub stms: IndexedMap<StmId, Stm>,
    pub scope_names: LinkedHashMap<Id, ScopeId>,
    /// The `@top` namespace.
    pub global: ScopeId,
    #[serde(default)]
    pub config: Config,
    #[serde(default)]
    pub targets: Vec<Target>,
    #[serde(skip)]
    pub hdl: HdlContext,
    /// Scopes being specialized, innermost last.
    #[serde(skip)]
    pub outermost: Vec<ScopeId>,
    /// Options passed to passes with `-x pass:opt=val`.
    #[serde(skip)]
    pub extra_opts: Vec<String>,
    #[serde(skip)]
    pub sources: SourceMap,
    #[serde(skip)]
    pub warnings: Vec<Error>,
}

impl Default for Context {
    fn default() -> Self {
        Context::new(Config::default())
    }
}

impl Context {
    pub fn new(config: Config) -> Self {
        let mut ctx = Context {
            scopes: Scopes::new(),
            symbols: IndexedMap::new(),
            blocks: IndexedMap::new(),
            stms: IndexedMap::new(),
            scope_names: LinkedHashMap::new(),
            global: ScopeId::default(),
            config,
            targets: vec![],
            hdl: HdlContext::default(),
            outermost: vec![],
            extra_opts: vec![],
            sources: SourceMap::default(),
            warnings: vec![],
        };
        let top = Id::from("@top");
        let global = ctx.scopes.push(Scope::new(
            top,
            top,
            None,
            scope_tags(&[ScopeTag::Namespace]),
        ));
        ctx.scope_names.insert(top, global);
        ctx.global = global;
        ctx
    }

    /* ============ Scopes ============ */

    /// Create a scope named `base_name` under `parent`. The full name is the
    /// dotted path from `@top`.
    pub fn add_scope(
        &mut self,
        base_name: Id,
        parent: Option<ScopeId>,
        tags: BTreeSet<ScopeTag>,
    ) -> ScopeId {
        let parent = parent.or(Some(self.global));
        let mut name = match parent {
            Some(p) => Id::from(format!("{}.{}", self.scopes[p].name, base_name)),
            None => base_name,
        };
        let mut n = 0;
        while self.scope_names.contains_key(&name) {
            n += 1;
            name = Id::from(format!("{}.{}{}", self.parent_name(parent), base_name, n));
        }
        let id = self.scopes.push(Scope::new(name, base_name, parent, tags));
        self.scope_names.insert(name, id);
        if let Some(p) = parent {
            self.scopes[p].children.push(id);
        }
        id
    }

    fn parent_name(&self, parent: Option<ScopeId>) -> Id {
        parent.map(|p| self.scopes[p].name).unwrap_or_default()
    }

    /// Unregister `scope`; its arena slot stays but nothing refers to it.
    pub fn remove_scope(&mut self, scope: ScopeId) {
        let name = self.scopes[scope].name;
        self.scope_names.remove(&name);
        if let Some(p) = self.scopes[scope].parent {
            self.scopes[p].children.retain(|c| *c != scope);
        }
        self.targets.retain(|t| t.scope != scope);
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id]
    }

    pub fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id]
    }

    pub fn scope_by_name(&self, name: &str) -> Option<ScopeId> {
        self.scope_names.get(&Id::from(name)).copied()
    }

    /// Live scopes in registration order.
    pub fn scope_ids(&self) -> Vec<ScopeId> {
        self.scope_names.values().copied().collect()
    }

    /// Live scopes with the given tag.
    pub fn scopes_with(&self, tag: ScopeTag) -> Vec<ScopeId> {
        self.scope_ids()
            .into_iter()
            .filter(|s| self.scopes[*s].has_tag(tag))
            .collect()
    }

    /// The nearest enclosing module of `scope` (itself included).
    pub fn outer_module(&self, scope: ScopeId) -> Option<ScopeId> {
        let mut cur = Some(scope);
        while let Some(s) = cur {
            if self.scopes[s].is_module() {
                return Some(s);
            }
            cur = self.scopes[s].parent;
        }
        None
    }

    /// The class a method, worker or ctor belongs to.
    pub fn parent_class(&self, scope: ScopeId) -> Option<ScopeId> {
        self.scopes[scope]
            .parent
            .filter(|p| self.scopes[*p].is_class())
    }

    /// Whether `scope` is the global namespace or defined directly in it.
    pub fn is_global(&self, scope: ScopeId) -> bool {
        scope == self.global || self.scopes[scope].parent == Some(self.global)
    }

    /* ============ Symbols ============ */

    pub fn sym(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id]
    }

    pub fn sym_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id]
    }

    pub fn sym_name(&self, id: SymbolId) -> Id {
        self.symbols[id].name
    }

    /// Add a symbol with a user-given name.
    pub fn add_sym(
        &mut self,
        scope: ScopeId,
        name: Id,
        tags: BTreeSet<SymTag>,
        typ: Type,
    ) -> PolyResult<SymbolId> {
        if self.scopes[scope].has_sym(name) {
            return Err(Error::new(ErrorKind::RedefinedName(name))
                .with_loc(self.scopes[scope].loc));
        }
        Ok(self.insert_sym(scope, name, tags, typ))
    }

    fn insert_sym(
        &mut self,
        scope: ScopeId,
        name: Id,
        tags: BTreeSet<SymTag>,
        typ: Type,
    ) -> SymbolId {
        let id = self.symbols.push(Symbol::new(name, scope, tags, typ));
        self.scopes[scope].symbols.insert(name, id);
        self.scopes[scope].namegen.add_names([name]);
        id
    }

    fn fresh_name(&mut self, scope: ScopeId, prefix: &str) -> Id {
        loop {
            let name = self.scopes[scope].namegen.gen_name(prefix);
            if !self.scopes[scope].has_sym(name) {
                return name;
            }
        }
    }

    /// A fresh temporary in `scope`.
    pub fn add_temp(&mut self, scope: ScopeId, prefix: &str) -> SymbolId {
        let name = self.fresh_name(scope, prefix);
        let mut tags = BTreeSet::new();
        tags.insert(SymTag::Temp);
        self.insert_sym(scope, name, tags, Type::undef())
    }

    /// A fresh branch condition in `scope`.
    pub fn add_condition_sym(&mut self, scope: ScopeId) -> SymbolId {
        let name = self.fresh_name(scope, "@c");
        let mut tags = BTreeSet::new();
        tags.insert(SymTag::Condition);
        self.insert_sym(scope, name, tags, Type::bool())
    }

    /// A fresh symbol derived from `sym` named `<orig>#<n>`, sharing its type
    /// and tags.
    pub fn add_version(&mut self, sym: SymbolId) -> SymbolId {
        let (scope, orig, typ, tags) = {
            let s = &self.symbols[sym];
            (s.scope, s.orig_name(), s.typ.clone(), s.tags.clone())
        };
        let name = loop {
            let name = self.scopes[scope].namegen.gen_suffixed(orig, '#');
            if !self.scopes[scope].has_sym(name) {
                break name;
            }
        };
        let id = self.insert_sym(scope, name, tags, typ);
        self.symbols[id].ancestor = Some(self.root_ancestor(sym));
        id
    }

    /// A copy of `sym` in `scope` named `prefix` plus a fresh suffix.
    pub fn add_derived_sym(
        &mut self,
        scope: ScopeId,
        sym: SymbolId,
        prefix: &str,
    ) -> SymbolId {
        let name = self.fresh_name(scope, prefix);
        let (typ, tags) = {
            let s = &self.symbols[sym];
            (s.typ.clone(), s.tags.clone())
        };
        let id = self.insert_sym(scope, name, tags, typ);
        self.symbols[id].ancestor = Some(sym);
        id
    }

    /// Import `sym` into `scope` under `new_name`, as done for inherited
    /// fields and free variables of closures.
    pub fn inherit_sym(
        &mut self,
        scope: ScopeId,
        sym: SymbolId,
        new_name: Id,
    ) -> SymbolId {
        if let Some(existing) = self.scopes[scope].find_local(new_name) {
            return existing;
        }
        let (typ, mut tags) = {
            let s = &self.symbols[sym];
            (s.typ.clone(), s.tags.clone())
        };
        tags.insert(SymTag::Inherited);
        let id = self.insert_sym(scope, new_name, tags, typ);
        self.symbols[id].ancestor = Some(sym);
        id
    }

    /// Follow ancestor links to the original symbol.
    pub fn root_ancestor(&self, sym: SymbolId) -> SymbolId {
        let mut cur = sym;
        while let Some(a) = self.symbols[cur].ancestor {
            cur = a;
        }
        cur
    }

    /// Resolve `name` from `scope`: local symbols and base classes first,
    /// then enclosing scopes outward.
    pub fn find_sym(&self, scope: ScopeId, name: Id) -> Option<SymbolId> {
        let mut cur = Some(scope);
        while let Some(s) = cur {
            if let Some(sym) = self.find_in_hierarchy(s, name) {
                return Some(sym);
            }
            cur = self.scopes[s].parent;
        }
        None
    }

    fn find_in_hierarchy(&self, scope: ScopeId, name: Id) -> Option<SymbolId> {
        self.scopes[scope].find_local(name).or_else(|| {
            self.scopes[scope]
                .bases
                .iter()
                .find_map(|b| self.find_in_hierarchy(*b, name))
        })
    }

    /* ============ Blocks & statements ============ */

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id]
    }

    pub fn stm(&self, id: StmId) -> &Stm {
        &self.stms[id]
    }

    pub fn stm_mut(&mut self, id: StmId) -> &mut Stm {
        &mut self.stms[id]
    }

    /// All statements of `scope` in block order.
    pub fn scope_stms(&self, scope: ScopeId) -> Vec<StmId> {
        self.traverse_blocks(scope)
            .into_iter()
            .flat_map(|b| self.blocks[b].stms.clone())
            .collect()
    }

    /// Rebuild the use-def table of `scope` from scratch.
    pub fn build_usedef(&mut self, scope: ScopeId) {
        let mut table = crate::UseDefTable::default();
        for stm in self.scope_stms(scope) {
            table.add_stm(stm, &self.stms[stm]);
        }
        self.scopes[scope].usedef = table;
    }

    /// Record a warning; warnings never stop compilation.
    pub fn warn(&mut self, err: Error) {
        log::warn!("{}", self.sources.format_error(&err));
        self.warnings.push(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::tags;

    #[test]
    fn symbol_lookup_walks_bases_then_parents() {
        let mut ctx = Context::default();
        let g = ctx.global;
        let gx = ctx
            .add_sym(g, Id::from("g"), tags(&[]), Type::int(32, true))
            .unwrap();
        let base = ctx.add_scope(Id::from("B"), None, scope_tags(&[ScopeTag::Class]));
        let fx = ctx
            .add_sym(base, Id::from("x"), tags(&[SymTag::Field]), Type::int(8, true))
            .unwrap();
        let derived = ctx.add_scope(Id::from("D"), None, scope_tags(&[ScopeTag::Class]));
        ctx.scope_mut(derived).bases.push(base);
        let method = ctx.add_scope(
            Id::from("m"),
            Some(derived),
            scope_tags(&[ScopeTag::Method]),
        );
        assert_eq!(ctx.find_sym(method, Id::from("x")), Some(fx));
        assert_eq!(ctx.find_sym(method, Id::from("g")), Some(gx));
        assert_eq!(ctx.find_sym(method, Id::from("nope")), None);
        assert_eq!(ctx.scope(method).name, "@top.D.m");
        assert_eq!(ctx.parent_class(method), Some(derived));
    }

    #[test]
    fn redefinition_is_reported() {
        let mut ctx = Context::default();
        let g = ctx.global;
        ctx.add_sym(g, Id::from("a"), tags(&[]), Type::bool()).unwrap();
        let err = ctx
            .add_sym(g, Id::from("a"), tags(&[]), Type::bool())
            .unwrap_err();
        assert_eq!(err.code(), "REDEFINED_NAME");
    }

    #[test]
    fn versions_and_temps_are_fresh() {
        let mut ctx = Context::default();
        let g = ctx.global;
        let x = ctx.add_sym(g, Id::from("x"), tags(&[]), Type::bool()).unwrap();
        let x1 = ctx.add_version(x);
        let x2 = ctx.add_version(x1);
        assert_eq!(ctx.sym_name(x1), "x#1");
        assert_eq!(ctx.sym_name(x2), "x#2");
        assert_eq!(ctx.root_ancestor(x2), x);
        let t0 = ctx.add_temp(g, "@t");
        let t1 = ctx.add_temp(g, "@t");
        assert_ne!(ctx.sym_name(t0), ctx.sym_name(t1));
        assert!(ctx.sym(t0).is_temp());
    }

    #[test]
    fn reloaded_context_resolves_names() {
        let mut ctx = Context::default();
        let g = ctx.global;
        let f = ctx.add_scope(Id::from("f"), None, scope_tags(&[ScopeTag::Function]));
        let x = ctx
            .add_sym(f, Id::from("x"), tags(&[]), Type::int(16, false))
            .unwrap();
        ctx.config.default_int_width = 24;

        let json = serde_json::to_string(&ctx).unwrap();
        let back: Context = serde_json::from_str(&json).unwrap();
        assert_eq!(back.global, g);
        assert_eq!(back.find_sym(f, Id::from("x")), Some(x));
        assert_eq!(back.sym(x).typ, Type::int(16, false));
        assert_eq!(back.config.default_int_width, 24);
        assert!(back.hdl.scopes.is_empty());
    }
}
