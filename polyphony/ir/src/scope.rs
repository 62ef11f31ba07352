//! Scopes: named code units owning symbols and a CFG.
use crate::{
    BlockId, DataFlowGraph, Expr, LoopNestTree, ScopeId, SymbolId, Type,
    UseDefTable,
};
use linked_hash_map::LinkedHashMap;
use polyphony_utils::{GetName, Id, Loc, NameGenerator, idx::IndexedMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub type Scopes = IndexedMap<ScopeId, Scope>;

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum_macros::EnumString,
    strum_macros::Display,
)]
#[strum(serialize_all = "snake_case")]
pub enum ScopeTag {
    Namespace,
    Class,
    Function,
    Method,
    Ctor,
    Worker,
    LoopWorker,
    Module,
    Closure,
    Testbench,
    Lib,
    Pure,
    Typeclass,
    Port,
    Timed,
    Comb,
    Assigned,
    Inlinelib,
    Predicate,
    Builtin,
    /// Produced by module instantiation or worker binding.
    Instantiated,
}

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::EnumString,
    strum_macros::Display,
)]
#[strum(serialize_all = "snake_case")]
pub enum Scheduling {
    #[default]
    Sequential,
    Pipeline,
    Timed,
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum Unroll {
    #[default]
    None,
    Full,
    Factor(u32),
}

/// Synthesis parameters attached to scopes and loop heads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthParams {
    pub scheduling: Scheduling,
    pub unroll: Unroll,
    pub enable_hyperblock: bool,
    /// Initiation interval of a pipelined loop.
    pub ii: u32,
}

impl Default for SynthParams {
    fn default() -> Self {
        SynthParams {
            scheduling: Scheduling::Sequential,
            unroll: Unroll::None,
            enable_hyperblock: true,
            ii: 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub sym: SymbolId,
    pub default: Option<Expr>,
}

/// A worker registered on a module by `append_worker`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    pub scope: ScopeId,
    pub args: Vec<Expr>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scope {
    /// Dotted full name, e.g. `@top.M.worker`.
    pub name: Id,
    pub base_name: Id,
    pub parent: Option<ScopeId>,
    pub tags: BTreeSet<ScopeTag>,
    pub symbols: LinkedHashMap<Id, SymbolId>,
    pub params: Vec<Param>,
    pub return_type: Type,
    pub entry_block: Option<BlockId>,
    pub exit_block: Option<BlockId>,
    pub children: Vec<ScopeId>,
    /// Base classes in resolution order.
    pub bases: Vec<ScopeId>,
    /// The scope this one was cloned from.
    pub origin: Option<ScopeId>,
    #[serde(default)]
    pub synth_params: SynthParams,
    #[serde(default)]
    pub workers: Vec<Worker>,
    #[serde(default)]
    pub block_count: u32,
    #[serde(default)]
    pub loc: Loc,
    #[serde(skip)]
    pub loop_tree: LoopNestTree,
    #[serde(skip)]
    pub usedef: UseDefTable,
    #[serde(skip)]
    pub dfgs: Vec<DataFlowGraph>,
    #[serde(skip)]
    pub namegen: NameGenerator,
}

impl Scope {
    pub fn new(
        name: Id,
        base_name: Id,
        parent: Option<ScopeId>,
        tags: BTreeSet<ScopeTag>,
    ) -> Self {
        Scope {
            name,
            base_name,
            parent,
            tags,
            symbols: LinkedHashMap::new(),
            params: vec![],
            return_type: Type::undef(),
            entry_block: None,
            exit_block: None,
            children: vec![],
            bases: vec![],
            origin: None,
            synth_params: SynthParams::default(),
            workers: vec![],
            block_count: 0,
            loc: Loc::default(),
            loop_tree: LoopNestTree::default(),
            usedef: UseDefTable::default(),
            dfgs: vec![],
            namegen: NameGenerator::default(),
        }
    }

    pub fn has_tag(&self, tag: ScopeTag) -> bool {
        self.tags.contains(&tag)
    }

    pub fn add_tag(&mut self, tag: ScopeTag) {
        self.tags.insert(tag);
    }

    pub fn del_tag(&mut self, tag: ScopeTag) {
        self.tags.remove(&tag);
    }

    pub fn is_namespace(&self) -> bool {
        self.has_tag(ScopeTag::Namespace)
    }

    pub fn is_class(&self) -> bool {
        self.has_tag(ScopeTag::Class)
    }

    pub fn is_module(&self) -> bool {
        self.has_tag(ScopeTag::Module)
    }

    pub fn is_function(&self) -> bool {
        self.has_tag(ScopeTag::Function)
    }

    pub fn is_method(&self) -> bool {
        self.has_tag(ScopeTag::Method)
    }

    pub fn is_ctor(&self) -> bool {
        self.has_tag(ScopeTag::Ctor)
    }

    pub fn is_worker(&self) -> bool {
        self.has_tag(ScopeTag::Worker)
    }

    pub fn is_closure(&self) -> bool {
        self.has_tag(ScopeTag::Closure)
    }

    pub fn is_testbench(&self) -> bool {
        self.has_tag(ScopeTag::Testbench)
    }

    pub fn is_lib(&self) -> bool {
        self.has_tag(ScopeTag::Lib)
    }

    pub fn is_inlinelib(&self) -> bool {
        self.has_tag(ScopeTag::Inlinelib)
    }

    pub fn is_port(&self) -> bool {
        self.has_tag(ScopeTag::Port)
    }

    pub fn is_timed(&self) -> bool {
        self.has_tag(ScopeTag::Timed)
            || self.synth_params.scheduling == crate::Scheduling::Timed
    }

    pub fn is_instantiated(&self) -> bool {
        self.has_tag(ScopeTag::Instantiated)
    }

    /// Scopes with a body that can be invoked.
    pub fn is_callable(&self) -> bool {
        self.is_function()
            || self.is_method()
            || self.is_worker()
            || self.is_ctor()
            || self.is_closure()
    }

    /// Scopes whose call protocol is the ready/valid/accept handshake.
    pub fn has_handshake(&self) -> bool {
        (self.is_function() || self.is_method())
            && !self.is_worker()
            && !self.is_ctor()
    }

    pub fn param_symbols(&self) -> Vec<SymbolId> {
        self.params.iter().map(|p| p.sym).collect()
    }

    pub fn find_local(&self, name: Id) -> Option<SymbolId> {
        self.symbols.get(&name).copied()
    }

    pub fn has_sym(&self, name: Id) -> bool {
        self.symbols.contains_key(&name)
    }
}

impl GetName for Scope {
    fn name(&self) -> Id {
        self.name
    }
}

/// Build a tag set from a slice.
pub fn scope_tags(ts: &[ScopeTag]) -> BTreeSet<ScopeTag> {
    ts.iter().copied().collect()
}

/// Whether `sub` inherits (transitively) from `sup`.
pub fn is_subclassof(scopes: &Scopes, sub: ScopeId, sup: ScopeId) -> bool {
    if sub == sup {
        return true;
    }
    scopes[sub]
        .bases
        .iter()
        .any(|b| is_subclassof(scopes, *b, sup))
}

/// Whether `a` appears on the clone-origin chain of `b`.
pub fn is_origin_of(scopes: &Scopes, a: ScopeId, b: ScopeId) -> bool {
    let mut cur = Some(b);
    while let Some(s) = cur {
        if s == a {
            return true;
        }
        cur = scopes[s].origin;
    }
    false
}

/// Object assignability: same scope, subclass, or one is a clone of the
/// other.
pub fn is_assignable_object(scopes: &Scopes, lhs: ScopeId, rhs: ScopeId) -> bool {
    lhs == rhs
        || is_subclassof(scopes, rhs, lhs)
        || is_origin_of(scopes, lhs, rhs)
        || is_origin_of(scopes, rhs, lhs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subclass_and_clone_assignability() {
        let mut scopes = Scopes::new();
        let base = scopes.push(Scope::new(
            Id::from("B"),
            Id::from("B"),
            None,
            scope_tags(&[ScopeTag::Class]),
        ));
        let mut derived =
            Scope::new(Id::from("D"), Id::from("D"), None, scope_tags(&[ScopeTag::Class]));
        derived.bases.push(base);
        let derived = scopes.push(derived);
        let mut clone = Scope::new(
            Id::from("B_0"),
            Id::from("B_0"),
            None,
            scope_tags(&[ScopeTag::Class]),
        );
        clone.origin = Some(base);
        let clone = scopes.push(clone);
        assert!(is_assignable_object(&scopes, base, derived));
        assert!(!is_assignable_object(&scopes, derived, base));
        assert!(is_assignable_object(&scopes, base, clone));
        assert!(is_assignable_object(&scopes, clone, base));
        assert!(
            Type::object(base).can_assign(&Type::object(derived), &scopes)
        );
    }
}
