use crate::{ScopeId, SymbolId, Type};
use polyphony_utils::{GetName, Id};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

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
pub enum SymTag {
    Param,
    Return,
    Temp,
    Condition,
    Induction,
    Alias,
    Free,
    Inherited,
    #[strum(serialize = "self")]
    SelfSym,
    Static,
    Predefined,
    Subobject,
    Flattened,
    Field,
    Builtin,
}

/// A name bound in exactly one scope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: Id,
    pub scope: ScopeId,
    pub typ: Type,
    pub tags: BTreeSet<SymTag>,
    /// The symbol this one was versioned or copied from.
    pub ancestor: Option<SymbolId>,
}

impl Symbol {
    pub fn new(name: Id, scope: ScopeId, tags: BTreeSet<SymTag>, typ: Type) -> Self {
        Symbol {
            name,
            scope,
            typ,
            tags,
            ancestor: None,
        }
    }

    pub fn has_tag(&self, tag: SymTag) -> bool {
        self.tags.contains(&tag)
    }

    pub fn add_tag(&mut self, tag: SymTag) {
        self.tags.insert(tag);
    }

    pub fn del_tag(&mut self, tag: SymTag) {
        self.tags.remove(&tag);
    }

    pub fn is_param(&self) -> bool {
        self.has_tag(SymTag::Param)
    }

    pub fn is_return(&self) -> bool {
        self.has_tag(SymTag::Return)
    }

    pub fn is_temp(&self) -> bool {
        self.has_tag(SymTag::Temp)
    }

    pub fn is_condition(&self) -> bool {
        self.has_tag(SymTag::Condition)
    }

    pub fn is_induction(&self) -> bool {
        self.has_tag(SymTag::Induction)
    }

    pub fn is_alias(&self) -> bool {
        self.has_tag(SymTag::Alias)
    }

    pub fn is_field(&self) -> bool {
        self.has_tag(SymTag::Field)
    }

    pub fn is_self(&self) -> bool {
        self.has_tag(SymTag::SelfSym)
    }

    pub fn is_static(&self) -> bool {
        self.has_tag(SymTag::Static)
    }

    /// The user-facing name without an SSA version suffix.
    pub fn orig_name(&self) -> &'static str {
        let name = self.name.as_str();
        match name.find('#') {
            Some(pos) => &name[..pos],
            None => name,
        }
    }

    /// Symbols that keep a single name through SSA construction.
    pub fn is_ssa_ignored(&self) -> bool {
        self.is_condition()
            || self.is_temp()
            || self.is_param()
            || self.is_return()
            || self.is_field()
            || self.is_static()
            || self.typ.is_function()
            || self.typ.is_object()
            || self.typ.is_port()
            || self.typ.is_class()
            || self.typ.is_namespace()
            || self.typ.is_seq()
    }
}

impl GetName for Symbol {
    fn name(&self) -> Id {
        self.name
    }
}

/// Build a tag set from a slice.
pub fn tags(ts: &[SymTag]) -> BTreeSet<SymTag> {
    ts.iter().copied().collect()
}
