//! The type lattice of the high-level IR.
use crate::{Expr, ScopeId, Scopes, SymbolId, scope};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of a list type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Length {
    /// Unknown until propagation fills it in.
    Any,
    Fixed(u32),
    /// A length given by an expression that is evaluated once its free
    /// symbols are bound to constants.
    Expr(Box<Expr>),
}

impl Length {
    pub fn fixed(&self) -> Option<u32> {
        match self {
            Length::Fixed(n) => Some(*n),
            _ => None,
        }
    }

    fn compatible(&self, rhs: &Length) -> bool {
        match (self, rhs) {
            (Length::Fixed(l), Length::Fixed(r)) => l == r,
            _ => true,
        }
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    In,
    Out,
    Any,
}

/// Ports are plain wires or registers; channels are FIFOs with a capacity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortKind {
    Port,
    Channel { capacity: u32 },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortAttrs {
    pub dtype: Box<Type>,
    pub direction: Direction,
    pub init: Option<i64>,
    pub assigned: bool,
    pub root_symbol: Option<SymbolId>,
    pub kind: PortKind,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TypeKind {
    Undef,
    Int {
        width: u32,
        signed: bool,
    },
    Bool,
    Str,
    None,
    List {
        elm: Box<Type>,
        length: Length,
        ro: bool,
    },
    Tuple {
        elm: Box<Type>,
        length: u32,
    },
    /// An object of a class. A `None` scope is a blank slot that accepts
    /// any object.
    Object {
        scope: Option<ScopeId>,
    },
    Class {
        scope: Option<ScopeId>,
    },
    Function {
        scope: Option<ScopeId>,
        ret: Box<Type>,
        params: Vec<Type>,
    },
    Namespace {
        scope: ScopeId,
    },
    Port {
        scope: Option<ScopeId>,
        attrs: PortAttrs,
    },
    /// A type given by an expression, resolved by the type evaluator.
    Expr(Box<Expr>),
}

/// A type with the flag recording whether the user wrote it down.
/// Explicit types are never changed by propagation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Type {
    pub kind: TypeKind,
    pub explicit: bool,
}

impl Default for Type {
    fn default() -> Self {
        Type::undef()
    }
}

impl Type {
    fn implicit(kind: TypeKind) -> Self {
        Type {
            kind,
            explicit: false,
        }
    }

    pub fn undef() -> Self {
        Self::implicit(TypeKind::Undef)
    }

    pub fn int(width: u32, signed: bool) -> Self {
        Self::implicit(TypeKind::Int { width, signed })
    }

    pub fn bool() -> Self {
        Self::implicit(TypeKind::Bool)
    }

    pub fn str() -> Self {
        Self::implicit(TypeKind::Str)
    }

    pub fn none() -> Self {
        Self::implicit(TypeKind::None)
    }

    pub fn list(elm: Type, length: Length) -> Self {
        Self::implicit(TypeKind::List {
            elm: Box::new(elm),
            length,
            ro: false,
        })
    }

    pub fn tuple(elm: Type, length: u32) -> Self {
        Self::implicit(TypeKind::Tuple {
            elm: Box::new(elm),
            length,
        })
    }

    pub fn object(scope: ScopeId) -> Self {
        Self::implicit(TypeKind::Object { scope: Some(scope) })
    }

    pub fn class(scope: ScopeId) -> Self {
        Self::implicit(TypeKind::Class { scope: Some(scope) })
    }

    pub fn function(scope: ScopeId, ret: Type, params: Vec<Type>) -> Self {
        Self::implicit(TypeKind::Function {
            scope: Some(scope),
            ret: Box::new(ret),
            params,
        })
    }

    pub fn namespace(scope: ScopeId) -> Self {
        Self::implicit(TypeKind::Namespace { scope })
    }

    pub fn port(scope: Option<ScopeId>, attrs: PortAttrs) -> Self {
        Self::implicit(TypeKind::Port { scope, attrs })
    }

    pub fn expr(e: Expr) -> Self {
        Self::implicit(TypeKind::Expr(Box::new(e)))
    }

    /// Returns a copy with the explicit flag set to `explicit`.
    pub fn with_explicit(mut self, explicit: bool) -> Self {
        self.explicit = explicit;
        self
    }

    /// Returns a copy with the list length replaced.
    pub fn with_length(mut self, len: Length) -> Self {
        if let TypeKind::List { length, .. } = &mut self.kind {
            *length = len;
        }
        self
    }

    /// Returns a copy with the int width replaced.
    pub fn with_width(mut self, w: u32) -> Self {
        if let TypeKind::Int { width, .. } = &mut self.kind {
            *width = w;
        }
        self
    }

    pub fn with_readonly(mut self, readonly: bool) -> Self {
        if let TypeKind::List { ro, .. } = &mut self.kind {
            *ro = readonly;
        }
        self
    }

    pub fn is_undef(&self) -> bool {
        matches!(self.kind, TypeKind::Undef)
    }

    pub fn is_int(&self) -> bool {
        matches!(self.kind, TypeKind::Int { .. })
    }

    pub fn is_bool(&self) -> bool {
        matches!(self.kind, TypeKind::Bool)
    }

    pub fn is_str(&self) -> bool {
        matches!(self.kind, TypeKind::Str)
    }

    pub fn is_none(&self) -> bool {
        matches!(self.kind, TypeKind::None)
    }

    /// Ints and bools: things that fit in a single register.
    pub fn is_scalar(&self) -> bool {
        self.is_int() || self.is_bool()
    }

    pub fn is_list(&self) -> bool {
        matches!(self.kind, TypeKind::List { .. })
    }

    pub fn is_tuple(&self) -> bool {
        matches!(self.kind, TypeKind::Tuple { .. })
    }

    pub fn is_seq(&self) -> bool {
        self.is_list() || self.is_tuple()
    }

    pub fn is_object(&self) -> bool {
        matches!(self.kind, TypeKind::Object { .. })
    }

    pub fn is_class(&self) -> bool {
        matches!(self.kind, TypeKind::Class { .. })
    }

    pub fn is_function(&self) -> bool {
        matches!(self.kind, TypeKind::Function { .. })
    }

    pub fn is_namespace(&self) -> bool {
        matches!(self.kind, TypeKind::Namespace { .. })
    }

    pub fn is_port(&self) -> bool {
        matches!(self.kind, TypeKind::Port { .. })
    }

    pub fn is_channel(&self) -> bool {
        matches!(
            self.kind,
            TypeKind::Port {
                attrs: PortAttrs {
                    kind: PortKind::Channel { .. },
                    ..
                },
                ..
            }
        )
    }

    pub fn is_expr(&self) -> bool {
        matches!(self.kind, TypeKind::Expr(_))
    }

    /// Types whose values live in hardware as shared containers rather than
    /// copied values.
    pub fn is_containable(&self) -> bool {
        self.is_object() || self.is_port() || self.is_seq()
    }

    /// The scope this type refers to, if any.
    pub fn scope(&self) -> Option<ScopeId> {
        match &self.kind {
            TypeKind::Object { scope }
            | TypeKind::Class { scope }
            | TypeKind::Function { scope, .. }
            | TypeKind::Port { scope, .. } => *scope,
            TypeKind::Namespace { scope } => Some(*scope),
            _ => None,
        }
    }

    pub fn set_scope(&mut self, new: ScopeId) {
        match &mut self.kind {
            TypeKind::Object { scope }
            | TypeKind::Class { scope }
            | TypeKind::Function { scope, .. }
            | TypeKind::Port { scope, .. } => *scope = Some(new),
            TypeKind::Namespace { scope } => *scope = new,
            _ => (),
        }
    }

    /// Bit width of a value of this type. Lists report their element width.
    pub fn width(&self) -> Option<u32> {
        match &self.kind {
            TypeKind::Int { width, .. } => Some(*width),
            TypeKind::Bool => Some(1),
            TypeKind::List { elm, .. } | TypeKind::Tuple { elm, .. } => {
                elm.width()
            }
            TypeKind::Port { attrs, .. } => attrs.dtype.width(),
            _ => None,
        }
    }

    pub fn signed(&self) -> bool {
        match &self.kind {
            TypeKind::Int { signed, .. } => *signed,
            TypeKind::List { elm, .. } | TypeKind::Tuple { elm, .. } => {
                elm.signed()
            }
            TypeKind::Port { attrs, .. } => attrs.dtype.signed(),
            _ => false,
        }
    }

    pub fn element(&self) -> Option<&Type> {
        match &self.kind {
            TypeKind::List { elm, .. } | TypeKind::Tuple { elm, .. } => {
                Some(elm)
            }
            _ => None,
        }
    }

    /// Number of elements of a sequence type when statically known.
    pub fn length(&self) -> Option<u32> {
        match &self.kind {
            TypeKind::List { length, .. } => length.fixed(),
            TypeKind::Tuple { length, .. } => Some(*length),
            _ => None,
        }
    }

    pub fn is_readonly(&self) -> bool {
        matches!(self.kind, TypeKind::List { ro: true, .. })
    }

    pub fn port_attrs(&self) -> Option<&PortAttrs> {
        match &self.kind {
            TypeKind::Port { attrs, .. } => Some(attrs),
            _ => None,
        }
    }

    pub fn port_attrs_mut(&mut self) -> Option<&mut PortAttrs> {
        match &mut self.kind {
            TypeKind::Port { attrs, .. } => Some(attrs),
            _ => None,
        }
    }

    pub fn return_type(&self) -> Option<&Type> {
        match &self.kind {
            TypeKind::Function { ret, .. } => Some(ret),
            _ => None,
        }
    }

    /// Rewrite the scopes and symbols this type refers to, recursively.
    pub fn remap<FS, FC>(&mut self, fsym: &FS, fscope: &FC)
    where
        FS: Fn(SymbolId) -> Option<SymbolId>,
        FC: Fn(ScopeId) -> Option<ScopeId>,
    {
        if let Some(new) = self.scope().and_then(fscope) {
            self.set_scope(new);
        }
        match &mut self.kind {
            TypeKind::List { elm, length, .. } => {
                elm.remap(fsym, fscope);
                if let Length::Expr(e) = length {
                    e.rename_syms(fsym);
                }
            }
            TypeKind::Tuple { elm, .. } => elm.remap(fsym, fscope),
            TypeKind::Function { ret, params, .. } => {
                ret.remap(fsym, fscope);
                params.iter_mut().for_each(|p| p.remap(fsym, fscope));
            }
            TypeKind::Port { attrs, .. } => {
                attrs.dtype.remap(fsym, fscope);
                if let Some(root) = attrs.root_symbol.and_then(fsym) {
                    attrs.root_symbol = Some(root);
                }
            }
            TypeKind::Expr(e) => e.rename_syms(fsym),
            _ => (),
        }
    }

    /// Whether a value of type `rhs` may be stored into a location of this
    /// type.
    pub fn can_assign(&self, rhs: &Type, scopes: &Scopes) -> bool {
        use TypeKind as T;
        match (&self.kind, &rhs.kind) {
            (T::Undef, _) | (_, T::Undef) => true,
            (T::Expr(_), _) | (_, T::Expr(_)) => true,
            (T::Int { .. } | T::Bool, T::Int { .. } | T::Bool) => true,
            (T::Str, T::Str) | (T::None, T::None) => true,
            (
                T::List {
                    elm: le,
                    length: ll,
                    ..
                },
                T::List {
                    elm: re,
                    length: rl,
                    ..
                },
            ) => le.can_assign(re, scopes) && ll.compatible(rl),
            (
                T::Tuple {
                    elm: le,
                    length: ll,
                },
                T::Tuple {
                    elm: re,
                    length: rl,
                },
            ) => ll == rl && le.can_assign(re, scopes),
            (T::Object { scope: l }, T::Object { scope: r }) => match (l, r) {
                (Some(l), Some(r)) => {
                    scope::is_assignable_object(scopes, *l, *r)
                }
                _ => true,
            },
            (T::Class { scope: l }, T::Class { scope: r })
            | (T::Function { scope: l, .. }, T::Function { scope: r, .. }) => {
                l.is_none() || l == r
            }
            (T::Namespace { scope: l }, T::Namespace { scope: r }) => l == r,
            (
                T::Port { scope: l, attrs: la },
                T::Port { scope: r, attrs: ra },
            ) => {
                (l.is_none() || l == r)
                    && la.kind == ra.kind
                    && la.dtype.can_assign(&ra.dtype, scopes)
            }
            _ => false,
        }
    }

    /// Combine with the type of a value assigned into this location.
    /// Explicit types keep their shape; list lengths that are still unknown
    /// are filled in from `rhs`. Otherwise `rhs` wins when assignable.
    pub fn propagate(&self, rhs: &Type, scopes: &Scopes) -> Type {
        if rhs.is_undef() {
            return self.clone();
        }
        if self.explicit {
            return match (&self.kind, &rhs.kind) {
                (
                    TypeKind::List { elm, length, ro },
                    TypeKind::List {
                        elm: relm,
                        length: rlength,
                        ..
                    },
                ) => {
                    let length = match length {
                        Length::Any => rlength.clone(),
                        _ => length.clone(),
                    };
                    Type {
                        kind: TypeKind::List {
                            elm: Box::new(elm.propagate(relm, scopes)),
                            length,
                            ro: *ro,
                        },
                        explicit: true,
                    }
                }
                _ => self.clone(),
            };
        }
        if self.can_assign(rhs, scopes) {
            rhs.clone().with_explicit(false)
        } else {
            self.clone()
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TypeKind::Undef => write!(f, "undef"),
            TypeKind::Int { width, signed } => {
                write!(f, "{}{}", if *signed { "int" } else { "bit" }, width)
            }
            TypeKind::Bool => write!(f, "bool"),
            TypeKind::Str => write!(f, "str"),
            TypeKind::None => write!(f, "none"),
            TypeKind::List { elm, length, .. } => match length {
                Length::Fixed(n) => write!(f, "list<{elm}>[{n}]"),
                Length::Any => write!(f, "list<{elm}>"),
                Length::Expr(_) => write!(f, "list<{elm}>[?]"),
            },
            TypeKind::Tuple { elm, length } => {
                write!(f, "tuple<{elm}>[{length}]")
            }
            TypeKind::Object { scope } => write_scoped(f, "object", scope),
            TypeKind::Class { scope } => write_scoped(f, "class", scope),
            TypeKind::Function { scope, .. } => {
                write_scoped(f, "function", scope)
            }
            TypeKind::Namespace { scope } => write!(f, "namespace({scope})"),
            TypeKind::Port { attrs, .. } => match attrs.kind {
                PortKind::Port => {
                    write!(f, "port<{}, {}>", attrs.dtype, attrs.direction)
                }
                PortKind::Channel { capacity } => {
                    write!(f, "channel<{}>[{}]", attrs.dtype, capacity)
                }
            },
            TypeKind::Expr(_) => write!(f, "expr"),
        }
    }
}

fn write_scoped(
    f: &mut fmt::Formatter<'_>,
    kind: &str,
    scope: &Option<ScopeId>,
) -> fmt::Result {
    match scope {
        Some(s) => write!(f, "{kind}({s})"),
        None => write!(f, "{kind}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Const;
    use proptest::prelude::*;

    fn scopes() -> Scopes {
        Scopes::new()
    }

    #[test]
    fn int_accepts_bool_and_int() {
        let s = scopes();
        assert!(Type::int(8, true).can_assign(&Type::bool(), &s));
        assert!(Type::int(8, true).can_assign(&Type::int(32, true), &s));
        assert!(!Type::int(8, true).can_assign(&Type::str(), &s));
    }

    #[test]
    fn explicit_width_is_kept() {
        let s = scopes();
        let lhs = Type::int(8, true).with_explicit(true);
        assert_eq!(lhs.propagate(&Type::int(32, true), &s), lhs);
    }

    #[test]
    fn explicit_list_takes_rhs_length_when_any() {
        let s = scopes();
        let lhs = Type::list(Type::int(8, true).with_explicit(true), Length::Any)
            .with_explicit(true);
        let rhs = Type::list(Type::int(32, true), Length::Fixed(4));
        let t = lhs.propagate(&rhs, &s);
        assert!(t.explicit);
        assert_eq!(t.length(), Some(4));
        assert_eq!(t.width(), Some(8));
    }

    #[test]
    fn fixed_lengths_must_match() {
        let s = scopes();
        let a = Type::list(Type::int(8, true), Length::Fixed(4));
        let b = Type::list(Type::int(8, true), Length::Fixed(5));
        let e = Type::list(
            Type::int(8, true),
            Length::Expr(Box::new(Expr::Const(Const::Int(4)))),
        );
        assert!(!a.can_assign(&b, &s));
        assert!(a.can_assign(&e, &s));
    }

    #[test]
    fn undef_rhs_does_not_erase() {
        let s = scopes();
        let t = Type::int(16, false);
        assert_eq!(t.propagate(&Type::undef(), &s), t);
    }

    fn arb_scalar() -> impl Strategy<Value = Type> {
        prop_oneof![
            Just(Type::undef()),
            Just(Type::bool()),
            Just(Type::str()),
            Just(Type::none()),
            (1u32..65, any::<bool>()).prop_map(|(w, s)| Type::int(w, s)),
        ]
    }

    fn arb_type() -> impl Strategy<Value = Type> {
        let leaf = (arb_scalar(), any::<bool>())
            .prop_map(|(t, e)| t.with_explicit(e));
        leaf.prop_recursive(2, 8, 2, |inner| {
            (inner, prop_oneof![Just(Length::Any), (1u32..8).prop_map(Length::Fixed)], any::<bool>())
                .prop_map(|(elm, len, e)| Type::list(elm, len).with_explicit(e))
        })
    }

    proptest! {
        #[test]
        fn propagate_is_idempotent(lhs in arb_type(), rhs in arb_type()) {
            let s = scopes();
            let once = lhs.propagate(&rhs, &s);
            let twice = once.propagate(&rhs, &s);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn propagate_keeps_explicit_flag(lhs in arb_type(), rhs in arb_type()) {
            let s = scopes();
            prop_assert_eq!(lhs.propagate(&rhs, &s).explicit, lhs.explicit);
        }

        #[test]
        fn assignability_is_reflexive(t in arb_type()) {
            let s = scopes();
            prop_assert!(t.can_assign(&t, &s));
        }
    }
}
