//! Expressions of the high-level IR.
use crate::{ScopeId, SymbolId};
use polyphony_utils::Id;
use serde::{Deserialize, Serialize};

/// Whether a variable occurrence reads or writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ctx {
    Load,
    Store,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Const {
    Int(i64),
    Bool(bool),
    Str(String),
    None,
}

impl Const {
    /// Integer view of a constant; bools are 0 or 1.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Const::Int(i) => Some(*i),
            Const::Bool(b) => Some(*b as i64),
            _ => None,
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
    strum_macros::AsRefStr,
)]
pub enum UnOpKind {
    #[strum(serialize = "-")]
    USub,
    #[strum(serialize = "+")]
    UAdd,
    #[strum(serialize = "!")]
    Not,
    #[strum(serialize = "~")]
    Invert,
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
    strum_macros::AsRefStr,
)]
pub enum BinOpKind {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mult,
    #[strum(serialize = "//")]
    FloorDiv,
    #[strum(serialize = "%")]
    Mod,
    #[strum(serialize = "<<")]
    LShift,
    #[strum(serialize = ">>")]
    RShift,
    #[strum(serialize = "|")]
    BitOr,
    #[strum(serialize = "^")]
    BitXor,
    #[strum(serialize = "&")]
    BitAnd,
}

impl BinOpKind {
    pub fn eval(&self, l: i64, r: i64) -> Option<i64> {
        Some(match self {
            BinOpKind::Add => l.wrapping_add(r),
            BinOpKind::Sub => l.wrapping_sub(r),
            BinOpKind::Mult => l.wrapping_mul(r),
            BinOpKind::FloorDiv => {
                if r == 0 {
                    return None;
                }
                l.div_euclid(r)
            }
            BinOpKind::Mod => {
                if r == 0 {
                    return None;
                }
                l.rem_euclid(r)
            }
            BinOpKind::LShift => l.checked_shl(u32::try_from(r).ok()?)?,
            BinOpKind::RShift => l.checked_shr(u32::try_from(r).ok()?)?,
            BinOpKind::BitOr => l | r,
            BinOpKind::BitXor => l ^ r,
            BinOpKind::BitAnd => l & r,
        })
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
    strum_macros::AsRefStr,
)]
pub enum RelOpKind {
    #[strum(serialize = "&&")]
    And,
    #[strum(serialize = "||")]
    Or,
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    NotEq,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    LtE,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    GtE,
    #[strum(serialize = "is")]
    Is,
    #[strum(serialize = "is not")]
    IsNot,
}

impl RelOpKind {
    pub fn eval(&self, l: i64, r: i64) -> bool {
        match self {
            RelOpKind::And => l != 0 && r != 0,
            RelOpKind::Or => l != 0 || r != 0,
            RelOpKind::Eq | RelOpKind::Is => l == r,
            RelOpKind::NotEq | RelOpKind::IsNot => l != r,
            RelOpKind::Lt => l < r,
            RelOpKind::LtE => l <= r,
            RelOpKind::Gt => l > r,
            RelOpKind::GtE => l >= r,
        }
    }

    /// The relation that holds when this one does not.
    pub fn negate(&self) -> Option<RelOpKind> {
        Some(match self {
            RelOpKind::Eq => RelOpKind::NotEq,
            RelOpKind::NotEq => RelOpKind::Eq,
            RelOpKind::Lt => RelOpKind::GtE,
            RelOpKind::GtE => RelOpKind::Lt,
            RelOpKind::Gt => RelOpKind::LtE,
            RelOpKind::LtE => RelOpKind::Gt,
            RelOpKind::Is => RelOpKind::IsNot,
            RelOpKind::IsNot => RelOpKind::Is,
            RelOpKind::And | RelOpKind::Or => return None,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Const(Const),
    Temp {
        sym: SymbolId,
        ctx: Ctx,
    },
    /// Attribute access `exp.attr`; `attr` is a symbol of the object's class.
    Attr {
        exp: Box<Expr>,
        attr: SymbolId,
        ctx: Ctx,
    },
    UnOp {
        op: UnOpKind,
        exp: Box<Expr>,
    },
    BinOp {
        op: BinOpKind,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    RelOp {
        op: RelOpKind,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    CondOp {
        cond: Box<Expr>,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
    },
    New {
        scope: ScopeId,
        args: Vec<Expr>,
    },
    Syscall {
        name: Id,
        args: Vec<Expr>,
    },
    MRef {
        mem: Box<Expr>,
        offset: Box<Expr>,
        ctx: Ctx,
    },
    MStore {
        mem: Box<Expr>,
        offset: Box<Expr>,
        exp: Box<Expr>,
    },
    Array {
        items: Vec<Expr>,
        repeat: Box<Expr>,
        mutable: bool,
    },
}

impl Expr {
    pub fn int(i: i64) -> Expr {
        Expr::Const(Const::Int(i))
    }

    pub fn bool(b: bool) -> Expr {
        Expr::Const(Const::Bool(b))
    }

    pub fn str<S: ToString>(s: S) -> Expr {
        Expr::Const(Const::Str(s.to_string()))
    }

    pub fn temp(sym: SymbolId) -> Expr {
        Expr::Temp {
            sym,
            ctx: Ctx::Load,
        }
    }

    pub fn store(sym: SymbolId) -> Expr {
        Expr::Temp {
            sym,
            ctx: Ctx::Store,
        }
    }

    pub fn attr(exp: Expr, attr: SymbolId, ctx: Ctx) -> Expr {
        Expr::Attr {
            exp: Box::new(exp),
            attr,
            ctx,
        }
    }

    pub fn unop(op: UnOpKind, exp: Expr) -> Expr {
        Expr::UnOp {
            op,
            exp: Box::new(exp),
        }
    }

    pub fn binop(op: BinOpKind, left: Expr, right: Expr) -> Expr {
        Expr::BinOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn relop(op: RelOpKind, left: Expr, right: Expr) -> Expr {
        Expr::RelOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn condop(cond: Expr, left: Expr, right: Expr) -> Expr {
        Expr::CondOp {
            cond: Box::new(cond),
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn call(func: Expr, args: Vec<Expr>) -> Expr {
        Expr::Call {
            func: Box::new(func),
            args,
        }
    }

    pub fn syscall<S: Into<Id>>(name: S, args: Vec<Expr>) -> Expr {
        Expr::Syscall {
            name: name.into(),
            args,
        }
    }

    pub fn mref(mem: Expr, offset: Expr) -> Expr {
        Expr::MRef {
            mem: Box::new(mem),
            offset: Box::new(offset),
            ctx: Ctx::Load,
        }
    }

    pub fn mstore(mem: Expr, offset: Expr, exp: Expr) -> Expr {
        Expr::MStore {
            mem: Box::new(mem),
            offset: Box::new(offset),
            exp: Box::new(exp),
        }
    }

    pub fn array(items: Vec<Expr>, repeat: Expr) -> Expr {
        Expr::Array {
            items,
            repeat: Box::new(repeat),
            mutable: true,
        }
    }

    /// Logical conjunction that folds away constant `true` operands.
    pub fn and(left: Expr, right: Expr) -> Expr {
        match (left.as_int(), right.as_int()) {
            (Some(l), _) if l != 0 => right,
            (_, Some(r)) if r != 0 => left,
            _ => Expr::relop(RelOpKind::And, left, right),
        }
    }

    /// Logical negation; relational operators are flipped in place.
    pub fn not(exp: Expr) -> Expr {
        match exp {
            Expr::Const(c) => match c.as_int() {
                Some(i) => Expr::bool(i == 0),
                None => Expr::unop(UnOpKind::Not, Expr::Const(c)),
            },
            Expr::UnOp {
                op: UnOpKind::Not,
                exp,
            } => *exp,
            Expr::RelOp { op, left, right } => match op.negate() {
                Some(neg) => Expr::RelOp {
                    op: neg,
                    left,
                    right,
                },
                None => Expr::unop(
                    UnOpKind::Not,
                    Expr::RelOp { op, left, right },
                ),
            },
            e => Expr::unop(UnOpKind::Not, e),
        }
    }

    pub fn is_const(&self) -> bool {
        matches!(self, Expr::Const(_))
    }

    /// Integer value of a constant expression.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Expr::Const(c) => c.as_int(),
            _ => None,
        }
    }

    pub fn is_temp(&self) -> bool {
        matches!(self, Expr::Temp { .. })
    }

    pub fn is_var(&self) -> bool {
        matches!(self, Expr::Temp { .. } | Expr::Attr { .. })
    }

    /// Constants and variables.
    pub fn is_leaf(&self) -> bool {
        self.is_const() || self.is_var()
    }

    /// The symbol named by a variable: the temp itself or the attribute.
    pub fn symbol(&self) -> Option<SymbolId> {
        match self {
            Expr::Temp { sym, .. } => Some(*sym),
            Expr::Attr { attr, .. } => Some(*attr),
            _ => None,
        }
    }

    /// The innermost symbol of an attribute chain.
    pub fn head_symbol(&self) -> Option<SymbolId> {
        match self {
            Expr::Temp { sym, .. } => Some(*sym),
            Expr::Attr { exp, .. } => exp.head_symbol(),
            _ => None,
        }
    }

    /// `self.a.b` yields `[self, a, b]`.
    pub fn qualified_symbol(&self) -> Vec<SymbolId> {
        match self {
            Expr::Temp { sym, .. } => vec![*sym],
            Expr::Attr { exp, attr, .. } => {
                let mut qs = exp.qualified_symbol();
                qs.push(*attr);
                qs
            }
            _ => vec![],
        }
    }

    pub fn ctx(&self) -> Option<Ctx> {
        match self {
            Expr::Temp { ctx, .. }
            | Expr::Attr { ctx, .. }
            | Expr::MRef { ctx, .. } => Some(*ctx),
            _ => None,
        }
    }

    pub fn set_ctx(&mut self, new: Ctx) {
        match self {
            Expr::Temp { ctx, .. }
            | Expr::Attr { ctx, .. }
            | Expr::MRef { ctx, .. } => *ctx = new,
            _ => (),
        }
    }

    /// A copy of this expression with the given context.
    pub fn with_ctx(mut self, ctx: Ctx) -> Self {
        self.set_ctx(ctx);
        self
    }

    /// Direct sub-expressions in evaluation order.
    pub fn kids(&self) -> Vec<&Expr> {
        match self {
            Expr::Const(_) | Expr::Temp { .. } => vec![],
            Expr::Attr { exp, .. } | Expr::UnOp { exp, .. } => vec![&**exp],
            Expr::BinOp { left, right, .. }
            | Expr::RelOp { left, right, .. } => vec![&**left, &**right],
            Expr::CondOp { cond, left, right } => {
                vec![&**cond, &**left, &**right]
            }
            Expr::Call { func, args } => {
                std::iter::once(&**func).chain(args.iter()).collect()
            }
            Expr::New { args, .. } | Expr::Syscall { args, .. } => {
                args.iter().collect()
            }
            Expr::MRef { mem, offset, .. } => vec![&**mem, &**offset],
            Expr::MStore { mem, offset, exp } => {
                vec![&**mem, &**offset, &**exp]
            }
            Expr::Array { items, repeat, .. } => {
                items.iter().chain(std::iter::once(&**repeat)).collect()
            }
        }
    }

    pub fn kids_mut(&mut self) -> Vec<&mut Expr> {
        match self {
            Expr::Const(_) | Expr::Temp { .. } => vec![],
            Expr::Attr { exp, .. } | Expr::UnOp { exp, .. } => {
                vec![&mut **exp]
            }
            Expr::BinOp { left, right, .. }
            | Expr::RelOp { left, right, .. } => {
                vec![&mut **left, &mut **right]
            }
            Expr::CondOp { cond, left, right } => {
                vec![&mut **cond, &mut **left, &mut **right]
            }
            Expr::Call { func, args } => std::iter::once(&mut **func)
                .chain(args.iter_mut())
                .collect(),
            Expr::New { args, .. } | Expr::Syscall { args, .. } => {
                args.iter_mut().collect()
            }
            Expr::MRef { mem, offset, .. } => vec![&mut **mem, &mut **offset],
            Expr::MStore { mem, offset, exp } => {
                vec![&mut **mem, &mut **offset, &mut **exp]
            }
            Expr::Array { items, repeat, .. } => items
                .iter_mut()
                .chain(std::iter::once(&mut **repeat))
                .collect(),
        }
    }

    /// Every variable occurrence, outermost first. An attribute counts as a
    /// variable and its receiver is visited as well.
    pub fn vars(&self) -> Vec<&Expr> {
        let mut out = vec![];
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars<'a>(&'a self, out: &mut Vec<&'a Expr>) {
        match self {
            Expr::Temp { .. } => out.push(self),
            Expr::Attr { exp, .. } => {
                out.push(self);
                exp.collect_vars(out);
            }
            _ => {
                for k in self.kids() {
                    k.collect_vars(out);
                }
            }
        }
    }

    /// Variable occurrences whose qualified symbol is `qsym`.
    pub fn find_vars(&self, qsym: &[SymbolId]) -> Vec<&Expr> {
        self.vars()
            .into_iter()
            .filter(|v| v.qualified_symbol() == qsym)
            .collect()
    }

    /// All sub-expressions (including this one) satisfying `pred`, pre-order.
    pub fn find_exprs<F>(&self, pred: F) -> Vec<&Expr>
    where
        F: Fn(&Expr) -> bool,
    {
        let mut out = vec![];
        self.find_exprs_rec(&pred, &mut out);
        out
    }

    fn find_exprs_rec<'a, F>(&'a self, pred: &F, out: &mut Vec<&'a Expr>)
    where
        F: Fn(&Expr) -> bool,
    {
        if pred(self) {
            out.push(self);
        }
        for k in self.kids() {
            k.find_exprs_rec(pred, out);
        }
    }

    /// Replace the first sub-expression structurally equal to `old`,
    /// searching depth first. Returns whether a replacement happened.
    pub fn replace(&mut self, old: &Expr, new: &Expr) -> bool {
        for k in self.kids_mut() {
            if k == old {
                *k = new.clone();
                return true;
            }
            if k.replace(old, new) {
                return true;
            }
        }
        false
    }

    /// Replace every loaded occurrence of temp `sym` with `new`. Returns the
    /// number of replacements.
    pub fn replace_uses(&mut self, sym: SymbolId, new: &Expr) -> usize {
        if let Expr::Temp {
            sym: s,
            ctx: Ctx::Load,
        } = self
        {
            if *s == sym {
                *self = new.clone();
                return 1;
            }
            return 0;
        }
        self.kids_mut()
            .into_iter()
            .map(|k| k.replace_uses(sym, new))
            .sum()
    }

    /// Rename symbols in place using `f`, in both load and store position.
    pub fn rename_syms<F>(&mut self, f: &F)
    where
        F: Fn(SymbolId) -> Option<SymbolId>,
    {
        match self {
            Expr::Temp { sym, .. } => {
                if let Some(n) = f(*sym) {
                    *sym = n;
                }
            }
            Expr::Attr { exp, attr, .. } => {
                if let Some(n) = f(*attr) {
                    *attr = n;
                }
                exp.rename_syms(f);
            }
            _ => {
                for k in self.kids_mut() {
                    k.rename_syms(f);
                }
            }
        }
    }

    /// Whether evaluating this expression may have effects beyond producing
    /// its value.
    pub fn has_side_effect(&self) -> bool {
        match self {
            Expr::Call { .. }
            | Expr::New { .. }
            | Expr::Syscall { .. }
            | Expr::MStore { .. } => true,
            _ => self.kids().iter().any(|k| k.has_side_effect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyphony_utils::idx::IndexRef;

    fn sym(i: usize) -> SymbolId {
        SymbolId::new(i)
    }

    #[test]
    fn replace_rewrites_first_match_only() {
        let a = Expr::temp(sym(0));
        let mut e =
            Expr::binop(BinOpKind::Add, a.clone(), Expr::binop(BinOpKind::Mult, a.clone(), a.clone()));
        assert!(e.replace(&a, &Expr::int(1)));
        let Expr::BinOp { left, right, .. } = &e else {
            panic!("shape changed")
        };
        assert_eq!(**left, Expr::int(1));
        assert_eq!(right.find_vars(&[sym(0)]).len(), 2);
    }

    #[test]
    fn qualified_symbols_of_attribute_chains() {
        let e = Expr::attr(
            Expr::attr(Expr::temp(sym(0)), sym(1), Ctx::Load),
            sym(2),
            Ctx::Store,
        );
        assert_eq!(e.qualified_symbol(), vec![sym(0), sym(1), sym(2)]);
        assert_eq!(e.head_symbol(), Some(sym(0)));
        assert_eq!(e.symbol(), Some(sym(2)));
        assert_eq!(e.vars().len(), 3);
    }

    #[test]
    fn replace_uses_skips_stores() {
        let mut e = Expr::mstore(
            Expr::temp(sym(3)),
            Expr::temp(sym(1)),
            Expr::binop(BinOpKind::Add, Expr::temp(sym(1)), Expr::int(2)),
        );
        assert_eq!(e.replace_uses(sym(1), &Expr::int(7)), 2);
        assert!(e.has_side_effect());
        let mut st = Expr::store(sym(1));
        assert_eq!(st.replace_uses(sym(1), &Expr::int(7)), 0);
    }

    #[test]
    fn negation_flips_relations() {
        let lt = Expr::relop(RelOpKind::Lt, Expr::temp(sym(0)), Expr::int(4));
        let Expr::RelOp { op, .. } = Expr::not(lt) else {
            panic!("not a relop")
        };
        assert_eq!(op, RelOpKind::GtE);
        assert_eq!(Expr::not(Expr::bool(true)), Expr::bool(false));
        assert_eq!(Expr::and(Expr::bool(true), Expr::temp(sym(1))), Expr::temp(sym(1)));
    }

    #[test]
    fn folding_helpers() {
        assert_eq!(BinOpKind::FloorDiv.eval(7, 0), None);
        assert_eq!(BinOpKind::FloorDiv.eval(-7, 2), Some(-4));
        assert_eq!(BinOpKind::LShift.eval(1, 4), Some(16));
        assert!(RelOpKind::LtE.eval(3, 3));
    }
}
