//! Evaluation of types that are given by expressions: `Type::Expr` and list
//! lengths written as expressions over constants and module parameters.
use polyphony_ir::{self as ir, Const, Expr, Length, SymbolId, Type, TypeKind};
use polyphony_utils::{Error, PolyResult};
use std::collections::HashMap;

/// Resolves type expressions against the constants bound so far.
pub struct TypeEvaluator<'a> {
    ctx: &'a ir::Context,
    bindings: &'a HashMap<SymbolId, i64>,
}

impl<'a> TypeEvaluator<'a> {
    pub fn new(ctx: &'a ir::Context, bindings: &'a HashMap<SymbolId, i64>) -> Self {
        TypeEvaluator { ctx, bindings }
    }

    /// The resolved type, `Ok(None)` when it still depends on an unbound
    /// parameter, or an error when it can never be resolved.
    pub fn eval(&self, t: &Type) -> PolyResult<Option<Type>> {
        match &t.kind {
            TypeKind::Expr(e) => self.eval_type_expr(e).map(|r| {
                r.map(|mut resolved| {
                    resolved.explicit = t.explicit;
                    resolved
                })
            }),
            TypeKind::List { elm, length, ro } => {
                let Some(elm) = self.eval(elm)? else {
                    return Ok(None);
                };
                let length = match length {
                    Length::Expr(e) => match self.eval_int(e)? {
                        Some(n) if n >= 0 => Length::Fixed(n as u32),
                        Some(n) => {
                            return Err(Error::misc(format!(
                                "list length must not be negative, got {n}"
                            )));
                        }
                        None => return Ok(None),
                    },
                    l => l.clone(),
                };
                Ok(Some(Type {
                    kind: TypeKind::List {
                        elm: Box::new(elm),
                        length,
                        ro: *ro,
                    },
                    explicit: t.explicit,
                }))
            }
            _ => Ok(Some(t.clone())),
        }
    }

    fn eval_type_expr(&self, e: &Expr) -> PolyResult<Option<Type>> {
        let Some(sym) = e.symbol() else {
            return Err(Error::misc(format!(
                "'{}' is not a type",
                ir::Printer::format_expr(self.ctx, e)
            )));
        };
        let s = self.ctx.sym(sym);
        match &s.typ.kind {
            TypeKind::Class { scope: Some(c) } => Ok(Some(Type::object(*c))),
            TypeKind::Undef if s.is_param() => Ok(None),
            TypeKind::Expr(inner) => self.eval_type_expr(inner),
            _ if !s.typ.is_undef() => Ok(Some(s.typ.clone())),
            _ => Err(Error::misc(format!("'{}' is not a type", s.name))),
        }
    }

    /// Fold an integer expression. Free parameters defer the evaluation.
    pub fn eval_int(&self, e: &Expr) -> PolyResult<Option<i64>> {
        match e {
            Expr::Const(Const::Int(i)) => Ok(Some(*i)),
            Expr::Const(Const::Bool(b)) => Ok(Some(*b as i64)),
            Expr::Temp { sym, .. } => match self.bindings.get(sym) {
                Some(v) => Ok(Some(*v)),
                None if self.ctx.sym(*sym).is_param() => Ok(None),
                None => Err(Error::misc(format!(
                    "'{}' is not a constant",
                    self.ctx.sym_name(*sym)
                ))),
            },
            Expr::BinOp { op, left, right } => {
                let (Some(l), Some(r)) = (self.eval_int(left)?, self.eval_int(right)?) else {
                    return Ok(None);
                };
                op.eval(l, r)
                    .map(Some)
                    .ok_or_else(|| Error::misc("invalid constant arithmetic"))
            }
            Expr::UnOp {
                op: ir::UnOpKind::USub,
                exp,
            } => Ok(self.eval_int(exp)?.map(|v| -v)),
            _ => Err(Error::misc(format!(
                "cannot evaluate '{}' as a constant",
                ir::Printer::format_expr(self.ctx, e)
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ir::{BinOpKind, Builder, Id, sym_tags};

    #[test]
    fn lengths_resolve_once_bound() {
        let mut ctx = ir::Context::default();
        let mut b = Builder::function(&mut ctx, "f");
        let n = b.param("n", Type::int(32, true));
        let f = b.finish();
        let len = Expr::binop(BinOpKind::Mult, Expr::temp(n), Expr::int(2));
        let t = Type::list(Type::int(8, true), Length::Expr(Box::new(len)));

        let free = HashMap::new();
        assert_eq!(TypeEvaluator::new(&ctx, &free).eval(&t).unwrap(), None);

        let bound: HashMap<_, _> = [(n, 3)].into_iter().collect();
        let r = TypeEvaluator::new(&ctx, &bound).eval(&t).unwrap().unwrap();
        assert_eq!(r.length(), Some(6));

        let local = ctx
            .add_sym(f, Id::from("v"), sym_tags(&[]), Type::int(8, true))
            .unwrap();
        let bad = Type::list(Type::int(8, true), Length::Expr(Box::new(Expr::temp(local))));
        assert!(TypeEvaluator::new(&ctx, &free).eval(&bad).is_err());
    }

    #[test]
    fn class_names_become_objects() {
        let mut ctx = ir::Context::default();
        let c = Builder::class(&mut ctx, "C", false);
        let sym = ctx.find_sym(ctx.global, Id::from("C")).unwrap();
        assert!(ctx.sym(sym).typ.is_class());
        let env = HashMap::new();
        let t = TypeEvaluator::new(&ctx, &env)
            .eval(&Type::expr(Expr::temp(sym)).with_explicit(true))
            .unwrap()
            .unwrap();
        assert_eq!(t.scope(), Some(c));
        assert!(t.explicit);
    }
}
