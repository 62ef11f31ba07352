//! The type an expression evaluates to, derived from its operands.
use super::calls::{self, CallKind};
use polyphony_ir::{self as ir, Const, Expr, Length, Type, UnOpKind};

/// Type of `e`; `undef` when nothing is known yet.
pub fn expr_type(ctx: &ir::Context, e: &Expr) -> Type {
    let int = || Type::int(ctx.config.default_int_width, true);
    match e {
        Expr::Const(Const::Int(i)) => {
            let w = const_width(*i).max(ctx.config.default_int_width);
            Type::int(w, true)
        }
        Expr::Const(Const::Bool(_)) => Type::bool(),
        Expr::Const(Const::Str(_)) => Type::str(),
        Expr::Const(Const::None) => Type::none(),
        Expr::Temp { sym, .. } | Expr::Attr { attr: sym, .. } => ctx.sym(*sym).typ.clone(),
        Expr::UnOp {
            op: UnOpKind::Not,
            ..
        } => Type::bool(),
        Expr::UnOp { exp, .. } => expr_type(ctx, exp),
        Expr::BinOp { left, right, .. } => {
            let (l, r) = (expr_type(ctx, left), expr_type(ctx, right));
            match (l.width(), r.width()) {
                _ if !l.is_scalar() => l,
                (Some(lw), Some(rw)) => Type::int(lw.max(rw), l.signed() || r.signed()),
                _ => l,
            }
        }
        Expr::RelOp { .. } => Type::bool(),
        Expr::CondOp { left, .. } => expr_type(ctx, left),
        Expr::Call { func, .. } => match calls::classify_call(ctx, func) {
            CallKind::PortRead(p) | CallKind::ChannelGet(p) => ctx
                .sym(p)
                .typ
                .port_attrs()
                .map(|a| (*a.dtype).clone())
                .unwrap_or_else(Type::undef),
            CallKind::ChannelFull(_) | CallKind::ChannelEmpty(_) => Type::bool(),
            CallKind::PortWrite(_) | CallKind::ChannelPut(_) => Type::none(),
            CallKind::Scope(s) => ctx.scope(s).return_type.clone(),
            CallKind::Other => func
                .symbol()
                .and_then(|f| ctx.sym(f).typ.return_type().cloned())
                .unwrap_or_else(Type::undef),
        },
        Expr::New { scope, .. } => Type::object(*scope),
        Expr::Syscall { name, .. } => match name.as_str() {
            "len" | "polyphony.timing.clktime" => int(),
            _ => Type::none(),
        },
        Expr::MRef { mem, .. } => expr_type(ctx, mem)
            .element()
            .cloned()
            .unwrap_or_else(Type::undef),
        Expr::MStore { .. } => Type::none(),
        Expr::Array { items, repeat, .. } => {
            let elm = items
                .first()
                .map(|i| expr_type(ctx, i))
                .unwrap_or_else(int);
            let length = match repeat.as_int() {
                Some(n) if n >= 0 => Length::Fixed(items.len() as u32 * n as u32),
                _ => Length::Any,
            };
            Type::list(elm, length)
        }
    }
}

/// Bits of a two's complement literal, sign included.
pub fn const_width(i: i64) -> u32 {
    let mag = if i < 0 { !i } else { i } as u64;
    64 - mag.leading_zeros() + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use ir::{BinOpKind, Builder, RelOpKind};

    #[test]
    fn operands_decide_the_result() {
        let mut ctx = ir::Context::default();
        let mut b = Builder::function(&mut ctx, "f");
        let a = b.param("a", Type::int(8, false));
        let l = b.local("l", Type::list(Type::int(16, true), Length::Fixed(4)));
        b.finish();
        let add = Expr::binop(BinOpKind::Add, Expr::temp(a), Expr::temp(a));
        assert_eq!(expr_type(&ctx, &add), Type::int(8, false));
        let lt = Expr::relop(RelOpKind::Lt, Expr::temp(a), Expr::int(3));
        assert!(expr_type(&ctx, &lt).is_bool());
        let rd = Expr::mref(Expr::temp(l), Expr::int(0));
        assert_eq!(expr_type(&ctx, &rd).width(), Some(16));
        let arr = Expr::array(vec![Expr::int(1), Expr::int(2)], Expr::int(3));
        assert_eq!(expr_type(&ctx, &arr).length(), Some(6));
    }

    #[test]
    fn literal_widths() {
        assert_eq!(const_width(0), 1);
        assert_eq!(const_width(1), 2);
        assert_eq!(const_width(-1), 1);
        assert_eq!(const_width(127), 8);
        assert_eq!(const_width(-128), 8);
    }
}
