use crate::analysis::calls::{self, CallKind};
use crate::analysis::typing::expr_type;
use crate::traversal::{
    Action, ConstructVisitor, DiagnosticContext, DiagnosticPass, Named, VisResult,
    Visitor,
};
use polyphony_ir::{self as ir, Expr, ScopeId, StmKind, Type};
use polyphony_utils::{Error, ErrorKind, Loc, PolyResult};

/// Reports assignments, arguments and returns whose types do not fit, calls
/// with the wrong number of arguments, and arithmetic on non-scalar values.
///
/// Array initializers are left to `seq-check`, which knows about their
/// capacity.
pub struct TypeCheck {
    diag: DiagnosticContext,
}

impl ConstructVisitor for TypeCheck {
    fn from(_ctx: &ir::Context) -> PolyResult<Self> {
        Ok(TypeCheck {
            diag: DiagnosticContext::default(),
        })
    }

    fn clear_data(&mut self) {}
}

impl Named for TypeCheck {
    fn name() -> &'static str {
        "type-check"
    }

    fn description() -> &'static str {
        "Report incompatible types and argument counts"
    }
}

impl DiagnosticPass for TypeCheck {
    fn diagnostics(&self) -> &DiagnosticContext {
        &self.diag
    }
}

/// Type a destination expression stores into.
fn dst_type(ctx: &ir::Context, dst: &Expr) -> Option<Type> {
    match dst {
        Expr::Temp { sym, .. } | Expr::Attr { attr: sym, .. } => Some(ctx.sym(*sym).typ.clone()),
        Expr::MRef { mem, .. } => expr_type(ctx, mem).element().cloned(),
        _ => None,
    }
}

impl TypeCheck {
    fn check_move(&mut self, ctx: &ir::Context, scope: ScopeId, dst: &Expr, src: &Expr, loc: Loc) {
        if matches!(src, Expr::Array { .. }) {
            return;
        }
        let Some(lhs) = dst_type(ctx, dst) else {
            return;
        };
        let rhs = expr_type(ctx, src);
        let is_ret = dst.symbol().is_some_and(|s| ctx.sym(s).is_return());
        if is_ret {
            let ret = &ctx.scope(scope).return_type;
            if ret.explicit && !ret.can_assign(&rhs, &ctx.scopes) {
                self.diag.err(
                    Error::new(ErrorKind::IncompatibleReturnType(
                        ret.to_string(),
                        rhs.to_string(),
                    ))
                    .with_loc(loc),
                );
            }
            return;
        }
        if !lhs.can_assign(&rhs, &ctx.scopes) {
            self.diag
                .err(Error::incompatible_types(&lhs, &rhs).with_loc(loc));
        }
    }

    fn check_call(&mut self, ctx: &ir::Context, func: &Expr, args: &[Expr], loc: Loc) {
        let CallKind::Scope(callee) = calls::classify_call(ctx, func) else {
            return;
        };
        let c = ctx.scope(callee);
        let required = c.params.iter().filter(|p| p.default.is_none()).count();
        if args.len() > c.params.len() {
            self.diag.err(
                Error::new(ErrorKind::TakesToomanyArgs(
                    c.base_name,
                    c.params.len(),
                    args.len(),
                ))
                .with_loc(loc),
            );
            return;
        }
        if args.len() < required {
            self.diag
                .err(Error::new(ErrorKind::MissingRequiredArg(c.base_name)).with_loc(loc));
            return;
        }
        for (arg, param) in args.iter().zip(c.params.iter()) {
            let pt = &ctx.sym(param.sym).typ;
            let at = expr_type(ctx, arg);
            if !pt.can_assign(&at, &ctx.scopes) {
                self.diag.err(
                    Error::new(ErrorKind::IncompatibleParameterType(
                        at.to_string(),
                        c.base_name,
                    ))
                    .with_loc(loc),
                );
            }
        }
    }

    fn check_binop(&mut self, ctx: &ir::Context, e: &Expr, loc: Loc) {
        let Expr::BinOp { op, left, right } = e else {
            return;
        };
        let (l, r) = (expr_type(ctx, left), expr_type(ctx, right));
        let bad = |t: &Type| !t.is_undef() && !t.is_scalar() && !t.is_expr();
        if bad(&l) || bad(&r) {
            self.diag.err(
                Error::new(ErrorKind::UnsupportedBinaryOperandType(
                    op.as_ref().to_string(),
                    l.to_string(),
                    r.to_string(),
                ))
                .with_loc(loc),
            );
        }
    }
}

impl Visitor for TypeCheck {
    fn start(&mut self, scope: ScopeId, ctx: &mut ir::Context) -> VisResult {
        for stm in ctx.scope_stms(scope) {
            let s = ctx.stm(stm);
            let loc = s.loc;
            if let StmKind::Move { dst, src } | StmKind::CMove { dst, src, .. } = &s.kind {
                self.check_move(ctx, scope, dst, src, loc);
            }
            for e in s.kind.exprs() {
                for sub in e.find_exprs(|x| matches!(x, Expr::Call { .. } | Expr::BinOp { .. })) {
                    match sub {
                        Expr::Call { func, args } => self.check_call(ctx, func, args, loc),
                        _ => self.check_binop(ctx, sub, loc),
                    }
                }
            }
        }
        Ok(Action::SkipChildren)
    }
}
