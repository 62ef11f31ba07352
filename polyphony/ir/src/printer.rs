//! Implements a formatter for the in-memory representation of scopes.
//! Printing never mutates the context.
use crate::{Const, Context, Expr, JumpKind, PhiKind, ScopeId, StmKind};
use itertools::Itertools;
use std::io;

/// Printer for the high-level IR.
pub struct Printer;

impl Printer {
    fn format_const(c: &Const) -> String {
        match c {
            Const::Int(i) => i.to_string(),
            Const::Bool(b) => if *b { "True" } else { "False" }.to_string(),
            Const::Str(s) => format!("'{s}'"),
            Const::None => "None".to_string(),
        }
    }

    /// Formats an expression using symbol names from `ctx`.
    pub fn format_expr(ctx: &Context, e: &Expr) -> String {
        let fmt = |e: &Expr| Self::format_expr(ctx, e);
        let fmt_args =
            |args: &[Expr]| args.iter().map(|a| Self::format_expr(ctx, a)).join(", ");
        match e {
            Expr::Const(c) => Self::format_const(c),
            Expr::Temp { sym, .. } => ctx.sym_name(*sym).to_string(),
            Expr::Attr { exp, attr, .. } => {
                format!("{}.{}", fmt(exp), ctx.sym_name(*attr))
            }
            Expr::UnOp { op, exp } => format!("{}{}", op.as_ref(), fmt(exp)),
            Expr::BinOp { op, left, right } => {
                format!("({} {} {})", fmt(left), op.as_ref(), fmt(right))
            }
            Expr::RelOp { op, left, right } => {
                format!("({} {} {})", fmt(left), op.as_ref(), fmt(right))
            }
            Expr::CondOp { cond, left, right } => {
                format!("({} ? {} : {})", fmt(cond), fmt(left), fmt(right))
            }
            Expr::Call { func, args } => {
                format!("{}({})", fmt(func), fmt_args(args))
            }
            Expr::New { scope, args } => {
                format!("{}({})", ctx.scope(*scope).base_name, fmt_args(args))
            }
            Expr::Syscall { name, args } => format!("!{}({})", name, fmt_args(args)),
            Expr::MRef { mem, offset, .. } => {
                format!("{}[{}]", fmt(mem), fmt(offset))
            }
            Expr::MStore { mem, offset, exp } => {
                format!("mstore({}[{}], {})", fmt(mem), fmt(offset), fmt(exp))
            }
            Expr::Array {
                items,
                repeat,
                mutable,
            } => {
                let body = format!("[{}]", fmt_args(items));
                let body = match repeat.as_int() {
                    Some(1) => body,
                    _ => format!("{body} * {}", fmt(repeat)),
                };
                if *mutable { body } else { format!("({body})") }
            }
        }
    }

    /// Formats one statement on a single line.
    pub fn format_stm(ctx: &Context, kind: &StmKind) -> String {
        let fmt = |e: &Expr| Self::format_expr(ctx, e);
        let blk = |b| ctx.block(b).name();
        match kind {
            StmKind::Move { dst, src } => format!("{} = {}", fmt(dst), fmt(src)),
            StmKind::Expr(e) => fmt(e),
            StmKind::CMove { cond, dst, src } => {
                format!("{} ? {} = {}", fmt(cond), fmt(dst), fmt(src))
            }
            StmKind::CExpr { cond, exp } => format!("{} ? {}", fmt(cond), fmt(exp)),
            StmKind::Jump { target, kind } => match kind {
                JumpKind::Plain => format!("jump {}", blk(*target)),
                k => format!("jump {} '{}'", blk(*target), k.as_ref()),
            },
            StmKind::CJump {
                exp,
                true_blk,
                false_blk,
            } => format!(
                "cjump {} ? {} : {}",
                fmt(exp),
                blk(*true_blk),
                blk(*false_blk)
            ),
            StmKind::MCJump { conds, targets } => format!(
                "mcjump {}",
                conds
                    .iter()
                    .zip(targets)
                    .map(|(c, t)| format!("{} ? {}", fmt(c), blk(*t)))
                    .join(", ")
            ),
            StmKind::Ret(e) => format!("return {}", fmt(e)),
            StmKind::Phi(phi) => {
                let args = match phi.kind {
                    PhiKind::UPhi => phi
                        .args
                        .iter()
                        .zip(&phi.ps)
                        .map(|(a, p)| format!("{} ? {}", fmt(p), fmt(a)))
                        .join(", "),
                    _ => phi.args.iter().map(fmt).join(", "),
                };
                format!("{} = {}({})", fmt(&phi.var), phi.kind.as_ref(), args)
            }
        }
    }

    /// Writes a scope header, its symbols and every reachable block.
    pub fn write_scope<F: io::Write>(
        ctx: &Context,
        scope: ScopeId,
        f: &mut F,
    ) -> io::Result<()> {
        let s = ctx.scope(scope);
        let tags = s.tags.iter().map(|t| t.to_string()).join(", ");
        let params = s
            .params
            .iter()
            .map(|p| {
                format!("{}: {}", ctx.sym_name(p.sym), ctx.sym(p.sym).typ)
            })
            .join(", ");
        writeln!(f, "scope {}({}) -> {} <{}> {{", s.name, params, s.return_type, tags)?;
        for (name, sym) in s.symbols.iter() {
            let sym = ctx.sym(*sym);
            if sym.tags.is_empty() {
                writeln!(f, "  sym {}: {}", name, sym.typ)?;
            } else {
                let ts = sym.tags.iter().map(|t| t.to_string()).join(", ");
                writeln!(f, "  sym {}: {} <{}>", name, sym.typ, ts)?;
            }
        }
        for b in ctx.traverse_blocks(scope) {
            let block = ctx.block(b);
            let preds = block.preds.iter().map(|p| ctx.block(*p).name()).join(", ");
            let hyper = if block.is_hyperblock { " hyperblock" } else { "" };
            writeln!(f, "  {}:{} # preds: [{}]", block.name(), hyper, preds)?;
            if let Some(p) = &block.path_exp {
                writeln!(f, "    # path: {}", Self::format_expr(ctx, p))?;
            }
            for stm in block.stms.iter() {
                writeln!(f, "    {}", Self::format_stm(ctx, &ctx.stm(*stm).kind))?;
            }
        }
        writeln!(f, "}}")
    }

    /// Writes every live scope with a body.
    pub fn write_context<F: io::Write>(ctx: &Context, f: &mut F) -> io::Result<()> {
        for scope in ctx.scope_ids() {
            if ctx.scope(scope).entry_block.is_some() {
                Self::write_scope(ctx, scope, f)?;
                writeln!(f)?;
            }
        }
        Ok(())
    }

    /// Formats a single scope to a string.
    pub fn scope_to_str(ctx: &Context, scope: ScopeId) -> String {
        let mut buf = Vec::new();
        match Self::write_scope(ctx, scope, &mut buf) {
            Ok(()) => String::from_utf8_lossy(&buf).to_string(),
            Err(e) => e.to_string(),
        }
    }
}
