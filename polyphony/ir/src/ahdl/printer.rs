//! Textual dump of HDL scopes.
use super::{ADecl, AExpr, AOp, AStm, HdlContext, SigWidth, Target};
use crate::{Context, HdlScopeId};
use itertools::Itertools;
use std::io;

pub struct AhdlPrinter;

impl AhdlPrinter {
    pub fn format_expr(hdl: &HdlContext, e: &AExpr) -> String {
        let fmt = |e: &AExpr| Self::format_expr(hdl, e);
        match e {
            AExpr::Const(c) => c.to_string(),
            AExpr::Var(s) | AExpr::MemVar(s) => hdl.sig_name(*s).to_string(),
            AExpr::Subscript { mem, offset } => {
                format!("{}[{}]", hdl.sig_name(*mem), fmt(offset))
            }
            AExpr::Op { op, args } => match (op, args.as_slice()) {
                (AOp::Un(_), [a]) => format!("{}{}", op.symbol(), fmt(a)),
                (_, [l, r]) => format!("({} {} {})", fmt(l), op.symbol(), fmt(r)),
                _ => format!("{}({})", op.symbol(), args.iter().map(fmt).join(", ")),
            },
            AExpr::Concat(args) => format!("{{{}}}", args.iter().map(fmt).join(", ")),
            AExpr::IfExp { cond, lexp, rexp } => {
                format!("({} ? {} : {})", fmt(cond), fmt(lexp), fmt(rexp))
            }
            AExpr::FunCall { name, args } => {
                format!("{}({})", name, args.iter().map(fmt).join(", "))
            }
            AExpr::Symbol(s) => s.to_string(),
        }
    }

    fn format_target(ctx: &Context, t: &Target) -> String {
        match t {
            Target::Block(b) => ctx.block(*b).name(),
            Target::State(s) => s.to_string(),
            Target::Next => "<next>".to_string(),
        }
    }

    fn write_stms<F: io::Write>(
        ctx: &Context,
        codes: &[AStm],
        indent: usize,
        f: &mut F,
    ) -> io::Result<()> {
        for c in codes {
            Self::write_stm(ctx, c, indent, f)?;
        }
        Ok(())
    }

    fn write_branches<F: io::Write>(
        ctx: &Context,
        kw: &str,
        conds: &[AExpr],
        blocks: &[Vec<AStm>],
        indent: usize,
        f: &mut F,
    ) -> io::Result<()> {
        let pad = " ".repeat(indent);
        for (i, (c, b)) in conds.iter().zip(blocks).enumerate() {
            let head = if i == 0 { kw } else { "elif" };
            writeln!(f, "{pad}{head} {}:", Self::format_expr(&ctx.hdl, c))?;
            Self::write_stms(ctx, b, indent + 2, f)?;
        }
        Ok(())
    }

    pub fn write_stm<F: io::Write>(
        ctx: &Context,
        s: &AStm,
        indent: usize,
        f: &mut F,
    ) -> io::Result<()> {
        let hdl = &ctx.hdl;
        let fmt = |e: &AExpr| Self::format_expr(hdl, e);
        let pad = " ".repeat(indent);
        match s {
            AStm::Move { dst, src } => writeln!(f, "{pad}{} <= {}", fmt(dst), fmt(src)),
            AStm::Store { mem, offset, src } => writeln!(
                f,
                "{pad}{}[{}] <= {}",
                hdl.sig_name(*mem),
                fmt(offset),
                fmt(src)
            ),
            AStm::Load { dst, mem, offset } => writeln!(
                f,
                "{pad}{} <= {}[{}]",
                fmt(dst),
                hdl.sig_name(*mem),
                fmt(offset)
            ),
            AStm::If { conds, blocks } => {
                Self::write_branches(ctx, "if", conds, blocks, indent, f)
            }
            AStm::TransitionIf { conds, blocks } => {
                Self::write_branches(ctx, "goto_if", conds, blocks, indent, f)
            }
            AStm::Case { sel, items } => {
                writeln!(f, "{pad}case {}:", fmt(sel))?;
                for (v, b) in items {
                    writeln!(f, "{pad}  {}:", fmt(v))?;
                    Self::write_stms(ctx, b, indent + 4, f)?;
                }
                Ok(())
            }
            AStm::ModuleCall {
                instance,
                args,
                returns,
                ..
            } => writeln!(
                f,
                "{pad}call {}({}) -> ({})",
                instance,
                args.iter().map(fmt).join(", "),
                returns.iter().map(fmt).join(", ")
            ),
            AStm::Transition(t) => {
                writeln!(f, "{pad}goto {}", Self::format_target(ctx, t))
            }
            AStm::MetaWait {
                kind,
                args,
                codes,
                transition,
            } => {
                writeln!(
                    f,
                    "{pad}{}({})",
                    kind.as_ref(),
                    args.iter().map(fmt).join(", ")
                )?;
                Self::write_stms(ctx, codes, indent + 2, f)?;
                if let Some(t) = transition {
                    writeln!(f, "{pad}  goto {}", Self::format_target(ctx, t))?;
                }
                Ok(())
            }
            AStm::Seq {
                factor,
                step,
                step_n,
            } => {
                write!(f, "{pad}seq[{step}/{step_n}] ")?;
                Self::write_stm(ctx, factor, 0, f)
            }
            AStm::PipelineGuard { cond, codes } => {
                writeln!(f, "{pad}guard {}:", fmt(cond))?;
                Self::write_stms(ctx, codes, indent + 2, f)
            }
            AStm::Expr(e) => writeln!(f, "{pad}{}", fmt(e)),
        }
    }

    /// Writes signals, declarations, sub-modules and every STG of `h`.
    pub fn write_scope<F: io::Write>(
        ctx: &Context,
        h: HdlScopeId,
        f: &mut F,
    ) -> io::Result<()> {
        let hdl = &ctx.hdl;
        let hs = hdl.scope(h);
        writeln!(f, "module {} {{", hs.name)?;
        for sig in hdl.signals_of(h) {
            let s = hdl.signal(sig);
            let width = match s.width {
                SigWidth::Scalar(w) => format!("{w}"),
                SigWidth::Array { elm, len } => format!("{elm}[{len}]"),
            };
            let tags = s.tags.iter().map(|t| t.to_string()).join(", ");
            let sign = if s.signed { "signed " } else { "" };
            match s.init {
                Some(i) => {
                    writeln!(f, "  sig {}: {sign}{width} = {i} <{tags}>", s.name)?
                }
                None => writeln!(f, "  sig {}: {sign}{width} <{tags}>", s.name)?,
            }
        }
        for sub in &hs.submodules {
            let conns = sub
                .connections
                .iter()
                .map(|(p, s)| format!("{p}={}", hdl.sig_name(*s)))
                .join(", ");
            writeln!(
                f,
                "  instance {}: {}({})",
                sub.name,
                hdl.scope(sub.target).name,
                conns
            )?;
        }
        for d in &hs.decls {
            match d {
                ADecl::Assign { dst, src } => writeln!(
                    f,
                    "  assign {} = {}",
                    hdl.sig_name(*dst),
                    Self::format_expr(hdl, src)
                )?,
                ADecl::Function {
                    output,
                    input,
                    cases,
                } => {
                    writeln!(
                        f,
                        "  function {}({}):",
                        hdl.sig_name(*output),
                        hdl.sig_name(*input)
                    )?;
                    for (k, v) in cases {
                        writeln!(f, "    {k}: {v}")?;
                    }
                }
                ADecl::Mux {
                    output,
                    selector,
                    inputs,
                } => writeln!(
                    f,
                    "  mux {} = [{}][{}]",
                    hdl.sig_name(*output),
                    inputs.iter().map(|s| hdl.sig_name(*s)).join(", "),
                    hdl.sig_name(*selector)
                )?,
                ADecl::Demux {
                    outputs,
                    selector,
                    input,
                } => writeln!(
                    f,
                    "  demux [{}][{}] = {}",
                    outputs.iter().map(|s| hdl.sig_name(*s)).join(", "),
                    hdl.sig_name(*selector),
                    hdl.sig_name(*input)
                )?,
                ADecl::Comb { codes } => {
                    writeln!(f, "  comb:")?;
                    Self::write_stms(ctx, codes, 4, f)?;
                }
            }
        }
        for stg in &hs.stgs {
            writeln!(f, "  stg {}:", stg.name)?;
            for st in &stg.states {
                writeln!(f, "    {}:", st.name)?;
                Self::write_stms(ctx, &st.codes, 6, f)?;
                if let Some(p) = &st.pipeline {
                    for stage in &p.stages {
                        writeln!(f, "      stage {}:", stage.name)?;
                        Self::write_stms(ctx, &stage.codes, 8, f)?;
                    }
                }
            }
        }
        writeln!(f, "}}")
    }

    pub fn write_all<F: io::Write>(ctx: &Context, f: &mut F) -> io::Result<()> {
        for h in ctx.hdl.scopes.keys() {
            Self::write_scope(ctx, h, f)?;
            writeln!(f)?;
        }
        Ok(())
    }

    pub fn scope_to_str(ctx: &Context, h: HdlScopeId) -> String {
        let mut buf = Vec::new();
        match Self::write_scope(ctx, h, &mut buf) {
            Ok(()) => String::from_utf8_lossy(&buf).to_string(),
            Err(e) => e.to_string(),
        }
    }
}
