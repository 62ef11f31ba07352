//! Classification of calls and memory accesses, shared by scheduling and
//! lowering.
use lazy_static::lazy_static;
use polyphony_ir::{self as ir, Expr, ScopeId, StmKind, SymbolId};
use std::collections::HashSet;

lazy_static! {
    /// Built-ins that make the current thread of control wait for clock
    /// edges or signal values.
    pub static ref WAIT_SYSCALLS: HashSet<&'static str> = [
        "polyphony.timing.clksleep",
        "polyphony.timing.clkfence",
        "polyphony.timing.wait_edge",
        "polyphony.timing.wait_rising",
        "polyphony.timing.wait_falling",
        "polyphony.timing.wait_value",
    ]
    .into_iter()
    .collect();
}

/// Whether `kind` waits on time or on a signal.
pub fn is_wait(kind: &StmKind) -> bool {
    stm_syscall(kind).is_some_and(|(name, _)| WAIT_SYSCALLS.contains(name))
}

/// What a CALL expression invokes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallKind {
    /// A function or method compiled into its own sub-module.
    Scope(ScopeId),
    PortRead(SymbolId),
    PortWrite(SymbolId),
    ChannelPut(SymbolId),
    ChannelGet(SymbolId),
    ChannelFull(SymbolId),
    ChannelEmpty(SymbolId),
    /// Library code or anything without a body.
    Other,
}

impl CallKind {
    pub fn is_io(&self) -> bool {
        !matches!(self, CallKind::Scope(_) | CallKind::Other)
    }

    /// The port or channel symbol accessed, if any.
    pub fn port(&self) -> Option<SymbolId> {
        match self {
            CallKind::PortRead(p)
            | CallKind::PortWrite(p)
            | CallKind::ChannelPut(p)
            | CallKind::ChannelGet(p)
            | CallKind::ChannelFull(p)
            | CallKind::ChannelEmpty(p) => Some(*p),
            CallKind::Scope(_) | CallKind::Other => None,
        }
    }
}

/// Classify the callee expression `func` of a CALL.
pub fn classify_call(ctx: &ir::Context, func: &Expr) -> CallKind {
    if let Expr::Attr { exp, attr, .. } = func {
        if let Some(recv) = exp.symbol().filter(|s| ctx.sym(*s).typ.is_port()) {
            let channel = ctx.sym(recv).typ.is_channel();
            return match (channel, ctx.sym_name(*attr).as_str()) {
                (false, "rd") => CallKind::PortRead(recv),
                (false, "wr") => CallKind::PortWrite(recv),
                (true, "put") => CallKind::ChannelPut(recv),
                (true, "get") => CallKind::ChannelGet(recv),
                (true, "full") => CallKind::ChannelFull(recv),
                (true, "empty") => CallKind::ChannelEmpty(recv),
                _ => CallKind::Other,
            };
        }
    }
    let Some(target) = func.symbol().and_then(|s| ctx.sym(s).typ.scope()) else {
        return CallKind::Other;
    };
    let s = ctx.scope(target);
    if s.entry_block.is_some() && !s.is_lib() && !s.is_inlinelib() {
        CallKind::Scope(target)
    } else {
        CallKind::Other
    }
}

/// The CALL performed by a statement, either as a MOVE source or as a
/// statement-level expression.
pub fn stm_call(kind: &StmKind) -> Option<(&Expr, &[Expr])> {
    let e = match kind {
        StmKind::Move { src, .. } | StmKind::CMove { src, .. } => src,
        StmKind::Expr(e) | StmKind::CExpr { exp: e, .. } => e,
        _ => return None,
    };
    match e {
        Expr::Call { func, args } => Some((func, args)),
        _ => None,
    }
}

/// The syscall performed by a statement.
pub fn stm_syscall(kind: &StmKind) -> Option<(&'static str, &[Expr])> {
    let e = match kind {
        StmKind::Move { src, .. } | StmKind::CMove { src, .. } => src,
        StmKind::Expr(e) | StmKind::CExpr { exp: e, .. } => e,
        _ => return None,
    };
    match e {
        Expr::Syscall { name, args } => Some((name.as_str(), args)),
        _ => None,
    }
}

/// A memory access: the sequence symbol and whether it is written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemAccess {
    pub mem: SymbolId,
    pub write: bool,
}

/// The sequence a statement reads or writes through MREF, MSTORE or an ARRAY
/// initializer.
pub fn mem_access(kind: &StmKind) -> Option<MemAccess> {
    match kind {
        StmKind::Move { dst, src } | StmKind::CMove { dst, src, .. } => match src {
            Expr::MRef { mem, .. } => mem.symbol().map(|mem| MemAccess { mem, write: false }),
            Expr::Array { .. } => dst.symbol().map(|mem| MemAccess { mem, write: true }),
            _ => None,
        },
        StmKind::Expr(Expr::MStore { mem, .. })
        | StmKind::CExpr {
            exp: Expr::MStore { mem, .. },
            ..
        } => mem.symbol().map(|mem| MemAccess { mem, write: true }),
        _ => None,
    }
}

/// Lists longer than the threshold, or of unknown length, live in RAM.
/// Read-only lists become ROMs.
pub fn is_ram(ctx: &ir::Context, mem: SymbolId) -> bool {
    let t = &ctx.sym(mem).typ;
    t.is_list()
        && !t.is_readonly()
        && t
            .length()
            .is_none_or(|n| n > ctx.config.internal_ram_threshold_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ir::{Builder, Ctx, Length, ScopeTag, Type};

    #[test]
    fn ports_channels_and_functions() {
        let mut ctx = ir::Context::default();
        let m = Builder::class(&mut ctx, "M", true);
        let pt = ctx.port_type(Type::int(8, false), ir::Direction::In, None);
        let ct = ctx.channel_type(Type::int(8, false), 4);
        let p = Builder::field(&mut ctx, m, "p", pt);
        let c = Builder::field(&mut ctx, m, "c", ct);
        let w = Builder::method(&mut ctx, m, "w", &[ScopeTag::Worker]).finish();
        let this = ctx.scope(w).find_local(ir::Id::from("self")).unwrap();
        let recv = |f| Expr::attr(Expr::temp(this), f, Ctx::Load);

        let rd = ctx.port_call(recv(p), false, "rd", vec![]).unwrap();
        let put = ctx.port_call(recv(c), true, "put", vec![Expr::int(1)]).unwrap();
        let Expr::Call { func, .. } = &rd else { unreachable!() };
        assert_eq!(classify_call(&ctx, func), CallKind::PortRead(p));
        let Expr::Call { func, .. } = &put else { unreachable!() };
        let kind = classify_call(&ctx, func);
        assert_eq!(kind, CallKind::ChannelPut(c));
        assert!(kind.is_io());

        let mut b = Builder::function(&mut ctx, "g");
        b.ret(Expr::int(0));
        let g = b.finish();
        let gsym = ctx
            .add_sym(
                ctx.global,
                ir::Id::from("g"),
                ir::sym_tags(&[]),
                Type::function(g, Type::int(32, true), vec![]),
            )
            .unwrap();
        assert_eq!(classify_call(&ctx, &Expr::temp(gsym)), CallKind::Scope(g));
    }

    #[test]
    fn ram_threshold() {
        let mut ctx = ir::Context::default();
        ctx.config.internal_ram_threshold_size = 4;
        let mut b = Builder::function(&mut ctx, "f");
        let small = b.local("small", Type::list(Type::int(8, true), Length::Fixed(4)));
        let big = b.local("big", Type::list(Type::int(8, true), Length::Fixed(5)));
        let rom = b.local(
            "rom",
            Type::list(Type::int(8, true), Length::Fixed(64)).with_readonly(true),
        );
        b.finish();
        assert!(!is_ram(&ctx, small));
        assert!(is_ram(&ctx, big));
        assert!(!is_ram(&ctx, rom));

        let load = StmKind::mov(
            Expr::temp(small),
            Expr::mref(Expr::temp(big), Expr::int(0)),
        );
        assert_eq!(
            mem_access(&load),
            Some(MemAccess {
                mem: big,
                write: false
            })
        );
    }
}
