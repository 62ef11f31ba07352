use crate::analysis::calls::{self, CallKind};
use crate::traversal::{Action, Named, VisResult, Visitor};
use polyphony_ir::{
    self as ir, Direction, Expr, HdlScopeId, PortKind, ScopeId, StmKind, SymbolId, TypeKind,
    ahdl::{ADecl, SigSpec, SigTag, SubModule, sig_tags},
};
use polyphony_utils::Id;
use std::collections::BTreeSet;

/// Creates the hardware mirror of every scope that becomes an FSM.
///
/// Each function, method and testbench gets an HDL scope; workers share
/// the HDL scope of their module. Every symbol still referenced becomes a
/// signal: parameters are inputs, the return value an output, aliases
/// nets and everything else a register. Lists become arrays, read-only
/// lists ROMs with a lookup function. Module fields become the ports,
/// FIFOs and registers of the module, and every called scope gets one
/// instance wired into its caller.
#[derive(Default)]
pub struct HdlGen;

impl Named for HdlGen {
    fn name() -> &'static str {
        "hdl-gen"
    }

    fn description() -> &'static str {
        "Create HDL scopes and signals for FSM scopes and modules"
    }
}

/// Scopes lowered to a state machine.
pub fn is_fsm_scope(ctx: &ir::Context, scope: ScopeId) -> bool {
    let s = ctx.scope(scope);
    s.entry_block.is_some()
        && !s.is_lib()
        && !s.is_inlinelib()
        && !s.is_ctor()
        && !s.is_closure()
        && s.is_callable()
}

/// Scopes driven by the ready/valid/accept protocol.
pub fn uses_handshake(ctx: &ir::Context, scope: ScopeId) -> bool {
    let s = ctx.scope(scope);
    s.has_handshake() && !s.is_testbench()
}

/// Prefix of the signals a scope owns in its HDL scope. Workers share the
/// module's scope and prefix their locals with their own name.
pub fn sig_prefix(ctx: &ir::Context, scope: ScopeId) -> String {
    if ctx.scope(scope).is_worker() {
        format!("{}_", ctx.scope(scope).base_name)
    } else {
        String::new()
    }
}

/// Name of the signal generated for `sym` in `scope`.
pub fn sig_name(ctx: &ir::Context, scope: ScopeId, sym: SymbolId) -> String {
    let s = ctx.sym(sym);
    let name = s.name.as_str().replace('#', "_");
    if s.is_field() {
        name
    } else {
        format!("{}{}", sig_prefix(ctx, scope), name)
    }
}

/// Name of the instance of `callee` placed in `caller`'s HDL scope.
pub fn instance_name(ctx: &ir::Context, caller: ScopeId, callee: ScopeId) -> String {
    format!("{}{}_0", sig_prefix(ctx, caller), ctx.scope(callee).base_name)
}

/// Values of a read-only list, from the ARRAY initializer defining it.
pub fn rom_contents(ctx: &ir::Context, sym: SymbolId) -> Option<Vec<i64>> {
    let owner = ctx.sym(sym).scope;
    let mut scopes = vec![owner];
    scopes.extend(
        ctx.scope(owner)
            .children
            .iter()
            .copied()
            .filter(|c| ctx.scope(*c).is_ctor()),
    );
    for sc in scopes {
        if ctx.scope(sc).entry_block.is_none() {
            continue;
        }
        for stm in ctx.scope_stms(sc) {
            let StmKind::Move {
                dst,
                src: Expr::Array { items, repeat, .. },
            } = &ctx.stm(stm).kind
            else {
                continue;
            };
            if dst.symbol() != Some(sym) {
                continue;
            }
            let values = items
                .iter()
                .map(|i| i.as_int())
                .collect::<Option<Vec<i64>>>()?;
            let n = repeat.as_int().unwrap_or(1).max(1) as usize;
            return Some(values.iter().copied().cycle().take(values.len() * n).collect());
        }
    }
    None
}

/// What a symbol needs in hardware.
enum SigPlan {
    Scalar(u32, bool, BTreeSet<SigTag>, Option<i64>),
    Array(u32, u32, bool, BTreeSet<SigTag>),
    Rom(u32, u32, Vec<i64>),
}

/// The signal a plain (non-port) symbol becomes, if any.
fn plan_of(ctx: &ir::Context, sym: SymbolId) -> Option<SigPlan> {
    let s = ctx.sym(sym);
    if s.is_self() || s.has_tag(ir::SymTag::Builtin) {
        return None;
    }
    let t = &s.typ;
    match &t.kind {
        TypeKind::Int { .. } | TypeKind::Bool => {
            let mut tags = BTreeSet::new();
            if s.is_param() {
                tags.insert(SigTag::Input);
            } else if s.is_alias() {
                tags.insert(SigTag::Net);
            } else {
                tags.insert(SigTag::Reg);
            }
            if s.is_return() {
                tags.insert(SigTag::Output);
            }
            if s.is_condition() {
                tags.insert(SigTag::Condition);
            }
            if s.is_induction() {
                tags.insert(SigTag::Induction);
            }
            if s.is_field() {
                tags.insert(SigTag::Field);
            }
            Some(SigPlan::Scalar(t.width()?, t.signed(), tags, None))
        }
        TypeKind::List { .. } | TypeKind::Tuple { .. } => {
            let (elm, len) = (t.width()?, t.length()?);
            if t.is_readonly() {
                let contents = rom_contents(ctx, sym)?;
                return Some(SigPlan::Rom(elm, len, contents));
            }
            let mut tags = sig_tags(&[SigTag::Reg]);
            if calls::is_ram(ctx, sym) {
                tags.insert(SigTag::SinglePort);
            }
            if s.is_field() {
                tags.insert(SigTag::Field);
            }
            Some(SigPlan::Array(elm, len, t.signed(), tags))
        }
        _ => None,
    }
}

fn add_plan(
    ctx: &mut ir::Context,
    h: HdlScopeId,
    name: &str,
    sym: SymbolId,
    plan: SigPlan,
) {
    match plan {
        SigPlan::Scalar(w, signed, tags, init) => {
            ctx.hdl
                .gen_sig(h, name, SigSpec::scalar(w, tags).signed(signed).init(init).sym(sym));
        }
        SigPlan::Array(elm, len, signed, tags) => {
            ctx.hdl
                .gen_sig(h, name, SigSpec::array(elm, len, tags).signed(signed).sym(sym));
        }
        SigPlan::Rom(elm, len, contents) => {
            let rom = ctx.hdl.gen_sig(
                h,
                name,
                SigSpec::array(elm, len, sig_tags(&[SigTag::Rom])).sym(sym),
            );
            let addr_w = polyphony_utils::bits_needed_for(len as u64) as u32;
            let addr = ctx.hdl.gen_sig(
                h,
                &format!("{name}_addr"),
                SigSpec::scalar(addr_w, sig_tags(&[SigTag::Net])),
            );
            let cases = contents
                .into_iter()
                .enumerate()
                .map(|(i, v)| (i as i64, v))
                .collect();
            ctx.hdl.scope_mut(h).decls.push(ADecl::Function {
                output: rom,
                input: addr,
                cases,
            });
        }
    }
}

impl HdlGen {
    /// Ports, channels and plain fields of a module.
    fn gen_module(ctx: &mut ir::Context, module: ScopeId) {
        let name = ctx.scope(module).base_name;
        let h = ctx.hdl.add_scope(name, module);
        let fields: Vec<SymbolId> = ctx
            .scope(module)
            .symbols
            .values()
            .copied()
            .filter(|s| ctx.sym(*s).is_field())
            .collect();
        for f in fields {
            let fname = ctx.sym_name(f).to_string();
            let typ = ctx.sym(f).typ.clone();
            match typ.port_attrs() {
                Some(attrs) => {
                    let w = attrs.dtype.width().unwrap_or(1);
                    let signed = attrs.dtype.signed();
                    match attrs.kind {
                        PortKind::Port => {
                            let dir = match attrs.direction {
                                Direction::In => SigTag::Input,
                                Direction::Out => SigTag::Output,
                                Direction::Any => SigTag::Reg,
                            };
                            let mut tags = sig_tags(&[dir, SigTag::Field]);
                            if dir == SigTag::Output {
                                tags.insert(SigTag::Reg);
                            }
                            if attrs.init.is_some() {
                                tags.insert(SigTag::Initializable);
                            }
                            let spec = SigSpec::scalar(w, tags)
                                .signed(signed)
                                .init(attrs.init)
                                .sym(f);
                            ctx.hdl.gen_sig(h, &fname, spec);
                        }
                        PortKind::Channel { capacity } => {
                            Self::gen_fifo(ctx, h, f, &fname, w, capacity);
                        }
                    }
                }
                None => {
                    if let Some(plan) = plan_of(ctx, f) {
                        add_plan(ctx, h, &fname, f, plan);
                    }
                }
            }
        }
        log::debug!(
            "module {}: {} signal(s)",
            name,
            ctx.hdl.scope(h).signals.len()
        );
    }

    /// A FIFO instance and the nets connecting it.
    fn gen_fifo(
        ctx: &mut ir::Context,
        h: HdlScopeId,
        chan: SymbolId,
        name: &str,
        width: u32,
        capacity: u32,
    ) {
        let fifo_cls = ctx.port_class(true);
        let fifo = ctx.hdl.add_scope(Id::from("fifo"), fifo_cls);
        let net = |w| SigSpec::scalar(w, sig_tags(&[SigTag::Net, SigTag::Field]));
        let reg = |w| SigSpec::scalar(w, sig_tags(&[SigTag::Reg, SigTag::Field]));
        let din = ctx.hdl.gen_sig(h, &format!("{name}_din"), reg(width));
        let dout = ctx.hdl.gen_sig(h, &format!("{name}_dout"), net(width).sym(chan));
        let put = ctx.hdl.gen_sig(h, &format!("{name}_put"), reg(1));
        let get = ctx.hdl.gen_sig(h, &format!("{name}_get"), reg(1));
        let full = ctx.hdl.gen_sig(h, &format!("{name}_full"), net(1));
        let empty = ctx.hdl.gen_sig(h, &format!("{name}_empty"), net(1));
        let inst = ctx.hdl.gen_sig(
            h,
            &format!("{name}_fifo"),
            SigSpec::scalar(1, sig_tags(&[SigTag::Field])),
        );
        ctx.hdl.set_subscope(inst, fifo);
        let connections = [
            ("din", din),
            ("dout", dout),
            ("wr", put),
            ("rd", get),
            ("full", full),
            ("empty", empty),
        ]
        .into_iter()
        .map(|(p, s)| (Id::from(p), s))
        .collect();
        let params = vec![
            (Id::from("WIDTH"), width as i64),
            (Id::from("DEPTH"), capacity as i64),
        ];
        ctx.hdl.scope_mut(h).submodules.push(SubModule {
            name: Id::from(format!("{name}_fifo")),
            target: fifo,
            connections,
            params,
        });
    }

    /// Handshake and argument signals for every scope `scope` calls.
    fn gen_instances(ctx: &mut ir::Context, scope: ScopeId, h: HdlScopeId) {
        let mut callees = vec![];
        for stm in ctx.scope_stms(scope) {
            if let Some((func, _)) = calls::stm_call(&ctx.stm(stm).kind) {
                if let CallKind::Scope(callee) = calls::classify_call(ctx, func) {
                    if !callees.contains(&callee) {
                        callees.push(callee);
                    }
                }
            }
        }
        for callee in callees {
            let Some(target) = ctx.hdl.hdl_of(callee) else {
                continue;
            };
            let inst = instance_name(ctx, scope, callee);
            let ctrl = |tag| SigSpec::scalar(1, sig_tags(&[tag, SigTag::Ctrl]));
            let mut connections = vec![
                (
                    Id::from("ready"),
                    ctx.hdl.gen_sig(h, &format!("{inst}_ready"), ctrl(SigTag::Reg)),
                ),
                (
                    Id::from("accept"),
                    ctx.hdl.gen_sig(h, &format!("{inst}_accept"), ctrl(SigTag::Reg)),
                ),
                (
                    Id::from("valid"),
                    ctx.hdl.gen_sig(h, &format!("{inst}_valid"), ctrl(SigTag::Net)),
                ),
            ];
            for p in ctx.scope(callee).param_symbols() {
                let Some(w) = ctx.sym(p).typ.width() else {
                    continue;
                };
                let signed = ctx.sym(p).typ.signed();
                let pname = ctx.sym_name(p);
                let s = ctx.hdl.gen_sig(
                    h,
                    &format!("{inst}_{pname}"),
                    SigSpec::scalar(w, sig_tags(&[SigTag::Reg])).signed(signed),
                );
                connections.push((pname, s));
            }
            let ret = &ctx.scope(callee).return_type;
            if let Some(w) = ret.width() {
                let signed = ret.signed();
                let s = ctx.hdl.gen_sig(
                    h,
                    &format!("{inst}_ret"),
                    SigSpec::scalar(w, sig_tags(&[SigTag::Net])).signed(signed),
                );
                connections.push((Id::from(ir::RETURN_SYM), s));
            }
            let marker = ctx.hdl.gen_sig(h, &inst, SigSpec::scalar(1, BTreeSet::new()));
            ctx.hdl.set_subscope(marker, target);
            ctx.hdl.scope_mut(h).submodules.push(SubModule {
                name: Id::from(inst.as_str()),
                target,
                connections,
                params: vec![],
            });
        }
    }
}

impl Visitor for HdlGen {
    fn start_context(&mut self, ctx: &mut ir::Context) -> VisResult {
        let modules: Vec<ScopeId> = ctx
            .scopes_with(ir::ScopeTag::Module)
            .into_iter()
            .filter(|m| !ctx.scope(*m).is_lib())
            .collect();
        for m in modules {
            Self::gen_module(ctx, m);
            let h = ctx.hdl.hdl_of(m);
            for w in ctx.scope(m).workers.clone() {
                if let Some(h) = h {
                    ctx.hdl.alias_scope(w.scope, h);
                }
            }
        }
        // Every FSM scope exists before any caller wires an instance.
        for scope in ctx.scope_ids() {
            if is_fsm_scope(ctx, scope) && ctx.hdl.hdl_of(scope).is_none() {
                let name = ctx.scope(scope).base_name;
                ctx.hdl.add_scope(name, scope);
            }
        }
        Ok(Action::Continue)
    }

    fn select(&self, ctx: &ir::Context, scope: ScopeId) -> bool {
        is_fsm_scope(ctx, scope)
    }

    fn start(&mut self, scope: ScopeId, ctx: &mut ir::Context) -> VisResult {
        let Some(h) = ctx.hdl.hdl_of(scope) else {
            return Ok(Action::SkipChildren);
        };
        ctx.build_usedef(scope);
        let syms: Vec<SymbolId> = ctx.scope(scope).symbols.values().copied().collect();
        for sym in syms {
            let s = ctx.sym(sym);
            let ud = &ctx.scope(scope).usedef;
            let referenced = !ud.get_stms_defining(sym).is_empty()
                || !ud.get_stms_using(sym).is_empty();
            if !(referenced || s.is_param() || s.is_return()) {
                continue;
            }
            if let Some(plan) = plan_of(ctx, sym) {
                let name = sig_name(ctx, scope, sym);
                add_plan(ctx, h, &name, sym, plan);
            }
        }
        if uses_handshake(ctx, scope) {
            let prefix = sig_prefix(ctx, scope);
            for (n, tag) in [
                ("ready", SigTag::Input),
                ("accept", SigTag::Input),
                ("valid", SigTag::Output),
            ] {
                let mut tags = sig_tags(&[tag, SigTag::Ctrl]);
                if tag == SigTag::Output {
                    tags.insert(SigTag::Reg);
                }
                ctx.hdl
                    .gen_sig(h, &format!("{prefix}{n}"), SigSpec::scalar(1, tags));
            }
        }
        Self::gen_instances(ctx, scope, h);
        log::debug!(
            "{}: {} signal(s) in {}",
            ctx.scope(scope).name,
            ctx.hdl.scope(h).signals.len(),
            ctx.hdl.scope(h).name
        );
        Ok(Action::SkipChildren)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ir::{BinOpKind, Builder, Length, Type};

    #[test]
    fn function_signals_follow_symbol_roles() {
        let mut ctx = ir::Context::default();
        let int = Type::int(32, true);
        let mut b = Builder::function(&mut ctx, "add");
        b.returns(int.clone());
        let a = b.param("a", int.clone());
        let c = b.param("b", int.clone());
        b.ret(Expr::binop(BinOpKind::Add, Expr::temp(a), Expr::temp(c)));
        let f = b.finish();
        HdlGen::do_pass_default(&mut ctx).unwrap();

        let h = ctx.hdl.hdl_of(f).unwrap();
        let sig = |n: &str| ctx.hdl.signal(ctx.hdl.sig_by_name(h, n).unwrap());
        assert!(sig("a").is_input());
        assert!(sig("b").is_input());
        let ret = sig(ir::RETURN_SYM);
        assert!(ret.is_output() && ret.is_reg());
        assert!(sig("ready").has_tag(SigTag::Ctrl));
        assert!(sig("valid").is_output());
    }

    #[test]
    fn read_only_lists_become_roms() {
        let mut ctx = ir::Context::default();
        let int = Type::int(8, false);
        let mut b = Builder::function(&mut ctx, "f");
        b.returns(int.clone());
        let i = b.param("i", Type::int(2, false));
        let t = b.local("t", Type::list(int.clone(), Length::Fixed(3)).with_readonly(true));
        let x = b.local("x", int.clone());
        b.mov(
            t,
            Expr::array(vec![Expr::int(5), Expr::int(6), Expr::int(7)], Expr::int(1)),
        );
        b.mov(x, Expr::mref(Expr::temp(t), Expr::temp(i)));
        b.ret(Expr::temp(x));
        let f = b.finish();
        HdlGen::do_pass_default(&mut ctx).unwrap();

        let h = ctx.hdl.hdl_of(f).unwrap();
        let rom = ctx.hdl.sig_by_name(h, "t").unwrap();
        assert!(ctx.hdl.signal(rom).has_tag(SigTag::Rom));
        let cases = ctx.hdl.scope(h).decls.iter().find_map(|d| match d {
            ADecl::Function { output, cases, .. } if *output == rom => Some(cases.clone()),
            _ => None,
        });
        assert_eq!(cases, Some(vec![(0, 5), (1, 6), (2, 7)]));
    }

    #[test]
    fn workers_live_in_their_module() {
        let mut ctx = ir::Context::default();
        let m = Builder::class(&mut ctx, "M", true);
        let dt = Type::int(8, false);
        let ct = ctx.channel_type(dt.clone(), 2);
        let c = Builder::field(&mut ctx, m, "c", ct);
        let mut w = Builder::method(&mut ctx, m, "w", &[ir::ScopeTag::Worker]);
        let this = w.self_sym().unwrap();
        let v = w.local("v", dt.clone());
        let recv = Expr::attr(Expr::temp(this), c, ir::Ctx::Load);
        let get = w.ctx.port_call(recv, true, "get", vec![]).unwrap();
        w.mov(v, get);
        let w = w.finish();
        ctx.scope_mut(m).workers.push(ir::Worker {
            scope: w,
            args: vec![],
        });
        HdlGen::do_pass_default(&mut ctx).unwrap();

        let hm = ctx.hdl.hdl_of(m).unwrap();
        assert_eq!(ctx.hdl.hdl_of(w), Some(hm));
        assert!(ctx.hdl.scope(hm).fsm_owners.contains(&w));
        assert!(ctx.hdl.sig_by_name(hm, "w_v").is_some());
        assert!(ctx.hdl.sig_by_name(hm, "c_full").is_some());
        let fifo = &ctx.hdl.scope(hm).submodules[0];
        assert_eq!(fifo.name, "c_fifo");
        assert!(fifo.params.contains(&(Id::from("DEPTH"), 2)));
    }
}
