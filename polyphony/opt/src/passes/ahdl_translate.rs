//! Translation of single IR statements into AHDL.
//!
//! A statement may expand into codes spread over several steps, such as
//! the handshake of a sub-module call. Each code comes with the offset of
//! its step from the step the statement was scheduled in.
use super::hdl_gen::{instance_name, sig_prefix};
use crate::analysis::calls::{self, CallKind};
use polyphony_ir::{
    self as ir, Const, Expr, HdlContext, HdlScopeId, ScopeId, SignalId, StmId, StmKind,
    SymbolId,
    ahdl::{AExpr, AStm, MetaWaitKind, SigSpec, SigTag, SubModule, Target, sig_tags},
};
use polyphony_utils::{Error, Id, Loc, PolyResult};

/// Codes of one statement, keyed by step offset.
pub(super) type Items = Vec<(i64, AStm)>;

pub(super) struct Translator<'a> {
    ctx: &'a ir::Context,
    hdl: &'a mut HdlContext,
    scope: ScopeId,
    h: HdlScopeId,
    /// Name of the state a RET transitions to.
    finish: Id,
    loc: Loc,
}

impl<'a> Translator<'a> {
    pub fn new(
        ctx: &'a ir::Context,
        hdl: &'a mut HdlContext,
        scope: ScopeId,
        h: HdlScopeId,
        finish: Id,
    ) -> Self {
        Translator {
            ctx,
            hdl,
            scope,
            h,
            finish,
            loc: Loc::default(),
        }
    }

    fn sig(&self, sym: SymbolId) -> PolyResult<SignalId> {
        self.hdl.sig_of_sym(self.h, sym).ok_or_else(|| {
            Error::internal(format!("no signal for `{}'", self.ctx.sym_name(sym)))
                .with_loc(self.loc)
        })
    }

    /// A signal generated by hdl-gen under a known name.
    fn named(&self, name: &str) -> PolyResult<SignalId> {
        self.hdl
            .sig_by_name(self.h, name)
            .ok_or_else(|| Error::internal(format!("no signal `{name}'")).with_loc(self.loc))
    }

    fn var(&self, sym: SymbolId) -> PolyResult<AExpr> {
        let s = self.sig(sym)?;
        Ok(if self.hdl.signal(s).width.is_array() {
            AExpr::MemVar(s)
        } else {
            AExpr::Var(s)
        })
    }

    fn sym_of(&self, e: &Expr) -> PolyResult<SymbolId> {
        e.symbol().ok_or_else(|| {
            Error::internal(format!("expected a variable, found {e:?}")).with_loc(self.loc)
        })
    }

    fn clk_cnt(&mut self) -> SignalId {
        let w = self.ctx.config.default_int_width;
        self.hdl.gen_sig(
            self.h,
            "clk_cnt",
            SigSpec::scalar(w, sig_tags(&[SigTag::Reg, SigTag::Ctrl])),
        )
    }

    pub fn expr(&mut self, e: &Expr) -> PolyResult<AExpr> {
        Ok(match e {
            Expr::Const(Const::Int(i)) => AExpr::Const(*i),
            Expr::Const(Const::Bool(b)) => AExpr::Const(*b as i64),
            Expr::Const(Const::Str(s)) => AExpr::Symbol(Id::from(format!("\"{s}\""))),
            Expr::Const(Const::None) => AExpr::Const(0),
            Expr::Temp { sym, .. } | Expr::Attr { attr: sym, .. } => self.var(*sym)?,
            Expr::UnOp { op, exp } => AExpr::un(*op, self.expr(exp)?),
            Expr::BinOp { op, left, right } => {
                AExpr::bin(*op, self.expr(left)?, self.expr(right)?)
            }
            Expr::RelOp { op, left, right } => {
                AExpr::rel(*op, self.expr(left)?, self.expr(right)?)
            }
            Expr::CondOp { cond, left, right } => AExpr::IfExp {
                cond: Box::new(self.expr(cond)?),
                lexp: Box::new(self.expr(left)?),
                rexp: Box::new(self.expr(right)?),
            },
            Expr::MRef { mem, offset, .. } => {
                let m = self.sig(self.sym_of(mem)?)?;
                let offset = self.expr(offset)?;
                if self.hdl.signal(m).has_tag(SigTag::Rom) {
                    AExpr::FunCall {
                        name: self.hdl.sig_name(m),
                        args: vec![offset],
                    }
                } else {
                    AExpr::Subscript {
                        mem: m,
                        offset: Box::new(offset),
                    }
                }
            }
            Expr::Syscall { name, args } if name == "len" => {
                let len = args
                    .first()
                    .and_then(|a| a.symbol())
                    .and_then(|s| self.ctx.sym(s).typ.length());
                match len {
                    Some(n) => AExpr::Const(n as i64),
                    None => {
                        return Err(Error::misc("length of the sequence is unknown")
                            .with_loc(self.loc));
                    }
                }
            }
            Expr::Syscall { name, .. } if name == "polyphony.timing.clktime" => {
                AExpr::Var(self.clk_cnt())
            }
            _ => {
                return Err(
                    Error::internal(format!("cannot lower expression {e:?}")).with_loc(self.loc)
                );
            }
        })
    }

    fn exprs(&mut self, es: &[Expr]) -> PolyResult<Vec<AExpr>> {
        es.iter().map(|e| self.expr(e)).collect()
    }

    /// Lower statement `stm`.
    pub fn stm(&mut self, stm: StmId) -> PolyResult<Items> {
        let ctx = self.ctx;
        let kind = &ctx.stm(stm).kind;
        self.loc = ctx.stm(stm).loc;
        // The new object has no signal of its own; it names the instance.
        if let Some(("$new", args)) = calls::stm_syscall(kind) {
            let name = kind.dst().and_then(|d| d.symbol());
            return self.instantiate(name, args);
        }
        let (cond, dst) = match kind {
            StmKind::Move { dst, .. } => (None, Some(dst)),
            StmKind::CMove { cond, dst, .. } => (Some(cond), Some(dst)),
            StmKind::CExpr { cond, .. } => (Some(cond), None),
            _ => (None, None),
        };
        let dst = match dst {
            Some(d) if !matches!(d, Expr::MRef { .. }) => Some(self.var(self.sym_of(d)?)?),
            _ => None,
        };
        let items = if let Some((func, args)) = calls::stm_call(kind) {
            self.call(func, args, dst)?
        } else if let Some((name, args)) = calls::stm_syscall(kind) {
            self.syscall(name, args, dst)?
        } else {
            self.plain(kind, dst)?
        };
        match cond {
            Some(c) => {
                let c = self.expr(c)?;
                Ok(items
                    .into_iter()
                    .map(|(off, code)| {
                        let guarded = AStm::If {
                            conds: vec![c.clone()],
                            blocks: vec![vec![code]],
                        };
                        (off, guarded)
                    })
                    .collect())
            }
            None => Ok(items),
        }
    }

    fn plain(&mut self, kind: &StmKind, dst: Option<AExpr>) -> PolyResult<Items> {
        let at0 = |c: AStm| vec![(0, c)];
        Ok(match kind {
            StmKind::Move { src, .. } | StmKind::CMove { src, .. } => {
                let Some(dst) = dst else {
                    return Err(Error::internal("element store left in a move").with_loc(self.loc));
                };
                match src {
                    Expr::Array { items, repeat, .. } => self.array_init(dst, items, repeat)?,
                    Expr::MRef { mem, offset, .. } => {
                        let m = self.sig(self.sym_of(mem)?)?;
                        if self.hdl.signal(m).has_tag(SigTag::Rom) {
                            at0(AStm::mv(dst, self.expr(src)?))
                        } else {
                            at0(AStm::Load {
                                dst,
                                mem: m,
                                offset: self.expr(offset)?,
                            })
                        }
                    }
                    _ => at0(AStm::mv(dst, self.expr(src)?)),
                }
            }
            StmKind::Expr(Expr::MStore { mem, offset, exp })
            | StmKind::CExpr {
                exp: Expr::MStore { mem, offset, exp },
                ..
            } => at0(AStm::Store {
                mem: self.sig(self.sym_of(mem)?)?,
                offset: self.expr(offset)?,
                src: self.expr(exp)?,
            }),
            // Anything else at statement level has no effect.
            StmKind::Expr(_) | StmKind::CExpr { .. } => vec![],
            StmKind::Jump { target, .. } => at0(AStm::Transition(Target::Block(*target))),
            StmKind::CJump {
                exp,
                true_blk,
                false_blk,
            } => at0(AStm::TransitionIf {
                conds: vec![self.expr(exp)?, AExpr::Const(1)],
                blocks: vec![
                    vec![AStm::Transition(Target::Block(*true_blk))],
                    vec![AStm::Transition(Target::Block(*false_blk))],
                ],
            }),
            StmKind::MCJump { conds, targets } => at0(AStm::TransitionIf {
                conds: self.exprs(conds)?,
                blocks: targets
                    .iter()
                    .map(|t| vec![AStm::Transition(Target::Block(*t))])
                    .collect(),
            }),
            StmKind::Ret(_) => at0(AStm::Transition(Target::State(self.finish))),
            StmKind::Phi(_) => {
                return Err(Error::internal("phi left at lowering").with_loc(self.loc));
            }
        })
    }

    /// One element per step, the way the schedule reserved them.
    fn array_init(&mut self, dst: AExpr, items: &[Expr], repeat: &Expr) -> PolyResult<Items> {
        let Some(mem) = dst.signal() else {
            return Ok(vec![]);
        };
        if self.hdl.signal(mem).has_tag(SigTag::Rom) {
            // Contents live in the lookup function.
            return Ok(vec![]);
        }
        let n = repeat.as_int().unwrap_or(1).max(1) as usize;
        let values = self.exprs(items)?;
        let span = values.len() as i64;
        let total = values.len() * n;
        Ok(values
            .into_iter()
            .cycle()
            .take(total)
            .enumerate()
            .map(|(i, v)| {
                let store = AStm::Store {
                    mem,
                    offset: AExpr::Const(i as i64),
                    src: v,
                };
                ((i as i64).min(span - 1), store)
            })
            .collect())
    }

    fn call(&mut self, func: &Expr, args: &[Expr], dst: Option<AExpr>) -> PolyResult<Items> {
        let kind = calls::classify_call(self.ctx, func);
        let port_sig = |t: &Self, p: SymbolId, suffix: &str| {
            if suffix.is_empty() {
                t.sig(p)
            } else {
                t.named(&format!("{}_{suffix}", t.ctx.sym_name(p)))
            }
        };
        let need_dst = |d: Option<AExpr>| {
            d.ok_or_else(|| Error::internal("call result has no destination"))
        };
        Ok(match kind {
            CallKind::Scope(callee) => {
                let inst = instance_name(self.ctx, self.scope, callee);
                let target = self.hdl.hdl_of(callee).ok_or_else(|| {
                    Error::internal(format!("`{}' has no HDL scope", self.ctx.scope(callee).name))
                })?;
                let ready = self.named(&format!("{inst}_ready"))?;
                let accept = self.named(&format!("{inst}_accept"))?;
                let valid = self.named(&format!("{inst}_valid"))?;
                let ret = self.hdl.sig_by_name(self.h, &format!("{inst}_ret"));
                let mut done = vec![
                    AStm::mv(AExpr::Var(ready), AExpr::Const(0)),
                    AStm::mv(AExpr::Var(accept), AExpr::Const(1)),
                ];
                if let (Some(d), Some(r)) = (dst, ret) {
                    done.push(AStm::mv(d, AExpr::Var(r)));
                }
                vec![
                    (
                        0,
                        AStm::ModuleCall {
                            instance: Id::from(inst.as_str()),
                            callee: target,
                            args: self.exprs(args)?,
                            returns: ret.map(AExpr::Var).into_iter().collect(),
                        },
                    ),
                    (
                        1,
                        AStm::MetaWait {
                            kind: MetaWaitKind::Value,
                            args: vec![AExpr::Var(valid)],
                            codes: done,
                            transition: None,
                        },
                    ),
                    (2, AStm::mv(AExpr::Var(accept), AExpr::Const(0))),
                ]
            }
            CallKind::PortRead(p) => {
                vec![(0, AStm::mv(need_dst(dst)?, AExpr::Var(port_sig(self, p, "")?)))]
            }
            CallKind::PortWrite(p) => {
                let v = match args.first() {
                    Some(a) => self.expr(a)?,
                    None => return Err(Error::internal("port write without a value")),
                };
                vec![(0, AStm::mv(AExpr::Var(port_sig(self, p, "")?), v))]
            }
            CallKind::ChannelPut(c) => {
                let v = match args.first() {
                    Some(a) => self.expr(a)?,
                    None => return Err(Error::internal("channel put without a value")),
                };
                let (din, put) = (port_sig(self, c, "din")?, port_sig(self, c, "put")?);
                let full = port_sig(self, c, "full")?;
                vec![
                    (
                        0,
                        AStm::MetaWait {
                            kind: MetaWaitKind::Value,
                            args: vec![AExpr::not(AExpr::Var(full))],
                            codes: vec![
                                AStm::mv(AExpr::Var(din), v),
                                AStm::mv(AExpr::Var(put), AExpr::Const(1)),
                            ],
                            transition: None,
                        },
                    ),
                    (1, AStm::mv(AExpr::Var(put), AExpr::Const(0))),
                ]
            }
            CallKind::ChannelGet(c) => {
                let (dout, get) = (port_sig(self, c, "dout")?, port_sig(self, c, "get")?);
                let empty = port_sig(self, c, "empty")?;
                let mut codes = vec![AStm::mv(AExpr::Var(get), AExpr::Const(1))];
                if let Some(d) = dst {
                    codes.insert(0, AStm::mv(d, AExpr::Var(dout)));
                }
                vec![
                    (
                        0,
                        AStm::MetaWait {
                            kind: MetaWaitKind::Value,
                            args: vec![AExpr::not(AExpr::Var(empty))],
                            codes,
                            transition: None,
                        },
                    ),
                    (1, AStm::mv(AExpr::Var(get), AExpr::Const(0))),
                ]
            }
            CallKind::ChannelFull(c) => {
                vec![(0, AStm::mv(need_dst(dst)?, AExpr::Var(port_sig(self, c, "full")?)))]
            }
            CallKind::ChannelEmpty(c) => {
                vec![(0, AStm::mv(need_dst(dst)?, AExpr::Var(port_sig(self, c, "empty")?)))]
            }
            CallKind::Other => {
                let name = func
                    .symbol()
                    .map(|s| self.ctx.sym_name(s).to_string())
                    .unwrap_or_else(|| "?".to_string());
                return Err(Error::misc(format!(
                    "call to `{name}' has no hardware implementation"
                ))
                .with_loc(self.loc));
            }
        })
    }

    /// `$new(cls, args..)`: an instance of the module `cls`, wired into the
    /// current scope once. Constant arguments become instance parameters
    /// named after the constructor's parameters.
    fn instantiate(&mut self, var: Option<SymbolId>, args: &[Expr]) -> PolyResult<Items> {
        let ctx = self.ctx;
        let Some((cls, rest)) = args.split_first() else {
            return Err(Error::misc("$new needs a class").with_loc(self.loc));
        };
        let cls = cls
            .symbol()
            .and_then(|s| ctx.sym(s).typ.scope())
            .ok_or_else(|| Error::misc("$new needs a class").with_loc(self.loc))?;
        let target = self.hdl.hdl_of(cls).ok_or_else(|| {
            Error::misc(format!(
                "`{}' cannot be instantiated in hardware",
                ctx.scope(cls).name
            ))
            .with_loc(self.loc)
        })?;
        let inst = match var {
            Some(v) => format!("{}{}", sig_prefix(ctx, self.scope), ctx.sym_name(v)),
            None => instance_name(ctx, self.scope, cls),
        };
        if self.hdl.sig_by_name(self.h, &inst).is_some() {
            return Ok(vec![]);
        }
        let ctor_params: Vec<Id> = ctx
            .scope(cls)
            .children
            .iter()
            .find(|c| ctx.scope(**c).is_ctor())
            .map(|c| {
                ctx.scope(*c)
                    .param_symbols()
                    .into_iter()
                    .filter(|p| !ctx.sym(*p).is_self())
                    .map(|p| ctx.sym_name(p))
                    .collect()
            })
            .unwrap_or_default();
        let params = ctor_params
            .into_iter()
            .zip(rest.iter())
            .filter_map(|(n, a)| a.as_int().map(|v| (n, v)))
            .collect();
        let marker = self
            .hdl
            .gen_sig(self.h, &inst, SigSpec::scalar(1, sig_tags(&[SigTag::Subscope])));
        self.hdl.set_subscope(marker, target);
        self.hdl.scope_mut(self.h).submodules.push(SubModule {
            name: Id::from(inst.as_str()),
            target,
            connections: vec![],
            params,
        });
        Ok(vec![])
    }

    fn syscall(&mut self, name: &str, args: &[Expr], dst: Option<AExpr>) -> PolyResult<Items> {
        let wait = |kind, args| {
            vec![(
                0,
                AStm::MetaWait {
                    kind,
                    args,
                    codes: vec![],
                    transition: None,
                },
            )]
        };
        Ok(match name {
            "print" => vec![(
                0,
                AStm::Expr(AExpr::FunCall {
                    name: Id::from("$display"),
                    args: self.exprs(args)?,
                }),
            )],
            "assert" => vec![(
                0,
                AStm::Expr(AExpr::FunCall {
                    name: Id::from("assert"),
                    args: self.exprs(args)?,
                }),
            )],
            // The schedule already reserved the steps.
            "polyphony.timing.clksleep" | "polyphony.timing.clkfence" => vec![],
            "polyphony.timing.wait_rising" | "polyphony.timing.wait_falling" => {
                let (old, new) = if name.ends_with("rising") { (0, 1) } else { (1, 0) };
                let mut wargs = vec![AExpr::Const(old), AExpr::Const(new)];
                wargs.extend(self.exprs(args)?);
                wait(MetaWaitKind::Edge, wargs)
            }
            "polyphony.timing.wait_edge" => wait(MetaWaitKind::Edge, self.exprs(args)?),
            "polyphony.timing.wait_value" => {
                let Some((value, ports)) = args.split_first() else {
                    return Err(Error::misc("wait_value needs a value").with_loc(self.loc));
                };
                let value = self.expr(value)?;
                let conds = ports
                    .iter()
                    .map(|p| Ok(AExpr::eq(self.expr(p)?, value.clone())))
                    .collect::<PolyResult<Vec<_>>>()?;
                wait(MetaWaitKind::Value, conds)
            }
            "read_reg" => match (dst, args) {
                (Some(d), [reg]) => vec![(0, AStm::mv(d, self.expr(reg)?))],
                (None, [_]) => vec![],
                _ => {
                    return Err(Error::misc("read_reg takes one register").with_loc(self.loc));
                }
            },
            "write_reg" => {
                let [reg, value] = args else {
                    return Err(
                        Error::misc("write_reg takes a register and a value").with_loc(self.loc)
                    );
                };
                let reg = self.var(self.sym_of(reg)?)?;
                vec![(0, AStm::mv(reg, self.expr(value)?))]
            }
            "polyphony.timing.clktime" | "len" => match dst {
                Some(d) => {
                    let e = Expr::syscall(name, args.to_vec());
                    vec![(0, AStm::mv(d, self.expr(&e)?))]
                }
                None => vec![],
            },
            _ => {
                return Err(
                    Error::misc(format!("`{name}' cannot be used in hardware")).with_loc(self.loc)
                );
            }
        })
    }
}
