use super::hdl_gen::is_fsm_scope;
use crate::analysis::calls::{self, CallKind};
use crate::analysis::dataflow::is_pipeline_region;
use crate::traversal::{Action, Named, VisResult, Visitor};
use polyphony_ir::{
    self as ir, BinOpKind, DataFlowGraph, HdlContext, HdlScopeId, ScopeId, SignalId, SymbolId,
    ahdl::{
        ADecl, AExpr, AStm, MetaWaitKind, PipelineSignals, PipelineState, SigSpec, SigTag,
        Target, sig_tags,
        visitor::{AhdlMutator, SignalReplacer, read_signals, written_signals},
    },
};
use polyphony_utils::{Error, ErrorKind, Id, PolyResult, bits_needed_for};
use std::collections::{BTreeMap, HashMap};

/// Generates the control of every pipelined loop.
///
/// Each stage of a pipeline state gets `valid`, `ready`, `last` and
/// `enable` signals (and `hold` when a stage may stall on I/O), the stage
/// bodies are guarded by the valid bit of the previous stage, and values
/// read more than one stage after their definition are carried through
/// register slices. Iterations are issued once per initiation interval,
/// counted by a sub-state register when the interval is longer than a
/// cycle. The state leaves for the loop exit once the last iteration has
/// drained, or at once when the loop condition fails on entry.
#[derive(Default)]
pub struct Pipeline;

impl Named for Pipeline {
    fn name() -> &'static str {
        "pipeline"
    }

    fn description() -> &'static str {
        "Generate stage control for pipelined loops"
    }
}

/// Rejects pipelines whose stages touch one port at different steps: each
/// port can be read and written by only one stage.
pub fn check_port_conflicts(ctx: &ir::Context, g: &DataFlowGraph) -> PolyResult<()> {
    let mut reads: HashMap<SymbolId, i64> = HashMap::new();
    let mut writes: HashMap<SymbolId, i64> = HashMap::new();
    for node in g.nodes.iter() {
        let stm = ctx.stm(node.stm);
        let Some((func, _)) = calls::stm_call(&stm.kind) else {
            continue;
        };
        let kind = calls::classify_call(ctx, func);
        let Some(port) = kind.port() else {
            continue;
        };
        let write = matches!(kind, CallKind::PortWrite(_) | CallKind::ChannelPut(_));
        let seen = if write { &mut writes } else { &mut reads };
        let step = *seen.entry(port).or_insert(node.begin);
        if step != node.begin {
            let name = ctx.sym_name(port);
            let kind = if write {
                ErrorKind::RuleWritingPipelineIsConflicted(name)
            } else {
                ErrorKind::RuleReadingPipelineIsConflicted(name)
            };
            return Err(Error::new(kind).with_loc(stm.loc));
        }
    }
    Ok(())
}

/// The condition a stage wait stands for.
fn wait_cond(kind: MetaWaitKind, args: &[AExpr]) -> AExpr {
    match kind {
        MetaWaitKind::Edge if args.len() > 2 => args[2..]
            .iter()
            .map(|p| AExpr::eq(p.clone(), args[1].clone()))
            .fold(AExpr::Const(1), AExpr::and),
        MetaWaitKind::Edge => AExpr::Const(1),
        _ => args.iter().cloned().fold(AExpr::Const(1), AExpr::and),
    }
}

/// Replace the waits of a stage by their codes, collecting their
/// conditions.
fn unwrap_waits(codes: Vec<AStm>, conds: &mut Vec<AExpr>) -> Vec<AStm> {
    let mut out = vec![];
    for c in codes {
        match c {
            AStm::MetaWait {
                kind, args, codes, ..
            } => {
                conds.push(wait_cond(kind, &args));
                out.extend(unwrap_waits(codes, conds));
            }
            c => out.push(c),
        }
    }
    out
}

struct PipelineBuilder<'a> {
    hdl: &'a mut HdlContext,
    h: HdlScopeId,
    prefix: String,
}

impl PipelineBuilder<'_> {
    fn ctrl(&mut self, name: &str, i: Option<usize>, reg: bool) -> SignalId {
        let n = match i {
            Some(i) => format!("{}_{name}{i}", self.prefix),
            None => format!("{}_{name}", self.prefix),
        };
        let kind = if reg { SigTag::Reg } else { SigTag::Net };
        self.hdl
            .gen_sig(self.h, &n, SigSpec::scalar(1, sig_tags(&[kind, SigTag::PipelineCtrl])))
    }

    /// Carry values read two or more stages after their definition through
    /// one register per stage in between.
    fn insert_slices(&mut self, stages: &mut [Vec<AStm>]) {
        let mut def_stage: HashMap<SignalId, usize> = HashMap::new();
        for (i, codes) in stages.iter().enumerate() {
            for s in written_signals(codes) {
                if !self.hdl.signal(s).width.is_array() {
                    def_stage.entry(s).or_insert(i);
                }
            }
        }
        let mut slices: BTreeMap<(usize, SignalId), SignalId> = BTreeMap::new();
        let mut maps: Vec<HashMap<SignalId, AExpr>> = vec![HashMap::new(); stages.len()];
        for (u, codes) in stages.iter().enumerate() {
            for s in read_signals(codes) {
                let Some(d) = def_stage.get(&s).copied() else {
                    continue;
                };
                if u < d + 2 {
                    continue;
                }
                for k in d + 1..u {
                    if !slices.contains_key(&(k, s)) {
                        let sig = self.hdl.signal(s);
                        let (w, signed) = (sig.width.bits(), sig.signed);
                        let name = format!("{}_{k}", self.hdl.sig_name(s));
                        let tags = sig_tags(&[SigTag::Reg, SigTag::PipelineReg]);
                        let slice =
                            self.hdl.gen_sig(self.h, &name, SigSpec::scalar(w, tags).signed(signed));
                        slices.insert((k, s), slice);
                    }
                }
                maps[u].insert(s, AExpr::Var(slices[&(u - 1, s)]));
            }
        }
        for (codes, map) in stages.iter_mut().zip(maps.iter()) {
            SignalReplacer { map }.mutate_stms(codes);
        }
        for ((k, s), slice) in slices.iter() {
            let src = if slices.contains_key(&(k - 1, *s)) {
                AExpr::Var(slices[&(k - 1, *s)])
            } else {
                AExpr::Var(*s)
            };
            stages[*k].push(AStm::mv(AExpr::Var(*slice), src));
        }
    }

    fn counter(&mut self, name: &str, width: u32, init: i64) -> SignalId {
        let n = format!("{}_{name}", self.prefix);
        let tags = sig_tags(&[SigTag::Reg, SigTag::PipelineCtrl]);
        self.hdl
            .gen_sig(self.h, &n, SigSpec::scalar(width, tags).init(Some(init)))
    }

    /// Fill the control of `ps`; returns the codes of the state itself.
    fn build(&mut self, ps: &mut PipelineState, exit_state: Option<Id>) -> Vec<AStm> {
        let n = ps.stages.len();
        let stall_free = ps.stall_free;
        let mut sigs = PipelineSignals::default();
        for i in 0..n {
            sigs.valid.push(self.ctrl("valid", Some(i), true));
            sigs.ready.push(self.ctrl("ready", Some(i), false));
            sigs.last.push(self.ctrl("last", Some(i), true));
            sigs.enable.push(self.ctrl("enable", Some(i), false));
            if !stall_free {
                sigs.hold.push(self.ctrl("hold", Some(i), true));
            }
        }
        let exit = self.ctrl("exit", None, true);
        sigs.exit = Some(exit);
        let init = self.counter("init", 1, 1);
        sigs.init = Some(init);
        if ps.ii > 1 {
            let w = bits_needed_for(ps.ii as u64) as u32;
            sigs.substate = Some(self.counter("substate", w, 0));
        }

        let mut bodies: Vec<Vec<AStm>> = vec![];
        for stage in ps.stages.iter_mut() {
            let mut conds = vec![];
            let codes = unwrap_waits(std::mem::take(&mut stage.codes), &mut conds);
            stage.enable = conds.into_iter().reduce(AExpr::and);
            bodies.push(codes);
        }
        self.insert_slices(&mut bodies);

        let var = AExpr::Var;
        let decls = &mut self.hdl.scope_mut(self.h).decls;
        for (i, stage) in ps.stages.iter().enumerate() {
            decls.push(ADecl::Assign {
                dst: sigs.enable[i],
                src: stage.enable.clone().unwrap_or(AExpr::Const(1)),
            });
        }
        // The last stage never stalls; the others wait for their successor
        // and for their own I/O.
        for i in (0..n).rev() {
            let src = if stall_free || i == n - 1 {
                AExpr::Const(1)
            } else if ps.stages[i].enable.is_some() {
                AExpr::and(var(sigs.ready[i + 1]), var(sigs.enable[i]))
            } else {
                var(sigs.ready[i + 1])
            };
            decls.push(ADecl::Assign {
                dst: sigs.ready[i],
                src,
            });
        }

        // A new iteration may only start on the first cycle of an interval.
        let slot = match sigs.substate {
            Some(sub) => AExpr::eq(var(sub), AExpr::Const(0)),
            None => AExpr::Const(1),
        };
        let ready0 = AExpr::and(var(sigs.ready[0]), slot);
        let issue = AExpr::and(
            ready0.clone(),
            AExpr::and(ps.cond.clone(), AExpr::not(var(sigs.last[0]))),
        );
        for (i, (stage, codes)) in ps.stages.iter_mut().zip(bodies).enumerate() {
            let cond = if i == 0 {
                issue.clone()
            } else {
                var(sigs.valid[i - 1])
            };
            stage.codes = vec![AStm::PipelineGuard { cond, codes }];
        }

        let mut codes = vec![
            AStm::mv(var(sigs.valid[0]), issue),
            AStm::mv(
                var(sigs.last[0]),
                AExpr::or(
                    var(sigs.last[0]),
                    AExpr::and(ready0, AExpr::not(ps.cond.clone())),
                ),
            ),
        ];
        if let Some(sub) = sigs.substate {
            let wrap = AExpr::IfExp {
                cond: Box::new(AExpr::eq(var(sub), AExpr::Const(ps.ii as i64 - 1))),
                lexp: Box::new(AExpr::Const(0)),
                rexp: Box::new(AExpr::bin(BinOpKind::Add, var(sub), AExpr::Const(1))),
            };
            codes.push(AStm::mv(
                var(sub),
                AExpr::IfExp {
                    cond: Box::new(var(sigs.ready[0])),
                    lexp: Box::new(wrap),
                    rexp: Box::new(var(sub)),
                },
            ));
        }
        for i in 1..n {
            let prev_valid = var(sigs.valid[i - 1]);
            let ready = var(sigs.ready[i]);
            let last = if i == n - 1 {
                AExpr::or(
                    var(sigs.last[i]),
                    AExpr::and(var(sigs.last[i - 1]), ready.clone()),
                )
            } else {
                AExpr::and(var(sigs.last[i - 1]), ready.clone())
            };
            if stall_free {
                codes.push(AStm::mv(var(sigs.valid[i]), prev_valid));
                codes.push(AStm::mv(var(sigs.last[i]), last));
                continue;
            }
            let hold = var(sigs.hold[i]);
            let not_ready = AExpr::not(ready.clone());
            codes.push(AStm::mv(
                hold.clone(),
                AExpr::IfExp {
                    cond: Box::new(hold.clone()),
                    lexp: Box::new(not_ready.clone()),
                    rexp: Box::new(AExpr::and(not_ready, prev_valid.clone())),
                },
            ));
            codes.push(AStm::mv(
                var(sigs.valid[i]),
                AExpr::IfExp {
                    cond: Box::new(hold),
                    lexp: Box::new(ready.clone()),
                    rexp: Box::new(AExpr::and(ready, prev_valid)),
                },
            ));
            codes.push(AStm::mv(var(sigs.last[i]), last));
        }
        // Leave once the final iteration went through the last stage, or
        // right away when the loop runs zero times.
        let drained = if n == 1 {
            var(sigs.last[0])
        } else {
            AExpr::and(var(sigs.last[n - 2]), var(sigs.ready[n - 1]))
        };
        let empty = AExpr::and(var(init), AExpr::not(ps.cond.clone()));
        codes.push(AStm::mv(var(exit), AExpr::or(drained, empty)));
        codes.push(AStm::mv(var(init), AExpr::Const(0)));

        if let Some(target) = exit_state {
            let mut resets = vec![
                AStm::mv(var(exit), AExpr::Const(0)),
                AStm::mv(var(init), AExpr::Const(1)),
            ];
            for s in sigs
                .last
                .iter()
                .chain(sigs.valid.iter())
                .chain(sigs.hold.iter())
                .chain(sigs.substate.iter())
            {
                resets.push(AStm::mv(var(*s), AExpr::Const(0)));
            }
            resets.push(AStm::Transition(Target::State(target)));
            codes.push(AStm::TransitionIf {
                conds: vec![var(exit)],
                blocks: vec![resets],
            });
        }
        ps.signals = sigs;
        codes
    }
}

impl Visitor for Pipeline {
    fn select(&self, ctx: &ir::Context, scope: ScopeId) -> bool {
        is_fsm_scope(ctx, scope)
    }

    fn start(&mut self, scope: ScopeId, ctx: &mut ir::Context) -> VisResult {
        for g in ctx.scope(scope).dfgs.iter() {
            if g.parent.is_some() && is_pipeline_region(ctx, scope, g.region) {
                check_port_conflicts(ctx, g)?;
            }
        }
        let Some(h) = ctx.hdl.hdl_of(scope) else {
            return Ok(Action::SkipChildren);
        };
        let stg_name = ctx.scope(scope).base_name;
        let Some(si) = ctx.hdl.scope(h).stgs.iter().position(|s| s.name == stg_name) else {
            return Ok(Action::SkipChildren);
        };
        let count = ctx.hdl.scope(h).stgs[si].states.len();
        for k in 0..count {
            let hs = ctx.hdl.scope_mut(h);
            let st = &mut hs.stgs[si].states[k];
            let Some(mut ps) = st.pipeline.take() else {
                continue;
            };
            let name = st.name;
            let exit_state = ps
                .exit_block
                .and_then(|b| hs.blk2states.get(&b))
                .and_then(|v| v.first())
                .map(|(_, s)| *s);
            let codes = PipelineBuilder {
                hdl: &mut ctx.hdl,
                h,
                prefix: name.to_string(),
            }
            .build(&mut ps, exit_state);
            log::debug!("{name}: {} stage(s)", ps.stages.len());
            let st = &mut ctx.hdl.scope_mut(h).stgs[si].states[k];
            st.codes = codes;
            st.pipeline = Some(ps);
        }
        Ok(Action::SkipChildren)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passes::{HdlGen, Schedule, StgBuild};
    use ir::{BinOpKind, Builder, Direction, Expr, Scheduling, SynthParams, Type};

    fn lower(ctx: &mut ir::Context) -> PolyResult<()> {
        Schedule::do_pass_default(ctx)?;
        HdlGen::do_pass_default(ctx)?;
        StgBuild::do_pass_default(ctx)?;
        Pipeline::do_pass_default(ctx)?;
        Ok(())
    }

    fn pipelined() -> SynthParams {
        SynthParams {
            scheduling: Scheduling::Pipeline,
            ..Default::default()
        }
    }

    #[test]
    fn stages_get_control_and_slices() {
        let mut ctx = ir::Context::default();
        let int = Type::int(32, true);
        let mut b = Builder::function(&mut ctx, "f");
        b.returns(int.clone());
        let s = b.local("s", int.clone());
        let x = b.local("x", int.clone());
        let y = b.local("y", int.clone());
        let z = b.local("z", int.clone());
        b.mov(s, Expr::int(0));
        b.for_range("i", Expr::int(0), Expr::int(8), 1, pipelined(), |b, i| {
            b.mov(x, Expr::binop(BinOpKind::Mult, Expr::temp(i), Expr::int(2)));
            b.mov(y, Expr::binop(BinOpKind::Add, Expr::temp(x), Expr::int(1)));
            b.mov(z, Expr::binop(BinOpKind::Add, Expr::temp(y), Expr::temp(x)));
            b.mov(s, Expr::binop(BinOpKind::Add, Expr::temp(s), Expr::temp(z)));
        });
        b.ret(Expr::temp(s));
        let f = b.finish();
        lower(&mut ctx).unwrap();

        let h = ctx.hdl.hdl_of(f).unwrap();
        let hs = ctx.hdl.scope(h);
        let st = hs.all_states().find(|s| s.pipeline.is_some()).unwrap();
        let ps = st.pipeline.as_ref().unwrap();
        assert_eq!(ps.stages.len(), 4);
        assert!(ps.stall_free);
        assert_eq!(ps.signals.valid.len(), 4);
        assert!(ps.signals.hold.is_empty());
        assert!(ps.signals.exit.is_some());
        assert!(ps.stages.iter().all(|s| matches!(
            s.codes.as_slice(),
            [AStm::PipelineGuard { .. }]
        )));
        assert!(matches!(st.codes.last(), Some(AStm::TransitionIf { .. })));

        // `x` is read two stages after it is written.
        let slice = ctx.hdl.sig_by_name(h, "x_1").unwrap();
        assert!(ctx.hdl.signal(slice).has_tag(SigTag::PipelineReg));
        assert!(read_signals(&ps.stages[2].codes).contains(&slice));
    }

    #[test]
    fn carried_value_stretches_the_interval() {
        // `t = s + i; s = t * 2`: `s` is written a stage after `t` reads it.
        let mut ctx = ir::Context::default();
        let int = Type::int(32, true);
        let mut b = Builder::function(&mut ctx, "f");
        b.returns(int.clone());
        let s = b.local("s", int.clone());
        let t = b.local("t", int.clone());
        b.mov(s, Expr::int(0));
        b.for_range("i", Expr::int(0), Expr::int(4), 1, pipelined(), |b, i| {
            b.mov(t, Expr::binop(BinOpKind::Add, Expr::temp(s), Expr::temp(i)));
            b.mov(s, Expr::binop(BinOpKind::Mult, Expr::temp(t), Expr::int(2)));
        });
        b.ret(Expr::temp(s));
        let f = b.finish();
        lower(&mut ctx).unwrap();

        let h = ctx.hdl.hdl_of(f).unwrap();
        let hs = ctx.hdl.scope(h);
        let st = hs.all_states().find(|s| s.pipeline.is_some()).unwrap();
        let ps = st.pipeline.as_ref().unwrap();
        assert_eq!(ps.stages.len(), 2);
        assert_eq!(ps.ii, 2);
        let sub = ps.signals.substate.unwrap();
        let AStm::PipelineGuard { cond, .. } = &ps.stages[0].codes[0] else {
            panic!("stage 0 is not guarded");
        };
        assert!(cond.signals().contains(&sub));
        assert!(written_signals(&st.codes).contains(&sub));
    }

    #[test]
    fn failing_condition_on_entry_exits_at_once() {
        let mut ctx = ir::Context::default();
        let int = Type::int(32, true);
        let mut b = Builder::function(&mut ctx, "f");
        b.returns(int.clone());
        let n = b.param("n", int.clone());
        let s = b.local("s", int.clone());
        b.mov(s, Expr::int(0));
        b.for_range("i", Expr::int(0), Expr::temp(n), 1, pipelined(), |b, i| {
            b.mov(s, Expr::binop(BinOpKind::Add, Expr::temp(s), Expr::temp(i)));
        });
        b.ret(Expr::temp(s));
        let f = b.finish();
        lower(&mut ctx).unwrap();

        let h = ctx.hdl.hdl_of(f).unwrap();
        let hs = ctx.hdl.scope(h);
        let st = hs.all_states().find(|s| s.pipeline.is_some()).unwrap();
        let ps = st.pipeline.as_ref().unwrap();
        let (exit, init) = (ps.signals.exit.unwrap(), ps.signals.init.unwrap());
        assert_eq!(ctx.hdl.signal(init).init, Some(1));
        let exit_src = st
            .codes
            .iter()
            .find_map(|c| match c {
                AStm::Move {
                    dst: AExpr::Var(d),
                    src,
                } if *d == exit => Some(src),
                _ => None,
            })
            .unwrap();
        assert!(exit_src.signals().contains(&init));
        // The last stage is always ready.
        let last_ready = ps.signals.ready[ps.stages.len() - 1];
        assert!(hs.decls.iter().any(|d| matches!(
            d,
            ADecl::Assign { dst, src: AExpr::Const(1) } if *dst == last_ready
        )));
    }

    #[test]
    fn two_stages_reading_one_port_conflict() {
        let mut ctx = ir::Context::default();
        let m = Builder::class(&mut ctx, "M", true);
        let dt = Type::int(8, false);
        let pt = ctx.port_type(dt.clone(), Direction::In, None);
        let p = Builder::field(&mut ctx, m, "p", pt);
        let mut w = Builder::method(&mut ctx, m, "w", &[ir::ScopeTag::Worker]);
        let this = w.self_sym().unwrap();
        let a = w.local("a", dt.clone());
        let c = w.local("c", dt.clone());
        let recv = Expr::attr(Expr::temp(this), p, ir::Ctx::Load);
        let rd1 = w.ctx.port_call(recv.clone(), false, "rd", vec![]).unwrap();
        let rd2 = w.ctx.port_call(recv, false, "rd", vec![]).unwrap();
        w.for_range("i", Expr::int(0), Expr::int(4), 1, pipelined(), |b, _| {
            b.mov(a, rd1);
            b.mov(c, rd2);
        });
        let w = w.finish();
        ctx.scope_mut(m).workers.push(ir::Worker {
            scope: w,
            args: vec![],
        });
        let err = lower(&mut ctx).unwrap_err();
        assert_eq!(
            err.kind(),
            &ErrorKind::RuleReadingPipelineIsConflicted(Id::from("p"))
        );
    }
}
