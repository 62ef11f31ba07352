use super::ahdl_translate::Translator;
use super::hdl_gen::{is_fsm_scope, sig_prefix, uses_handshake};
use crate::analysis::calls;
use crate::analysis::dataflow::{branch_cond, is_pipeline_region, issue_interval};
use crate::traversal::{Action, Named, VisResult, Visitor};
use polyphony_ir::{
    self as ir, BlockId, HdlContext, HdlScopeId, ScopeId, StmKind,
    ahdl::{
        AExpr, AStm, MetaWaitKind, PipelineSignals, PipelineStage, PipelineState, State,
        Stg, Target,
    },
};
use polyphony_utils::{Error, Id, PolyResult};
use std::collections::{BTreeMap, HashMap};

/// Builds the state transition graph of every FSM scope from its schedule.
///
/// Every non-empty step of a block becomes a state, in block order, between
/// an `_INIT` and a `_FINISH` state. A pipelined loop becomes a single state
/// holding one stage per step; the pipeline pass fills in its control.
/// Transitions to blocks are resolved to the first state of the block, and
/// a wait absorbs the codes and the transition following it.
#[derive(Default)]
pub struct StgBuild;

impl Named for StgBuild {
    fn name() -> &'static str {
        "stg-build"
    }

    fn description() -> &'static str {
        "Build state transition graphs from the schedule"
    }
}

impl Visitor for StgBuild {
    fn select(&self, ctx: &ir::Context, scope: ScopeId) -> bool {
        is_fsm_scope(ctx, scope)
    }

    fn start(&mut self, scope: ScopeId, ctx: &mut ir::Context) -> VisResult {
        let Some(h) = ctx.hdl.hdl_of(scope) else {
            return Err(Error::pass_assumption(
                Self::name(),
                format!("`{}' has no HDL scope", ctx.scope(scope).name),
            ));
        };
        if ctx.scope(scope).dfgs.is_empty() {
            return Err(Error::pass_assumption(
                Self::name(),
                format!("`{}' is not scheduled", ctx.scope(scope).name),
            ));
        }
        let mut hdl = std::mem::take(&mut ctx.hdl);
        let res = StgBuilder::new(ctx, scope, h).build(&mut hdl);
        ctx.hdl = hdl;
        res?;
        Ok(Action::SkipChildren)
    }
}

/// Statements that hold the FSM for every step they span.
fn holds_clock(kind: &StmKind) -> bool {
    matches!(
        calls::stm_syscall(kind),
        Some(("polyphony.timing.clksleep" | "polyphony.timing.clkfence", _))
    )
}

fn has_wait(codes: &[AStm]) -> bool {
    codes
        .iter()
        .any(|c| c.is_wait() || c.blocks().into_iter().any(|b| has_wait(b)))
}

struct StgBuilder<'a> {
    ctx: &'a ir::Context,
    scope: ScopeId,
    h: HdlScopeId,
    name: String,
    states: Vec<State>,
    /// First state of each block, then the others.
    blk_states: HashMap<BlockId, Vec<Id>>,
    counter: usize,
}

impl<'a> StgBuilder<'a> {
    fn new(ctx: &'a ir::Context, scope: ScopeId, h: HdlScopeId) -> Self {
        StgBuilder {
            ctx,
            scope,
            h,
            name: ctx.scope(scope).base_name.to_string(),
            states: vec![],
            blk_states: HashMap::new(),
            counter: 0,
        }
    }

    fn init_name(&self) -> Id {
        Id::from(format!("{}_INIT", self.name))
    }

    fn finish_name(&self) -> Id {
        Id::from(format!("{}_FINISH", self.name))
    }

    fn state_name(&mut self, blk: BlockId, k: usize, suffix: &str) -> Id {
        let n = if self.ctx.config.verbose_state_names {
            format!("{}_{}_{suffix}{k}", self.name, self.ctx.block(blk).name())
        } else {
            format!("{}_S{}", self.name, self.counter)
        };
        self.counter += 1;
        Id::from(n)
    }

    fn build(mut self, hdl: &mut HdlContext) -> PolyResult<()> {
        let ctx = self.ctx;
        let graphs = &ctx.scope(self.scope).dfgs;
        let mut owner: HashMap<BlockId, usize> = HashMap::new();
        for (i, g) in graphs.iter().enumerate() {
            for b in g.blocks.iter() {
                owner.insert(*b, i);
            }
        }
        let pipelined: Vec<bool> = graphs
            .iter()
            .map(|g| g.parent.is_some() && is_pipeline_region(ctx, self.scope, g.region))
            .collect();

        let mut tr = Translator::new(ctx, hdl, self.scope, self.h, self.finish_name());
        self.states.push(State::new(self.init_name(), 0, vec![]));
        for blk in ctx.traverse_blocks(self.scope) {
            let Some(gi) = owner.get(&blk).copied() else {
                return Err(Error::internal(format!(
                    "block {} of `{}' is not scheduled",
                    ctx.block(blk).name(),
                    ctx.scope(self.scope).name
                )));
            };
            if !pipelined[gi] {
                self.block_states(gi, blk, &mut tr)?;
            } else if graphs[gi].region == blk {
                self.pipeline_state(gi, &mut tr)?;
            }
        }
        self.states.push(State::new(self.finish_name(), 0, vec![]));
        self.fill_init_finish(hdl)?;

        for st in self.states.iter_mut() {
            if st.pipeline.is_none() && !st.codes.last().is_some_and(|c| c.is_transition()) {
                st.codes.push(AStm::Transition(Target::Next));
            }
            absorb_waits(&mut st.codes);
        }
        let first: HashMap<BlockId, Id> = self
            .blk_states
            .iter()
            .filter_map(|(b, v)| v.first().map(|s| (*b, *s)))
            .collect();
        let names: Vec<Id> = self.states.iter().map(|s| s.name).collect();
        for (i, st) in self.states.iter_mut().enumerate() {
            let next = names.get(i + 1).copied();
            resolve(&mut st.codes, next, &first)?;
        }

        let hs = hdl.scope_mut(self.h);
        let index = hs.stgs.len();
        let mut stg = Stg::new(Id::from(self.name.as_str()), None);
        stg.init_state = Some(self.init_name());
        stg.finish_state = Some(self.finish_name());
        log::debug!("{}: {} state(s)", self.name, self.states.len());
        stg.states = self.states;
        hs.stgs.push(stg);
        for (b, v) in self.blk_states {
            hs.blk2states
                .insert(b, v.into_iter().map(|s| (index, s)).collect());
        }
        Ok(())
    }

    /// One state per non-empty step of `blk`, plus the steps a clock wait
    /// holds.
    fn block_states(&mut self, gi: usize, blk: BlockId, tr: &mut Translator) -> PolyResult<()> {
        let ctx = self.ctx;
        let g = &ctx.scope(self.scope).dfgs[gi];
        let mut queue: BTreeMap<i64, Vec<AStm>> = BTreeMap::new();
        for (step, nodes) in g.steps_of_block(blk) {
            for n in nodes {
                let node = &g.nodes[n];
                if holds_clock(&ctx.stm(node.stm).kind) {
                    for s in node.begin..node.end.max(node.begin + 1) {
                        queue.entry(s).or_default();
                    }
                }
                for (off, code) in tr.stm(node.stm)? {
                    queue.entry(step + off).or_default().push(code);
                }
            }
        }
        if queue.is_empty() {
            queue.insert(0, vec![]);
        }
        for (k, (step, codes)) in queue.into_iter().enumerate() {
            // The block's exit comes last in its step.
            let (mut codes, jumps): (Vec<AStm>, Vec<AStm>) =
                codes.into_iter().partition(|c| !c.is_transition());
            codes.extend(jumps);
            let name = self.state_name(blk, k, "S");
            self.blk_states.entry(blk).or_default().push(name);
            self.states.push(State::new(name, step as u32, codes));
        }
        Ok(())
    }

    /// The state running a pipelined loop; one stage per scheduled step.
    fn pipeline_state(&mut self, gi: usize, tr: &mut Translator) -> PolyResult<()> {
        let ctx = self.ctx;
        let g = &ctx.scope(self.scope).dfgs[gi];
        let head = g.region;
        let mut steps: BTreeMap<i64, Vec<AStm>> = BTreeMap::new();
        for node in g.nodes.iter() {
            for (off, code) in tr.stm(node.stm)? {
                steps.entry(node.begin + off).or_default().push(code);
            }
        }
        let depth = steps
            .keys()
            .last()
            .map(|s| s + 1)
            .unwrap_or(0)
            .max(g.makespan())
            .max(1);
        let name = self.state_name(head, 0, "P");
        let stages: Vec<PipelineStage> = (0..depth)
            .map(|s| PipelineStage {
                name: Id::from(format!("{name}_{s}")),
                step: s as u32,
                codes: steps.remove(&s).unwrap_or_default(),
                enable: None,
            })
            .collect();

        let cond = match branch_cond(ctx, head) {
            Some(c) => {
                let src = ctx
                    .block(head)
                    .stms
                    .iter()
                    .map(|s| &ctx.stm(*s).kind)
                    .find(|k| k.def_syms() == vec![c])
                    .and_then(|k| k.src());
                match src {
                    Some(e) => tr.expr(e)?,
                    None => AExpr::Const(1),
                }
            }
            None => AExpr::Const(1),
        };
        let exit_block = ctx.terminator(head).and_then(|t| match &ctx.stm(t).kind {
            StmKind::CJump {
                true_blk,
                false_blk,
                ..
            } => [*true_blk, *false_blk]
                .into_iter()
                .find(|b| !g.blocks.contains(b)),
            _ => None,
        });
        let stall_free = !stages.iter().any(|s| has_wait(&s.codes));
        let mut st = State::new(name, 0, vec![]);
        st.pipeline = Some(PipelineState {
            stages,
            signals: PipelineSignals::default(),
            ii: issue_interval(ctx, g),
            cond,
            stall_free,
            exit_block,
        });
        for b in g.blocks.iter() {
            self.blk_states.entry(*b).or_default().push(name);
        }
        self.states.push(st);
        Ok(())
    }

    /// Handshake of the init and finish states.
    fn fill_init_finish(&mut self, hdl: &HdlContext) -> PolyResult<()> {
        let ctx = self.ctx;
        let entry = ctx.scope(self.scope).entry_block.ok_or_else(|| {
            Error::internal(format!("`{}' has no entry block", ctx.scope(self.scope).name))
        })?;
        let (init, finish) = (self.init_name(), self.finish_name());
        let prefix = sig_prefix(ctx, self.scope);
        let ctrl = |n: &str| {
            hdl.sig_by_name(self.h, &format!("{prefix}{n}"))
                .map(AExpr::Var)
                .ok_or_else(|| Error::internal(format!("no handshake signal `{prefix}{n}'")))
        };
        let s = ctx.scope(self.scope);
        let (init_codes, finish_codes) = if uses_handshake(ctx, self.scope) {
            let (ready, accept, valid) = (ctrl("ready")?, ctrl("accept")?, ctrl("valid")?);
            (
                vec![AStm::MetaWait {
                    kind: MetaWaitKind::InputReady,
                    args: vec![ready],
                    codes: vec![],
                    transition: Some(Target::Block(entry)),
                }],
                vec![
                    AStm::mv(valid.clone(), AExpr::Const(1)),
                    AStm::MetaWait {
                        kind: MetaWaitKind::OutputAccept,
                        args: vec![accept],
                        codes: vec![AStm::mv(valid, AExpr::Const(0))],
                        transition: Some(Target::State(init)),
                    },
                ],
            )
        } else if s.is_testbench() {
            (
                vec![AStm::Transition(Target::Block(entry))],
                vec![
                    AStm::Expr(AExpr::FunCall {
                        name: Id::from("$finish"),
                        args: vec![],
                    }),
                    AStm::Transition(Target::State(finish)),
                ],
            )
        } else {
            // Workers run again from the start.
            (
                vec![AStm::Transition(Target::Block(entry))],
                vec![AStm::Transition(Target::State(init))],
            )
        };
        let n = self.states.len();
        self.states[0].codes = init_codes;
        self.states[n - 1].codes = finish_codes;
        Ok(())
    }
}

/// The first wait of a state without its own transition takes over the
/// codes after it; a trailing plain transition becomes its transition.
fn absorb_waits(codes: &mut Vec<AStm>) {
    let Some(pos) = codes
        .iter()
        .position(|c| matches!(c, AStm::MetaWait { transition: None, .. }))
    else {
        return;
    };
    let rest: Vec<AStm> = codes.drain(pos + 1..).collect();
    if let AStm::MetaWait {
        codes: inner,
        transition,
        ..
    } = &mut codes[pos]
    {
        for c in rest {
            match c {
                AStm::Transition(t) if transition.is_none() => *transition = Some(t),
                c => inner.push(c),
            }
        }
    }
}

fn resolve_target(
    t: &mut Target,
    next: Option<Id>,
    first: &HashMap<BlockId, Id>,
) -> PolyResult<()> {
    let name = match *t {
        Target::State(_) => return Ok(()),
        Target::Next => next.ok_or_else(|| Error::internal("transition past the last state"))?,
        Target::Block(b) => first
            .get(&b)
            .copied()
            .ok_or_else(|| Error::internal(format!("no state for block {b:?}")))?,
    };
    *t = Target::State(name);
    Ok(())
}

/// Rewrite block and next-state targets into state names.
fn resolve(codes: &mut [AStm], next: Option<Id>, first: &HashMap<BlockId, Id>) -> PolyResult<()> {
    for c in codes.iter_mut() {
        match c {
            AStm::Transition(t)
            | AStm::MetaWait {
                transition: Some(t),
                ..
            } => resolve_target(t, next, first)?,
            _ => {}
        }
        for b in c.blocks_mut() {
            resolve(b, next, first)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passes::{HdlGen, Schedule};
    use ir::{BinOpKind, Builder, Expr, SynthParams, Type};
    use std::collections::HashSet;

    fn lower(ctx: &mut ir::Context) {
        Schedule::do_pass_default(ctx).unwrap();
        HdlGen::do_pass_default(ctx).unwrap();
        StgBuild::do_pass_default(ctx).unwrap();
    }

    /// Every transition lands on a state of the same STG.
    fn check_targets(stg: &Stg) {
        let names: HashSet<Id> = stg.states.iter().map(|s| s.name).collect();
        for st in stg.states.iter() {
            for t in st.transition_targets() {
                match t {
                    Target::State(n) => assert!(names.contains(&n), "{n} is not a state"),
                    t => panic!("unresolved target {t:?} in {}", st.name),
                }
            }
        }
    }

    #[test]
    fn function_has_init_body_finish() {
        let mut ctx = ir::Context::default();
        let int = Type::int(32, true);
        let mut b = Builder::function(&mut ctx, "add");
        b.returns(int.clone());
        let a = b.param("a", int.clone());
        let c = b.param("b", int.clone());
        b.ret(Expr::binop(BinOpKind::Add, Expr::temp(a), Expr::temp(c)));
        let f = b.finish();
        lower(&mut ctx);

        let h = ctx.hdl.hdl_of(f).unwrap();
        let stg = &ctx.hdl.scope(h).stgs[0];
        assert_eq!(stg.states.len(), 3);
        assert_eq!(stg.states[0].name, "add_INIT");
        assert_eq!(stg.states[2].name, "add_FINISH");
        check_targets(stg);

        let ret = ctx.hdl.sig_by_name(h, ir::RETURN_SYM).unwrap();
        let body = &stg.states[1];
        assert!(matches!(
            &body.codes[0],
            AStm::Move { dst: AExpr::Var(s), .. } if *s == ret
        ));
        assert_eq!(
            body.codes.last(),
            Some(&AStm::Transition(Target::State(Id::from("add_FINISH"))))
        );
        assert!(matches!(
            &stg.states[0].codes[0],
            AStm::MetaWait { kind: MetaWaitKind::InputReady, transition: Some(Target::State(n)), .. }
                if *n == body.name
        ));
        assert!(stg.states[2].codes.iter().any(|c| matches!(
            c,
            AStm::MetaWait { kind: MetaWaitKind::OutputAccept, .. }
        )));
    }

    #[test]
    fn loop_blocks_link_back_to_the_head() {
        let mut ctx = ir::Context::default();
        let int = Type::int(32, true);
        let mut b = Builder::function(&mut ctx, "f");
        b.returns(int.clone());
        let s = b.local("s", int.clone());
        b.mov(s, Expr::int(0));
        let head = b.for_range("i", Expr::int(0), Expr::int(4), 1, SynthParams::default(), |b, i| {
            b.mov(s, Expr::binop(BinOpKind::Add, Expr::temp(s), Expr::temp(i)));
        });
        b.ret(Expr::temp(s));
        let f = b.finish();
        lower(&mut ctx);

        let hs = ctx.hdl.scope(ctx.hdl.hdl_of(f).unwrap());
        let stg = &hs.stgs[0];
        check_targets(stg);
        let head_state = hs.blk2states[&head][0].1;
        // Some state of the body jumps back to the head.
        let back = stg
            .states
            .iter()
            .filter(|st| st.name != head_state)
            .any(|st| st.transition_targets().contains(&Target::State(head_state)));
        assert!(back);
        // The loop test ends the head block.
        let (_, last) = hs.blk2states[&head].last().copied().unwrap();
        let head_codes = &stg.state(last).unwrap().codes;
        assert!(matches!(head_codes.last(), Some(AStm::TransitionIf { .. })));
    }

    #[test]
    fn channel_read_waits_until_not_empty() {
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
        lower(&mut ctx);

        let hm = ctx.hdl.hdl_of(m).unwrap();
        let stg = &ctx.hdl.scope(hm).stgs[0];
        assert_eq!(stg.name, "w");
        check_targets(stg);
        let dout = ctx.hdl.sig_by_name(hm, "c_dout").unwrap();
        let wait = stg
            .states
            .iter()
            .flat_map(|st| st.codes.iter())
            .find(|c| matches!(c, AStm::MetaWait { kind: MetaWaitKind::Value, .. }));
        let Some(AStm::MetaWait { codes, transition, .. }) = wait else {
            panic!("no wait for the channel");
        };
        assert!(transition.is_some());
        assert!(codes.contains(&AStm::mv(
            AExpr::Var(ctx.hdl.sig_by_name(hm, "w_v").unwrap()),
            AExpr::Var(dout)
        )));
        // The worker starts over once it is done.
        assert_eq!(
            stg.states.last().unwrap().codes,
            vec![AStm::Transition(Target::State(Id::from("w_INIT")))]
        );
    }

    fn moves(stg: &Stg) -> Vec<&AStm> {
        stg.states
            .iter()
            .flat_map(|st| st.codes.iter())
            .filter(|c| matches!(c, AStm::Move { .. }))
            .collect()
    }

    #[test]
    fn register_builtins_become_moves() {
        let mut ctx = ir::Context::default();
        let int = Type::int(16, false);
        let mut b = Builder::function(&mut ctx, "f");
        b.returns(int.clone());
        let r = b.local("r", int.clone());
        let x = b.local("x", int.clone());
        b.expr(Expr::syscall("write_reg", vec![Expr::temp(r), Expr::int(5)]));
        b.mov(x, Expr::syscall("read_reg", vec![Expr::temp(r)]));
        b.ret(Expr::temp(x));
        let f = b.finish();
        lower(&mut ctx);

        let h = ctx.hdl.hdl_of(f).unwrap();
        let (rs, xs) = (
            ctx.hdl.sig_by_name(h, "r").unwrap(),
            ctx.hdl.sig_by_name(h, "x").unwrap(),
        );
        let stg = &ctx.hdl.scope(h).stgs[0];
        check_targets(stg);
        let moves = moves(stg);
        assert!(moves.contains(&&AStm::mv(AExpr::Var(rs), AExpr::Const(5))));
        assert!(moves.contains(&&AStm::mv(AExpr::Var(xs), AExpr::Var(rs))));
    }

    #[test]
    fn new_module_becomes_an_instance() {
        let mut ctx = ir::Context::default();
        let m = Builder::class(&mut ctx, "M", true);
        let global = ctx.global;
        let msym = ctx
            .add_sym(global, Id::from("M"), ir::sym_tags(&[]), Type::class(m))
            .unwrap();
        let mut b = Builder::function(&mut ctx, "f");
        b.returns(Type::int(8, false));
        let o = b.local("o", Type::object(m));
        b.mov(o, Expr::syscall("$new", vec![Expr::temp(msym)]));
        b.ret(Expr::int(0));
        let f = b.finish();
        lower(&mut ctx);

        let (h, hm) = (ctx.hdl.hdl_of(f).unwrap(), ctx.hdl.hdl_of(m).unwrap());
        let hs = ctx.hdl.scope(h);
        assert_eq!(hs.submodules.len(), 1);
        assert_eq!(hs.submodules[0].name, "o");
        assert_eq!(hs.submodules[0].target, hm);
        let marker = ctx.hdl.sig_by_name(h, "o").unwrap();
        assert_eq!(ctx.hdl.signal(marker).subscope, Some(hm));
        // The instance exists from reset; nothing is started at run time.
        assert!(
            hs.stgs[0]
                .states
                .iter()
                .flat_map(|st| st.codes.iter())
                .all(|c| !matches!(c, AStm::ModuleCall { .. }))
        );
    }

    #[test]
    fn new_of_a_plain_class_is_rejected() {
        let mut ctx = ir::Context::default();
        let c = Builder::class(&mut ctx, "C", false);
        let global = ctx.global;
        let csym = ctx
            .add_sym(global, Id::from("C"), ir::sym_tags(&[]), Type::class(c))
            .unwrap();
        let mut b = Builder::function(&mut ctx, "f");
        let o = b.local("o", Type::object(c));
        b.mov(o, Expr::syscall("$new", vec![Expr::temp(csym)]));
        b.ret(Expr::int(0));
        b.finish();
        Schedule::do_pass_default(&mut ctx).unwrap();
        HdlGen::do_pass_default(&mut ctx).unwrap();
        let err = StgBuild::do_pass_default(&mut ctx).err().unwrap();
        assert!(err.to_string().contains("cannot be instantiated"));
    }
}
