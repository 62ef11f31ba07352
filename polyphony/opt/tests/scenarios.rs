//! End-to-end runs of the pass pipeline on small programs.
use polyphony_ir::{
    self as ir, BinOpKind, Builder, Expr, Length, Scheduling, SignalId, SynthParams, Type,
    Unroll,
    ahdl::{AExpr, AStm, MetaWaitKind, Stg, Target},
};
use polyphony_opt::pass_manager::{PassManager, PassResult};
use polyphony_utils::Id;
use std::collections::HashSet;

fn run(ctx: &mut ir::Context, passes: &[&str]) -> PassResult<()> {
    let pm = PassManager::default_passes()?;
    let incl: Vec<String> = passes.iter().map(|p| p.to_string()).collect();
    pm.execute_plan(ctx, &incl, &[], false)
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

fn walk<'a>(codes: &'a [AStm], out: &mut Vec<&'a AStm>) {
    for c in codes {
        out.push(c);
        for b in c.blocks() {
            walk(b, out);
        }
    }
}

fn all_codes(stg: &Stg) -> Vec<&AStm> {
    let mut out = vec![];
    for st in stg.states.iter() {
        walk(&st.codes, &mut out);
    }
    out
}

fn moves_into(stg: &Stg, sig: SignalId) -> usize {
    all_codes(stg)
        .into_iter()
        .filter(|c| matches!(c, AStm::Move { dst: AExpr::Var(d), .. } if *d == sig))
        .count()
}

fn summing_loop(ctx: &mut ir::Context, params: SynthParams) -> (ir::ScopeId, ir::BlockId) {
    let int = Type::int(32, true);
    let mut b = Builder::function(ctx, "sum");
    b.returns(int.clone());
    let s = b.local("s", int.clone());
    b.mov(s, Expr::int(0));
    let head = b.for_range("i", Expr::int(0), Expr::int(4), 1, params, |b, i| {
        b.mov(s, Expr::binop(BinOpKind::Add, Expr::temp(s), Expr::temp(i)));
    });
    b.ret(Expr::temp(s));
    (b.finish(), head)
}

#[test]
fn adder_function() {
    let mut ctx = ir::Context::default();
    let int = Type::int(32, true);
    let mut b = Builder::function(&mut ctx, "add");
    b.returns(int.clone());
    let a = b.param("a", int.clone());
    let c = b.param("b", int.clone());
    b.ret(Expr::binop(BinOpKind::Add, Expr::temp(a), Expr::temp(c)));
    let f = b.finish();
    run(&mut ctx, &["schedule", "lower", "post-opt"]).unwrap();

    let h = ctx.hdl.hdl_of(f).unwrap();
    for n in ["a", "b"] {
        let s = ctx.hdl.sig_by_name(h, n).unwrap();
        assert!(ctx.hdl.signal(s).is_input());
    }
    let ret = ctx.hdl.sig_by_name(h, ir::RETURN_SYM).unwrap();
    let hs = ctx.hdl.scope(h);
    assert_eq!(hs.stgs.len(), 1);
    let stg = &hs.stgs[0];
    check_targets(stg);
    assert_eq!(stg.states.len(), 3);
    assert_eq!(stg.states[0].name, "add_INIT");
    assert_eq!(stg.states[2].name, "add_FINISH");
    assert_eq!(moves_into(stg, ret), 1);
    assert!(matches!(
        &stg.states[1].codes[0],
        AStm::Move { dst: AExpr::Var(s), .. } if *s == ret
    ));
}

#[test]
fn sequential_loop() {
    let mut ctx = ir::Context::default();
    let (f, head) = summing_loop(&mut ctx, SynthParams::default());
    run(&mut ctx, &["schedule", "lower"]).unwrap();

    let h = ctx.hdl.hdl_of(f).unwrap();
    let s = ctx.hdl.sig_by_name(h, "s").unwrap();
    let hs = ctx.hdl.scope(h);
    let stg = &hs.stgs[0];
    check_targets(stg);
    // The head ends with the bound test and the body jumps back to it.
    let head_states: Vec<Id> = hs.blk2states[&head].iter().map(|(_, n)| *n).collect();
    let last = stg.state(*head_states.last().unwrap()).unwrap();
    assert!(matches!(last.codes.last(), Some(AStm::TransitionIf { .. })));
    assert!(stg.states.iter().any(|st| !head_states.contains(&st.name)
        && st.transition_targets().contains(&Target::State(head_states[0]))));
    // The initial value and the accumulation.
    assert_eq!(moves_into(stg, s), 2);
}

#[test]
fn cleanup_is_idempotent() {
    let mut ctx = ir::Context::default();
    summing_loop(&mut ctx, SynthParams::default());
    run(&mut ctx, &["schedule", "lower", "post-opt"]).unwrap();
    let once: Vec<_> = ctx.hdl.scopes.values().cloned().collect();
    for hs in once.iter() {
        for stg in hs.stgs.iter() {
            check_targets(stg);
        }
    }
    run(&mut ctx, &["post-opt"]).unwrap();
    let twice: Vec<_> = ctx.hdl.scopes.values().cloned().collect();
    assert_eq!(once, twice);
}

#[test]
fn fully_unrolled_loop() {
    let mut ctx = ir::Context::default();
    let params = SynthParams {
        unroll: Unroll::Full,
        ..Default::default()
    };
    let (f, _) = summing_loop(&mut ctx, params);
    run(&mut ctx, &["unroll", "schedule", "lower"]).unwrap();

    assert_eq!(ctx.scope(f).loop_tree.len(), 1, "only the root region is left");
    let h = ctx.hdl.hdl_of(f).unwrap();
    let s = ctx.hdl.sig_by_name(h, "s").unwrap();
    let stg = &ctx.hdl.scope(h).stgs[0];
    check_targets(stg);
    assert!(
        all_codes(stg)
            .iter()
            .all(|c| !matches!(c, AStm::TransitionIf { .. }))
    );
    // The initial value and one addition per iteration.
    assert_eq!(moves_into(stg, s), 5);
}

#[test]
fn unroll_by_one_changes_nothing() {
    let mut ctx = ir::Context::default();
    let params = SynthParams {
        unroll: Unroll::Factor(1),
        ..Default::default()
    };
    let (f, _) = summing_loop(&mut ctx, params);
    let before = ctx.scope_stms(f).len();
    run(&mut ctx, &["unroll"]).unwrap();
    assert_eq!(ctx.scope_stms(f).len(), before);
    assert_eq!(ctx.scope(f).loop_tree.len(), 2);
}

#[test]
fn pipelined_loop() {
    let mut ctx = ir::Context::default();
    let params = SynthParams {
        scheduling: Scheduling::Pipeline,
        ..Default::default()
    };
    let (f, _) = summing_loop(&mut ctx, params);
    run(&mut ctx, &["schedule", "lower"]).unwrap();

    let h = ctx.hdl.hdl_of(f).unwrap();
    let hs = ctx.hdl.scope(h);
    let st = hs.all_states().find(|s| s.is_pipeline()).unwrap();
    let ps = st.pipeline.as_ref().unwrap();
    assert!(!ps.stages.is_empty());
    assert_eq!(ps.ii, 1);
    // No I/O and II=1: the control chain never stalls.
    assert!(ps.stall_free);
    assert!(ps.signals.hold.is_empty());
    assert_eq!(ps.signals.valid.len(), ps.stages.len());
    assert_eq!(ps.signals.ready.len(), ps.stages.len());
    assert!(ps.signals.exit.is_some());
    check_targets(&hs.stgs[0]);
}

#[test]
fn workers_share_a_channel() {
    let mut ctx = ir::Context::default();
    let m = Builder::class(&mut ctx, "M", true);
    let dt = Type::int(8, false);
    let ct = ctx.channel_type(dt.clone(), 2);
    let c = Builder::field(&mut ctx, m, "c", ct);

    let mut w1 = Builder::method(&mut ctx, m, "w1", &[ir::ScopeTag::Worker]);
    let this = w1.self_sym().unwrap();
    w1.for_range("i", Expr::int(0), Expr::int(10), 1, SynthParams::default(), |b, i| {
        let recv = Expr::attr(Expr::temp(this), c, ir::Ctx::Load);
        let put = b.ctx.port_call(recv, true, "put", vec![Expr::temp(i)]).unwrap();
        b.expr(put);
    });
    let w1 = w1.finish();

    let mut w2 = Builder::method(&mut ctx, m, "w2", &[ir::ScopeTag::Worker]);
    let this = w2.self_sym().unwrap();
    let v = w2.local("v", dt.clone());
    w2.for_range("j", Expr::int(0), Expr::int(10), 1, SynthParams::default(), |b, _| {
        let recv = Expr::attr(Expr::temp(this), c, ir::Ctx::Load);
        let get = b.ctx.port_call(recv, true, "get", vec![]).unwrap();
        b.mov(v, get);
    });
    let w2 = w2.finish();
    for w in [w1, w2] {
        ctx.scope_mut(m).workers.push(ir::Worker {
            scope: w,
            args: vec![],
        });
    }
    run(&mut ctx, &["schedule", "lower"]).unwrap();

    let hm = ctx.hdl.hdl_of(m).unwrap();
    assert_eq!(ctx.hdl.hdl_of(w1), Some(hm));
    assert_eq!(ctx.hdl.hdl_of(w2), Some(hm));
    let full = ctx.hdl.sig_by_name(hm, "c_full").unwrap();
    let empty = ctx.hdl.sig_by_name(hm, "c_empty").unwrap();
    let hs = ctx.hdl.scope(hm);
    assert_eq!(hs.stgs.len(), 2);
    assert_eq!(hs.submodules.len(), 1);
    assert_eq!(hs.submodules[0].name, "c_fifo");

    let waits_on = |stg: &Stg, sig: SignalId| {
        all_codes(stg).into_iter().any(|c| match c {
            AStm::MetaWait {
                kind: MetaWaitKind::Value,
                args,
                ..
            } => args.iter().any(|a| a.signals().contains(&sig)),
            _ => false,
        })
    };
    let writer = hs.stgs.iter().find(|s| s.name == "w1").unwrap();
    let reader = hs.stgs.iter().find(|s| s.name == "w2").unwrap();
    assert!(waits_on(writer, full));
    assert!(waits_on(reader, empty));
    check_targets(writer);
    check_targets(reader);
}

#[test]
fn module_without_workers_has_no_fsm() {
    let mut ctx = ir::Context::default();
    let m = Builder::class(&mut ctx, "M", true);
    let pt = ctx.port_type(Type::int(8, false), ir::Direction::Out, Some(0));
    Builder::field(&mut ctx, m, "o", pt);
    run(&mut ctx, &["schedule", "lower"]).unwrap();

    let hm = ctx.hdl.hdl_of(m).unwrap();
    let o = ctx.hdl.sig_by_name(hm, "o").unwrap();
    assert!(ctx.hdl.signal(o).is_output());
    assert!(ctx.hdl.scope(hm).stgs.is_empty());
}

#[test]
fn overflowing_initializer_stops_compilation() {
    let mut ctx = ir::Context::default();
    let mut b = Builder::function(&mut ctx, "f");
    let xs = b.local("xs", Type::list(Type::int(8, true), Length::Fixed(4)));
    b.at_line(7);
    b.mov(
        xs,
        Expr::array((1..=5).map(Expr::int).collect(), Expr::int(1)),
    );
    b.finish();

    let err = run(&mut ctx, &["seq-check", "schedule", "lower"]).unwrap_err();
    assert_eq!(err.codes(), vec!["SEQ_CAPACITY_OVERFLOWED"]);
    assert_eq!(err.errors()[0].loc().lineno, 7);
    assert!(ctx.hdl.scopes.is_empty());
}
