//! A cycle-level interpreter for the state machines of a function scope.
//!
//! Registers commit at the end of a cycle in statement order; nets driven by
//! continuous assignments are evaluated on demand. Memories, sub-modules and
//! waits other than the function handshake are not modelled.
#![allow(dead_code)]

use polyphony_ir::{
    self as ir, RelOpKind, SignalId, UnOpKind,
    ahdl::{ADecl, AExpr, AOp, AStm, MetaWaitKind, State, Target},
};
use polyphony_utils::Id;
use std::collections::HashMap;

/// What one run of a function FSM produced.
#[derive(Debug)]
pub struct Trace {
    pub ret: i64,
    /// Cycles from leaving INIT until FINISH is reached.
    pub cycles: usize,
    /// Cycles spent in each state.
    pub visits: HashMap<Id, usize>,
}

impl Trace {
    /// Cycles spent in pipeline states.
    pub fn pipeline_cycles(&self, ctx: &ir::Context, f: ir::ScopeId) -> usize {
        let Some(h) = ctx.hdl.hdl_of(f) else {
            return 0;
        };
        ctx.hdl
            .scope(h)
            .all_states()
            .filter(|s| s.is_pipeline())
            .map(|s| self.visits.get(&s.name).copied().unwrap_or(0))
            .sum()
    }
}

struct Machine<'a> {
    hdl: &'a ir::HdlContext,
    inputs: HashMap<SignalId, i64>,
    assigns: HashMap<SignalId, &'a AExpr>,
    regs: HashMap<SignalId, i64>,
    wires: HashMap<SignalId, i64>,
    pending: Vec<(SignalId, i64)>,
    next: Option<Id>,
}

impl<'a> Machine<'a> {
    fn read(&self, s: SignalId) -> i64 {
        if let Some(v) = self.inputs.get(&s) {
            return *v;
        }
        if let Some(e) = self.assigns.get(&s) {
            return self.eval(e);
        }
        if self.hdl.signal(s).is_net() {
            return self.wires.get(&s).copied().unwrap_or(0);
        }
        self.regs
            .get(&s)
            .copied()
            .or(self.hdl.signal(s).init)
            .unwrap_or(0)
    }

    fn eval(&self, e: &AExpr) -> i64 {
        match e {
            AExpr::Const(v) => *v,
            AExpr::Var(s) => self.read(*s),
            AExpr::IfExp { cond, lexp, rexp } => {
                if self.eval(cond) != 0 {
                    self.eval(lexp)
                } else {
                    self.eval(rexp)
                }
            }
            AExpr::Op { op, args } => {
                let v: Vec<i64> = args.iter().map(|a| self.eval(a)).collect();
                match (op, v.as_slice()) {
                    (AOp::Un(UnOpKind::USub), [a]) => a.wrapping_neg(),
                    (AOp::Un(UnOpKind::UAdd), [a]) => *a,
                    (AOp::Un(UnOpKind::Not), [a]) => (*a == 0) as i64,
                    (AOp::Un(UnOpKind::Invert), [a]) => !a,
                    (AOp::Bin(op), [l, r]) => op.eval(*l, *r).unwrap_or(0),
                    (AOp::Rel(RelOpKind::And), args) => args.iter().all(|a| *a != 0) as i64,
                    (AOp::Rel(RelOpKind::Or), args) => args.iter().any(|a| *a != 0) as i64,
                    (AOp::Rel(op), [l, r]) => op.eval(*l, *r) as i64,
                    _ => panic!("malformed operation {e:?}"),
                }
            }
            other => panic!("cannot evaluate {other:?}"),
        }
    }

    fn write(&mut self, dst: &AExpr, v: i64) {
        let AExpr::Var(s) = dst else {
            panic!("cannot write to {dst:?}");
        };
        if self.hdl.signal(*s).is_net() {
            self.wires.insert(*s, v);
        } else {
            self.pending.push((*s, v));
        }
    }

    fn goto(&mut self, t: &Target) {
        match t {
            Target::State(n) => self.next = Some(*n),
            t => panic!("unresolved target {t:?}"),
        }
    }

    fn exec(&mut self, codes: &[AStm]) {
        for c in codes {
            match c {
                AStm::Move { dst, src } => {
                    let v = self.eval(src);
                    self.write(dst, v);
                }
                AStm::If { conds, blocks } | AStm::TransitionIf { conds, blocks } => {
                    if let Some(i) = conds.iter().position(|c| self.eval(c) != 0) {
                        self.exec(&blocks[i]);
                    }
                }
                AStm::Case { sel, items } => {
                    let v = self.eval(sel);
                    if let Some((_, b)) = items.iter().find(|(k, _)| self.eval(k) == v) {
                        self.exec(b);
                    }
                }
                AStm::Transition(t) => self.goto(t),
                AStm::MetaWait {
                    kind: MetaWaitKind::InputReady | MetaWaitKind::OutputAccept | MetaWaitKind::Value,
                    args,
                    codes,
                    transition,
                } => {
                    if args.iter().all(|a| self.eval(a) != 0) {
                        self.exec(codes);
                        if let Some(t) = transition {
                            self.goto(t);
                        }
                    }
                }
                AStm::PipelineGuard { cond, codes } => {
                    if self.eval(cond) != 0 {
                        self.exec(codes);
                    }
                }
                AStm::Expr(_) => {}
                other => panic!("not simulated: {other:?}"),
            }
        }
    }

    fn step(&mut self, st: &State) {
        self.wires.clear();
        if let Some(p) = &st.pipeline {
            for stage in p.stages.iter() {
                self.exec(&stage.codes);
            }
        }
        self.exec(&st.codes);
        for (s, v) in std::mem::take(&mut self.pending) {
            self.regs.insert(s, v);
        }
    }
}

/// Run function `f` on `args` until its FINISH state is reached, for at most
/// `budget` cycles.
pub fn simulate(ctx: &ir::Context, f: ir::ScopeId, args: &[(&str, i64)], budget: usize) -> Trace {
    let h = ctx.hdl.hdl_of(f).expect("no HDL scope");
    let hs = ctx.hdl.scope(h);
    let stg = hs.main_stgs().next().expect("no FSM").1;
    let mut inputs = HashMap::new();
    for (n, v) in args {
        inputs.insert(ctx.hdl.sig_by_name(h, n).expect("no such parameter"), *v);
    }
    for n in ["ready", "accept"] {
        if let Some(s) = ctx.hdl.sig_by_name(h, n) {
            inputs.insert(s, 1);
        }
    }
    let assigns = hs
        .decls
        .iter()
        .filter_map(|d| match d {
            ADecl::Assign { dst, src } => Some((*dst, src)),
            _ => None,
        })
        .collect();
    let mut m = Machine {
        hdl: &ctx.hdl,
        inputs,
        assigns,
        regs: HashMap::new(),
        wires: HashMap::new(),
        pending: vec![],
        next: None,
    };
    let finish = stg.finish_state.expect("no FINISH state");
    let mut cur = stg.states[0].name;
    let mut visits: HashMap<Id, usize> = HashMap::new();
    let mut cycles = 0;
    while cur != finish {
        assert!(cycles < budget, "still in {cur} after {budget} cycles");
        let st = stg.state(cur).expect("unknown state");
        m.next = None;
        m.step(st);
        if !stg.is_init(cur) {
            cycles += 1;
            *visits.entry(cur).or_default() += 1;
        }
        if let Some(n) = m.next {
            cur = n;
        }
    }
    let ret = ctx
        .hdl
        .sig_by_name(h, ir::RETURN_SYM)
        .map(|s| m.read(s))
        .unwrap_or(0);
    Trace { ret, cycles, visits }
}
