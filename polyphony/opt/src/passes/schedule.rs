use crate::analysis::calls::{self, CallKind};
use crate::analysis::dataflow::build_dfgs;
use crate::analysis::loops::detect_loops;
use crate::traversal::{
    Action, ConstructVisitor, Named, ParseVal, PassOpt, VisResult, Visitor,
};
use polyphony_ir::{self as ir, DataFlowGraph, DfEdgeKind, ScopeId, Scheduling};
use polyphony_utils::{Error, ErrorKind, PolyResult};
use std::collections::{HashMap, HashSet};

/// Assigns every statement the step it starts in and the step its result
/// is ready.
///
/// Statements are placed as soon as their operands allow (ASAP) or, with
/// `schedule:alap`, as late as the ASAP length allows. Scopes and loops
/// marked `timed` follow the clock waits written by the user instead.
/// The graphs with their schedule are kept on the scope for lowering.
pub struct Schedule {
    alap: bool,
}

impl Named for Schedule {
    fn name() -> &'static str {
        "schedule"
    }

    fn description() -> &'static str {
        "Schedule statements into clock steps"
    }

    fn opts() -> Vec<PassOpt> {
        vec![PassOpt::new(
            "alap",
            "schedule as late as possible",
            ParseVal::Bool(false),
            PassOpt::parse_bool,
        )]
    }
}

impl ConstructVisitor for Schedule {
    fn from(ctx: &ir::Context) -> PolyResult<Self> {
        let opts = Self::get_opts(ctx);
        Ok(Schedule {
            alap: opts["alap"].bool(),
        })
    }

    fn clear_data(&mut self) {}
}

/// The earliest `begin` an edge of `kind` from a node spanning
/// `[pbegin, pend)` allows.
fn earliest(kind: DfEdgeKind, pbegin: i64, pend: i64) -> i64 {
    match kind {
        DfEdgeKind::DefUse | DfEdgeKind::Seq => pend,
        DfEdgeKind::Control => (pend - 1).max(pbegin),
        DfEdgeKind::Anti => pbegin,
    }
}

pub fn asap(g: &mut DataFlowGraph) {
    // Forward edges always point to later nodes, so program order is a
    // topological order.
    for n in 0..g.nodes.len() {
        let begin = g
            .preds_without_back(n)
            .into_iter()
            .filter_map(|p| {
                let e = g.edge(p, n)?;
                Some(earliest(e.kind, g.nodes[p].begin, g.nodes[p].end))
            })
            .max()
            .unwrap_or(0);
        let node = &mut g.nodes[n];
        node.begin = begin;
        node.end = begin + node.latency;
    }
}

pub fn alap(g: &mut DataFlowGraph) {
    asap(g);
    // Each block keeps its own length.
    let mut spans: HashMap<ir::BlockId, i64> = HashMap::new();
    for n in g.nodes.iter() {
        let s = spans.entry(n.block).or_default();
        *s = (*s).max(n.end);
    }
    for n in (0..g.nodes.len()).rev() {
        let lat = g.nodes[n].latency;
        let latest_end = g
            .succs_without_back(n)
            .into_iter()
            .filter_map(|s| {
                let e = g.edge(n, s)?;
                let sb = g.nodes[s].begin;
                Some(match e.kind {
                    DfEdgeKind::DefUse | DfEdgeKind::Seq => sb,
                    DfEdgeKind::Control => sb + 1,
                    DfEdgeKind::Anti => sb + lat,
                })
            })
            .min()
            .unwrap_or_else(|| spans[&g.nodes[n].block]);
        // Never earlier than ASAP placed it.
        let begin = (latest_end - lat).max(g.nodes[n].begin);
        let node = &mut g.nodes[n];
        node.begin = begin;
        node.end = begin + lat;
    }
}

/// Steps driven by explicit clock waits: every statement between two waits
/// runs in the same step.
fn timed(ctx: &ir::Context, g: &mut DataFlowGraph) -> PolyResult<()> {
    let mut clock: HashMap<ir::BlockId, i64> = HashMap::new();
    let mut written: HashSet<(ir::BlockId, i64, ir::SymbolId)> = HashSet::new();
    for n in 0..g.nodes.len() {
        let (stm, blk) = (g.nodes[n].stm, g.nodes[n].block);
        let kind = &ctx.stm(stm).kind;
        let cur = clock.entry(blk).or_default();
        let advance = match calls::stm_syscall(kind) {
            Some(("polyphony.timing.clksleep", args)) => {
                args.first().and_then(|a| a.as_int()).unwrap_or(1).max(1)
            }
            Some((name, _)) if calls::WAIT_SYSCALLS.contains(name) => 1,
            _ => 0,
        };
        if let Some((func, _)) = calls::stm_call(kind) {
            if let CallKind::PortWrite(p) = calls::classify_call(ctx, func) {
                if !written.insert((blk, *cur, p)) {
                    return Err(Error::new(ErrorKind::RuleTimedPortIsOverwritten(
                        ctx.sym_name(p),
                    ))
                    .with_loc(ctx.stm(stm).loc));
                }
            }
        }
        g.nodes[n].begin = *cur;
        g.nodes[n].end = *cur + advance;
        *cur += advance;
    }
    Ok(())
}

impl Visitor for Schedule {
    fn start(&mut self, scope: ScopeId, ctx: &mut ir::Context) -> VisResult {
        detect_loops(ctx, scope);
        let mut graphs = build_dfgs(ctx, scope);
        let scope_timed = ctx.scope(scope).is_timed()
            || ctx.scope(scope).synth_params.scheduling == Scheduling::Timed;
        for g in graphs.iter_mut() {
            if scope_timed || g.synth_params.scheduling == Scheduling::Timed {
                timed(ctx, g)?;
            } else if self.alap {
                alap(g);
            } else {
                asap(g);
            }
            log::debug!("{}: {} steps", g.name, g.makespan());
        }
        ctx.scope_mut(scope).dfgs = graphs;
        Ok(Action::SkipChildren)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ir::{BinOpKind, Builder, Expr, Type};

    fn check_edges(g: &DataFlowGraph) {
        for ((s, d), e) in g.edges.iter() {
            if e.back {
                continue;
            }
            let (s, d) = (&g.nodes[*s], &g.nodes[*d]);
            match e.kind {
                DfEdgeKind::DefUse | DfEdgeKind::Seq => assert!(s.end <= d.begin),
                DfEdgeKind::Anti => assert!(s.begin <= d.begin),
                DfEdgeKind::Control => assert!(s.end - 1 <= d.begin),
            }
        }
    }

    #[test]
    fn dependent_statements_follow_each_other() {
        let mut ctx = ir::Context::default();
        let int = Type::int(32, true);
        let mut b = Builder::function(&mut ctx, "f");
        let a = b.param("a", int.clone());
        let x = b.local("x", int.clone());
        let y = b.local("y", int.clone());
        let z = b.local("z", int.clone());
        let sx = b.mov(x, Expr::binop(BinOpKind::Add, Expr::temp(a), Expr::int(1)));
        let sz = b.mov(z, Expr::binop(BinOpKind::Add, Expr::temp(a), Expr::int(2)));
        let sy = b.mov(y, Expr::binop(BinOpKind::Mult, Expr::temp(x), Expr::temp(z)));
        b.ret(Expr::temp(y));
        let f = b.finish();
        Schedule::do_pass_default(&mut ctx).unwrap();

        let g = &ctx.scope(f).dfgs[0];
        let begin = |s| g.nodes[g.node_of(s).unwrap()].begin;
        assert_eq!(begin(sx), 0);
        assert_eq!(begin(sz), 0);
        assert_eq!(begin(sy), 1);
        check_edges(g);
    }

    #[test]
    fn alap_delays_values_needed_late() {
        let mut ctx = ir::Context::default();
        ctx.extra_opts = vec!["schedule:alap".to_string()];
        let int = Type::int(32, true);
        let mut b = Builder::function(&mut ctx, "f");
        let a = b.param("a", int.clone());
        let x = b.local("x", int.clone());
        let y = b.local("y", int.clone());
        let z = b.local("z", int.clone());
        let w = b.local("w", int.clone());
        let sx = b.mov(x, Expr::binop(BinOpKind::Add, Expr::temp(a), Expr::int(1)));
        b.mov(y, Expr::binop(BinOpKind::Mult, Expr::temp(a), Expr::int(2)));
        b.mov(z, Expr::binop(BinOpKind::Add, Expr::temp(y), Expr::int(1)));
        b.mov(w, Expr::binop(BinOpKind::Add, Expr::temp(z), Expr::temp(x)));
        b.ret(Expr::temp(w));
        let f = b.finish();
        Schedule::do_pass_default(&mut ctx).unwrap();

        let g = &ctx.scope(f).dfgs[0];
        assert_eq!(g.nodes[g.node_of(sx).unwrap()].begin, 1);
        check_edges(g);
    }

    #[test]
    fn timed_scopes_follow_clock_waits() {
        let mut ctx = ir::Context::default();
        let int = Type::int(32, true);
        let mut b = Builder::function(&mut ctx, "f");
        let x = b.local("x", int.clone());
        let s0 = b.mov(x, Expr::int(1));
        b.expr(Expr::syscall("polyphony.timing.clksleep", vec![Expr::int(3)]));
        let s1 = b.mov(x, Expr::int(2));
        b.ret(Expr::int(0));
        let f = b.finish();
        ctx.scope_mut(f).synth_params.scheduling = Scheduling::Timed;
        Schedule::do_pass_default(&mut ctx).unwrap();

        let g = &ctx.scope(f).dfgs[0];
        assert_eq!(g.nodes[g.node_of(s0).unwrap()].begin, 0);
        assert_eq!(g.nodes[g.node_of(s1).unwrap()].begin, 3);
    }
}
