//! Construction of the data-flow graphs that the scheduler works on.
//!
//! One graph is built per loop region, plus one for the blocks outside any
//! loop. Sequential regions only get edges between statements of the same
//! block, since every block starts from step 0 of its own states. A
//! pipelined region is scheduled as a whole: its head and body share one
//! graph, and values carried around the loop show up as back edges.
use super::calls::{self, CallKind};
use polyphony_ir::{
    self as ir, BlockId, DataFlowGraph, DfEdgeKind, Expr, Scheduling, ScopeId, StmId,
    StmKind, SymbolId,
};
use std::collections::HashMap;

pub const CALL_LATENCY: i64 = 5;
pub const RAM_LOAD_LATENCY: i64 = 3;
pub const CHANNEL_LATENCY: i64 = 2;

/// Cycles `stm` occupies before its result can be used.
///
/// Port accesses and library calls are plain moves and loads from register
/// arrays are combinational, so all of them take a single step.
pub fn latency(ctx: &ir::Context, stm: StmId) -> i64 {
    let kind = &ctx.stm(stm).kind;
    if let Some(("polyphony.timing.clksleep", args)) = calls::stm_syscall(kind) {
        return args.first().and_then(|a| a.as_int()).unwrap_or(1).max(1);
    }
    if let Some((func, _)) = calls::stm_call(kind) {
        return match calls::classify_call(ctx, func) {
            CallKind::Scope(_) => CALL_LATENCY,
            CallKind::ChannelPut(_) | CallKind::ChannelGet(_) => CHANNEL_LATENCY,
            _ => 1,
        };
    }
    if let Some(acc) = calls::mem_access(kind) {
        if let Some(Expr::Array { items, .. }) = kind.src() {
            return (items.len() as i64).max(1);
        }
        if !acc.write && calls::is_ram(ctx, acc.mem) {
            return RAM_LOAD_LATENCY;
        }
    }
    1
}

/// Whether the loop headed by `head` is scheduled as a pipeline: it asks
/// for it, has no inner loops and a single body block that jumps back.
pub fn is_pipeline_region(ctx: &ir::Context, scope: ScopeId, head: BlockId) -> bool {
    if !ctx.config.enable_pipeline {
        return false;
    }
    let tree = &ctx.scope(scope).loop_tree;
    if tree.is_root(head) || !tree.is_leaf(head) {
        return false;
    }
    if ctx.block(head).synth_params.scheduling != Scheduling::Pipeline {
        return false;
    }
    let Some(lp) = tree.get(head) else {
        return false;
    };
    let shaped = lp.bodies.len() == 1
        && ctx.block(lp.bodies[0]).preds_loop.is_empty()
        && ctx.block(head).preds_loop == lp.bodies;
    // Sub-module calls have their own handshake and cannot overlap.
    shaped
        && !lp.blocks().iter().any(|b| {
            ctx.block(*b).stms.iter().any(|s| {
                calls::stm_call(&ctx.stm(*s).kind)
                    .is_some_and(|(f, _)| matches!(calls::classify_call(ctx, f), CallKind::Scope(_)))
            })
        })
}

/// The condition symbol tested by the CJUMP ending `blk`.
pub fn branch_cond(ctx: &ir::Context, blk: BlockId) -> Option<SymbolId> {
    let term = ctx.terminator(blk)?;
    match &ctx.stm(term).kind {
        StmKind::CJump { exp, .. } => exp.symbol(),
        _ => None,
    }
}

/// Cycles between two issues of the pipelined loop `g`, once scheduled.
///
/// Every value carried around the loop must be committed before the next
/// iteration reads it, and the loop condition is evaluated when an
/// iteration is issued, so its operands count as read at step 0.
pub fn issue_interval(ctx: &ir::Context, g: &DataFlowGraph) -> u32 {
    let mut ii = g.recurrence_ii();
    if let Some(c) = branch_cond(ctx, g.region) {
        let cond_uses: Vec<SymbolId> = ctx
            .block(g.region)
            .stms
            .iter()
            .map(|s| &ctx.stm(*s).kind)
            .find(|k| k.def_syms() == vec![c])
            .map(|k| k.use_syms())
            .unwrap_or_default();
        for node in g.nodes.iter() {
            let kind = &ctx.stm(node.stm).kind;
            if kind.def_syms().iter().any(|d| cond_uses.contains(d)) {
                ii = ii.max(node.end);
            }
        }
    }
    (ii.max(1) as u32).max(g.synth_params.ii)
}

/// Build every graph of `scope`, parents before children.
pub fn build_dfgs(ctx: &ir::Context, scope: ScopeId) -> Vec<DataFlowGraph> {
    let tree = &ctx.scope(scope).loop_tree;
    let order: Vec<BlockId> = ctx.traverse_blocks(scope);
    let mut graphs: Vec<DataFlowGraph> = vec![];
    let mut index: HashMap<BlockId, usize> = HashMap::new();
    for head in tree.regions_pre_order() {
        let Some(lp) = tree.get(head) else { continue };
        let members = lp.blocks();
        let blocks: Vec<BlockId> = order
            .iter()
            .copied()
            .filter(|b| members.contains(b))
            .collect();
        let pipelined = is_pipeline_region(ctx, scope, head);
        let name = if tree.is_root(head) {
            ctx.scope(scope).base_name.to_string()
        } else {
            ctx.block(head).name()
        };
        let mut g = DfgBuilder::new(ctx, name, head, blocks, pipelined).build();
        g.synth_params = if tree.is_root(head) {
            ctx.scope(scope).synth_params.clone()
        } else {
            ctx.block(head).synth_params.clone()
        };
        let id = graphs.len();
        if let Some(p) = tree.parent_of(head).and_then(|p| index.get(&p)).copied() {
            g.parent = Some(p);
            graphs[p].children.push(id);
        }
        index.insert(head, id);
        graphs.push(g);
    }
    log::debug!(
        "{}: {} data-flow graph(s)",
        ctx.scope(scope).name,
        graphs.len()
    );
    graphs
}

struct DfgBuilder<'a> {
    ctx: &'a ir::Context,
    graph: DataFlowGraph,
    pipelined: bool,
}

impl<'a> DfgBuilder<'a> {
    fn new(
        ctx: &'a ir::Context,
        name: String,
        head: BlockId,
        blocks: Vec<BlockId>,
        pipelined: bool,
    ) -> Self {
        DfgBuilder {
            ctx,
            graph: DataFlowGraph::new(name, head, blocks),
            pipelined,
        }
    }

    /// Statements that take part in the schedule. A pipeline drives its
    /// own loop control, so its jumps and the head's branch condition are
    /// left out.
    fn collect_nodes(&mut self) {
        let head_cond = if self.pipelined {
            branch_cond(self.ctx, self.graph.region)
        } else {
            None
        };
        for blk in self.graph.blocks.clone() {
            for stm in self.ctx.block(blk).stms.iter().copied() {
                let kind = &self.ctx.stm(stm).kind;
                let is_cond = head_cond.is_some_and(|c| kind.def_syms() == vec![c]);
                if self.pipelined && (kind.is_terminator() || is_cond) {
                    continue;
                }
                self.graph.add_node(stm, blk, latency(self.ctx, stm));
            }
        }
    }

    /// Whether nodes `a` and `b` may depend on each other.
    fn related(&self, a: usize, b: usize) -> bool {
        self.pipelined || self.graph.nodes[a].block == self.graph.nodes[b].block
    }

    fn build(mut self) -> DataFlowGraph {
        self.collect_nodes();
        let n = self.graph.nodes.len();
        let kinds: Vec<&StmKind> = self
            .graph
            .nodes
            .iter()
            .map(|node| &self.ctx.stm(node.stm).kind)
            .collect();
        let defs: Vec<Vec<SymbolId>> = kinds.iter().map(|k| k.def_syms()).collect();
        // A RET only leaves the FSM; its value is already in the output.
        let uses: Vec<Vec<SymbolId>> = kinds
            .iter()
            .map(|k| match k {
                StmKind::Ret(_) => vec![],
                k => k.use_syms(),
            })
            .collect();
        let mems: Vec<Option<calls::MemAccess>> =
            kinds.iter().map(|k| calls::mem_access(k)).collect();
        let effects: Vec<bool> = kinds
            .iter()
            .map(|k| {
                calls::stm_call(k).is_some() || calls::stm_syscall(k).is_some()
            })
            .collect();
        let mut edges = vec![];
        for b in 0..n {
            for a in (0..b).rev() {
                if !self.related(a, b) {
                    continue;
                }
                // True dependence on the closest earlier definition only.
                for u in uses[b].iter() {
                    let shadowed =
                        (a + 1..b).any(|m| self.related(m, b) && defs[m].contains(u));
                    if defs[a].contains(u) && !shadowed {
                        edges.push((DfEdgeKind::DefUse, a, b));
                    }
                }
                for d in defs[b].iter() {
                    if uses[a].contains(d) && !defs[a].contains(d) {
                        edges.push((DfEdgeKind::Anti, a, b));
                    }
                    if defs[a].contains(d) {
                        edges.push((DfEdgeKind::Seq, a, b));
                    }
                }
                if let (Some(ma), Some(mb)) = (mems[a], mems[b]) {
                    if ma.mem == mb.mem
                        && (ma.write || mb.write || calls::is_ram(self.ctx, ma.mem))
                    {
                        edges.push((DfEdgeKind::Seq, a, b));
                    }
                }
                if effects[a] && effects[b] {
                    edges.push((DfEdgeKind::Seq, a, b));
                }
            }
            // Values carried around a pipelined loop.
            if self.pipelined {
                for a in b + 1..n {
                    if uses[b].iter().any(|u| defs[a].contains(u)) {
                        edges.push((DfEdgeKind::DefUse, a, b));
                    }
                    if let (Some(ma), Some(mb)) = (mems[a], mems[b]) {
                        if ma.mem == mb.mem && (ma.write || mb.write) {
                            edges.push((DfEdgeKind::Seq, a, b));
                        }
                    }
                }
            }
        }
        if !self.pipelined {
            for blk in self.graph.blocks.clone() {
                let term = self.ctx.terminator(blk);
                let Some(t) = term.and_then(|t| self.graph.node_of(t)) else {
                    continue;
                };
                for a in 0..n {
                    if a != t && self.graph.nodes[a].block == blk {
                        edges.push((DfEdgeKind::Control, a, t));
                    }
                }
            }
        }
        for (kind, a, b) in edges {
            self.graph.add_edge(kind, a, b);
        }
        self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::loops::detect_loops;
    use ir::{BinOpKind, Builder, SynthParams, Type};

    #[test]
    fn edges_inside_one_block() {
        let mut ctx = ir::Context::default();
        let int = Type::int(32, true);
        let mut b = Builder::function(&mut ctx, "f");
        let a = b.param("a", int.clone());
        let x = b.local("x", int.clone());
        let y = b.local("y", int.clone());
        let s0 = b.mov(x, Expr::binop(BinOpKind::Add, Expr::temp(a), Expr::int(1)));
        let s1 = b.mov(y, Expr::binop(BinOpKind::Mult, Expr::temp(x), Expr::int(2)));
        let s2 = b.mov(x, Expr::int(0));
        let s3 = b.ret(Expr::temp(y));
        let f = b.finish();
        detect_loops(&mut ctx, f);
        let graphs = build_dfgs(&ctx, f);
        assert_eq!(graphs.len(), 1);
        let g = &graphs[0];
        let n = |s| g.node_of(s).unwrap();
        assert_eq!(g.edge(n(s0), n(s1)).unwrap().kind, DfEdgeKind::DefUse);
        assert_eq!(g.edge(n(s1), n(s2)).unwrap().kind, DfEdgeKind::Anti);
        assert_eq!(g.edge(n(s0), n(s2)).unwrap().kind, DfEdgeKind::Seq);
        assert_eq!(g.edge(n(s2), n(s3)).unwrap().kind, DfEdgeKind::Control);
        assert!(g.edges.values().all(|e| !e.back));
    }

    #[test]
    fn latency_by_operation() {
        let mut ctx = ir::Context::default();
        ctx.config.internal_ram_threshold_size = 4;
        let int = Type::int(8, false);
        let mut b = Builder::function(&mut ctx, "g");
        b.returns(int.clone());
        b.ret(Expr::int(1));
        let g = b.finish();
        let global = ctx.global;
        let gsym = ctx
            .add_sym(
                global,
                polyphony_utils::Id::from("g"),
                ir::sym_tags(&[]),
                Type::function(g, int.clone(), vec![]),
            )
            .unwrap();

        let mut b = Builder::function(&mut ctx, "f");
        let i = b.param("i", Type::int(3, false));
        let small = b.local("small", Type::list(int.clone(), ir::Length::Fixed(3)));
        let big = b.local("big", Type::list(int.clone(), ir::Length::Fixed(8)));
        let x = b.local("x", int.clone());
        let items = |n| (0..n).map(Expr::int).collect::<Vec<_>>();
        let init = b.mov(small, Expr::array(items(3), Expr::int(1)));
        let call = b.mov(x, Expr::call(Expr::temp(gsym), vec![]));
        let reg_load = b.mov(x, Expr::mref(Expr::temp(small), Expr::temp(i)));
        let ram_load = b.mov(x, Expr::mref(Expr::temp(big), Expr::temp(i)));
        let store = b.expr(Expr::mstore(Expr::temp(big), Expr::temp(i), Expr::temp(x)));
        let add = b.mov(x, Expr::binop(BinOpKind::Add, Expr::temp(i), Expr::int(1)));
        b.finish();

        assert_eq!(latency(&ctx, init), 3);
        assert_eq!(latency(&ctx, call), CALL_LATENCY);
        // Register arrays are read combinationally.
        assert_eq!(latency(&ctx, reg_load), 1);
        assert_eq!(latency(&ctx, ram_load), RAM_LOAD_LATENCY);
        assert_eq!(latency(&ctx, store), 1);
        assert_eq!(latency(&ctx, add), 1);
    }

    #[test]
    fn pipelined_loop_has_back_edges() {
        let mut ctx = ir::Context::default();
        let int = Type::int(32, true);
        let mut b = Builder::function(&mut ctx, "f");
        let s = b.local("s", int.clone());
        b.mov(s, Expr::int(0));
        let params = SynthParams {
            scheduling: Scheduling::Pipeline,
            ..Default::default()
        };
        let head = b.for_range("i", Expr::int(0), Expr::int(8), 1, params, |b, i| {
            b.mov(s, Expr::binop(BinOpKind::Add, Expr::temp(s), Expr::temp(i)));
        });
        b.ret(Expr::temp(s));
        let f = b.finish();
        detect_loops(&mut ctx, f);
        assert!(is_pipeline_region(&ctx, f, head));
        let graphs = build_dfgs(&ctx, f);
        assert_eq!(graphs.len(), 2);
        let lg = &graphs[1];
        assert_eq!(lg.parent, Some(0));
        assert_eq!(graphs[0].children, vec![1]);
        // Only the accumulation and the counter update remain.
        assert_eq!(lg.nodes.len(), 2);
        assert!(lg.edges.values().any(|e| e.back));
    }
}
