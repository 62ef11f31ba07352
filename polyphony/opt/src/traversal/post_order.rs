use polyphony_ir::{self as ir, Expr, ScopeId};
use petgraph::algo;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

/// The order in which scopes are traversed.
#[derive(Default, PartialEq, Eq, Clone, Copy, Debug)]
pub enum Order {
    /// Registration order.
    #[default]
    No,
    /// Callers before callees.
    Pre,
    /// Callees before callers.
    Post,
}

/// A traversal order over the live scopes of a context.
///
/// ## Post-order
/// If scope `B` calls or instantiates scope `A`, or registers `A` as a
/// worker, then `A` is visited before `B`. The order is a topological sort of
/// the graph with an edge `A -> B` for each such reference.
///
/// ## Pre-order
/// Reverse of post-order.
///
/// Recursive programs have no such order; the registration order is used
/// instead and a warning logged.
pub struct ScopeTraversal {
    order: Vec<ScopeId>,
}

impl ScopeTraversal {
    pub fn new(ctx: &ir::Context, order: Order) -> Self {
        let scopes = ctx.scope_ids();
        if order == Order::No {
            return Self { order: scopes };
        }
        let mut graph: DiGraph<ScopeId, ()> = DiGraph::new();
        let nodes: HashMap<ScopeId, NodeIndex> = scopes
            .iter()
            .map(|s| (*s, graph.add_node(*s)))
            .collect();
        for caller in scopes.iter() {
            for callee in callees(ctx, *caller) {
                if let (Some(a), Some(b)) = (nodes.get(&callee), nodes.get(caller)) {
                    if a != b {
                        graph.update_edge(*a, *b, ());
                    }
                }
            }
        }
        let mut topo = match algo::toposort(&graph, None) {
            Ok(t) => t.into_iter().map(|n| graph[n]).collect::<Vec<_>>(),
            Err(cycle) => {
                log::warn!(
                    "recursive call through {}; using registration order",
                    ctx.scope(graph[cycle.node_id()]).name
                );
                scopes
            }
        };
        if order == Order::Pre {
            topo.reverse();
        }
        Self { order: topo }
    }

    pub fn scopes(&self) -> Vec<ScopeId> {
        self.order.clone()
    }
}

/// Scopes referenced by calls, instantiations and worker registrations in
/// `scope`.
pub fn callees(ctx: &ir::Context, scope: ScopeId) -> Vec<ScopeId> {
    let mut out = vec![];
    for w in &ctx.scope(scope).workers {
        out.push(w.scope);
    }
    if ctx.scope(scope).entry_block.is_none() {
        return out;
    }
    for stm in ctx.scope_stms(scope) {
        for e in ctx.stm(stm).kind.exprs() {
            for call in e.find_exprs(|e| matches!(e, Expr::Call { .. } | Expr::New { .. })) {
                match call {
                    Expr::Call { func, .. } => {
                        if let Some(target) = func
                            .symbol()
                            .and_then(|s| ctx.sym(s).typ.scope())
                        {
                            out.push(target);
                        }
                    }
                    Expr::New { scope: cls, .. } => {
                        out.push(*cls);
                        out.extend(
                            ctx.scope(*cls)
                                .children
                                .iter()
                                .copied()
                                .filter(|c| ctx.scope(*c).is_ctor()),
                        );
                    }
                    _ => (),
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ir::{Builder, Type};

    #[test]
    fn callees_come_first_in_post_order() {
        let mut ctx = ir::Context::default();
        let mut b = Builder::function(&mut ctx, "leaf");
        b.returns(Type::int(32, true));
        b.ret(Expr::int(1));
        let leaf = b.finish();
        let global = ctx.global;
        let fsym = ctx
            .add_sym(
                global,
                ir::Id::from("leaf"),
                ir::sym_tags(&[]),
                Type::function(leaf, Type::int(32, true), vec![]),
            )
            .unwrap();
        let mut b = Builder::function(&mut ctx, "root");
        let r = b.local("r", Type::int(32, true));
        b.mov(r, Expr::call(Expr::temp(fsym), vec![]));
        b.ret(Expr::temp(r));
        let root = b.finish();
        let post = ScopeTraversal::new(&ctx, Order::Post).scopes();
        let pos = |s| post.iter().position(|x| *x == s).unwrap();
        assert!(pos(leaf) < pos(root));
        let pre = ScopeTraversal::new(&ctx, Order::Pre).scopes();
        let pos = |s| pre.iter().position(|x| *x == s).unwrap();
        assert!(pos(root) < pos(leaf));
    }
}
