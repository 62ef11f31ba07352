//! Natural loop detection and the loop nest tree.
use polyphony_ir::{
    self as ir, BlockId, Expr, Loop, LoopNestTree, PhiKind, ScopeId, StmKind, SymbolId,
};
use std::collections::{BTreeSet, HashMap};

/// Blocks of the natural loop headed by `head`: the head plus every block
/// that reaches one of its back-edge sources without passing the head.
pub fn natural_loop(ctx: &ir::Context, head: BlockId) -> BTreeSet<BlockId> {
    let mut body = BTreeSet::from([head]);
    let mut stack: Vec<BlockId> = ctx.block(head).preds_loop.clone();
    while let Some(b) = stack.pop() {
        if body.insert(b) {
            stack.extend(ctx.block(b).preds.iter().copied());
        }
    }
    body
}

/// Rebuild the loop nest tree of `scope`. The root region is headed by the
/// entry block.
pub fn detect_loops(ctx: &mut ir::Context, scope: ScopeId) {
    let tree = build_tree(ctx, scope);
    ctx.scope_mut(scope).loop_tree = tree;
}

fn build_tree(ctx: &ir::Context, scope: ScopeId) -> LoopNestTree {
    let mut tree = LoopNestTree::default();
    let Some(entry) = ctx.scope(scope).entry_block else {
        return tree;
    };
    let blocks = ctx.traverse_blocks(scope);
    let members: Vec<(BlockId, BTreeSet<BlockId>)> = blocks
        .iter()
        .filter(|b| ctx.block(**b).is_loop_head())
        .map(|h| (*h, natural_loop(ctx, *h)))
        .collect();

    // The parent of a loop is the smallest other loop containing its head.
    let mut parent: HashMap<BlockId, BlockId> = HashMap::new();
    for (h, _) in members.iter() {
        let enclosing = members
            .iter()
            .filter(|(o, set)| o != h && set.contains(h))
            .min_by_key(|(_, set)| set.len());
        parent.insert(*h, enclosing.map(|(o, _)| *o).unwrap_or(entry));
    }

    // A block belongs to the innermost loop containing it.
    let owner = |b: BlockId| {
        members
            .iter()
            .filter(|(_, set)| set.contains(&b))
            .min_by_key(|(_, set)| set.len())
            .map(|(h, _)| *h)
    };
    let mut bodies: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
    for b in blocks.iter() {
        let region = owner(*b).unwrap_or(entry);
        if region != *b {
            bodies.entry(region).or_default().push(*b);
        }
    }

    let mut root = Loop::new(entry, bodies.remove(&entry).unwrap_or_default());
    fill_def_use(ctx, &mut root, &blocks.iter().copied().collect());
    tree.set_root(root);

    // Parents are inserted before their children.
    let mut pending: Vec<&(BlockId, BTreeSet<BlockId>)> = members.iter().collect();
    while !pending.is_empty() {
        let before = pending.len();
        pending.retain(|(h, set)| {
            let p = parent[h];
            if tree.get(p).is_none() {
                return true;
            }
            let mut lp = Loop::new(*h, bodies.get(h).cloned().unwrap_or_default());
            lp.exits = exits_of(ctx, set);
            find_induction(ctx, &mut lp, set);
            fill_def_use(ctx, &mut lp, set);
            tree.add_loop(lp, p);
            false
        });
        if pending.len() == before {
            log::warn!("irreducible loop nest in {}", ctx.scope(scope).name);
            break;
        }
    }
    tree
}

fn exits_of(ctx: &ir::Context, set: &BTreeSet<BlockId>) -> Vec<BlockId> {
    let mut exits = vec![];
    for b in set {
        for s in ctx.block(*b).succs.iter() {
            if !set.contains(s) && !exits.contains(s) {
                exits.push(*s);
            }
        }
    }
    exits
}

/// Records the symbols defined and used inside the loop and outside of it.
fn fill_def_use(ctx: &ir::Context, lp: &mut Loop, set: &BTreeSet<BlockId>) {
    let scope = ctx.block(lp.head).scope;
    for b in ctx.traverse_blocks(scope) {
        let inside = set.contains(&b);
        for stm in ctx.block(b).stms.iter() {
            let kind = &ctx.stm(*stm).kind;
            let (defs, uses) = if inside {
                (&mut lp.inner_defs, &mut lp.inner_uses)
            } else {
                (&mut lp.outer_defs, &mut lp.outer_uses)
            };
            defs.extend(kind.def_syms());
            uses.extend(kind.use_syms());
        }
    }
}

/// The symbol compared by the head's conditional jump, through the
/// condition's defining RELOP.
fn compared_symbol(ctx: &ir::Context, head: BlockId) -> Option<(SymbolId, SymbolId)> {
    let term = ctx.terminator(head)?;
    let StmKind::CJump { exp, .. } = &ctx.stm(term).kind else {
        return None;
    };
    let cond = exp.symbol()?;
    let def = ctx.block(head).stms.iter().find(|s| {
        ctx.stm(**s).kind.is_move() && ctx.stm(**s).kind.def_syms() == vec![cond]
    })?;
    match ctx.stm(*def).kind.src()? {
        Expr::RelOp { left, .. } => Some((cond, left.symbol()?)),
        _ => None,
    }
}

/// Finds the loop counter. With an LPHI for it in the head, `init` and
/// `update` come from its arguments; before SSA they come from the single
/// definitions outside and inside the loop.
fn find_induction(ctx: &ir::Context, lp: &mut Loop, set: &BTreeSet<BlockId>) {
    let Some((cond, var)) = compared_symbol(ctx, lp.head) else {
        return;
    };
    lp.cond = Some(cond);
    let scope = ctx.block(lp.head).scope;
    let usedef = &ctx.scope(scope).usedef;

    let lphi = ctx.phis(lp.head).into_iter().find_map(|s| {
        let phi = ctx.stm(s).kind.phi()?;
        (phi.kind == PhiKind::LPhi && phi.var.symbol() == Some(var)).then_some(phi)
    });
    if let Some(phi) = lphi {
        if phi.args.len() == 2 {
            lp.counter = Some(var);
            lp.init = Some(phi.args[0].clone());
            lp.update = phi.args[1]
                .symbol()
                .and_then(|s| usedef.get_stms_defining(s).into_iter().next())
                .and_then(|d| ctx.stm(d).kind.src().cloned())
                .or_else(|| Some(phi.args[1].clone()));
        }
        return;
    }

    let (inside, outside): (Vec<_>, Vec<_>) = usedef
        .get_stms_defining(var)
        .into_iter()
        .partition(|s| set.contains(&ctx.stm(*s).block));
    if let ([upd], [init]) = (inside.as_slice(), outside.as_slice()) {
        lp.counter = Some(var);
        lp.init = ctx.stm(*init).kind.src().cloned();
        lp.update = ctx.stm(*upd).kind.src().cloned();
    }
}
