use crate::analysis::DominatorTree;
use crate::traversal::{Action, Named, VisResult, Visitor};
use polyphony_ir::visitor::ExprMutator;
use polyphony_ir::{
    self as ir, BlockId, Ctx, Expr, Phi, PhiKind, ScopeId, StmId, StmKind, SymbolId,
};
use polyphony_utils::{Error, Loc, PolyResult};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Converts local variables to static single assignment form.
///
/// Phis are placed at the iterated dominance frontier of each variable's
/// definitions, but only where the variable is live. Phis at loop heads are
/// LPHIs. Every definition then gets a fresh version `x#n` and every use is
/// renamed to the version reaching it along the dominator tree.
///
/// Temps, conditions, parameters, return values, fields and aggregates keep
/// their single name.
#[derive(Default)]
pub struct Ssa;

impl Named for Ssa {
    fn name() -> &'static str {
        "ssa"
    }

    fn description() -> &'static str {
        "Convert local variables to SSA form"
    }
}

/// Variables of `scope` that get versions.
fn candidates(ctx: &ir::Context, scope: ScopeId) -> HashSet<SymbolId> {
    ctx.scope(scope)
        .symbols
        .values()
        .copied()
        .filter(|s| {
            let sym = ctx.sym(*s);
            !sym.is_ssa_ignored() && !sym.is_alias() && !sym.is_self()
        })
        .collect()
}

/// Variables live on entry to each block.
fn live_in(
    ctx: &ir::Context,
    blocks: &[BlockId],
    vars: &HashSet<SymbolId>,
) -> HashMap<BlockId, BTreeSet<SymbolId>> {
    let mut exposed: HashMap<BlockId, BTreeSet<SymbolId>> = HashMap::new();
    let mut kill: HashMap<BlockId, BTreeSet<SymbolId>> = HashMap::new();
    for b in blocks {
        let (g, k) = (exposed.entry(*b).or_default(), kill.entry(*b).or_default());
        for stm in ctx.block(*b).stms.iter() {
            let kind = &ctx.stm(*stm).kind;
            for u in kind.use_syms() {
                if vars.contains(&u) && !k.contains(&u) {
                    g.insert(u);
                }
            }
            k.extend(kind.def_syms().into_iter().filter(|d| vars.contains(d)));
        }
    }
    let mut live: HashMap<BlockId, BTreeSet<SymbolId>> =
        blocks.iter().map(|b| (*b, BTreeSet::new())).collect();
    let mut changed = true;
    while changed {
        changed = false;
        for b in blocks.iter().rev() {
            let mut out = BTreeSet::new();
            for s in ctx.block(*b).succs.iter() {
                if let Some(l) = live.get(s) {
                    out.extend(l.iter().copied());
                }
            }
            let mut new = exposed[b].clone();
            new.extend(out.difference(&kill[b]).copied());
            if new != live[b] {
                live.insert(*b, new);
                changed = true;
            }
        }
    }
    live
}

/// Rewrites loads of versioned variables to the version on top of their
/// stack.
struct Renamer<'a> {
    vars: &'a HashSet<SymbolId>,
    stacks: &'a HashMap<SymbolId, Vec<SymbolId>>,
    missing: Vec<SymbolId>,
}

impl ExprMutator for Renamer<'_> {
    fn rewrite(&mut self, e: &Expr) -> Option<Expr> {
        let Expr::Temp {
            sym,
            ctx: Ctx::Load,
        } = e
        else {
            return None;
        };
        if !self.vars.contains(sym) {
            return None;
        }
        match self.stacks.get(sym).and_then(|s| s.last()) {
            Some(v) => Some(Expr::temp(*v)),
            None => {
                self.missing.push(*sym);
                None
            }
        }
    }
}

struct SsaBuilder {
    vars: HashSet<SymbolId>,
    dom: DominatorTree,
    /// Phis placed by this pass, with the variable they merge.
    placed: HashMap<StmId, SymbolId>,
    stacks: HashMap<SymbolId, Vec<SymbolId>>,
}

impl SsaBuilder {
    fn place_phis(&mut self, ctx: &mut ir::Context, scope: ScopeId) {
        let blocks = ctx.traverse_blocks(scope);
        let live = live_in(ctx, &blocks, &self.vars);
        let df = self.dom.frontiers(ctx);

        let mut def_blocks: HashMap<SymbolId, BTreeSet<BlockId>> = HashMap::new();
        for b in blocks.iter() {
            for stm in ctx.block(*b).stms.iter() {
                for d in ctx.stm(*stm).kind.def_syms() {
                    if self.vars.contains(&d) {
                        def_blocks.entry(d).or_default().insert(*b);
                    }
                }
            }
        }
        let mut vars: Vec<SymbolId> = def_blocks.keys().copied().collect();
        vars.sort();
        for var in vars {
            let defs = &def_blocks[&var];
            let mut work: Vec<BlockId> = defs.iter().copied().collect();
            let mut has_phi = HashSet::new();
            while let Some(b) = work.pop() {
                for d in df.get(&b).into_iter().flatten() {
                    if has_phi.contains(d) || !live.get(d).is_some_and(|l| l.contains(&var)) {
                        continue;
                    }
                    has_phi.insert(*d);
                    let block = ctx.block(*d);
                    let kind = if block.is_loop_head() {
                        PhiKind::LPhi
                    } else {
                        PhiKind::Phi
                    };
                    let mut phi = Phi::new(kind, Expr::store(var));
                    phi.args = block.preds.iter().map(|_| Expr::temp(var)).collect();
                    phi.defblks = block.preds.iter().map(|p| Some(*p)).collect();
                    let loc = block
                        .stms
                        .first()
                        .map(|s| ctx.stm(*s).loc)
                        .unwrap_or_default();
                    let stm = ctx.insert_stm(*d, 0, StmKind::Phi(phi), loc);
                    self.placed.insert(stm, var);
                    if !defs.contains(d) {
                        work.push(*d);
                    }
                }
            }
        }
    }

    fn push_version(&mut self, ctx: &mut ir::Context, var: SymbolId) -> SymbolId {
        let v = ctx.add_version(var);
        self.stacks.entry(var).or_default().push(v);
        v
    }

    fn undefined(ctx: &ir::Context, var: SymbolId, loc: Loc) -> Error {
        Error::referenced_before_assign(ctx.sym(var).name).with_loc(loc)
    }

    fn rename_block(&mut self, ctx: &mut ir::Context, blk: BlockId) -> PolyResult<()> {
        let mut pushed = vec![];
        for stm in ctx.block(blk).stms.clone() {
            let loc = ctx.stm(stm).loc;
            if let Some(var) = self.placed.get(&stm).copied() {
                let v = self.push_version(ctx, var);
                pushed.push(var);
                if let Some(phi) = ctx.stm_mut(stm).kind.phi_mut() {
                    phi.var = Expr::store(v);
                }
                continue;
            }
            let mut kind = ctx.stm(stm).kind.clone();
            let mut renamer = Renamer {
                vars: &self.vars,
                stacks: &self.stacks,
                missing: vec![],
            };
            renamer.mutate_stm(&mut kind);
            if let Some(var) = renamer.missing.first() {
                return Err(Self::undefined(ctx, *var, loc));
            }
            let mut defs = vec![];
            for e in kind.exprs_mut() {
                if let Expr::Temp {
                    sym,
                    ctx: Ctx::Store,
                } = e
                {
                    if self.vars.contains(sym) {
                        defs.push(*sym);
                        let v = ctx.add_version(*sym);
                        self.stacks.entry(*sym).or_default().push(v);
                        *sym = v;
                    }
                }
            }
            pushed.extend(defs);
            ctx.stm_mut(stm).kind = kind;
        }

        let loc = ctx
            .terminator(blk)
            .map(|t| ctx.stm(t).loc)
            .unwrap_or_default();
        for succ in ctx.block(blk).succs.clone() {
            let positions: Vec<usize> = ctx
                .block(succ)
                .preds
                .iter()
                .enumerate()
                .filter(|(_, p)| **p == blk)
                .map(|(i, _)| i)
                .collect();
            for stm in ctx.phis(succ) {
                let Some(var) = self.placed.get(&stm).copied() else {
                    continue;
                };
                let top = self.stacks.get(&var).and_then(|s| s.last()).copied();
                let Some(top) = top else {
                    return Err(Self::undefined(ctx, var, loc));
                };
                if let Some(phi) = ctx.stm_mut(stm).kind.phi_mut() {
                    for i in positions.iter() {
                        phi.args[*i] = Expr::temp(top);
                    }
                }
            }
        }

        for c in self.dom.children(blk).to_vec() {
            self.rename_block(ctx, c)?;
        }
        for var in pushed {
            if let Some(s) = self.stacks.get_mut(&var) {
                s.pop();
            }
        }
        Ok(())
    }
}

impl Visitor for Ssa {
    fn start(&mut self, scope: ScopeId, ctx: &mut ir::Context) -> VisResult {
        let mut b = SsaBuilder {
            vars: candidates(ctx, scope),
            dom: DominatorTree::new(ctx, scope),
            placed: HashMap::new(),
            stacks: HashMap::new(),
        };
        b.place_phis(ctx, scope);
        for root in b.dom.roots() {
            b.rename_block(ctx, root)?;
        }
        ctx.build_usedef(scope);
        log::debug!(
            "{}: {} phi(s) placed",
            ctx.scope(scope).name,
            b.placed.len()
        );
        Ok(Action::SkipChildren)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ir::{BinOpKind, Builder, RelOpKind, SynthParams, Type};

    fn phis_of(ctx: &ir::Context, f: ScopeId) -> Vec<Phi> {
        ctx.scope_stms(f)
            .into_iter()
            .filter_map(|s| ctx.stm(s).kind.phi().cloned())
            .collect()
    }

    #[test]
    fn branches_merge_through_a_phi() {
        let mut ctx = ir::Context::default();
        let mut b = Builder::function(&mut ctx, "f");
        let a = b.param("a", Type::int(32, true));
        let x = b.local("x", Type::int(32, true));
        b.if_else(
            Expr::relop(RelOpKind::Lt, Expr::temp(a), Expr::int(0)),
            |b| {
                b.mov(x, Expr::int(1));
            },
            |b| {
                b.mov(x, Expr::int(2));
            },
        );
        b.ret(Expr::temp(x));
        let f = b.finish();
        Ssa::do_pass_default(&mut ctx).unwrap();

        let phis = phis_of(&ctx, f);
        assert_eq!(phis.len(), 1);
        assert_eq!(phis[0].kind, PhiKind::Phi);
        assert_eq!(phis[0].args.len(), 2);
        assert_ne!(phis[0].args[0], phis[0].args[1]);
        // Each version is defined exactly once.
        let defs: Vec<SymbolId> = ctx
            .scope_stms(f)
            .into_iter()
            .flat_map(|s| ctx.stm(s).kind.def_syms())
            .filter(|d| ctx.root_ancestor(*d) == x)
            .collect();
        let unique: BTreeSet<_> = defs.iter().collect();
        assert_eq!(defs.len(), 3);
        assert_eq!(unique.len(), 3);
        assert!(!defs.contains(&x));
    }

    #[test]
    fn loop_carried_values_get_lphis() {
        let mut ctx = ir::Context::default();
        let mut b = Builder::function(&mut ctx, "f");
        let s = b.local("s", Type::int(32, true));
        b.mov(s, Expr::int(0));
        let head = b.for_range("i", Expr::int(0), Expr::int(4), 1, SynthParams::default(), |b, i| {
            b.mov(s, Expr::binop(BinOpKind::Add, Expr::temp(s), Expr::temp(i)));
        });
        b.ret(Expr::temp(s));
        let f = b.finish();
        Ssa::do_pass_default(&mut ctx).unwrap();

        let at_head: Vec<Phi> = ctx
            .phis(head)
            .into_iter()
            .filter_map(|p| ctx.stm(p).kind.phi().cloned())
            .collect();
        assert_eq!(at_head.len(), 2, "one for s and one for i");
        assert!(at_head.iter().all(|p| p.kind == PhiKind::LPhi));
        assert_eq!(phis_of(&ctx, f).len(), 2);
    }

    #[test]
    fn dead_values_need_no_phi() {
        let mut ctx = ir::Context::default();
        let mut b = Builder::function(&mut ctx, "f");
        let a = b.param("a", Type::int(32, true));
        let x = b.local("x", Type::int(32, true));
        b.if_else(
            Expr::temp(a),
            |b| {
                b.mov(x, Expr::int(1));
            },
            |b| {
                b.mov(x, Expr::int(2));
            },
        );
        b.ret(Expr::int(0));
        let f = b.finish();
        Ssa::do_pass_default(&mut ctx).unwrap();
        assert!(phis_of(&ctx, f).is_empty());
    }

    #[test]
    fn reading_an_unassigned_local_fails() {
        let mut ctx = ir::Context::default();
        let mut b = Builder::function(&mut ctx, "f");
        let x = b.local("x", Type::int(32, true));
        let y = b.local("y", Type::int(32, true));
        b.mov(y, Expr::temp(x));
        b.ret(Expr::temp(y));
        b.finish();
        let err = Ssa::do_pass_default(&mut ctx).err().unwrap();
        assert_eq!(err.code(), "REFERENCED_BEFORE_ASSIGN");
    }
}
