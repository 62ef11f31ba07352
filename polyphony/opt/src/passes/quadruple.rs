use crate::analysis::typing::expr_type;
use crate::traversal::{Action, Named, VisResult, Visitor};
use polyphony_ir::{self as ir, BlockId, Ctx, Expr, PhiKind, ScopeId, StmKind};

/// Splits statements so each performs at most one operation.
///
/// Nested sub-expressions are computed into fresh `@t` temps ahead of the
/// statement that needs them. A store through an element reference becomes
/// an explicit `MSTORE`. Branch conditions, return values, call arguments
/// and phi operands are reduced to constants or variables.
#[derive(Default)]
pub struct Quadruple;

impl Named for Quadruple {
    fn name() -> &'static str {
        "quadruple"
    }

    fn description() -> &'static str {
        "Break nested expressions into single operations on fresh temps"
    }
}

/// Collects the statements computing hoisted sub-expressions.
struct Splitter<'a> {
    ctx: &'a mut ir::Context,
    scope: ScopeId,
    pending: Vec<StmKind>,
}

impl Splitter<'_> {
    /// `e` as a constant or a variable.
    fn leaf(&mut self, e: Expr) -> Expr {
        if e.is_leaf() {
            return e;
        }
        let e = self.single_op(e);
        let t = self.ctx.add_temp(self.scope, "@t");
        let typ = expr_type(self.ctx, &e);
        self.ctx.sym_mut(t).typ = typ;
        self.pending.push(StmKind::mov(Expr::store(t), e));
        Expr::temp(t)
    }

    /// `e` as one operation over leaves.
    fn single_op(&mut self, mut e: Expr) -> Expr {
        if e.is_var() {
            return e;
        }
        for k in e.kids_mut() {
            let old = std::mem::replace(k, Expr::bool(false));
            *k = self.leaf(old);
        }
        e
    }

    /// An element store `mem[offset] = src` as an `MSTORE`.
    fn element_store(&mut self, dst: Expr, src: Expr) -> Result<Expr, (Expr, Expr)> {
        match dst {
            Expr::MRef {
                mem,
                offset,
                ctx: Ctx::Store,
            } => {
                let offset = self.leaf(*offset);
                let src = self.leaf(src);
                Ok(Expr::mstore(*mem, offset, src))
            }
            dst => Err((dst, src)),
        }
    }

    fn split(&mut self, kind: StmKind) -> StmKind {
        match kind {
            StmKind::Move { dst, src } => match self.element_store(dst, src) {
                Ok(st) => StmKind::Expr(st),
                Err((dst, src)) => StmKind::Move {
                    dst,
                    src: self.single_op(src),
                },
            },
            StmKind::CMove { cond, dst, src } => {
                let cond = self.single_op(cond);
                match self.element_store(dst, src) {
                    Ok(st) => StmKind::CExpr { cond, exp: st },
                    Err((dst, src)) => StmKind::CMove {
                        cond,
                        dst,
                        src: self.single_op(src),
                    },
                }
            }
            StmKind::Expr(e) => StmKind::Expr(self.single_op(e)),
            StmKind::CExpr { cond, exp } => StmKind::CExpr {
                cond: self.single_op(cond),
                exp: self.single_op(exp),
            },
            StmKind::CJump {
                exp,
                true_blk,
                false_blk,
            } => StmKind::CJump {
                exp: self.leaf(exp),
                true_blk,
                false_blk,
            },
            StmKind::MCJump { conds, targets } => StmKind::MCJump {
                conds: conds.into_iter().map(|c| self.leaf(c)).collect(),
                targets,
            },
            StmKind::Ret(e) => StmKind::Ret(self.leaf(e)),
            StmKind::Phi(mut p) if p.kind == PhiKind::UPhi => {
                p.args = p.args.into_iter().map(|a| self.leaf(a)).collect();
                p.ps = p.ps.into_iter().map(|c| self.leaf(c)).collect();
                StmKind::Phi(p)
            }
            other => other,
        }
    }
}

impl Quadruple {
    /// Phi arguments flowing in from a predecessor are computed at the end
    /// of that predecessor.
    fn split_phi_args(ctx: &mut ir::Context, scope: ScopeId, stm: ir::StmId) {
        let Some(phi) = ctx.stm(stm).kind.phi().cloned() else {
            return;
        };
        if phi.kind == PhiKind::UPhi {
            return;
        }
        let loc = ctx.stm(stm).loc;
        let mut args = phi.args.clone();
        for (i, arg) in phi.args.into_iter().enumerate() {
            let Some(Some(pred)) = phi.defblks.get(i).copied() else {
                continue;
            };
            if arg.is_leaf() {
                continue;
            }
            let mut s = Splitter {
                ctx: &mut *ctx,
                scope,
                pending: vec![],
            };
            args[i] = s.leaf(arg);
            let pending = s.pending;
            Self::place_before_terminator(ctx, pred, pending, loc);
        }
        ctx.with_usedef_update(stm, |k| {
            if let Some(p) = k.phi_mut() {
                p.args = args;
            }
        });
    }

    fn place_before_terminator(
        ctx: &mut ir::Context,
        blk: BlockId,
        stms: Vec<StmKind>,
        loc: polyphony_utils::Loc,
    ) {
        for k in stms {
            ctx.insert_before_terminator(blk, k, loc);
        }
    }
}

impl Visitor for Quadruple {
    fn start(&mut self, scope: ScopeId, ctx: &mut ir::Context) -> VisResult {
        for stm in ctx.scope_stms(scope) {
            if ctx.stm(stm).kind.is_phi() {
                Self::split_phi_args(ctx, scope, stm);
            }
            let kind = ctx.stm(stm).kind.clone();
            let mut s = Splitter {
                ctx: &mut *ctx,
                scope,
                pending: vec![],
            };
            let kind = s.split(kind);
            let pending = s.pending;
            let (blk, loc) = (ctx.stm(stm).block, ctx.stm(stm).loc);
            let idx = ctx
                .block(blk)
                .stms
                .iter()
                .position(|s| *s == stm)
                .unwrap_or(0);
            for (i, k) in pending.into_iter().enumerate() {
                ctx.insert_stm(blk, idx + i, k, loc);
            }
            ctx.replace_stm_kind(stm, kind);
        }
        ctx.build_usedef(scope);
        Ok(Action::SkipChildren)
    }
}
