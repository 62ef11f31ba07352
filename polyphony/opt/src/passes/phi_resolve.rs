use crate::traversal::{Action, Named, VisResult, Visitor};
use polyphony_ir::{self as ir, BlockId, Expr, PhiKind, ScopeId, StmId, StmKind};
use polyphony_utils::{Error, Loc};
use std::collections::BTreeMap;

/// Leaves SSA form.
///
/// PHI and LPHI operands become copies at the end of the predecessor they
/// flow in from. Copies into one block are parallel, so a copy whose
/// source is overwritten by a sibling copy reads a snapshot taken first.
/// UPHIs become one guarded move per operand.
#[derive(Default)]
pub struct PhiResolve;

impl Named for PhiResolve {
    fn name() -> &'static str {
        "phi-resolve"
    }

    fn description() -> &'static str {
        "Replace phis by copies in predecessor blocks"
    }
}

type Copies = BTreeMap<BlockId, Vec<(Expr, Expr, Loc)>>;

impl PhiResolve {
    fn collect(ctx: &ir::Context, phi_stm: StmId, copies: &mut Copies) -> Result<(), Error> {
        let Some(phi) = ctx.stm(phi_stm).kind.phi() else {
            return Ok(());
        };
        let loc = ctx.stm(phi_stm).loc;
        for (i, arg) in phi.args.iter().enumerate() {
            let Some(Some(pred)) = phi.defblks.get(i) else {
                return Err(Error::internal(format!(
                    "phi operand {i} of {} has no incoming block",
                    ctx.block(ctx.stm(phi_stm).block).name()
                )));
            };
            copies
                .entry(*pred)
                .or_default()
                .push((phi.var.clone(), arg.clone(), loc));
        }
        Ok(())
    }

    /// Emit the parallel copies at the end of `blk`.
    fn place(ctx: &mut ir::Context, scope: ScopeId, blk: BlockId, copies: Vec<(Expr, Expr, Loc)>) {
        let dsts: Vec<_> = copies.iter().filter_map(|(d, _, _)| d.symbol()).collect();
        let mut snapshots = vec![];
        let mut moves = vec![];
        for (dst, src, loc) in copies {
            if src.symbol() == dst.symbol() {
                continue;
            }
            let src = match src.symbol() {
                Some(s) if src.is_temp() && dsts.contains(&s) => {
                    let t = ctx.add_temp(scope, "@t");
                    let typ = ctx.sym(s).typ.clone().with_explicit(false);
                    ctx.sym_mut(t).typ = typ;
                    snapshots.push((StmKind::mov(Expr::store(t), src), loc));
                    Expr::temp(t)
                }
                _ => src,
            };
            moves.push((StmKind::mov(dst, src), loc));
        }
        for (k, loc) in snapshots.into_iter().chain(moves) {
            ctx.insert_before_terminator(blk, k, loc);
        }
    }

    fn resolve_uphi(ctx: &mut ir::Context, stm: StmId) {
        let Some(phi) = ctx.stm(stm).kind.phi().cloned() else {
            return;
        };
        let (blk, loc) = (ctx.stm(stm).block, ctx.stm(stm).loc);
        let idx = ctx
            .block(blk)
            .stms
            .iter()
            .position(|s| *s == stm)
            .unwrap_or(0);
        for (i, (arg, p)) in phi.args.into_iter().zip(phi.ps).enumerate() {
            let kind = StmKind::CMove {
                cond: p,
                dst: phi.var.clone(),
                src: arg,
            };
            ctx.insert_stm(blk, idx + i, kind, loc);
        }
        ctx.remove_stm(stm);
    }
}

impl Visitor for PhiResolve {
    fn start(&mut self, scope: ScopeId, ctx: &mut ir::Context) -> VisResult {
        let mut copies = Copies::new();
        let mut resolved = vec![];
        for stm in ctx.scope_stms(scope) {
            match ctx.stm(stm).kind.phi().map(|p| p.kind) {
                Some(PhiKind::UPhi) => Self::resolve_uphi(ctx, stm),
                Some(PhiKind::Phi | PhiKind::LPhi) => {
                    Self::collect(ctx, stm, &mut copies)?;
                    resolved.push(stm);
                }
                None => (),
            }
        }
        for stm in resolved {
            ctx.remove_stm(stm);
        }
        for (blk, cs) in copies {
            Self::place(ctx, scope, blk, cs);
        }
        ctx.build_usedef(scope);
        Ok(Action::SkipChildren)
    }
}
