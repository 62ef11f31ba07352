use crate::analysis::loops::detect_loops;
use crate::traversal::{
    Action, ConstructVisitor, Named, ParseVal, PassOpt, VisResult, Visitor,
};
use polyphony_ir::{
    self as ir, BinOpKind, BlockId, Expr, JumpKind, RelOpKind, ScopeId, StmId, StmKind,
    SymbolId, Unroll as UnrollKind,
};
use polyphony_utils::{Error, ErrorKind, Loc, PolyResult};

/// Unrolls loops marked with `unroll()` or `unroll(n)`.
///
/// Only counted loops qualify: a single body block, a counter compared
/// with `<` against a constant bound, a constant start and a constant
/// positive step. A full unroll replaces the loop by straight-line code.
/// A partial unroll by `n` replicates the body `n` times per iteration;
/// when `n` does not divide the trip count, a loop over the unrolled body
/// runs first and the original loop finishes the remaining iterations.
pub struct Unroll {
    max_factor: u32,
}

impl Named for Unroll {
    fn name() -> &'static str {
        "unroll"
    }

    fn description() -> &'static str {
        "Unroll counted loops"
    }

    fn opts() -> Vec<PassOpt> {
        vec![PassOpt::new(
            "max-factor",
            "largest number of copies made by a full unroll",
            ParseVal::Num(64),
            PassOpt::parse_num,
        )]
    }
}

impl ConstructVisitor for Unroll {
    fn from(ctx: &ir::Context) -> PolyResult<Self> {
        let opts = Self::get_opts(ctx);
        let max_factor = opts["max-factor"]
            .pos_num()
            .and_then(|n| u32::try_from(n).ok())
            .filter(|n| *n > 0)
            .unwrap_or(64);
        Ok(Unroll { max_factor })
    }

    fn clear_data(&mut self) {}
}

/// What is known about a counted loop.
struct Counted {
    head: BlockId,
    body: BlockId,
    exit: BlockId,
    counter: SymbolId,
    start: i64,
    stop: i64,
    step: i64,
    cond_def: StmId,
    update_def: StmId,
    loc: Loc,
}

impl Counted {
    fn trip(&self) -> i64 {
        (((self.stop - 1 + self.step) - self.start) / self.step).max(0)
    }
}

fn rule(kind: ErrorKind, loc: Loc) -> Error {
    Error::new(kind).with_loc(loc)
}

/// Inspect the loop headed by `head`.
fn analyze(ctx: &ir::Context, scope: ScopeId, head: BlockId) -> PolyResult<Counted> {
    let tree = &ctx.scope(scope).loop_tree;
    let lp = tree
        .get(head)
        .ok_or_else(|| Error::internal("unroll: loop vanished"))?;
    let loc = ctx
        .terminator(head)
        .map(|t| ctx.stm(t).loc)
        .unwrap_or_default();
    if !tree.is_leaf(head) {
        return Err(rule(ErrorKind::RuleUnrollNestedLoop, loc));
    }
    let ([body], [exit]) = (lp.bodies.as_slice(), lp.exits.as_slice()) else {
        return Err(rule(ErrorKind::RuleUnrollControlBranch, loc));
    };
    let (Some(counter), Some(update), Some(cond)) = (lp.counter, &lp.update, lp.cond) else {
        return Err(rule(ErrorKind::RuleUnrollUnknownStep, loc));
    };
    let step = match update {
        Expr::BinOp {
            op: BinOpKind::Add,
            left,
            right,
        } if left.symbol() == Some(counter) => right
            .as_int()
            .ok_or_else(|| rule(ErrorKind::RuleUnrollVariableStep, loc))?,
        _ => return Err(rule(ErrorKind::RuleUnrollUnknownStep, loc)),
    };
    let start = lp
        .init
        .as_ref()
        .and_then(|e| e.as_int())
        .ok_or_else(|| rule(ErrorKind::RuleUnrollUnfixedLoop, loc))?;
    let usedef = &ctx.scope(scope).usedef;
    let cond_def = ctx
        .block(head)
        .stms
        .iter()
        .copied()
        .find(|s| ctx.stm(*s).kind.def_syms() == vec![cond])
        .ok_or_else(|| rule(ErrorKind::RuleUnrollUnfixedLoop, loc))?;
    let stop = match ctx.stm(cond_def).kind.src() {
        Some(Expr::RelOp {
            op: RelOpKind::Lt,
            right,
            ..
        }) => right.as_int(),
        _ => None,
    }
    .filter(|_| step > 0)
    .ok_or_else(|| rule(ErrorKind::RuleUnrollUnfixedLoop, loc))?;
    let update_def = usedef
        .get_stms_defining(counter)
        .into_iter()
        .find(|s| ctx.stm(*s).block == *body)
        .ok_or_else(|| rule(ErrorKind::RuleUnrollUnknownStep, loc))?;
    Ok(Counted {
        head,
        body: *body,
        exit: *exit,
        counter,
        start,
        stop,
        step,
        cond_def,
        update_def,
        loc,
    })
}

/// The body statements of the loop, in order, without the counter update
/// and the back jump.
fn body_stms(ctx: &ir::Context, c: &Counted) -> Vec<StmKind> {
    ctx.block(c.body)
        .stms
        .iter()
        .copied()
        .filter(|s| *s != c.update_def && !ctx.stm(*s).kind.is_terminator())
        .map(|s| ctx.stm(s).kind.clone())
        .collect()
}

/// `stms` with every read of `counter` replaced by `value`.
fn with_counter(stms: &[StmKind], counter: SymbolId, value: &Expr) -> Vec<StmKind> {
    stms.iter()
        .cloned()
        .map(|mut k| {
            for e in k.exprs_mut() {
                e.replace_uses(counter, value);
            }
            k
        })
        .collect()
}

fn offset(counter: SymbolId, by: i64) -> Expr {
    if by == 0 {
        Expr::temp(counter)
    } else {
        Expr::binop(BinOpKind::Add, Expr::temp(counter), Expr::int(by))
    }
}

fn clear_unroll(ctx: &mut ir::Context, head: BlockId) {
    ctx.block_mut(head).synth_params.unroll = UnrollKind::None;
}

impl Unroll {
    /// Replace the loop by `trip` copies of its body.
    fn full(ctx: &mut ir::Context, c: &Counted) {
        let body = body_stms(ctx, c);
        let trip = c.trip();
        let mut seq = vec![];
        for k in 0..trip {
            let value = Expr::int(c.start + k * c.step);
            seq.extend(with_counter(&body, c.counter, &value));
        }
        seq.push(StmKind::mov(
            Expr::store(c.counter),
            Expr::int(c.start + trip * c.step),
        ));
        seq.push(StmKind::jump(c.exit));

        for s in ctx.block(c.body).stms.clone() {
            ctx.remove_stm(s);
        }
        for k in seq {
            ctx.append_stm(c.body, k, c.loc);
        }
        // The head now falls through into the straight-line code.
        ctx.disconnect(c.body, c.head);
        ctx.disconnect(c.head, c.exit);
        ctx.connect(c.body, c.exit);
        ctx.remove_stm(c.cond_def);
        if let Some(t) = ctx.terminator(c.head) {
            ctx.replace_stm_kind(t, StmKind::jump(c.body));
        }
    }

    /// Replicate the body `factor` times inside `blk`, which must end with
    /// its back jump, and step the counter once by the whole stride.
    fn expand(ctx: &mut ir::Context, c: &Counted, blk: BlockId, body: &[StmKind], factor: i64) {
        let jump = ctx.terminator(blk);
        for s in ctx.block(blk).stms.clone() {
            if Some(s) != jump {
                ctx.remove_stm(s);
            }
        }
        for k in 0..factor {
            for kind in with_counter(body, c.counter, &offset(c.counter, k * c.step)) {
                ctx.insert_before_terminator(blk, kind, c.loc);
            }
        }
        ctx.insert_before_terminator(
            blk,
            StmKind::mov(Expr::store(c.counter), offset(c.counter, factor * c.step)),
            c.loc,
        );
    }

    /// Put a loop over `factor` copies of the body in front of the
    /// original loop, which runs the iterations that are left over.
    fn with_remainder(ctx: &mut ir::Context, scope: ScopeId, c: &Counted, factor: i64) {
        let body = body_stms(ctx, c);
        let h2 = ctx.new_block(scope, "unroll_head");
        let b2 = ctx.new_block(scope, "unroll_body");
        let mut params = ctx.block(c.head).synth_params.clone();
        params.unroll = UnrollKind::None;
        ctx.block_mut(h2).synth_params = params.clone();
        ctx.block_mut(b2).synth_params = params;

        let entries: Vec<BlockId> = ctx.block(c.head).forward_preds().collect();
        for p in entries {
            ctx.replace_succ(p, c.head, h2);
            ctx.replace_pred(c.head, p, h2);
            ctx.block_mut(h2).preds.push(p);
        }
        let c2 = ctx.add_condition_sym(scope);
        let bound = c.stop - (factor - 1) * c.step;
        ctx.append_stm(
            h2,
            StmKind::mov(
                Expr::store(c2),
                Expr::relop(RelOpKind::Lt, Expr::temp(c.counter), Expr::int(bound)),
            ),
            c.loc,
        );
        ctx.append_stm(
            h2,
            StmKind::CJump {
                exp: Expr::temp(c2),
                true_blk: b2,
                false_blk: c.head,
            },
            c.loc,
        );
        ctx.connect(h2, b2);
        ctx.block_mut(h2).succs.push(c.head);
        ctx.append_stm(
            b2,
            StmKind::Jump {
                target: h2,
                kind: JumpKind::LoopBack,
            },
            c.loc,
        );
        ctx.connect_loop(b2, h2);
        Self::expand(ctx, c, b2, &body, factor);
    }

    /// Unroll one marked loop; whether one was found.
    fn unroll_one(&self, ctx: &mut ir::Context, scope: ScopeId) -> PolyResult<bool> {
        let tree = &ctx.scope(scope).loop_tree;
        let Some(head) = tree
            .loop_heads_post_order()
            .into_iter()
            .find(|h| ctx.block(*h).synth_params.unroll != UnrollKind::None)
        else {
            return Ok(false);
        };
        // A single copy of the body is the loop itself.
        if matches!(ctx.block(head).synth_params.unroll, UnrollKind::Factor(n) if n <= 1) {
            clear_unroll(ctx, head);
            return Ok(true);
        }
        let c = analyze(ctx, scope, head)?;
        let trip = c.trip();
        let factor = match ctx.block(head).synth_params.unroll {
            UnrollKind::Full if trip > self.max_factor as i64 => {
                log::warn!(
                    "{}: {} iterations exceed max-factor {}; unrolling partially",
                    ctx.block(head).name(),
                    trip,
                    self.max_factor
                );
                self.max_factor as i64
            }
            UnrollKind::Full => trip,
            UnrollKind::Factor(n) => (n as i64).min(trip),
            UnrollKind::None => 1,
        };
        clear_unroll(ctx, head);
        log::debug!(
            "{}: trip count {trip}, unroll factor {factor}",
            ctx.block(head).name()
        );
        if factor <= 1 && trip > 1 {
            return Ok(true);
        }
        if factor == trip {
            Self::full(ctx, &c);
        } else if trip % factor == 0 {
            let body = body_stms(ctx, &c);
            Self::expand(ctx, &c, c.body, &body, factor);
        } else {
            Self::with_remainder(ctx, scope, &c, factor);
        }
        ctx.remove_unreachable_blocks(scope);
        ctx.set_order(scope);
        ctx.build_usedef(scope);
        detect_loops(ctx, scope);
        Ok(true)
    }
}

impl Visitor for Unroll {
    fn start(&mut self, scope: ScopeId, ctx: &mut ir::Context) -> VisResult {
        detect_loops(ctx, scope);
        while self.unroll_one(ctx, scope)? {}
        Ok(Action::SkipChildren)
    }
}
