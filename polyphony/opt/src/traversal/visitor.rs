//! The visiting interface for passes over the scopes of a program.
//! A pass is run on an [ir::Context] and visits each selected scope,
//! and optionally each of its blocks in topological order.
use super::action::{Action, VisResult};
use super::{ConstructVisitor, Named, Order, ScopeTraversal};
use polyphony_ir::{self as ir, BlockId, ScopeId};
use polyphony_utils::PolyResult;

/// Scopes with a body that is compiled to hardware or feeds something that
/// is: everything with a CFG except library code.
pub fn has_body(ctx: &ir::Context, scope: ScopeId) -> bool {
    let s = ctx.scope(scope);
    s.entry_block.is_some() && !s.is_lib() && !s.is_inlinelib()
}

/// Passes override one or more of the hooks below and rely on the defaults
/// for the rest.
/// 1. `start_context` / `finish_context`: once per run.
/// 2. `start` / `finish`: once per selected scope.
/// 3. `visit_block`: once per reachable block, between `start` and `finish`.
pub trait Visitor {
    /// When this returns a message the pass is skipped and the message
    /// logged.
    fn precondition(_ctx: &ir::Context) -> Option<String>
    where
        Self: Sized,
    {
        None
    }

    fn iteration_order() -> Order
    where
        Self: Sized,
    {
        Order::No
    }

    /// Whether `scope` is visited at all.
    fn select(&self, ctx: &ir::Context, scope: ScopeId) -> bool {
        has_body(ctx, scope)
    }

    fn start_context(&mut self, _ctx: &mut ir::Context) -> VisResult {
        Ok(Action::Continue)
    }

    fn finish_context(&mut self, _ctx: &mut ir::Context) -> VisResult {
        Ok(Action::Continue)
    }

    fn start(&mut self, _scope: ScopeId, _ctx: &mut ir::Context) -> VisResult {
        Ok(Action::Continue)
    }

    fn visit_block(
        &mut self,
        _blk: BlockId,
        _scope: ScopeId,
        _ctx: &mut ir::Context,
    ) -> VisResult {
        Ok(Action::Continue)
    }

    /// Runs after the blocks, unless a hook asked to stop.
    fn finish(&mut self, _scope: ScopeId, _ctx: &mut ir::Context) -> VisResult {
        Ok(Action::Continue)
    }

    /// Calls [Visitor::start], visits the blocks of `scope` in topological
    /// order, and finally calls [Visitor::finish].
    fn traverse_scope(&mut self, scope: ScopeId, ctx: &mut ir::Context) -> VisResult {
        self.start(scope, ctx)?
            .and_then(|| {
                for blk in ctx.traverse_blocks(scope) {
                    match self.visit_block(blk, scope, ctx)? {
                        Action::Continue => (),
                        act => return Ok(act),
                    }
                }
                Ok(Action::Continue)
            })?
            .pop()
            .and_then(|| self.finish(scope, ctx))
    }

    /// Run the visitor on every selected scope of `ctx`. Scopes created by
    /// the pass itself are not visited in the same run.
    ///
    /// [ConstructVisitor::clear_data] is called after each scope.
    fn do_pass(&mut self, ctx: &mut ir::Context) -> PolyResult<()>
    where
        Self: Sized + ConstructVisitor + Named,
    {
        if let Some(msg) = Self::precondition(ctx) {
            log::info!("Skipping `{}': {msg}", Self::name());
            return Ok(());
        }
        if self.start_context(ctx)? == Action::Stop {
            return Ok(());
        }
        let order = ScopeTraversal::new(ctx, Self::iteration_order());
        for scope in order.scopes() {
            // An earlier visit may have removed the scope.
            if !ctx.scope_names.contains_key(&ctx.scope(scope).name)
                || !self.select(ctx, scope)
            {
                continue;
            }
            let act = self.traverse_scope(scope, ctx)?;
            self.clear_data();
            if act == Action::Stop {
                break;
            }
        }
        self.finish_context(ctx)?;
        Ok(())
    }

    /// Build the pass with [ConstructVisitor::from] and run it.
    fn do_pass_default(ctx: &mut ir::Context) -> PolyResult<Self>
    where
        Self: ConstructVisitor + Sized + Named,
    {
        let mut visitor = Self::from(ctx)?;
        visitor.do_pass(ctx)?;
        Ok(visitor)
    }
}
