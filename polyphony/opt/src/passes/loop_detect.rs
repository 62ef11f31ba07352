use crate::analysis::loops::detect_loops;
use crate::traversal::{Action, Named, VisResult, Visitor};
use polyphony_ir::{self as ir, ScopeId};

/// Rebuilds the loop nest tree of every scope.
#[derive(Default)]
pub struct LoopDetect;

impl Named for LoopDetect {
    fn name() -> &'static str {
        "loop-detect"
    }

    fn description() -> &'static str {
        "Find natural loops, their counters and the loop nest tree"
    }
}

impl Visitor for LoopDetect {
    fn start(&mut self, scope: ScopeId, ctx: &mut ir::Context) -> VisResult {
        detect_loops(ctx, scope);
        log::debug!(
            "{}: {} loop region(s)",
            ctx.scope(scope).name,
            ctx.scope(scope).loop_tree.len()
        );
        Ok(Action::SkipChildren)
    }
}
