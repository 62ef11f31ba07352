use crate::traversal::{Action, Named, VisResult, Visitor};
use polyphony_ir::{self as ir, ScopeId};

/// Rebuilds the use-def table of every scope.
#[derive(Default)]
pub struct UseDef;

impl Named for UseDef {
    fn name() -> &'static str {
        "usedef"
    }

    fn description() -> &'static str {
        "Rebuild the use-def tables"
    }
}

impl Visitor for UseDef {
    fn start(&mut self, scope: ScopeId, ctx: &mut ir::Context) -> VisResult {
        ctx.build_usedef(scope);
        Ok(Action::SkipChildren)
    }
}
