use crate::traversal::{
    Action, ConstructVisitor, DiagnosticContext, DiagnosticPass, Named, VisResult,
    Visitor,
};
use polyphony_ir::{self as ir, APPEND_WORKER, Expr, Scheduling, ScopeId, StmKind};
use polyphony_utils::{Error, ErrorKind, Id, Loc, PolyResult};
use std::collections::HashSet;

/// Port names that clash with the clock and reset of generated modules.
const RESERVED_PORT_NAMES: [&str; 2] = ["clk", "rst"];

/// Checks where modules, ports and workers may appear.
///
/// Reports:
/// 1. Module classes defined outside the global namespace.
/// 2. Ports created outside the constructor of a module.
/// 3. `append_worker` outside a module constructor, or naming a function
///    that is not a method of that module.
/// 4. Module instances bound to global names.
/// 5. Port fields named like the clock or reset.
/// 6. `unroll()`/`pipelined()` used anywhere but as a loop iterable.
/// 7. Writes to global sequences.
/// 8. Functions (rather than loops) marked for pipelining.
pub struct ScopeRules {
    reserved: HashSet<Id>,
    diag: DiagnosticContext,
}

impl ConstructVisitor for ScopeRules {
    fn from(_ctx: &ir::Context) -> PolyResult<Self> {
        Ok(ScopeRules {
            reserved: RESERVED_PORT_NAMES.iter().map(|s| Id::from(*s)).collect(),
            diag: DiagnosticContext::default(),
        })
    }

    fn clear_data(&mut self) {
        // Diagnostics are collected across every scope.
    }
}

impl Named for ScopeRules {
    fn name() -> &'static str {
        "scope-rules"
    }

    fn description() -> &'static str {
        "Check the placement rules of modules, ports and workers"
    }
}

impl DiagnosticPass for ScopeRules {
    fn diagnostics(&self) -> &DiagnosticContext {
        &self.diag
    }
}

impl ScopeRules {
    fn check_class(&mut self, ctx: &ir::Context, class: ScopeId) {
        let s = ctx.scope(class);
        if s.is_module() && s.parent != Some(ctx.global) {
            self.diag.err(
                Error::new(ErrorKind::MuduleMustBeInGlobal(s.base_name)).with_loc(s.loc),
            );
        }
        for sym in s.symbols.values() {
            let field = ctx.sym(*sym);
            if !field.is_field() || !field.typ.is_port() {
                continue;
            }
            if !s.is_module() {
                self.diag
                    .err(Error::new(ErrorKind::PortMustBeInModule).with_loc(s.loc));
            } else if self.reserved.contains(&field.name) {
                self.diag.err(
                    Error::new(ErrorKind::ReservedPortName(field.name)).with_loc(s.loc),
                );
            }
        }
    }

    fn check_globals(&mut self, ctx: &ir::Context) {
        for sym in ctx.scope(ctx.global).symbols.values() {
            let typ = &ctx.sym(*sym).typ;
            if typ.is_object() && typ.scope().is_some_and(|c| ctx.scope(c).is_module()) {
                self.diag.err(Error::new(ErrorKind::GlobalInstanceIsNotSupported));
            }
        }
    }

    /// Whether `scope` is the constructor of a module class.
    fn in_module_ctor(ctx: &ir::Context, scope: ScopeId) -> bool {
        let s = ctx.scope(scope);
        s.is_ctor() && s.parent.is_some_and(|p| ctx.scope(p).is_module())
    }

    fn check_append_worker(
        &mut self,
        ctx: &ir::Context,
        scope: ScopeId,
        args: &[Expr],
        loc: Loc,
    ) {
        if !Self::in_module_ctor(ctx, scope) {
            self.diag
                .err(Error::new(ErrorKind::CallAppendWorkerInCtor).with_loc(loc));
            return;
        }
        let module = ctx.scope(scope).parent;
        let worker = args
            .first()
            .and_then(|a| a.symbol())
            .and_then(|f| ctx.sym(f).typ.scope());
        let name = match worker {
            Some(w) if ctx.scope(w).parent == module => return,
            Some(w) => ctx.scope(w).base_name,
            None => Id::from("?"),
        };
        self.diag.err(
            Error::new(ErrorKind::WorkerMustBeMethodOfModule(name)).with_loc(loc),
        );
    }
}

impl Visitor for ScopeRules {
    fn start_context(&mut self, ctx: &mut ir::Context) -> VisResult {
        for scope in ctx.scope_ids() {
            let s = ctx.scope(scope);
            if s.is_lib() {
                continue;
            }
            if s.is_class() {
                self.check_class(ctx, scope);
            }
            if s.is_callable() && s.synth_params.scheduling == Scheduling::Pipeline {
                self.diag.err(
                    Error::new(ErrorKind::RuleFunctionCannotBePipelined(s.base_name))
                        .with_loc(s.loc),
                );
            }
        }
        self.check_globals(ctx);
        Ok(Action::Continue)
    }

    fn start(&mut self, scope: ScopeId, ctx: &mut ir::Context) -> VisResult {
        let global = ctx.global;
        for stm in ctx.scope_stms(scope) {
            let s = ctx.stm(stm);
            let loc = s.loc;
            for e in s.kind.exprs() {
                for sub in e.find_exprs(|x| {
                    matches!(x, Expr::Call { .. } | Expr::New { .. } | Expr::Syscall { .. })
                }) {
                    match sub {
                        Expr::Call { func, args } => {
                            let is_aw = func
                                .symbol()
                                .is_some_and(|f| ctx.sym_name(f) == APPEND_WORKER);
                            if is_aw {
                                self.check_append_worker(ctx, scope, args, loc);
                            }
                        }
                        Expr::New { scope: cls, .. }
                            if ctx.scope(*cls).is_port()
                                && !Self::in_module_ctor(ctx, scope) =>
                        {
                            self.diag
                                .err(Error::new(ErrorKind::PortMustBeInModule).with_loc(loc));
                        }
                        Expr::Syscall { name, .. } => {
                            let what = match name.as_str() {
                                "polyphony.unroll" => "unroll()",
                                "polyphony.pipelined" => "pipelined()",
                                _ => continue,
                            };
                            self.diag.err(
                                Error::new(ErrorKind::UseOutsideFor(what.to_string()))
                                    .with_loc(loc),
                            );
                        }
                        _ => {}
                    }
                }
            }
            let written = match &s.kind {
                StmKind::Expr(Expr::MStore { mem, .. }) => mem.symbol(),
                StmKind::Move {
                    dst: Expr::MRef { mem, .. },
                    ..
                } => mem.symbol(),
                _ => None,
            };
            if let Some(mem) = written.filter(|m| ctx.sym(*m).scope == global) {
                self.diag.err(
                    Error::new(ErrorKind::GlobalObjectCantBeMutable(ctx.sym_name(mem)))
                        .with_loc(loc),
                );
            }
        }
        Ok(Action::SkipChildren)
    }
}
