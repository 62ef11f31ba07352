//! Programmatic construction of scopes. Used by frontends that produce IR
//! directly and by tests.
use crate::{
    BlockId, Context, Ctx, Direction, Expr, JumpKind, Param, PortAttrs, PortKind,
    RelOpKind, ScopeId, ScopeTag, StmId, StmKind, SymTag, SymbolId, SynthParams,
    Type, TypeKind, scope_tags, symbol::tags,
};
use polyphony_utils::{Id, Loc};

/// Name of the symbol holding a function's result.
pub const RETURN_SYM: &str = "@function_return";
/// Name of the built-in that registers a worker from a module constructor.
pub const APPEND_WORKER: &str = "append_worker";
/// Name of the implicit receiver of methods.
pub const SELF_SYM: &str = "self";

/// Builds the CFG of one scope, appending to a current block.
pub struct Builder<'a> {
    pub ctx: &'a mut Context,
    pub scope: ScopeId,
    cur: BlockId,
    file: Id,
    line: u32,
}

impl<'a> Builder<'a> {
    /// Start building the body of an existing scope. An entry block is
    /// created when the scope has none.
    pub fn in_scope(ctx: &'a mut Context, scope: ScopeId) -> Self {
        let cur = match ctx.scope(scope).entry_block {
            Some(b) => b,
            None => {
                let b = ctx.new_block(scope, "b");
                ctx.scope_mut(scope).entry_block = Some(b);
                b
            }
        };
        let file = ctx.scope(scope).loc.file;
        let file = if file.is_empty() { Id::from("<ir>") } else { file };
        Builder {
            ctx,
            scope,
            cur,
            file,
            line: 0,
        }
    }

    /// A global function.
    pub fn function(ctx: &'a mut Context, name: &str) -> Self {
        let scope = ctx.add_scope(Id::from(name), None, scope_tags(&[ScopeTag::Function]));
        Self::in_scope(ctx, scope)
    }

    /// A method of `class` with the given extra tags. Its `self` symbol is
    /// created, and the class gets a function-typed symbol naming it.
    pub fn method(
        ctx: &'a mut Context,
        class: ScopeId,
        name: &str,
        extra: &[ScopeTag],
    ) -> Self {
        let mut ts = scope_tags(extra);
        ts.insert(ScopeTag::Method);
        let scope = ctx.add_scope(Id::from(name), Some(class), ts);
        let self_tags = tags(&[SymTag::SelfSym]);
        let obj = Type::object(class);
        let self_sym = ctx
            .symbols
            .push(crate::Symbol::new(Id::from(SELF_SYM), scope, self_tags, obj));
        ctx.scope_mut(scope).symbols.insert(Id::from(SELF_SYM), self_sym);
        let fty = Type::function(scope, Type::none(), vec![]);
        let _ = ctx.add_sym(class, Id::from(name), tags(&[]), fty);
        Self::in_scope(ctx, scope)
    }

    /// A class (or module) in the global namespace.
    pub fn class(ctx: &mut Context, name: &str, module: bool) -> ScopeId {
        let mut ts = vec![ScopeTag::Class];
        if module {
            ts.push(ScopeTag::Module);
        }
        let scope = ctx.add_scope(Id::from(name), None, scope_tags(&ts));
        let cls = Type::class(scope);
        let global = ctx.global;
        let _ = ctx.add_sym(global, Id::from(name), tags(&[]), cls);
        scope
    }

    /// Add a field symbol to `class`.
    pub fn field(ctx: &mut Context, class: ScopeId, name: &str, typ: Type) -> SymbolId {
        let id = ctx.symbols.push(crate::Symbol::new(
            Id::from(name),
            class,
            tags(&[SymTag::Field]),
            typ,
        ));
        ctx.scope_mut(class).symbols.insert(Id::from(name), id);
        id
    }

    fn loc(&mut self) -> Loc {
        self.line += 1;
        Loc::new(self.file, self.line)
    }

    /// The next statement gets line `n`; following ones count up from it.
    pub fn at_line(&mut self, n: u32) -> &mut Self {
        self.line = n.saturating_sub(1);
        self
    }

    pub fn block(&self) -> BlockId {
        self.cur
    }

    pub fn set_block(&mut self, b: BlockId) {
        self.cur = b;
    }

    pub fn new_block(&mut self, tag: &str) -> BlockId {
        self.ctx.new_block(self.scope, tag)
    }

    /// The symbol `self` of a method.
    pub fn self_sym(&self) -> Option<SymbolId> {
        self.ctx.scope(self.scope).find_local(Id::from(SELF_SYM))
    }

    pub fn param(&mut self, name: &str, typ: Type) -> SymbolId {
        let sym = self.add_local(name, &[SymTag::Param], typ);
        self.ctx.scope_mut(self.scope).params.push(Param { sym, default: None });
        sym
    }

    pub fn local(&mut self, name: &str, typ: Type) -> SymbolId {
        self.add_local(name, &[], typ)
    }

    fn add_local(&mut self, name: &str, ts: &[SymTag], typ: Type) -> SymbolId {
        match self.ctx.scope(self.scope).find_local(Id::from(name)) {
            Some(s) => s,
            None => {
                let id = self.ctx.symbols.push(crate::Symbol::new(
                    Id::from(name),
                    self.scope,
                    tags(ts),
                    typ,
                ));
                self.ctx.scope_mut(self.scope).symbols.insert(Id::from(name), id);
                id
            }
        }
    }

    pub fn returns(&mut self, typ: Type) -> &mut Self {
        self.ctx.scope_mut(self.scope).return_type = typ;
        self
    }

    pub fn emit(&mut self, kind: StmKind) -> StmId {
        let loc = self.loc();
        self.ctx.append_stm(self.cur, kind, loc)
    }

    /// `sym = src`
    pub fn mov(&mut self, sym: SymbolId, src: Expr) -> StmId {
        self.emit(StmKind::mov(Expr::store(sym), src))
    }

    /// `dst = src` for an arbitrary destination.
    pub fn store(&mut self, dst: Expr, src: Expr) -> StmId {
        self.emit(StmKind::mov(dst, src))
    }

    pub fn expr(&mut self, e: Expr) -> StmId {
        self.emit(StmKind::Expr(e))
    }

    /// `self.<field>` in the given context.
    pub fn self_attr(&self, field: SymbolId, ctx: Ctx) -> Option<Expr> {
        self.self_sym().map(|s| Expr::attr(Expr::temp(s), field, ctx))
    }

    /// Store `e` in the return symbol and end the scope here.
    pub fn ret(&mut self, e: Expr) -> StmId {
        let ret_ty = self.ctx.scope(self.scope).return_type.clone();
        let ret = self.add_local(RETURN_SYM, &[SymTag::Return], ret_ty);
        self.mov(ret, e);
        self.ctx.scope_mut(self.scope).exit_block = Some(self.cur);
        self.emit(StmKind::Ret(Expr::temp(ret)))
    }

    pub fn jump(&mut self, target: BlockId) -> StmId {
        self.jump_kind(target, JumpKind::Plain)
    }

    fn jump_kind(&mut self, target: BlockId, kind: JumpKind) -> StmId {
        let s = self.emit(StmKind::Jump { target, kind });
        if kind == JumpKind::LoopBack {
            self.ctx.connect_loop(self.cur, target);
        } else {
            self.ctx.connect(self.cur, target);
        }
        s
    }

    /// Branch on `cond`, which is first stored in a fresh condition symbol.
    pub fn cjump(&mut self, cond: Expr, t: BlockId, f: BlockId) -> StmId {
        let c = self.ctx.add_condition_sym(self.scope);
        self.mov(c, cond);
        let s = self.emit(StmKind::CJump {
            exp: Expr::temp(c),
            true_blk: t,
            false_blk: f,
        });
        self.ctx.connect(self.cur, t);
        self.ctx.connect(self.cur, f);
        s
    }

    /// `if cond: then() else: els()`; continues in the merge block.
    pub fn if_else<T, E>(&mut self, cond: Expr, then: T, els: E) -> BlockId
    where
        T: FnOnce(&mut Builder),
        E: FnOnce(&mut Builder),
    {
        let bt = self.new_block("ifthen");
        let be = self.new_block("ifelse");
        let bm = self.new_block("ifexit");
        self.cjump(cond, bt, be);
        self.set_block(bt);
        then(self);
        self.jump(bm);
        self.set_block(be);
        els(self);
        self.jump(bm);
        self.set_block(bm);
        bm
    }

    /// `for <name> in range(start, stop, step): body(i)`; continues in the
    /// exit block. Returns the loop head.
    pub fn for_range<F>(
        &mut self,
        name: &str,
        start: Expr,
        stop: Expr,
        step: i64,
        params: SynthParams,
        body: F,
    ) -> BlockId
    where
        F: FnOnce(&mut Builder, SymbolId),
    {
        let int = Type::int(self.ctx.config.default_int_width, true);
        let i = self.add_local(name, &[SymTag::Induction], int);
        let head = self.new_block("whilebody_head");
        let bbody = self.new_block("whilebody");
        let exit = self.new_block("whileexit");
        self.ctx.block_mut(head).synth_params = params;
        self.mov(i, start);
        self.jump(head);
        self.set_block(head);
        self.cjump(Expr::relop(RelOpKind::Lt, Expr::temp(i), stop), bbody, exit);
        self.set_block(bbody);
        body(self, i);
        self.mov(
            i,
            Expr::binop(crate::BinOpKind::Add, Expr::temp(i), Expr::int(step)),
        );
        self.jump_kind(head, JumpKind::LoopBack);
        self.set_block(exit);
        head
    }

    /// `while True: body()` as used by workers; never exits.
    pub fn forever<F>(&mut self, body: F) -> BlockId
    where
        F: FnOnce(&mut Builder),
    {
        let head = self.new_block("whilebody_head");
        self.jump(head);
        self.set_block(head);
        body(self);
        self.jump_kind(head, JumpKind::LoopBack);
        head
    }

    /// From a module constructor: `self.append_worker(worker, args...)`.
    pub fn append_worker(&mut self, worker: ScopeId, args: Vec<Expr>) -> Option<StmId> {
        let class = self.ctx.scope(self.scope).parent?;
        let aw = match self.ctx.scope(class).find_local(Id::from(APPEND_WORKER)) {
            Some(s) => s,
            None => {
                let ty = Type {
                    kind: TypeKind::Function {
                        scope: None,
                        ret: Box::new(Type::none()),
                        params: vec![],
                    },
                    explicit: false,
                };
                let id = self.ctx.symbols.push(crate::Symbol::new(
                    Id::from(APPEND_WORKER),
                    class,
                    tags(&[SymTag::Builtin]),
                    ty,
                ));
                self.ctx.scope_mut(class).symbols.insert(Id::from(APPEND_WORKER), id);
                id
            }
        };
        let wname = self.ctx.scope(worker).base_name;
        let wsym = self.ctx.scope(class).find_local(wname)?;
        let this = self.self_sym()?;
        let mut all = vec![Expr::attr(Expr::temp(this), wsym, Ctx::Load)];
        all.extend(args);
        Some(self.expr(Expr::call(Expr::attr(Expr::temp(this), aw, Ctx::Load), all)))
    }

    /// Fix block order and the use-def table; returns the scope.
    pub fn finish(self) -> ScopeId {
        if self.ctx.scope(self.scope).exit_block.is_none() {
            self.ctx.scope_mut(self.scope).exit_block = Some(self.cur);
        }
        self.ctx.set_order(self.scope);
        self.ctx.build_usedef(self.scope);
        self.scope
    }
}

impl Context {
    /// The library class backing ports (`channel == false`) or channels.
    /// Created on first use with method symbols `rd`/`wr` or
    /// `put`/`get`/`full`/`empty`.
    pub fn port_class(&mut self, channel: bool) -> ScopeId {
        let name = if channel { "Channel" } else { "Port" };
        let full = format!("@top.polyphony.io.{name}");
        if let Some(s) = self.scope_by_name(&full) {
            return s;
        }
        let ns = match self.scope_by_name("@top.polyphony.io") {
            Some(ns) => ns,
            None => {
                let poly = match self.scope_by_name("@top.polyphony") {
                    Some(p) => p,
                    None => self.add_scope(
                        Id::from("polyphony"),
                        None,
                        scope_tags(&[ScopeTag::Namespace, ScopeTag::Lib]),
                    ),
                };
                self.add_scope(
                    Id::from("io"),
                    Some(poly),
                    scope_tags(&[ScopeTag::Namespace, ScopeTag::Lib]),
                )
            }
        };
        let cls = self.add_scope(
            Id::from(name),
            Some(ns),
            scope_tags(&[ScopeTag::Class, ScopeTag::Lib, ScopeTag::Port]),
        );
        let methods: &[&str] = if channel {
            &["put", "get", "full", "empty"]
        } else {
            &["rd", "wr"]
        };
        for m in methods {
            let ms = self.add_scope(
                Id::from(*m),
                Some(cls),
                scope_tags(&[ScopeTag::Method, ScopeTag::Lib]),
            );
            let fty = Type::function(ms, Type::undef(), vec![]);
            let _ = self.add_sym(cls, Id::from(*m), tags(&[]), fty);
        }
        cls
    }

    /// Type of a port field carrying `dtype`.
    pub fn port_type(&mut self, dtype: Type, direction: Direction, init: Option<i64>) -> Type {
        let cls = self.port_class(false);
        Type::port(
            Some(cls),
            PortAttrs {
                dtype: Box::new(dtype),
                direction,
                init,
                assigned: false,
                root_symbol: None,
                kind: PortKind::Port,
            },
        )
    }

    /// Type of a channel field of the given capacity.
    pub fn channel_type(&mut self, dtype: Type, capacity: u32) -> Type {
        let cls = self.port_class(true);
        Type::port(
            Some(cls),
            PortAttrs {
                dtype: Box::new(dtype),
                direction: Direction::Any,
                init: None,
                assigned: false,
                root_symbol: None,
                kind: PortKind::Channel { capacity },
            },
        )
    }

    /// `recv.<method>(args)` for a port-typed receiver expression.
    pub fn port_call(
        &mut self,
        recv: Expr,
        channel: bool,
        method: &str,
        args: Vec<Expr>,
    ) -> Option<Expr> {
        let cls = self.port_class(channel);
        let m = self.scope(cls).find_local(Id::from(method))?;
        Some(Expr::call(Expr::attr(recv, m, Ctx::Load), args))
    }
}
