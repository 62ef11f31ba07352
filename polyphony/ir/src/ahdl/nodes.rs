//! Expressions, statements and declarations of the hardware IR.
use crate::{BinOpKind, BlockId, HdlScopeId, RelOpKind, SignalId, UnOpKind};
use polyphony_utils::Id;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AOp {
    Un(UnOpKind),
    Bin(BinOpKind),
    Rel(RelOpKind),
}

impl AOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            AOp::Un(op) => op.as_ref_static(),
            AOp::Bin(op) => op.as_ref_static(),
            AOp::Rel(op) => op.as_ref_static(),
        }
    }
}

/// Static operator spellings for the hardware printer.
trait StaticSym {
    fn as_ref_static(&self) -> &'static str;
}

impl StaticSym for UnOpKind {
    fn as_ref_static(&self) -> &'static str {
        match self {
            UnOpKind::USub => "-",
            UnOpKind::UAdd => "+",
            UnOpKind::Not => "!",
            UnOpKind::Invert => "~",
        }
    }
}

impl StaticSym for BinOpKind {
    fn as_ref_static(&self) -> &'static str {
        match self {
            BinOpKind::Add => "+",
            BinOpKind::Sub => "-",
            BinOpKind::Mult => "*",
            BinOpKind::FloorDiv => "/",
            BinOpKind::Mod => "%",
            BinOpKind::LShift => "<<",
            BinOpKind::RShift => ">>>",
            BinOpKind::BitOr => "|",
            BinOpKind::BitXor => "^",
            BinOpKind::BitAnd => "&",
        }
    }
}

impl StaticSym for RelOpKind {
    fn as_ref_static(&self) -> &'static str {
        match self {
            RelOpKind::And => "&&",
            RelOpKind::Or => "||",
            RelOpKind::Eq | RelOpKind::Is => "==",
            RelOpKind::NotEq | RelOpKind::IsNot => "!=",
            RelOpKind::Lt => "<",
            RelOpKind::LtE => "<=",
            RelOpKind::Gt => ">",
            RelOpKind::GtE => ">=",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum AExpr {
    Const(i64),
    Var(SignalId),
    /// A whole memory or register array.
    MemVar(SignalId),
    Subscript {
        mem: SignalId,
        offset: Box<AExpr>,
    },
    Op {
        op: AOp,
        args: Vec<AExpr>,
    },
    Concat(Vec<AExpr>),
    IfExp {
        cond: Box<AExpr>,
        lexp: Box<AExpr>,
        rexp: Box<AExpr>,
    },
    FunCall {
        name: Id,
        args: Vec<AExpr>,
    },
    /// A name known to the backend, like a state name or `$display`.
    Symbol(Id),
}

impl AExpr {
    pub fn var(s: SignalId) -> Self {
        AExpr::Var(s)
    }

    pub fn un(op: UnOpKind, e: AExpr) -> Self {
        AExpr::Op {
            op: AOp::Un(op),
            args: vec![e],
        }
    }

    pub fn bin(op: BinOpKind, l: AExpr, r: AExpr) -> Self {
        AExpr::Op {
            op: AOp::Bin(op),
            args: vec![l, r],
        }
    }

    pub fn rel(op: RelOpKind, l: AExpr, r: AExpr) -> Self {
        AExpr::Op {
            op: AOp::Rel(op),
            args: vec![l, r],
        }
    }

    /// `l && r`, folding constant operands.
    pub fn and(l: AExpr, r: AExpr) -> Self {
        match (&l, &r) {
            (AExpr::Const(0), _) | (_, AExpr::Const(0)) => AExpr::Const(0),
            (AExpr::Const(_), _) => r,
            (_, AExpr::Const(_)) => l,
            _ => AExpr::rel(RelOpKind::And, l, r),
        }
    }

    /// `l || r`, folding constant operands.
    pub fn or(l: AExpr, r: AExpr) -> Self {
        match (&l, &r) {
            (AExpr::Const(0), _) => r,
            (_, AExpr::Const(0)) => l,
            (AExpr::Const(_), _) | (_, AExpr::Const(_)) => AExpr::Const(1),
            _ => AExpr::rel(RelOpKind::Or, l, r),
        }
    }

    pub fn not(e: AExpr) -> Self {
        match e {
            AExpr::Const(c) => AExpr::Const((c == 0) as i64),
            AExpr::Op {
                op: AOp::Un(UnOpKind::Not),
                mut args,
            } if args.len() == 1 => args.remove(0),
            e => AExpr::un(UnOpKind::Not, e),
        }
    }

    pub fn eq(l: AExpr, r: AExpr) -> Self {
        AExpr::rel(RelOpKind::Eq, l, r)
    }

    /// The signal of a `Var` or `MemVar`.
    pub fn signal(&self) -> Option<SignalId> {
        match self {
            AExpr::Var(s) | AExpr::MemVar(s) => Some(*s),
            AExpr::Subscript { mem, .. } => Some(*mem),
            _ => None,
        }
    }

    pub fn kids(&self) -> Vec<&AExpr> {
        match self {
            AExpr::Const(_) | AExpr::Var(_) | AExpr::MemVar(_) | AExpr::Symbol(_) => {
                vec![]
            }
            AExpr::Subscript { offset, .. } => vec![&**offset],
            AExpr::Op { args, .. }
            | AExpr::Concat(args)
            | AExpr::FunCall { args, .. } => args.iter().collect(),
            AExpr::IfExp { cond, lexp, rexp } => vec![&**cond, &**lexp, &**rexp],
        }
    }

    pub fn kids_mut(&mut self) -> Vec<&mut AExpr> {
        match self {
            AExpr::Const(_) | AExpr::Var(_) | AExpr::MemVar(_) | AExpr::Symbol(_) => {
                vec![]
            }
            AExpr::Subscript { offset, .. } => vec![&mut **offset],
            AExpr::Op { args, .. }
            | AExpr::Concat(args)
            | AExpr::FunCall { args, .. } => args.iter_mut().collect(),
            AExpr::IfExp { cond, lexp, rexp } => {
                vec![&mut **cond, &mut **lexp, &mut **rexp]
            }
        }
    }

    /// Every signal read by this expression.
    pub fn signals(&self) -> Vec<SignalId> {
        let mut out = vec![];
        self.collect_signals(&mut out);
        out
    }

    fn collect_signals(&self, out: &mut Vec<SignalId>) {
        if let Some(s) = self.signal() {
            out.push(s);
        }
        for k in self.kids() {
            k.collect_signals(out);
        }
    }

    /// Replace every reference to `old` with `new`. Returns the count.
    pub fn replace_signal(&mut self, old: SignalId, new: &AExpr) -> usize {
        if let AExpr::Var(s) = self {
            if *s == old {
                *self = new.clone();
                return 1;
            }
            return 0;
        }
        self.kids_mut()
            .into_iter()
            .map(|k| k.replace_signal(old, new))
            .sum()
    }
}

/// Where a transition goes. Block targets are resolved to state names once
/// the STG of the scope exists.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Target {
    Block(BlockId),
    State(Id),
    /// The next state in the STG.
    Next,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum_macros::AsRefStr)]
pub enum MetaWaitKind {
    #[strum(serialize = "WAIT_INPUT_READY")]
    InputReady,
    #[strum(serialize = "WAIT_OUTPUT_ACCEPT")]
    OutputAccept,
    /// Waits until each `(old, new)` argument pair changes.
    #[strum(serialize = "WAIT_EDGE")]
    Edge,
    /// Waits until every argument evaluates to true.
    #[strum(serialize = "WAIT_VALUE")]
    Value,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AStm {
    Move {
        dst: AExpr,
        src: AExpr,
    },
    Store {
        mem: SignalId,
        offset: AExpr,
        src: AExpr,
    },
    Load {
        dst: AExpr,
        mem: SignalId,
        offset: AExpr,
    },
    /// `if conds[0] { blocks[0] } else if conds[1] ...`
    If {
        conds: Vec<AExpr>,
        blocks: Vec<Vec<AStm>>,
    },
    Case {
        sel: AExpr,
        items: Vec<(AExpr, Vec<AStm>)>,
    },
    /// Start a sub-module: drive its arguments and raise `ready`.
    ModuleCall {
        instance: Id,
        callee: HdlScopeId,
        args: Vec<AExpr>,
        returns: Vec<AExpr>,
    },
    Transition(Target),
    TransitionIf {
        conds: Vec<AExpr>,
        blocks: Vec<Vec<AStm>>,
    },
    /// Stall until the wait condition holds, then run `codes` and take
    /// `transition`.
    MetaWait {
        kind: MetaWaitKind,
        args: Vec<AExpr>,
        codes: Vec<AStm>,
        transition: Option<Target>,
    },
    /// Step `step` of a multi-cycle operation spanning `step_n` cycles.
    Seq {
        factor: Box<AStm>,
        step: u32,
        step_n: u32,
    },
    PipelineGuard {
        cond: AExpr,
        codes: Vec<AStm>,
    },
    /// A statement-level function call such as `$display`.
    Expr(AExpr),
}

impl AStm {
    pub fn mv(dst: AExpr, src: AExpr) -> Self {
        AStm::Move { dst, src }
    }

    pub fn is_transition(&self) -> bool {
        match self {
            AStm::Transition(_) | AStm::TransitionIf { .. } => true,
            AStm::MetaWait { transition, .. } => transition.is_some(),
            _ => false,
        }
    }

    pub fn is_wait(&self) -> bool {
        matches!(self, AStm::MetaWait { .. })
    }

    /// Nested statement lists.
    pub fn blocks(&self) -> Vec<&Vec<AStm>> {
        match self {
            AStm::If { blocks, .. } | AStm::TransitionIf { blocks, .. } => {
                blocks.iter().collect()
            }
            AStm::Case { items, .. } => items.iter().map(|(_, b)| b).collect(),
            AStm::MetaWait { codes, .. } | AStm::PipelineGuard { codes, .. } => {
                vec![codes]
            }
            _ => vec![],
        }
    }

    pub fn blocks_mut(&mut self) -> Vec<&mut Vec<AStm>> {
        match self {
            AStm::If { blocks, .. } | AStm::TransitionIf { blocks, .. } => {
                blocks.iter_mut().collect()
            }
            AStm::Case { items, .. } => {
                items.iter_mut().map(|(_, b)| b).collect()
            }
            AStm::MetaWait { codes, .. } | AStm::PipelineGuard { codes, .. } => {
                vec![codes]
            }
            _ => vec![],
        }
    }

    /// Expressions read directly by this statement (not by nested lists).
    pub fn read_exprs(&self) -> Vec<&AExpr> {
        match self {
            AStm::Move { dst, src } => {
                let mut v = vec![src];
                if let AExpr::Subscript { offset, .. } = dst {
                    v.push(&**offset);
                }
                v
            }
            AStm::Store { offset, src, .. } => vec![offset, src],
            AStm::Load { offset, .. } => vec![offset],
            AStm::If { conds, .. } | AStm::TransitionIf { conds, .. } => {
                conds.iter().collect()
            }
            AStm::Case { sel, items } => std::iter::once(sel)
                .chain(items.iter().map(|(e, _)| e))
                .collect(),
            AStm::ModuleCall { args, .. } => args.iter().collect(),
            AStm::MetaWait { args, .. } => args.iter().collect(),
            AStm::Seq { .. } | AStm::Transition(_) => vec![],
            AStm::PipelineGuard { cond, .. } => vec![cond],
            AStm::Expr(e) => vec![e],
        }
    }

    pub fn read_exprs_mut(&mut self) -> Vec<&mut AExpr> {
        match self {
            AStm::Move { dst, src } => {
                let mut v = vec![src];
                if let AExpr::Subscript { offset, .. } = dst {
                    v.push(&mut **offset);
                }
                v
            }
            AStm::Store { offset, src, .. } => vec![offset, src],
            AStm::Load { offset, .. } => vec![offset],
            AStm::If { conds, .. } | AStm::TransitionIf { conds, .. } => {
                conds.iter_mut().collect()
            }
            AStm::Case { sel, items } => std::iter::once(sel)
                .chain(items.iter_mut().map(|(e, _)| e))
                .collect(),
            AStm::ModuleCall { args, .. } => args.iter_mut().collect(),
            AStm::MetaWait { args, .. } => args.iter_mut().collect(),
            AStm::Seq { .. } | AStm::Transition(_) => vec![],
            AStm::PipelineGuard { cond, .. } => vec![cond],
            AStm::Expr(e) => vec![e],
        }
    }

    /// The signal this statement writes directly.
    pub fn def_signal(&self) -> Option<SignalId> {
        match self {
            AStm::Move { dst, .. } | AStm::Load { dst, .. } => dst.signal(),
            AStm::Store { mem, .. } => Some(*mem),
            _ => None,
        }
    }
}

/// Declarations placed at module level rather than in a state.
#[derive(Clone, Debug, PartialEq)]
pub enum ADecl {
    /// Continuous assignment.
    Assign { dst: SignalId, src: AExpr },
    /// A combinational lookup function, used for ROMs.
    Function {
        output: SignalId,
        input: SignalId,
        cases: Vec<(i64, i64)>,
    },
    /// `output = inputs[selector]`
    Mux {
        output: SignalId,
        selector: SignalId,
        inputs: Vec<SignalId>,
    },
    /// `outputs[selector] = input`, others zero.
    Demux {
        outputs: Vec<SignalId>,
        selector: SignalId,
        input: SignalId,
    },
    /// Combinational block.
    Comb { codes: Vec<AStm> },
}
