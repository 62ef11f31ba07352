//! Statements of the high-level IR.
use crate::{BlockId, Ctx, Expr, SymbolId};
use polyphony_utils::Loc;
use serde::{Deserialize, Serialize};

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::AsRefStr,
)]
pub enum JumpKind {
    #[default]
    #[strum(serialize = "")]
    Plain,
    #[strum(serialize = "B")]
    Break,
    #[strum(serialize = "C")]
    Continue,
    #[strum(serialize = "L")]
    LoopBack,
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::AsRefStr,
)]
pub enum PhiKind {
    #[strum(serialize = "phi")]
    Phi,
    /// Placed on loop heads: `args = [init, loop-back]`.
    #[strum(serialize = "lphi")]
    LPhi,
    /// Selects the argument whose predicate in `ps` holds.
    #[strum(serialize = "uphi")]
    UPhi,
}

/// A merge of values. `args[i]` flows in from `defblks[i]` (PHI, LPHI) or is
/// chosen when `ps[i]` holds (UPHI).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Phi {
    pub kind: PhiKind,
    pub var: Expr,
    pub args: Vec<Expr>,
    pub ps: Vec<Expr>,
    pub defblks: Vec<Option<BlockId>>,
}

impl Phi {
    pub fn new(kind: PhiKind, var: Expr) -> Self {
        Phi {
            kind,
            var,
            args: vec![],
            ps: vec![],
            defblks: vec![],
        }
    }

    pub fn remove_arg(&mut self, idx: usize) {
        self.args.remove(idx);
        if idx < self.ps.len() {
            self.ps.remove(idx);
        }
        if idx < self.defblks.len() {
            self.defblks.remove(idx);
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum StmKind {
    Move {
        dst: Expr,
        src: Expr,
    },
    Expr(Expr),
    /// MOVE executed only when `cond` holds.
    CMove {
        cond: Expr,
        dst: Expr,
        src: Expr,
    },
    /// EXPR executed only when `cond` holds.
    CExpr {
        cond: Expr,
        exp: Expr,
    },
    Jump {
        target: BlockId,
        kind: JumpKind,
    },
    CJump {
        exp: Expr,
        true_blk: BlockId,
        false_blk: BlockId,
    },
    /// Multi-way jump: the first condition that holds selects its target.
    /// The last condition is constant true.
    MCJump {
        conds: Vec<Expr>,
        targets: Vec<BlockId>,
    },
    Ret(Expr),
    Phi(Phi),
}

impl StmKind {
    pub fn mov(dst: Expr, src: Expr) -> Self {
        StmKind::Move {
            dst: dst.with_ctx(Ctx::Store),
            src,
        }
    }

    pub fn jump(target: BlockId) -> Self {
        StmKind::Jump {
            target,
            kind: JumpKind::Plain,
        }
    }

    pub fn is_jump(&self) -> bool {
        matches!(
            self,
            StmKind::Jump { .. } | StmKind::CJump { .. } | StmKind::MCJump { .. }
        )
    }

    /// Statements that must end their block.
    pub fn is_terminator(&self) -> bool {
        self.is_jump() || matches!(self, StmKind::Ret(_))
    }

    pub fn is_phi(&self) -> bool {
        matches!(self, StmKind::Phi(_))
    }

    pub fn phi(&self) -> Option<&Phi> {
        match self {
            StmKind::Phi(p) => Some(p),
            _ => None,
        }
    }

    pub fn phi_mut(&mut self) -> Option<&mut Phi> {
        match self {
            StmKind::Phi(p) => Some(p),
            _ => None,
        }
    }

    pub fn is_move(&self) -> bool {
        matches!(self, StmKind::Move { .. })
    }

    /// Destination of an assignment-like statement.
    pub fn dst(&self) -> Option<&Expr> {
        match self {
            StmKind::Move { dst, .. } | StmKind::CMove { dst, .. } => Some(dst),
            StmKind::Phi(p) => Some(&p.var),
            _ => None,
        }
    }

    /// Source of a MOVE or CMOVE.
    pub fn src(&self) -> Option<&Expr> {
        match self {
            StmKind::Move { src, .. } | StmKind::CMove { src, .. } => Some(src),
            _ => None,
        }
    }

    /// Top-level expressions in evaluation order.
    pub fn exprs(&self) -> Vec<&Expr> {
        match self {
            StmKind::Move { dst, src } => vec![src, dst],
            StmKind::Expr(e) | StmKind::Ret(e) => vec![e],
            StmKind::CMove { cond, dst, src } => vec![cond, src, dst],
            StmKind::CExpr { cond, exp } => vec![cond, exp],
            StmKind::Jump { .. } => vec![],
            StmKind::CJump { exp, .. } => vec![exp],
            StmKind::MCJump { conds, .. } => conds.iter().collect(),
            StmKind::Phi(p) => p
                .args
                .iter()
                .chain(p.ps.iter())
                .chain(std::iter::once(&p.var))
                .collect(),
        }
    }

    pub fn exprs_mut(&mut self) -> Vec<&mut Expr> {
        match self {
            StmKind::Move { dst, src } => vec![src, dst],
            StmKind::Expr(e) | StmKind::Ret(e) => vec![e],
            StmKind::CMove { cond, dst, src } => vec![cond, src, dst],
            StmKind::CExpr { cond, exp } => vec![cond, exp],
            StmKind::Jump { .. } => vec![],
            StmKind::CJump { exp, .. } => vec![exp],
            StmKind::MCJump { conds, .. } => conds.iter_mut().collect(),
            StmKind::Phi(p) => p
                .args
                .iter_mut()
                .chain(p.ps.iter_mut())
                .chain(std::iter::once(&mut p.var))
                .collect(),
        }
    }

    /// Variable occurrences written by this statement.
    pub fn def_vars(&self) -> Vec<&Expr> {
        self.exprs()
            .into_iter()
            .flat_map(|e| e.vars())
            .filter(|v| v.ctx() == Some(Ctx::Store))
            .collect()
    }

    /// Variable occurrences read by this statement.
    pub fn use_vars(&self) -> Vec<&Expr> {
        self.exprs()
            .into_iter()
            .flat_map(|e| e.vars())
            .filter(|v| v.ctx() == Some(Ctx::Load))
            .collect()
    }

    /// Symbols of temps defined here.
    pub fn def_syms(&self) -> Vec<SymbolId> {
        self.def_vars().iter().filter_map(|v| v.symbol()).collect()
    }

    pub fn use_syms(&self) -> Vec<SymbolId> {
        self.use_vars().iter().filter_map(|v| v.symbol()).collect()
    }

    /// Jump targets in order.
    pub fn targets(&self) -> Vec<BlockId> {
        match self {
            StmKind::Jump { target, .. } => vec![*target],
            StmKind::CJump {
                true_blk,
                false_blk,
                ..
            } => vec![*true_blk, *false_blk],
            StmKind::MCJump { targets, .. } => targets.clone(),
            _ => vec![],
        }
    }

    /// Retarget every jump to `old` at `new`.
    pub fn replace_target(&mut self, old: BlockId, new: BlockId) {
        let swap = |b: &mut BlockId| {
            if *b == old {
                *b = new
            }
        };
        match self {
            StmKind::Jump { target, .. } => swap(target),
            StmKind::CJump {
                true_blk,
                false_blk,
                ..
            } => {
                swap(true_blk);
                swap(false_blk);
            }
            StmKind::MCJump { targets, .. } => targets.iter_mut().for_each(swap),
            _ => (),
        }
    }

    /// Whether removing this statement could change observable behavior.
    pub fn has_side_effect(&self) -> bool {
        match self {
            StmKind::Move { dst, src } | StmKind::CMove { dst, src, .. } => {
                src.has_side_effect() || !dst.is_temp()
            }
            StmKind::Phi(p) => !p.var.is_temp(),
            _ => true,
        }
    }
}

/// A statement placed in a block, with its source location.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stm {
    pub kind: StmKind,
    pub block: BlockId,
    pub loc: Loc,
}

impl Stm {
    pub fn new(kind: StmKind, block: BlockId, loc: Loc) -> Self {
        Stm { kind, block, loc }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BinOpKind;
    use polyphony_utils::idx::IndexRef;

    #[test]
    fn defs_and_uses_respect_context() {
        let (x, y) = (SymbolId::new(0), SymbolId::new(1));
        let s = StmKind::mov(
            Expr::temp(x),
            Expr::binop(BinOpKind::Add, Expr::temp(y), Expr::temp(x)),
        );
        assert_eq!(s.def_syms(), vec![x]);
        assert_eq!(s.use_syms(), vec![y, x]);
        assert!(!s.has_side_effect());
    }

    #[test]
    fn retargets_all_edges() {
        let (a, b, c) = (BlockId::new(0), BlockId::new(1), BlockId::new(2));
        let mut j = StmKind::CJump {
            exp: Expr::bool(true),
            true_blk: a,
            false_blk: a,
        };
        j.replace_target(a, c);
        assert_eq!(j.targets(), vec![c, c]);
        let mut mj = StmKind::MCJump {
            conds: vec![Expr::bool(false), Expr::bool(true)],
            targets: vec![a, b],
        };
        mj.replace_target(b, c);
        assert_eq!(mj.targets(), vec![a, c]);
    }
}
