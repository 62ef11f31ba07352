use crate::{BlockId, Expr, ScopeId, StmId, SynthParams};
use polyphony_utils::Id;
use serde::{Deserialize, Serialize};

/// A basic block of a scope's CFG.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub nametag: Id,
    pub num: u32,
    pub scope: ScopeId,
    pub stms: Vec<StmId>,
    pub preds: Vec<BlockId>,
    pub succs: Vec<BlockId>,
    /// The subset of `preds` reached through back edges.
    pub preds_loop: Vec<BlockId>,
    /// The subset of `succs` reached through back edges.
    pub succs_loop: Vec<BlockId>,
    /// Topological order number; back edges excluded.
    pub order: i32,
    /// Predicate under which this block executes.
    pub path_exp: Option<Expr>,
    pub is_hyperblock: bool,
    pub synth_params: SynthParams,
}

impl Block {
    pub fn new(nametag: Id, num: u32, scope: ScopeId) -> Self {
        Block {
            nametag,
            num,
            scope,
            stms: vec![],
            preds: vec![],
            succs: vec![],
            preds_loop: vec![],
            succs_loop: vec![],
            order: -1,
            path_exp: None,
            is_hyperblock: false,
            synth_params: SynthParams::default(),
        }
    }

    pub fn name(&self) -> String {
        format!("{}{}", self.nametag, self.num)
    }

    pub fn is_loop_head(&self) -> bool {
        !self.preds_loop.is_empty()
    }

    /// Predecessors reached through forward edges.
    pub fn forward_preds(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.preds
            .iter()
            .copied()
            .filter(|p| !self.preds_loop.contains(p))
    }

    /// Successors reached through forward edges.
    pub fn forward_succs(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.succs
            .iter()
            .copied()
            .filter(|s| !self.succs_loop.contains(s))
    }
}
