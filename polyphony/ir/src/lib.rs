//! Intermediate representations of the Polyphony compiler.
//!
//! Two levels live here:
//! 1. The high-level IR: scopes of symbols and a control-flow graph of blocks
//!    holding statements, produced by the frontend.
//! 2. The hardware-level IR in [ahdl]: signals and state transition graphs
//!    built from the scheduled high-level IR.
//!
//! Every entity is owned by an arena in [Context] and addressed by a typed id.

// Modules defining internal structures.
mod block;
mod common;
mod config;
mod context;
mod dfg;
mod expr;
mod loops;
mod scope;
mod stmt;
mod symbol;
mod types;
mod usedef;

// Modules operating on the structures.
mod builder;
mod cfg;
mod clone;
mod printer;

/// Traversals of expressions and statements.
pub mod visitor;

/// The hardware-level IR.
pub mod ahdl;

pub use ahdl::{HdlContext, HdlScope};
pub use block::Block;
pub use builder::{APPEND_WORKER, Builder, RETURN_SYM, SELF_SYM};
pub use clone::{CloneMaps, remap_stm};
pub use common::{BlockId, HdlScopeId, ScopeId, SignalId, StmId, SymbolId};
pub use config::Config;
pub use context::{Context, Target};
pub use dfg::{DataFlowGraph, DfEdge, DfEdgeKind, DfNode};
pub use expr::{BinOpKind, Const, Ctx, Expr, RelOpKind, UnOpKind};
pub use loops::{Loop, LoopNestTree};
pub use printer::Printer;
pub use scope::{
    Param, Scheduling, Scope, ScopeTag, Scopes, SynthParams, Unroll, Worker,
    is_assignable_object, is_origin_of, is_subclassof, scope_tags,
};
pub use stmt::{JumpKind, Phi, PhiKind, Stm, StmKind};
pub use symbol::{SymTag, Symbol, tags as sym_tags};
pub use types::{Direction, Length, PortAttrs, PortKind, Type, TypeKind};
pub use usedef::UseDefTable;

pub use polyphony_utils::{GetName, Id};
