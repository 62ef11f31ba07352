mod ahdl_copy_opt;
mod ahdl_translate;
mod bitwidth;
mod block_reduce;
mod const_opt;
mod copy_opt;
mod dead_code;
mod hdl_gen;
mod hyperblock;
mod if_conversion;
mod if_forward;
mod instantiate;
mod io_sequence;
mod loop_detect;
mod obj_linearize;
mod path_exp;
mod phi_opt;
mod phi_resolve;
mod pipeline;
mod quadruple;
mod schedule;
mod scope_rules;
mod seq_check;
mod ssa;
mod state_reduce;
mod stg_builder;
mod type_check;
mod typeprop;
mod unroll;
mod usedef;
mod wait_forward;

pub use ahdl_copy_opt::AhdlCopyOpt;
pub use bitwidth::Bitwidth;
pub use block_reduce::BlockReduce;
pub use const_opt::ConstOpt;
pub use copy_opt::CopyOpt;
pub use dead_code::DeadCode;
pub use hdl_gen::HdlGen;
pub use hyperblock::Hyperblock;
pub use if_conversion::IfConversion;
pub use if_forward::IfForward;
pub use instantiate::Instantiate;
pub use io_sequence::IoSequence;
pub use loop_detect::LoopDetect;
pub use obj_linearize::ObjLinearize;
pub use path_exp::PathExp;
pub use phi_opt::PhiOpt;
pub use phi_resolve::PhiResolve;
pub use pipeline::Pipeline;
pub use quadruple::Quadruple;
pub use schedule::Schedule;
pub use scope_rules::ScopeRules;
pub use seq_check::SeqCheck;
pub use ssa::Ssa;
pub use state_reduce::StateReduce;
pub use stg_builder::StgBuild;
pub use type_check::TypeCheck;
pub use typeprop::TypeProp;
pub use unroll::Unroll;
pub use usedef::UseDef;
pub use wait_forward::WaitForward;
