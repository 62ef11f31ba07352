//! Defines the default passes available to [PassManager].
use crate::passes::{
    AhdlCopyOpt, Bitwidth, BlockReduce, ConstOpt, CopyOpt, DeadCode, HdlGen,
    Hyperblock, IfConversion, IfForward, Instantiate, IoSequence, LoopDetect,
    ObjLinearize, PathExp, PhiOpt, PhiResolve, Pipeline, Quadruple, Schedule,
    ScopeRules, SeqCheck, Ssa, StateReduce, StgBuild, TypeCheck, TypeProp,
    Unroll, UseDef, WaitForward,
};
use crate::traversal::Named;
use crate::{
    pass_manager::{PassManager, PassResult},
    register_alias,
};

impl PassManager {
    pub fn default_passes() -> PassResult<Self> {
        // Construct the pass manager and register all passes.
        let mut pm = PassManager::default();

        // Validation passes
        pm.register_diagnostic::<ScopeRules>()?;
        pm.register_diagnostic::<TypeCheck>()?;
        pm.register_diagnostic::<SeqCheck>()?;

        // Analyses stored in the IR
        pm.register_pass::<UseDef>()?;
        pm.register_pass::<LoopDetect>()?;
        pm.register_pass::<TypeProp>()?;

        // Scope and loop transformations
        pm.register_pass::<Instantiate>()?;
        pm.register_pass::<BlockReduce>()?;
        pm.register_pass::<Unroll>()?;

        // SSA and its optimizations
        pm.register_pass::<Ssa>()?;
        pm.register_pass::<PhiOpt>()?;
        pm.register_pass::<CopyOpt>()?;
        pm.register_pass::<ConstOpt>()?;
        pm.register_pass::<DeadCode>()?;

        // Normalization before scheduling
        pm.register_pass::<IfConversion>()?;
        pm.register_pass::<PathExp>()?;
        pm.register_pass::<Hyperblock>()?;
        pm.register_pass::<ObjLinearize>()?;
        pm.register_pass::<Quadruple>()?;
        pm.register_pass::<Bitwidth>()?;
        pm.register_pass::<PhiResolve>()?;

        // Scheduling and lowering
        pm.register_pass::<Schedule>()?;
        pm.register_pass::<HdlGen>()?;
        pm.register_pass::<StgBuild>()?;
        pm.register_pass::<Pipeline>()?;

        // AHDL cleanup
        pm.register_pass::<AhdlCopyOpt>()?;
        pm.register_pass::<StateReduce>()?;
        pm.register_pass::<WaitForward>()?;
        pm.register_pass::<IfForward>()?;
        pm.register_pass::<IoSequence>()?;

        register_alias!(pm, "validate", [ScopeRules, TypeCheck]);
        register_alias!(
            pm,
            "pre-opt",
            [Instantiate, UseDef, TypeProp, SeqCheck, BlockReduce]
        );
        register_alias!(pm, "loop", [LoopDetect, Unroll, BlockReduce]);
        register_alias!(
            pm,
            "ssa",
            [Ssa, PhiOpt, UseDef, CopyOpt, ConstOpt, DeadCode]
        );
        register_alias!(
            pm,
            "normalize",
            [
                IfConversion,
                PathExp,
                Hyperblock,
                ObjLinearize,
                Quadruple,
                Bitwidth,
                PhiResolve, // Leaves moves behind; refresh use-def for them
                UseDef,
                LoopDetect
            ]
        );
        register_alias!(pm, "schedule", [Schedule]);
        register_alias!(pm, "lower", [HdlGen, StgBuild, Pipeline]);
        register_alias!(
            pm,
            "post-opt",
            [AhdlCopyOpt, StateReduce, WaitForward, IfForward, IoSequence]
        );

        // Default flow
        register_alias!(
            pm,
            "all",
            [
                "validate",
                "pre-opt",
                "loop",
                "ssa",
                "normalize",
                "schedule",
                "lower",
                "post-opt",
            ]
        );

        // Lowering without any optimization
        register_alias!(
            pm,
            "no-opt",
            [
                "validate",
                "pre-opt",
                LoopDetect,
                Ssa,
                UseDef,
                ObjLinearize,
                Quadruple,
                PhiResolve,
                UseDef,
                LoopDetect,
                "schedule",
                "lower"
            ]
        );

        register_alias!(pm, "none", []);

        Ok(pm)
    }
}
