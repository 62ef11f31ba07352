//! # Polyphony optimizer
//!
//! Passes that take a program in the high-level IR down to finite state
//! machines of AHDL statements.
//!
//! Passes are registered by name with a [pass_manager::PassManager], which
//! groups them into the phases of the compiler:
//! validation, pre-optimization, loop handling, SSA and its optimizations,
//! normalization, scheduling, lowering to AHDL and AHDL cleanup.
//!
//! ```rust,ignore
//! use polyphony_opt::pass_manager::PassManager;
//! let pm = PassManager::default_passes()?;
//! pm.execute_plan(&mut ctx, &["all".to_string()], &[], false)?;
//! ```
pub mod analysis;
pub mod default_passes;
pub mod pass_manager;
pub mod passes;
pub mod traversal;
