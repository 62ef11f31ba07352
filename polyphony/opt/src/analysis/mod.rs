//! Analyses shared by the passes. None of them rewrite the IR, except that
//! loop detection stores its result in the scope.
pub mod calls;
pub mod dataflow;
mod dominator;
mod field_usedef;
pub mod loops;
mod type_eval;
pub mod typing;

pub use dominator::DominatorTree;
pub use field_usedef::FieldUseDef;
pub use type_eval::TypeEvaluator;
