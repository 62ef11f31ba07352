//! Helpers for traversing the scopes of a program.
mod action;
mod construct;
mod diagnostics;
mod post_order;
mod visitor;

pub use action::{Action, VisResult};
pub use construct::{ConstructVisitor, Named, ParseVal, PassOpt};
pub use diagnostics::{DiagnosticContext, DiagnosticPass, DiagnosticResult};
pub use post_order::{Order, ScopeTraversal};
pub use visitor::Visitor;
