//! Typed ids addressing the arenas owned by [Context](crate::Context).
use polyphony_utils::impl_index;
use serde::{Deserialize, Serialize};

macro_rules! define_id {
    ($(#[$attr:meta])* $name: ident, $prefix: literal) => {
        $(#[$attr])*
        #[derive(
            Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(u32);
        impl_index!($name, $prefix);
    };
}

define_id!(
    /// A scope in the scope arena.
    ScopeId,
    "scope"
);
define_id!(
    /// A symbol in the symbol arena.
    SymbolId,
    "sym"
);
define_id!(
    /// A basic block.
    BlockId,
    "blk"
);
define_id!(
    /// An IR statement.
    StmId,
    "stm"
);
define_id!(
    /// A scope of the hardware-level IR.
    HdlScopeId,
    "hdl"
);
define_id!(
    /// A signal of the hardware-level IR.
    SignalId,
    "sig"
);
