use crate::{HdlScopeId, SymbolId};
use polyphony_utils::{GetName, Id};
use std::collections::BTreeSet;

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum_macros::EnumString,
    strum_macros::Display,
)]
#[strum(serialize_all = "snake_case")]
pub enum SigTag {
    Reg,
    Net,
    Input,
    Output,
    SinglePort,
    Condition,
    Induction,
    PipelineCtrl,
    Rom,
    Field,
    /// Handshake signals of a function-like FSM.
    Ctrl,
    Parameter,
    Constant,
    /// Names a sub-module instance.
    Subscope,
    /// Register copy of a value carried to a later pipeline stage.
    PipelineReg,
    Initializable,
}

/// Bit width of a scalar or of each element of an array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SigWidth {
    Scalar(u32),
    Array { elm: u32, len: u32 },
}

impl SigWidth {
    /// Width of one element (or of the scalar itself).
    pub fn bits(&self) -> u32 {
        match self {
            SigWidth::Scalar(w) => *w,
            SigWidth::Array { elm, .. } => *elm,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, SigWidth::Array { .. })
    }
}

/// A hardware variable of one HDL scope.
#[derive(Clone, Debug, PartialEq)]
pub struct Signal {
    pub name: Id,
    pub width: SigWidth,
    pub signed: bool,
    pub tags: BTreeSet<SigTag>,
    pub init: Option<i64>,
    pub scope: HdlScopeId,
    /// The IR symbol this signal was generated for.
    pub sym: Option<SymbolId>,
    /// For sub-module markers, the instantiated HDL scope.
    pub subscope: Option<HdlScopeId>,
}

impl Signal {
    pub fn has_tag(&self, tag: SigTag) -> bool {
        self.tags.contains(&tag)
    }

    pub fn add_tag(&mut self, tag: SigTag) {
        self.tags.insert(tag);
    }

    pub fn del_tag(&mut self, tag: SigTag) {
        self.tags.remove(&tag);
    }

    pub fn is_reg(&self) -> bool {
        self.has_tag(SigTag::Reg)
    }

    pub fn is_net(&self) -> bool {
        self.has_tag(SigTag::Net)
    }

    pub fn is_input(&self) -> bool {
        self.has_tag(SigTag::Input)
    }

    pub fn is_output(&self) -> bool {
        self.has_tag(SigTag::Output)
    }
}

impl GetName for Signal {
    fn name(&self) -> Id {
        self.name
    }
}

/// Build a signal tag set from a slice.
pub fn sig_tags(ts: &[SigTag]) -> BTreeSet<SigTag> {
    ts.iter().copied().collect()
}
