//! Actions control how a pass walks the scopes of a program.
use polyphony_utils::PolyResult;

/// Result of visiting a scope or block.
pub type VisResult = PolyResult<Action>;

/// Action requested at the end of a visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Keep going.
    Continue,
    /// Abort the traversal of every remaining scope.
    Stop,
    /// Do not visit the blocks of the current scope, but still call
    /// `finish` and move on to the next scope.
    SkipChildren,
}

impl Action {
    /// Run `next` only when this action is [Action::Continue].
    pub(super) fn and_then<F>(self, mut next: F) -> VisResult
    where
        F: FnMut() -> VisResult,
    {
        match self {
            Action::Continue => next(),
            Action::Stop | Action::SkipChildren => Ok(self),
        }
    }

    /// Marks the end of a scope's children: a skip turns back into a
    /// continue.
    pub(super) fn pop(self) -> Self {
        match self {
            Action::SkipChildren => Action::Continue,
            x => x,
        }
    }
}
