use super::{Action, VisResult};
use polyphony_utils::{Error, PolyResult};

/// A pass that reports diagnostics instead of failing on the first one.
pub trait DiagnosticPass {
    fn diagnostics(&self) -> &DiagnosticContext;
}

/// Errors and warnings gathered while a pass runs.
#[derive(Default, Debug)]
pub struct DiagnosticContext {
    errors: Vec<Error>,
    warnings: Vec<Error>,
}

impl DiagnosticContext {
    pub fn err(&mut self, error: Error) {
        self.errors.push(error);
    }

    pub fn warning(&mut self, warning: Error) {
        self.warnings.push(warning)
    }

    /// Record `error` and keep traversing. Used when a scope cannot be
    /// checked any further but other scopes still can.
    pub fn early_return_err(&mut self, error: Error) -> VisResult {
        self.err(error);
        Ok(Action::Continue)
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn warning_iter(&self) -> impl Iterator<Item = &Error> {
        self.warnings.iter()
    }

    pub fn errors_iter(&self) -> impl Iterator<Item = &Error> {
        self.errors.iter()
    }
}

/// Move the error of a [`Result`] into a [`DiagnosticContext`].
pub trait DiagnosticResult {
    fn accumulate_err(self, diag: &mut DiagnosticContext) -> Self;
}

impl DiagnosticResult for PolyResult<()> {
    fn accumulate_err(self, diag: &mut DiagnosticContext) -> Self {
        if let Err(err) = self {
            diag.err(err);
        }
        Ok(())
    }
}

impl DiagnosticResult for VisResult {
    fn accumulate_err(self, diag: &mut DiagnosticContext) -> Self {
        match self {
            Ok(act) => Ok(act),
            Err(err) => {
                diag.err(err);
                Ok(Action::Continue)
            }
        }
    }
}
