//! Errors generated by the compiler.
use crate::{Id, Loc};
use itertools::Itertools;
use thiserror::Error as ThisError;

/// Convenience wrapper to represent success or a diagnostic.
pub type PolyResult<T> = std::result::Result<T, Error>;

/// The kind of a user-facing diagnostic. The `code` of a kind is its
/// SCREAMING_SNAKE_CASE name and is what the driver reports.
#[derive(ThisError, Debug, Clone, PartialEq, Eq, strum_macros::IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    #[error("'{0}' is already defined")]
    RedefinedName(Id),
    #[error("{0} and {1} are incompatible types")]
    IncompatibleTypes(String, String),
    #[error("'{0}' is incompatible type as a parameter of {1}()")]
    IncompatibleParameterType(String, Id),
    #[error("type of return value must be {0}, not {1}")]
    IncompatibleReturnType(String, String),
    #[error("unsupported operand type(s) for {0}: '{1}' and '{2}'")]
    UnsupportedBinaryOperandType(String, String, String),
    #[error("unsupported literal type {0}")]
    UnsupportedLeteralType(String),
    #[error("local variable '{0}' referenced before assignment")]
    ReferencedBeforeAssign(Id),
    #[error("{0}() missing required argument")]
    MissingRequiredArg(Id),
    #[error("{0}() takes {1} positional arguments but {2} were given")]
    TakesToomanyArgs(Id, usize, usize),
    #[error("'{0}' must be {1} type")]
    MustBeXType(String, String),
    #[error("type of sequence item must be int, not {0}")]
    SeqItemMustBeInt(String),
    #[error("type of sequence multiplier must be constant")]
    SeqMultiplierMustBeConst,
    #[error("sequence capacity is overflowing")]
    SeqCapacityOverflowed,
    #[error("global instance is not supported")]
    GlobalInstanceIsNotSupported,
    #[error("the type of module argument must be {0}")]
    ModuleArgMustBeXType(String),
    #[error("module class '{0}' must be in the global scope")]
    MuduleMustBeInGlobal(Id),
    #[error("port object must be created in the constructor of a module class")]
    PortMustBeInModule,
    #[error("assignment to port '{0}' cannot accept {1}")]
    PortAssignCannotAccept(Id, String),
    #[error("append_worker() can only be called in the constructor of a module")]
    CallAppendWorkerInCtor,
    #[error("worker '{0}' must be a method of the module class")]
    WorkerMustBeMethodOfModule(Id),
    #[error("the type of worker argument must be {0}")]
    WorkerArgMustBeXType(String),
    #[error("cannot unroll nested loop")]
    RuleUnrollNestedLoop,
    #[error("cannot unroll loop that contains a control branch")]
    RuleUnrollControlBranch,
    #[error("cannot unroll a loop whose bounds are not fixed")]
    RuleUnrollUnfixedLoop,
    #[error("cannot find the step value of the loop")]
    RuleUnrollUnknownStep,
    #[error("cannot unroll a loop with a variable step")]
    RuleUnrollVariableStep,
    #[error("port '{0}' is overwritten in the same clock cycle")]
    RuleTimedPortIsOverwritten(Id),
    #[error("function '{0}' cannot be pipelined")]
    RuleFunctionCannotBePipelined(Id),
    #[error("reading from '{0}' is conflicted in the pipeline")]
    RuleReadingPipelineIsConflicted(Id),
    #[error("writing to '{0}' is conflicted in the pipeline")]
    RuleWritingPipelineIsConflicted(Id),
    #[error("cannot use {0} outside of a for statement")]
    UseOutsideFor(String),
    #[error("'{0}' is reserved as a port name")]
    ReservedPortName(Id),
    #[error("invalid access to a module object")]
    InvalidModuleObjectAccess,
    #[error("global object '{0}' cannot be mutable")]
    GlobalObjectCantBeMutable(Id),
    #[error("{0}")]
    Misc(String),
    #[error("pass assumption violated: {0}: {1}")]
    PassAssumption(String, String),
    #[error("internal compiler error: {0}")]
    Internal(String),
}

impl ErrorKind {
    /// The diagnostic code reported for this kind.
    pub fn code(&self) -> &'static str {
        self.into()
    }
}

/// A diagnostic with the location that produced it.
#[derive(Clone, PartialEq, Eq)]
pub struct Error {
    kind: Box<ErrorKind>,
    loc: Loc,
    post_msg: Option<String>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind: Box::new(kind),
            loc: Loc::default(),
            post_msg: None,
        }
    }

    pub fn with_loc(mut self, loc: Loc) -> Self {
        self.loc = loc;
        self
    }

    pub fn with_post_msg(mut self, msg: Option<String>) -> Self {
        self.post_msg = msg;
        self
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn loc(&self) -> Loc {
        self.loc
    }

    pub fn post_msg(&self) -> Option<&str> {
        self.post_msg.as_deref()
    }

    pub fn message(&self) -> String {
        self.kind.to_string()
    }

    pub fn misc<S: ToString>(msg: S) -> Self {
        Self::new(ErrorKind::Misc(msg.to_string()))
    }

    pub fn internal<S: ToString>(msg: S) -> Self {
        Self::new(ErrorKind::Internal(msg.to_string()))
    }

    pub fn pass_assumption<S: ToString, M: ToString>(pass: S, msg: M) -> Self {
        Self::new(ErrorKind::PassAssumption(pass.to_string(), msg.to_string()))
    }

    pub fn incompatible_types<A: ToString, B: ToString>(lhs: A, rhs: B) -> Self {
        Self::new(ErrorKind::IncompatibleTypes(lhs.to_string(), rhs.to_string()))
    }

    pub fn seq_capacity_overflowed() -> Self {
        Self::new(ErrorKind::SeqCapacityOverflowed)
    }

    pub fn referenced_before_assign(name: Id) -> Self {
        Self::new(ErrorKind::ReferencedBeforeAssign(name))
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::misc(format!("IO error: {e}"))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.loc.is_known() {
            write!(f, "{}: ", self.loc)?;
        }
        write!(f, "[{}] {}", self.code(), self.kind)?;
        if let Some(post) = &self.post_msg {
            write!(f, "\n{post}")?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

impl std::error::Error for Error {}

/// A collection of diagnostics reported together.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct MultiError {
    errors: Vec<Error>,
}

impl MultiError {
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn push(&mut self, err: Error) {
        self.errors.push(err)
    }

    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<Error> {
        self.errors
    }

    /// The codes of all contained diagnostics in reporting order.
    pub fn codes(&self) -> Vec<&'static str> {
        self.errors.iter().map(|e| e.code()).collect()
    }
}

impl From<Error> for MultiError {
    fn from(err: Error) -> Self {
        Self { errors: vec![err] }
    }
}

impl From<Vec<Error>> for MultiError {
    fn from(errors: Vec<Error>) -> Self {
        Self { errors }
    }
}

impl std::fmt::Display for MultiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.errors.iter().map(|e| e.to_string()).join("\n"))
    }
}

impl std::fmt::Debug for MultiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

impl std::error::Error for MultiError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_variant_names() {
        assert_eq!(
            ErrorKind::SeqCapacityOverflowed.code(),
            "SEQ_CAPACITY_OVERFLOWED"
        );
        assert_eq!(
            ErrorKind::MuduleMustBeInGlobal(Id::from("M")).code(),
            "MUDULE_MUST_BE_IN_GLOBAL"
        );
        assert_eq!(
            ErrorKind::TakesToomanyArgs(Id::from("f"), 1, 2).code(),
            "TAKES_TOOMANY_ARGS"
        );
        assert_eq!(
            ErrorKind::RuleUnrollNestedLoop.code(),
            "RULE_UNROLL_NESTED_LOOP"
        );
    }

    #[test]
    fn display_includes_location_and_code() {
        let err = Error::seq_capacity_overflowed()
            .with_loc(Loc::new(Id::from("t.py"), 3));
        let s = err.to_string();
        assert!(s.starts_with("t.py:3: [SEQ_CAPACITY_OVERFLOWED]"));
    }

    #[test]
    fn multi_error_collects_codes() {
        let mut errs = MultiError::default();
        errs.push(Error::new(ErrorKind::RuleUnrollUnknownStep));
        errs.push(Error::misc("boom"));
        assert_eq!(errs.codes(), vec!["RULE_UNROLL_UNKNOWN_STEP", "MISC"]);
    }
}
