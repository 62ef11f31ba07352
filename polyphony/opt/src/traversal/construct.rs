use super::Visitor;
use itertools::Itertools;
use linked_hash_map::LinkedHashMap;
use polyphony_ir as ir;
use polyphony_utils::{OutputFile, PolyResult};

/// A parsed value of a pass option.
#[derive(Clone, Debug)]
pub enum ParseVal {
    Bool(bool),
    Num(i64),
    List(Vec<ParseVal>),
    /// Where a pass writes its report.
    OutStream(OutputFile),
}

impl ParseVal {
    pub fn bool(&self) -> bool {
        let ParseVal::Bool(b) = self else {
            panic!("Expected bool, got {self}");
        };
        *b
    }

    pub fn num(&self) -> i64 {
        let ParseVal::Num(n) = self else {
            panic!("Expected number, got {self}");
        };
        *n
    }

    /// The number when it is not negative.
    pub fn pos_num(&self) -> Option<u64> {
        u64::try_from(self.num()).ok()
    }

    pub fn num_list(&self) -> Vec<i64> {
        match self {
            ParseVal::List(l) => l.iter().map(ParseVal::num).collect(),
            _ => panic!("Expected list of numbers, got {self}"),
        }
    }

    /// The output stream unless it is `<null>`.
    pub fn not_null_outstream(&self) -> Option<OutputFile> {
        match self {
            ParseVal::OutStream(OutputFile::Null) => None,
            ParseVal::OutStream(o) => Some(o.clone()),
            _ => panic!("Expected output stream, got {self}"),
        }
    }
}

impl std::fmt::Display for ParseVal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseVal::Bool(b) => write!(f, "{b}"),
            ParseVal::Num(n) => write!(f, "{n}"),
            ParseVal::List(l) => write!(f, "[{}]", l.iter().join(", ")),
            ParseVal::OutStream(o) => write!(f, "{o}"),
        }
    }
}

/// An option accepted by a pass through `-x <pass>:<opt>[=<val>]`.
pub struct PassOpt {
    name: &'static str,
    description: &'static str,
    default: ParseVal,
    parse: fn(&str) -> Option<ParseVal>,
}

impl PassOpt {
    pub const fn new(
        name: &'static str,
        description: &'static str,
        default: ParseVal,
        parse: fn(&str) -> Option<ParseVal>,
    ) -> Self {
        Self {
            name,
            description,
            default,
            parse,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub const fn description(&self) -> &'static str {
        self.description
    }

    pub const fn default(&self) -> &ParseVal {
        &self.default
    }

    fn parse(&self, s: &str) -> Option<ParseVal> {
        (self.parse)(s)
    }

    pub fn parse_bool(s: &str) -> Option<ParseVal> {
        match s {
            "true" => Some(ParseVal::Bool(true)),
            "false" => Some(ParseVal::Bool(false)),
            _ => None,
        }
    }

    pub fn parse_num(s: &str) -> Option<ParseVal> {
        s.parse::<i64>().ok().map(ParseVal::Num)
    }

    /// Comma separated numbers; fails if any element fails.
    pub fn parse_num_list(s: &str) -> Option<ParseVal> {
        s.split(',')
            .map(Self::parse_num)
            .collect::<Option<Vec<_>>>()
            .map(ParseVal::List)
    }

    pub fn parse_outstream(s: &str) -> Option<ParseVal> {
        s.parse::<OutputFile>().ok().map(ParseVal::OutStream)
    }
}

/// Names and describes a pass. Separate from [Visitor] because none of these
/// take `self`, which would make the visitor unusable as a trait object.
pub trait Named {
    /// Identifies the pass on the command line and in aliases.
    fn name() -> &'static str;
    fn description() -> &'static str;
    fn opts() -> Vec<PassOpt> {
        vec![]
    }
}

/// Builds a visitor from the [ir::Context] before any scope is visited.
/// Passes that need nothing from the context get this for free through
/// [Default].
pub trait ConstructVisitor {
    /// Values of every option of the pass: the ones given in
    /// `ctx.extra_opts`, defaults for the rest.
    fn get_opts(ctx: &ir::Context) -> LinkedHashMap<&'static str, ParseVal>
    where
        Self: Named,
    {
        let opts = Self::opts();
        let n = Self::name();
        let mut values: LinkedHashMap<&'static str, ParseVal> = ctx
            .extra_opts
            .iter()
            .filter_map(|given| {
                let (pass, rest) = given.split_once(':')?;
                if pass != n {
                    return None;
                }
                let (key, val) = match rest.split_once('=') {
                    Some((k, v)) => (k, Some(v)),
                    None => (rest, None),
                };
                let Some(opt) = opts.iter().find(|o| o.name == key) else {
                    log::warn!("Ignoring unknown option for pass `{n}`: {key}");
                    return None;
                };
                let val = match val {
                    Some(v) => match opt.parse(v) {
                        Some(v) => v,
                        None => {
                            log::warn!(
                                "Ignoring invalid value for option `{n}:{}`: {v}",
                                opt.name()
                            );
                            return None;
                        }
                    },
                    None => ParseVal::Bool(true),
                };
                Some((opt.name(), val))
            })
            .collect();

        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "Extra options for {}: {}",
                n,
                values.iter().map(|(o, v)| format!("{o}->{v}")).join(", ")
            );
        }

        for opt in opts {
            if !values.contains_key(opt.name()) {
                values.insert(opt.name(), opt.default.clone());
            }
        }
        values
    }

    fn from(_ctx: &ir::Context) -> PolyResult<Self>
    where
        Self: Sized;

    /// Reset per-scope data. Called after each scope is traversed.
    fn clear_data(&mut self);
}

impl<T: Default + Sized + Visitor> ConstructVisitor for T {
    fn from(_ctx: &ir::Context) -> PolyResult<Self> {
        Ok(T::default())
    }

    fn clear_data(&mut self) {
        *self = T::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Tuner;

    impl Named for Tuner {
        fn name() -> &'static str {
            "tuner"
        }

        fn description() -> &'static str {
            "test pass"
        }

        fn opts() -> Vec<PassOpt> {
            vec![
                PassOpt::new("fast", "", ParseVal::Bool(false), PassOpt::parse_bool),
                PassOpt::new("depth", "", ParseVal::Num(4), PassOpt::parse_num),
                PassOpt::new("ids", "", ParseVal::List(vec![]), PassOpt::parse_num_list),
            ]
        }
    }

    impl Visitor for Tuner {}

    #[test]
    fn options_fill_defaults_and_skip_bad_values() {
        let mut ctx = ir::Context::default();
        ctx.extra_opts = vec![
            "tuner:fast".to_string(),
            "tuner:depth=zero".to_string(),
            "tuner:ids=1,2,3".to_string(),
            "other:fast".to_string(),
            "tuner:nope".to_string(),
        ];
        let opts = Tuner::get_opts(&ctx);
        assert!(opts["fast"].bool());
        assert_eq!(opts["depth"].num(), 4);
        assert_eq!(opts["ids"].num_list(), vec![1, 2, 3]);
        assert_eq!(opts.len(), 3);
    }
}
