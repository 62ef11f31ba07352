//! Source locations attached to IR statements and diagnostics.
use crate::{Error, Id};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A position in a source file. Line numbers start at 1; a line number of 0
/// means the location is unknown.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub struct Loc {
    pub file: Id,
    pub lineno: u32,
}

impl Loc {
    pub fn new(file: Id, lineno: u32) -> Self {
        Self { file, lineno }
    }

    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn is_known(&self) -> bool {
        self.lineno > 0
    }
}

impl std::fmt::Display for Loc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.lineno)
    }
}

/// Source text of every input file, used to render the offending line of a
/// diagnostic.
#[derive(Clone, Debug, Default)]
pub struct SourceMap {
    files: HashMap<Id, Vec<String>>,
}

impl SourceMap {
    pub fn add_file<S: AsRef<str>>(&mut self, name: Id, source: S) {
        let lines = source.as_ref().lines().map(String::from).collect();
        self.files.insert(name, lines);
    }

    /// The text of the line at `loc`, if the file is known.
    pub fn line(&self, loc: Loc) -> Option<&str> {
        if !loc.is_known() {
            return None;
        }
        self.files
            .get(&loc.file)
            .and_then(|lines| lines.get(loc.lineno as usize - 1))
            .map(String::as_str)
    }

    /// Render `err` followed by the source line it points at.
    pub fn format_error(&self, err: &Error) -> String {
        match self.line(err.loc()) {
            Some(text) => format!("{}\n    {}", err, text.trim_end()),
            None => err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn renders_line_text() {
        let mut map = SourceMap::default();
        let file = Id::from("a.py");
        map.add_file(file, "x = 1\nxs: List[int8][4] = [1, 2, 3, 4, 5]\n");
        let err = Error::new(ErrorKind::SeqCapacityOverflowed)
            .with_loc(Loc::new(file, 2));
        let rendered = map.format_error(&err);
        assert!(rendered.contains("a.py:2"));
        assert!(rendered.ends_with("xs: List[int8][4] = [1, 2, 3, 4, 5]"));
        assert_eq!(map.line(Loc::unknown()), None);
    }
}
