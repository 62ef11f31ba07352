//! Shared utilities for the Polyphony compiler.
mod errors;
mod id;
mod namegenerator;
mod out_file;
mod position;

pub mod idx;
mod math;

pub use errors::{Error, ErrorKind, MultiError, PolyResult};
pub use id::{GetName, Id};
pub use math::bits_needed_for;
pub use namegenerator::NameGenerator;
pub use out_file::OutputFile;
pub use position::{Loc, SourceMap};
