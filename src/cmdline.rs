//! Command line parsing for the Polyphony compiler.
use argh::FromArgs;
use polyphony_ir::Config;
use polyphony_utils::OutputFile;
use std::path::{Path, PathBuf};

fn read_path(path: &str) -> Result<PathBuf, String> {
    Ok(Path::new(path).into())
}

#[derive(FromArgs)]
/// Lower a serialized Polyphony IR program to AHDL state machines.
pub struct Opts {
    /// input IR in JSON form
    #[argh(positional, from_str_fn(read_path))]
    pub file: Option<PathBuf>,

    /// output file, default is stdout
    #[argh(option, short = 'o', long = "output", default = "OutputFile::Stdout")]
    pub output: OutputFile,

    /// source files named by statement locations, used to show the offending
    /// line of a diagnostic
    #[argh(option, short = 's', long = "source", from_str_fn(read_path))]
    pub sources: Vec<PathBuf>,

    /// run this pass or alias; can be repeated. Default: all
    #[argh(option, short = 'p', long = "pass", default = "vec![\"all\".into()]")]
    pub pass: Vec<String>,

    /// disable this pass or alias; can be repeated
    #[argh(option, short = 'd', long = "disable-pass")]
    pub disable_pass: Vec<String>,

    /// extra options passed to passes, as <pass>:<opt>=<val>
    #[argh(option, short = 'x', long = "extra-opt")]
    pub extra_opts: Vec<String>,

    /// list all the passes and aliases
    #[argh(switch, long = "list-passes")]
    pub list_passes: bool,

    /// print the IR after every pass
    #[argh(switch, long = "dump-ir")]
    pub dump_ir: bool,

    /// logging level (off, error, warn, info, debug, trace)
    #[argh(option, long = "log-level", default = "log::LevelFilter::Warn")]
    pub log_level: log::LevelFilter,

    /// width of `int` when the program does not specify it
    #[argh(option, long = "int-width")]
    pub int_width: Option<u32>,

    /// do not merge branches into hyperblocks
    #[argh(switch, long = "no-hyperblock")]
    pub no_hyperblock: bool,

    /// schedule pipelined loops sequentially
    #[argh(switch, long = "no-pipeline")]
    pub no_pipeline: bool,

    /// number states instead of naming them after their blocks
    #[argh(switch, long = "short-state-names")]
    pub short_state_names: bool,
}

impl Opts {
    /// Override the settings of `config` given on the command line.
    pub fn apply(&self, config: &mut Config) {
        if let Some(w) = self.int_width {
            config.default_int_width = w;
        }
        if self.no_hyperblock {
            config.enable_hyperblock = false;
        }
        if self.no_pipeline {
            config.enable_pipeline = false;
        }
        if self.short_state_names {
            config.verbose_state_names = false;
        }
    }
}
