use serde::{Deserialize, Serialize};

/// Global compiler settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Width of `int` when the program does not say otherwise.
    pub default_int_width: u32,
    pub enable_hyperblock: bool,
    pub enable_pipeline: bool,
    /// Lists up to this many elements are kept in registers instead of RAM.
    pub internal_ram_threshold_size: u32,
    pub perfect_inlining: bool,
    /// Keep block names in state names instead of short numbering.
    pub verbose_state_names: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            default_int_width: 32,
            enable_hyperblock: true,
            enable_pipeline: true,
            internal_ram_threshold_size: 512,
            perfect_inlining: false,
            verbose_state_names: true,
        }
    }
}
