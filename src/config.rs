use serde::{Deserialize, Serialize};

use crate::{
    DEFAULT_TEMPO, clock::Meter, logger::LoggingConfig, schedule::DriverConfig,
    sync::SyncSettings,
};

mod loader;
mod validation;

pub use loader::ConfigLoader;
pub use validation::Validate;

/// Everything read from `config.toml`. Missing sections and fields take
/// their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ClockConfig {
    #[serde(default)]
    pub clock: ClockSection,

    #[serde(default)]
    pub driver: DriverConfig,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ClockSection {
    #[serde(default = "default_tempo")]
    pub tempo: f64,

    /// `[numerator, denominator]`
    #[serde(default)]
    pub meter: Meter,

    /// Beat the timeline reads when the clock is created.
    #[serde(default)]
    pub start_beat: f64,
}

impl Default for ClockSection {
    fn default() -> Self {
        ClockSection {
            tempo: default_tempo(),
            meter: Meter::default(),
            start_beat: 0.0,
        }
    }
}

fn default_tempo() -> f64 {
    DEFAULT_TEMPO
}
