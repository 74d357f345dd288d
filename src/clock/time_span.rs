use serde::{Deserialize, Serialize};

use super::{BeatClock, SyncTime};

/// Represents a duration that can be measured in microseconds, beats, or bars.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeSpan {
    /// Duration in microseconds, converted with the current tempo.
    Micros(SyncTime),
    /// Duration in musical beats.
    Beats(f64),
    /// Duration in bars of the current meter.
    Bars(f64),
}

impl TimeSpan {
    pub fn as_beats(&self, clock: &BeatClock) -> f64 {
        match self {
            TimeSpan::Micros(m) => clock.micros_to_beats(*m),
            TimeSpan::Beats(b) => *b,
            TimeSpan::Bars(n) => clock.bars(*n),
        }
    }

    pub fn as_micros(&self, clock: &BeatClock) -> SyncTime {
        match self {
            TimeSpan::Micros(m) => *m,
            TimeSpan::Beats(b) => clock.beats_to_micros(*b),
            TimeSpan::Bars(n) => clock.beats_to_micros(clock.bars(*n)),
        }
    }
}
