use serde::{Deserialize, Serialize};

use crate::clock::{BeatClock, SyncTime, next_multiple};

/// Specifies when a scheduled action should fire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub enum ActionTiming {
    /// On the next tick.
    Immediate,
    /// When the clock reaches or passes this beat.
    AtBeat(f64),
    /// This many beats from now.
    AfterBeats(f64),
    AtNextBeat,
    #[default]
    AtNextBar,
    /// At the next multiple of this many beats.
    AtNextModulo(f64),
}

impl ActionTiming {
    /// Beat at which an action with this timing is due, seen from `now`.
    pub fn target_beat(&self, clock: &BeatClock) -> f64 {
        let now = clock.now();
        match self {
            ActionTiming::Immediate => now,
            ActionTiming::AtBeat(b) => *b,
            ActionTiming::AfterBeats(b) => now + b,
            ActionTiming::AtNextBeat => next_multiple(now, 1.0, 0.0),
            ActionTiming::AtNextBar => next_multiple(now, clock.bar_length(), 0.0),
            ActionTiming::AtNextModulo(m) => next_multiple(now, *m, 0.0),
        }
    }

    /// Microseconds left before an action with this timing is due.
    pub fn remaining(&self, clock: &BeatClock) -> SyncTime {
        clock.micros_until(self.target_beat(clock))
    }
}
