use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Result, SchedulerError};

pub mod meter;
pub mod time_source;
pub mod time_span;

pub use meter::{Meter, next_multiple};
pub use time_source::{ManualTime, MonotonicTime, NEVER, SyncTime, TimeSource};
pub use time_span::TimeSpan;

const MICROS_PER_MINUTE: f64 = 60_000_000.0;

#[derive(Debug, Clone, Copy)]
struct ClockState {
    bpm: f64,
    meter: Meter,
    /// Wall-clock anchor of the current tempo segment.
    started_at: SyncTime,
    /// Beat value at `started_at`.
    beat_origin: f64,
}

impl ClockState {
    fn beat_at(&self, date: SyncTime) -> f64 {
        let elapsed = date as f64 - self.started_at as f64;
        self.beat_origin + elapsed * self.bpm / MICROS_PER_MINUTE
    }

    fn date_at(&self, beat: f64) -> SyncTime {
        let offset = (beat - self.beat_origin) * MICROS_PER_MINUTE / self.bpm;
        (self.started_at as f64 + offset).max(0.0).round() as SyncTime
    }
}

fn check_tempo(bpm: f64) -> Result<f64> {
    if bpm.is_finite() && bpm > 0.0 {
        Ok(bpm)
    } else {
        Err(SchedulerError::InvalidTempo(bpm))
    }
}

/// Converts wall-clock time into beats under a mutable tempo.
///
/// The beat timeline is piecewise linear: every tempo change starts a new
/// segment anchored at the beat reached under the previous tempo, so
/// `now()` never jumps when the tempo changes.
pub struct BeatClock {
    time: Arc<dyn TimeSource>,
    state: RwLock<ClockState>,
}

impl BeatClock {
    pub fn new(time: Arc<dyn TimeSource>, bpm: f64, meter: Meter) -> Result<Self> {
        Self::starting_at(time, bpm, meter, 0.0)
    }

    /// Creates a clock whose timeline reads `start_beat` right now.
    pub fn starting_at(
        time: Arc<dyn TimeSource>,
        bpm: f64,
        meter: Meter,
        start_beat: f64,
    ) -> Result<Self> {
        let bpm = check_tempo(bpm)?;
        let start_beat = crate::error::check_beat(start_beat)?;
        let started_at = time.micros();
        Ok(BeatClock {
            time,
            state: RwLock::new(ClockState {
                bpm,
                meter,
                started_at,
                beat_origin: start_beat,
            }),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, ClockState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ClockState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current wall-clock time in microseconds.
    pub fn micros(&self) -> SyncTime {
        self.time.micros()
    }

    /// Current position on the beat timeline.
    pub fn now(&self) -> f64 {
        let date = self.time.micros();
        self.read().beat_at(date)
    }

    /// Wall-clock date at which `beat` is reached under the current tempo.
    pub fn date_at_beat(&self, beat: f64) -> SyncTime {
        self.read().date_at(beat)
    }

    /// Microseconds from now until `beat`, zero if it is already past.
    pub fn micros_until(&self, beat: f64) -> SyncTime {
        let date = self.date_at_beat(beat);
        date.saturating_sub(self.time.micros())
    }

    pub fn bpm(&self) -> f64 {
        self.read().bpm
    }

    /// Changes the tempo right now and returns the beat at which it happened.
    ///
    /// Fails with `InvalidTempo`, leaving the clock untouched, unless `bpm`
    /// is finite and positive.
    pub fn set_bpm(&self, bpm: f64) -> Result<f64> {
        let bpm = check_tempo(bpm)?;
        let date = self.time.micros();
        let mut state = self.write();
        let current = state.beat_at(date);
        state.beat_origin = current;
        state.started_at = date;
        state.bpm = bpm;
        Ok(current)
    }

    /// Changes the tempo as if it had happened exactly at `beat`.
    ///
    /// The anchor is placed where `beat` falls on the current tempo segment,
    /// so a change applied slightly after its beat lines up with it.
    pub fn set_bpm_at(&self, beat: f64, bpm: f64) -> Result<()> {
        let bpm = check_tempo(bpm)?;
        let beat = crate::error::check_beat(beat)?;
        let mut state = self.write();
        let anchor = state.date_at(beat);
        state.started_at = anchor;
        state.beat_origin = beat;
        state.bpm = bpm;
        Ok(())
    }

    pub fn meter(&self) -> Meter {
        self.read().meter
    }

    pub fn set_meter(&self, meter: Meter) {
        self.write().meter = meter;
    }

    /// Length of a bar in beats.
    pub fn bar_length(&self) -> f64 {
        self.meter().bar_length()
    }

    /// Number of beats in `n` bars.
    pub fn bars(&self, n: f64) -> f64 {
        self.bar_length() * n
    }

    /// Beat at which the next bar starts.
    pub fn next_bar(&self) -> f64 {
        next_multiple(self.now(), self.bar_length(), 0.0)
    }

    /// Next beat at which `now() % period` equals `offset`.
    pub fn next_multiple(&self, period: f64, offset: f64) -> f64 {
        next_multiple(self.now(), period, offset)
    }

    pub fn beats_to_seconds(&self, beats: f64) -> f64 {
        beats * 60.0 / self.bpm()
    }

    pub fn seconds_to_beats(&self, seconds: f64) -> f64 {
        seconds * self.bpm() / 60.0
    }

    pub fn beats_to_micros(&self, beats: f64) -> SyncTime {
        (beats * MICROS_PER_MINUTE / self.bpm()).max(0.0).round() as SyncTime
    }

    pub fn micros_to_beats(&self, micros: SyncTime) -> f64 {
        micros as f64 * self.bpm() / MICROS_PER_MINUTE
    }

    /// Jumps the timeline so that `now()` reads `beat`.
    pub fn set_time(&self, beat: f64) -> Result<()> {
        let beat = crate::error::check_beat(beat)?;
        let date = self.time.micros();
        let mut state = self.write();
        state.started_at = date;
        state.beat_origin = beat;
        Ok(())
    }

    /// Offsets the timeline by `beats`. Used for phase corrections.
    pub fn shift(&self, beats: f64) {
        if beats.is_finite() {
            self.write().beat_origin += beats;
        }
    }
}
