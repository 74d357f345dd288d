use thiserror::Error;

use crate::point::PointId;

/// Every failure the clock reports to its callers.
///
/// `InvalidTempo` and `SyncUnavailable` are returned synchronously to whoever
/// asked for the change. `ActionFailed` is collected in the `TickReport` of
/// the tick that ran the action, logged and broadcast. The tick keeps going.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchedulerError {
    #[error("Invalid tempo {0}: bpm must be a finite number above zero")]
    InvalidTempo(f64),

    #[error("Invalid meter {numerator}/{denominator}")]
    InvalidMeter { numerator: u32, denominator: u32 },

    #[error("Invalid beat {0}")]
    InvalidBeat(f64),

    #[error("Invalid period {0}: must be a finite number of beats above zero")]
    InvalidPeriod(f64),

    #[error("Tempo sync unavailable: {0}")]
    SyncUnavailable(String),

    #[error("Action '{label}' failed at beat {beat:.3}: {reason}")]
    ActionFailed {
        label: String,
        beat: f64,
        reason: String,
    },

    #[error("{point} was already bound to beat {beat}")]
    PointAlreadyBound { point: PointId, beat: f64 },

    #[error("Driver loop unavailable: {0}")]
    DriverUnavailable(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Rejects NaN and infinite beats before they reach the queue.
pub(crate) fn check_beat(beat: f64) -> Result<f64> {
    if beat.is_finite() {
        Ok(beat)
    } else {
        Err(SchedulerError::InvalidBeat(beat))
    }
}

pub(crate) fn check_period(period: f64) -> Result<f64> {
    if period.is_finite() && period > 0.0 {
        Ok(period)
    } else {
        Err(SchedulerError::InvalidPeriod(period))
    }
}
