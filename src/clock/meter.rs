use fraction::{CheckedAdd, CheckedDiv, CheckedMul, Fraction, One};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

use crate::error::SchedulerError;

/// Time signature, e.g. 4/4 or 7/8.
///
/// Serialized as a `[numerator, denominator]` pair.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "(u32, u32)", into = "(u32, u32)")]
pub struct Meter {
    numerator: u32,
    denominator: u32,
}

impl Meter {
    pub fn new(numerator: u32, denominator: u32) -> Result<Self, SchedulerError> {
        if numerator == 0 || denominator == 0 {
            return Err(SchedulerError::InvalidMeter {
                numerator,
                denominator,
            });
        }
        Ok(Meter {
            numerator,
            denominator,
        })
    }

    pub fn numerator(&self) -> u32 {
        self.numerator
    }

    pub fn denominator(&self) -> u32 {
        self.denominator
    }

    /// Length of one bar in beats, a beat being a quarter note: 4/4 is 4
    /// beats, 3/4 is 3, 6/8 is 3, 7/8 is 3.5.
    pub fn bar_length(&self) -> f64 {
        (self.numerator as f64 / self.denominator as f64) * 4.0
    }
}

impl Default for Meter {
    fn default() -> Self {
        Meter {
            numerator: 4,
            denominator: 4,
        }
    }
}

impl Display for Meter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

impl TryFrom<(u32, u32)> for Meter {
    type Error = SchedulerError;

    fn try_from((numerator, denominator): (u32, u32)) -> Result<Self, Self::Error> {
        Meter::new(numerator, denominator)
    }
}

impl From<Meter> for (u32, u32) {
    fn from(meter: Meter) -> Self {
        (meter.numerator, meter.denominator)
    }
}

/// Distance under which a float beat counts as sitting on a boundary.
const BOUNDARY_EPSILON: f64 = 1e-9;

/// Returns the first multiple of `period` strictly after `beat`, plus `offset`.
///
/// Computed with rational arithmetic so that `beat` sitting exactly on a
/// boundary does not round back onto it. Beats whose rational form does not
/// fit in 64 bits fall back to floats.
pub fn next_multiple(beat: f64, period: f64, offset: f64) -> f64 {
    if !(period > 0.0 && period.is_finite() && beat.is_finite()) {
        return beat + offset;
    }
    let target = exact_next_multiple(beat, period)
        .unwrap_or_else(|| approximate_next_multiple(beat, period));
    target + offset
}

fn exact_next_multiple(beat: f64, period: f64) -> Option<f64> {
    if beat < 0.0 {
        return None;
    }
    let period_fraction = Fraction::from(period);
    let steps = Fraction::from(beat)
        .checked_div(&period_fraction)?
        .floor()
        .checked_add(&Fraction::one())?;
    let target = steps.checked_mul(&period_fraction)?;
    f64::try_from(target).ok().filter(|t| t.is_finite() && *t > beat)
}

fn approximate_next_multiple(beat: f64, period: f64) -> f64 {
    let target = ((beat / period).floor() + 1.0) * period;
    if target - beat <= BOUNDARY_EPSILON * beat.abs().max(1.0) {
        target + period
    } else {
        target
    }
}
