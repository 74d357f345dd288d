use crate::{
    DEFAULT_TEMPO,
    config::{ClockConfig, ClockSection},
    log_warn,
    schedule::{DriverConfig, driver::DEFAULT_TICK_INTERVAL_MICROS},
    sync::{DEFAULT_PHASE_OFFSET, DEFAULT_RESYNC_INTERVAL, SyncSettings},
};

/// Brings out-of-range values back to something usable instead of failing.
pub trait Validate {
    fn validate(&mut self);
}

impl Validate for ClockConfig {
    fn validate(&mut self) {
        self.clock.validate();
        self.driver.validate();
        self.sync.validate();
    }
}

impl Validate for ClockSection {
    fn validate(&mut self) {
        if !(self.tempo.is_finite() && self.tempo >= 1.0 && self.tempo <= 999.0) {
            log_warn!("Invalid tempo: {}. Using default: {}", self.tempo, DEFAULT_TEMPO);
            self.tempo = DEFAULT_TEMPO;
        }

        if !self.start_beat.is_finite() {
            log_warn!("Invalid start_beat: {}. Using default: 0", self.start_beat);
            self.start_beat = 0.0;
        }
    }
}

impl Validate for DriverConfig {
    fn validate(&mut self) {
        if self.tick_interval_micros == 0 || self.tick_interval_micros > 100_000 {
            log_warn!(
                "Invalid tick_interval_micros: {}. Using default: {}",
                self.tick_interval_micros,
                DEFAULT_TICK_INTERVAL_MICROS
            );
            self.tick_interval_micros = DEFAULT_TICK_INTERVAL_MICROS;
        }

        self.active_wait_micros = self.active_wait_micros.min(self.tick_interval_micros);
    }
}

impl Validate for SyncSettings {
    fn validate(&mut self) {
        if !self.phase_offset.is_finite() {
            log_warn!(
                "Invalid phase_offset: {}. Using default: {}",
                self.phase_offset,
                DEFAULT_PHASE_OFFSET
            );
            self.phase_offset = DEFAULT_PHASE_OFFSET;
        }

        if !(self.resync_interval.is_finite() && self.resync_interval > 0.0) {
            log_warn!(
                "Invalid resync_interval: {}. Using default: {}",
                self.resync_interval,
                DEFAULT_RESYNC_INTERVAL
            );
            self.resync_interval = DEFAULT_RESYNC_INTERVAL;
        }

        if let Some(quantum) = self.quantum {
            if !(quantum.is_finite() && quantum > 0.0) {
                log_warn!("Invalid quantum: {}. Using the bar length instead", quantum);
                self.quantum = None;
            }
        }

        if !(self.tempo_epsilon.is_finite() && self.tempo_epsilon >= 0.0) {
            self.tempo_epsilon = SyncSettings::default().tempo_epsilon;
        }

        if !(self.phase_tolerance.is_finite() && self.phase_tolerance >= 0.0) {
            self.phase_tolerance = SyncSettings::default().phase_tolerance;
        }

        if !(self.correction_gain.is_finite() && self.correction_gain > 0.0) {
            log_warn!(
                "Invalid correction_gain: {}. Using default",
                self.correction_gain
            );
            self.correction_gain = SyncSettings::default().correction_gain;
        }
        self.correction_gain = self.correction_gain.min(1.0);

        if !(self.max_correction.is_finite() && self.max_correction > 0.0) {
            log_warn!(
                "Invalid max_correction: {}. Using default",
                self.max_correction
            );
            self.max_correction = SyncSettings::default().max_correction;
        }

        if self.failure_warn_threshold == 0 {
            self.failure_warn_threshold = 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_values_are_replaced() {
        let mut config = ClockConfig::default();
        config.clock.tempo = -4.0;
        config.driver.tick_interval_micros = 0;
        config.driver.active_wait_micros = 1_000_000;
        config.sync.resync_interval = 0.0;
        config.sync.quantum = Some(f64::NAN);
        config.sync.correction_gain = 3.0;
        config.sync.failure_warn_threshold = 0;

        config.validate();

        assert_eq!(config.clock.tempo, DEFAULT_TEMPO);
        assert_eq!(config.driver.tick_interval_micros, DEFAULT_TICK_INTERVAL_MICROS);
        assert_eq!(config.driver.active_wait_micros, DEFAULT_TICK_INTERVAL_MICROS);
        assert_eq!(config.sync.resync_interval, DEFAULT_RESYNC_INTERVAL);
        assert_eq!(config.sync.quantum, None);
        assert_eq!(config.sync.correction_gain, 1.0);
        assert_eq!(config.sync.failure_warn_threshold, 1);
    }

    #[test]
    fn valid_config_is_untouched() {
        let mut config = ClockConfig::default();
        config.validate();
        assert_eq!(config, ClockConfig::default());
    }
}
