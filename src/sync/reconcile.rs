use crate::sync::{SyncSettings, session::SessionSnapshot};

/// Window after a bar line in which a full phase correction is allowed.
pub const BAR_START_WINDOW: f64 = 0.05;

/// What one reconciliation decided to change on the local clock.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Correction {
    /// New tempo to adopt, if the session drifted away from ours.
    pub tempo: Option<f64>,
    /// Beats to add to the local timeline.
    pub nudge: f64,
    /// Signed distance from the local phase to the target phase.
    pub phase_error: f64,
}

impl Correction {
    pub fn is_noop(&self) -> bool {
        self.tempo.is_none() && self.nudge == 0.0
    }
}

/// Signed shortest distance from `local_beat` to the target phase,
/// in `[-quantum / 2, quantum / 2)`.
pub fn phase_error(local_beat: f64, remote_phase: f64, phase_offset: f64, quantum: f64) -> f64 {
    let target = (remote_phase + phase_offset).rem_euclid(quantum);
    let local = local_beat.rem_euclid(quantum);
    let half = quantum / 2.0;
    (target - local + half).rem_euclid(quantum) - half
}

/// Computes how the local clock should follow `remote`.
///
/// Small errors are left alone. Right after a bar line the whole error is
/// absorbed at once, elsewhere only a fraction of it, capped by
/// `max_correction`, so the timeline never jumps audibly mid-bar.
pub fn plan(
    settings: &SyncSettings,
    local_bpm: f64,
    local_beat: f64,
    remote: &SessionSnapshot,
    phase_offset: f64,
    quantum: f64,
) -> Correction {
    let tempo = ((remote.tempo - local_bpm).abs() > settings.tempo_epsilon).then_some(remote.tempo);
    let error = phase_error(local_beat, remote.phase, phase_offset, quantum);
    let nudge = if error.abs() <= settings.phase_tolerance {
        0.0
    } else if settings.snap_at_bar_start && local_beat.rem_euclid(quantum) < BAR_START_WINDOW {
        error
    } else {
        (error * settings.correction_gain).clamp(-settings.max_correction, settings.max_correction)
    };
    Correction {
        tempo,
        nudge,
        phase_error: error,
    }
}
