//! Following an external tempo session.
//!
//! The adapter is either disabled or enabled. While enabled, the driver
//! loop calls [`SyncAdapter::reconcile_if_due`], which reads the session
//! every `resync_interval` beats, adopts its tempo and nudges the local
//! phase towards `remote_phase + phase_offset`.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::{
    clock::BeatClock,
    error::{Result, SchedulerError, check_period},
    log_debug, log_info, log_warn,
    notification::{ClockNotification, Notifier},
};

#[cfg(feature = "link")]
pub mod link;
pub mod reconcile;
pub mod session;

#[cfg(feature = "link")]
pub use link::LinkSession;
pub use reconcile::Correction;
pub use session::{OfflineSession, SessionSnapshot, TempoSession};

pub const DEFAULT_PHASE_OFFSET: f64 = 0.5;
pub const DEFAULT_RESYNC_INTERVAL: f64 = 1.0;

fn default_phase_offset() -> f64 {
    DEFAULT_PHASE_OFFSET
}

fn default_resync_interval() -> f64 {
    DEFAULT_RESYNC_INTERVAL
}

fn default_tempo_epsilon() -> f64 {
    0.01
}

fn default_phase_tolerance() -> f64 {
    0.02
}

fn default_correction_gain() -> f64 {
    0.25
}

fn default_max_correction() -> f64 {
    0.25
}

fn default_snap_at_bar_start() -> bool {
    true
}

fn default_failure_warn_threshold() -> u32 {
    8
}

/// Tuning of the sync adapter, as found in the `[sync]` config section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Enable sync as soon as the clock starts.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_phase_offset")]
    pub phase_offset: f64,
    #[serde(default = "default_resync_interval")]
    pub resync_interval: f64,
    /// Beats over which phase is aligned. One bar of the current meter when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantum: Option<f64>,
    #[serde(default = "default_tempo_epsilon")]
    pub tempo_epsilon: f64,
    #[serde(default = "default_phase_tolerance")]
    pub phase_tolerance: f64,
    /// Fraction of the phase error corrected per reconciliation mid-bar.
    #[serde(default = "default_correction_gain")]
    pub correction_gain: f64,
    /// Largest mid-bar correction, in beats.
    #[serde(default = "default_max_correction")]
    pub max_correction: f64,
    #[serde(default = "default_snap_at_bar_start")]
    pub snap_at_bar_start: bool,
    /// Consecutive failed reconciliations between two warnings.
    #[serde(default = "default_failure_warn_threshold")]
    pub failure_warn_threshold: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            enabled: false,
            phase_offset: default_phase_offset(),
            resync_interval: default_resync_interval(),
            quantum: None,
            tempo_epsilon: default_tempo_epsilon(),
            phase_tolerance: default_phase_tolerance(),
            correction_gain: default_correction_gain(),
            max_correction: default_max_correction(),
            snap_at_bar_start: default_snap_at_bar_start(),
            failure_warn_threshold: default_failure_warn_threshold(),
        }
    }
}

/// Snapshot returned by [`SyncAdapter::status`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub enabled: bool,
    pub tempo: f64,
    pub beat: f64,
    pub phase: f64,
    pub quantum: f64,
    pub peer_count: usize,
    pub phase_offset: f64,
    pub resync_interval: f64,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone, Copy)]
struct Following {
    phase_offset: f64,
    resync_interval: f64,
    next_resync: f64,
    consecutive_failures: u32,
    peers: usize,
}

struct SyncState {
    session: Box<dyn TempoSession>,
    following: Option<Following>,
}

pub struct SyncAdapter {
    clock: Arc<BeatClock>,
    notifier: Arc<Notifier>,
    settings: SyncSettings,
    state: Mutex<SyncState>,
}

impl SyncAdapter {
    pub fn new(
        clock: Arc<BeatClock>,
        notifier: Arc<Notifier>,
        session: Box<dyn TempoSession>,
        settings: SyncSettings,
    ) -> Self {
        SyncAdapter {
            clock,
            notifier,
            settings,
            state: Mutex::new(SyncState {
                session,
                following: None,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Beats over which phase is aligned.
    pub fn quantum(&self) -> f64 {
        self.settings
            .quantum
            .filter(|q| q.is_finite() && *q > 0.0)
            .unwrap_or_else(|| self.clock.bar_length())
    }

    pub fn is_enabled(&self) -> bool {
        self.state().following.is_some()
    }

    /// Starts following the session. Calling it while enabled only updates
    /// the offset and interval.
    ///
    /// Fails with `SyncUnavailable` if the transport cannot connect, in
    /// which case the clock keeps its local tempo.
    pub fn enable(&self, phase_offset: f64, resync_interval: f64) -> Result<SyncStatus> {
        let resync_interval = check_period(resync_interval)?;
        if !phase_offset.is_finite() {
            return Err(SchedulerError::InvalidBeat(phase_offset));
        }
        let quantum = self.quantum();
        let peers = {
            let mut state = self.state();
            if let Some(following) = state.following.as_mut() {
                following.phase_offset = phase_offset;
                following.resync_interval = resync_interval;
                log_debug!("Sync settings updated: offset {phase_offset}, every {resync_interval} beats");
                None
            } else {
                let name = state.session.name().to_owned();
                state
                    .session
                    .connect(self.clock.bpm(), quantum)
                    .map_err(|e| SchedulerError::SyncUnavailable(format!("{name}: {e:#}")))?;
                let peers = state.session.capture(quantum).map(|s| s.peers).unwrap_or(0);
                state.following = Some(Following {
                    phase_offset,
                    resync_interval,
                    next_resync: self.clock.now(),
                    consecutive_failures: 0,
                    peers,
                });
                log_info!("Sync enabled with {name} ({peers} peers)");
                Some(peers)
            }
        };
        if let Some(peers) = peers {
            self.notifier.notify(ClockNotification::SyncEnabled { peers });
        }
        Ok(self.status())
    }

    /// Stops following the session. Returns false if sync was not enabled.
    pub fn disable(&self) -> bool {
        {
            let mut state = self.state();
            if state.following.take().is_none() {
                return false;
            }
            state.session.disconnect();
        }
        log_info!("Sync disabled");
        self.notifier.notify(ClockNotification::SyncDisabled);
        true
    }

    pub fn status(&self) -> SyncStatus {
        let quantum = self.quantum();
        let mut state = self.state();
        let local_beat = self.clock.now();
        let mut status = SyncStatus {
            enabled: false,
            tempo: self.clock.bpm(),
            beat: local_beat,
            phase: local_beat.rem_euclid(quantum),
            quantum,
            peer_count: 0,
            phase_offset: self.settings.phase_offset,
            resync_interval: self.settings.resync_interval,
            consecutive_failures: 0,
        };
        let Some(following) = state.following else {
            return status;
        };
        status.enabled = true;
        status.phase_offset = following.phase_offset;
        status.resync_interval = following.resync_interval;
        status.consecutive_failures = following.consecutive_failures;
        status.peer_count = following.peers;
        if let Ok(remote) = state.session.capture(quantum) {
            status.tempo = remote.tempo;
            status.beat = remote.beat;
            status.phase = remote.phase;
            status.peer_count = remote.peers;
        }
        status
    }

    /// Beat of the next scheduled reconciliation.
    pub fn next_resync_beat(&self) -> Option<f64> {
        self.state().following.map(|f| f.next_resync)
    }

    /// Makes the next reconciliation happen on the next driver pulse.
    pub fn reset_schedule(&self) {
        let now = self.clock.now();
        if let Some(following) = self.state().following.as_mut() {
            following.next_resync = now;
        }
    }

    /// Reconciles if enabled and the interval elapsed.
    pub fn reconcile_if_due(&self) -> Option<Correction> {
        let now = self.clock.now();
        let due = self
            .state()
            .following
            .is_some_and(|f| f.next_resync <= now);
        if due { self.reconcile() } else { None }
    }

    /// Reads the session and moves the local clock towards it.
    ///
    /// Transport errors skip this cycle. They are counted and reported as a
    /// warning every `failure_warn_threshold` consecutive failures.
    pub fn reconcile(&self) -> Option<Correction> {
        let quantum = self.quantum();
        let (correction, tempo_change) = {
            let mut state = self.state();
            let following = state.following?;
            let captured = state.session.capture(quantum).and_then(|remote| {
                if remote.tempo.is_finite() && remote.tempo > 0.0 {
                    Ok(remote)
                } else {
                    Err(anyhow::anyhow!("session reported tempo {}", remote.tempo))
                }
            });
            let now = self.clock.now();
            let mut following = following;
            following.next_resync = now + following.resync_interval;
            let remote = match captured {
                Ok(remote) => remote,
                Err(e) => {
                    following.consecutive_failures += 1;
                    let failures = following.consecutive_failures;
                    state.following = Some(following);
                    let threshold = self.settings.failure_warn_threshold.max(1);
                    if failures % threshold == 0 {
                        log_warn!("Sync failed {failures} times in a row: {e:#}");
                    } else {
                        log_debug!("Sync skipped at beat {now:.3}: {e:#}");
                    }
                    return None;
                }
            };
            if following.consecutive_failures > 0 {
                log_info!(
                    "Sync recovered after {} failed attempts",
                    following.consecutive_failures
                );
            }
            following.consecutive_failures = 0;
            following.peers = remote.peers;
            state.following = Some(following);

            let correction = reconcile::plan(
                &self.settings,
                self.clock.bpm(),
                now,
                &remote,
                following.phase_offset,
                quantum,
            );
            let tempo_change = match correction.tempo {
                Some(tempo) => self.clock.set_bpm(tempo).ok().map(|at_beat| (tempo, at_beat)),
                None => None,
            };
            if correction.nudge != 0.0 {
                self.clock.shift(correction.nudge);
            }
            (correction, tempo_change)
        };
        if let Some((bpm, at_beat)) = tempo_change {
            log_info!("Following session tempo: {bpm:.2} bpm");
            self.notifier
                .notify(ClockNotification::TempoChanged { bpm, at_beat });
        }
        if correction.nudge != 0.0 {
            log_debug!(
                "Phase error {:.3}, nudged by {:.3} beats",
                correction.phase_error,
                correction.nudge
            );
        }
        Some(correction)
    }

    /// Forwards a local tempo change to the session while enabled.
    pub fn propose_tempo(&self, bpm: f64) {
        let mut state = self.state();
        if state.following.is_none() {
            return;
        }
        if let Err(e) = state.session.propose_tempo(bpm) {
            log_warn!("Could not send tempo {bpm:.2} to the session: {e:#}");
        }
    }
}
