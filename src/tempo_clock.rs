use crossbeam_channel::Receiver;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::{
    clock::{BeatClock, Meter, MonotonicTime, NEVER, SyncTime, TimeSource, TimeSpan},
    config::ClockConfig,
    error::{Result, SchedulerError, check_beat, check_period},
    log_debug, log_info,
    notification::{ClockNotification, Notifier},
    point::{PointInTime, PointRegistry},
    schedule::{
        Action, ActionTiming, DriverConfig, DriverHandle, EntryId, Scheduler, TickReport,
        driver::Driven,
    },
    sync::{SyncAdapter, SyncStatus, TempoSession},
};

/// What the driver thread works on.
struct Heartbeat {
    clock: Arc<BeatClock>,
    scheduler: Arc<Scheduler>,
    sync: Arc<SyncAdapter>,
}

impl Heartbeat {
    fn beat(&self) -> TickReport {
        self.sync.reconcile_if_due();
        self.scheduler.tick()
    }
}

impl Driven for Heartbeat {
    fn now_micros(&self) -> SyncTime {
        self.clock.micros()
    }

    fn next_deadline(&self) -> SyncTime {
        [self.scheduler.next_due(), self.sync.next_resync_beat()]
            .into_iter()
            .flatten()
            .map(|beat| self.clock.date_at_beat(beat))
            .min()
            .unwrap_or(NEVER)
    }

    fn pulse(&self) {
        self.beat();
    }
}

/// Default transport for [`TempoClock::new`].
pub fn default_session() -> Box<dyn TempoSession> {
    #[cfg(feature = "link")]
    {
        Box::new(crate::sync::LinkSession::new())
    }
    #[cfg(not(feature = "link"))]
    {
        Box::new(crate::sync::OfflineSession)
    }
}

/// The scheduler as a whole: beat clock, queue, points, sync and the
/// driver thread.
///
/// One instance is created at startup and shared (by reference or `Arc`)
/// with every collaborator. Nothing runs until [`TempoClock::start`] is
/// called, or [`TempoClock::tick`] is called by hand.
pub struct TempoClock {
    clock: Arc<BeatClock>,
    scheduler: Arc<Scheduler>,
    points: Arc<PointRegistry>,
    sync: Arc<SyncAdapter>,
    notifier: Arc<Notifier>,
    heartbeat: Arc<Heartbeat>,
    driver_config: DriverConfig,
    driver: Mutex<Option<DriverHandle>>,
}

impl TempoClock {
    pub fn new(config: &ClockConfig) -> Result<Self> {
        Self::with_parts(config, Arc::new(MonotonicTime::new()), default_session())
    }

    /// Builds a clock on an explicit time source and sync transport.
    pub fn with_parts(
        config: &ClockConfig,
        time: Arc<dyn TimeSource>,
        session: Box<dyn TempoSession>,
    ) -> Result<Self> {
        let clock = Arc::new(BeatClock::starting_at(
            time,
            config.clock.tempo,
            config.clock.meter,
            config.clock.start_beat,
        )?);
        let notifier = Arc::new(Notifier::new());
        let scheduler = Arc::new(Scheduler::new(clock.clone(), notifier.clone()));
        let points = PointRegistry::new(scheduler.clone());
        let sync = Arc::new(SyncAdapter::new(
            clock.clone(),
            notifier.clone(),
            session,
            config.sync.clone(),
        ));
        let heartbeat = Arc::new(Heartbeat {
            clock: clock.clone(),
            scheduler: scheduler.clone(),
            sync: sync.clone(),
        });
        Ok(TempoClock {
            clock,
            scheduler,
            points,
            sync,
            notifier,
            heartbeat,
            driver_config: config.driver,
            driver: Mutex::new(None),
        })
    }

    fn driver(&self) -> MutexGuard<'_, Option<DriverHandle>> {
        self.driver.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawns the driver thread. Does nothing if it already runs.
    pub fn start(&self) -> Result<()> {
        let mut driver = self.driver();
        if driver.as_ref().is_some_and(DriverHandle::is_running) {
            return Ok(());
        }
        let handle = DriverHandle::spawn(self.heartbeat.clone(), self.driver_config)?;
        self.scheduler.attach_driver(handle.sender());
        *driver = Some(handle);
        log_info!(
            "Clock started at beat {:.3}, {:.2} bpm, {}",
            self.clock.now(),
            self.clock.bpm(),
            self.clock.meter()
        );
        Ok(())
    }

    /// Stops the driver thread. Queued entries stay queued.
    pub fn stop(&self) {
        let handle = self.driver().take();
        if let Some(mut handle) = handle {
            self.scheduler.detach_driver();
            handle.stop();
            log_info!("Clock stopped at beat {:.3}", self.clock.now());
        }
    }

    pub fn is_running(&self) -> bool {
        self.driver().as_ref().is_some_and(DriverHandle::is_running)
    }

    fn wake_driver(&self) {
        if let Some(handle) = self.driver().as_ref() {
            handle.wake();
        }
    }

    /// Runs one driver iteration on the calling thread: sync reconciliation
    /// if due, then every due entry.
    pub fn tick(&self) -> TickReport {
        self.heartbeat.beat()
    }

    pub fn clock(&self) -> &Arc<BeatClock> {
        &self.clock
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn points(&self) -> &Arc<PointRegistry> {
        &self.points
    }

    pub fn subscribe(&self) -> Receiver<ClockNotification> {
        self.notifier.subscribe()
    }

    // Clock

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    pub fn bpm(&self) -> f64 {
        self.clock.bpm()
    }

    /// Changes the tempo immediately. While sync is enabled the new tempo
    /// is also proposed to the session.
    pub fn set_bpm(&self, bpm: f64) -> Result<()> {
        let at_beat = self.clock.set_bpm(bpm)?;
        apply_tempo_change(&self.notifier, &self.sync, bpm, at_beat);
        Ok(())
    }

    /// Schedules a tempo change on the next bar line and returns its beat.
    ///
    /// The change runs before every other entry of that bar line.
    pub fn set_bpm_at_next_bar(&self, bpm: f64) -> Result<f64> {
        if !(bpm.is_finite() && bpm > 0.0) {
            return Err(SchedulerError::InvalidTempo(bpm));
        }
        let at_beat = self.clock.next_bar();
        let clock = self.clock.clone();
        let notifier = self.notifier.clone();
        let sync = self.sync.clone();
        let change = Action::fallible(move || {
            clock.set_bpm_at(at_beat, bpm)?;
            apply_tempo_change(&notifier, &sync, bpm, at_beat);
            Ok(())
        })
        .labeled(format!("tempo {bpm:.2}"));
        self.scheduler.schedule_priority(at_beat, change)?;
        Ok(at_beat)
    }

    pub fn meter(&self) -> Meter {
        self.clock.meter()
    }

    pub fn set_meter(&self, meter: Meter) {
        self.clock.set_meter(meter);
        log_info!("Meter set to {meter}");
        self.notifier.notify(ClockNotification::MeterChanged(meter));
    }

    pub fn bar_length(&self) -> f64 {
        self.clock.bar_length()
    }

    pub fn bars(&self, n: f64) -> f64 {
        self.clock.bars(n)
    }

    pub fn next_bar(&self) -> f64 {
        self.clock.next_bar()
    }

    pub fn next_multiple(&self, period: f64, offset: f64) -> f64 {
        self.clock.next_multiple(period, offset)
    }

    pub fn beats_to_seconds(&self, beats: f64) -> f64 {
        self.clock.beats_to_seconds(beats)
    }

    pub fn seconds_to_beats(&self, seconds: f64) -> f64 {
        self.clock.seconds_to_beats(seconds)
    }

    /// Jumps to `beat`. Everything queued is dropped, since it was
    /// expressed against the old timeline.
    pub fn set_time(&self, beat: f64) -> Result<()> {
        self.clock.set_time(beat)?;
        self.scheduler.clear();
        self.points.clear_all();
        self.sync.reset_schedule();
        log_info!("Timeline moved to beat {beat:.3}");
        self.notifier.notify(ClockNotification::TimeSet(beat));
        Ok(())
    }

    /// Moves the timeline `beats` forward, or backward if negative.
    pub fn shift(&self, beats: f64) -> Result<()> {
        let beats = check_beat(beats)?;
        self.clock.shift(beats);
        self.wake_driver();
        Ok(())
    }

    // Scheduling

    pub fn schedule_at(&self, beat: f64, action: impl Into<Action>) -> Result<EntryId> {
        self.scheduler.schedule_at(beat, action)
    }

    pub fn schedule_after(&self, delta_beats: f64, action: impl Into<Action>) -> Result<EntryId> {
        self.scheduler.schedule_after(delta_beats, action)
    }

    /// Same as [`TempoClock::schedule_after`].
    pub fn future(&self, delta_beats: f64, action: impl Into<Action>) -> Result<EntryId> {
        self.schedule_after(delta_beats, action)
    }

    pub fn schedule(&self, timing: ActionTiming, action: impl Into<Action>) -> Result<EntryId> {
        self.schedule_at(timing.target_beat(&self.clock), action)
    }

    /// Schedules `action` after a span of wall-clock time, beats or bars.
    pub fn schedule_in(&self, span: TimeSpan, action: impl Into<Action>) -> Result<EntryId> {
        self.schedule_after(span.as_beats(&self.clock), action)
    }

    pub fn schedule_next_bar(&self, action: impl Into<Action>) -> Result<EntryId> {
        self.schedule(ActionTiming::AtNextBar, action)
    }

    /// Runs `action` every `period` beats, first `period` beats from now.
    /// Clear the returned point to stop it.
    pub fn every(&self, period: f64, action: impl Into<Action>) -> Result<PointInTime> {
        let period = check_period(period)?;
        let point = self.points.recurring(period)?;
        point.add_action(action);
        point.bind(self.clock.now() + period)?;
        Ok(point)
    }

    /// Removes the entries queued for `point` itself. Not an error if it
    /// already fired.
    pub fn cancel(&self, point: &PointInTime) -> usize {
        self.scheduler.cancel(point.id())
    }

    pub fn cancel_entry(&self, id: EntryId) -> bool {
        self.scheduler.cancel_entry(id)
    }

    /// Drops every queued entry and resets every point. Sync keeps running.
    pub fn clear(&self) {
        let dropped = self.scheduler.clear();
        self.points.clear_all();
        log_info!("Cleared {dropped} queued entries");
        self.notifier.notify(ClockNotification::Cleared);
    }

    pub fn pending(&self) -> usize {
        self.scheduler.len()
    }

    pub fn next_due(&self) -> Option<f64> {
        self.scheduler.next_due()
    }

    // Points

    pub fn point(&self) -> PointInTime {
        self.points.one_shot()
    }

    pub fn persistent_point(&self) -> PointInTime {
        self.points.persistent()
    }

    pub fn recurring_point(&self, period: f64) -> Result<PointInTime> {
        self.points.recurring(period)
    }

    // Sync

    pub fn enable_sync(&self, phase_offset: f64, resync_interval: f64) -> Result<SyncStatus> {
        let status = self.sync.enable(phase_offset, resync_interval)?;
        self.wake_driver();
        Ok(status)
    }

    /// Enables sync with the configured offset and interval.
    pub fn enable_sync_with_defaults(&self) -> Result<SyncStatus> {
        let settings = self.sync.settings();
        self.enable_sync(settings.phase_offset, settings.resync_interval)
    }

    pub fn disable_sync(&self) -> bool {
        self.sync.disable()
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.sync.status()
    }
}

fn apply_tempo_change(notifier: &Notifier, sync: &SyncAdapter, bpm: f64, at_beat: f64) {
    log_info!("Tempo set to {bpm:.2} bpm at beat {at_beat:.3}");
    sync.propose_tempo(bpm);
    notifier.notify(ClockNotification::TempoChanged { bpm, at_beat });
}

impl Drop for TempoClock {
    fn drop(&mut self) {
        self.stop();
        log_debug!("Clock dropped with {} entries queued", self.scheduler.len());
    }
}
