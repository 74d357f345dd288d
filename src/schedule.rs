use crossbeam_channel::Sender;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::{
    clock::BeatClock,
    error::{Result, SchedulerError, check_beat},
    log::Severity,
    log_at_beat,
    notification::{ClockNotification, Notifier},
    point::PointId,
};

pub mod action;
pub mod driver;
pub mod queue;
pub mod timing;

pub use action::{Action, ActionResult};
pub use driver::{DriverConfig, DriverHandle, DriverMessage};
pub use queue::{EntryId, ScheduledEntry, SchedulingQueue};
pub use timing::ActionTiming;

/// Upper bound on drain passes in one tick. Actions that keep scheduling
/// work at the current beat are picked up by the next tick past this.
const MAX_DRAIN_PASSES: usize = 32;

/// What one call to [`Scheduler::tick`] did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub beat: f64,
    pub fired: usize,
    /// One `ActionFailed` per entry that errored or panicked.
    pub failures: Vec<SchedulerError>,
}

impl TickReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// The scheduling queue shared between the interactive thread and the
/// driver loop.
///
/// All queue access goes through one mutex. `tick` only holds it while
/// taking the due entries out, actions run with the lock released.
pub struct Scheduler {
    clock: Arc<BeatClock>,
    queue: Mutex<SchedulingQueue>,
    notifier: Arc<Notifier>,
    waker: Mutex<Option<Sender<DriverMessage>>>,
}

impl Scheduler {
    pub fn new(clock: Arc<BeatClock>, notifier: Arc<Notifier>) -> Self {
        Scheduler {
            clock,
            queue: Mutex::new(SchedulingQueue::new()),
            notifier,
            waker: Mutex::new(None),
        }
    }

    fn queue(&self) -> MutexGuard<'_, SchedulingQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn clock(&self) -> &Arc<BeatClock> {
        &self.clock
    }

    /// Lets the driver loop be woken up when a new queue head appears.
    pub(crate) fn attach_driver(&self, sender: Sender<DriverMessage>) {
        *self.waker.lock().unwrap_or_else(PoisonError::into_inner) = Some(sender);
    }

    pub(crate) fn detach_driver(&self) {
        *self.waker.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn wake_driver(&self) {
        if let Some(sender) = self
            .waker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            let _ = sender.try_send(DriverMessage::Wake);
        }
    }

    pub fn schedule_at(&self, beat: f64, action: impl Into<Action>) -> Result<EntryId> {
        self.schedule_owned(beat, action.into(), None)
    }

    pub fn schedule_after(&self, delta_beats: f64, action: impl Into<Action>) -> Result<EntryId> {
        let delta_beats = check_beat(delta_beats)?;
        self.schedule_at(self.clock.now() + delta_beats, action)
    }

    pub fn schedule_owned(
        &self,
        beat: f64,
        action: Action,
        owner: Option<PointId>,
    ) -> Result<EntryId> {
        self.insert(beat, |queue| queue.push(beat, action, owner))
    }

    /// Schedules `action` ahead of everything else due at `beat`. Used for
    /// clock changes that the other entries of that beat must observe.
    pub fn schedule_priority(&self, beat: f64, action: impl Into<Action>) -> Result<EntryId> {
        let action = action.into();
        self.insert(beat, |queue| queue.push_priority(beat, action))
    }

    fn insert(
        &self,
        beat: f64,
        push: impl FnOnce(&mut SchedulingQueue) -> EntryId,
    ) -> Result<EntryId> {
        check_beat(beat)?;
        let (id, is_head) = {
            let mut queue = self.queue();
            let id = push(&mut queue);
            (id, queue.next_due() == Some(beat))
        };
        if is_head {
            self.wake_driver();
        }
        Ok(id)
    }

    /// Queues several entries under a single lock acquisition.
    pub(crate) fn schedule_batch(
        &self,
        entries: impl IntoIterator<Item = (f64, Action, Option<PointId>)>,
    ) -> Vec<EntryId> {
        let ids: Vec<EntryId> = {
            let mut queue = self.queue();
            entries
                .into_iter()
                .filter(|(beat, _, _)| beat.is_finite())
                .map(|(beat, action, owner)| queue.push(beat, action, owner))
                .collect()
        };
        if !ids.is_empty() {
            self.wake_driver();
        }
        ids
    }

    /// Removes every queued entry owned by `owner`. Not an error if none match.
    pub fn cancel(&self, owner: PointId) -> usize {
        self.queue().cancel_owner(owner)
    }

    pub fn cancel_owners(&self, owners: &HashSet<PointId>) -> usize {
        self.queue().cancel_owners(owners)
    }

    pub fn cancel_entry(&self, id: EntryId) -> bool {
        self.queue().remove(id)
    }

    pub fn clear(&self) -> usize {
        self.queue().clear()
    }

    pub fn next_due(&self) -> Option<f64> {
        self.queue().next_due()
    }

    pub fn len(&self) -> usize {
        self.queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue().is_empty()
    }

    /// Fires every entry due at or before the current beat, in queue order.
    ///
    /// Entries scheduled by the fired actions that are themselves already
    /// due fire within the same tick.
    pub fn tick(&self) -> TickReport {
        let mut report = TickReport::default();
        for _ in 0..MAX_DRAIN_PASSES {
            let now = self.clock.now();
            report.beat = now;
            let due = self.queue().drain_due(now);
            if due.is_empty() {
                break;
            }
            for entry in due {
                match entry.action.run() {
                    Ok(()) => report.fired += 1,
                    Err(reason) => report.failures.push(self.report_failure(&entry, reason)),
                }
            }
        }
        report
    }

    fn report_failure(&self, entry: &ScheduledEntry, reason: String) -> SchedulerError {
        let owner = entry
            .owner
            .map(|o| format!(" (owned by {o})"))
            .unwrap_or_default();
        let label = entry.action.label().to_owned();
        self.notifier.notify(ClockNotification::ActionFailed {
            label: label.clone(),
            beat: entry.due_beat,
            reason: reason.clone(),
        });
        let error = SchedulerError::ActionFailed {
            label,
            beat: entry.due_beat,
            reason,
        };
        log_at_beat!(Severity::Error, entry.due_beat, "{error}{owner}");
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualTime, Meter};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn scheduler() -> (Arc<ManualTime>, Scheduler) {
        let time = Arc::new(ManualTime::new(0));
        let clock = Arc::new(BeatClock::new(time.clone(), 60.0, Meter::default()).unwrap());
        (time, Scheduler::new(clock, Arc::new(Notifier::new())))
    }

    #[test]
    fn entry_fires_once_when_due() {
        let (time, scheduler) = scheduler();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        scheduler
            .schedule_at(2.0, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        time.advance(Duration::from_millis(1999));
        assert_eq!(scheduler.tick().fired, 0);
        time.advance(Duration::from_millis(1));
        assert_eq!(scheduler.tick().fired, 1);
        time.advance(Duration::from_secs(5));
        assert_eq!(scheduler.tick().fired, 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_action_does_not_stop_the_tick() {
        let (time, scheduler) = scheduler();
        let notifications = scheduler.notifier.subscribe();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        scheduler
            .schedule_at(1.0, Action::new(|| panic!("oops")).labeled("broken"))
            .unwrap();
        scheduler
            .schedule_at(1.0, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        time.advance(Duration::from_secs(1));
        let report = scheduler.tick();
        assert_eq!((report.fired, report.failed()), (1, 1));
        assert_eq!(
            report.failures[0].to_string(),
            "Action 'broken' failed at beat 1.000: panicked: oops"
        );
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(matches!(
            notifications.try_recv(),
            Ok(ClockNotification::ActionFailed { label, beat, .. }) if label == "broken" && beat == 1.0
        ));
    }

    #[test]
    fn already_due_follow_ups_fire_in_the_same_tick() {
        let (time, scheduler) = scheduler();
        let scheduler = Arc::new(scheduler);
        let hits = Arc::new(AtomicUsize::new(0));
        let inner_scheduler = scheduler.clone();
        let counter = hits.clone();
        scheduler
            .schedule_at(1.0, move || {
                let counter = counter.clone();
                let _ = inner_scheduler.schedule_at(1.0, move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            })
            .unwrap();

        time.advance(Duration::from_secs(1));
        assert_eq!(scheduler.tick().fired, 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn schedule_after_is_relative_to_now() {
        let (time, scheduler) = scheduler();
        time.advance(Duration::from_secs(3));
        scheduler.schedule_after(2.0, || ()).unwrap();
        assert_eq!(scheduler.next_due(), Some(5.0));
        assert!(scheduler.schedule_at(f64::NAN, || ()).is_err());
    }
}
