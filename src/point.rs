//! Points in time: beats that can be named, combined and acted upon before
//! they are known.
//!
//! A [`PointInTime`] is a cheap handle into the [`PointRegistry`] of the
//! clock that created it. Arithmetic on handles (`p + 4.0`, `p * 2.0`,
//! `p + q`, `16.0 - p`) creates derived points that resolve as soon as
//! every point they depend on has a beat. Actions attached to a point are
//! queued on the scheduler each time the point resolves.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::{Debug, Display};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::{
    error::{Result, SchedulerError, check_beat, check_period},
    log_debug,
    schedule::{Action, Scheduler},
};

pub mod arena;
mod ops;

pub use arena::{Derivation, Op, Operand};
use arena::{PointArena, Resolution};

/// Index of a point in its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PointId(usize);

impl PointId {
    pub fn from_index(index: usize) -> Self {
        PointId(index)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

impl Display for PointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pit#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PointKind {
    /// Resolves once. Binding it again is an error.
    OneShot,
    /// Every binding fires the attached actions again.
    Persistent,
    /// Rebinds itself `period` beats after each resolution until cleared.
    Recurring { period: f64 },
    /// Computed from other points.
    Derived,
}

/// Owns every point created by one clock.
///
/// The arena lock is never held while the scheduler queue lock is taken:
/// resolutions are computed first, then queued.
pub struct PointRegistry {
    arena: Mutex<PointArena>,
    scheduler: Arc<Scheduler>,
    this: Weak<PointRegistry>,
}

impl PointRegistry {
    pub fn new(scheduler: Arc<Scheduler>) -> Arc<Self> {
        Arc::new_cyclic(|this| PointRegistry {
            arena: Mutex::new(PointArena::new()),
            scheduler,
            this: this.clone(),
        })
    }

    fn arena(&self) -> MutexGuard<'_, PointArena> {
        self.arena.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle(self: &Arc<Self>, id: PointId) -> PointInTime {
        PointInTime {
            id,
            registry: Arc::clone(self),
        }
    }

    pub fn one_shot(self: &Arc<Self>) -> PointInTime {
        let id = self.arena().insert(PointKind::OneShot);
        self.handle(id)
    }

    pub fn persistent(self: &Arc<Self>) -> PointInTime {
        let id = self.arena().insert(PointKind::Persistent);
        self.handle(id)
    }

    pub fn recurring(self: &Arc<Self>, period: f64) -> Result<PointInTime> {
        let period = check_period(period)?;
        let id = self.arena().insert(PointKind::Recurring { period });
        Ok(self.handle(id))
    }

    fn derive(self: &Arc<Self>, derivation: Derivation) -> PointInTime {
        let id = self.arena().derive(derivation);
        self.handle(id)
    }

    /// Number of points ever created.
    pub fn len(&self) -> usize {
        self.arena().len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena().is_empty()
    }

    pub fn beat(&self, id: PointId) -> Option<f64> {
        self.arena().beat(id)
    }

    pub fn kind(&self, id: PointId) -> PointKind {
        self.arena().kind(id)
    }

    pub fn resolutions(&self, id: PointId) -> u64 {
        self.arena().resolutions(id)
    }

    pub fn derivation(&self, id: PointId) -> Option<Derivation> {
        self.arena().derivation(id)
    }

    /// Points derived from `id`, directly or not.
    pub fn descendants(&self, id: PointId) -> Vec<PointId> {
        let mut subtree = self.arena().subtree(id);
        subtree.remove(0);
        subtree
    }

    /// Binds a point on behalf of user code.
    ///
    /// One-shot points (and points derived only from one-shots) accept a
    /// single binding. Rebinding a persistent point keeps entries from the
    /// previous binding queued. Rebinding a recurring point restarts its
    /// cycle from `beat`.
    ///
    /// The check, the reset and the resolution happen under one arena lock,
    /// so concurrent binds of a one-shot point cannot both succeed.
    pub fn bind(&self, id: PointId, beat: f64) -> Result<()> {
        let beat = check_beat(beat)?;
        let (cancelled, resolution) = {
            let mut arena = self.arena();
            if let Some(current) = arena.beat(id) {
                if !arena.is_rebindable(id) {
                    return Err(SchedulerError::PointAlreadyBound { point: id, beat: current });
                }
            }
            let cancelled = match arena.kind(id) {
                PointKind::Recurring { .. } => arena.reset_subtree(id),
                _ => Vec::new(),
            };
            (cancelled, arena.resolve(id, beat))
        };
        if !cancelled.is_empty() {
            self.scheduler
                .cancel_owners(&cancelled.into_iter().collect::<HashSet<_>>());
        }
        log_debug!(
            "Point {} bound to beat {:.3}, queuing {} actions",
            id,
            beat,
            resolution.entries.len()
        );
        self.enqueue(id, resolution);
        Ok(())
    }

    /// Next cycle of a recurring point. Does nothing if the point was
    /// cleared or rebound after `live` was captured.
    fn rearm(&self, id: PointId, beat: f64, live: &Arc<AtomicBool>) {
        let resolution = self.arena().rearm(id, beat, live);
        self.enqueue(id, resolution);
    }

    fn enqueue(&self, id: PointId, resolution: Resolution) {
        let Resolution { mut entries, rearm } = resolution;
        if let Some((next_beat, live)) = rearm {
            let registry = self.this.clone();
            let flag = live.clone();
            let rearm = Action::new(move || {
                if let Some(registry) = registry.upgrade() {
                    registry.rearm(id, next_beat, &flag);
                }
            })
            .labeled(format!("rearm {id}"))
            .guarded(move || live.load(Ordering::Acquire));
            entries.push((next_beat, rearm, Some(id)));
        }
        if !entries.is_empty() {
            self.scheduler.schedule_batch(entries);
        }
    }

    pub fn add_action(&self, id: PointId, action: Action) {
        let now = self.scheduler.clock().now();
        let entry = self.arena().add_action(id, action, now);
        if let Some(entry) = entry {
            self.scheduler.schedule_batch([entry]);
        }
    }

    /// Stops `id` and everything derived from it: queued entries are
    /// removed, in-flight ones become no-ops and the points return to the
    /// unbound state. Attached actions are kept.
    pub fn clear(&self, id: PointId) -> usize {
        let subtree: HashSet<PointId> = self.arena().reset_subtree(id).into_iter().collect();
        self.scheduler.cancel_owners(&subtree)
    }

    /// Resets every point. Queue entries are left to the caller.
    pub fn clear_all(&self) {
        self.arena().reset_all();
    }
}

/// Handle to a point of a [`PointRegistry`].
///
/// Dropping the handle does not remove the point or its pending actions.
#[derive(Clone)]
pub struct PointInTime {
    id: PointId,
    registry: Arc<PointRegistry>,
}

impl PointInTime {
    pub fn id(&self) -> PointId {
        self.id
    }

    pub fn beat(&self) -> Option<f64> {
        self.registry.beat(self.id)
    }

    pub fn is_bound(&self) -> bool {
        self.beat().is_some()
    }

    pub fn kind(&self) -> PointKind {
        self.registry.kind(self.id)
    }

    /// How many times this point received a beat.
    pub fn resolutions(&self) -> u64 {
        self.registry.resolutions(self.id)
    }

    pub fn bind(&self, beat: f64) -> Result<()> {
        self.registry.bind(self.id, beat)
    }

    /// Runs `action` whenever this point resolves.
    pub fn add_action(&self, action: impl Into<Action>) -> &Self {
        self.registry.add_action(self.id, action.into());
        self
    }

    pub fn clear(&self) -> usize {
        self.registry.clear(self.id)
    }

    pub fn descendants(&self) -> Vec<PointId> {
        self.registry.descendants(self.id)
    }

    pub fn registry(&self) -> &Arc<PointRegistry> {
        &self.registry
    }

    fn combine(&self, op: Op, lhs: Operand, rhs: Operand, other: Option<&PointInTime>) -> PointInTime {
        if let Some(other) = other {
            assert!(
                Arc::ptr_eq(&self.registry, &other.registry),
                "cannot combine points {} and {} from different clocks",
                self.id,
                other.id
            );
        }
        self.registry.derive(Derivation { op, lhs, rhs })
    }
}

impl Debug for PointInTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PointInTime")
            .field("id", &self.id)
            .field("beat", &self.beat())
            .finish()
    }
}

impl PartialEq for PointInTime {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Arc::ptr_eq(&self.registry, &other.registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{BeatClock, ManualTime, Meter};
    use crate::notification::Notifier;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    fn registry() -> (Arc<ManualTime>, Arc<Scheduler>, Arc<PointRegistry>) {
        let time = Arc::new(ManualTime::new(0));
        let clock = Arc::new(BeatClock::new(time.clone(), 60.0, Meter::default()).unwrap());
        let scheduler = Arc::new(Scheduler::new(clock, Arc::new(Notifier::new())));
        (time, scheduler.clone(), PointRegistry::new(scheduler))
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
        let hits = Arc::new(AtomicUsize::new(0));
        let inner = hits.clone();
        (hits, move || {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn one_shot_refuses_second_binding() {
        let (_, _, registry) = registry();
        let p = registry.one_shot();
        p.bind(4.0).unwrap();
        assert_eq!(
            p.bind(8.0),
            Err(SchedulerError::PointAlreadyBound { point: p.id(), beat: 4.0 })
        );
        assert_eq!(p.beat(), Some(4.0));
    }

    #[test]
    fn actions_queue_on_resolution() {
        let (time, scheduler, registry) = registry();
        let p = registry.one_shot();
        let (hits, action) = counter();
        p.add_action(action);
        assert!(scheduler.is_empty());

        p.bind(2.0).unwrap();
        assert_eq!(scheduler.next_due(), Some(2.0));
        time.advance(Duration::from_secs(2));
        scheduler.tick();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clear_removes_queued_entries_of_the_subtree() {
        let (_, scheduler, registry) = registry();
        let p = registry.persistent();
        let later = &p + 4.0;
        p.add_action(|| ());
        later.add_action(|| ());
        scheduler.schedule_at(3.0, || ()).unwrap();

        p.bind(1.0).unwrap();
        assert_eq!(scheduler.len(), 3);
        assert_eq!(p.clear(), 2);
        assert_eq!(scheduler.len(), 1);
        assert!(!later.is_bound());
        assert_eq!(p.clear(), 0);
    }

    #[test]
    fn recurring_point_rearms_itself() {
        let (time, scheduler, registry) = registry();
        let p = registry.recurring(4.0).unwrap();
        let (hits, action) = counter();
        p.add_action(action);
        p.bind(1.0).unwrap();

        for _ in 0..3 {
            time.advance(Duration::from_secs(4));
            scheduler.tick();
        }
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(p.beat(), Some(9.0));
        assert!(registry.recurring(0.0).is_err());
    }

    #[test]
    fn clear_stops_a_rearm_already_running_on_the_driver() {
        let (time, scheduler, registry) = registry();
        let p = registry.recurring(4.0).unwrap();
        let (hits, action) = counter();
        p.add_action(action);
        p.bind(1.0).unwrap();
        time.advance(Duration::from_secs(1));
        scheduler.tick();
        time.advance(Duration::from_secs(4));

        // The driver takes the rearm due at beat 5 off the queue, then waits
        // on the arena while the point is cleared.
        let cleared: HashSet<PointId> = {
            let mut arena = registry.arena();
            let driver = {
                let scheduler = scheduler.clone();
                thread::spawn(move || scheduler.tick())
            };
            let deadline = Instant::now() + Duration::from_secs(5);
            while !scheduler.is_empty() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            let cleared = arena.reset_subtree(p.id()).into_iter().collect();
            drop(arena);
            driver.join().unwrap();
            cleared
        };
        scheduler.cancel_owners(&cleared);

        for _ in 0..20 {
            time.advance(Duration::from_secs(1));
            scheduler.tick();
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(p.beat(), None);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn concurrent_binds_of_a_one_shot_point_resolve_once() {
        let (_, scheduler, registry) = registry();
        let p = registry.one_shot();
        p.add_action(|| ());
        let start = Arc::new(Barrier::new(8));
        let binders: Vec<_> = (0..8)
            .map(|i| {
                let p = p.clone();
                let start = start.clone();
                thread::spawn(move || {
                    start.wait();
                    p.bind(i as f64 + 1.0).is_ok()
                })
            })
            .collect();

        let bound = binders
            .into_iter()
            .map(|binder| binder.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(bound, 1);
        assert_eq!(p.resolutions(), 1);
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn descendants_include_indirect_points() {
        let (_, _, registry) = registry();
        let p = registry.one_shot();
        let a = &p + 1.0;
        let b = &a * 2.0;
        let other = registry.one_shot();
        assert_eq!(p.descendants(), vec![a.id(), b.id()]);
        assert!(other.descendants().is_empty());
    }
}
