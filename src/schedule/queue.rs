use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::fmt::Display;

use crate::point::PointId;
use crate::schedule::action::Action;

/// Identifies one queued entry, for targeted cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(u64);

impl Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "entry#{}", self.0)
    }
}

/// Ordering key: due beat first, then priority entries, then submission order.
#[derive(Debug, Clone, Copy)]
struct EntryKey {
    beat: f64,
    priority: bool,
    seq: u64,
}

impl PartialEq for EntryKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for EntryKey {}

impl PartialOrd for EntryKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EntryKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.beat
            .total_cmp(&other.beat)
            .then_with(|| other.priority.cmp(&self.priority))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

#[derive(Debug, Clone)]
pub struct ScheduledEntry {
    pub id: EntryId,
    pub due_beat: f64,
    pub action: Action,
    /// Point this entry was scheduled for, if any.
    pub owner: Option<PointId>,
}

/// Entries ordered by due beat, FIFO among equal beats.
#[derive(Debug, Default)]
pub struct SchedulingQueue {
    entries: BTreeMap<EntryKey, ScheduledEntry>,
    next_seq: u64,
}

impl SchedulingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, due_beat: f64, action: Action, owner: Option<PointId>) -> EntryId {
        self.insert(due_beat, action, owner, false)
    }

    /// Queues an entry that fires before every non-priority entry due at
    /// the same beat.
    pub fn push_priority(&mut self, due_beat: f64, action: Action) -> EntryId {
        self.insert(due_beat, action, None, true)
    }

    fn insert(
        &mut self,
        due_beat: f64,
        action: Action,
        owner: Option<PointId>,
        priority: bool,
    ) -> EntryId {
        let seq = self.next_seq;
        self.next_seq += 1;
        let id = EntryId(seq);
        self.entries.insert(
            EntryKey {
                beat: due_beat,
                priority,
                seq,
            },
            ScheduledEntry {
                id,
                due_beat,
                action,
                owner,
            },
        );
        id
    }

    /// Removes and returns every entry due at or before `beat`, in firing order.
    pub fn drain_due(&mut self, beat: f64) -> Vec<ScheduledEntry> {
        let mut due = Vec::new();
        while let Some(entry) = self.entries.first_entry() {
            if entry.key().beat > beat {
                break;
            }
            due.push(entry.remove());
        }
        due
    }

    /// Beat of the queue head.
    pub fn next_due(&self) -> Option<f64> {
        self.entries.first_key_value().map(|(key, _)| key.beat)
    }

    pub fn cancel_owner(&mut self, owner: PointId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.owner != Some(owner));
        before - self.entries.len()
    }

    pub fn cancel_owners(&mut self, owners: &HashSet<PointId>) -> usize {
        if owners.is_empty() {
            return 0;
        }
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| !entry.owner.is_some_and(|o| owners.contains(&o)));
        before - self.entries.len()
    }

    pub fn remove(&mut self, id: EntryId) -> bool {
        let key = self
            .entries
            .iter()
            .find(|(_, entry)| entry.id == id)
            .map(|(key, _)| *key);
        key.is_some_and(|key| self.entries.remove(&key).is_some())
    }

    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
