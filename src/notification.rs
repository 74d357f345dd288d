use crossbeam_channel::{Receiver, Sender, unbounded};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};

use crate::clock::Meter;

/// Enum representing notifications broadcast by the clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClockNotification {
    /// Tempo changed, effective from `at_beat`.
    TempoChanged { bpm: f64, at_beat: f64 },
    MeterChanged(Meter),
    /// The timeline was moved to this beat.
    TimeSet(f64),
    SyncEnabled { peers: usize },
    SyncDisabled,
    /// A scheduled action returned an error or panicked.
    ActionFailed {
        label: String,
        beat: f64,
        reason: String,
    },
    /// Every queued entry and point was cleared.
    Cleared,
}

/// Fans notifications out to every live subscriber.
#[derive(Debug, Default)]
pub struct Notifier {
    subscribers: Mutex<Vec<Sender<ClockNotification>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<ClockNotification> {
        let (tx, rx) = unbounded();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Sends to every subscriber, forgetting the ones that hung up.
    pub fn notify(&self, notification: ClockNotification) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(notification.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
