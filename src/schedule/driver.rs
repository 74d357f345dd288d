use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thread_priority::{ThreadBuilder, ThreadPriority};

use crate::{
    clock::{NEVER, SyncTime},
    error::{Result, SchedulerError},
    log_debug, log_info, log_warn,
};

pub const DEFAULT_TICK_INTERVAL_MICROS: SyncTime = 2_000;
pub const ACTIVE_WAITING_SWITCH_MICROS: SyncTime = 300;

fn default_tick_interval() -> SyncTime {
    DEFAULT_TICK_INTERVAL_MICROS
}

fn default_active_wait() -> SyncTime {
    ACTIVE_WAITING_SWITCH_MICROS
}

fn default_realtime_priority() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Longest the loop sleeps between two ticks.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_micros: SyncTime,
    /// Spin instead of sleeping when the next deadline is this close.
    #[serde(default = "default_active_wait")]
    pub active_wait_micros: SyncTime,
    #[serde(default = "default_realtime_priority")]
    pub realtime_priority: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            tick_interval_micros: default_tick_interval(),
            active_wait_micros: default_active_wait(),
            realtime_priority: default_realtime_priority(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverMessage {
    /// Something was queued ahead of the current head, recompute the deadline.
    Wake,
    Shutdown,
}

/// Work the driver loop performs on each wake up.
pub trait Driven: Send + Sync + 'static {
    /// Current wall-clock date, in the same base as `next_deadline`.
    fn now_micros(&self) -> SyncTime;

    /// Date of the next thing that needs doing, `NEVER` if nothing is pending.
    fn next_deadline(&self) -> SyncTime;

    /// Fires due entries and runs periodic housekeeping.
    fn pulse(&self);
}

struct Driver {
    target: Arc<dyn Driven>,
    commands: Receiver<DriverMessage>,
    config: DriverConfig,
}

impl Driver {
    fn live(&self) {
        log_info!("Driver loop started at {}", self.target.now_micros());
        let tick = self.config.tick_interval_micros.max(1);
        loop {
            let now = self.target.now_micros();
            let deadline = self.target.next_deadline().min(now.saturating_add(tick));
            let remaining = deadline
                .saturating_sub(now)
                .saturating_sub(self.config.active_wait_micros);
            match self.commands.recv_timeout(Duration::from_micros(remaining)) {
                Ok(DriverMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(DriverMessage::Wake) | Err(RecvTimeoutError::Timeout) => (),
            }
            self.wait_actively();
            self.target.pulse();
        }
        log_info!("Driver loop stopped");
    }

    fn wait_actively(&self) {
        let next = self.target.next_deadline();
        if next == NEVER {
            return;
        }
        let mut time = self.target.now_micros();
        while next > time && next - time <= self.config.active_wait_micros {
            std::hint::spin_loop();
            time = self.target.now_micros();
        }
    }
}

/// Owns the driver thread. Dropping the handle stops the loop.
pub struct DriverHandle {
    sender: Sender<DriverMessage>,
    thread: Option<JoinHandle<()>>,
}

impl DriverHandle {
    /// Starts the driver loop on a dedicated thread.
    pub fn spawn(target: Arc<dyn Driven>, config: DriverConfig) -> Result<Self> {
        let (sender, commands) = crossbeam_channel::unbounded();
        let mut builder = ThreadBuilder::default().name("tempoclock-driver");
        if config.realtime_priority {
            builder = builder.priority(ThreadPriority::Max);
        }
        let thread = builder
            .spawn(move |priority| {
                if let Err(e) = priority {
                    log_warn!("Driver loop running without raised priority: {:?}", e);
                }
                Driver {
                    target,
                    commands,
                    config,
                }
                .live();
            })
            .map_err(|e| SchedulerError::DriverUnavailable(e.to_string()))?;
        Ok(DriverHandle {
            sender,
            thread: Some(thread),
        })
    }

    pub fn sender(&self) -> Sender<DriverMessage> {
        self.sender.clone()
    }

    pub fn wake(&self) {
        let _ = self.sender.send(DriverMessage::Wake);
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Asks the loop to exit and waits for it.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.sender.send(DriverMessage::Shutdown);
        if thread.join().is_err() {
            log_warn!("Driver thread panicked while stopping");
        } else {
            log_debug!("Driver thread joined");
        }
    }
}

impl Drop for DriverHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    struct Counter {
        start: Instant,
        pulses: AtomicUsize,
    }

    impl Driven for Counter {
        fn now_micros(&self) -> SyncTime {
            self.start.elapsed().as_micros() as SyncTime
        }

        fn next_deadline(&self) -> SyncTime {
            NEVER
        }

        fn pulse(&self) {
            self.pulses.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn loop_pulses_until_stopped() {
        let counter = Arc::new(Counter {
            start: Instant::now(),
            pulses: AtomicUsize::new(0),
        });
        let config = DriverConfig {
            tick_interval_micros: 500,
            realtime_priority: false,
            ..DriverConfig::default()
        };
        let mut handle = DriverHandle::spawn(counter.clone(), config).unwrap();
        assert!(handle.is_running());

        let deadline = Instant::now() + Duration::from_secs(5);
        while counter.pulses.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        handle.stop();

        let after_stop = counter.pulses.load(Ordering::SeqCst);
        assert!(after_stop >= 3);
        assert!(!handle.is_running());
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(counter.pulses.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn config_fills_missing_fields() {
        let config: DriverConfig = toml::from_str("tick_interval_micros = 1000").unwrap();
        assert_eq!(config.tick_interval_micros, 1000);
        assert_eq!(config.active_wait_micros, ACTIVE_WAITING_SWITCH_MICROS);
        assert!(config.realtime_priority);
    }
}
