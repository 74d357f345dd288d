pub mod clock;
pub mod config;
pub mod error;
pub mod log;
pub mod logger;
pub mod notification;
pub mod point;
pub mod schedule;
pub mod sync;
pub mod tempo_clock;

#[cfg(test)]
mod tests;

pub use clock::{BeatClock, Meter, TimeSpan};
pub use config::{ClockConfig, ConfigLoader};
pub use error::{Result, SchedulerError};
pub use log::{LogMessage, Severity};
pub use logger::get_logger;
pub use notification::ClockNotification;
pub use point::{PointId, PointInTime, PointKind};
pub use schedule::{Action, ActionResult, ActionTiming, EntryId, TickReport};
pub use sync::{SyncStatus, TempoSession};
pub use tempo_clock::TempoClock;

pub const DEFAULT_TEMPO: f64 = 120.0;
