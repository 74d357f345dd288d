use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::hash::{Hash, Hasher};

/// Represents the severity level of a log message.
///
/// Variants are ordered from most to least severe, so a message passes a
/// `min_severity` filter when `message.level <= min_severity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// The clock cannot keep running.
    Fatal,
    /// Something failed, the clock keeps running.
    Error,
    /// A potential issue or unexpected situation.
    Warn,
    /// Informational messages about the clock state.
    Info,
    /// Detailed messages useful for debugging timing.
    Debug,
}

impl Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Fatal => write!(f, "[FATAL]"),
            Severity::Error => write!(f, "[ERROR]"),
            Severity::Warn => write!(f, "[WARN]"),
            Severity::Info => write!(f, "[INFO]"),
            Severity::Debug => write!(f, "[DEBUG]"),
        }
    }
}

/// Represents a structured log message.
///
/// Contains a severity level, the beat the message relates to (if any), and
/// the message text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMessage {
    pub level: Severity,
    /// Beat at which the logged event happened, when it is tied to the timeline.
    pub beat: Option<f64>,
    pub msg: String,
}

impl Hash for LogMessage {
    /// The beat is not part of the hash, two identical messages logged at
    /// different beats hash the same.
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.level.hash(state);
        self.msg.hash(state);
    }
}

impl Display for LogMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.beat {
            Some(beat) => write!(f, "{} [beat {:.3}] {}", self.level, beat, self.msg),
            None => write!(f, "{} {}", self.level, self.msg),
        }
    }
}

impl LogMessage {
    pub fn new(level: Severity, msg: String) -> Self {
        LogMessage {
            level,
            beat: None,
            msg,
        }
    }

    /// Attaches the beat at which the logged event happened.
    pub fn at_beat(mut self, beat: f64) -> Self {
        self.beat = Some(beat);
        self
    }

    pub fn fatal(msg: String) -> Self {
        Self::new(Severity::Fatal, msg)
    }

    pub fn error(msg: String) -> Self {
        Self::new(Severity::Error, msg)
    }

    pub fn warn(msg: String) -> Self {
        Self::new(Severity::Warn, msg)
    }

    pub fn info(msg: String) -> Self {
        Self::new(Severity::Info, msg)
    }

    pub fn debug(msg: String) -> Self {
        Self::new(Severity::Debug, msg)
    }

    /// Returns true if this message passes a `min_severity` filter.
    pub fn passes(&self, min_severity: Severity) -> bool {
        self.level <= min_severity
    }
}
