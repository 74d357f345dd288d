use anyhow::anyhow;
use serde::{Deserialize, Serialize};

/// State of the remote session read at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub tempo: f64,
    /// Session beat, aligned to the quantum used for the capture.
    pub beat: f64,
    /// Position within the quantum, in `[0, quantum)`.
    pub phase: f64,
    pub peers: usize,
}

/// Transport to a shared tempo session.
///
/// Implementations only move data. Deciding how the local clock follows
/// the session is done by the sync adapter.
pub trait TempoSession: Send {
    fn name(&self) -> &str;

    /// Joins the session, offering `tempo` if nobody else is there yet.
    fn connect(&mut self, tempo: f64, quantum: f64) -> anyhow::Result<()>;

    fn disconnect(&mut self);

    fn capture(&mut self, quantum: f64) -> anyhow::Result<SessionSnapshot>;

    /// Asks the session to move to `tempo`.
    fn propose_tempo(&mut self, tempo: f64) -> anyhow::Result<()>;
}

/// Session used when no transport is available. It never connects.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineSession;

impl TempoSession for OfflineSession {
    fn name(&self) -> &str {
        "offline"
    }

    fn connect(&mut self, _tempo: f64, _quantum: f64) -> anyhow::Result<()> {
        Err(anyhow!("no tempo-sync transport is available in this build"))
    }

    fn disconnect(&mut self) {}

    fn capture(&mut self, _quantum: f64) -> anyhow::Result<SessionSnapshot> {
        Err(anyhow!("not connected"))
    }

    fn propose_tempo(&mut self, _tempo: f64) -> anyhow::Result<()> {
        Err(anyhow!("not connected"))
    }
}
