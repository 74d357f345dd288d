use anyhow::bail;
use rusty_link::{AblLink, SessionState};

use crate::sync::session::{SessionSnapshot, TempoSession};

/// Ableton Link transport.
///
/// The `AblLink` instance is created on first connection and kept across
/// disable/enable cycles, only its network activity is toggled.
#[derive(Default)]
pub struct LinkSession {
    link: Option<AblLink>,
}

impl LinkSession {
    pub fn new() -> Self {
        Self::default()
    }

    fn captured(&self) -> anyhow::Result<(&AblLink, SessionState)> {
        let Some(link) = self.link.as_ref().filter(|link| link.is_enabled()) else {
            bail!("Link is not enabled");
        };
        let mut state = SessionState::new();
        link.capture_app_session_state(&mut state);
        Ok((link, state))
    }
}

impl TempoSession for LinkSession {
    fn name(&self) -> &str {
        "Ableton Link"
    }

    fn connect(&mut self, tempo: f64, _quantum: f64) -> anyhow::Result<()> {
        let link = self.link.get_or_insert_with(|| AblLink::new(tempo));
        link.enable(true);
        link.enable_start_stop_sync(true);
        if link.num_peers() == 0 {
            let mut state = SessionState::new();
            link.capture_app_session_state(&mut state);
            state.set_tempo(tempo, link.clock_micros());
            link.commit_app_session_state(&state);
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(link) = &self.link {
            link.enable(false);
        }
    }

    fn capture(&mut self, quantum: f64) -> anyhow::Result<SessionSnapshot> {
        let (link, state) = self.captured()?;
        let date = link.clock_micros();
        Ok(SessionSnapshot {
            tempo: state.tempo(),
            beat: state.beat_at_time(date, quantum),
            phase: state.phase_at_time(date, quantum),
            peers: link.num_peers() as usize,
        })
    }

    fn propose_tempo(&mut self, tempo: f64) -> anyhow::Result<()> {
        let (link, mut state) = self.captured()?;
        state.set_tempo(tempo, link.clock_micros());
        link.commit_app_session_state(&state);
        Ok(())
    }
}
