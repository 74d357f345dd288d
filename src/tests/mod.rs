use std::sync::{Arc, Mutex};

use crate::{
    TempoClock,
    clock::{BeatClock, ManualTime},
    config::ClockConfig,
    schedule::{Action, TickReport},
    sync::{SessionSnapshot, TempoSession},
};

mod points;
mod sync_session;

/// What the fake tempo session reports and remembers.
#[derive(Debug, Clone)]
pub struct Remote {
    pub tempo: f64,
    pub beat: f64,
    pub peers: usize,
    pub connectable: bool,
    pub reachable: bool,
    pub connected_with: Option<f64>,
    pub proposed: Vec<f64>,
}

impl Default for Remote {
    fn default() -> Self {
        Remote {
            tempo: 60.0,
            beat: 0.0,
            peers: 1,
            connectable: true,
            reachable: true,
            connected_with: None,
            proposed: Vec::new(),
        }
    }
}

pub struct FakeSession {
    remote: Arc<Mutex<Remote>>,
}

impl TempoSession for FakeSession {
    fn name(&self) -> &str {
        "fake"
    }

    fn connect(&mut self, tempo: f64, _quantum: f64) -> anyhow::Result<()> {
        let mut remote = self.remote.lock().unwrap();
        if !remote.connectable {
            anyhow::bail!("network down");
        }
        remote.connected_with = Some(tempo);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.remote.lock().unwrap().connected_with = None;
    }

    fn capture(&mut self, quantum: f64) -> anyhow::Result<SessionSnapshot> {
        let remote = self.remote.lock().unwrap();
        if !remote.reachable {
            anyhow::bail!("session timed out");
        }
        Ok(SessionSnapshot {
            tempo: remote.tempo,
            beat: remote.beat,
            phase: remote.beat.rem_euclid(quantum),
            peers: remote.peers,
        })
    }

    fn propose_tempo(&mut self, tempo: f64) -> anyhow::Result<()> {
        let mut remote = self.remote.lock().unwrap();
        remote.proposed.push(tempo);
        remote.tempo = tempo;
        Ok(())
    }
}

/// A clock at 60 bpm in 4/4, so that one beat lasts one second, driven by
/// hand over a manual time source.
pub struct Fixture {
    pub time: Arc<ManualTime>,
    pub clock: TempoClock,
    pub remote: Arc<Mutex<Remote>>,
    fired: Arc<Mutex<Vec<(String, f64)>>>,
}

pub fn fixture() -> Fixture {
    let mut config = ClockConfig::default();
    config.clock.tempo = 60.0;
    config.driver.realtime_priority = false;
    fixture_with(config)
}

pub fn fixture_with(config: ClockConfig) -> Fixture {
    let time = Arc::new(ManualTime::new(0));
    let remote = Arc::new(Mutex::new(Remote::default()));
    let session = FakeSession {
        remote: remote.clone(),
    };
    let clock = TempoClock::with_parts(&config, time.clone(), Box::new(session)).unwrap();
    Fixture {
        time,
        clock,
        remote,
        fired: Arc::new(Mutex::new(Vec::new())),
    }
}

impl Fixture {
    pub fn beat_clock(&self) -> &Arc<BeatClock> {
        self.clock.clock()
    }

    /// Moves wall-clock time to where the timeline reads `beat`, then ticks.
    pub fn advance_to(&self, beat: f64) -> TickReport {
        self.time.set(self.beat_clock().date_at_beat(beat));
        self.clock.tick()
    }

    /// Ticks on every multiple of `step` up to and including `until`.
    pub fn run_until(&self, until: f64, step: f64) {
        let mut beat = self.clock.now();
        while beat < until {
            beat = (((beat / step).floor() + 1.0) * step).min(until);
            self.advance_to(beat);
        }
    }

    /// An action recording its name and the beat at which it ran.
    pub fn recorder(&self, name: &str) -> Action {
        let clock = self.beat_clock().clone();
        let fired = self.fired.clone();
        let label = name.to_owned();
        Action::new(move || {
            fired.lock().unwrap().push((label.clone(), clock.now()));
        })
        .labeled(name)
    }

    pub fn fired(&self) -> Vec<(String, f64)> {
        self.fired.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.fired().into_iter().map(|(name, _)| name).collect()
    }

    pub fn beats_of(&self, name: &str) -> Vec<f64> {
        self.fired()
            .into_iter()
            .filter(|(fired, _)| fired == name)
            .map(|(_, beat)| beat)
            .collect()
    }

    pub fn set_remote(&self, update: impl FnOnce(&mut Remote)) {
        update(&mut self.remote.lock().unwrap());
    }
}

pub fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}
