use super::{close, fixture, fixture_with};
use crate::{ClockConfig, ClockNotification, SchedulerError};

#[test]
fn disabled_sync_ignores_the_remote_session() {
    let f = fixture();
    f.set_remote(|r| r.tempo = 200.0);
    f.run_until(4.0, 1.0);

    let status = f.clock.sync_status();
    assert!(!status.enabled);
    assert_eq!(status.peer_count, 0);
    assert_eq!(status.tempo, 60.0);
    assert_eq!(f.clock.bpm(), 60.0);
}

#[test]
fn enable_connects_with_the_local_tempo() {
    let f = fixture();
    let notifications = f.clock.subscribe();
    f.set_remote(|r| r.peers = 3);

    let status = f.clock.enable_sync(0.0, 1.0).unwrap();
    assert!(status.enabled);
    assert_eq!(status.peer_count, 3);
    assert_eq!(status.quantum, 4.0);
    assert_eq!(f.remote.lock().unwrap().connected_with, Some(60.0));
    assert_eq!(
        notifications.try_recv(),
        Ok(ClockNotification::SyncEnabled { peers: 3 })
    );

    assert!(f.clock.disable_sync());
    assert!(!f.clock.disable_sync());
    assert!(!f.clock.sync_status().enabled);
    assert_eq!(f.remote.lock().unwrap().connected_with, None);
    assert_eq!(notifications.try_recv(), Ok(ClockNotification::SyncDisabled));
}

#[test]
fn unreachable_transport_leaves_the_clock_local() {
    let f = fixture();
    f.set_remote(|r| {
        r.connectable = false;
        r.tempo = 140.0;
    });

    assert!(matches!(
        f.clock.enable_sync(0.5, 1.0),
        Err(SchedulerError::SyncUnavailable(_))
    ));
    f.run_until(3.0, 1.0);
    assert!(!f.clock.sync_status().enabled);
    assert_eq!(f.clock.bpm(), 60.0);
}

#[test]
fn reconciliation_adopts_the_remote_tempo() {
    let f = fixture();
    let notifications = f.clock.subscribe();
    f.advance_to(1.0);
    f.set_remote(|r| {
        r.tempo = 90.0;
        r.beat = 1.0;
    });
    f.clock.enable_sync(0.0, 1.0).unwrap();
    let _ = notifications.try_recv();

    f.clock.tick();
    assert_eq!(f.clock.bpm(), 90.0);
    assert_eq!(f.clock.now(), 1.0);
    assert_eq!(
        notifications.try_recv(),
        Ok(ClockNotification::TempoChanged {
            bpm: 90.0,
            at_beat: 1.0
        })
    );

    f.set_remote(|r| r.tempo = 90.004);
    f.advance_to(2.0);
    assert_eq!(f.clock.bpm(), 90.0);
}

#[test]
fn phase_is_nudged_gradually_mid_bar() {
    let f = fixture();
    f.advance_to(1.0);
    f.set_remote(|r| r.beat = 1.1);
    f.clock.enable_sync(0.0, 1.0).unwrap();

    f.clock.tick();
    assert!(close(f.clock.now(), 1.025));

    f.set_remote(|r| r.beat = 3.5);
    f.advance_to(2.025);
    let nudge = f.clock.now() - 2.025;
    assert!(close(nudge, 0.25), "nudge was {nudge}");
}

#[test]
fn phase_offset_is_honoured_at_bar_start() {
    let f = fixture();
    f.advance_to(4.0);
    f.set_remote(|r| r.beat = 0.0);
    f.clock.enable_sync(0.5, 1.0).unwrap();

    f.clock.tick();
    assert!(close(f.clock.now(), 4.5));
    assert!(close(f.clock.sync_status().phase, 0.0));
}

#[test]
fn reconciliation_runs_every_interval() {
    let f = fixture();
    f.clock.enable_sync(0.0, 2.0).unwrap();
    assert_eq!(f.clock.clock().now(), 0.0);
    f.clock.tick();

    f.set_remote(|r| r.tempo = 61.0);
    f.advance_to(1.0);
    assert_eq!(f.clock.bpm(), 60.0);
    f.advance_to(2.0);
    assert_eq!(f.clock.bpm(), 61.0);
}

#[test]
fn transport_failures_are_retried() {
    let f = fixture();
    f.clock.enable_sync(0.0, 1.0).unwrap();
    f.set_remote(|r| {
        r.reachable = false;
        r.tempo = 100.0;
    });

    f.run_until(5.0, 1.0);
    let status = f.clock.sync_status();
    assert!(status.enabled);
    assert_eq!(status.consecutive_failures, 5);
    assert_eq!(f.clock.bpm(), 60.0);

    f.set_remote(|r| r.reachable = true);
    f.advance_to(6.0);
    assert_eq!(f.clock.sync_status().consecutive_failures, 0);
    assert_eq!(f.clock.bpm(), 100.0);
}

#[test]
fn local_tempo_changes_are_proposed_while_synced() {
    let f = fixture();
    f.clock.set_bpm(80.0).unwrap();
    assert!(f.remote.lock().unwrap().proposed.is_empty());

    f.clock.enable_sync(0.0, 1.0).unwrap();
    f.clock.set_bpm(100.0).unwrap();
    assert_eq!(f.remote.lock().unwrap().proposed, vec![100.0]);

    f.advance_to(1.0);
    assert_eq!(f.clock.bpm(), 100.0);
}

#[test]
fn configured_quantum_and_clear_keep_sync_running() {
    let mut config = ClockConfig::default();
    config.clock.tempo = 60.0;
    config.sync.quantum = Some(8.0);
    let f = fixture_with(config);
    f.clock.enable_sync_with_defaults().unwrap();
    assert_eq!(f.clock.sync_status().quantum, 8.0);
    assert_eq!(f.clock.sync_status().phase_offset, 0.5);

    f.clock.clear();
    assert!(f.clock.sync_status().enabled);
    f.set_remote(|r| r.tempo = 75.0);
    f.advance_to(1.0);
    assert_eq!(f.clock.bpm(), 75.0);
}
