use super::fixture;
use crate::{PointKind, SchedulerError};

#[test]
fn derived_points_resolve_when_their_parent_is_bound() {
    let f = fixture();
    let p = f.clock.point();
    let plus_four = &p + 4.0;
    let doubled = &p * 2.0;
    plus_four.add_action(f.recorder("p+4"));
    doubled.add_action(f.recorder("p*2"));
    assert_eq!(plus_four.beat(), None);
    assert_eq!(f.clock.pending(), 0);

    p.bind(10.0).unwrap();
    assert_eq!(plus_four.beat(), Some(14.0));
    assert_eq!(doubled.beat(), Some(20.0));
    assert_eq!(plus_four.kind(), PointKind::Derived);

    f.run_until(30.0, 1.0);
    assert_eq!(f.beats_of("p+4"), vec![14.0]);
    assert_eq!(f.beats_of("p*2"), vec![20.0]);
}

#[test]
fn reversed_scalar_operands() {
    let f = fixture();
    let p = f.clock.point();
    let before_end = 16.0 - &p;
    let ratio = 12.0 / &p;
    p.bind(4.0).unwrap();
    assert_eq!(before_end.beat(), Some(12.0));
    assert_eq!(ratio.beat(), Some(3.0));
}

#[test]
fn point_combined_with_point_waits_for_both() {
    let f = fixture();
    let start = f.clock.point();
    let length = f.clock.point();
    let end = &start + &length;
    end.add_action(f.recorder("end"));

    start.bind(2.0).unwrap();
    assert!(!end.is_bound());
    length.bind(6.0).unwrap();
    assert_eq!(end.beat(), Some(8.0));

    f.run_until(10.0, 1.0);
    assert_eq!(f.beats_of("end"), vec![8.0]);
}

#[test]
fn one_shot_point_binds_once() {
    let f = fixture();
    let p = f.clock.point();
    let child = &p + 1.0;
    p.add_action(f.recorder("once"));
    p.bind(2.0).unwrap();

    assert_eq!(
        p.bind(6.0),
        Err(SchedulerError::PointAlreadyBound {
            point: p.id(),
            beat: 2.0
        })
    );
    assert!(child.bind(9.0).is_err());
    f.run_until(10.0, 1.0);
    assert_eq!(f.beats_of("once"), vec![2.0]);
    assert_eq!(p.resolutions(), 1);
}

#[test]
fn action_added_after_binding_still_fires() {
    let f = fixture();
    let p = f.clock.point();
    p.bind(4.0).unwrap();
    p.add_action(f.recorder("late registration"));
    f.advance_to(6.0);
    p.add_action(f.recorder("after the fact"));
    f.clock.tick();
    assert_eq!(f.beats_of("late registration"), vec![6.0]);
    assert_eq!(f.beats_of("after the fact"), vec![6.0]);
}

#[test]
fn persistent_point_fires_on_every_binding() {
    let f = fixture();
    let drop = f.clock.persistent_point();
    let echo = &drop + 2.0;
    drop.add_action(f.recorder("drop"));
    echo.add_action(f.recorder("echo"));

    drop.bind(8.0).unwrap();
    f.run_until(16.0, 1.0);
    assert_eq!(f.beats_of("drop"), vec![8.0]);

    drop.bind(24.0).unwrap();
    assert_eq!(echo.beat(), Some(26.0));
    assert_eq!(f.beats_of("drop"), vec![8.0]);
    f.run_until(30.0, 1.0);

    assert_eq!(f.beats_of("drop"), vec![8.0, 24.0]);
    assert_eq!(f.beats_of("echo"), vec![10.0, 26.0]);
    assert_eq!(drop.resolutions(), 2);
}

#[test]
fn persistent_rebinding_keeps_earlier_entries() {
    let f = fixture();
    let p = f.clock.persistent_point();
    p.add_action(f.recorder("hit"));
    p.bind(4.0).unwrap();
    p.bind(6.0).unwrap();
    assert_eq!(p.beat(), Some(6.0));

    f.run_until(8.0, 1.0);
    assert_eq!(f.beats_of("hit"), vec![4.0, 6.0]);
}

#[test]
fn persistent_point_ignores_new_actions_for_a_past_beat() {
    let f = fixture();
    let p = f.clock.persistent_point();
    p.bind(2.0).unwrap();
    f.advance_to(3.0);
    p.add_action(f.recorder("next time"));
    f.run_until(5.0, 1.0);
    assert!(f.fired().is_empty());

    p.bind(6.0).unwrap();
    f.advance_to(6.0);
    assert_eq!(f.beats_of("next time"), vec![6.0]);
}

#[test]
fn recurring_point_fires_every_period_until_cleared() {
    let f = fixture();
    let p = f.clock.recurring_point(16.0).unwrap();
    let offbeat = &p + 2.0;
    p.add_action(f.recorder("loop"));
    offbeat.add_action(f.recorder("offbeat"));
    p.bind(4.0).unwrap();

    f.run_until(40.0, 1.0);
    assert_eq!(f.beats_of("loop"), vec![4.0, 20.0, 36.0]);
    assert_eq!(f.beats_of("offbeat"), vec![6.0, 22.0, 38.0]);

    p.clear();
    assert_eq!(f.clock.pending(), 0);
    f.run_until(120.0, 1.0);
    assert_eq!(f.beats_of("loop").len(), 3);
    assert_eq!(f.beats_of("offbeat").len(), 3);
}

#[test]
fn clearing_a_derived_point_drops_only_its_pending_entries() {
    let f = fixture();
    let p = f.clock.recurring_point(4.0).unwrap();
    let echo = &p + 1.0;
    p.add_action(f.recorder("loop"));
    echo.add_action(f.recorder("echo"));
    p.bind(1.0).unwrap();

    f.advance_to(1.0);
    f.advance_to(1.5);
    assert_eq!(echo.clear(), 1);
    f.run_until(12.0, 1.0);
    assert_eq!(f.beats_of("loop"), vec![1.0, 5.0, 9.0]);
    assert_eq!(f.beats_of("echo"), vec![6.0, 10.0]);
}

#[test]
fn rebinding_a_recurring_point_restarts_its_cycle() {
    let f = fixture();
    let p = f.clock.recurring_point(4.0).unwrap();
    p.add_action(f.recorder("loop"));
    p.bind(1.0).unwrap();
    f.run_until(2.0, 1.0);

    p.bind(3.5).unwrap();
    f.run_until(12.0, 0.5);
    assert_eq!(f.beats_of("loop"), vec![1.0, 3.5, 7.5, 11.5]);
}
