//! End-to-end journeys through the alert engine.
//!
//! Each test drives the engine with a manual clock and recording fakes the
//! way a host would: background wakes, location fixes, delay records and
//! permission changes.

mod common;

use chrono::Duration;
use common::*;
use trainwake_core::delivery::NotificationKind;
use trainwake_core::trigger::FireReason;
use trainwake_core::{
    AlertPhase, CoreError, DelayStatus, EngineEvent, PermissionState, RouteIssue, SetupError,
    SubMode, Tier, Trigger,
};

fn fired(events: &[EngineEvent]) -> Vec<(NotificationKind, Option<FireReason>, Option<u32>)> {
    events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::NotificationFired {
                kind,
                reason,
                stations_remaining,
                ..
            } => Some((*kind, *reason, *stations_remaining)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn time_trigger_fires_once_at_threshold() {
    let mut h = Harness::new(at(9, 0));
    let id = h
        .engine
        .create_alert(draft(Trigger::TimeBeforeArrival { minutes: 5 }), &chuo_route())
        .await
        .unwrap();

    assert_eq!(h.engine.active_alerts()[0].phase, AlertPhase::Idle);
    assert_eq!(h.waker.last(), Some(at(9, 30)));

    h.wake_at(at(9, 30)).await;
    assert_eq!(h.engine.registry().snapshot(id).unwrap().phase, AlertPhase::Monitoring);

    h.wake_at(at_secs(10, 24, 59)).await;
    assert!(h.sink.delivered().is_empty());

    h.drain();
    h.wake_at(at(10, 25)).await;
    let events = h.drain();

    assert_eq!(
        fired(&events),
        vec![(NotificationKind::Primary, Some(FireReason::Time), Some(3))]
    );
    let primary = &h.sink.delivered()[0];
    assert_eq!(primary.params.station_name, "Shinjuku");
    assert_eq!(primary.params.minutes_remaining, Some(5));
    assert_eq!(primary.params.style, "gentle");

    assert!(events.contains(&EngineEvent::PhaseChanged {
        alert_id: id,
        from: AlertPhase::Fired,
        to: AlertPhase::Completed,
        at: at(10, 25),
    }));
    assert!(h.engine.registry().is_empty());
    assert!(!h.store.alerts()[0].active);

    h.wake_at(at(10, 26)).await;
    assert_eq!(h.sink.delivered().len(), 1);
}

#[tokio::test]
async fn snooze_counts_down_to_terminal_reminder() {
    let h = Harness::new(at(9, 0));
    h.engine
        .create_alert(snoozing(Trigger::TimeBeforeArrival { minutes: 5 }), &chuo_route())
        .await
        .unwrap();

    h.wake_at(at(10, 25)).await;
    assert_eq!(h.engine.active_alerts()[0].phase, AlertPhase::Escalating);

    for now in [
        at_secs(10, 25, 15),
        at_secs(10, 25, 30),
        at(10, 26),
        at_secs(10, 26, 30),
        at(10, 28),
        at(10, 29),
        at(10, 30),
    ] {
        h.wake_at(now).await;
    }

    let sent: Vec<_> = h
        .sink
        .delivered()
        .iter()
        .map(|r| (r.kind, r.params.stations_remaining))
        .collect();
    assert_eq!(
        sent,
        vec![
            (NotificationKind::Primary, Some(3)),
            (NotificationKind::Snooze, Some(3)),
            (NotificationKind::Snooze, Some(2)),
            (NotificationKind::Snooze, Some(1)),
            (NotificationKind::Terminal, Some(0)),
        ]
    );
    assert!(h.engine.registry().is_empty());
}

#[tokio::test]
async fn fresh_delay_shifts_the_fire_time() {
    let h = Harness::new(at(9, 0));
    h.engine
        .create_alert(draft(Trigger::TimeBeforeArrival { minutes: 5 }), &chuo_route())
        .await
        .unwrap();

    for now in [at(10, 20), at(10, 25), at(10, 30), at(10, 36)] {
        h.feed.set(delay(12, now));
        h.wake_at(now).await;
        assert!(h.sink.delivered().is_empty(), "fired early at {now}");
    }

    let snapshot = &h.engine.active_alerts()[0];
    assert_eq!(snapshot.adjusted_arrival, at(10, 42));
    assert_eq!(snapshot.delay_status, DelayStatus::Applied);

    h.feed.set(delay(12, at(10, 37)));
    h.wake_at(at(10, 37)).await;
    assert_eq!(h.sink.kinds(), vec![NotificationKind::Primary]);
    assert_eq!(h.sink.delivered()[0].params.minutes_remaining, Some(5));
}

#[tokio::test]
async fn stale_delay_is_ignored() {
    let h = Harness::new(at(9, 0));
    h.engine
        .create_alert(draft(Trigger::TimeBeforeArrival { minutes: 5 }), &chuo_route())
        .await
        .unwrap();
    h.wake_at(at(10, 20)).await;

    h.engine.ingest_delay(delay(12, at(10, 10))).await;
    let snapshot = &h.engine.active_alerts()[0];
    assert_eq!(snapshot.delay_status, DelayStatus::Stale);
    assert_eq!(snapshot.adjusted_arrival, at(10, 30));

    h.wake_at(at(10, 25)).await;
    assert_eq!(h.sink.kinds(), vec![NotificationKind::Primary]);
}

#[tokio::test]
async fn implausible_delay_is_reported_and_not_applied() {
    let mut h = Harness::new(at(9, 0));
    let id = h
        .engine
        .create_alert(draft(Trigger::TimeBeforeArrival { minutes: 5 }), &chuo_route())
        .await
        .unwrap();
    h.wake_at(at(10, 20)).await;
    h.drain();

    h.engine.ingest_delay(delay(600, at(10, 20))).await;

    assert!(h.drain().contains(&EngineEvent::DelaySuspect {
        alert_id: id,
        delay_minutes: 600,
        at: at(10, 20),
    }));
    let snapshot = h.engine.registry().snapshot(id).unwrap();
    assert_eq!(snapshot.delay_status, DelayStatus::Suspect { clamped_minutes: 180 });
    assert_eq!(snapshot.adjusted_arrival, at(10, 30));
}

#[tokio::test]
async fn permission_loss_falls_back_to_the_schedule() {
    let mut h = Harness::new(at(9, 0));
    let id = h
        .engine
        .create_alert(draft(Trigger::TimeBeforeArrival { minutes: 5 }), &chuo_route())
        .await
        .unwrap();
    h.wake_at(at(10, 0)).await;
    h.location_at(35.6860, 139.7302, at(10, 10)).await;
    assert_eq!(h.engine.active_alerts()[0].sub_mode, SubMode::Hybrid);
    h.drain();

    h.clock.set(at(10, 12));
    h.engine.on_permission_changed(PermissionState::Denied).await;

    assert!(h.drain().contains(&EngineEvent::SubModeChanged {
        alert_id: id,
        from: SubMode::Hybrid,
        to: SubMode::ScheduleOnly,
        at: at(10, 12),
    }));
    assert_eq!(h.provider.calls().last(), Some(&ProviderCall::Stop));
    let snapshot = h.engine.registry().snapshot(id).unwrap();
    assert!(snapshot.sensing_degraded);

    // A late fix right at the platform must not fire in schedule-only mode.
    h.location_at(35.6900, 139.7010, at(10, 15)).await;
    assert!(h.sink.delivered().is_empty());

    h.wake_at(at(10, 25)).await;
    assert_eq!(
        fired(&h.drain()),
        vec![(NotificationKind::Primary, Some(FireReason::Time), Some(3))]
    );
}

#[tokio::test]
async fn permission_regained_restores_hybrid() {
    let h = Harness::new(at(9, 0));
    let id = h
        .engine
        .create_alert(draft(Trigger::TimeBeforeArrival { minutes: 5 }), &chuo_route())
        .await
        .unwrap();
    h.wake_at(at(10, 0)).await;

    h.engine.on_permission_changed(PermissionState::Denied).await;
    assert_eq!(h.engine.registry().snapshot(id).unwrap().sub_mode, SubMode::ScheduleOnly);

    h.engine.on_permission_changed(PermissionState::Granted).await;
    assert_eq!(h.engine.registry().snapshot(id).unwrap().sub_mode, SubMode::Hybrid);
    assert!(h.engine.sampling().is_available().await);
}

#[tokio::test]
async fn proximity_fires_before_the_time_threshold() {
    let mut h = Harness::new(at(9, 0));
    h.engine
        .create_alert(draft(Trigger::TimeBeforeArrival { minutes: 5 }), &chuo_route())
        .await
        .unwrap();
    h.wake_at(at(10, 0)).await;
    h.drain();

    h.location_at(35.6900, 139.7010, at(10, 12)).await;

    let events = h.drain();
    let fired = fired(&events);
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].1, Some(FireReason::Proximity));

    h.wake_at(at(10, 25)).await;
    assert_eq!(h.sink.delivered().len(), 1);
}

#[tokio::test]
async fn station_count_uses_position_from_fixes() {
    let h = Harness::new(at(9, 0));
    h.engine
        .create_alert(
            draft(Trigger::StationsBeforeArrival { stations: 2 }),
            &chuo_route(),
        )
        .await
        .unwrap();
    h.wake_at(at(10, 0)).await;

    // Timetable says Ichigaya; the fix puts the train at Sendagaya already.
    h.location_at(35.6812, 139.7113, at(10, 16)).await;

    let sent = h.sink.delivered();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].params.stations_remaining, Some(2));
}

#[tokio::test]
async fn tier_changes_drive_the_sampling_profile() {
    let h = Harness::new(at(9, 0));
    let id = h
        .engine
        .create_alert(draft(Trigger::TimeBeforeArrival { minutes: 5 }), &chuo_route())
        .await
        .unwrap();
    h.wake_at(at(10, 0)).await;
    assert_eq!(h.waker.last(), Some(at(10, 1)));

    // Yoyogi: roughly 700 m out.
    h.location_at(35.6835, 139.7020, at(10, 5)).await;
    let snapshot = h.engine.registry().snapshot(id).unwrap();
    assert_eq!(snapshot.tier, Some(Tier::Near));
    assert_eq!(h.waker.last(), Some(at(10, 5) + Duration::seconds(15)));

    let profile = h.engine.sampling().active_profile().await.unwrap();
    assert_eq!(profile, h.engine.sampling().profile_for(Tier::Near, Default::default()));
}

#[tokio::test]
async fn shared_sampling_stream_starts_once() {
    let h = Harness::new(at(9, 0));
    let first = h
        .engine
        .create_alert(draft(Trigger::TimeBeforeArrival { minutes: 5 }), &chuo_route())
        .await
        .unwrap();
    let second = h
        .engine
        .create_alert(draft(Trigger::TimeBeforeArrival { minutes: 8 }), &chuo_route())
        .await
        .unwrap();

    h.wake_at(at(9, 30)).await;
    h.wake_at(at(9, 31)).await;
    for _ in 0..5 {
        h.engine.sampling().request(first, Tier::Far).await;
    }
    assert_eq!(h.provider.starts(), 1);
    assert_eq!(h.engine.sampling().subscribers().await, 2);

    h.engine.cancel_alert(first).await.unwrap();
    assert!(h.engine.sampling().active_profile().await.is_some());

    h.engine.cancel_alert(second).await.unwrap();
    assert_eq!(h.provider.calls().last(), Some(&ProviderCall::Stop));
    assert_eq!(h.engine.sampling().subscribers().await, 0);
}

#[tokio::test]
async fn thin_route_degrades_to_time_trigger() {
    let mut h = Harness::new(at(9, 0));
    let id = h
        .engine
        .create_alert(
            draft(Trigger::StationsBeforeArrival { stations: 2 }),
            &broken_route(),
        )
        .await
        .unwrap();

    let events = h.drain();
    assert!(events.iter().any(|e| matches!(
        e,
        EngineEvent::RouteDegraded { issues, .. }
            if issues.contains(&RouteIssue::InsufficientRouteData { known: 1 })
    )));

    let snapshot = h.engine.registry().snapshot(id).unwrap();
    assert_eq!(snapshot.trigger, Trigger::StationsBeforeArrival { stations: 2 });
    assert_eq!(snapshot.effective_trigger, Trigger::TimeBeforeArrival { minutes: 6 });
    assert!(snapshot.route_degraded);
    assert_eq!(snapshot.sub_mode, SubMode::ProximityOnly);

    h.wake_at(at(10, 24)).await;
    assert_eq!(h.sink.kinds(), vec![NotificationKind::Primary]);
}

#[tokio::test]
async fn departure_station_threshold_is_rejected() {
    let h = Harness::new(at(9, 0));
    let err = h
        .engine
        .create_alert(
            draft(Trigger::StationsBeforeArrival { stations: 10 }),
            &chuo_route(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CoreError::Setup(SetupError::InvalidTriggerPosition {
            threshold: 10,
            stop_count: 11
        })
    ));
    assert!(h.engine.registry().is_empty());
    assert!(h.store.alerts().is_empty());

    h.engine
        .create_alert(draft(Trigger::StationsBeforeArrival { stations: 9 }), &chuo_route())
        .await
        .unwrap();
}

#[tokio::test]
async fn degraded_station_trigger_cannot_fire_before_departure() {
    let mut route = chuo_route();
    let (first, second) = (route.intermediate_stops[0].time, route.intermediate_stops[1].time);
    route.intermediate_stops[0].time = second;
    route.intermediate_stops[1].time = first;

    let mut h = Harness::new(at(9, 0));
    let err = h
        .engine
        .create_alert(draft(Trigger::StationsBeforeArrival { stations: 12 }), &route)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Setup(SetupError::InvalidTriggerPosition { threshold: 12, .. })
    ));
    assert!(h.engine.registry().is_empty());
    assert!(h.store.alerts().is_empty());

    let id = h
        .engine
        .create_alert(draft(Trigger::StationsBeforeArrival { stations: 2 }), &route)
        .await
        .unwrap();
    let snapshot = h.engine.registry().snapshot(id).unwrap();
    assert_eq!(snapshot.effective_trigger, Trigger::TimeBeforeArrival { minutes: 6 });

    h.wake_at(at(9, 54)).await;
    assert!(fired(&h.drain()).is_empty());
}

#[tokio::test]
async fn sleeping_through_arrival_reports_a_miss() {
    let mut h = Harness::new(at(9, 0));
    let id = h
        .engine
        .create_alert(draft(Trigger::TimeBeforeArrival { minutes: 5 }), &chuo_route())
        .await
        .unwrap();

    h.wake_at(at(11, 5)).await;

    assert!(h.drain().contains(&EngineEvent::OccurrenceMissed {
        alert_id: id,
        arrival_at: at(10, 30),
        at: at(11, 5),
    }));
    assert!(h.sink.delivered().is_empty());
    assert!(h.engine.registry().is_empty());
}

#[tokio::test]
async fn daily_alert_rolls_over_to_the_next_day() {
    let mut h = Harness::new(at(9, 0));
    let mut request = draft(Trigger::TimeBeforeArrival { minutes: 5 });
    request.recurrence = "daily".parse().unwrap();
    let id = h.engine.create_alert(request, &chuo_route()).await.unwrap();

    h.wake_at(at(10, 25)).await;

    let tomorrow = at(10, 0) + Duration::days(1);
    let snapshot = h.engine.registry().snapshot(id).unwrap();
    assert_eq!(snapshot.phase, AlertPhase::Idle);
    assert_eq!(snapshot.occurrence.departure_at, tomorrow);
    assert!(h.drain().iter().any(|e| matches!(
        e,
        EngineEvent::OccurrenceScheduled { occurrence, .. } if occurrence.departure_at == tomorrow
    )));
    assert_eq!(h.waker.last(), Some(tomorrow - Duration::minutes(30)));

    h.wake_at(at(10, 25) + Duration::days(1)).await;
    assert_eq!(h.sink.kinds(), vec![NotificationKind::Primary, NotificationKind::Primary]);
}

#[tokio::test]
async fn cancel_rules() {
    let h = Harness::new(at(9, 0));
    let id = h
        .engine
        .create_alert(draft(Trigger::TimeBeforeArrival { minutes: 5 }), &chuo_route())
        .await
        .unwrap();
    h.wake_at(at(10, 25)).await;

    assert!(matches!(
        h.engine.cancel_alert(id).await,
        Err(CoreError::AlertCompleted(_))
    ));
    assert!(matches!(
        h.engine.cancel_alert(trainwake_core::AlertId::new()).await,
        Err(CoreError::AlertNotFound(_))
    ));
}

#[tokio::test]
async fn cancel_before_activation_removes_everything() {
    let mut h = Harness::new(at(9, 0));
    let id = h
        .engine
        .create_alert(draft(Trigger::TimeBeforeArrival { minutes: 5 }), &chuo_route())
        .await
        .unwrap();
    h.drain();

    h.engine.cancel_alert(id).await.unwrap();

    let events = h.drain();
    assert!(events.contains(&EngineEvent::AlertCancelled {
        alert_id: id,
        at: at(9, 0),
    }));
    assert!(h.engine.registry().is_empty());
    assert!(h.store.alerts().is_empty());

    h.wake_at(at(10, 25)).await;
    assert!(h.sink.delivered().is_empty());
}

#[tokio::test]
async fn edit_restarts_with_the_new_trigger() {
    let h = Harness::new(at(9, 0));
    let id = h
        .engine
        .create_alert(draft(Trigger::TimeBeforeArrival { minutes: 5 }), &chuo_route())
        .await
        .unwrap();
    h.wake_at(at(10, 0)).await;

    let bad = h
        .engine
        .edit_alert(id, draft(Trigger::TimeBeforeArrival { minutes: 0 }), &chuo_route())
        .await;
    assert!(bad.is_err());
    assert_eq!(
        h.engine.registry().snapshot(id).unwrap().trigger,
        Trigger::TimeBeforeArrival { minutes: 5 }
    );

    h.engine
        .edit_alert(id, draft(Trigger::TimeBeforeArrival { minutes: 10 }), &chuo_route())
        .await
        .unwrap();
    h.wake_at(at(10, 20)).await;
    assert_eq!(h.sink.kinds(), vec![NotificationKind::Primary]);
}
