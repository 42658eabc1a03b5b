//! Journey replay.
//!
//! Runs one alert against a manual clock and an in-memory store, stepping
//! through the journey with background wakes (and optional synthetic fixes)
//! and printing every engine event as a JSON line.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use clap::Args;
use tokio::sync::broadcast::{self, error::TryRecvError};
use trainwake_core::delivery::DeliveryRequest;
use trainwake_core::engine::EngineDeps;
use trainwake_core::sampling::LocationProvider;
use trainwake_core::{
    AlertEngine, Clock, Coordinate, DelayFeed, DelayRecord, DeliveryError, EngineConfig,
    EngineEvent, LocationSample, ManualClock, MemoryStore, NotificationSink, PermissionState,
    Route, TrainRef,
};

use super::host::{DraftArgs, NoLocation, NoteWake, ScriptedLocation};

#[derive(Args, Debug)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub draft: DraftArgs,
    /// Simulated seconds between wakes
    #[arg(long, default_value = "30")]
    pub step_secs: i64,
    /// Delay in minutes reported by the live feed from departure onwards
    #[arg(long, allow_hyphen_values = true)]
    pub delay: Option<i64>,
    /// Feed fixes interpolated between the route's station coordinates
    #[arg(long)]
    pub with_location: bool,
    /// Revoke location permission this many minutes after departure
    #[arg(long)]
    pub deny_location_after: Option<i64>,
}

/// Events already carry everything the notification would say.
struct NullSink;

#[async_trait]
impl NotificationSink for NullSink {
    async fn deliver(&self, _request: &DeliveryRequest) -> Result<(), DeliveryError> {
        Ok(())
    }
}

/// Reports a constant delay, freshly observed, once the train has left.
struct ConstantDelay {
    minutes: i64,
    departure: DateTime<Utc>,
    clock: ManualClock,
}

#[async_trait]
impl DelayFeed for ConstantDelay {
    async fn latest(&self, train: &TrainRef) -> Option<DelayRecord> {
        let now = self.clock.now();
        (now >= self.departure).then(|| DelayRecord {
            railway_id: train.railway_id.clone(),
            train_number: train.train_number.clone(),
            delay_minutes: self.minutes,
            observed_at: now,
        })
    }
}

/// Where the train is at `at` if it runs on the timetable, interpolating
/// between stations that carry both a time and a coordinate.
pub fn position_along(route: &Route, at: DateTime<Utc>) -> Option<Coordinate> {
    let mut points: Vec<(DateTime<Utc>, Coordinate)> = Vec::new();
    if let Some(c) = route.departure.coordinate {
        points.push((route.departure_time, c));
    }
    points.extend(
        route
            .intermediate_stops
            .iter()
            .filter_map(|s| s.time.zip(s.coordinate)),
    );
    if let Some(c) = route.arrival.coordinate {
        points.push((route.arrival_time, c));
    }

    let (first, last) = (points.first()?, points.last()?);
    if at <= first.0 {
        return Some(first.1);
    }
    if at >= last.0 {
        return Some(last.1);
    }
    points.windows(2).find_map(|w| {
        let ((t0, a), (t1, b)) = (w[0], w[1]);
        if at < t0 || at > t1 {
            return None;
        }
        let span = (t1 - t0).num_milliseconds();
        let f = if span == 0 {
            1.0
        } else {
            (at - t0).num_milliseconds() as f64 / span as f64
        };
        Some(Coordinate::new(
            a.lat + (b.lat - a.lat) * f,
            a.lon + (b.lon - a.lon) * f,
        ))
    })
}

fn print_events(rx: &mut broadcast::Receiver<EngineEvent>) -> Result<(), serde_json::Error> {
    loop {
        match rx.try_recv() {
            Ok(event) => println!("{}", serde_json::to_string(&event)?),
            Err(TryRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event output fell behind");
            }
            Err(_) => return Ok(()),
        }
    }
}

pub async fn run(args: SimulateArgs, config: EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    if args.step_secs <= 0 {
        return Err("--step-secs must be positive".into());
    }
    let route = args.draft.load_route()?;
    let mut draft = args.draft.draft(&route)?;

    let start = route.departure_time - config.monitoring.lead() - Duration::minutes(1);
    let clock = ManualClock::new(start);
    let location = Arc::new(ScriptedLocation::default());
    let provider: Arc<dyn LocationProvider> = if args.with_location {
        location.clone()
    } else {
        Arc::new(NoLocation)
    };

    let mut deps = EngineDeps::new(
        Arc::new(MemoryStore::new()),
        Arc::new(NullSink),
        provider,
        Arc::new(NoteWake::default()),
        Arc::new(clock.clone()),
    );
    if let Some(minutes) = args.delay {
        draft.train.get_or_insert_with(|| TrainRef {
            railway_id: "simulated".into(),
            train_number: "0".into(),
        });
        deps = deps.with_delay_feed(Arc::new(ConstantDelay {
            minutes,
            departure: route.departure_time,
            clock: clock.clone(),
        }));
    }

    let end = route.arrival_time
        + Duration::minutes(args.delay.unwrap_or(0).max(0))
        + config.monitoring.missed_grace()
        + Duration::minutes(1);
    let deny_at = args
        .deny_location_after
        .map(|m| route.departure_time + Duration::minutes(m));
    let offset = Duration::minutes(args.delay.unwrap_or(0));
    let step = Duration::seconds(args.step_secs);

    let engine = AlertEngine::new(config, deps);
    let mut events = engine.subscribe();

    let id = engine.create_alert(draft, &route).await?;
    tracing::info!(alert_id = %id, %start, %end, "simulation started");
    print_events(&mut events)?;

    let mut denied = false;
    while !engine.registry().is_empty() && clock.now() < end {
        clock.advance(step);
        let now = clock.now();

        if !denied && deny_at.is_some_and(|t| now >= t) {
            engine.on_permission_changed(PermissionState::Denied).await;
            denied = true;
        }
        if args.with_location && location.is_running() {
            if let Some(coordinate) = position_along(&route, now - offset) {
                engine
                    .on_location(LocationSample {
                        coordinate,
                        timestamp: now,
                        accuracy_m: 20.0,
                    })
                    .await;
            }
        }
        engine.on_wake().await?;
        print_events(&mut events)?;
    }

    tracing::info!(at = %clock.now(), remaining = engine.registry().len(), "simulation finished");
    Ok(())
}
