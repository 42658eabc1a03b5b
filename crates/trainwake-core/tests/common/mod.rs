//! Shared fixtures for engine integration tests.
//!
//! Recording fakes for every host collaborator plus the Tokyo -> Shinjuku
//! rapid service used across scenarios.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use trainwake_core::delivery::{DeliveryRequest, NotificationKind, NotificationSink};
use trainwake_core::engine::{AlertEngine, DelayFeed, EngineDeps, WakeScheduler};
use trainwake_core::route::{Route, RouteStation, RouteStop};
use trainwake_core::sampling::{LocationProvider, SamplingProfile};
use trainwake_core::{
    AlertDraft, AlertStore, Coordinate, DelayRecord, DeliveryError, EngineConfig, EngineEvent,
    LocationSample, ManualClock, MemoryStore, Recurrence, SensingError, SnoozeConfig, Station,
    TrainRef, Trigger,
};

pub fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, h, m, 0).unwrap()
}

pub fn at_secs(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, h, m, s).unwrap()
}

pub fn shinjuku() -> Coordinate {
    Coordinate::new(35.6896, 139.7006)
}

/// Stations of the 10:00 Chuo rapid, minutes after departure.
pub const CHUO_LINE: [(&str, u32, f64, f64); 11] = [
    ("Tokyo", 0, 35.6812, 139.7671),
    ("Kanda", 3, 35.6918, 139.7709),
    ("Ochanomizu", 6, 35.6995, 139.7653),
    ("Suidobashi", 9, 35.7020, 139.7534),
    ("Iidabashi", 12, 35.7020, 139.7450),
    ("Ichigaya", 15, 35.6913, 139.7357),
    ("Yotsuya", 20, 35.6860, 139.7302),
    ("Shinanomachi", 23, 35.6800, 139.7202),
    ("Sendagaya", 26, 35.6812, 139.7113),
    ("Yoyogi", 28, 35.6835, 139.7020),
    ("Shinjuku", 30, 35.6896, 139.7006),
];

pub fn chuo_route() -> Route {
    let station = |i: usize| {
        let (name, _, lat, lon) = CHUO_LINE[i];
        RouteStation {
            name: name.into(),
            coordinate: Some(Coordinate::new(lat, lon)),
        }
    };
    let last = CHUO_LINE.len() - 1;
    Route {
        departure: station(0),
        arrival: station(last),
        departure_time: at(10, 0),
        arrival_time: at(10, 30),
        intermediate_stops: CHUO_LINE[1..last]
            .iter()
            .map(|(name, m, lat, lon)| RouteStop {
                name: (*name).into(),
                time: Some(at(10, *m)),
                passthrough: false,
                coordinate: Some(Coordinate::new(*lat, *lon)),
            })
            .collect(),
    }
}

/// Only the endpoints, and the departure without a name.
pub fn broken_route() -> Route {
    let mut route = chuo_route();
    route.departure.name = "  ".into();
    route.intermediate_stops.clear();
    route
}

pub fn chuo_train() -> TrainRef {
    TrainRef {
        railway_id: "odpt.Railway:JR-East.ChuoRapid".into(),
        train_number: "1015H".into(),
    }
}

pub fn draft(trigger: Trigger) -> AlertDraft {
    AlertDraft {
        target: Station {
            name: "Shinjuku".into(),
            coordinate: shinjuku(),
        },
        trigger,
        snooze: SnoozeConfig::default(),
        train: Some(chuo_train()),
        style: "gentle".into(),
        recurrence: Recurrence::Once,
    }
}

pub fn snoozing(trigger: Trigger) -> AlertDraft {
    AlertDraft {
        snooze: SnoozeConfig {
            enabled: true,
            start_stations: 3,
            step: 1,
        },
        ..draft(trigger)
    }
}

pub fn fix(lat: f64, lon: f64, timestamp: DateTime<Utc>) -> LocationSample {
    LocationSample {
        coordinate: Coordinate::new(lat, lon),
        timestamp,
        accuracy_m: 15.0,
    }
}

pub fn delay(minutes: i64, observed_at: DateTime<Utc>) -> DelayRecord {
    let train = chuo_train();
    DelayRecord {
        railway_id: train.railway_id,
        train_number: train.train_number,
        delay_minutes: minutes,
        observed_at,
    }
}

/// Sink that records every attempt and replays scripted failures first.
#[derive(Default)]
pub struct RecordingSink {
    script: Mutex<VecDeque<DeliveryError>>,
    attempts: Mutex<Vec<DeliveryRequest>>,
    delivered: Mutex<Vec<DeliveryRequest>>,
}

impl RecordingSink {
    pub fn failing(errors: Vec<DeliveryError>) -> Self {
        Self {
            script: Mutex::new(errors.into()),
            ..Self::default()
        }
    }

    pub fn delivered(&self) -> Vec<DeliveryRequest> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<NotificationKind> {
        self.delivered().iter().map(|r| r.kind).collect()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn deliver(&self, request: &DeliveryRequest) -> Result<(), DeliveryError> {
        self.attempts.lock().unwrap().push(request.clone());
        if let Some(error) = self.script.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.delivered.lock().unwrap().push(request.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderCall {
    Start(SamplingProfile),
    Stop,
}

#[derive(Default)]
pub struct RecordingProvider {
    calls: Mutex<Vec<ProviderCall>>,
    deny: Mutex<bool>,
}

impl RecordingProvider {
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn starts(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, ProviderCall::Start(_)))
            .count()
    }

    pub fn deny(&self) {
        *self.deny.lock().unwrap() = true;
    }
}

#[async_trait]
impl LocationProvider for RecordingProvider {
    async fn start(&self, profile: SamplingProfile) -> Result<(), SensingError> {
        if *self.deny.lock().unwrap() {
            return Err(SensingError::PermissionDenied);
        }
        self.calls.lock().unwrap().push(ProviderCall::Start(profile));
        Ok(())
    }

    async fn stop(&self) {
        self.calls.lock().unwrap().push(ProviderCall::Stop);
    }
}

#[derive(Default)]
pub struct RecordingWaker {
    requests: Mutex<Vec<DateTime<Utc>>>,
}

impl RecordingWaker {
    pub fn last(&self) -> Option<DateTime<Utc>> {
        self.requests.lock().unwrap().last().copied()
    }
}

#[async_trait]
impl WakeScheduler for RecordingWaker {
    async fn request_wake(&self, not_before: DateTime<Utc>) {
        self.requests.lock().unwrap().push(not_before);
    }
}

#[derive(Default)]
pub struct StaticDelayFeed {
    record: Mutex<Option<DelayRecord>>,
}

impl StaticDelayFeed {
    pub fn set(&self, record: DelayRecord) {
        *self.record.lock().unwrap() = Some(record);
    }
}

#[async_trait]
impl DelayFeed for StaticDelayFeed {
    async fn latest(&self, train: &TrainRef) -> Option<DelayRecord> {
        self.record
            .lock()
            .unwrap()
            .clone()
            .filter(|r| r.train() == *train)
    }
}

/// An engine wired to recording fakes.
pub struct Harness {
    pub engine: Arc<AlertEngine>,
    pub clock: ManualClock,
    pub store: Arc<MemoryStore>,
    pub sink: Arc<RecordingSink>,
    pub provider: Arc<RecordingProvider>,
    pub waker: Arc<RecordingWaker>,
    pub feed: Arc<StaticDelayFeed>,
    events: tokio::sync::broadcast::Receiver<EngineEvent>,
}

impl Harness {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self::with(start, Arc::new(MemoryStore::new()), RecordingSink::default())
    }

    pub fn with(start: DateTime<Utc>, store: Arc<MemoryStore>, sink: RecordingSink) -> Self {
        let clock = ManualClock::new(start);
        let sink = Arc::new(sink);
        let provider = Arc::new(RecordingProvider::default());
        let waker = Arc::new(RecordingWaker::default());
        let feed = Arc::new(StaticDelayFeed::default());

        let deps = EngineDeps::new(
            store.clone() as Arc<dyn AlertStore>,
            sink.clone(),
            provider.clone(),
            waker.clone(),
            Arc::new(clock.clone()),
        )
        .with_delay_feed(feed.clone());
        let engine = Arc::new(AlertEngine::new(EngineConfig::default(), deps));
        let events = engine.subscribe();

        Self {
            engine,
            clock,
            store,
            sink,
            provider,
            waker,
            feed,
            events,
        }
    }

    /// Move the clock and run a background wake.
    pub async fn wake_at(&self, now: DateTime<Utc>) {
        self.clock.set(now);
        self.engine.on_wake().await.unwrap();
    }

    pub async fn location_at(&self, lat: f64, lon: f64, now: DateTime<Utc>) {
        self.clock.set(now);
        self.engine.on_location(fix(lat, lon, now)).await;
    }

    /// Events emitted since the last drain.
    pub fn drain(&mut self) -> Vec<EngineEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}
