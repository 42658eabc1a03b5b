//! Host-side collaborators for running the engine from a terminal.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clap::Args;
use trainwake_core::delivery::DeliveryRequest;
use trainwake_core::engine::{EngineDeps, WakeScheduler};
use trainwake_core::sampling::{LocationProvider, SamplingProfile};
use trainwake_core::{
    AlertDraft, AlertStore, Clock, DeliveryError, NotificationKind, NotificationSink, Recurrence,
    Route, SensingError, SnoozeConfig, Station, TrainRef, Trigger,
};

/// Trigger and snooze flags shared by `alert create` and `simulate`.
#[derive(Args, Debug, Clone)]
pub struct DraftArgs {
    /// Route JSON file (departure, arrival, times, intermediate stops)
    pub route: std::path::PathBuf,
    /// Fire this many minutes before arrival
    #[arg(long)]
    pub minutes: Option<u32>,
    /// Fire this many stations before arrival
    #[arg(long)]
    pub stations: Option<u32>,
    /// Keep reminding as the remaining stations count down
    #[arg(long)]
    pub snooze: bool,
    /// Stations remaining at the first reminder
    #[arg(long, default_value = "3")]
    pub snooze_start: u32,
    /// Stations between reminders
    #[arg(long, default_value = "1")]
    pub snooze_step: u32,
    /// once, daily, weekdays, weekends or a day list such as "mon,wed,fri"
    #[arg(long, default_value = "once")]
    pub repeat: String,
    /// Message style tag passed to the notifier
    #[arg(long, default_value = "")]
    pub style: String,
    /// Railway id for live delay lookups
    #[arg(long, requires = "train_number")]
    pub railway: Option<String>,
    /// Train number for live delay lookups
    #[arg(long, requires = "railway")]
    pub train_number: Option<String>,
}

impl DraftArgs {
    pub fn load_route(&self) -> Result<Route, Box<dyn std::error::Error>> {
        read_route(&self.route)
    }

    /// Build the draft; the target is the route's arrival station.
    pub fn draft(&self, route: &Route) -> Result<AlertDraft, Box<dyn std::error::Error>> {
        let trigger = match (self.minutes, self.stations) {
            (Some(minutes), Some(stations)) => Trigger::Hybrid { minutes, stations },
            (Some(minutes), None) => Trigger::TimeBeforeArrival { minutes },
            (None, Some(stations)) => Trigger::StationsBeforeArrival { stations },
            (None, None) => return Err("one of --minutes or --stations is required".into()),
        };
        let coordinate = route.arrival.coordinate.ok_or_else(|| {
            format!("arrival station '{}' has no coordinate", route.arrival.name)
        })?;
        let recurrence: Recurrence = self.repeat.parse()?;
        let train = self
            .railway
            .clone()
            .zip(self.train_number.clone())
            .map(|(railway_id, train_number)| TrainRef {
                railway_id,
                train_number,
            });

        Ok(AlertDraft {
            target: Station {
                name: route.arrival.name.clone(),
                coordinate,
            },
            trigger,
            snooze: SnoozeConfig {
                enabled: self.snooze,
                start_stations: self.snooze_start,
                step: self.snooze_step,
            },
            train,
            style: self.style.clone(),
            recurrence,
        })
    }
}

pub fn read_route(path: &Path) -> Result<Route, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read route {}: {e}", path.display()))?;
    Ok(serde_json::from_str(&content)?)
}

/// Prints notifications to stdout as one line each.
#[derive(Debug, Default)]
pub struct ConsoleSink;

pub fn render(request: &DeliveryRequest) -> String {
    let p = &request.params;
    let mut line = match request.kind {
        NotificationKind::Terminal => format!("Arriving at {}", p.station_name),
        NotificationKind::Primary => format!("Wake up: {} is coming up", p.station_name),
        NotificationKind::Snooze => format!("Still heading to {}", p.station_name),
    };
    if let Some(stations) = p.stations_remaining.filter(|n| *n > 0) {
        line.push_str(&format!(", {stations} stop(s) to go"));
    }
    if let Some(minutes) = p.minutes_remaining.filter(|m| *m > 0) {
        line.push_str(&format!(", about {minutes} min"));
    }
    line
}

#[async_trait]
impl NotificationSink for ConsoleSink {
    async fn deliver(&self, request: &DeliveryRequest) -> Result<(), DeliveryError> {
        println!("[{}] {}", request.kind, render(request));
        Ok(())
    }
}

/// A terminal has no location source; alerts run on the timetable.
#[derive(Debug, Default)]
pub struct NoLocation;

#[async_trait]
impl LocationProvider for NoLocation {
    async fn start(&self, _profile: SamplingProfile) -> Result<(), SensingError> {
        Err(SensingError::ProviderFailure("no location source".into()))
    }

    async fn stop(&self) {}
}

/// Accepts every start; fixes are pushed by the caller.
#[derive(Debug, Default)]
pub struct ScriptedLocation {
    profile: Mutex<Option<SamplingProfile>>,
}

impl ScriptedLocation {
    pub fn is_running(&self) -> bool {
        self.profile
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }
}

#[async_trait]
impl LocationProvider for ScriptedLocation {
    async fn start(&self, profile: SamplingProfile) -> Result<(), SensingError> {
        *self.profile.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(profile);
        Ok(())
    }

    async fn stop(&self) {
        *self.profile.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }
}

/// Remembers the requested wake; a scheduler (cron, systemd timer) is
/// expected to run `trainwake-cli wake` around then.
#[derive(Debug, Default)]
pub struct NoteWake {
    next: Mutex<Option<DateTime<Utc>>>,
}

impl NoteWake {
    pub fn next(&self) -> Option<DateTime<Utc>> {
        *self.next.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl WakeScheduler for NoteWake {
    async fn request_wake(&self, not_before: DateTime<Utc>) {
        *self.next.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(not_before);
    }
}

pub fn terminal_deps(
    store: Arc<dyn AlertStore>,
    waker: Arc<NoteWake>,
    clock: Arc<dyn Clock>,
) -> EngineDeps {
    EngineDeps::new(
        store,
        Arc::new(ConsoleSink),
        Arc::new(NoLocation),
        waker,
        clock,
    )
}
