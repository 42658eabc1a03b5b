//! Alert data model: ids, triggers, snooze settings and journeys.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::recurrence::Recurrence;
use crate::geo::Coordinate;

/// Unique alert identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(Uuid);

impl AlertId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for AlertId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for AlertId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Target station: name plus coordinate used for proximity sensing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub name: String,
    pub coordinate: Coordinate,
}

/// Key of a delay record in the delay feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrainRef {
    pub railway_id: String,
    pub train_number: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerMode {
    TimeBeforeArrival,
    StationsBeforeArrival,
    Hybrid,
}

/// Primary trigger: mode plus its threshold(s).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum Trigger {
    TimeBeforeArrival { minutes: u32 },
    StationsBeforeArrival { stations: u32 },
    Hybrid { minutes: u32, stations: u32 },
}

impl Trigger {
    pub fn mode(&self) -> TriggerMode {
        match self {
            Trigger::TimeBeforeArrival { .. } => TriggerMode::TimeBeforeArrival,
            Trigger::StationsBeforeArrival { .. } => TriggerMode::StationsBeforeArrival,
            Trigger::Hybrid { .. } => TriggerMode::Hybrid,
        }
    }

    pub fn minutes(&self) -> Option<u32> {
        match *self {
            Trigger::TimeBeforeArrival { minutes } | Trigger::Hybrid { minutes, .. } => {
                Some(minutes)
            }
            Trigger::StationsBeforeArrival { .. } => None,
        }
    }

    pub fn stations(&self) -> Option<u32> {
        match *self {
            Trigger::StationsBeforeArrival { stations } | Trigger::Hybrid { stations, .. } => {
                Some(stations)
            }
            Trigger::TimeBeforeArrival { .. } => None,
        }
    }

    /// Time-only trigger used when the route cannot support station counts.
    ///
    /// A pure station trigger is converted at `minutes_per_station`; a hybrid
    /// trigger keeps its own minute threshold. Returns `None` when the
    /// converted threshold is not shorter than `journey`, i.e. it would
    /// already hold at the departure station.
    pub fn degraded_to_time(&self, minutes_per_station: u32, journey: Duration) -> Option<Trigger> {
        let minutes = match *self {
            Trigger::TimeBeforeArrival { minutes } | Trigger::Hybrid { minutes, .. } => minutes,
            Trigger::StationsBeforeArrival { stations } => {
                stations.saturating_mul(minutes_per_station).max(1)
            }
        };
        (i64::from(minutes) < journey.num_minutes())
            .then_some(Trigger::TimeBeforeArrival { minutes })
    }
}

/// Snooze (escalating reminder) configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnoozeConfig {
    pub enabled: bool,
    /// Stations remaining at which the first reminder fires.
    pub start_stations: u32,
    /// Stations between reminders.
    pub step: u32,
}

impl Default for SnoozeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            start_stations: 3,
            step: 1,
        }
    }
}

/// One concrete journey an alert watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    pub departure_at: DateTime<Utc>,
    pub arrival_at: DateTime<Utc>,
}

impl Occurrence {
    pub fn duration(&self) -> Duration {
        self.arrival_at - self.departure_at
    }

    pub fn shifted(&self, by: Duration) -> Self {
        Self {
            departure_at: self.departure_at + by,
            arrival_at: self.arrival_at + by,
        }
    }
}

/// One user intent to be woken before a station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub departure_station: String,
    pub target: Station,
    pub trigger: Trigger,
    #[serde(default)]
    pub snooze: SnoozeConfig,
    /// Scheduled departure/arrival of the configured journey.
    pub schedule: Occurrence,
    #[serde(default)]
    pub train: Option<TrainRef>,
    /// Message style tag, passed through to the delivery collaborator.
    #[serde(default)]
    pub style: String,
    #[serde(default)]
    pub recurrence: Recurrence,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    pub fn is_repeating(&self) -> bool {
        self.recurrence.is_repeating()
    }
}

/// Alert creation request coming from the host.
///
/// Departure station and times come from the route passed alongside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertDraft {
    pub target: Station,
    pub trigger: Trigger,
    #[serde(default)]
    pub snooze: SnoozeConfig,
    #[serde(default)]
    pub train: Option<TrainRef>,
    #[serde(default)]
    pub style: String,
    #[serde(default)]
    pub recurrence: Recurrence,
}
