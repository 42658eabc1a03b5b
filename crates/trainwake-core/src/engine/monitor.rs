//! One active alert in memory and the read-only snapshot hosts see.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::{Alert, AlertId, Occurrence, Recurrence, Trigger};
use crate::delay::{AdjustedArrival, DelayAdjuster, DelayRecord, DelayStatus};
use crate::proximity::{PersistedProximity, ProximityState, Tier};
use crate::route::RouteIssue;
use crate::trigger::{AlertPhase, AlertProgress, SubMode};

/// Everything the engine holds for one alert. Plain values, addressed by
/// id through the registry.
#[derive(Debug, Clone)]
pub struct AlertMonitor {
    pub alert: Alert,
    pub progress: AlertProgress,
    pub proximity: ProximityState,
    pub delay: Option<DelayRecord>,
}

impl AlertMonitor {
    pub fn new(alert: Alert, progress: AlertProgress) -> Self {
        Self {
            alert,
            progress,
            proximity: ProximityState::default(),
            delay: None,
        }
    }

    pub fn restore(
        alert: Alert,
        progress: AlertProgress,
        proximity: Option<PersistedProximity>,
    ) -> Self {
        Self {
            proximity: ProximityState::restore(proximity.unwrap_or_default()),
            ..Self::new(alert, progress)
        }
    }

    pub fn id(&self) -> AlertId {
        self.alert.id
    }

    pub fn arrival(&self, adjuster: &DelayAdjuster, now: DateTime<Utc>) -> AdjustedArrival {
        adjuster.adjust(self.progress.occurrence.arrival_at, self.delay.as_ref(), now)
    }

    pub fn wants_sampling(&self) -> bool {
        self.alert.active && self.progress.phase.is_watching()
    }

    /// Tier used for sampling cadence; `Far` until the first fix.
    pub fn tier(&self) -> Tier {
        self.proximity.tier.unwrap_or(Tier::Far)
    }

    pub fn snapshot(&self, adjuster: &DelayAdjuster, now: DateTime<Utc>) -> AlertSnapshot {
        let arrival = self.arrival(adjuster, now);
        AlertSnapshot {
            id: self.alert.id,
            departure_station: self.alert.departure_station.clone(),
            target_station: self.alert.target.name.clone(),
            trigger: self.alert.trigger,
            effective_trigger: self.progress.effective_trigger,
            recurrence: self.alert.recurrence.clone(),
            phase: self.progress.phase,
            sub_mode: self.progress.sub_mode,
            occurrence: self.progress.occurrence,
            adjusted_arrival: arrival.at,
            delay_status: arrival.status,
            tier: self.proximity.tier,
            distance_m: self.proximity.distance_m,
            reminders_fired: self
                .progress
                .escalation
                .as_ref()
                .map_or(0, |e| e.reminders_fired),
            sensing_degraded: self.progress.sub_mode == SubMode::ScheduleOnly,
            route_degraded: self.progress.is_degraded(),
            issues: self.progress.issues.clone(),
            updated_at: self.progress.updated_at,
        }
    }
}

/// Read-only view of an alert for the host UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertSnapshot {
    pub id: AlertId,
    pub departure_station: String,
    pub target_station: String,
    pub trigger: Trigger,
    pub effective_trigger: Trigger,
    pub recurrence: Recurrence,
    pub phase: AlertPhase,
    pub sub_mode: SubMode,
    pub occurrence: Occurrence,
    pub adjusted_arrival: DateTime<Utc>,
    pub delay_status: DelayStatus,
    pub tier: Option<Tier>,
    pub distance_m: Option<f64>,
    pub reminders_fired: u32,
    /// Location is unavailable and the alert runs on the timetable alone.
    pub sensing_degraded: bool,
    pub route_degraded: bool,
    pub issues: Vec<RouteIssue>,
    pub updated_at: DateTime<Utc>,
}
