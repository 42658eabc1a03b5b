//! Alert phases, evaluation sub-modes and persisted progress.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::{Occurrence, Trigger};
use crate::escalation::EscalationState;
use crate::route::{RouteIssue, StopSequence};

/// Lifecycle of one alert occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPhase {
    Idle,
    Monitoring,
    Fired,
    Escalating,
    Completed,
}

impl AlertPhase {
    /// Phases that want location sampling.
    pub fn is_watching(&self) -> bool {
        matches!(self, AlertPhase::Monitoring | AlertPhase::Escalating)
    }
}

impl fmt::Display for AlertPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertPhase::Idle => "idle",
            AlertPhase::Monitoring => "monitoring",
            AlertPhase::Fired => "fired",
            AlertPhase::Escalating => "escalating",
            AlertPhase::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// Which signals the evaluator trusts, chosen by data availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubMode {
    /// Timetable and location both usable.
    Hybrid,
    /// Location unavailable.
    ScheduleOnly,
    /// No usable stop sequence.
    ProximityOnly,
}

impl SubMode {
    pub fn select(location_available: bool, has_stop_sequence: bool) -> Self {
        match (location_available, has_stop_sequence) {
            (true, true) => SubMode::Hybrid,
            (false, _) => SubMode::ScheduleOnly,
            (true, false) => SubMode::ProximityOnly,
        }
    }

    pub fn uses_location(&self) -> bool {
        !matches!(self, SubMode::ScheduleOnly)
    }
}

impl fmt::Display for SubMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubMode::Hybrid => "hybrid",
            SubMode::ScheduleOnly => "schedule_only",
            SubMode::ProximityOnly => "proximity_only",
        };
        f.write_str(s)
    }
}

/// Per-alert engine state that must survive suspension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertProgress {
    pub phase: AlertPhase,
    pub sub_mode: SubMode,
    /// Journey currently watched; moves forward for repeating alerts.
    pub occurrence: Occurrence,
    /// Trigger actually evaluated; time based when the route was unusable.
    pub effective_trigger: Trigger,
    #[serde(default)]
    pub stops: Option<StopSequence>,
    #[serde(default)]
    pub escalation: Option<EscalationState>,
    #[serde(default)]
    pub primary_fired_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub issues: Vec<RouteIssue>,
    pub updated_at: DateTime<Utc>,
}

impl AlertProgress {
    pub fn new(
        occurrence: Occurrence,
        effective_trigger: Trigger,
        stops: Option<StopSequence>,
        issues: Vec<RouteIssue>,
        now: DateTime<Utc>,
    ) -> Self {
        let sub_mode = SubMode::select(true, stops.is_some());
        Self {
            phase: AlertPhase::Idle,
            sub_mode,
            occurrence,
            effective_trigger,
            stops,
            escalation: None,
            primary_fired_at: None,
            issues,
            updated_at: now,
        }
    }

    /// Route fell back to a degraded shape.
    pub fn is_degraded(&self) -> bool {
        self.stops.is_none()
            || self.issues.iter().any(|i| {
                matches!(
                    i,
                    RouteIssue::NonMonotonicTimes | RouteIssue::InsufficientRouteData { .. }
                )
            })
    }

    /// Start over on `occurrence`, moving the cached stop sequence along.
    pub fn reset_for(&mut self, occurrence: Occurrence, now: DateTime<Utc>) {
        let shift = occurrence.departure_at - self.occurrence.departure_at;
        self.stops = self.stops.as_ref().map(|s| s.shifted(shift));
        self.occurrence = occurrence;
        self.phase = AlertPhase::Idle;
        self.escalation = None;
        self.primary_fired_at = None;
        self.updated_at = now;
    }
}
