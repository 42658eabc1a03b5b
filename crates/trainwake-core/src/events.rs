use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::{AlertId, Occurrence};
use crate::delivery::NotificationKind;
use crate::route::RouteIssue;
use crate::trigger::{AlertPhase, FireReason, SubMode};

/// Every state change in the engine produces an event.
/// UI adapters and the CLI subscribe to them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    AlertRegistered {
        alert_id: AlertId,
        target_station: String,
        at: DateTime<Utc>,
    },
    AlertCancelled {
        alert_id: AlertId,
        at: DateTime<Utc>,
    },
    /// Left the registry: cancelled, finished or removed externally.
    AlertRemoved {
        alert_id: AlertId,
        at: DateTime<Utc>,
    },
    PhaseChanged {
        alert_id: AlertId,
        from: AlertPhase,
        to: AlertPhase,
        at: DateTime<Utc>,
    },
    SubModeChanged {
        alert_id: AlertId,
        from: SubMode,
        to: SubMode,
        at: DateTime<Utc>,
    },
    NotificationFired {
        alert_id: AlertId,
        kind: NotificationKind,
        /// Set for the primary notification only.
        reason: Option<FireReason>,
        stations_remaining: Option<u32>,
        minutes_remaining: i64,
        attempts: u32,
        at: DateTime<Utc>,
    },
    DeliveryRetried {
        alert_id: AlertId,
        kind: NotificationKind,
        attempt: u32,
        error: String,
        at: DateTime<Utc>,
    },
    /// Retries exhausted; the engine carried on as if delivered.
    DeliveryFailed {
        alert_id: AlertId,
        kind: NotificationKind,
        attempts: u32,
        error: String,
        at: DateTime<Utc>,
    },
    OccurrenceMissed {
        alert_id: AlertId,
        arrival_at: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    /// A repeating alert rolled over to its next journey.
    OccurrenceScheduled {
        alert_id: AlertId,
        occurrence: Occurrence,
        at: DateTime<Utc>,
    },
    RouteDegraded {
        alert_id: AlertId,
        issues: Vec<RouteIssue>,
        at: DateTime<Utc>,
    },
    /// Delay record beyond the sanity bound; the schedule was used instead.
    DelaySuspect {
        alert_id: AlertId,
        delay_minutes: i64,
        at: DateTime<Utc>,
    },
    WakeRequested {
        not_before: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    /// Stored state was unreadable; only this alert was dropped.
    AlertDropped {
        alert_id: AlertId,
        reason: String,
        at: DateTime<Utc>,
    },
}

impl EngineEvent {
    pub fn alert_id(&self) -> Option<AlertId> {
        match self {
            EngineEvent::AlertRegistered { alert_id, .. }
            | EngineEvent::AlertCancelled { alert_id, .. }
            | EngineEvent::AlertRemoved { alert_id, .. }
            | EngineEvent::PhaseChanged { alert_id, .. }
            | EngineEvent::SubModeChanged { alert_id, .. }
            | EngineEvent::NotificationFired { alert_id, .. }
            | EngineEvent::DeliveryRetried { alert_id, .. }
            | EngineEvent::DeliveryFailed { alert_id, .. }
            | EngineEvent::OccurrenceMissed { alert_id, .. }
            | EngineEvent::OccurrenceScheduled { alert_id, .. }
            | EngineEvent::RouteDegraded { alert_id, .. }
            | EngineEvent::DelaySuspect { alert_id, .. }
            | EngineEvent::AlertDropped { alert_id, .. } => Some(*alert_id),
            EngineEvent::WakeRequested { .. } => None,
        }
    }
}
