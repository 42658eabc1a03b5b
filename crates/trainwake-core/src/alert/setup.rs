//! Alert setup validation.
//!
//! Turns a host [`AlertDraft`] plus the journey's [`Route`] into a registered
//! [`Alert`] and its initial [`AlertProgress`]. Invalid requests are refused
//! here; poor route data only degrades the trigger.

use chrono::{DateTime, Utc};

use super::model::{Alert, AlertDraft, AlertId, Occurrence, Station, Trigger};
use super::recurrence::Recurrence;
use crate::error::{RouteError, SetupError};
use crate::route::{Route, RouteIssue, StopSequence, StopSequenceResolver};
use crate::trigger::AlertProgress;

#[derive(Debug, Clone, PartialEq)]
pub struct PreparedAlert {
    pub alert: Alert,
    pub progress: AlertProgress,
}

impl PreparedAlert {
    pub fn is_degraded(&self) -> bool {
        self.progress.is_degraded() || self.alert.trigger != self.progress.effective_trigger
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AlertSetup {
    resolver: StopSequenceResolver,
    minutes_per_station: u32,
}

impl AlertSetup {
    pub fn new(minutes_per_station: u32) -> Self {
        Self {
            resolver: StopSequenceResolver,
            minutes_per_station: minutes_per_station.max(1),
        }
    }

    pub fn prepare(
        &self,
        id: AlertId,
        draft: &AlertDraft,
        route: &Route,
        now: DateTime<Utc>,
    ) -> Result<PreparedAlert, SetupError> {
        let schedule = Occurrence {
            departure_at: route.departure_time,
            arrival_at: route.arrival_time,
        };
        if schedule.arrival_at <= schedule.departure_at {
            return Err(SetupError::InvalidSchedule {
                departure: schedule.departure_at,
                arrival: schedule.arrival_at,
            });
        }

        validate_snooze(draft)?;
        validate_recurrence(&draft.recurrence)?;
        validate_thresholds(&draft.trigger, &schedule)?;

        let (stops, issues, usable) = match self.resolver.resolve(route) {
            Ok(resolution) => {
                let usable = !resolution.issues.contains(&RouteIssue::NonMonotonicTimes);
                (Some(resolution.sequence), resolution.issues, usable)
            }
            Err(err) => {
                tracing::warn!(error = %err, target = %draft.target.name, "stop sequence unavailable, using time trigger");
                let RouteError::InsufficientRouteData { known } = err;
                (None, vec![RouteIssue::InsufficientRouteData { known }], false)
            }
        };

        let effective_trigger = match (&stops, usable) {
            (Some(stops), true) => {
                validate_trigger_position(&draft.trigger, stops)?;
                draft.trigger
            }
            _ => self.degrade(&draft.trigger, &schedule, stops.as_ref(), &issues)?,
        };

        let alert = Alert {
            id,
            departure_station: route.departure.name.trim().to_string(),
            target: Station {
                name: draft.target.name.trim().to_string(),
                coordinate: draft.target.coordinate,
            },
            trigger: draft.trigger,
            snooze: draft.snooze,
            schedule,
            train: draft.train.clone(),
            style: draft.style.clone(),
            recurrence: draft.recurrence.clone(),
            active: true,
            created_at: now,
        };
        let progress = AlertProgress::new(schedule, effective_trigger, stops, issues, now);

        Ok(PreparedAlert { alert, progress })
    }

    /// Time trigger standing in for a station count the route can't support.
    /// One that would already hold at departure is refused like any other
    /// departure-station trigger.
    fn degrade(
        &self,
        trigger: &Trigger,
        schedule: &Occurrence,
        stops: Option<&StopSequence>,
        issues: &[RouteIssue],
    ) -> Result<Trigger, SetupError> {
        if let Some(degraded) = trigger.degraded_to_time(self.minutes_per_station, schedule.duration()) {
            return Ok(degraded);
        }
        let stop_count = stops.map(StopSequence::stop_count).unwrap_or_else(|| {
            issues
                .iter()
                .find_map(|issue| match issue {
                    RouteIssue::InsufficientRouteData { known } => Some(*known),
                    _ => None,
                })
                .unwrap_or(0)
        });
        Err(SetupError::InvalidTriggerPosition {
            threshold: trigger.stations().unwrap_or_default(),
            stop_count,
        })
    }
}

fn validate_snooze(draft: &AlertDraft) -> Result<(), SetupError> {
    if !draft.snooze.enabled {
        return Ok(());
    }
    if draft.snooze.step == 0 {
        return Err(SetupError::InvalidSnooze("step must be at least 1".into()));
    }
    if draft.snooze.start_stations == 0 {
        return Err(SetupError::InvalidSnooze(
            "start_stations must be at least 1".into(),
        ));
    }
    Ok(())
}

fn validate_recurrence(recurrence: &Recurrence) -> Result<(), SetupError> {
    match recurrence {
        Recurrence::Custom(days) if days.is_empty() => Err(SetupError::MalformedRecurrence(
            "custom rule names no days".into(),
        )),
        _ => Ok(()),
    }
}

fn validate_thresholds(trigger: &Trigger, schedule: &Occurrence) -> Result<(), SetupError> {
    if let Some(minutes) = trigger.minutes() {
        if minutes == 0 {
            return Err(SetupError::InvalidThreshold {
                field: "minutes".into(),
                message: "must be at least 1".into(),
            });
        }
        let journey = schedule.duration().num_minutes();
        if i64::from(minutes) >= journey {
            return Err(SetupError::InvalidThreshold {
                field: "minutes".into(),
                message: format!("{minutes} min is not shorter than the {journey} min journey"),
            });
        }
    }
    if trigger.stations() == Some(0) {
        return Err(SetupError::InvalidThreshold {
            field: "stations".into(),
            message: "must be at least 1".into(),
        });
    }
    Ok(())
}

/// A station trigger that would already hold at the departure station.
fn validate_trigger_position(trigger: &Trigger, stops: &StopSequence) -> Result<(), SetupError> {
    let Some(threshold) = trigger.stations() else {
        return Ok(());
    };
    let stop_count = stops.stop_count();
    if threshold as usize >= stop_count.saturating_sub(1) {
        return Err(SetupError::InvalidTriggerPosition {
            threshold,
            stop_count,
        });
    }
    Ok(())
}
