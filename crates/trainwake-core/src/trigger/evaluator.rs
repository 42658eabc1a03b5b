//! Per-tick trigger evaluation.
//!
//! [`TriggerEvaluator::evaluate`] is a pure step over an alert's
//! [`AlertProgress`]: it applies at most one lifecycle pass for the tick and
//! reports what happened as a list of [`TriggerDecision`]s. Delivering
//! notifications, persisting and emitting events is left to the caller.
//!
//! ## Fire policy
//!
//! In `Monitoring` the primary alert fires as soon as any predicate that the
//! current sub-mode allows holds:
//!
//! - time: `now >= adjusted_arrival - minutes`
//! - station count: stations remaining `<= stations`
//! - proximity: latest fix is in the `Imminent` tier (needs location)
//!
//! Snooze reminders start on the tick after the primary alert.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::state::{AlertPhase, AlertProgress};
use crate::alert::SnoozeConfig;
use crate::delay::AdjustedArrival;
use crate::escalation::{EscalationState, ReminderAction};
use crate::proximity::{ProximityState, Tier};
use crate::storage::EngineConfig;

/// Which predicate fired the primary alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FireReason {
    Time,
    StationCount,
    Proximity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum TriggerDecision {
    Transition {
        from: AlertPhase,
        to: AlertPhase,
    },
    Primary {
        reason: FireReason,
        minutes_remaining: i64,
        stations_remaining: Option<u32>,
    },
    Reminder {
        action: ReminderAction,
        minutes_remaining: i64,
    },
    /// Still unfired well past arrival; nothing was sent.
    Missed { arrival_at: DateTime<Utc> },
}

/// Inputs observed for one evaluation tick.
#[derive(Debug, Clone, Copy)]
pub struct Tick<'a> {
    pub now: DateTime<Utc>,
    pub arrival: AdjustedArrival,
    pub proximity: &'a ProximityState,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerEvaluator {
    pub lead: Duration,
    pub missed_grace: Duration,
    pub arrival_radius_m: f64,
    pub station_match_radius_m: f64,
}

impl Default for TriggerEvaluator {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl TriggerEvaluator {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            lead: config.monitoring.lead(),
            missed_grace: config.monitoring.missed_grace(),
            arrival_radius_m: config.proximity.arrival_radius_meters,
            station_match_radius_m: config.proximity.station_match_radius_meters,
        }
    }

    /// When monitoring of `progress.occurrence` opens.
    pub fn activation_at(&self, progress: &AlertProgress) -> DateTime<Utc> {
        progress.occurrence.departure_at - self.lead
    }

    /// Index of the furthest station reached: timetable shifted by the
    /// applied delay, or a fix close to a station further along.
    pub fn position(&self, progress: &AlertProgress, tick: &Tick<'_>) -> Option<usize> {
        let stops = progress.stops.as_ref()?;
        let by_schedule = stops.position_at(tick.now, tick.arrival.offset());
        let by_fix = if progress.sub_mode.uses_location() {
            tick.proximity
                .last_coordinate
                .and_then(|c| stops.position_near(&c, self.station_match_radius_m))
        } else {
            None
        };
        Some(by_fix.map_or(by_schedule, |p| p.max(by_schedule)))
    }

    pub fn stations_remaining(&self, progress: &AlertProgress, tick: &Tick<'_>) -> Option<u32> {
        let stops = progress.stops.as_ref()?;
        self.position(progress, tick)
            .map(|p| stops.stations_remaining(p))
    }

    /// First predicate that holds this tick, in the order time, station
    /// count, proximity.
    pub fn fire_reason(&self, progress: &AlertProgress, tick: &Tick<'_>) -> Option<FireReason> {
        let trigger = &progress.effective_trigger;

        let time = trigger
            .minutes()
            .is_some_and(|m| tick.now >= tick.arrival.at - Duration::minutes(i64::from(m)));
        if time {
            return Some(FireReason::Time);
        }

        let station = trigger
            .stations()
            .zip(self.stations_remaining(progress, tick))
            .is_some_and(|(threshold, remaining)| remaining <= threshold);
        if station {
            return Some(FireReason::StationCount);
        }

        let proximity = progress.sub_mode.uses_location()
            && tick.proximity.has_fix()
            && tick.proximity.tier == Some(Tier::Imminent);
        proximity.then_some(FireReason::Proximity)
    }

    /// Earliest instant at which the schedule alone would make something
    /// happen for this alert. Used to bound the next background wake.
    pub fn next_deadline(
        &self,
        progress: &AlertProgress,
        arrival: &AdjustedArrival,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let offset = arrival.offset();
        match progress.phase {
            AlertPhase::Idle => Some(self.activation_at(progress)),
            AlertPhase::Monitoring => {
                let by_time = progress
                    .effective_trigger
                    .minutes()
                    .map(|m| arrival.at - Duration::minutes(i64::from(m)));
                let by_station = progress
                    .effective_trigger
                    .stations()
                    .zip(progress.stops.as_ref())
                    .and_then(|(threshold, stops)| {
                        (0..stops.entries().len())
                            .find(|i| stops.stations_remaining(*i) <= threshold)
                            .map(|i| stops.entries()[i].scheduled_time + offset)
                    });
                let missed = arrival.at + self.missed_grace;
                [by_time, by_station, Some(missed)]
                    .into_iter()
                    .flatten()
                    .min()
                    .map(|t| t.max(now))
            }
            AlertPhase::Escalating => progress
                .stops
                .as_ref()
                .and_then(|stops| {
                    stops
                        .entries()
                        .iter()
                        .map(|e| e.scheduled_time + offset)
                        .find(|t| *t > now)
                })
                .or(Some(now)),
            AlertPhase::Fired | AlertPhase::Completed => None,
        }
    }

    pub fn evaluate(
        &self,
        snooze: &SnoozeConfig,
        progress: &mut AlertProgress,
        tick: &Tick<'_>,
    ) -> Vec<TriggerDecision> {
        let mut out = Vec::new();

        match progress.phase {
            AlertPhase::Completed => {}
            AlertPhase::Idle => {
                if tick.now >= self.activation_at(progress) {
                    transition(progress, AlertPhase::Monitoring, &mut out);
                    self.monitor(snooze, progress, tick, &mut out);
                }
            }
            AlertPhase::Monitoring => self.monitor(snooze, progress, tick, &mut out),
            // Suspended between firing and scheduling the follow-up.
            AlertPhase::Fired => follow_up(snooze, progress, &mut out),
            AlertPhase::Escalating => self.escalate(progress, tick, &mut out),
        }

        progress.updated_at = tick.now;
        out
    }

    fn monitor(
        &self,
        snooze: &SnoozeConfig,
        progress: &mut AlertProgress,
        tick: &Tick<'_>,
        out: &mut Vec<TriggerDecision>,
    ) {
        if tick.now > tick.arrival.at + self.missed_grace {
            out.push(TriggerDecision::Missed {
                arrival_at: tick.arrival.at,
            });
            transition(progress, AlertPhase::Completed, out);
            return;
        }

        let Some(reason) = self.fire_reason(progress, tick) else {
            return;
        };

        out.push(TriggerDecision::Primary {
            reason,
            minutes_remaining: minutes_until(tick.arrival.at, tick.now),
            stations_remaining: self.stations_remaining(progress, tick),
        });
        progress.primary_fired_at = Some(tick.now);
        transition(progress, AlertPhase::Fired, out);
        follow_up(snooze, progress, out);
    }

    fn escalate(&self, progress: &mut AlertProgress, tick: &Tick<'_>, out: &mut Vec<TriggerDecision>) {
        let Some(mut escalation) = progress.escalation.take() else {
            transition(progress, AlertPhase::Completed, out);
            return;
        };

        let arrived = progress.sub_mode.uses_location()
            && tick.proximity.has_arrived(self.arrival_radius_m);
        let action = if arrived {
            escalation.finish()
        } else {
            match self.stations_remaining(progress, tick) {
                Some(remaining) => escalation.advance(remaining),
                None => escalation.finish(),
            }
        };

        let complete = escalation.is_complete();
        progress.escalation = Some(escalation);

        if let Some(action) = action {
            out.push(TriggerDecision::Reminder {
                action,
                minutes_remaining: minutes_until(tick.arrival.at, tick.now),
            });
        }
        if complete {
            transition(progress, AlertPhase::Completed, out);
        }
    }
}

fn follow_up(snooze: &SnoozeConfig, progress: &mut AlertProgress, out: &mut Vec<TriggerDecision>) {
    if snooze.enabled && progress.stops.is_some() {
        progress.escalation = Some(EscalationState::new(snooze.start_stations, snooze.step));
        transition(progress, AlertPhase::Escalating, out);
    } else {
        transition(progress, AlertPhase::Completed, out);
    }
}

fn transition(progress: &mut AlertProgress, to: AlertPhase, out: &mut Vec<TriggerDecision>) {
    let from = progress.phase;
    if from == to {
        return;
    }
    progress.phase = to;
    out.push(TriggerDecision::Transition { from, to });
}

fn minutes_until(at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (at - now).num_minutes().max(0)
}
