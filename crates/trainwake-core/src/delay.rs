//! Delay adjustment.
//!
//! Folds a live delay record into the scheduled arrival. Records older than
//! the freshness window, or reporting an implausible delay, are ignored and
//! the unadjusted schedule is used.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::TrainRef;

/// Externally sourced delay observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayRecord {
    pub railway_id: String,
    pub train_number: String,
    /// Positive when late, negative when early.
    pub delay_minutes: i64,
    pub observed_at: DateTime<Utc>,
}

impl DelayRecord {
    pub fn train(&self) -> TrainRef {
        TrainRef {
            railway_id: self.railway_id.clone(),
            train_number: self.train_number.clone(),
        }
    }
}

/// How the delay record was used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayStatus {
    NoRecord,
    Stale,
    /// Beyond the sanity bound; clamped value reported but not applied.
    Suspect { clamped_minutes: i64 },
    Applied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustedArrival {
    pub scheduled: DateTime<Utc>,
    pub at: DateTime<Utc>,
    pub status: DelayStatus,
}

impl AdjustedArrival {
    pub fn unadjusted(scheduled: DateTime<Utc>) -> Self {
        Self {
            scheduled,
            at: scheduled,
            status: DelayStatus::NoRecord,
        }
    }

    /// Offset applied to the schedule.
    pub fn offset(&self) -> Duration {
        self.at - self.scheduled
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayAdjuster {
    freshness: Duration,
    sanity_bound_minutes: i64,
}

impl Default for DelayAdjuster {
    fn default() -> Self {
        Self::new(Duration::minutes(5), 180)
    }
}

impl DelayAdjuster {
    pub fn new(freshness: Duration, sanity_bound_minutes: i64) -> Self {
        Self {
            freshness,
            sanity_bound_minutes: sanity_bound_minutes.abs(),
        }
    }

    pub fn is_fresh(&self, record: &DelayRecord, now: DateTime<Utc>) -> bool {
        now - record.observed_at <= self.freshness
    }

    pub fn adjust(
        &self,
        scheduled: DateTime<Utc>,
        record: Option<&DelayRecord>,
        now: DateTime<Utc>,
    ) -> AdjustedArrival {
        let Some(record) = record else {
            return AdjustedArrival::unadjusted(scheduled);
        };

        if !self.is_fresh(record, now) {
            return AdjustedArrival {
                status: DelayStatus::Stale,
                ..AdjustedArrival::unadjusted(scheduled)
            };
        }

        if record.delay_minutes.abs() > self.sanity_bound_minutes {
            let clamped = record
                .delay_minutes
                .clamp(-self.sanity_bound_minutes, self.sanity_bound_minutes);
            return AdjustedArrival {
                status: DelayStatus::Suspect {
                    clamped_minutes: clamped,
                },
                ..AdjustedArrival::unadjusted(scheduled)
            };
        }

        AdjustedArrival {
            scheduled,
            at: scheduled + Duration::minutes(record.delay_minutes),
            status: DelayStatus::Applied,
        }
    }
}
