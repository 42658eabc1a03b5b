//! Per-alert position tracking from location fixes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::tier::{Tier, TierThresholds};
use crate::geo::Coordinate;

/// One fix from the location provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub coordinate: Coordinate,
    pub timestamp: DateTime<Utc>,
    /// Horizontal accuracy radius in meters.
    pub accuracy_m: f64,
}

/// Per-alert view of where the user is relative to the target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProximityState {
    pub distance_m: Option<f64>,
    pub tier: Option<Tier>,
    pub last_sample_at: Option<DateTime<Utc>>,
    pub last_coordinate: Option<Coordinate>,
    pub last_accuracy_m: Option<f64>,
}

/// What survives a process restart: only the tier, so sensing resumes at
/// the right cadence without re-escalating from `Far`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedProximity {
    pub tier: Option<Tier>,
}

impl ProximityState {
    pub fn restore(persisted: PersistedProximity) -> Self {
        Self {
            tier: persisted.tier,
            ..Self::default()
        }
    }

    pub fn persisted(&self) -> PersistedProximity {
        PersistedProximity { tier: self.tier }
    }

    /// Fold a sample in. Returns the new tier, or `None` when the sample is
    /// not newer than the last one seen (or carries an invalid coordinate)
    /// and was discarded.
    pub fn observe(
        &mut self,
        sample: &LocationSample,
        target: &Coordinate,
        thresholds: &TierThresholds,
    ) -> Option<Tier> {
        if !sample.coordinate.is_valid() {
            return None;
        }
        if self
            .last_sample_at
            .is_some_and(|last| sample.timestamp <= last)
        {
            return None;
        }

        let distance = sample.coordinate.distance_to(target);
        let tier = thresholds.classify(distance);
        self.distance_m = Some(distance);
        self.tier = Some(tier);
        self.last_sample_at = Some(sample.timestamp);
        self.last_coordinate = Some(sample.coordinate);
        self.last_accuracy_m = Some(sample.accuracy_m);
        Some(tier)
    }

    pub fn has_fix(&self) -> bool {
        self.last_sample_at.is_some()
    }

    /// Within `radius_m` of the target according to the latest fix.
    pub fn has_arrived(&self, radius_m: f64) -> bool {
        self.distance_m.is_some_and(|d| d <= radius_m)
    }
}
